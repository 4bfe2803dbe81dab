// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! A worker: one OS thread driving a `ready` queue of user threads and a
//! `next` queue of freshly-arrived parcels, per spec §3/§4.3.

use crate::error::Result;
use crate::queue::{self, Local, Steal};
use crate::user_thread::{UserThread, UserThreadRef};
use crate::Submit;
use fastrand_lite::FastRand;
use fiber::stack::DefaultFiberStack;
use fiber::FiberResult;
use rt_gas::Gas;
use rt_parcel::{ActionAttrs, ActionRegistry, InvokeStatus, Parcel};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Number of stacks a worker keeps mapped for reuse before it starts
/// `munmap`-ing them again.
const STACK_FREELIST_CAP: usize = 64;

/// Shared, cross-worker state: the sibling steal handles, the overflow
/// queue, and everything needed to actually run a parcel's handler.
pub(crate) struct Shared {
    pub registry: Arc<ActionRegistry>,
    pub gas: Arc<Gas>,
    pub submit: Arc<dyn Submit>,
    pub stack_bytes: usize,
    pub backoff_max: u8,
    pub shutdown: AtomicBool,
    /// Parcels that arrived (locally enqueued or delivered by the network
    /// dispatcher) but have not yet been claimed by a worker.
    pub overflow_next: spin::Mutex<VecDeque<Box<Parcel>>>,
    /// Already-bound user threads that overflowed a worker's local `ready`
    /// deque, or that were parked and have since been woken.
    pub overflow_ready: WakeQueue,
    pub idle_workers: AtomicUsize,
    pub worker_count: usize,
}

/// A handle `rt-lco` uses to make a parked user thread runnable again once
/// the LCO it was waiting on is satisfied. Cheap to clone; every LCO and
/// every worker shares the same underlying queue.
#[derive(Clone)]
pub struct WakeQueue(Arc<spin::Mutex<VecDeque<UserThreadRef>>>);

impl WakeQueue {
    pub(crate) fn new() -> Self {
        Self(Arc::new(spin::Mutex::new(VecDeque::new())))
    }

    /// Makes a previously-parked thread runnable again.
    pub fn wake(&self, thread: UserThreadRef) {
        self.0.lock().push_back(thread);
    }

    fn pop(&self) -> Option<UserThreadRef> {
        self.0.lock().pop_front()
    }

    fn is_empty(&self) -> bool {
        self.0.lock().is_empty()
    }
}

pub struct Worker {
    pub id: usize,
    shared: Arc<Shared>,
    ready: Local<UserThreadRef>,
    siblings: Vec<Steal<UserThreadRef>>,
    rand: FastRand,
    stack_freelist: Vec<DefaultFiberStack>,
}

impl Worker {
    pub(crate) fn new(
        id: usize,
        shared: Arc<Shared>,
        ready: Local<UserThreadRef>,
        siblings: Vec<Steal<UserThreadRef>>,
        seed: u64,
    ) -> Self {
        Self {
            id,
            shared,
            ready,
            siblings,
            rand: FastRand::from_seed(seed),
            stack_freelist: Vec::new(),
        }
    }

    /// Pushes a freshly-arrived parcel onto this worker's `next` queue (the
    /// network dispatcher, or a local `send`, calls this).
    pub fn deliver(&self, parcel: Box<Parcel>) {
        self.shared.overflow_next.lock().push_back(parcel);
    }

    /// Runs this worker's scheduling loop until shutdown is requested and
    /// both its `ready` and `next` queues (and the shared overflow queues)
    /// have drained.
    pub fn run(&mut self) {
        let mut backoff = spin::Backoff::with_max_exponent(self.shared.backoff_max);
        let mut idle = false;
        loop {
            if let Some(parcel) = self.next_parcel() {
                self.note_busy(&mut idle);
                backoff.reset();
                self.bind_and_run(parcel);
                continue;
            }
            if let Some(thread) = self.next_ready() {
                self.note_busy(&mut idle);
                backoff.reset();
                self.run_thread(thread);
                continue;
            }
            if self.shared.shutdown.load(Ordering::Acquire) && self.is_quiescent() {
                break;
            }
            if !idle {
                idle = true;
                self.shared.idle_workers.fetch_add(1, Ordering::Relaxed);
            }
            backoff.spin();
        }
        if idle {
            self.shared.idle_workers.fetch_sub(1, Ordering::Relaxed);
        }
    }

    fn note_busy(&self, idle: &mut bool) {
        if *idle {
            *idle = false;
            self.shared.idle_workers.fetch_sub(1, Ordering::Relaxed);
        }
    }

    fn is_quiescent(&self) -> bool {
        self.ready.is_empty()
            && self.shared.overflow_ready.is_empty()
            && self.shared.overflow_next.lock().is_empty()
    }

    fn next_parcel(&self) -> Option<Box<Parcel>> {
        self.shared.overflow_next.lock().pop_front()
    }

    fn next_ready(&mut self) -> Option<UserThreadRef> {
        if let Some(t) = self.ready.pop() {
            return Some(t);
        }
        if let Some(t) = self.shared.overflow_ready.pop() {
            return Some(t);
        }
        self.steal_from_sibling()
    }

    fn steal_from_sibling(&mut self) -> Option<UserThreadRef> {
        if self.siblings.is_empty() {
            return None;
        }
        let start = self.rand.fastrand_n(self.siblings.len() as u32) as usize;
        for i in 0..self.siblings.len() {
            let idx = (start + i) % self.siblings.len();
            if let Some(t) = self.siblings[idx].steal() {
                return Some(t);
            }
        }
        None
    }

    /// Either runs `parcel`'s handler synchronously (`INTERRUPT`) or binds
    /// it to a user thread and schedules that thread (`DEFAULT`/`TASK`),
    /// per spec §4.3's dispatch table.
    fn bind_and_run(&mut self, parcel: Box<Parcel>) {
        let Some(entry) = self.shared.registry.lookup(parcel.action) else {
            tracing::warn!(action = parcel.action, "dropping parcel naming unregistered action");
            return;
        };

        if entry.attrs.contains(ActionAttrs::INTERRUPT) {
            let status = self
                .shared
                .registry
                .invoke(entry, &self.shared.gas, parcel.target, parcel.get_data());
            self.complete(parcel, status, None);
            return;
        }

        match self.spawn_user_thread(parcel) {
            Ok(thread) => self.schedule_local(UserThreadRef::new(Box::new(thread))),
            Err(err) => tracing::error!(%err, "failed to spawn user thread for parcel"),
        }
    }

    fn spawn_user_thread(&mut self, parcel: Box<Parcel>) -> Result<UserThread> {
        let stack = match self.stack_freelist.pop() {
            Some(stack) => stack,
            None => DefaultFiberStack::new(self.shared.stack_bytes).map_err(crate::Error::StackAlloc)?,
        };
        Ok(UserThread::new(
            stack,
            self.shared.registry.clone(),
            self.shared.gas.clone(),
            parcel,
        ))
    }

    /// Resumes `thread` once. Dispatches on whether it yielded, parked, or
    /// ran to completion.
    fn run_thread(&mut self, thread_ref: UserThreadRef) {
        let thread = unsafe { thread_ref.as_mut() };
        match thread.resume() {
            FiberResult::Yield(crate::user_thread::ParkReason::Yield) => {
                self.schedule_local(thread_ref);
            }
            FiberResult::Yield(crate::user_thread::ParkReason::Park(target)) => {
                // Safety: the LCO (or other object) this names outlives the
                // park, per `rt_sched::park`'s contract.
                unsafe { target.as_ref() }.park(thread_ref);
            }
            FiberResult::Return((parcel, status)) => {
                // Safety: the fiber has completed; nobody else holds this ref.
                let thread = unsafe { thread_ref.into_box() };
                if self.stack_freelist.len() < STACK_FREELIST_CAP {
                    self.stack_freelist.push(thread.into_stack());
                }
                self.complete(parcel, status, None);
            }
        }
    }

    fn complete(&self, parcel: Box<Parcel>, status: InvokeStatus, _thread: Option<UserThreadRef>) {
        match status {
            InvokeStatus::Resend => {
                self.shared.submit.submit(parcel);
            }
            InvokeStatus::Completed(value) => {
                if let Some(cont) = parcel.continuation(value) {
                    self.shared.submit.submit(cont);
                }
            }
        }
    }

    /// Schedules `thread` onto this worker's own `ready` queue, overflowing
    /// to the shared queue if it is full.
    pub fn schedule_local(&self, thread: UserThreadRef) {
        if let Err(thread) = self.ready.push_back(thread) {
            self.shared.overflow_ready.wake(thread);
        }
    }
}

pub(crate) fn make_rings(count: usize) -> (Vec<Local<UserThreadRef>>, Vec<Vec<Steal<UserThreadRef>>>) {
    let mut locals = Vec::with_capacity(count);
    let mut steals = Vec::with_capacity(count);
    for _ in 0..count {
        let (local, steal) = queue::new();
        locals.push(local);
        steals.push(steal);
    }
    let siblings = (0..count)
        .map(|i| {
            steals
                .iter()
                .enumerate()
                .filter(|(j, _)| *j != i)
                .map(|(_, s)| s.clone())
                .collect::<Vec<_>>()
        })
        .collect();
    (locals, siblings)
}
