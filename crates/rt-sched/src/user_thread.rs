// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! User threads: the stackful coroutine bound to a parcel while its action
//! handler runs, and the primitives (`yield_now`, `park`) a handler (or code
//! it calls into, e.g. an LCO `wait`) uses to suspend itself.

use crate::error::{Error, Result};
use fiber::stack::DefaultFiberStack;
use fiber::{Fiber, FiberResult, Suspend};
use rt_gas::Gas;
use rt_parcel::{ActionRegistry, InvokeStatus, Parcel};
use std::cell::Cell;
use std::ptr::NonNull;
use std::sync::Arc;

/// Something a parked user thread can be handed off to. Implemented by
/// `rt-lco`'s LCO wait queues: parking on a full future or an unsatisfied
/// AND-gate hands the thread here so it can be pushed onto the object's
/// intrusive wait list and woken again once the condition is satisfied.
pub trait ParkTarget {
    /// Runs on the worker's own stack, immediately after the user thread
    /// named by `thread` has been switched away from. Must eventually make
    /// `thread` runnable again (typically: store it, then later call
    /// [`Worker::wake`](crate::worker::Worker::wake) or push it onto a
    /// `next` queue) and release any lock taken before parking.
    fn park(&self, thread: UserThreadRef);
}

/// Why a user thread suspended itself.
pub enum ParkReason {
    /// Cooperative yield: re-enqueue immediately, no bookkeeping needed.
    Yield,
    /// Blocked: ownership of the thread is handed to the named target.
    Park(NonNull<dyn ParkTarget>),
}

thread_local! {
    static CURRENT_SUSPEND: Cell<Option<NonNull<Suspend<(), ParkReason>>>> = const { Cell::new(None) };
}

/// Suspends the calling user thread, yielding control back to the worker
/// that resumed it; the worker re-enqueues it onto its `ready` queue.
///
/// # Panics
///
/// Panics if called from outside a running user thread.
pub fn yield_now() {
    with_current_suspend(|s| {
        s.suspend(ParkReason::Yield);
    });
}

/// Suspends the calling user thread and transfers ownership of it to
/// `target`'s [`ParkTarget::park`].
///
/// # Safety
///
/// `target` must remain valid until `park` is called, which happens
/// synchronously on the worker's stack as soon as this function returns
/// control there — in practice this means `target` must be a pinned,
/// heap-durable object (an LCO allocated out of the GAS heap), not a
/// stack-local value.
///
/// # Panics
///
/// Panics if called from outside a running user thread.
pub unsafe fn park(target: &dyn ParkTarget) {
    let ptr = NonNull::from(target);
    with_current_suspend(|s| {
        s.suspend(ParkReason::Park(ptr));
    });
}

fn with_current_suspend<R>(f: impl FnOnce(&Suspend<(), ParkReason>) -> R) -> R {
    let ptr = CURRENT_SUSPEND.with(Cell::get).unwrap_or_else(|| {
        panic!("rt_sched::yield_now/park called outside of a running user thread")
    });
    // Safety: only ever set for the duration of the fiber body running on
    // this OS thread, by `UserThread::new`'s trampoline, below.
    f(unsafe { ptr.as_ref() })
}

type ThreadFiber = Fiber<(), ParkReason, (Box<Parcel>, InvokeStatus), (), DefaultFiberStack>;

/// One parcel bound to a stackful coroutine, ready to be driven by a
/// [`Worker`](crate::worker::Worker).
pub struct UserThread {
    fiber: ThreadFiber,
}

impl UserThread {
    /// Binds `parcel` to a fresh user thread on `stack`. The thread has not
    /// started running yet; call [`Worker::resume`](crate::worker::Worker)
    /// (via the scheduler's run loop) to begin executing the action.
    pub fn new(
        stack: DefaultFiberStack,
        registry: Arc<ActionRegistry>,
        gas: Arc<Gas>,
        parcel: Box<Parcel>,
    ) -> Self {
        let fiber = Fiber::with_stack(stack, move |(), suspend, _local: &()| {
            CURRENT_SUSPEND.with(|c| c.set(Some(NonNull::from(suspend))));

            let entry = registry
                .lookup(parcel.action)
                .expect("a parcel naming an unregistered action reached a worker");
            let status = registry.invoke(entry, &gas, parcel.target, parcel.get_data());

            CURRENT_SUSPEND.with(|c| c.set(None));
            (parcel, status)
        });
        Self { fiber }
    }

    /// Allocates a stack of `stack_bytes` and binds `parcel` to it.
    pub fn spawn(
        stack_bytes: usize,
        registry: Arc<ActionRegistry>,
        gas: Arc<Gas>,
        parcel: Box<Parcel>,
    ) -> Result<Self> {
        let stack = DefaultFiberStack::new(stack_bytes).map_err(Error::StackAlloc)?;
        Ok(Self::new(stack, registry, gas, parcel))
    }

    /// Runs (or resumes) the user thread until it next suspends or returns.
    pub fn resume(&mut self) -> FiberResult<ParkReason, (Box<Parcel>, InvokeStatus)> {
        self.fiber.resume(())
    }

    #[must_use]
    pub fn done(&self) -> bool {
        self.fiber.done()
    }

    /// Reclaims the stack of a completed user thread for reuse.
    ///
    /// # Panics
    ///
    /// Panics if the thread has not completed.
    #[must_use]
    pub fn into_stack(self) -> DefaultFiberStack {
        self.fiber.into_stack()
    }
}

/// A non-owning handle to a [`UserThread`], cheap to pass through lock-free
/// queues. Exactly one party (whichever worker eventually resumes and
/// completes the thread, or the scheduler's shutdown sweep) converts it back
/// into an owning [`Box`].
#[derive(Clone, Copy)]
pub struct UserThreadRef(NonNull<UserThread>);

impl UserThreadRef {
    #[must_use]
    pub fn new(thread: Box<UserThread>) -> Self {
        Self(NonNull::from(Box::leak(thread)))
    }

    /// # Safety
    ///
    /// Must be called at most once per `UserThreadRef`, and only once no
    /// other party can still be holding (or about to act on) a copy of it.
    #[must_use]
    pub unsafe fn into_box(self) -> Box<UserThread> {
        unsafe { Box::from_raw(self.0.as_ptr()) }
    }

    /// # Safety
    ///
    /// Must only be called while the referenced `UserThread` is guaranteed
    /// not to be concurrently resumed or freed by anyone else.
    #[must_use]
    pub unsafe fn as_mut(&self) -> &mut UserThread {
        unsafe { &mut *self.0.as_ptr() }
    }
}

// Safety: a `UserThreadRef` is resumed by exactly one worker at a time, as
// enforced by the scheduler's queues handing out each ref exactly once; the
// underlying `Fiber` has no OS-thread affinity of its own.
unsafe impl Send for UserThreadRef {}

#[cfg(test)]
mod tests {
    use super::*;
    use rt_parcel::{ActionAttrs, Handler};

    fn echo(payload: &[u8]) -> Vec<u8> {
        payload.to_vec()
    }

    #[test]
    fn runs_to_completion_and_returns_parcel() {
        let mut registry = ActionRegistry::new();
        let id = registry
            .register("echo", Handler::Plain(echo), ActionAttrs::DEFAULT)
            .unwrap();
        registry.finalize();
        let registry = Arc::new(registry);
        let gas = Arc::new(Gas::new(0, 1, 4096));

        let parcel = Parcel::acquire(3).with_data(&[9, 8, 7]);
        let mut thread = UserThread::spawn(64 * 1024, registry, gas, {
            let mut p = parcel;
            p.action = id;
            p
        })
        .unwrap();

        match thread.resume() {
            FiberResult::Return((_parcel, InvokeStatus::Completed(v))) => {
                assert_eq!(v, vec![9, 8, 7]);
            }
            _ => panic!("expected immediate completion"),
        }
        assert!(thread.done());
    }

    #[test]
    fn yield_now_suspends_and_is_resumable() {
        fn yields(_: &[u8]) -> Vec<u8> {
            crate::yield_now();
            vec![]
        }

        let mut registry = ActionRegistry::new();
        let id = registry
            .register("yields", Handler::Plain(yields), ActionAttrs::DEFAULT)
            .unwrap();
        registry.finalize();
        let registry = Arc::new(registry);
        let gas = Arc::new(Gas::new(0, 1, 4096));

        let mut parcel = Parcel::acquire(0);
        parcel.action = id;
        let mut thread = UserThread::spawn(64 * 1024, registry, gas, parcel).unwrap();

        match thread.resume() {
            FiberResult::Yield(ParkReason::Yield) => {}
            _ => panic!("expected a cooperative yield"),
        }
        match thread.resume() {
            FiberResult::Return(_) => {}
            _ => panic!("expected completion after the second resume"),
        }
    }
}
