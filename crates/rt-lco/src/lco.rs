// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The common LCO prefix: lock discipline, the condition-variable-like wait
//! queue, and dispatch across the five variants.
//!
//! Spec §3 describes an LCO as a variable-size object beginning with a
//! lockable vtable pointer, whose tag bits coexist with the lock in the
//! pointer's low alignment bits. Rust cannot soundly embed a trait object in
//! the raw byte arena `rt-gas` pins for concurrent access, so we take the
//! idiomatic equivalent: a typed, tagged [`Kind`] enum behind one
//! [`spin::Mutex`] per LCO (this *is* the "lockable vtable pointer" in
//! spirit — one word whose state covers both the discriminant and the lock),
//! addressed indirectly through [`crate::table::LcoTable`] rather than
//! through the raw pinned bytes. See `DESIGN.md`.

use crate::and_gate::AndState;
use crate::error::{Error, Result};
use crate::future::FutureState;
use crate::gather::{GatherState, StepOutcome};
use crate::semaphore::SemState;
use rt_parcel::Parcel;
use rt_sched::{Submit, UserThreadRef, WakeQueue};
use std::collections::VecDeque;
use std::mem;

pub(crate) enum Kind {
    Future(FutureState),
    And(AndState),
    Sem(SemState),
    Gather(GatherState),
}

impl Kind {
    fn is_triggered(&self) -> bool {
        match self {
            Kind::Future(f) => f.is_triggered(),
            Kind::And(a) => a.is_triggered(),
            Kind::Sem(s) => s.is_triggered(),
            Kind::Gather(g) => g.is_triggered(),
        }
    }
}

struct Inner {
    kind: Kind,
    deleted: bool,
    /// The condition-variable's waiter list: a singly-linked list of parked
    /// user threads in spirit (spec §3); `VecDeque` gives us the same FIFO
    /// order without hand-rolling intrusive links, the same choice
    /// `rt-sched`'s own `WakeQueue` makes for its overflow ready queue.
    waiters: VecDeque<UserThreadRef>,
    /// Parcels registered via `attach`, launched once the LCO fires.
    attached: Vec<Box<Parcel>>,
}

/// Tracks, per OS thread, whether a user thread running on it already holds
/// an LCO lock. Spec §4.4: "a user thread may hold at most one LCO lock at
/// a time (checked in debug builds)".
#[cfg(debug_assertions)]
thread_local! {
    static LCO_LOCK_HELD: std::cell::Cell<bool> = const { std::cell::Cell::new(false) };
}

#[cfg(debug_assertions)]
struct LockDepthGuard;

#[cfg(debug_assertions)]
impl LockDepthGuard {
    fn enter() -> Self {
        let already = LCO_LOCK_HELD.with(|c| c.replace(true));
        assert!(!already, "attempted to hold two LCO locks at once on one user thread");
        Self
    }
}

#[cfg(debug_assertions)]
impl Drop for LockDepthGuard {
    fn drop(&mut self) {
        LCO_LOCK_HELD.with(|c| c.set(false));
    }
}

/// A single LCO: the condition-variable/wait-queue discipline common to
/// every variant, plus a [`Kind`]-tagged payload.
pub struct Lco {
    inner: spin::Mutex<Inner>,
    wake: WakeQueue,
}

/// What an attempt to make progress under the lock resolved to.
enum Attempt<T> {
    /// Done; the lock is released as-is.
    Ready(Result<T>),
    /// Done, and this call just transitioned the LCO into a fired state:
    /// wake every waiter and drain attached parcels before releasing the
    /// lock.
    ReadyFired(Result<T>),
    Pending,
}

impl Lco {
    pub(crate) fn new(kind: Kind, wake: WakeQueue) -> Self {
        Self {
            inner: spin::Mutex::new(Inner {
                kind,
                deleted: false,
                waiters: VecDeque::new(),
                attached: Vec::new(),
            }),
            wake,
        }
    }

    /// Runs `attempt` under the lock, looping through a park/resume cycle
    /// each time it reports [`Attempt::Pending`] — spec §4.3's "wait on
    /// LCO" protocol: park with the lock logically still held (the
    /// continuation that runs on the new stack, [`Lco::park`], enqueues us
    /// and only then releases it), and on resume reacquire the lock before
    /// re-checking.
    fn block_on<T>(
        &self,
        submit: &dyn Submit,
        mut attempt: impl FnMut(&mut Inner) -> Attempt<T>,
    ) -> Result<T> {
        // Held for the whole call, not just while actually parked: a
        // blocking wait/get is the unit spec §4.4 means by "holds an LCO
        // lock" for the purpose of the at-most-one-at-a-time debug check,
        // even though the underlying spinlock bit is physically released
        // while the thread is parked.
        #[cfg(debug_assertions)]
        let _depth_guard = LockDepthGuard::enter();
        loop {
            let mut guard = self.inner.lock();
            if guard.deleted {
                return Err(Error::Deleted);
            }
            match attempt(&mut guard) {
                Attempt::Ready(result) => return result,
                Attempt::ReadyFired(result) => {
                    Self::notify_all(&mut guard, &self.wake);
                    Self::drain_attached(&mut guard, submit);
                    return result;
                }
                Attempt::Pending => {
                    // The guard is forgotten, not dropped: the spinlock bit
                    // stays set across the suspend. `Self::park` (called on
                    // the worker's stack once the switch completes)
                    // reconstructs a guard over the same lock and releases
                    // it once the thread is safely enqueued.
                    mem::forget(guard);
                    // Safety: `self` is reached through an `Arc` held by the
                    // locality's `LcoTable` for at least as long as this
                    // thread could be parked on it (an LCO is only removed
                    // from the table, and thus dropped, by `delete`, which a
                    // well-behaved caller only issues once nobody is still
                    // waiting on it).
                    unsafe { rt_sched::park(self) };
                }
            }
        }
    }

    fn notify_all(inner: &mut Inner, wake: &WakeQueue) {
        while let Some(thread) = inner.waiters.pop_front() {
            wake.wake(thread);
        }
    }

    fn notify_one(inner: &mut Inner, wake: &WakeQueue) {
        if let Some(thread) = inner.waiters.pop_front() {
            wake.wake(thread);
        }
    }

    fn drain_attached(inner: &mut Inner, submit: &dyn Submit) {
        for parcel in inner.attached.drain(..) {
            submit.submit(parcel);
        }
    }

    /// Generic `set`: a future's value-carrying set, an AND-gate's
    /// decrement, or a semaphore's V. Not valid for gather variants (use
    /// [`Lco::setid`]).
    pub fn set(&self, value: &[u8], submit: &dyn Submit) -> Result<()> {
        let mut guard = self.inner.lock();
        if guard.deleted {
            return Err(Error::Deleted);
        }
        let triggered = match &mut guard.kind {
            Kind::Future(f) => f.set(value),
            Kind::And(a) => a.set(),
            Kind::Sem(s) => {
                s.v();
                true
            }
            Kind::Gather(_) => return Err(Error::Unsupported),
        };
        if triggered {
            match &guard.kind {
                Kind::Sem(_) => Self::notify_one(&mut guard, &self.wake),
                _ => Self::notify_all(&mut guard, &self.wake),
            }
            Self::drain_attached(&mut guard, submit);
        }
        Ok(())
    }

    /// Blocks until the LCO is triggered (future full, AND-gate at zero, a
    /// semaphore permit available). `submit` is only consulted if the LCO
    /// turns out to have `attach`ed parcels to drain, which `wait` itself
    /// never causes (it only consumes state another call already fired),
    /// but is threaded through for symmetry with the rest of the API.
    pub fn wait(&self, submit: &dyn Submit) -> Result<()> {
        self.block_on(submit, |inner| match &mut inner.kind {
            Kind::Future(f) => match f.try_read() {
                Some(Ok(_)) => Attempt::Ready(Ok(())),
                Some(Err(code)) => Attempt::Ready(Err(Error::Signaled(code))),
                None => Attempt::Pending,
            },
            Kind::And(a) => {
                if a.is_triggered() {
                    match a.error_code() {
                        Some(code) => Attempt::Ready(Err(Error::Signaled(code))),
                        None => Attempt::Ready(Ok(())),
                    }
                } else {
                    Attempt::Pending
                }
            }
            Kind::Sem(s) => {
                if let Some(code) = s.error_code() {
                    return Attempt::Ready(Err(Error::Signaled(code)));
                }
                if s.try_p() {
                    Attempt::Ready(Ok(()))
                } else {
                    Attempt::Pending
                }
            }
            Kind::Gather(g) => {
                if let Some(code) = g.error_code() {
                    return Attempt::Ready(Err(Error::Signaled(code)));
                }
                if g.is_triggered() {
                    Attempt::Ready(Ok(()))
                } else {
                    Attempt::Pending
                }
            }
        })
    }

    /// Blocks until a value is available and copies (up to) `out.len()`
    /// bytes into it, returning the number of bytes written.
    pub fn get(&self, out: &mut [u8], submit: &dyn Submit) -> Result<usize> {
        self.block_on(submit, |inner| match &mut inner.kind {
            Kind::Future(f) => match f.try_read() {
                Some(Ok(value)) => {
                    let n = value.len().min(out.len());
                    out[..n].copy_from_slice(&value[..n]);
                    Attempt::Ready(Ok(n))
                }
                Some(Err(code)) => Attempt::Ready(Err(Error::Signaled(code))),
                None => Attempt::Pending,
            },
            Kind::And(a) => {
                if a.is_triggered() {
                    match a.error_code() {
                        Some(code) => Attempt::Ready(Err(Error::Signaled(code))),
                        None => Attempt::Ready(Ok(0)),
                    }
                } else {
                    Attempt::Pending
                }
            }
            Kind::Sem(s) => {
                if let Some(code) = s.error_code() {
                    return Attempt::Ready(Err(Error::Signaled(code)));
                }
                if s.try_p() {
                    Attempt::Ready(Ok(0))
                } else {
                    Attempt::Pending
                }
            }
            Kind::Gather(_) => Attempt::Ready(Err(Error::Unsupported)),
        })
    }

    /// Like [`Lco::get`], but resets the LCO afterward where that is
    /// meaningful (semaphore, gather); a no-op reset on a future or
    /// AND-gate (spec §3 I4: futures are monotonic).
    pub fn get_reset(&self, out: &mut [u8], submit: &dyn Submit) -> Result<usize> {
        let n = self.get(out, submit)?;
        let _ = self.reset();
        Ok(n)
    }

    /// Contributes participant `id`'s row to a gather/all-to-all LCO,
    /// blocking if the LCO is mid-read-phase from a previous round. Waking
    /// waiters and draining attached parcels only happens when this call is
    /// the one that flips the phase (`StepOutcome::Done { flipped: true }`),
    /// mapped onto [`Attempt::ReadyFired`] so `block_on` does it under the
    /// still-held lock.
    pub fn setid(&self, id: usize, bytes: &[u8], submit: &dyn Submit) -> Result<()> {
        self.block_on(submit, |inner| {
            let Kind::Gather(g) = &mut inner.kind else {
                return Attempt::Ready(Err(Error::Unsupported));
            };
            match g.setid(id, bytes) {
                StepOutcome::Done { flipped: true } => Attempt::ReadyFired(Ok(())),
                StepOutcome::Done { flipped: false } => Attempt::Ready(Ok(())),
                StepOutcome::WrongPhase => Attempt::Pending,
            }
        })
    }

    /// Reads participant `id`'s view out of a gather/all-to-all LCO,
    /// blocking until the gather phase has completed. A flip back to the
    /// gather phase (the last reader) wakes any participants already parked
    /// in `setid` for the next round, same `ReadyFired` mapping as
    /// [`Lco::setid`].
    pub fn getid(&self, id: usize, out: &mut [u8], submit: &dyn Submit) -> Result<()> {
        self.block_on(submit, |inner| {
            let Kind::Gather(g) = &mut inner.kind else {
                return Attempt::Ready(Err(Error::Unsupported));
            };
            match g.getid(id, out) {
                StepOutcome::Done { flipped: true } => Attempt::ReadyFired(Ok(())),
                StepOutcome::Done { flipped: false } => Attempt::Ready(Ok(())),
                StepOutcome::WrongPhase => Attempt::Pending,
            }
        })
    }

    pub fn reset(&self) -> Result<()> {
        let mut guard = self.inner.lock();
        match &mut guard.kind {
            Kind::Future(_) | Kind::And(_) => Err(Error::Unsupported),
            Kind::Sem(s) => {
                s.reset();
                Ok(())
            }
            Kind::Gather(g) => {
                g.reset();
                Ok(())
            }
        }
    }

    pub fn error(&self, code: i32, submit: &dyn Submit) -> Result<()> {
        let mut guard = self.inner.lock();
        let newly_triggered = match &mut guard.kind {
            Kind::Future(f) => f.error(code),
            Kind::And(a) => a.error(code),
            Kind::Sem(s) => {
                s.error(code);
                true
            }
            Kind::Gather(g) => {
                g.error(code);
                true
            }
        };
        if newly_triggered {
            Self::notify_all(&mut guard, &self.wake);
            Self::drain_attached(&mut guard, submit);
        }
        Ok(())
    }

    pub fn size(&self) -> usize {
        let guard = self.inner.lock();
        match &guard.kind {
            Kind::Future(f) => f.size(),
            Kind::And(_) | Kind::Sem(_) => 0,
            Kind::Gather(g) => g.size(),
        }
    }

    /// Registers `parcel` to be launched once this LCO fires, or launches it
    /// immediately if it already has.
    pub fn attach(&self, parcel: Box<Parcel>, submit: &dyn Submit) {
        let mut guard = self.inner.lock();
        if guard.kind.is_triggered() {
            drop(guard);
            submit.submit(parcel);
        } else {
            guard.attached.push(parcel);
        }
    }

    /// Marks this LCO deleted; any thread still parked on it observes
    /// [`Error::Deleted`] on its next scheduling.
    pub(crate) fn mark_deleted(&self) {
        let mut guard = self.inner.lock();
        guard.deleted = true;
        Self::notify_all(&mut guard, &self.wake);
    }
}

impl rt_sched::ParkTarget for Lco {
    fn park(&self, thread: UserThreadRef) {
        // Safety: the calling thread forgot a guard obtained from this same
        // mutex immediately before parking (see `block_on`/`setid`/`getid`),
        // so the lock is still logically held; reconstructing a guard here
        // and dropping it is exactly spec §4.3's checkpoint-enqueue
        // continuation ("push old thread onto LCO wait queue and release
        // LCO lock"), expressed through `spin::Mutex`'s guard-forging
        // escape hatch.
        let mut guard = unsafe { self.inner.make_guard_unchecked() };
        guard.waiters.push_back(thread);
    }
}

// Safety: `Lco` is reached only through `Arc`s stored in `LcoTable`, and its
// interior mutability is entirely behind `spin::Mutex`.
unsafe impl Send for Lco {}
unsafe impl Sync for Lco {}

#[cfg(test)]
mod tests {
    use super::*;
    use rt_sched::Submit as _;
    use std::sync::Mutex as StdMutex;

    struct Collector(StdMutex<Vec<Box<Parcel>>>);
    impl Submit for Collector {
        fn submit(&self, parcel: Box<Parcel>) {
            self.0.lock().unwrap().push(parcel);
        }
    }

    fn test_wake() -> WakeQueue {
        // `WakeQueue::new` is crate-private to `rt-sched`; build one the
        // same way `rt-sched`'s own scheduler tests reach queues that never
        // get drained by a worker (we only assert on its contents here).
        rt_sched::Scheduler::new(
            1,
            64 * 1024,
            0,
            std::sync::Arc::new(rt_parcel::ActionRegistry::new()),
            std::sync::Arc::new(rt_gas::Gas::new(0, 1, 4096)),
            std::sync::Arc::new(Collector(StdMutex::new(Vec::new()))),
        )
        .wake_queue()
    }

    #[test]
    fn future_get_observes_set_value() {
        let lco = Lco::new(Kind::Future(FutureState::new(4)), test_wake());
        let submit = Collector(StdMutex::new(Vec::new()));
        lco.set(&[1, 2, 3, 4], &submit).unwrap();
        let mut out = [0u8; 4];
        assert_eq!(lco.get(&mut out, &submit).unwrap(), 4);
        assert_eq!(out, [1, 2, 3, 4]);
    }

    #[test]
    fn and_gate_notifies_all_waiters_at_zero() {
        let lco = Lco::new(Kind::And(AndState::new(2)), test_wake());
        let submit = Collector(StdMutex::new(Vec::new()));
        lco.set(&[], &submit).unwrap();
        lco.set(&[], &submit).unwrap();
        assert!(lco.wait(&submit).is_ok());
    }

    #[test]
    fn attach_fires_immediately_once_triggered() {
        let lco = Lco::new(Kind::And(AndState::new(1)), test_wake());
        let submit = Collector(StdMutex::new(Vec::new()));
        lco.set(&[], &submit).unwrap();
        lco.attach(Parcel::acquire(0), &submit);
        assert_eq!(submit.0.lock().unwrap().len(), 1);
    }

    #[test]
    fn attach_before_trigger_is_queued_and_drained_on_fire() {
        let lco = Lco::new(Kind::And(AndState::new(1)), test_wake());
        let submit = Collector(StdMutex::new(Vec::new()));
        lco.attach(Parcel::acquire(0), &submit);
        assert!(submit.0.lock().unwrap().is_empty());
        lco.set(&[], &submit).unwrap();
        assert_eq!(submit.0.lock().unwrap().len(), 1);
    }

    #[test]
    fn error_propagates_from_wait() {
        let lco = Lco::new(Kind::Future(FutureState::new(0)), test_wake());
        let submit = Collector(StdMutex::new(Vec::new()));
        lco.error(42, &submit).unwrap();
        match lco.wait(&submit) {
            Err(Error::Signaled(42)) => {}
            other => panic!("expected Signaled(42), got {other:?}"),
        }
    }
}
