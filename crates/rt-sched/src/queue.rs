// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! A bounded, single-producer/multi-consumer work-stealing deque.
//!
//! Each worker owns a [`Local`] end that it pushes and pops from (LIFO, for
//! cache locality on the owning thread); every other worker holds a [`Steal`]
//! handle that takes from the opposite end (FIFO), so a thief disturbs the
//! owner's own fast path as little as possible. This is the classic
//! Chase-Lev deque; `rt-sched`'s worker loop overflows to the scheduler's
//! global queue once a `Local` fills up.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicIsize, Ordering};
use std::sync::Arc;

/// Fixed deque capacity. A worker this far behind on its own ready queue
/// overflows to the global run queue rather than growing the buffer.
const CAPACITY: usize = 256;

struct Buffer<T> {
    slots: Box<[UnsafeCell<MaybeUninit<T>>]>,
}

impl<T> Buffer<T> {
    fn new() -> Self {
        Self {
            slots: std::iter::repeat_with(|| UnsafeCell::new(MaybeUninit::uninit()))
                .take(CAPACITY)
                .collect(),
        }
    }

    /// # Safety
    ///
    /// The caller must not concurrently read or write the same slot.
    unsafe fn write(&self, idx: isize, val: T) {
        let i = (idx as usize) & (CAPACITY - 1);
        unsafe { (*self.slots[i].get()).write(val) };
    }

    /// # Safety
    ///
    /// The caller must only read a slot that has been written and not yet
    /// read, and must not race another reader for the same slot.
    unsafe fn read(&self, idx: isize) -> T {
        let i = (idx as usize) & (CAPACITY - 1);
        unsafe { (*self.slots[i].get()).assume_init_read() }
    }
}

// Safety: access to `slots` is only ever performed through the head/tail
// protocol in `Local`/`Steal`, which guarantees exclusivity.
unsafe impl<T: Send> Send for Buffer<T> {}
unsafe impl<T: Send> Sync for Buffer<T> {}

struct Inner<T> {
    /// Index of the oldest element; advanced by stealers via CAS.
    head: AtomicIsize,
    /// Index one past the newest element; only ever touched by the owner.
    tail: AtomicIsize,
    buffer: Buffer<T>,
}

/// The owning end of a deque. Pushes and (LIFO) pops are wait-free and
/// touched only by the worker that owns this handle.
pub struct Local<T> {
    inner: Arc<Inner<T>>,
}

/// A stealing end of a deque, cloned out to every sibling worker.
pub struct Steal<T> {
    inner: Arc<Inner<T>>,
}

/// Creates a new empty deque, returning the owning end and a template
/// stealing handle (clone it once per sibling worker).
pub fn new<T>() -> (Local<T>, Steal<T>) {
    let inner = Arc::new(Inner {
        head: AtomicIsize::new(0),
        tail: AtomicIsize::new(0),
        buffer: Buffer::new(),
    });
    (
        Local {
            inner: inner.clone(),
        },
        Steal { inner },
    )
}

impl<T: Copy> Local<T> {
    /// Pushes `val` onto the deque. Returns `val` back if the deque is full;
    /// the caller is expected to overflow it onto the global run queue.
    pub fn push_back(&self, val: T) -> Result<(), T> {
        let t = self.inner.tail.load(Ordering::Relaxed);
        let h = self.inner.head.load(Ordering::Acquire);
        if t.wrapping_sub(h) >= CAPACITY as isize {
            return Err(val);
        }
        // Safety: only the owner writes, and only at `t`, which no stealer
        // can have claimed yet because `tail` has not advanced past it.
        unsafe { self.inner.buffer.write(t, val) };
        self.inner.tail.store(t.wrapping_add(1), Ordering::Release);
        Ok(())
    }

    /// Pops the most recently pushed element (LIFO), racing stealers for the
    /// last remaining slot if necessary.
    pub fn pop(&self) -> Option<T> {
        let t = self.inner.tail.load(Ordering::Relaxed);
        let h = self.inner.head.load(Ordering::Relaxed);
        if h >= t {
            return None;
        }
        let t = t.wrapping_sub(1);
        self.inner.tail.store(t, Ordering::Relaxed);

        let h = self.inner.head.load(Ordering::SeqCst);
        if h > t {
            // Someone stole the last element first; restore tail.
            self.inner.tail.store(t.wrapping_add(1), Ordering::Relaxed);
            return None;
        }

        // Safety: `t` has not been claimed by a stealer (checked above).
        let val = unsafe { self.inner.buffer.read(t) };
        if h == t {
            // Last element: race stealers for it via the same CAS they use.
            let won = self
                .inner
                .head
                .compare_exchange(h, h.wrapping_add(1), Ordering::SeqCst, Ordering::Relaxed)
                .is_ok();
            self.inner.tail.store(t.wrapping_add(1), Ordering::Relaxed);
            if !won {
                return None;
            }
        }
        Some(val)
    }

    pub fn is_empty(&self) -> bool {
        let t = self.inner.tail.load(Ordering::Relaxed);
        let h = self.inner.head.load(Ordering::Relaxed);
        h >= t
    }
}

impl<T: Copy> Steal<T> {
    /// Steals the oldest element (FIFO), if any.
    pub fn steal(&self) -> Option<T> {
        let h = self.inner.head.load(Ordering::Acquire);
        let t = self.inner.tail.load(Ordering::Acquire);
        if h >= t {
            return None;
        }
        // Safety: `h` has been claimed by nobody yet; the CAS below resolves
        // the race against concurrent stealers and the owner's `pop`.
        let val = unsafe { self.inner.buffer.read(h) };
        match self
            .inner
            .head
            .compare_exchange(h, h.wrapping_add(1), Ordering::SeqCst, Ordering::Relaxed)
        {
            Ok(_) => Some(val),
            Err(_) => None,
        }
    }
}

impl<T> Clone for Steal<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_and_pop_is_lifo() {
        let (local, _steal) = new::<u32>();
        local.push_back(1).unwrap();
        local.push_back(2).unwrap();
        local.push_back(3).unwrap();
        assert_eq!(local.pop(), Some(3));
        assert_eq!(local.pop(), Some(2));
        assert_eq!(local.pop(), Some(1));
        assert_eq!(local.pop(), None);
    }

    #[test]
    fn steal_takes_oldest_first() {
        let (local, steal) = new::<u32>();
        local.push_back(1).unwrap();
        local.push_back(2).unwrap();
        local.push_back(3).unwrap();
        assert_eq!(steal.steal(), Some(1));
        assert_eq!(local.pop(), Some(3));
        assert_eq!(steal.steal(), Some(2));
        assert_eq!(local.pop(), None);
    }

    #[test]
    fn push_back_overflows_when_full() {
        let (local, _steal) = new::<u32>();
        for i in 0..CAPACITY as u32 {
            local.push_back(i).unwrap();
        }
        assert_eq!(local.push_back(999), Err(999));
    }

    #[test]
    fn concurrent_steal_drains_exactly_once() {
        use std::thread;

        let (local, steal) = new::<u32>();
        for i in 0..200 {
            local.push_back(i).unwrap();
        }
        let steal2 = steal.clone();
        let t1 = thread::spawn(move || {
            let mut n = 0;
            while steal.steal().is_some() {
                n += 1;
            }
            n
        });
        let t2 = thread::spawn(move || {
            let mut n = 0;
            while steal2.steal().is_some() {
                n += 1;
            }
            n
        });
        let mut total = t1.join().unwrap() + t2.join().unwrap();
        while local.pop().is_some() {
            total += 1;
        }
        assert_eq!(total, 200);
    }
}
