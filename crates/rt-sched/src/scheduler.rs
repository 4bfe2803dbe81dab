// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The worker pool: spawns the OS threads, wires up their steal rings, and
//! owns the state shared between them.

use crate::worker::{make_rings, Shared, WakeQueue, Worker};
use crate::Submit;
use rt_gas::Gas;
use rt_parcel::{ActionRegistry, Parcel};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

/// A running pool of worker threads, per spec §3's "one worker per core"
/// model. Construct one per locality; `deliver` feeds it parcels (from a
/// local `send` or the network dispatcher), `shutdown` drains and joins it.
///
/// Held behind `Arc` everywhere it is shared with `rt-net`'s dispatcher (the
/// dispatcher's `submit` needs to reach back into the scheduler that owns
/// it), so `shutdown` takes `&self` and drains `handles` through a mutex
/// rather than consuming `self` by value.
pub struct Scheduler {
    shared: Arc<Shared>,
    handles: spin::Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    /// Spawns `num_workers` OS threads, each running its own `ready`/`next`
    /// loop. `submit` is where completed handlers' continuations, and
    /// pinned actions that failed to pin locally, are re-routed — normally
    /// the network dispatcher built in `rt-net`.
    #[must_use]
    pub fn new(
        num_workers: usize,
        stack_bytes: usize,
        backoff_max: u8,
        registry: Arc<ActionRegistry>,
        gas: Arc<Gas>,
        submit: Arc<dyn Submit>,
    ) -> Self {
        assert!(num_workers > 0, "a scheduler needs at least one worker");

        let shared = Arc::new(Shared {
            registry,
            gas,
            submit,
            stack_bytes,
            backoff_max,
            shutdown: AtomicBool::new(false),
            overflow_next: spin::Mutex::new(VecDeque::new()),
            overflow_ready: WakeQueue::new(),
            idle_workers: AtomicUsize::new(0),
            worker_count: num_workers,
        });

        let (locals, siblings) = make_rings(num_workers);
        let handles = locals
            .into_iter()
            .zip(siblings)
            .enumerate()
            .map(|(id, (local, sibs))| {
                let shared = shared.clone();
                // Distinct, deterministic per-worker seeds; good enough for
                // steal-order diffusion, not for anything security-sensitive.
                let seed = 0x9E37_79B9_7F4A_7C15_u64.wrapping_mul(id as u64 + 1);
                std::thread::Builder::new()
                    .name(format!("gasrt-worker-{id}"))
                    .spawn(move || {
                        let mut worker = Worker::new(id, shared, local, sibs, seed);
                        worker.run();
                    })
                    .expect("failed to spawn worker thread")
            })
            .collect();

        Self {
            shared,
            handles: spin::Mutex::new(handles),
        }
    }

    /// Hands `parcel` to the pool to be bound to a user thread (or run
    /// inline, for an `INTERRUPT` action) by whichever worker claims it
    /// first. Used for locally-targeted sends; remote targets go through
    /// the network dispatcher instead.
    pub fn deliver(&self, parcel: Box<Parcel>) {
        self.shared.overflow_next.lock().push_back(parcel);
    }

    /// Returns a cloneable handle `rt-lco` uses to wake parked user threads.
    #[must_use]
    pub fn wake_queue(&self) -> WakeQueue {
        self.shared.overflow_ready.clone()
    }

    #[must_use]
    pub fn num_workers(&self) -> usize {
        self.shared.worker_count
    }

    /// Number of workers currently backed off with nothing to do; used as a
    /// coarse liveness/load statistic.
    #[must_use]
    pub fn idle_workers(&self) -> usize {
        self.shared.idle_workers.load(Ordering::Relaxed)
    }

    /// Signals shutdown and blocks until every worker has drained its
    /// queues and exited. Idempotent: a second call observes an empty
    /// handle list and returns immediately.
    pub fn shutdown(&self) {
        self.shared.shutdown.store(true, Ordering::Release);
        for handle in self.handles.lock().drain(..) {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Submit as _;
    use rt_parcel::{ActionAttrs, Handler};
    use std::sync::Mutex as StdMutex;

    struct Collector(Arc<StdMutex<Vec<Box<Parcel>>>>);
    impl Submit for Collector {
        fn submit(&self, parcel: Box<Parcel>) {
            self.0.lock().unwrap().push(parcel);
        }
    }

    fn add_one(payload: &[u8]) -> Vec<u8> {
        vec![payload.first().copied().unwrap_or(0) + 1]
    }

    #[test]
    fn runs_a_default_action_and_fires_its_continuation() {
        let mut registry = ActionRegistry::new();
        let id = registry
            .register("add-one", Handler::Plain(add_one), ActionAttrs::DEFAULT)
            .unwrap();
        registry.finalize();

        let gas = Arc::new(Gas::new(0, 1, 4096));
        let sink = Arc::new(StdMutex::new(Vec::new()));
        let submit: Arc<dyn Submit> = Arc::new(Collector(sink.clone()));

        let scheduler = Scheduler::new(2, 256 * 1024, 4, Arc::new(registry), gas.clone(), submit);

        let cont_addr = gas.alloc_local(1).unwrap();
        let mut parcel = Parcel::acquire(1).with_data(&[41]);
        parcel.action = id;
        parcel.set_continuation(cont_addr, rt_parcel::ACTION_LCO_SET);
        scheduler.deliver(parcel);

        let mut spins = 0;
        loop {
            if !sink.lock().unwrap().is_empty() {
                break;
            }
            assert!(spins < 1_000_000, "continuation never fired");
            spins += 1;
            std::thread::yield_now();
        }
        let fired = sink.lock().unwrap();
        assert_eq!(fired[0].get_data(), &[42]);

        drop(fired);
        scheduler.shutdown();
    }
}
