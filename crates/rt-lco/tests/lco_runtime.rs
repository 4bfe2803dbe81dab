// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! End-to-end scenarios driving real actions through a real [`Scheduler`],
//! exercising `rt-lco`'s public API (which can only be called from inside a
//! running user thread, since `wait`/`get`/... may park) the way `gasrt`'s
//! demo binaries will.

use rt_gas::Gas;
use rt_parcel::{ActionAttrs, ActionRegistry, Handler, Parcel};
use rt_sched::{Scheduler, Submit};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};

/// Delivers every parcel straight back into the scheduler it wraps. Mirrors
/// how `gasrt`'s single-locality configuration wires a `Scheduler`'s own
/// `submit` back to its `deliver`: there is no remote locality to forward
/// to, so every parcel (an ordinary send or a fired continuation) is local.
struct Loopback(OnceLock<Arc<Scheduler>>);

impl Loopback {
    fn new() -> Arc<Self> {
        Arc::new(Self(OnceLock::new()))
    }

    fn attach(&self, scheduler: Arc<Scheduler>) {
        self.0
            .set(scheduler)
            .unwrap_or_else(|_| panic!("Loopback::attach called twice"));
    }
}

impl Submit for Loopback {
    fn submit(&self, parcel: Box<Parcel>) {
        self.0
            .get()
            .expect("Loopback::attach was not called before the scheduler started")
            .deliver(parcel);
    }
}

fn spin_until(deadline: Duration, mut done: impl FnMut() -> bool) {
    let start = Instant::now();
    while !done() {
        assert!(start.elapsed() < deadline, "condition never became true");
        std::thread::yield_now();
    }
}

/// Builds a single-locality scheduler with `rt-lco`'s actions installed,
/// registers `extra` application actions against the same registry, and
/// returns it wired up and running.
fn start(
    extra: impl FnOnce(&mut ActionRegistry) -> Vec<(&'static str, rt_parcel::ActionId)>,
) -> (Arc<Scheduler>, Arc<Gas>, Vec<(&'static str, rt_parcel::ActionId)>) {
    let mut registry = ActionRegistry::new();
    rt_lco::LcoRuntime::install_actions(&mut registry).unwrap();
    let ids = extra(&mut registry);
    registry.finalize();
    let registry = Arc::new(registry);

    let gas = Arc::new(Gas::new(0, 1, 1 << 20));
    let loopback = Loopback::new();
    let submit: Arc<dyn Submit> = loopback.clone();
    let scheduler = Arc::new(Scheduler::new(
        2,
        256 * 1024,
        4,
        registry.clone(),
        gas.clone(),
        submit,
    ));
    loopback.attach(scheduler.clone());
    rt_lco::LcoRuntime::init(gas.clone(), scheduler.wake_queue(), loopback, registry);
    (scheduler, gas, ids)
}

#[test]
fn future_set_and_get_round_trip_through_an_action() {
    static RESULT: Mutex<Vec<u8>> = Mutex::new(Vec::new());

    fn producer(_payload: &[u8]) -> Vec<u8> {
        let addr = rt_lco::future(4).unwrap();
        rt_lco::set(addr, &[1, 2, 3, 4], None, None).unwrap();
        let mut out = [0u8; 4];
        rt_lco::get(addr, &mut out).unwrap();
        *RESULT.lock().unwrap() = out.to_vec();
        Vec::new()
    }

    let (scheduler, _gas, ids) = start(|registry| {
        let id = registry
            .register("producer", Handler::Plain(producer), ActionAttrs::DEFAULT)
            .unwrap();
        vec![("producer", id)]
    });

    let mut parcel = Parcel::acquire(0);
    parcel.action = ids[0].1;
    scheduler.deliver(parcel);

    spin_until(Duration::from_secs(5), || {
        !RESULT.lock().unwrap().is_empty()
    });
    assert_eq!(*RESULT.lock().unwrap(), vec![1, 2, 3, 4]);
}

#[test]
fn countdown_and_gate_releases_every_waiter_once() {
    const WORKERS: u32 = 8;
    static DONE: AtomicUsize = AtomicUsize::new(0);
    static GATE: OnceLock<rt_gas::GlobalAddr> = OnceLock::new();

    fn worker(_payload: &[u8]) -> Vec<u8> {
        let gate = *GATE.get().unwrap();
        rt_lco::set(gate, &[], None, None).unwrap();
        Vec::new()
    }

    fn waiter(_payload: &[u8]) -> Vec<u8> {
        let gate = *GATE.get().unwrap();
        rt_lco::wait(gate).unwrap();
        DONE.fetch_add(1, Ordering::SeqCst);
        Vec::new()
    }

    let (scheduler, _gas, ids) = start(|registry| {
        let w = registry
            .register("worker", Handler::Plain(worker), ActionAttrs::DEFAULT)
            .unwrap();
        let v = registry
            .register("waiter", Handler::Plain(waiter), ActionAttrs::DEFAULT)
            .unwrap();
        vec![("worker", w), ("waiter", v)]
    });

    GATE.set(rt_lco::and_gate(WORKERS).unwrap()).unwrap();

    // Dispatch the waiter first: it must block until every worker has set.
    let mut parcel = Parcel::acquire(0);
    parcel.action = ids[1].1;
    scheduler.deliver(parcel);

    for _ in 0..WORKERS {
        let mut parcel = Parcel::acquire(0);
        parcel.action = ids[0].1;
        scheduler.deliver(parcel);
    }

    spin_until(Duration::from_secs(5), || DONE.load(Ordering::SeqCst) == 1);
}

#[test]
fn ping_pong_exchanges_a_counter_through_a_chain_of_futures() {
    // A chain of futures, each set from the previous one's value plus one;
    // the classic ping-pong pattern flattened into a single action so the
    // test doesn't need a second registered action to bounce off of.
    const ROUNDS: usize = 10;
    static FINAL: Mutex<Option<u8>> = Mutex::new(None);

    fn rally(_payload: &[u8]) -> Vec<u8> {
        let mut addrs = Vec::with_capacity(ROUNDS + 1);
        addrs.push(rt_lco::future(1).unwrap());
        rt_lco::set(addrs[0], &[0], None, None).unwrap();
        for _ in 0..ROUNDS {
            let next = rt_lco::future(1).unwrap();
            let prev = *addrs.last().unwrap();
            let mut buf = [0u8; 1];
            rt_lco::get(prev, &mut buf).unwrap();
            rt_lco::set(next, &[buf[0] + 1], None, None).unwrap();
            addrs.push(next);
        }
        let mut out = [0u8; 1];
        rt_lco::get(*addrs.last().unwrap(), &mut out).unwrap();
        *FINAL.lock().unwrap() = Some(out[0]);
        Vec::new()
    }

    let (scheduler, _gas, ids) = start(|registry| {
        let id = registry
            .register("rally", Handler::Plain(rally), ActionAttrs::DEFAULT)
            .unwrap();
        vec![("rally", id)]
    });

    let mut parcel = Parcel::acquire(0);
    parcel.action = ids[0].1;
    scheduler.deliver(parcel);

    spin_until(Duration::from_secs(5), || FINAL.lock().unwrap().is_some());
    assert_eq!(*FINAL.lock().unwrap(), Some(ROUNDS as u8));
}

#[test]
fn set_signals_lsync_and_rsync_alongside_the_target() {
    static RESULT: Mutex<Option<(u8, u8)>> = Mutex::new(None);

    fn setter(_payload: &[u8]) -> Vec<u8> {
        let target = rt_lco::future(1).unwrap();
        let lsync = rt_lco::future(0).unwrap();
        let rsync = rt_lco::future(0).unwrap();
        rt_lco::set(target, &[7], Some(lsync), Some(rsync)).unwrap();

        rt_lco::wait(lsync).unwrap();
        rt_lco::wait(rsync).unwrap();
        let mut out = [0u8; 1];
        rt_lco::get(target, &mut out).unwrap();
        *RESULT.lock().unwrap() = Some((out[0], 1));

        rt_lco::delete(target).unwrap();
        rt_lco::delete(lsync).unwrap();
        rt_lco::delete(rsync).unwrap();
        Vec::new()
    }

    let (scheduler, _gas, ids) = start(|registry| {
        let id = registry
            .register("setter", Handler::Plain(setter), ActionAttrs::DEFAULT)
            .unwrap();
        vec![("setter", id)]
    });

    let mut parcel = Parcel::acquire(0);
    parcel.action = ids[0].1;
    scheduler.deliver(parcel);

    spin_until(Duration::from_secs(5), || RESULT.lock().unwrap().is_some());
    assert_eq!(*RESULT.lock().unwrap(), Some((7, 1)));
}

#[test]
fn all_gather_every_participant_observes_the_full_row_set() {
    const PARTICIPANTS: usize = 4;
    static SEEN: OnceLock<Mutex<Vec<Vec<u8>>>> = OnceLock::new();
    static GATHER: OnceLock<rt_gas::GlobalAddr> = OnceLock::new();

    fn contribute(payload: &[u8]) -> Vec<u8> {
        let id = payload[0] as usize;
        let addr = *GATHER.get().unwrap();
        rt_lco::setid(addr, id, &[payload[0] * 10]).unwrap();
        let mut out = vec![0u8; PARTICIPANTS];
        rt_lco::getid(addr, id, &mut out).unwrap();
        SEEN.get().unwrap().lock().unwrap().push(out);
        Vec::new()
    }

    let (scheduler, _gas, ids) = start(|registry| {
        let id = registry
            .register("contribute", Handler::Plain(contribute), ActionAttrs::DEFAULT)
            .unwrap();
        vec![("contribute", id)]
    });

    SEEN.set(Mutex::new(Vec::new())).unwrap();
    GATHER
        .set(rt_lco::all_gather(PARTICIPANTS, 1).unwrap())
        .unwrap();

    for i in 0..PARTICIPANTS as u8 {
        let mut parcel = Parcel::acquire(1).with_data(&[i]);
        parcel.action = ids[0].1;
        scheduler.deliver(parcel);
    }

    spin_until(Duration::from_secs(5), || {
        SEEN.get().unwrap().lock().unwrap().len() == PARTICIPANTS
    });

    let seen = SEEN.get().unwrap().lock().unwrap();
    let expected: Vec<u8> = (0..PARTICIPANTS as u8).map(|i| i * 10).collect();
    for row in seen.iter() {
        assert_eq!(row, &expected);
    }
}
