// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! End-to-end scenarios for every demo (spec §8), driven through `gasrt`'s
//! own public API rather than a raw `Scheduler`.
//!
//! `gasrt::init` installs process-wide singletons and panics on a second
//! call, so every test in this file shares one locality, brought up once by
//! [`locality`]. `gasrt::run` itself funnels every call through one shared
//! completion slot (`RUN_SLOT`), so concurrent `run` calls from different
//! tests would race on each other's reply; [`RUN_LOCK`] serializes them.

use gasrt::config::Config;
use gasrt::demos::{allgather, broadcast, countdown, fib, pingpong};
use std::sync::{Mutex, Once};

static INIT: Once = Once::new();
static RUN_LOCK: Mutex<()> = Mutex::new(());

fn locality() {
    INIT.call_once(|| {
        let config = Config::single_locality();
        let mut builder = gasrt::Builder::new(config);
        gasrt::demos::register_all(&mut builder).unwrap();
        gasrt::init(builder).unwrap();
    });
}

#[test]
fn fib_computes_the_closed_form_answer_and_fires_the_expected_parcel_count() {
    locality();
    let _guard = RUN_LOCK.lock().unwrap();

    let before = fib::parcel_count();
    let status = gasrt::run(fib::ACTION_NAME, &fib::payload(5)).unwrap();
    assert_eq!(status, 5, "fib(5) == 5");

    // T(n) = T(n-1) + T(n-2) + 1, T(0) = T(1) = 1, solved by 2*fib(n+1) - 1.
    let expected_parcels = 2 * 8 - 1; // fib(6) == 8
    assert_eq!(fib::parcel_count() - before, expected_parcels);
}

#[test]
fn pingpong_completes_after_exactly_the_expected_number_of_hops() {
    locality();
    let _guard = RUN_LOCK.lock().unwrap();

    const ROUNDS: u64 = 4;
    let before = pingpong::hop_count();
    let status = gasrt::run(pingpong::ACTION_NAME, &pingpong::payload(ROUNDS)).unwrap();
    assert_eq!(status, 0, "the terminal hop always signals a zeroed reply");

    // The entry hop, plus 2*ROUNDS forwards down to and including the
    // counter == 0 terminal hop.
    assert_eq!(pingpong::hop_count() - before, 2 * ROUNDS + 1);
}

#[test]
fn countdown_terminates_exactly_once_regardless_of_random_routing() {
    locality();
    let _guard = RUN_LOCK.lock().unwrap();

    const HOPS: u64 = 9;
    let hops_before = countdown::hop_count();
    let terminations_before = countdown::termination_count();

    gasrt::run(countdown::ACTION_NAME, &countdown::payload(HOPS)).unwrap();

    assert_eq!(countdown::hop_count() - hops_before, HOPS + 1);
    assert_eq!(countdown::termination_count() - terminations_before, 1);
}

#[test]
fn broadcast_and_gate_triggers_once_every_locality_has_replied() {
    locality();
    let _guard = RUN_LOCK.lock().unwrap();

    let before = broadcast::noop_count();
    let status = gasrt::run(broadcast::ENTRY_ACTION_NAME, &[]).unwrap();
    assert_eq!(status, 0, "the join resolved successfully");

    // A single-locality run still exercises the same AND-gate-of-ranks join
    // as a multi-rank broadcast, just with a gate count of one.
    assert_eq!(broadcast::noop_count() - before, 1);
}

#[test]
fn allgather_every_participant_observes_every_contribution() {
    locality();
    let _guard = RUN_LOCK.lock().unwrap();

    const PARTICIPANTS: u32 = 4;
    let status = gasrt::run(allgather::ENTRY_ACTION_NAME, &allgather::payload(PARTICIPANTS)).unwrap();
    assert_eq!(status, i32::try_from(PARTICIPANTS).unwrap());

    let rows = allgather::observed_rows();
    assert_eq!(rows.len(), PARTICIPANTS as usize);

    let expected: Vec<f64> = (0..PARTICIPANTS).map(f64::from).collect();
    for row in &rows {
        let values: Vec<f64> = row.chunks_exact(8).map(|b| f64::from_le_bytes(b.try_into().unwrap())).collect();
        assert_eq!(values, expected);
    }
}
