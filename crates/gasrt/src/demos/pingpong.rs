// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! A counter bounced between neighboring localities, translated from
//! `examples/hpx/pingpong.c`. `Handler::Plain` cannot see the parcel that
//! invoked it, so the entry hop's completion future travels as part of the
//! payload itself: every hop carries `(counter, done)`, `done` starting out
//! `NULL` until the first hop allocates a real future and starts threading
//! its address through every further forward.

use crate::{ActionAttrs, Builder, GlobalAddr, Handler, Result};
use rt_parcel::ActionId;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

pub const ACTION_NAME: &str = "pingpong";

static PONG_ACTION: OnceLock<ActionId> = OnceLock::new();
/// Total number of hops observed on this locality: the entry hop plus every
/// forward down to and including the terminal (`counter == 0`) hop.
static HOPS: AtomicU64 = AtomicU64::new(0);

/// Registers the `pingpong` action. Must run before [`crate::init`].
///
/// # Errors
///
/// Returns an error if `pingpong` is already registered.
pub fn register(builder: &mut Builder) -> Result<()> {
    let id = builder.register(ACTION_NAME, Handler::Plain(handle), ActionAttrs::DEFAULT)?;
    PONG_ACTION
        .set(id)
        .unwrap_or_else(|_| panic!("pingpong action registered twice"));
    Ok(())
}

/// Encodes the entry payload for `rounds` round trips: `2*rounds` forwarded
/// hops before the counter reaches zero and the chain terminates.
#[must_use]
pub fn payload(rounds: u64) -> Vec<u8> {
    encode(2 * rounds, GlobalAddr::NULL)
}

/// The number of hops observed on this locality so far.
pub fn hop_count() -> u64 {
    HOPS.load(Ordering::Relaxed)
}

fn encode(counter: u64, done: GlobalAddr) -> Vec<u8> {
    let mut v = Vec::with_capacity(20);
    v.extend(counter.to_le_bytes());
    v.extend(done.locality().to_le_bytes());
    v.extend(done.offset().to_le_bytes());
    v
}

fn decode(bytes: &[u8]) -> (u64, GlobalAddr) {
    let counter = u64::from_le_bytes(bytes[0..8].try_into().unwrap_or_default());
    let locality = u32::from_le_bytes(bytes[8..12].try_into().unwrap_or_default());
    let offset = u64::from_le_bytes(bytes[12..20].try_into().unwrap_or_default());
    (counter, GlobalAddr::new(locality, offset))
}

fn forward(counter: u64, done: GlobalAddr) -> Result<()> {
    let action = *PONG_ACTION.get().expect("pingpong registered before run");
    let rank = crate::my_rank()?;
    let ranks = crate::num_ranks()?;
    let target = crate::there((rank + 1) % ranks);

    let mut parcel = crate::Parcel::acquire(20).with_data(&encode(counter - 1, done));
    parcel.set_target(target);
    parcel.set_action(action);
    crate::send(parcel)
}

fn handle(payload: &[u8]) -> Vec<u8> {
    HOPS.fetch_add(1, Ordering::Relaxed);
    let (counter, done) = decode(payload);

    if counter == 0 {
        if !done.is_null() {
            if let Err(e) = rt_lco::set(done, &0u64.to_le_bytes(), None, None) {
                tracing::error!(error = %e, "pingpong: failed to signal completion");
            }
        }
        return Vec::new();
    }

    if !done.is_null() {
        if let Err(e) = forward(counter, done) {
            tracing::error!(error = %e, "pingpong: failed to forward");
        }
        return Vec::new();
    }

    // The entry hop: allocate the completion future, thread it through every
    // further forward, then block on it before replying ourselves.
    let done = match rt_lco::future(8) {
        Ok(addr) => addr,
        Err(e) => {
            tracing::error!(error = %e, "pingpong: failed to allocate completion future");
            return Vec::new();
        }
    };
    if let Err(e) = forward(counter, done) {
        tracing::error!(error = %e, "pingpong: failed to forward");
        return Vec::new();
    }
    let mut buf = [0u8; 8];
    if let Err(e) = rt_lco::get(done, &mut buf) {
        tracing::error!(error = %e, "pingpong: failed waiting for completion");
    }
    let _ = rt_lco::delete(done);
    buf.to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_encodes_doubled_rounds_with_no_future_yet() {
        let (counter, done) = decode(&payload(5));
        assert_eq!(counter, 10);
        assert!(done.is_null());
    }
}
