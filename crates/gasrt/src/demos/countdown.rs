// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! A counter forwarded to a uniformly random locality on every hop,
//! translated from `examples/hpx/countdown.c`. Payload layout and the
//! entry-future bootstrap are identical to [`crate::demos::pingpong`]; the
//! only difference is `forward`'s choice of target.

use crate::{ActionAttrs, Builder, GlobalAddr, Handler, Result};
use rand::Rng;
use rt_parcel::ActionId;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

pub const ACTION_NAME: &str = "countdown";

static COUNTDOWN_ACTION: OnceLock<ActionId> = OnceLock::new();
static HOPS: AtomicU64 = AtomicU64::new(0);
/// Number of times the terminal (`counter == 0`) hop has fired. A correct
/// run observes this reach exactly 1, regardless of how many intermediate
/// hops landed back on the locality that started the chain.
static TERMINATIONS: AtomicU64 = AtomicU64::new(0);

/// Registers the `countdown` action. Must run before [`crate::init`].
///
/// # Errors
///
/// Returns an error if `countdown` is already registered.
pub fn register(builder: &mut Builder) -> Result<()> {
    let id = builder.register(ACTION_NAME, Handler::Plain(handle), ActionAttrs::DEFAULT)?;
    COUNTDOWN_ACTION
        .set(id)
        .unwrap_or_else(|_| panic!("countdown action registered twice"));
    Ok(())
}

/// Encodes the entry payload for a chain of `hops` random forwards before
/// the counter reaches zero.
#[must_use]
pub fn payload(hops: u64) -> Vec<u8> {
    encode(hops, GlobalAddr::NULL)
}

pub fn hop_count() -> u64 {
    HOPS.load(Ordering::Relaxed)
}

pub fn termination_count() -> u64 {
    TERMINATIONS.load(Ordering::Relaxed)
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
    let action = *COUNTDOWN_ACTION.get().expect("countdown registered before run");
    let ranks = crate::num_ranks()?;
    let target = crate::there(rand::thread_rng().gen_range(0..ranks));

    let mut parcel = crate::Parcel::acquire(20).with_data(&encode(counter - 1, done));
    parcel.set_target(target);
    parcel.set_action(action);
    crate::send(parcel)
}

fn handle(payload: &[u8]) -> Vec<u8> {
    HOPS.fetch_add(1, Ordering::Relaxed);
    let (counter, done) = decode(payload);

    if counter == 0 {
        TERMINATIONS.fetch_add(1, Ordering::Relaxed);
        if !done.is_null() {
            if let Err(e) = rt_lco::set(done, &0u64.to_le_bytes(), None, None) {
                tracing::error!(error = %e, "countdown: failed to signal completion");
            }
        }
        return Vec::new();
    }

    if !done.is_null() {
        if let Err(e) = forward(counter, done) {
            tracing::error!(error = %e, "countdown: failed to forward");
        }
        return Vec::new();
    }

    let done = match rt_lco::future(8) {
        Ok(addr) => addr,
        Err(e) => {
            tracing::error!(error = %e, "countdown: failed to allocate completion future");
            return Vec::new();
        }
    };
    if let Err(e) = forward(counter, done) {
        tracing::error!(error = %e, "countdown: failed to forward");
        return Vec::new();
    }
    let mut buf = [0u8; 8];
    if let Err(e) = rt_lco::get(done, &mut buf) {
        tracing::error!(error = %e, "countdown: failed waiting for completion");
    }
    let _ = rt_lco::delete(done);
    buf.to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_encodes_hops_with_no_future_yet() {
        let (counter, done) = decode(&payload(12));
        assert_eq!(counter, 12);
        assert!(done.is_null());
    }
}
