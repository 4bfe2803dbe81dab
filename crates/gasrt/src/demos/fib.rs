// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Recursive Fibonacci over `par_call`, translated from
//! `examples/hpx/fibonacci.c`'s `_fib_action`: each call below the base case
//! fires two sub-calls, alternating the target locality by one rank in
//! either direction, and sums their replies.

use crate::collectives::par_call;
use crate::{ActionAttrs, Builder, Handler, Result};
use rt_parcel::ActionId;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

pub const ACTION_NAME: &str = "fib";

static FIB_ACTION: OnceLock<ActionId> = OnceLock::new();
/// Total number of `fib` invocations across this locality, matching the
/// original's property that a correct run fires exactly `2*fib(n+1) - 1`
/// parcels.
static PARCELS: AtomicU64 = AtomicU64::new(0);

/// Registers the `fib` action. Must run before [`crate::init`].
///
/// # Errors
///
/// Returns an error if `fib` is already registered.
pub fn register(builder: &mut Builder) -> Result<()> {
    let id = builder.register(ACTION_NAME, Handler::Plain(handle), ActionAttrs::DEFAULT)?;
    FIB_ACTION
        .set(id)
        .unwrap_or_else(|_| panic!("fib action registered twice"));
    Ok(())
}

/// Encodes `n`, the input to `fib`.
#[must_use]
pub fn payload(n: u32) -> Vec<u8> {
    n.to_le_bytes().to_vec()
}

/// The number of `fib` invocations observed on this locality so far.
pub fn parcel_count() -> u64 {
    PARCELS.load(Ordering::Relaxed)
}

fn decode_u32(bytes: &[u8]) -> u32 {
    bytes.get(0..4).and_then(|b| b.try_into().ok()).map(u32::from_le_bytes).unwrap_or(0)
}

fn decode_u64(bytes: &[u8]) -> u64 {
    bytes.get(0..8).and_then(|b| b.try_into().ok()).map(u64::from_le_bytes).unwrap_or(0)
}

fn handle(payload: &[u8]) -> Vec<u8> {
    PARCELS.fetch_add(1, Ordering::Relaxed);
    let n = decode_u32(payload);
    if n < 2 {
        return u64::from(n).to_le_bytes().to_vec();
    }

    let action = *FIB_ACTION.get().expect("fib registered before run");
    let (rank, ranks) = match (crate::my_rank(), crate::num_ranks()) {
        (Ok(rank), Ok(ranks)) => (rank, ranks),
        (Err(e), _) | (_, Err(e)) => {
            tracing::error!(error = %e, "fib: locality not initialized");
            return 0u64.to_le_bytes().to_vec();
        }
    };
    let left = crate::there((rank + 1) % ranks);
    let right = crate::there((rank + ranks - 1) % ranks);
    let calls = [
        (left, (n - 1).to_le_bytes().to_vec()),
        (right, (n - 2).to_le_bytes().to_vec()),
    ];

    match par_call(action, calls, 8) {
        Ok(replies) => (decode_u64(&replies[0]) + decode_u64(&replies[1])).to_le_bytes().to_vec(),
        Err(e) => {
            tracing::error!(error = %e, "fib: par_call failed");
            0u64.to_le_bytes().to_vec()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_round_trips_n() {
        assert_eq!(decode_u32(&payload(7)), 7);
    }
}
