// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Collective operations built on top of LCOs and `send`, the way the
//! original's `hpx_par_for`/`hpx_call`/`hpx_bcast` sit atop `hpx_call` and
//! futures rather than adding their own wire protocol.
//!
//! `par_call` in particular follows `examples/hpx/fibonacci.c`'s own
//! recursion: one future per outstanding call, `hpx_lco_get` in call order.

use crate::Result;
use rt_gas::GlobalAddr;
use rt_parcel::{ActionId, Parcel, ACTION_LCO_SET};
use std::ops::Range;

fn send(target: GlobalAddr, action: ActionId, payload: Vec<u8>, cont_target: GlobalAddr, cont_action: ActionId) -> Result<()> {
    let mut parcel = Parcel::acquire(payload.len()).with_data(&payload);
    parcel.set_target(target);
    parcel.set_action(action);
    parcel.set_continuation(cont_target, cont_action);
    crate::send(parcel)
}

/// Invokes `action` once against every locality's root address, joined by a
/// local AND-gate this call blocks on. Spec §6's `broadcast-action`.
///
/// # Errors
///
/// Returns an error if the join LCO cannot be allocated or waited on.
pub fn broadcast(action: ActionId, payload: &[u8]) -> Result<()> {
    let ranks = crate::num_ranks()?;
    let join = rt_lco::and_gate(ranks)?;
    for rank in 0..ranks {
        send(crate::there(rank), action, payload.to_vec(), join, ACTION_LCO_SET)?;
    }
    rt_lco::wait(join)?;
    rt_lco::delete(join)?;
    Ok(())
}

/// Fires `count` invocations of `action` against this locality's root
/// address, indices `start..start + count`, each continuing into `join`.
/// Non-blocking: the caller decides how and when to wait on `join`. This is
/// the primitive [`par_for`] is built from, exposed directly for callers
/// that want to fan out several ranges into one shared join.
///
/// # Errors
///
/// Returns an error if any index's send fails.
pub fn count_range_call(
    action: ActionId,
    start: u64,
    count: u64,
    join: GlobalAddr,
    payload_of: impl Fn(u64) -> Vec<u8>,
) -> Result<()> {
    for i in start..start + count {
        send(crate::here()?, action, payload_of(i), join, ACTION_LCO_SET)?;
    }
    Ok(())
}

/// Invokes `action` once per index in `range` against this locality,
/// blocking until every invocation has fired its continuation into a
/// dedicated AND-gate. Spec §6's `par-for`.
///
/// # Errors
///
/// Returns an error if the join LCO cannot be allocated, sent to, or waited
/// on.
pub fn par_for(action: ActionId, range: Range<u64>, payload_of: impl Fn(u64) -> Vec<u8>) -> Result<()> {
    let count = range.end.saturating_sub(range.start);
    if count == 0 {
        return Ok(());
    }
    let join = rt_lco::and_gate(count as u32)?;
    count_range_call(action, range.start, count, join, payload_of)?;
    rt_lco::wait(join)?;
    rt_lco::delete(join)?;
    Ok(())
}

/// Fans `calls` out as one parcel each, every one continuing into its own
/// fresh future of `reply_size` bytes, then blocks on each future in turn
/// and returns its value. Spec §6's `par-call`; the original's
/// `hpx_call` + `hpx_future_new` + `hpx_lco_get` pattern in
/// `examples/hpx/fibonacci.c`.
///
/// # Errors
///
/// Returns an error if any future cannot be allocated, any send fails, or
/// any future errors instead of completing.
pub fn par_call(
    action: ActionId,
    calls: impl IntoIterator<Item = (GlobalAddr, Vec<u8>)>,
    reply_size: usize,
) -> Result<Vec<Vec<u8>>> {
    let mut futures = Vec::new();
    for (target, payload) in calls {
        let future = rt_lco::future(reply_size)?;
        send(target, action, payload, future, ACTION_LCO_SET)?;
        futures.push(future);
    }

    let mut replies = Vec::with_capacity(futures.len());
    for future in futures {
        let mut buf = vec![0u8; reply_size];
        let n = rt_lco::get(future, &mut buf)?;
        buf.truncate(n);
        rt_lco::delete(future)?;
        replies.push(buf);
    }
    Ok(replies)
}
