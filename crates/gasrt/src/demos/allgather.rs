// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Every participant contributing one row to a shared gather, translated
//! from HPX5's all-gather collective pattern (spec §8 scenario 4: "R
//! participants each contribute an 8-byte double equal to their rank").
//!
//! This demo runs its contributions locally (`par_for` targets `here()`):
//! spreading the R contributors across ranks would need a participant→rank
//! assignment the single-process scenario has no reason to invent, so the
//! entry action plays every participant itself, sequenced through `par_for`.

use crate::collectives::par_for;
use crate::{ActionAttrs, Builder, GlobalAddr, Handler, Result};
use rt_parcel::ActionId;
use std::sync::{Mutex, OnceLock};

pub const ENTRY_ACTION_NAME: &str = "allgather";
const CONTRIBUTE_ACTION_NAME: &str = "allgather-contribute";
const ELT_SIZE: usize = 8;

static CONTRIBUTE_ACTION: OnceLock<ActionId> = OnceLock::new();
/// The gather LCO the currently-running entry invocation installed, read by
/// every contribute handler it fans out. `None` outside of a run.
static GATHER: Mutex<Option<GlobalAddr>> = Mutex::new(None);
/// Every row a contribute handler has read back, in completion order.
static ROWS: Mutex<Vec<Vec<u8>>> = Mutex::new(Vec::new());

/// Registers the `allgather` and `allgather-contribute` actions. Must run
/// before [`crate::init`].
///
/// # Errors
///
/// Returns an error if either action is already registered.
pub fn register(builder: &mut Builder) -> Result<()> {
    builder.register(ENTRY_ACTION_NAME, Handler::Plain(handle_entry), ActionAttrs::DEFAULT)?;
    let id = builder.register(CONTRIBUTE_ACTION_NAME, Handler::Plain(handle_contribute), ActionAttrs::DEFAULT)?;
    CONTRIBUTE_ACTION
        .set(id)
        .unwrap_or_else(|_| panic!("allgather-contribute action registered twice"));
    Ok(())
}

/// Encodes the entry payload: the number of participants to gather from.
#[must_use]
pub fn payload(participants: u32) -> Vec<u8> {
    participants.to_le_bytes().to_vec()
}

/// Every row observed by the most recently completed run, in the order each
/// participant's contribution was read back (not necessarily rank order).
pub fn observed_rows() -> Vec<Vec<u8>> {
    ROWS.lock().unwrap().clone()
}

fn decode_u32(bytes: &[u8]) -> u32 {
    bytes.get(0..4).and_then(|b| b.try_into().ok()).map(u32::from_le_bytes).unwrap_or(0)
}

fn handle_entry(payload: &[u8]) -> Vec<u8> {
    let participants = decode_u32(payload);

    let addr = match rt_lco::all_gather(participants as usize, ELT_SIZE) {
        Ok(addr) => addr,
        Err(e) => {
            tracing::error!(error = %e, "allgather: failed to allocate gather LCO");
            return 0u64.to_le_bytes().to_vec();
        }
    };
    *GATHER.lock().unwrap() = Some(addr);
    ROWS.lock().unwrap().clear();

    let action = *CONTRIBUTE_ACTION.get().expect("allgather-contribute registered before run");
    if let Err(e) = par_for(action, 0..u64::from(participants), |id| (id as f64).to_le_bytes().to_vec()) {
        tracing::error!(error = %e, "allgather: par_for failed");
    }

    let _ = rt_lco::delete(addr);
    *GATHER.lock().unwrap() = None;
    (ROWS.lock().unwrap().len() as u64).to_le_bytes().to_vec()
}

fn handle_contribute(payload: &[u8]) -> Vec<u8> {
    let value = payload.get(0..8).and_then(|b| b.try_into().ok()).map(f64::from_le_bytes).unwrap_or(0.0);
    let id = value as usize;

    let Some(addr) = *GATHER.lock().unwrap() else {
        tracing::error!("allgather: contribute fired with no gather LCO installed");
        return Vec::new();
    };

    if let Err(e) = rt_lco::setid(addr, id, &value.to_le_bytes()) {
        tracing::error!(error = %e, "allgather: setid failed");
        return Vec::new();
    }
    let size = match rt_lco::size(addr) {
        Ok(size) => size,
        Err(e) => {
            tracing::error!(error = %e, "allgather: size failed");
            return Vec::new();
        }
    };
    let mut out = vec![0u8; size];
    if let Err(e) = rt_lco::getid(addr, id, &mut out) {
        tracing::error!(error = %e, "allgather: getid failed");
        return Vec::new();
    }
    ROWS.lock().unwrap().push(out);
    Vec::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_round_trips_participant_count() {
        assert_eq!(decode_u32(&payload(4)), 4);
    }
}
