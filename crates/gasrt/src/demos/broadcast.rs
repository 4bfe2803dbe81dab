// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Spec §8 scenario 3: broadcast a no-op action to every locality, joined by
//! an AND-gate sized to the locality count. `broadcast-entry` is the `run`
//! target; it calls [`crate::collectives::broadcast`] itself and reports
//! whether the join resolved.

use crate::collectives::broadcast;
use crate::{ActionAttrs, Builder, Handler, Result};
use rt_parcel::ActionId;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

pub const ENTRY_ACTION_NAME: &str = "broadcast-entry";
const NOOP_ACTION_NAME: &str = "broadcast-noop";

static NOOP_ACTION: OnceLock<ActionId> = OnceLock::new();
/// Number of times the no-op target action has fired across this locality.
static NOOPS: AtomicU64 = AtomicU64::new(0);

/// Registers the `broadcast-entry`/`broadcast-noop` actions. Must run before
/// [`crate::init`].
///
/// # Errors
///
/// Returns an error if either action is already registered.
pub fn register(builder: &mut Builder) -> Result<()> {
    let id = builder.register(NOOP_ACTION_NAME, Handler::Plain(handle_noop), ActionAttrs::DEFAULT)?;
    NOOP_ACTION
        .set(id)
        .unwrap_or_else(|_| panic!("broadcast-noop action registered twice"));
    builder.register(ENTRY_ACTION_NAME, Handler::Plain(handle_entry), ActionAttrs::DEFAULT)?;
    Ok(())
}

pub fn noop_count() -> u64 {
    NOOPS.load(Ordering::Relaxed)
}

fn handle_noop(_payload: &[u8]) -> Vec<u8> {
    NOOPS.fetch_add(1, Ordering::Relaxed);
    Vec::new()
}

fn handle_entry(_payload: &[u8]) -> Vec<u8> {
    let action = *NOOP_ACTION.get().expect("broadcast-noop registered before run");
    match broadcast(action, &[]) {
        Ok(()) => 0i32.to_le_bytes().to_vec(),
        Err(e) => {
            tracing::error!(error = %e, "broadcast-entry: broadcast failed");
            1i32.to_le_bytes().to_vec()
        }
    }
}
