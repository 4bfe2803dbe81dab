// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Per-locality `GlobalAddr` -> `Arc<Lco>` side table.
//!
//! An LCO still needs a real address in the global address space (other
//! localities name it, pin it, and the action dispatcher resolves it), but
//! its actual state lives in a plain Rust struct rather than in the bytes
//! `rt-gas` hands back from a pin. `LcoTable` is the seam between the two:
//! it reserves a small placeholder block in the locality's `Heap` (so the
//! address is real and `Gas::pin`/`is_local` behave normally) and separately
//! tracks the `Arc<Lco>` that actually backs it, the same two-tier shape
//! `Heap` itself uses for its own `blocks: Mutex<BTreeMap<u64, Block>>`.

use crate::error::{Error, Result};
use crate::lco::{Kind, Lco};
use rt_gas::{Gas, GlobalAddr};
use rt_sched::WakeQueue;
use std::collections::BTreeMap;
use std::sync::Arc;

/// The arena footprint reserved for each LCO's placeholder block. The
/// content is never read; it only exists so the address has a `Heap` block
/// behind it that `pin`/`free` can account for.
const PLACEHOLDER_BYTES: usize = 16;

pub struct LcoTable {
    entries: spin::Mutex<BTreeMap<u64, Arc<Lco>>>,
    wake: WakeQueue,
}

impl LcoTable {
    #[must_use]
    pub fn new(wake: WakeQueue) -> Self {
        Self {
            entries: spin::Mutex::new(BTreeMap::new()),
            wake,
        }
    }

    /// Allocates a fresh address on `gas` and installs `kind` behind it.
    pub fn create(&self, gas: &Gas, kind: Kind) -> Result<GlobalAddr> {
        let addr = gas
            .alloc_local(PLACEHOLDER_BYTES)
            .map_err(|_| Error::NotAllocated)?;
        let lco = Arc::new(Lco::new(kind, self.wake.clone()));
        self.entries.lock().insert(addr.offset(), lco);
        Ok(addr)
    }

    /// Looks up the LCO backing a local address, if any is installed there.
    #[must_use]
    pub fn get(&self, addr: GlobalAddr) -> Option<Arc<Lco>> {
        self.entries.lock().get(&addr.offset()).cloned()
    }

    /// Removes and marks deleted the LCO at `addr`, and frees its
    /// placeholder block. A no-op if nothing is installed there.
    pub fn delete(&self, gas: &Gas, addr: GlobalAddr) {
        if let Some(lco) = self.entries.lock().remove(&addr.offset()) {
            lco.mark_deleted();
            let _ = gas.free(addr);
        }
    }
}
