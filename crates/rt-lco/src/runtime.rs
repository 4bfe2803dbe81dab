// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The process-wide LCO runtime: a singleton tying together the local
//! [`LcoTable`], the [`Gas`] it allocates addresses from, and the [`Submit`]
//! used to fire continuations.
//!
//! Spec §9 sanctions exactly one process-wide singleton, the locality. The
//! action handlers `rt-lco` registers ([`Handler::Pinned`] bare fn pointers,
//! which cannot close over anything) have no other way to reach that state,
//! so this is the seam: [`LcoRuntime::install_actions`] registers the
//! handlers against an [`ActionRegistry`] before it is finalized, and
//! [`LcoRuntime::init`] finishes wiring the singleton once the scheduler (and
//! thus its [`WakeQueue`]) exists, before any parcel naming an LCO action can
//! actually be delivered.

use crate::error::{Error, Result};
use crate::lco::Kind;
use crate::table::LcoTable;
use crate::and_gate::AndState;
use crate::future::FutureState;
use crate::gather::GatherState;
use crate::semaphore::SemState;
use rt_gas::{Gas, GlobalAddr};
use rt_parcel::{ActionAttrs, ActionId, ActionRegistry, Handler};
use rt_sched::{Submit, WakeQueue};
use std::ptr::NonNull;
use std::sync::{Arc, OnceLock};

pub struct LcoRuntime {
    gas: Arc<Gas>,
    table: LcoTable,
    submit: Arc<dyn Submit>,
    registry: Arc<ActionRegistry>,
}

static RUNTIME: OnceLock<LcoRuntime> = OnceLock::new();

impl LcoRuntime {
    fn get() -> &'static LcoRuntime {
        RUNTIME
            .get()
            .expect("LcoRuntime::init was not called before an LCO action was delivered")
    }

    /// Finishes wiring the process-wide runtime. Called once, by `gasrt`'s
    /// startup, after the scheduler has been constructed (so its
    /// `WakeQueue` exists) but before it starts delivering parcels.
    /// `registry` must be the same (by then finalized) registry the
    /// scheduler was built from, so remote dispatch can resolve the actions
    /// [`LcoRuntime::install_actions`] registered.
    ///
    /// # Panics
    ///
    /// Panics if called more than once.
    pub fn init(gas: Arc<Gas>, wake: WakeQueue, submit: Arc<dyn Submit>, registry: Arc<ActionRegistry>) {
        let runtime = LcoRuntime {
            gas,
            table: LcoTable::new(wake),
            submit,
            registry,
        };
        RUNTIME
            .set(runtime)
            .unwrap_or_else(|_| panic!("LcoRuntime::init called more than once"));
    }

    pub(crate) fn action_id(name: &str) -> ActionId {
        Self::get()
            .registry
            .lookup_by_name(name)
            .unwrap_or_else(|| panic!("LcoRuntime::install_actions was not called (missing {name})"))
    }

    /// Registers the actions used to realize LCO operations against a
    /// remote-owned address. Must run before `registry.finalize()`.
    ///
    /// # Errors
    ///
    /// Propagates [`rt_parcel::Error::DuplicateName`] if called twice against
    /// the same registry.
    pub fn install_actions(registry: &mut ActionRegistry) -> rt_parcel::Result<()> {
        registry.install_lco_set(Handler::Pinned(handle_lco_set));
        let pinned_blocking = ActionAttrs::PINNED | ActionAttrs::DEFAULT;
        let pinned_task = ActionAttrs::PINNED | ActionAttrs::TASK;
        registry.register("lco-wait", Handler::Pinned(handle_wait), pinned_blocking)?;
        registry.register("lco-get", Handler::Pinned(handle_get), pinned_blocking)?;
        registry.register(
            "lco-get-reset",
            Handler::Pinned(handle_get_reset),
            pinned_blocking,
        )?;
        registry.register("lco-setid", Handler::Pinned(handle_setid), pinned_blocking)?;
        registry.register("lco-getid", Handler::Pinned(handle_getid), pinned_blocking)?;
        registry.register("lco-reset", Handler::Pinned(handle_reset), pinned_task)?;
        registry.register("lco-error", Handler::Pinned(handle_error), pinned_task)?;
        registry.register("lco-size", Handler::Pinned(handle_size), pinned_task)?;
        registry.register("lco-delete", Handler::Pinned(handle_delete), pinned_task)?;
        Ok(())
    }

    pub(crate) fn gas() -> &'static Gas {
        &Self::get().gas
    }

    pub(crate) fn table() -> &'static LcoTable {
        &Self::get().table
    }

    pub(crate) fn submit() -> &'static dyn Submit {
        &*Self::get().submit
    }

    fn create(kind: Kind) -> Result<GlobalAddr> {
        let runtime = Self::get();
        runtime
            .table
            .create(&runtime.gas, kind)
            .map_err(|_| Error::NotAllocated)
    }
}

/// Allocates a fresh future LCO able to hold up to `size` bytes.
pub fn future(size: usize) -> Result<GlobalAddr> {
    LcoRuntime::create(Kind::Future(FutureState::new(size)))
}

/// Allocates a fresh AND-gate that fires once `count` `set`s have arrived.
pub fn and_gate(count: u32) -> Result<GlobalAddr> {
    LcoRuntime::create(Kind::And(AndState::new(count)))
}

/// Allocates a fresh counting semaphore with `initial` permits available.
pub fn semaphore(initial: u32) -> Result<GlobalAddr> {
    LcoRuntime::create(Kind::Sem(SemState::new(initial)))
}

/// Allocates a fresh all-gather LCO over `participants` rows of `elt_size`
/// bytes each.
pub fn all_gather(participants: usize, elt_size: usize) -> Result<GlobalAddr> {
    LcoRuntime::create(Kind::Gather(GatherState::new(participants, elt_size, false)))
}

/// Allocates a fresh all-to-all LCO over a `participants` x `participants`
/// matrix of `elt_size`-byte elements.
pub fn all_to_all(participants: usize, elt_size: usize) -> Result<GlobalAddr> {
    LcoRuntime::create(Kind::Gather(GatherState::new(participants, elt_size, true)))
}

fn lco_for(addr: GlobalAddr) -> Result<Arc<crate::lco::Lco>> {
    LcoRuntime::table().get(addr).ok_or(Error::NotAllocated)
}

/// The handler behind [`rt_parcel::ACTION_LCO_SET`]. Always writes `payload`
/// into the LCO at `addr` verbatim and returns an empty reply — every other
/// action in the system that continues into a future relies on that raw
/// pass-through to deposit its own result unwrapped, so unlike the other
/// handlers in this module this one must not tag its return value.
fn handle_lco_set(addr: GlobalAddr, _ptr: NonNull<u8>, payload: &[u8]) -> Vec<u8> {
    if let Ok(lco) = lco_for(addr) {
        let _ = lco.set(payload, LcoRuntime::submit());
    }
    Vec::new()
}

fn handle_wait(addr: GlobalAddr, _ptr: NonNull<u8>, _payload: &[u8]) -> Vec<u8> {
    let result = lco_for(addr).and_then(|lco| lco.wait(LcoRuntime::submit()).map_err(Into::into));
    crate::remote::encode_result(result.map(|()| Vec::new()))
}

fn handle_get(addr: GlobalAddr, _ptr: NonNull<u8>, payload: &[u8]) -> Vec<u8> {
    let len = decode_len(payload);
    let result = lco_for(addr).and_then(|lco| {
        let mut buf = vec![0u8; len];
        let n = lco.get(&mut buf, LcoRuntime::submit())?;
        buf.truncate(n);
        Ok(buf)
    });
    crate::remote::encode_result(result)
}

fn handle_get_reset(addr: GlobalAddr, _ptr: NonNull<u8>, payload: &[u8]) -> Vec<u8> {
    let len = decode_len(payload);
    let result = lco_for(addr).and_then(|lco| {
        let mut buf = vec![0u8; len];
        let n = lco.get_reset(&mut buf, LcoRuntime::submit())?;
        buf.truncate(n);
        Ok(buf)
    });
    crate::remote::encode_result(result)
}

fn handle_setid(addr: GlobalAddr, _ptr: NonNull<u8>, payload: &[u8]) -> Vec<u8> {
    let (id, rest) = decode_id_prefixed(payload);
    let result =
        lco_for(addr).and_then(|lco| lco.setid(id, rest, LcoRuntime::submit()).map_err(Into::into));
    crate::remote::encode_result(result.map(|()| Vec::new()))
}

fn handle_getid(addr: GlobalAddr, _ptr: NonNull<u8>, payload: &[u8]) -> Vec<u8> {
    let id = decode_len(&payload[..8]);
    let out_len = decode_len(&payload[8..16]);
    let result = lco_for(addr).and_then(|lco| {
        let mut buf = vec![0u8; out_len];
        lco.getid(id, &mut buf, LcoRuntime::submit())?;
        Ok(buf)
    });
    crate::remote::encode_result(result)
}

fn handle_reset(addr: GlobalAddr, _ptr: NonNull<u8>, _payload: &[u8]) -> Vec<u8> {
    let result = lco_for(addr).and_then(|lco| lco.reset().map_err(Into::into));
    crate::remote::encode_result(result.map(|()| Vec::new()))
}

fn handle_error(addr: GlobalAddr, _ptr: NonNull<u8>, payload: &[u8]) -> Vec<u8> {
    let code = i32::from_le_bytes(payload[..4].try_into().unwrap_or_default());
    let result = lco_for(addr).and_then(|lco| lco.error(code, LcoRuntime::submit()).map_err(Into::into));
    crate::remote::encode_result(result.map(|()| Vec::new()))
}

fn handle_size(addr: GlobalAddr, _ptr: NonNull<u8>, _payload: &[u8]) -> Vec<u8> {
    let result = lco_for(addr).map(|lco| lco.size().to_le_bytes().to_vec());
    crate::remote::encode_result(result)
}

fn handle_delete(addr: GlobalAddr, _ptr: NonNull<u8>, _payload: &[u8]) -> Vec<u8> {
    LcoRuntime::table().delete(LcoRuntime::gas(), addr);
    Vec::new()
}

fn decode_len(bytes: &[u8]) -> usize {
    usize::from_le_bytes(bytes[..8].try_into().unwrap_or_default())
}

fn decode_id_prefixed(payload: &[u8]) -> (usize, &[u8]) {
    (decode_len(&payload[..8]), &payload[8..])
}
