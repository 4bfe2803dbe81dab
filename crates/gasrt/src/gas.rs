// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Spec §4.5/§6's GAS operations that reach beyond this locality's own
//! heap: `alloc_at_sync`, `alloc_cyclic`, remote `free`, and `memget`/
//! `memput`/`memcpy`.
//!
//! `rt-gas::Gas` only resolves addresses local to itself (see that crate's
//! module doc); everything here realizes the remote half the same way
//! `rt-lco::remote` realizes remote LCO operations — a request parcel
//! continuing into a local future this thread blocks on, addressed so the
//! network dispatcher's ordinary local-vs-remote routing (spec §4.2) lands
//! the request on the owning locality without this module naming it
//! specially. [`alloc_cyclic`] instead rides [`crate::collectives::par_call`]
//! to reserve the same layout on every locality at once, the collective
//! counterpart of the original's `hpx_gas_alloc_cyclic`.

use crate::{locality, ActionAttrs, Builder, Error, GlobalAddr, Handler, Parcel, Result, ACTION_LCO_SET};

const ALLOC_AT_ACTION: &str = "__gasrt-gas-alloc-at";
const ALLOC_CYCLIC_ACTION: &str = "__gasrt-gas-alloc-cyclic";
const MEMGET_ACTION: &str = "__gasrt-gas-memget";
const MEMPUT_ACTION: &str = "__gasrt-gas-memput";
const FREE_ACTION: &str = "__gasrt-gas-free";

/// 1 tag byte + 4-byte locality + 8-byte offset.
const ADDR_REPLY_CAP: usize = 13;

/// Registers the actions this module's remote operations round-trip
/// through. Called once by [`Builder::new`], before any application action.
///
/// # Panics
///
/// Panics if any of this module's reserved action names is already
/// registered — can only happen if this function runs twice against the
/// same registry, which it never does.
pub(crate) fn register_actions(builder: &mut Builder) {
    builder
        .register(ALLOC_AT_ACTION, Handler::Plain(handle_alloc_at), ActionAttrs::DEFAULT)
        .expect("gas-alloc-at action name is reserved and registered exactly once");
    builder
        .register(ALLOC_CYCLIC_ACTION, Handler::Plain(handle_alloc_cyclic), ActionAttrs::DEFAULT)
        .expect("gas-alloc-cyclic action name is reserved and registered exactly once");
    builder
        .register(MEMGET_ACTION, Handler::Plain(handle_memget), ActionAttrs::TASK)
        .expect("gas-memget action name is reserved and registered exactly once");
    builder
        .register(MEMPUT_ACTION, Handler::Plain(handle_memput), ActionAttrs::TASK)
        .expect("gas-memput action name is reserved and registered exactly once");
    builder
        .register(FREE_ACTION, Handler::Plain(handle_free), ActionAttrs::TASK)
        .expect("gas-free action name is reserved and registered exactly once");
}

fn action_id(name: &str) -> Result<rt_parcel::ActionId> {
    locality()?
        .registry
        .lookup_by_name(name)
        .ok_or_else(|| Error::UnknownAction(name.to_string()))
}

fn encode_addr(addr: GlobalAddr) -> Vec<u8> {
    let mut v = vec![0u8];
    v.extend(addr.locality().to_le_bytes());
    v.extend(addr.offset().to_le_bytes());
    v
}

fn decode_addr(buf: &[u8]) -> Result<GlobalAddr> {
    if buf.first() != Some(&0) {
        return Err(Error::GasRemote);
    }
    let locality = u32::from_le_bytes(buf.get(1..5).ok_or(Error::GasRemote)?.try_into().unwrap());
    let offset = u64::from_le_bytes(buf.get(5..13).ok_or(Error::GasRemote)?.try_into().unwrap());
    Ok(GlobalAddr::new(locality, offset))
}

fn decode_u64(bytes: &[u8]) -> u64 {
    bytes.get(0..8).and_then(|b| b.try_into().ok()).map(u64::from_le_bytes).unwrap_or(0)
}

/// Sends a parcel invoking `action_name` at `target` with `payload`,
/// continuing into `cont` via [`ACTION_LCO_SET`] once the handler replies.
/// Fires the request and returns; does not wait for `cont` to be signaled.
fn request(target: GlobalAddr, action_name: &str, payload: Vec<u8>, cont: GlobalAddr) -> Result<()> {
    let mut parcel = Parcel::acquire(payload.len()).with_data(&payload);
    parcel.set_target(target);
    parcel.set_action(action_id(action_name)?);
    parcel.set_continuation(cont, ACTION_LCO_SET);
    crate::send(parcel)
}

/// A fresh future carrying the continuation reply, and the parcel that
/// requests `action_name` be run at `target` with `payload`, blocking for
/// the reply and deleting the future afterward.
fn round_trip(target: GlobalAddr, action_name: &str, payload: Vec<u8>, reply_cap: usize) -> Result<Vec<u8>> {
    let reply = rt_lco::future(reply_cap)?;
    request(target, action_name, payload, reply)?;

    let mut buf = vec![0u8; reply_cap];
    let n = rt_lco::get(reply, &mut buf)?;
    buf.truncate(n);
    rt_lco::delete(reply)?;
    Ok(buf)
}

/// Allocates `n` bytes on this locality's own heap. Spec §4.5's
/// `alloc_local`.
///
/// # Errors
///
/// Returns [`Error::Gas`] if the heap is exhausted.
pub fn alloc_local(n: usize) -> Result<GlobalAddr> {
    Ok(locality()?.gas.alloc_local(n)?)
}

/// Allocates `n` bytes on `target_locality`'s heap, blocking until the
/// remote allocation completes. Spec §4.5's `alloc_at_sync`.
///
/// # Errors
///
/// Returns [`Error::Gas`] if the remote heap is exhausted, or
/// [`Error::GasRemote`] if the reply could not be decoded.
pub fn alloc_at_sync(n: usize, target_locality: u32) -> Result<GlobalAddr> {
    let loc = locality()?;
    if target_locality == loc.gas.rank() {
        return alloc_local(n);
    }
    let buf = round_trip(
        crate::there(target_locality),
        ALLOC_AT_ACTION,
        (n as u64).to_le_bytes().to_vec(),
        ADDR_REPLY_CAP,
    )?;
    decode_addr(&buf)
}

/// Reserves a block-cyclically distributed allocation of `blocks` blocks of
/// `block_bytes` bytes each across every locality, returning the address of
/// block 0. Every locality must reach this call in the same relative order
/// as every other cyclic allocation in the program, so that the identical
/// reservation made on each locality's own heap lines up (see
/// [`rt_gas::Gas::alloc_cyclic_share`]). Spec §4.5's `alloc_cyclic`.
///
/// # Errors
///
/// Returns an error if any locality's reservation fails, or if the
/// collective fan-out itself fails.
pub fn alloc_cyclic(blocks: u64, block_bytes: u32) -> Result<GlobalAddr> {
    let ranks = crate::num_ranks()?;
    let mut payload = blocks.to_le_bytes().to_vec();
    payload.extend(block_bytes.to_le_bytes());

    let action = action_id(ALLOC_CYCLIC_ACTION)?;
    let calls = (0..ranks).map(|r| (crate::there(r), payload.clone()));
    let replies = crate::collectives::par_call(action, calls, 8)?;
    let offset = decode_u64(&replies[0]);
    Ok(GlobalAddr::new(0, offset))
}

/// Frees the allocation at `addr`. If `rsync` is given, it is signaled once
/// the (possibly remote) free has completed; otherwise the request is
/// fire-and-forget. Spec §4.5's `free(addr, rsync)`.
///
/// # Errors
///
/// Returns [`Error::Gas`] if `addr` is local and not currently allocated or
/// is still pinned.
pub fn free(addr: GlobalAddr, rsync: Option<GlobalAddr>) -> Result<()> {
    let loc = locality()?;
    if loc.gas.is_local(addr) {
        loc.gas.free(addr)?;
        if let Some(rsync) = rsync {
            rt_lco::set(rsync, &[], None, None)?;
        }
        return Ok(());
    }
    let mut parcel = Parcel::acquire(8).with_data(&addr.offset().to_le_bytes());
    parcel.set_target(addr);
    parcel.set_action(action_id(FREE_ACTION)?);
    if let Some(rsync) = rsync {
        parcel.set_continuation(rsync, ACTION_LCO_SET);
    }
    crate::send(parcel)
}

/// Attempts to pin `addr`, returning a pointer to its backing bytes and the
/// number of bytes available from `addr` to the end of its block. `None` if
/// `addr` is not local or names no live allocation — the caller must
/// forward the operation (this crate's [`memget_sync`]/[`memput_sync`] do
/// so automatically). Spec §4.5's `pin`.
#[must_use]
pub fn pin(addr: GlobalAddr) -> Option<(std::ptr::NonNull<u8>, usize)> {
    locality().ok()?.gas.pin(addr)
}

/// Releases a reference acquired by [`pin`]. Spec §4.5's `unpin`.
///
/// # Panics
///
/// Panics if [`locality`](crate::locality) has not been initialized, or if
/// `addr` was not pinned — mirrors [`rt_gas::Heap::unpin`]'s own panics.
pub fn unpin(addr: GlobalAddr) {
    locality().expect("gasrt::gas::unpin called before init").gas.unpin(addr);
}

/// Copies `dst.len()` bytes from `src` into `dst`, blocking until the bytes
/// have landed. Spec §4.5's `memget_sync`.
///
/// # Errors
///
/// Returns [`Error::Gas`]/[`Error::GasRemote`] if `src` names no live
/// allocation or is shorter than `dst`.
pub fn memget_sync(dst: &mut [u8], src: GlobalAddr) -> Result<()> {
    let loc = locality()?;
    let n = dst.len();
    if loc.gas.is_local(src) {
        let (ptr, len) = loc.gas.pin(src).ok_or(Error::GasRemote)?;
        if len < n {
            loc.gas.unpin(src);
            return Err(Error::GasRemote);
        }
        // Safety: `ptr` was just pinned and covers at least `n` bytes.
        unsafe { std::ptr::copy_nonoverlapping(ptr.as_ptr(), dst.as_mut_ptr(), n) };
        loc.gas.unpin(src);
        return Ok(());
    }

    let mut payload = src.offset().to_le_bytes().to_vec();
    payload.extend((n as u64).to_le_bytes());
    let buf = round_trip(src, MEMGET_ACTION, payload, 1 + n)?;
    if buf.first() != Some(&0) {
        return Err(Error::GasRemote);
    }
    dst.copy_from_slice(&buf[1..1 + n]);
    Ok(())
}

/// Non-blocking form of [`memget_sync`]: returns once the request has been
/// issued, signaling `done` with the tagged reply (a leading `0` byte
/// followed by the `n` fetched bytes, or a leading `1` on failure — the same
/// encoding [`handle_memget`] replies with) once the bytes have actually
/// landed. There is no destination buffer to copy into here; the caller
/// reads the result back out of `done` (sized to hold at least `1 + n`
/// bytes) with [`rt_lco::get`]. Spec §4.5's `memget(dst, src_addr, n,
/// done_lco)`.
///
/// # Errors
///
/// Returns [`Error::Gas`] if `src` is local and names no live allocation or
/// is shorter than `n` — in that case `done` is never signaled, mirroring
/// [`free`]'s local-path behavior on `rsync`.
pub fn memget(src: GlobalAddr, n: usize, done: GlobalAddr) -> Result<()> {
    let loc = locality()?;
    if loc.gas.is_local(src) {
        let (ptr, len) = loc.gas.pin(src).ok_or(Error::GasRemote)?;
        if len < n {
            loc.gas.unpin(src);
            return Err(Error::GasRemote);
        }
        let mut out = vec![0u8; 1 + n];
        // Safety: `ptr` was just pinned and covers at least `n` bytes.
        unsafe { std::ptr::copy_nonoverlapping(ptr.as_ptr(), out[1..].as_mut_ptr(), n) };
        loc.gas.unpin(src);
        return Ok(rt_lco::set(done, &out, None, None)?);
    }

    let mut payload = src.offset().to_le_bytes().to_vec();
    payload.extend((n as u64).to_le_bytes());
    request(src, MEMGET_ACTION, payload, done)
}

/// Copies `src` into the `src.len()` bytes starting at `dst`, blocking until
/// the write has landed. Spec §4.5's `memput`.
///
/// # Errors
///
/// Returns [`Error::Gas`]/[`Error::GasRemote`] if `dst` names no live
/// allocation or is shorter than `src`.
pub fn memput_sync(dst: GlobalAddr, src: &[u8]) -> Result<()> {
    let loc = locality()?;
    let n = src.len();
    if loc.gas.is_local(dst) {
        let (ptr, len) = loc.gas.pin(dst).ok_or(Error::GasRemote)?;
        if len < n {
            loc.gas.unpin(dst);
            return Err(Error::GasRemote);
        }
        // Safety: `ptr` was just pinned and covers at least `n` bytes.
        unsafe { std::ptr::copy_nonoverlapping(src.as_ptr(), ptr.as_ptr(), n) };
        loc.gas.unpin(dst);
        return Ok(());
    }

    let mut payload = dst.offset().to_le_bytes().to_vec();
    payload.extend_from_slice(src);
    let buf = round_trip(dst, MEMPUT_ACTION, payload, 1)?;
    if buf.first() != Some(&0) {
        return Err(Error::GasRemote);
    }
    Ok(())
}

/// Non-blocking form of [`memput_sync`]: returns once the request has been
/// issued, signaling `done` with a one-byte ack (`0` on success, `1` on
/// failure — [`handle_memput`]'s own reply encoding) once the write has
/// actually landed. Spec §4.5's `memput(dst, src, n, done_lco)`.
///
/// # Errors
///
/// Returns [`Error::Gas`] if `dst` is local and names no live allocation or
/// is shorter than `src` — in that case `done` is never signaled, mirroring
/// [`free`]'s local-path behavior on `rsync`.
pub fn memput(dst: GlobalAddr, src: &[u8], done: GlobalAddr) -> Result<()> {
    let loc = locality()?;
    let n = src.len();
    if loc.gas.is_local(dst) {
        let (ptr, len) = loc.gas.pin(dst).ok_or(Error::GasRemote)?;
        if len < n {
            loc.gas.unpin(dst);
            return Err(Error::GasRemote);
        }
        // Safety: `ptr` was just pinned and covers at least `n` bytes.
        unsafe { std::ptr::copy_nonoverlapping(src.as_ptr(), ptr.as_ptr(), n) };
        loc.gas.unpin(dst);
        return Ok(rt_lco::set(done, &[0u8], None, None)?);
    }

    let mut payload = dst.offset().to_le_bytes().to_vec();
    payload.extend_from_slice(src);
    request(dst, MEMPUT_ACTION, payload, done)
}

/// Copies `n` bytes from `src` to `dst`, using the local fast path if both
/// addresses are on this locality and staging through a local buffer
/// otherwise. Spec §4.5's `memcpy`.
///
/// # Errors
///
/// Returns an error under the same conditions as [`memget_sync`]/
/// [`memput_sync`].
pub fn memcpy(dst: GlobalAddr, src: GlobalAddr, n: usize) -> Result<()> {
    let loc = locality()?;
    if loc.gas.is_local(dst) && loc.gas.is_local(src) {
        return Ok(loc.gas.memcpy_local(dst, src, n)?);
    }
    let mut buf = vec![0u8; n];
    memget_sync(&mut buf, src)?;
    memput_sync(dst, &buf)
}

fn handle_alloc_at(payload: &[u8]) -> Vec<u8> {
    let n = decode_u64(payload) as usize;
    let Ok(loc) = locality() else {
        return vec![1u8];
    };
    match loc.gas.alloc_local(n) {
        Ok(addr) => encode_addr(addr),
        Err(e) => {
            tracing::error!(error = %e, "gas-alloc-at: remote allocation failed");
            vec![1u8]
        }
    }
}

fn handle_alloc_cyclic(payload: &[u8]) -> Vec<u8> {
    let blocks = decode_u64(&payload[0..8]);
    let block_bytes = u32::from_le_bytes(payload.get(8..12).and_then(|b| b.try_into().ok()).unwrap_or_default());
    let Ok(loc) = locality() else {
        return 0u64.to_le_bytes().to_vec();
    };
    match loc.gas.alloc_cyclic_share(blocks, block_bytes) {
        Ok(addr) => addr.offset().to_le_bytes().to_vec(),
        Err(e) => {
            tracing::error!(error = %e, "gas-alloc-cyclic: local reservation failed");
            0u64.to_le_bytes().to_vec()
        }
    }
}

fn handle_free(payload: &[u8]) -> Vec<u8> {
    let offset = decode_u64(payload);
    if let Ok(loc) = locality() {
        let addr = GlobalAddr::new(loc.gas.rank(), offset);
        if let Err(e) = loc.gas.free(addr) {
            tracing::error!(error = %e, "gas-free: remote free failed");
        }
    }
    Vec::new()
}

fn handle_memget(payload: &[u8]) -> Vec<u8> {
    let offset = decode_u64(&payload[0..8]);
    let n = decode_u64(&payload[8..16]) as usize;
    let Ok(loc) = locality() else {
        return vec![1u8];
    };
    let addr = GlobalAddr::new(loc.gas.rank(), offset);
    match loc.gas.pin(addr) {
        Some((ptr, len)) if len >= n => {
            let mut out = vec![0u8; 1 + n];
            // Safety: `ptr` was just pinned and `len >= n`.
            unsafe { std::ptr::copy_nonoverlapping(ptr.as_ptr(), out[1..].as_mut_ptr(), n) };
            loc.gas.unpin(addr);
            out
        }
        Some(_) => {
            loc.gas.unpin(addr);
            vec![1u8]
        }
        None => vec![1u8],
    }
}

fn handle_memput(payload: &[u8]) -> Vec<u8> {
    let offset = decode_u64(&payload[0..8]);
    let bytes = &payload[8..];
    let n = bytes.len();
    let Ok(loc) = locality() else {
        return vec![1u8];
    };
    let addr = GlobalAddr::new(loc.gas.rank(), offset);
    match loc.gas.pin(addr) {
        Some((ptr, len)) if len >= n => {
            // Safety: `ptr` was just pinned and covers at least `n` bytes.
            unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr.as_ptr(), n) };
            loc.gas.unpin(addr);
            vec![0u8]
        }
        Some(_) => {
            loc.gas.unpin(addr);
            vec![1u8]
        }
        None => vec![1u8],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::sync::Once;

    static INIT: Once = Once::new();

    fn init() {
        INIT.call_once(|| {
            let config = Config::single_locality();
            let builder = crate::Builder::new(config);
            crate::init(builder).unwrap();
        });
    }

    #[test]
    fn alloc_local_pin_unpin_memget_memput_roundtrip() {
        init();
        let addr = alloc_local(8).unwrap();

        memput_sync(addr, &[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        let mut out = [0u8; 8];
        memget_sync(&mut out, addr).unwrap();
        assert_eq!(out, [1, 2, 3, 4, 5, 6, 7, 8]);

        free(addr, None).unwrap();
    }

    #[test]
    fn memcpy_local_addresses_copies_bytes() {
        init();
        let src = alloc_local(4).unwrap();
        let dst = alloc_local(4).unwrap();
        memput_sync(src, &[9, 9, 9, 9]).unwrap();
        memcpy(dst, src, 4).unwrap();
        let mut out = [0u8; 4];
        memget_sync(&mut out, dst).unwrap();
        assert_eq!(out, [9, 9, 9, 9]);
    }

    #[test]
    fn alloc_at_sync_here_is_the_local_fast_path() {
        init();
        let rank = crate::my_rank().unwrap();
        let addr = alloc_at_sync(16, rank).unwrap();
        assert_eq!(addr.locality(), rank);
    }

    #[test]
    fn memget_signals_done_with_a_tagged_reply() {
        init();
        let addr = alloc_local(4).unwrap();
        memput_sync(addr, &[5, 6, 7, 8]).unwrap();

        let done = rt_lco::future(5).unwrap();
        memget(addr, 4, done).unwrap();
        let mut out = [0u8; 5];
        rt_lco::get(done, &mut out).unwrap();
        assert_eq!(out, [0, 5, 6, 7, 8]);
        rt_lco::delete(done).unwrap();
    }

    #[test]
    fn memput_signals_done_with_an_ack() {
        init();
        let addr = alloc_local(4).unwrap();

        let done = rt_lco::future(1).unwrap();
        memput(addr, &[1, 2, 3, 4], done).unwrap();
        let mut ack = [0u8; 1];
        rt_lco::get(done, &mut ack).unwrap();
        assert_eq!(ack, [0]);
        rt_lco::delete(done).unwrap();

        let mut out = [0u8; 4];
        memget_sync(&mut out, addr).unwrap();
        assert_eq!(out, [1, 2, 3, 4]);
    }
}
