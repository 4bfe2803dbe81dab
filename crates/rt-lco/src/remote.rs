// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Local-vs-remote dispatch for every public LCO operation.
//!
//! A local address is realized directly against [`crate::table::LcoTable`].
//! A remote one is realized by allocating a local future, sending a request
//! parcel naming the owning locality's copy of the well-known action
//! (`lco-wait`, `lco-get`, ...) with that future as the continuation target
//! and [`rt_parcel::ACTION_LCO_SET`] as the continuation action, and then
//! blocking on the future exactly as [`crate::lco::Lco::wait`] would — the
//! same parcel-continuation protocol `rt-sched` already drives for every
//! other action, just pointed at ourselves.

use crate::error::{Error, Result};
use crate::runtime::LcoRuntime;
use rt_gas::GlobalAddr;
use rt_parcel::Parcel;

/// Encodes a `Result<Vec<u8>, Error>` as the bytes carried by an LCO action's
/// continuation: a one-byte tag, then either an 8-byte little-endian length
/// followed by that many payload bytes, or a 4-byte little-endian `Signaled`
/// error code. Any other error collapses to a generic remote-failure tag,
/// since the exact local variant (heap exhaustion, a deleted LCO, ...) does
/// not survive the hop in this wire format.
///
/// The explicit length prefix matters because the reply travels through a
/// fixed-size future (spec: futures move exactly their declared size on
/// every `get`): a short real reply is zero-padded out to that size, so the
/// receiving end cannot recover the true length from `value.len()` alone.
pub(crate) fn encode_result(result: Result<Vec<u8>>) -> Vec<u8> {
    match result {
        Ok(bytes) => {
            let mut v = Vec::with_capacity(9 + bytes.len());
            v.push(0);
            v.extend((bytes.len() as u64).to_le_bytes());
            v.extend(bytes);
            v
        }
        Err(Error::Signaled(code)) => {
            let mut v = vec![1u8];
            v.extend(code.to_le_bytes());
            v
        }
        Err(_) => vec![2u8],
    }
}

fn decode_result(bytes: &[u8]) -> Result<Vec<u8>> {
    match bytes.first() {
        Some(0) => {
            let len = u64::from_le_bytes(bytes[1..9].try_into().map_err(|_| Error::NotAllocated)?) as usize;
            Ok(bytes.get(9..9 + len).ok_or(Error::NotAllocated)?.to_vec())
        }
        Some(1) => {
            let code = i32::from_le_bytes(bytes[1..5].try_into().map_err(|_| Error::NotAllocated)?);
            Err(Error::Signaled(code))
        }
        Some(2) => Err(Error::NotAllocated),
        _ => Err(Error::NotAllocated),
    }
}

/// Sends `payload` to `addr` naming action `action_name`, with the
/// continuation wired back to a freshly allocated local future, and blocks
/// for the reply's tag-encoded value. Used for every remote LCO operation
/// whose handler replies through [`encode_result`] (everything except
/// `lco-set`/`lco-delete`, which reply with an unwrapped empty ack — see
/// [`ack_round_trip`]).
/// `reply_cap` must cover the largest reply this `action_name`'s handler can
/// produce: the one-byte tag plus its payload (an error code, a size, or the
/// bytes a `get`/`getid` reads out).
fn round_trip(addr: GlobalAddr, action_name: &str, payload: Vec<u8>, reply_cap: usize) -> Result<Vec<u8>> {
    let (reply_addr, buf) = send_and_await(addr, action_name, payload, reply_cap)?;
    let result = decode_result(&buf);
    LcoRuntime::table().delete(LcoRuntime::gas(), reply_addr);
    result
}

/// Like [`round_trip`], but for actions (`lco-set`, `lco-delete`) whose
/// handler always returns an empty, untagged reply: the round trip having
/// completed at all (the local reply future fired) is success.
fn ack_round_trip(addr: GlobalAddr, action_name: &str, payload: Vec<u8>) -> Result<()> {
    let (reply_addr, _buf) = send_and_await(addr, action_name, payload, 1)?;
    LcoRuntime::table().delete(LcoRuntime::gas(), reply_addr);
    Ok(())
}

fn send_and_await(
    addr: GlobalAddr,
    action_name: &str,
    payload: Vec<u8>,
    reply_cap: usize,
) -> Result<(GlobalAddr, Vec<u8>)> {
    let reply_addr = crate::runtime::future(reply_cap)?;
    let action = LcoRuntime::action_id(action_name);
    let mut parcel = Parcel::acquire(payload.len()).with_data(&payload);
    parcel.set_target(addr);
    parcel.set_action(action);
    parcel.set_continuation(reply_addr, rt_parcel::ACTION_LCO_SET);
    LcoRuntime::submit().submit(parcel);

    let reply_lco = LcoRuntime::table().get(reply_addr).ok_or(Error::NotAllocated)?;
    let mut buf = vec![0u8; reply_cap];
    let n = reply_lco.get(&mut buf, LcoRuntime::submit())?;
    buf.truncate(n);
    Ok((reply_addr, buf))
}

fn is_local(addr: GlobalAddr) -> bool {
    LcoRuntime::gas().is_local(addr)
}

/// Sets a future's value, fires an AND-gate, or releases a semaphore permit
/// at `addr`. If `lsync` is given, it is signaled once `value` has been
/// copied out of the caller's hands (immediately for a local target, or
/// once the request parcel has been built for a remote one — either way,
/// by the time this call returns). If `rsync` is given, it is signaled once
/// the set has actually landed at `addr`: immediately for a local target,
/// or as the remote request parcel's own continuation otherwise, so `set`
/// itself does not block waiting on a remote locality's reply (the same
/// fire-and-forget shape `gasrt::gas::free`'s `rsync` parameter uses).
pub fn set(addr: GlobalAddr, value: &[u8], lsync: Option<GlobalAddr>, rsync: Option<GlobalAddr>) -> Result<()> {
    if is_local(addr) {
        let lco = LcoRuntime::table().get(addr).ok_or(Error::NotAllocated)?;
        lco.set(value, LcoRuntime::submit())?;
        if let Some(lsync) = lsync {
            set(lsync, &[], None, None)?;
        }
        if let Some(rsync) = rsync {
            set(rsync, &[], None, None)?;
        }
        Ok(())
    } else {
        let action = LcoRuntime::action_id("lco-set");
        let mut parcel = Parcel::acquire(value.len()).with_data(value);
        parcel.set_target(addr);
        parcel.set_action(action);
        if let Some(rsync) = rsync {
            parcel.set_continuation(rsync, rt_parcel::ACTION_LCO_SET);
        }
        LcoRuntime::submit().submit(parcel);
        if let Some(lsync) = lsync {
            set(lsync, &[], None, None)?;
        }
        Ok(())
    }
}

/// Blocks until the LCO at `addr` is triggered.
pub fn wait(addr: GlobalAddr) -> Result<()> {
    if is_local(addr) {
        let lco = LcoRuntime::table().get(addr).ok_or(Error::NotAllocated)?;
        lco.wait(LcoRuntime::submit())
    } else {
        round_trip(addr, "lco-wait", Vec::new(), 9).map(|_| ())
    }
}

/// Blocks until a value is available at `addr`, copying up to `out.len()`
/// bytes into it and returning the count written.
pub fn get(addr: GlobalAddr, out: &mut [u8]) -> Result<usize> {
    if is_local(addr) {
        let lco = LcoRuntime::table().get(addr).ok_or(Error::NotAllocated)?;
        lco.get(out, LcoRuntime::submit())
    } else {
        let req = (out.len() as u64).to_le_bytes().to_vec();
        let value = round_trip(addr, "lco-get", req, 9 + out.len())?;
        let n = value.len().min(out.len());
        out[..n].copy_from_slice(&value[..n]);
        Ok(n)
    }
}

/// Like [`get`], additionally resetting the LCO afterward where that is
/// meaningful.
pub fn get_reset(addr: GlobalAddr, out: &mut [u8]) -> Result<usize> {
    if is_local(addr) {
        let lco = LcoRuntime::table().get(addr).ok_or(Error::NotAllocated)?;
        lco.get_reset(out, LcoRuntime::submit())
    } else {
        let req = (out.len() as u64).to_le_bytes().to_vec();
        let value = round_trip(addr, "lco-get-reset", req, 9 + out.len())?;
        let n = value.len().min(out.len());
        out[..n].copy_from_slice(&value[..n]);
        Ok(n)
    }
}

/// Contributes participant `id`'s row to the gather/all-to-all LCO at
/// `addr`.
pub fn setid(addr: GlobalAddr, id: usize, bytes: &[u8]) -> Result<()> {
    if is_local(addr) {
        let lco = LcoRuntime::table().get(addr).ok_or(Error::NotAllocated)?;
        lco.setid(id, bytes, LcoRuntime::submit())
    } else {
        let mut payload = (id as u64).to_le_bytes().to_vec();
        payload.extend_from_slice(bytes);
        round_trip(addr, "lco-setid", payload, 9).map(|_| ())
    }
}

/// Reads participant `id`'s view out of the gather/all-to-all LCO at `addr`.
pub fn getid(addr: GlobalAddr, id: usize, out: &mut [u8]) -> Result<()> {
    if is_local(addr) {
        let lco = LcoRuntime::table().get(addr).ok_or(Error::NotAllocated)?;
        lco.getid(id, out, LcoRuntime::submit())
    } else {
        let mut payload = (id as u64).to_le_bytes().to_vec();
        payload.extend_from_slice(&(out.len() as u64).to_le_bytes());
        let value = round_trip(addr, "lco-getid", payload, 9 + out.len())?;
        let n = value.len().min(out.len());
        out[..n].copy_from_slice(&value[..n]);
        Ok(())
    }
}

/// Resets the LCO at `addr` (semaphore, gather) back to its initial state.
pub fn reset(addr: GlobalAddr) -> Result<()> {
    if is_local(addr) {
        LcoRuntime::table().get(addr).ok_or(Error::NotAllocated)?.reset()
    } else {
        round_trip(addr, "lco-reset", Vec::new(), 9).map(|_| ())
    }
}

/// Errors the LCO at `addr` with `code`, waking every waiter.
pub fn error(addr: GlobalAddr, code: i32) -> Result<()> {
    if is_local(addr) {
        LcoRuntime::table()
            .get(addr)
            .ok_or(Error::NotAllocated)?
            .error(code, LcoRuntime::submit())
    } else {
        round_trip(addr, "lco-error", code.to_le_bytes().to_vec(), 9).map(|_| ())
    }
}

/// The byte size of the LCO at `addr` (0 for AND-gates and semaphores).
pub fn size(addr: GlobalAddr) -> Result<usize> {
    if is_local(addr) {
        Ok(LcoRuntime::table().get(addr).ok_or(Error::NotAllocated)?.size())
    } else {
        let value = round_trip(addr, "lco-size", Vec::new(), 9 + std::mem::size_of::<usize>())?;
        Ok(usize::from_le_bytes(
            value[..8].try_into().map_err(|_| Error::NotAllocated)?,
        ))
    }
}

/// Deletes the LCO at `addr`. Any thread still parked on it observes
/// [`Error::Deleted`].
pub fn delete(addr: GlobalAddr) -> Result<()> {
    if is_local(addr) {
        LcoRuntime::table().delete(LcoRuntime::gas(), addr);
        Ok(())
    } else {
        ack_round_trip(addr, "lco-delete", Vec::new())
    }
}

/// Registers `parcel` to be launched once the LCO at `addr` fires, or
/// launches it immediately if it already has. Local addresses only: an
/// attach expresses "run this on my behalf when ready", which only makes
/// sense issued from the locality that owns the continuation's resources.
///
/// # Errors
///
/// Returns [`Error::NotAllocated`] if `addr` does not name a local LCO.
pub fn attach(addr: GlobalAddr, parcel: Box<Parcel>) -> Result<()> {
    let lco = LcoRuntime::table().get(addr).ok_or(Error::NotAllocated)?;
    lco.attach(parcel, LcoRuntime::submit());
    Ok(())
}

/// Blocks until every LCO in `addrs` has triggered.
pub fn wait_all(addrs: &[GlobalAddr]) -> Result<()> {
    for &addr in addrs {
        wait(addr)?;
    }
    Ok(())
}

/// Blocks until every LCO in `addrs` has a value, collecting each into its
/// own buffer.
pub fn get_all(addrs: &[GlobalAddr], outs: &mut [&mut [u8]]) -> Result<()> {
    for (&addr, out) in addrs.iter().zip(outs.iter_mut()) {
        get(addr, out)?;
    }
    Ok(())
}
