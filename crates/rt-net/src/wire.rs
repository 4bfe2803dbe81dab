// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The wire format. Spec §1 explicitly does not mandate a particular wire
//! format; this is simply *a* correct one, a flat little-endian encoding of
//! a [`Parcel`]'s fields (spec §9: "parcels serialize the `action +
//! continuation + payload` block"), plus the small control-message envelope
//! the rendezvous protocol (spec §4.6) uses for messages that are not a
//! parcel at all.

use crate::error::{Error, Result};
use rt_gas::GlobalAddr;
use rt_parcel::{ActionId, Parcel, ProcessId};

fn put_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_le_bytes());
}
fn put_u64(buf: &mut Vec<u8>, v: u64) {
    buf.extend_from_slice(&v.to_le_bytes());
}
fn get_u32(bytes: &[u8], at: &mut usize) -> Result<u32> {
    let v = bytes.get(*at..*at + 4).ok_or(Error::Malformed)?;
    *at += 4;
    Ok(u32::from_le_bytes(v.try_into().unwrap()))
}
fn get_u64(bytes: &[u8], at: &mut usize) -> Result<u64> {
    let v = bytes.get(*at..*at + 8).ok_or(Error::Malformed)?;
    *at += 8;
    Ok(u64::from_le_bytes(v.try_into().unwrap()))
}

fn put_addr(buf: &mut Vec<u8>, addr: GlobalAddr) {
    put_u32(buf, addr.locality());
    put_u64(buf, addr.offset());
}
fn get_addr(bytes: &[u8], at: &mut usize) -> Result<GlobalAddr> {
    let locality = get_u32(bytes, at)?;
    let offset = get_u64(bytes, at)?;
    Ok(GlobalAddr::new(locality, offset))
}

/// Encodes a parcel's target/action/continuation/pid/credit header and
/// payload into a flat byte buffer, suitable for handing to a [`Transport`].
///
/// [`Transport`]: crate::transport::Transport
#[must_use]
pub fn encode_parcel(p: &Parcel) -> Vec<u8> {
    let data = p.get_data();
    let mut buf = Vec::with_capacity(4 + 8 + 4 + 4 + 8 + 4 + 8 + 4 + 8 + data.len());
    put_addr(&mut buf, p.target);
    put_u32(&mut buf, p.action);
    put_addr(&mut buf, p.cont_target);
    put_u32(&mut buf, p.cont_action);
    put_u64(&mut buf, p.pid);
    put_u32(&mut buf, p.credit);
    put_u64(&mut buf, data.len() as u64);
    buf.extend_from_slice(data);
    buf
}

/// The inverse of [`encode_parcel`].
///
/// # Errors
///
/// Returns [`Error::Malformed`] if `bytes` is truncated or its declared
/// payload length runs past the end of the buffer.
pub fn decode_parcel(bytes: &[u8]) -> Result<Box<Parcel>> {
    let mut at = 0;
    let target = get_addr(bytes, &mut at)?;
    let action: ActionId = get_u32(bytes, &mut at)?;
    let cont_target = get_addr(bytes, &mut at)?;
    let cont_action: ActionId = get_u32(bytes, &mut at)?;
    let pid: ProcessId = get_u64(bytes, &mut at)?;
    let credit = get_u32(bytes, &mut at)?;
    let len = get_u64(bytes, &mut at)? as usize;
    let data = bytes.get(at..at + len).ok_or(Error::Malformed)?;

    let mut parcel = Parcel::acquire(len).with_data(data);
    parcel.set_target(target);
    parcel.set_action(action);
    parcel.set_continuation(cont_target, cont_action);
    parcel.pid = pid;
    parcel.credit = credit;
    Ok(parcel)
}

/// A rendezvous or eager-delivery key, unique per in-flight large send on
/// the owning locality.
pub type Key = u64;

/// A control message exchanged between two dispatchers, carried as the raw
/// payload of one [`Transport::send`]/[`Transport::try_recv`] round.
///
/// [`Transport::send`]: crate::transport::Transport::send
/// [`Transport::try_recv`]: crate::transport::Transport::try_recv
pub enum WireMsg {
    /// A parcel small enough to send inline, already [`encode_parcel`]d.
    Eager(Vec<u8>),
    /// "I have a large parcel for you"; spec §4.6's rendezvous request,
    /// carrying the size so the receiver can size its pull and `from` so it
    /// knows which locality to pull from.
    RendezvousRequest { key: Key, from: u32, size: u64 },
    /// "Send me the bytes named by `key`"; the receiver's get-with-completion
    /// read, addressed back to the original sender.
    RendezvousGet { key: Key, from: u32 },
    /// The actual payload, pushed in response to a [`WireMsg::RendezvousGet`].
    RendezvousData { key: Key, bytes: Vec<u8> },
    /// "You can free the source parcel now"; sent once the receiver has
    /// scheduled the rendezvous-delivered parcel.
    RendezvousDone { key: Key },
}

const TAG_EAGER: u8 = 0;
const TAG_REQUEST: u8 = 1;
const TAG_GET: u8 = 2;
const TAG_DATA: u8 = 3;
const TAG_DONE: u8 = 4;

#[must_use]
pub fn encode_msg(msg: &WireMsg) -> Vec<u8> {
    let mut buf = Vec::new();
    match msg {
        WireMsg::Eager(bytes) => {
            buf.push(TAG_EAGER);
            buf.extend_from_slice(bytes);
        }
        WireMsg::RendezvousRequest { key, from, size } => {
            buf.push(TAG_REQUEST);
            put_u64(&mut buf, *key);
            put_u32(&mut buf, *from);
            put_u64(&mut buf, *size);
        }
        WireMsg::RendezvousGet { key, from } => {
            buf.push(TAG_GET);
            put_u64(&mut buf, *key);
            put_u32(&mut buf, *from);
        }
        WireMsg::RendezvousData { key, bytes } => {
            buf.push(TAG_DATA);
            put_u64(&mut buf, *key);
            buf.extend_from_slice(bytes);
        }
        WireMsg::RendezvousDone { key } => {
            buf.push(TAG_DONE);
            put_u64(&mut buf, *key);
        }
    }
    buf
}

/// # Errors
///
/// Returns [`Error::Malformed`] if `bytes` is empty or its tag byte is
/// unrecognized, or if the tagged payload is truncated.
pub fn decode_msg(bytes: &[u8]) -> Result<WireMsg> {
    let (&tag, rest) = bytes.split_first().ok_or(Error::Malformed)?;
    let mut at = 0;
    match tag {
        TAG_EAGER => Ok(WireMsg::Eager(rest.to_vec())),
        TAG_REQUEST => {
            let key = get_u64(rest, &mut at)?;
            let from = get_u32(rest, &mut at)?;
            let size = get_u64(rest, &mut at)?;
            Ok(WireMsg::RendezvousRequest { key, from, size })
        }
        TAG_GET => {
            let key = get_u64(rest, &mut at)?;
            let from = get_u32(rest, &mut at)?;
            Ok(WireMsg::RendezvousGet { key, from })
        }
        TAG_DATA => {
            let key = get_u64(rest, &mut at)?;
            let bytes = rest.get(at..).ok_or(Error::Malformed)?.to_vec();
            Ok(WireMsg::RendezvousData { key, bytes })
        }
        TAG_DONE => {
            let key = get_u64(rest, &mut at)?;
            Ok(WireMsg::RendezvousDone { key })
        }
        _ => Err(Error::Malformed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parcel_round_trips_through_the_wire_format() {
        let mut p = Parcel::acquire(3).with_data(&[7, 8, 9]);
        p.set_target(GlobalAddr::new(2, 64));
        p.set_action(5);
        p.set_continuation(GlobalAddr::new(0, 128), 9);
        p.pid = 42;
        p.credit = 3;

        let bytes = encode_parcel(&p);
        let decoded = decode_parcel(&bytes).unwrap();
        assert_eq!(decoded.target, GlobalAddr::new(2, 64));
        assert_eq!(decoded.action, 5);
        assert_eq!(decoded.cont_target, GlobalAddr::new(0, 128));
        assert_eq!(decoded.cont_action, 9);
        assert_eq!(decoded.pid, 42);
        assert_eq!(decoded.credit, 3);
        assert_eq!(decoded.get_data(), &[7, 8, 9]);
    }

    #[test]
    fn control_messages_round_trip() {
        let msgs = vec![
            WireMsg::RendezvousRequest {
                key: 1,
                from: 2,
                size: 99,
            },
            WireMsg::RendezvousGet { key: 1, from: 2 },
            WireMsg::RendezvousData {
                key: 1,
                bytes: vec![1, 2, 3],
            },
            WireMsg::RendezvousDone { key: 1 },
        ];
        for msg in msgs {
            let bytes = encode_msg(&msg);
            let decoded = decode_msg(&bytes).unwrap();
            match (&msg, &decoded) {
                (WireMsg::RendezvousRequest { key: k1, from: f1, size: s1 }, WireMsg::RendezvousRequest { key: k2, from: f2, size: s2 }) => {
                    assert_eq!((k1, f1, s1), (k2, f2, s2));
                }
                (WireMsg::RendezvousGet { key: k1, from: f1 }, WireMsg::RendezvousGet { key: k2, from: f2 }) => {
                    assert_eq!((k1, f1), (k2, f2));
                }
                (WireMsg::RendezvousData { key: k1, bytes: b1 }, WireMsg::RendezvousData { key: k2, bytes: b2 }) => {
                    assert_eq!((k1, b1), (k2, b2));
                }
                (WireMsg::RendezvousDone { key: k1 }, WireMsg::RendezvousDone { key: k2 }) => {
                    assert_eq!(k1, k2);
                }
                _ => panic!("tag mismatch after round trip"),
            }
        }
    }

    #[test]
    fn malformed_bytes_are_rejected() {
        assert!(decode_msg(&[]).is_err());
        assert!(decode_msg(&[TAG_REQUEST]).is_err());
        assert!(decode_parcel(&[1, 2, 3]).is_err());
    }
}
