// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::action::ActionId;
use crate::payload::Payload;
use rt_gas::GlobalAddr;

/// Identifies the process a parcel belongs to, for process-wide termination
/// detection via credit accounting (spec §3: "credit counter").
pub type ProcessId = u64;

/// An owned, immutable-once-sent descriptor of a single action invocation.
///
/// A parcel is created by [`Parcel::acquire`], optionally enqueued, bound to
/// a user thread for execution, and finally freed once its continuation (if
/// any) has fired. Ownership is always held by exactly one party: the
/// caller until `send`, then the scheduler or transport, then back to the
/// caller of `release` once execution has completed.
pub struct Parcel {
    pub target: GlobalAddr,
    pub action: ActionId,
    pub cont_target: GlobalAddr,
    pub cont_action: ActionId,
    pub pid: ProcessId,
    /// Outstanding credits against `pid`'s termination detection. Every
    /// parcel sent as part of a process carries a share of that process's
    /// credit; the process is quiescent once all credits are accounted for.
    pub credit: u32,
    payload: Payload,
    /// Reused as a stack-of-parcels link (ready/freelist membership) or to
    /// carry a secondary parcel, e.g. an `ssync` continuation tagging along
    /// with the primary send.
    pub next: Option<Box<Parcel>>,
}

impl Parcel {
    /// Allocates a new parcel with a zeroed payload of `payload_bytes`
    /// bytes and no target, action, or continuation set.
    #[must_use]
    pub fn acquire(payload_bytes: usize) -> Box<Self> {
        Box::new(Self {
            target: GlobalAddr::NULL,
            action: 0,
            cont_target: GlobalAddr::NULL,
            cont_action: 0,
            pid: 0,
            credit: 0,
            payload: Payload::zeroed(payload_bytes),
            next: None,
        })
    }

    #[must_use]
    pub fn with_data(mut self: Box<Self>, bytes: &[u8]) -> Box<Self> {
        self.payload = Payload::from_bytes(bytes);
        self
    }

    pub fn set_target(&mut self, target: GlobalAddr) {
        self.target = target;
    }

    pub fn set_action(&mut self, action: ActionId) {
        self.action = action;
    }

    pub fn set_continuation(&mut self, target: GlobalAddr, action: ActionId) {
        self.cont_target = target;
        self.cont_action = action;
    }

    #[must_use]
    pub fn has_continuation(&self) -> bool {
        !self.cont_target.is_null()
    }

    #[must_use]
    pub fn get_data(&self) -> &[u8] {
        self.payload.as_slice()
    }

    pub fn get_data_mut(&mut self) -> &mut [u8] {
        self.payload.as_mut_slice()
    }

    #[must_use]
    pub fn payload_size(&self) -> usize {
        self.payload.len()
    }

    /// Releases the parcel. Present for symmetry with `acquire` and to make
    /// the lifecycle's end point explicit at call sites; a `Box<Parcel>`
    /// dropped directly has the same effect.
    pub fn release(self: Box<Self>) {
        drop(self);
    }

    /// Builds the continuation parcel fired when this parcel's handler
    /// returns `value`, or `None` if no continuation was registered.
    ///
    /// If the continuation action is [`crate::ACTION_LCO_SET`], `value`
    /// becomes the value set into the target LCO (see `rt-lco`'s
    /// installation of that action).
    #[must_use]
    pub fn continuation(&self, value: Vec<u8>) -> Option<Box<Parcel>> {
        if !self.has_continuation() {
            return None;
        }
        let mut p = Parcel::acquire(value.len()).with_data(&value);
        p.target = self.cont_target;
        p.action = self.cont_action;
        p.pid = self.pid;
        Some(p)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_and_get_data_round_trip() {
        let p = Parcel::acquire(4).with_data(&[1, 2, 3, 4]);
        assert_eq!(p.get_data(), &[1, 2, 3, 4]);
    }

    #[test]
    fn continuation_carries_value_and_pid() {
        let mut p = Parcel::acquire(0);
        p.pid = 7;
        p.set_continuation(GlobalAddr::new(2, 64), 9);
        let cont = p.continuation(vec![1, 2, 3]).unwrap();
        assert_eq!(cont.target, GlobalAddr::new(2, 64));
        assert_eq!(cont.action, 9);
        assert_eq!(cont.pid, 7);
        assert_eq!(cont.get_data(), &[1, 2, 3]);
    }

    #[test]
    fn no_continuation_registered_yields_none() {
        let p = Parcel::acquire(0);
        assert!(p.continuation(vec![]).is_none());
    }
}
