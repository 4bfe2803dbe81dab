// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::error::{Error, Result};
use rt_gas::{Gas, GlobalAddr};
use std::collections::HashMap;
use std::ptr::NonNull;

pub type ActionId = u32;

/// Action id reserved for the built-in "set this value into the LCO at the
/// target address" continuation action. `rt-lco` installs the real handler
/// here before the registry is finalized.
pub const ACTION_LCO_SET: ActionId = 0;

bitflags::bitflags! {
    /// Attributes controlling how a parcel naming this action is invoked.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct ActionAttrs: u8 {
        /// Pin the target address and prepend the pinned pointer to the
        /// handler's arguments; unpin after the handler returns.
        const PINNED = 1 << 0;
        /// The payload is an opaque blob; skip type-driven unpacking.
        const MARSHALLED = 1 << 1;
        /// Run synchronously on the receiving worker's own stack. Must not
        /// block.
        const INTERRUPT = 1 << 2;
        /// Runs on a user thread, guaranteed not to block on an LCO.
        const TASK = 1 << 3;
        /// Runs on a user thread with full capabilities (may block).
        const DEFAULT = 1 << 4;
    }
}

/// A registered action's handler.
#[derive(Clone, Copy)]
pub enum Handler {
    /// Receives the parcel's payload, returns the continuation value.
    Plain(fn(&[u8]) -> Vec<u8>),
    /// Receives the target address, the pinned pointer it resolved to, and
    /// the payload; only valid for actions registered with
    /// [`ActionAttrs::PINNED`]. The address is passed alongside the pointer
    /// because handlers that manage their own out-of-band state keyed by
    /// address (e.g. `rt-lco`'s LCO table) cannot recover it from the raw
    /// pointer alone.
    Pinned(fn(GlobalAddr, NonNull<u8>, &[u8]) -> Vec<u8>),
}

/// An immutable, per-action registry entry.
pub struct ActionEntry {
    pub id: ActionId,
    pub name: &'static str,
    pub attrs: ActionAttrs,
    pub handler: Handler,
}

fn unregistered_handler(_: &[u8]) -> Vec<u8> {
    panic!("called an action entry that was never registered")
}

/// The status returned by invoking an action's handler against a parcel.
pub enum InvokeStatus {
    /// The handler ran to completion; carries its return value.
    Completed(Vec<u8>),
    /// A pinned action's target address could not be pinned locally; the
    /// caller must re-route the parcel (typically: forward it to the
    /// locality that currently owns the address).
    Resend,
}

/// Name → handler table with per-action attributes.
///
/// Registration is only valid before [`ActionRegistry::finalize`]; once
/// finalized the table is read-only for the remainder of the epoch, as
/// required by spec §4.1.
pub struct ActionRegistry {
    entries: Vec<ActionEntry>,
    by_name: HashMap<&'static str, ActionId>,
    finalized: bool,
}

impl ActionRegistry {
    #[must_use]
    pub fn new() -> Self {
        let placeholder = ActionEntry {
            id: ACTION_LCO_SET,
            name: "lco-set",
            attrs: ActionAttrs::PINNED,
            handler: Handler::Pinned(|_, _, _| unregistered_handler(&[])),
        };
        let mut by_name = HashMap::new();
        by_name.insert("lco-set", ACTION_LCO_SET);
        Self {
            entries: vec![placeholder],
            by_name,
            finalized: false,
        }
    }

    /// Registers a new action, returning its id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Finalized`] if called after [`Self::finalize`], or
    /// [`Error::DuplicateName`] if `name` is already registered.
    pub fn register(
        &mut self,
        name: &'static str,
        handler: Handler,
        attrs: ActionAttrs,
    ) -> Result<ActionId> {
        if self.finalized {
            return Err(Error::Finalized);
        }
        if self.by_name.contains_key(name) {
            return Err(Error::DuplicateName);
        }
        debug_assert!(
            !matches!(handler, Handler::Pinned(_)) || attrs.contains(ActionAttrs::PINNED),
            "Handler::Pinned must be registered with ActionAttrs::PINNED"
        );

        let id = self.entries.len() as ActionId;
        self.entries.push(ActionEntry {
            id,
            name,
            attrs,
            handler,
        });
        self.by_name.insert(name, id);
        Ok(id)
    }

    /// Overwrites the reserved [`ACTION_LCO_SET`] entry's handler. Used
    /// exactly once, by `rt-lco`'s setup, before `finalize`.
    pub fn install_lco_set(&mut self, handler: Handler) {
        assert!(!self.finalized, "cannot install lco-set after finalize()");
        self.entries[ACTION_LCO_SET as usize].handler = handler;
    }

    pub fn finalize(&mut self) {
        self.finalized = true;
    }

    #[must_use]
    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    #[must_use]
    pub fn lookup(&self, id: ActionId) -> Option<&ActionEntry> {
        self.entries.get(id as usize)
    }

    #[must_use]
    pub fn lookup_by_name(&self, name: &str) -> Option<ActionId> {
        self.by_name.get(name).copied()
    }

    /// Invokes `entry`'s handler against `payload`.
    ///
    /// For a [`ActionAttrs::PINNED`] action this first attempts to pin
    /// `target` via `gas`; on failure it returns
    /// [`InvokeStatus::Resend`] without running the handler, so the caller
    /// (the network dispatcher, typically) can re-route the parcel.
    #[tracing::instrument(level = "trace", skip(self, gas, payload), fields(action = entry.name))]
    pub fn invoke(
        &self,
        entry: &ActionEntry,
        gas: &Gas,
        target: rt_gas::GlobalAddr,
        payload: &[u8],
    ) -> InvokeStatus {
        match entry.handler {
            Handler::Plain(f) => InvokeStatus::Completed(f(payload)),
            Handler::Pinned(f) => match gas.pin(target) {
                Some((ptr, _len)) => {
                    let result = f(target, ptr, payload);
                    gas.unpin(target);
                    InvokeStatus::Completed(result)
                }
                None => InvokeStatus::Resend,
            },
        }
    }
}

impl Default for ActionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rt_gas::Gas;

    fn echo(payload: &[u8]) -> Vec<u8> {
        payload.to_vec()
    }

    #[test]
    fn register_lookup_and_finalize() {
        let mut reg = ActionRegistry::new();
        let id = reg
            .register("echo", Handler::Plain(echo), ActionAttrs::DEFAULT)
            .unwrap();
        reg.finalize();

        assert!(reg.is_finalized());
        assert_eq!(reg.lookup_by_name("echo"), Some(id));
        assert!(matches!(
            reg.register("late", Handler::Plain(echo), ActionAttrs::DEFAULT),
            Err(Error::Finalized)
        ));
    }

    #[test]
    fn duplicate_name_rejected() {
        let mut reg = ActionRegistry::new();
        reg.register("echo", Handler::Plain(echo), ActionAttrs::DEFAULT)
            .unwrap();
        assert!(matches!(
            reg.register("echo", Handler::Plain(echo), ActionAttrs::DEFAULT),
            Err(Error::DuplicateName)
        ));
    }

    #[test]
    fn pinned_invoke_resends_when_not_local() {
        let mut reg = ActionRegistry::new();
        let id = reg
            .register(
                "touch",
                Handler::Pinned(|_addr, _ptr, payload| payload.to_vec()),
                ActionAttrs::PINNED,
            )
            .unwrap();
        reg.finalize();

        let gas = Gas::new(0, 2, 4096);
        let entry = reg.lookup(id).unwrap();
        let remote = rt_gas::GlobalAddr::new(1, 64);
        assert!(matches!(
            reg.invoke(entry, &gas, remote, &[]),
            InvokeStatus::Resend
        ));
    }

    #[test]
    fn pinned_invoke_runs_when_local() {
        let mut reg = ActionRegistry::new();
        let id = reg
            .register(
                "touch",
                Handler::Pinned(|_addr, _ptr, payload| payload.to_vec()),
                ActionAttrs::PINNED,
            )
            .unwrap();
        reg.finalize();

        let gas = Gas::new(0, 1, 4096);
        let addr = gas.alloc_local(8).unwrap();
        let entry = reg.lookup(id).unwrap();
        match reg.invoke(entry, &gas, addr, &[1, 2, 3]) {
            InvokeStatus::Completed(v) => assert_eq!(v, vec![1, 2, 3]),
            InvokeStatus::Resend => panic!("expected completion"),
        }
    }
}
