// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The runtime's error taxonomy (spec §7): `Resend` is handled entirely
//! inside `rt-net`/`rt-parcel` and never surfaces here; everything that does
//! reach this enum is either an LCO condition bubbled up from `rt-lco` or one
//! of the small set of `Fatal` conditions that abort the locality at `init`.

#[derive(Debug, onlyerror::Error)]
pub enum Error {
    /// the configuration file or CLI overrides described an invalid locality
    InvalidConfig(String),
    /// `boot` named a bootstrap mechanism this workspace does not implement
    BootUnavailable(crate::config::Boot),
    /// `transport` named a network transport this workspace does not implement
    TransportUnavailable(crate::config::Transport),
    /// a multi-rank locality's peer list did not name every rank's address
    PeerListMismatch,
    /// `gasrt::init` was called more than once in this process
    AlreadyInitialized,
    /// a lifecycle operation ran before `gasrt::init` completed
    NotInitialized,
    /// `run`'s action name was never registered
    UnknownAction(String),
    /// registering an application action against the locality's registry failed
    Action(#[from] rt_parcel::Error),
    /// a failing LCO operation, surfaced as `run`'s exit status
    Lco(#[from] rt_lco::Error),
    /// a failing global address space operation (allocation, pin, free)
    Gas(#[from] rt_gas::Error),
    /// a remote GAS operation's reply could not be decoded, or named no live allocation
    GasRemote,
    /// reading or parsing a TOML configuration file failed
    Config(String),
    /// binding the configured transport's listening socket failed
    Io(#[from] std::io::Error),
}

pub type Result<T> = core::result::Result<T, Error>;
