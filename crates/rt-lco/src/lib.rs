// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Local Control Objects: the runtime's blocking synchronization primitives
//! (spec §3/§4.4) — futures, AND-gates, counting semaphores, and the
//! all-gather/all-to-all gather variants — named by [`GlobalAddr`] and
//! realized either directly against this locality's [`table::LcoTable`] or,
//! for an address some other locality owns, by round-tripping a parcel
//! through [`remote`].
//!
//! Construction ([`future`], [`and_gate`], [`semaphore`], [`all_gather`],
//! [`all_to_all`]) always allocates locally: spec §3 does not define a way
//! to create an LCO on a remote locality directly, only to operate on one
//! once its address has been communicated (e.g. returned from a parcel
//! whose target ran remotely).

mod and_gate;
mod error;
mod future;
mod gather;
mod lco;
mod remote;
mod runtime;
mod table;

pub use error::{Error, Result};
pub use remote::{
    attach, delete, error, get, get_all, get_reset, getid, reset, set, setid, size, wait, wait_all,
};
pub use runtime::{all_gather, all_to_all, and_gate, future, semaphore, LcoRuntime};
