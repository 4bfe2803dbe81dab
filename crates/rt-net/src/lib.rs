// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The network dispatcher (spec §4.6): the local-vs-remote routing decision
//! every parcel send makes, plus the rendezvous protocol large payloads use
//! to avoid an eager copy onto the wire.
//!
//! [`Dispatcher`] is this crate's one [`rt_sched::Submit`] implementation —
//! it is what both `rt-sched`'s fired continuations/resends and `rt-lco`'s
//! remote round trips are built against. [`Transport`] is the seam a
//! concrete network library (MPI, Photon, Portals) would implement; this
//! workspace carries exactly one implementation of it, [`smp::SmpTransport`],
//! an in-process fabric used to run multiple simulated localities in a
//! single OS process.

mod dispatcher;
mod error;
mod smp;
mod tcp;
mod transport;
mod wire;

pub use dispatcher::{Dispatcher, DispatcherStats, ProgressHandle};
pub use error::{Error, Result};
pub use smp::SmpTransport;
pub use tcp::TcpTransport;
pub use transport::{DmaKey, Transport};
pub use wire::{decode_msg, decode_parcel, encode_msg, encode_parcel, Key, WireMsg};
