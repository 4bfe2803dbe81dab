// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The [`Transport`] seam: send/recv of opaque byte sequences between
//! localities, per spec §1 ("the concrete network transport (MPI/Photon/SMP)"
//! is out of scope for this core and referenced only through its interface).
//!
//! [`crate::smp::SmpTransport`] is the one concrete, in-process implementation
//! this workspace carries; a real MPI/Photon/Portals backend would implement
//! the same trait out of tree.

use rt_gas::GlobalAddr;

/// An opaque key identifying one DMA registration, handed back to the caller
/// of [`Transport::register_dma`] and passed to [`Transport::release_dma`].
pub type DmaKey = u64;

/// Send/recv of opaque byte sequences between localities, plus the DMA
/// pinning hooks the rendezvous protocol (spec §4.6) needs to describe a
/// large payload without copying it onto the wire immediately.
pub trait Transport: Send + Sync {
    /// Enqueues `bytes` for delivery to `locality`. Returns once the bytes
    /// have been handed to the transport (not once they have arrived).
    fn send(&self, locality: u32, bytes: Vec<u8>);

    /// Non-blocking: returns the next inbound message addressed to this
    /// locality, if any has arrived.
    fn try_recv(&self) -> Option<Vec<u8>>;

    /// Pins `len` bytes at `addr` for a remote DMA read, returning a key the
    /// remote side's get-with-completion names. The default SMP transport
    /// shares an address space with every locality it connects, so it has
    /// nothing to register; a real RDMA-capable transport overrides this.
    fn register_dma(&self, _addr: GlobalAddr, _len: usize) -> DmaKey {
        0
    }

    /// Releases a registration made by [`Transport::register_dma`].
    fn release_dma(&self, _key: DmaKey) {}
}
