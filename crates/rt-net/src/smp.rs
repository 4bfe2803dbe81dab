// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The default/test transport: an in-process fabric connecting every
//! simulated locality by a per-destination inbox. Spec §6 names `smp` as a
//! recognized `transport` configuration value; the other variants (`mpi`,
//! `portals`, `photon`) are external collaborators this workspace does not
//! implement (spec §1).

use crate::transport::Transport;
use std::collections::VecDeque;
use std::sync::Arc;

/// One locality's end of an in-process fabric of `ranks` localities. Cloning
/// the `Arc<Vec<_>>` of inboxes is cheap; each [`SmpTransport`] only differs
/// in which inbox it reads from.
pub struct SmpTransport {
    rank: u32,
    inboxes: Arc<Vec<spin::Mutex<VecDeque<Vec<u8>>>>>,
}

impl SmpTransport {
    /// Builds a fully connected fabric of `ranks` localities, returning one
    /// [`SmpTransport`] handle per rank (index `i` is locality `i`'s handle).
    #[must_use]
    pub fn fabric(ranks: u32) -> Vec<Self> {
        let inboxes: Arc<Vec<_>> = Arc::new(
            (0..ranks)
                .map(|_| spin::Mutex::new(VecDeque::new()))
                .collect(),
        );
        (0..ranks)
            .map(|rank| Self {
                rank,
                inboxes: inboxes.clone(),
            })
            .collect()
    }

    #[must_use]
    pub fn rank(&self) -> u32 {
        self.rank
    }
}

impl Transport for SmpTransport {
    fn send(&self, locality: u32, bytes: Vec<u8>) {
        self.inboxes[locality as usize].lock().push_back(bytes);
    }

    fn try_recv(&self) -> Option<Vec<u8>> {
        self.inboxes[self.rank as usize].lock().pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_are_delivered_to_the_right_inbox() {
        let fabric = SmpTransport::fabric(3);
        fabric[0].send(2, vec![1, 2, 3]);
        fabric[1].send(2, vec![4, 5]);
        assert!(fabric[2].try_recv().is_some());
        assert!(fabric[2].try_recv().is_some());
        assert!(fabric[2].try_recv().is_none());
        assert!(fabric[0].try_recv().is_none());
    }
}
