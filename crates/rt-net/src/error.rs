// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

#[derive(Debug, onlyerror::Error)]
pub enum Error {
    /// a wire message did not decode to a known shape
    Malformed,
    /// a rendezvous reply named a key this locality never requested
    UnknownRendezvousKey,
}

pub type Result<T> = core::result::Result<T, Error>;
