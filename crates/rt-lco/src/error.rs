// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

#[derive(Debug, onlyerror::Error)]
pub enum Error {
    /// address does not name a live LCO on this locality
    NotAllocated,
    /// this operation does not apply to this LCO variant (e.g. resetting a future)
    Unsupported,
    /// a user action signaled this code into the LCO via `error()`
    Signaled(i32),
    /// wait/get observed the LCO in a reset state rather than a value
    Reset,
    /// get attempted on an LCO with nothing buffered (e.g. a semaphore at zero, non-blocking path)
    ChannelEmpty,
    /// the LCO has been deleted
    Deleted,
    /// a destination buffer was too small for the value being read out of the LCO
    BufferTooSmall,
}

pub type Result<T> = core::result::Result<T, Error>;
