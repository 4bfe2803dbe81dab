// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

#[derive(Debug, onlyerror::Error)]
pub enum Error {
    /// the heap does not have enough free space to satisfy this allocation
    OutOfMemory,
    /// address does not name a locally tracked allocation
    NotAllocated,
    /// address is not resolvable on this locality and must be forwarded
    Resend,
    /// attempted to free a block while it is still pinned
    StillPinned,
    /// attempted to unpin a block that was not pinned
    NotPinned,
}

pub type Result<T> = core::result::Result<T, Error>;
