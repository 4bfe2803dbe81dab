// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

#[derive(Debug, onlyerror::Error)]
pub enum Error {
    /// the action registry has already been finalized and accepts no new registrations
    Finalized,
    /// an action with this name is already registered
    DuplicateName,
}

pub type Result<T> = core::result::Result<T, Error>;
