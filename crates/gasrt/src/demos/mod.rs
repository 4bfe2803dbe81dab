// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Example programs exercised by `main.rs` and by this crate's integration
//! tests, each translated from one of HPX5's `examples/hpx/*.c` programs
//! (spec §8's scenarios) into an action registered against a [`crate::Builder`].

pub mod allgather;
pub mod broadcast;
pub mod countdown;
pub mod fib;
pub mod pingpong;

use crate::{Builder, Result};

/// Registers every demo's actions against `builder`. `main.rs` calls this
/// once so any demo can be `run` in the same process without needing to know
/// ahead of time which one the user picked.
pub fn register_all(builder: &mut Builder) -> Result<()> {
    fib::register(builder)?;
    pingpong::register(builder)?;
    countdown::register(builder)?;
    allgather::register(builder)?;
    broadcast::register(builder)?;
    Ok(())
}
