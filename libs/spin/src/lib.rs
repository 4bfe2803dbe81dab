// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Low-overhead spinning synchronization primitives for the runtime's hot paths (LCO locks,
//! worker freelists, steal queues). These never park the OS thread, so holding one across a
//! blocking operation is a bug, not just a performance problem.

mod backoff;
mod mutex;

pub use backoff::Backoff;
pub use mutex::{Mutex, MutexGuard};
