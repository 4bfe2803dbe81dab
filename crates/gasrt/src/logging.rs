// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Wires up `tracing-subscriber`, the way `build/xtask/src/tracing.rs`
//! wires up its `OutputOptions`, scaled down to what a locality needs: an
//! `EnvFilter` (spec §6's `log-level`) and, when this rank is not named by
//! `log-at`, a filter that drops everything below `ERROR` so a multi-rank
//! run doesn't interleave every locality's trace output by default.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Installs the global `tracing` subscriber for this process.
///
/// `log_level` is an `EnvFilter` directive string (e.g. `"info"`,
/// `"gasrt=debug,warn"`); `None` falls back to `RUST_LOG`, defaulting to
/// `info` if that is unset too. `rank` and `log_at` implement spec §6's
/// `log-at` locality mask: when non-empty and `rank` is not a member, the
/// effective level is clamped to `ERROR`.
pub fn init(log_level: Option<&str>, rank: u32, log_at: &[u32]) {
    let directive = if !log_at.is_empty() && !log_at.contains(&rank) {
        "error".to_string()
    } else {
        log_level.unwrap_or("info").to_string()
    };

    let filter = EnvFilter::try_new(&directive)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_names(true);

    let _ = tracing_subscriber::registry().with(filter).with(fmt).try_init();
}
