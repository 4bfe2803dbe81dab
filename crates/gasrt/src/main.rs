// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Runs one of the example programs under `gasrt::demos` as a standalone
//! locality process. A multi-rank run is one of these processes per rank
//! (see `gasrt`'s module docs); launch each with `--my-rank`/`--ranks`/
//! `--peer` naming every other rank's listen address.

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr};
use gasrt::config::{Config, Overrides};
use gasrt::demos::{allgather, broadcast, countdown, fib, pingpong};
use std::path::PathBuf;

#[derive(Debug, Parser)]
struct Cli {
    #[clap(subcommand)]
    demo: Demo,

    /// Path to a TOML configuration file (spec §6's configuration table).
    #[clap(long, global = true)]
    config: Option<PathBuf>,

    #[clap(flatten)]
    overrides: Overrides,
}

#[derive(Debug, Subcommand)]
enum Demo {
    /// Recursive Fibonacci, fanned out across localities with `par_call`.
    Fib {
        /// Which Fibonacci number to compute.
        n: u32,
    },
    /// Bounces a counter between neighboring localities.
    Pingpong {
        /// Number of round trips before the chain terminates.
        rounds: u64,
    },
    /// Bounces a counter to a uniformly random locality on every hop.
    Countdown {
        /// Number of hops before the chain terminates.
        hops: u64,
    },
    /// Every participant contributes its rank to a shared gather.
    Allgather {
        /// Number of participants to gather from.
        participants: u32,
    },
    /// Broadcasts a no-op action to every locality, joined by an AND-gate.
    Broadcast,
}

fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::from_file(path).wrap_err("failed to read configuration file")?,
        None => Config::single_locality(),
    };
    config.apply_overrides(&cli.overrides).wrap_err("invalid configuration overrides")?;

    let mut builder = gasrt::Builder::new(config);
    gasrt::demos::register_all(&mut builder).wrap_err("failed to register demo actions")?;
    gasrt::init(builder).wrap_err("failed to initialize locality")?;

    let status = match cli.demo {
        Demo::Fib { n } => {
            let status = gasrt::run(fib::ACTION_NAME, &fib::payload(n))?;
            println!("fib({n}): {} parcels fired (low bits of result: {status})", fib::parcel_count());
            status
        }
        Demo::Pingpong { rounds } => {
            let status = gasrt::run(pingpong::ACTION_NAME, &pingpong::payload(rounds))?;
            println!("pingpong: {} hops observed", pingpong::hop_count());
            status
        }
        Demo::Countdown { hops } => {
            let status = gasrt::run(countdown::ACTION_NAME, &countdown::payload(hops))?;
            println!(
                "countdown: {} hops, {} termination(s) observed",
                countdown::hop_count(),
                countdown::termination_count()
            );
            status
        }
        Demo::Allgather { participants } => {
            let status = gasrt::run(allgather::ENTRY_ACTION_NAME, &allgather::payload(participants))?;
            println!("allgather: {} row(s) observed", allgather::observed_rows().len());
            status
        }
        Demo::Broadcast => {
            let status = gasrt::run(broadcast::ENTRY_ACTION_NAME, &[])?;
            println!("broadcast: {} no-op invocation(s) observed", broadcast::noop_count());
            status
        }
    };

    gasrt::finalize()?;
    std::process::exit(status);
}
