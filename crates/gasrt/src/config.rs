// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The locality's configuration surface (spec §6's configuration table),
//! built the way `build/xtask/src/config.rs` builds its `Config`: a
//! `RawConfig` deserialized from TOML with defaulted fields, then combined
//! with `clap` CLI overrides into the `Config` the rest of the crate reads.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;

fn default_workers() -> usize {
    std::thread::available_parallelism().map_or(4, std::num::NonZeroUsize::get)
}
fn default_stack_bytes() -> usize {
    256 * 1024
}
fn default_heapsize() -> usize {
    64 * 1024 * 1024
}
fn default_eager_limit() -> usize {
    4096
}
fn default_backoff_max() -> u8 {
    8
}
fn default_ranks() -> u32 {
    1
}
fn default_my_rank() -> u32 {
    0
}

/// `gas-model` recognized values. Spec §6 names all three; only `smp`'s flat
/// single-heap-per-locality model is implemented by `rt-gas` (`pgas`/`agas`
/// describe partitioned/adaptive placement policies this workspace does not
/// add — application placement hints, not core GAS mechanics).
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum GasModel {
    #[default]
    Smp,
    Pgas,
    Agas,
}

/// `boot` recognized values (spec §6). Bootstrap/rank discovery is an
/// external collaborator per spec §1; `Smp` means "rank and peers are
/// already known, supplied directly in this configuration" rather than
/// discovered. `Mpirun`/`Pmi` name mechanisms this workspace does not
/// implement and are rejected at [`Config::validate`].
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Boot {
    #[default]
    Smp,
    Mpirun,
    Pmi,
}

/// `transport` recognized values (spec §6). Only `Smp` is backed by a
/// concrete [`rt_net::Transport`]: an in-process fabric when `ranks == 1`,
/// or loopback TCP (`rt_net::TcpTransport`) connecting the `peers` list
/// otherwise. `Mpi`/`Portals`/`Photon` name external transports this
/// workspace does not implement.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Transport {
    #[default]
    Smp,
    Mpi,
    Portals,
    Photon,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields, default)]
struct RawConfig {
    #[serde(default = "default_workers")]
    workers: usize,
    cores: Vec<usize>,
    #[serde(default = "default_stack_bytes")]
    stack_bytes: usize,
    gas_model: GasModel,
    boot: Boot,
    transport: Transport,
    #[serde(default = "default_heapsize")]
    heapsize: usize,
    send_limit: Option<usize>,
    recv_limit: Option<usize>,
    #[serde(default = "default_eager_limit")]
    eager_limit: usize,
    parcel_buffer_size: Option<usize>,
    log_level: Option<String>,
    log_at: Vec<u32>,
    wait_at: Vec<u32>,
    #[serde(default = "default_backoff_max")]
    backoff_max: u8,
    #[serde(default = "default_my_rank")]
    my_rank: u32,
    #[serde(default = "default_ranks")]
    ranks: u32,
    peers: Vec<String>,
}

impl Default for RawConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            cores: Vec::new(),
            stack_bytes: default_stack_bytes(),
            gas_model: GasModel::default(),
            boot: Boot::default(),
            transport: Transport::default(),
            heapsize: default_heapsize(),
            send_limit: None,
            recv_limit: None,
            eager_limit: default_eager_limit(),
            parcel_buffer_size: None,
            log_level: None,
            log_at: Vec::new(),
            wait_at: Vec::new(),
            backoff_max: default_backoff_max(),
            my_rank: default_my_rank(),
            ranks: default_ranks(),
            peers: Vec::new(),
        }
    }
}

/// The subset of [`Config`] the CLI is allowed to override, parsed by
/// `clap` in `main.rs` and threaded through [`Config::apply_overrides`].
#[derive(Clone, Debug, Default, clap::Args)]
pub struct Overrides {
    /// Overrides `workers` from the configuration file.
    #[clap(long, global = true)]
    pub workers: Option<usize>,
    /// Overrides `my-rank`.
    #[clap(long, global = true)]
    pub my_rank: Option<u32>,
    /// Overrides `ranks`.
    #[clap(long, global = true)]
    pub ranks: Option<u32>,
    /// Overrides `eager-limit`.
    #[clap(long, global = true)]
    pub eager_limit: Option<usize>,
    /// Appends to (and, if non-empty, replaces) the configured `peers` list;
    /// repeat for each rank, in rank order.
    #[clap(long = "peer", global = true)]
    pub peers: Vec<String>,
}

/// The locality's resolved configuration: spec §6's configuration table,
/// with CLI overrides already folded in and `peers` parsed to real socket
/// addresses.
#[derive(Clone, Debug)]
pub struct Config {
    pub workers: usize,
    pub cores: Vec<usize>,
    pub stack_bytes: usize,
    pub gas_model: GasModel,
    pub boot: Boot,
    pub transport: Transport,
    pub heapsize: usize,
    pub send_limit: Option<usize>,
    pub recv_limit: Option<usize>,
    pub eager_limit: usize,
    pub parcel_buffer_size: Option<usize>,
    pub log_level: Option<String>,
    pub log_at: Vec<u32>,
    pub wait_at: Vec<u32>,
    pub backoff_max: u8,
    pub my_rank: u32,
    pub ranks: u32,
    pub peers: Vec<SocketAddr>,
}

impl Config {
    /// The fully-defaulted configuration of a single-locality run: no
    /// config file, no CLI overrides, one rank.
    #[must_use]
    pub fn single_locality() -> Self {
        RawConfig::default().resolve().expect("default configuration is always valid")
    }

    /// # Errors
    ///
    /// Returns [`Error::Config`] if `path` cannot be read or does not parse
    /// as this schema, or [`Error::InvalidConfig`]/[`Error::PeerListMismatch`]
    /// if the parsed values are inconsistent.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| Error::Config(e.to_string()))?;
        let raw: RawConfig = toml::from_str(&text).map_err(|e| Error::Config(e.to_string()))?;
        raw.resolve()
    }

    /// Applies the CLI's `--workers`/`--my-rank`/`--ranks`/`--peer` overrides
    /// (each `None`/empty leaves the file or default value in place).
    pub fn apply_overrides(&mut self, overrides: &Overrides) -> Result<()> {
        if let Some(workers) = overrides.workers {
            self.workers = workers;
        }
        if let Some(my_rank) = overrides.my_rank {
            self.my_rank = my_rank;
        }
        if let Some(ranks) = overrides.ranks {
            self.ranks = ranks;
        }
        if !overrides.peers.is_empty() {
            self.peers = overrides
                .peers
                .iter()
                .map(|s| s.parse().map_err(|_| Error::InvalidConfig(format!("bad peer address {s:?}"))))
                .collect::<Result<Vec<_>>>()?;
        }
        if let Some(eager_limit) = overrides.eager_limit {
            self.eager_limit = eager_limit;
        }
        self.validate()
    }

    fn validate(&self) -> Result<()> {
        if !matches!(self.boot, Boot::Smp) {
            return Err(Error::BootUnavailable(self.boot));
        }
        if !matches!(self.transport, Transport::Smp) {
            return Err(Error::TransportUnavailable(self.transport));
        }
        if self.workers == 0 {
            return Err(Error::InvalidConfig("workers must be at least 1".into()));
        }
        if self.my_rank >= self.ranks {
            return Err(Error::InvalidConfig("my-rank must be less than ranks".into()));
        }
        if self.ranks > 1 && self.peers.len() != self.ranks as usize {
            return Err(Error::PeerListMismatch);
        }
        Ok(())
    }
}

impl RawConfig {
    fn resolve(self) -> Result<Config> {
        let peers = self
            .peers
            .iter()
            .map(|s| s.parse().map_err(|_| Error::InvalidConfig(format!("bad peer address {s:?}"))))
            .collect::<Result<Vec<_>>>()?;
        let config = Config {
            workers: self.workers,
            cores: self.cores,
            stack_bytes: self.stack_bytes,
            gas_model: self.gas_model,
            boot: self.boot,
            transport: self.transport,
            heapsize: self.heapsize,
            send_limit: self.send_limit,
            recv_limit: self.recv_limit,
            eager_limit: self.eager_limit,
            parcel_buffer_size: self.parcel_buffer_size,
            log_level: self.log_level,
            log_at: self.log_at,
            wait_at: self.wait_at,
            backoff_max: self.backoff_max,
            my_rank: self.my_rank,
            ranks: self.ranks,
            peers,
        };
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_locality_default_is_valid() {
        let cfg = Config::single_locality();
        assert_eq!(cfg.ranks, 1);
        assert_eq!(cfg.my_rank, 0);
        assert!(cfg.workers > 0);
    }

    #[test]
    fn parses_kebab_case_toml() {
        let raw: RawConfig = toml::from_str(
            r#"
            workers = 4
            eager-limit = 2048
            ranks = 2
            my-rank = 0
            peers = ["127.0.0.1:9000", "127.0.0.1:9001"]
            "#,
        )
        .unwrap();
        let cfg = raw.resolve().unwrap();
        assert_eq!(cfg.workers, 4);
        assert_eq!(cfg.eager_limit, 2048);
        assert_eq!(cfg.peers.len(), 2);
    }

    #[test]
    fn mismatched_peer_count_is_rejected() {
        let raw = RawConfig {
            ranks: 2,
            peers: vec!["127.0.0.1:9000".into()],
            ..RawConfig::default()
        };
        assert!(matches!(raw.resolve(), Err(Error::PeerListMismatch)));
    }

    #[test]
    fn non_smp_transport_is_rejected() {
        let raw = RawConfig {
            transport: Transport::Mpi,
            ..RawConfig::default()
        };
        assert!(matches!(raw.resolve(), Err(Error::TransportUnavailable(_))));
    }
}
