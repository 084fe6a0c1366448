// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{fs, net::SocketAddr, path::Path, path::PathBuf};

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};

/// Hard ceiling on the number of dense auth-token slots (`u8` index space).
pub const TOKEN_SLOTS_MAX: usize = 255;
/// Upper bound accepted for `iproto_threads`, mirroring the source's
/// `IPROTO_THREADS_MAX`. This core never spawns OS threads for request
/// handling, but the knob is still validated so configs stay portable.
pub const IPROTO_THREADS_MAX: u16 = 1000;

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct Config {
    /// Storage and log directory layout.
    pub paths: Paths,
    /// IPROTO listener settings.
    pub iproto: IprotoConfig,
    /// vy_log (write-ahead log of structural changes) settings.
    pub vy_log: VyLogConfig,
    /// Access layer settings.
    pub access: AccessConfig,
}

/// Where durable state lives on disk.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct Paths {
    /// Data root: `<vinyl_dir>/<space_id>/<iid>/<run_id>.{run,index}`.
    #[serde(rename = "vinyl_dir")]
    pub vinyl_dir: PathBuf,
    /// vy_log root: `<wal_dir>/<signature>.xctl`.
    #[serde(rename = "wal_dir")]
    pub wal_dir: PathBuf,
}

/// IPROTO front-end settings.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct IprotoConfig {
    /// Address the acceptor binds to.
    pub listen: SocketAddr,
    /// Ring buffer capacity for the request queue
    /// (`IPROTO_REQUEST_QUEUE_SIZE` in the source, default 2048).
    #[serde(default = "default_net_msg_max")]
    pub net_msg_max: u32,
    /// Worker-task cap; the source calls this `iproto_threads` even though
    /// in this single-threaded core it bounds cooperative tasks, not OS
    /// threads.
    #[serde(default = "default_iproto_threads")]
    pub iproto_threads: u16,
    /// Initial per-connection input buffer capacity.
    #[serde(default = "default_readahead")]
    pub readahead: u32,
    /// Scales the worker task free-list relative to `net_msg_max`.
    #[serde(default = "default_fiber_pool_size_factor")]
    pub fiber_pool_size_factor: u32,
}

fn default_net_msg_max() -> u32 {
    2048
}

fn default_iproto_threads() -> u16 {
    1
}

fn default_readahead() -> u32 {
    16 * 1024
}

fn default_fiber_pool_size_factor() -> u32 {
    5
}

/// vy_log writer/recovery settings.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct VyLogConfig {
    /// Capacity of the in-memory transaction record buffer
    /// (`VY_LOG_TX_BUF_SIZE` in the source, default 64).
    #[serde(default = "default_vy_log_tx_buf_size")]
    pub tx_buf_size: usize,
}

fn default_vy_log_tx_buf_size() -> usize {
    64
}

/// Access-layer settings.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct AccessConfig {
    /// Capacity of the dense auth-token array (`BOX_USER_MAX` in the
    /// source, default 32, hard-capped at `TOKEN_SLOTS_MAX`).
    #[serde(default = "default_token_slots")]
    pub token_slots: usize,
}

fn default_token_slots() -> usize {
    32
}

impl Config {
    /// Loads the configuration from YAML, validates it, and returns the
    /// ready-to-use value.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let s = fs::read_to_string(path)?;
        let cfg: Config =
            serde_yaml::from_str(&s).context("failed to parse config YAML")?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Validates invariants that the YAML parser itself cannot express.
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.access.token_slots >= 2,
            "access.token_slots must be >= 2 (guest + admin)"
        );
        ensure!(
            self.access.token_slots <= TOKEN_SLOTS_MAX,
            "access.token_slots must be <= {TOKEN_SLOTS_MAX}"
        );
        ensure!(
            self.iproto.net_msg_max > 0,
            "iproto.net_msg_max must be > 0"
        );
        ensure!(
            self.iproto.iproto_threads >= 1
                && self.iproto.iproto_threads <= IPROTO_THREADS_MAX,
            "iproto.iproto_threads must be in [1, {IPROTO_THREADS_MAX}]"
        );
        ensure!(
            self.vy_log.tx_buf_size > 0,
            "vy_log.tx_buf_size must be > 0"
        );
        Ok(())
    }
}
