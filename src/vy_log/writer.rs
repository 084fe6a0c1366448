// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Buffered transactional writer. A single latch
//! serializes every writer and the rotator; records accumulate in a
//! fixed-capacity buffer and `tx_commit` flushes the whole buffer as one
//! journal append. `next_run_id`/`next_range_id` are private counters
//! seeded from recovery.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rmpv::encode::write_value;
use thiserror::Error;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::vy_log::record::Record;

#[derive(Debug, Error)]
pub enum VyLogError {
    #[error("vy_log buffer is full ({0} records, flush before starting a new transaction)")]
    BufferFull(usize),
    #[error("I/O error writing vy_log: {0}")]
    Io(#[from] std::io::Error),
}

/// `<signature:020d>.xctl` — the on-disk name of a log file for `signature`.
pub fn log_file_name(signature: u64) -> String {
    format!("{signature:020}.xctl")
}

struct WriterState {
    /// Buffered records not yet flushed to disk.
    buffer: Vec<Record>,
    /// Index captured by the most recent `tx_begin`.
    tx_start: usize,
    next_run_id: u64,
    next_range_id: u64,
    current_signature: u64,
}

/// Latch-guarded append-only writer for one log file.
pub struct VyLogWriter {
    dir: PathBuf,
    capacity: usize,
    state: Mutex<WriterState>,
}

impl VyLogWriter {
    /// Opens (creating if absent) the log directory. The active log file
    /// is named after `current_signature`; recovery is responsible for
    /// seeding `next_run_id`/`next_range_id` before any write happens.
    pub async fn open(dir: impl AsRef<Path>, capacity: usize, current_signature: u64, next_run_id: u64, next_range_id: u64) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).await.context("creating vy_log directory")?;
        Ok(Self {
            dir,
            capacity,
            state: Mutex::new(WriterState {
                buffer: Vec::with_capacity(capacity),
                tx_start: 0,
                next_run_id,
                next_range_id,
                current_signature,
            }),
        })
    }

    pub async fn next_run_id(&self) -> u64 {
        let mut state = self.state.lock().await;
        let id = state.next_run_id;
        state.next_run_id += 1;
        id
    }

    pub async fn next_range_id(&self) -> u64 {
        let mut state = self.state.lock().await;
        let id = state.next_range_id;
        state.next_range_id += 1;
        id
    }

    /// Marks the start of a transaction: records appended after this call
    /// are rolled back together on `tx_commit` failure.
    pub async fn tx_begin(&self) {
        let mut state = self.state.lock().await;
        state.tx_start = state.buffer.len();
    }

    /// Appends one record to the in-flight transaction's buffer slice.
    pub async fn write(&self, mut record: Record) -> Result<(), VyLogError> {
        let mut state = self.state.lock().await;
        if state.buffer.len() >= self.capacity {
            return Err(VyLogError::BufferFull(self.capacity));
        }
        if record.signature == 0 {
            record.signature = state.current_signature;
        }
        state.buffer.push(record);
        Ok(())
    }

    /// Flushes every buffered record as one journal append. On failure
    /// the buffer is discarded back to the last `tx_begin` mark.
    pub async fn tx_commit(&self) -> Result<(), VyLogError> {
        let mut state = self.state.lock().await;
        let path = self.dir.join(log_file_name(state.current_signature));
        let result = flush_records(&path, &state.buffer[state.tx_start..]).await;
        match result {
            Ok(()) => {
                state.buffer.truncate(state.tx_start);
                Ok(())
            }
            Err(e) => {
                state.buffer.truncate(state.tx_start);
                Err(VyLogError::Io(std::io::Error::other(e)))
            }
        }
    }

    /// Like `tx_commit` but retains the buffered records for a later
    /// retry instead of discarding them on failure.
    pub async fn tx_try_commit(&self) -> Result<(), VyLogError> {
        let mut state = self.state.lock().await;
        let path = self.dir.join(log_file_name(state.current_signature));
        let result = flush_records(&path, &state.buffer[state.tx_start..]).await;
        if result.is_ok() {
            state.buffer.truncate(state.tx_start);
        }
        result.map_err(|e| VyLogError::Io(std::io::Error::other(e)))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

async fn flush_records(path: &Path, records: &[Record]) -> Result<()> {
    if records.is_empty() {
        return Ok(());
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path).await?;
    let mut payload = Vec::new();
    for record in records {
        write_value(&mut payload, &record.encode_row()).expect("writing to a Vec never fails");
    }
    file.write_all(&payload).await?;
    file.flush().await?;
    Ok(())
}
