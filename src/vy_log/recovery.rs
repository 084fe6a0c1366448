// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Replays vy_log records into an in-memory index/range/run graph. The
//! source links these nodes with intrusive doubly-linked lists and
//! back-pointers; here they are flat `HashMap<id, Node>` tables plus
//! id-lists for children, so iteration is always driven by the owning
//! map and no raw back-pointer can dangle.

use std::collections::HashMap;

use rmpv::Value;
use rmpv::decode::read_value;
use thiserror::Error;

use crate::vy_log::record::{Record, RecordCodecError, RecordType};

#[derive(Debug, Error)]
pub enum RecoveryError {
    #[error("malformed record: {0}")]
    Malformed(#[from] RecordCodecError),
    #[error("duplicate index id {0}")]
    DuplicateIndex(u64),
    #[error("duplicate range id {0}")]
    DuplicateRange(u64),
    #[error("insert_range references unknown index {0}")]
    UnknownIndex(u64),
    #[error("insert_run/delete_run references unknown run {0}")]
    UnknownRun(u64),
    #[error("insert_run references unknown range {0}")]
    UnknownRange(u64),
    #[error("I/O error reading log: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct IndexNode {
    pub id: u64,
    pub iid: u64,
    pub space_id: u64,
    pub path: String,
    pub is_dropped: bool,
    pub ranges: Vec<u64>,
    pub incomplete_runs: Vec<u64>,
}

#[derive(Debug, Clone)]
pub struct RangeNode {
    pub id: u64,
    pub index_id: u64,
    pub begin: Vec<u8>,
    pub end: Vec<u8>,
    pub is_deleted: bool,
    /// Newest-first, matching the source's run list ordering.
    pub runs: Vec<u64>,
}

#[derive(Debug, Clone)]
pub struct RunNode {
    pub id: u64,
    pub is_deleted: bool,
    pub signature: u64,
}

/// The replayed graph at some signature cutoff.
#[derive(Debug, Default)]
pub struct Recovery {
    pub indexes: HashMap<u64, IndexNode>,
    pub ranges: HashMap<u64, RangeNode>,
    pub runs: HashMap<u64, RunNode>,
}

impl Recovery {
    /// Replays every record with `signature < cap` from `records` in
    /// order. Processing a record either fully succeeds or leaves the
    /// graph unmutated — allocation failures are checked before any
    /// table is touched.
    pub fn replay<'a>(records: impl IntoIterator<Item = &'a Record>, cap: u64) -> Result<Self, RecoveryError> {
        let mut recovery = Self::default();
        for record in records {
            if record.signature >= cap {
                continue;
            }
            recovery.apply(record)?;
        }
        Ok(recovery)
    }

    fn apply(&mut self, record: &Record) -> Result<(), RecoveryError> {
        match record.record_type {
            RecordType::CreateIndex => {
                let id = record.index_id.expect("validated by codec");
                if self.indexes.contains_key(&id) {
                    return Err(RecoveryError::DuplicateIndex(id));
                }
                self.indexes.insert(
                    id,
                    IndexNode {
                        id,
                        iid: record.iid.expect("validated by codec"),
                        space_id: record.space_id.expect("validated by codec"),
                        path: record.path.clone().expect("validated by codec"),
                        is_dropped: false,
                        ranges: Vec::new(),
                        incomplete_runs: Vec::new(),
                    },
                );
            }
            RecordType::DropIndex => {
                let id = record.index_id.expect("validated by codec");
                let range_ids = self.indexes.get(&id).map(|i| i.ranges.clone()).unwrap_or_default();
                for range_id in &range_ids {
                    if let Some(range) = self.ranges.get_mut(range_id) {
                        range.is_deleted = true;
                        for run_id in range.runs.clone() {
                            if let Some(run) = self.runs.get_mut(&run_id) {
                                run.is_deleted = true;
                            }
                        }
                    }
                }
                let incomplete = self.indexes.get(&id).map(|i| i.incomplete_runs.clone()).unwrap_or_default();
                for run_id in &incomplete {
                    if let Some(run) = self.runs.get_mut(run_id) {
                        run.is_deleted = true;
                    }
                }
                if let Some(index) = self.indexes.get_mut(&id) {
                    index.is_dropped = true;
                    if index.ranges.is_empty() && index.incomplete_runs.is_empty() {
                        self.indexes.remove(&id);
                    }
                }
            }
            RecordType::InsertRange => {
                let index_id = record.index_id.expect("validated by codec");
                let range_id = record.range_id.expect("validated by codec");
                if !self.indexes.contains_key(&index_id) {
                    return Err(RecoveryError::UnknownIndex(index_id));
                }
                if self.ranges.contains_key(&range_id) {
                    return Err(RecoveryError::DuplicateRange(range_id));
                }
                self.ranges.insert(
                    range_id,
                    RangeNode {
                        id: range_id,
                        index_id,
                        begin: record.range_begin.clone().expect("validated by codec"),
                        end: record.range_end.clone().expect("validated by codec"),
                        is_deleted: false,
                        runs: Vec::new(),
                    },
                );
                self.indexes.get_mut(&index_id).expect("checked above").ranges.push(range_id);
            }
            RecordType::DeleteRange => {
                let range_id = record.range_id.expect("validated by codec");
                if let Some(range) = self.ranges.get_mut(&range_id) {
                    range.is_deleted = true;
                    for run_id in range.runs.clone() {
                        if let Some(run) = self.runs.get_mut(&run_id) {
                            run.is_deleted = true;
                        }
                    }
                    if range.runs.is_empty() {
                        self.ranges.remove(&range_id);
                        if let Some(index) = self.indexes.values_mut().find(|i| i.ranges.contains(&range_id)) {
                            index.ranges.retain(|r| *r != range_id);
                        }
                    }
                }
            }
            RecordType::PrepareRun => {
                let index_id = record.index_id.expect("validated by codec");
                let run_id = record.run_id.expect("validated by codec");
                if !self.indexes.contains_key(&index_id) {
                    return Err(RecoveryError::UnknownIndex(index_id));
                }
                self.runs.insert(
                    run_id,
                    RunNode {
                        id: run_id,
                        is_deleted: false,
                        signature: record.signature,
                    },
                );
                self.indexes.get_mut(&index_id).expect("checked above").incomplete_runs.push(run_id);
            }
            RecordType::InsertRun => {
                let range_id = record.range_id.expect("validated by codec");
                let run_id = record.run_id.expect("validated by codec");
                if !self.ranges.contains_key(&range_id) {
                    return Err(RecoveryError::UnknownRange(range_id));
                }
                self.runs.entry(run_id).or_insert(RunNode {
                    id: run_id,
                    is_deleted: false,
                    signature: record.signature,
                });
                for index in self.indexes.values_mut() {
                    index.incomplete_runs.retain(|r| *r != run_id);
                }
                let range = self.ranges.get_mut(&range_id).expect("checked above");
                range.runs.insert(0, run_id);
            }
            RecordType::DeleteRun => {
                let run_id = record.run_id.expect("validated by codec");
                if let Some(run) = self.runs.get_mut(&run_id) {
                    run.is_deleted = true;
                } else {
                    return Err(RecoveryError::UnknownRun(run_id));
                }
            }
            RecordType::ForgetRun => {
                let run_id = record.run_id.expect("validated by codec");
                self.runs.remove(&run_id);
                for range in self.ranges.values_mut() {
                    range.runs.retain(|r| *r != run_id);
                }
                for index in self.indexes.values_mut() {
                    index.incomplete_runs.retain(|r| *r != run_id);
                }
            }
        }
        Ok(())
    }

    /// Re-emits the surviving state of `index_id` as a record stream,
    /// via `emit`, so a consumer can rebuild its own structures exactly
    /// as they existed at the last consistent point (mirrors
    /// `recover_index` in the original `vy_log.c`).
    ///
    /// When `include_deleted` is false and the index was dropped, a
    /// synthetic empty range is emitted so the consumer still observes
    /// one range before the (implicit, caller-supplied) drop.
    pub fn recover_index(&self, index_id: u64, include_deleted: bool, mut emit: impl FnMut(Record)) {
        let Some(index) = self.indexes.get(&index_id) else {
            return;
        };

        emit(Record::create_index(index.id, index.iid, index.space_id, index.path.clone()));

        let mut emitted_any_range = false;
        for range_id in &index.ranges {
            let Some(range) = self.ranges.get(range_id) else { continue };
            if range.is_deleted && !include_deleted {
                continue;
            }
            emitted_any_range = true;
            emit(Record::insert_range(index_id, range.id, range.begin.clone(), range.end.clone()));
            for run_id in range.runs.iter().rev() {
                let Some(run) = self.runs.get(run_id) else { continue };
                if run.is_deleted && !include_deleted {
                    continue;
                }
                emit(Record::insert_run(range.id, run.id).with_signature(run.signature));
                if include_deleted && run.is_deleted {
                    emit(Record::delete_run(run.id).with_signature(run.signature));
                }
            }
            if range.is_deleted && include_deleted {
                emit(Record::delete_range(range.id));
            }
        }

        if include_deleted {
            for run_id in &index.incomplete_runs {
                if let Some(run) = self.runs.get(run_id) {
                    emit(Record::prepare_run(index_id, *run_id).with_signature(run.signature));
                    if run.is_deleted {
                        emit(Record::delete_run(run.id).with_signature(run.signature));
                    }
                } else {
                    emit(Record::prepare_run(index_id, *run_id));
                }
            }
        }

        if !include_deleted && !emitted_any_range && index.is_dropped {
            emit(Record::insert_range(index_id, 0, Vec::new(), Vec::new()));
        }

        if index.is_dropped {
            emit(Record::drop_index(index_id));
        }
    }
}

/// Decodes every record stored in a single `.xctl` log file.
pub fn decode_log_bytes(bytes: &[u8]) -> Result<Vec<Record>, RecoveryError> {
    let mut cursor = std::io::Cursor::new(bytes);
    let mut records = Vec::new();
    while (cursor.position() as usize) < bytes.len() {
        let value: Value = read_value(&mut cursor).map_err(|e| RecoveryError::Io(std::io::Error::other(e)))?;
        records.push(Record::decode_row(&value)?);
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn e4_vy_log_round_trip_scenario() {
        let records = vec![
            Record::create_index(42, 1, 513, String::new()),
            Record::insert_range(42, 100, vec![], vec![]),
            Record::prepare_run(42, 200),
            Record::insert_run(100, 200),
            Record::delete_run(200),
        ];
        let recovery = Recovery::replay(&records, u64::MAX).expect("replays cleanly");

        let mut emitted = Vec::new();
        recovery.recover_index(42, false, |r| emitted.push(r.record_type));

        assert_eq!(
            emitted,
            vec![RecordType::CreateIndex, RecordType::InsertRange, RecordType::InsertRun]
        );
    }

    #[test]
    fn e6_drop_with_live_run_included_deleted() {
        let records = vec![
            Record::create_index(42, 1, 1, String::new()),
            Record::prepare_run(42, 1),
            Record::drop_index(42),
        ];
        let recovery = Recovery::replay(&records, u64::MAX).expect("replays cleanly");

        let mut emitted = Vec::new();
        recovery.recover_index(42, true, |r| emitted.push(r.record_type));
        assert_eq!(
            emitted,
            vec![
                RecordType::CreateIndex,
                RecordType::PrepareRun,
                RecordType::DeleteRun,
                RecordType::DropIndex,
            ]
        );
    }

    #[test]
    fn duplicate_index_id_is_rejected() {
        let records = vec![
            Record::create_index(1, 1, 1, String::new()),
            Record::create_index(1, 2, 2, String::new()),
        ];
        let err = Recovery::replay(&records, u64::MAX).expect_err("duplicate id");
        assert!(matches!(err, RecoveryError::DuplicateIndex(1)));
    }

    #[test]
    fn recovery_idempotence_property() {
        let records = vec![
            Record::create_index(1, 1, 1, String::new()),
            Record::insert_range(1, 10, vec![], vec![]),
        ];
        let first = Recovery::replay(&records, u64::MAX).expect("first replay");
        let second = Recovery::replay(&records, u64::MAX).expect("second replay");
        assert_eq!(first.indexes.len(), second.indexes.len());
        assert_eq!(first.ranges.len(), second.ranges.len());
    }
}
