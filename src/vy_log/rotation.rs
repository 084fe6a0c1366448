// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Log rotation, garbage collection, and backup enumeration. Rotation
//! takes a recovery snapshot and rewrites every
//! surviving record once into a fresh log file; GC walks a snapshot for
//! deleted-but-not-forgotten runs, unlinks their data files, and journals
//! `forget_run` outside any transaction.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::fs;
use tracing::{info, warn};

use crate::vy_log::record::Record;
use crate::vy_log::recovery::Recovery;
use crate::vy_log::writer::{VyLogWriter, log_file_name};

/// `<path>/<run_id:020d>.{index,run}` — the data files backing one run.
/// `path` defaults to `<vinyl_dir>/<space_id>/<iid>/` when the index's
/// own recorded path is empty.
pub fn run_file_paths(base: &Path, space_id: u64, iid: u64, index_path: &str, run_id: u64) -> (PathBuf, PathBuf) {
    let dir = if index_path.is_empty() {
        base.join(space_id.to_string()).join(iid.to_string())
    } else {
        PathBuf::from(index_path)
    };
    let stem = format!("{run_id:020}");
    (dir.join(format!("{stem}.index")), dir.join(format!("{stem}.run")))
}

/// Rewrites every surviving record of `snapshot` into a new log file
/// named for `target_signature`, then renames it into place atomically.
/// The previous log file is left untouched — it is still needed for
/// backup.
pub async fn rotate(dir: &Path, snapshot: &Recovery, target_signature: u64) -> Result<()> {
    let mut records = Vec::new();
    for index_id in snapshot.indexes.keys().copied().collect::<Vec<_>>() {
        snapshot.recover_index(index_id, true, |r| records.push(r));
    }

    let tmp_path = dir.join(format!("{}.tmp", log_file_name(target_signature)));
    let final_path = dir.join(log_file_name(target_signature));
    write_records(&tmp_path, &records).await.context("writing rotated log")?;
    fs::rename(&tmp_path, &final_path).await.context("renaming rotated log into place")?;
    info!(target_signature, records = records.len(), "rotated vy_log");
    Ok(())
}

async fn write_records(path: &Path, records: &[Record]) -> Result<()> {
    let mut payload = Vec::new();
    for record in records {
        rmpv::encode::write_value(&mut payload, &record.encode_row()).expect("writing to a Vec never fails");
    }
    fs::write(path, payload).await?;
    Ok(())
}

/// Walks `snapshot` for deleted runs, deletes their data files, and
/// journals a `forget_run` for each success via `writer` (outside any
/// transaction, so a crash mid-GC just leaves the record un-forgotten).
/// Then unlinks log files strictly older than `min(signature, prev_checkpoint)`.
pub async fn collect_garbage(
    vinyl_dir: &Path,
    wal_dir: &Path,
    snapshot: &Recovery,
    signature: u64,
    prev_checkpoint: u64,
    writer: &VyLogWriter,
) -> Result<()> {
    for run in snapshot.runs.values().filter(|r| r.is_deleted) {
        let range = snapshot.ranges.values().find(|r| r.runs.contains(&run.id));
        let Some(range) = range else { continue };
        let index = snapshot.indexes.values().find(|i| i.ranges.contains(&range.id));
        let Some(index) = index else { continue };

        let (index_file, run_file) = run_file_paths(vinyl_dir, index.space_id, index.iid, &index.path, run.id);
        match try_unlink_both(&index_file, &run_file).await {
            Ok(()) => {
                writer.write(Record::forget_run(run.id)).await.context("journaling forget_run")?;
                writer.tx_commit().await.context("flushing forget_run")?;
            }
            Err(e) => warn!(run_id = run.id, "failed to unlink run files during GC: {e}"),
        }
    }

    let floor = signature.min(prev_checkpoint);
    let mut entries = fs::read_dir(wal_dir).await.context("listing vy_log directory")?;
    while let Some(entry) = entries.next_entry().await? {
        let Some(name) = entry.file_name().to_str().map(str::to_string) else { continue };
        let Some(sig_str) = name.strip_suffix(".xctl") else { continue };
        let Ok(sig) = sig_str.parse::<u64>() else { continue };
        if sig < floor {
            let _ = fs::remove_file(entry.path()).await;
        }
    }
    Ok(())
}

async fn try_unlink_both(a: &Path, b: &Path) -> Result<()> {
    let _ = fs::remove_file(a).await;
    let _ = fs::remove_file(b).await;
    Ok(())
}

/// Calls `cb` with the previous-checkpoint log file name, then with
/// every data file belonging to a currently-live run.
pub fn backup(vinyl_dir: &Path, prev_checkpoint: u64, snapshot: &Recovery, mut cb: impl FnMut(PathBuf)) {
    cb(PathBuf::from(log_file_name(prev_checkpoint)));
    for index in snapshot.indexes.values() {
        for range_id in &index.ranges {
            let Some(range) = snapshot.ranges.get(range_id) else { continue };
            if range.is_deleted {
                continue;
            }
            for run_id in &range.runs {
                let Some(run) = snapshot.runs.get(run_id) else { continue };
                if run.is_deleted {
                    continue;
                }
                let (index_file, run_file) = run_file_paths(vinyl_dir, index.space_id, index.iid, &index.path, run.id);
                cb(index_file);
                cb(run_file);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vy_log::record::Record;

    #[test]
    fn run_file_paths_default_to_vinyl_layout() {
        let (index_file, run_file) = run_file_paths(Path::new("/vinyl"), 513, 1, "", 200);
        assert_eq!(index_file, PathBuf::from("/vinyl/513/1/00000000000000000200.index"));
        assert_eq!(run_file, PathBuf::from("/vinyl/513/1/00000000000000000200.run"));
    }

    #[test]
    fn backup_skips_deleted_runs() {
        let records = vec![
            Record::create_index(1, 1, 1, String::new()),
            Record::insert_range(1, 10, vec![], vec![]),
            Record::prepare_run(1, 100),
            Record::insert_run(10, 100),
            Record::delete_run(100),
        ];
        let snapshot = Recovery::replay(&records, u64::MAX).expect("replays");
        let mut files = Vec::new();
        backup(Path::new("/vinyl"), 5, &snapshot, |p| files.push(p));
        // Only the previous checkpoint name: the lone run is deleted.
        assert_eq!(files.len(), 1);
    }
}
