// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::{info, warn};
use vydb_core::access::UserCache;
use vydb_core::cfg::{cli::resolve_config_path, config::Config, logger::init_logger};
use vydb_core::handlers::storage::NullStorageEngine;
use vydb_core::handlers::{self};
use vydb_core::iproto::queue::{QueuedRequest, RequestQueue, WorkerPool};
use vydb_core::iproto::session::{ReplyRegistry, SessionRegistry};
use vydb_core::iproto::{Connection, ConnectionError};
use vydb_core::vy_log::VyLogWriter;
use vydb_core::vy_log::recovery::{Recovery, decode_log_bytes};
use vydb_core::vy_log::writer::log_file_name;

const PRODUCT_VERSION: &str = "vydb 0.1.0";

/// Scans `wal_dir` for existing `.xctl` files, replays every record they
/// hold, and derives the state a fresh `VyLogWriter` needs to resume
/// cleanly: the next free log signature plus the next unused run/range
/// ids.
async fn recover_vy_log(wal_dir: &Path) -> Result<(u64, u64, u64)> {
    tokio::fs::create_dir_all(wal_dir).await.context("creating wal_dir")?;

    let mut signatures = Vec::new();
    let mut entries = tokio::fs::read_dir(wal_dir).await.context("reading wal_dir")?;
    while let Some(entry) = entries.next_entry().await.context("reading wal_dir entry")? {
        if let Some(sig) = entry
            .file_name()
            .to_str()
            .and_then(|name| name.strip_suffix(".xctl"))
            .and_then(|stem| stem.parse::<u64>().ok())
        {
            signatures.push(sig);
        }
    }
    signatures.sort_unstable();

    let mut records = Vec::new();
    for signature in &signatures {
        let path = wal_dir.join(log_file_name(*signature));
        let bytes = tokio::fs::read(&path).await.with_context(|| format!("reading {path:?}"))?;
        records.extend(decode_log_bytes(&bytes).with_context(|| format!("decoding {path:?}"))?);
    }

    let recovery = Recovery::replay(&records, u64::MAX).context("replaying vy_log")?;
    let next_run_id = recovery.runs.keys().copied().max().map_or(1, |id| id + 1);
    let next_range_id = recovery.ranges.keys().copied().max().map_or(1, |id| id + 1);
    let current_signature = signatures.last().copied().unwrap_or(1);
    Ok((current_signature, next_run_id, next_range_id))
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let _log_guard = init_logger("config_logger.yaml")?;

    let cfg = resolve_config_path("config.yaml")
        .and_then(Config::load_from_file)
        .context("failed to resolve or load config")?;

    let user_cache = Arc::new(UserCache::new(cfg.access.token_slots));
    info!("access layer initialized with {} token slots", cfg.access.token_slots);

    let (current_signature, next_run_id, next_range_id) = recover_vy_log(&cfg.paths.wal_dir).await?;
    info!(current_signature, next_run_id, next_range_id, "vy_log recovered");

    let vy_log = Arc::new(
        VyLogWriter::open(&cfg.paths.wal_dir, cfg.vy_log.tx_buf_size, current_signature, next_run_id, next_range_id)
            .await
            .context("opening vy_log")?,
    );
    info!(dir = ?vy_log.dir(), "vy_log ready");

    let engine: Arc<dyn vydb_core::handlers::storage::StorageEngine> = Arc::new(NullStorageEngine);

    let (queue, rx) = RequestQueue::new(cfg.iproto.net_msg_max as usize);
    let sessions = Arc::new(SessionRegistry::new());
    let replies = Arc::new(ReplyRegistry::new());

    let processor_cache = user_cache.clone();
    let processor_engine = engine.clone();
    let processor_sessions = sessions.clone();
    let processor_replies = replies.clone();
    let _pool = WorkerPool::spawn(
        cfg.iproto.iproto_threads as usize,
        rx,
        Arc::new(move |item: QueuedRequest| {
            let cache = processor_cache.clone();
            let engine = processor_engine.clone();
            let sessions = processor_sessions.clone();
            let replies = processor_replies.clone();
            Box::pin(async move {
                let Some(session) = sessions.get(item.conn_id) else {
                    return;
                };
                let conn_id = item.conn_id;
                let reply = handlers::process(&cache, &session, engine.as_ref(), &item.request);
                replies.write_reply(conn_id, reply).await;
            })
        }),
    );

    let listener = TcpListener::bind(cfg.iproto.listen)
        .await
        .with_context(|| format!("binding IPROTO listener on {}", cfg.iproto.listen))?;
    info!(addr = %cfg.iproto.listen, "IPROTO listener bound");

    loop {
        let (stream, peer) = listener.accept().await?;
        let (conn_id, session) = sessions.register(0, rand::random::<u64>());
        let queue = queue.clone();
        let sessions = sessions.clone();
        let replies = replies.clone();
        let readahead = cfg.iproto.readahead as usize;

        tokio::spawn(async move {
            let mut conn = Connection::new(conn_id, session, stream, readahead);
            replies.register(conn_id, conn.writer_handle());
            if let Err(e) = conn.handshake(PRODUCT_VERSION, "vydb-server").await {
                warn!(peer = %peer, "handshake failed: {e}");
                sessions.forget(conn_id);
                replies.forget(conn_id);
                return;
            }
            loop {
                match conn.read_and_enqueue(&queue).await {
                    Ok(()) => {}
                    Err(ConnectionError::Eof) => break,
                    Err(e) => {
                        warn!(conn = conn_id, "connection error: {e}");
                        break;
                    }
                }
            }
            conn.shutdown().await;
            sessions.forget(conn_id);
            replies.forget(conn_id);
        });
    }
}
