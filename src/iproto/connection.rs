// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Per-connection state machine, input buffer, and output flush path.
//! States: `Handshaking -> Reading <-> Writing -> Closing -> Idle`. Reads
//! stop growing the input buffer while a reply is still draining to the
//! socket, bounding per-connection memory to roughly the readahead size
//! plus one frame in flight on the write side.

use std::sync::Arc;

use anyhow::{Context, Result};
use bytes::{Buf, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::access::user_cache::Session;
use crate::iproto::codec::{encode_error_reply, try_decode_frame};
use crate::iproto::error::ProtocolError;
use crate::iproto::queue::{QueuedRequest, RequestQueue};
use crate::iproto::session::ConnId;
use crate::iproto::wire::build_greeting;

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("peer closed the connection")]
    Eof,
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Handshaking,
    Reading,
    Writing,
    Closing,
    Idle,
}

/// The connection's read-side buffer. `parse_offset` marks how much of
/// `data` has already been handed out as complete frames but not yet
/// dropped — kept separate from `data.advance()` bookkeeping so a parse
/// failure never silently discards bytes.
struct IoBuf {
    data: BytesMut,
}

impl IoBuf {
    fn with_capacity(cap: usize) -> Self {
        Self {
            data: BytesMut::with_capacity(cap),
        }
    }

    fn is_idle(&self) -> bool {
        self.data.is_empty()
    }
}

/// The write half plus its output slot, guarded together so a worker
/// task replying out of band and the connection's own `write_error` path
/// see the same drained-or-not state. A reply is appended to `output`
/// and flushed in the same call with one `write_all`, mirroring
/// `iproto_flush`'s single writev of the accumulated output buffer.
pub struct ConnWriter {
    half: OwnedWriteHalf,
    output: IoBuf,
}

impl ConnWriter {
    fn new(half: OwnedWriteHalf, capacity: usize) -> Self {
        Self {
            half,
            output: IoBuf::with_capacity(capacity),
        }
    }

    pub(crate) fn is_idle(&self) -> bool {
        self.output.is_idle()
    }

    pub(crate) async fn flush(&mut self, frame: &[u8]) -> Result<(), std::io::Error> {
        self.output.data.extend_from_slice(frame);
        let result = self.half.write_all(&self.output.data).await;
        self.output.data.clear();
        result
    }
}

/// A single accepted IPROTO connection.
pub struct Connection {
    pub id: ConnId,
    pub session: Arc<Session>,
    reader: OwnedReadHalf,
    writer: Arc<Mutex<ConnWriter>>,
    input: IoBuf,
    state: ConnState,
    readahead: usize,
}

impl Connection {
    pub fn new(id: ConnId, session: Arc<Session>, stream: TcpStream, readahead: usize) -> Self {
        let (reader, writer) = stream.into_split();
        Self {
            id,
            session,
            reader,
            writer: Arc::new(Mutex::new(ConnWriter::new(writer, readahead))),
            input: IoBuf::with_capacity(readahead),
            state: ConnState::Handshaking,
            readahead,
        }
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    /// Sends the fixed greeting. On success the connection moves to
    /// `Reading`; the caller is expected to have already created the
    /// session as guest.
    pub async fn handshake(&mut self, product_version: &str, process_title: &str) -> Result<()> {
        let (greeting, _salt) = build_greeting(product_version, process_title);
        let mut w = self.writer.lock().await;
        w.flush(&greeting).await.context("writing greeting")?;
        drop(w);
        self.state = ConnState::Reading;
        Ok(())
    }

    /// Reads one chunk from the socket, enqueues every complete frame it
    /// yields, and returns. The caller loops this until `state()` leaves
    /// `Reading`.
    ///
    /// Back-pressure: if the input buffer has grown to the readahead
    /// limit and a reply is still draining to the socket (the output
    /// side not idle, including a flush currently in flight), reading
    /// stops for this iteration rather than growing unboundedly.
    pub async fn read_and_enqueue(&mut self, queue: &RequestQueue) -> Result<(), ConnectionError> {
        let output_busy = match self.writer.try_lock() {
            Ok(w) => !w.is_idle(),
            Err(_) => true,
        };
        if output_busy && self.input.data.len() >= self.readahead {
            return Ok(());
        }

        let mut chunk = vec![0u8; self.readahead];
        let n = self.reader.read(&mut chunk).await?;
        if n == 0 {
            self.state = ConnState::Closing;
            return Err(ConnectionError::Eof);
        }
        self.input.data.extend_from_slice(&chunk[..n]);

        loop {
            let buf = &self.input.data;
            match try_decode_frame(buf) {
                Ok(Some(decoded)) => {
                    let consumed = decoded.consumed;
                    let request = decoded.request;
                    self.input.data.advance(consumed);
                    if queue
                        .push(QueuedRequest { conn_id: self.id, request })
                        .await
                        .is_err()
                    {
                        self.state = ConnState::Closing;
                        return Err(ConnectionError::Eof);
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(conn = self.id, "protocol error: {e}");
                    return Err(ConnectionError::Protocol(e));
                }
            }
        }

        Ok(())
    }

    /// Writes one already-encoded reply frame through the output slot.
    /// Replies are always appended and flushed in order, so they are
    /// never interleaved mid-byte on the wire.
    pub async fn write_reply(&self, frame: Vec<u8>) -> Result<(), std::io::Error> {
        let mut w = self.writer.lock().await;
        w.flush(&frame).await
    }

    /// A clone of the guarded writer, so a worker task processing a
    /// request popped off the shared queue can reply without holding a
    /// `&Connection` across the yield points the request processor may
    /// take. Replies sent this way still flow through the same output
    /// slot `read_and_enqueue` inspects for back-pressure.
    pub fn writer_handle(&self) -> Arc<Mutex<ConnWriter>> {
        self.writer.clone()
    }

    /// Convenience used by the worker dispatcher when a processor fails
    /// with a protocol- or access-level error: writes an error reply and
    /// keeps the connection open.
    pub async fn write_error(&self, sync: u64, iproto_type: u32, message: &str) -> Result<(), std::io::Error> {
        self.write_reply(encode_error_reply(sync, iproto_type, message)).await
    }

    /// True iff the input buffer and output slot are both empty — the
    /// precondition for freeing the connection.
    pub async fn is_idle(&mut self) -> bool {
        self.input.is_idle() && self.writer.lock().await.is_idle()
    }

    pub async fn shutdown(&mut self) {
        self.state = ConnState::Closing;
        let mut w = self.writer.lock().await;
        let _ = w.half.shutdown().await;
        self.state = ConnState::Idle;
        debug!(conn = self.id, "connection shut down");
    }
}
