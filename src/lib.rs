// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Transactional request core for an in-memory database server:
//! configuration/logging, the access/user-cache layer, the IPROTO
//! front-end, the vy_log write-ahead log of structural changes, and the
//! per-opcode request handlers tying them together.

/// Configuration, CLI parsing, and logging.
pub mod cfg;
/// Token allocator, user cache, and privilege model.
pub mod access;
/// IPROTO wire protocol: codec, connection state machine, request queue.
pub mod iproto;
/// Write-ahead log of structural changes: records, writer, recovery, rotation.
pub mod vy_log;
/// Per-opcode request processors and the storage-engine seam.
pub mod handlers;
