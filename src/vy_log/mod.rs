//! The write-ahead log of structural changes: record model, buffered
//! writer, recovery replay, and rotation/GC.

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

/// Record model and MessagePack codec.
pub mod record;
/// Recovery replay and the in-memory index/range/run graph.
pub mod recovery;
/// Log rotation, garbage collection, and backup enumeration.
pub mod rotation;
/// Buffered transactional append.
pub mod writer;

pub use record::{Record, RecordType};
pub use recovery::{Recovery, RecoveryError};
pub use writer::{VyLogError, VyLogWriter};
