// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Decoded request object and the per-type required-body-key table. The
//! table is a plain `const` array rather than the macro pile the
//! per-type key masks came from in the original.

use rmpv::Value;

use crate::iproto::wire::{IprotoKey, RequestType};

/// A fully decoded request, ready to be handed to a processor.
#[derive(Debug, Clone)]
pub struct Request {
    pub request_type: RequestType,
    pub sync: u64,
    pub schema_version: Option<u64>,
    pub body: Option<Value>,
    /// Total length, in bytes, of the frame this request was parsed
    /// from — used to advance the connection's parse offset atomically
    /// with enqueue.
    pub frame_len: usize,
}

impl Request {
    pub fn is_dml(&self) -> bool {
        self.request_type.is_dml()
    }

    pub fn is_admin(&self) -> bool {
        self.request_type.is_admin()
    }
}

/// Keys a DML request of a given type must carry in its body, expressed
/// as `IprotoKey` codes. `SELECT`/`DELETE` need a key; `INSERT`/`REPLACE`
/// need a tuple; `UPDATE` needs both a key and ops; `UPSERT` needs a
/// tuple and ops; `NOP` needs none beyond the space id.
pub fn required_body_keys(request_type: RequestType) -> &'static [IprotoKey] {
    use IprotoKey::*;
    use RequestType::*;
    match request_type {
        Select => &[SpaceId, Key],
        Insert => &[SpaceId, Tuple],
        Replace => &[SpaceId, Tuple],
        Update => &[SpaceId, Key, Ops],
        Delete => &[SpaceId, Key],
        Upsert => &[SpaceId, Tuple, Ops],
        Nop => &[SpaceId],
        _ => &[],
    }
}
