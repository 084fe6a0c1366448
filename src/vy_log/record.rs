// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! vy_log record model and `[type, {key: value, ...}]` MessagePack codec.
//! Key numbering and the per-type required-key masks are taken verbatim
//! from the original `vy_log.c`'s `vy_log_key`/`vy_log_key_mask` tables;
//! the Rust shape is a tagged sum with per-variant constructors instead
//! of the `FIELDS_n` macro pile. On-disk rows wrap the record with its
//! commit signature (`encode_row`/`decode_row`), mirroring how the
//! original stamps `record->signature` onto the carrying xrow's `lsn`
//! field rather than into the record body itself.

use rmpv::Value;
use thiserror::Error;

/// Integer key of a field inside the record's MessagePack map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordKey {
    IndexId = 0,
    RangeId = 1,
    RunId = 2,
    RangeBegin = 3,
    RangeEnd = 4,
    Iid = 5,
    SpaceId = 6,
    Path = 7,
}

impl RecordKey {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::IndexId => "index_id",
            Self::RangeId => "range_id",
            Self::RunId => "run_id",
            Self::RangeBegin => "range_begin",
            Self::RangeEnd => "range_end",
            Self::Iid => "iid",
            Self::SpaceId => "space_id",
            Self::Path => "path",
        }
    }
}

/// The eight structural-change record types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordType {
    CreateIndex = 0,
    DropIndex = 1,
    InsertRange = 2,
    DeleteRange = 3,
    PrepareRun = 4,
    InsertRun = 5,
    DeleteRun = 6,
    ForgetRun = 7,
}

impl RecordType {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::CreateIndex => "create_index",
            Self::DropIndex => "drop_index",
            Self::InsertRange => "insert_range",
            Self::DeleteRange => "delete_range",
            Self::PrepareRun => "prepare_run",
            Self::InsertRun => "insert_run",
            Self::DeleteRun => "delete_run",
            Self::ForgetRun => "forget_run",
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0 => Self::CreateIndex,
            1 => Self::DropIndex,
            2 => Self::InsertRange,
            3 => Self::DeleteRange,
            4 => Self::PrepareRun,
            5 => Self::InsertRun,
            6 => Self::DeleteRun,
            7 => Self::ForgetRun,
            _ => return None,
        })
    }

    /// Required keys for this record type (`vy_log_key_mask`).
    pub fn required_keys(self) -> &'static [RecordKey] {
        use RecordKey::*;
        match self {
            Self::CreateIndex => &[IndexId, Iid, SpaceId, Path],
            Self::DropIndex => &[IndexId],
            Self::InsertRange => &[IndexId, RangeId, RangeBegin, RangeEnd],
            Self::DeleteRange => &[RangeId],
            Self::PrepareRun => &[IndexId, RunId],
            Self::InsertRun => &[RangeId, RunId],
            Self::DeleteRun => &[RunId],
            Self::ForgetRun => &[RunId],
        }
    }
}

/// A fully decoded structural-change record, plus the monotonic
/// vclock-sum signature stamped at commit time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub record_type: RecordType,
    pub index_id: Option<u64>,
    pub range_id: Option<u64>,
    pub run_id: Option<u64>,
    pub range_begin: Option<Vec<u8>>,
    pub range_end: Option<Vec<u8>>,
    pub iid: Option<u64>,
    pub space_id: Option<u64>,
    pub path: Option<String>,
    pub signature: u64,
}

impl Record {
    pub fn create_index(index_id: u64, iid: u64, space_id: u64, path: String) -> Self {
        Self {
            record_type: RecordType::CreateIndex,
            index_id: Some(index_id),
            iid: Some(iid),
            space_id: Some(space_id),
            path: Some(path),
            ..Self::empty(RecordType::CreateIndex)
        }
    }

    pub fn drop_index(index_id: u64) -> Self {
        Self {
            index_id: Some(index_id),
            ..Self::empty(RecordType::DropIndex)
        }
    }

    pub fn insert_range(index_id: u64, range_id: u64, range_begin: Vec<u8>, range_end: Vec<u8>) -> Self {
        Self {
            index_id: Some(index_id),
            range_id: Some(range_id),
            range_begin: Some(range_begin),
            range_end: Some(range_end),
            ..Self::empty(RecordType::InsertRange)
        }
    }

    pub fn delete_range(range_id: u64) -> Self {
        Self {
            range_id: Some(range_id),
            ..Self::empty(RecordType::DeleteRange)
        }
    }

    pub fn prepare_run(index_id: u64, run_id: u64) -> Self {
        Self {
            index_id: Some(index_id),
            run_id: Some(run_id),
            ..Self::empty(RecordType::PrepareRun)
        }
    }

    pub fn insert_run(range_id: u64, run_id: u64) -> Self {
        Self {
            range_id: Some(range_id),
            run_id: Some(run_id),
            ..Self::empty(RecordType::InsertRun)
        }
    }

    pub fn delete_run(run_id: u64) -> Self {
        Self {
            run_id: Some(run_id),
            ..Self::empty(RecordType::DeleteRun)
        }
    }

    pub fn forget_run(run_id: u64) -> Self {
        Self {
            run_id: Some(run_id),
            ..Self::empty(RecordType::ForgetRun)
        }
    }

    fn empty(record_type: RecordType) -> Self {
        Self {
            record_type,
            index_id: None,
            range_id: None,
            run_id: None,
            range_begin: None,
            range_end: None,
            iid: None,
            space_id: None,
            path: None,
            signature: 0,
        }
    }

    /// Returns `self` stamped with `signature`, for re-emitting a record
    /// at the signature its originating node was last modified at.
    pub fn with_signature(mut self, signature: u64) -> Self {
        self.signature = signature;
        self
    }

    fn field(&self, key: RecordKey) -> Option<Value> {
        match key {
            RecordKey::IndexId => self.index_id.map(Value::from),
            RecordKey::RangeId => self.range_id.map(Value::from),
            RecordKey::RunId => self.run_id.map(Value::from),
            RecordKey::RangeBegin => self.range_begin.clone().map(Value::from),
            RecordKey::RangeEnd => self.range_end.clone().map(Value::from),
            RecordKey::Iid => self.iid.map(Value::from),
            RecordKey::SpaceId => self.space_id.map(Value::from),
            RecordKey::Path => self.path.clone().map(Value::from),
        }
    }

    /// Encodes as `[type, {key: value, ...}]`, including only the keys
    /// this type requires. Does not carry the signature — callers writing
    /// to the log use [`Record::encode_row`] instead.
    pub fn encode(&self) -> Value {
        let mut map = Vec::new();
        for key in self.record_type.required_keys() {
            if let Some(value) = self.field(*key) {
                map.push((Value::from(key.code()), value));
            }
        }
        Value::Array(vec![Value::from(self.record_type.code()), Value::Map(map)])
    }

    /// Encodes as `[signature, [type, {key: value, ...}]]` — the on-disk
    /// row shape. The signature rides alongside the record the way the
    /// original stamps it onto the enveloping xrow's `lsn` field
    /// (`row->lsn = record->signature`), rather than as a record-map key.
    pub fn encode_row(&self) -> Value {
        Value::Array(vec![Value::from(self.signature), self.encode()])
    }

    /// Decodes and validates that every required key is present with the
    /// right kind; unknown keys or an unknown type both fail.
    pub fn decode(value: &Value) -> Result<Self, RecordCodecError> {
        let array = value
            .as_array()
            .filter(|a| a.len() == 2)
            .ok_or(RecordCodecError::NotAPair)?;

        let type_code = array[0]
            .as_u64()
            .ok_or(RecordCodecError::BadTypeCode)? as u8;
        let record_type = RecordType::from_code(type_code).ok_or(RecordCodecError::UnknownType(type_code))?;

        let map = array[1].as_map().ok_or(RecordCodecError::NotAMap)?;

        let mut record = Self::empty(record_type);
        for (k, v) in map {
            let code = k.as_u64().ok_or(RecordCodecError::BadKeyCode)? as u8;
            match code {
                c if c == RecordKey::IndexId.code() => record.index_id = Some(require_u64(v)?),
                c if c == RecordKey::RangeId.code() => record.range_id = Some(require_u64(v)?),
                c if c == RecordKey::RunId.code() => record.run_id = Some(require_u64(v)?),
                c if c == RecordKey::RangeBegin.code() => record.range_begin = Some(require_bin(v)?),
                c if c == RecordKey::RangeEnd.code() => record.range_end = Some(require_bin(v)?),
                c if c == RecordKey::Iid.code() => record.iid = Some(require_u64(v)?),
                c if c == RecordKey::SpaceId.code() => record.space_id = Some(require_u64(v)?),
                c if c == RecordKey::Path.code() => {
                    record.path = Some(v.as_str().ok_or(RecordCodecError::WrongKind(RecordKey::Path))?.to_string())
                }
                _ => return Err(RecordCodecError::UnknownKey(code)),
            }
        }

        for key in record_type.required_keys() {
            if record.field(*key).is_none() {
                return Err(RecordCodecError::MissingKey(*key));
            }
        }
        Ok(record)
    }

    /// Decodes a `[signature, [type, {key: value, ...}]]` on-disk row,
    /// restoring the signature the record was written at.
    pub fn decode_row(value: &Value) -> Result<Self, RecordCodecError> {
        let row = value.as_array().filter(|a| a.len() == 2).ok_or(RecordCodecError::NotARow)?;
        let signature = row[0].as_u64().ok_or(RecordCodecError::BadSignature)?;
        let mut record = Self::decode(&row[1])?;
        record.signature = signature;
        Ok(record)
    }
}

fn require_u64(v: &Value) -> Result<u64, RecordCodecError> {
    v.as_u64().ok_or(RecordCodecError::WrongKind(RecordKey::IndexId))
}

fn require_bin(v: &Value) -> Result<Vec<u8>, RecordCodecError> {
    v.as_slice()
        .map(|s| s.to_vec())
        .or_else(|| v.as_str().map(|s| s.as_bytes().to_vec()))
        .ok_or(RecordCodecError::WrongKind(RecordKey::RangeBegin))
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RecordCodecError {
    #[error("record is not a [type, map] pair")]
    NotAPair,
    #[error("row is not a [signature, record] pair")]
    NotARow,
    #[error("row signature is not a uint")]
    BadSignature,
    #[error("record type is not a uint")]
    BadTypeCode,
    #[error("unknown record type {0}")]
    UnknownType(u8),
    #[error("record body is not a map")]
    NotAMap,
    #[error("record key is not a uint")]
    BadKeyCode,
    #[error("unknown record key {0}")]
    UnknownKey(u8),
    #[error("value for key {0:?} has the wrong MessagePack kind")]
    WrongKind(RecordKey),
    #[error("missing required key {0:?}")]
    MissingKey(RecordKey),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_index_roundtrip() {
        let record = Record::create_index(42, 1, 513, String::new());
        let encoded = record.encode();
        let decoded = Record::decode(&encoded).expect("valid record");
        assert_eq!(decoded, record);
    }

    #[test]
    fn insert_range_roundtrip_with_binary_bounds() {
        let record = Record::insert_range(42, 100, vec![1, 2, 3], vec![]);
        let decoded = Record::decode(&record.encode()).expect("valid record");
        assert_eq!(decoded, record);
    }

    #[test]
    fn row_roundtrip_preserves_signature() {
        let record = Record::create_index(1, 1, 1, String::new()).with_signature(7);
        let row = record.encode_row();
        let decoded = Record::decode_row(&row).expect("valid row");
        assert_eq!(decoded, record);
        assert_eq!(decoded.signature, 7);
    }

    #[test]
    fn decode_row_rejects_a_bare_record_pair() {
        let record = Record::create_index(1, 1, 1, String::new());
        let err = Record::decode_row(&record.encode()).expect_err("not a [signature, record] row");
        assert!(matches!(err, RecordCodecError::NotAPair));
    }

    #[test]
    fn missing_required_key_fails() {
        let bad = Value::Array(vec![
            Value::from(RecordType::CreateIndex.code()),
            Value::Map(vec![(Value::from(RecordKey::IndexId.code()), Value::from(1u64))]),
        ]);
        let err = Record::decode(&bad).expect_err("iid/space_id/path missing");
        assert!(matches!(err, RecordCodecError::MissingKey(_)));
    }

    #[test]
    fn unknown_type_fails() {
        let bad = Value::Array(vec![Value::from(200u64), Value::Map(vec![])]);
        assert!(matches!(Record::decode(&bad), Err(RecordCodecError::UnknownType(200))));
    }
}
