// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! IPROTO wire-level constants: header/body key codes, the required-key
//! bitmaps, request type codes, and the fixed-size greeting. Key
//! numbering is taken verbatim from the original `iproto_constants.h` so
//! the dense code-space stays recognizable.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use rand::RngCore;

/// Greeting size in bytes (`IPROTO_GREETING_SIZE`).
pub const GREETING_SIZE: usize = 128;
/// Length of the salt itself, before base64 encoding.
pub const SALT_SIZE: usize = 32;

/// Header/body map keys. Values match `enum iproto_key` in the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum IprotoKey {
    RequestType = 0x00,
    Sync = 0x01,
    ReplicaId = 0x02,
    Lsn = 0x03,
    Timestamp = 0x04,
    SchemaVersion = 0x05,
    ServerVersion = 0x06,
    SpaceId = 0x10,
    IndexId = 0x11,
    Limit = 0x12,
    Offset = 0x13,
    Iterator = 0x14,
    IndexBase = 0x15,
    Key = 0x20,
    Tuple = 0x21,
    FunctionName = 0x22,
    UserName = 0x23,
    InstanceUuid = 0x24,
    ClusterUuid = 0x25,
    Vclock = 0x26,
    Expr = 0x27,
    Ops = 0x28,
    Data = 0x30,
    Error = 0x31,
    Metadata = 0x32,
    SqlText = 0x40,
    SqlBind = 0x41,
    SqlOptions = 0x42,
    SqlInfo = 0x43,
    SqlRowCount = 0x44,
}

impl IprotoKey {
    pub fn code(self) -> u8 {
        self as u8
    }
}

fn bit(key: IprotoKey) -> u64 {
    1u64 << key.code()
}

/// Keys a header must carry (`IPROTO_HEAD_BMAP`).
pub fn head_bmap() -> u64 {
    bit(IprotoKey::RequestType)
        | bit(IprotoKey::Sync)
        | bit(IprotoKey::ReplicaId)
        | bit(IprotoKey::Lsn)
        | bit(IprotoKey::SchemaVersion)
}

/// Keys a DML body is allowed to carry (`IPROTO_DML_BODY_BMAP`).
pub fn dml_body_bmap() -> u64 {
    bit(IprotoKey::SpaceId)
        | bit(IprotoKey::IndexId)
        | bit(IprotoKey::Limit)
        | bit(IprotoKey::Offset)
        | bit(IprotoKey::Iterator)
        | bit(IprotoKey::IndexBase)
        | bit(IprotoKey::Key)
        | bit(IprotoKey::Tuple)
        | bit(IprotoKey::Ops)
}

/// Request/command type codes (`enum iproto_type`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum RequestType {
    Ok = 0,
    Select = 1,
    Insert = 2,
    Replace = 3,
    Update = 4,
    Delete = 5,
    Call16 = 6,
    Auth = 7,
    Eval = 8,
    Upsert = 9,
    Call = 10,
    Execute = 11,
    Nop = 12,
    Ping = 64,
    Join = 65,
    Subscribe = 66,
    RequestVote = 67,
}

/// High bit marking an error response (`IPROTO_TYPE_ERROR`).
pub const IPROTO_TYPE_ERROR: u32 = 1 << 15;

impl RequestType {
    pub fn from_code(code: u32) -> Option<Self> {
        Some(match code {
            0 => Self::Ok,
            1 => Self::Select,
            2 => Self::Insert,
            3 => Self::Replace,
            4 => Self::Update,
            5 => Self::Delete,
            6 => Self::Call16,
            7 => Self::Auth,
            8 => Self::Eval,
            9 => Self::Upsert,
            10 => Self::Call,
            11 => Self::Execute,
            12 => Self::Nop,
            64 => Self::Ping,
            65 => Self::Join,
            66 => Self::Subscribe,
            67 => Self::RequestVote,
            _ => return None,
        })
    }

    pub fn code(self) -> u32 {
        self as u32
    }

    /// True for the data-manipulation request types that carry a DML
    /// body governed by [`dml_body_bmap`].
    pub fn is_dml(self) -> bool {
        matches!(
            self,
            Self::Select
                | Self::Insert
                | Self::Replace
                | Self::Update
                | Self::Delete
                | Self::Upsert
                | Self::Nop
        )
    }

    /// True for the admin/replication request types handled outside the
    /// DML body-key table.
    pub fn is_admin(self) -> bool {
        matches!(
            self,
            Self::Ping | Self::Auth | Self::Join | Self::Subscribe | Self::RequestVote
        )
    }
}

/// Builds the fixed 128-byte text greeting: a product banner line, a
/// process title line, and a 44-char base64 salt line, space-padded to
/// `GREETING_SIZE`.
pub fn build_greeting(product_version: &str, process_title: &str) -> ([u8; GREETING_SIZE], [u8; SALT_SIZE]) {
    let mut salt = [0u8; SALT_SIZE];
    rand::rng().fill_bytes(&mut salt);
    let salt_b64 = BASE64.encode(salt);
    debug_assert_eq!(salt_b64.len(), 44);

    let line1 = format!("{product_version} {process_title:<20.20}");
    let line2 = salt_b64;

    let mut greeting = [b' '; GREETING_SIZE];
    let first = format!("{line1:<63.63}\n");
    let second = format!("{line2:<63.63}\n");
    greeting[..first.len()].copy_from_slice(first.as_bytes());
    greeting[first.len()..first.len() + second.len()].copy_from_slice(second.as_bytes());
    (greeting, salt)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn greeting_is_fixed_size_and_newline_delimited() {
        let (greeting, _salt) = build_greeting("vydb 1.0.0", "vydb-server");
        assert_eq!(greeting.len(), GREETING_SIZE);
        let text = std::str::from_utf8(&greeting).expect("ascii/utf8 greeting");
        let mut lines = text.split('\n');
        assert!(lines.next().is_some());
        assert!(lines.next().is_some());
    }

    #[test]
    fn request_type_roundtrip() {
        for code in [0, 1, 7, 9, 12, 64, 67] {
            let ty = RequestType::from_code(code).expect("known code");
            assert_eq!(ty.code(), code);
        }
        assert!(RequestType::from_code(13).is_none());
    }

    #[test]
    fn dml_and_admin_are_disjoint() {
        assert!(RequestType::Select.is_dml());
        assert!(!RequestType::Select.is_admin());
        assert!(RequestType::Auth.is_admin());
        assert!(!RequestType::Auth.is_dml());
    }
}
