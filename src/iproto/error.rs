// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Dense IPROTO error-code table. Numbers are part of the
//! stable wire surface and are never renumbered; this subset is grounded
//! directly on `errcode.h`. Anything outside the known subset resolves to
//! `ER_UNKNOWN` (code 0), matching the source's own fallback.

use thiserror::Error;

use crate::iproto::wire::IPROTO_TYPE_ERROR;

/// A stable, numbered error code. Only the subset this core actually
/// raises is modeled; `describe` falls back to "Unknown error" for any
/// code not in the table, exactly as the real `tnt_errcode_desc` does for
/// out-of-range lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Unknown = 0,
    InvalidMsgpack = 20,
    NoSuchSpace = 36,
    WalIo = 40,
    AccessDenied = 42,
    NoSuchUser = 45,
    PasswordMismatch = 47,
    UnknownRequestType = 48,
    UserMax = 56,
    /// Not part of the original `errcode.h`; appended at the end of the
    /// table, following the "new codes append" stability rule.
    SessionClosed = 241,
}

impl ErrorCode {
    pub fn code(self) -> u32 {
        self as u32
    }

    /// Response type for an error reply: `IPROTO_TYPE_ERROR | code`.
    pub fn iproto_type(self) -> u32 {
        IPROTO_TYPE_ERROR | self.code()
    }

    pub fn describe(self) -> &'static str {
        match self {
            Self::Unknown => "Unknown error",
            Self::InvalidMsgpack => "Invalid MsgPack",
            Self::NoSuchSpace => "Space does not exist",
            Self::WalIo => "Failed to write to disk",
            Self::AccessDenied => "Access denied",
            Self::NoSuchUser => "User is not found",
            Self::PasswordMismatch => "Incorrect password supplied",
            Self::UnknownRequestType => "Unknown request type",
            Self::UserMax => "A limit on the total number of users has been reached",
            Self::SessionClosed => "Session closed: token reassigned to a different user",
        }
    }

    /// Maps a raw numeric code back to a known variant, or `Unknown` if
    /// it falls outside the modeled subset.
    pub fn from_code(code: u32) -> Self {
        match code {
            20 => Self::InvalidMsgpack,
            36 => Self::NoSuchSpace,
            40 => Self::WalIo,
            42 => Self::AccessDenied,
            45 => Self::NoSuchUser,
            47 => Self::PasswordMismatch,
            48 => Self::UnknownRequestType,
            56 => Self::UserMax,
            241 => Self::SessionClosed,
            _ => Self::Unknown,
        }
    }
}

/// Protocol-layer failures raised by the codec.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("invalid msgpack: {0}")]
    InvalidMsgpack(String),

    #[error("unknown request type {0}")]
    UnknownRequestType(u32),

    #[error("missing required field '{0}' in {1}")]
    MissingRequestField(&'static str, &'static str),
}

impl ProtocolError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::InvalidMsgpack(_) => ErrorCode::InvalidMsgpack,
            Self::UnknownRequestType(_) => ErrorCode::UnknownRequestType,
            Self::MissingRequestField(..) => ErrorCode::InvalidMsgpack,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_code_falls_back() {
        assert_eq!(ErrorCode::from_code(9999), ErrorCode::Unknown);
        assert_eq!(ErrorCode::Unknown.describe(), "Unknown error");
    }

    #[test]
    fn iproto_type_sets_high_bit() {
        assert_eq!(ErrorCode::NoSuchSpace.iproto_type(), IPROTO_TYPE_ERROR | 36);
    }
}
