// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! R/W/X privilege bitmask and the access-layer error taxonomy. Bit
//! values are carried over from the original `PRIV_R`/`PRIV_W`/`PRIV_X`
//! so on-disk/wire privilege masks stay byte-compatible with the
//! original system.

use bitflags::bitflags;
use thiserror::Error;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Privilege: u8 {
        const READ    = 0b0000_0001;
        const WRITE   = 0b0000_0010;
        const EXECUTE = 0b0000_0100;
    }
}

impl Privilege {
    pub const NONE: Privilege = Privilege::empty();
    pub const ALL: Privilege = Privilege::READ.union(Privilege::WRITE).union(Privilege::EXECUTE);
}

/// Failure modes of the access layer: token allocation, user lookup, and
/// privilege checks (`ER_ACCESS_DENIED` / `ER_NO_SUCH_USER` /
/// `ER_USER_MAX` family).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AccessError {
    #[error("user limit reached: no free token slots (capacity {0})")]
    UserMax(usize),

    #[error("no such user: token {0}")]
    NoSuchUser(u8),

    #[error("password mismatch for user '{0}'")]
    PasswordMismatch(String),

    #[error("{privilege:?} access denied to '{object}' for user '{user}'")]
    AccessDenied {
        privilege: Privilege,
        object: String,
        user: String,
    },

    #[error("session closed: token {token} no longer belongs to uid {expected_uid}")]
    SessionClosed { token: u8, expected_uid: u32 },
}
