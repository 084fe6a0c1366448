//! Process-wide metadata/access layer: the token allocator, the user
//! cache, and the R/W/X privilege model.

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

/// Dense 1-byte auth-token slot allocator.
pub mod token;
/// Process-wide cache of user principals keyed by auth token / uid.
pub mod user_cache;
/// R/W/X privilege bitmask and access error taxonomy.
pub mod privilege;

pub use privilege::{AccessError, Privilege};
pub use token::TokenAllocator;
pub use user_cache::{Principal, Session, UserCache};
