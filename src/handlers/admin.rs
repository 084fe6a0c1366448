// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Admin-path processors: PING, AUTH, JOIN, SUBSCRIBE.

use rmpv::Value;

use crate::access::privilege::AccessError;
use crate::access::user_cache::{Principal, Session, UserCache};

/// Always succeeds with no payload.
pub fn ping() -> Value {
    Value::Nil
}

/// Verifies credentials and rebinds `session` to the authenticated
/// principal's token.
pub fn auth(cache: &UserCache, session: &Session, user_name: &str, password_hash: &[u8; 20]) -> Result<Principal, AccessError> {
    cache.authenticate(session, user_name, password_hash)
}
