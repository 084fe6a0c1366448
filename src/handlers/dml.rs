// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Data-manipulation processors: SELECT, INSERT, REPLACE, UPDATE, DELETE,
//! UPSERT, NOP. Each checks the caller's privilege before delegating
//! to the [`StorageEngine`].

use rmpv::Value;
use thiserror::Error;

use crate::access::privilege::{AccessError, Privilege};
use crate::access::user_cache::Principal;
use crate::handlers::storage::{StorageEngine, StorageError};
use crate::iproto::wire::{IprotoKey, RequestType};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DmlError {
    #[error(transparent)]
    Access(#[from] AccessError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("DML body missing field '{0}'")]
    MissingField(&'static str),
}

fn field<'a>(body: &'a Value, key: IprotoKey) -> Option<&'a Value> {
    body.as_map()?.iter().find(|(k, _)| k.as_u64() == Some(key.code() as u64)).map(|(_, v)| v)
}

fn require_privilege(user: &Principal, needed: Privilege, object: &str) -> Result<(), DmlError> {
    if user.universal_access.contains(needed) {
        Ok(())
    } else {
        Err(DmlError::Access(AccessError::AccessDenied {
            privilege: needed,
            object: object.to_string(),
            user: user.name.clone(),
        }))
    }
}

/// Executes one DML request against `engine`, returning the reply's
/// `IPROTO_DATA` payload on success.
pub fn dispatch(
    engine: &dyn StorageEngine,
    user: &Principal,
    request_type: RequestType,
    body: &Value,
) -> Result<Value, DmlError> {
    let space_id = field(body, IprotoKey::SpaceId)
        .and_then(Value::as_u64)
        .ok_or(DmlError::MissingField("space_id"))?;

    match request_type {
        RequestType::Select => {
            require_privilege(user, Privilege::READ, "space")?;
            let index_id = field(body, IprotoKey::IndexId).and_then(Value::as_u64).unwrap_or(0);
            let key = field(body, IprotoKey::Key).cloned().unwrap_or(Value::Array(vec![]));
            let rows = engine.select(space_id, index_id, &key)?;
            Ok(Value::Array(rows))
        }
        RequestType::Insert => {
            require_privilege(user, Privilege::WRITE, "space")?;
            let tuple = field(body, IprotoKey::Tuple).ok_or(DmlError::MissingField("tuple"))?;
            Ok(engine.insert(space_id, tuple)?)
        }
        RequestType::Replace => {
            require_privilege(user, Privilege::WRITE, "space")?;
            let tuple = field(body, IprotoKey::Tuple).ok_or(DmlError::MissingField("tuple"))?;
            Ok(engine.replace(space_id, tuple)?)
        }
        RequestType::Update => {
            require_privilege(user, Privilege::WRITE, "space")?;
            let key = field(body, IprotoKey::Key).ok_or(DmlError::MissingField("key"))?;
            let ops = field(body, IprotoKey::Ops).ok_or(DmlError::MissingField("ops"))?;
            Ok(engine.update(space_id, key, ops)?)
        }
        RequestType::Delete => {
            require_privilege(user, Privilege::WRITE, "space")?;
            let key = field(body, IprotoKey::Key).ok_or(DmlError::MissingField("key"))?;
            Ok(engine.delete(space_id, key)?)
        }
        RequestType::Upsert => {
            require_privilege(user, Privilege::WRITE, "space")?;
            let tuple = field(body, IprotoKey::Tuple).ok_or(DmlError::MissingField("tuple"))?;
            let ops = field(body, IprotoKey::Ops).ok_or(DmlError::MissingField("ops"))?;
            engine.upsert(space_id, tuple, ops)?;
            Ok(Value::Nil)
        }
        RequestType::Nop => Ok(Value::Nil),
        other => unreachable!("dispatch called with non-DML request type {other:?}"),
    }
}
