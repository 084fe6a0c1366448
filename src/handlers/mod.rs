//! Per-opcode request processors: the admin path (PING/AUTH/JOIN/
//! SUBSCRIBE) and the DML path (SELECT/INSERT/REPLACE/UPDATE/DELETE/
//! UPSERT/NOP), plus the [`StorageEngine`] seam DML delegates to.

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

/// PING/AUTH/JOIN/SUBSCRIBE processors.
pub mod admin;
/// SELECT/INSERT/REPLACE/UPDATE/DELETE/UPSERT/NOP processors.
pub mod dml;
/// The storage-engine trait DML delegates to.
pub mod storage;

use rmpv::Value;
use tracing::warn;

use crate::access::privilege::AccessError;
use crate::access::user_cache::{Session, UserCache};
use crate::iproto::codec::{encode_error_reply, encode_ok_reply};
use crate::iproto::error::{ErrorCode, ProtocolError};
use crate::iproto::request::Request;
use crate::iproto::wire::{IprotoKey, RequestType};
use dml::DmlError;
use storage::StorageEngine;

/// Runs one decoded request to completion and returns the bytes to write
/// back on the wire. Never panics on a processor failure: every error
/// kind this layer can produce maps to an `IPROTO_TYPE_ERROR` reply, and
/// the connection keeps serving afterwards.
pub fn process(cache: &UserCache, session: &Session, engine: &dyn StorageEngine, request: &Request) -> Vec<u8> {
    match request.request_type {
        RequestType::Ping => encode_ok_reply(request.sync, admin::ping()),
        RequestType::Auth => process_auth(cache, session, request),
        RequestType::Join | RequestType::Subscribe | RequestType::RequestVote => {
            encode_error_reply(
                request.sync,
                ErrorCode::UnknownRequestType.iproto_type(),
                "replication is not supported by this core",
            )
        }
        ty if ty.is_dml() => process_dml(cache, session, engine, request),
        other => encode_error_reply(
            request.sync,
            ErrorCode::UnknownRequestType.iproto_type(),
            &format!("unknown request type {}", other.code()),
        ),
    }
}

fn process_auth(cache: &UserCache, session: &Session, request: &Request) -> Vec<u8> {
    let Some(body) = &request.body else {
        return protocol_error_reply(request.sync, &ProtocolError::MissingRequestField("user_name", "AUTH"));
    };
    let Some(user_name) = body
        .as_map()
        .and_then(|m| m.iter().find(|(k, _)| k.as_u64() == Some(IprotoKey::UserName.code() as u64)))
        .and_then(|(_, v)| v.as_str())
    else {
        return protocol_error_reply(request.sync, &ProtocolError::MissingRequestField("user_name", "AUTH"));
    };
    let password_hash = body
        .as_map()
        .and_then(|m| m.iter().find(|(k, _)| k.as_u64() == Some(IprotoKey::Tuple.code() as u64)))
        .and_then(|(_, v)| v.as_slice())
        .map(|bytes| {
            let mut hash = [0u8; 20];
            let n = bytes.len().min(20);
            hash[..n].copy_from_slice(&bytes[..n]);
            hash
        })
        .unwrap_or([0u8; 20]);

    match admin::auth(cache, session, user_name, &password_hash) {
        Ok(_principal) => encode_ok_reply(request.sync, Value::Nil),
        Err(e) => access_error_reply(request.sync, &e),
    }
}

fn process_dml(cache: &UserCache, session: &Session, engine: &dyn StorageEngine, request: &Request) -> Vec<u8> {
    let user = match cache.current_user(session) {
        Ok(u) => u,
        Err(e) => return access_error_reply(request.sync, &e),
    };
    let Some(body) = &request.body else {
        return protocol_error_reply(request.sync, &ProtocolError::MissingRequestField("body", "DML"));
    };
    match dml::dispatch(engine, &user, request.request_type, body) {
        Ok(data) => encode_ok_reply(request.sync, data),
        Err(DmlError::Access(e)) => access_error_reply(request.sync, &e),
        Err(DmlError::Storage(e)) => {
            warn!("storage error: {e}");
            encode_error_reply(request.sync, ErrorCode::NoSuchSpace.iproto_type(), &e.to_string())
        }
        Err(DmlError::MissingField(field)) => {
            protocol_error_reply(request.sync, &ProtocolError::MissingRequestField(field, "DML body"))
        }
    }
}

fn protocol_error_reply(sync: u64, err: &ProtocolError) -> Vec<u8> {
    encode_error_reply(sync, err.error_code().iproto_type(), &err.to_string())
}

fn access_error_reply(sync: u64, err: &AccessError) -> Vec<u8> {
    let code = match err {
        AccessError::UserMax(_) => ErrorCode::UserMax,
        AccessError::NoSuchUser(_) => ErrorCode::NoSuchUser,
        AccessError::PasswordMismatch(_) => ErrorCode::PasswordMismatch,
        AccessError::AccessDenied { .. } => ErrorCode::AccessDenied,
        AccessError::SessionClosed { .. } => ErrorCode::SessionClosed,
    };
    encode_error_reply(sync, code.iproto_type(), &err.to_string())
}
