// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The storage engine seam. This core only speaks IPROTO, access control,
//! and vy_log — the actual space/tuple storage (vinyl's LSM tree) is out
//! of scope, so DML handlers delegate to this trait rather than
//! embedding any storage logic.

use rmpv::Value;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("Space '{0}' does not exist")]
    NoSuchSpace(u64),
}

/// Collaborator that actually executes data-manipulation requests.
/// `space_id`/`index_id` come straight off the decoded DML body.
pub trait StorageEngine: Send + Sync {
    fn select(&self, space_id: u64, index_id: u64, key: &Value) -> Result<Vec<Value>, StorageError>;
    fn insert(&self, space_id: u64, tuple: &Value) -> Result<Value, StorageError>;
    fn replace(&self, space_id: u64, tuple: &Value) -> Result<Value, StorageError>;
    fn update(&self, space_id: u64, key: &Value, ops: &Value) -> Result<Value, StorageError>;
    fn delete(&self, space_id: u64, key: &Value) -> Result<Value, StorageError>;
    fn upsert(&self, space_id: u64, tuple: &Value, ops: &Value) -> Result<(), StorageError>;
}

/// A storage engine with no spaces at all. Every DML call fails with
/// `NoSuchSpace`, which is exactly what the real engine does before any
/// space has been created — useful as the default until a real engine
/// is wired in, and for exercising the "SELECT on a missing space"
/// scenario in tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullStorageEngine;

impl StorageEngine for NullStorageEngine {
    fn select(&self, space_id: u64, _index_id: u64, _key: &Value) -> Result<Vec<Value>, StorageError> {
        Err(StorageError::NoSuchSpace(space_id))
    }

    fn insert(&self, space_id: u64, _tuple: &Value) -> Result<Value, StorageError> {
        Err(StorageError::NoSuchSpace(space_id))
    }

    fn replace(&self, space_id: u64, _tuple: &Value) -> Result<Value, StorageError> {
        Err(StorageError::NoSuchSpace(space_id))
    }

    fn update(&self, space_id: u64, _key: &Value, _ops: &Value) -> Result<Value, StorageError> {
        Err(StorageError::NoSuchSpace(space_id))
    }

    fn delete(&self, space_id: u64, _key: &Value) -> Result<Value, StorageError> {
        Err(StorageError::NoSuchSpace(space_id))
    }

    fn upsert(&self, space_id: u64, _tuple: &Value, _ops: &Value) -> Result<(), StorageError> {
        Err(StorageError::NoSuchSpace(space_id))
    }
}
