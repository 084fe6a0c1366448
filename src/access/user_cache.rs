// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Process-wide cache of user principals, keyed by both `uid` and dense
//! `auth_token`. Guest (`uid=0`, `token=0`) and admin (`uid=1`,
//! `token=1`) are bootstrapped once at startup and can never be dropped.
//!
//! Sessions store the `uid` they authenticated as alongside the token, so
//! `current_user` can detect a token slot that has been recycled to a
//! different principal since the session last looked it up, resolved
//! here by re-validating on every lookup and surfacing
//! [`AccessError::SessionClosed`] on mismatch.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};

use dashmap::DashMap;

use crate::access::privilege::{AccessError, Privilege};
use crate::access::token::TokenAllocator;

pub const GUEST_UID: u32 = 0;
pub const GUEST_TOKEN: u8 = 0;
pub const ADMIN_UID: u32 = 1;
pub const ADMIN_TOKEN: u8 = 1;

/// A user record. `password_hash` holds the 20-byte SHA1-style digest the
/// wire AUTH exchange compares against; this core never hashes passwords
/// itself, it only stores and compares digests supplied by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub uid: u32,
    pub owner_uid: u32,
    pub name: String,
    pub password_hash: [u8; 20],
    pub universal_access: Privilege,
    pub auth_token: u8,
}

/// Per-connection authentication state. Carries the file descriptor and a
/// random peer cookie alongside the mutable `(auth_token, uid)` pair so a
/// session can be re-validated against the cache without holding a
/// reference into it.
#[derive(Debug)]
pub struct Session {
    pub fd: i32,
    pub peer_cookie: u64,
    auth_token: AtomicU8,
    uid: AtomicU32,
}

impl Session {
    /// A freshly accepted connection always starts as guest.
    pub fn new(fd: i32, peer_cookie: u64) -> Self {
        Self {
            fd,
            peer_cookie,
            auth_token: AtomicU8::new(GUEST_TOKEN),
            uid: AtomicU32::new(GUEST_UID),
        }
    }

    pub fn auth_token(&self) -> u8 {
        self.auth_token.load(Ordering::Acquire)
    }

    pub fn uid(&self) -> u32 {
        self.uid.load(Ordering::Acquire)
    }

    /// Called after a successful AUTH exchange. Does not touch any other
    /// session that may still hold the previous token.
    fn set_identity(&self, token: u8, uid: u32) {
        self.auth_token.store(token, Ordering::Release);
        self.uid.store(uid, Ordering::Release);
    }
}

/// Process-wide principal table plus the token allocator backing it.
pub struct UserCache {
    by_uid: DashMap<u32, Principal>,
    token_to_uid: DashMap<u8, u32>,
    tokens: Mutex<TokenAllocator>,
    next_uid: AtomicU32,
}

impl UserCache {
    /// Builds a cache with `token_capacity` slots and bootstraps guest and
    /// admin into slots 0 and 1.
    pub fn new(token_capacity: usize) -> Self {
        let mut tokens = TokenAllocator::new(token_capacity);
        let by_uid = DashMap::new();
        let token_to_uid = DashMap::new();

        let guest_token = tokens.acquire().expect("capacity >= 2 guarantees slot 0");
        debug_assert_eq!(guest_token, GUEST_TOKEN);
        by_uid.insert(
            GUEST_UID,
            Principal {
                uid: GUEST_UID,
                owner_uid: GUEST_UID,
                name: "guest".to_string(),
                password_hash: [0u8; 20],
                universal_access: Privilege::NONE,
                auth_token: guest_token,
            },
        );
        token_to_uid.insert(guest_token, GUEST_UID);

        let admin_token = tokens.acquire().expect("capacity >= 2 guarantees slot 1");
        debug_assert_eq!(admin_token, ADMIN_TOKEN);
        by_uid.insert(
            ADMIN_UID,
            Principal {
                uid: ADMIN_UID,
                owner_uid: ADMIN_UID,
                name: "admin".to_string(),
                password_hash: [0u8; 20],
                universal_access: Privilege::ALL,
                auth_token: admin_token,
            },
        );
        token_to_uid.insert(admin_token, ADMIN_UID);

        Self {
            by_uid,
            token_to_uid,
            tokens: Mutex::new(tokens),
            next_uid: AtomicU32::new(ADMIN_UID + 1),
        }
    }

    /// Allocates a fresh token and inserts a new principal. Never reuses
    /// uids; token reuse after a drop is expected.
    pub fn create_user(
        &self,
        name: String,
        password_hash: [u8; 20],
        owner_uid: u32,
        universal_access: Privilege,
    ) -> Result<Principal, AccessError> {
        let token = {
            let mut tokens = self.tokens.lock().expect("token allocator lock poisoned");
            tokens.acquire()?
        };
        let uid = self.next_uid.fetch_add(1, Ordering::AcqRel);
        let principal = Principal {
            uid,
            owner_uid,
            name,
            password_hash,
            universal_access,
            auth_token: token,
        };
        self.by_uid.insert(uid, principal.clone());
        self.token_to_uid.insert(token, uid);
        Ok(principal)
    }

    /// Removes a non-bootstrap user and releases its token slot.
    pub fn drop_user(&self, uid: u32) -> Result<(), AccessError> {
        if uid == GUEST_UID || uid == ADMIN_UID {
            return Err(AccessError::AccessDenied {
                privilege: Privilege::WRITE,
                object: "_user".to_string(),
                user: "guest/admin".to_string(),
            });
        }
        let (_, principal) = self
            .by_uid
            .remove(&uid)
            .ok_or(AccessError::NoSuchUser(0))?;
        self.token_to_uid.remove(&principal.auth_token);
        let mut tokens = self.tokens.lock().expect("token allocator lock poisoned");
        tokens.release(principal.auth_token);
        Ok(())
    }

    pub fn find_by_uid(&self, uid: u32) -> Option<Principal> {
        self.by_uid.get(&uid).map(|e| e.value().clone())
    }

    pub fn find_by_token(&self, token: u8) -> Option<Principal> {
        let uid = *self.token_to_uid.get(&token)?;
        self.find_by_uid(uid)
    }

    /// Looks up a principal by name. `len` bounds how much of `name` is
    /// significant, mirroring the wire AUTH field, which arrives as a
    /// length-prefixed buffer rather than a Rust-native string slice.
    /// There is no separate name index, so this scans `by_uid` directly —
    /// through the catalog first, then by uid, the same order
    /// `authenticate` used to do inline.
    pub fn find_by_name(&self, name: &str, len: usize) -> Option<Principal> {
        let candidate = name.get(..len)?;
        self.by_uid
            .iter()
            .find(|e| e.value().name == candidate)
            .map(|e| e.value().clone())
    }

    /// Verifies `name`/`password_hash`, binds `session` to the matching
    /// principal's token, and returns it. Used by the AUTH admin request.
    pub fn authenticate(
        &self,
        session: &Session,
        name: &str,
        password_hash: &[u8; 20],
    ) -> Result<Principal, AccessError> {
        let principal = self.find_by_name(name, name.len()).ok_or(AccessError::NoSuchUser(0))?;
        if &principal.password_hash != password_hash {
            return Err(AccessError::PasswordMismatch(name.to_string()));
        }
        session.set_identity(principal.auth_token, principal.uid);
        Ok(principal)
    }

    /// Resolves the principal currently bound to `session`, re-validating
    /// that the token still belongs to the uid the session authenticated
    /// as. A stale binding — the token was released and handed to a
    /// different user — surfaces `SessionClosed` rather than silently
    /// granting the new user's privileges.
    pub fn current_user(&self, session: &Session) -> Result<Principal, AccessError> {
        let token = session.auth_token();
        let expected_uid = session.uid();
        let principal = self
            .find_by_token(token)
            .ok_or(AccessError::NoSuchUser(token))?;
        if principal.uid != expected_uid {
            return Err(AccessError::SessionClosed { token, expected_uid });
        }
        Ok(principal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash(byte: u8) -> [u8; 20] {
        [byte; 20]
    }

    #[test]
    fn bootstrap_invariants() {
        let cache = UserCache::new(32);
        assert_eq!(cache.find_by_uid(GUEST_UID).expect("guest").auth_token, GUEST_TOKEN);
        assert_eq!(cache.find_by_uid(ADMIN_UID).expect("admin").auth_token, ADMIN_TOKEN);
        assert!(cache.drop_user(GUEST_UID).is_err());
        assert!(cache.drop_user(ADMIN_UID).is_err());
    }

    #[test]
    fn token_reuse_after_drop() {
        let cache = UserCache::new(16);
        let mut created = Vec::new();
        for i in 0..10 {
            created.push(
                cache
                    .create_user(format!("u{i}"), hash(i as u8), ADMIN_UID, Privilege::READ)
                    .expect("room for 10 users"),
            );
        }
        let fifth = &created[4];
        cache.drop_user(fifth.uid).expect("drop #5");

        let eleventh = cache
            .create_user("u11".to_string(), hash(11), ADMIN_UID, Privilege::READ)
            .expect("slot freed by drop");
        assert_eq!(eleventh.auth_token, fifth.auth_token);
    }

    #[test]
    fn current_user_detects_recycled_token() {
        let cache = UserCache::new(16);
        let first = cache
            .create_user("alice".to_string(), hash(1), ADMIN_UID, Privilege::READ)
            .expect("created");
        let session = Session::new(3, 0xdead_beef);
        cache
            .authenticate(&session, "alice", &hash(1))
            .expect("auth ok");
        assert_eq!(cache.current_user(&session).expect("valid").uid, first.uid);

        cache.drop_user(first.uid).expect("drop alice");
        cache
            .create_user("bob".to_string(), hash(2), ADMIN_UID, Privilege::READ)
            .expect("reuses alice's token");

        match cache.current_user(&session) {
            Err(AccessError::SessionClosed { .. }) => {}
            other => panic!("expected SessionClosed, got {other:?}"),
        }
    }

    #[test]
    fn find_by_name_resolves_a_created_user() {
        let cache = UserCache::new(16);
        let created = cache
            .create_user("alice".to_string(), hash(1), ADMIN_UID, Privilege::READ)
            .expect("created");
        let found = cache.find_by_name("alice", 5).expect("found by name");
        assert_eq!(found.uid, created.uid);
        assert!(cache.find_by_name("alice", 3).is_none());
    }

    #[test]
    fn authenticate_rejects_wrong_password() {
        let cache = UserCache::new(16);
        cache
            .create_user("alice".to_string(), hash(1), ADMIN_UID, Privilege::READ)
            .expect("created");
        let session = Session::new(4, 1);
        let err = cache
            .authenticate(&session, "alice", &hash(9))
            .expect_err("wrong password");
        assert!(matches!(err, AccessError::PasswordMismatch(_)));
    }
}
