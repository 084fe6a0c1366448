// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Fixed-capacity bitmap allocator for the dense 1-byte auth-token space.
//! A *set* bit denotes a free slot, mirroring the `user_map_t` bitmap in
//! the original `access.cc`: allocation picks the lowest free bit and
//! release flips it back on.

use crate::access::privilege::AccessError;
use crate::cfg::config::TOKEN_SLOTS_MAX;

const WORD_BITS: usize = u64::BITS as usize;

/// Allocates and reclaims dense `u8` token slots in `[0, capacity)`.
///
/// Allocation is stable within a bitmap word: successive `acquire()` calls
/// without an intervening `release()` return strictly increasing tokens as
/// long as they land in the same word, because find-first-set always
/// returns the lowest remaining free bit.
#[derive(Debug)]
pub struct TokenAllocator {
    /// One bit per slot; `1` = free, `0` = taken. Capacity is always a
    /// multiple of `WORD_BITS`; trailing unused bits above `capacity` are
    /// kept permanently clear so they never get handed out.
    words: Vec<u64>,
    capacity: usize,
    /// Index of the first word that might still contain a free bit; only
    /// ever advances, so a fully-drained low word is never rescanned.
    hint_word: usize,
}

impl TokenAllocator {
    /// Builds an allocator with `capacity` slots, all initially free.
    ///
    /// # Panics
    /// Panics if `capacity` is 0 or exceeds [`TOKEN_SLOTS_MAX`] — both are
    /// configuration errors that should be caught by `Config::validate`
    /// long before this constructor runs.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0 && capacity <= TOKEN_SLOTS_MAX);
        let word_count = capacity.div_ceil(WORD_BITS);
        let mut words = vec![u64::MAX; word_count];
        // Clear bits at/above `capacity` in the last word so they can
        // never be allocated.
        let used_bits_in_last = capacity - (word_count - 1) * WORD_BITS;
        if used_bits_in_last < WORD_BITS {
            let mask = (1u64 << used_bits_in_last) - 1;
            if let Some(last) = words.last_mut() {
                *last &= mask;
            }
        }
        Self {
            words,
            capacity,
            hint_word: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the lowest free token, marking it taken, or
    /// `AccessError::UserMax` if the domain is exhausted.
    pub fn acquire(&mut self) -> Result<u8, AccessError> {
        for word_idx in self.hint_word..self.words.len() {
            let word = self.words[word_idx];
            if word == 0 {
                if word_idx == self.hint_word {
                    self.hint_word += 1;
                }
                continue;
            }
            let bit = word.trailing_zeros() as usize;
            self.words[word_idx] &= word - 1; // clear lowest set bit
            let token = word_idx * WORD_BITS + bit;
            return u8::try_from(token).map_err(|_| AccessError::UserMax(self.capacity));
        }
        Err(AccessError::UserMax(self.capacity))
    }

    /// Marks `token` free again. Does not renumber or compact anything.
    pub fn release(&mut self, token: u8) {
        let token = token as usize;
        debug_assert!(token < self.capacity);
        let word_idx = token / WORD_BITS;
        let bit = token % WORD_BITS;
        self.words[word_idx] |= 1u64 << bit;
        if word_idx < self.hint_word {
            self.hint_word = word_idx;
        }
    }

    /// True if `token` is currently allocated.
    pub fn is_taken(&self, token: u8) -> bool {
        let token = token as usize;
        if token >= self.capacity {
            return false;
        }
        let word_idx = token / WORD_BITS;
        let bit = token % WORD_BITS;
        self.words[word_idx] & (1u64 << bit) == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_is_monotonic_within_first_word() {
        let mut alloc = TokenAllocator::new(32);
        let mut prev = None;
        for _ in 0..10 {
            let tok = alloc.acquire().expect("slots available");
            if let Some(p) = prev {
                assert!(tok > p, "acquire must be monotonic without release");
            }
            prev = Some(tok);
        }
    }

    #[test]
    fn release_then_reacquire_reuses_slot() {
        let mut alloc = TokenAllocator::new(8);
        let tokens: Vec<u8> = (0..8).map(|_| alloc.acquire().expect("ok")).collect();
        assert!(alloc.acquire().is_err(), "capacity exhausted");

        alloc.release(tokens[3]);
        let reused = alloc.acquire().expect("slot freed");
        assert_eq!(reused, tokens[3]);
    }

    #[test]
    fn exhaustion_is_user_max() {
        let mut alloc = TokenAllocator::new(2);
        alloc.acquire().expect("slot 0");
        alloc.acquire().expect("slot 1");
        match alloc.acquire() {
            Err(AccessError::UserMax(cap)) => assert_eq!(cap, 2),
            other => panic!("expected UserMax, got {other:?}"),
        }
    }

    #[test]
    fn crossing_a_word_boundary_keeps_scanning() {
        let mut alloc = TokenAllocator::new(70);
        for _ in 0..64 {
            alloc.acquire().expect("within first word");
        }
        let tok = alloc.acquire().expect("second word has free bits");
        assert_eq!(tok, 64);
    }
}
