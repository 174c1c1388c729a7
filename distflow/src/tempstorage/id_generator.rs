// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Unique key prefixes for processors writing to temp storage

use std::sync::atomic::{AtomicU64, Ordering};

/// Generates IDs unique to this process lifetime. Each processor that spills
/// uses one as the prefix of its slice of the temp key space.
#[derive(Debug, Default)]
pub struct TempStorageIdGenerator {
    next_id: AtomicU64,
}

impl TempStorageIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generate a new unique ID
    pub fn new_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Highest ID handed out so far
    pub fn high_water_mark(&self) -> u64 {
        self.next_id.load(Ordering::SeqCst)
    }
}

/// Key prefix for a temp storage ID. Big-endian so prefixes of different IDs
/// never overlap and sort by ID.
pub fn prefix_for(id: u64) -> [u8; 8] {
    id.to_be_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn test_ids_start_after_zero() {
        let gen = TempStorageIdGenerator::new();
        assert_eq!(gen.new_id(), 1);
        assert_eq!(gen.new_id(), 2);
        assert_eq!(gen.high_water_mark(), 2);
    }

    #[test]
    fn test_concurrent_ids_are_distinct_and_contiguous() {
        let gen = Arc::new(TempStorageIdGenerator::new());
        let before = {
            gen.new_id();
            gen.new_id();
            gen.high_water_mark()
        };

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let gen = gen.clone();
                std::thread::spawn(move || (0..500).map(|_| gen.new_id()).collect::<Vec<_>>())
            })
            .collect();

        let ids: HashSet<u64> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        assert_eq!(ids.len(), 4000);
        let expected: HashSet<u64> = (before + 1..=before + 4000).collect();
        assert_eq!(ids, expected);
    }

    #[test]
    fn test_prefixes_are_disjoint() {
        assert_ne!(prefix_for(1), prefix_for(256));
        assert!(prefix_for(1) < prefix_for(2));
    }
}
