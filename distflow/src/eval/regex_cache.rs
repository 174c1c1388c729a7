// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Compiled regular expressions shared by every flow on the node

use parking_lot::Mutex;
use regex::Regex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Bounded least-recently-used cache of compiled patterns
pub struct RegexpCache {
    capacity: usize,
    inner: Mutex<CacheInner>,
    hits: AtomicU64,
    misses: AtomicU64,
}

#[derive(Default)]
struct CacheInner {
    entries: HashMap<String, Arc<Regex>>,
    /// Most recently used at the back
    order: VecDeque<String>,
}

impl RegexpCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(CacheInner::default()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Return the compiled form of `pattern`, compiling it on a miss
    pub fn get_or_compile(&self, pattern: &str) -> Result<Arc<Regex>, regex::Error> {
        {
            let mut inner = self.inner.lock();
            if let Some(re) = inner.entries.get(pattern).cloned() {
                inner.touch(pattern);
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(re);
            }
        }

        // Compile outside the lock.
        self.misses.fetch_add(1, Ordering::Relaxed);
        let compiled = Arc::new(Regex::new(pattern)?);

        let mut inner = self.inner.lock();
        if let Some(existing) = inner.entries.get(pattern).cloned() {
            inner.touch(pattern);
            return Ok(existing);
        }
        while inner.entries.len() >= self.capacity {
            match inner.order.pop_front() {
                Some(evicted) => {
                    inner.entries.remove(&evicted);
                }
                None => break,
            }
        }
        inner
            .entries
            .insert(pattern.to_string(), compiled.clone());
        inner.order.push_back(pattern.to_string());
        Ok(compiled)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}

impl CacheInner {
    fn touch(&mut self, pattern: &str) {
        if let Some(pos) = self.order.iter().position(|p| p == pattern) {
            if let Some(key) = self.order.remove(pos) {
                self.order.push_back(key);
            }
        }
    }
}
