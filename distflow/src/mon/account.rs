// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Bound accounts drawn against a memory monitor

use super::monitor::MemoryMonitor;
use crate::error::Result;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// A ledger of memory used by one owner (a flow or a processor).
///
/// Every byte recorded here is reserved on the monitor. The account hands its
/// usage back when cleared, closed, or dropped.
pub struct BoundAccount {
    monitor: Arc<MemoryMonitor>,
    used: AtomicUsize,
}

impl std::fmt::Debug for BoundAccount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundAccount")
            .field("monitor", &self.monitor.name())
            .field("used", &self.used())
            .finish()
    }
}

impl BoundAccount {
    pub(crate) fn new(monitor: Arc<MemoryMonitor>) -> Self {
        Self {
            monitor,
            used: AtomicUsize::new(0),
        }
    }

    /// Record `bytes` more usage.
    ///
    /// # Returns
    /// - `Ok(())` if the monitor accepted the reservation
    /// - `Err(FlowError::MemoryLimitExceeded)` otherwise; usage is unchanged
    pub fn grow(&self, bytes: usize) -> Result<()> {
        self.monitor.reserve(bytes)?;
        self.used.fetch_add(bytes, Ordering::SeqCst);
        Ok(())
    }

    /// Release up to `bytes` of recorded usage
    pub fn shrink(&self, bytes: usize) {
        let previous = match self
            .used
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |used| {
                Some(used.saturating_sub(bytes))
            }) {
            Ok(previous) | Err(previous) => previous,
        };
        self.monitor.release(previous.min(bytes));
    }

    /// Change a previous reservation of `old` bytes into one of `new` bytes
    pub fn resize(&self, old: usize, new: usize) -> Result<()> {
        if new > old {
            self.grow(new - old)
        } else {
            self.shrink(old - new);
            Ok(())
        }
    }

    /// Release everything recorded so far; the account stays usable
    pub fn clear(&self) {
        let used = self.used.swap(0, Ordering::SeqCst);
        self.monitor.release(used);
    }

    /// Release everything. Closing twice is harmless.
    pub fn close(&self) {
        self.clear();
    }

    pub fn used(&self) -> usize {
        self.used.load(Ordering::SeqCst)
    }

    pub fn monitor(&self) -> &Arc<MemoryMonitor> {
        &self.monitor
    }
}

impl Drop for BoundAccount {
    fn drop(&mut self) {
        self.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FlowError;

    #[test]
    fn test_bound_account_basic() {
        let monitor = MemoryMonitor::new_root("test", 1000, 0);
        let acc = monitor.make_bound_account();

        assert!(acc.grow(100).is_ok());
        assert!(acc.grow(200).is_ok());
        assert_eq!(acc.used(), 300);
        assert_eq!(monitor.allocated(), 300);

        acc.shrink(100);
        assert_eq!(acc.used(), 200);
        assert_eq!(monitor.allocated(), 200);
    }

    #[test]
    fn test_failed_grow_leaves_usage_unchanged() {
        let monitor = MemoryMonitor::new_root("test", 1000, 0);
        let acc = monitor.make_bound_account();

        acc.grow(900).unwrap();
        let result = acc.grow(200);
        assert!(matches!(result, Err(FlowError::MemoryLimitExceeded { .. })));
        assert_eq!(acc.used(), 900);
        assert_eq!(monitor.allocated(), 900);
    }

    #[test]
    fn test_accounts_share_monitor_budget() {
        let monitor = MemoryMonitor::new_root("test", 1000, 0);
        let a = monitor.make_bound_account();
        let b = monitor.make_bound_account();

        a.grow(600).unwrap();
        assert!(b.grow(500).is_err());
        b.grow(400).unwrap();
        assert_eq!(monitor.allocated(), 1000);
        assert_eq!(a.used() + b.used(), monitor.allocated());
    }

    #[test]
    fn test_resize_and_over_shrink() {
        let monitor = MemoryMonitor::new_root("test", 1000, 0);
        let acc = monitor.make_bound_account();

        acc.grow(100).unwrap();
        acc.resize(100, 400).unwrap();
        assert_eq!(acc.used(), 400);
        acc.resize(400, 50).unwrap();
        assert_eq!(acc.used(), 50);

        // Shrinking past zero only releases what was recorded.
        acc.shrink(500);
        assert_eq!(acc.used(), 0);
        assert_eq!(monitor.allocated(), 0);
    }

    #[test]
    fn test_drop_and_close_release_usage() {
        let monitor = MemoryMonitor::new_root("test", 1000, 0);
        {
            let acc = monitor.make_bound_account();
            acc.grow(300).unwrap();
        }
        assert_eq!(monitor.allocated(), 0);

        let acc = monitor.make_bound_account();
        acc.grow(300).unwrap();
        acc.close();
        acc.close();
        assert_eq!(monitor.allocated(), 0);
    }

    #[test]
    fn test_grow_after_monitor_stop_leaves_root_untouched() {
        let root = MemoryMonitor::new_root("distsql", 1000, 0);
        let flow = MemoryMonitor::new_child("flow", &root, None, 0);
        let acc = flow.make_bound_account();
        acc.grow(50).unwrap();

        flow.stop();
        assert_eq!(root.allocated(), 0);

        assert!(acc.grow(100).is_err());
        assert_eq!(acc.used(), 50);
        drop(acc);
        assert_eq!(root.allocated(), 0);
    }

    #[test]
    fn test_concurrent_grow_never_exceeds_budget() {
        let monitor = MemoryMonitor::new_root("test", 10_000, 0);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let monitor = monitor.clone();
                std::thread::spawn(move || {
                    let acc = monitor.make_bound_account();
                    let mut granted = 0;
                    for _ in 0..1000 {
                        if acc.grow(10).is_ok() {
                            granted += 10;
                        }
                    }
                    assert_eq!(acc.used(), granted);
                    std::mem::forget(acc);
                    granted
                })
            })
            .collect();
        let total: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(total, 10_000);
        assert_eq!(monitor.allocated(), 10_000);
    }
}
