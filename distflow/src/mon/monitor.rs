// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Budgeted memory monitors
//!
//! Monitors form a tree: one root per node, one child per flow. Every byte
//! reserved on a child is also reserved on each ancestor, so a child can never
//! hand out more than its parent has left.

use super::account::BoundAccount;
use crate::error::{FlowError, Result};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// A node in the memory monitor tree
///
/// # Usage
/// ```ignore
/// let root = MemoryMonitor::new_root("distsql", 1 << 30, 10 * 1024);
/// let flow_mon = MemoryMonitor::new_child("flow", &root, None, 10 * 1024);
/// let acc = flow_mon.make_bound_account();
/// acc.grow(4096)?;
/// ```
pub struct MemoryMonitor {
    name: String,

    /// Own budget in bytes; `usize::MAX` means bounded only by the parent
    limit: usize,

    parent: Option<Arc<MemoryMonitor>>,

    /// Bytes currently reserved through this monitor
    allocated: AtomicUsize,

    /// High-water mark
    peak: AtomicUsize,

    /// Usage above which growth is logged; zero disables it
    noteworthy_bytes: usize,

    /// Next high-water mark that triggers a noteworthy log line
    next_noteworthy: AtomicUsize,

    noteworthy_events: AtomicU64,

    stopped: AtomicBool,

    /// Held shared by reservations and releases, exclusively by `stop`
    gate: RwLock<()>,
}

impl std::fmt::Debug for MemoryMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryMonitor")
            .field("name", &self.name)
            .field("limit", &self.limit)
            .field("allocated", &self.allocated())
            .field("peak", &self.peak())
            .field("has_parent", &self.parent.is_some())
            .finish()
    }
}

impl MemoryMonitor {
    /// Create a root monitor with an absolute budget
    pub fn new_root(name: impl Into<String>, limit: usize, noteworthy_bytes: usize) -> Arc<Self> {
        Arc::new(Self::build(name.into(), limit, None, noteworthy_bytes))
    }

    /// Start a monitor that draws its budget from `parent`.
    ///
    /// `limit` caps the child below what the parent could provide; `None`
    /// leaves it bounded by the parent alone.
    pub fn new_child(
        name: impl Into<String>,
        parent: &Arc<MemoryMonitor>,
        limit: Option<usize>,
        noteworthy_bytes: usize,
    ) -> Arc<Self> {
        Arc::new(Self::build(
            name.into(),
            limit.unwrap_or(usize::MAX),
            Some(parent.clone()),
            noteworthy_bytes,
        ))
    }

    fn build(
        name: String,
        limit: usize,
        parent: Option<Arc<MemoryMonitor>>,
        noteworthy_bytes: usize,
    ) -> Self {
        Self {
            name,
            limit,
            parent,
            allocated: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            noteworthy_bytes,
            next_noteworthy: AtomicUsize::new(noteworthy_bytes),
            noteworthy_events: AtomicU64::new(0),
            stopped: AtomicBool::new(false),
            gate: RwLock::new(()),
        }
    }

    /// Open a new bound account drawing on this monitor
    pub fn make_bound_account(self: &Arc<Self>) -> BoundAccount {
        BoundAccount::new(self.clone())
    }

    /// Reserve `bytes` on this monitor and all of its ancestors.
    ///
    /// Either every level accepts the reservation or none keeps it. A
    /// stopped monitor refuses everything, since nothing it hands out could
    /// be returned.
    pub(crate) fn reserve(&self, bytes: usize) -> Result<()> {
        if bytes == 0 {
            return Ok(());
        }
        let _gate = self.gate.read();
        if self.stopped.load(Ordering::SeqCst) {
            return Err(FlowError::MonitorStopped(self.name.clone()));
        }
        let limit = self.limit;
        let previous = self
            .allocated
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                current.checked_add(bytes).filter(|total| *total <= limit)
            })
            .map_err(|current| FlowError::MemoryLimitExceeded {
                monitor: self.name.clone(),
                requested: bytes,
                used: current,
                limit,
            })?;

        if let Some(parent) = &self.parent {
            if let Err(err) = parent.reserve(bytes) {
                self.allocated.fetch_sub(bytes, Ordering::SeqCst);
                return Err(err);
            }
        }

        let total = previous + bytes;
        self.peak.fetch_max(total, Ordering::SeqCst);
        self.maybe_report_noteworthy(total);
        Ok(())
    }

    /// Return `bytes` to this monitor and its ancestors
    pub(crate) fn release(&self, bytes: usize) {
        let _gate = self.gate.read();
        if bytes == 0 || self.stopped.load(Ordering::SeqCst) {
            return;
        }
        let released = match self
            .allocated
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                Some(current.saturating_sub(bytes))
            }) {
            Ok(previous) | Err(previous) => previous.min(bytes),
        };
        if released < bytes {
            log::error!(
                "{}: releasing {} bytes but only {} were allocated",
                self.name,
                bytes,
                released
            );
        }
        if let Some(parent) = &self.parent {
            parent.release(released);
        }
    }

    fn maybe_report_noteworthy(&self, total: usize) {
        if self.noteworthy_bytes == 0 {
            return;
        }
        let threshold = self.next_noteworthy.load(Ordering::SeqCst);
        if total < threshold {
            return;
        }
        // Only the caller that moves the threshold reports.
        let next = total.saturating_mul(2);
        if self
            .next_noteworthy
            .compare_exchange(threshold, next, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            self.noteworthy_events.fetch_add(1, Ordering::SeqCst);
            log::info!(
                "{}: memory usage increases to {}",
                self.name,
                MemoryStats::format_bytes(total)
            );
        }
    }

    /// Stop the monitor. Leftover reservations are logged and handed back to
    /// the parent. Calling it more than once is a no-op.
    pub fn stop(&self) {
        let _gate = self.gate.write();
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        let leftover = self.allocated.swap(0, Ordering::SeqCst);
        if leftover > 0 {
            log::error!(
                "{}: unexpected {} leftover bytes at stop",
                self.name,
                leftover
            );
            if let Some(parent) = &self.parent {
                parent.release(leftover);
            }
        }
        log::debug!(
            "{}: memory usage peaked at {}",
            self.name,
            MemoryStats::format_bytes(self.peak())
        );
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn allocated(&self) -> usize {
        self.allocated.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Number of times usage crossed the noteworthy threshold
    pub fn noteworthy_events(&self) -> u64 {
        self.noteworthy_events.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> MemoryStats {
        MemoryStats {
            limit: self.limit,
            allocated: self.allocated(),
            peak: self.peak(),
            available: self.limit.saturating_sub(self.allocated()),
        }
    }
}

/// Memory usage statistics
#[derive(Debug, Clone, serde::Serialize)]
pub struct MemoryStats {
    pub limit: usize,
    pub allocated: usize,
    pub peak: usize,
    pub available: usize,
}

impl MemoryStats {
    /// Format as human-readable string
    pub fn format_human_readable(&self) -> String {
        if self.limit == usize::MAX {
            return format!(
                "Memory: {} (unbounded), Peak: {}",
                Self::format_bytes(self.allocated),
                Self::format_bytes(self.peak)
            );
        }
        format!(
            "Memory: {}/{} ({:.1}%), Peak: {}",
            Self::format_bytes(self.allocated),
            Self::format_bytes(self.limit),
            (self.allocated as f64 / self.limit as f64) * 100.0,
            Self::format_bytes(self.peak)
        )
    }

    /// Format bytes as human-readable (KB, MB, GB)
    pub(crate) fn format_bytes(bytes: usize) -> String {
        const KB: usize = 1024;
        const MB: usize = KB * 1024;
        const GB: usize = MB * 1024;

        if bytes >= GB {
            format!("{:.2}GB", bytes as f64 / GB as f64)
        } else if bytes >= MB {
            format!("{:.2}MB", bytes as f64 / MB as f64)
        } else if bytes >= KB {
            format!("{:.2}KB", bytes as f64 / KB as f64)
        } else {
            format!("{}B", bytes)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_reservations_reach_root() {
        let root = MemoryMonitor::new_root("root", 1000, 0);
        let child = MemoryMonitor::new_child("flow", &root, None, 0);

        child.reserve(300).unwrap();
        assert_eq!(child.allocated(), 300);
        assert_eq!(root.allocated(), 300);

        child.release(100);
        assert_eq!(child.allocated(), 200);
        assert_eq!(root.allocated(), 200);
    }

    #[test]
    fn test_parent_budget_bounds_child() {
        let root = MemoryMonitor::new_root("root", 1000, 0);
        let a = MemoryMonitor::new_child("a", &root, None, 0);
        let b = MemoryMonitor::new_child("b", &root, None, 0);

        a.reserve(700).unwrap();
        let err = b.reserve(400).unwrap_err();
        assert!(matches!(
            err,
            FlowError::MemoryLimitExceeded { ref monitor, .. } if monitor == "root"
        ));
        // The failed reservation leaves no trace on either level.
        assert_eq!(b.allocated(), 0);
        assert_eq!(root.allocated(), 700);
    }

    #[test]
    fn test_child_limit_below_parent() {
        let root = MemoryMonitor::new_root("root", 1000, 0);
        let child = MemoryMonitor::new_child("flow", &root, Some(100), 0);

        let err = child.reserve(101).unwrap_err();
        assert!(matches!(
            err,
            FlowError::MemoryLimitExceeded { limit: 100, requested: 101, .. }
        ));
        assert_eq!(root.allocated(), 0);
    }

    #[test]
    fn test_stop_returns_leftover_to_parent() {
        let root = MemoryMonitor::new_root("root", 1000, 0);
        let child = MemoryMonitor::new_child("flow", &root, None, 0);
        child.reserve(250).unwrap();

        child.stop();
        assert!(child.is_stopped());
        assert_eq!(child.allocated(), 0);
        assert_eq!(root.allocated(), 0);

        // Late releases after stop must not touch the parent again.
        child.release(250);
        assert_eq!(root.allocated(), 0);
        child.stop();
    }

    #[test]
    fn test_stopped_monitor_refuses_reservations() {
        let root = MemoryMonitor::new_root("root", 1000, 0);
        let child = MemoryMonitor::new_child("flow", &root, None, 0);
        child.stop();

        let err = child.reserve(100).unwrap_err();
        assert!(matches!(err, FlowError::MonitorStopped(ref name) if name == "flow"));
        assert!(!err.is_out_of_memory());
        assert_eq!(child.allocated(), 0);
        assert_eq!(root.allocated(), 0);
    }

    #[test]
    fn test_noteworthy_usage_reported_on_doubling() {
        let root = MemoryMonitor::new_root("root", usize::MAX, 100);

        root.reserve(50).unwrap();
        assert_eq!(root.noteworthy_events(), 0);

        root.reserve(60).unwrap(); // 110 crosses 100
        assert_eq!(root.noteworthy_events(), 1);

        root.reserve(50).unwrap(); // 160 < 220
        assert_eq!(root.noteworthy_events(), 1);

        root.reserve(100).unwrap(); // 260 crosses 220
        assert_eq!(root.noteworthy_events(), 2);
    }

    #[test]
    fn test_peak_tracking() {
        let root = MemoryMonitor::new_root("root", 1000, 0);
        root.reserve(400).unwrap();
        root.release(300);
        root.reserve(100).unwrap();
        assert_eq!(root.allocated(), 200);
        assert_eq!(root.peak(), 400);
    }

    #[test]
    fn test_memory_stats_format() {
        let root = MemoryMonitor::new_root("root", 100 * 1024 * 1024, 0);
        root.reserve(50 * 1024 * 1024).unwrap();

        let formatted = root.stats().format_human_readable();
        assert!(formatted.contains("50.00MB"));
        assert!(formatted.contains("100.00MB"));
        assert!(formatted.contains("50.0%"));
    }
}
