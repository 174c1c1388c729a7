// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Minimal span bookkeeping for flows
//!
//! A flow's span is opened during setup and finished during cleanup, which
//! may run on a different task than the one that opened it. Spans are
//! therefore owned values that can be finished from anywhere, exactly once.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// How a span relates to the span it was started from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpanLink {
    Root,
    ChildOf(u64),
    /// The new span may outlive the one it follows
    FollowsFrom(u64),
}

#[derive(Default)]
struct TracerInner {
    next_id: AtomicU64,
    open: AtomicU64,
    finished: AtomicU64,
}

/// Creates spans and keeps counts of open and finished ones
#[derive(Clone, Default)]
pub struct Tracer {
    inner: Arc<TracerInner>,
}

impl Tracer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a span with no parent
    pub fn start_root(&self, operation: &str) -> Span {
        self.start(operation, SpanLink::Root)
    }

    /// Start a span that follows from `parent` without being bounded by it
    pub fn start_follows_from(&self, operation: &str, parent: &Span) -> Span {
        self.start(operation, SpanLink::FollowsFrom(parent.id()))
    }

    pub fn start_child(&self, operation: &str, parent: &Span) -> Span {
        self.start(operation, SpanLink::ChildOf(parent.id()))
    }

    fn start(&self, operation: &str, link: SpanLink) -> Span {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.open.fetch_add(1, Ordering::SeqCst);
        Span {
            inner: Arc::new(SpanInner {
                id,
                operation: operation.to_string(),
                link,
                started: Instant::now(),
                finished: AtomicBool::new(false),
                events: Mutex::new(Vec::new()),
                tracer: self.inner.clone(),
            }),
        }
    }

    /// Spans started but not yet finished
    pub fn open_spans(&self) -> u64 {
        self.inner.open.load(Ordering::SeqCst)
    }

    pub fn finished_spans(&self) -> u64 {
        self.inner.finished.load(Ordering::SeqCst)
    }
}

struct SpanInner {
    id: u64,
    operation: String,
    link: SpanLink,
    started: Instant,
    finished: AtomicBool,
    events: Mutex<Vec<String>>,
    tracer: Arc<TracerInner>,
}

/// Handle to a span. Clones refer to the same span.
#[derive(Clone)]
pub struct Span {
    inner: Arc<SpanInner>,
}

impl std::fmt::Debug for Span {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Span")
            .field("id", &self.inner.id)
            .field("operation", &self.inner.operation)
            .field("link", &self.inner.link)
            .field("finished", &self.is_finished())
            .finish()
    }
}

impl Span {
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn operation(&self) -> &str {
        &self.inner.operation
    }

    pub fn link(&self) -> SpanLink {
        self.inner.link
    }

    /// Record an event. Events after finish are dropped.
    pub fn record(&self, event: impl Into<String>) {
        if !self.is_finished() {
            self.inner.events.lock().push(event.into());
        }
    }

    pub fn events(&self) -> Vec<String> {
        self.inner.events.lock().clone()
    }

    /// Finish the span. Returns false if it was already finished.
    pub fn finish(&self) -> bool {
        if self.inner.finished.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.inner.tracer.open.fetch_sub(1, Ordering::SeqCst);
        self.inner.tracer.finished.fetch_add(1, Ordering::SeqCst);
        log::trace!(
            "span {} ({}) finished after {:?}",
            self.inner.id,
            self.inner.operation,
            self.elapsed()
        );
        true
    }

    pub fn is_finished(&self) -> bool {
        self.inner.finished.load(Ordering::SeqCst)
    }

    pub fn elapsed(&self) -> Duration {
        self.inner.started.elapsed()
    }
}
