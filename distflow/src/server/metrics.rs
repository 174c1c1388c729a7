// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Server counters

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct ServerMetrics {
    flows_setup: AtomicU64,
    setup_failures: AtomicU64,
    flows_scheduled: AtomicU64,
    sync_flows_run: AtomicU64,
    inbound_streams_connected: AtomicU64,
    inbound_stream_failures: AtomicU64,
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct MetricsSnapshot {
    pub flows_setup: u64,
    pub setup_failures: u64,
    pub flows_scheduled: u64,
    pub sync_flows_run: u64,
    pub inbound_streams_connected: u64,
    pub inbound_stream_failures: u64,
}

impl ServerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_setup(&self, ok: bool) {
        if ok {
            self.flows_setup.fetch_add(1, Ordering::Relaxed);
        } else {
            self.setup_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_scheduled(&self) {
        self.flows_scheduled.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_sync_flow(&self) {
        self.sync_flows_run.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_inbound_stream(&self, ok: bool) {
        if ok {
            self.inbound_streams_connected.fetch_add(1, Ordering::Relaxed);
        } else {
            self.inbound_stream_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            flows_setup: self.flows_setup.load(Ordering::Relaxed),
            setup_failures: self.setup_failures.load(Ordering::Relaxed),
            flows_scheduled: self.flows_scheduled.load(Ordering::Relaxed),
            sync_flows_run: self.sync_flows_run.load(Ordering::Relaxed),
            inbound_streams_connected: self.inbound_streams_connected.load(Ordering::Relaxed),
            inbound_stream_failures: self.inbound_stream_failures.load(Ordering::Relaxed),
        }
    }
}
