// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Expression evaluation context for a flow

use super::location::Location;
use super::regex_cache::RegexpCache;
use crate::ids::NodeId;
use crate::mon::{BoundAccount, MemoryMonitor};
use crate::txn::HlcTimestamp;
use chrono::{DateTime, TimeZone, Utc};
use std::sync::Arc;
use uuid::Uuid;

/// Everything expressions need to evaluate consistently across the nodes
/// of one query. Timestamps are fixed by the gateway, not read from the
/// local clock.
pub struct EvalContext {
    pub location: Location,
    pub database: String,
    pub search_path: Vec<String>,
    pub cluster_id: Uuid,
    pub node_id: NodeId,
    pub re_cache: Arc<RegexpCache>,
    pub monitor: Arc<MemoryMonitor>,
    /// Account for memory used by the flow outside of its processors
    pub active_mem_acc: Arc<BoundAccount>,
    stmt_timestamp: DateTime<Utc>,
    txn_timestamp: DateTime<Utc>,
    cluster_timestamp: HlcTimestamp,
}

impl std::fmt::Debug for EvalContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvalContext")
            .field("location", &self.location)
            .field("database", &self.database)
            .field("search_path", &self.search_path)
            .field("node_id", &self.node_id)
            .field("stmt_timestamp", &self.stmt_timestamp)
            .field("txn_timestamp", &self.txn_timestamp)
            .field("cluster_timestamp", &self.cluster_timestamp)
            .finish()
    }
}

impl EvalContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        location: Location,
        database: String,
        search_path: Vec<String>,
        cluster_id: Uuid,
        node_id: NodeId,
        re_cache: Arc<RegexpCache>,
        monitor: Arc<MemoryMonitor>,
        active_mem_acc: Arc<BoundAccount>,
    ) -> Self {
        Self {
            location,
            database,
            search_path,
            cluster_id,
            node_id,
            re_cache,
            monitor,
            active_mem_acc,
            stmt_timestamp: Utc.timestamp_nanos(0),
            txn_timestamp: Utc.timestamp_nanos(0),
            cluster_timestamp: HlcTimestamp::default(),
        }
    }

    pub fn set_stmt_timestamp_nanos(&mut self, nanos: i64) {
        self.stmt_timestamp = Utc.timestamp_nanos(nanos);
    }

    pub fn set_txn_timestamp_nanos(&mut self, nanos: i64) {
        self.txn_timestamp = Utc.timestamp_nanos(nanos);
    }

    pub fn set_cluster_timestamp(&mut self, ts: HlcTimestamp) {
        self.cluster_timestamp = ts;
    }

    pub fn stmt_timestamp(&self) -> DateTime<Utc> {
        self.stmt_timestamp
    }

    pub fn txn_timestamp(&self) -> DateTime<Utc> {
        self.txn_timestamp
    }

    pub fn cluster_timestamp(&self) -> HlcTimestamp {
        self.cluster_timestamp
    }
}
