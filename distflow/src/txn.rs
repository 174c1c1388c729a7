// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Transaction descriptors and key/value store handles
//!
//! The transactional store itself lives outside this crate. Flows only carry
//! the descriptor of the transaction they run in and the two store handles
//! the node was configured with.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Hybrid logical clock timestamp
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct HlcTimestamp {
    pub wall_time: i64,
    pub logical: i32,
}

impl fmt::Display for HlcTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:010}", self.wall_time, self.logical)
    }
}

/// The transaction a flow reads and writes in, as sent by the gateway
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxnDescriptor {
    pub id: Uuid,
    pub name: String,
    pub timestamp: HlcTimestamp,
}

impl TxnDescriptor {
    pub fn new(name: impl Into<String>, timestamp: HlcTimestamp) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            timestamp,
        }
    }
}

/// Handle to the cluster's transactional key/value store
pub trait KvDb: Send + Sync {
    /// Label used in logs
    fn label(&self) -> &str;

    /// Whether requests sent through this handle go through the local
    /// transaction coordinator. The handle flows use for their own reads and
    /// writes must bypass it; only the gateway's coordinator tracks the
    /// transaction.
    fn uses_txn_coordinator(&self) -> bool;
}

/// A named store handle with a fixed coordinator setting
#[derive(Debug, Clone)]
pub struct StaticKvDb {
    label: String,
    coordinated: bool,
}

impl StaticKvDb {
    /// Handle that participates in normal transaction coordination
    pub fn coordinated(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            coordinated: true,
        }
    }

    /// Handle that bypasses the local transaction coordinator
    pub fn bypassing_coordinator(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            coordinated: false,
        }
    }
}

impl KvDb for StaticKvDb {
    fn label(&self) -> &str {
        &self.label
    }

    fn uses_txn_coordinator(&self) -> bool {
        self.coordinated
    }
}
