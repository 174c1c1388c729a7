// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Node identity

use crate::ids::NodeId;
use std::sync::atomic::{AtomicU32, Ordering};

/// Holds the node ID once the cluster has assigned one.
///
/// Flows must never be set up before the ID is known; `get` returns
/// [`NodeId::UNSET`] until then.
#[derive(Debug, Default)]
pub struct NodeIdContainer {
    id: AtomicU32,
}

impl NodeIdContainer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resolved(id: NodeId) -> Self {
        let container = Self::new();
        container.set(id);
        container
    }

    pub fn get(&self) -> NodeId {
        NodeId(self.id.load(Ordering::SeqCst))
    }

    /// Record the node ID. Resetting to a different value is refused and
    /// logged.
    pub fn set(&self, id: NodeId) {
        match self
            .id
            .compare_exchange(0, id.0, Ordering::SeqCst, Ordering::SeqCst)
        {
            Ok(_) => log::info!("node id resolved to {}", id),
            Err(current) if current == id.0 => {}
            Err(current) => log::error!(
                "node id already set to n{}; refusing to change it to {}",
                current,
                id
            ),
        }
    }
}
