// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Per-flow execution environment

use crate::config::Settings;
use crate::error::Result;
use crate::eval::EvalContext;
use crate::ids::{FlowId, NodeId};
use crate::mon::BoundAccount;
use crate::rpc::NodeDialer;
use crate::tempstorage::{TempStorage, TempStorageIdGenerator};
use crate::txn::{KvDb, TxnDescriptor};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Hook run with the flow id; an error aborts the operation it guards
pub type FlowHook = Arc<dyn Fn(FlowId) -> Result<()> + Send + Sync>;

/// Hooks that let tests observe or perturb flow execution
#[derive(Clone, Default)]
pub struct TestingKnobs {
    /// Runs when a flow is about to start its processors
    pub before_flow_start: Option<FlowHook>,
}

impl fmt::Debug for TestingKnobs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestingKnobs")
            .field("before_flow_start", &self.before_flow_start.is_some())
            .finish()
    }
}

/// Everything the processors of one flow share. Owned by the flow and
/// dropped with it.
pub struct FlowContext {
    pub id: FlowId,
    pub eval_ctx: EvalContext,
    pub txn: TxnDescriptor,
    /// Store handle going through the transaction coordinator
    pub client_db: Arc<dyn KvDb>,
    /// Store handle bypassing the coordinator, for the flow's own reads and writes
    pub remote_txn_db: Arc<dyn KvDb>,
    pub node_id: NodeId,
    pub temp_storage: Option<Arc<dyn TempStorage>>,
    pub temp_storage_ids: Arc<TempStorageIdGenerator>,
    pub settings: Arc<Settings>,
    pub dialer: Arc<dyn NodeDialer>,
    /// How long peers may take to connect the flow's inbound streams
    pub stream_timeout: Duration,
    pub testing_knobs: TestingKnobs,
}

impl FlowContext {
    /// Prefix for log lines about this flow
    pub fn log_tag(&self) -> String {
        format!("[{},f{}]", self.node_id, self.id.short())
    }

    /// Open an account for one processor on the flow's monitor
    pub fn new_processor_account(&self) -> BoundAccount {
        self.eval_ctx.monitor.make_bound_account()
    }
}

impl fmt::Debug for FlowContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlowContext")
            .field("id", &self.id)
            .field("node_id", &self.node_id)
            .field("txn", &self.txn)
            .field("client_db", &self.client_db.label())
            .field("remote_txn_db", &self.remote_txn_db.label())
            .field("has_temp_storage", &self.temp_storage.is_some())
            .field("stream_timeout", &self.stream_timeout)
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::error::FlowError;
    use crate::eval::{Location, RegexpCache};
    use crate::mon::MemoryMonitor;
    use crate::rpc::FlowStreamClient;
    use crate::txn::{HlcTimestamp, StaticKvDb};
    use async_trait::async_trait;

    /// Dialer for flows that never open outbound streams
    pub(crate) struct NoRouteDialer;

    #[async_trait]
    impl NodeDialer for NoRouteDialer {
        async fn dial_flow_stream(&self, node: NodeId) -> Result<Box<dyn FlowStreamClient>> {
            Err(FlowError::Transport(format!("no route to {}", node)))
        }
    }

    /// A context on a fresh child of `parent`
    pub(crate) fn test_context(parent: &Arc<MemoryMonitor>, stream_timeout: Duration) -> FlowContext {
        let monitor = MemoryMonitor::new_child("flow", parent, None, 0);
        let account = Arc::new(monitor.make_bound_account());
        let eval_ctx = EvalContext::new(
            Location::Utc,
            "test".to_string(),
            Vec::new(),
            uuid::Uuid::nil(),
            NodeId(1),
            Arc::new(RegexpCache::new(8)),
            monitor,
            account,
        );
        FlowContext {
            id: FlowId::new(),
            eval_ctx,
            txn: TxnDescriptor::new("test", HlcTimestamp::default()),
            client_db: Arc::new(StaticKvDb::coordinated("db")),
            remote_txn_db: Arc::new(StaticKvDb::bypassing_coordinator("flow db")),
            node_id: NodeId(1),
            temp_storage: None,
            temp_storage_ids: Arc::new(TempStorageIdGenerator::new()),
            settings: Arc::new(Settings::default()),
            dialer: Arc::new(NoRouteDialer),
            stream_timeout,
            testing_knobs: TestingKnobs::default(),
        }
    }
}
