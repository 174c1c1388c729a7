// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! The node's flow server: entry points for setting up and running flows and
//! for attaching inbound streams

use super::metrics::ServerMetrics;
use super::outbox::SyncFlowOutbox;
use super::version::check_version;
use crate::config::{ServerSettings, Settings};
use crate::error::{FlowError, Result};
use crate::eval::{EvalContext, Location, RegexpCache};
use crate::flow::{Flow, FlowContext, RowReceiver, TestingKnobs};
use crate::ids::NodeId;
use crate::mon::MemoryMonitor;
use crate::node::NodeIdContainer;
use crate::registry::{process_inbound_stream, FlowRegistry};
use crate::rpc::{
    FlowStreamServerStream, NodeDialer, RunSyncFlowServerStream, SetupFlowRequest,
    SetupFlowResponse,
};
use crate::scheduler::FlowScheduler;
use crate::stopper::Stopper;
use crate::tempstorage::{TempStorage, TempStorageIdGenerator};
use crate::trace::{Span, Tracer};
use crate::txn::{KvDb, StaticKvDb};
use std::sync::Arc;
use uuid::Uuid;

/// Collaborators and settings of a [`ServerImpl`]
#[derive(Clone)]
pub struct ServerConfig {
    pub settings: ServerSettings,
    /// Store handle going through the transaction coordinator
    pub db: Arc<dyn KvDb>,
    /// Store handle bypassing the coordinator, given to flows
    pub flow_db: Arc<dyn KvDb>,
    pub dialer: Arc<dyn NodeDialer>,
    pub stopper: Arc<Stopper>,
    pub tracer: Tracer,
    pub node_id: Arc<NodeIdContainer>,
    pub cluster_id: Uuid,
    /// Monitor the server's root monitor draws from, if any
    pub parent_memory_monitor: Option<Arc<MemoryMonitor>>,
    /// Engine processors spill to; `None` disables spilling
    pub temp_storage: Option<Arc<dyn TempStorage>>,
    pub testing_knobs: TestingKnobs,
}

impl ServerConfig {
    pub fn new(settings: ServerSettings, dialer: Arc<dyn NodeDialer>, node_id: Arc<NodeIdContainer>) -> Self {
        Self {
            settings,
            db: Arc::new(StaticKvDb::coordinated("kv")),
            flow_db: Arc::new(StaticKvDb::bypassing_coordinator("flow kv")),
            dialer,
            stopper: Arc::new(Stopper::new()),
            tracer: Tracer::new(),
            node_id,
            cluster_id: Uuid::new_v4(),
            parent_memory_monitor: None,
            temp_storage: None,
            testing_knobs: TestingKnobs::default(),
        }
    }
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("settings", &self.settings)
            .field("node_id", &self.node_id.get())
            .field("cluster_id", &self.cluster_id)
            .field("has_temp_storage", &self.temp_storage.is_some())
            .finish()
    }
}

pub struct ServerImpl {
    config: ServerConfig,
    settings: Arc<Settings>,
    registry: Arc<FlowRegistry>,
    scheduler: Arc<FlowScheduler>,
    memory_monitor: Arc<MemoryMonitor>,
    regexp_cache: Arc<RegexpCache>,
    temp_storage_ids: Arc<TempStorageIdGenerator>,
    metrics: ServerMetrics,
}

impl ServerImpl {
    pub fn new(config: ServerConfig) -> Result<Arc<Self>> {
        config.settings.validate()?;
        let settings = Arc::new(Settings::from_server_settings(&config.settings));
        let budget = config.settings.root_memory_budget_bytes;
        let noteworthy = config.settings.noteworthy_memory_bytes;
        let memory_monitor = match &config.parent_memory_monitor {
            Some(parent) => MemoryMonitor::new_child("distsql", parent, Some(budget), noteworthy),
            None => MemoryMonitor::new_root("distsql", budget, noteworthy),
        };
        let scheduler = FlowScheduler::new(config.stopper.clone(), settings.clone());
        let regexp_cache = Arc::new(RegexpCache::new(config.settings.regexp_cache_size));

        Ok(Arc::new(Self {
            settings,
            registry: FlowRegistry::new(),
            scheduler,
            memory_monitor,
            regexp_cache,
            temp_storage_ids: Arc::new(TempStorageIdGenerator::new()),
            metrics: ServerMetrics::new(),
            config,
        }))
    }

    /// Start background work. Call once before serving requests.
    pub fn start(&self) -> Result<()> {
        self.scheduler.start()?;
        log::info!(
            "flow server started on {} with a {} memory budget",
            self.config.node_id.get(),
            crate::mon::MemoryStats::format_bytes(self.memory_monitor.limit())
        );
        Ok(())
    }

    fn log_prefix(&self) -> String {
        format!("[{}]", self.config.node_id.get())
    }

    /// Validate `req` and build its flow, wired but not started.
    ///
    /// On success the caller owns the flow and must call
    /// [`Flow::cleanup`] on it exactly once. Nothing is left open on failure.
    pub fn setup_flow(
        &self,
        parent_span: Option<&Span>,
        req: &SetupFlowRequest,
        sync_output: Option<Arc<dyn RowReceiver>>,
    ) -> Result<Arc<Flow>> {
        let result = self.setup_flow_inner(parent_span, req, sync_output);
        self.metrics.record_setup(result.is_ok());
        result
    }

    fn setup_flow_inner(
        &self,
        parent_span: Option<&Span>,
        req: &SetupFlowRequest,
        sync_output: Option<Arc<dyn RowReceiver>>,
    ) -> Result<Arc<Flow>> {
        if let Err(err) = check_version(req.version) {
            log::warn!("{} {}", self.log_prefix(), err);
            return Err(err);
        }
        let node_id = self.config.node_id.get();
        if !node_id.is_set() {
            log::error!("{} setup_flow called before the node id was resolved", self.log_prefix());
            return Err(FlowError::NodeIdUnresolved);
        }

        // The flow may outlive the request that created it.
        let tracer = &self.config.tracer;
        let span = match parent_span {
            Some(parent) => tracer.start_follows_from("flow", parent),
            None => tracer.start_root("flow"),
        };

        let monitor = MemoryMonitor::new_child(
            "flow",
            &self.memory_monitor,
            self.config.settings.flow_memory_budget_bytes,
            self.config.settings.noteworthy_memory_bytes,
        );
        let account = Arc::new(monitor.make_bound_account());

        let params = &req.eval_context;
        let location = match Location::parse(&params.location) {
            Ok(location) => location,
            Err(err) => {
                // No flow owns these yet.
                account.close();
                monitor.stop();
                span.finish();
                return Err(err);
            }
        };

        let mut eval_ctx = EvalContext::new(
            location,
            params.database.clone(),
            params.search_path.clone(),
            self.config.cluster_id,
            node_id,
            self.regexp_cache.clone(),
            monitor,
            account,
        );
        eval_ctx.set_stmt_timestamp_nanos(params.stmt_timestamp_nanos);
        eval_ctx.set_txn_timestamp_nanos(params.txn_timestamp_nanos);
        eval_ctx.set_cluster_timestamp(params.cluster_timestamp);

        let ctx = FlowContext {
            id: req.flow_id(),
            eval_ctx,
            txn: req.txn.clone(),
            client_db: self.config.db.clone(),
            remote_txn_db: self.config.flow_db.clone(),
            node_id,
            temp_storage: self.config.temp_storage.clone(),
            temp_storage_ids: self.temp_storage_ids.clone(),
            settings: self.settings.clone(),
            dialer: self.config.dialer.clone(),
            stream_timeout: self.config.settings.flow_stream_timeout(),
            testing_knobs: self.config.testing_knobs.clone(),
        };
        let flow = Flow::new(ctx, span, self.registry.clone(), sync_output);
        if let Err(err) = flow.setup(&req.flow) {
            log::error!("{} {}", flow.log_tag(), err);
            flow.cleanup();
            return Err(err);
        }
        Ok(Arc::new(flow))
    }

    /// Set up a flow whose output goes to `output`. The flow is not started.
    pub fn setup_sync_flow(
        &self,
        parent_span: Option<&Span>,
        req: &SetupFlowRequest,
        output: Arc<dyn RowReceiver>,
    ) -> Result<Arc<Flow>> {
        self.setup_flow(parent_span, req, Some(output))
    }

    /// Serve the sync flow RPC: set up the flow from the first message, run
    /// it to completion with its output written to `stream`, and clean up.
    ///
    /// Returns the error the output adapter recorded, if any, even when the
    /// flow itself succeeded.
    pub async fn run_sync_flow(&self, stream: &mut dyn RunSyncFlowServerStream) -> Result<()> {
        let stopper = self.config.stopper.clone();
        stopper
            .run_task("sync flow", self.run_sync_flow_inner(stream))
            .await?
    }

    async fn run_sync_flow_inner(&self, stream: &mut dyn RunSyncFlowServerStream) -> Result<()> {
        let first = stream.recv().await?;
        let req = first
            .and_then(|msg| msg.setup_flow_request)
            .ok_or(FlowError::MissingSetupRequest)?;

        let (output, mut outbox) = SyncFlowOutbox::new();
        let flow = self.setup_sync_flow(None, &req, output)?;
        self.metrics.record_sync_flow();

        let mut result = flow.start();
        if result.is_ok() {
            let client_gone = stream.cancellation();
            let quiesce = self.config.stopper.should_quiesce();
            let run_flow = async {
                let wait = flow.wait();
                tokio::pin!(wait);
                tokio::select! {
                    result = &mut wait => result,
                    _ = client_gone.cancelled() => {
                        flow.cancel();
                        wait.await
                    }
                    _ = quiesce.cancelled() => {
                        flow.cancel();
                        wait.await
                    }
                }
            };
            let ((), flow_result) = tokio::join!(outbox.run(stream), run_flow);
            result = flow_result;
        }
        flow.cleanup();

        match outbox.take_error() {
            Some(err) => Err(err),
            None => result,
        }
    }

    /// Serve the unary setup RPC: build the flow and hand it to the
    /// scheduler. Failures are returned inside the response.
    pub fn setup_flow_rpc(&self, parent_span: Option<&Span>, req: &SetupFlowRequest) -> SetupFlowResponse {
        match self.setup_and_schedule(parent_span, req) {
            Ok(()) => SetupFlowResponse::Accepted,
            Err(err) => {
                log::warn!("{} rejecting flow {}: {}", self.log_prefix(), req.flow_id(), err);
                SetupFlowResponse::rejected(&err)
            }
        }
    }

    fn setup_and_schedule(&self, parent_span: Option<&Span>, req: &SetupFlowRequest) -> Result<()> {
        let flow = self.setup_flow(parent_span, req, None)?;
        if let Err(err) = self.scheduler.schedule_flow(flow.clone()) {
            flow.cleanup();
            return Err(err);
        }
        self.metrics.record_scheduled();
        Ok(())
    }

    /// Serve the stream-attach RPC: connect the stream named by the first
    /// message's header to its flow and feed it until the peer closes it.
    pub async fn flow_stream(&self, stream: &mut dyn FlowStreamServerStream) -> Result<()> {
        let result = self.flow_stream_inner(stream).await;
        if let Err(err) = &result {
            log::error!("{} {}", self.log_prefix(), err);
        }
        result
    }

    async fn flow_stream_inner(&self, stream: &mut dyn FlowStreamServerStream) -> Result<()> {
        let first = stream.recv().await?.ok_or(FlowError::MissingHeader)?;
        let header = first.header.ok_or(FlowError::NoHeaderInFirstMessage)?;

        let connected = self
            .registry
            .connect_inbound_stream(
                header.flow_id,
                header.stream_id,
                self.config.settings.flow_stream_timeout(),
            )
            .await;
        self.metrics.record_inbound_stream(connected.is_ok());
        let (flow, receiver, _guard) = connected?;

        let span = self.config.tracer.start_child("inbound stream", flow.span());
        log::debug!("{} inbound stream {} connected", flow.log_tag(), header.stream_id);
        let result = process_inbound_stream(&flow, stream, first, receiver).await;
        if let Err(err) = &result {
            span.record(format!("error: {}", err));
        }
        span.finish();
        result
    }

    pub fn node_id(&self) -> NodeId {
        self.config.node_id.get()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Runtime settings shared with every flow
    pub fn settings(&self) -> &Arc<Settings> {
        &self.settings
    }

    pub fn registry(&self) -> &Arc<FlowRegistry> {
        &self.registry
    }

    pub fn scheduler(&self) -> &Arc<FlowScheduler> {
        &self.scheduler
    }

    pub fn memory_monitor(&self) -> &Arc<MemoryMonitor> {
        &self.memory_monitor
    }

    pub fn temp_storage_ids(&self) -> &Arc<TempStorageIdGenerator> {
        &self.temp_storage_ids
    }

    pub fn metrics(&self) -> &ServerMetrics {
        &self.metrics
    }

    pub fn tracer(&self) -> &Tracer {
        &self.config.tracer
    }
}

impl std::fmt::Debug for ServerImpl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerImpl")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .field("scheduler", &self.scheduler)
            .finish()
    }
}
