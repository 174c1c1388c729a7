//! In-process test cluster and request builders
//!
//! Each node gets its own tracer, stopper, and memory monitor, so tests can
//! check what a node left behind after a flow.

use distflow::flow::{
    InputSyncSpec, OutputRouterSpec, ProcessorCoreSpec, ProcessorSpec, RouterType,
    StreamEndpointSpec,
};
use distflow::rpc::{EvalContextParams, LocalCluster, LocalTransport, SyncFlowResult};
use distflow::server::ServerConfig;
use distflow::txn::{HlcTimestamp, TxnDescriptor};
use distflow::{
    Datum, FlowId, FlowSpec, NodeId, Row, ServerImpl, ServerSettings, SetupFlowRequest,
};
use std::sync::Arc;
use std::time::Duration;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Test cluster of `n` nodes with ids 1..=n
pub struct TestCluster {
    cluster: LocalCluster,
}

impl TestCluster {
    pub fn new(nodes: usize) -> Self {
        Self::with_settings(nodes, ServerSettings::default())
    }

    pub fn with_settings(nodes: usize, settings: ServerSettings) -> Self {
        Self::with_config(nodes, settings, |_, _| {})
    }

    pub fn with_config(
        nodes: usize,
        settings: ServerSettings,
        configure: impl FnMut(NodeId, &mut ServerConfig),
    ) -> Self {
        init_logging();
        let cluster =
            LocalCluster::start(nodes, settings, configure).expect("Failed to start test cluster");
        Self { cluster }
    }

    pub fn node(&self, id: u32) -> &Arc<ServerImpl> {
        self.cluster
            .server(NodeId(id))
            .unwrap_or_else(|| panic!("no node {}", id))
    }

    pub fn transport(&self) -> &Arc<LocalTransport> {
        self.cluster.transport()
    }

    /// Run `req` as a sync flow on `node`
    pub async fn run_sync(
        &self,
        node: u32,
        req: SetupFlowRequest,
    ) -> distflow::Result<SyncFlowResult> {
        self.transport().run_sync_flow(NodeId(node))?.run(req).await
    }

    /// Assert that no node holds memory, spans, or registered flows
    pub fn assert_quiet(&self) {
        for server in self.cluster.servers() {
            assert_eq!(
                server.memory_monitor().allocated(),
                0,
                "{} still has memory allocated",
                server.node_id()
            );
            assert_eq!(
                server.tracer().open_spans(),
                0,
                "{} still has open spans",
                server.node_id()
            );
            assert_eq!(
                server.registry().flow_count(),
                0,
                "{} still has registered flows",
                server.node_id()
            );
        }
    }

    pub async fn stop(&self) {
        self.cluster.stop().await;
    }
}

pub fn request(flow_id: FlowId, processors: Vec<ProcessorSpec>) -> SetupFlowRequest {
    SetupFlowRequest::new(
        TxnDescriptor::new("test txn", HlcTimestamp::default()),
        EvalContextParams::default(),
        FlowSpec {
            flow_id,
            processors,
        },
    )
}

pub fn int_rows(values: &[i64]) -> Vec<Row> {
    values.iter().map(|v| vec![Datum::Int(*v)]).collect()
}

pub fn first_column(rows: &[Row]) -> Vec<Datum> {
    rows.iter().map(|r| r[0].clone()).collect()
}

pub fn ints(values: &[i64]) -> Vec<Datum> {
    values.iter().map(|v| Datum::Int(*v)).collect()
}

pub fn values(rows: Vec<Row>, output: StreamEndpointSpec) -> ProcessorSpec {
    ProcessorSpec {
        inputs: Vec::new(),
        core: ProcessorCoreSpec::Values { rows },
        output: pass_through(output),
    }
}

pub fn noop(input: Vec<StreamEndpointSpec>, output: StreamEndpointSpec) -> ProcessorSpec {
    with_core(ProcessorCoreSpec::NoOp, input, output)
}

pub fn sorter(
    column: usize,
    descending: bool,
    input: Vec<StreamEndpointSpec>,
    output: StreamEndpointSpec,
) -> ProcessorSpec {
    with_core(ProcessorCoreSpec::Sorter { column, descending }, input, output)
}

pub fn with_core(
    core: ProcessorCoreSpec,
    input: Vec<StreamEndpointSpec>,
    output: StreamEndpointSpec,
) -> ProcessorSpec {
    ProcessorSpec {
        inputs: vec![InputSyncSpec { streams: input }],
        core,
        output: pass_through(output),
    }
}

fn pass_through(stream: StreamEndpointSpec) -> OutputRouterSpec {
    OutputRouterSpec {
        router: RouterType::PassThrough,
        streams: vec![stream],
    }
}

/// Poll `cond` every 10ms until it holds or `timeout` passes
pub async fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if cond() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
