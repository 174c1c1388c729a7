// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Command handlers

use super::commands::OutputFormat;
use super::output::ResultFormatter;
use super::plan::Plan;
use chrono::Utc;
use colored::Colorize;
use distflow::rpc::LocalCluster;
use distflow::mon::MemoryStats;
use distflow::server::MetricsSnapshot;
use distflow::tempstorage::open_engine;
use distflow::txn::{HlcTimestamp, TxnDescriptor};
use distflow::{FlowError, FlowId, NodeId, RemoteError, Row, ServerSettings};
use std::path::{Path, PathBuf};
use std::time::Instant;

/// What one run of a plan produced
#[derive(Debug)]
pub struct RunReport {
    pub flow_id: FlowId,
    pub rows: Vec<Row>,
    pub remote_errors: Vec<RemoteError>,
    pub execution_time_ms: u128,
    pub node_stats: Vec<NodeStats>,
}

/// Counters and memory usage of one node after the run
#[derive(Debug)]
pub struct NodeStats {
    pub node: NodeId,
    pub counters: MetricsSnapshot,
    pub memory: MemoryStats,
}

pub fn handle_run(
    plan_path: PathBuf,
    nodes: Option<usize>,
    settings_path: Option<PathBuf>,
    format: OutputFormat,
    stats: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let plan = Plan::load(&plan_path)?;
    let settings = load_settings(settings_path.as_deref())?;
    let num_nodes = nodes.unwrap_or_else(|| plan.max_node());
    if num_nodes < plan.max_node() {
        return Err(format!(
            "plan uses node {} but only {} nodes were requested",
            plan.max_node(),
            num_nodes
        )
        .into());
    }

    let runtime = tokio::runtime::Runtime::new()?;
    let report = runtime.block_on(run_plan(&plan, num_nodes, settings))?;

    print!("{}", ResultFormatter::format(&report, format));
    if stats {
        print!("{}", ResultFormatter::format_metrics(&report.node_stats, format));
    }
    if !report.remote_errors.is_empty() && format == OutputFormat::Table {
        eprintln!("{}", "Flow reported errors".red().bold());
    }
    Ok(())
}

pub fn handle_settings(settings_path: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let settings = load_settings(settings_path.as_deref())?;
    println!("{}", serde_json::to_string_pretty(&settings)?);
    Ok(())
}

fn load_settings(path: Option<&Path>) -> Result<ServerSettings, FlowError> {
    match path {
        Some(path) => ServerSettings::from_json_file(path),
        None => Ok(ServerSettings::default()),
    }
}

/// Start `num_nodes` servers, set up the non-gateway fragments through the
/// async setup RPC, then run the gateway fragment as a sync flow
pub async fn run_plan(
    plan: &Plan,
    num_nodes: usize,
    settings: ServerSettings,
) -> Result<RunReport, FlowError> {
    // One engine per node: temp storage IDs are only unique within a node.
    let mut engines = Vec::with_capacity(num_nodes);
    for node in 1..=num_nodes {
        let mut node_settings = settings.clone();
        node_settings.temp_storage_path = settings
            .temp_storage_path
            .as_ref()
            .map(|p| p.join(format!("n{}", node)));
        engines.push(open_engine(&node_settings)?);
    }
    let cluster = LocalCluster::start(num_nodes, settings, |node, config| {
        config.temp_storage = engines.get(node.0 as usize - 1).cloned().flatten();
    })?;
    let flow_id = FlowId::new();
    let now = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    let txn = TxnDescriptor::new(
        "distflow-cli",
        HlcTimestamp {
            wall_time: now,
            logical: 0,
        },
    );
    let mut reqs = plan.requests(flow_id, &txn)?;
    for (_, req) in reqs.remote.iter_mut().chain(std::iter::once(&mut reqs.gateway)) {
        if req.eval_context.stmt_timestamp_nanos == 0 {
            req.eval_context.stmt_timestamp_nanos = now;
        }
        if req.eval_context.txn_timestamp_nanos == 0 {
            req.eval_context.txn_timestamp_nanos = now;
        }
    }
    log::info!("running flow {} on {} nodes", flow_id, num_nodes);

    let start = Instant::now();
    let outcome = run_fragments(&cluster, reqs).await;
    let execution_time_ms = start.elapsed().as_millis();

    let node_stats = cluster
        .servers()
        .iter()
        .map(|s| NodeStats {
            node: s.node_id(),
            counters: s.metrics().snapshot(),
            memory: s.memory_monitor().stats(),
        })
        .collect();
    cluster.stop().await;

    let result = outcome?;
    Ok(RunReport {
        flow_id,
        rows: result.rows,
        remote_errors: result.remote_errors,
        execution_time_ms,
        node_stats,
    })
}

async fn run_fragments(
    cluster: &LocalCluster,
    reqs: super::plan::PlanRequests,
) -> Result<distflow::rpc::SyncFlowResult, FlowError> {
    for (node, req) in reqs.remote {
        cluster
            .transport()
            .setup_flow(node, req)
            .await?
            .into_result()?;
        log::debug!("fragment scheduled on {}", node);
    }
    let (gateway, req) = reqs.gateway;
    cluster.transport().run_sync_flow(gateway)?.run(req).await
}
