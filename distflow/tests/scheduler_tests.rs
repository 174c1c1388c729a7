//! Tests for the flow scheduler behind the async setup RPC
//!
//! At most `max_running_flows` flows run at once; the rest wait in FIFO
//! order and start as running flows finish.

#[path = "testutils/mod.rs"]
mod testutils;

use distflow::flow::StreamEndpointSpec;
use distflow::{FlowId, NodeId, ServerSettings};
use std::time::Duration;
use testutils::test_cluster::*;

/// A flow that idles until its never-connected inbound stream times out
fn idle_flow() -> distflow::SetupFlowRequest {
    request(
        FlowId::new(),
        vec![noop(
            vec![StreamEndpointSpec::remote(1, NodeId(7))],
            StreamEndpointSpec::remote(2, NodeId(9)),
        )],
    )
}

fn limited(max_running_flows: usize) -> ServerSettings {
    ServerSettings {
        max_running_flows,
        flow_stream_timeout_ms: 300,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_flows_beyond_limit_are_queued() {
    let cluster = TestCluster::with_settings(1, limited(1));
    let node = cluster.node(1);

    for _ in 0..3 {
        assert!(node.setup_flow_rpc(None, &idle_flow()).is_accepted());
    }
    assert_eq!(node.scheduler().running_count(), 1);
    assert_eq!(node.scheduler().queued_count(), 2);
    assert_eq!(node.scheduler().total_queued(), 2);

    let drained = wait_until(Duration::from_secs(10), || {
        node.scheduler().running_count() == 0 && node.scheduler().queued_count() == 0
    })
    .await;
    assert!(drained, "queue never drained");
    assert!(wait_until(Duration::from_secs(2), || node.tracer().open_spans() == 0).await);
    assert_eq!(node.tracer().finished_spans(), 3);
    cluster.assert_quiet();
}

#[tokio::test]
async fn test_limit_can_be_raised_at_runtime() {
    let cluster = TestCluster::with_settings(1, limited(1));
    let node = cluster.node(1);

    node.settings().set_max_running_flows(3);
    for _ in 0..3 {
        assert!(node.setup_flow_rpc(None, &idle_flow()).is_accepted());
    }
    assert_eq!(node.scheduler().running_count(), 3);
    assert_eq!(node.scheduler().queued_count(), 0);

    assert!(
        wait_until(Duration::from_secs(5), || node.scheduler().running_count() == 0).await
    );
}

#[tokio::test]
async fn test_stop_cleans_up_queued_flows() {
    let cluster = TestCluster::with_settings(1, limited(1));
    let node = cluster.node(1).clone();

    for _ in 0..4 {
        assert!(node.setup_flow_rpc(None, &idle_flow()).is_accepted());
    }
    assert_eq!(node.scheduler().queued_count(), 3);

    tokio::time::timeout(Duration::from_secs(5), cluster.stop())
        .await
        .expect("stop did not return");
    assert_eq!(node.scheduler().queued_count(), 0);
    assert_eq!(node.tracer().open_spans(), 0);
    assert_eq!(node.memory_monitor().allocated(), 0);

    // Quiescing nodes refuse new flows
    assert!(!node.setup_flow_rpc(None, &idle_flow()).is_accepted());
}
