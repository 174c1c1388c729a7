//! Tests for the sync flow RPC
//!
//! The first client message carries the setup request; the flow's output
//! streams back on the same RPC and the handler returns once the flow is
//! cleaned up.

#[path = "testutils/mod.rs"]
mod testutils;

use distflow::flow::{
    OutputRouterSpec, ProcessorCoreSpec, ProcessorSpec, RouterType, StreamEndpointSpec,
    OUTBOX_FLUSH_ROWS,
};
use distflow::rpc::ConsumerSignal;
use distflow::{Datum, FlowError, FlowId, NodeId, ServerSettings, SetupFlowResponse};
use std::time::Duration;
use testutils::test_cluster::*;

#[tokio::test]
async fn test_trivial_flow_returns_rows_in_order() {
    let cluster = TestCluster::new(1);
    let req = request(
        FlowId::new(),
        vec![values(int_rows(&[5, 3, 9]), StreamEndpointSpec::sync_response())],
    );

    let result = cluster.run_sync(1, req).await.unwrap();
    assert_eq!(first_column(&result.rows), ints(&[5, 3, 9]));
    assert!(result.remote_errors.is_empty());

    let metrics = cluster.node(1).metrics().snapshot();
    assert_eq!(metrics.flows_setup, 1);
    assert_eq!(metrics.sync_flows_run, 1);
    cluster.assert_quiet();
}

#[tokio::test]
async fn test_local_pipeline_filters_and_sorts() {
    let cluster = TestCluster::new(1);
    let rows = vec![
        vec![Datum::String("pear".to_string()), Datum::Int(3)],
        vec![Datum::String("apple".to_string()), Datum::Int(1)],
        vec![Datum::Null, Datum::Int(7)],
        vec![Datum::String("apricot".to_string()), Datum::Int(2)],
    ];
    let req = request(
        FlowId::new(),
        vec![
            values(rows, StreamEndpointSpec::local(1)),
            with_core(
                ProcessorCoreSpec::RegexFilter {
                    column: 0,
                    pattern: "^ap".to_string(),
                },
                vec![StreamEndpointSpec::local(1)],
                StreamEndpointSpec::local(2),
            ),
            sorter(
                1,
                true,
                vec![StreamEndpointSpec::local(2)],
                StreamEndpointSpec::sync_response(),
            ),
        ],
    );

    let result = cluster.run_sync(1, req).await.unwrap();
    let names: Vec<Datum> = result.rows.iter().map(|r| r[0].clone()).collect();
    assert_eq!(
        names,
        vec![
            Datum::String("apricot".to_string()),
            Datum::String("apple".to_string()),
        ]
    );
    cluster.assert_quiet();
}

#[tokio::test]
async fn test_mirror_router_and_multiple_inputs() {
    let cluster = TestCluster::new(1);
    // One values processor mirrored to two local streams, merged again by a
    // single input of the sorter.
    let req = request(
        FlowId::new(),
        vec![
            ProcessorSpec {
                inputs: Vec::new(),
                core: ProcessorCoreSpec::Values {
                    rows: int_rows(&[2, 1]),
                },
                output: OutputRouterSpec {
                    router: RouterType::Mirror,
                    streams: vec![StreamEndpointSpec::local(1), StreamEndpointSpec::local(2)],
                },
            },
            sorter(
                0,
                false,
                vec![StreamEndpointSpec::local(1), StreamEndpointSpec::local(2)],
                StreamEndpointSpec::sync_response(),
            ),
        ],
    );

    let result = cluster.run_sync(1, req).await.unwrap();
    assert_eq!(first_column(&result.rows), ints(&[1, 1, 2, 2]));
}

#[tokio::test]
async fn test_large_output_is_batched() {
    let cluster = TestCluster::new(1);
    let count = OUTBOX_FLUSH_ROWS * 4 + 5;
    let input: Vec<i64> = (0..count as i64).collect();
    let req = request(
        FlowId::new(),
        vec![values(int_rows(&input), StreamEndpointSpec::sync_response())],
    );

    let mut client = cluster.transport().run_sync_flow(NodeId(1)).unwrap();
    client
        .send(ConsumerSignal {
            setup_flow_request: Some(req),
        })
        .await
        .unwrap();
    let mut batches = 0;
    let mut rows = 0;
    while let Some(msg) = client.recv().await {
        batches += 1;
        rows += msg.items.len();
        assert!(msg.items.len() <= OUTBOX_FLUSH_ROWS);
        assert!(msg.header.is_none());
    }
    client.finish().await.unwrap();
    assert_eq!(rows, count);
    assert!(batches >= 5);
}

#[tokio::test]
async fn test_missing_setup_request_fails_without_allocating() {
    let cluster = TestCluster::new(1);
    let node = cluster.node(1);

    // First message without a request
    let mut client = cluster.transport().run_sync_flow(NodeId(1)).unwrap();
    client.send(ConsumerSignal::default()).await.unwrap();
    let err = client.finish().await.unwrap_err();
    assert!(matches!(err, FlowError::MissingSetupRequest), "got {:?}", err);

    // Stream closed before any message
    let client = cluster.transport().run_sync_flow(NodeId(1)).unwrap();
    let err = client.finish().await.unwrap_err();
    assert!(matches!(err, FlowError::MissingSetupRequest), "got {:?}", err);

    assert_eq!(node.metrics().snapshot().flows_setup, 0);
    assert_eq!(node.tracer().finished_spans(), 0);
    assert_eq!(node.memory_monitor().allocated(), 0);
}

#[tokio::test]
async fn test_setup_failure_is_returned_to_client() {
    let cluster = TestCluster::new(1);
    let mut req = request(
        FlowId::new(),
        vec![values(int_rows(&[1]), StreamEndpointSpec::sync_response())],
    );
    req.version = 1;

    let err = cluster.run_sync(1, req).await.unwrap_err();
    assert!(matches!(err, FlowError::VersionMismatch { requested: 1, .. }));
    cluster.assert_quiet();
}

#[tokio::test]
async fn test_client_cancel_stops_flow_waiting_on_peers() {
    let settings = ServerSettings {
        flow_stream_timeout_ms: 60_000,
        ..Default::default()
    };
    let cluster = TestCluster::with_settings(1, settings);
    let node = cluster.node(1);
    let flow_id = FlowId::new();
    // The inbound stream from node 2 never connects
    let req = request(
        flow_id,
        vec![noop(
            vec![StreamEndpointSpec::remote(1, NodeId(2))],
            StreamEndpointSpec::sync_response(),
        )],
    );

    let mut client = cluster.transport().run_sync_flow(NodeId(1)).unwrap();
    client
        .send(ConsumerSignal {
            setup_flow_request: Some(req),
        })
        .await
        .unwrap();
    let registered = wait_until(Duration::from_secs(5), || {
        node.registry().lookup_flow(flow_id).is_some()
    })
    .await;
    assert!(registered);

    client.cancel();
    let finished = tokio::time::timeout(Duration::from_secs(5), client.finish()).await;
    assert!(finished.is_ok(), "canceled flow did not finish");
    cluster.assert_quiet();
}

#[tokio::test]
async fn test_quiesce_cancels_running_sync_flow() {
    let settings = ServerSettings {
        flow_stream_timeout_ms: 60_000,
        ..Default::default()
    };
    let cluster = TestCluster::with_settings(1, settings);
    let node = cluster.node(1).clone();
    let flow_id = FlowId::new();
    let req = request(
        flow_id,
        vec![noop(
            vec![StreamEndpointSpec::remote(1, NodeId(2))],
            StreamEndpointSpec::sync_response(),
        )],
    );

    let client = cluster.transport().run_sync_flow(NodeId(1)).unwrap();
    let run = tokio::spawn(client.run(req));
    let registered = wait_until(Duration::from_secs(5), || {
        node.registry().lookup_flow(flow_id).is_some()
    })
    .await;
    assert!(registered);

    tokio::time::timeout(Duration::from_secs(5), cluster.stop())
        .await
        .expect("stop hung on a running flow");
    let _ = run.await.unwrap();
    assert_eq!(node.registry().flow_count(), 0);
    assert_eq!(node.memory_monitor().allocated(), 0);

    // New work is refused once quiescing
    let late = request(
        FlowId::new(),
        vec![values(int_rows(&[1]), StreamEndpointSpec::remote(1, NodeId(2)))],
    );
    match node.setup_flow_rpc(None, &late) {
        SetupFlowResponse::Rejected(remote) => {
            assert!(remote.message.contains("node unavailable"), "{}", remote.message)
        }
        SetupFlowResponse::Accepted => panic!("quiescing node accepted a flow"),
    }
}
