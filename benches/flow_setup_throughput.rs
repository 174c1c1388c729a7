/// Benchmark for flow setup and teardown throughput
///
/// Measures the synchronous setup path (version gate, memory monitor, eval
/// context, DAG wiring) followed by cleanup, a full sync flow round trip over
/// the in-process transport, and temp storage ID allocation under contention.

use distflow::flow::{
    OutputRouterSpec, ProcessorCoreSpec, ProcessorSpec, RouterType, StreamEndpointSpec,
};
use distflow::rpc::{EvalContextParams, LocalCluster};
use distflow::server::SyncFlowOutbox;
use distflow::txn::{HlcTimestamp, TxnDescriptor};
use distflow::{Datum, FlowId, FlowSpec, NodeId, ServerSettings, SetupFlowRequest};
use std::time::Instant;

fn values_request(rows: usize) -> SetupFlowRequest {
    let rows = (0..rows as i64).map(|i| vec![Datum::Int(i)]).collect();
    SetupFlowRequest::new(
        TxnDescriptor::new("bench", HlcTimestamp::default()),
        EvalContextParams::default(),
        FlowSpec {
            flow_id: FlowId::new(),
            processors: vec![ProcessorSpec {
                inputs: Vec::new(),
                core: ProcessorCoreSpec::Values { rows },
                output: OutputRouterSpec {
                    router: RouterType::PassThrough,
                    streams: vec![StreamEndpointSpec::sync_response()],
                },
            }],
        },
    )
}

fn main() {
    println!("=== Flow Setup Throughput Benchmark ===\n");

    let runtime = tokio::runtime::Runtime::new().expect("Failed to build runtime");
    let _guard = runtime.enter();
    let cluster = LocalCluster::start(1, ServerSettings::default(), |_, _| {})
        .expect("Failed to start cluster");
    let server = cluster.server(NodeId(1)).expect("node 1").clone();

    // Benchmark: setup + cleanup without running
    println!("📊 Setup and Cleanup:");
    let iterations = 10_000;
    let setup_start = Instant::now();
    runtime.block_on(async {
        for _ in 0..iterations {
            let (output, _outbox) = SyncFlowOutbox::new();
            let flow = server
                .setup_sync_flow(None, &values_request(1), output)
                .expect("Failed to set up flow");
            flow.cleanup();
        }
    });
    let setup_duration = setup_start.elapsed();
    let setup_ops_per_sec = iterations as f64 / setup_duration.as_secs_f64();
    println!("  Flows: {}", iterations);
    println!("  Time: {:?}", setup_duration);
    println!("  Throughput: {:.0} flows/sec", setup_ops_per_sec);
    println!("  Memory left allocated: {} bytes", server.memory_monitor().allocated());
    println!();

    // Benchmark: full sync flow round trips
    println!("📊 Sync Flow Round Trips (100 rows each):");
    let round_trips = 1_000;
    let rpc_start = Instant::now();
    let returned_rows = runtime.block_on(async {
        let mut total = 0;
        for _ in 0..round_trips {
            let result = cluster
                .transport()
                .run_sync_flow(NodeId(1))
                .expect("no route")
                .run(values_request(100))
                .await
                .expect("Sync flow failed");
            total += result.rows.len();
        }
        total
    });
    let rpc_duration = rpc_start.elapsed();
    let rpc_ops_per_sec = round_trips as f64 / rpc_duration.as_secs_f64();
    println!("  Round trips: {}", round_trips);
    println!("  Rows returned: {}", returned_rows);
    println!("  Time: {:?}", rpc_duration);
    println!("  Throughput: {:.0} flows/sec", rpc_ops_per_sec);
    println!();

    // Benchmark: temp storage IDs from many threads
    println!("📊 Temp Storage ID Allocation (8 threads):");
    let ids = server.temp_storage_ids().clone();
    let per_thread = 100_000;
    let id_start = Instant::now();
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let ids = ids.clone();
            std::thread::spawn(move || {
                for _ in 0..per_thread {
                    ids.new_id();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("id thread panicked");
    }
    let id_duration = id_start.elapsed();
    let id_ops_per_sec = (8 * per_thread) as f64 / id_duration.as_secs_f64();
    println!("  IDs: {}", 8 * per_thread);
    println!("  High water mark: {}", ids.high_water_mark());
    println!("  Time: {:?}", id_duration);
    println!("  Throughput: {:.0} ids/sec", id_ops_per_sec);
    println!();

    runtime.block_on(cluster.stop());

    println!("=== Summary ===");
    println!("  Setup + cleanup:   {:.0} flows/sec", setup_ops_per_sec);
    println!("  Sync round trips:  {:.0} flows/sec", rpc_ops_per_sec);
    println!("  Temp storage IDs:  {:.0} ids/sec", id_ops_per_sec);
}
