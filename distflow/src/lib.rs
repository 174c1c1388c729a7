// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! distflow - node-local coordinator for distributed query flows
//!
//! Every node of a distributed query cluster runs a flow server. The gateway
//! splits a query plan into per-node fragments ("flows") and sends each node
//! a setup request; the node builds the fragment's processor DAG with a
//! bounded memory budget and runs it, either streaming results straight back
//! to the requester or registering it so peers can stream rows into it.
//!
//! # Features
//!
//! - **Versioned setup**: requests outside `[MIN_ACCEPTED_VERSION, PROTOCOL_VERSION]`
//!   are rejected before anything is allocated
//! - **Sync and async flows**: `run_sync_flow` answers over the requesting
//!   stream; `setup_flow_rpc` hands flows to a concurrency-limited scheduler
//! - **Inbound stream rendezvous**: peers may dial before a flow is set up;
//!   the registry waits for it up to a timeout
//! - **Memory accounting**: root monitor per node, child monitor per flow,
//!   bound account per processor
//! - **Temp storage**: spilling processors get collision-free key prefixes
//!
//! # Usage
//!
//! ```bash
//! # Run a plan on a three-node in-process cluster
//! distflow-cli run --plan plan.json --nodes 3
//! ```

pub mod config;
pub mod error;
pub mod eval;
pub mod flow;
pub mod ids;
pub mod mon;
pub mod node;
pub mod registry;
pub mod rpc;
pub mod scheduler;
pub mod server;
pub mod stopper;
pub mod tempstorage;
pub mod trace;
pub mod txn;
pub mod util;

pub use config::{ServerSettings, Settings};
pub use error::{ErrorClass, FlowError, RemoteError, Result};
pub use flow::{Datum, Flow, FlowSpec, FlowState, Row};
pub use ids::{FlowId, NodeId, StreamId};
pub use rpc::{SetupFlowRequest, SetupFlowResponse};
pub use server::{ServerConfig, ServerImpl, MIN_ACCEPTED_VERSION, VERSION as PROTOCOL_VERSION};

/// distflow version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// distflow crate name
pub const CRATE_NAME: &str = env!("CARGO_PKG_NAME");
