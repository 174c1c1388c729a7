// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Transport-facing interfaces of the flow server
//!
//! The server only sees these traits; `local` provides an in-process
//! implementation that connects several servers with channels.

pub mod local;
pub mod messages;

pub use local::{LocalCluster, LocalTransport, SyncFlowClient, SyncFlowResult};

pub use messages::{
    ConsumerSignal, EvalContextParams, ProducerMessage, SetupFlowRequest, SetupFlowResponse,
    StreamHeader,
};

use crate::error::Result;
use crate::ids::NodeId;
use tokio_util::sync::CancellationToken;
use async_trait::async_trait;

/// Server end of the bidirectional sync flow RPC
#[async_trait]
pub trait RunSyncFlowServerStream: Send {
    /// Next client message; `Ok(None)` on clean end of stream
    async fn recv(&mut self) -> Result<Option<ConsumerSignal>>;

    async fn send(&mut self, msg: ProducerMessage) -> Result<()>;

    /// Canceled when the client goes away
    fn cancellation(&self) -> CancellationToken;
}

/// Server end of a stream carrying rows into a local flow
#[async_trait]
pub trait FlowStreamServerStream: Send {
    /// Next producer message; `Ok(None)` on clean end of stream
    async fn recv(&mut self) -> Result<Option<ProducerMessage>>;

    fn cancellation(&self) -> CancellationToken;
}

/// Client end of a flow stream opened by an outbox
#[async_trait]
pub trait FlowStreamClient: Send {
    async fn send(&mut self, msg: ProducerMessage) -> Result<()>;

    /// Half-close the stream and wait for the server's verdict
    async fn close_send(&mut self) -> Result<()>;
}

/// Opens flow streams to other nodes
#[async_trait]
pub trait NodeDialer: Send + Sync {
    async fn dial_flow_stream(&self, node: NodeId) -> Result<Box<dyn FlowStreamClient>>;
}
