// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! In-process transport
//!
//! Connects the servers of several nodes living in one process with tokio
//! channels. Each RPC runs the server handler on its own task, the way a
//! network server would.

use super::{
    ConsumerSignal, FlowStreamClient, FlowStreamServerStream, NodeDialer, ProducerMessage,
    RunSyncFlowServerStream, SetupFlowRequest, SetupFlowResponse,
};
use crate::error::{FlowError, Result};
use crate::flow::row::{Row, StreamItem};
use crate::ids::NodeId;
use crate::server::ServerImpl;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Messages buffered per direction of a stream
const STREAM_BUFFER: usize = 16;

/// Routes RPCs to the servers registered with it
#[derive(Default)]
pub struct LocalTransport {
    // Weak: servers hold the transport as their dialer.
    servers: RwLock<HashMap<NodeId, Weak<ServerImpl>>>,
}

impl LocalTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn register(&self, node: NodeId, server: &Arc<ServerImpl>) {
        self.servers.write().insert(node, Arc::downgrade(server));
    }

    pub fn deregister(&self, node: NodeId) {
        self.servers.write().remove(&node);
    }

    fn server(&self, node: NodeId) -> Result<Arc<ServerImpl>> {
        self.servers
            .read()
            .get(&node)
            .and_then(Weak::upgrade)
            .ok_or_else(|| FlowError::Transport(format!("no route to node {}", node)))
    }

    /// Unary setup RPC
    pub async fn setup_flow(&self, node: NodeId, req: SetupFlowRequest) -> Result<SetupFlowResponse> {
        let server = self.server(node)?;
        let handle = tokio::spawn(async move { server.setup_flow_rpc(None, &req) });
        handle
            .await
            .map_err(|e| FlowError::Transport(format!("setup flow handler failed: {}", e)))
    }

    /// Open the sync flow RPC to `node`
    pub fn run_sync_flow(&self, node: NodeId) -> Result<SyncFlowClient> {
        let server = self.server(node)?;
        let (signal_tx, signal_rx) = mpsc::channel(STREAM_BUFFER);
        let (msg_tx, msg_rx) = mpsc::channel(STREAM_BUFFER);
        let cancel = CancellationToken::new();
        let mut server_stream = ChannelSyncFlowStream {
            rx: signal_rx,
            tx: msg_tx,
            cancel: cancel.clone(),
        };
        let handle = tokio::spawn(async move { server.run_sync_flow(&mut server_stream).await });
        Ok(SyncFlowClient {
            tx: Some(signal_tx),
            rx: msg_rx,
            cancel,
            handle: Some(handle),
        })
    }
}

#[async_trait]
impl NodeDialer for LocalTransport {
    async fn dial_flow_stream(&self, node: NodeId) -> Result<Box<dyn FlowStreamClient>> {
        let server = self.server(node)?;
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let cancel = CancellationToken::new();
        let mut server_stream = ChannelFlowStream {
            rx,
            cancel: cancel.clone(),
        };
        let handle = tokio::spawn(async move { server.flow_stream(&mut server_stream).await });
        Ok(Box::new(ChannelFlowStreamClient {
            tx: Some(tx),
            cancel,
            handle: Some(handle),
        }))
    }
}

impl std::fmt::Debug for LocalTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut nodes: Vec<NodeId> = self.servers.read().keys().copied().collect();
        nodes.sort();
        f.debug_struct("LocalTransport").field("nodes", &nodes).finish()
    }
}

async fn join_handler(handle: Option<JoinHandle<Result<()>>>) -> Result<()> {
    match handle {
        Some(handle) => handle
            .await
            .map_err(|e| FlowError::Transport(format!("stream handler failed: {}", e)))?,
        None => Ok(()),
    }
}

struct ChannelFlowStream {
    rx: mpsc::Receiver<ProducerMessage>,
    cancel: CancellationToken,
}

#[async_trait]
impl FlowStreamServerStream for ChannelFlowStream {
    async fn recv(&mut self) -> Result<Option<ProducerMessage>> {
        Ok(self.rx.recv().await)
    }

    fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

struct ChannelFlowStreamClient {
    tx: Option<mpsc::Sender<ProducerMessage>>,
    cancel: CancellationToken,
    handle: Option<JoinHandle<Result<()>>>,
}

#[async_trait]
impl FlowStreamClient for ChannelFlowStreamClient {
    async fn send(&mut self, msg: ProducerMessage) -> Result<()> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| FlowError::Transport("send after close".to_string()))?;
        if tx.send(msg).await.is_err() {
            // The handler is gone; report why.
            self.tx = None;
            join_handler(self.handle.take()).await?;
            return Err(FlowError::Transport("flow stream closed by server".to_string()));
        }
        Ok(())
    }

    async fn close_send(&mut self) -> Result<()> {
        self.tx = None;
        join_handler(self.handle.take()).await
    }
}

impl Drop for ChannelFlowStreamClient {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.cancel.cancel();
        }
    }
}

struct ChannelSyncFlowStream {
    rx: mpsc::Receiver<ConsumerSignal>,
    tx: mpsc::Sender<ProducerMessage>,
    cancel: CancellationToken,
}

#[async_trait]
impl RunSyncFlowServerStream for ChannelSyncFlowStream {
    async fn recv(&mut self) -> Result<Option<ConsumerSignal>> {
        Ok(self.rx.recv().await)
    }

    async fn send(&mut self, msg: ProducerMessage) -> Result<()> {
        self.tx
            .send(msg)
            .await
            .map_err(|_| FlowError::Transport("sync flow client went away".to_string()))
    }

    fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

/// Rows and metadata returned by a sync flow
#[derive(Debug, Default)]
pub struct SyncFlowResult {
    pub rows: Vec<Row>,
    /// Errors the flow reported in-band as metadata
    pub remote_errors: Vec<crate::error::RemoteError>,
}

/// Client end of the sync flow RPC
pub struct SyncFlowClient {
    tx: Option<mpsc::Sender<ConsumerSignal>>,
    rx: mpsc::Receiver<ProducerMessage>,
    cancel: CancellationToken,
    handle: Option<JoinHandle<Result<()>>>,
}

impl SyncFlowClient {
    pub async fn send(&mut self, signal: ConsumerSignal) -> Result<()> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| FlowError::Transport("send after close".to_string()))?;
        tx.send(signal)
            .await
            .map_err(|_| FlowError::Transport("sync flow server went away".to_string()))
    }

    /// Next message from the server, `None` once it is done sending
    pub async fn recv(&mut self) -> Option<ProducerMessage> {
        self.rx.recv().await
    }

    /// Abandon the RPC; the server cancels the flow
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the server handler's result
    pub async fn finish(mut self) -> Result<()> {
        self.tx = None;
        join_handler(self.handle.take()).await
    }

    /// Send `req`, collect everything the flow produces, and return it with
    /// the handler's verdict
    pub async fn run(mut self, req: SetupFlowRequest) -> Result<SyncFlowResult> {
        self.send(ConsumerSignal {
            setup_flow_request: Some(req),
        })
        .await?;
        let mut result = SyncFlowResult::default();
        while let Some(msg) = self.recv().await {
            for item in msg.items {
                match item {
                    StreamItem::Row(row) => result.rows.push(row),
                    StreamItem::Meta(meta) => result.remote_errors.extend(meta.error),
                }
            }
        }
        self.finish().await?;
        Ok(result)
    }
}

impl Drop for SyncFlowClient {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.cancel.cancel();
        }
    }
}

/// Servers of several nodes in one process, wired through a [`LocalTransport`]
pub struct LocalCluster {
    transport: Arc<LocalTransport>,
    servers: Vec<Arc<ServerImpl>>,
}

impl LocalCluster {
    /// Start `num_nodes` servers with node ids `1..=num_nodes`. `configure`
    /// may adjust each node's config before its server is built.
    pub fn start(
        num_nodes: usize,
        settings: crate::config::ServerSettings,
        mut configure: impl FnMut(NodeId, &mut crate::server::ServerConfig),
    ) -> Result<Self> {
        let transport = LocalTransport::new();
        let mut servers = Vec::with_capacity(num_nodes);
        for idx in 0..num_nodes {
            let node = NodeId(idx as u32 + 1);
            let mut config = crate::server::ServerConfig::new(
                settings.clone(),
                transport.clone(),
                Arc::new(crate::node::NodeIdContainer::resolved(node)),
            );
            configure(node, &mut config);
            let server = ServerImpl::new(config)?;
            server.start()?;
            transport.register(node, &server);
            servers.push(server);
        }
        log::info!("started local cluster with {} nodes", num_nodes);
        Ok(Self { transport, servers })
    }

    pub fn transport(&self) -> &Arc<LocalTransport> {
        &self.transport
    }

    pub fn servers(&self) -> &[Arc<ServerImpl>] {
        &self.servers
    }

    pub fn server(&self, node: NodeId) -> Option<&Arc<ServerImpl>> {
        self.servers.iter().find(|s| s.node_id() == node)
    }

    /// Quiesce every node and wait for in-flight work
    pub async fn stop(&self) {
        for server in &self.servers {
            server.config().stopper.stop().await;
            self.transport.deregister(server.node_id());
        }
    }
}

impl std::fmt::Debug for LocalCluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalCluster")
            .field("nodes", &self.servers.len())
            .finish()
    }
}
