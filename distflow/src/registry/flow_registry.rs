// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Registry of running flows
//!
//! Inbound streams from peers find their consumer here. A peer may dial
//! before the flow is registered, so connecting waits, up to a timeout, for
//! the flow to show up. Entries are reference counted: an entry created by a
//! waiter lives until the waiter gives up or the flow registers.

use crate::error::{FlowError, Result};
use crate::flow::row::{ProducerMetadata, RowReceiver, StreamItem};
use crate::flow::Flow;
use crate::ids::{FlowId, StreamId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

struct InboundStreamInfo {
    receiver: Arc<dyn RowReceiver>,
    connected: bool,
    finished: bool,
}

struct FlowEntry {
    flow: Option<Arc<Flow>>,
    inbound: HashMap<StreamId, InboundStreamInfo>,
    /// Flips to true once the flow registers
    ready: watch::Sender<bool>,
    /// Connect calls currently waiting on `ready`
    waiters: usize,
    timeout_task: Option<JoinHandle<()>>,
}

impl FlowEntry {
    fn new() -> Self {
        let (ready, _) = watch::channel(false);
        Self {
            flow: None,
            inbound: HashMap::new(),
            ready,
            waiters: 0,
            timeout_task: None,
        }
    }
}

#[derive(Default)]
pub struct FlowRegistry {
    flows: Mutex<HashMap<FlowId, FlowEntry>>,
}

/// Releases an inbound stream's registry bookkeeping when dropped
pub struct InboundStreamGuard {
    registry: Arc<FlowRegistry>,
    flow: Arc<Flow>,
    stream_id: StreamId,
}

impl InboundStreamGuard {
    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    /// Same as dropping the guard
    pub fn release(self) {}
}

impl Drop for InboundStreamGuard {
    fn drop(&mut self) {
        self.registry.finish_inbound_stream(&self.flow, self.stream_id);
    }
}

impl std::fmt::Debug for InboundStreamGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InboundStreamGuard")
            .field("flow_id", &self.flow.id())
            .field("stream_id", &self.stream_id)
            .finish()
    }
}

impl FlowRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make `flow` visible to inbound streams and wake connect calls waiting
    /// for it.
    ///
    /// Streams that are still unconnected after `timeout` are failed with a
    /// `NoInboundStreamConnection` error so the flow does not wait for a peer
    /// that never dials.
    pub fn register_flow(
        self: &Arc<Self>,
        id: FlowId,
        flow: Arc<Flow>,
        inbound: HashMap<StreamId, Arc<dyn RowReceiver>>,
        timeout: Duration,
    ) -> Result<()> {
        let mut flows = self.flows.lock();
        let entry = flows.entry(id).or_insert_with(FlowEntry::new);
        if entry.flow.is_some() {
            return Err(FlowError::Internal(format!("flow {} already registered", id)));
        }
        let has_inbound = !inbound.is_empty();
        entry.flow = Some(flow);
        entry.inbound = inbound
            .into_iter()
            .map(|(stream_id, receiver)| {
                (
                    stream_id,
                    InboundStreamInfo {
                        receiver,
                        connected: false,
                        finished: false,
                    },
                )
            })
            .collect();
        entry.ready.send_replace(true);

        if has_inbound {
            let registry = Arc::clone(self);
            entry.timeout_task = Some(tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                registry.fail_unconnected_streams(id).await;
            }));
        }
        log::debug!("registered flow {} ({} waiters)", id, entry.waiters);
        Ok(())
    }

    /// Remove the flow. Connect calls still waiting on the id keep the entry
    /// alive but will not find the flow.
    pub fn unregister_flow(&self, id: FlowId) {
        let mut flows = self.flows.lock();
        let Some(entry) = flows.get_mut(&id) else {
            return;
        };
        if let Some(task) = entry.timeout_task.take() {
            task.abort();
        }
        entry.flow = None;
        entry.inbound.clear();
        if entry.waiters == 0 {
            flows.remove(&id);
        }
        log::debug!("unregistered flow {}", id);
    }

    /// Number of registered flows
    pub fn flow_count(&self) -> usize {
        self.flows.lock().values().filter(|e| e.flow.is_some()).count()
    }

    pub fn lookup_flow(&self, id: FlowId) -> Option<Arc<Flow>> {
        self.flows.lock().get(&id).and_then(|e| e.flow.clone())
    }

    /// Find the consumer for inbound stream `stream_id` of flow `flow_id`,
    /// waiting up to `timeout` for the flow to register.
    ///
    /// The returned guard must live as long as the stream; dropping it marks
    /// the stream finished.
    pub async fn connect_inbound_stream(
        self: &Arc<Self>,
        flow_id: FlowId,
        stream_id: StreamId,
        timeout: Duration,
    ) -> Result<(Arc<Flow>, Arc<dyn RowReceiver>, InboundStreamGuard)> {
        let ready = {
            let mut flows = self.flows.lock();
            let entry = flows.entry(flow_id).or_insert_with(FlowEntry::new);
            if entry.flow.is_none() {
                entry.waiters += 1;
                Some(entry.ready.subscribe())
            } else {
                None
            }
        };

        if let Some(mut ready) = ready {
            log::debug!(
                "flow {} not set up yet; stream {} waiting up to {:?}",
                flow_id,
                stream_id,
                timeout
            );
            let registered = tokio::time::timeout(timeout, async {
                ready.wait_for(|ready| *ready).await.is_ok()
            })
            .await
            .unwrap_or(false);
            self.release_waiter(flow_id);
            if !registered {
                log::warn!(
                    "flow {} not registered after {:?}; failing stream {}",
                    flow_id,
                    timeout,
                    stream_id
                );
                return Err(FlowError::FlowConnectionTimeout {
                    flow_id,
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
        }

        let mut flows = self.flows.lock();
        let entry = flows
            .get_mut(&flow_id)
            .ok_or(FlowError::UnknownInboundStream { flow_id, stream_id })?;
        let flow = entry
            .flow
            .clone()
            .ok_or(FlowError::UnknownInboundStream { flow_id, stream_id })?;
        let info = entry
            .inbound
            .get_mut(&stream_id)
            .ok_or(FlowError::UnknownInboundStream { flow_id, stream_id })?;
        if info.connected {
            return Err(FlowError::StreamAlreadyConnected { flow_id, stream_id });
        }
        info.connected = true;
        let receiver = info.receiver.clone();
        drop(flows);

        let guard = InboundStreamGuard {
            registry: Arc::clone(self),
            flow: flow.clone(),
            stream_id,
        };
        Ok((flow, receiver, guard))
    }

    fn release_waiter(&self, flow_id: FlowId) {
        let mut flows = self.flows.lock();
        if let Some(entry) = flows.get_mut(&flow_id) {
            entry.waiters -= 1;
            if entry.waiters == 0 && entry.flow.is_none() {
                flows.remove(&flow_id);
            }
        }
    }

    fn finish_inbound_stream(&self, flow: &Arc<Flow>, stream_id: StreamId) {
        let newly_finished = {
            let mut flows = self.flows.lock();
            match flows
                .get_mut(&flow.id())
                .and_then(|e| e.inbound.get_mut(&stream_id))
            {
                Some(info) if !info.finished => {
                    info.finished = true;
                    true
                }
                Some(_) => false,
                // Unregistered already; the flow stopped counting its streams.
                None => false,
            }
        };
        if newly_finished {
            flow.inbound_stream_done();
        }
    }

    /// Mark every stream of `flow_id` that no peer connected as connected and
    /// finished, handing back their receivers.
    pub(crate) fn take_unconnected_streams(
        &self,
        flow_id: FlowId,
    ) -> Vec<(StreamId, Arc<dyn RowReceiver>)> {
        let mut flows = self.flows.lock();
        let Some(entry) = flows.get_mut(&flow_id) else {
            return Vec::new();
        };
        entry
            .inbound
            .iter_mut()
            .filter(|(_, info)| !info.connected)
            .map(|(stream_id, info)| {
                info.connected = true;
                info.finished = true;
                (*stream_id, info.receiver.clone())
            })
            .collect()
    }

    async fn fail_unconnected_streams(&self, flow_id: FlowId) {
        let Some(flow) = self.lookup_flow(flow_id) else {
            return;
        };
        for (stream_id, receiver) in self.take_unconnected_streams(flow_id) {
            let err = FlowError::NoInboundStreamConnection { flow_id, stream_id };
            log::error!("{} {}", flow.log_tag(), err);
            receiver
                .push(StreamItem::Meta(ProducerMetadata::from_error(&err)))
                .await;
            receiver.producer_done();
            flow.inbound_stream_done();
        }
    }
}

impl std::fmt::Debug for FlowRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowRegistry")
            .field("flows", &self.flow_count())
            .finish()
    }
}
