// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Outboxes turn a local row stream into outbound protocol messages

use super::context::FlowContext;
use super::row::{row_channel, RowReceiver, RowSource, StreamItem};
use crate::error::Result;
use crate::ids::{FlowId, NodeId, StreamId};
use crate::rpc::{NodeDialer, ProducerMessage, StreamHeader};
use std::sync::Arc;

/// Rows batched into one message before it is sent
pub const OUTBOX_FLUSH_ROWS: usize = 16;

/// Accumulates items until a message is worth sending. Metadata is flushed
/// right away so errors reach the consumer without waiting for more rows.
#[derive(Debug, Default)]
pub(crate) struct OutboxBuffer {
    items: Vec<StreamItem>,
    rows: usize,
}

impl OutboxBuffer {
    /// Add `item`; returns true when the buffer should be flushed
    pub(crate) fn push(&mut self, item: StreamItem) -> bool {
        let is_meta = matches!(item, StreamItem::Meta(_));
        if !is_meta {
            self.rows += 1;
        }
        self.items.push(item);
        is_meta || self.rows >= OUTBOX_FLUSH_ROWS
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub(crate) fn take(&mut self) -> Vec<StreamItem> {
        self.rows = 0;
        std::mem::take(&mut self.items)
    }
}

/// Sends one output stream of the flow to a processor on another node
pub(crate) struct Outbox {
    flow_id: FlowId,
    stream_id: StreamId,
    peer: NodeId,
    dialer: Arc<dyn NodeDialer>,
    source: RowSource,
    log_tag: String,
}

impl Outbox {
    /// Create the outbox and the receiver the producing processor feeds
    pub(crate) fn new(ctx: &FlowContext, stream_id: StreamId, peer: NodeId) -> (Arc<dyn RowReceiver>, Self) {
        let (mut senders, source) = row_channel(1);
        let receiver: Arc<dyn RowReceiver> = senders.remove(0);
        let outbox = Self {
            flow_id: ctx.id,
            stream_id,
            peer,
            dialer: ctx.dialer.clone(),
            source,
            log_tag: ctx.log_tag(),
        };
        (receiver, outbox)
    }

    /// Dial the peer and forward everything until the producer is done. The
    /// peer's verdict on the stream is returned.
    pub(crate) async fn run(mut self) -> Result<()> {
        log::debug!(
            "{} outbox for stream {} dialing {}",
            self.log_tag,
            self.stream_id,
            self.peer
        );
        let result = self.forward().await;
        if let Err(err) = &result {
            log::warn!(
                "{} outbox for stream {} to {} failed: {}",
                self.log_tag,
                self.stream_id,
                self.peer,
                err
            );
        }
        result
    }

    async fn forward(&mut self) -> Result<()> {
        let mut client = self.dialer.dial_flow_stream(self.peer).await?;
        client
            .send(ProducerMessage {
                header: Some(StreamHeader {
                    flow_id: self.flow_id,
                    stream_id: self.stream_id,
                }),
                items: Vec::new(),
            })
            .await?;

        let mut buffer = OutboxBuffer::default();
        while let Some(item) = self.source.next().await {
            if buffer.push(item) {
                client
                    .send(ProducerMessage {
                        header: None,
                        items: buffer.take(),
                    })
                    .await?;
            }
        }
        if !buffer.is_empty() {
            client
                .send(ProducerMessage {
                    header: None,
                    items: buffer.take(),
                })
                .await?;
        }
        client.close_send().await
    }
}
