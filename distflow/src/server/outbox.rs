// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Output adapter of sync flows

use crate::error::{FlowError, Result};
use crate::flow::outbox::OutboxBuffer;
use crate::flow::row::{row_channel, RowReceiver, RowSource, StreamItem};
use crate::rpc::{ProducerMessage, RunSyncFlowServerStream};
use std::sync::Arc;

/// Buffers the flow's output and writes it to the stream that requested the
/// flow. The first send failure is recorded; after it the outbox stops
/// reading so producers see their consumer closed.
pub struct SyncFlowOutbox {
    source: Option<RowSource>,
    err: Option<FlowError>,
}

impl SyncFlowOutbox {
    /// Create the outbox and the receiver to use as the flow's sync output
    pub fn new() -> (Arc<dyn RowReceiver>, Self) {
        let (mut senders, source) = row_channel(1);
        let receiver: Arc<dyn RowReceiver> = senders.remove(0);
        (
            receiver,
            Self {
                source: Some(source),
                err: None,
            },
        )
    }

    /// Forward the flow's output until it ends or the stream fails
    pub async fn run(&mut self, stream: &mut dyn RunSyncFlowServerStream) {
        let Some(mut source) = self.source.take() else {
            return;
        };
        let mut buffer = OutboxBuffer::default();
        while let Some(item) = source.next().await {
            if buffer.push(item) {
                if let Err(err) = send(stream, buffer.take()).await {
                    self.err = Some(err);
                    return;
                }
            }
        }
        if !buffer.is_empty() {
            if let Err(err) = send(stream, buffer.take()).await {
                self.err = Some(err);
            }
        }
    }

    /// The error that ended delivery, if any
    pub fn take_error(&mut self) -> Option<FlowError> {
        self.err.take()
    }
}

async fn send(stream: &mut dyn RunSyncFlowServerStream, items: Vec<StreamItem>) -> Result<()> {
    stream
        .send(ProducerMessage {
            header: None,
            items,
        })
        .await
}
