// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Feeding a connected inbound stream into its local consumer

use crate::error::{FlowError, Result};
use crate::flow::row::{ConsumerStatus, ProducerMetadata, RowReceiver, StreamItem};
use crate::flow::Flow;
use crate::rpc::{FlowStreamServerStream, ProducerMessage};
use std::sync::Arc;

/// Push every item of `stream` (starting with the already received `first`
/// message) into `receiver` until the producer closes the stream.
///
/// If the consumer goes away the rest of the stream is drained so the
/// producer can finish cleanly. Errors are forwarded to the consumer as
/// metadata and returned.
pub async fn process_inbound_stream(
    flow: &Flow,
    stream: &mut dyn FlowStreamServerStream,
    first: ProducerMessage,
    receiver: Arc<dyn RowReceiver>,
) -> Result<()> {
    let result = forward(flow, stream, first, receiver.as_ref()).await;
    if let Err(err) = &result {
        receiver
            .push(StreamItem::Meta(ProducerMetadata::from_error(err)))
            .await;
    }
    receiver.producer_done();
    result
}

async fn forward(
    flow: &Flow,
    stream: &mut dyn FlowStreamServerStream,
    first: ProducerMessage,
    receiver: &dyn RowReceiver,
) -> Result<()> {
    let flow_canceled = flow.cancellation();
    let stream_canceled = stream.cancellation();
    let mut draining = false;
    let mut next = Some(first);

    loop {
        let msg = match next.take() {
            Some(msg) => msg,
            None => {
                let received = tokio::select! {
                    received = stream.recv() => received?,
                    _ = flow_canceled.cancelled() => {
                        return Err(FlowError::Canceled(format!("flow {}", flow.id())));
                    }
                    _ = stream_canceled.cancelled() => {
                        return Err(FlowError::Transport("inbound stream canceled by peer".to_string()));
                    }
                };
                match received {
                    Some(msg) => msg,
                    None => return Ok(()),
                }
            }
        };
        if draining {
            continue;
        }
        for item in msg.items {
            if receiver.push(item).await == ConsumerStatus::ConsumerClosed {
                log::debug!("{} consumer closed; draining inbound stream", flow.log_tag());
                draining = true;
                break;
            }
        }
    }
}
