// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Output routers: fan a processor's output out to its streams

use super::row::{ConsumerStatus, RowReceiver, StreamItem};
use super::spec::{OutputRouterSpec, RouterType};
use crate::error::{FlowError, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Build the receiver a processor pushes into
pub fn make_router(
    spec: &OutputRouterSpec,
    mut outputs: Vec<Arc<dyn RowReceiver>>,
) -> Result<Arc<dyn RowReceiver>> {
    match spec.router {
        RouterType::PassThrough => {
            if outputs.len() != 1 {
                return Err(FlowError::SetupError(format!(
                    "pass-through router needs exactly one stream, got {}",
                    outputs.len()
                )));
            }
            Ok(outputs.remove(0))
        }
        RouterType::Mirror => {
            if outputs.is_empty() {
                return Err(FlowError::SetupError(
                    "mirror router needs at least one stream".to_string(),
                ));
            }
            Ok(Arc::new(MirrorRouter::new(outputs)))
        }
    }
}

/// Sends every item to every stream. Closed streams are skipped; the router
/// reports closed only once all of them are.
struct MirrorRouter {
    outputs: Vec<Arc<dyn RowReceiver>>,
    closed: Vec<AtomicBool>,
}

impl MirrorRouter {
    fn new(outputs: Vec<Arc<dyn RowReceiver>>) -> Self {
        let closed = outputs.iter().map(|_| AtomicBool::new(false)).collect();
        Self { outputs, closed }
    }
}

#[async_trait]
impl RowReceiver for MirrorRouter {
    async fn push(&self, item: StreamItem) -> ConsumerStatus {
        let mut open = 0;
        for (output, closed) in self.outputs.iter().zip(&self.closed) {
            if closed.load(Ordering::Acquire) {
                continue;
            }
            match output.push(item.clone()).await {
                ConsumerStatus::NeedMoreRows => open += 1,
                ConsumerStatus::ConsumerClosed => closed.store(true, Ordering::Release),
            }
        }
        if open == 0 {
            ConsumerStatus::ConsumerClosed
        } else {
            ConsumerStatus::NeedMoreRows
        }
    }

    fn producer_done(&self) {
        for output in &self.outputs {
            output.producer_done();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::row::{row_channel, Datum};
    use crate::flow::spec::StreamEndpointSpec;

    fn spec(router: RouterType, n: u32) -> OutputRouterSpec {
        OutputRouterSpec {
            router,
            streams: (0..n).map(StreamEndpointSpec::local).collect(),
        }
    }

    #[test]
    fn test_pass_through_requires_one_stream() {
        let (senders, _source) = row_channel(2);
        let outputs: Vec<Arc<dyn RowReceiver>> =
            senders.into_iter().map(|s| s as Arc<dyn RowReceiver>).collect();
        let result = make_router(&spec(RouterType::PassThrough, 2), outputs);
        assert!(matches!(result, Err(FlowError::SetupError(_))));
    }

    #[tokio::test]
    async fn test_mirror_copies_until_all_closed() {
        let (mut a_senders, mut a) = row_channel(1);
        let (mut b_senders, b) = row_channel(1);
        let outputs: Vec<Arc<dyn RowReceiver>> = vec![a_senders.remove(0), b_senders.remove(0)];
        let router = make_router(&spec(RouterType::Mirror, 2), outputs).unwrap();

        let row = StreamItem::Row(vec![Datum::Int(1)]);
        assert_eq!(router.push(row.clone()).await, ConsumerStatus::NeedMoreRows);
        assert_eq!(a.next().await, Some(row.clone()));

        drop(b);
        assert_eq!(router.push(row.clone()).await, ConsumerStatus::NeedMoreRows);
        drop(a);
        assert_eq!(router.push(row).await, ConsumerStatus::ConsumerClosed);
        router.producer_done();
    }
}
