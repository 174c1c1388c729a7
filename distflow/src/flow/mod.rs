// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Flows and the processors, routers, and outboxes they are built from

pub mod context;
pub mod lifecycle;
pub mod outbox;
pub mod processor;
pub mod router;
pub mod row;
mod sorter;
pub mod spec;

pub use context::{FlowContext, FlowHook, TestingKnobs};
pub use lifecycle::{Flow, FlowState};
pub use outbox::OUTBOX_FLUSH_ROWS;
pub use processor::{new_processor, Processor};
pub use row::{
    row_channel, ConsumerStatus, Datum, ProducerMetadata, Row, RowChannel, RowReceiver,
    RowSource, StreamItem,
};
pub use spec::{
    FlowSpec, InputSyncSpec, OutputRouterSpec, ProcessorCoreSpec, ProcessorSpec, RouterType,
    StreamEndpointKind, StreamEndpointSpec,
};
