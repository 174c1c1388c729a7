// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Description of the processor DAG of one flow fragment, as sent by the
//! gateway in a setup request

use super::row::Row;
use crate::ids::{FlowId, NodeId, StreamId};
use serde::{Deserialize, Serialize};

/// The local part of a distributed plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowSpec {
    pub flow_id: FlowId,
    pub processors: Vec<ProcessorSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessorSpec {
    /// One entry per logical input; each merges its streams without ordering
    #[serde(default)]
    pub inputs: Vec<InputSyncSpec>,
    pub core: ProcessorCoreSpec,
    pub output: OutputRouterSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputSyncSpec {
    pub streams: Vec<StreamEndpointSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputRouterSpec {
    #[serde(default)]
    pub router: RouterType,
    pub streams: Vec<StreamEndpointSpec>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RouterType {
    /// Exactly one output stream
    #[default]
    PassThrough,
    /// Every row goes to every stream
    Mirror,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamEndpointSpec {
    pub stream_id: StreamId,
    pub kind: StreamEndpointKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamEndpointKind {
    /// Both ends are processors of this flow
    Local,
    /// The other end lives on `peer`
    Remote { peer: NodeId },
    /// Output goes back over the connection that requested a sync flow
    SyncResponse,
}

impl StreamEndpointSpec {
    pub fn local(id: u32) -> Self {
        Self {
            stream_id: StreamId(id),
            kind: StreamEndpointKind::Local,
        }
    }

    pub fn remote(id: u32, peer: NodeId) -> Self {
        Self {
            stream_id: StreamId(id),
            kind: StreamEndpointKind::Remote { peer },
        }
    }

    pub fn sync_response() -> Self {
        Self {
            stream_id: StreamId(0),
            kind: StreamEndpointKind::SyncResponse,
        }
    }
}

/// What a processor does
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ProcessorCoreSpec {
    /// Emit a fixed set of rows
    Values { rows: Vec<Row> },
    /// Forward input unchanged
    NoOp,
    /// Keep rows whose string column matches `pattern`
    RegexFilter { column: usize, pattern: String },
    /// Sort all input rows on one column
    Sorter { column: usize, descending: bool },
}

impl ProcessorCoreSpec {
    pub fn name(&self) -> &'static str {
        match self {
            ProcessorCoreSpec::Values { .. } => "values",
            ProcessorCoreSpec::NoOp => "noop",
            ProcessorCoreSpec::RegexFilter { .. } => "regex filter",
            ProcessorCoreSpec::Sorter { .. } => "sorter",
        }
    }

    /// Number of logical inputs the core consumes
    pub fn num_inputs(&self) -> usize {
        match self {
            ProcessorCoreSpec::Values { .. } => 0,
            _ => 1,
        }
    }
}
