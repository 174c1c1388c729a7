// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Messages exchanged by the flow setup, sync flow, and flow stream RPCs

use crate::error::{FlowError, RemoteError, Result};
use crate::flow::row::StreamItem;
use crate::flow::spec::FlowSpec;
use crate::ids::{FlowId, StreamId};
use crate::txn::{HlcTimestamp, TxnDescriptor};
use serde::{Deserialize, Serialize};

/// Evaluation settings fixed by the gateway for the whole query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct EvalContextParams {
    /// Time zone name; empty means UTC
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub database: String,
    #[serde(default)]
    pub search_path: Vec<String>,
    #[serde(default)]
    pub stmt_timestamp_nanos: i64,
    #[serde(default)]
    pub txn_timestamp_nanos: i64,
    #[serde(default)]
    pub cluster_timestamp: HlcTimestamp,
}

/// Request to set up the local fragment of a flow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetupFlowRequest {
    pub version: u32,
    pub txn: TxnDescriptor,
    pub eval_context: EvalContextParams,
    pub flow: FlowSpec,
}

impl SetupFlowRequest {
    /// Request at the current protocol version
    pub fn new(txn: TxnDescriptor, eval_context: EvalContextParams, flow: FlowSpec) -> Self {
        Self {
            version: crate::server::VERSION,
            txn,
            eval_context,
            flow,
        }
    }

    pub fn flow_id(&self) -> FlowId {
        self.flow.flow_id
    }
}

/// Names the flow and stream an inbound stream feeds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamHeader {
    pub flow_id: FlowId,
    pub stream_id: StreamId,
}

/// A batch of stream items, optionally preceded by the stream header
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ProducerMessage {
    pub header: Option<StreamHeader>,
    pub items: Vec<StreamItem>,
}

/// Client-to-server message of the sync flow RPC
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ConsumerSignal {
    pub setup_flow_request: Option<SetupFlowRequest>,
}

/// Response of the unary setup RPC.
///
/// Deployment failures are carried here rather than as a transport error;
/// callers must check for `Rejected` before treating the call as a success.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SetupFlowResponse {
    Accepted,
    Rejected(RemoteError),
}

impl SetupFlowResponse {
    pub fn rejected(error: &FlowError) -> Self {
        SetupFlowResponse::Rejected(RemoteError::from(error))
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, SetupFlowResponse::Accepted)
    }

    pub fn into_result(self) -> Result<()> {
        match self {
            SetupFlowResponse::Accepted => Ok(()),
            SetupFlowResponse::Rejected(err) => Err(FlowError::Remote(err)),
        }
    }
}
