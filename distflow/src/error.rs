// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Flow execution error types

use crate::ids::{FlowId, StreamId};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors produced while setting up, running, or streaming into flows
#[derive(Error, Debug, Clone)]
pub enum FlowError {
    #[error("version mismatch in flow request: {requested}; this node accepts {min} through {max}")]
    VersionMismatch { requested: u32, min: u32, max: u32 },

    #[error("setup_flow called before the node id was resolved")]
    NodeIdUnresolved,

    #[error("invalid time zone {0:?}")]
    InvalidTimeZone(String),

    #[error("error setting up flow: {0}")]
    SetupError(String),

    #[error("first message in RunSyncFlow doesn't contain a setup flow request")]
    MissingSetupRequest,

    #[error("missing header message")]
    MissingHeader,

    #[error("no header in first message")]
    NoHeaderInFirstMessage,

    #[error("flow {flow_id} not found after waiting {timeout_ms}ms for it to be set up")]
    FlowConnectionTimeout { flow_id: FlowId, timeout_ms: u64 },

    #[error("flow {flow_id}: no inbound stream {stream_id}")]
    UnknownInboundStream { flow_id: FlowId, stream_id: StreamId },

    #[error("flow {flow_id}: inbound stream {stream_id} already connected")]
    StreamAlreadyConnected { flow_id: FlowId, stream_id: StreamId },

    #[error("flow {flow_id}: no inbound stream connection for stream {stream_id}")]
    NoInboundStreamConnection { flow_id: FlowId, stream_id: StreamId },

    #[error("{monitor}: memory budget exceeded: {requested} bytes requested, {used} bytes in use, budget {limit} bytes")]
    MemoryLimitExceeded {
        monitor: String,
        requested: usize,
        used: usize,
        limit: usize,
    },

    #[error("{0}: memory monitor already stopped")]
    MonitorStopped(String),

    #[error("temp storage unavailable: {0}")]
    TempStorageUnavailable(String),

    #[error("temp storage error: {0}")]
    TempStorage(String),

    #[error("node unavailable; try another peer")]
    NodeUnavailable,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("query execution canceled: {0}")]
    Canceled(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Remote(RemoteError),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type for flow operations
pub type Result<T> = std::result::Result<T, FlowError>;

/// Coarse error classes that callers branch on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorClass {
    /// Malformed or incompatible request; rejected before allocating anything
    Protocol,
    /// Budget exceeded or temp storage missing
    ResourceExhausted,
    /// The flow could not be deployed on this node
    Deployment,
    /// A single inbound stream failed to attach
    StreamHandshake,
    /// The flow was accepted but failed while running
    Runtime,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorClass::Protocol => "protocol",
            ErrorClass::ResourceExhausted => "resource exhausted",
            ErrorClass::Deployment => "deployment",
            ErrorClass::StreamHandshake => "stream handshake",
            ErrorClass::Runtime => "runtime",
        };
        f.write_str(name)
    }
}

impl FlowError {
    /// Classify the error for callers that must choose between retrying,
    /// replanning, or surfacing a query failure.
    pub fn class(&self) -> ErrorClass {
        match self {
            FlowError::VersionMismatch { .. }
            | FlowError::MissingSetupRequest
            | FlowError::Serialization(_) => ErrorClass::Protocol,

            FlowError::NodeIdUnresolved
            | FlowError::InvalidTimeZone(_)
            | FlowError::SetupError(_)
            | FlowError::NodeUnavailable
            | FlowError::Config(_) => ErrorClass::Deployment,

            FlowError::MemoryLimitExceeded { .. }
            | FlowError::TempStorageUnavailable(_)
            | FlowError::TempStorage(_) => ErrorClass::ResourceExhausted,

            FlowError::MissingHeader
            | FlowError::NoHeaderInFirstMessage
            | FlowError::FlowConnectionTimeout { .. }
            | FlowError::UnknownInboundStream { .. }
            | FlowError::StreamAlreadyConnected { .. }
            | FlowError::NoInboundStreamConnection { .. } => ErrorClass::StreamHandshake,

            FlowError::Remote(remote) => remote.class,

            FlowError::Transport(_)
            | FlowError::Canceled(_)
            | FlowError::MonitorStopped(_)
            | FlowError::Internal(_) => ErrorClass::Runtime,
        }
    }

    /// True for out-of-memory conditions raised by a bound account
    pub fn is_out_of_memory(&self) -> bool {
        match self {
            FlowError::MemoryLimitExceeded { .. } => true,
            FlowError::Remote(remote) => remote.out_of_memory,
            _ => false,
        }
    }
}

/// Wire form of a [`FlowError`].
///
/// Errors crossing node boundaries (setup responses, producer metadata) are
/// flattened to a class plus message so they survive serialization intact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteError {
    pub class: ErrorClass,
    pub message: String,
    #[serde(default)]
    pub out_of_memory: bool,
}

impl RemoteError {
    pub fn new(class: ErrorClass, message: impl Into<String>) -> Self {
        Self {
            class,
            message: message.into(),
            out_of_memory: false,
        }
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} error: {}", self.class, self.message)
    }
}

impl From<&FlowError> for RemoteError {
    fn from(error: &FlowError) -> Self {
        match error {
            FlowError::Remote(remote) => remote.clone(),
            other => RemoteError {
                class: other.class(),
                message: other.to_string(),
                out_of_memory: other.is_out_of_memory(),
            },
        }
    }
}

impl From<RemoteError> for FlowError {
    fn from(error: RemoteError) -> Self {
        FlowError::Remote(error)
    }
}

impl From<bincode::Error> for FlowError {
    fn from(error: bincode::Error) -> Self {
        FlowError::Serialization(error.to_string())
    }
}

impl From<serde_json::Error> for FlowError {
    fn from(error: serde_json::Error) -> Self {
        FlowError::Serialization(error.to_string())
    }
}
