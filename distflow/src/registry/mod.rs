// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Rendezvous between running flows and the streams that feed them

pub mod flow_registry;
pub mod inbound;

pub use flow_registry::{FlowRegistry, InboundStreamGuard};
pub use inbound::process_inbound_stream;
