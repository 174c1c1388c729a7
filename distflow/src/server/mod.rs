// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Flow server entry points

pub mod metrics;
pub mod outbox;
pub mod server_impl;
pub mod version;

pub use metrics::{MetricsSnapshot, ServerMetrics};
pub use outbox::SyncFlowOutbox;
pub use server_impl::{ServerConfig, ServerImpl};
pub use version::{check_version, MIN_ACCEPTED_VERSION, VERSION};
