// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Flow admission

pub mod flow_scheduler;

pub use flow_scheduler::FlowScheduler;
