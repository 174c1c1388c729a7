// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Hierarchical memory accounting
//!
//! - One root monitor per node, sized against the node's memory budget
//! - One child monitor per flow, drawing on the root
//! - Bound accounts per processor, drawing on the flow monitor
//!
//! Running out of budget is an ordinary error returned to the allocating
//! account, never a panic.

pub mod account;
pub mod monitor;

pub use account::BoundAccount;
pub use monitor::{MemoryMonitor, MemoryStats};
