// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! CLI module for distflow
//!
//! Runs a multi-node plan on an in-process cluster and prints what the
//! gateway flow returned.

pub mod commands;
pub mod output;
pub mod plan;
pub mod runner;

pub use commands::{Cli, Commands};
pub use runner::{handle_run, handle_settings};
