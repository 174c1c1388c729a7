// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Evaluation context shared by the processors of a flow

pub mod context;
pub mod location;
pub mod regex_cache;

pub use context::EvalContext;
pub use location::Location;
pub use regex_cache::RegexpCache;
