// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Small synchronization helpers

pub mod wait_group;

pub use wait_group::WaitGroup;
