// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Flow protocol versioning
//!
//! Every setup request carries the version of the planner that produced it.
//! Bump `VERSION` whenever the request or stream messages change in a way an
//! older server cannot handle, and raise `MIN_ACCEPTED_VERSION` only once no
//! node in the cluster still plans with the older version. Keeping the window
//! open lets a rolling upgrade mix old and new nodes.

use crate::error::{FlowError, Result};

/// Version this node produces
pub const VERSION: u32 = 4;

/// Oldest version this node still serves
pub const MIN_ACCEPTED_VERSION: u32 = 4;

/// Reject `requested` unless it falls in the accepted window
pub fn check_version(requested: u32) -> Result<()> {
    if (MIN_ACCEPTED_VERSION..=VERSION).contains(&requested) {
        Ok(())
    } else {
        Err(FlowError::VersionMismatch {
            requested,
            min: MIN_ACCEPTED_VERSION,
            max: VERSION,
        })
    }
}
