// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Temporary disk storage shared by all processors of a node

pub mod engine;
pub mod id_generator;

#[cfg(feature = "sled-backend")]
pub use engine::SledTempStorage;
pub use engine::{KvIter, MemoryTempStorage, TempStorage};
pub use id_generator::{prefix_for, TempStorageIdGenerator};

use crate::config::ServerSettings;
use crate::error::Result;
use std::sync::Arc;

/// Open the engine the settings ask for: none unless spilling is enabled,
/// sled when the backend is compiled in, memory otherwise.
pub fn open_engine(settings: &ServerSettings) -> Result<Option<Arc<dyn TempStorage>>> {
    if !settings.use_temp_storage {
        return Ok(None);
    }
    #[cfg(feature = "sled-backend")]
    {
        let engine = SledTempStorage::open(settings.temp_storage_path.as_deref())?;
        log::info!(
            "opened sled temp storage{}",
            settings
                .temp_storage_path
                .as_ref()
                .map(|p| format!(" at {}", p.display()))
                .unwrap_or_default()
        );
        Ok(Some(Arc::new(engine)))
    }
    #[cfg(not(feature = "sled-backend"))]
    {
        log::info!("sled backend not compiled in; using in-memory temp storage");
        Ok(Some(Arc::new(MemoryTempStorage::new())))
    }
}
