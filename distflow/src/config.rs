// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Server settings

use crate::error::{FlowError, Result};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// Environment variable overriding the noteworthy memory usage threshold
pub const NOTEWORTHY_MEMORY_USAGE_ENV: &str = "DISTFLOW_NOTEWORTHY_MEMORY_USAGE";

/// Noteworthy per-flow memory usage, 10KiB unless overridden by environment
pub static NOTEWORTHY_MEMORY_USAGE_BYTES: Lazy<usize> = Lazy::new(|| {
    match std::env::var(NOTEWORTHY_MEMORY_USAGE_ENV) {
        Ok(raw) => match raw.trim().parse::<usize>() {
            Ok(bytes) => bytes,
            Err(e) => {
                log::warn!(
                    "ignoring invalid {}={:?}: {}",
                    NOTEWORTHY_MEMORY_USAGE_ENV,
                    raw,
                    e
                );
                10 * 1024
            }
        },
        Err(_) => 10 * 1024,
    }
});

/// Static server settings, loadable from a JSON file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Flows allowed to run at once; further flows are queued
    pub max_running_flows: usize,

    /// How long an inbound stream waits for its flow to be set up, and how
    /// long a registered flow waits for its inbound streams to connect
    pub flow_stream_timeout_ms: u64,

    /// Budget of the node-wide root monitor (bytes)
    pub root_memory_budget_bytes: usize,

    /// Optional budget for each flow's monitor (bytes); bounded by the root
    /// budget when unset
    pub flow_memory_budget_bytes: Option<usize>,

    /// Usage above which monitors log their growth
    pub noteworthy_memory_bytes: usize,

    /// Whether processors may spill to temp storage
    pub use_temp_storage: bool,

    /// Location of the temp storage engine; a system temp dir when unset
    pub temp_storage_path: Option<PathBuf>,

    /// Capacity of the shared regular expression cache
    pub regexp_cache_size: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            max_running_flows: 500,
            flow_stream_timeout_ms: 10_000,
            root_memory_budget_bytes: 1024 * 1024 * 1024, // 1GB
            flow_memory_budget_bytes: None,
            noteworthy_memory_bytes: *NOTEWORTHY_MEMORY_USAGE_BYTES,
            use_temp_storage: false,
            temp_storage_path: None,
            regexp_cache_size: 512,
        }
    }
}

impl ServerSettings {
    /// Load settings from a JSON file. Missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| FlowError::Config(format!("reading {}: {}", path.display(), e)))?;
        let settings: ServerSettings = serde_json::from_str(&raw)
            .map_err(|e| FlowError::Config(format!("parsing {}: {}", path.display(), e)))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_running_flows == 0 {
            return Err(FlowError::Config(
                "max_running_flows must be at least 1".to_string(),
            ));
        }
        if self.flow_stream_timeout_ms == 0 {
            return Err(FlowError::Config(
                "flow_stream_timeout_ms must be positive".to_string(),
            ));
        }
        if let Some(flow_budget) = self.flow_memory_budget_bytes {
            if flow_budget > self.root_memory_budget_bytes {
                return Err(FlowError::Config(format!(
                    "flow_memory_budget_bytes ({}) exceeds root_memory_budget_bytes ({})",
                    flow_budget, self.root_memory_budget_bytes
                )));
            }
        }
        Ok(())
    }

    pub fn flow_stream_timeout(&self) -> Duration {
        Duration::from_millis(self.flow_stream_timeout_ms)
    }
}

/// Settings that can change while the server runs
#[derive(Debug)]
pub struct Settings {
    use_temp_storage: AtomicBool,
    max_running_flows: AtomicUsize,
}

impl Settings {
    pub fn new(use_temp_storage: bool, max_running_flows: usize) -> Self {
        Self {
            use_temp_storage: AtomicBool::new(use_temp_storage),
            max_running_flows: AtomicUsize::new(max_running_flows),
        }
    }

    pub fn from_server_settings(settings: &ServerSettings) -> Self {
        Self::new(settings.use_temp_storage, settings.max_running_flows)
    }

    pub fn use_temp_storage(&self) -> bool {
        self.use_temp_storage.load(Ordering::SeqCst)
    }

    pub fn set_use_temp_storage(&self, enabled: bool) {
        self.use_temp_storage.store(enabled, Ordering::SeqCst);
    }

    pub fn max_running_flows(&self) -> usize {
        self.max_running_flows.load(Ordering::SeqCst)
    }

    pub fn set_max_running_flows(&self, limit: usize) {
        self.max_running_flows.store(limit.max(1), Ordering::SeqCst);
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::from_server_settings(&ServerSettings::default())
    }
}
