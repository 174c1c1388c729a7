// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Node shutdown coordination
//!
//! Work that must finish (or be canceled) before the node stops runs as a
//! stopper task. Once the stopper starts quiescing it refuses new tasks, and
//! `stop` returns only after every in-flight task has finished.

use crate::error::{FlowError, Result};
use std::future::Future;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::task_tracker::TaskTrackerToken;
use tokio_util::task::TaskTracker;

#[derive(Debug, Default)]
pub struct Stopper {
    quiesce: CancellationToken,
    tasks: TaskTracker,
}

impl Stopper {
    pub fn new() -> Self {
        Self::default()
    }

    fn begin_task(&self, name: &str) -> Result<TaskTrackerToken> {
        // Take the token before checking so `stop` can never miss a task that
        // slipped in while quiescing started.
        let token = self.tasks.token();
        if self.quiesce.is_cancelled() {
            log::debug!("refusing task {:?}: node is quiescing", name);
            return Err(FlowError::NodeUnavailable);
        }
        Ok(token)
    }

    /// Run `fut` to completion as a tracked task on the caller's task
    pub async fn run_task<F, T>(&self, name: &str, fut: F) -> Result<T>
    where
        F: Future<Output = T>,
    {
        let _token = self.begin_task(name)?;
        Ok(fut.await)
    }

    /// Spawn `fut` as a tracked task
    pub fn run_async_task<F>(&self, name: &str, fut: F) -> Result<JoinHandle<()>>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let token = self.begin_task(name)?;
        Ok(tokio::spawn(async move {
            // Dropped on completion, panic or abort.
            let _token = token;
            fut.await;
        }))
    }

    /// Token canceled once the node starts shutting down
    pub fn should_quiesce(&self) -> CancellationToken {
        self.quiesce.clone()
    }

    pub fn is_quiescing(&self) -> bool {
        self.quiesce.is_cancelled()
    }

    pub fn num_tasks(&self) -> usize {
        self.tasks.len()
    }

    /// Quiesce and wait for all in-flight tasks
    pub async fn stop(&self) {
        log::info!("stopper quiescing with {} tasks in flight", self.num_tasks());
        self.quiesce.cancel();
        self.tasks.close();
        self.tasks.wait().await;
        log::info!("stopper stopped");
    }
}
