// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Admission of asynchronously started flows
//!
//! Flows set up through the unary setup RPC are handed here. Up to
//! `max_running_flows` run at once; the rest wait in FIFO order. Each running
//! flow is a stopper task that starts, waits on, and cleans up the flow.

use crate::config::Settings;
use crate::error::{FlowError, Result};
use crate::flow::Flow;
use crate::stopper::Stopper;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Default)]
struct SchedulerState {
    running: usize,
    queue: VecDeque<Arc<Flow>>,
    /// Set under the lock when the queue is drained for shutdown
    closed: bool,
}

pub struct FlowScheduler {
    stopper: Arc<Stopper>,
    settings: Arc<Settings>,
    state: Mutex<SchedulerState>,
    total_queued: AtomicU64,
}

impl FlowScheduler {
    pub fn new(stopper: Arc<Stopper>, settings: Arc<Settings>) -> Arc<Self> {
        Arc::new(Self {
            stopper,
            settings,
            state: Mutex::new(SchedulerState::default()),
            total_queued: AtomicU64::new(0),
        })
    }

    /// Watch for node shutdown and clean up flows that never got to run
    pub fn start(self: &Arc<Self>) -> Result<()> {
        let scheduler = Arc::clone(self);
        let quiesce = self.stopper.should_quiesce();
        self.stopper.run_async_task("flow scheduler", async move {
            quiesce.cancelled().await;
            scheduler.close();
        })?;
        Ok(())
    }

    /// Refuse further flows and clean up the queued ones
    fn close(&self) {
        let queued: Vec<Arc<Flow>> = {
            let mut state = self.state.lock();
            state.closed = true;
            state.queue.drain(..).collect()
        };
        if !queued.is_empty() {
            log::info!("flow scheduler quiescing; dropping {} queued flows", queued.len());
        }
        for flow in queued {
            flow.cleanup();
        }
    }

    /// Run `flow` now if below the concurrency limit, otherwise queue it.
    /// Fails once the node is shutting down; the caller still owns the flow
    /// in that case.
    pub fn schedule_flow(self: &Arc<Self>, flow: Arc<Flow>) -> Result<()> {
        if self.stopper.is_quiescing() {
            return Err(FlowError::NodeUnavailable);
        }
        {
            let mut state = self.state.lock();
            if state.closed {
                return Err(FlowError::NodeUnavailable);
            }
            if state.running >= self.settings.max_running_flows() {
                log::info!(
                    "{} flow scheduler enqueuing flow: {} already running",
                    flow.log_tag(),
                    state.running
                );
                state.queue.push_back(flow);
                self.total_queued.fetch_add(1, Ordering::Relaxed);
                return Ok(());
            }
            state.running += 1;
        }
        if let Err(err) = self.run_flow(Arc::clone(&flow)) {
            self.state.lock().running -= 1;
            return Err(err);
        }
        Ok(())
    }

    fn run_flow(self: &Arc<Self>, flow: Arc<Flow>) -> Result<()> {
        let scheduler = Arc::clone(self);
        self.stopper.run_async_task("flow", async move {
            match flow.start() {
                Ok(()) => {
                    if let Err(err) = flow.wait().await {
                        log::warn!("{} flow failed: {}", flow.log_tag(), err);
                    }
                }
                Err(err) => log::error!("{} error starting flow: {}", flow.log_tag(), err),
            }
            flow.cleanup();
            scheduler.flow_done();
        })?;
        Ok(())
    }

    /// Hand the slot of a finished flow to the next queued one
    fn flow_done(self: &Arc<Self>) {
        loop {
            let next = {
                let mut state = self.state.lock();
                match state.queue.pop_front() {
                    Some(flow) => flow,
                    None => {
                        state.running -= 1;
                        return;
                    }
                }
            };
            log::debug!("{} flow scheduler running queued flow", next.log_tag());
            match self.run_flow(Arc::clone(&next)) {
                Ok(()) => return,
                Err(err) => {
                    log::warn!("{} dropping queued flow: {}", next.log_tag(), err);
                    next.cleanup();
                }
            }
        }
    }

    pub fn running_count(&self) -> usize {
        self.state.lock().running
    }

    pub fn queued_count(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Flows that ever had to wait for a slot
    pub fn total_queued(&self) -> u64 {
        self.total_queued.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for FlowScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("FlowScheduler")
            .field("running", &state.running)
            .field("queued", &state.queue.len())
            .finish()
    }
}
