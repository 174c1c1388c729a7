// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! The Flow: one node's fragment of a distributed query plan
//!
//! A flow moves through `Constructed → SetUp → Running → Finished →
//! CleanedUp`. `cleanup` is the single teardown path: it is valid from any
//! state once the flow exists and releases the flow's account, monitor, span,
//! and registry entry exactly once.

use super::context::FlowContext;
use super::outbox::Outbox;
use super::processor::{new_processor, run_processor, Processor};
use super::router::make_router;
use super::row::{row_channel, RowChannel, RowReceiver, RowSource};
use super::spec::{FlowSpec, StreamEndpointKind};
use crate::error::{FlowError, Result};
use crate::ids::{FlowId, StreamId};
use crate::registry::FlowRegistry;
use crate::trace::Span;
use crate::util::WaitGroup;
use tokio_util::sync::CancellationToken;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::{AbortHandle, JoinSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    Constructed,
    SetUp,
    Running,
    Finished,
    CleanedUp,
}

struct PendingProcessor {
    processor: Box<dyn Processor>,
    output: Arc<dyn RowReceiver>,
}

/// Everything `setup` builds and `start` launches
#[derive(Default)]
struct Wiring {
    processors: Vec<PendingProcessor>,
    outboxes: Vec<Outbox>,
    inbound: HashMap<StreamId, Arc<dyn RowReceiver>>,
}

pub struct Flow {
    ctx: FlowContext,
    span: Span,
    registry: Arc<FlowRegistry>,
    state: Mutex<FlowState>,
    sync_output: Mutex<Option<Arc<dyn RowReceiver>>>,
    wiring: Mutex<Wiring>,
    tasks: Mutex<JoinSet<Result<()>>>,
    aborts: Mutex<Vec<AbortHandle>>,
    inbound_streams: WaitGroup,
    registered: AtomicBool,
    cancel: CancellationToken,
    error: Mutex<Option<FlowError>>,
}

impl Flow {
    /// Wrap a context. The flow owns `span` and finishes it in `cleanup`.
    pub fn new(
        ctx: FlowContext,
        span: Span,
        registry: Arc<FlowRegistry>,
        sync_output: Option<Arc<dyn RowReceiver>>,
    ) -> Self {
        Self {
            ctx,
            span,
            registry,
            state: Mutex::new(FlowState::Constructed),
            sync_output: Mutex::new(sync_output),
            wiring: Mutex::new(Wiring::default()),
            tasks: Mutex::new(JoinSet::new()),
            aborts: Mutex::new(Vec::new()),
            inbound_streams: WaitGroup::new(),
            registered: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            error: Mutex::new(None),
        }
    }

    pub fn id(&self) -> FlowId {
        self.ctx.id
    }

    pub fn ctx(&self) -> &FlowContext {
        &self.ctx
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn state(&self) -> FlowState {
        *self.state.lock()
    }

    pub fn log_tag(&self) -> String {
        self.ctx.log_tag()
    }

    pub fn is_canceled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// First error reported by any processor or outbox, once waited on
    pub fn error(&self) -> Option<FlowError> {
        self.error.lock().clone()
    }

    /// Wire the processor DAG described by `spec`.
    ///
    /// Local streams must have exactly one producer and one consumer. Remote
    /// inputs become inbound streams peers connect to through the registry;
    /// remote outputs become outboxes. A flow created with a sync output must
    /// route exactly one stream to it.
    pub fn setup(&self, spec: &FlowSpec) -> Result<()> {
        {
            let state = self.state.lock();
            if *state != FlowState::Constructed {
                return Err(FlowError::Internal(format!(
                    "setup called on flow in state {:?}",
                    *state
                )));
            }
        }

        let mut local: HashMap<StreamId, Arc<RowChannel>> = HashMap::new();
        let mut inbound: HashMap<StreamId, Arc<dyn RowReceiver>> = HashMap::new();
        let mut all_inputs: Vec<Vec<RowSource>> = Vec::with_capacity(spec.processors.len());

        for (idx, proc_spec) in spec.processors.iter().enumerate() {
            let mut sources = Vec::with_capacity(proc_spec.inputs.len());
            for input in &proc_spec.inputs {
                if input.streams.is_empty() {
                    return Err(FlowError::SetupError(format!(
                        "processor {} has an input with no streams",
                        idx
                    )));
                }
                let (senders, source) = row_channel(input.streams.len());
                for (stream, sender) in input.streams.iter().zip(senders) {
                    let id = stream.stream_id;
                    if local.contains_key(&id) || inbound.contains_key(&id) {
                        return Err(FlowError::SetupError(format!(
                            "stream {} consumed more than once",
                            id
                        )));
                    }
                    match stream.kind {
                        StreamEndpointKind::Local => {
                            local.insert(id, sender);
                        }
                        StreamEndpointKind::Remote { .. } => {
                            inbound.insert(id, sender);
                        }
                        StreamEndpointKind::SyncResponse => {
                            return Err(FlowError::SetupError(format!(
                                "processor {} reads from the sync response stream",
                                idx
                            )));
                        }
                    }
                }
                sources.push(source);
            }
            all_inputs.push(sources);
        }

        let mut sync_output = self.sync_output.lock().take();
        let had_sync_output = sync_output.is_some();
        let mut processors = Vec::with_capacity(spec.processors.len());
        let mut outboxes = Vec::new();

        for (proc_spec, inputs) in spec.processors.iter().zip(all_inputs) {
            let mut outputs: Vec<Arc<dyn RowReceiver>> = Vec::with_capacity(proc_spec.output.streams.len());
            for stream in &proc_spec.output.streams {
                match stream.kind {
                    StreamEndpointKind::Local => {
                        let sender = local.remove(&stream.stream_id).ok_or_else(|| {
                            FlowError::SetupError(format!(
                                "unconnected local stream {}",
                                stream.stream_id
                            ))
                        })?;
                        outputs.push(sender);
                    }
                    StreamEndpointKind::Remote { peer } => {
                        let (receiver, outbox) = Outbox::new(&self.ctx, stream.stream_id, peer);
                        outputs.push(receiver);
                        outboxes.push(outbox);
                    }
                    StreamEndpointKind::SyncResponse => {
                        let output = sync_output.take().ok_or_else(|| {
                            FlowError::SetupError(if had_sync_output {
                                "sync response stream used more than once".to_string()
                            } else {
                                "sync response stream in a flow without a sync output".to_string()
                            })
                        })?;
                        outputs.push(output);
                    }
                }
            }
            let output = make_router(&proc_spec.output, outputs)?;
            let processor = new_processor(&self.ctx, &proc_spec.core, inputs)?;
            processors.push(PendingProcessor { processor, output });
        }

        if let Some(id) = local.keys().next() {
            return Err(FlowError::SetupError(format!(
                "local stream {} has no producer",
                id
            )));
        }
        if sync_output.is_some() {
            return Err(FlowError::SetupError(
                "sync flow has no sync response stream".to_string(),
            ));
        }

        log::debug!(
            "{} set up flow with {} processors, {} inbound streams, {} outboxes",
            self.log_tag(),
            processors.len(),
            inbound.len(),
            outboxes.len()
        );
        *self.wiring.lock() = Wiring {
            processors,
            outboxes,
            inbound,
        };
        *self.state.lock() = FlowState::SetUp;
        Ok(())
    }

    /// Register the flow so peers can connect its inbound streams, then launch
    /// its processors and outboxes.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        let state = self.state();
        if state != FlowState::SetUp {
            return Err(FlowError::Internal(format!(
                "start called on flow in state {:?}",
                state
            )));
        }
        if let Some(hook) = &self.ctx.testing_knobs.before_flow_start {
            hook(self.id())?;
        }

        let wiring = std::mem::take(&mut *self.wiring.lock());
        let num_inbound = wiring.inbound.len();
        // Counted before registering: a peer may connect and finish a stream
        // as soon as the flow is visible.
        self.inbound_streams.add(num_inbound);
        if let Err(err) =
            self.registry
                .register_flow(self.id(), self.clone(), wiring.inbound, self.ctx.stream_timeout)
        {
            for _ in 0..num_inbound {
                self.inbound_streams.done();
            }
            return Err(err);
        }
        self.registered.store(true, Ordering::SeqCst);
        *self.state.lock() = FlowState::Running;

        let log_tag = self.log_tag();
        log::debug!(
            "{} starting {} processors and {} outboxes",
            log_tag,
            wiring.processors.len(),
            wiring.outboxes.len()
        );
        let mut tasks = self.tasks.lock();
        let mut aborts = self.aborts.lock();
        for pending in wiring.processors {
            aborts.push(tasks.spawn(run_processor(
                pending.processor,
                pending.output,
                log_tag.clone(),
            )));
        }
        for outbox in wiring.outboxes {
            aborts.push(tasks.spawn(outbox.run()));
        }
        Ok(())
    }

    /// Wait for every processor, outbox, and inbound stream of the flow.
    /// Returns the first error any of them reported.
    pub async fn wait(&self) -> Result<()> {
        let mut tasks = std::mem::take(&mut *self.tasks.lock());
        let mut first_err: Option<FlowError> = None;
        while let Some(joined) = tasks.join_next().await {
            let err = match joined {
                Ok(Ok(())) => continue,
                Ok(Err(err)) => err,
                Err(join_err) if join_err.is_cancelled() => {
                    FlowError::Canceled(format!("flow {}", self.id()))
                }
                Err(join_err) => FlowError::Internal(format!("flow task panicked: {}", join_err)),
            };
            if first_err.is_none() {
                first_err = Some(err);
            }
        }
        self.inbound_streams.wait().await;

        {
            let mut state = self.state.lock();
            if *state == FlowState::Running {
                *state = FlowState::Finished;
            }
        }
        match first_err {
            Some(err) => {
                *self.error.lock() = Some(err.clone());
                Err(err)
            }
            None => Ok(()),
        }
    }

    /// Abort the flow's work. Inbound streams that never connected are
    /// released so `wait` returns.
    pub fn cancel(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        log::info!("{} canceling flow", self.log_tag());
        self.cancel.cancel();
        for handle in self.aborts.lock().iter() {
            handle.abort();
        }
        if self.registered.load(Ordering::SeqCst) {
            for (_, receiver) in self.registry.take_unconnected_streams(self.id()) {
                receiver.producer_done();
                self.inbound_stream_done();
            }
        }
    }

    /// Release everything the flow owns. Safe to call from any state; only
    /// the first call does anything.
    pub fn cleanup(&self) {
        let previous = {
            let mut state = self.state.lock();
            let previous = *state;
            if previous == FlowState::CleanedUp {
                return;
            }
            *state = FlowState::CleanedUp;
            previous
        };
        if previous == FlowState::Running {
            log::error!("{} cleanup of a flow that was not waited on", self.log_tag());
            self.cancel();
        }
        if self.registered.swap(false, Ordering::SeqCst) {
            self.registry.unregister_flow(self.id());
        }

        // Processors that never ran still hold accounts on the flow monitor.
        *self.wiring.lock() = Wiring::default();
        self.sync_output.lock().take();

        self.ctx.eval_ctx.active_mem_acc.close();
        self.ctx.eval_ctx.monitor.stop();
        self.span.finish();
        log::debug!("{} cleaned up flow ({:?} before cleanup)", self.log_tag(), previous);
    }

    pub(crate) fn inbound_stream_done(&self) {
        self.inbound_streams.done();
    }
}

impl std::fmt::Debug for Flow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Flow")
            .field("id", &self.id())
            .field("state", &self.state())
            .finish()
    }
}
