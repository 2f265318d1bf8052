// src/executor.rs

//! The client executor: single ingestion point for inbound messages and
//! single owner of the live flow table.
//!
//! [`ClientExecutor::spawn`] starts the dispatch loop and returns an
//! [`ExecutorHandle`] for submitting messages plus the outbound receiver.
//! The dispatch loop:
//! - starts a [`FlowSession`] for every `FlowRequest` with an unseen flow id
//!   and rejects duplicates,
//! - routes `Cancel` messages to the matching session (unknown ids are
//!   ignored),
//! - retires sessions once their supervisor reports that every query has
//!   terminated, which is what triggers the final log flush and `FlowStats`,
//! - on shutdown, cancels every live flow and drains best-effort.
//!
//! The loop never awaits on the outbound channel itself; each flow's emitter
//! task does that, so a slow consumer cannot stall dispatch.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::batcher::{BatchLimits, LogBatcher};
use crate::clock::{Clock, SystemClock};
use crate::config::{ExecutorConfig, validate_executor_config};
use crate::errors::{FlowexecError, Result};
use crate::protocol::{FlowRequest, Message, Payload};
use crate::runner::QueryRunner;
use crate::session::{CancelReason, FlowSession, SessionEvent};
use crate::signal::{CancelListener, CancelSignal};
use crate::types::AuthState;

/// Builder for the executor's dispatch loop.
pub struct ClientExecutor {
    config: ExecutorConfig,
    runner: Arc<dyn QueryRunner>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for ClientExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientExecutor")
            .field("config", &self.config)
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

impl ClientExecutor {
    pub fn new(config: ExecutorConfig, runner: Arc<dyn QueryRunner>) -> Result<Self> {
        validate_executor_config(&config)?;
        Ok(Self {
            config,
            runner,
            clock: Arc::new(SystemClock),
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Start the dispatch loop on the current Tokio runtime.
    pub fn spawn(self) -> (ExecutorHandle, mpsc::Receiver<Message>) {
        let (inbound_tx, inbound_rx) = mpsc::channel(self.config.inbound_capacity);
        let (outbound_tx, outbound_rx) = mpsc::channel(self.config.outbound_capacity);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let shutdown = CancelSignal::new();

        let dispatcher = Dispatcher {
            limits: BatchLimits::from(&self.config),
            cancel_grace: Duration::from_millis(self.config.cancel_grace_ms),
            shutdown_grace: Duration::from_millis(self.config.shutdown_grace_ms),
            runner: self.runner,
            clock: self.clock,
            sessions: HashMap::new(),
            outbound: outbound_tx,
            events_tx,
            events_rx,
        };

        let task = tokio::spawn(dispatcher.run(inbound_rx, shutdown.listener()));

        let handle = ExecutorHandle {
            inbound: inbound_tx,
            shutdown,
            task,
        };
        (handle, outbound_rx)
    }
}

/// Caller side of a running executor.
#[derive(Debug)]
pub struct ExecutorHandle {
    inbound: mpsc::Sender<Message>,
    shutdown: CancelSignal,
    task: JoinHandle<()>,
}

impl ExecutorHandle {
    /// Hand a message to the dispatch loop. Waits only if the inbound
    /// buffer is full; execution itself happens asynchronously.
    pub async fn submit(&self, message: Message) -> Result<()> {
        if self.shutdown.is_fired() {
            return Err(FlowexecError::ExecutorShutdown);
        }
        self.inbound
            .send(message)
            .await
            .map_err(|_| FlowexecError::ExecutorShutdown)
    }

    /// Raw inbound sender, for transports that feed the executor directly.
    pub fn inbound(&self) -> mpsc::Sender<Message> {
        self.inbound.clone()
    }

    /// Begin shutdown. Idempotent.
    pub fn shutdown(&self) {
        if self.shutdown.fire() {
            info!("executor shutdown requested");
        }
    }

    /// The signal that stops this executor, e.g. to wire up Ctrl-C.
    pub fn shutdown_signal(&self) -> CancelSignal {
        self.shutdown.clone()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_fired() || self.task.is_finished()
    }

    /// Wait for the dispatch loop to exit.
    ///
    /// Without a prior [`shutdown`](Self::shutdown) this returns once every
    /// inbound sender is gone and all live flows have finished.
    pub async fn join(self) -> Result<()> {
        let ExecutorHandle { inbound, task, .. } = self;
        drop(inbound);
        task.await
            .map_err(|e| FlowexecError::Other(anyhow::anyhow!("executor task failed: {e}")))
    }
}

enum Step {
    Inbound(Option<Message>),
    Session(SessionEvent),
    Shutdown,
}

struct Dispatcher {
    limits: BatchLimits,
    cancel_grace: Duration,
    shutdown_grace: Duration,
    runner: Arc<dyn QueryRunner>,
    clock: Arc<dyn Clock>,
    sessions: HashMap<String, FlowSession>,
    outbound: mpsc::Sender<Message>,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    events_rx: mpsc::UnboundedReceiver<SessionEvent>,
}

impl Dispatcher {
    async fn run(mut self, mut inbound: mpsc::Receiver<Message>, shutdown: CancelListener) {
        info!("executor dispatch loop started");
        let mut inbound_open = true;

        loop {
            if !inbound_open && self.sessions.is_empty() {
                info!("inbound closed and no live flows; stopping");
                break;
            }

            let step = tokio::select! {
                biased;
                _ = shutdown.cancelled() => Step::Shutdown,
                Some(event) = self.events_rx.recv() => Step::Session(event),
                message = inbound.recv(), if inbound_open => Step::Inbound(message),
            };

            match step {
                Step::Shutdown => {
                    self.shutdown(&mut inbound).await;
                    break;
                }
                Step::Session(event) => {
                    self.handle_session_event(event);
                }
                Step::Inbound(Some(message)) => self.dispatch(message),
                Step::Inbound(None) => {
                    info!(live_flows = self.sessions.len(), "inbound channel closed; waiting for live flows");
                    inbound_open = false;
                }
            }
        }

        info!("executor dispatch loop finished");
    }

    fn dispatch(&mut self, message: Message) {
        let Message {
            auth_state,
            session_id,
            request_id,
            payload,
        } = message;

        if auth_state != AuthState::Authenticated {
            warn!(flow_id = %session_id, ?request_id, "dropping unauthenticated message");
            return;
        }

        match payload {
            Payload::FlowRequest(request) => self.start_flow(session_id, request_id, request),
            Payload::Cancel(_) => self.cancel_flow(&session_id),
            _ => {
                warn!(flow_id = %session_id, ?request_id, "ignoring outbound-only payload on inbound channel");
            }
        }
    }

    fn start_flow(&mut self, flow_id: String, request_id: Option<u64>, request: FlowRequest) {
        if self.sessions.contains_key(&flow_id) {
            warn!(flow_id = %flow_id, ?request_id, "duplicate flow id; rejecting flow request");
            return;
        }

        let batcher = LogBatcher::spawn(
            flow_id.clone(),
            request_id,
            self.limits,
            Arc::clone(&self.clock),
            self.outbound.clone(),
        );

        let session = FlowSession::start(
            flow_id.clone(),
            request,
            Arc::clone(&self.runner),
            batcher,
            Arc::clone(&self.clock),
            self.cancel_grace,
            self.events_tx.clone(),
        );
        self.sessions.insert(flow_id, session);
    }

    fn cancel_flow(&mut self, flow_id: &str) {
        match self.sessions.get_mut(flow_id) {
            Some(session) => {
                session.cancel(CancelReason::Requested);
            }
            None => debug!(flow_id = %flow_id, "cancel for unknown flow; ignoring"),
        }
    }

    /// Retire a session whose queries have all terminated.
    fn handle_session_event(&mut self, event: SessionEvent) -> Option<JoinHandle<()>> {
        match event {
            SessionEvent::QueriesFinished { flow_id, reports } => {
                match self.sessions.remove(&flow_id) {
                    Some(session) => {
                        let (_stats, emitter) = session.finish(reports);
                        Some(emitter)
                    }
                    None => {
                        warn!(flow_id = %flow_id, "completion for a flow that is not live");
                        None
                    }
                }
            }
        }
    }

    /// Cancel every live flow, wait (bounded) for them to finish, then wait
    /// (bounded) for their emitters to push out the final messages.
    async fn shutdown(&mut self, inbound: &mut mpsc::Receiver<Message>) {
        inbound.close();
        let mut dropped = 0usize;
        while inbound.try_recv().is_ok() {
            dropped += 1;
        }

        info!(
            live_flows = self.sessions.len(),
            dropped_inbound = dropped,
            "executor shutting down"
        );

        for session in self.sessions.values_mut() {
            session.cancel(CancelReason::Shutdown);
        }

        let deadline = Instant::now() + self.shutdown_grace;
        let mut emitters = Vec::new();

        while !self.sessions.is_empty() {
            match tokio::time::timeout_at(deadline, self.events_rx.recv()).await {
                Ok(Some(event)) => emitters.extend(self.handle_session_event(event)),
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        abandoned_flows = self.sessions.len(),
                        "shutdown grace elapsed with flows still running"
                    );
                    break;
                }
            }
        }

        for emitter in emitters {
            if tokio::time::timeout_at(deadline, emitter).await.is_err() {
                warn!("shutdown grace elapsed while draining flow output");
                break;
            }
        }
    }
}
