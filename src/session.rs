// src/session.rs

//! Lifecycle of one running flow.
//!
//! A [`FlowSession`] lives in the executor's session table. It owns:
//! - the flow's cancellation signal and its tri-state cancel state,
//! - the flow's [`LogBatcher`] handle,
//! - a supervisor task that joins every query task and reports back to the
//!   executor once the last one has terminated.
//!
//! All mutation of a session (cancel, finish) happens on the executor's
//! dispatch loop, so cancellation and completion never race each other.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::batcher::LogBatcher;
use crate::clock::Clock;
use crate::protocol::{FlowRequest, FlowStats, QuerySpec, QueryStatus};
use crate::runner::{QueryContext, QueryOutcome, QueryRunner};
use crate::signal::{CancelListener, CancelSignal};
use crate::types::{LogLevel, StatusCode};

/// Log line written exactly once when a flow is cancelled by request.
pub const CANCELLED_MESSAGE: &str = "Cancelled all inflight queries";

/// Log line written when a flow is cancelled because the executor stops.
pub const SHUTDOWN_MESSAGE: &str = "Executor shutting down, cancelling flow";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelState {
    Running,
    CancelRequested,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// A `Cancel` message arrived for the flow.
    Requested,
    /// The executor itself is shutting down.
    Shutdown,
}

/// Notifications from session supervisors to the dispatch loop.
#[derive(Debug)]
pub(crate) enum SessionEvent {
    QueriesFinished {
        flow_id: String,
        reports: Vec<TaskReport>,
    },
}

/// What one query task reports when it terminates.
#[derive(Debug, Clone)]
pub(crate) struct TaskReport {
    name: String,
    outcome: QueryOutcome,
    result_rows: u64,
    log_rows: u64,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
}

impl TaskReport {
    fn into_status(self, reason: Option<CancelReason>) -> QueryStatus {
        let (status, error_message) = match self.outcome {
            QueryOutcome::Completed => (StatusCode::Ok, None),
            QueryOutcome::Failed(msg) => (StatusCode::GenericError, Some(msg)),
            QueryOutcome::Cancelled => match reason {
                Some(CancelReason::Requested) => {
                    (StatusCode::GenericError, Some(CANCELLED_MESSAGE.to_string()))
                }
                Some(CancelReason::Shutdown) | None => {
                    (StatusCode::Cancelled, Some("Cancelled".to_string()))
                }
            },
        };

        let duration_ms = (self.end_time - self.start_time)
            .num_milliseconds()
            .max(0) as u64;

        QueryStatus {
            name: self.name,
            status,
            error_message,
            result_rows: self.result_rows,
            log_rows: self.log_rows,
            start_time: self.start_time,
            end_time: self.end_time,
            duration_ms,
        }
    }
}

pub struct FlowSession {
    flow_id: String,
    state: CancelState,
    reason: Option<CancelReason>,
    signal: CancelSignal,
    log: LogBatcher,
    emitter: JoinHandle<()>,
    clock: Arc<dyn Clock>,
    /// Lines the session itself wrote (not attributed to any query).
    own_log_rows: u64,
    query_count: usize,
}

impl fmt::Debug for FlowSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlowSession")
            .field("flow_id", &self.flow_id)
            .field("state", &self.state)
            .field("reason", &self.reason)
            .field("query_count", &self.query_count)
            .finish_non_exhaustive()
    }
}

impl FlowSession {
    /// Launch one task per query plus the supervisor that waits for all of
    /// them. Returns immediately.
    pub(crate) fn start(
        flow_id: String,
        request: FlowRequest,
        runner: Arc<dyn QueryRunner>,
        (log, emitter): (LogBatcher, JoinHandle<()>),
        clock: Arc<dyn Clock>,
        cancel_grace: Duration,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        let signal = CancelSignal::new();
        let query_count = request.queries.len();

        let tasks: Vec<(String, JoinHandle<TaskReport>)> = request
            .queries
            .into_iter()
            .map(|spec| {
                let name = spec.name.clone();
                let ctx = QueryContext::new(name.clone(), log.clone(), signal.listener());
                let handle = tokio::spawn(run_query(
                    spec,
                    Arc::clone(&runner),
                    ctx,
                    signal.listener(),
                    Arc::clone(&clock),
                    cancel_grace,
                ));
                (name, handle)
            })
            .collect();

        info!(flow_id = %flow_id, queries = query_count, "flow started");

        // Detached; it reports through `events`.
        tokio::spawn(supervise(
            flow_id.clone(),
            tasks,
            events,
            Arc::clone(&clock),
        ));

        Self {
            flow_id,
            state: CancelState::Running,
            reason: None,
            signal,
            log,
            emitter,
            clock,
            own_log_rows: 0,
            query_count,
        }
    }

    pub fn flow_id(&self) -> &str {
        &self.flow_id
    }

    pub fn state(&self) -> CancelState {
        self.state
    }

    /// Move `Running -> CancelRequested` and wake every query task.
    ///
    /// Only the first call has any effect; later calls return `false`
    /// without logging anything.
    pub fn cancel(&mut self, reason: CancelReason) -> bool {
        if self.state != CancelState::Running || !self.signal.fire() {
            debug!(flow_id = %self.flow_id, state = ?self.state, "flow already cancelling; ignoring cancel");
            return false;
        }

        self.state = CancelState::CancelRequested;
        self.reason = Some(reason);

        let line = match reason {
            CancelReason::Requested => CANCELLED_MESSAGE,
            CancelReason::Shutdown => SHUTDOWN_MESSAGE,
        };
        if self.log.append(LogLevel::Warn, line) {
            self.own_log_rows += 1;
        }

        info!(flow_id = %self.flow_id, ?reason, "flow cancellation requested");
        true
    }

    /// Build the flow's `FlowStats` from the query reports and hand it to
    /// the emitter, which flushes pending logs first.
    ///
    /// Returns the stats and the emitter task so the caller can wait for
    /// the emission to drain.
    pub(crate) fn finish(mut self, reports: Vec<TaskReport>) -> (FlowStats, JoinHandle<()>) {
        if self.state == CancelState::CancelRequested {
            self.state = CancelState::Cancelled;
        }

        let query_status: Vec<QueryStatus> = reports
            .into_iter()
            .map(|r| r.into_status(self.reason))
            .collect();

        let status = match self.reason {
            Some(CancelReason::Requested) => StatusCode::GenericError,
            _ => StatusCode::aggregate(query_status.iter().map(|q| q.status)),
        };

        let stats = FlowStats {
            flow_complete: true,
            status,
            total_result_rows: query_status.iter().map(|q| q.result_rows).sum(),
            total_log_rows: self.own_log_rows
                + query_status.iter().map(|q| q.log_rows).sum::<u64>(),
            error_count: query_status
                .iter()
                .filter(|q| q.status == StatusCode::GenericError)
                .count() as u64,
            query_status,
            timestamp: self.clock.now(),
        };

        info!(
            flow_id = %self.flow_id,
            status = ?stats.status,
            state = ?self.state,
            result_rows = stats.total_result_rows,
            log_rows = stats.total_log_rows,
            "flow finished"
        );

        if !self.log.finish(stats.clone()) {
            warn!(flow_id = %self.flow_id, "emitter gone before flow stats could be sent");
        }

        (stats, self.emitter)
    }
}

async fn run_query(
    spec: QuerySpec,
    runner: Arc<dyn QueryRunner>,
    ctx: QueryContext,
    cancel: CancelListener,
    clock: Arc<dyn Clock>,
    grace: Duration,
) -> TaskReport {
    let start_time = clock.now();
    let counters = ctx.clone();
    debug!(flow_id = %ctx.flow_id(), query = %spec.name, "query started");

    let outcome = {
        let mut run = runner.run(&spec, ctx);
        tokio::select! {
            biased;
            outcome = &mut run => outcome,
            _ = async {
                cancel.cancelled().await;
                tokio::time::sleep(grace).await;
            } => {
                warn!(
                    flow_id = %counters.flow_id(),
                    query = %spec.name,
                    grace_ms = grace.as_millis() as u64,
                    "query ignored cancellation; abandoning it"
                );
                QueryOutcome::Failed(format!(
                    "query did not stop within {}ms of cancellation",
                    grace.as_millis()
                ))
            }
        }
    };

    if let QueryOutcome::Failed(msg) = &outcome {
        counters.log(LogLevel::Error, format!("Query {} failed: {}", spec.name, msg));
    }

    debug!(flow_id = %counters.flow_id(), query = %spec.name, ?outcome, "query finished");

    TaskReport {
        name: spec.name,
        outcome,
        result_rows: counters.result_rows(),
        log_rows: counters.log_rows(),
        start_time,
        end_time: clock.now(),
    }
}

/// Wait for every query task, then report to the dispatch loop.
async fn supervise(
    flow_id: String,
    tasks: Vec<(String, JoinHandle<TaskReport>)>,
    events: mpsc::UnboundedSender<SessionEvent>,
    clock: Arc<dyn Clock>,
) {
    let mut reports = Vec::with_capacity(tasks.len());

    for (name, handle) in tasks {
        match handle.await {
            Ok(report) => reports.push(report),
            Err(err) => {
                warn!(flow_id = %flow_id, query = %name, error = %err, "query task aborted");
                let now = clock.now();
                reports.push(TaskReport {
                    name,
                    outcome: QueryOutcome::Failed(format!("query task aborted: {err}")),
                    result_rows: 0,
                    log_rows: 0,
                    start_time: now,
                    end_time: now,
                });
            }
        }
    }

    if events
        .send(SessionEvent::QueriesFinished {
            flow_id: flow_id.clone(),
            reports,
        })
        .is_err()
    {
        debug!(flow_id = %flow_id, "executor gone; dropping flow completion");
    }
}
