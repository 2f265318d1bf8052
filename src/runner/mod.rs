// src/runner/mod.rs

//! Query runner contract.
//!
//! The executor does not know how a query is evaluated. It hands each
//! [`QuerySpec`] to a [`QueryRunner`] together with a [`QueryContext`] and
//! waits for a [`QueryOutcome`]. Through the context a runner can:
//! - append leveled log lines to the flow log,
//! - send result rows,
//! - observe the flow's cancellation signal.
//!
//! Cancellation is cooperative: a runner is expected to check
//! [`QueryContext::is_cancelled`] or await [`QueryContext::cancelled`] at
//! bounded intervals. The executor only gives up waiting on a runner after
//! the configured grace period.
//!
//! [`script::ScriptedRunner`] is the built-in implementation.

pub mod script;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::Value;

use crate::batcher::LogBatcher;
use crate::protocol::QuerySpec;
use crate::signal::CancelListener;
use crate::types::LogLevel;

pub use script::{Script, ScriptedRunner, Step};

/// How a runner finished a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryOutcome {
    Completed,
    Failed(String),
    /// The runner stopped because it observed cancellation.
    Cancelled,
}

/// Executes a single query definition.
pub trait QueryRunner: Send + Sync {
    fn run<'a>(
        &'a self,
        query: &'a QuerySpec,
        ctx: QueryContext,
    ) -> Pin<Box<dyn Future<Output = QueryOutcome> + Send + 'a>>;
}

#[derive(Debug, Default)]
struct QueryCounters {
    result_rows: AtomicU64,
    log_rows: AtomicU64,
}

/// Capabilities handed to a runner for one query of one flow.
#[derive(Debug, Clone)]
pub struct QueryContext {
    query: Arc<str>,
    log: LogBatcher,
    cancel: CancelListener,
    counters: Arc<QueryCounters>,
}

impl QueryContext {
    pub fn new(query: impl Into<String>, log: LogBatcher, cancel: CancelListener) -> Self {
        Self {
            query: Arc::from(query.into()),
            log,
            cancel,
            counters: Arc::default(),
        }
    }

    pub fn flow_id(&self) -> &str {
        self.log.flow_id()
    }

    pub fn query_name(&self) -> &str {
        &self.query
    }

    /// Append a line to the flow log.
    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        if self.log.append(level, message) {
            self.counters.log_rows.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn send_rows(&self, rows: Vec<Value>) {
        let n = rows.len() as u64;
        if self.log.send_rows(&self.query, rows) {
            self.counters.result_rows.fetch_add(n, Ordering::Relaxed);
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolve once the flow has been cancelled.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    pub fn result_rows(&self) -> u64 {
        self.counters.result_rows.load(Ordering::Relaxed)
    }

    pub fn log_rows(&self) -> u64 {
        self.counters.log_rows.load(Ordering::Relaxed)
    }
}
