// src/protocol.rs

//! Message types exchanged on the inbound and outbound channels.
//!
//! Inbound envelopes carry a [`FlowRequest`] or a [`Cancel`]; outbound
//! envelopes carry a [`LogMessage`], a [`QueryResponse`] or the terminal
//! [`FlowStats`] for a flow.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{FlowexecError, Result};
use crate::types::{AuthState, LogLevel, StatusCode};

/// Envelope for everything that crosses the executor boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub auth_state: AuthState,
    /// Flow id this message belongs to.
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<u64>,
    pub payload: Payload,
}

impl Message {
    pub fn flow_request(session_id: impl Into<String>, request: FlowRequest) -> Self {
        Self {
            auth_state: AuthState::Authenticated,
            session_id: session_id.into(),
            request_id: None,
            payload: Payload::FlowRequest(request),
        }
    }

    pub fn cancel(session_id: impl Into<String>) -> Self {
        Self {
            auth_state: AuthState::Authenticated,
            session_id: session_id.into(),
            request_id: None,
            payload: Payload::Cancel(Cancel::default()),
        }
    }

    pub fn with_request_id(mut self, request_id: u64) -> Self {
        self.request_id = Some(request_id);
        self
    }

    pub fn log_message(&self) -> Option<&LogMessage> {
        match &self.payload {
            Payload::LogMessage(m) => Some(m),
            _ => None,
        }
    }

    pub fn flow_stats(&self) -> Option<&FlowStats> {
        match &self.payload {
            Payload::FlowStats(s) => Some(s),
            _ => None,
        }
    }

    pub fn query_response(&self) -> Option<&QueryResponse> {
        match &self.payload {
            Payload::QueryResponse(r) => Some(r),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Payload {
    FlowRequest(FlowRequest),
    Cancel(Cancel),
    LogMessage(LogMessage),
    QueryResponse(QueryResponse),
    FlowStats(FlowStats),
}

/// Queries to run concurrently as one flow.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowRequest {
    pub queries: Vec<QuerySpec>,
}

/// One query definition. The text is opaque to the executor and only
/// interpreted by the [`QueryRunner`](crate::runner::QueryRunner).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuerySpec {
    pub name: String,
    pub query: String,
}

impl QuerySpec {
    pub fn new(name: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            query: query.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cancel {}

/// One flow log line, as stored by the log sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LogRecord {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

/// A batch of flow log lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogMessage {
    /// Batch sequence number: 0, 1, 2, ... per flow.
    pub id: u64,
    /// Number of log lines in this batch.
    pub number_of_rows: u64,
    /// Sum of `number_of_rows` over all earlier batches of the flow.
    pub start_row: u64,
    /// One serialized [`LogRecord`] per line.
    pub jsonl: String,
}

impl LogMessage {
    pub fn records(&self) -> Result<Vec<LogRecord>> {
        self.jsonl
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str::<LogRecord>(l).map_err(FlowexecError::from))
            .collect()
    }
}

/// A chunk of result rows from one query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub query: String,
    /// Chunk index within the query, starting at 0.
    pub part: u64,
    pub jsonl: String,
    /// Rows in this chunk.
    pub total_rows: u64,
}

/// Terminal summary of a flow. Exactly one is emitted per flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowStats {
    pub flow_complete: bool,
    pub status: StatusCode,
    pub total_result_rows: u64,
    pub total_log_rows: u64,
    pub error_count: u64,
    pub query_status: Vec<QueryStatus>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryStatus {
    pub name: String,
    pub status: StatusCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub result_rows: u64,
    pub log_rows: u64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_ms: u64,
}
