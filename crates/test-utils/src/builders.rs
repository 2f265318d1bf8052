#![allow(dead_code)]

use flowexec::config::ExecutorConfig;
use flowexec::protocol::{FlowRequest, Message, QuerySpec};

/// Builder for `FlowRequest` messages to simplify test setup.
pub struct FlowRequestBuilder {
    flow_id: String,
    request_id: Option<u64>,
    queries: Vec<QuerySpec>,
}

impl FlowRequestBuilder {
    pub fn new(flow_id: &str) -> Self {
        Self {
            flow_id: flow_id.to_string(),
            request_id: None,
            queries: Vec::new(),
        }
    }

    pub fn query(mut self, name: &str, query: &str) -> Self {
        self.queries.push(QuerySpec::new(name, query));
        self
    }

    pub fn request_id(mut self, id: u64) -> Self {
        self.request_id = Some(id);
        self
    }

    pub fn build(self) -> Message {
        let message = Message::flow_request(
            self.flow_id,
            FlowRequest {
                queries: self.queries,
            },
        );
        match self.request_id {
            Some(id) => message.with_request_id(id),
            None => message,
        }
    }
}

/// Executor config with a short batching window so tests settle quickly.
pub fn fast_config() -> ExecutorConfig {
    ExecutorConfig {
        log_batch_interval_ms: 50,
        cancel_grace_ms: 2_000,
        shutdown_grace_ms: 2_000,
        ..ExecutorConfig::default()
    }
}
