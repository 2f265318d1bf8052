use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use flowexec::protocol::{FlowStats, LogMessage, Message, QueryResponse};

/// Drains an executor's outbound channel into a shared vector.
#[derive(Clone)]
pub struct OutboundCollector {
    messages: Arc<Mutex<Vec<Message>>>,
}

impl OutboundCollector {
    pub fn spawn(mut outbound: mpsc::Receiver<Message>) -> (Self, JoinHandle<()>) {
        let messages = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&messages);
        let handle = tokio::spawn(async move {
            while let Some(message) = outbound.recv().await {
                sink.lock().unwrap().push(message);
            }
        });
        (Self { messages }, handle)
    }

    pub fn snapshot(&self) -> Vec<Message> {
        self.messages.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.messages.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn for_flow(&self, flow_id: &str) -> Vec<Message> {
        self.snapshot()
            .into_iter()
            .filter(|m| m.session_id == flow_id)
            .collect()
    }

    pub fn log_messages(&self, flow_id: &str) -> Vec<LogMessage> {
        self.for_flow(flow_id)
            .iter()
            .filter_map(|m| m.log_message().cloned())
            .collect()
    }

    pub fn responses(&self, flow_id: &str) -> Vec<QueryResponse> {
        self.for_flow(flow_id)
            .iter()
            .filter_map(|m| m.query_response().cloned())
            .collect()
    }

    pub fn flow_stats(&self, flow_id: &str) -> Vec<FlowStats> {
        self.for_flow(flow_id)
            .iter()
            .filter_map(|m| m.flow_stats().cloned())
            .collect()
    }

    /// Concatenated batch bodies for a flow.
    pub fn log_text(&self, flow_id: &str) -> String {
        self.log_messages(flow_id)
            .iter()
            .map(|m| m.jsonl.as_str())
            .collect()
    }

    pub fn has_stats(&self, flow_id: &str) -> bool {
        !self.flow_stats(flow_id).is_empty()
    }
}
