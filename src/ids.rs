// src/ids.rs

//! Flow id minting.
//!
//! Flow ids must be unique across the process. Rather than a process-global
//! counter, callers hold a [`FlowIdGenerator`] and pass it to whatever needs
//! to mint ids, so tests can use a deterministic sequence.

use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};

pub trait FlowIdGenerator: Send + Sync + Debug {
    fn next_flow_id(&self) -> String;
}

/// Random ids of the form `F.<uuid-simple>`.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidFlowIds;

impl FlowIdGenerator for UuidFlowIds {
    fn next_flow_id(&self) -> String {
        format!("F.{}", uuid::Uuid::new_v4().simple())
    }
}

/// Deterministic ids of the form `F.<prefix><n>`, starting at `n = 1`.
#[derive(Debug)]
pub struct SequentialFlowIds {
    prefix: String,
    next: AtomicU64,
}

impl SequentialFlowIds {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next: AtomicU64::new(1),
        }
    }
}

impl Default for SequentialFlowIds {
    fn default() -> Self {
        Self::new("")
    }
}

impl FlowIdGenerator for SequentialFlowIds {
    fn next_flow_id(&self) -> String {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        format!("F.{}{}", self.prefix, n)
    }
}
