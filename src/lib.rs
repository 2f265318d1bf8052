// src/lib.rs

pub mod batcher;
pub mod cli;
pub mod clock;
pub mod config;
pub mod errors;
pub mod executor;
pub mod ids;
pub mod logging;
pub mod protocol;
pub mod runner;
pub mod session;
pub mod signal;
pub mod sink;
pub mod types;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::cli::{CliArgs, OutputMode};
use crate::config::{ConfigFile, load_and_validate};
use crate::executor::ClientExecutor;
use crate::ids::{FlowIdGenerator, UuidFlowIds};
use crate::protocol::{FlowRequest, Message};
use crate::runner::ScriptedRunner;
use crate::sink::{WriterSink, drain_batch};

pub use crate::executor::ExecutorHandle;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading
/// - the executor with the built-in scripted runner
/// - timed cancels from the flows file
/// - Ctrl-C handling (executor shutdown)
/// - printing outbound messages until every flow has reported its stats
pub async fn run(args: CliArgs) -> Result<()> {
    let config_path = args.config_path();
    let cfg = load_and_validate(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;

    if args.dry_run {
        print_dry_run(&cfg);
        return Ok(());
    }

    let ids = UuidFlowIds;
    let executor = ClientExecutor::new(cfg.executor.clone(), Arc::new(ScriptedRunner))?;
    let (handle, mut outbound) = executor.spawn();

    // Ctrl-C → graceful shutdown.
    {
        let signal = handle.shutdown_signal();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                eprintln!("failed to listen for Ctrl+C: {e}");
                return;
            }
            if signal.fire() {
                info!("Ctrl+C received; shutting down executor");
            }
        });
    }

    let mut pending: HashSet<String> = HashSet::new();
    for (index, flow) in cfg.flows.iter().enumerate() {
        let flow_id = flow.id.clone().unwrap_or_else(|| ids.next_flow_id());
        let request = FlowRequest {
            queries: flow.queries.clone(),
        };

        handle
            .submit(Message::flow_request(&flow_id, request).with_request_id(index as u64 + 1))
            .await?;
        info!(flow_id = %flow_id, queries = flow.queries.len(), "flow submitted");

        if let Some(ms) = flow.cancel_after_ms {
            let inbound = handle.inbound();
            let id = flow_id.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                if inbound.send(Message::cancel(id.clone())).await.is_err() {
                    debug!(flow_id = %id, "executor gone before timed cancel");
                }
            });
        }

        pending.insert(flow_id);
    }

    let mut sink = WriterSink::new(std::io::stdout());
    while !pending.is_empty() {
        let Some(message) = outbound.recv().await else {
            warn!(remaining = pending.len(), "outbound channel closed before every flow finished");
            break;
        };

        match args.output {
            OutputMode::Messages => println!("{}", serde_json::to_string(&message)?),
            OutputMode::Logs => {
                if let Some(batch) = message.log_message() {
                    drain_batch(batch, &mut sink)?;
                }
            }
        }

        if message.flow_stats().is_some() {
            pending.remove(&message.session_id);
        }
    }

    handle.shutdown();
    handle.join().await?;
    Ok(())
}

/// Simple dry-run output: executor limits and flows.
fn print_dry_run(cfg: &ConfigFile) {
    let exec = &cfg.executor;
    println!("flowexec dry-run");
    println!(
        "  executor: inbound={} outbound={} batch_rows={} batch_bytes={} batch_interval_ms={}",
        exec.inbound_capacity,
        exec.outbound_capacity,
        exec.log_batch_max_rows,
        exec.log_batch_max_bytes,
        exec.log_batch_interval_ms
    );
    println!();

    println!("flows ({}):", cfg.flows.len());
    for flow in &cfg.flows {
        println!("  - {}", flow.id.as_deref().unwrap_or("<generated id>"));
        if let Some(ms) = flow.cancel_after_ms {
            println!("      cancel_after_ms: {ms}");
        }
        for query in &flow.queries {
            println!("      query {}: {}", query.name, query.query);
        }
    }

    debug!("dry-run complete (no execution)");
}
