// tests/executor_log_batching.rs

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};

use flowexec::clock::MockClock;
use flowexec::config::ExecutorConfig;
use flowexec::executor::ClientExecutor;
use flowexec::protocol::LogMessage;
use flowexec::runner::ScriptedRunner;
use flowexec::types::LogLevel;
use flowexec_test_utils::builders::{FlowRequestBuilder, fast_config};
use flowexec_test_utils::collector::OutboundCollector;
use flowexec_test_utils::{init_tracing, wait_until};

type TestResult = Result<(), Box<dyn Error>>;

/// Run one flow to completion and return everything it emitted.
async fn run_flow(
    config: ExecutorConfig,
    builder: FlowRequestBuilder,
    flow_id: &str,
) -> Result<OutboundCollector, Box<dyn Error>> {
    let executor = ClientExecutor::new(config, Arc::new(ScriptedRunner))?;
    let (handle, outbound) = executor.spawn();
    let (collector, _drain) = OutboundCollector::spawn(outbound);

    handle.submit(builder.build()).await?;
    assert!(
        wait_until(Duration::from_secs(5), || collector.has_stats(flow_id)).await,
        "flow {flow_id} never finished"
    );

    handle.shutdown();
    handle.join().await?;
    Ok(collector)
}

/// Batch ids must be 0..k in order and `start_row` the running row total.
fn assert_contiguous(batches: &[LogMessage]) -> u64 {
    let mut total_rows = 0u64;
    for (index, batch) in batches.iter().enumerate() {
        assert_eq!(batch.id, index as u64, "batch ids must be contiguous");
        assert_eq!(batch.start_row, total_rows, "start_row must be the running total");
        assert!(batch.number_of_rows > 0, "empty batches must not be emitted");
        total_rows += batch.number_of_rows;
    }
    total_rows
}

#[tokio::test]
async fn test_ten_rapid_log_lines_are_combined() -> TestResult {
    init_tracing();

    let flow_id = "F.logs";
    let collector = run_flow(
        ExecutorConfig::default(),
        FlowRequestBuilder::new(flow_id)
            .query("LoggingArtifact", "repeat 10 log INFO log {i}")
            .request_id(1),
        flow_id,
    )
    .await?;

    let batches = collector.log_messages(flow_id);
    assert!(batches.len() <= 2, "too many log messages: {}", batches.len());
    assert_eq!(assert_contiguous(&batches), 10);

    let records: Vec<_> = batches
        .iter()
        .map(|b| b.records())
        .collect::<Result<Vec<_>, _>>()?
        .into_iter()
        .flatten()
        .collect();
    let texts: Vec<_> = records.iter().map(|r| r.message.as_str()).collect();
    let expected: Vec<String> = (0..10).map(|i| format!("log {i}")).collect();
    assert_eq!(texts, expected);
    assert!(records.iter().all(|r| r.level == LogLevel::Info));

    let stats = &collector.flow_stats(flow_id)[0];
    assert_eq!(stats.total_log_rows, 10);
    assert_eq!(stats.query_status[0].log_rows, 10);

    Ok(())
}

#[tokio::test]
async fn test_row_threshold_splits_batches() -> TestResult {
    init_tracing();

    let flow_id = "F.rows";
    let config = ExecutorConfig {
        log_batch_max_rows: 3,
        ..ExecutorConfig::default()
    };
    let collector = run_flow(
        config,
        FlowRequestBuilder::new(flow_id).query("Q", "repeat 10 log line {i}"),
        flow_id,
    )
    .await?;

    let batches = collector.log_messages(flow_id);
    let sizes: Vec<u64> = batches.iter().map(|b| b.number_of_rows).collect();
    assert_eq!(sizes, vec![3, 3, 3, 1]);
    assert_eq!(assert_contiguous(&batches), 10);

    Ok(())
}

#[tokio::test]
async fn test_byte_threshold_flushes_every_line() -> TestResult {
    init_tracing();

    let flow_id = "F.bytes";
    let config = ExecutorConfig {
        log_batch_max_bytes: 1,
        ..ExecutorConfig::default()
    };
    let collector = run_flow(
        config,
        FlowRequestBuilder::new(flow_id).query("Q", "repeat 5 log line {i}"),
        flow_id,
    )
    .await?;

    let batches = collector.log_messages(flow_id);
    assert_eq!(batches.len(), 5);
    assert_eq!(assert_contiguous(&batches), 5);

    Ok(())
}

#[tokio::test]
async fn test_time_window_flushes_idle_batch() -> TestResult {
    init_tracing();

    let flow_id = "F.window";
    let collector = run_flow(
        fast_config(),
        FlowRequestBuilder::new(flow_id).query("Q", "log INFO first; sleep 300; log INFO second"),
        flow_id,
    )
    .await?;

    let batches = collector.log_messages(flow_id);
    assert_eq!(batches.len(), 2);
    assert_eq!(assert_contiguous(&batches), 2);
    assert!(batches[0].jsonl.contains("first"));
    assert!(batches[1].jsonl.contains("second"));

    Ok(())
}

#[tokio::test]
async fn test_concurrent_queries_share_one_sequence() -> TestResult {
    init_tracing();

    let flow_id = "F.concurrent";
    let config = ExecutorConfig {
        log_batch_max_rows: 7,
        ..ExecutorConfig::default()
    };
    let collector = run_flow(
        config,
        FlowRequestBuilder::new(flow_id)
            .query("A", "repeat 50 log a {i}")
            .query("B", "repeat 50 log b {i}")
            .query("C", "repeat 50 log c {i}"),
        flow_id,
    )
    .await?;

    let batches = collector.log_messages(flow_id);
    assert_eq!(assert_contiguous(&batches), 150);

    let stats = &collector.flow_stats(flow_id)[0];
    assert_eq!(stats.total_log_rows, 150);
    assert!(stats.query_status.iter().all(|q| q.log_rows == 50));

    // Per-query order survives interleaving.
    let records: Vec<_> = batches
        .iter()
        .map(|b| b.records())
        .collect::<Result<Vec<_>, _>>()?
        .into_iter()
        .flatten()
        .collect();
    let a_lines: Vec<_> = records
        .iter()
        .filter(|r| r.message.starts_with("a "))
        .map(|r| r.message.clone())
        .collect();
    let expected: Vec<String> = (0..50).map(|i| format!("a {i}")).collect();
    assert_eq!(a_lines, expected);

    Ok(())
}

#[tokio::test]
async fn test_records_are_stamped_by_injected_clock() -> TestResult {
    init_tracing();

    let fixed = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
    let clock = Arc::new(MockClock::new(fixed));

    let executor =
        ClientExecutor::new(fast_config(), Arc::new(ScriptedRunner))?.with_clock(clock.clone());
    let (handle, outbound) = executor.spawn();
    let (collector, _drain) = OutboundCollector::spawn(outbound);

    let flow_id = "F.clock";
    handle
        .submit(FlowRequestBuilder::new(flow_id).query("Q", "log WARN stamped").build())
        .await?;
    assert!(wait_until(Duration::from_secs(5), || collector.has_stats(flow_id)).await);

    let records = collector.log_messages(flow_id)[0].records()?;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].timestamp, fixed);
    assert_eq!(records[0].level, LogLevel::Warn);
    assert_eq!(records[0].message, "stamped");

    let stats = &collector.flow_stats(flow_id)[0];
    assert_eq!(stats.timestamp, fixed);
    assert_eq!(stats.query_status[0].duration_ms, 0);

    handle.shutdown();
    handle.join().await?;
    Ok(())
}
