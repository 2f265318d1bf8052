// tests/script_runner.rs

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use flowexec::batcher::{BatchLimits, LogBatcher};
use flowexec::clock::SystemClock;
use flowexec::errors::FlowexecError;
use flowexec::protocol::{Message, QuerySpec};
use flowexec::runner::{QueryContext, QueryOutcome, QueryRunner, Script, ScriptedRunner, Step};
use flowexec::signal::CancelSignal;
use flowexec::types::LogLevel;
use flowexec_test_utils::{init_tracing, with_timeout};

#[test]
fn test_parse_all_commands() {
    let script: Script = "log INFO hello world; row {\"a\": 1}\nsleep 25; fail nope; repeat 3 log n={i}"
        .parse()
        .unwrap();

    assert_eq!(
        script.steps(),
        &[
            Step::Log {
                level: LogLevel::Info,
                text: "hello world".to_string()
            },
            Step::Row("{\"a\": 1}".to_string()),
            Step::Sleep(Duration::from_millis(25)),
            Step::Fail("nope".to_string()),
            Step::Repeat {
                count: 3,
                step: Box::new(Step::Log {
                    level: LogLevel::Default,
                    text: "n={i}".to_string()
                })
            },
        ]
    );
}

#[test]
fn test_bracketed_level_prefix_is_understood() {
    let script: Script = "log [WARN] disk almost full".parse().unwrap();
    assert_eq!(
        script.steps(),
        &[Step::Log {
            level: LogLevel::Warn,
            text: "disk almost full".to_string()
        }]
    );
}

#[test]
fn test_blank_lines_and_comments_are_skipped() {
    let script: Script = "\n# setup\n  ;; log hi \n".parse().unwrap();
    assert_eq!(script.steps().len(), 1);
}

#[test]
fn test_parse_errors() {
    for bad in [
        "explode now",
        "sleep soon",
        "row {not json",
        "repeat x log a",
        "repeat 2",
        "repeat 2 repeat 2 log a",
        "log",
    ] {
        match bad.parse::<Script>() {
            Err(FlowexecError::ScriptError(_)) => {}
            other => panic!("expected ScriptError for {bad:?}, got {other:?}"),
        }
    }
}

/// Build a context backed by a real emitter writing into `tx`.
fn context(tx: mpsc::Sender<Message>) -> (QueryContext, LogBatcher, CancelSignal) {
    let (batcher, _emitter) = LogBatcher::spawn(
        "F.script",
        None,
        BatchLimits::default(),
        Arc::new(SystemClock),
        tx,
    );
    let signal = CancelSignal::new();
    let ctx = QueryContext::new("Q", batcher.clone(), signal.listener());
    (ctx, batcher, signal)
}

#[tokio::test]
async fn test_script_logs_rows_and_completes() {
    init_tracing();

    let (tx, mut rx) = mpsc::channel(16);
    let (ctx, batcher, _signal) = context(tx);
    let spec = QuerySpec::new("Q", "repeat 4 log line {i}; row {\"x\": true}");

    let outcome = ScriptedRunner.run(&spec, ctx.clone()).await;
    assert_eq!(outcome, QueryOutcome::Completed);
    assert_eq!(ctx.log_rows(), 4);
    assert_eq!(ctx.result_rows(), 1);

    // Dropping every handle makes the emitter flush and stop.
    drop(ctx);
    drop(batcher);

    let mut log_rows = 0;
    let mut responses = 0;
    while let Some(message) = rx.recv().await {
        if let Some(batch) = message.log_message() {
            log_rows += batch.number_of_rows;
        }
        if message.query_response().is_some() {
            responses += 1;
        }
    }
    assert_eq!(log_rows, 4);
    assert_eq!(responses, 1);
}

#[tokio::test]
async fn test_sleep_wakes_on_cancellation() {
    init_tracing();

    let (tx, _rx) = mpsc::channel(16);
    let (ctx, _batcher, signal) = context(tx);
    let spec = QuerySpec::new("Q", "sleep 60000; log never");

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        signal.fire();
    });

    let outcome = with_timeout(ScriptedRunner.run(&spec, ctx.clone())).await;
    assert_eq!(outcome, QueryOutcome::Cancelled);
    assert_eq!(ctx.log_rows(), 0);
}

#[tokio::test]
async fn test_fail_and_parse_error_outcomes() {
    init_tracing();

    let (tx, _rx) = mpsc::channel(16);
    let (ctx, _batcher, _signal) = context(tx);

    let failing = QuerySpec::new("Q", "log before; fail disk {i} gone; log after");
    assert_eq!(
        ScriptedRunner.run(&failing, ctx.clone()).await,
        QueryOutcome::Failed("disk {i} gone".to_string())
    );
    assert_eq!(ctx.log_rows(), 1);

    let broken = QuerySpec::new("Q", "frobnicate");
    match ScriptedRunner.run(&broken, ctx.clone()).await {
        QueryOutcome::Failed(msg) => assert!(msg.contains("unknown command")),
        other => panic!("expected failure, got {other:?}"),
    }
}
