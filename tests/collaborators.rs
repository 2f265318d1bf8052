// tests/collaborators.rs

use std::collections::HashSet;
use std::time::Duration;

use chrono::{TimeZone, Utc};

use flowexec::clock::{Clock, MockClock};
use flowexec::ids::{FlowIdGenerator, SequentialFlowIds, UuidFlowIds};
use flowexec::protocol::{LogMessage, LogRecord};
use flowexec::signal::CancelSignal;
use flowexec::sink::{WriterSink, drain_batch, split_level_and_message};
use flowexec::types::{LogLevel, StatusCode};

#[tokio::test]
async fn test_signal_fires_once_and_wakes_listeners() {
    let signal = CancelSignal::new();
    let listener = signal.listener();
    assert!(!listener.is_cancelled());

    let waiter = tokio::spawn({
        let listener = listener.clone();
        async move { listener.cancelled().await }
    });

    assert!(signal.fire());
    assert!(!signal.fire());
    assert!(signal.is_fired());

    tokio::time::timeout(Duration::from_secs(2), waiter)
        .await
        .expect("listener did not wake")
        .unwrap();
    assert!(listener.is_cancelled());

    // Listeners created after firing resolve immediately.
    tokio::time::timeout(Duration::from_millis(100), signal.listener().cancelled())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_unfired_dropped_signal_never_resolves() {
    let signal = CancelSignal::new();
    let listener = signal.listener();
    drop(signal);

    let waited = tokio::time::timeout(Duration::from_millis(50), listener.cancelled()).await;
    assert!(waited.is_err());
    assert!(!listener.is_cancelled());
}

#[test]
fn test_mock_clock_set_and_advance() {
    let clock = MockClock::at_epoch();
    assert_eq!(clock.now().timestamp(), 0);

    clock.advance(chrono::Duration::seconds(90));
    assert_eq!(clock.now().timestamp(), 90);

    let noon = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
    clock.set(noon);
    assert_eq!(clock.now(), noon);
}

#[test]
fn test_sequential_ids_are_deterministic() {
    let ids = SequentialFlowIds::new("x");
    assert_eq!(ids.next_flow_id(), "F.x1");
    assert_eq!(ids.next_flow_id(), "F.x2");
    assert_eq!(SequentialFlowIds::default().next_flow_id(), "F.1");
}

#[test]
fn test_uuid_ids_are_unique() {
    let ids = UuidFlowIds;
    let minted: HashSet<_> = (0..500).map(|_| ids.next_flow_id()).collect();
    assert_eq!(minted.len(), 500);
    assert!(minted.iter().all(|id| id.starts_with("F.") && id.len() == 34));
}

#[test]
fn test_split_level_and_message() {
    assert_eq!(
        split_level_and_message("[ERROR] boom"),
        (LogLevel::Error, "boom")
    );
    assert_eq!(
        split_level_and_message("[warning]careful"),
        (LogLevel::Warn, "careful")
    );
    assert_eq!(
        split_level_and_message("[nope] text"),
        (LogLevel::Default, "[nope] text")
    );
    assert_eq!(split_level_and_message("plain"), (LogLevel::Default, "plain"));
}

#[test]
fn test_log_level_parsing() {
    assert_eq!("info".parse::<LogLevel>(), Ok(LogLevel::Info));
    assert_eq!("WARNING".parse::<LogLevel>(), Ok(LogLevel::Warn));
    assert!("verbose".parse::<LogLevel>().is_err());
    assert_eq!(LogLevel::Debug.to_string(), "DEBUG");
}

#[test]
fn test_writer_sink_receives_every_record() {
    let at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
    let records = [
        LogRecord {
            timestamp: at,
            level: LogLevel::Info,
            message: "one".to_string(),
        },
        LogRecord {
            timestamp: at,
            level: LogLevel::Error,
            message: "two".to_string(),
        },
    ];
    let jsonl: String = records
        .iter()
        .map(|r| serde_json::to_string(r).unwrap() + "\n")
        .collect();
    let batch = LogMessage {
        id: 0,
        number_of_rows: 2,
        start_row: 0,
        jsonl,
    };

    let mut sink = WriterSink::new(Vec::new());
    assert_eq!(drain_batch(&batch, &mut sink).unwrap(), 2);

    let written = String::from_utf8(sink.into_inner()).unwrap();
    assert_eq!(written, batch.jsonl);
    assert!(written.contains("\"Message\":\"two\""));
}

#[test]
fn test_corrupt_batch_is_reported() {
    let batch = LogMessage {
        id: 0,
        number_of_rows: 1,
        start_row: 0,
        jsonl: "{not json}\n".to_string(),
    };
    let mut sink = WriterSink::new(Vec::new());
    assert!(drain_batch(&batch, &mut sink).is_err());
}

#[test]
fn test_status_aggregation() {
    use StatusCode::{Cancelled, GenericError};

    assert_eq!(StatusCode::aggregate(Vec::new()), StatusCode::Ok);
    assert_eq!(StatusCode::aggregate([StatusCode::Ok, StatusCode::Ok]), StatusCode::Ok);
    assert_eq!(StatusCode::aggregate([StatusCode::Ok, Cancelled]), Cancelled);
    assert_eq!(
        StatusCode::aggregate([Cancelled, GenericError, StatusCode::Ok]),
        GenericError
    );
}
