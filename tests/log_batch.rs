// tests/log_batch.rs

use std::time::Duration;

use chrono::Utc;
use proptest::prelude::*;
use tokio::time::Instant;

use flowexec::batcher::{BatchLimits, LogBatch};
use flowexec::protocol::LogRecord;
use flowexec::types::LogLevel;

fn record(text: &str) -> LogRecord {
    LogRecord {
        timestamp: Utc::now(),
        level: LogLevel::Info,
        message: text.to_string(),
    }
}

fn limits(max_rows: u64, max_bytes: usize) -> BatchLimits {
    BatchLimits {
        max_rows,
        max_bytes,
        interval: Duration::from_millis(100),
    }
}

#[test]
fn test_flush_on_empty_batch_emits_nothing() {
    let mut batch = LogBatch::new(limits(10, 1 << 20));
    assert!(batch.flush().is_none());
    assert!(batch.deadline().is_none());
    assert_eq!(batch.next_id(), 0);
}

#[test]
fn test_row_limit_closes_batch() {
    let mut batch = LogBatch::new(limits(2, 1 << 20));
    let now = Instant::now();

    assert!(batch.push(&record("a"), now).is_none());
    let full = batch.push(&record("b"), now).expect("second line fills the batch");
    assert_eq!(full.id, 0);
    assert_eq!(full.number_of_rows, 2);
    assert_eq!(full.start_row, 0);
    assert_eq!(full.jsonl.lines().count(), 2);
    assert_eq!(batch.pending_rows(), 0);

    assert!(batch.push(&record("c"), now).is_none());
    let rest = batch.flush().expect("pending line");
    assert_eq!(rest.id, 1);
    assert_eq!(rest.start_row, 2);
    assert_eq!(batch.rows_emitted(), 3);
}

#[test]
fn test_deadline_is_anchored_at_first_pending_line() {
    let mut batch = LogBatch::new(limits(10, 1 << 20));
    let start = Instant::now();

    batch.push(&record("a"), start);
    batch.push(&record("b"), start + Duration::from_millis(80));

    assert_eq!(batch.deadline(), Some(start + Duration::from_millis(100)));
    assert!(!batch.is_due(start + Duration::from_millis(99)));
    assert!(batch.is_due(start + Duration::from_millis(100)));

    batch.flush();
    assert!(batch.deadline().is_none());
}

#[test]
fn test_batch_body_round_trips_to_records() {
    let mut batch = LogBatch::new(limits(10, 1 << 20));
    let now = Instant::now();
    batch.push(&record("first"), now);
    batch.push(&record("second"), now);

    let message = batch.flush().unwrap();
    let messages: Vec<_> = message
        .records()
        .unwrap()
        .into_iter()
        .map(|r| r.message)
        .collect();
    assert_eq!(messages, vec!["first", "second"]);
    assert!(message.jsonl.contains("\"Level\":\"INFO\""));
}

#[derive(Debug, Clone)]
enum Op {
    Push(String),
    Flush,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => "[a-z ]{0,40}".prop_map(Op::Push),
        1 => Just(Op::Flush),
    ]
}

proptest! {
    #[test]
    fn test_ids_are_contiguous_and_rows_accounted(
        ops in proptest::collection::vec(op_strategy(), 0..200),
        max_rows in 1u64..20,
        max_bytes in 1usize..2048,
    ) {
        let mut batch = LogBatch::new(limits(max_rows, max_bytes));
        let now = Instant::now();
        let mut emitted = Vec::new();
        let mut pushed = 0u64;

        for op in ops {
            match op {
                Op::Push(text) => {
                    pushed += 1;
                    emitted.extend(batch.push(&record(&text), now));
                }
                Op::Flush => emitted.extend(batch.flush()),
            }
        }
        emitted.extend(batch.flush());

        let mut total = 0u64;
        for (index, message) in emitted.iter().enumerate() {
            prop_assert_eq!(message.id, index as u64);
            prop_assert_eq!(message.start_row, total);
            prop_assert!(message.number_of_rows >= 1);
            prop_assert!(message.number_of_rows <= max_rows);
            prop_assert_eq!(message.jsonl.lines().count() as u64, message.number_of_rows);
            total += message.number_of_rows;
        }
        prop_assert_eq!(total, pushed);
        prop_assert_eq!(batch.pending_rows(), 0);
    }
}
