// src/sink.rs

//! Log sink collaborator.
//!
//! Durable storage of flow logs happens outside the executor. Whatever
//! stores them receives structured [`LogRecord`]s; this module provides the
//! trait, a JSONL writer implementation, and helpers for getting records
//! out of batches and raw lines.

use std::io::Write;

use crate::errors::Result;
use crate::protocol::{LogMessage, LogRecord};
use crate::types::LogLevel;

pub trait LogSink {
    fn write_record(&mut self, record: &LogRecord) -> Result<()>;
}

/// Writes one JSON object per record to any `Write`.
#[derive(Debug)]
pub struct WriterSink<W: Write> {
    writer: W,
}

impl<W: Write> WriterSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> LogSink for WriterSink<W> {
    fn write_record(&mut self, record: &LogRecord) -> Result<()> {
        serde_json::to_writer(&mut self.writer, record)?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }
}

/// Decode a batch and write every record to `sink`. Returns the count.
pub fn drain_batch(batch: &LogMessage, sink: &mut dyn LogSink) -> Result<usize> {
    let records = batch.records()?;
    for record in &records {
        sink.write_record(record)?;
    }
    Ok(records.len())
}

/// Split a `"[LEVEL] text"` line into its level and text.
///
/// Lines without a recognised prefix are `DEFAULT` and returned unchanged.
pub fn split_level_and_message(line: &str) -> (LogLevel, &str) {
    let trimmed = line.trim_start();
    if let Some(rest) = trimmed.strip_prefix('[') {
        if let Some((tag, text)) = rest.split_once(']') {
            if let Ok(level) = tag.parse::<LogLevel>() {
                return (level, text.trim_start());
            }
        }
    }
    (LogLevel::Default, line)
}
