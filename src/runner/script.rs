// src/runner/script.rs

//! A small line-oriented query language used by the CLI and the tests.
//!
//! Commands are separated by newlines or `;`:
//!
//! ```text
//! log [LEVEL] <text>     append a flow log line; `[LEVEL] text` also works,
//!                        otherwise the level is DEFAULT
//! row <json>             send one result row
//! sleep <ms>             wait, waking early on cancellation
//! fail [message]         stop the query with an error
//! repeat <n> <command>   run <command> n times; `{i}` expands to 0..n-1
//! ```
//!
//! `;` therefore cannot appear inside a command.

use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::time::Duration;

use serde_json::Value;
use tracing::debug;

use crate::errors::{FlowexecError, Result};
use crate::protocol::QuerySpec;
use crate::sink::split_level_and_message;
use crate::types::LogLevel;

use super::{QueryContext, QueryOutcome, QueryRunner};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Log { level: LogLevel, text: String },
    /// Raw JSON, validated at parse time and expanded per iteration.
    Row(String),
    Sleep(Duration),
    Fail(String),
    Repeat { count: u64, step: Box<Step> },
}

impl Step {
    /// Copy of this step with `{i}` replaced by `index`.
    fn expand(&self, index: u64) -> Step {
        let sub = |s: &str| s.replace("{i}", &index.to_string());
        match self {
            Step::Log { level, text } => Step::Log {
                level: *level,
                text: sub(text),
            },
            Step::Row(raw) => Step::Row(sub(raw)),
            Step::Fail(msg) => Step::Fail(sub(msg)),
            other => other.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Script {
    steps: Vec<Step>,
}

impl Script {
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }
}

impl FromStr for Script {
    type Err = FlowexecError;

    fn from_str(s: &str) -> Result<Self> {
        let steps = s
            .split(['\n', ';'])
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(|line| parse_step(line, true))
            .collect::<Result<Vec<_>>>()?;
        Ok(Script { steps })
    }
}

fn split_word(s: &str) -> (&str, &str) {
    match s.split_once(char::is_whitespace) {
        Some((head, tail)) => (head, tail.trim()),
        None => (s, ""),
    }
}

fn parse_step(line: &str, allow_repeat: bool) -> Result<Step> {
    let (cmd, rest) = split_word(line);

    match cmd.to_lowercase().as_str() {
        "log" => {
            let (first, tail) = split_word(rest);
            match first.parse::<LogLevel>() {
                Ok(level) if !tail.is_empty() => Ok(Step::Log {
                    level,
                    text: tail.to_string(),
                }),
                _ if rest.is_empty() => Err(FlowexecError::ScriptError(
                    "`log` requires a message".to_string(),
                )),
                _ => {
                    let (level, text) = split_level_and_message(rest);
                    Ok(Step::Log {
                        level,
                        text: text.to_string(),
                    })
                }
            }
        }
        "row" => {
            let probe = rest.replace("{i}", "0");
            serde_json::from_str::<Value>(&probe).map_err(|e| {
                FlowexecError::ScriptError(format!("`row` expects JSON, got {rest:?}: {e}"))
            })?;
            Ok(Step::Row(rest.to_string()))
        }
        "sleep" => {
            let ms = rest.parse::<u64>().map_err(|_| {
                FlowexecError::ScriptError(format!(
                    "`sleep` expects milliseconds, got {rest:?}"
                ))
            })?;
            Ok(Step::Sleep(Duration::from_millis(ms)))
        }
        "fail" => {
            let msg = if rest.is_empty() { "query failed" } else { rest };
            Ok(Step::Fail(msg.to_string()))
        }
        "repeat" if allow_repeat => {
            let (count, inner) = split_word(rest);
            let count = count.parse::<u64>().map_err(|_| {
                FlowexecError::ScriptError(format!("`repeat` expects a count, got {count:?}"))
            })?;
            if inner.is_empty() {
                return Err(FlowexecError::ScriptError(
                    "`repeat` requires a command".to_string(),
                ));
            }
            let step = parse_step(inner, false)?;
            Ok(Step::Repeat {
                count,
                step: Box::new(step),
            })
        }
        "repeat" => Err(FlowexecError::ScriptError(
            "`repeat` cannot be nested".to_string(),
        )),
        other => Err(FlowexecError::ScriptError(format!(
            "unknown command {other:?}"
        ))),
    }
}

/// [`QueryRunner`] that interprets `QuerySpec::query` as a [`Script`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ScriptedRunner;

impl QueryRunner for ScriptedRunner {
    fn run<'a>(
        &'a self,
        query: &'a QuerySpec,
        ctx: QueryContext,
    ) -> Pin<Box<dyn Future<Output = QueryOutcome> + Send + 'a>> {
        Box::pin(async move {
            let script = match query.query.parse::<Script>() {
                Ok(script) => script,
                Err(err) => return QueryOutcome::Failed(err.to_string()),
            };

            for step in script.steps() {
                let outcome = match step {
                    Step::Repeat { count, step } => {
                        let mut outcome = None;
                        for i in 0..*count {
                            outcome = run_step(&step.expand(i), &ctx).await;
                            if outcome.is_some() {
                                break;
                            }
                        }
                        outcome
                    }
                    single => run_step(single, &ctx).await,
                };

                if let Some(outcome) = outcome {
                    debug!(flow_id = %ctx.flow_id(), query = %query.name, ?outcome, "script stopped early");
                    return outcome;
                }
            }

            QueryOutcome::Completed
        })
    }
}

/// Run one non-repeat step. `Some` ends the query.
async fn run_step(step: &Step, ctx: &QueryContext) -> Option<QueryOutcome> {
    if ctx.is_cancelled() {
        return Some(QueryOutcome::Cancelled);
    }

    match step {
        Step::Log { level, text } => ctx.log(*level, text.clone()),
        Step::Row(raw) => match serde_json::from_str::<Value>(raw) {
            Ok(row) => ctx.send_rows(vec![row]),
            Err(err) => return Some(QueryOutcome::Failed(format!("invalid row {raw:?}: {err}"))),
        },
        Step::Sleep(duration) => {
            tokio::select! {
                _ = tokio::time::sleep(*duration) => {}
                _ = ctx.cancelled() => return Some(QueryOutcome::Cancelled),
            }
        }
        Step::Fail(msg) => return Some(QueryOutcome::Failed(msg.clone())),
        Step::Repeat { .. } => {
            return Some(QueryOutcome::Failed("nested repeat".to_string()));
        }
    }

    None
}
