// src/types.rs

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Authentication state of a message envelope.
///
/// The transport decides this; the executor only refuses to act on
/// envelopes that are not `Authenticated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthState {
    #[default]
    Unauthenticated,
    Authenticated,
}

/// Level attached to every flow log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    #[default]
    Default,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Default => "DEFAULT",
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "DEFAULT" => Ok(LogLevel::Default),
            "DEBUG" => Ok(LogLevel::Debug),
            "INFO" => Ok(LogLevel::Info),
            "WARN" | "WARNING" => Ok(LogLevel::Warn),
            "ERROR" => Ok(LogLevel::Error),
            other => Err(format!(
                "invalid log level: {other} (expected DEFAULT, DEBUG, INFO, WARN or ERROR)"
            )),
        }
    }
}

/// Terminal status of a query, and the aggregate status of a flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusCode {
    #[default]
    Ok,
    GenericError,
    Cancelled,
}

impl StatusCode {
    /// Fold a sequence of per-query statuses into a flow-level status.
    ///
    /// Any error wins over cancellation, which wins over `Ok`.
    pub fn aggregate<I>(statuses: I) -> StatusCode
    where
        I: IntoIterator<Item = StatusCode>,
    {
        statuses
            .into_iter()
            .fold(StatusCode::Ok, |acc, s| match (acc, s) {
                (StatusCode::GenericError, _) | (_, StatusCode::GenericError) => {
                    StatusCode::GenericError
                }
                (StatusCode::Cancelled, _) | (_, StatusCode::Cancelled) => StatusCode::Cancelled,
                _ => StatusCode::Ok,
            })
    }
}
