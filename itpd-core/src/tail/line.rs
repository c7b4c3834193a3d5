//! i2pd log line parsing

use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Severity parsed from an i2pd log line
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
    Critical,
}

impl FromStr for LogLevel {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            "critical" => Ok(Self::Critical),
            _ => Err(()),
        }
    }
}

impl LogLevel {
    /// Detect the level of an i2pd line.
    ///
    /// i2pd writes `HH:MM:SS@<thread>/<level> - <message>`.
    pub fn detect(line: &str) -> Option<Self> {
        let (_, rest) = line.split_once('@')?;
        let (_, rest) = rest.split_once('/')?;
        let (level, _) = rest.split_once(" - ")?;
        level.trim().parse().ok()
    }
}

/// One complete line read from the daemon log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogLine {
    /// 1-based line number within the current file
    pub number: u64,
    pub level: Option<LogLevel>,
    pub text: String,
}

impl LogLine {
    pub fn new(number: u64, text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            number,
            level: LogLevel::detect(&text),
            text,
        }
    }

    /// Message part after the `- ` separator, or the whole line
    pub fn message(&self) -> &str {
        match self.level {
            Some(_) => self
                .text
                .split_once(" - ")
                .map_or(self.text.as_str(), |(_, message)| message),
            None => &self.text,
        }
    }
}

impl std::fmt::Display for LogLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.text)
    }
}
