use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "camelCase")]
pub enum LogSource {
    Backend,
    JobRunner,
    Nmap,
    Nuclei,
    Nikto,
    Sqlmap,
    Ffuf,
    Subfinder,
    Httpx,
}

impl LogSource {
    pub const ALL: [LogSource; 9] = [
        LogSource::Backend,
        LogSource::JobRunner,
        LogSource::Nmap,
        LogSource::Nuclei,
        LogSource::Nikto,
        LogSource::Sqlmap,
        LogSource::Ffuf,
        LogSource::Subfinder,
        LogSource::Httpx,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LogSource::Backend => "backend",
            LogSource::JobRunner => "celery",
            LogSource::Nmap => "nmap",
            LogSource::Nuclei => "nuclei",
            LogSource::Nikto => "nikto",
            LogSource::Sqlmap => "sqlmap",
            LogSource::Ffuf => "ffuf",
            LogSource::Subfinder => "subfinder",
            LogSource::Httpx => "httpx",
        }
    }
}

impl FromStr for LogSource {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "backend" | "api" => Ok(LogSource::Backend),
            "celery" | "worker" | "job_runner" => Ok(LogSource::JobRunner),
            "nmap" => Ok(LogSource::Nmap),
            "nuclei" => Ok(LogSource::Nuclei),
            "nikto" => Ok(LogSource::Nikto),
            "sqlmap" => Ok(LogSource::Sqlmap),
            "ffuf" => Ok(LogSource::Ffuf),
            "subfinder" => Ok(LogSource::Subfinder),
            "httpx" => Ok(LogSource::Httpx),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    pub const ALL: [LogLevel; 4] = [
        LogLevel::Debug,
        LogLevel::Info,
        LogLevel::Warning,
        LogLevel::Error,
    ];
}

impl FromStr for LogLevel {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_uppercase().as_str() {
            "DEBUG" => Ok(LogLevel::Debug),
            "INFO" => Ok(LogLevel::Info),
            "WARNING" | "WARN" => Ok(LogLevel::Warning),
            "ERROR" => Ok(LogLevel::Error),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LogRecord {
    pub id: u64,
    pub source: LogSource,
    pub level: LogLevel,
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub raw: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionNotice {
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// A buffered line. Notices render as separators and bypass every filter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum LogEntry {
    Record(LogRecord),
    Notice(SessionNotice),
}

impl LogEntry {
    pub fn as_record(&self) -> Option<&LogRecord> {
        match self {
            LogEntry::Record(record) => Some(record),
            LogEntry::Notice(_) => None,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            LogEntry::Record(record) => &record.message,
            LogEntry::Notice(notice) => &notice.message,
        }
    }
}
