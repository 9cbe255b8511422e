use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogEntry {
    /// 项目内单调递增，`clear` 之后也不会重置
    pub seq: u64,
    pub project_id: String,
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    pub stream: LogStream,
}

impl LogEntry {
    /// `HH:MM:SS`，日志视图使用
    pub fn formatted_timestamp(&self) -> String {
        self.timestamp.format("%H:%M:%S").to_string()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warning,
    Error,
}

impl LogLevel {
    pub fn label(&self) -> &'static str {
        match self {
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARN",
            LogLevel::Error => "ERROR",
        }
    }

    pub fn tint(&self) -> &'static str {
        match self {
            LogLevel::Info => "secondary",
            LogLevel::Warning => "orange",
            LogLevel::Error => "red",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warning),
            "error" => Ok(LogLevel::Error),
            other => Err(format!("未知的日志级别: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogStream {
    Stdout,
    Stderr,
    /// 管理器自身写入的生命周期提示
    System,
}

/// 日志查询条件
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LogQuery {
    pub since: Option<DateTime<Utc>>,
    /// 只返回该级别的条目
    pub level: Option<LogLevel>,
}

impl LogQuery {
    pub fn matches(&self, entry: &LogEntry) -> bool {
        if let Some(since) = self.since {
            if entry.timestamp < since {
                return false;
            }
        }
        match self.level {
            Some(level) => entry.level == level,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_labels_and_parse() {
        assert_eq!(LogLevel::Warning.label(), "WARN");
        assert_eq!("warn".parse::<LogLevel>(), Ok(LogLevel::Warning));
        assert_eq!("ERROR".parse::<LogLevel>(), Ok(LogLevel::Error));
        assert!("debug".parse::<LogLevel>().is_err());
    }

    #[test]
    fn test_query_matches() {
        let now = Utc::now();
        let entry = LogEntry {
            seq: 0,
            project_id: "p".to_string(),
            timestamp: now,
            level: LogLevel::Error,
            message: "Failed to render partial 'hero.html'".to_string(),
            stream: LogStream::Stderr,
        };
        assert!(LogQuery::default().matches(&entry));
        assert!(LogQuery {
            since: Some(now),
            level: Some(LogLevel::Error)
        }
        .matches(&entry));
        assert!(!LogQuery {
            since: Some(now + chrono::Duration::seconds(1)),
            level: None
        }
        .matches(&entry));
        assert!(!LogQuery {
            since: None,
            level: Some(LogLevel::Info)
        }
        .matches(&entry));
    }
}
