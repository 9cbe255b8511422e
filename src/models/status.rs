use super::ProcessState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// 对外展示的项目状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ServerStatus {
    Running,
    Stopped,
    Error,
}

impl ServerStatus {
    pub fn label(&self) -> &'static str {
        match self {
            ServerStatus::Running => "Running",
            ServerStatus::Stopped => "Stopped",
            ServerStatus::Error => "Needs Attention",
        }
    }

    pub fn icon(&self) -> &'static str {
        match self {
            ServerStatus::Running => "play.circle.fill",
            ServerStatus::Stopped => "pause.circle",
            ServerStatus::Error => "exclamationmark.triangle.fill",
        }
    }

    pub fn tint(&self) -> &'static str {
        match self {
            ServerStatus::Running => "green",
            ServerStatus::Stopped => "gray",
            ServerStatus::Error => "orange",
        }
    }
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
            Self::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusSnapshot {
    pub project_id: String,
    pub status: ServerStatus,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub process_state: Option<ProcessState>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub pid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub url: Option<String>,
    pub recent_errors: usize,
    pub computed_at: DateTime<Utc>,
}

impl StatusSnapshot {
    /// 忽略计算时间比较两个快照
    pub fn same_state(&self, other: &StatusSnapshot) -> bool {
        self.project_id == other.project_id
            && self.status == other.status
            && self.process_state == other.process_state
            && self.pid == other.pid
            && self.port == other.port
            && self.recent_errors == other.recent_errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presentation_mapping() {
        assert_eq!(ServerStatus::Error.label(), "Needs Attention");
        assert_eq!(ServerStatus::Running.tint(), "green");
        assert_eq!(ServerStatus::Stopped.icon(), "pause.circle");
    }

    #[test]
    fn test_same_state_ignores_timestamp() {
        let a = StatusSnapshot {
            project_id: "p".to_string(),
            status: ServerStatus::Stopped,
            process_state: None,
            pid: None,
            port: None,
            url: None,
            recent_errors: 0,
            computed_at: Utc::now(),
        };
        let mut b = a.clone();
        b.computed_at = a.computed_at + chrono::Duration::seconds(5);
        assert!(a.same_state(&b));
        b.recent_errors = 1;
        assert!(!a.same_state(&b));
    }
}
