use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// 某个项目当前进程句柄的快照
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessInfo {
    pub project_id: String,
    pub project_name: String,
    pub state: ProcessState,
    pub pid: Option<u32>,
    pub port: u16,
    pub url: String,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub exit_code: Option<i32>,
}

/// Dev-server lifecycle.
///
/// ```text
/// Stopped -> Starting -> Running -> Stopping -> Stopped
///               |           |          ^
///               v           v          |
///               +-------> Error -------+
///                           |
///                           +--> Starting (restart)
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ProcessState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Error,
}

impl ProcessState {
    pub fn can_transition_to(self, next: ProcessState) -> bool {
        use ProcessState::*;
        matches!(
            (self, next),
            (Stopped, Starting)
                | (Starting, Running)
                | (Starting, Error)
                | (Starting, Stopping)
                | (Running, Stopping)
                | (Running, Error)
                | (Stopping, Stopped)
                | (Error, Starting)
                | (Error, Stopping)
        )
    }

    /// 进程是否可能仍然存活
    pub fn is_live(self) -> bool {
        matches!(
            self,
            ProcessState::Starting | ProcessState::Running | ProcessState::Stopping
        )
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stopped => write!(f, "stopped"),
            Self::Starting => write!(f, "starting"),
            Self::Running => write!(f, "running"),
            Self::Stopping => write!(f, "stopping"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// 子进程退出结果，由监控任务写入
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitOutcome {
    pub code: Option<i32>,
    pub success: bool,
}

impl ExitOutcome {
    pub fn from_status(status: std::io::Result<std::process::ExitStatus>) -> Self {
        match status {
            Ok(status) => Self {
                code: status.code(),
                success: status.success(),
            },
            Err(_) => Self {
                code: None,
                success: false,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        use ProcessState::*;
        let path = [Stopped, Starting, Running, Stopping, Stopped];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{:?}", pair);
        }
    }

    #[test]
    fn test_illegal_transitions() {
        use ProcessState::*;
        assert!(!Stopped.can_transition_to(Running));
        assert!(!Stopped.can_transition_to(Stopping));
        assert!(!Running.can_transition_to(Starting));
        assert!(!Stopping.can_transition_to(Running));
        assert!(!Error.can_transition_to(Running));
        assert!(!Running.can_transition_to(Running));
    }

    #[test]
    fn test_error_recovery_edges() {
        use ProcessState::*;
        assert!(Running.can_transition_to(Error));
        assert!(Error.can_transition_to(Starting));
        assert!(Error.can_transition_to(Stopping));
    }
}
