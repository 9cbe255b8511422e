//! JSON 命令接口。
//!
//! 每个命令对应一个函数，`dispatch` 负责路由并把错误转换成 `{kind, message}`。
//! 订阅类命令通过 `dispatch_with_events` 持续推送 [`Event`]。

pub mod events;
pub mod logs;
pub mod port;
pub mod process;
pub mod project;
pub mod quick_action;

pub use events::*;
pub use logs::*;
pub use port::*;
pub use process::*;
pub use project::*;
pub use quick_action::*;

use crate::error::ManagerError;
use crate::models::{
    LogEntry, LogLevel, LogQuery, NewProject, ProcessInfo, Project, ProjectUpdate, QuickAction,
    StatusSnapshot,
};
use crate::services::DetectedSite;
use crate::state::AppState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::debug;

fn default_scan_depth() -> usize {
    3
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    ListProjects,
    GetProject {
        project_id: String,
    },
    AddProject {
        project: NewProject,
    },
    UpdateProject {
        project_id: String,
        update: ProjectUpdate,
    },
    RemoveProject {
        project_id: String,
    },
    Start {
        project_id: String,
    },
    Stop {
        project_id: String,
    },
    Restart {
        project_id: String,
    },
    StopAll,
    ListProcesses,
    GetLogs {
        project_id: String,
        #[serde(default)]
        since: Option<DateTime<Utc>>,
        #[serde(default)]
        level: Option<LogLevel>,
        #[serde(default)]
        limit: Option<usize>,
    },
    ClearLogs {
        project_id: String,
    },
    GetStatus {
        project_id: String,
    },
    CheckPort {
        port: u16,
    },
    QuickAction {
        project_id: String,
        action: QuickAction,
    },
    ScanDirectory {
        path: PathBuf,
        #[serde(default = "default_scan_depth")]
        max_depth: usize,
    },
    SubscribeStatus {
        project_id: String,
    },
    SubscribeLogs {
        project_id: String,
        #[serde(default)]
        level: Option<LogLevel>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Response {
    Projects(Vec<Project>),
    Project(Project),
    Process(ProcessInfo),
    Processes(Vec<ProcessInfo>),
    Logs(Vec<LogEntry>),
    Status(StatusSnapshot),
    Port(PortCheck),
    Sites(Vec<DetectedSite>),
    Ok,
    Error(ErrorBody),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorBody {
    pub kind: String,
    pub message: String,
}

impl From<&ManagerError> for ErrorBody {
    fn from(error: &ManagerError) -> Self {
        Self {
            kind: error.kind().to_string(),
            message: error.to_string(),
        }
    }
}

impl From<ManagerError> for Response {
    fn from(error: ManagerError) -> Self {
        Response::Error(ErrorBody::from(&error))
    }
}

impl Response {
    pub fn is_error(&self) -> bool {
        matches!(self, Response::Error(_))
    }
}

fn subscription_unsupported() -> ManagerError {
    ManagerError::Unsupported("订阅命令需要事件通道".to_string())
}

impl AppState {
    /// 执行单个命令；失败不会影响其他项目
    ///
    /// 订阅类命令没有推送通道，返回 `unsupported`。
    pub async fn dispatch(&self, command: Command) -> Response {
        self.execute(command, None).await
    }

    /// 同 [`AppState::dispatch`]，订阅类命令的后续事件写入 `events`
    pub async fn dispatch_with_events(&self, command: Command, events: &EventSender) -> Response {
        self.execute(command, Some(events)).await
    }

    async fn execute(&self, command: Command, events: Option<&EventSender>) -> Response {
        debug!(command = ?command, "dispatching command");

        let result = match command {
            Command::ListProjects => Ok(Response::Projects(list_projects(self))),
            Command::GetProject { project_id } => {
                get_project(&project_id, self).map(Response::Project)
            }
            Command::AddProject { project } => add_project(project, self).map(Response::Project),
            Command::UpdateProject { project_id, update } => {
                update_project(&project_id, update, self).map(Response::Project)
            }
            Command::RemoveProject { project_id } => remove_project(&project_id, self)
                .await
                .map(Response::Project),
            Command::Start { project_id } => start_project(&project_id, self)
                .await
                .map(Response::Process),
            Command::Stop { project_id } => stop_project(&project_id, self)
                .await
                .map(Response::Process),
            Command::Restart { project_id } => restart_project(&project_id, self)
                .await
                .map(Response::Process),
            Command::StopAll => Ok(Response::Processes(stop_all_projects(self).await)),
            Command::ListProcesses => Ok(Response::Processes(get_running_processes(self))),
            Command::GetLogs {
                project_id,
                since,
                level,
                limit,
            } => get_logs(&project_id, LogQuery { since, level }, limit, self).map(Response::Logs),
            Command::ClearLogs { project_id } => {
                clear_logs(&project_id, self).map(|_| Response::Ok)
            }
            Command::GetStatus { project_id } => {
                get_status(&project_id, self).map(Response::Status)
            }
            Command::CheckPort { port } => Ok(Response::Port(check_port_available(port))),
            Command::QuickAction { project_id, action } => {
                perform_quick_action(&project_id, action, self).map(|_| Response::Ok)
            }
            Command::ScanDirectory { path, max_depth } => {
                Ok(Response::Sites(scan_directory(path, max_depth, self)))
            }
            Command::SubscribeStatus { project_id } => match events {
                Some(events) => {
                    watch_status(&project_id, self, events.clone()).map(Response::Status)
                }
                None => Err(subscription_unsupported()),
            },
            Command::SubscribeLogs { project_id, level } => match events {
                Some(events) => {
                    tail_logs(&project_id, level, self, events.clone()).map(|_| Response::Ok)
                }
                None => Err(subscription_unsupported()),
            },
        };

        result.unwrap_or_else(Response::from)
    }
}
