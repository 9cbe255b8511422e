use crate::models::ProcessState;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub type Result<T, E = ManagerError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("路径已被其他项目注册: {}", .path.display())]
    DuplicatePath { path: PathBuf },

    #[error("项目不存在: {project_id}")]
    NotFound { project_id: String },

    #[error("项目 {project_id} 已有进程 ({state})")]
    AlreadyRunning {
        project_id: String,
        state: ProcessState,
    },

    #[error("项目 {project_id} 没有运行中的进程")]
    NotRunning { project_id: String },

    #[error("项目 {project_id} 的端口 {port} 已被占用")]
    PortInUse { project_id: String, port: u16 },

    #[error("项目 {project_id} 不允许从 {from} 切换到 {to}")]
    InvalidTransition {
        project_id: String,
        from: ProcessState,
        to: ProcessState,
    },

    #[error("项目 {project_id} 的进程仍在运行 ({state})，请先停止")]
    ProcessStillRunning {
        project_id: String,
        state: ProcessState,
    },

    #[error("项目 {project_id} 启动失败: {source}")]
    SpawnFailed {
        project_id: String,
        #[source]
        source: std::io::Error,
    },

    /// 仅用于内部升级为强制结束，不会返回给调用方
    #[error("项目 {project_id} 在 {timeout:?} 内未能优雅退出")]
    GracefulStopTimeout {
        project_id: String,
        timeout: Duration,
    },

    #[error("项目 {project_id} 在启动阶段退出 (code: {code:?})")]
    ExitedDuringStartup {
        project_id: String,
        code: Option<i32>,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("无效的日志匹配规则: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error("无法打开 {target}: {source}")]
    OpenFailed {
        target: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    Unsupported(String),
}

impl ManagerError {
    /// 稳定的错误类别，用于 JSON 响应
    pub fn kind(&self) -> &'static str {
        match self {
            ManagerError::DuplicatePath { .. } => "duplicate_path",
            ManagerError::NotFound { .. } => "not_found",
            ManagerError::AlreadyRunning { .. } => "already_running",
            ManagerError::NotRunning { .. } => "not_running",
            ManagerError::PortInUse { .. } => "port_in_use",
            ManagerError::InvalidTransition { .. } => "invalid_transition",
            ManagerError::ProcessStillRunning { .. } => "process_still_running",
            ManagerError::SpawnFailed { .. } => "spawn_failed",
            ManagerError::GracefulStopTimeout { .. } => "graceful_stop_timeout",
            ManagerError::ExitedDuringStartup { .. } => "exited_during_startup",
            ManagerError::Store(_) => "store",
            ManagerError::InvalidPattern(_) => "invalid_pattern",
            ManagerError::OpenFailed { .. } => "open_failed",
            ManagerError::Unsupported(_) => "unsupported",
        }
    }

    pub fn not_found(project_id: &str) -> Self {
        ManagerError::NotFound {
            project_id: project_id.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("无法获取用户主目录")]
    NoHomeDir,

    #[error("读写 {} 失败: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("解析 {} 失败: {source}", .path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}
