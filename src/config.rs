use crate::error::StoreError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// 覆盖数据目录的环境变量
pub const HOME_ENV: &str = "STATIC_TOGGLE_HOME";

pub const DEFAULT_LOG_CAPACITY: usize = 1000;
pub const DEFAULT_ERROR_PATTERN: &str =
    r"(?i)\b(error|fatal|panic|failed|exception)\b|ERR!";
pub const DEFAULT_WARNING_PATTERN: &str = r"(?i)\b(warn|warning|deprecated)\b";

/// 管理器配置，所有字段都有默认值，`config.json` 可只写部分字段
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ManagerConfig {
    /// 每个项目保留的日志条数
    pub log_capacity: usize,
    /// 等待首行输出的最长时间
    pub grace_period_ms: u64,
    /// SIGTERM 之后等待退出的时间，超时后 SIGKILL
    pub stop_timeout_ms: u64,
    /// SIGKILL 之后等待回收的时间
    pub kill_timeout_ms: u64,
    /// 瞬时 spawn 错误的重试次数
    pub spawn_retries: u32,
    /// 窗口内 error 条数达到该值即视为异常，0 表示关闭
    pub error_threshold: usize,
    pub error_window_secs: u64,
    pub error_pattern: String,
    pub warning_pattern: String,
    /// 服务器启动成功后打开浏览器
    pub open_browser_on_start: bool,
    /// `serve` 启动时重新运行最近使用的项目
    pub auto_start_last_project: bool,
    /// 打开链接使用的浏览器，`None` 为系统默认
    pub browser: Option<String>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            log_capacity: DEFAULT_LOG_CAPACITY,
            grace_period_ms: 3000,
            stop_timeout_ms: 5000,
            kill_timeout_ms: 2000,
            spawn_retries: 2,
            error_threshold: 3,
            error_window_secs: 10,
            error_pattern: DEFAULT_ERROR_PATTERN.to_string(),
            warning_pattern: DEFAULT_WARNING_PATTERN.to_string(),
            open_browser_on_start: false,
            auto_start_last_project: false,
            browser: None,
        }
    }
}

impl ManagerConfig {
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    pub fn kill_timeout(&self) -> Duration {
        Duration::from_millis(self.kill_timeout_ms)
    }

    pub fn error_window(&self) -> Duration {
        Duration::from_secs(self.error_window_secs)
    }

    /// 读取 `<data_dir>/config.json`，文件不存在时使用默认值
    pub fn load(data_dir: &Path) -> Result<Self, StoreError> {
        let path = data_dir.join("config.json");
        if !path.exists() {
            debug!(path = %path.display(), "config.json not found, using defaults");
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path).map_err(|source| StoreError::Io {
            path: path.clone(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| StoreError::Json { path, source })
    }
}

/// 数据目录：`$STATIC_TOGGLE_HOME` 或 `~/.static-toggle`，不存在时创建
pub fn data_dir() -> Result<PathBuf, StoreError> {
    let dir = match std::env::var_os(HOME_ENV) {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => dirs_next::home_dir()
            .ok_or(StoreError::NoHomeDir)?
            .join(".static-toggle"),
    };

    fs::create_dir_all(&dir).map_err(|source| StoreError::Io {
        path: dir.clone(),
        source,
    })?;

    Ok(dir)
}
