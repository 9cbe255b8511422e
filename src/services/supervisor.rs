//! Dev-server process supervision.
//!
//! One subprocess per project. Every lifecycle operation on a project runs
//! under that project's lock from [`ProcessTable::lock`], so a second `start`
//! racing the first always observes the first handle and fails with
//! `AlreadyRunning`. Operations on different projects never contend.

use crate::config::ManagerConfig;
use crate::error::{ManagerError, Result};
use crate::models::{ExitOutcome, LogLevel, LogStream, ProcessInfo, ProcessState, Project};
use crate::services::process_table::ExitSender;
use crate::services::{LogAggregator, ProcessTable, ProjectRegistry, StatusTracker};
use crate::utils::{is_port_available, kill_group, terminate_group};
use chrono::Utc;
use std::io;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{watch, Notify};
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

#[cfg(not(target_os = "windows"))]
use crate::utils::USER_PATH;

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub grace_period: Duration,
    pub stop_timeout: Duration,
    pub kill_timeout: Duration,
    pub spawn_retries: u32,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self::from(&ManagerConfig::default())
    }
}

impl From<&ManagerConfig> for SupervisorConfig {
    fn from(config: &ManagerConfig) -> Self {
        Self {
            grace_period: config.grace_period(),
            stop_timeout: config.stop_timeout(),
            kill_timeout: config.kill_timeout(),
            spawn_retries: config.spawn_retries,
        }
    }
}

pub struct ProcessSupervisor {
    processes: Arc<ProcessTable>,
    registry: Arc<ProjectRegistry>,
    logs: Arc<LogAggregator>,
    tracker: Arc<StatusTracker>,
    config: SupervisorConfig,
}

impl ProcessSupervisor {
    pub fn new(
        processes: Arc<ProcessTable>,
        registry: Arc<ProjectRegistry>,
        logs: Arc<LogAggregator>,
        tracker: Arc<StatusTracker>,
        config: SupervisorConfig,
    ) -> Self {
        // 预热 PATH 缓存，避免第一次启动时卡在 login shell 上
        #[cfg(not(target_os = "windows"))]
        {
            let _ = &*USER_PATH;
        }

        Self {
            processes,
            registry,
            logs,
            tracker,
            config,
        }
    }

    pub fn info(&self, project_id: &str) -> Option<ProcessInfo> {
        self.processes.get(project_id)
    }

    pub fn list(&self) -> Vec<ProcessInfo> {
        self.processes.list()
    }

    pub fn is_active(&self, project_id: &str) -> bool {
        self.processes.contains(project_id)
    }

    /// 启动项目的开发服务器
    pub async fn start(&self, project_id: &str) -> Result<ProcessInfo> {
        let _guard = self.processes.lock(project_id).await;
        self.start_locked(project_id, false).await
    }

    /// 停止项目：SIGTERM，超时后 SIGKILL
    pub async fn stop(&self, project_id: &str) -> Result<ProcessInfo> {
        let _guard = self.processes.lock(project_id).await;
        self.stop_locked(project_id).await
    }

    /// 重启。`Error` 句柄直接回到 `Starting`，其余情况先停再启
    pub async fn restart(&self, project_id: &str) -> Result<ProcessInfo> {
        let _guard = self.processes.lock(project_id).await;
        match self.processes.state_of(project_id) {
            Some(ProcessState::Error) => self.start_locked(project_id, true).await,
            Some(_) => {
                self.stop_locked(project_id).await?;
                self.start_locked(project_id, false).await
            }
            None => self.start_locked(project_id, false).await,
        }
    }

    /// 停止所有进程（退出前调用）
    pub async fn stop_all(&self) -> Vec<ProcessInfo> {
        let mut stopped = Vec::new();
        for project_id in self.processes.project_ids() {
            match self.stop(&project_id).await {
                Ok(info) => stopped.push(info),
                Err(ManagerError::NotRunning { .. }) => {}
                Err(e) => error!(project_id = %project_id, error = %e, "failed to stop process"),
            }
        }
        stopped
    }

    async fn start_locked(&self, project_id: &str, rearm: bool) -> Result<ProcessInfo> {
        let project = self.registry.get(project_id)?;

        if let Some(state) = self.processes.state_of(project_id) {
            if !(rearm && state == ProcessState::Error) {
                return Err(ManagerError::AlreadyRunning {
                    project_id: project_id.to_string(),
                    state,
                });
            }
        }

        // 非本程序管理的进程占用了端口
        if !is_port_available(project.port) {
            return Err(ManagerError::PortInUse {
                project_id: project_id.to_string(),
                port: project.port,
            });
        }

        let (generation, exit_tx) = if rearm {
            self.processes.rearm(project_id, project.port)?
        } else {
            self.processes.reserve(ProcessInfo {
                project_id: project.id.clone(),
                project_name: project.name.clone(),
                state: ProcessState::Starting,
                pid: None,
                port: project.port,
                url: project.url(),
                started_at: Utc::now(),
                exit_code: None,
            })?
        };
        // 新进程不继承上一次运行的 error 窗口
        self.tracker.reset(project_id);

        let mut child = match self.spawn_with_retry(&project).await {
            Ok(child) => child,
            Err(source) => {
                self.abandon(project_id, generation, rearm);
                self.logs.append_system(
                    project_id,
                    LogLevel::Error,
                    &format!("Failed to start {}: {}", project.generator, source),
                );
                self.tracker.notify(project_id);
                return Err(ManagerError::SpawnFailed {
                    project_id: project_id.to_string(),
                    source,
                });
            }
        };

        let pid = child.id();
        self.processes
            .update(project_id, generation, |info| info.pid = pid);
        info!(project_id = %project_id, pid = ?pid, port = project.port, command = %project.start_command(), "dev server spawned");
        self.logs.append_system(
            project_id,
            LogLevel::Info,
            &format!(
                "Starting {} development server on port {}",
                project.generator, project.port
            ),
        );

        let ready = Arc::new(Notify::new());
        if let Some(stdout) = child.stdout.take() {
            self.spawn_log_reader(stdout, project_id, LogStream::Stdout, ready.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            self.spawn_log_reader(stderr, project_id, LogStream::Stderr, ready.clone());
        }

        let mut exit_rx = exit_tx.subscribe();
        self.spawn_monitor(child, project_id, generation, exit_tx);

        tokio::select! {
            _ = ready.notified() => debug!(project_id = %project_id, "first output line received"),
            _ = exit_rx.wait_for(|outcome| outcome.is_some()) => {}
            _ = sleep(self.config.grace_period) => debug!(project_id = %project_id, "grace period elapsed"),
        }

        let exited = *exit_rx.borrow();
        if let Some(outcome) = exited {
            // 监控任务已经切到 Error
            return Err(ManagerError::ExitedDuringStartup {
                project_id: project_id.to_string(),
                code: outcome.code,
            });
        }

        let info = match self
            .processes
            .transition(project_id, Some(generation), ProcessState::Running)
        {
            Ok(info) => info,
            Err(_) => {
                // 与监控任务竞争失败：进程在切换前退出
                let code = self.processes.get(project_id).and_then(|i| i.exit_code);
                return Err(ManagerError::ExitedDuringStartup {
                    project_id: project_id.to_string(),
                    code,
                });
            }
        };
        self.tracker.notify(project_id);

        if let Err(e) = self.registry.touch(project_id) {
            warn!(project_id = %project_id, error = %e, "failed to record last used time");
        }

        info!(project_id = %project_id, url = %info.url, "dev server running");
        Ok(info)
    }

    /// 启动失败时撤销登记：新句柄直接删除，重启的句柄退回 `Error`
    fn abandon(&self, project_id: &str, generation: u64, rearm: bool) {
        if rearm {
            let _ = self
                .processes
                .transition(project_id, Some(generation), ProcessState::Error);
        } else {
            self.processes.remove(project_id, Some(generation));
        }
    }

    async fn stop_locked(&self, project_id: &str) -> Result<ProcessInfo> {
        let generation =
            self.processes
                .generation_of(project_id)
                .ok_or_else(|| ManagerError::NotRunning {
                    project_id: project_id.to_string(),
                })?;

        let info = self
            .processes
            .transition(project_id, Some(generation), ProcessState::Stopping)?;
        self.tracker.notify(project_id);
        self.logs
            .append_system(project_id, LogLevel::Info, "Stopping development server");

        let mut exit_rx = self
            .processes
            .exit_receiver(project_id)
            .ok_or_else(|| ManagerError::NotRunning {
                project_id: project_id.to_string(),
            })?;

        let already_exited = exit_rx.borrow().is_some();
        if let (false, Some(pid)) = (already_exited, info.pid) {
            self.terminate(project_id, pid, &mut exit_rx).await;
        }
        if let Some(pid) = info.pid {
            // 组长已退出，清理忽略了 SIGTERM 或脱离组长的子进程
            let _ = kill_group(pid);
        }

        let mut stopped = self
            .processes
            .transition(project_id, Some(generation), ProcessState::Stopped)?;
        stopped.exit_code = exit_rx.borrow().and_then(|o| o.code).or(stopped.exit_code);
        self.processes.remove(project_id, Some(generation));

        self.logs
            .append_system(project_id, LogLevel::Info, "Server stopped");
        self.tracker.notify(project_id);
        info!(project_id = %project_id, exit_code = ?stopped.exit_code, "dev server stopped");
        Ok(stopped)
    }

    /// 优雅退出，超时升级为强制结束；总耗时不超过 stop_timeout + kill_timeout
    async fn terminate(
        &self,
        project_id: &str,
        pid: u32,
        exit_rx: &mut watch::Receiver<Option<ExitOutcome>>,
    ) {
        if let Err(e) = terminate_group(pid) {
            warn!(project_id = %project_id, pid, error = %e, "failed to send SIGTERM");
        }

        let graceful = timeout(
            self.config.stop_timeout,
            exit_rx.wait_for(|outcome| outcome.is_some()),
        )
        .await
        .is_ok();

        if !graceful {
            let err = ManagerError::GracefulStopTimeout {
                project_id: project_id.to_string(),
                timeout: self.config.stop_timeout,
            };
            warn!(pid, error = %err, "escalating to SIGKILL");
            if let Err(e) = kill_group(pid) {
                warn!(project_id = %project_id, pid, error = %e, "failed to send SIGKILL");
            }
            if timeout(
                self.config.kill_timeout,
                exit_rx.wait_for(|outcome| outcome.is_some()),
            )
            .await
            .is_err()
            {
                error!(project_id = %project_id, pid, "process did not exit after SIGKILL");
            }
        }
    }

    async fn spawn_with_retry(&self, project: &Project) -> io::Result<Child> {
        let mut attempt = 0;
        loop {
            match build_command(project).spawn() {
                Ok(child) => return Ok(child),
                Err(e) if is_transient(&e) && attempt < self.config.spawn_retries => {
                    attempt += 1;
                    warn!(project_id = %project.id, attempt, error = %e, "transient spawn failure, retrying");
                    sleep(Duration::from_millis(100 * u64::from(attempt))).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn spawn_log_reader<R>(&self, reader: R, project_id: &str, stream: LogStream, ready: Arc<Notify>)
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let logs = self.logs.clone();
        let project_id = project_id.to_string();

        tokio::spawn(async move {
            let mut reader = BufReader::new(reader);
            let mut buf = Vec::new();
            let mut first = true;

            loop {
                buf.clear();
                match reader.read_until(b'\n', &mut buf).await {
                    Ok(0) => break,
                    Ok(_) => {
                        let line = String::from_utf8_lossy(&buf);
                        let line = line.trim_end_matches(['\n', '\r']);
                        logs.append(&project_id, line, stream);
                        if first {
                            ready.notify_one();
                            first = false;
                        }
                    }
                    Err(e) => {
                        debug!(project_id = %project_id, error = %e, "log reader failed");
                        break;
                    }
                }
            }
            debug!(project_id = %project_id, ?stream, "log reader task exiting");
        });
    }

    /// 异步等待子进程退出并立即更新状态（崩溃检测）
    fn spawn_monitor(&self, mut child: Child, project_id: &str, generation: u64, exit_tx: ExitSender) {
        let processes = self.processes.clone();
        let logs = self.logs.clone();
        let tracker = self.tracker.clone();
        let project_id = project_id.to_string();

        tokio::spawn(async move {
            let pid = child.id();
            let outcome = ExitOutcome::from_status(child.wait().await);
            processes.update(&project_id, generation, |info| info.exit_code = outcome.code);

            let state = processes.get(&project_id).map(|i| i.state);
            if let (Some(pid), false) = (pid, state == Some(ProcessState::Stopping)) {
                // 组长自行退出时 npx / bundle exec 派生的服务器可能仍占着端口
                let _ = kill_group(pid);
            }

            match state {
                // stop() 负责收尾
                Some(ProcessState::Stopping) => {}
                Some(ProcessState::Starting) => {
                    let _ = processes.transition(&project_id, Some(generation), ProcessState::Error);
                    logs.append_system(
                        &project_id,
                        LogLevel::Error,
                        &format!("Process exited during startup (code: {:?})", outcome.code),
                    );
                    warn!(project_id = %project_id, code = ?outcome.code, "dev server exited during startup");
                }
                Some(ProcessState::Running) if outcome.success => {
                    // stop() 可能已抢先切到 Stopping，此时交给它收尾
                    if processes
                        .transition(&project_id, Some(generation), ProcessState::Stopping)
                        .is_ok()
                    {
                        let _ = processes.transition(&project_id, Some(generation), ProcessState::Stopped);
                        processes.remove(&project_id, Some(generation));
                    }
                    logs.append_system(&project_id, LogLevel::Info, "Server exited");
                    info!(project_id = %project_id, "dev server exited cleanly");
                }
                Some(ProcessState::Running) => {
                    let _ = processes.transition(&project_id, Some(generation), ProcessState::Error);
                    logs.append_system(
                        &project_id,
                        LogLevel::Error,
                        &format!("Process crashed (code: {:?})", outcome.code),
                    );
                    warn!(project_id = %project_id, code = ?outcome.code, "dev server crashed");
                }
                _ => {}
            }

            exit_tx.send_replace(Some(outcome));
            tracker.notify(&project_id);
        });
    }
}

fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock | io::ErrorKind::ResourceBusy
    )
}

/// 通过平台 shell 执行渲染后的命令，工作目录为项目目录
fn build_command(project: &Project) -> Command {
    let command_line = project.start_command();

    #[cfg(target_os = "windows")]
    let mut command = {
        let mut c = Command::new("cmd");
        c.args(["/C", &command_line]);
        const CREATE_NO_WINDOW: u32 = 0x08000000;
        c.creation_flags(CREATE_NO_WINDOW);
        c
    };

    #[cfg(not(target_os = "windows"))]
    let mut command = {
        let mut c = Command::new("sh");
        c.args(["-c", &command_line]);
        c.env("PATH", &*USER_PATH);
        // 独立进程组，停止时对整组发信号
        c.process_group(0);
        c
    };

    command
        .current_dir(&project.path)
        .env("PORT", project.port.to_string())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    command
}
