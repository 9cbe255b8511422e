use crate::error::{ManagerError, Result};
use crate::models::{ProcessInfo, ProcessState, Project, QuickAction};
use std::process::Stdio;
use tokio::process::Command;
use tracing::info;

/// 快捷操作解析出的外部命令
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenerCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl OpenerCommand {
    fn new(program: &str, args: &[&str]) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }

    fn target(&self) -> String {
        self.args.last().cloned().unwrap_or_default()
    }
}

/// 根据平台把快捷操作转换为打开命令
///
/// `process` 为项目当前的进程句柄；打开浏览器要求服务器处于运行状态。
/// `browser` 指定浏览器，`None` 使用系统默认。
pub fn resolve_quick_action(
    action: QuickAction,
    project: &Project,
    process: Option<&ProcessInfo>,
    browser: Option<&str>,
) -> Result<OpenerCommand> {
    let folder = project.path.to_string_lossy().to_string();

    match action {
        QuickAction::OpenBrowser => {
            let info = process
                .filter(|p| p.state == ProcessState::Running)
                .ok_or_else(|| ManagerError::NotRunning {
                    project_id: project.id.clone(),
                })?;
            Ok(match browser {
                Some(browser) => open_with(browser, &info.url),
                None => open_target(&info.url),
            })
        }
        QuickAction::OpenFolder => Ok(open_target(&folder)),
        QuickAction::OpenTerminal => terminal_command(&folder),
        QuickAction::OpenEditor => Ok(OpenerCommand::new("code", &[&folder])),
    }
}

/// 执行快捷操作，不等待外部程序退出
///
/// 需要在 tokio 运行时内调用。
pub fn run_quick_action(
    action: QuickAction,
    project: &Project,
    process: Option<&ProcessInfo>,
    browser: Option<&str>,
) -> Result<()> {
    let opener = resolve_quick_action(action, project, process, browser)?;
    let pid = spawn_detached(&opener)?;
    info!(project_id = %project.id, action = ?action, program = %opener.program, pid = ?pid, "quick action launched");
    Ok(())
}

/// 启动外部程序后立即返回；句柄丢弃后由 tokio 运行时回收子进程
pub fn spawn_detached(opener: &OpenerCommand) -> Result<Option<u32>> {
    let mut command = Command::new(&opener.program);
    command
        .args(&opener.args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());

    #[cfg(target_os = "windows")]
    {
        const CREATE_NO_WINDOW: u32 = 0x08000000;
        command.creation_flags(CREATE_NO_WINDOW);
    }

    let child = command.spawn().map_err(|source| ManagerError::OpenFailed {
        target: opener.target(),
        source,
    })?;
    Ok(child.id())
}

fn open_target(target: &str) -> OpenerCommand {
    if cfg!(target_os = "macos") {
        OpenerCommand::new("open", &[target])
    } else if cfg!(target_os = "windows") {
        OpenerCommand::new("cmd", &["/C", "start", "", target])
    } else {
        OpenerCommand::new("xdg-open", &[target])
    }
}

/// 使用指定浏览器打开链接
fn open_with(browser: &str, target: &str) -> OpenerCommand {
    if cfg!(target_os = "macos") {
        OpenerCommand::new("open", &["-a", browser, target])
    } else if cfg!(target_os = "windows") {
        OpenerCommand::new("cmd", &["/C", "start", "", browser, target])
    } else {
        OpenerCommand::new(browser, &[target])
    }
}

fn terminal_command(folder: &str) -> Result<OpenerCommand> {
    if cfg!(target_os = "macos") {
        Ok(OpenerCommand::new("open", &["-a", "Terminal", folder]))
    } else if cfg!(target_os = "windows") {
        Ok(OpenerCommand::new(
            "cmd",
            &["/C", "start", "", "cmd", "/K", "cd", "/d", folder],
        ))
    } else if cfg!(target_os = "linux") {
        Ok(OpenerCommand::new(
            "x-terminal-emulator",
            &["--working-directory", folder],
        ))
    } else {
        Err(ManagerError::Unsupported(
            "当前平台不支持打开终端".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Generator, NewProject};
    use chrono::Utc;
    use std::path::PathBuf;

    fn project() -> Project {
        Project::new(NewProject {
            name: "Docs".to_string(),
            path: PathBuf::from("/tmp/docs"),
            generator: Generator::Hugo,
            port: None,
            notes: String::new(),
            command: None,
        })
    }

    fn running(project: &Project) -> ProcessInfo {
        ProcessInfo {
            project_id: project.id.clone(),
            project_name: project.name.clone(),
            state: ProcessState::Running,
            pid: Some(42),
            port: project.port,
            url: project.url(),
            started_at: Utc::now(),
            exit_code: None,
        }
    }

    #[test]
    fn test_browser_requires_running_server() {
        let project = project();
        let err = resolve_quick_action(QuickAction::OpenBrowser, &project, None, None).unwrap_err();
        assert!(matches!(err, ManagerError::NotRunning { .. }));

        let mut info = running(&project);
        info.state = ProcessState::Error;
        assert!(resolve_quick_action(QuickAction::OpenBrowser, &project, Some(&info), None).is_err());

        let info = running(&project);
        let opener = resolve_quick_action(QuickAction::OpenBrowser, &project, Some(&info), None).unwrap();
        assert_eq!(opener.target(), "http://localhost:1313");
    }

    #[test]
    fn test_folder_and_editor_target_project_path() {
        let project = project();
        let folder = resolve_quick_action(QuickAction::OpenFolder, &project, None, Some("Firefox")).unwrap();
        assert_eq!(folder.target(), "/tmp/docs");

        let editor = resolve_quick_action(QuickAction::OpenEditor, &project, None, None).unwrap();
        assert_eq!(editor.program, "code");
        assert_eq!(editor.args, vec!["/tmp/docs".to_string()]);
    }

    #[test]
    fn test_browser_preference() {
        let project = project();
        let info = running(&project);
        let opener =
            resolve_quick_action(QuickAction::OpenBrowser, &project, Some(&info), Some("Firefox"))
                .unwrap();
        assert_eq!(opener.target(), "http://localhost:1313");
        assert!(opener.program == "Firefox" || opener.args.iter().any(|a| a == "Firefox"));
    }

    #[tokio::test]
    async fn test_missing_opener_is_open_failed() {
        let opener = OpenerCommand::new("definitely-not-a-real-opener-xyz", &["/tmp"]);
        let err = spawn_detached(&opener).unwrap_err();
        assert!(matches!(err, ManagerError::OpenFailed { ref target, .. } if target == "/tmp"));
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_detached_opener_is_reaped() {
        let opener = OpenerCommand::new("sh", &["-c", "exit 0"]);
        let pid = spawn_detached(&opener).unwrap().unwrap();

        // 退出后不应留下僵尸进程
        let proc_path = format!("/proc/{}/stat", pid);
        let mut reaped = false;
        for _ in 0..100 {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            if std::fs::read_to_string(&proc_path).is_err() {
                reaped = true;
                break;
            }
        }
        assert!(reaped);
    }
}
