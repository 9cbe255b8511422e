use crate::commands::perform_quick_action;
use crate::error::Result;
use crate::models::{ProcessInfo, QuickAction};
use crate::state::AppState;
use tracing::{info, warn};

/// 启动项目；配置了 `open_browser_on_start` 时随后打开浏览器
pub async fn start_project(project_id: &str, state: &AppState) -> Result<ProcessInfo> {
    let info = state.supervisor.start(project_id).await?;

    if state.config.open_browser_on_start {
        // 浏览器打不开不影响启动结果
        if let Err(e) = perform_quick_action(project_id, QuickAction::OpenBrowser, state) {
            warn!(project_id = %project_id, error = %e, "failed to open browser after start");
        }
    }
    Ok(info)
}

pub async fn stop_project(project_id: &str, state: &AppState) -> Result<ProcessInfo> {
    state.supervisor.stop(project_id).await
}

pub async fn restart_project(project_id: &str, state: &AppState) -> Result<ProcessInfo> {
    state.supervisor.restart(project_id).await
}

pub async fn stop_all_projects(state: &AppState) -> Vec<ProcessInfo> {
    state.supervisor.stop_all().await
}

pub fn get_running_processes(state: &AppState) -> Vec<ProcessInfo> {
    state.supervisor.list()
}

/// 配置了 `auto_start_last_project` 时启动最近使用的项目
///
/// 未开启或没有使用记录时返回 `None`。
pub async fn resume_last_project(state: &AppState) -> Option<Result<ProcessInfo>> {
    if !state.config.auto_start_last_project {
        return None;
    }
    let project = state.registry.last_used()?;
    info!(project_id = %project.id, name = %project.name, "reopening last used project");
    Some(start_project(&project.id, state).await)
}
