use crate::error::Result;
use crate::models::{NewProject, Project, ProjectUpdate};
use crate::services::{DetectedSite, ProjectScanner};
use crate::state::AppState;
use std::path::PathBuf;
use tracing::info;

pub fn list_projects(state: &AppState) -> Vec<Project> {
    state.registry.list()
}

pub fn get_project(project_id: &str, state: &AppState) -> Result<Project> {
    state.registry.get(project_id)
}

pub fn add_project(project: NewProject, state: &AppState) -> Result<Project> {
    state.registry.add(project)
}

pub fn update_project(project_id: &str, update: ProjectUpdate, state: &AppState) -> Result<Project> {
    state.registry.update(project_id, update)
}

/// 删除项目，同时释放它的日志缓冲区和状态订阅
pub async fn remove_project(project_id: &str, state: &AppState) -> Result<Project> {
    let removed = state.registry.remove(project_id).await?;
    state.logs.drop_project(project_id);
    state.tracker.forget(project_id);
    Ok(removed)
}

/// 扫描目录，返回尚未登记的站点
pub fn scan_directory(root: PathBuf, max_depth: usize, state: &AppState) -> Vec<DetectedSite> {
    let sites: Vec<DetectedSite> = ProjectScanner::scan_directory(&root, max_depth)
        .into_iter()
        .filter(|site| state.registry.find_by_path(&site.path).is_none())
        .collect();
    info!(root = %root.display(), found = sites.len(), "directory scanned");
    sites
}
