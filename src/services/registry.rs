use crate::error::{ManagerError, Result};
use crate::models::{normalize_path, NewProject, Project, ProjectUpdate};
use crate::services::{ProcessTable, ProjectStore};
use chrono::Utc;
use std::path::Path;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{info, warn};

/// 已注册项目的集合，按插入顺序保存，每次变更后持久化
pub struct ProjectRegistry {
    projects: RwLock<Vec<Project>>,
    store: Box<dyn ProjectStore>,
    processes: Arc<ProcessTable>,
}

impl ProjectRegistry {
    /// 从存储中加载已有项目
    pub fn load(store: Box<dyn ProjectStore>, processes: Arc<ProcessTable>) -> Result<Self> {
        let projects = store.load()?;
        info!(count = projects.len(), "project registry loaded");
        Ok(Self {
            projects: RwLock::new(projects),
            store,
            processes,
        })
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<Project>> {
        self.projects.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Project>> {
        self.projects.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn list(&self) -> Vec<Project> {
        self.read().clone()
    }

    pub fn get(&self, project_id: &str) -> Result<Project> {
        self.read()
            .iter()
            .find(|p| p.id == project_id)
            .cloned()
            .ok_or_else(|| ManagerError::not_found(project_id))
    }

    pub fn find_by_path(&self, path: &Path) -> Option<Project> {
        let path = normalize_path(path);
        self.read().iter().find(|p| p.path == path).cloned()
    }

    pub fn add(&self, new: NewProject) -> Result<Project> {
        let project = Project::new(new);
        let mut projects = self.write();

        if projects.iter().any(|p| p.path == project.path) {
            return Err(ManagerError::DuplicatePath { path: project.path });
        }

        projects.push(project.clone());
        if let Err(e) = self.store.save(&projects) {
            projects.pop();
            return Err(e.into());
        }

        info!(project_id = %project.id, name = %project.name, generator = %project.generator, port = project.port, "project registered");
        Ok(project)
    }

    pub fn update(&self, project_id: &str, update: ProjectUpdate) -> Result<Project> {
        let mut projects = self.write();
        let index = projects
            .iter()
            .position(|p| p.id == project_id)
            .ok_or_else(|| ManagerError::not_found(project_id))?;

        let mut updated = projects[index].clone();
        updated.apply(update);

        let collides = projects
            .iter()
            .any(|p| p.id != project_id && p.path == updated.path);
        if collides {
            return Err(ManagerError::DuplicatePath { path: updated.path });
        }

        let previous = std::mem::replace(&mut projects[index], updated.clone());
        if let Err(e) = self.store.save(&projects) {
            projects[index] = previous;
            return Err(e.into());
        }

        if self.processes.contains(project_id) {
            // 运行中的进程继续使用旧配置，重启后生效
            warn!(project_id = %project_id, "project updated while its process is active");
        }
        Ok(updated)
    }

    /// 删除项目；进程句柄存在时拒绝
    pub async fn remove(&self, project_id: &str) -> Result<Project> {
        let _guard = self.processes.lock(project_id).await;

        if let Some(state) = self.processes.state_of(project_id) {
            return Err(ManagerError::ProcessStillRunning {
                project_id: project_id.to_string(),
                state,
            });
        }

        let removed = {
            let mut projects = self.write();
            let index = projects
                .iter()
                .position(|p| p.id == project_id)
                .ok_or_else(|| ManagerError::not_found(project_id))?;

            let removed = projects.remove(index);
            if let Err(e) = self.store.save(&projects) {
                projects.insert(index, removed);
                return Err(e.into());
            }
            removed
        };

        self.processes.forget(project_id);
        info!(project_id = %project_id, name = %removed.name, "project removed");
        Ok(removed)
    }

    /// 记录最近一次启动时间
    pub fn touch(&self, project_id: &str) -> Result<()> {
        let mut projects = self.write();
        let project = projects
            .iter_mut()
            .find(|p| p.id == project_id)
            .ok_or_else(|| ManagerError::not_found(project_id))?;
        let previous = project.last_used.replace(Utc::now());

        if let Err(e) = self.store.save(&projects) {
            if let Some(project) = projects.iter_mut().find(|p| p.id == project_id) {
                project.last_used = previous;
            }
            return Err(e.into());
        }
        Ok(())
    }

    /// 最近一次启动过的项目
    pub fn last_used(&self) -> Option<Project> {
        self.read()
            .iter()
            .filter(|p| p.last_used.is_some())
            .max_by_key(|p| p.last_used)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::models::{Generator, ProcessInfo, ProcessState};
    use crate::services::MemoryStore;
    use std::path::PathBuf;

    fn registry() -> ProjectRegistry {
        ProjectRegistry::load(Box::new(MemoryStore::new()), Arc::new(ProcessTable::new()))
            .unwrap()
    }

    fn site(name: &str, path: &str, generator: Generator) -> NewProject {
        NewProject {
            name: name.to_string(),
            path: PathBuf::from(path),
            generator,
            port: None,
            notes: String::new(),
            command: None,
        }
    }

    #[derive(Default)]
    struct FailingStore {
        seed: Vec<Project>,
    }

    impl ProjectStore for FailingStore {
        fn load(&self) -> Result<Vec<Project>, StoreError> {
            Ok(self.seed.clone())
        }

        fn save(&self, _projects: &[Project]) -> Result<(), StoreError> {
            Err(StoreError::NoHomeDir)
        }
    }

    #[test]
    fn test_add_and_list_in_insertion_order() {
        let registry = registry();
        registry
            .add(site("hania-website", "~/Sites/hania", Generator::Hugo))
            .unwrap();
        registry.add(site("docs", "~/Sites/docs", Generator::Jekyll)).unwrap();
        registry
            .add(site("astro-blog", "~/Sites/blog", Generator::Astro))
            .unwrap();

        let names: Vec<String> = registry.list().into_iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["hania-website", "docs", "astro-blog"]);
        assert_eq!(registry.list()[2].port, 4321);
    }

    #[test]
    fn test_add_duplicate_path_fails() {
        let registry = registry();
        registry.add(site("a", "/sites/a", Generator::Hugo)).unwrap();
        let err = registry
            .add(site("b", "/sites/./a/", Generator::Astro))
            .unwrap_err();
        assert!(matches!(err, ManagerError::DuplicatePath { .. }));
        assert_eq!(registry.list().len(), 1);
    }

    #[test]
    fn test_update_unknown_and_colliding() {
        let registry = registry();
        let a = registry.add(site("a", "/sites/a", Generator::Hugo)).unwrap();
        registry.add(site("b", "/sites/b", Generator::Hugo)).unwrap();

        let err = registry
            .update("missing", ProjectUpdate::default())
            .unwrap_err();
        assert!(matches!(err, ManagerError::NotFound { .. }));

        let err = registry
            .update(
                &a.id,
                ProjectUpdate {
                    path: Some(PathBuf::from("/sites/b")),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, ManagerError::DuplicatePath { .. }));

        let updated = registry
            .update(
                &a.id,
                ProjectUpdate {
                    port: Some(1400),
                    notes: Some("Primary marketing site.".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(updated.port, 1400);
        assert_eq!(registry.get(&a.id).unwrap().notes, "Primary marketing site.");
    }

    #[test]
    fn test_failed_save_rolls_back() {
        let registry =
            ProjectRegistry::load(Box::new(FailingStore::default()), Arc::new(ProcessTable::new()))
                .unwrap();
        let err = registry.add(site("a", "/sites/a", Generator::Hugo)).unwrap_err();
        assert!(matches!(err, ManagerError::Store(_)));
        assert!(registry.list().is_empty());
    }

    #[test]
    fn test_failed_touch_keeps_previous_last_used() {
        let project = Project::new(site("a", "/sites/a", Generator::Hugo));
        let store = FailingStore {
            seed: vec![project.clone()],
        };
        let registry = ProjectRegistry::load(Box::new(store), Arc::new(ProcessTable::new())).unwrap();

        let err = registry.touch(&project.id).unwrap_err();
        assert!(matches!(err, ManagerError::Store(_)));
        assert_eq!(registry.get(&project.id).unwrap().last_used, None);
        assert!(registry.last_used().is_none());
    }

    #[test]
    fn test_last_used_picks_most_recent() {
        let registry = registry();
        let a = registry.add(site("a", "/sites/a", Generator::Hugo)).unwrap();
        let b = registry.add(site("b", "/sites/b", Generator::Astro)).unwrap();
        assert!(registry.last_used().is_none());

        registry.touch(&b.id).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        registry.touch(&a.id).unwrap();
        assert_eq!(registry.last_used().map(|p| p.id), Some(a.id));
    }

    #[tokio::test]
    async fn test_remove_refuses_while_handle_exists() {
        let processes = Arc::new(ProcessTable::new());
        let registry =
            ProjectRegistry::load(Box::new(MemoryStore::new()), processes.clone()).unwrap();
        let project = registry.add(site("a", "/sites/a", Generator::Hugo)).unwrap();

        let (generation, _tx) = processes
            .reserve(ProcessInfo {
                project_id: project.id.clone(),
                project_name: project.name.clone(),
                state: ProcessState::Starting,
                pid: None,
                port: project.port,
                url: project.url(),
                started_at: Utc::now(),
                exit_code: None,
            })
            .unwrap();

        let err = registry.remove(&project.id).await.unwrap_err();
        assert!(matches!(err, ManagerError::ProcessStillRunning { .. }));

        processes.remove(&project.id, Some(generation));
        registry.remove(&project.id).await.unwrap();
        assert!(registry.list().is_empty());

        let err = registry.remove(&project.id).await.unwrap_err();
        assert!(matches!(err, ManagerError::NotFound { .. }));
    }

    #[test]
    fn test_persists_on_every_mutation() {
        let dir = tempfile::tempdir().unwrap();
        let store = crate::services::JsonFileStore::in_dir(dir.path());
        let registry =
            ProjectRegistry::load(Box::new(store), Arc::new(ProcessTable::new())).unwrap();
        let project = registry.add(site("docs", "/sites/docs", Generator::Jekyll)).unwrap();
        registry.touch(&project.id).unwrap();

        let reloaded = ProjectRegistry::load(
            Box::new(crate::services::JsonFileStore::in_dir(dir.path())),
            Arc::new(ProcessTable::new()),
        )
        .unwrap();
        let loaded = reloaded.get(&project.id).unwrap();
        assert_eq!(loaded.name, "docs");
        assert!(loaded.last_used.is_some());
    }
}
