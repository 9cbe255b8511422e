use crate::error::StoreError;
use crate::models::Project;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

/// 项目定义的持久化接口，注册表在每次变更后调用 `save`
pub trait ProjectStore: Send + Sync {
    fn load(&self) -> Result<Vec<Project>, StoreError>;
    fn save(&self, projects: &[Project]) -> Result<(), StoreError>;
}

/// 以 JSON 数组形式保存在 `<data_dir>/projects.json`
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn in_dir(data_dir: &Path) -> Self {
        Self::new(data_dir.join("projects.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ProjectStore for JsonFileStore {
    fn load(&self) -> Result<Vec<Project>, StoreError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let content = fs::read_to_string(&self.path).map_err(|source| StoreError::Io {
            path: self.path.clone(),
            source,
        })?;

        let projects: Vec<Project> =
            serde_json::from_str(&content).map_err(|source| StoreError::Json {
                path: self.path.clone(),
                source,
            })?;
        debug!(path = %self.path.display(), count = projects.len(), "loaded projects");
        Ok(projects)
    }

    fn save(&self, projects: &[Project]) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let json = serde_json::to_string_pretty(projects).map_err(|source| StoreError::Json {
            path: self.path.clone(),
            source,
        })?;

        // 先写临时文件再重命名，避免写到一半的文件
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(|source| StoreError::Io {
            path: tmp.clone(),
            source,
        })?;
        fs::rename(&tmp, &self.path).map_err(|source| StoreError::Io {
            path: self.path.clone(),
            source,
        })?;

        Ok(())
    }
}

/// 内存存储，测试和临时会话使用
#[derive(Default)]
pub struct MemoryStore {
    projects: Mutex<Vec<Project>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProjectStore for MemoryStore {
    fn load(&self) -> Result<Vec<Project>, StoreError> {
        Ok(self
            .projects
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone())
    }

    fn save(&self, projects: &[Project]) -> Result<(), StoreError> {
        *self.projects.lock().unwrap_or_else(|e| e.into_inner()) = projects.to_vec();
        Ok(())
    }
}
