use crate::config::{self, ManagerConfig};
use crate::error::Result;
use crate::services::{
    JsonFileStore, LogAggregator, MemoryStore, ProcessSupervisor, ProcessTable, ProjectRegistry,
    ProjectStore, StatusTracker, SupervisorConfig,
};
use std::sync::Arc;
use tracing::info;

/// 组装好的管理器；命令层只通过它访问各个服务
pub struct AppState {
    pub config: ManagerConfig,
    pub processes: Arc<ProcessTable>,
    pub registry: Arc<ProjectRegistry>,
    pub logs: Arc<LogAggregator>,
    pub tracker: Arc<StatusTracker>,
    pub supervisor: Arc<ProcessSupervisor>,
}

impl AppState {
    pub fn new(config: ManagerConfig, store: Box<dyn ProjectStore>) -> Result<Self> {
        let processes = Arc::new(ProcessTable::new());
        let tracker = StatusTracker::from_config(processes.clone(), &config);
        let logs = Arc::new(LogAggregator::from_config(&config)?);
        logs.add_observer(tracker.clone());

        let registry = Arc::new(ProjectRegistry::load(store, processes.clone())?);
        let supervisor = Arc::new(ProcessSupervisor::new(
            processes.clone(),
            registry.clone(),
            logs.clone(),
            tracker.clone(),
            SupervisorConfig::from(&config),
        ));

        Ok(Self {
            config,
            processes,
            registry,
            logs,
            tracker,
            supervisor,
        })
    }

    /// 使用数据目录下的 `config.json` 和 `projects.json`
    pub fn open_default() -> Result<Self> {
        let dir = config::data_dir()?;
        let config = ManagerConfig::load(&dir)?;
        let store = JsonFileStore::in_dir(&dir);
        info!(data_dir = %dir.display(), "opening project store");
        Self::new(config, Box::new(store))
    }

    /// 不落盘，测试和临时会话使用
    pub fn in_memory(config: ManagerConfig) -> Result<Self> {
        Self::new(config, Box::new(MemoryStore::new()))
    }
}
