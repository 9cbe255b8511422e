use crate::error::{ManagerError, Result};
use crate::models::{ExitOutcome, ProcessInfo, ProcessState};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{watch, OwnedMutexGuard};

/// 进程表中的一条记录，每个项目最多一条
#[derive(Debug)]
pub struct ProcessEntry {
    pub info: ProcessInfo,
    /// 区分同一项目的不同进程实例，避免旧监控任务改写新进程的状态
    pub generation: u64,
    exit_rx: watch::Receiver<Option<ExitOutcome>>,
}

/// 供监控任务上报退出结果
pub type ExitSender = watch::Sender<Option<ExitOutcome>>;

/// Supervisor 拥有的进程句柄表。
///
/// 只有 supervisor 会写入；注册表和状态追踪器只读。表内使用 `std::sync::Mutex`，
/// 临界区很短且从不跨越 `.await`。项目级别的串行化由 [`ProcessTable::lock`] 提供。
#[derive(Default)]
pub struct ProcessTable {
    entries: Mutex<HashMap<String, ProcessEntry>>,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    next_generation: AtomicU64,
}

impl ProcessTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, ProcessEntry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 获取项目级互斥锁；同一项目的 start/stop/restart/remove 依次执行
    pub async fn lock(&self, project_id: &str) -> OwnedMutexGuard<()> {
        let mutex = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            locks
                .entry(project_id.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        mutex.lock_owned().await
    }

    /// 项目被删除后释放其互斥锁
    pub fn forget(&self, project_id: &str) {
        self.locks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(project_id);
    }

    pub fn get(&self, project_id: &str) -> Option<ProcessInfo> {
        self.entries().get(project_id).map(|e| e.info.clone())
    }

    pub fn state_of(&self, project_id: &str) -> Option<ProcessState> {
        self.entries().get(project_id).map(|e| e.info.state)
    }

    pub fn contains(&self, project_id: &str) -> bool {
        self.entries().contains_key(project_id)
    }

    pub fn generation_of(&self, project_id: &str) -> Option<u64> {
        self.entries().get(project_id).map(|e| e.generation)
    }

    pub fn list(&self) -> Vec<ProcessInfo> {
        self.entries().values().map(|e| e.info.clone()).collect()
    }

    pub fn project_ids(&self) -> Vec<String> {
        self.entries().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 原子地检查端口并登记一个 `Starting` 句柄。
    ///
    /// 返回新实例的 generation 和退出通知的发送端。
    pub fn reserve(&self, info: ProcessInfo) -> Result<(u64, ExitSender)> {
        let mut entries = self.entries();

        if let Some(existing) = entries.get(&info.project_id) {
            return Err(ManagerError::AlreadyRunning {
                project_id: info.project_id.clone(),
                state: existing.info.state,
            });
        }

        let port_taken = entries
            .values()
            .any(|e| e.info.port == info.port && e.info.state.is_live());
        if port_taken {
            return Err(ManagerError::PortInUse {
                project_id: info.project_id.clone(),
                port: info.port,
            });
        }

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let (exit_tx, exit_rx) = watch::channel(None);
        entries.insert(
            info.project_id.clone(),
            ProcessEntry {
                info,
                generation,
                exit_rx,
            },
        );
        Ok((generation, exit_tx))
    }

    /// 复用 `Error` 句柄重新启动 (`Error -> Starting`)
    pub fn rearm(&self, project_id: &str, port: u16) -> Result<(u64, ExitSender)> {
        let mut entries = self.entries();

        let port_taken = entries
            .iter()
            .any(|(id, e)| id != project_id && e.info.port == port && e.info.state.is_live());
        if port_taken {
            return Err(ManagerError::PortInUse {
                project_id: project_id.to_string(),
                port,
            });
        }

        let entry = entries
            .get_mut(project_id)
            .ok_or_else(|| ManagerError::NotRunning {
                project_id: project_id.to_string(),
            })?;
        check_transition(project_id, entry.info.state, ProcessState::Starting)?;

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let (exit_tx, exit_rx) = watch::channel(None);
        entry.generation = generation;
        entry.exit_rx = exit_rx;
        entry.info.state = ProcessState::Starting;
        entry.info.pid = None;
        entry.info.port = port;
        entry.info.url = crate::models::local_url(port);
        entry.info.exit_code = None;
        entry.info.started_at = chrono::Utc::now();
        Ok((generation, exit_tx))
    }

    /// 按状态图切换；`generation` 为 `Some` 时只作用于该实例
    pub fn transition(
        &self,
        project_id: &str,
        generation: Option<u64>,
        to: ProcessState,
    ) -> Result<ProcessInfo> {
        let mut entries = self.entries();
        let entry = entries
            .get_mut(project_id)
            .filter(|e| generation.map_or(true, |g| g == e.generation))
            .ok_or_else(|| ManagerError::NotRunning {
                project_id: project_id.to_string(),
            })?;

        check_transition(project_id, entry.info.state, to)?;
        entry.info.state = to;
        Ok(entry.info.clone())
    }

    pub fn update<F>(&self, project_id: &str, generation: u64, f: F) -> Option<ProcessInfo>
    where
        F: FnOnce(&mut ProcessInfo),
    {
        let mut entries = self.entries();
        let entry = entries
            .get_mut(project_id)
            .filter(|e| e.generation == generation)?;
        f(&mut entry.info);
        Some(entry.info.clone())
    }

    /// 删除句柄；`generation` 为 `Some` 时只删除该实例
    pub fn remove(&self, project_id: &str, generation: Option<u64>) -> Option<ProcessInfo> {
        let mut entries = self.entries();
        let matches = entries
            .get(project_id)
            .is_some_and(|e| generation.map_or(true, |g| g == e.generation));
        if matches {
            entries.remove(project_id).map(|e| e.info)
        } else {
            None
        }
    }

    pub fn exit_receiver(&self, project_id: &str) -> Option<watch::Receiver<Option<ExitOutcome>>> {
        self.entries().get(project_id).map(|e| e.exit_rx.clone())
    }
}

fn check_transition(project_id: &str, from: ProcessState, to: ProcessState) -> Result<()> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(ManagerError::InvalidTransition {
            project_id: project_id.to_string(),
            from,
            to,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn info(project_id: &str, port: u16) -> ProcessInfo {
        ProcessInfo {
            project_id: project_id.to_string(),
            project_name: project_id.to_string(),
            state: ProcessState::Starting,
            pid: None,
            port,
            url: crate::models::local_url(port),
            started_at: Utc::now(),
            exit_code: None,
        }
    }

    #[test]
    fn test_reserve_rejects_second_handle() {
        let table = ProcessTable::new();
        table.reserve(info("a", 4000)).unwrap();
        let err = table.reserve(info("a", 4001)).unwrap_err();
        assert!(matches!(err, ManagerError::AlreadyRunning { .. }));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_reserve_rejects_managed_port_clash() {
        let table = ProcessTable::new();
        table.reserve(info("a", 4000)).unwrap();
        let err = table.reserve(info("b", 4000)).unwrap_err();
        assert!(matches!(err, ManagerError::PortInUse { port: 4000, .. }));
    }

    #[test]
    fn test_transition_follows_graph() {
        let table = ProcessTable::new();
        let (generation, _tx) = table.reserve(info("a", 4000)).unwrap();

        let err = table
            .transition("a", Some(generation), ProcessState::Stopped)
            .unwrap_err();
        assert!(matches!(err, ManagerError::InvalidTransition { .. }));

        table
            .transition("a", Some(generation), ProcessState::Running)
            .unwrap();
        assert_eq!(table.state_of("a"), Some(ProcessState::Running));
    }

    #[test]
    fn test_stale_generation_is_ignored() {
        let table = ProcessTable::new();
        let (generation, _tx) = table.reserve(info("a", 4000)).unwrap();
        assert!(table.remove("a", Some(generation + 1)).is_none());
        assert!(table
            .transition("a", Some(generation + 1), ProcessState::Running)
            .is_err());
        assert!(table.remove("a", Some(generation)).is_some());
        assert!(table.is_empty());
    }

    #[test]
    fn test_rearm_from_error_only() {
        let table = ProcessTable::new();
        let (generation, _tx) = table.reserve(info("a", 4000)).unwrap();
        assert!(table.rearm("a", 4000).is_err());

        table
            .transition("a", Some(generation), ProcessState::Error)
            .unwrap();
        let (next, _tx) = table.rearm("a", 4000).unwrap();
        assert_ne!(next, generation);
        assert_eq!(table.state_of("a"), Some(ProcessState::Starting));
    }

    #[tokio::test]
    async fn test_project_lock_serializes() {
        let table = Arc::new(ProcessTable::new());
        let guard = table.lock("a").await;

        let waiter = {
            let table = table.clone();
            tokio::spawn(async move {
                let _g = table.lock("a").await;
            })
        };
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        // 其他项目不受影响
        let _other = table.lock("b").await;

        drop(guard);
        waiter.await.unwrap();
    }
}
