use crate::config::ManagerConfig;
use crate::models::{LogEntry, LogLevel, ProcessState, ServerStatus, StatusSnapshot};
use crate::services::{LogObserver, ProcessTable};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::watch;
use tracing::debug;

/// 由进程状态和窗口内 error 条数推导对外状态
pub fn derive_status(
    state: Option<ProcessState>,
    recent_errors: usize,
    threshold: usize,
) -> ServerStatus {
    match state {
        None | Some(ProcessState::Stopped) => ServerStatus::Stopped,
        Some(ProcessState::Error) => ServerStatus::Error,
        Some(ProcessState::Running) if threshold > 0 && recent_errors >= threshold => {
            ServerStatus::Error
        }
        Some(_) => ServerStatus::Running,
    }
}

/// 状态追踪器。
///
/// 除了每个项目的 error 滚动窗口外不持有任何状态；进程状态直接从
/// [`ProcessTable`] 读取。每次进程状态变化或新日志到达时重新计算并推送给订阅者。
pub struct StatusTracker {
    processes: Arc<ProcessTable>,
    threshold: usize,
    window: chrono::Duration,
    error_windows: Mutex<HashMap<String, VecDeque<DateTime<Utc>>>>,
    channels: Mutex<HashMap<String, watch::Sender<StatusSnapshot>>>,
    pending_rechecks: Mutex<HashSet<String>>,
    me: Weak<StatusTracker>,
}

impl StatusTracker {
    pub fn new(processes: Arc<ProcessTable>, threshold: usize, window: std::time::Duration) -> Arc<Self> {
        let window = chrono::Duration::from_std(window).unwrap_or_else(|_| chrono::Duration::seconds(10));
        Arc::new_cyclic(|me| Self {
            processes,
            threshold,
            window,
            error_windows: Mutex::new(HashMap::new()),
            channels: Mutex::new(HashMap::new()),
            pending_rechecks: Mutex::new(HashSet::new()),
            me: me.clone(),
        })
    }

    pub fn from_config(processes: Arc<ProcessTable>, config: &ManagerConfig) -> Arc<Self> {
        Self::new(processes, config.error_threshold, config.error_window())
    }

    pub fn current_status(&self, project_id: &str) -> ServerStatus {
        self.snapshot(project_id).status
    }

    pub fn snapshot(&self, project_id: &str) -> StatusSnapshot {
        let recent_errors = self.recent_errors(project_id, Utc::now());
        let info = self.processes.get(project_id);
        let state = info.as_ref().map(|i| i.state);

        StatusSnapshot {
            project_id: project_id.to_string(),
            status: derive_status(state, recent_errors, self.threshold),
            process_state: state,
            pid: info.as_ref().and_then(|i| i.pid),
            port: info.as_ref().map(|i| i.port),
            url: info.map(|i| i.url),
            recent_errors,
            computed_at: Utc::now(),
        }
    }

    /// 窗口内的 error 条数，顺便清理过期时间戳
    pub fn recent_errors(&self, project_id: &str, now: DateTime<Utc>) -> usize {
        let mut windows = self.error_windows.lock().unwrap_or_else(|e| e.into_inner());
        match windows.get_mut(project_id) {
            Some(window) => {
                prune(window, now - self.window);
                window.len()
            }
            None => 0,
        }
    }

    /// 重新计算并推送；与上次相同的快照不会重复推送
    pub fn notify(&self, project_id: &str) {
        let snapshot = self.snapshot(project_id);
        let channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(tx) = channels.get(project_id) {
            let changed = tx.send_if_modified(|current| {
                if current.same_state(&snapshot) {
                    false
                } else {
                    *current = snapshot.clone();
                    true
                }
            });
            if changed {
                debug!(project_id = %project_id, status = %snapshot.status, "status changed");
            }
        }
    }

    pub fn subscribe(&self, project_id: &str) -> StatusSubscription {
        let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        let rx = channels
            .entry(project_id.to_string())
            .or_insert_with(|| watch::channel(self.snapshot(project_id)).0)
            .subscribe();
        StatusSubscription { rx }
    }

    /// 丢弃 error 窗口（清空日志时调用）
    pub fn reset(&self, project_id: &str) {
        self.error_windows
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(project_id);
        self.notify(project_id);
    }

    /// 项目删除后释放所有相关状态，订阅者随之结束
    pub fn forget(&self, project_id: &str) {
        self.error_windows
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(project_id);
        self.channels
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(project_id);
    }

    fn record_error(&self, project_id: &str, at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut windows = self.error_windows.lock().unwrap_or_else(|e| e.into_inner());
        let window = windows.entry(project_id.to_string()).or_default();
        window.push_back(at);
        prune(window, Utc::now() - self.window);
        self.expiry_of(window)
    }

    /// 窗口仍达到阈值时，最早一条过期的时刻（状态可能在此时回落）
    fn expiry_of(&self, window: &VecDeque<DateTime<Utc>>) -> Option<DateTime<Utc>> {
        if self.threshold > 0 && window.len() >= self.threshold {
            window.front().map(|oldest| *oldest + self.window)
        } else {
            None
        }
    }

    fn pending_expiry(&self, project_id: &str) -> Option<DateTime<Utc>> {
        let mut windows = self.error_windows.lock().unwrap_or_else(|e| e.into_inner());
        let window = windows.get_mut(project_id)?;
        prune(window, Utc::now() - self.window);
        self.expiry_of(window)
    }

    /// 窗口到期后再计算一次，否则没有新信号时状态会停留在 error
    fn schedule_recheck(&self, project_id: &str, at: DateTime<Utc>) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let Some(me) = self.me.upgrade() else {
            return;
        };
        {
            let mut pending = self.pending_rechecks.lock().unwrap_or_else(|e| e.into_inner());
            if !pending.insert(project_id.to_string()) {
                return;
            }
        }

        let delay = (at - Utc::now())
            .to_std()
            .unwrap_or_default()
            + std::time::Duration::from_millis(10);
        let project_id = project_id.to_string();
        handle.spawn(async move {
            tokio::time::sleep(delay).await;
            me.pending_rechecks
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&project_id);
            me.notify(&project_id);
            // 期间又有新的 error，继续等到下一次过期
            if let Some(next) = me.pending_expiry(&project_id) {
                me.schedule_recheck(&project_id, next);
            }
        });
    }
}

impl LogObserver for StatusTracker {
    fn on_entry(&self, entry: &LogEntry) {
        if entry.level == LogLevel::Error {
            if let Some(expires) = self.record_error(&entry.project_id, entry.timestamp) {
                self.schedule_recheck(&entry.project_id, expires);
            }
        }
        self.notify(&entry.project_id);
    }

    fn on_clear(&self, project_id: &str) {
        self.reset(project_id);
    }
}

fn prune(window: &mut VecDeque<DateTime<Utc>>, cutoff: DateTime<Utc>) {
    while window.front().is_some_and(|t| *t < cutoff) {
        window.pop_front();
    }
}

/// 某个项目的状态订阅
pub struct StatusSubscription {
    rx: watch::Receiver<StatusSnapshot>,
}

impl StatusSubscription {
    pub fn current(&self) -> StatusSnapshot {
        self.rx.borrow().clone()
    }

    /// 等待下一次变化；项目被删除后返回 `None`
    pub async fn next(&mut self) -> Option<StatusSnapshot> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{LogStream, ProcessInfo};
    use crate::services::{LogAggregator, LogClassifier};
    use std::time::Duration;

    fn running_info(project_id: &str) -> ProcessInfo {
        ProcessInfo {
            project_id: project_id.to_string(),
            project_name: project_id.to_string(),
            state: ProcessState::Starting,
            pid: Some(4242),
            port: 1313,
            url: "http://localhost:1313".to_string(),
            started_at: Utc::now(),
            exit_code: None,
        }
    }

    fn setup() -> (Arc<ProcessTable>, Arc<StatusTracker>, Arc<LogAggregator>) {
        let table = Arc::new(ProcessTable::new());
        let tracker = StatusTracker::new(table.clone(), 3, Duration::from_secs(10));
        let logs = Arc::new(LogAggregator::new(100, LogClassifier::default()));
        logs.add_observer(tracker.clone());
        (table, tracker, logs)
    }

    #[test]
    fn test_derive_status_rules() {
        use ProcessState::*;
        assert_eq!(derive_status(None, 10, 3), ServerStatus::Stopped);
        assert_eq!(derive_status(Some(Stopped), 0, 3), ServerStatus::Stopped);
        assert_eq!(derive_status(Some(Error), 0, 3), ServerStatus::Error);
        assert_eq!(derive_status(Some(Running), 2, 3), ServerStatus::Running);
        assert_eq!(derive_status(Some(Running), 3, 3), ServerStatus::Error);
        assert_eq!(derive_status(Some(Running), 30, 0), ServerStatus::Running);
        assert_eq!(derive_status(Some(Starting), 5, 3), ServerStatus::Running);
    }

    #[test]
    fn test_no_handle_is_always_stopped() {
        let (_table, tracker, logs) = setup();
        for _ in 0..5 {
            logs.append("p", "fatal error", LogStream::Stderr);
        }
        assert_eq!(tracker.current_status("p"), ServerStatus::Stopped);
        assert_eq!(tracker.snapshot("p").recent_errors, 5);
    }

    #[test]
    fn test_error_window_threshold() {
        let (table, tracker, logs) = setup();
        let (generation, _tx) = table.reserve(running_info("p")).unwrap();
        table
            .transition("p", Some(generation), ProcessState::Running)
            .unwrap();
        assert_eq!(tracker.current_status("p"), ServerStatus::Running);

        logs.append("p", "Failed to render partial 'hero.html'", LogStream::Stderr);
        logs.append("p", "Warning: slow build", LogStream::Stderr);
        logs.append("p", "error: missing layout", LogStream::Stderr);
        assert_eq!(tracker.current_status("p"), ServerStatus::Running);

        logs.append("p", "error: missing layout", LogStream::Stderr);
        assert_eq!(tracker.current_status("p"), ServerStatus::Error);

        logs.clear("p");
        assert_eq!(tracker.current_status("p"), ServerStatus::Running);
    }

    #[test]
    fn test_old_errors_fall_out_of_window() {
        let (_table, tracker, _logs) = setup();
        let long_ago = Utc::now() - chrono::Duration::seconds(60);
        for _ in 0..3 {
            tracker.record_error("p", long_ago);
        }
        assert_eq!(tracker.recent_errors("p", Utc::now()), 0);
    }

    #[tokio::test]
    async fn test_subscription_receives_changes_once() {
        let (table, tracker, _logs) = setup();
        let mut sub = tracker.subscribe("p");
        assert_eq!(sub.current().status, ServerStatus::Stopped);

        let (generation, _tx) = table.reserve(running_info("p")).unwrap();
        tracker.notify("p");
        let snapshot = sub.next().await.unwrap();
        assert_eq!(snapshot.process_state, Some(ProcessState::Starting));
        assert_eq!(snapshot.status, ServerStatus::Running);

        // 相同状态不再推送
        tracker.notify("p");
        table
            .transition("p", Some(generation), ProcessState::Running)
            .unwrap();
        tracker.notify("p");
        let snapshot = sub.next().await.unwrap();
        assert_eq!(snapshot.process_state, Some(ProcessState::Running));

        tracker.forget("p");
        assert!(sub.next().await.is_none());
    }

    #[tokio::test]
    async fn test_status_recovers_after_window_expires() {
        let table = Arc::new(ProcessTable::new());
        let tracker = StatusTracker::new(table.clone(), 2, Duration::from_secs(1));
        let logs = Arc::new(LogAggregator::new(100, LogClassifier::default()));
        logs.add_observer(tracker.clone());

        let (generation, _tx) = table.reserve(running_info("p")).unwrap();
        table
            .transition("p", Some(generation), ProcessState::Running)
            .unwrap();

        let mut sub = tracker.subscribe("p");
        logs.append("p", "error one", LogStream::Stderr);
        logs.append("p", "error two", LogStream::Stderr);
        assert_eq!(tracker.current_status("p"), ServerStatus::Error);

        let recovered = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match sub.next().await {
                    Some(s) if s.status == ServerStatus::Running && s.recent_errors == 0 => {
                        return true
                    }
                    Some(_) => continue,
                    None => return false,
                }
            }
        })
        .await
        .unwrap_or(false);
        assert!(recovered);
    }
}
