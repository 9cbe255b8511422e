//! Per-project log capture.
//!
//! Every line a dev server writes is classified, timestamped and pushed into a
//! bounded ring buffer. Queries return a [`LogCursor`] that walks the buffer
//! lazily, so a reader never holds the lock between items.

use crate::config::{ManagerConfig, DEFAULT_ERROR_PATTERN, DEFAULT_WARNING_PATTERN};
use crate::models::{LogEntry, LogLevel, LogQuery, LogStream};
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;

static DEFAULT_ERROR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(DEFAULT_ERROR_PATTERN).expect("default error pattern is valid"));
static DEFAULT_WARNING_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(DEFAULT_WARNING_PATTERN).expect("default warning pattern is valid"));

/// 接收新日志的观察者（状态追踪器实现了它）
pub trait LogObserver: Send + Sync {
    fn on_entry(&self, entry: &LogEntry);

    fn on_clear(&self, _project_id: &str) {}
}

/// 按正则将一行输出分为 error / warning / info，error 优先
#[derive(Debug, Clone)]
pub struct LogClassifier {
    error: Regex,
    warning: Regex,
}

impl LogClassifier {
    pub fn new(error_pattern: &str, warning_pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            error: Regex::new(error_pattern)?,
            warning: Regex::new(warning_pattern)?,
        })
    }

    pub fn classify(&self, line: &str) -> LogLevel {
        if self.error.is_match(line) {
            LogLevel::Error
        } else if self.warning.is_match(line) {
            LogLevel::Warning
        } else {
            LogLevel::Info
        }
    }
}

impl Default for LogClassifier {
    fn default() -> Self {
        Self {
            error: DEFAULT_ERROR_RE.clone(),
            warning: DEFAULT_WARNING_RE.clone(),
        }
    }
}

#[derive(Debug, Default)]
struct LogBuffer {
    entries: VecDeque<LogEntry>,
    next_seq: u64,
}

impl LogBuffer {
    fn push(&mut self, mut entry: LogEntry, capacity: usize) -> LogEntry {
        // 时钟回拨时沿用上一条的时间戳，保证项目内单调
        if let Some(last) = self.entries.back() {
            if entry.timestamp < last.timestamp {
                entry.timestamp = last.timestamp;
            }
        }
        entry.seq = self.next_seq;
        self.next_seq += 1;

        while self.entries.len() >= capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry.clone());
        entry
    }

    /// 第一个 seq >= `seq` 且满足条件的条目
    fn find_from(&self, seq: u64, query: &LogQuery) -> Option<&LogEntry> {
        let front = self.entries.front()?.seq;
        let start = seq.saturating_sub(front) as usize;
        self.entries.iter().skip(start).find(|e| query.matches(e))
    }
}

pub struct LogAggregator {
    buffers: RwLock<HashMap<String, LogBuffer>>,
    capacity: usize,
    classifier: LogClassifier,
    observers: RwLock<Vec<Arc<dyn LogObserver>>>,
    broadcast_tx: broadcast::Sender<LogEntry>,
}

impl LogAggregator {
    pub fn new(capacity: usize, classifier: LogClassifier) -> Self {
        let (broadcast_tx, _) = broadcast::channel(1024);
        Self {
            buffers: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
            classifier,
            observers: RwLock::new(Vec::new()),
            broadcast_tx,
        }
    }

    pub fn from_config(config: &ManagerConfig) -> Result<Self, regex::Error> {
        let classifier = LogClassifier::new(&config.error_pattern, &config.warning_pattern)?;
        Ok(Self::new(config.log_capacity, classifier))
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn add_observer(&self, observer: Arc<dyn LogObserver>) {
        self.observers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(observer);
    }

    /// 记录子进程输出的一行，级别由分类器决定
    pub fn append(&self, project_id: &str, line: &str, stream: LogStream) -> LogEntry {
        let level = self.classifier.classify(line);
        self.push(project_id, level, line, stream)
    }

    /// 管理器自身的生命周期提示，级别由调用方指定
    pub fn append_system(&self, project_id: &str, level: LogLevel, message: &str) -> LogEntry {
        self.push(project_id, level, message, LogStream::System)
    }

    fn push(&self, project_id: &str, level: LogLevel, message: &str, stream: LogStream) -> LogEntry {
        let entry = LogEntry {
            seq: 0,
            project_id: project_id.to_string(),
            timestamp: Utc::now(),
            level,
            message: message.to_string(),
            stream,
        };

        let entry = {
            let mut buffers = self.buffers.write().unwrap_or_else(|e| e.into_inner());
            buffers
                .entry(project_id.to_string())
                .or_default()
                .push(entry, self.capacity)
        };

        let observers = self
            .observers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        for observer in observers {
            observer.on_entry(&entry);
        }

        // 没有订阅者时发送失败，忽略
        let _ = self.broadcast_tx.send(entry.clone());
        entry
    }

    /// 惰性、有序、可重启的查询
    pub fn query(self: &Arc<Self>, project_id: &str, query: LogQuery) -> LogCursor {
        LogCursor {
            logs: Arc::clone(self),
            project_id: project_id.to_string(),
            query,
            next_seq: 0,
        }
    }

    /// 当前缓冲区的全部条目
    pub fn snapshot(&self, project_id: &str) -> Vec<LogEntry> {
        let buffers = self.buffers.read().unwrap_or_else(|e| e.into_inner());
        buffers
            .get(project_id)
            .map(|b| b.entries.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self, project_id: &str) -> usize {
        let buffers = self.buffers.read().unwrap_or_else(|e| e.into_inner());
        buffers.get(project_id).map_or(0, |b| b.entries.len())
    }

    /// 清空缓冲区；序号继续递增，已有游标不会重放旧条目
    pub fn clear(&self, project_id: &str) {
        {
            let mut buffers = self.buffers.write().unwrap_or_else(|e| e.into_inner());
            if let Some(buffer) = buffers.get_mut(project_id) {
                buffer.entries.clear();
            }
        }

        let observers = self
            .observers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        for observer in observers {
            observer.on_clear(project_id);
        }
    }

    /// 项目删除时释放整个缓冲区
    pub fn drop_project(&self, project_id: &str) {
        self.buffers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(project_id);
    }

    /// 所有项目的实时日志
    pub fn subscribe(&self) -> broadcast::Receiver<LogEntry> {
        self.broadcast_tx.subscribe()
    }

    fn next_after(&self, project_id: &str, seq: u64, query: &LogQuery) -> Option<LogEntry> {
        let buffers = self.buffers.read().unwrap_or_else(|e| e.into_inner());
        buffers.get(project_id)?.find_from(seq, query).cloned()
    }
}

/// 日志游标。每次 `next` 只短暂持有读锁，期间追加的新条目也会被读到。
#[derive(Clone)]
pub struct LogCursor {
    logs: Arc<LogAggregator>,
    project_id: String,
    query: LogQuery,
    next_seq: u64,
}

impl LogCursor {
    /// 回到起点重新遍历
    pub fn restart(&mut self) {
        self.next_seq = 0;
    }
}

impl Iterator for LogCursor {
    type Item = LogEntry;

    fn next(&mut self) -> Option<LogEntry> {
        let entry = self
            .logs
            .next_after(&self.project_id, self.next_seq, &self.query)?;
        self.next_seq = entry.seq + 1;
        Some(entry)
    }
}
