use crate::error::Result;
use crate::models::{LogEntry, LogLevel, StatusSnapshot};
use crate::state::AppState;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

/// 订阅命令推送的事件
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum Event {
    Status(StatusSnapshot),
    Log(LogEntry),
}

pub type EventSender = mpsc::UnboundedSender<Event>;

/// 推送项目的状态变化，返回当前快照
///
/// 接收端关闭或项目被删除后停止推送。
pub fn watch_status(project_id: &str, state: &AppState, events: EventSender) -> Result<StatusSnapshot> {
    state.registry.get(project_id)?;

    let mut subscription = state.tracker.subscribe(project_id);
    let current = subscription.current();
    let project_id = project_id.to_string();

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = events.closed() => break,
                next = subscription.next() => match next {
                    Some(snapshot) => {
                        if events.send(Event::Status(snapshot)).is_err() {
                            break;
                        }
                    }
                    None => break,
                },
            }
        }
        debug!(project_id = %project_id, "status subscription ended");
    });

    Ok(current)
}

/// 推送项目的新日志；`level` 为 `Some` 时只推送该级别
pub fn tail_logs(
    project_id: &str,
    level: Option<LogLevel>,
    state: &AppState,
    events: EventSender,
) -> Result<()> {
    state.registry.get(project_id)?;

    let mut rx = state.logs.subscribe();
    let project_id = project_id.to_string();

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = events.closed() => break,
                received = rx.recv() => match received {
                    Ok(entry) => {
                        if entry.project_id != project_id || level.is_some_and(|l| l != entry.level) {
                            continue;
                        }
                        if events.send(Event::Log(entry)).is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(project_id = %project_id, skipped, "log tail lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
        debug!(project_id = %project_id, "log tail ended");
    });

    Ok(())
}
