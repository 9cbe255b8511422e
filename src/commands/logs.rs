use crate::error::Result;
use crate::models::{LogEntry, LogQuery, StatusSnapshot};
use crate::state::AppState;

/// 按时间顺序返回日志；`limit` 只保留最后几条
pub fn get_logs(
    project_id: &str,
    query: LogQuery,
    limit: Option<usize>,
    state: &AppState,
) -> Result<Vec<LogEntry>> {
    state.registry.get(project_id)?;

    let mut entries: Vec<LogEntry> = state.logs.query(project_id, query).collect();
    if let Some(limit) = limit {
        let skip = entries.len().saturating_sub(limit);
        entries.drain(..skip);
    }
    Ok(entries)
}

pub fn clear_logs(project_id: &str, state: &AppState) -> Result<()> {
    state.registry.get(project_id)?;
    state.logs.clear(project_id);
    Ok(())
}

pub fn get_status(project_id: &str, state: &AppState) -> Result<StatusSnapshot> {
    state.registry.get(project_id)?;
    Ok(state.tracker.snapshot(project_id))
}
