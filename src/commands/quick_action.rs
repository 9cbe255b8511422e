use crate::error::Result;
use crate::models::QuickAction;
use crate::services::run_quick_action;
use crate::state::AppState;

pub fn perform_quick_action(project_id: &str, action: QuickAction, state: &AppState) -> Result<()> {
    let project = state.registry.get(project_id)?;
    let process = state.supervisor.info(project_id);
    run_quick_action(
        action,
        &project,
        process.as_ref(),
        state.config.browser.as_deref(),
    )
}
