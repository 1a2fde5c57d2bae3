pub mod commands;
pub mod runtime;
pub mod state;

use crate::state::AppState;
use pager_core::poller::NoopSink;
use pager_core::repository::Repository;
use std::sync::Arc;

pub fn build_state() -> Result<AppState, String> {
    let repository = Repository::open("pager-ops.db")?;
    Ok(AppState::new(repository))
}

/// Headless entry point: brings the backend up without a webview. Used for
/// backend validation runs; the poller drives the cache and logs as usual.
pub fn run() -> Result<(), String> {
    let state = build_state()?;
    runtime::initialize_pagerduty(&state, Arc::new(NoopSink));
    Ok(())
}

#[cfg(feature = "tauri-app")]
pub fn run_tauri() {
    tauri::Builder::default()
        .setup(|app| {
            let state =
                build_state().map_err(|e| -> Box<dyn std::error::Error> { e.into() })?;

            let sink = Arc::new(runtime::TauriSink::new(app.handle()));
            runtime::initialize_pagerduty(&state, sink);

            use tauri::Manager;
            app.manage(state);
            Ok(())
        })
        .invoke_handler(tauri::generate_handler![
            commands::get_settings_cmd,
            commands::save_settings_cmd,
            commands::get_services_cmd,
            commands::save_service_cmd,
            commands::delete_service_cmd,
            commands::toggle_service_cmd,
            commands::fetch_available_services_cmd,
            commands::get_incidents_cmd,
            commands::acknowledge_incident_cmd,
            commands::resolve_incident_cmd,
            commands::escalate_incident_cmd,
            commands::snooze_incident_cmd,
            commands::pin_incident_cmd,
            commands::merge_incidents_cmd,
            commands::get_incident_alerts_cmd,
            commands::get_draft_note_cmd,
            commands::save_draft_note_cmd,
            commands::add_incident_note_cmd,
            commands::get_templates_cmd,
            commands::save_template_cmd,
            commands::delete_template_cmd,
            commands::get_current_user_cmd,
            commands::open_incident_in_browser_cmd
        ])
        .run(tauri::generate_context!())
        .expect("error while running tauri application");
}
