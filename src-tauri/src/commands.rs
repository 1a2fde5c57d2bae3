use crate::runtime;
use crate::state::AppState;
use pager_core::incident::{
    Alert, CachedIncident, DraftNote, IncidentStatus, RemoteService, Service, Template, User,
};
use pager_core::poller::EventSink;
use pager_core::repository::{
    SETTING_API_KEY, SETTING_ASSIGNED_ONLY, SETTING_REDIRECT_ENABLED, SETTING_SOUND_ENABLED,
    SETTING_SOUND_PATH, SETTING_THEME,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppSettings {
    pub api_key: String,
    pub theme: String,
    pub assigned_only: bool,
    pub redirect_enabled: bool,
    pub sound_path: String,
    pub sound_enabled: bool,
}

// Settings

pub fn get_settings(state: &AppState) -> Result<AppSettings, String> {
    Ok(AppSettings {
        api_key: mask_api_key(&state.repository.get_api_key()?),
        theme: state.repository.get_setting(SETTING_THEME)?,
        assigned_only: state.repository.get_bool_setting(SETTING_ASSIGNED_ONLY)?,
        redirect_enabled: state.repository.get_bool_setting(SETTING_REDIRECT_ENABLED)?,
        sound_path: state.repository.get_setting(SETTING_SOUND_PATH)?,
        sound_enabled: state.repository.get_bool_setting(SETTING_SOUND_ENABLED)?,
    })
}

/// Persists settings. A non-masked API key is a rotation: the stored key is
/// replaced and the polling runtime is torn down and reinitialized against
/// the new credential. All other settings take effect on the poller's next
/// tick without a restart.
pub fn save_settings(
    state: &AppState,
    settings: AppSettings,
    sink: Arc<dyn EventSink>,
) -> Result<(), String> {
    let rotated = !settings.api_key.is_empty() && !settings.api_key.starts_with("****");
    if rotated {
        state
            .repository
            .set_setting(SETTING_API_KEY, &settings.api_key)?;
    }

    state.repository.set_setting(SETTING_THEME, &settings.theme)?;
    state
        .repository
        .set_setting(SETTING_ASSIGNED_ONLY, bool_str(settings.assigned_only))?;
    state
        .repository
        .set_setting(SETTING_REDIRECT_ENABLED, bool_str(settings.redirect_enabled))?;
    state
        .repository
        .set_setting(SETTING_SOUND_PATH, &settings.sound_path)?;
    state
        .repository
        .set_setting(SETTING_SOUND_ENABLED, bool_str(settings.sound_enabled))?;

    if rotated {
        runtime::initialize_pagerduty(state, sink.clone());
    }

    let mut emitted = settings;
    emitted.api_key = mask_api_key(&state.repository.get_api_key()?);
    sink.emit_json(
        "settings:updated",
        serde_json::to_value(&emitted).map_err(|e| e.to_string())?,
    );
    Ok(())
}

// Services

pub fn get_services(state: &AppState) -> Result<Vec<Service>, String> {
    state.repository.get_services()
}

pub fn save_service(state: &AppState, service: Service) -> Result<(), String> {
    state.repository.upsert_service(&service)
}

pub fn delete_service(state: &AppState, id: String) -> Result<(), String> {
    state.repository.delete_service(&id)
}

pub fn toggle_service(
    state: &AppState,
    id: String,
    enabled: bool,
    sink: &dyn EventSink,
) -> Result<(), String> {
    state.repository.toggle_service(&id, enabled)?;
    sink.emit_json("services:updated", serde_json::Value::Null);
    Ok(())
}

pub fn fetch_available_services(state: &AppState) -> Result<Vec<RemoteService>, String> {
    state.pagerduty()?.list_services()
}

// Incidents

pub fn get_incidents(state: &AppState, statuses: Vec<String>) -> Result<Vec<CachedIncident>, String> {
    let mut parsed = Vec::with_capacity(statuses.len());
    for status in &statuses {
        match IncidentStatus::parse(status) {
            Some(s) => parsed.push(s),
            None => return Err(format!("unknown incident status: {status}")),
        }
    }
    state.repository.get_incidents(&parsed)
}

pub fn acknowledge_incident(
    state: &AppState,
    incident_id: String,
    sink: &dyn EventSink,
) -> Result<(), String> {
    state.pagerduty()?.acknowledge_incident(&incident_id)?;
    sink.emit_json(
        "incident:acknowledged",
        serde_json::Value::String(incident_id),
    );
    Ok(())
}

pub fn resolve_incident(
    state: &AppState,
    incident_id: String,
    sink: &dyn EventSink,
) -> Result<(), String> {
    state.pagerduty()?.resolve_incident(&incident_id)?;
    sink.emit_json("incident:resolved", serde_json::Value::String(incident_id));
    Ok(())
}

pub fn escalate_incident(
    state: &AppState,
    incident_id: String,
    escalation_level: u32,
) -> Result<(), String> {
    state
        .pagerduty()?
        .escalate_incident(&incident_id, escalation_level)
}

pub fn snooze_incident(
    state: &AppState,
    incident_id: String,
    minutes: u64,
    sink: &dyn EventSink,
) -> Result<(), String> {
    state
        .pagerduty()?
        .snooze_incident(&incident_id, Duration::from_secs(minutes * 60))
        .map_err(|e| format!("failed to snooze incident: {e}"))?;
    sink.emit_json("incident:snoozed", serde_json::Value::String(incident_id));
    Ok(())
}

pub fn pin_incident(state: &AppState, incident_id: String, pinned: bool) -> Result<(), String> {
    state.repository.pin_incident(&incident_id, pinned)
}

pub fn merge_incidents(
    state: &AppState,
    source_ids: Vec<String>,
    target_id: String,
) -> Result<(), String> {
    state.pagerduty()?.merge_incidents(&source_ids, &target_id)
}

pub fn get_incident_alerts(state: &AppState, incident_id: String) -> Result<Vec<Alert>, String> {
    state.pagerduty()?.fetch_incident_alerts(&incident_id)
}

// Notes

pub fn get_draft_note(state: &AppState, incident_id: String) -> Result<Option<DraftNote>, String> {
    state.repository.get_draft_note(&incident_id)
}

pub fn save_draft_note(state: &AppState, note: DraftNote) -> Result<(), String> {
    state.repository.save_draft_note(&note)
}

pub fn add_incident_note(
    state: &AppState,
    incident_id: String,
    content: String,
) -> Result<(), String> {
    state.pagerduty()?.add_incident_note(&incident_id, &content)
}

// Templates

pub fn get_templates(state: &AppState) -> Result<Vec<Template>, String> {
    state.repository.get_templates()
}

pub fn save_template(state: &AppState, template: Template) -> Result<(), String> {
    state.repository.save_template(&template)
}

pub fn delete_template(state: &AppState, id: i64) -> Result<(), String> {
    state.repository.delete_template(id)
}

// User

pub fn get_current_user(state: &AppState) -> Result<Option<User>, String> {
    state.repository.get_user()
}

pub fn open_incident_in_browser(url: String) {
    if let Err(err) = open::that_detached(&url) {
        warn!("failed to open incident in browser: {err}");
    }
}

fn bool_str(value: bool) -> &'static str {
    if value {
        "true"
    } else {
        "false"
    }
}

fn mask_api_key(key: &str) -> String {
    if key.is_empty() {
        return String::new();
    }
    let tail: String = key
        .chars()
        .rev()
        .take(4)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("****{tail}")
}

#[cfg(feature = "tauri-app")]
mod tauri_commands {
    use super::*;
    use crate::runtime::TauriSink;

    #[tauri::command(rename_all = "camelCase")]
    pub fn get_settings_cmd(state: tauri::State<'_, AppState>) -> Result<AppSettings, String> {
        get_settings(&state)
    }

    #[tauri::command(rename_all = "camelCase")]
    pub fn save_settings_cmd(
        state: tauri::State<'_, AppState>,
        app: tauri::AppHandle,
        settings: AppSettings,
    ) -> Result<(), String> {
        save_settings(&state, settings, Arc::new(TauriSink::new(app)))
    }

    #[tauri::command(rename_all = "camelCase")]
    pub fn get_services_cmd(state: tauri::State<'_, AppState>) -> Result<Vec<Service>, String> {
        get_services(&state)
    }

    #[tauri::command(rename_all = "camelCase")]
    pub fn save_service_cmd(
        state: tauri::State<'_, AppState>,
        service: Service,
    ) -> Result<(), String> {
        save_service(&state, service)
    }

    #[tauri::command(rename_all = "camelCase")]
    pub fn delete_service_cmd(state: tauri::State<'_, AppState>, id: String) -> Result<(), String> {
        delete_service(&state, id)
    }

    #[tauri::command(rename_all = "camelCase")]
    pub fn toggle_service_cmd(
        state: tauri::State<'_, AppState>,
        app: tauri::AppHandle,
        id: String,
        enabled: bool,
    ) -> Result<(), String> {
        toggle_service(&state, id, enabled, &TauriSink::new(app))
    }

    #[tauri::command(rename_all = "camelCase")]
    pub fn fetch_available_services_cmd(
        state: tauri::State<'_, AppState>,
    ) -> Result<Vec<RemoteService>, String> {
        fetch_available_services(&state)
    }

    #[tauri::command(rename_all = "camelCase")]
    pub fn get_incidents_cmd(
        state: tauri::State<'_, AppState>,
        statuses: Vec<String>,
    ) -> Result<Vec<CachedIncident>, String> {
        get_incidents(&state, statuses)
    }

    #[tauri::command(rename_all = "camelCase")]
    pub fn acknowledge_incident_cmd(
        state: tauri::State<'_, AppState>,
        app: tauri::AppHandle,
        incident_id: String,
    ) -> Result<(), String> {
        acknowledge_incident(&state, incident_id, &TauriSink::new(app))
    }

    #[tauri::command(rename_all = "camelCase")]
    pub fn resolve_incident_cmd(
        state: tauri::State<'_, AppState>,
        app: tauri::AppHandle,
        incident_id: String,
    ) -> Result<(), String> {
        resolve_incident(&state, incident_id, &TauriSink::new(app))
    }

    #[tauri::command(rename_all = "camelCase")]
    pub fn escalate_incident_cmd(
        state: tauri::State<'_, AppState>,
        incident_id: String,
        escalation_level: u32,
    ) -> Result<(), String> {
        escalate_incident(&state, incident_id, escalation_level)
    }

    #[tauri::command(rename_all = "camelCase")]
    pub fn snooze_incident_cmd(
        state: tauri::State<'_, AppState>,
        app: tauri::AppHandle,
        incident_id: String,
        minutes: u64,
    ) -> Result<(), String> {
        snooze_incident(&state, incident_id, minutes, &TauriSink::new(app))
    }

    #[tauri::command(rename_all = "camelCase")]
    pub fn pin_incident_cmd(
        state: tauri::State<'_, AppState>,
        incident_id: String,
        pinned: bool,
    ) -> Result<(), String> {
        pin_incident(&state, incident_id, pinned)
    }

    #[tauri::command(rename_all = "camelCase")]
    pub fn merge_incidents_cmd(
        state: tauri::State<'_, AppState>,
        source_ids: Vec<String>,
        target_id: String,
    ) -> Result<(), String> {
        merge_incidents(&state, source_ids, target_id)
    }

    #[tauri::command(rename_all = "camelCase")]
    pub fn get_incident_alerts_cmd(
        state: tauri::State<'_, AppState>,
        incident_id: String,
    ) -> Result<Vec<Alert>, String> {
        get_incident_alerts(&state, incident_id)
    }

    #[tauri::command(rename_all = "camelCase")]
    pub fn get_draft_note_cmd(
        state: tauri::State<'_, AppState>,
        incident_id: String,
    ) -> Result<Option<DraftNote>, String> {
        get_draft_note(&state, incident_id)
    }

    #[tauri::command(rename_all = "camelCase")]
    pub fn save_draft_note_cmd(
        state: tauri::State<'_, AppState>,
        note: DraftNote,
    ) -> Result<(), String> {
        save_draft_note(&state, note)
    }

    #[tauri::command(rename_all = "camelCase")]
    pub fn add_incident_note_cmd(
        state: tauri::State<'_, AppState>,
        incident_id: String,
        content: String,
    ) -> Result<(), String> {
        add_incident_note(&state, incident_id, content)
    }

    #[tauri::command(rename_all = "camelCase")]
    pub fn get_templates_cmd(state: tauri::State<'_, AppState>) -> Result<Vec<Template>, String> {
        get_templates(&state)
    }

    #[tauri::command(rename_all = "camelCase")]
    pub fn save_template_cmd(
        state: tauri::State<'_, AppState>,
        template: Template,
    ) -> Result<(), String> {
        save_template(&state, template)
    }

    #[tauri::command(rename_all = "camelCase")]
    pub fn delete_template_cmd(state: tauri::State<'_, AppState>, id: i64) -> Result<(), String> {
        delete_template(&state, id)
    }

    #[tauri::command(rename_all = "camelCase")]
    pub fn get_current_user_cmd(state: tauri::State<'_, AppState>) -> Result<Option<User>, String> {
        get_current_user(&state)
    }

    #[tauri::command(rename_all = "camelCase")]
    pub fn open_incident_in_browser_cmd(url: String) {
        open_incident_in_browser(url)
    }
}

#[cfg(feature = "tauri-app")]
pub use tauri_commands::*;

#[cfg(test)]
mod tests {
    use super::*;
    use pager_core::repository::Repository;
    use std::sync::Mutex;

    fn db_path(name: &str) -> String {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time")
            .as_nanos();
        format!("/tmp/pager-ops-tests/{name}-{nanos}.db")
    }

    fn state(name: &str) -> AppState {
        AppState::new(Repository::open(&db_path(name)).expect("open"))
    }

    #[derive(Default)]
    struct CaptureSink {
        events: Mutex<Vec<(String, serde_json::Value)>>,
    }

    impl EventSink for CaptureSink {
        fn emit_json(&self, event: &str, payload: serde_json::Value) {
            self.events
                .lock()
                .expect("lock")
                .push((event.to_string(), payload));
        }
    }

    #[test]
    fn get_settings_masks_the_api_key() {
        let state = state("settings-mask");
        state
            .repository
            .set_setting(SETTING_API_KEY, "u+secretkey1234")
            .expect("set");

        let settings = get_settings(&state).expect("get");
        assert_eq!(settings.api_key, "****1234");
    }

    #[test]
    fn saving_a_masked_key_does_not_rotate_the_stored_key() {
        let state = state("settings-masked-save");
        state
            .repository
            .set_setting(SETTING_API_KEY, "original-key")
            .expect("set");

        let sink = Arc::new(CaptureSink::default());
        save_settings(
            &state,
            AppSettings {
                api_key: "****-key".into(),
                theme: "dark".into(),
                assigned_only: true,
                ..AppSettings::default()
            },
            sink.clone(),
        )
        .expect("save");

        assert_eq!(state.repository.get_api_key().expect("key"), "original-key");
        assert_eq!(
            state.repository.get_setting(SETTING_THEME).expect("theme"),
            "dark"
        );
        assert!(state
            .repository
            .get_bool_setting(SETTING_ASSIGNED_ONLY)
            .expect("bool"));

        let events = sink.events.lock().expect("lock").clone();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].0, "settings:updated");
        // The echoed payload never carries the raw key.
        assert_eq!(events[0].1["api_key"], "****-key");
    }

    #[test]
    fn saving_an_empty_key_leaves_credentials_alone() {
        let state = state("settings-empty-key");
        state
            .repository
            .set_setting(SETTING_API_KEY, "original-key")
            .expect("set");

        let sink = Arc::new(CaptureSink::default());
        save_settings(&state, AppSettings::default(), sink).expect("save");

        assert_eq!(state.repository.get_api_key().expect("key"), "original-key");
    }

    #[test]
    fn toggle_service_notifies_the_frontend() {
        let state = state("toggle");
        state
            .repository
            .upsert_service(&Service {
                id: "svc-1".into(),
                alias: "checkout".into(),
                enabled: true,
            })
            .expect("service");

        let sink = CaptureSink::default();
        toggle_service(&state, "svc-1".into(), false, &sink).expect("toggle");

        let services = get_services(&state).expect("list");
        assert!(!services[0].enabled);
        let events = sink.events.lock().expect("lock").clone();
        assert_eq!(events[0].0, "services:updated");
    }

    #[test]
    fn get_incidents_rejects_unknown_status_strings() {
        let state = state("bad-status");
        let err = get_incidents(&state, vec!["snoozed".into()]).expect_err("err");
        assert!(err.contains("snoozed"));
    }

    #[test]
    fn remote_operations_fail_cleanly_before_setup() {
        let state = state("uninitialized");
        let sink = CaptureSink::default();

        assert!(fetch_available_services(&state).is_err());
        assert!(acknowledge_incident(&state, "inc-1".into(), &sink).is_err());
        assert!(merge_incidents(&state, vec!["inc-1".into()], "inc-2".into()).is_err());
        assert!(sink.events.lock().expect("lock").is_empty());
    }

    #[test]
    fn mask_api_key_handles_short_keys() {
        assert_eq!(mask_api_key(""), "");
        assert_eq!(mask_api_key("ab"), "****ab");
        assert_eq!(mask_api_key("abcdef"), "****cdef");
    }
}
