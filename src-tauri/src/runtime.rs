use crate::state::AppState;
use pager_core::pagerduty::PagerDutyClient;
use pager_core::poller::{EventSink, IncidentPoller, PollWorker};
use pager_core::sound::DesktopAlerts;
use std::sync::Arc;
use tracing::{error, info};

/// Reads the stored API key and brings the polling runtime up. With no key
/// (or a key the API rejects) the frontend is asked to run setup; otherwise
/// the poller starts against the connected client and `setup:complete` is
/// emitted. Any previously running poller is stopped first, so this also
/// serves as the reinitialization path after a key rotation.
pub fn initialize_pagerduty(state: &AppState, sink: Arc<dyn EventSink>) {
    shutdown_poller(state);

    let api_key = match state.repository.get_api_key() {
        Ok(key) => key,
        Err(err) => {
            error!("failed to read API key: {err}");
            String::new()
        }
    };

    if api_key.is_empty() {
        info!("no API key configured");
        sink.emit_json("setup:required", serde_json::Value::Bool(true));
        return;
    }

    match PagerDutyClient::connect(&api_key, &state.repository) {
        Ok(client) => {
            let client = Arc::new(client);
            if let Ok(mut guard) = state.pagerduty.lock() {
                *guard = Some(client.clone());
            }

            let alerts = Arc::new(DesktopAlerts::new(state.repository.clone()));
            let worker =
                PollWorker::new(client, state.repository.clone(), alerts, sink.clone());
            let poller = IncidentPoller::start(worker);
            if let Ok(mut guard) = state.poller.lock() {
                *guard = Some(poller);
            }

            sink.emit_json("setup:complete", serde_json::Value::Bool(true));
        }
        Err(err) => {
            error!("failed to initialize PagerDuty: {err}");
            sink.emit_json("setup:required", serde_json::Value::Bool(true));
        }
    }
}

/// Stops the background poller if one is running. Safe to call when none is.
pub fn shutdown_poller(state: &AppState) {
    if let Ok(mut guard) = state.poller.lock() {
        if let Some(poller) = guard.take() {
            poller.stop();
        }
    }
}

#[cfg(feature = "tauri-app")]
pub struct TauriSink {
    app: tauri::AppHandle,
}

#[cfg(feature = "tauri-app")]
impl TauriSink {
    pub fn new(app: tauri::AppHandle) -> Self {
        Self { app }
    }
}

#[cfg(feature = "tauri-app")]
impl EventSink for TauriSink {
    fn emit_json(&self, event: &str, payload: serde_json::Value) {
        use tauri::Manager;
        let _ = self.app.emit_all(event, payload);
    }
}
