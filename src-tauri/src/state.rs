use pager_core::pagerduty::PagerDutyClient;
use pager_core::poller::IncidentPoller;
use pager_core::repository::Repository;
use std::sync::{Arc, Mutex};

#[derive(Clone)]
pub struct AppState {
    pub repository: Repository,
    pub pagerduty: Arc<Mutex<Option<Arc<PagerDutyClient>>>>,
    pub poller: Arc<Mutex<Option<IncidentPoller>>>,
}

impl AppState {
    pub fn new(repository: Repository) -> Self {
        AppState {
            repository,
            pagerduty: Arc::new(Mutex::new(None)),
            poller: Arc::new(Mutex::new(None)),
        }
    }

    /// The connected client, or an error when setup has not completed.
    pub fn pagerduty(&self) -> Result<Arc<PagerDutyClient>, String> {
        self.pagerduty
            .lock()
            .map_err(|e| e.to_string())?
            .clone()
            .ok_or_else(|| "PagerDuty is not initialized".to_string())
    }
}
