pub mod incident;
pub mod pagerduty;
pub mod poller;
pub mod repository;
pub mod snapshot;
pub mod sound;
