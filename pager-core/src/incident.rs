use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IncidentStatus {
    Triggered,
    Acknowledged,
    Resolved,
}

impl IncidentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            IncidentStatus::Triggered => "triggered",
            IncidentStatus::Acknowledged => "acknowledged",
            IncidentStatus::Resolved => "resolved",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "triggered" => Some(IncidentStatus::Triggered),
            "acknowledged" => Some(IncidentStatus::Acknowledged),
            "resolved" => Some(IncidentStatus::Resolved),
            _ => None,
        }
    }
}

/// An incident as observed from the remote API during one poll tick.
/// Superseded wholesale on the next fetch of the same id.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Incident {
    pub id: String,
    pub service_id: String,
    pub status: IncidentStatus,
    pub title: String,
    pub description: String,
    pub urgency: String,
    pub incident_number: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub assigned_user_ids: Vec<String>,
    pub escalation_level: i64,
    pub html_url: String,
}

#[derive(Clone, Debug, Default)]
pub struct IncidentFilters {
    pub statuses: Vec<IncidentStatus>,
    pub service_ids: Vec<String>,
    pub assigned_to_me: bool,
    pub since: Option<DateTime<Utc>>,
}

/// Durable projection of an incident. `pinned` is owned locally and is never
/// written by remote-derived upserts.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CachedIncident {
    pub id: String,
    pub service_id: String,
    pub status: IncidentStatus,
    pub title: String,
    pub description: String,
    pub urgency: String,
    pub incident_number: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub pinned: bool,
    pub assigned_user_ids: Vec<String>,
    pub escalation_level: i64,
    pub html_url: String,
}

impl CachedIncident {
    pub fn from_remote(incident: &Incident) -> Self {
        CachedIncident {
            id: incident.id.clone(),
            service_id: incident.service_id.clone(),
            status: incident.status,
            title: incident.title.clone(),
            description: incident.description.clone(),
            urgency: incident.urgency.clone(),
            incident_number: incident.incident_number,
            created_at: incident.created_at,
            updated_at: incident.updated_at,
            pinned: false,
            assigned_user_ids: incident.assigned_user_ids.clone(),
            escalation_level: incident.escalation_level,
            html_url: incident.html_url.clone(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Service {
    pub id: String,
    pub alias: String,
    pub enabled: bool,
}

/// A service as listed by the remote API, before the user adds it locally.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RemoteService {
    pub id: String,
    pub name: String,
    pub description: String,
    pub status: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    pub name: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub summary: String,
    pub status: String,
    pub created_at: String,
    pub details: Option<serde_json::Value>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DraftNote {
    pub incident_id: String,
    pub note_text: String,
    pub why_triggered: String,
    pub impact: String,
    pub actions: String,
    pub links: String,
    pub last_updated: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Template {
    pub id: i64,
    pub title: String,
    pub body_text: String,
}
