use crate::incident::{Alert, Incident, IncidentFilters, IncidentStatus, RemoteService, User};
use crate::repository::Repository;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::time::Duration;
use tracing::warn;

const API_BASE_URL: &str = "https://api.pagerduty.com";
const PAGE_LIMIT: u32 = 100;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Capability the poller needs from the remote API. The concrete client adds
/// the mutation surface on top; tests substitute scripted sources.
pub trait IncidentSource: Send + Sync + 'static {
    fn fetch_incidents(&self, filters: &IncidentFilters) -> Result<Vec<Incident>, String>;
}

pub struct PagerDutyClient {
    http: reqwest::blocking::Client,
    base_url: String,
    user_id: String,
    user_email: String,
}

impl PagerDutyClient {
    /// Builds a client for the given API key and resolves the current user.
    /// The user row is persisted so the UI can show who is on the hook.
    pub fn connect(api_key: &str, repository: &Repository) -> Result<Self, String> {
        if api_key.is_empty() {
            return Err("API key is required".into());
        }

        let mut headers = reqwest::header::HeaderMap::new();
        let mut auth = reqwest::header::HeaderValue::from_str(&format!("Token token={api_key}"))
            .map_err(|e| e.to_string())?;
        auth.set_sensitive(true);
        headers.insert(reqwest::header::AUTHORIZATION, auth);
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static("application/vnd.pagerduty+json;version=2"),
        );

        let http = reqwest::blocking::Client::builder()
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| e.to_string())?;

        let mut client = PagerDutyClient {
            http,
            base_url: API_BASE_URL.to_string(),
            user_id: String::new(),
            user_email: String::new(),
        };

        let user = client.fetch_current_user()?;
        client.user_id = user.id.clone();
        client.user_email = user.email.clone();
        repository.set_user(&user)?;

        Ok(client)
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn user_email(&self) -> &str {
        &self.user_email
    }

    fn fetch_current_user(&self) -> Result<User, String> {
        let resp: CurrentUserResponse = self.get("/users/me", &[])?;
        Ok(User {
            id: resp.user.id,
            email: resp.user.email,
            name: resp.user.name,
        })
    }

    pub fn list_services(&self) -> Result<Vec<RemoteService>, String> {
        let resp: ListServicesResponse =
            self.get("/services", &[("limit".into(), PAGE_LIMIT.to_string())])?;
        Ok(resp
            .services
            .into_iter()
            .map(|svc| RemoteService {
                id: svc.id,
                name: svc.name,
                description: svc.description.unwrap_or_default(),
                status: svc.status.unwrap_or_default(),
            })
            .collect())
    }

    pub fn acknowledge_incident(&self, incident_id: &str) -> Result<(), String> {
        self.manage_incident(serde_json::json!({
            "id": incident_id,
            "type": "incident_reference",
            "status": "acknowledged",
        }))
    }

    pub fn resolve_incident(&self, incident_id: &str) -> Result<(), String> {
        self.manage_incident(serde_json::json!({
            "id": incident_id,
            "type": "incident_reference",
            "status": "resolved",
        }))
    }

    pub fn escalate_incident(&self, incident_id: &str, escalation_level: u32) -> Result<(), String> {
        self.manage_incident(serde_json::json!({
            "id": incident_id,
            "type": "incident_reference",
            "escalation_level": escalation_level,
        }))
    }

    fn manage_incident(&self, reference: serde_json::Value) -> Result<(), String> {
        let body = serde_json::json!({ "incidents": [reference] });
        self.send_mutation(reqwest::Method::PUT, "/incidents", &body)
    }

    pub fn snooze_incident(&self, incident_id: &str, duration: Duration) -> Result<(), String> {
        let body = serde_json::json!({ "duration": duration.as_secs() });
        self.send_mutation(
            reqwest::Method::POST,
            &format!("/incidents/{incident_id}/snooze"),
            &body,
        )
    }

    pub fn merge_incidents(&self, source_ids: &[String], target_id: &str) -> Result<(), String> {
        let sources: Vec<serde_json::Value> = source_ids
            .iter()
            .map(|id| serde_json::json!({ "id": id, "type": "incident_reference" }))
            .collect();
        let body = serde_json::json!({ "source_incidents": sources });
        self.send_mutation(
            reqwest::Method::PUT,
            &format!("/incidents/{target_id}/merge"),
            &body,
        )
    }

    pub fn add_incident_note(&self, incident_id: &str, content: &str) -> Result<(), String> {
        let body = serde_json::json!({ "note": { "content": content } });
        self.send_mutation(
            reqwest::Method::POST,
            &format!("/incidents/{incident_id}/notes"),
            &body,
        )
    }

    pub fn fetch_incident_alerts(&self, incident_id: &str) -> Result<Vec<Alert>, String> {
        let resp: ListAlertsResponse = self.get(&format!("/incidents/{incident_id}/alerts"), &[])?;
        Ok(resp
            .alerts
            .into_iter()
            .map(|alert| Alert {
                id: alert.id,
                summary: alert.summary.unwrap_or_default(),
                status: alert.status.unwrap_or_default(),
                created_at: alert.created_at.unwrap_or_default(),
                details: alert.body,
            })
            .collect())
    }

    fn get<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(String, String)],
    ) -> Result<T, String> {
        let url = format!("{}{path}", self.base_url);
        let resp = self
            .http
            .get(&url)
            .query(query)
            .send()
            .map_err(|e| e.to_string())?;

        let status = resp.status();
        if !status.is_success() {
            return Err(format!("pagerduty api returned {status} for {path}"));
        }
        resp.json::<T>().map_err(|e| e.to_string())
    }

    fn send_mutation(
        &self,
        method: reqwest::Method,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<(), String> {
        let url = format!("{}{path}", self.base_url);
        let resp = self
            .http
            .request(method, &url)
            .header("From", self.user_email.as_str())
            .json(body)
            .send()
            .map_err(|e| e.to_string())?;

        let status = resp.status();
        if !status.is_success() {
            return Err(format!("pagerduty api returned {status} for {path}"));
        }
        Ok(())
    }
}

impl IncidentSource for PagerDutyClient {
    fn fetch_incidents(&self, filters: &IncidentFilters) -> Result<Vec<Incident>, String> {
        let query = incident_query(filters, &self.user_id);
        let resp: ListIncidentsResponse = self.get("/incidents", &query)?;

        let mut incidents = Vec::with_capacity(resp.incidents.len());
        for inc in resp.incidents {
            match convert_incident(inc) {
                Some(incident) => incidents.push(incident),
                None => warn!("skipping incident with unknown status"),
            }
        }
        Ok(incidents)
    }
}

fn incident_query(filters: &IncidentFilters, user_id: &str) -> Vec<(String, String)> {
    let mut query = vec![
        ("limit".to_string(), PAGE_LIMIT.to_string()),
        ("sort_by".to_string(), "created_at:desc".to_string()),
    ];

    for status in &filters.statuses {
        query.push(("statuses[]".to_string(), status.as_str().to_string()));
    }
    for service_id in &filters.service_ids {
        query.push(("service_ids[]".to_string(), service_id.clone()));
    }
    if filters.assigned_to_me && !user_id.is_empty() {
        query.push(("user_ids[]".to_string(), user_id.to_string()));
    }
    if let Some(since) = filters.since {
        query.push(("since".to_string(), since.to_rfc3339()));
    }

    query
}

fn convert_incident(inc: ApiIncident) -> Option<Incident> {
    let status = IncidentStatus::parse(&inc.status)?;
    let assigned_user_ids = inc
        .assignments
        .into_iter()
        .map(|a| a.assignee.id)
        .collect();

    Some(Incident {
        id: inc.id,
        service_id: inc.service.map(|s| s.id).unwrap_or_default(),
        status,
        title: inc.title,
        description: inc.description.unwrap_or_default(),
        urgency: inc.urgency.unwrap_or_default(),
        incident_number: inc.incident_number,
        created_at: parse_timestamp(inc.created_at.as_deref()),
        updated_at: parse_timestamp(inc.last_status_change_at.as_deref()),
        assigned_user_ids,
        // The list endpoint does not expose escalation detail.
        escalation_level: 0,
        html_url: inc.html_url.unwrap_or_default(),
    })
}

fn parse_timestamp(raw: Option<&str>) -> DateTime<Utc> {
    raw.and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or(DateTime::UNIX_EPOCH)
}

#[derive(Deserialize)]
struct ListIncidentsResponse {
    #[serde(default)]
    incidents: Vec<ApiIncident>,
}

#[derive(Deserialize)]
struct ApiIncident {
    id: String,
    #[serde(default)]
    incident_number: i64,
    title: String,
    description: Option<String>,
    status: String,
    urgency: Option<String>,
    created_at: Option<String>,
    last_status_change_at: Option<String>,
    html_url: Option<String>,
    service: Option<ApiReference>,
    #[serde(default)]
    assignments: Vec<ApiAssignment>,
}

#[derive(Deserialize)]
struct ApiReference {
    id: String,
}

#[derive(Deserialize)]
struct ApiAssignment {
    assignee: ApiReference,
}

#[derive(Deserialize)]
struct ListServicesResponse {
    #[serde(default)]
    services: Vec<ApiService>,
}

#[derive(Deserialize)]
struct ApiService {
    id: String,
    name: String,
    description: Option<String>,
    status: Option<String>,
}

#[derive(Deserialize)]
struct ListAlertsResponse {
    #[serde(default)]
    alerts: Vec<ApiAlert>,
}

#[derive(Deserialize)]
struct ApiAlert {
    id: String,
    summary: Option<String>,
    status: Option<String>,
    created_at: Option<String>,
    body: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct CurrentUserResponse {
    user: ApiUser,
}

#[derive(Deserialize)]
struct ApiUser {
    id: String,
    email: String,
    name: String,
}
