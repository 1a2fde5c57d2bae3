use crate::incident::{CachedIncident, DraftNote, IncidentStatus, Service, Template, User};
use base64::Engine;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const SETTING_API_KEY: &str = "api_key";
pub const SETTING_THEME: &str = "theme";
pub const SETTING_ASSIGNED_ONLY: &str = "assigned_only";
pub const SETTING_REDIRECT_ENABLED: &str = "redirect_enabled";
pub const SETTING_SOUND_PATH: &str = "sound_path";
pub const SETTING_SOUND_ENABLED: &str = "sound_enabled";

#[derive(Clone)]
pub struct Repository {
    db_path: Arc<PathBuf>,
}

impl Repository {
    pub fn open(path: &str) -> Result<Self, String> {
        let db_path = PathBuf::from(path);
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| e.to_string())?;
            }
        }

        let conn = Connection::open(&db_path).map_err(|e| e.to_string())?;
        conn.execute_batch(
            "
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS services (
                id TEXT PRIMARY KEY,
                alias TEXT NOT NULL,
                enabled INTEGER NOT NULL DEFAULT 1
            );
            CREATE TABLE IF NOT EXISTS user (
                id TEXT PRIMARY KEY,
                email TEXT NOT NULL,
                name TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS incidents (
                id TEXT PRIMARY KEY,
                service_id TEXT NOT NULL,
                status TEXT NOT NULL,
                title TEXT NOT NULL,
                description TEXT,
                urgency TEXT,
                incident_number INTEGER,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                pinned INTEGER NOT NULL DEFAULT 0,
                assigned_user_ids TEXT DEFAULT '[]',
                escalation_level INTEGER DEFAULT 0,
                html_url TEXT
            );
            CREATE TABLE IF NOT EXISTS draft_notes (
                incident_id TEXT PRIMARY KEY,
                note_text TEXT,
                why_triggered TEXT,
                impact TEXT,
                actions TEXT,
                links TEXT,
                last_updated TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS templates (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                body_text TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_incidents_status ON incidents(status);
            CREATE INDEX IF NOT EXISTS idx_incidents_service ON incidents(service_id);
            CREATE INDEX IF NOT EXISTS idx_incidents_updated ON incidents(updated_at);
            ",
        )
        .map_err(|e| e.to_string())?;

        Ok(Self {
            db_path: Arc::new(db_path),
        })
    }

    fn connect(&self) -> Result<Connection, String> {
        Connection::open(&*self.db_path).map_err(|e| e.to_string())
    }

    // Settings

    pub fn get_setting(&self, key: &str) -> Result<String, String> {
        let conn = self.connect()?;
        conn.query_row(
            "SELECT value FROM settings WHERE key = ?1",
            params![key],
            |row| row.get::<_, String>(0),
        )
        .optional()
        .map_err(|e| e.to_string())
        .map(Option::unwrap_or_default)
    }

    pub fn get_bool_setting(&self, key: &str) -> Result<bool, String> {
        Ok(self.get_setting(key)? == "true")
    }

    pub fn set_setting(&self, key: &str, value: &str) -> Result<(), String> {
        // The API key is obfuscated at the storage boundary.
        let stored = if key == SETTING_API_KEY && !value.is_empty() {
            encrypt_value(value)
        } else {
            value.to_string()
        };

        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO settings (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, stored],
        )
        .map_err(|e| e.to_string())?;
        Ok(())
    }

    pub fn get_api_key(&self) -> Result<String, String> {
        let stored = self.get_setting(SETTING_API_KEY)?;
        if stored.is_empty() {
            return Ok(String::new());
        }
        decrypt_value(&stored)
    }

    // Services

    pub fn get_services(&self) -> Result<Vec<Service>, String> {
        let conn = self.connect()?;
        let mut stmt = conn
            .prepare("SELECT id, alias, enabled FROM services ORDER BY alias")
            .map_err(|e| e.to_string())?;

        let rows = stmt
            .query_map([], |row| {
                Ok(Service {
                    id: row.get(0)?,
                    alias: row.get(1)?,
                    enabled: row.get(2)?,
                })
            })
            .map_err(|e| e.to_string())?;

        let mut services = Vec::new();
        for row in rows {
            services.push(row.map_err(|e| e.to_string())?);
        }
        Ok(services)
    }

    pub fn enabled_service_ids(&self) -> Result<Vec<String>, String> {
        Ok(self
            .get_services()?
            .into_iter()
            .filter(|s| s.enabled)
            .map(|s| s.id)
            .collect())
    }

    pub fn upsert_service(&self, service: &Service) -> Result<(), String> {
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO services (id, alias, enabled) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET alias = excluded.alias, enabled = excluded.enabled",
            params![service.id, service.alias, service.enabled],
        )
        .map_err(|e| e.to_string())?;
        Ok(())
    }

    pub fn delete_service(&self, id: &str) -> Result<(), String> {
        let conn = self.connect()?;
        conn.execute("DELETE FROM services WHERE id = ?1", params![id])
            .map_err(|e| e.to_string())?;
        Ok(())
    }

    pub fn toggle_service(&self, id: &str, enabled: bool) -> Result<(), String> {
        let conn = self.connect()?;
        conn.execute(
            "UPDATE services SET enabled = ?1 WHERE id = ?2",
            params![enabled, id],
        )
        .map_err(|e| e.to_string())?;
        Ok(())
    }

    // User

    pub fn get_user(&self) -> Result<Option<User>, String> {
        let conn = self.connect()?;
        conn.query_row("SELECT id, email, name FROM user LIMIT 1", [], |row| {
            Ok(User {
                id: row.get(0)?,
                email: row.get(1)?,
                name: row.get(2)?,
            })
        })
        .optional()
        .map_err(|e| e.to_string())
    }

    pub fn set_user(&self, user: &User) -> Result<(), String> {
        let conn = self.connect()?;
        conn.execute("DELETE FROM user", [])
            .map_err(|e| e.to_string())?;
        conn.execute(
            "INSERT INTO user (id, email, name) VALUES (?1, ?2, ?3)",
            params![user.id, user.email, user.name],
        )
        .map_err(|e| e.to_string())?;
        Ok(())
    }

    // Incidents

    pub fn get_incidents(&self, statuses: &[IncidentStatus]) -> Result<Vec<CachedIncident>, String> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; statuses.len()].join(", ");
        let sql = format!(
            "SELECT id, service_id, status, title, description, urgency, incident_number,
                    created_at, updated_at, pinned, assigned_user_ids, escalation_level, html_url
             FROM incidents
             WHERE status IN ({placeholders})
             ORDER BY pinned DESC, created_at DESC"
        );

        let conn = self.connect()?;
        let mut stmt = conn.prepare(&sql).map_err(|e| e.to_string())?;
        let rows = stmt
            .query_map(
                rusqlite::params_from_iter(statuses.iter().map(|s| s.as_str())),
                map_incident_row,
            )
            .map_err(|e| e.to_string())?;

        let mut incidents = Vec::new();
        for row in rows {
            incidents.push(row.map_err(|e| e.to_string())?);
        }
        Ok(incidents)
    }

    /// Insert-or-update keyed by id. Remote-derived fields are overwritten;
    /// `pinned` and `created_at` are deliberately absent from the conflict
    /// clause so local pin state survives every upsert.
    pub fn upsert_incident(&self, incident: &CachedIncident) -> Result<(), String> {
        let assigned =
            serde_json::to_string(&incident.assigned_user_ids).map_err(|e| e.to_string())?;
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO incidents (
                 id, service_id, status, title, description, urgency,
                 incident_number, created_at, updated_at, pinned,
                 assigned_user_ids, escalation_level, html_url
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
             ON CONFLICT(id) DO UPDATE SET
                 status = excluded.status,
                 title = excluded.title,
                 description = excluded.description,
                 urgency = excluded.urgency,
                 updated_at = excluded.updated_at,
                 assigned_user_ids = excluded.assigned_user_ids,
                 escalation_level = excluded.escalation_level",
            params![
                incident.id,
                incident.service_id,
                incident.status.as_str(),
                incident.title,
                incident.description,
                incident.urgency,
                incident.incident_number,
                incident.created_at.to_rfc3339(),
                incident.updated_at.to_rfc3339(),
                incident.pinned,
                assigned,
                incident.escalation_level,
                incident.html_url,
            ],
        )
        .map_err(|e| e.to_string())?;
        Ok(())
    }

    pub fn pin_incident(&self, id: &str, pinned: bool) -> Result<(), String> {
        let conn = self.connect()?;
        conn.execute(
            "UPDATE incidents SET pinned = ?1 WHERE id = ?2",
            params![pinned, id],
        )
        .map_err(|e| e.to_string())?;
        Ok(())
    }

    /// Retention: resolved incidents whose last update predates `older_than`
    /// are dropped from the cache.
    pub fn clean_old_incidents(&self, older_than: DateTime<Utc>) -> Result<(), String> {
        let conn = self.connect()?;
        conn.execute(
            "DELETE FROM incidents WHERE status = 'resolved' AND updated_at < ?1",
            params![older_than.to_rfc3339()],
        )
        .map_err(|e| e.to_string())?;
        Ok(())
    }

    // Draft notes

    pub fn get_draft_note(&self, incident_id: &str) -> Result<Option<DraftNote>, String> {
        let conn = self.connect()?;
        conn.query_row(
            "SELECT incident_id, note_text, why_triggered, impact, actions, links, last_updated
             FROM draft_notes WHERE incident_id = ?1",
            params![incident_id],
            |row| {
                Ok(DraftNote {
                    incident_id: row.get(0)?,
                    note_text: row.get(1)?,
                    why_triggered: row.get(2)?,
                    impact: row.get(3)?,
                    actions: row.get(4)?,
                    links: row.get(5)?,
                    last_updated: row.get(6)?,
                })
            },
        )
        .optional()
        .map_err(|e| e.to_string())
    }

    pub fn save_draft_note(&self, note: &DraftNote) -> Result<(), String> {
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO draft_notes (
                 incident_id, note_text, why_triggered, impact, actions, links, last_updated
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(incident_id) DO UPDATE SET
                 note_text = excluded.note_text,
                 why_triggered = excluded.why_triggered,
                 impact = excluded.impact,
                 actions = excluded.actions,
                 links = excluded.links,
                 last_updated = excluded.last_updated",
            params![
                note.incident_id,
                note.note_text,
                note.why_triggered,
                note.impact,
                note.actions,
                note.links,
                Utc::now().to_rfc3339(),
            ],
        )
        .map_err(|e| e.to_string())?;
        Ok(())
    }

    // Templates

    pub fn get_templates(&self) -> Result<Vec<Template>, String> {
        let conn = self.connect()?;
        let mut stmt = conn
            .prepare("SELECT id, title, body_text FROM templates ORDER BY title")
            .map_err(|e| e.to_string())?;

        let rows = stmt
            .query_map([], |row| {
                Ok(Template {
                    id: row.get(0)?,
                    title: row.get(1)?,
                    body_text: row.get(2)?,
                })
            })
            .map_err(|e| e.to_string())?;

        let mut templates = Vec::new();
        for row in rows {
            templates.push(row.map_err(|e| e.to_string())?);
        }
        Ok(templates)
    }

    pub fn save_template(&self, template: &Template) -> Result<(), String> {
        let conn = self.connect()?;
        if template.id == 0 {
            conn.execute(
                "INSERT INTO templates (title, body_text) VALUES (?1, ?2)",
                params![template.title, template.body_text],
            )
            .map_err(|e| e.to_string())?;
        } else {
            conn.execute(
                "UPDATE templates SET title = ?1, body_text = ?2 WHERE id = ?3",
                params![template.title, template.body_text, template.id],
            )
            .map_err(|e| e.to_string())?;
        }
        Ok(())
    }

    pub fn delete_template(&self, id: i64) -> Result<(), String> {
        let conn = self.connect()?;
        conn.execute("DELETE FROM templates WHERE id = ?1", params![id])
            .map_err(|e| e.to_string())?;
        Ok(())
    }
}

fn map_incident_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<CachedIncident> {
    let status_str: String = row.get(2)?;
    let status = IncidentStatus::parse(&status_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            rusqlite::types::Type::Text,
            format!("unknown incident status: {status_str}").into(),
        )
    })?;

    let assigned_str: Option<String> = row.get(10)?;
    let assigned_user_ids: Vec<String> = match assigned_str {
        Some(s) => serde_json::from_str(&s).map_err(|err| {
            rusqlite::Error::FromSqlConversionFailure(10, rusqlite::types::Type::Text, Box::new(err))
        })?,
        None => Vec::new(),
    };

    Ok(CachedIncident {
        id: row.get(0)?,
        service_id: row.get(1)?,
        status,
        title: row.get(3)?,
        description: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
        urgency: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
        incident_number: row.get::<_, Option<i64>>(6)?.unwrap_or_default(),
        created_at: parse_timestamp_column(row, 7)?,
        updated_at: parse_timestamp_column(row, 8)?,
        pinned: row.get(9)?,
        assigned_user_ids,
        escalation_level: row.get::<_, Option<i64>>(11)?.unwrap_or_default(),
        html_url: row.get::<_, Option<String>>(12)?.unwrap_or_default(),
    })
}

fn parse_timestamp_column(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|err| {
            rusqlite::Error::FromSqlConversionFailure(
                idx,
                rusqlite::types::Type::Text,
                Box::new(err),
            )
        })
}

fn encrypt_value(value: &str) -> String {
    let encoded = base64::engine::general_purpose::STANDARD.encode(value.as_bytes());
    format!("enc:{encoded}")
}

fn decrypt_value(stored: &str) -> Result<String, String> {
    // Plain values predate obfuscation and pass through unchanged.
    let Some(encoded) = stored.strip_prefix("enc:") else {
        return Ok(stored.to_string());
    };

    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|e| e.to_string())?;
    String::from_utf8(decoded).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn db_path(name: &str) -> String {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time")
            .as_nanos();
        format!("/tmp/pager-ops-tests/{name}-{nanos}.db")
    }

    fn sample_incident(id: &str, status: IncidentStatus, updated_at: DateTime<Utc>) -> CachedIncident {
        CachedIncident {
            id: id.into(),
            service_id: "svc-1".into(),
            status,
            title: format!("incident {id}"),
            description: "details".into(),
            urgency: "high".into(),
            incident_number: 7,
            created_at: updated_at - Duration::hours(1),
            updated_at,
            pinned: false,
            assigned_user_ids: vec!["usr-1".into()],
            escalation_level: 0,
            html_url: format!("https://example.pagerduty.com/incidents/{id}"),
        }
    }

    #[test]
    fn setting_roundtrip_and_missing_key_is_empty() {
        let repo = Repository::open(&db_path("settings")).expect("open");
        assert_eq!(repo.get_setting(SETTING_THEME).expect("get"), "");

        repo.set_setting(SETTING_THEME, "dark").expect("set");
        assert_eq!(repo.get_setting(SETTING_THEME).expect("get"), "dark");

        repo.set_setting(SETTING_ASSIGNED_ONLY, "true").expect("set");
        assert!(repo.get_bool_setting(SETTING_ASSIGNED_ONLY).expect("bool"));
        assert!(!repo.get_bool_setting(SETTING_REDIRECT_ENABLED).expect("bool"));
    }

    #[test]
    fn api_key_is_obfuscated_at_rest() {
        let repo = Repository::open(&db_path("api-key")).expect("open");
        repo.set_setting(SETTING_API_KEY, "u+abc123").expect("set");

        let stored = repo.get_setting(SETTING_API_KEY).expect("raw");
        assert!(stored.starts_with("enc:"));
        assert_ne!(stored, "u+abc123");

        assert_eq!(repo.get_api_key().expect("key"), "u+abc123");
    }

    #[test]
    fn legacy_plain_api_key_reads_back_unchanged() {
        let repo = Repository::open(&db_path("api-key-legacy")).expect("open");
        // Simulate a pre-obfuscation row.
        let conn = Connection::open(repo.db_path.as_path()).expect("conn");
        conn.execute(
            "INSERT INTO settings (key, value) VALUES (?1, ?2)",
            params![SETTING_API_KEY, "plain-key"],
        )
        .expect("insert");

        assert_eq!(repo.get_api_key().expect("key"), "plain-key");
    }

    #[test]
    fn enabled_service_ids_filters_disabled() {
        let repo = Repository::open(&db_path("services")).expect("open");
        repo.upsert_service(&Service {
            id: "svc-a".into(),
            alias: "checkout".into(),
            enabled: true,
        })
        .expect("upsert");
        repo.upsert_service(&Service {
            id: "svc-b".into(),
            alias: "billing".into(),
            enabled: true,
        })
        .expect("upsert");
        repo.toggle_service("svc-b", false).expect("toggle");

        assert_eq!(repo.enabled_service_ids().expect("ids"), vec!["svc-a"]);
    }

    #[test]
    fn upsert_preserves_pin_flag() {
        let repo = Repository::open(&db_path("pin")).expect("open");
        let now = Utc::now();

        repo.upsert_incident(&sample_incident("inc-1", IncidentStatus::Triggered, now))
            .expect("insert");
        repo.pin_incident("inc-1", true).expect("pin");

        // A later remote upsert carries no pin information.
        let mut refreshed = sample_incident("inc-1", IncidentStatus::Acknowledged, now);
        refreshed.title = "updated title".into();
        repo.upsert_incident(&refreshed).expect("upsert");

        let rows = repo
            .get_incidents(&[IncidentStatus::Acknowledged])
            .expect("query");
        assert_eq!(rows.len(), 1);
        assert!(rows[0].pinned);
        assert_eq!(rows[0].title, "updated title");
    }

    #[test]
    fn get_incidents_filters_by_status_and_orders_pinned_first() {
        let repo = Repository::open(&db_path("query")).expect("open");
        let now = Utc::now();

        repo.upsert_incident(&sample_incident("inc-old", IncidentStatus::Triggered, now))
            .expect("insert");
        let newer = sample_incident("inc-new", IncidentStatus::Triggered, now + Duration::hours(2));
        repo.upsert_incident(&newer).expect("insert");
        repo.upsert_incident(&sample_incident("inc-res", IncidentStatus::Resolved, now))
            .expect("insert");
        repo.pin_incident("inc-old", true).expect("pin");

        let rows = repo
            .get_incidents(&[IncidentStatus::Triggered])
            .expect("query");
        let ids: Vec<&str> = rows.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["inc-old", "inc-new"]);

        assert!(repo
            .get_incidents(&[])
            .expect("empty filter")
            .is_empty());
    }

    #[test]
    fn retention_drops_resolved_past_cutoff_only() {
        let repo = Repository::open(&db_path("retention")).expect("open");
        let now = Utc::now();

        repo.upsert_incident(&sample_incident(
            "inc-stale",
            IncidentStatus::Resolved,
            now - Duration::hours(49),
        ))
        .expect("insert");
        repo.upsert_incident(&sample_incident(
            "inc-fresh",
            IncidentStatus::Resolved,
            now - Duration::hours(47),
        ))
        .expect("insert");
        repo.upsert_incident(&sample_incident(
            "inc-open",
            IncidentStatus::Triggered,
            now - Duration::hours(72),
        ))
        .expect("insert");

        repo.clean_old_incidents(now - Duration::hours(48))
            .expect("clean");

        let resolved = repo
            .get_incidents(&[IncidentStatus::Resolved])
            .expect("resolved");
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].id, "inc-fresh");

        // Retention never touches non-resolved rows.
        let open = repo
            .get_incidents(&[IncidentStatus::Triggered])
            .expect("open rows");
        assert_eq!(open.len(), 1);
    }

    #[test]
    fn user_replace_keeps_single_row() {
        let repo = Repository::open(&db_path("user")).expect("open");
        assert!(repo.get_user().expect("none").is_none());

        repo.set_user(&User {
            id: "usr-1".into(),
            email: "a@example.com".into(),
            name: "A".into(),
        })
        .expect("set");
        repo.set_user(&User {
            id: "usr-2".into(),
            email: "b@example.com".into(),
            name: "B".into(),
        })
        .expect("set");

        let user = repo.get_user().expect("get").expect("some");
        assert_eq!(user.id, "usr-2");
    }

    #[test]
    fn draft_note_upsert_overwrites_fields() {
        let repo = Repository::open(&db_path("notes")).expect("open");
        let mut note = DraftNote {
            incident_id: "inc-1".into(),
            note_text: "first".into(),
            ..DraftNote::default()
        };
        repo.save_draft_note(&note).expect("save");

        note.note_text = "second".into();
        note.impact = "checkout down".into();
        repo.save_draft_note(&note).expect("save again");

        let loaded = repo.get_draft_note("inc-1").expect("get").expect("some");
        assert_eq!(loaded.note_text, "second");
        assert_eq!(loaded.impact, "checkout down");
        assert!(repo.get_draft_note("inc-2").expect("get").is_none());
    }

    #[test]
    fn template_crud() {
        let repo = Repository::open(&db_path("templates")).expect("open");
        repo.save_template(&Template {
            id: 0,
            title: "postmortem".into(),
            body_text: "what happened".into(),
        })
        .expect("insert");

        let mut templates = repo.get_templates().expect("list");
        assert_eq!(templates.len(), 1);

        let mut existing = templates.remove(0);
        existing.body_text = "what happened and why".into();
        repo.save_template(&existing).expect("update");

        let templates = repo.get_templates().expect("list");
        assert_eq!(templates[0].body_text, "what happened and why");

        repo.delete_template(templates[0].id).expect("delete");
        assert!(repo.get_templates().expect("list").is_empty());
    }
}
