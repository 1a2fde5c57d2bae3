use crate::incident::{Incident, IncidentStatus};
use std::collections::HashMap;
use std::sync::Mutex;

/// Last-observed incident set, keyed by incident id. Replaced wholesale each
/// tick; the read-for-diff and the swap happen under one lock so no reader
/// ever sees a partially updated map.
#[derive(Default)]
pub struct SnapshotStore {
    inner: Mutex<HashMap<String, Incident>>,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classifies the newly relevant subset of `merged` against the current
    /// snapshot, then replaces the snapshot with exactly the merged set.
    ///
    /// An incident is newly relevant when its id was absent from the prior
    /// snapshot, or when it was present with a different status and the
    /// current status is `triggered`. Ids that vanished from the merge are
    /// silently dropped; disappearance is not an event.
    pub fn diff_and_replace(&self, merged: &[Incident]) -> Vec<Incident> {
        let mut guard = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let mut newly_relevant = Vec::new();
        let mut next = HashMap::with_capacity(merged.len());

        for incident in merged {
            if is_newly_relevant(guard.get(&incident.id), incident) {
                newly_relevant.push(incident.clone());
            }
            next.insert(incident.id.clone(), incident.clone());
        }

        *guard = next;
        newly_relevant
    }

    pub fn len(&self) -> usize {
        match self.inner.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sorted ids currently held, for external inspection.
    pub fn ids(&self) -> Vec<String> {
        let guard = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut ids: Vec<String> = guard.keys().cloned().collect();
        ids.sort();
        ids
    }
}

fn is_newly_relevant(previous: Option<&Incident>, current: &Incident) -> bool {
    match previous {
        None => true,
        Some(prev) => {
            prev.status != current.status && current.status == IncidentStatus::Triggered
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn incident(id: &str, status: IncidentStatus) -> Incident {
        Incident {
            id: id.into(),
            service_id: "svc-1".into(),
            status,
            title: format!("incident {id}"),
            description: String::new(),
            urgency: "high".into(),
            incident_number: 1,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            assigned_user_ids: Vec::new(),
            escalation_level: 0,
            html_url: String::new(),
        }
    }

    fn ids(incidents: &[Incident]) -> Vec<&str> {
        incidents.iter().map(|i| i.id.as_str()).collect()
    }

    #[test]
    fn unknown_id_is_newly_relevant_regardless_of_status() {
        let store = SnapshotStore::new();
        let merged = vec![
            incident("a", IncidentStatus::Triggered),
            incident("b", IncidentStatus::Acknowledged),
            incident("c", IncidentStatus::Resolved),
        ];

        let new = store.diff_and_replace(&merged);
        assert_eq!(ids(&new), vec!["a", "b", "c"]);
    }

    #[test]
    fn unchanged_status_is_not_newly_relevant() {
        let store = SnapshotStore::new();
        store.diff_and_replace(&[incident("a", IncidentStatus::Triggered)]);

        let new = store.diff_and_replace(&[incident("a", IncidentStatus::Triggered)]);
        assert!(new.is_empty());
    }

    #[test]
    fn retrigger_from_acknowledged_is_newly_relevant() {
        let store = SnapshotStore::new();
        store.diff_and_replace(&[incident("a", IncidentStatus::Acknowledged)]);

        let new = store.diff_and_replace(&[incident("a", IncidentStatus::Triggered)]);
        assert_eq!(ids(&new), vec!["a"]);
    }

    #[test]
    fn status_change_away_from_triggered_is_not_newly_relevant() {
        let store = SnapshotStore::new();
        store.diff_and_replace(&[incident("a", IncidentStatus::Triggered)]);

        let new = store.diff_and_replace(&[incident("a", IncidentStatus::Resolved)]);
        assert!(new.is_empty());
    }

    #[test]
    fn snapshot_holds_exactly_the_latest_merge() {
        let store = SnapshotStore::new();
        store.diff_and_replace(&[
            incident("a", IncidentStatus::Triggered),
            incident("b", IncidentStatus::Acknowledged),
        ]);
        assert_eq!(store.ids(), vec!["a", "b"]);

        // b ages out of the fetch window; it leaves the snapshot silently.
        let new = store.diff_and_replace(&[incident("a", IncidentStatus::Triggered)]);
        assert!(new.is_empty());
        assert_eq!(store.ids(), vec!["a"]);
    }

    #[test]
    fn three_tick_scenario() {
        let store = SnapshotStore::new();

        let new = store.diff_and_replace(&[
            incident("A", IncidentStatus::Triggered),
            incident("B", IncidentStatus::Acknowledged),
        ]);
        assert_eq!(ids(&new), vec!["A", "B"]);
        assert_eq!(store.ids(), vec!["A", "B"]);

        let new = store.diff_and_replace(&[
            incident("A", IncidentStatus::Acknowledged),
            incident("B", IncidentStatus::Acknowledged),
        ]);
        assert!(new.is_empty());
        assert_eq!(store.ids(), vec!["A", "B"]);

        let new = store.diff_and_replace(&[incident("A", IncidentStatus::Triggered)]);
        assert_eq!(ids(&new), vec!["A"]);
        assert_eq!(store.ids(), vec!["A"]);
    }
}
