//! Process-wide incident registry.
//!
//! A single long-lived store holds every incident behind its own mutex. The
//! registry lock covers only create/list/lookup; all mutations on one
//! incident serialize on that incident's lock, and the registry lock is
//! never held while an incident lock is taken. Reads return a snapshot
//! consistent with the most recent completed write.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use tracing::info;
use uuid::Uuid;

use crate::canonical::CanonicalTable;
use crate::error::EngineError;
use crate::incident::{ApplyOutcome, Incident};
use crate::merge::MergePolicy;
use crate::types::{Claim, IncidentId, IncidentSnapshot};

/// Shared handle to one incident's serialized state.
pub type IncidentHandle = Arc<Mutex<Incident>>;

/// Registry of incidents, keyed by incident id.
#[derive(Debug)]
pub struct IncidentStore {
    /// id → (creation sequence, handle). The sequence gives clustering a
    /// stable creation order so the older incident wins exact score ties.
    incidents: RwLock<HashMap<IncidentId, (u64, IncidentHandle)>>,
    next_seq: AtomicU64,
    table: CanonicalTable,
    policy: MergePolicy,
}

impl Default for IncidentStore {
    fn default() -> Self {
        Self::new(CanonicalTable::default(), MergePolicy::default())
    }
}

impl IncidentStore {
    pub fn new(table: CanonicalTable, policy: MergePolicy) -> Self {
        Self {
            incidents: RwLock::new(HashMap::new()),
            next_seq: AtomicU64::new(0),
            table,
            policy,
        }
    }

    /// Fresh opaque incident id.
    pub fn new_incident_id() -> IncidentId {
        let hex = Uuid::new_v4().simple().to_string();
        format!("incident-{}", &hex[..12])
    }

    /// Get an incident by id, or create it under the given (or a fresh) id.
    ///
    /// Returns the resolved id, the handle, and whether the incident was
    /// created by this call.
    pub fn create(&self, id: Option<&str>) -> (IncidentId, IncidentHandle, bool) {
        let id = id
            .map(str::to_string)
            .unwrap_or_else(Self::new_incident_id);
        let mut incidents = self
            .incidents
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        match incidents.get(&id) {
            Some((_, handle)) => (id, Arc::clone(handle), false),
            None => {
                let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
                let handle = Arc::new(Mutex::new(Incident::new(id.clone(), Utc::now())));
                incidents.insert(id.clone(), (seq, Arc::clone(&handle)));
                info!(incident_id = %id, "incident created");
                (id, handle, true)
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<IncidentHandle> {
        self.incidents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .map(|(_, h)| Arc::clone(h))
    }

    /// Snapshot one incident.
    pub fn snapshot(&self, id: &str) -> Result<IncidentSnapshot, EngineError> {
        let handle = self
            .get(id)
            .ok_or_else(|| EngineError::UnknownIncident(id.to_string()))?;
        let incident = handle.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(incident.snapshot())
    }

    /// Apply a claim batch under the incident's lock. `now` is the
    /// observation clock (wall clock, or the chunk's `occurred_at` for
    /// backfill).
    ///
    /// The incident is re-resolved here: if it vanished between a clustering
    /// decision and the apply, it is recreated under the same id rather than
    /// failing the caller.
    pub fn apply(&self, id: &str, claims: &[Claim], now: DateTime<Utc>) -> ApplyOutcome {
        let (_, handle, _) = self.create(Some(id));
        let mut incident = handle.lock().unwrap_or_else(PoisonError::into_inner);
        incident.apply(claims, now, &self.table, &self.policy)
    }

    /// Snapshots of all incidents, ordered by `last_updated` descending
    /// (never-updated incidents sort last).
    pub fn list(&self) -> Vec<IncidentSnapshot> {
        let mut snapshots = self
            .entries()
            .into_iter()
            .map(|(_, s)| s)
            .collect::<Vec<_>>();
        snapshots.sort_by(|a, b| b.last_updated.cmp(&a.last_updated));
        snapshots
    }

    /// (id, snapshot) pairs in creation order — the candidate set clustering
    /// scores against.
    pub fn entries(&self) -> Vec<(IncidentId, IncidentSnapshot)> {
        let mut handles: Vec<(u64, IncidentId, IncidentHandle)> = {
            let incidents = self
                .incidents
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            incidents
                .iter()
                .map(|(id, (seq, h))| (*seq, id.clone(), Arc::clone(h)))
                .collect()
        };
        handles.sort_by_key(|(seq, _, _)| *seq);
        handles
            .into_iter()
            .map(|(_, id, handle)| {
                let snapshot = handle
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .snapshot();
                (id, snapshot)
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.incidents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn canonical_table(&self) -> &CanonicalTable {
        &self.table
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Claim, ClaimType};
    use chrono::Utc;

    #[test]
    fn test_create_with_and_without_id() {
        let store = IncidentStore::default();
        let (id, _, created) = store.create(Some("incident-007"));
        assert_eq!(id, "incident-007");
        assert!(created);
        let (_, _, created_again) = store.create(Some("incident-007"));
        assert!(!created_again);

        let (fresh, _, _) = store.create(None);
        assert!(fresh.starts_with("incident-"));
        assert_eq!(fresh.len(), "incident-".len() + 12);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_snapshot_unknown_incident() {
        let store = IncidentStore::default();
        assert!(matches!(
            store.snapshot("incident-missing"),
            Err(EngineError::UnknownIncident(_))
        ));
    }

    #[test]
    fn test_list_orders_by_last_updated_desc() {
        let store = IncidentStore::default();
        store.create(Some("incident-a"));
        store.create(Some("incident-b"));
        let claim =
            Claim::new(ClaimType::IncidentType, "fire", 0.7, "fire", Utc::now()).unwrap();
        store.apply("incident-b", &[claim], Utc::now());
        let list = store.list();
        assert_eq!(list[0].incident_id, "incident-b");
        assert_eq!(list[1].incident_id, "incident-a");
    }

    #[test]
    fn test_apply_recreates_vanished_incident() {
        let store = IncidentStore::default();
        let claim =
            Claim::new(ClaimType::IncidentType, "fire", 0.7, "fire", Utc::now()).unwrap();
        let outcome = store.apply("incident-ghost", &[claim], Utc::now());
        assert_eq!(outcome.claims_added, 1);
        assert!(store.get("incident-ghost").is_some());
    }

    #[test]
    fn test_entries_in_creation_order() {
        let store = IncidentStore::default();
        store.create(Some("incident-z"));
        store.create(Some("incident-a"));
        let entries = store.entries();
        assert_eq!(entries[0].0, "incident-z");
        assert_eq!(entries[1].0, "incident-a");
    }
}
