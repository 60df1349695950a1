use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use thiserror::Error;

use agrolog_activities::{ActivityCategory, ActivityDetails, ActivityEvent, ActivityId, StockConsumption};
use agrolog_core::{AggregateId, OrganizationId};
use agrolog_events::EventEnvelope;
use agrolog_fields::FieldId;

use crate::read_model::OrgStore;

/// One row of the activity journal.
///
/// This is the source data for the compliance logbook: what was done, on
/// which field, when, and what stock it consumed.
#[derive(Debug, Clone, PartialEq)]
pub struct ActivityLogEntry {
    pub activity_id: ActivityId,
    pub field_id: FieldId,
    pub season: Option<String>,
    pub category: ActivityCategory,
    pub performed_at: DateTime<Utc>,
    pub details: ActivityDetails,
    pub consumed: Option<StockConsumption>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
struct CursorKey {
    organization_id: OrganizationId,
    aggregate_id: AggregateId,
}

#[derive(Debug, Error)]
pub enum ActivityLogProjectionError {
    #[error("failed to deserialize activity event: {0}")]
    Deserialize(String),

    #[error("organization isolation violation: {0}")]
    OrganizationIsolation(String),

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },
}

/// Activity log projection.
///
/// Maintains the per-organization activity journal; removed activities drop
/// out of the journal. Idempotent under at-least-once delivery via
/// per-stream cursors.
#[derive(Debug)]
pub struct ActivityLogProjection<S>
where
    S: OrgStore<ActivityId, ActivityLogEntry>,
{
    store: S,
    cursors: RwLock<HashMap<CursorKey, u64>>,
}

impl<S> ActivityLogProjection<S>
where
    S: OrgStore<ActivityId, ActivityLogEntry>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(
        &self,
        organization_id: OrganizationId,
        activity_id: &ActivityId,
    ) -> Option<ActivityLogEntry> {
        self.store.get(organization_id, activity_id)
    }

    /// The journal for an organization, oldest entry first.
    pub fn journal(&self, organization_id: OrganizationId) -> Vec<ActivityLogEntry> {
        let mut entries = self.store.list(organization_id);
        entries.sort_by_key(|e| (e.performed_at, e.activity_id.0.as_uuid().as_u128()));
        entries
    }

    /// Journal entries for one season (logbook view).
    pub fn logbook(&self, organization_id: OrganizationId, season: &str) -> Vec<ActivityLogEntry> {
        let mut entries = self.journal(organization_id);
        entries.retain(|e| e.season.as_deref() == Some(season));
        entries
    }

    /// Apply a published envelope into the projection.
    ///
    /// Same delivery contract as the inventory stock projection: organization
    /// isolation, monotonic per-stream sequence, replays ignored.
    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), ActivityLogProjectionError> {
        let organization_id = envelope.organization_id();
        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();

        if let Ok(mut cursors) = self.cursors.write() {
            let key = CursorKey {
                organization_id,
                aggregate_id,
            };
            let last = *cursors.get(&key).unwrap_or(&0);

            if seq == 0 {
                return Err(ActivityLogProjectionError::NonMonotonicSequence { last, found: seq });
            }

            if seq <= last {
                // Duplicate or replay; safe to ignore.
                return Ok(());
            }

            if seq != last + 1 && last != 0 {
                return Err(ActivityLogProjectionError::NonMonotonicSequence { last, found: seq });
            }

            let ev: ActivityEvent = serde_json::from_value(envelope.payload().clone())
                .map_err(|e| ActivityLogProjectionError::Deserialize(e.to_string()))?;

            let (event_org, activity_id) = match &ev {
                ActivityEvent::ActivityLogged(e) => (e.organization_id, e.activity_id),
                ActivityEvent::ActivityRevised(e) => (e.organization_id, e.activity_id),
                ActivityEvent::ActivityRemoved(e) => (e.organization_id, e.activity_id),
            };

            if event_org != organization_id {
                return Err(ActivityLogProjectionError::OrganizationIsolation(
                    "event organization_id does not match envelope organization_id".to_string(),
                ));
            }

            if activity_id.0 != aggregate_id {
                return Err(ActivityLogProjectionError::OrganizationIsolation(
                    "event activity_id does not match envelope aggregate_id".to_string(),
                ));
            }

            match ev {
                ActivityEvent::ActivityLogged(e) => {
                    let consumed = e.details.consumption();
                    self.store.upsert(
                        organization_id,
                        e.activity_id,
                        ActivityLogEntry {
                            activity_id: e.activity_id,
                            field_id: e.field_id,
                            season: e.season,
                            category: e.details.category(),
                            performed_at: e.performed_at,
                            details: e.details,
                            consumed,
                        },
                    );
                }
                ActivityEvent::ActivityRevised(e) => {
                    if let Some(mut entry) = self.store.get(organization_id, &e.activity_id) {
                        if let Some(performed_at) = e.performed_at {
                            entry.performed_at = performed_at;
                        }
                        entry.category = e.details.category();
                        entry.consumed = e.details.consumption();
                        entry.details = e.details;
                        self.store.upsert(organization_id, e.activity_id, entry);
                    }
                }
                ActivityEvent::ActivityRemoved(e) => {
                    self.store.remove(organization_id, &e.activity_id);
                }
            }

            cursors.insert(key, seq);
        }

        Ok(())
    }
}
