use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use thiserror::Error;

use agrolog_core::{AggregateId, OrganizationId};
use agrolog_events::EventEnvelope;
use agrolog_inventory::{InventoryEvent, InventoryItemId, ItemCategory};

use crate::read_model::OrgStore;

/// Queryable inventory read model: current stock per item.
#[derive(Debug, Clone, PartialEq)]
pub struct InventoryReadModel {
    pub item_id: InventoryItemId,
    pub name: String,
    pub category: ItemCategory,
    pub unit: String,
    pub quantity: f64,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Organization+aggregate cursor to support at-least-once delivery
/// (idempotent projection).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
struct CursorKey {
    organization_id: OrganizationId,
    aggregate_id: AggregateId,
}

#[derive(Debug, Error)]
pub enum InventoryProjectionError {
    #[error("failed to deserialize inventory event: {0}")]
    Deserialize(String),

    #[error("organization isolation violation: {0}")]
    OrganizationIsolation(String),

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },
}

/// Inventory stock projection.
///
/// Consumes published envelopes (JSON payloads) and maintains an
/// organization-isolated read model. Read models are disposable and
/// rebuildable from the event stream.
#[derive(Debug)]
pub struct InventoryStockProjection<S>
where
    S: OrgStore<InventoryItemId, InventoryReadModel>,
{
    store: S,
    cursors: RwLock<HashMap<CursorKey, u64>>,
}

impl<S> InventoryStockProjection<S>
where
    S: OrgStore<InventoryItemId, InventoryReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: RwLock::new(HashMap::new()),
        }
    }

    /// Query read model for one organization/item.
    pub fn get(
        &self,
        organization_id: OrganizationId,
        item_id: &InventoryItemId,
    ) -> Option<InventoryReadModel> {
        self.store.get(organization_id, item_id)
    }

    /// List all items for an organization (disposable read model).
    pub fn list(&self, organization_id: OrganizationId) -> Vec<InventoryReadModel> {
        self.store.list(organization_id)
    }

    /// Apply a published envelope into the projection.
    ///
    /// - Enforces organization isolation
    /// - Enforces monotonic sequence per (organization, aggregate) stream
    /// - Idempotent for at-least-once delivery (replays <= cursor are ignored)
    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), InventoryProjectionError> {
        let organization_id = envelope.organization_id();
        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();

        // Cursor check (per organization + aggregate stream).
        if let Ok(mut cursors) = self.cursors.write() {
            let key = CursorKey {
                organization_id,
                aggregate_id,
            };
            let last = *cursors.get(&key).unwrap_or(&0);

            if seq == 0 {
                return Err(InventoryProjectionError::NonMonotonicSequence { last, found: seq });
            }

            if seq <= last {
                // Duplicate or replay; safe to ignore.
                return Ok(());
            }

            if seq != last + 1 && last != 0 {
                // The first event may land at any positive sequence (some
                // stores start above 1); after that, strict increments only.
                return Err(InventoryProjectionError::NonMonotonicSequence { last, found: seq });
            }

            // Deserialize the inventory event from payload.
            let inv: InventoryEvent = serde_json::from_value(envelope.payload().clone())
                .map_err(|e| InventoryProjectionError::Deserialize(e.to_string()))?;

            // Validate organization isolation at the event level.
            let (event_org, item_id) = match &inv {
                InventoryEvent::ItemRegistered(e) => (e.organization_id, e.item_id),
                InventoryEvent::StockReceived(e) => (e.organization_id, e.item_id),
                InventoryEvent::StockDebited(e) => (e.organization_id, e.item_id),
                InventoryEvent::StockCredited(e) => (e.organization_id, e.item_id),
            };

            if event_org != organization_id {
                return Err(InventoryProjectionError::OrganizationIsolation(
                    "event organization_id does not match envelope organization_id".to_string(),
                ));
            }

            if item_id.0 != aggregate_id {
                return Err(InventoryProjectionError::OrganizationIsolation(
                    "event item_id does not match envelope aggregate_id".to_string(),
                ));
            }

            // Apply update.
            match inv {
                InventoryEvent::ItemRegistered(e) => {
                    self.store.upsert(
                        organization_id,
                        e.item_id,
                        InventoryReadModel {
                            item_id: e.item_id,
                            name: e.name,
                            category: e.category,
                            unit: e.unit,
                            quantity: e.initial_quantity,
                            updated_at: Some(e.occurred_at),
                        },
                    );
                }
                InventoryEvent::StockReceived(e) => {
                    self.adjust(organization_id, e.item_id, e.quantity, e.occurred_at);
                }
                InventoryEvent::StockDebited(e) => {
                    self.adjust(organization_id, e.item_id, -e.quantity, e.occurred_at);
                }
                InventoryEvent::StockCredited(e) => {
                    self.adjust(organization_id, e.item_id, e.quantity, e.occurred_at);
                }
            }

            // Advance cursor after successful apply.
            cursors.insert(key, seq);
        }

        Ok(())
    }

    fn adjust(
        &self,
        organization_id: OrganizationId,
        item_id: InventoryItemId,
        delta: f64,
        occurred_at: DateTime<Utc>,
    ) {
        let mut rm = self
            .store
            .get(organization_id, &item_id)
            .unwrap_or(InventoryReadModel {
                item_id,
                name: String::new(),
                category: ItemCategory::Herbicide,
                unit: String::new(),
                quantity: 0.0,
                updated_at: None,
            });
        rm.quantity += delta;
        rm.updated_at = Some(occurred_at);
        self.store.upsert(organization_id, item_id, rm);
    }

    /// Rebuild the read model from scratch by replaying envelopes.
    pub fn rebuild_from_scratch(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), InventoryProjectionError> {
        // Reset cursors; read model values are disposable, but store is opaque.
        if let Ok(mut cursors) = self.cursors.write() {
            cursors.clear();
        }

        let mut envs: Vec<_> = envelopes.into_iter().collect();

        // Clear read model per organization before rebuilding.
        {
            let mut orgs = envs.iter().map(|e| e.organization_id()).collect::<Vec<_>>();
            orgs.sort_by_key(|o| *o.as_uuid().as_bytes());
            orgs.dedup();
            for o in orgs {
                self.store.clear_organization(o);
            }
        }

        // Deterministic replay order: organization, aggregate, sequence.
        envs.sort_by_key(|e| {
            (
                *e.organization_id().as_uuid().as_bytes(),
                *e.aggregate_id().as_uuid().as_bytes(),
                e.sequence_number(),
            )
        });

        for env in &envs {
            self.apply_envelope(env)?;
        }

        Ok(())
    }
}
