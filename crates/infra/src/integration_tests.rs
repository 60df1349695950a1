//! Integration tests for the full event-sourced pipeline.
//!
//! Tests: Ledger → EventStore → EventBus → Projections → ReadModels
//!
//! Verifies:
//! - Activity lifecycle keeps inventory stock consistent (log/revise/remove)
//! - A failed debit aborts the enclosing activity mutation
//! - Organization isolation and optimistic concurrency are preserved

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;

    use agrolog_activities::{
        ActivityCategory, ActivityDetails, ActivityId, LogActivity, RemoveActivity, ReviseActivity,
    };
    use agrolog_core::{AggregateId, ExpectedVersion, OrganizationId};
    use agrolog_events::{EventBus, EventEnvelope, InMemoryEventBus};
    use agrolog_fields::{AssignCrop, Field, FieldCommand, FieldId, RegisterField};
    use agrolog_inventory::{
        InventoryCommand, InventoryItem, InventoryItemId, ItemCategory, RegisterItem,
    };

    use crate::command_dispatcher::{CommandDispatcher, DispatchError};
    use crate::event_store::{EventStore, EventStoreError, InMemoryEventStore, UncommittedEvent};
    use crate::ledger::ConsumptionLedger;
    use crate::projections::activity_log::{ActivityLogEntry, ActivityLogProjection};
    use crate::projections::inventory_stock::{InventoryReadModel, InventoryStockProjection};
    use crate::read_model::InMemoryOrgStore;

    type Bus = Arc<InMemoryEventBus<EventEnvelope<serde_json::Value>>>;
    type Ledger = ConsumptionLedger<Arc<InMemoryEventStore>, Bus>;
    type StockProjection =
        Arc<InventoryStockProjection<Arc<InMemoryOrgStore<InventoryItemId, InventoryReadModel>>>>;
    type JournalProjection =
        Arc<ActivityLogProjection<Arc<InMemoryOrgStore<ActivityId, ActivityLogEntry>>>>;

    fn setup() -> (Ledger, StockProjection, JournalProjection, Arc<InMemoryEventStore>) {
        agrolog_observability::init();

        let store = Arc::new(InMemoryEventStore::new());
        let bus: Bus = Arc::new(InMemoryEventBus::new());
        let ledger = ConsumptionLedger::new(CommandDispatcher::new(store.clone(), bus.clone()));

        let stock = Arc::new(InventoryStockProjection::new(Arc::new(
            InMemoryOrgStore::new(),
        )));
        let journal = Arc::new(ActivityLogProjection::new(Arc::new(InMemoryOrgStore::new())));

        // Subscribe each projection to the bus BEFORE any events are published.
        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<()>();
        {
            let stock = stock.clone();
            let sub = bus.subscribe();
            let ready_tx = ready_tx.clone();
            std::thread::spawn(move || {
                let _ = ready_tx.send(());
                while let Ok(env) = sub.recv() {
                    if env.aggregate_type() == "inventory.item" {
                        if let Err(e) = stock.apply_envelope(&env) {
                            eprintln!("Failed to apply inventory envelope: {e:?}");
                        }
                    }
                }
            });
        }
        {
            let journal = journal.clone();
            let sub = bus.subscribe();
            let ready_tx = ready_tx.clone();
            std::thread::spawn(move || {
                let _ = ready_tx.send(());
                while let Ok(env) = sub.recv() {
                    if env.aggregate_type() == "activity" {
                        if let Err(e) = journal.apply_envelope(&env) {
                            eprintln!("Failed to apply activity envelope: {e:?}");
                        }
                    }
                }
            });
        }
        // Ensure subscribers are ready before returning (prevents missing early events).
        for _ in 0..2 {
            let _ = ready_rx.recv_timeout(std::time::Duration::from_secs(1));
        }

        (ledger, stock, journal, store)
    }

    /// Helper: Wait a short time for events to be processed.
    /// The subscriber threads process events synchronously.
    fn wait_for_processing() {
        std::thread::sleep(std::time::Duration::from_millis(50));
    }

    fn register_item(
        ledger: &Ledger,
        organization_id: OrganizationId,
        name: &str,
        category: ItemCategory,
        quantity: f64,
        unit: &str,
    ) -> InventoryItemId {
        let item_id = InventoryItemId::new(AggregateId::new());
        ledger
            .dispatcher()
            .dispatch(
                organization_id,
                item_id.0,
                "inventory.item",
                InventoryCommand::RegisterItem(RegisterItem {
                    organization_id,
                    item_id,
                    name: name.to_string(),
                    category,
                    unit: unit.to_string(),
                    initial_quantity: quantity,
                    occurred_at: Utc::now(),
                }),
                |_, id| InventoryItem::empty(InventoryItemId::new(id)),
            )
            .unwrap();
        item_id
    }

    fn treatment(chemical_id: Option<InventoryItemId>, dose: f64, area: f64) -> ActivityDetails {
        ActivityDetails::ChemicalTreatment {
            chemical_id,
            dose,
            treated_area: area,
            target: None,
        }
    }

    fn log_cmd(
        organization_id: OrganizationId,
        details: ActivityDetails,
    ) -> (ActivityId, LogActivity) {
        let activity_id = ActivityId::new(AggregateId::new());
        let cmd = LogActivity {
            organization_id,
            activity_id,
            field_id: FieldId::new(AggregateId::new()),
            season: Some("2025/2026".to_string()),
            performed_at: Utc::now(),
            details,
            occurred_at: Utc::now(),
        };
        (activity_id, cmd)
    }

    fn revise_cmd(
        organization_id: OrganizationId,
        activity_id: ActivityId,
        details: ActivityDetails,
    ) -> ReviseActivity {
        ReviseActivity {
            organization_id,
            activity_id,
            performed_at: None,
            details,
            occurred_at: Utc::now(),
        }
    }

    fn stock_of(
        projection: &StockProjection,
        organization_id: OrganizationId,
        item_id: &InventoryItemId,
    ) -> f64 {
        projection.get(organization_id, item_id).unwrap().quantity
    }

    #[test]
    fn treatment_debits_dose_times_area() {
        let (ledger, stock, journal, _) = setup();
        let organization_id = OrganizationId::new();
        let item_id = register_item(
            &ledger,
            organization_id,
            "Glyphosate 360 SL",
            ItemCategory::Herbicide,
            100.0,
            "l",
        );

        let (activity_id, cmd) = log_cmd(organization_id, treatment(Some(item_id), 2.0, 10.0));
        let consumed = ledger.log_activity(cmd).unwrap();
        assert_eq!(consumed, Some(item_id));

        wait_for_processing();

        assert_eq!(stock_of(&stock, organization_id, &item_id), 80.0);

        let entry = journal.get(organization_id, &activity_id).unwrap();
        assert_eq!(entry.category, ActivityCategory::ChemicalTreatment);
        let consumed = entry.consumed.unwrap();
        assert_eq!(consumed.item_id, item_id);
        assert_eq!(consumed.quantity, 20.0);
    }

    #[test]
    fn over_consumption_aborts_activity_and_leaves_stock() {
        let (ledger, stock, journal, _) = setup();
        let organization_id = OrganizationId::new();
        let item_id = register_item(
            &ledger,
            organization_id,
            "Glyphosate 360 SL",
            ItemCategory::Herbicide,
            100.0,
            "l",
        );

        let (_, first) = log_cmd(organization_id, treatment(Some(item_id), 2.0, 10.0));
        ledger.log_activity(first).unwrap();

        // Requires 100 but only 80 remain.
        let (second_id, second) = log_cmd(organization_id, treatment(Some(item_id), 5.0, 20.0));
        let err = ledger.log_activity(second).unwrap_err();
        match err {
            DispatchError::InsufficientQuantity {
                available,
                required,
                unit,
            } => {
                assert_eq!(available, 80.0);
                assert_eq!(required, 100.0);
                assert_eq!(unit, "l");
            }
            other => panic!("Expected InsufficientQuantity, got {other:?}"),
        }

        wait_for_processing();

        // Stock unchanged, and the rejected activity was never persisted.
        assert_eq!(stock_of(&stock, organization_id, &item_id), 80.0);
        assert!(journal.get(organization_id, &second_id).is_none());
        let rejected = ledger
            .dispatcher()
            .load(organization_id, second_id.0, |_, id| {
                agrolog_activities::Activity::empty(ActivityId::new(id))
            })
            .unwrap();
        assert!(!rejected.is_live());
        assert_eq!(journal.journal(organization_id).len(), 1);
    }

    #[test]
    fn revision_applies_net_difference_on_same_item() {
        let (ledger, stock, journal, _) = setup();
        let organization_id = OrganizationId::new();
        let item_id = register_item(
            &ledger,
            organization_id,
            "Glyphosate 360 SL",
            ItemCategory::Herbicide,
            100.0,
            "l",
        );

        let (activity_id, cmd) = log_cmd(organization_id, treatment(Some(item_id), 2.0, 10.0));
        ledger.log_activity(cmd).unwrap();

        // 20 was debited; the revision needs 10, so 10 comes back.
        let consumed = ledger
            .revise_activity(revise_cmd(
                organization_id,
                activity_id,
                treatment(Some(item_id), 1.0, 10.0),
            ))
            .unwrap();
        assert_eq!(consumed, Some(item_id));

        wait_for_processing();

        assert_eq!(stock_of(&stock, organization_id, &item_id), 90.0);
        let entry = journal.get(organization_id, &activity_id).unwrap();
        assert_eq!(entry.consumed.unwrap().quantity, 10.0);
    }

    #[test]
    fn removal_credits_stored_consumption_back() {
        let (ledger, stock, journal, _) = setup();
        let organization_id = OrganizationId::new();
        let item_id = register_item(
            &ledger,
            organization_id,
            "Glyphosate 360 SL",
            ItemCategory::Herbicide,
            100.0,
            "l",
        );

        let (activity_id, cmd) = log_cmd(organization_id, treatment(Some(item_id), 2.0, 10.0));
        ledger.log_activity(cmd).unwrap();
        ledger
            .revise_activity(revise_cmd(
                organization_id,
                activity_id,
                treatment(Some(item_id), 1.0, 10.0),
            ))
            .unwrap();

        ledger
            .remove_activity(RemoveActivity {
                organization_id,
                activity_id,
                occurred_at: Utc::now(),
            })
            .unwrap();

        wait_for_processing();

        // Back to the pre-log quantity; the journal entry is gone.
        assert_eq!(stock_of(&stock, organization_id, &item_id), 100.0);
        assert!(journal.get(organization_id, &activity_id).is_none());
        assert!(journal.journal(organization_id).is_empty());
    }

    #[test]
    fn revision_can_move_consumption_between_items() {
        let (ledger, stock, _, _) = setup();
        let organization_id = OrganizationId::new();
        let herbicide = register_item(
            &ledger,
            organization_id,
            "Glyphosate 360 SL",
            ItemCategory::Herbicide,
            50.0,
            "l",
        );
        let fungicide = register_item(
            &ledger,
            organization_id,
            "Tebuconazole 250 EW",
            ItemCategory::Fungicide,
            30.0,
            "l",
        );

        let (activity_id, cmd) = log_cmd(organization_id, treatment(Some(herbicide), 2.0, 10.0));
        ledger.log_activity(cmd).unwrap();

        let consumed = ledger
            .revise_activity(revise_cmd(
                organization_id,
                activity_id,
                treatment(Some(fungicide), 1.0, 5.0),
            ))
            .unwrap();
        assert_eq!(consumed, Some(fungicide));

        wait_for_processing();

        // The old item got its 20 back; the new one covers the 5.
        assert_eq!(stock_of(&stock, organization_id, &herbicide), 50.0);
        assert_eq!(stock_of(&stock, organization_id, &fungicide), 25.0);
    }

    #[test]
    fn unaffordable_revision_moves_nothing() {
        let (ledger, stock, journal, _) = setup();
        let organization_id = OrganizationId::new();
        let item_id = register_item(
            &ledger,
            organization_id,
            "Glyphosate 360 SL",
            ItemCategory::Herbicide,
            100.0,
            "l",
        );

        let (activity_id, cmd) = log_cmd(organization_id, treatment(Some(item_id), 2.0, 10.0));
        ledger.log_activity(cmd).unwrap();

        // Net growth of 480 against 80 on hand.
        let err = ledger
            .revise_activity(revise_cmd(
                organization_id,
                activity_id,
                treatment(Some(item_id), 50.0, 10.0),
            ))
            .unwrap_err();
        assert!(matches!(err, DispatchError::InsufficientQuantity { .. }));

        wait_for_processing();

        // Neither the stock nor the stored payload changed.
        assert_eq!(stock_of(&stock, organization_id, &item_id), 80.0);
        let entry = journal.get(organization_id, &activity_id).unwrap();
        assert_eq!(entry.consumed.unwrap().quantity, 20.0);
    }

    #[test]
    fn revision_dropping_consumption_credits_everything_back() {
        let (ledger, stock, _, _) = setup();
        let organization_id = OrganizationId::new();
        let item_id = register_item(
            &ledger,
            organization_id,
            "NPK 15-15-15",
            ItemCategory::Fertilizer,
            500.0,
            "kg",
        );

        let (activity_id, cmd) = log_cmd(
            organization_id,
            ActivityDetails::Fertilization {
                fertilizer_id: Some(item_id),
                dose: 20.0,
                fertilized_area: 12.0,
            },
        );
        ledger.log_activity(cmd).unwrap();
        wait_for_processing();
        assert_eq!(stock_of(&stock, organization_id, &item_id), 260.0);

        let consumed = ledger
            .revise_activity(revise_cmd(
                organization_id,
                activity_id,
                ActivityDetails::FarmActivity {
                    description: "rolled the seedbed instead".to_string(),
                },
            ))
            .unwrap();
        assert_eq!(consumed, None);

        wait_for_processing();
        assert_eq!(stock_of(&stock, organization_id, &item_id), 500.0);
    }

    #[test]
    fn logging_against_unknown_item_fails_and_persists_nothing() {
        let (ledger, _, journal, _) = setup();
        let organization_id = OrganizationId::new();
        let ghost = InventoryItemId::new(AggregateId::new());

        let (activity_id, cmd) = log_cmd(organization_id, treatment(Some(ghost), 2.0, 10.0));
        let err = ledger.log_activity(cmd).unwrap_err();
        assert!(err.is_not_found());

        wait_for_processing();
        assert!(journal.get(organization_id, &activity_id).is_none());
    }

    #[test]
    fn non_consuming_activities_touch_no_stock() {
        let (ledger, stock, journal, _) = setup();
        let organization_id = OrganizationId::new();
        let item_id = register_item(
            &ledger,
            organization_id,
            "Glyphosate 360 SL",
            ItemCategory::Herbicide,
            100.0,
            "l",
        );

        // Referencing inventory is optional: an inspection, a plain farm
        // activity, and a treatment without an item all consume nothing.
        let (_, inspection) = log_cmd(
            organization_id,
            ActivityDetails::FieldInspection {
                findings: "aphid pressure below threshold".to_string(),
            },
        );
        assert_eq!(ledger.log_activity(inspection).unwrap(), None);

        let (_, plain) = log_cmd(
            organization_id,
            ActivityDetails::FarmActivity {
                description: "stubble cultivation".to_string(),
            },
        );
        assert_eq!(ledger.log_activity(plain).unwrap(), None);

        let (_, no_item) = log_cmd(organization_id, treatment(None, 2.0, 10.0));
        assert_eq!(ledger.log_activity(no_item).unwrap(), None);

        let (_, zero_area) = log_cmd(organization_id, treatment(Some(item_id), 2.0, 0.0));
        assert_eq!(ledger.log_activity(zero_area).unwrap(), None);

        wait_for_processing();

        assert_eq!(stock_of(&stock, organization_id, &item_id), 100.0);
        assert_eq!(journal.journal(organization_id).len(), 4);
    }

    #[test]
    fn seasonal_logbook_filters_journal_entries() {
        let (ledger, _, journal, _) = setup();
        let organization_id = OrganizationId::new();

        let (activity_id, mut cmd) = log_cmd(
            organization_id,
            ActivityDetails::FarmActivity {
                description: "autumn ploughing".to_string(),
            },
        );
        cmd.season = Some("2024/2025".to_string());
        ledger.log_activity(cmd).unwrap();

        let (_, cmd) = log_cmd(
            organization_id,
            ActivityDetails::FarmActivity {
                description: "spring harrowing".to_string(),
            },
        );
        ledger.log_activity(cmd).unwrap();

        wait_for_processing();

        let logbook = journal.logbook(organization_id, "2024/2025");
        assert_eq!(logbook.len(), 1);
        assert_eq!(logbook[0].activity_id, activity_id);
    }

    #[test]
    fn field_commands_flow_through_the_same_pipeline() {
        let (ledger, _, _, _) = setup();
        let organization_id = OrganizationId::new();
        let field_id = FieldId::new(AggregateId::new());

        ledger
            .dispatcher()
            .dispatch(
                organization_id,
                field_id.0,
                "field",
                FieldCommand::RegisterField(RegisterField {
                    organization_id,
                    field_id,
                    name: "North block".to_string(),
                    area_ha: 42.5,
                    occurred_at: Utc::now(),
                }),
                |_, id| Field::empty(FieldId::new(id)),
            )
            .unwrap();

        ledger
            .dispatcher()
            .dispatch(
                organization_id,
                field_id.0,
                "field",
                FieldCommand::AssignCrop(AssignCrop {
                    organization_id,
                    field_id,
                    crop: "winter wheat".to_string(),
                    occurred_at: Utc::now(),
                }),
                |_, id| Field::empty(FieldId::new(id)),
            )
            .unwrap();

        let field = ledger
            .dispatcher()
            .load(organization_id, field_id.0, |_, id| {
                Field::empty(FieldId::new(id))
            })
            .unwrap();
        assert_eq!(field.crop(), Some("winter wheat"));
    }

    #[test]
    fn organizations_do_not_see_each_other() {
        let (ledger, stock, _, _) = setup();
        let org_a = OrganizationId::new();
        let org_b = OrganizationId::new();

        let item_id = register_item(
            &ledger,
            org_a,
            "Glyphosate 360 SL",
            ItemCategory::Herbicide,
            100.0,
            "l",
        );
        wait_for_processing();

        assert!(stock.get(org_b, &item_id).is_none());
        assert!(stock.list(org_b).is_empty());

        // Debiting through the wrong organization must not touch org A's item.
        let err = ledger
            .debit(org_b, item_id, 1.0, Utc::now())
            .unwrap_err();
        assert!(err.is_not_found());
        wait_for_processing();
        assert_eq!(stock_of(&stock, org_a, &item_id), 100.0);
    }

    #[test]
    fn stale_append_is_rejected() {
        let organization_id = OrganizationId::new();
        let item_id = InventoryItemId::new(AggregateId::new());

        // Two writers decide against the same loaded version; only the first
        // append can win.
        let store = InMemoryEventStore::new();
        let make = |quantity: f64| {
            UncommittedEvent::from_typed(
                organization_id,
                item_id.0,
                "inventory.item",
                uuid::Uuid::now_v7(),
                &agrolog_inventory::InventoryEvent::StockDebited(
                    agrolog_inventory::StockDebited {
                        organization_id,
                        item_id,
                        quantity,
                        occurred_at: Utc::now(),
                    },
                ),
            )
            .unwrap()
        };

        store
            .append(vec![make(1.0)], ExpectedVersion::Exact(0))
            .unwrap();
        let err = store
            .append(vec![make(2.0)], ExpectedVersion::Exact(0))
            .unwrap_err();
        assert!(matches!(err, EventStoreError::Concurrency(_)));
    }

    #[test]
    fn projections_ignore_replayed_envelopes() {
        let (ledger, _, _, store) = setup();
        let organization_id = OrganizationId::new();

        let stock = InventoryStockProjection::new(Arc::new(InMemoryOrgStore::new()));
        let item_id = register_item(
            &ledger,
            organization_id,
            "NPK 15-15-15",
            ItemCategory::Fertilizer,
            500.0,
            "kg",
        );
        ledger.debit(organization_id, item_id, 40.0, Utc::now()).unwrap();

        // Replay the stream into a fresh projection twice; at-least-once
        // delivery must not double-apply.
        let events = store.load_stream(organization_id, item_id.0).unwrap();
        for e in &events {
            stock.apply_envelope(&e.to_envelope()).unwrap();
        }
        for e in &events {
            stock.apply_envelope(&e.to_envelope()).unwrap();
        }

        assert_eq!(stock.get(organization_id, &item_id).unwrap().quantity, 460.0);
    }
}
