use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use agrolog_activities::{ActivityDetails, ActivityId, LogActivity};
use agrolog_core::{AggregateId, OrganizationId};
use agrolog_events::{EventEnvelope, InMemoryEventBus};
use agrolog_fields::FieldId;
use agrolog_infra::command_dispatcher::CommandDispatcher;
use agrolog_infra::event_store::InMemoryEventStore;
use agrolog_infra::ledger::ConsumptionLedger;
use agrolog_inventory::{
    InventoryCommand, InventoryItem, InventoryItemId, ItemCategory, RegisterItem,
};

type Bus = Arc<InMemoryEventBus<EventEnvelope<serde_json::Value>>>;
type Ledger = ConsumptionLedger<Arc<InMemoryEventStore>, Bus>;

/// Naive CRUD simulation: direct key-value stock updates (no events, no
/// history). Lower bound to compare the event-sourced pipeline against.
#[derive(Debug, Clone)]
struct NaiveStockStore {
    inner: Arc<RwLock<HashMap<(OrganizationId, AggregateId), f64>>>,
}

impl NaiveStockStore {
    fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    fn register(&self, organization_id: OrganizationId, item_id: AggregateId, quantity: f64) {
        let mut map = self.inner.write().unwrap();
        map.insert((organization_id, item_id), quantity);
    }

    fn debit(
        &self,
        organization_id: OrganizationId,
        item_id: AggregateId,
        quantity: f64,
    ) -> Result<(), ()> {
        let mut map = self.inner.write().unwrap();
        match map.get_mut(&(organization_id, item_id)) {
            Some(stock) if *stock >= quantity => {
                *stock -= quantity;
                Ok(())
            }
            _ => Err(()),
        }
    }
}

fn setup_ledger() -> (Ledger, OrganizationId) {
    agrolog_observability::init();

    let store = Arc::new(InMemoryEventStore::new());
    let bus: Bus = Arc::new(InMemoryEventBus::new());
    let ledger = ConsumptionLedger::new(CommandDispatcher::new(store, bus));
    (ledger, OrganizationId::new())
}

fn register_item(ledger: &Ledger, organization_id: OrganizationId, quantity: f64) -> InventoryItemId {
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
                name: "Bench item".to_string(),
                category: ItemCategory::Herbicide,
                unit: "l".to_string(),
                initial_quantity: quantity,
                occurred_at: Utc::now(),
            }),
            |_, id| InventoryItem::empty(InventoryItemId::new(id)),
        )
        .unwrap();
    item_id
}

fn treatment_log(
    organization_id: OrganizationId,
    item_id: InventoryItemId,
    dose: f64,
    area: f64,
) -> LogActivity {
    LogActivity {
        organization_id,
        activity_id: ActivityId::new(AggregateId::new()),
        field_id: FieldId::new(AggregateId::new()),
        season: Some("2025/2026".to_string()),
        performed_at: Utc::now(),
        details: ActivityDetails::ChemicalTreatment {
            chemical_id: Some(item_id),
            dose,
            treated_area: area,
            target: None,
        },
        occurred_at: Utc::now(),
    }
}

fn bench_debit_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("debit_latency");
    group.sample_size(1000);

    // Event-sourced debit: load + rehydrate + decide + append + publish.
    // The item stream grows with each iteration, like a long-lived item.
    group.bench_function("event_sourced", |b| {
        let (ledger, organization_id) = setup_ledger();
        let item_id = register_item(&ledger, organization_id, 1e12);
        b.iter(|| {
            ledger
                .debit(organization_id, item_id, black_box(1.0), Utc::now())
                .unwrap();
        });
    });

    // Naive baseline: one map update, no durability, no history.
    group.bench_function("naive_crud", |b| {
        let store = NaiveStockStore::new();
        let organization_id = OrganizationId::new();
        let item_id = AggregateId::new();
        store.register(organization_id, item_id, 1e12);
        b.iter(|| {
            store
                .debit(organization_id, item_id, black_box(1.0))
                .unwrap();
        });
    });

    group.finish();
}

fn bench_log_activity(c: &mut Criterion) {
    let mut group = c.benchmark_group("log_activity");
    group.throughput(Throughput::Elements(1));

    // Full reconciliation: derive consumption, debit, persist the activity.
    group.bench_function("with_consumption", |b| {
        let (ledger, organization_id) = setup_ledger();
        let item_id = register_item(&ledger, organization_id, 1e12);
        b.iter(|| {
            ledger
                .log_activity(treatment_log(organization_id, item_id, 2.0, 10.0))
                .unwrap();
        });
    });

    group.bench_function("without_consumption", |b| {
        let (ledger, organization_id) = setup_ledger();
        b.iter(|| {
            let cmd = LogActivity {
                details: ActivityDetails::FarmActivity {
                    description: "stubble cultivation".to_string(),
                },
                ..treatment_log(organization_id, InventoryItemId::new(AggregateId::new()), 0.0, 0.0)
            };
            ledger.log_activity(cmd).unwrap();
        });
    });

    group.finish();
}

fn bench_rehydration(c: &mut Criterion) {
    let mut group = c.benchmark_group("item_rehydration");

    for history_len in [8u64, 64, 256] {
        group.bench_with_input(
            BenchmarkId::from_parameter(history_len),
            &history_len,
            |b, &history_len| {
                let (ledger, organization_id) = setup_ledger();
                let item_id = register_item(&ledger, organization_id, 1e12);
                for _ in 0..history_len {
                    ledger
                        .debit(organization_id, item_id, 1.0, Utc::now())
                        .unwrap();
                }

                b.iter(|| {
                    let item = ledger
                        .dispatcher()
                        .load(organization_id, item_id.0, |_, id| {
                            InventoryItem::empty(InventoryItemId::new(id))
                        })
                        .unwrap();
                    black_box(item.quantity());
                });
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_debit_latency,
    bench_log_activity,
    bench_rehydration
);
criterion_main!(benches);
