use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use agrolog_core::{Aggregate, AggregateId, AggregateRoot, DomainError, OrganizationId};
use agrolog_events::Event;

/// Inventory item identifier (organization-scoped via `organization_id` fields
/// in events/commands).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InventoryItemId(pub AggregateId);

impl InventoryItemId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for InventoryItemId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// What kind of consumable an item is.
///
/// The two families that matter to the consumption ledger are chemicals
/// (plant-protection products) and fertilizers; the subtypes exist for
/// registry/reporting purposes and carry no ledger semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemCategory {
    Herbicide,
    Insecticide,
    Fungicide,
    GrowthRegulator,
    Fertilizer,
    FoliarFertilizer,
    SoilImprover,
}

impl ItemCategory {
    pub fn is_chemical(self) -> bool {
        matches!(
            self,
            ItemCategory::Herbicide
                | ItemCategory::Insecticide
                | ItemCategory::Fungicide
                | ItemCategory::GrowthRegulator
        )
    }

    pub fn is_fertilizer(self) -> bool {
        matches!(
            self,
            ItemCategory::Fertilizer | ItemCategory::FoliarFertilizer | ItemCategory::SoilImprover
        )
    }
}

/// Quantity consumed by applying `dose` per unit area over `area`.
///
/// This is the sole formula converting a dose/area pair into a stock debit.
/// No unit conversion happens here - dose and the item's `unit` are assumed
/// compatible by convention upstream.
pub fn required_quantity(dose: f64, area: f64) -> f64 {
    dose * area
}

/// Aggregate root: InventoryItem.
///
/// The item's `quantity` is the ledger's single shared mutable resource. It
/// is mutated exclusively through `DebitStock`/`CreditStock` (consumption
/// bookkeeping) and `ReceiveStock` (restocking); the invariant `quantity >= 0`
/// holds after every accepted command.
#[derive(Debug, Clone, PartialEq)]
pub struct InventoryItem {
    id: InventoryItemId,
    organization_id: Option<OrganizationId>,
    name: String,
    category: ItemCategory,
    quantity: f64,
    unit: String,
    updated_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
}

impl InventoryItem {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: InventoryItemId) -> Self {
        Self {
            id,
            organization_id: None,
            name: String::new(),
            category: ItemCategory::Herbicide,
            quantity: 0.0,
            unit: String::new(),
            updated_at: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> InventoryItemId {
        self.id
    }

    pub fn organization_id(&self) -> Option<OrganizationId> {
        self.organization_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn category(&self) -> ItemCategory {
        self.category
    }

    pub fn quantity(&self) -> f64 {
        self.quantity
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }
}

impl AggregateRoot for InventoryItem {
    type Id = InventoryItemId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: RegisterItem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterItem {
    pub organization_id: OrganizationId,
    pub item_id: InventoryItemId,
    pub name: String,
    pub category: ItemCategory,
    pub unit: String,
    pub initial_quantity: f64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReceiveStock (restocking; positive delta only).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceiveStock {
    pub organization_id: OrganizationId,
    pub item_id: InventoryItemId,
    pub quantity: f64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: DebitStock (consumption; bounded by quantity on hand).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebitStock {
    pub organization_id: OrganizationId,
    pub item_id: InventoryItemId,
    pub quantity: f64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CreditStock (reversal of an earlier debit; unbounded).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreditStock {
    pub organization_id: OrganizationId,
    pub item_id: InventoryItemId,
    pub quantity: f64,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum InventoryCommand {
    RegisterItem(RegisterItem),
    ReceiveStock(ReceiveStock),
    DebitStock(DebitStock),
    CreditStock(CreditStock),
}

/// Event: ItemRegistered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemRegistered {
    pub organization_id: OrganizationId,
    pub item_id: InventoryItemId,
    pub name: String,
    pub category: ItemCategory,
    pub unit: String,
    pub initial_quantity: f64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StockReceived.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockReceived {
    pub organization_id: OrganizationId,
    pub item_id: InventoryItemId,
    pub quantity: f64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StockDebited.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockDebited {
    pub organization_id: OrganizationId,
    pub item_id: InventoryItemId,
    pub quantity: f64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StockCredited.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockCredited {
    pub organization_id: OrganizationId,
    pub item_id: InventoryItemId,
    pub quantity: f64,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum InventoryEvent {
    ItemRegistered(ItemRegistered),
    StockReceived(StockReceived),
    StockDebited(StockDebited),
    StockCredited(StockCredited),
}

impl Event for InventoryEvent {
    fn event_type(&self) -> &'static str {
        match self {
            InventoryEvent::ItemRegistered(_) => "inventory.item.registered",
            InventoryEvent::StockReceived(_) => "inventory.item.stock_received",
            InventoryEvent::StockDebited(_) => "inventory.item.stock_debited",
            InventoryEvent::StockCredited(_) => "inventory.item.stock_credited",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            InventoryEvent::ItemRegistered(e) => e.occurred_at,
            InventoryEvent::StockReceived(e) => e.occurred_at,
            InventoryEvent::StockDebited(e) => e.occurred_at,
            InventoryEvent::StockCredited(e) => e.occurred_at,
        }
    }
}

impl Aggregate for InventoryItem {
    type Command = InventoryCommand;
    type Event = InventoryEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            InventoryEvent::ItemRegistered(e) => {
                self.id = e.item_id;
                self.organization_id = Some(e.organization_id);
                self.name = e.name.clone();
                self.category = e.category;
                self.quantity = e.initial_quantity;
                self.unit = e.unit.clone();
                self.updated_at = Some(e.occurred_at);
                self.created = true;
            }
            InventoryEvent::StockReceived(e) => {
                self.quantity += e.quantity;
                self.updated_at = Some(e.occurred_at);
            }
            InventoryEvent::StockDebited(e) => {
                self.quantity -= e.quantity;
                self.updated_at = Some(e.occurred_at);
            }
            InventoryEvent::StockCredited(e) => {
                self.quantity += e.quantity;
                self.updated_at = Some(e.occurred_at);
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            InventoryCommand::RegisterItem(cmd) => self.handle_register(cmd),
            InventoryCommand::ReceiveStock(cmd) => self.handle_receive(cmd),
            InventoryCommand::DebitStock(cmd) => self.handle_debit(cmd),
            InventoryCommand::CreditStock(cmd) => self.handle_credit(cmd),
        }
    }
}

impl InventoryItem {
    fn ensure_organization(&self, organization_id: OrganizationId) -> Result<(), DomainError> {
        if !self.created {
            return Ok(());
        }
        if self.organization_id != Some(organization_id) {
            return Err(DomainError::invariant("organization mismatch"));
        }
        Ok(())
    }

    fn ensure_item_id(&self, item_id: InventoryItemId) -> Result<(), DomainError> {
        if self.id != item_id {
            return Err(DomainError::invariant("item_id mismatch"));
        }
        Ok(())
    }

    fn ensure_quantity_value(quantity: f64) -> Result<(), DomainError> {
        if !quantity.is_finite() {
            return Err(DomainError::validation("quantity must be finite"));
        }
        if quantity < 0.0 {
            return Err(DomainError::validation("quantity cannot be negative"));
        }
        Ok(())
    }

    fn handle_register(&self, cmd: &RegisterItem) -> Result<Vec<InventoryEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("item already exists"));
        }
        if cmd.name.trim().is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }
        if cmd.unit.trim().is_empty() {
            return Err(DomainError::validation("unit cannot be empty"));
        }
        Self::ensure_quantity_value(cmd.initial_quantity)?;

        Ok(vec![InventoryEvent::ItemRegistered(ItemRegistered {
            organization_id: cmd.organization_id,
            item_id: cmd.item_id,
            name: cmd.name.clone(),
            category: cmd.category,
            unit: cmd.unit.clone(),
            initial_quantity: cmd.initial_quantity,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_receive(&self, cmd: &ReceiveStock) -> Result<Vec<InventoryEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_organization(cmd.organization_id)?;
        self.ensure_item_id(cmd.item_id)?;
        Self::ensure_quantity_value(cmd.quantity)?;

        if cmd.quantity == 0.0 {
            return Err(DomainError::validation("received quantity must be positive"));
        }

        Ok(vec![InventoryEvent::StockReceived(StockReceived {
            organization_id: cmd.organization_id,
            item_id: cmd.item_id,
            quantity: cmd.quantity,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_debit(&self, cmd: &DebitStock) -> Result<Vec<InventoryEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_organization(cmd.organization_id)?;
        self.ensure_item_id(cmd.item_id)?;
        Self::ensure_quantity_value(cmd.quantity)?;

        // A zero debit is "the activity does not consume inventory" - nothing
        // happened, no event.
        if cmd.quantity == 0.0 {
            return Ok(vec![]);
        }

        if self.quantity < cmd.quantity {
            return Err(DomainError::insufficient_quantity(
                self.quantity,
                cmd.quantity,
                self.unit.clone(),
            ));
        }

        Ok(vec![InventoryEvent::StockDebited(StockDebited {
            organization_id: cmd.organization_id,
            item_id: cmd.item_id,
            quantity: cmd.quantity,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_credit(&self, cmd: &CreditStock) -> Result<Vec<InventoryEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_organization(cmd.organization_id)?;
        self.ensure_item_id(cmd.item_id)?;
        Self::ensure_quantity_value(cmd.quantity)?;

        if cmd.quantity == 0.0 {
            return Ok(vec![]);
        }

        Ok(vec![InventoryEvent::StockCredited(StockCredited {
            organization_id: cmd.organization_id,
            item_id: cmd.item_id,
            quantity: cmd.quantity,
            occurred_at: cmd.occurred_at,
        })])
    }
}
