//! Inventory domain module (event-sourced).
//!
//! This crate contains the stock-on-hand business rules for consumable
//! inventory (plant-protection chemicals and fertilizers), implemented purely
//! as deterministic domain logic (no IO, no HTTP, no storage).

pub mod item;

pub use item::{
    CreditStock, DebitStock, InventoryCommand, InventoryEvent, InventoryItem, InventoryItemId,
    ItemCategory, ItemRegistered, ReceiveStock, RegisterItem, StockCredited, StockDebited,
    StockReceived, required_quantity,
};
