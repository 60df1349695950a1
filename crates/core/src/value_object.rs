//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects are **immutable** and **compared by value** - they have no
/// identity of their own. `StockConsumption { item, quantity }` is a value
/// object; an `InventoryItem` with an id is an entity. To "modify" a value
/// object, create a new one.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
