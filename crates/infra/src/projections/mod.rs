//! Projection implementations (read model builders).
//!
//! Projections consume domain events and build query-optimized read models.
//! All projections are:
//! - **Rebuildable**: Can be reconstructed from the event stream
//! - **Organization-isolated**: Data is partitioned by organization
//! - **Idempotent**: Safe for at-least-once delivery

pub mod activity_log;
pub mod inventory_stock;

pub use activity_log::{ActivityLogEntry, ActivityLogProjection, ActivityLogProjectionError};
pub use inventory_stock::{
    InventoryProjectionError, InventoryReadModel, InventoryStockProjection,
};
