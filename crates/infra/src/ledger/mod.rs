//! Consumption ledger: keeps inventory stock consistent with the activity
//! journal.

pub mod consumption;

pub use consumption::ConsumptionLedger;
