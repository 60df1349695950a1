//! Infrastructure layer: event storage, command dispatch, read models, and
//! the consumption ledger service.

pub mod command_dispatcher;
pub mod event_store;
pub mod ledger;
pub mod projections;
pub mod read_model;

#[cfg(test)]
mod integration_tests;

pub use command_dispatcher::{CommandDispatcher, DispatchError};
pub use event_store::{EventStore, EventStoreError, InMemoryEventStore, StoredEvent, UncommittedEvent};
pub use ledger::ConsumptionLedger;
