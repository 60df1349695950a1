use agrolog_core::AggregateId;

/// A command targets a specific aggregate (command abstraction).
///
/// Commands represent **intent** - a request to perform an action on an
/// aggregate. They are transient (not persisted) and are transformed into
/// events, which are persisted. A command is rejected if invalid; events
/// represent accepted changes.
///
/// Organization isolation is enforced at the **event level** (envelopes), not
/// at the command level: commands stay domain-focused while infrastructure
/// attaches the organization context during persistence.
pub trait Command: Clone + core::fmt::Debug + Send + Sync + 'static {
    fn target_aggregate_id(&self) -> AggregateId;
}
