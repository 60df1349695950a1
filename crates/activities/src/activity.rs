use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use agrolog_core::{Aggregate, AggregateId, AggregateRoot, DomainError, OrganizationId, ValueObject};
use agrolog_events::Event;
use agrolog_fields::FieldId;
use agrolog_inventory::{InventoryItemId, required_quantity};

/// Activity identifier (organization-scoped via `organization_id` fields in
/// events/commands).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActivityId(pub AggregateId);

impl ActivityId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for ActivityId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Activity category (read-model/reporting key; derived from the payload).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityCategory {
    ChemicalTreatment,
    Fertilization,
    FieldInspection,
    FarmActivity,
}

/// What an activity takes out of stock: one item, one amount.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockConsumption {
    pub item_id: InventoryItemId,
    pub quantity: f64,
}

impl ValueObject for StockConsumption {}

/// Per-category activity payload.
///
/// Each variant carries only its own fields. A revision replaces the whole
/// payload, so there is no cross-field fallback between categories; the
/// consumed amount is derived from whichever payload is current.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActivityDetails {
    /// Plant-protection treatment: `dose` per unit area over `treated_area`.
    ChemicalTreatment {
        chemical_id: Option<InventoryItemId>,
        dose: f64,
        treated_area: f64,
        target: Option<String>,
    },
    /// Fertilizer application: `dose` per unit area over `fertilized_area`.
    Fertilization {
        fertilizer_id: Option<InventoryItemId>,
        dose: f64,
        fertilized_area: f64,
    },
    FieldInspection {
        findings: String,
    },
    FarmActivity {
        description: String,
    },
}

impl ActivityDetails {
    pub fn category(&self) -> ActivityCategory {
        match self {
            ActivityDetails::ChemicalTreatment { .. } => ActivityCategory::ChemicalTreatment,
            ActivityDetails::Fertilization { .. } => ActivityCategory::Fertilization,
            ActivityDetails::FieldInspection { .. } => ActivityCategory::FieldInspection,
            ActivityDetails::FarmActivity { .. } => ActivityCategory::FarmActivity,
        }
    }

    /// The stock this payload consumes, if any.
    ///
    /// Referencing inventory is optional per activity: no item reference, or
    /// a zero dose or area, means the activity does not consume stock (which
    /// is not an error).
    pub fn consumption(&self) -> Option<StockConsumption> {
        match self {
            ActivityDetails::ChemicalTreatment {
                chemical_id: Some(item_id),
                dose,
                treated_area,
                ..
            } if *dose > 0.0 && *treated_area > 0.0 => Some(StockConsumption {
                item_id: *item_id,
                quantity: required_quantity(*dose, *treated_area),
            }),
            ActivityDetails::Fertilization {
                fertilizer_id: Some(item_id),
                dose,
                fertilized_area,
            } if *dose > 0.0 && *fertilized_area > 0.0 => Some(StockConsumption {
                item_id: *item_id,
                quantity: required_quantity(*dose, *fertilized_area),
            }),
            _ => None,
        }
    }

    fn validate(&self) -> Result<(), DomainError> {
        fn check(value: f64, what: &str) -> Result<(), DomainError> {
            if !value.is_finite() {
                return Err(DomainError::validation(format!("{what} must be finite")));
            }
            if value < 0.0 {
                return Err(DomainError::validation(format!("{what} cannot be negative")));
            }
            Ok(())
        }

        match self {
            ActivityDetails::ChemicalTreatment {
                dose, treated_area, ..
            } => {
                check(*dose, "dose")?;
                check(*treated_area, "treated area")
            }
            ActivityDetails::Fertilization {
                dose,
                fertilized_area,
                ..
            } => {
                check(*dose, "dose")?;
                check(*fertilized_area, "fertilized area")
            }
            ActivityDetails::FieldInspection { .. } => Ok(()),
            ActivityDetails::FarmActivity { description } => {
                if description.trim().is_empty() {
                    return Err(DomainError::validation("description cannot be empty"));
                }
                Ok(())
            }
        }
    }
}

/// Aggregate root: Activity (one journal entry for a field).
#[derive(Debug, Clone, PartialEq)]
pub struct Activity {
    id: ActivityId,
    organization_id: Option<OrganizationId>,
    field_id: Option<FieldId>,
    season: Option<String>,
    performed_at: Option<DateTime<Utc>>,
    details: Option<ActivityDetails>,
    version: u64,
    created: bool,
    removed: bool,
}

impl Activity {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: ActivityId) -> Self {
        Self {
            id,
            organization_id: None,
            field_id: None,
            season: None,
            performed_at: None,
            details: None,
            version: 0,
            created: false,
            removed: false,
        }
    }

    pub fn id_typed(&self) -> ActivityId {
        self.id
    }

    pub fn organization_id(&self) -> Option<OrganizationId> {
        self.organization_id
    }

    pub fn field_id(&self) -> Option<FieldId> {
        self.field_id
    }

    pub fn season(&self) -> Option<&str> {
        self.season.as_deref()
    }

    pub fn performed_at(&self) -> Option<DateTime<Utc>> {
        self.performed_at
    }

    pub fn details(&self) -> Option<&ActivityDetails> {
        self.details.as_ref()
    }

    pub fn is_removed(&self) -> bool {
        self.removed
    }

    /// True once the activity exists and has not been removed.
    pub fn is_live(&self) -> bool {
        self.created && !self.removed
    }

    /// The stock consumption recorded by the *current* payload.
    ///
    /// Reversals are computed from this - i.e. from the dose/area stored at
    /// the time of the original debit, never from an incoming revision.
    pub fn consumption(&self) -> Option<StockConsumption> {
        self.details.as_ref().and_then(|d| d.consumption())
    }
}

impl AggregateRoot for Activity {
    type Id = ActivityId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: LogActivity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogActivity {
    pub organization_id: OrganizationId,
    pub activity_id: ActivityId,
    pub field_id: FieldId,
    pub season: Option<String>,
    pub performed_at: DateTime<Utc>,
    pub details: ActivityDetails,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReviseActivity (replaces the whole payload).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviseActivity {
    pub organization_id: OrganizationId,
    pub activity_id: ActivityId,
    pub performed_at: Option<DateTime<Utc>>,
    pub details: ActivityDetails,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RemoveActivity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoveActivity {
    pub organization_id: OrganizationId,
    pub activity_id: ActivityId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ActivityCommand {
    LogActivity(LogActivity),
    ReviseActivity(ReviseActivity),
    RemoveActivity(RemoveActivity),
}

/// Event: ActivityLogged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityLogged {
    pub organization_id: OrganizationId,
    pub activity_id: ActivityId,
    pub field_id: FieldId,
    pub season: Option<String>,
    pub performed_at: DateTime<Utc>,
    pub details: ActivityDetails,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ActivityRevised.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityRevised {
    pub organization_id: OrganizationId,
    pub activity_id: ActivityId,
    pub performed_at: Option<DateTime<Utc>>,
    pub details: ActivityDetails,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ActivityRemoved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityRemoved {
    pub organization_id: OrganizationId,
    pub activity_id: ActivityId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ActivityEvent {
    ActivityLogged(ActivityLogged),
    ActivityRevised(ActivityRevised),
    ActivityRemoved(ActivityRemoved),
}

impl Event for ActivityEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ActivityEvent::ActivityLogged(_) => "activity.logged",
            ActivityEvent::ActivityRevised(_) => "activity.revised",
            ActivityEvent::ActivityRemoved(_) => "activity.removed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ActivityEvent::ActivityLogged(e) => e.occurred_at,
            ActivityEvent::ActivityRevised(e) => e.occurred_at,
            ActivityEvent::ActivityRemoved(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Activity {
    type Command = ActivityCommand;
    type Event = ActivityEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            ActivityEvent::ActivityLogged(e) => {
                self.id = e.activity_id;
                self.organization_id = Some(e.organization_id);
                self.field_id = Some(e.field_id);
                self.season = e.season.clone();
                self.performed_at = Some(e.performed_at);
                self.details = Some(e.details.clone());
                self.created = true;
                self.removed = false;
            }
            ActivityEvent::ActivityRevised(e) => {
                if let Some(performed_at) = e.performed_at {
                    self.performed_at = Some(performed_at);
                }
                self.details = Some(e.details.clone());
            }
            ActivityEvent::ActivityRemoved(_) => {
                self.removed = true;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            ActivityCommand::LogActivity(cmd) => self.handle_log(cmd),
            ActivityCommand::ReviseActivity(cmd) => self.handle_revise(cmd),
            ActivityCommand::RemoveActivity(cmd) => self.handle_remove(cmd),
        }
    }
}

impl Activity {
    fn ensure_organization(&self, organization_id: OrganizationId) -> Result<(), DomainError> {
        if !self.created {
            return Ok(());
        }
        if self.organization_id != Some(organization_id) {
            return Err(DomainError::invariant("organization mismatch"));
        }
        Ok(())
    }

    fn ensure_activity_id(&self, activity_id: ActivityId) -> Result<(), DomainError> {
        if self.id != activity_id {
            return Err(DomainError::invariant("activity_id mismatch"));
        }
        Ok(())
    }

    fn handle_log(&self, cmd: &LogActivity) -> Result<Vec<ActivityEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("activity already exists"));
        }
        cmd.details.validate()?;

        Ok(vec![ActivityEvent::ActivityLogged(ActivityLogged {
            organization_id: cmd.organization_id,
            activity_id: cmd.activity_id,
            field_id: cmd.field_id,
            season: cmd.season.clone(),
            performed_at: cmd.performed_at,
            details: cmd.details.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_revise(&self, cmd: &ReviseActivity) -> Result<Vec<ActivityEvent>, DomainError> {
        if !self.is_live() {
            return Err(DomainError::not_found());
        }
        self.ensure_organization(cmd.organization_id)?;
        self.ensure_activity_id(cmd.activity_id)?;
        cmd.details.validate()?;

        Ok(vec![ActivityEvent::ActivityRevised(ActivityRevised {
            organization_id: cmd.organization_id,
            activity_id: cmd.activity_id,
            performed_at: cmd.performed_at,
            details: cmd.details.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_remove(&self, cmd: &RemoveActivity) -> Result<Vec<ActivityEvent>, DomainError> {
        if !self.is_live() {
            return Err(DomainError::not_found());
        }
        self.ensure_organization(cmd.organization_id)?;
        self.ensure_activity_id(cmd.activity_id)?;

        Ok(vec![ActivityEvent::ActivityRemoved(ActivityRemoved {
            organization_id: cmd.organization_id,
            activity_id: cmd.activity_id,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agrolog_core::AggregateId;
    use proptest::prelude::*;

    fn test_organization_id() -> OrganizationId {
        OrganizationId::new()
    }

    fn test_activity_id() -> ActivityId {
        ActivityId::new(AggregateId::new())
    }

    fn test_field_id() -> FieldId {
        FieldId::new(AggregateId::new())
    }

    fn test_item_id() -> InventoryItemId {
        InventoryItemId::new(AggregateId::new())
    }

    fn treatment(chemical_id: Option<InventoryItemId>, dose: f64, area: f64) -> ActivityDetails {
        ActivityDetails::ChemicalTreatment {
            chemical_id,
            dose,
            treated_area: area,
            target: None,
        }
    }

    fn logged_activity(details: ActivityDetails) -> (Activity, OrganizationId) {
        let organization_id = test_organization_id();
        let activity_id = test_activity_id();
        let mut activity = Activity::empty(activity_id);

        let events = activity
            .handle(&ActivityCommand::LogActivity(LogActivity {
                organization_id,
                activity_id,
                field_id: test_field_id(),
                season: Some("2025/2026".to_string()),
                performed_at: Utc::now(),
                details,
                occurred_at: Utc::now(),
            }))
            .unwrap();
        for e in &events {
            activity.apply(e);
        }

        (activity, organization_id)
    }

    #[test]
    fn treatment_with_item_and_positive_dose_area_consumes_stock() {
        let item_id = test_item_id();
        let details = treatment(Some(item_id), 2.0, 10.0);

        let c = details.consumption().unwrap();
        assert_eq!(c.item_id, item_id);
        assert_eq!(c.quantity, 20.0);
    }

    #[test]
    fn missing_item_or_zero_dose_or_area_consumes_nothing() {
        assert!(treatment(None, 2.0, 10.0).consumption().is_none());
        assert!(treatment(Some(test_item_id()), 0.0, 10.0).consumption().is_none());
        assert!(treatment(Some(test_item_id()), 2.0, 0.0).consumption().is_none());
        assert!(
            ActivityDetails::FieldInspection {
                findings: "aphids on headland rows".to_string()
            }
            .consumption()
            .is_none()
        );
    }

    #[test]
    fn log_then_revise_replaces_payload() {
        let item_id = test_item_id();
        let (mut activity, organization_id) = logged_activity(treatment(Some(item_id), 2.0, 10.0));
        assert_eq!(activity.consumption().unwrap().quantity, 20.0);

        let events = activity
            .handle(&ActivityCommand::ReviseActivity(ReviseActivity {
                organization_id,
                activity_id: activity.id_typed(),
                performed_at: None,
                details: treatment(Some(item_id), 1.0, 10.0),
                occurred_at: Utc::now(),
            }))
            .unwrap();
        for e in &events {
            activity.apply(e);
        }

        assert_eq!(activity.consumption().unwrap().quantity, 10.0);
        assert_eq!(activity.version(), 2);
    }

    #[test]
    fn revise_can_change_category_and_drop_consumption() {
        let (mut activity, organization_id) =
            logged_activity(treatment(Some(test_item_id()), 2.0, 10.0));

        let events = activity
            .handle(&ActivityCommand::ReviseActivity(ReviseActivity {
                organization_id,
                activity_id: activity.id_typed(),
                performed_at: None,
                details: ActivityDetails::FarmActivity {
                    description: "disc harrowing".to_string(),
                },
                occurred_at: Utc::now(),
            }))
            .unwrap();
        for e in &events {
            activity.apply(e);
        }

        assert_eq!(activity.details().unwrap().category(), ActivityCategory::FarmActivity);
        assert!(activity.consumption().is_none());
    }

    #[test]
    fn remove_marks_activity_gone() {
        let (mut activity, organization_id) = logged_activity(treatment(None, 0.0, 0.0));

        let events = activity
            .handle(&ActivityCommand::RemoveActivity(RemoveActivity {
                organization_id,
                activity_id: activity.id_typed(),
                occurred_at: Utc::now(),
            }))
            .unwrap();
        for e in &events {
            activity.apply(e);
        }
        assert!(activity.is_removed());

        // A removed activity no longer accepts commands.
        let err = activity
            .handle(&ActivityCommand::RemoveActivity(RemoveActivity {
                organization_id,
                activity_id: activity.id_typed(),
                occurred_at: Utc::now(),
            }))
            .unwrap_err();
        assert_eq!(err, DomainError::NotFound);
    }

    #[test]
    fn negative_dose_is_rejected() {
        let activity = Activity::empty(test_activity_id());
        let err = activity
            .handle(&ActivityCommand::LogActivity(LogActivity {
                organization_id: test_organization_id(),
                activity_id: test_activity_id(),
                field_id: test_field_id(),
                season: None,
                performed_at: Utc::now(),
                details: treatment(Some(test_item_id()), -2.0, 10.0),
                occurred_at: Utc::now(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn empty_farm_activity_description_is_rejected() {
        let activity = Activity::empty(test_activity_id());
        let err = activity
            .handle(&ActivityCommand::LogActivity(LogActivity {
                organization_id: test_organization_id(),
                activity_id: test_activity_id(),
                field_id: test_field_id(),
                season: None,
                performed_at: Utc::now(),
                details: ActivityDetails::FarmActivity {
                    description: "  ".to_string(),
                },
                occurred_at: Utc::now(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: a consuming payload always derives dose * area, and the
        /// fertilization variant behaves identically to chemical treatment.
        #[test]
        fn consumption_is_dose_times_area(
            dose in 0.25f64..1_000.0,
            area in 0.25f64..10_000.0
        ) {
            let item_id = test_item_id();

            let c = treatment(Some(item_id), dose, area).consumption().unwrap();
            prop_assert_eq!(c.quantity, dose * area);

            let f = ActivityDetails::Fertilization {
                fertilizer_id: Some(item_id),
                dose,
                fertilized_area: area,
            };
            prop_assert_eq!(f.consumption().unwrap().quantity, dose * area);
        }
    }
}
