use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use agrolog_core::{Aggregate, AggregateId, AggregateRoot, DomainError, OrganizationId};
use agrolog_events::Event;

/// Field identifier (organization-scoped via `organization_id` fields in
/// events/commands).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldId(pub AggregateId);

impl FieldId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for FieldId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Aggregate root: Field (a parcel of land activities are logged against).
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    id: FieldId,
    organization_id: Option<OrganizationId>,
    name: String,
    area_ha: f64,
    crop: Option<String>,
    version: u64,
    created: bool,
}

impl Field {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: FieldId) -> Self {
        Self {
            id,
            organization_id: None,
            name: String::new(),
            area_ha: 0.0,
            crop: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> FieldId {
        self.id
    }

    pub fn organization_id(&self) -> Option<OrganizationId> {
        self.organization_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn area_ha(&self) -> f64 {
        self.area_ha
    }

    pub fn crop(&self) -> Option<&str> {
        self.crop.as_deref()
    }
}

impl AggregateRoot for Field {
    type Id = FieldId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: RegisterField.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterField {
    pub organization_id: OrganizationId,
    pub field_id: FieldId,
    pub name: String,
    pub area_ha: f64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AssignCrop (what is grown on the field this season).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignCrop {
    pub organization_id: OrganizationId,
    pub field_id: FieldId,
    pub crop: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldCommand {
    RegisterField(RegisterField),
    AssignCrop(AssignCrop),
}

/// Event: FieldRegistered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldRegistered {
    pub organization_id: OrganizationId,
    pub field_id: FieldId,
    pub name: String,
    pub area_ha: f64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: CropAssigned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CropAssigned {
    pub organization_id: OrganizationId,
    pub field_id: FieldId,
    pub crop: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldEvent {
    FieldRegistered(FieldRegistered),
    CropAssigned(CropAssigned),
}

impl Event for FieldEvent {
    fn event_type(&self) -> &'static str {
        match self {
            FieldEvent::FieldRegistered(_) => "field.registered",
            FieldEvent::CropAssigned(_) => "field.crop_assigned",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            FieldEvent::FieldRegistered(e) => e.occurred_at,
            FieldEvent::CropAssigned(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Field {
    type Command = FieldCommand;
    type Event = FieldEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            FieldEvent::FieldRegistered(e) => {
                self.id = e.field_id;
                self.organization_id = Some(e.organization_id);
                self.name = e.name.clone();
                self.area_ha = e.area_ha;
                self.crop = None;
                self.created = true;
            }
            FieldEvent::CropAssigned(e) => {
                self.crop = Some(e.crop.clone());
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            FieldCommand::RegisterField(cmd) => self.handle_register(cmd),
            FieldCommand::AssignCrop(cmd) => self.handle_assign_crop(cmd),
        }
    }
}

impl Field {
    fn ensure_organization(&self, organization_id: OrganizationId) -> Result<(), DomainError> {
        if !self.created {
            return Ok(());
        }
        if self.organization_id != Some(organization_id) {
            return Err(DomainError::invariant("organization mismatch"));
        }
        Ok(())
    }

    fn handle_register(&self, cmd: &RegisterField) -> Result<Vec<FieldEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("field already exists"));
        }
        if cmd.name.trim().is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }
        if !cmd.area_ha.is_finite() || cmd.area_ha <= 0.0 {
            return Err(DomainError::validation("area must be positive"));
        }

        Ok(vec![FieldEvent::FieldRegistered(FieldRegistered {
            organization_id: cmd.organization_id,
            field_id: cmd.field_id,
            name: cmd.name.clone(),
            area_ha: cmd.area_ha,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_assign_crop(&self, cmd: &AssignCrop) -> Result<Vec<FieldEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_organization(cmd.organization_id)?;
        if self.id != cmd.field_id {
            return Err(DomainError::invariant("field_id mismatch"));
        }
        if cmd.crop.trim().is_empty() {
            return Err(DomainError::validation("crop cannot be empty"));
        }

        Ok(vec![FieldEvent::CropAssigned(CropAssigned {
            organization_id: cmd.organization_id,
            field_id: cmd.field_id,
            crop: cmd.crop.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agrolog_core::AggregateId;

    fn test_field_id() -> FieldId {
        FieldId::new(AggregateId::new())
    }

    #[test]
    fn register_then_assign_crop() {
        let organization_id = OrganizationId::new();
        let field_id = test_field_id();
        let mut field = Field::empty(field_id);

        let events = field
            .handle(&FieldCommand::RegisterField(RegisterField {
                organization_id,
                field_id,
                name: "North block".to_string(),
                area_ha: 42.5,
                occurred_at: Utc::now(),
            }))
            .unwrap();
        field.apply(&events[0]);

        let events = field
            .handle(&FieldCommand::AssignCrop(AssignCrop {
                organization_id,
                field_id,
                crop: "winter wheat".to_string(),
                occurred_at: Utc::now(),
            }))
            .unwrap();
        field.apply(&events[0]);

        assert_eq!(field.name(), "North block");
        assert_eq!(field.area_ha(), 42.5);
        assert_eq!(field.crop(), Some("winter wheat"));
        assert_eq!(field.version(), 2);
    }

    #[test]
    fn zero_area_is_rejected() {
        let field = Field::empty(test_field_id());
        let err = field
            .handle(&FieldCommand::RegisterField(RegisterField {
                organization_id: OrganizationId::new(),
                field_id: test_field_id(),
                name: "South block".to_string(),
                area_ha: 0.0,
                occurred_at: Utc::now(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn crop_on_missing_field_is_not_found() {
        let field = Field::empty(test_field_id());
        let err = field
            .handle(&FieldCommand::AssignCrop(AssignCrop {
                organization_id: OrganizationId::new(),
                field_id: test_field_id(),
                crop: "rapeseed".to_string(),
                occurred_at: Utc::now(),
            }))
            .unwrap_err();
        assert_eq!(err, DomainError::NotFound);
    }
}
