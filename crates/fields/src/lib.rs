//! Fields domain module (event-sourced).
//!
//! A field is a named parcel of land with an area; activities are logged
//! against fields.

pub mod field;

pub use field::{
    AssignCrop, CropAssigned, Field, FieldCommand, FieldEvent, FieldId, FieldRegistered,
    RegisterField,
};
