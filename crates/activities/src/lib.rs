//! Activities domain module (event-sourced).
//!
//! An activity is one logged entry in a field's journal: a chemical
//! treatment, a fertilizer application, an inspection, or a general farm
//! activity. Treatment and fertilization entries may consume inventory; the
//! consumed amount is derived here and settled by the consumption ledger.

pub mod activity;

pub use activity::{
    Activity, ActivityCategory, ActivityCommand, ActivityDetails, ActivityEvent, ActivityId,
    ActivityLogged, ActivityRemoved, ActivityRevised, LogActivity, RemoveActivity, ReviseActivity,
    StockConsumption,
};
