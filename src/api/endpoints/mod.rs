//! Request handlers, one module per resource.

pub mod auth;
pub mod health;
pub mod icd10;
pub mod patients;
pub mod soap_notes;
pub mod transcription;
