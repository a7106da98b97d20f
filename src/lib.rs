//! Charta: a clinical charting backend.
//!
//! SOAP notes with append-only edit history, patient lookup, ICD-10
//! diagnosis code resolution (local cache plus coding-authority fallback),
//! dictation transcription, and email-based password resets, all behind a
//! bearer-token JSON API.

pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod icd;
pub mod keepalive;
pub mod mailer;
pub mod models;
pub mod state;
pub mod transcription;
