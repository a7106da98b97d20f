//! Request middleware: bearer-token auth and access logging.

pub mod audit;
pub mod auth;
