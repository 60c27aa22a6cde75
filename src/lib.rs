//! Bulk email campaign worker.
//!
//! Campaigns arrive over ZeroMQ, are fanned out to a fixed pool of
//! workers that render a per-recipient body, deliver it over SMTP and
//! record every attempt in SQLite.

pub mod db;
pub mod domain;
pub mod errors;
pub mod models;
pub mod repository;
pub mod schema;
pub mod send_email;
pub mod settings;
pub mod template;
