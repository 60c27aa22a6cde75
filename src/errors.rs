//! Common error type for the courier worker.
//!
//! The worker talks to an SMTP server, a ZeroMQ socket and a SQLite
//! database. This module consolidates the possible failures into a single
//! [`Error`] enum so that callers can use a simple `Result<T, Error>`
//! without relying on panicking calls like `unwrap` or `expect`.

use thiserror::Error;

use crate::repository::RepositoryError;
use crate::send_email::service::TransportError;
use crate::template::TemplateError;

/// Errors that can occur while running the worker.
#[derive(Debug, Error)]
pub enum Error {
    /// Errors originating from ZeroMQ operations.
    #[error("zmq error: {0}")]
    Zmq(#[from] zmq::Error),

    /// Persistence layer failures.
    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),

    /// Errors while constructing the database pool.
    #[error("database pool error: {0}")]
    Pool(#[from] diesel::r2d2::PoolError),

    /// Settings could not be loaded or deserialised.
    #[error("settings error: {0}")]
    Settings(#[from] config::ConfigError),

    /// Template loading or rendering failures.
    #[error("template error: {0}")]
    Template(#[from] TemplateError),

    /// A single delivery failed, including SMTP protocol errors.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// A blocking repository task did not complete.
    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// Problems with environment or configuration.
    #[error("configuration error: {0}")]
    Config(String),
}
