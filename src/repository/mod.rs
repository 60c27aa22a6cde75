//! Repository interfaces and Diesel-backed implementation.
//!
//! This module defines the traits the dispatch engine uses to record send
//! attempts alongside [`DieselRepository`], a small wrapper around a Diesel
//! connection pool.

use thiserror::Error;

use crate::db::{DbConnection, DbPool};
use crate::domain::{Campaign, Email, EmailId};

pub mod email;

/// Failures reported by the persistence layer.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// The requested record does not exist.
    #[error("record not found")]
    NotFound,

    /// The stored data violates a domain constraint.
    #[error("validation error: {0}")]
    ValidationError(String),

    /// Query execution failed.
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),

    /// No connection could be checked out of the pool.
    #[error("connection pool error: {0}")]
    Pool(#[from] diesel::r2d2::PoolError),
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// Concrete repository backed by a Diesel connection pool.
#[derive(Clone)]
pub struct DieselRepository {
    pool: DbPool, // r2d2::Pool is cheap to clone
}

impl DieselRepository {
    /// Creates a new [`DieselRepository`] from the given pool.
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn conn(&self) -> RepositoryResult<DbConnection> {
        Ok(self.pool.get()?)
    }
}

/// Read-only operations for persisted send attempts.
pub trait EmailReader {
    /// Fetches a single attempt by its identifier.
    fn get_email_by_id(&self, id: EmailId) -> RepositoryResult<Option<Email>>;

    /// Lists all attempts, newest first.
    fn list_emails(&self) -> RepositoryResult<Vec<Email>>;

    /// Lists every attempt made to `address`, newest first.
    fn list_emails_by_recipient(&self, address: &str) -> RepositoryResult<Vec<Email>>;
}

/// Write operations for persisted send attempts.
pub trait EmailWriter {
    /// Records a new attempt for `recipient` and returns its identifier.
    ///
    /// Called before delivery so that a durable record exists even if the
    /// send fails.
    fn insert_email(&self, campaign: &Campaign, recipient: &str) -> RepositoryResult<EmailId>;

    /// Marks the attempt as delivered.
    fn update_email_status(&self, id: EmailId) -> RepositoryResult<()>;

    /// Marks the attempt as opened. Repeated calls keep the first open time.
    ///
    /// # Example
    /// ```no_run
    /// use pushkind_courier::repository::{DieselRepository, EmailWriter};
    /// # fn demo(repo: &DieselRepository) {
    /// let _ = repo.update_email_tracking(42);
    /// # }
    /// ```
    fn update_email_tracking(&self, id: EmailId) -> RepositoryResult<()>;
}
