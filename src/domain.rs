use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of a persisted send attempt.
pub type EmailId = i64;

/// Content shared by every recipient of one bulk send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Campaign {
    pub sender: String,
    pub subject: String,
    pub body: String,
}

/// A persisted send attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Email {
    pub id: EmailId,
    pub sender: String,
    pub recipient: String,
    pub subject: String,
    pub body: String,
    pub is_sent: bool,
    pub opened: bool,
    pub created_at: NaiveDateTime,
    pub sent_at: Option<NaiveDateTime>,
    pub opened_at: Option<NaiveDateTime>,
}

/// Why a recipient did not reach the `sent` state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum FailureReason {
    Persistence(String),
    Template(String),
    Transport(String),
    Cancelled,
    /// The worker holding the recipient stopped before finishing it.
    Abandoned,
}

/// In-memory delivery state of one recipient within a single dispatch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SendStatus {
    pub sent: bool,
    pub opened: bool,
    pub sent_time: Option<DateTime<Utc>>,
    pub email_id: Option<EmailId>,
    pub failure: Option<FailureReason>,
}

impl SendStatus {
    /// Whether the recipient reached a terminal state other than `sent`.
    pub fn is_failed(&self) -> bool {
        !self.sent && self.failure.is_some()
    }
}

/// Messages accepted by the courier worker over ZeroMQ.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CourierMessage {
    /// Sends one campaign to many recipients. `sender` falls back to the
    /// configured default.
    SendCampaign {
        #[serde(default)]
        sender: Option<String>,
        subject: String,
        body: String,
        recipients: Vec<String>,
    },
    /// Sends the welcome email to a new subscriber.
    Subscribe { recipient: String },
    /// Records an open for a previously sent email.
    Track { email_id: EmailId },
}
