//! In-memory collaborators for unit tests.

use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::domain::{Campaign, Email, EmailId};
use crate::repository::{EmailWriter, RepositoryError, RepositoryResult};

use super::service::{DeliveryFailure, Envelope, Mailer, TransportError};

/// Records every envelope and fails or panics for configured recipients.
#[derive(Default)]
pub struct FakeMailer {
    failing: HashSet<String>,
    panicking: HashSet<String>,
    delay: Option<Duration>,
    sent: Mutex<Vec<Envelope>>,
}

impl FakeMailer {
    pub fn failing_for<'a>(recipients: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            failing: recipients.into_iter().map(str::to_owned).collect(),
            ..Self::default()
        }
    }

    pub fn panicking_for<'a>(recipients: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            panicking: recipients.into_iter().map(str::to_owned).collect(),
            ..Self::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn sent(&self) -> Vec<Envelope> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Mailer for FakeMailer {
    async fn send(&self, envelope: &Envelope) -> Result<(), TransportError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.panicking.contains(&envelope.recipient) {
            panic!("mailer crashed while sending to {}", envelope.recipient);
        }
        if self.failing.contains(&envelope.recipient) {
            return Err(TransportError::new(
                &envelope.recipient,
                DeliveryFailure::Rejected("550 mailbox unavailable".into()),
            ));
        }
        self.sent.lock().unwrap().push(envelope.clone());
        Ok(())
    }
}

/// Vector-backed [`EmailWriter`].
#[derive(Default)]
pub struct MemoryRepository {
    rejected: HashSet<String>,
    insert_delay: Option<Duration>,
    emails: Mutex<Vec<Email>>,
}

impl MemoryRepository {
    pub fn rejecting<'a>(recipients: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            rejected: recipients.into_iter().map(str::to_owned).collect(),
            ..Self::default()
        }
    }

    /// Blocks the calling thread for `delay` on every insert, like a
    /// contended SQLite write.
    pub fn with_insert_delay(mut self, delay: Duration) -> Self {
        self.insert_delay = Some(delay);
        self
    }

    pub fn emails(&self) -> Vec<Email> {
        self.emails.lock().unwrap().clone()
    }

    fn modify(&self, id: EmailId, apply: impl FnOnce(&mut Email)) -> RepositoryResult<()> {
        let mut emails = self.emails.lock().unwrap();
        let email = emails
            .iter_mut()
            .find(|email| email.id == id)
            .ok_or(RepositoryError::NotFound)?;
        apply(email);
        Ok(())
    }
}

impl EmailWriter for MemoryRepository {
    fn insert_email(&self, campaign: &Campaign, recipient: &str) -> RepositoryResult<EmailId> {
        if let Some(delay) = self.insert_delay {
            std::thread::sleep(delay);
        }
        if self.rejected.contains(recipient) {
            return Err(RepositoryError::ValidationError(format!(
                "cannot store {recipient}"
            )));
        }
        let mut emails = self.emails.lock().unwrap();
        let id = emails.len() as EmailId + 1;
        emails.push(Email {
            id,
            sender: campaign.sender.clone(),
            recipient: recipient.to_owned(),
            subject: campaign.subject.clone(),
            body: campaign.body.clone(),
            is_sent: false,
            opened: false,
            created_at: Utc::now().naive_utc(),
            sent_at: None,
            opened_at: None,
        });
        Ok(id)
    }

    fn update_email_status(&self, id: EmailId) -> RepositoryResult<()> {
        self.modify(id, |email| {
            email.is_sent = true;
            email.sent_at = Some(Utc::now().naive_utc());
        })
    }

    fn update_email_tracking(&self, id: EmailId) -> RepositoryResult<()> {
        self.modify(id, |email| {
            email.opened = true;
            email.opened_at.get_or_insert_with(|| Utc::now().naive_utc());
        })
    }
}
