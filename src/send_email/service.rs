use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::task;

use crate::domain::{Campaign, CourierMessage, EmailId};
use crate::errors::Error;
use crate::repository::EmailWriter;
use crate::template::{EmailData, Template};

use super::dispatcher::Dispatcher;
use super::ledger::CampaignReport;

/// A fully rendered message addressed to a single recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub sender: String,
    pub recipient: String,
    pub subject: String,
    pub html_body: String,
    pub message_id: Option<String>,
}

impl Envelope {
    pub fn new(sender: &str, recipient: &str, subject: &str, html_body: String) -> Self {
        Self {
            sender: sender.to_owned(),
            recipient: recipient.to_owned(),
            subject: subject.to_owned(),
            html_body,
            message_id: None,
        }
    }

    /// Derives a stable `Message-ID` from the attempt id and the sender domain.
    pub fn with_email_id(mut self, email_id: EmailId) -> Self {
        let domain = self
            .sender
            .rsplit_once('@')
            .map(|(_, domain)| domain)
            .unwrap_or("localhost");
        self.message_id = Some(format!("{email_id}@{domain}"));
        self
    }
}

/// Underlying cause of a failed delivery.
#[derive(Debug, Error)]
pub enum DeliveryFailure {
    #[error("smtp error: {0}")]
    Smtp(#[from] mail_send::Error),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("rejected: {0}")]
    Rejected(String),
}

/// A single delivery attempt failed.
#[derive(Debug, Error)]
#[error("delivery to {recipient} failed: {cause}")]
pub struct TransportError {
    pub recipient: String,
    #[source]
    pub cause: DeliveryFailure,
}

impl TransportError {
    pub fn new(recipient: &str, cause: impl Into<DeliveryFailure>) -> Self {
        Self {
            recipient: recipient.to_owned(),
            cause: cause.into(),
        }
    }
}

/// Abstraction over message delivery.
#[async_trait]
pub trait Mailer: Send + Sync {
    /// Attempts exactly one delivery of `envelope`. No retries.
    async fn send(&self, envelope: &Envelope) -> Result<(), TransportError>;
}

/// Welcome message settings for the subscribe flow.
#[derive(Debug, Clone)]
pub struct Welcome {
    pub template: Arc<Template>,
    pub subject: String,
}

/// Handles inbound [`CourierMessage`]s.
pub struct Courier<R, M> {
    dispatcher: Dispatcher<R, M>,
    welcome: Welcome,
    default_sender: String,
}

impl<R, M> Courier<R, M>
where
    R: EmailWriter + Send + Sync + 'static,
    M: Mailer + 'static,
{
    pub fn new(dispatcher: Dispatcher<R, M>, welcome: Welcome, default_sender: String) -> Self {
        Self {
            dispatcher,
            welcome,
            default_sender,
        }
    }

    /// Processes one inbound message.
    pub async fn handle(&self, msg: CourierMessage) -> Result<(), Error> {
        match msg {
            CourierMessage::SendCampaign {
                sender,
                subject,
                body,
                recipients,
            } => {
                let campaign = Campaign {
                    sender: sender.unwrap_or_else(|| self.default_sender.clone()),
                    subject,
                    body,
                };
                self.send_campaign(campaign, recipients).await?;
            }
            CourierMessage::Subscribe { recipient } => self.subscribe(&recipient).await?,
            CourierMessage::Track { email_id } => self.track(email_id).await?,
        }
        Ok(())
    }

    /// Fans `campaign` out to `recipients` and returns the completed ledger.
    pub async fn send_campaign(
        &self,
        campaign: Campaign,
        recipients: Vec<String>,
    ) -> Result<CampaignReport, Error> {
        log::info!(
            "Sending campaign \"{}\" to {} recipients",
            campaign.subject,
            recipients.len()
        );
        self.dispatcher.dispatch(campaign, recipients).await
    }

    /// Sends the welcome email to a single new subscriber.
    pub async fn subscribe(&self, recipient: &str) -> Result<(), Error> {
        let data = EmailData {
            subject: self.welcome.subject.clone(),
            recipient: recipient.to_owned(),
            ..EmailData::default()
        };
        let html = self.welcome.template.render(&data).inspect_err(|e| {
            log::error!("Cannot render welcome email for {recipient}: {e}");
        })?;

        let envelope = Envelope::new(&self.default_sender, recipient, &self.welcome.subject, html);
        if let Err(e) = self.dispatcher.mailer().send(&envelope).await {
            log::error!("Failed to send welcome email to {recipient}: {e}");
            return Err(e.into());
        }

        log::info!("Welcome email sent successfully to {recipient}");
        Ok(())
    }

    /// Records that the attempt `email_id` was opened.
    pub async fn track(&self, email_id: EmailId) -> Result<(), Error> {
        let repo = Arc::clone(self.dispatcher.repository());
        task::spawn_blocking(move || repo.update_email_tracking(email_id))
            .await?
            .inspect_err(|e| log::error!("Cannot record open for email_id {email_id}: {e}"))?;
        log::info!("Recorded open for email_id {email_id}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::RepositoryError;
    use crate::send_email::dispatcher::DispatchConfig;
    use crate::send_email::testing::{FakeMailer, MemoryRepository};

    type Fixture = (
        Courier<MemoryRepository, FakeMailer>,
        Arc<MemoryRepository>,
        Arc<FakeMailer>,
    );

    fn courier(mailer: FakeMailer) -> Fixture {
        let repo = Arc::new(MemoryRepository::default());
        let mailer = Arc::new(mailer);
        let template = Template::parse("<p>{{body}}</p>", "htmlBody").unwrap();
        let dispatcher = Dispatcher::new(
            Arc::clone(&repo),
            Arc::clone(&mailer),
            template,
            DispatchConfig::default(),
        )
        .unwrap();
        let welcome = Welcome {
            template: Arc::new(
                Template::parse(
                    r#"{{define "htmlBody"}}Welcome {{recipient}}!{{end}}"#,
                    "htmlBody",
                )
                .unwrap(),
            ),
            subject: "Welcome aboard".into(),
        };
        (
            Courier::new(dispatcher, welcome, "news@example.com".into()),
            repo,
            mailer,
        )
    }

    #[test]
    fn message_id_uses_sender_domain() {
        let envelope = Envelope::new("news@example.com", "a@x.com", "Hi", String::new())
            .with_email_id(12);
        assert_eq!(envelope.message_id.as_deref(), Some("12@example.com"));
    }

    #[tokio::test]
    async fn subscribe_sends_one_welcome_email() {
        let (courier, repo, mailer) = courier(FakeMailer::default());

        courier.subscribe("new@x.com").await.unwrap();

        let sent = mailer.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].recipient, "new@x.com");
        assert_eq!(sent[0].subject, "Welcome aboard");
        assert_eq!(sent[0].html_body, "Welcome new@x.com!");
        assert!(repo.emails().is_empty());
    }

    #[tokio::test]
    async fn subscribe_reports_transport_failure() {
        let (courier, _repo, _mailer) = courier(FakeMailer::failing_for(["new@x.com"]));

        let err = courier.subscribe("new@x.com").await.unwrap_err();
        assert!(matches!(err, Error::Transport(ref e) if e.recipient == "new@x.com"));
    }

    #[tokio::test]
    async fn track_is_idempotent() {
        let (courier, repo, _mailer) = courier(FakeMailer::default());
        courier
            .handle(CourierMessage::SendCampaign {
                sender: None,
                subject: "News".into(),
                body: "Hello".into(),
                recipients: vec!["a@x.com".into()],
            })
            .await
            .unwrap();
        let id = repo.emails()[0].id;

        courier.handle(CourierMessage::Track { email_id: id }).await.unwrap();
        courier.handle(CourierMessage::Track { email_id: id }).await.unwrap();

        let email = &repo.emails()[0];
        assert!(email.is_sent);
        assert!(email.opened);
        assert_eq!(email.sender, "news@example.com");
    }

    #[tokio::test]
    async fn track_unknown_email_fails() {
        let (courier, _repo, _mailer) = courier(FakeMailer::default());
        let err = courier.track(404).await.unwrap_err();
        assert!(matches!(err, Error::Repository(RepositoryError::NotFound)));
    }

    #[test]
    fn smtp_failures_surface_as_transport_errors() {
        let err: Error = TransportError::new("a@x.com", mail_send::Error::MissingMailFrom).into();

        assert!(matches!(
            err,
            Error::Transport(TransportError {
                cause: DeliveryFailure::Smtp(_),
                ref recipient,
            }) if recipient == "a@x.com"
        ));
        assert!(
            err.to_string()
                .starts_with("transport error: delivery to a@x.com failed: smtp error")
        );
    }
}
