//! Worker-pool fan-out of one campaign over its recipients.
//!
//! The orchestrator seeds the [`StatusLedger`] entry of every recipient
//! before pushing it onto a bounded queue, so a worker can never claim a
//! recipient whose entry does not exist yet. A full queue suspends the
//! orchestrator until a worker frees a slot.
//!
//! Each worker loops: claim a recipient, record the attempt, render the
//! body, deliver it, and update the ledger. Failures are isolated to the
//! recipient they happened on.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use tokio::sync::{Mutex, mpsc};
use tokio::task;
use tokio_util::sync::CancellationToken;

use crate::domain::{Campaign, FailureReason};
use crate::errors::Error;
use crate::repository::{EmailWriter, RepositoryResult};
use crate::template::{EmailData, Template};

use super::ledger::{CampaignReport, StatusLedger};
use super::service::{Envelope, Mailer};

/// Tuning knobs for [`Dispatcher`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchConfig {
    /// Number of concurrent workers.
    pub workers: usize,
    /// Capacity of the work queue between the orchestrator and workers.
    pub queue_capacity: usize,
    /// Overall deadline for one campaign. Unprocessed recipients are
    /// cancelled when it elapses.
    pub deadline: Option<Duration>,
    /// Base URL of the open-tracking endpoint.
    pub tracking_url: Option<String>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            workers: 10,
            queue_capacity: 100,
            deadline: None,
            tracking_url: None,
        }
    }
}

/// Concurrent bulk dispatch engine.
pub struct Dispatcher<R, M> {
    repo: Arc<R>,
    mailer: Arc<M>,
    template: Arc<Template>,
    config: DispatchConfig,
}

impl<R, M> Dispatcher<R, M>
where
    R: EmailWriter + Send + Sync + 'static,
    M: Mailer + 'static,
{
    /// Creates a dispatcher that renders every recipient with `template`.
    pub fn new(
        repo: Arc<R>,
        mailer: Arc<M>,
        template: Template,
        config: DispatchConfig,
    ) -> Result<Self, Error> {
        if config.workers == 0 {
            return Err(Error::Config("dispatch needs at least one worker".to_owned()));
        }
        if config.queue_capacity == 0 {
            return Err(Error::Config(
                "dispatch queue capacity must be positive".to_owned(),
            ));
        }

        Ok(Self {
            repo,
            mailer,
            template: Arc::new(template),
            config,
        })
    }

    pub fn repository(&self) -> &Arc<R> {
        &self.repo
    }

    pub fn mailer(&self) -> &M {
        &self.mailer
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Sends `campaign` to every recipient and returns their final state.
    ///
    /// The configured deadline, if any, cancels recipients that have not
    /// been claimed by the time it elapses.
    pub async fn dispatch(
        &self,
        campaign: Campaign,
        recipients: Vec<String>,
    ) -> Result<CampaignReport, Error> {
        let token = CancellationToken::new();
        let timer = self.config.deadline.map(|deadline| {
            let token = token.clone();
            tokio::spawn(async move {
                tokio::time::sleep(deadline).await;
                log::warn!("Campaign deadline of {deadline:?} elapsed, cancelling");
                token.cancel();
            })
        });

        let report = self.dispatch_with_cancel(campaign, recipients, token).await;

        if let Some(timer) = timer {
            timer.abort();
        }
        report
    }

    /// Same as [`Dispatcher::dispatch`] but observes `token` between
    /// recipients instead of the configured deadline.
    pub async fn dispatch_with_cancel(
        &self,
        campaign: Campaign,
        recipients: Vec<String>,
        token: CancellationToken,
    ) -> Result<CampaignReport, Error> {
        if recipients.is_empty() {
            log::info!("Campaign \"{}\" has no recipients", campaign.subject);
            return Ok(CampaignReport::default());
        }

        let ledger = Arc::new(StatusLedger::new());
        let campaign = Arc::new(campaign);
        let (tx, rx) = mpsc::channel::<String>(self.config.queue_capacity);
        let queue = Arc::new(Mutex::new(rx));
        let tracking_url: Option<Arc<str>> = self.config.tracking_url.as_deref().map(Arc::from);

        let handles: Vec<_> = (0..self.config.workers)
            .map(|worker_id| {
                let worker = Worker {
                    id: worker_id,
                    repo: Arc::clone(&self.repo),
                    mailer: Arc::clone(&self.mailer),
                    template: Arc::clone(&self.template),
                    campaign: Arc::clone(&campaign),
                    ledger: Arc::clone(&ledger),
                    queue: Arc::clone(&queue),
                    token: token.clone(),
                    tracking_url: tracking_url.clone(),
                };
                tokio::spawn(worker.run())
            })
            .collect();
        // Only workers hold the receiver, so a dead pool closes the queue.
        drop(queue);

        for recipient in recipients {
            if !ledger.initialize(&recipient) {
                log::warn!("Skipping duplicate recipient {recipient}");
                continue;
            }
            if token.is_cancelled() {
                ledger.mark_failed(&recipient, FailureReason::Cancelled);
                continue;
            }
            if let Err(mpsc::error::SendError(recipient)) = tx.send(recipient).await {
                log::error!("All dispatch workers stopped, cannot queue {recipient}");
                ledger.mark_failed(&recipient, FailureReason::Abandoned);
            }
        }
        drop(tx);

        for result in join_all(handles).await {
            if let Err(e) = result {
                log::error!("Dispatch worker panicked: {e:?}");
            }
        }

        let abandoned = ledger.settle_pending(FailureReason::Abandoned);
        if abandoned > 0 {
            log::error!("{abandoned} recipients were left unprocessed");
        }

        let report = ledger.report();
        report.log_summary();
        Ok(report)
    }
}

struct Worker<R, M> {
    id: usize,
    repo: Arc<R>,
    mailer: Arc<M>,
    template: Arc<Template>,
    campaign: Arc<Campaign>,
    ledger: Arc<StatusLedger>,
    queue: Arc<Mutex<mpsc::Receiver<String>>>,
    token: CancellationToken,
    tracking_url: Option<Arc<str>>,
}

impl<R, M> Worker<R, M>
where
    R: EmailWriter + Send + Sync + 'static,
    M: Mailer + 'static,
{
    async fn run(self) {
        loop {
            let next = self.queue.lock().await.recv().await;
            let Some(recipient) = next else {
                break;
            };

            if self.token.is_cancelled() {
                log::warn!("Campaign cancelled, not sending to {recipient}");
                self.ledger.mark_failed(&recipient, FailureReason::Cancelled);
                continue;
            }

            self.process(&recipient).await;
        }
        log::debug!("Dispatch worker {} finished", self.id);
    }

    async fn process(&self, recipient: &str) {
        let inserted = {
            let repo = Arc::clone(&self.repo);
            let campaign = Arc::clone(&self.campaign);
            let recipient = recipient.to_owned();
            blocking(move || repo.insert_email(&campaign, &recipient)).await
        };
        let email_id = match inserted {
            Ok(id) => id,
            Err(e) => {
                log::error!("Cannot record email to {recipient}: {e}");
                self.ledger
                    .mark_failed(recipient, FailureReason::Persistence(e));
                return;
            }
        };
        self.ledger.set_email_id(recipient, email_id);

        let data = EmailData::for_recipient(
            &self.campaign,
            recipient,
            Some(email_id),
            self.tracking_url.as_deref(),
        );
        let html = match self.template.render(&data) {
            Ok(html) => html,
            Err(e) => {
                log::error!("Cannot render email to {recipient}: {e}");
                self.ledger
                    .mark_failed(recipient, FailureReason::Template(e.to_string()));
                return;
            }
        };

        let envelope = Envelope::new(
            &self.campaign.sender,
            recipient,
            &self.campaign.subject,
            html,
        )
        .with_email_id(email_id);

        if let Err(e) = self.mailer.send(&envelope).await {
            log::error!("Failed to send email to {recipient}: {e}");
            self.ledger
                .mark_failed(recipient, FailureReason::Transport(e.to_string()));
            return;
        }

        log::info!("Email sent successfully to {recipient}");
        self.ledger.mark_sent(recipient, Utc::now());

        let repo = Arc::clone(&self.repo);
        if let Err(e) = blocking(move || repo.update_email_status(email_id)).await {
            log::error!("Failed to update sent status for email_id {email_id}: {e}");
        }
    }
}

/// Runs a repository call on the blocking pool so SQLite lock waits do not
/// stall the runtime threads the workers and the deadline timer share.
async fn blocking<T, F>(call: F) -> Result<T, String>
where
    F: FnOnce() -> RepositoryResult<T> + Send + 'static,
    T: Send + 'static,
{
    match task::spawn_blocking(call).await {
        Ok(result) => result.map_err(|e| e.to_string()),
        Err(e) => Err(format!("repository task failed: {e}")),
    }
}
