//! Per-campaign delivery bookkeeping shared by dispatch workers.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::{EmailId, FailureReason, SendStatus};

/// Recipient → [`SendStatus`] table guarded by a single mutex.
///
/// Every mutation is one short read-modify-write of a single entry, so the
/// lock is never held across I/O.
#[derive(Debug, Default)]
pub struct StatusLedger {
    entries: Mutex<HashMap<String, SendStatus>>,
}

impl StatusLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the initial entry for `recipient`.
    ///
    /// Returns `false` if the recipient is already present.
    pub fn initialize(&self, recipient: &str) -> bool {
        let mut entries = self.lock();
        if entries.contains_key(recipient) {
            return false;
        }
        entries.insert(recipient.to_owned(), SendStatus::default());
        true
    }

    pub fn set_email_id(&self, recipient: &str, email_id: EmailId) -> bool {
        self.update(recipient, |status| status.email_id = Some(email_id))
    }

    /// Records a confirmed delivery.
    pub fn mark_sent(&self, recipient: &str, at: DateTime<Utc>) -> bool {
        self.update(recipient, |status| {
            status.sent = true;
            status.sent_time = Some(at);
            status.failure = None;
        })
    }

    /// Records why `recipient` was not delivered. A sent entry is left as is.
    pub fn mark_failed(&self, recipient: &str, reason: FailureReason) -> bool {
        self.update(recipient, |status| {
            if !status.sent {
                status.failure = Some(reason);
            }
        })
    }

    pub fn mark_opened(&self, recipient: &str) -> bool {
        self.update(recipient, |status| status.opened = true)
    }

    /// Marks every entry that is neither sent nor failed with `reason`.
    ///
    /// Returns how many entries were settled.
    pub fn settle_pending(&self, reason: FailureReason) -> usize {
        let mut entries = self.lock();
        let mut settled = 0;
        for status in entries.values_mut() {
            if !status.sent && status.failure.is_none() {
                status.failure = Some(reason.clone());
                settled += 1;
            }
        }
        settled
    }

    pub fn get(&self, recipient: &str) -> Option<SendStatus> {
        self.lock().get(recipient).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Copies the current state into a [`CampaignReport`].
    pub fn report(&self) -> CampaignReport {
        let statuses = self
            .lock()
            .iter()
            .map(|(recipient, status)| (recipient.clone(), status.clone()))
            .collect();
        CampaignReport { statuses }
    }

    fn update(&self, recipient: &str, apply: impl FnOnce(&mut SendStatus)) -> bool {
        match self.lock().get_mut(recipient) {
            Some(status) => {
                apply(status);
                true
            }
            None => {
                log::warn!("No ledger entry for {recipient}");
                false
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, SendStatus>> {
        // A panicking worker cannot leave an entry half-written.
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Final state of every recipient of one dispatch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CampaignReport {
    pub statuses: BTreeMap<String, SendStatus>,
}

impl CampaignReport {
    pub fn len(&self) -> usize {
        self.statuses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statuses.is_empty()
    }

    pub fn get(&self, recipient: &str) -> Option<&SendStatus> {
        self.statuses.get(recipient)
    }

    pub fn sent_count(&self) -> usize {
        self.statuses.values().filter(|status| status.sent).count()
    }

    pub fn failed_count(&self) -> usize {
        self.statuses.values().filter(|status| status.is_failed()).count()
    }

    pub fn log_summary(&self) {
        for (recipient, status) in &self.statuses {
            log::info!(
                "Email to {}: sent={}, opened={}, sent_time={}",
                recipient,
                status.sent,
                status.opened,
                status
                    .sent_time
                    .map(|time| time.to_rfc3339())
                    .unwrap_or_else(|| "-".to_owned())
            );
        }
        log::info!(
            "Campaign finished: {} recipients, {} sent, {} failed",
            self.len(),
            self.sent_count(),
            self.failed_count()
        );
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn initialize_rejects_duplicates() {
        let ledger = StatusLedger::new();
        assert!(ledger.initialize("a@x.com"));
        assert!(!ledger.initialize("a@x.com"));
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.get("a@x.com"), Some(SendStatus::default()));
    }

    #[test]
    fn updates_require_an_entry() {
        let ledger = StatusLedger::new();
        assert!(!ledger.mark_sent("ghost@x.com", Utc::now()));
        assert!(ledger.is_empty());
    }

    #[test]
    fn sent_is_terminal() {
        let ledger = StatusLedger::new();
        ledger.initialize("a@x.com");
        let at = Utc::now();
        ledger.mark_sent("a@x.com", at);
        ledger.mark_failed("a@x.com", FailureReason::Transport("late".into()));

        let status = ledger.get("a@x.com").unwrap();
        assert!(status.sent);
        assert_eq!(status.sent_time, Some(at));
        assert_eq!(status.failure, None);
    }

    #[test]
    fn mark_opened_is_idempotent() {
        let ledger = StatusLedger::new();
        ledger.initialize("a@x.com");
        ledger.mark_sent("a@x.com", Utc::now());
        assert!(ledger.mark_opened("a@x.com"));
        assert!(ledger.mark_opened("a@x.com"));
        assert!(ledger.get("a@x.com").unwrap().opened);
    }

    #[test]
    fn settle_pending_only_touches_unfinished_entries() {
        let ledger = StatusLedger::new();
        for recipient in ["a@x.com", "b@x.com", "c@x.com"] {
            ledger.initialize(recipient);
        }
        ledger.mark_sent("a@x.com", Utc::now());
        ledger.mark_failed("b@x.com", FailureReason::Template("bad".into()));

        assert_eq!(ledger.settle_pending(FailureReason::Abandoned), 1);

        let report = ledger.report();
        assert_eq!(report.sent_count(), 1);
        assert_eq!(report.failed_count(), 2);
        assert_eq!(
            report.get("c@x.com").unwrap().failure,
            Some(FailureReason::Abandoned)
        );
    }

    #[test]
    fn concurrent_updates_do_not_interfere() {
        let ledger = Arc::new(StatusLedger::new());
        let recipients: Vec<String> = (0..64).map(|i| format!("user{i}@x.com")).collect();
        for recipient in &recipients {
            ledger.initialize(recipient);
        }

        let handles: Vec<_> = recipients
            .chunks(8)
            .map(|chunk| {
                let ledger = Arc::clone(&ledger);
                let chunk = chunk.to_vec();
                std::thread::spawn(move || {
                    for recipient in chunk {
                        ledger.mark_sent(&recipient, Utc::now());
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let report = ledger.report();
        assert_eq!(report.len(), 64);
        assert_eq!(report.sent_count(), 64);
    }
}
