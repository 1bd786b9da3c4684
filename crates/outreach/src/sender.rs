//! Sequential campaign sender.
//!
//! One upstream call per recipient with a fixed inter-send delay to stay
//! under provider rate limits. No retry; a failed recipient is recorded and
//! the loop moves on.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;

use crate::campaign::{Campaign, RecipientStatus};

/// Fixed pause between consecutive sends.
pub const INTER_SEND_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, Error)]
pub enum SendError {
    #[error("provider rejected the message: {0}")]
    Rejected(String),

    #[error("provider unavailable: {0}")]
    Unavailable(String),
}

/// One rendered outbound email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundEmail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Seam to the transactional email provider.
#[async_trait]
pub trait MailSender: Send + Sync {
    async fn send(&self, email: &OutboundEmail) -> Result<(), SendError>;
}

/// Result of a sending pass over a campaign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SendOutcome {
    pub attempted: usize,
    pub sent: usize,
    pub failed: usize,
}

/// Send every pending recipient of `campaign`, sequentially.
///
/// The campaign must already be in the `Sending` state. Recipient statuses
/// are updated in place; the campaign flips to `Done` when the last pending
/// recipient resolves. Cancelling the campaign between iterations stops the
/// loop (its pending recipients were already marked skipped).
pub async fn send_pending<S: MailSender + ?Sized>(
    campaign: &mut Campaign,
    sender: &S,
    delay: Duration,
) -> SendOutcome {
    let mut outcome = SendOutcome::default();
    let mut first = true;

    loop {
        let Some((recipient_id, email)) = campaign.pending().next().map(|r| {
            (
                r.id,
                OutboundEmail {
                    to: r.email.clone(),
                    subject: campaign.subject.clone(),
                    body: campaign.body.clone(),
                },
            )
        }) else {
            break;
        };

        if !first && !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        first = false;

        outcome.attempted += 1;
        let now = Utc::now();
        let status = match sender.send(&email).await {
            Ok(()) => {
                outcome.sent += 1;
                RecipientStatus::Sent { sent_at: now }
            }
            Err(err) => {
                tracing::warn!(to = %email.to, error = %err, "campaign send failed");
                outcome.failed += 1;
                RecipientStatus::Failed {
                    error: err.to_string(),
                }
            }
        };

        // Recipient came from this campaign, so the lookup cannot miss.
        let _ = campaign.record_result(recipient_id, status, now);
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use chrono::Utc;
    use funil_core::{RecordId, TenantId, UserId};

    use crate::campaign::{CampaignId, CampaignStatus};

    struct FakeSender {
        sent: Mutex<Vec<String>>,
        fail_for: Option<String>,
    }

    #[async_trait]
    impl MailSender for FakeSender {
        async fn send(&self, email: &OutboundEmail) -> Result<(), SendError> {
            if self.fail_for.as_deref() == Some(email.to.as_str()) {
                return Err(SendError::Rejected("bounced".to_string()));
            }
            self.sent.lock().unwrap().push(email.to.clone());
            Ok(())
        }
    }

    fn sending_campaign(addresses: &[&str]) -> Campaign {
        let now = Utc::now();
        let mut c = Campaign::new(
            CampaignId::new(RecordId::new()),
            TenantId::new(),
            "Teste",
            "Assunto",
            "Corpo",
            UserId::new(),
            now,
        )
        .unwrap();
        for a in addresses {
            c.add_recipient(*a, None, now).unwrap();
        }
        c.start_sending(now).unwrap();
        c
    }

    #[tokio::test]
    async fn sends_every_pending_recipient_in_order() {
        let mut campaign = sending_campaign(&["a@x.com", "b@x.com", "c@x.com"]);
        let sender = FakeSender {
            sent: Mutex::new(Vec::new()),
            fail_for: None,
        };

        let outcome = send_pending(&mut campaign, &sender, Duration::ZERO).await;

        assert_eq!(outcome.attempted, 3);
        assert_eq!(outcome.sent, 3);
        assert_eq!(outcome.failed, 0);
        assert_eq!(
            *sender.sent.lock().unwrap(),
            vec!["a@x.com", "b@x.com", "c@x.com"]
        );
        assert_eq!(campaign.status, CampaignStatus::Done);
    }

    #[tokio::test]
    async fn a_failure_is_recorded_and_the_loop_continues() {
        let mut campaign = sending_campaign(&["a@x.com", "b@x.com", "c@x.com"]);
        let sender = FakeSender {
            sent: Mutex::new(Vec::new()),
            fail_for: Some("b@x.com".to_string()),
        };

        let outcome = send_pending(&mut campaign, &sender, Duration::ZERO).await;

        assert_eq!(outcome.sent, 2);
        assert_eq!(outcome.failed, 1);
        assert_eq!(campaign.sent_count(), 2);
        assert_eq!(campaign.failed_count(), 1);
        assert_eq!(campaign.status, CampaignStatus::Done);
    }
}
