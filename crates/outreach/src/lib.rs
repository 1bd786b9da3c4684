//! `funil-outreach` — bulk email campaigns.
//!
//! A campaign is a named subject/body plus a recipient list. Sending is a
//! bounded sequential loop with a fixed inter-send delay; there is no
//! scheduler, no parallelism and no retry.

pub mod campaign;
pub mod sender;
pub mod sent_email;

pub use campaign::{
    Campaign, CampaignId, CampaignStatus, Recipient, RecipientId, RecipientStatus,
};
pub use sender::{send_pending, MailSender, OutboundEmail, SendError, SendOutcome, INTER_SEND_DELAY};
pub use sent_email::SentEmail;
