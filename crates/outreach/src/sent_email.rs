use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use funil_contacts::{OrganizationId, PersonId};
use funil_core::{RecordId, TenantId};

use crate::campaign::CampaignId;

/// Record of one delivered email.
///
/// This is a child record of an organization and/or person: merges repoint
/// it along with the other children.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentEmail {
    pub id: RecordId,
    pub tenant_id: TenantId,
    pub organization_id: Option<OrganizationId>,
    pub person_id: Option<PersonId>,
    pub campaign_id: Option<CampaignId>,
    pub to_email: String,
    pub subject: String,
    pub sent_at: DateTime<Utc>,
}

impl SentEmail {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tenant_id: TenantId,
        organization_id: Option<OrganizationId>,
        person_id: Option<PersonId>,
        campaign_id: Option<CampaignId>,
        to_email: impl Into<String>,
        subject: impl Into<String>,
        sent_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: RecordId::new(),
            tenant_id,
            organization_id,
            person_id,
            campaign_id,
            to_email: to_email.into(),
            subject: subject.into(),
            sent_at,
        }
    }
}
