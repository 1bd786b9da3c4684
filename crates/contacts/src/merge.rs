//! Merge planning for duplicate organizations/people.
//!
//! Everything here is pure: resolving winning field values, suggesting which
//! record to keep, and the backup snapshot taken before a merge executes.
//! The transactional execution lives in the store layer.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use funil_core::{EntityKind, RecordId, TenantId};

use crate::organization::Organization;
use crate::person::Person;

/// Backups survive this long before the retention sweep removes them.
pub const BACKUP_TTL_DAYS: i64 = 7;

/// Which of the two records a field value is taken from.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeSide {
    Kept,
    Removed,
}

/// Field-by-field winner choices for an organization merge.
///
/// `None` applies the default rule: the kept record's value wins unless it is
/// empty, in which case the removed record's value fills the gap.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OrganizationFieldChoices {
    pub name: Option<MergeSide>,
    pub legal_name: Option<MergeSide>,
    pub cnpj: Option<MergeSide>,
    pub email: Option<MergeSide>,
    pub phone: Option<MergeSide>,
    pub website: Option<MergeSide>,
    pub main_activity: Option<MergeSide>,
    pub address: Option<MergeSide>,
    pub owner: Option<MergeSide>,
}

/// Field-by-field winner choices for a person merge.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PersonFieldChoices {
    pub name: Option<MergeSide>,
    pub email: Option<MergeSide>,
    pub phone: Option<MergeSide>,
    pub whatsapp: Option<MergeSide>,
    pub job_title: Option<MergeSide>,
    pub organization: Option<MergeSide>,
    pub owner: Option<MergeSide>,
}

/// Records that can act as a merge primary.
pub trait Mergeable {
    fn filled_field_count(&self) -> usize;
    fn created_at(&self) -> DateTime<Utc>;
}

impl Mergeable for Organization {
    fn filled_field_count(&self) -> usize {
        Organization::filled_field_count(self)
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

impl Mergeable for Person {
    fn filled_field_count(&self) -> usize {
        Person::filled_field_count(self)
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// Suggest which of two duplicates to keep.
///
/// The record with more filled fields wins; on a tie the older-created record
/// is kept. Returns `(kept, removed)`.
pub fn suggest_primary<'a, T: Mergeable>(a: &'a T, b: &'a T) -> (&'a T, &'a T) {
    let a_filled = a.filled_field_count();
    let b_filled = b.filled_field_count();

    if a_filled > b_filled {
        (a, b)
    } else if b_filled > a_filled {
        (b, a)
    } else if a.created_at() <= b.created_at() {
        (a, b)
    } else {
        (b, a)
    }
}

/// Apply winning field values to the kept organization.
///
/// Returns the kept record with resolved values; `removed` is untouched.
pub fn resolve_organization(
    kept: &Organization,
    removed: &Organization,
    choices: &OrganizationFieldChoices,
    now: DateTime<Utc>,
) -> Organization {
    let mut out = kept.clone();

    out.name = match choices.name {
        Some(MergeSide::Removed) => removed.name.clone(),
        _ => kept.name.clone(),
    };
    out.legal_name = pick(choices.legal_name, &kept.legal_name, &removed.legal_name);
    out.cnpj = pick(choices.cnpj, &kept.cnpj, &removed.cnpj);
    out.email = pick(choices.email, &kept.email, &removed.email);
    out.phone = pick(choices.phone, &kept.phone, &removed.phone);
    out.website = pick(choices.website, &kept.website, &removed.website);
    out.main_activity = pick(
        choices.main_activity,
        &kept.main_activity,
        &removed.main_activity,
    );
    out.address = match choices.address {
        Some(MergeSide::Removed) => removed.address.clone(),
        Some(MergeSide::Kept) => kept.address.clone(),
        None if kept.address.is_empty() => removed.address.clone(),
        None => kept.address.clone(),
    };
    out.owner_id = match choices.owner {
        Some(MergeSide::Removed) => removed.owner_id,
        _ => kept.owner_id,
    };
    out.enriched_at = kept.enriched_at.or(removed.enriched_at);
    out.updated_at = now;
    out
}

/// Apply winning field values to the kept person.
pub fn resolve_person(
    kept: &Person,
    removed: &Person,
    choices: &PersonFieldChoices,
    now: DateTime<Utc>,
) -> Person {
    let mut out = kept.clone();

    out.name = match choices.name {
        Some(MergeSide::Removed) => removed.name.clone(),
        _ => kept.name.clone(),
    };
    out.email = pick(choices.email, &kept.email, &removed.email);
    out.phone = pick(choices.phone, &kept.phone, &removed.phone);
    out.whatsapp = pick(choices.whatsapp, &kept.whatsapp, &removed.whatsapp);
    out.job_title = pick(choices.job_title, &kept.job_title, &removed.job_title);
    out.organization_id = match choices.organization {
        Some(MergeSide::Removed) => removed.organization_id,
        Some(MergeSide::Kept) => kept.organization_id,
        None => kept.organization_id.or(removed.organization_id),
    };
    out.owner_id = match choices.owner {
        Some(MergeSide::Removed) => removed.owner_id,
        _ => kept.owner_id,
    };
    out.updated_at = now;
    out
}

fn pick(
    choice: Option<MergeSide>,
    kept: &Option<String>,
    removed: &Option<String>,
) -> Option<String> {
    match choice {
        Some(MergeSide::Kept) => kept.clone(),
        Some(MergeSide::Removed) => removed.clone(),
        None => kept.clone().or_else(|| removed.clone()),
    }
}

/// Ids of every child record a merge is about to repoint.
///
/// Recorded into the backup before any mutation so undo can reverse exactly
/// the transfers that happened.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeChildRefs {
    pub activities: Vec<RecordId>,
    pub deals: Vec<RecordId>,
    pub notes: Vec<RecordId>,
    pub files: Vec<RecordId>,
    /// People attached to the removed organization (organization merges only).
    #[serde(default)]
    pub people: Vec<RecordId>,
    /// Tag ids linked to the removed record.
    pub tags: Vec<RecordId>,
    /// Tag ids the kept record already had; undo uses this to take the tag
    /// union apart precisely.
    #[serde(default)]
    pub kept_tags: Vec<RecordId>,
    pub sent_emails: Vec<RecordId>,
}

impl MergeChildRefs {
    pub fn total(&self) -> usize {
        self.activities.len()
            + self.deals.len()
            + self.notes.len()
            + self.files.len()
            + self.people.len()
            + self.tags.len()
            + self.sent_emails.len()
    }
}

/// Snapshot persisted before a merge mutates anything.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeBackup {
    pub id: RecordId,
    pub tenant_id: TenantId,
    pub kind: EntityKind,
    pub kept_id: RecordId,
    pub removed_id: RecordId,
    /// Full prior JSON state of the kept record.
    pub kept_snapshot: serde_json::Value,
    /// Full prior JSON state of the removed record.
    pub removed_snapshot: serde_json::Value,
    pub children: MergeChildRefs,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl MergeBackup {
    pub fn for_organizations(
        kept: &Organization,
        removed: &Organization,
        children: MergeChildRefs,
        now: DateTime<Utc>,
    ) -> serde_json::Result<Self> {
        Ok(Self {
            id: RecordId::new(),
            tenant_id: kept.tenant_id,
            kind: EntityKind::Organization,
            kept_id: kept.id.record(),
            removed_id: removed.id.record(),
            kept_snapshot: serde_json::to_value(kept)?,
            removed_snapshot: serde_json::to_value(removed)?,
            children,
            created_at: now,
            expires_at: now + Duration::days(BACKUP_TTL_DAYS),
        })
    }

    pub fn for_people(
        kept: &Person,
        removed: &Person,
        children: MergeChildRefs,
        now: DateTime<Utc>,
    ) -> serde_json::Result<Self> {
        Ok(Self {
            id: RecordId::new(),
            tenant_id: kept.tenant_id,
            kind: EntityKind::Person,
            kept_id: kept.id.record(),
            removed_id: removed.id.record(),
            kept_snapshot: serde_json::to_value(kept)?,
            removed_snapshot: serde_json::to_value(removed)?,
            children,
            created_at: now,
            expires_at: now + Duration::days(BACKUP_TTL_DAYS),
        })
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn kept_organization(&self) -> serde_json::Result<Organization> {
        serde_json::from_value(self.kept_snapshot.clone())
    }

    pub fn removed_organization(&self) -> serde_json::Result<Organization> {
        serde_json::from_value(self.removed_snapshot.clone())
    }

    pub fn kept_person(&self) -> serde_json::Result<Person> {
        serde_json::from_value(self.kept_snapshot.clone())
    }

    pub fn removed_person(&self) -> serde_json::Result<Person> {
        serde_json::from_value(self.removed_snapshot.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use funil_core::UserId;

    use crate::organization::OrganizationId;

    fn org(name: &str, now: DateTime<Utc>) -> Organization {
        Organization::new(
            OrganizationId::new(RecordId::new()),
            TenantId::new(),
            name,
            UserId::new(),
            now,
        )
        .unwrap()
    }

    #[test]
    fn suggest_primary_prefers_more_filled_fields() {
        let now = Utc::now();
        let sparse = org("Sparse", now);
        let mut rich = org("Rich", now + Duration::hours(1));
        rich.email = Some("rich@example.com".to_string());

        let (kept, removed) = suggest_primary(&sparse, &rich);
        assert_eq!(kept.name, "Rich");
        assert_eq!(removed.name, "Sparse");
    }

    #[test]
    fn suggest_primary_tie_prefers_older_record() {
        let now = Utc::now();
        let older = org("Older", now);
        let newer = org("Newer", now + Duration::hours(1));

        let (kept, removed) = suggest_primary(&newer, &older);
        assert_eq!(kept.name, "Older");
        assert_eq!(removed.name, "Newer");
    }

    #[test]
    fn default_rule_fills_gaps_from_removed() {
        let now = Utc::now();
        let mut kept = org("Kept", now);
        kept.email = Some("kept@example.com".to_string());
        let mut removed = org("Removed", now);
        removed.email = Some("removed@example.com".to_string());
        removed.phone = Some("+55 11 98888-7777".to_string());

        let out = resolve_organization(&kept, &removed, &Default::default(), now);
        assert_eq!(out.name, "Kept");
        assert_eq!(out.email.as_deref(), Some("kept@example.com"));
        assert_eq!(out.phone.as_deref(), Some("+55 11 98888-7777"));
    }

    #[test]
    fn explicit_choice_overrides_default_rule() {
        let now = Utc::now();
        let mut kept = org("Kept", now);
        kept.email = Some("kept@example.com".to_string());
        let mut removed = org("Removed", now);
        removed.email = Some("removed@example.com".to_string());

        let choices = OrganizationFieldChoices {
            name: Some(MergeSide::Removed),
            email: Some(MergeSide::Removed),
            ..Default::default()
        };
        let out = resolve_organization(&kept, &removed, &choices, now);
        assert_eq!(out.name, "Removed");
        assert_eq!(out.email.as_deref(), Some("removed@example.com"));
    }

    #[test]
    fn kept_identity_never_changes() {
        let now = Utc::now();
        let kept = org("Kept", now);
        let removed = org("Removed", now);

        let choices = OrganizationFieldChoices {
            name: Some(MergeSide::Removed),
            ..Default::default()
        };
        let out = resolve_organization(&kept, &removed, &choices, now);
        assert_eq!(out.id, kept.id);
        assert_eq!(out.created_at, kept.created_at);
    }

    #[test]
    fn backup_round_trips_snapshots() {
        let now = Utc::now();
        let kept = org("Kept", now);
        let mut removed = org("Removed", now);
        removed.email = Some("removed@example.com".to_string());

        let backup =
            MergeBackup::for_organizations(&kept, &removed, MergeChildRefs::default(), now)
                .unwrap();

        assert_eq!(backup.kind, EntityKind::Organization);
        assert_eq!(backup.kept_id, kept.id.record());
        assert_eq!(backup.removed_id, removed.id.record());
        assert_eq!(backup.removed_organization().unwrap(), removed);
        assert!(!backup.is_expired(now));
        assert!(backup.is_expired(now + Duration::days(BACKUP_TTL_DAYS)));
    }
}
