//! Store traits.
//!
//! One trait per area, tenant-scoped throughout. Two complete backends:
//! [`memory::MemoryStore`] (default for dev/tests) and
//! [`postgres::PgStore`]. Merge/undo are single trait operations so each
//! backend can make them atomic: one transaction on Postgres, one state
//! lock in memory.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use funil_contacts::{
    MergeBackup, MergeChildRefs, Organization, OrganizationFieldChoices, OrganizationId, Person,
    PersonFieldChoices, PersonId,
};
use funil_core::{EntityKind, RecordId, TenantId, UserId};
use funil_deals::{Deal, DealId, Pipeline, PipelineId, StageId};
use funil_inbox::{Conversation, ConversationId, Message, MessageStatus};
use funil_outreach::{Campaign, CampaignId, SentEmail};
use funil_timeline::{
    Activity, ActivityId, FileAttachment, FileId, HistoryEntry, Note, NoteId, Tag, TagId,
};

use crate::error::StoreResult;
use crate::filter::{Page, Pagination};

/// User directory entry backing read-time author/actor name resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub user_id: UserId,
    pub display_name: String,
    pub email: Option<String>,
}

/// List filter for organizations.
#[derive(Debug, Clone, Default)]
pub struct OrganizationFilter {
    pub search: Option<String>,
    pub owner_ids: Vec<UserId>,
    pub has_cnpj: Option<bool>,
    pub created_from: Option<DateTime<Utc>>,
    pub created_to: Option<DateTime<Utc>>,
    pub tag_ids: Vec<TagId>,
}

/// List filter for people.
#[derive(Debug, Clone, Default)]
pub struct PersonFilter {
    pub search: Option<String>,
    pub owner_ids: Vec<UserId>,
    pub organization_id: Option<OrganizationId>,
    pub created_from: Option<DateTime<Utc>>,
    pub created_to: Option<DateTime<Utc>>,
    pub tag_ids: Vec<TagId>,
}

/// List filter for deals.
#[derive(Debug, Clone, Default)]
pub struct DealFilter {
    pub search: Option<String>,
    pub pipeline_id: Option<PipelineId>,
    pub stage_id: Option<StageId>,
    /// "open" | "won" | "lost".
    pub status: Option<String>,
    pub owner_ids: Vec<UserId>,
    pub organization_id: Option<OrganizationId>,
    pub person_id: Option<PersonId>,
}

/// What a merge touched; returned to the caller and recorded in the backup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    pub backup_id: RecordId,
    pub transferred: MergeChildRefs,
}

/// A note with its author's display name resolved at read time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoteView {
    pub note: Note,
    pub author_name: Option<String>,
}

/// A history entry with its actor's display name resolved at read time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryView {
    pub entry: HistoryEntry,
    pub actor_name: Option<String>,
}

/// Organizations, people, merge + backups.
#[async_trait]
pub trait ContactsStore: Send + Sync {
    async fn insert_organization(&self, org: Organization) -> StoreResult<()>;
    async fn organization(&self, tenant: TenantId, id: OrganizationId)
        -> StoreResult<Organization>;
    async fn organizations(
        &self,
        tenant: TenantId,
        filter: &OrganizationFilter,
        page: Pagination,
    ) -> StoreResult<Page<Organization>>;
    async fn update_organization(&self, org: Organization) -> StoreResult<()>;
    async fn delete_organization(&self, tenant: TenantId, id: OrganizationId) -> StoreResult<()>;
    async fn organization_by_cnpj(
        &self,
        tenant: TenantId,
        cnpj: &str,
    ) -> StoreResult<Option<Organization>>;

    async fn insert_person(&self, person: Person) -> StoreResult<()>;
    async fn person(&self, tenant: TenantId, id: PersonId) -> StoreResult<Person>;
    async fn people(
        &self,
        tenant: TenantId,
        filter: &PersonFilter,
        page: Pagination,
    ) -> StoreResult<Page<Person>>;
    async fn update_person(&self, person: Person) -> StoreResult<()>;
    async fn delete_person(&self, tenant: TenantId, id: PersonId) -> StoreResult<()>;
    /// Inbox linking: exact match on the WhatsApp number.
    async fn person_by_whatsapp(
        &self,
        tenant: TenantId,
        phone: &str,
    ) -> StoreResult<Option<Person>>;

    /// Merge two organizations atomically: snapshot + backup, winning
    /// fields, child transfer, tag union, history entry, delete.
    async fn merge_organizations(
        &self,
        tenant: TenantId,
        keep: OrganizationId,
        delete: OrganizationId,
        choices: &OrganizationFieldChoices,
        actor: UserId,
        now: DateTime<Utc>,
    ) -> StoreResult<(Organization, MergeOutcome)>;

    /// Merge two people atomically (same shape as organization merge).
    async fn merge_people(
        &self,
        tenant: TenantId,
        keep: PersonId,
        delete: PersonId,
        choices: &PersonFieldChoices,
        actor: UserId,
        now: DateTime<Utc>,
    ) -> StoreResult<(Person, MergeOutcome)>;

    async fn merge_backup(&self, tenant: TenantId, id: RecordId) -> StoreResult<MergeBackup>;
    async fn merge_backups(&self, tenant: TenantId) -> StoreResult<Vec<MergeBackup>>;

    /// Reverse a merge from its backup: restore both snapshots, repoint the
    /// recorded children back, restore tag links. Atomic like the merge.
    async fn undo_merge(
        &self,
        tenant: TenantId,
        backup_id: RecordId,
        actor: UserId,
        now: DateTime<Utc>,
    ) -> StoreResult<()>;

    /// Retention sweep: drop backups past their expiry.
    async fn purge_expired_backups(&self, now: DateTime<Utc>) -> StoreResult<u64>;
}

/// Pipelines and deals.
#[async_trait]
pub trait DealStore: Send + Sync {
    async fn insert_pipeline(&self, pipeline: Pipeline) -> StoreResult<()>;
    async fn pipeline(&self, tenant: TenantId, id: PipelineId) -> StoreResult<Pipeline>;
    async fn pipelines(&self, tenant: TenantId) -> StoreResult<Vec<Pipeline>>;

    async fn insert_deal(&self, deal: Deal) -> StoreResult<()>;
    async fn deal(&self, tenant: TenantId, id: DealId) -> StoreResult<Deal>;
    async fn deals(
        &self,
        tenant: TenantId,
        filter: &DealFilter,
        page: Pagination,
    ) -> StoreResult<Page<Deal>>;
    /// Unpaginated listing for reporting.
    async fn all_deals(&self, tenant: TenantId) -> StoreResult<Vec<Deal>>;
    async fn update_deal(&self, deal: Deal) -> StoreResult<()>;
    async fn delete_deal(&self, tenant: TenantId, id: DealId) -> StoreResult<()>;
}

/// Activities, notes, files and history.
#[async_trait]
pub trait TimelineStore: Send + Sync {
    async fn insert_activity(&self, activity: Activity) -> StoreResult<()>;
    async fn activity(&self, tenant: TenantId, id: ActivityId) -> StoreResult<Activity>;
    async fn update_activity(&self, activity: Activity) -> StoreResult<()>;
    async fn delete_activity(&self, tenant: TenantId, id: ActivityId) -> StoreResult<()>;
    async fn activities_for(
        &self,
        tenant: TenantId,
        kind: EntityKind,
        parent: RecordId,
    ) -> StoreResult<Vec<Activity>>;
    async fn activities_for_owner(
        &self,
        tenant: TenantId,
        owner: UserId,
    ) -> StoreResult<Vec<Activity>>;
    /// Unpaginated listing for reporting.
    async fn all_activities(&self, tenant: TenantId) -> StoreResult<Vec<Activity>>;

    async fn insert_note(&self, note: Note) -> StoreResult<()>;
    async fn note(&self, tenant: TenantId, id: NoteId) -> StoreResult<Note>;
    async fn update_note(&self, note: Note) -> StoreResult<()>;
    async fn delete_note(&self, tenant: TenantId, id: NoteId) -> StoreResult<()>;
    /// Pinned first, then newest first; author names resolved at read time.
    async fn notes_for(
        &self,
        tenant: TenantId,
        kind: EntityKind,
        parent: RecordId,
    ) -> StoreResult<Vec<NoteView>>;

    async fn insert_file(&self, file: FileAttachment) -> StoreResult<()>;
    async fn file(&self, tenant: TenantId, id: FileId) -> StoreResult<FileAttachment>;
    async fn delete_file(&self, tenant: TenantId, id: FileId) -> StoreResult<()>;
    async fn files_for(
        &self,
        tenant: TenantId,
        kind: EntityKind,
        parent: RecordId,
    ) -> StoreResult<Vec<FileAttachment>>;

    async fn append_history(&self, entry: HistoryEntry) -> StoreResult<()>;
    /// Newest first; actor names resolved at read time.
    async fn history_for(
        &self,
        tenant: TenantId,
        kind: EntityKind,
        parent: RecordId,
    ) -> StoreResult<Vec<HistoryView>>;
}

/// User profile directory.
#[async_trait]
pub trait DirectoryStore: Send + Sync {
    async fn upsert_profile(&self, tenant: TenantId, profile: Profile) -> StoreResult<()>;
    async fn profile(&self, tenant: TenantId, user_id: UserId) -> StoreResult<Option<Profile>>;
    async fn profiles(&self, tenant: TenantId) -> StoreResult<Vec<Profile>>;
}

/// Tags and tag assignments.
#[async_trait]
pub trait TagStore: Send + Sync {
    async fn insert_tag(&self, tag: Tag) -> StoreResult<()>;
    async fn tags(&self, tenant: TenantId) -> StoreResult<Vec<Tag>>;
    async fn delete_tag(&self, tenant: TenantId, id: TagId) -> StoreResult<()>;

    /// Idempotent: assigning an already-assigned tag is a no-op.
    async fn assign_tag(
        &self,
        tenant: TenantId,
        tag_id: TagId,
        kind: EntityKind,
        parent: RecordId,
    ) -> StoreResult<()>;
    async fn unassign_tag(
        &self,
        tenant: TenantId,
        tag_id: TagId,
        kind: EntityKind,
        parent: RecordId,
    ) -> StoreResult<()>;
    async fn tags_of(
        &self,
        tenant: TenantId,
        kind: EntityKind,
        parent: RecordId,
    ) -> StoreResult<Vec<Tag>>;

    /// Precomputed membership list feeding the tag filter.
    async fn records_with_any_tag(
        &self,
        tenant: TenantId,
        kind: EntityKind,
        tag_ids: &[TagId],
    ) -> StoreResult<Vec<RecordId>>;
}

/// WhatsApp conversations and messages.
#[async_trait]
pub trait InboxStore: Send + Sync {
    /// Find the conversation for a phone number, creating it when missing.
    async fn conversation_for_phone(
        &self,
        tenant: TenantId,
        phone: &str,
        person_id: Option<PersonId>,
        now: DateTime<Utc>,
    ) -> StoreResult<Conversation>;
    async fn conversation(
        &self,
        tenant: TenantId,
        id: ConversationId,
    ) -> StoreResult<Conversation>;
    /// Most recent first.
    async fn conversations(&self, tenant: TenantId) -> StoreResult<Vec<Conversation>>;
    async fn mark_conversation_read(
        &self,
        tenant: TenantId,
        id: ConversationId,
    ) -> StoreResult<()>;
    async fn link_conversation_person(
        &self,
        tenant: TenantId,
        id: ConversationId,
        person_id: PersonId,
    ) -> StoreResult<()>;

    /// Insert the message and update the conversation counters together.
    async fn record_message(&self, message: Message) -> StoreResult<()>;
    async fn messages(
        &self,
        tenant: TenantId,
        conversation_id: ConversationId,
    ) -> StoreResult<Vec<Message>>;
    /// Relay status callback; keyed by the relay-side message id.
    async fn update_message_status(
        &self,
        tenant: TenantId,
        relay_message_id: &str,
        status: MessageStatus,
    ) -> StoreResult<()>;
}

/// Campaigns and sent-email records.
#[async_trait]
pub trait OutreachStore: Send + Sync {
    async fn insert_campaign(&self, campaign: Campaign) -> StoreResult<()>;
    async fn campaign(&self, tenant: TenantId, id: CampaignId) -> StoreResult<Campaign>;
    async fn campaigns(&self, tenant: TenantId) -> StoreResult<Vec<Campaign>>;
    async fn update_campaign(&self, campaign: Campaign) -> StoreResult<()>;

    async fn record_sent_email(&self, email: SentEmail) -> StoreResult<()>;
    async fn sent_emails_for(
        &self,
        tenant: TenantId,
        kind: EntityKind,
        parent: RecordId,
    ) -> StoreResult<Vec<SentEmail>>;
}
