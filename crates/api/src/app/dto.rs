//! Request DTOs and JSON mapping helpers.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use funil_contacts::{
    format_cnpj, Address, MergeBackup, Organization, OrganizationFieldChoices, Person,
    PersonFieldChoices,
};
use funil_core::{EntityKind, UserId};
use funil_deals::{Deal, DealStatus, Pipeline};
use funil_inbox::{Conversation, Message};
use funil_infra::{HistoryView, NoteView, Page, Profile};
use funil_outreach::{Campaign, RecipientStatus, SentEmail};
use funil_timeline::{Activity, ActivityKind, FileAttachment, Tag};

// ─── Requests ────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateOrganizationRequest {
    pub name: String,
    pub legal_name: Option<String>,
    pub cnpj: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub website: Option<String>,
    pub address: Option<Address>,
    /// Defaults to the authenticated user.
    pub owner_id: Option<UserId>,
}

#[derive(Debug, Deserialize)]
pub struct CreatePersonRequest {
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub whatsapp: Option<String>,
    pub job_title: Option<String>,
    pub organization_id: Option<Uuid>,
    pub owner_id: Option<UserId>,
}

#[derive(Debug, Deserialize)]
pub struct MergeOrganizationsRequest {
    pub delete_id: Uuid,
    #[serde(default)]
    pub choices: OrganizationFieldChoices,
}

#[derive(Debug, Deserialize)]
pub struct MergePeopleRequest {
    pub delete_id: Uuid,
    #[serde(default)]
    pub choices: PersonFieldChoices,
}

#[derive(Debug, Deserialize)]
pub struct CreateDealRequest {
    pub title: String,
    pub value_cents: i64,
    pub pipeline_id: Uuid,
    /// Defaults to the pipeline's first stage.
    pub stage_id: Option<Uuid>,
    pub organization_id: Option<Uuid>,
    pub person_id: Option<Uuid>,
    pub owner_id: Option<UserId>,
    pub expected_close: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
pub struct MoveStageRequest {
    pub stage_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct LoseDealRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreatePipelineRequest {
    pub name: String,
    pub stages: Vec<StageRequest>,
}

#[derive(Debug, Deserialize)]
pub struct StageRequest {
    pub name: String,
    pub position: u32,
    pub probability: u8,
}

#[derive(Debug, Deserialize)]
pub struct CreateActivityRequest {
    pub parent_kind: EntityKind,
    pub parent_id: Uuid,
    pub kind: ActivityKind,
    pub subject: String,
    pub due_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct CreateNoteRequest {
    pub parent_kind: EntityKind,
    pub parent_id: Uuid,
    pub body: String,
}

#[derive(Debug, Deserialize)]
pub struct EditNoteRequest {
    pub body: String,
}

#[derive(Debug, Deserialize)]
pub struct RegisterFileRequest {
    pub parent_kind: EntityKind,
    pub parent_id: Uuid,
    pub file_name: String,
    pub content_type: String,
    pub size_bytes: i64,
}

#[derive(Debug, Deserialize)]
pub struct CreateTagRequest {
    pub name: String,
    pub color: String,
}

#[derive(Debug, Deserialize)]
pub struct TagLinkRequest {
    pub tag_id: Uuid,
    pub parent_kind: EntityKind,
    pub parent_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct SendWhatsappRequest {
    /// E.164 number; an existing conversation is reused.
    pub phone: String,
    pub body: String,
}

#[derive(Debug, Deserialize)]
pub struct LinkConversationRequest {
    pub person_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct CreateCampaignRequest {
    pub name: String,
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Deserialize)]
pub struct AddRecipientsRequest {
    pub recipients: Vec<RecipientRequest>,
}

#[derive(Debug, Deserialize)]
pub struct RecipientRequest {
    pub email: String,
    pub person_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct DraftMailRequest {
    pub person_id: Uuid,
    pub objective: String,
    pub tone: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SendMailRequest {
    /// Defaults to the person's email when absent.
    pub to: Option<String>,
    pub person_id: Option<Uuid>,
    pub organization_id: Option<Uuid>,
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateProfileRequest {
    pub display_name: String,
    pub email: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BulkEnrichRequest {
    pub organization_ids: Vec<Uuid>,
}

/// Common list-query parameters; comma-separated multi-value fields.
#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub search: Option<String>,
    pub owner_ids: Option<String>,
    pub has_cnpj: Option<bool>,
    pub organization_id: Option<Uuid>,
    pub created_from: Option<DateTime<Utc>>,
    pub created_to: Option<DateTime<Utc>>,
    pub tags: Option<String>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

impl ListParams {
    pub fn uuid_list(raw: &Option<String>) -> Vec<Uuid> {
        raw.as_deref()
            .map(|s| {
                s.split(',')
                    .filter_map(|part| part.trim().parse::<Uuid>().ok())
                    .collect()
            })
            .unwrap_or_default()
    }
}

// ─── JSON rendering ──────────────────────────────────────────────────────────

pub fn page_to_json<T>(page: Page<T>, render: impl Fn(&T) -> Value) -> Value {
    json!({
        "items": page.items.iter().map(render).collect::<Vec<_>>(),
        "total": page.total,
        "page": page.page,
        "per_page": page.per_page,
    })
}

pub fn organization_to_json(org: &Organization) -> Value {
    json!({
        "id": org.id.to_string(),
        "name": org.name,
        "legal_name": org.legal_name,
        "cnpj": org.cnpj,
        "cnpj_formatted": format_cnpj(org.cnpj.as_deref()),
        "email": org.email,
        "phone": org.phone,
        "website": org.website,
        "main_activity": org.main_activity,
        "address": {
            "street": org.address.street,
            "city": org.address.city,
            "state": org.address.state,
            "postal_code": org.address.postal_code,
        },
        "owner_id": org.owner_id.to_string(),
        "enriched_at": org.enriched_at,
        "created_at": org.created_at,
        "updated_at": org.updated_at,
    })
}

pub fn person_to_json(person: &Person) -> Value {
    json!({
        "id": person.id.to_string(),
        "name": person.name,
        "email": person.email,
        "phone": person.phone,
        "whatsapp": person.whatsapp,
        "job_title": person.job_title,
        "organization_id": person.organization_id.map(|id| id.to_string()),
        "owner_id": person.owner_id.to_string(),
        "created_at": person.created_at,
        "updated_at": person.updated_at,
    })
}

pub fn deal_to_json(deal: &Deal) -> Value {
    let (status, won_at, lost_at, lost_reason) = match &deal.status {
        DealStatus::Open => ("open", None, None, None),
        DealStatus::Won { won_at } => ("won", Some(*won_at), None, None),
        DealStatus::Lost { lost_at, reason } => ("lost", None, Some(*lost_at), reason.clone()),
    };
    json!({
        "id": deal.id.to_string(),
        "title": deal.title,
        "value_cents": deal.value_cents,
        "pipeline_id": deal.pipeline_id.to_string(),
        "stage_id": deal.stage_id.to_string(),
        "status": status,
        "won_at": won_at,
        "lost_at": lost_at,
        "lost_reason": lost_reason,
        "organization_id": deal.organization_id.map(|id| id.to_string()),
        "person_id": deal.person_id.map(|id| id.to_string()),
        "owner_id": deal.owner_id.to_string(),
        "expected_close": deal.expected_close,
        "created_at": deal.created_at,
        "updated_at": deal.updated_at,
    })
}

pub fn pipeline_to_json(pipeline: &Pipeline) -> Value {
    json!({
        "id": pipeline.id.to_string(),
        "name": pipeline.name,
        "stages": pipeline.stages.iter().map(|s| json!({
            "id": s.id.to_string(),
            "name": s.name,
            "position": s.position,
            "probability": s.probability,
        })).collect::<Vec<_>>(),
    })
}

pub fn activity_to_json(activity: &Activity) -> Value {
    json!({
        "id": activity.id.to_string(),
        "parent_kind": activity.parent_kind.as_str(),
        "parent_id": activity.parent_id.to_string(),
        "kind": activity.kind,
        "subject": activity.subject,
        "due_at": activity.due_at,
        "done_at": activity.done_at,
        "owner_id": activity.owner_id.to_string(),
        "created_at": activity.created_at,
    })
}

pub fn note_view_to_json(view: &NoteView) -> Value {
    json!({
        "id": view.note.id.to_string(),
        "parent_kind": view.note.parent_kind.as_str(),
        "parent_id": view.note.parent_id.to_string(),
        "body": view.note.body,
        "pinned": view.note.pinned,
        "author_id": view.note.created_by.to_string(),
        "author_name": view.author_name,
        "created_at": view.note.created_at,
        "updated_at": view.note.updated_at,
    })
}

pub fn history_view_to_json(view: &HistoryView) -> Value {
    json!({
        "id": view.entry.id.to_string(),
        "kind": view.entry.kind.as_str(),
        "description": view.entry.description,
        "detail": view.entry.detail,
        "actor_id": view.entry.actor_id.to_string(),
        "actor_name": view.actor_name,
        "created_at": view.entry.created_at,
    })
}

pub fn file_to_json(file: &FileAttachment) -> Value {
    json!({
        "id": file.id.to_string(),
        "parent_kind": file.parent_kind.as_str(),
        "parent_id": file.parent_id.to_string(),
        "file_name": file.file_name,
        "content_type": file.content_type,
        "size_bytes": file.size_bytes,
        "storage_path": file.storage_path,
        "uploaded_by": file.uploaded_by.to_string(),
        "created_at": file.created_at,
    })
}

pub fn tag_to_json(tag: &Tag) -> Value {
    json!({
        "id": tag.id.to_string(),
        "name": tag.name,
        "color": tag.color,
    })
}

pub fn conversation_to_json(conversation: &Conversation) -> Value {
    json!({
        "id": conversation.id.to_string(),
        "phone": conversation.phone,
        "person_id": conversation.person_id.map(|id| id.to_string()),
        "last_message_at": conversation.last_message_at,
        "unread_count": conversation.unread_count,
    })
}

pub fn message_to_json(message: &Message) -> Value {
    json!({
        "id": message.id.to_string(),
        "conversation_id": message.conversation_id.to_string(),
        "direction": message.direction,
        "body": message.body,
        "status": message.status,
        "relay_message_id": message.relay_message_id,
        "occurred_at": message.occurred_at,
    })
}

pub fn campaign_to_json(campaign: &Campaign) -> Value {
    json!({
        "id": campaign.id.to_string(),
        "name": campaign.name,
        "subject": campaign.subject,
        "status": campaign.status,
        "recipients": campaign.recipients.iter().map(|r| json!({
            "id": r.id.0.to_string(),
            "email": r.email,
            "person_id": r.person_id.map(|id| id.to_string()),
            "status": recipient_status_to_json(&r.status),
        })).collect::<Vec<_>>(),
        "sent_count": campaign.sent_count(),
        "failed_count": campaign.failed_count(),
        "created_at": campaign.created_at,
    })
}

fn recipient_status_to_json(status: &RecipientStatus) -> Value {
    match status {
        RecipientStatus::Pending => json!({ "status": "pending" }),
        RecipientStatus::Sent { sent_at } => json!({ "status": "sent", "sent_at": sent_at }),
        RecipientStatus::Failed { error } => json!({ "status": "failed", "error": error }),
        RecipientStatus::Skipped => json!({ "status": "skipped" }),
    }
}

pub fn sent_email_to_json(email: &SentEmail) -> Value {
    json!({
        "id": email.id.to_string(),
        "to_email": email.to_email,
        "subject": email.subject,
        "campaign_id": email.campaign_id.map(|id| id.to_string()),
        "sent_at": email.sent_at,
    })
}

/// Backup summary; snapshots stay server-side.
pub fn backup_to_json(backup: &MergeBackup) -> Value {
    json!({
        "id": backup.id.to_string(),
        "kind": backup.kind.as_str(),
        "kept_id": backup.kept_id.to_string(),
        "removed_id": backup.removed_id.to_string(),
        "transferred_children": backup.children.total(),
        "created_at": backup.created_at,
        "expires_at": backup.expires_at,
    })
}

pub fn profile_to_json(profile: &Profile) -> Value {
    json!({
        "user_id": profile.user_id.to_string(),
        "display_name": profile.display_name,
        "email": profile.email,
    })
}
