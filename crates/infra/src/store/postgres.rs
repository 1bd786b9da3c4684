//! Postgres backend (sqlx).
//!
//! Every query carries `tenant_id` in its WHERE clause; cross-tenant access
//! is structurally impossible. Merge and undo run inside one transaction, so
//! a failure in any step rolls the whole operation back.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::PgRow;
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder, Row, Transaction};
use uuid::Uuid;

use funil_contacts::{
    merge::{resolve_organization, resolve_person},
    Address, MergeBackup, MergeChildRefs, Organization, OrganizationFieldChoices, OrganizationId,
    Person, PersonFieldChoices, PersonId,
};
use funil_core::{DomainError, EntityKind, RecordId, TenantId, UserId};
use funil_deals::{Deal, DealId, DealStatus, Pipeline, PipelineId, Stage, StageId};
use funil_inbox::{
    Conversation, ConversationId, Message, MessageDirection, MessageId, MessageStatus,
};
use funil_outreach::{Campaign, CampaignId, CampaignStatus, Recipient, SentEmail};
use funil_timeline::{
    Activity, ActivityId, ActivityKind, FileAttachment, FileId, HistoryEntry, HistoryEntryId,
    HistoryKind, Note, NoteId, Tag, TagId,
};

use crate::error::{StoreError, StoreResult};
use crate::filter::{
    apply_tag_filter, push_date_range, push_in_uuid, push_null_presence, push_search,
    FilterOutcome, Page, Pagination,
};
use crate::store::{
    ContactsStore, DealFilter, DealStore, DirectoryStore, HistoryView, InboxStore, MergeOutcome,
    NoteView, OrganizationFilter, OutreachStore, PersonFilter, Profile, TagStore, TimelineStore,
};

/// Postgres-backed store.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Retry a read once on a transient transport failure.
///
/// Mutations are never retried; they fail fast.
async fn read_with_retry<T, F, Fut>(mut op: F) -> StoreResult<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = StoreResult<T>>,
{
    match op().await {
        Err(err) if err.is_transient() => {
            tracing::debug!(error = %err, "read failed, retrying once");
            op().await
        }
        other => other,
    }
}

fn enum_to_str<T: serde::Serialize>(value: &T) -> StoreResult<String> {
    match serde_json::to_value(value)? {
        serde_json::Value::String(s) => Ok(s),
        other => Err(StoreError::Serialization(format!(
            "expected string-encoded enum, got {other}"
        ))),
    }
}

fn enum_from_str<T: serde::de::DeserializeOwned>(value: &str) -> StoreResult<T> {
    serde_json::from_value(serde_json::Value::String(value.to_string())).map_err(Into::into)
}

// ─── Row types ───────────────────────────────────────────────────────────────

#[derive(FromRow)]
struct OrgRow {
    id: Uuid,
    tenant_id: Uuid,
    name: String,
    legal_name: Option<String>,
    cnpj: Option<String>,
    email: Option<String>,
    phone: Option<String>,
    website: Option<String>,
    main_activity: Option<String>,
    street: Option<String>,
    city: Option<String>,
    state: Option<String>,
    postal_code: Option<String>,
    owner_id: Uuid,
    enriched_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<OrgRow> for Organization {
    fn from(r: OrgRow) -> Self {
        Organization {
            id: OrganizationId::new(RecordId::from_uuid(r.id)),
            tenant_id: TenantId::from_uuid(r.tenant_id),
            name: r.name,
            legal_name: r.legal_name,
            cnpj: r.cnpj,
            email: r.email,
            phone: r.phone,
            website: r.website,
            main_activity: r.main_activity,
            address: Address {
                street: r.street,
                city: r.city,
                state: r.state,
                postal_code: r.postal_code,
            },
            owner_id: UserId::from_uuid(r.owner_id),
            enriched_at: r.enriched_at,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

const ORG_COLUMNS: &str = "id, tenant_id, name, legal_name, cnpj, email, phone, website, \
     main_activity, street, city, state, postal_code, owner_id, enriched_at, created_at, updated_at";

#[derive(FromRow)]
struct PersonRow {
    id: Uuid,
    tenant_id: Uuid,
    name: String,
    email: Option<String>,
    phone: Option<String>,
    whatsapp: Option<String>,
    job_title: Option<String>,
    organization_id: Option<Uuid>,
    owner_id: Uuid,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<PersonRow> for Person {
    fn from(r: PersonRow) -> Self {
        Person {
            id: PersonId::new(RecordId::from_uuid(r.id)),
            tenant_id: TenantId::from_uuid(r.tenant_id),
            name: r.name,
            email: r.email,
            phone: r.phone,
            whatsapp: r.whatsapp,
            job_title: r.job_title,
            organization_id: r
                .organization_id
                .map(|id| OrganizationId::new(RecordId::from_uuid(id))),
            owner_id: UserId::from_uuid(r.owner_id),
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

const PERSON_COLUMNS: &str = "id, tenant_id, name, email, phone, whatsapp, job_title, \
     organization_id, owner_id, created_at, updated_at";

#[derive(FromRow)]
struct DealRow {
    id: Uuid,
    tenant_id: Uuid,
    title: String,
    value_cents: i64,
    pipeline_id: Uuid,
    stage_id: Uuid,
    status: String,
    won_at: Option<DateTime<Utc>>,
    lost_at: Option<DateTime<Utc>>,
    lost_reason: Option<String>,
    organization_id: Option<Uuid>,
    person_id: Option<Uuid>,
    owner_id: Uuid,
    expected_close: Option<NaiveDate>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl DealRow {
    fn into_deal(self) -> StoreResult<Deal> {
        let status = match self.status.as_str() {
            "open" => DealStatus::Open,
            "won" => DealStatus::Won {
                won_at: self.won_at.ok_or_else(|| {
                    StoreError::Serialization("won deal without won_at".to_string())
                })?,
            },
            "lost" => DealStatus::Lost {
                lost_at: self.lost_at.ok_or_else(|| {
                    StoreError::Serialization("lost deal without lost_at".to_string())
                })?,
                reason: self.lost_reason,
            },
            other => {
                return Err(StoreError::Serialization(format!(
                    "unknown deal status: {other}"
                )))
            }
        };

        Ok(Deal {
            id: DealId::new(RecordId::from_uuid(self.id)),
            tenant_id: TenantId::from_uuid(self.tenant_id),
            title: self.title,
            value_cents: self.value_cents,
            pipeline_id: PipelineId::new(RecordId::from_uuid(self.pipeline_id)),
            stage_id: StageId::new(RecordId::from_uuid(self.stage_id)),
            status,
            organization_id: self
                .organization_id
                .map(|id| OrganizationId::new(RecordId::from_uuid(id))),
            person_id: self.person_id.map(|id| PersonId::new(RecordId::from_uuid(id))),
            owner_id: UserId::from_uuid(self.owner_id),
            expected_close: self.expected_close,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

fn deal_status_columns(deal: &Deal) -> (&'static str, Option<DateTime<Utc>>, Option<DateTime<Utc>>, Option<String>) {
    match &deal.status {
        DealStatus::Open => ("open", None, None, None),
        DealStatus::Won { won_at } => ("won", Some(*won_at), None, None),
        DealStatus::Lost { lost_at, reason } => ("lost", None, Some(*lost_at), reason.clone()),
    }
}

const DEAL_COLUMNS: &str = "id, tenant_id, title, value_cents, pipeline_id, stage_id, status, \
     won_at, lost_at, lost_reason, organization_id, person_id, owner_id, expected_close, \
     created_at, updated_at";

fn activity_from_row(row: &PgRow) -> StoreResult<Activity> {
    Ok(Activity {
        id: ActivityId::new(RecordId::from_uuid(row.try_get("id")?)),
        tenant_id: TenantId::from_uuid(row.try_get("tenant_id")?),
        parent_kind: row
            .try_get::<String, _>("parent_kind")?
            .parse::<EntityKind>()
            .map_err(StoreError::Domain)?,
        parent_id: RecordId::from_uuid(row.try_get("parent_id")?),
        kind: enum_from_str::<ActivityKind>(&row.try_get::<String, _>("kind")?)?,
        subject: row.try_get("subject")?,
        due_at: row.try_get("due_at")?,
        done_at: row.try_get("done_at")?,
        owner_id: UserId::from_uuid(row.try_get("owner_id")?),
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn note_from_row(row: &PgRow) -> StoreResult<Note> {
    Ok(Note {
        id: NoteId::new(RecordId::from_uuid(row.try_get("id")?)),
        tenant_id: TenantId::from_uuid(row.try_get("tenant_id")?),
        parent_kind: row
            .try_get::<String, _>("parent_kind")?
            .parse::<EntityKind>()
            .map_err(StoreError::Domain)?,
        parent_id: RecordId::from_uuid(row.try_get("parent_id")?),
        body: row.try_get("body")?,
        pinned: row.try_get("pinned")?,
        created_by: UserId::from_uuid(row.try_get("created_by")?),
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn file_from_row(row: &PgRow) -> StoreResult<FileAttachment> {
    Ok(FileAttachment {
        id: FileId::new(RecordId::from_uuid(row.try_get("id")?)),
        tenant_id: TenantId::from_uuid(row.try_get("tenant_id")?),
        parent_kind: row
            .try_get::<String, _>("parent_kind")?
            .parse::<EntityKind>()
            .map_err(StoreError::Domain)?,
        parent_id: RecordId::from_uuid(row.try_get("parent_id")?),
        file_name: row.try_get("file_name")?,
        content_type: row.try_get("content_type")?,
        size_bytes: row.try_get("size_bytes")?,
        storage_path: row.try_get("storage_path")?,
        uploaded_by: UserId::from_uuid(row.try_get("uploaded_by")?),
        created_at: row.try_get("created_at")?,
    })
}

fn history_from_row(row: &PgRow) -> StoreResult<HistoryEntry> {
    Ok(HistoryEntry {
        id: HistoryEntryId::new(RecordId::from_uuid(row.try_get("id")?)),
        tenant_id: TenantId::from_uuid(row.try_get("tenant_id")?),
        parent_kind: row
            .try_get::<String, _>("parent_kind")?
            .parse::<EntityKind>()
            .map_err(StoreError::Domain)?,
        parent_id: RecordId::from_uuid(row.try_get("parent_id")?),
        kind: enum_from_str::<HistoryKind>(&row.try_get::<String, _>("kind")?)?,
        description: row.try_get("description")?,
        detail: row.try_get("detail")?,
        actor_id: UserId::from_uuid(row.try_get("actor_id")?),
        created_at: row.try_get("created_at")?,
    })
}

fn message_from_row(row: &PgRow) -> StoreResult<Message> {
    Ok(Message {
        id: MessageId::new(RecordId::from_uuid(row.try_get("id")?)),
        tenant_id: TenantId::from_uuid(row.try_get("tenant_id")?),
        conversation_id: ConversationId::new(RecordId::from_uuid(row.try_get("conversation_id")?)),
        direction: enum_from_str::<MessageDirection>(&row.try_get::<String, _>("direction")?)?,
        body: row.try_get("body")?,
        relay_message_id: row.try_get("relay_message_id")?,
        status: enum_from_str::<MessageStatus>(&row.try_get::<String, _>("status")?)?,
        occurred_at: row.try_get("occurred_at")?,
    })
}

fn conversation_from_row(row: &PgRow) -> StoreResult<Conversation> {
    Ok(Conversation {
        id: ConversationId::new(RecordId::from_uuid(row.try_get("id")?)),
        tenant_id: TenantId::from_uuid(row.try_get("tenant_id")?),
        phone: row.try_get("phone")?,
        person_id: row
            .try_get::<Option<Uuid>, _>("person_id")?
            .map(|id| PersonId::new(RecordId::from_uuid(id))),
        last_message_at: row.try_get("last_message_at")?,
        unread_count: row.try_get::<i32, _>("unread_count")? as u32,
        created_at: row.try_get("created_at")?,
    })
}

fn backup_from_row(row: &PgRow) -> StoreResult<MergeBackup> {
    Ok(MergeBackup {
        id: RecordId::from_uuid(row.try_get("id")?),
        tenant_id: TenantId::from_uuid(row.try_get("tenant_id")?),
        kind: row
            .try_get::<String, _>("kind")?
            .parse::<EntityKind>()
            .map_err(StoreError::Domain)?,
        kept_id: RecordId::from_uuid(row.try_get("kept_id")?),
        removed_id: RecordId::from_uuid(row.try_get("removed_id")?),
        kept_snapshot: row.try_get("kept_snapshot")?,
        removed_snapshot: row.try_get("removed_snapshot")?,
        children: serde_json::from_value(row.try_get("children")?)?,
        created_at: row.try_get("created_at")?,
        expires_at: row.try_get("expires_at")?,
    })
}

// ─── Shared SQL helpers ──────────────────────────────────────────────────────

impl PgStore {
    async fn insert_org_stmt(
        executor: impl sqlx::PgExecutor<'_>,
        org: &Organization,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO organizations (
                id, tenant_id, name, legal_name, cnpj, email, phone, website,
                main_activity, street, city, state, postal_code, owner_id,
                enriched_at, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            "#,
        )
        .bind(org.id.record().as_uuid())
        .bind(org.tenant_id.as_uuid())
        .bind(&org.name)
        .bind(&org.legal_name)
        .bind(&org.cnpj)
        .bind(&org.email)
        .bind(&org.phone)
        .bind(&org.website)
        .bind(&org.main_activity)
        .bind(&org.address.street)
        .bind(&org.address.city)
        .bind(&org.address.state)
        .bind(&org.address.postal_code)
        .bind(org.owner_id.as_uuid())
        .bind(org.enriched_at)
        .bind(org.created_at)
        .bind(org.updated_at)
        .execute(executor)
        .await?;
        Ok(())
    }

    async fn update_org_stmt(
        executor: impl sqlx::PgExecutor<'_>,
        org: &Organization,
    ) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE organizations SET
                name = $3, legal_name = $4, cnpj = $5, email = $6, phone = $7,
                website = $8, main_activity = $9, street = $10, city = $11,
                state = $12, postal_code = $13, owner_id = $14, enriched_at = $15,
                updated_at = $16
            WHERE tenant_id = $1 AND id = $2
            "#,
        )
        .bind(org.tenant_id.as_uuid())
        .bind(org.id.record().as_uuid())
        .bind(&org.name)
        .bind(&org.legal_name)
        .bind(&org.cnpj)
        .bind(&org.email)
        .bind(&org.phone)
        .bind(&org.website)
        .bind(&org.main_activity)
        .bind(&org.address.street)
        .bind(&org.address.city)
        .bind(&org.address.state)
        .bind(&org.address.postal_code)
        .bind(org.owner_id.as_uuid())
        .bind(org.enriched_at)
        .bind(org.updated_at)
        .execute(executor)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn insert_person_stmt(
        executor: impl sqlx::PgExecutor<'_>,
        person: &Person,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO people (
                id, tenant_id, name, email, phone, whatsapp, job_title,
                organization_id, owner_id, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(person.id.record().as_uuid())
        .bind(person.tenant_id.as_uuid())
        .bind(&person.name)
        .bind(&person.email)
        .bind(&person.phone)
        .bind(&person.whatsapp)
        .bind(&person.job_title)
        .bind(person.organization_id.map(|id| *id.record().as_uuid()))
        .bind(person.owner_id.as_uuid())
        .bind(person.created_at)
        .bind(person.updated_at)
        .execute(executor)
        .await?;
        Ok(())
    }

    async fn update_person_stmt(
        executor: impl sqlx::PgExecutor<'_>,
        person: &Person,
    ) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE people SET
                name = $3, email = $4, phone = $5, whatsapp = $6, job_title = $7,
                organization_id = $8, owner_id = $9, updated_at = $10
            WHERE tenant_id = $1 AND id = $2
            "#,
        )
        .bind(person.tenant_id.as_uuid())
        .bind(person.id.record().as_uuid())
        .bind(&person.name)
        .bind(&person.email)
        .bind(&person.phone)
        .bind(&person.whatsapp)
        .bind(&person.job_title)
        .bind(person.organization_id.map(|id| *id.record().as_uuid()))
        .bind(person.owner_id.as_uuid())
        .bind(person.updated_at)
        .execute(executor)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn append_history_stmt(
        executor: impl sqlx::PgExecutor<'_>,
        entry: &HistoryEntry,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO history (
                id, tenant_id, parent_kind, parent_id, kind, description,
                detail, actor_id, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(entry.id.record().as_uuid())
        .bind(entry.tenant_id.as_uuid())
        .bind(entry.parent_kind.as_str())
        .bind(entry.parent_id.as_uuid())
        .bind(enum_to_str(&entry.kind)?)
        .bind(&entry.description)
        .bind(&entry.detail)
        .bind(entry.actor_id.as_uuid())
        .bind(entry.created_at)
        .execute(executor)
        .await?;
        Ok(())
    }

    /// Collect the child ids of a record (everything a merge would repoint).
    async fn children_of(
        tx: &mut Transaction<'_, Postgres>,
        tenant: TenantId,
        kind: EntityKind,
        id: RecordId,
    ) -> StoreResult<MergeChildRefs> {
        let tenant_id = tenant.as_uuid();
        let parent = id.as_uuid();
        let kind_str = kind.as_str();

        let mut refs = MergeChildRefs::default();
        for (table, out) in [
            ("activities", &mut refs.activities),
            ("notes", &mut refs.notes),
            ("files", &mut refs.files),
        ] {
            let rows = sqlx::query(&format!(
                "SELECT id FROM {table} WHERE tenant_id = $1 AND parent_kind = $2 AND parent_id = $3"
            ))
            .bind(tenant_id)
            .bind(kind_str)
            .bind(parent)
            .fetch_all(&mut **tx)
            .await?;
            *out = rows
                .iter()
                .map(|r| r.try_get::<Uuid, _>("id").map(RecordId::from_uuid))
                .collect::<Result<_, _>>()?;
        }

        let tag_rows = sqlx::query(
            "SELECT tag_id FROM tag_links WHERE tenant_id = $1 AND parent_kind = $2 AND parent_id = $3",
        )
        .bind(tenant_id)
        .bind(kind_str)
        .bind(parent)
        .fetch_all(&mut **tx)
        .await?;
        refs.tags = tag_rows
            .iter()
            .map(|r| r.try_get::<Uuid, _>("tag_id").map(RecordId::from_uuid))
            .collect::<Result<_, _>>()?;

        let fk = kind.parent_column();
        if kind.supports_merge() {
            let deal_rows = sqlx::query(&format!(
                "SELECT id FROM deals WHERE tenant_id = $1 AND {fk} = $2"
            ))
            .bind(tenant_id)
            .bind(parent)
            .fetch_all(&mut **tx)
            .await?;
            refs.deals = deal_rows
                .iter()
                .map(|r| r.try_get::<Uuid, _>("id").map(RecordId::from_uuid))
                .collect::<Result<_, _>>()?;

            let email_rows = sqlx::query(&format!(
                "SELECT id FROM sent_emails WHERE tenant_id = $1 AND {fk} = $2"
            ))
            .bind(tenant_id)
            .bind(parent)
            .fetch_all(&mut **tx)
            .await?;
            refs.sent_emails = email_rows
                .iter()
                .map(|r| r.try_get::<Uuid, _>("id").map(RecordId::from_uuid))
                .collect::<Result<_, _>>()?;
        }

        if kind == EntityKind::Organization {
            let people_rows = sqlx::query(
                "SELECT id FROM people WHERE tenant_id = $1 AND organization_id = $2",
            )
            .bind(tenant_id)
            .bind(parent)
            .fetch_all(&mut **tx)
            .await?;
            refs.people = people_rows
                .iter()
                .map(|r| r.try_get::<Uuid, _>("id").map(RecordId::from_uuid))
                .collect::<Result<_, _>>()?;
        }

        Ok(refs)
    }

    /// Repoint every recorded child FK from `from` to `to` (merge + undo).
    async fn repoint_children(
        tx: &mut Transaction<'_, Postgres>,
        tenant: TenantId,
        kind: EntityKind,
        refs: &MergeChildRefs,
        to: RecordId,
    ) -> StoreResult<()> {
        let tenant_id = tenant.as_uuid();
        let target = to.as_uuid();

        for (table, ids) in [
            ("activities", &refs.activities),
            ("notes", &refs.notes),
            ("files", &refs.files),
        ] {
            if ids.is_empty() {
                continue;
            }
            let uuids: Vec<Uuid> = ids.iter().map(|id| *id.as_uuid()).collect();
            sqlx::query(&format!(
                "UPDATE {table} SET parent_id = $1 WHERE tenant_id = $2 AND id = ANY($3)"
            ))
            .bind(target)
            .bind(tenant_id)
            .bind(&uuids)
            .execute(&mut **tx)
            .await?;
        }

        let fk = kind.parent_column();
        if !refs.deals.is_empty() {
            let uuids: Vec<Uuid> = refs.deals.iter().map(|id| *id.as_uuid()).collect();
            sqlx::query(&format!(
                "UPDATE deals SET {fk} = $1 WHERE tenant_id = $2 AND id = ANY($3)"
            ))
            .bind(target)
            .bind(tenant_id)
            .bind(&uuids)
            .execute(&mut **tx)
            .await?;
        }
        if !refs.sent_emails.is_empty() {
            let uuids: Vec<Uuid> = refs.sent_emails.iter().map(|id| *id.as_uuid()).collect();
            sqlx::query(&format!(
                "UPDATE sent_emails SET {fk} = $1 WHERE tenant_id = $2 AND id = ANY($3)"
            ))
            .bind(target)
            .bind(tenant_id)
            .bind(&uuids)
            .execute(&mut **tx)
            .await?;
        }
        if !refs.people.is_empty() {
            let uuids: Vec<Uuid> = refs.people.iter().map(|id| *id.as_uuid()).collect();
            sqlx::query(
                "UPDATE people SET organization_id = $1 WHERE tenant_id = $2 AND id = ANY($3)",
            )
            .bind(target)
            .bind(tenant_id)
            .bind(&uuids)
            .execute(&mut **tx)
            .await?;
        }

        Ok(())
    }

    async fn insert_backup_stmt(
        tx: &mut Transaction<'_, Postgres>,
        backup: &MergeBackup,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO merge_backups (
                id, tenant_id, kind, kept_id, removed_id, kept_snapshot,
                removed_snapshot, children, created_at, expires_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(backup.id.as_uuid())
        .bind(backup.tenant_id.as_uuid())
        .bind(backup.kind.as_str())
        .bind(backup.kept_id.as_uuid())
        .bind(backup.removed_id.as_uuid())
        .bind(&backup.kept_snapshot)
        .bind(&backup.removed_snapshot)
        .bind(serde_json::to_value(&backup.children)?)
        .bind(backup.created_at)
        .bind(backup.expires_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn kept_tag_ids(
        tx: &mut Transaction<'_, Postgres>,
        tenant: TenantId,
        kind: EntityKind,
        kept: RecordId,
    ) -> StoreResult<Vec<RecordId>> {
        let rows = sqlx::query(
            "SELECT tag_id FROM tag_links WHERE tenant_id = $1 AND parent_kind = $2 AND parent_id = $3",
        )
        .bind(tenant.as_uuid())
        .bind(kind.as_str())
        .bind(kept.as_uuid())
        .fetch_all(&mut **tx)
        .await?;
        rows.iter()
            .map(|r| {
                r.try_get::<Uuid, _>("tag_id")
                    .map(RecordId::from_uuid)
                    .map_err(Into::into)
            })
            .collect()
    }

    /// Union the removed record's tag links onto the kept record; the unique
    /// key on tag_links drops duplicate pairs.
    async fn union_tags(
        tx: &mut Transaction<'_, Postgres>,
        tenant: TenantId,
        kind: EntityKind,
        removed: RecordId,
        kept: RecordId,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO tag_links (tenant_id, tag_id, parent_kind, parent_id)
            SELECT tenant_id, tag_id, parent_kind, $4
            FROM tag_links
            WHERE tenant_id = $1 AND parent_kind = $2 AND parent_id = $3
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(tenant.as_uuid())
        .bind(kind.as_str())
        .bind(removed.as_uuid())
        .bind(kept.as_uuid())
        .execute(&mut **tx)
        .await?;

        sqlx::query(
            "DELETE FROM tag_links WHERE tenant_id = $1 AND parent_kind = $2 AND parent_id = $3",
        )
        .bind(tenant.as_uuid())
        .bind(kind.as_str())
        .bind(removed.as_uuid())
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}

// ─── ContactsStore ───────────────────────────────────────────────────────────

#[async_trait]
impl ContactsStore for PgStore {
    async fn insert_organization(&self, org: Organization) -> StoreResult<()> {
        Self::insert_org_stmt(&self.pool, &org).await
    }

    async fn organization(
        &self,
        tenant: TenantId,
        id: OrganizationId,
    ) -> StoreResult<Organization> {
        read_with_retry(|| async {
            let row = sqlx::query_as::<_, OrgRow>(&format!(
                "SELECT {ORG_COLUMNS} FROM organizations WHERE tenant_id = $1 AND id = $2"
            ))
            .bind(tenant.as_uuid())
            .bind(id.record().as_uuid())
            .fetch_optional(&self.pool)
            .await?;
            row.map(Organization::from).ok_or(StoreError::NotFound)
        })
        .await
    }

    async fn organizations(
        &self,
        tenant: TenantId,
        filter: &OrganizationFilter,
        page: Pagination,
    ) -> StoreResult<Page<Organization>> {
        // Tag membership resolves first; an empty resolution proves the
        // result set empty without running the main query.
        let tag_members: Vec<Uuid> = if filter.tag_ids.is_empty() {
            Vec::new()
        } else {
            TagStore::records_with_any_tag(self, tenant, EntityKind::Organization, &filter.tag_ids)
                .await?
                .into_iter()
                .map(|id| *id.as_uuid())
                .collect()
        };

        let build = |columns: &str| -> (QueryBuilder<'static, Postgres>, FilterOutcome) {
            let mut qb = QueryBuilder::new(format!(
                "SELECT {columns} FROM organizations WHERE tenant_id = "
            ));
            qb.push_bind(*tenant.as_uuid());
            if let Some(search) = &filter.search {
                push_search(&mut qb, search, &["name", "legal_name", "cnpj", "email"]);
            }
            let owner_ids: Vec<Uuid> = filter.owner_ids.iter().map(|id| *id.as_uuid()).collect();
            push_in_uuid(&mut qb, "owner_id", &owner_ids);
            push_null_presence(&mut qb, "cnpj", filter.has_cnpj);
            push_date_range(&mut qb, "created_at", filter.created_from, filter.created_to);
            let outcome =
                apply_tag_filter(&mut qb, "id", !filter.tag_ids.is_empty(), &tag_members);
            (qb, outcome)
        };

        let (mut count_qb, outcome) = build("COUNT(*) AS total");
        if outcome == FilterOutcome::Empty {
            return Ok(Page::empty(page));
        }
        let total: i64 = count_qb
            .build()
            .fetch_one(&self.pool)
            .await?
            .try_get("total")?;

        let (mut qb, _) = build(ORG_COLUMNS);
        qb.push(" ORDER BY updated_at DESC LIMIT ");
        qb.push_bind(page.limit());
        qb.push(" OFFSET ");
        qb.push_bind(page.offset());

        let rows = qb.build_query_as::<OrgRow>().fetch_all(&self.pool).await?;
        Ok(Page {
            items: rows.into_iter().map(Organization::from).collect(),
            total: total as u64,
            page: page.page,
            per_page: page.per_page,
        })
    }

    async fn update_organization(&self, org: Organization) -> StoreResult<()> {
        Self::update_org_stmt(&self.pool, &org).await
    }

    async fn delete_organization(&self, tenant: TenantId, id: OrganizationId) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        let record = id.record();

        // Polymorphic children carry no FK; check them here. Deals/people FKs
        // surface as 23503 from the DELETE itself.
        let children = Self::children_of(&mut tx, tenant, EntityKind::Organization, record).await?;
        if !children.activities.is_empty()
            || !children.notes.is_empty()
            || !children.files.is_empty()
        {
            return Err(StoreError::ForeignKey(
                "organization still has linked records".to_string(),
            ));
        }

        sqlx::query(
            "DELETE FROM tag_links WHERE tenant_id = $1 AND parent_kind = $2 AND parent_id = $3",
        )
        .bind(tenant.as_uuid())
        .bind(EntityKind::Organization.as_str())
        .bind(record.as_uuid())
        .execute(&mut *tx)
        .await?;

        let result = sqlx::query("DELETE FROM organizations WHERE tenant_id = $1 AND id = $2")
            .bind(tenant.as_uuid())
            .bind(record.as_uuid())
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }

        tx.commit().await?;
        Ok(())
    }

    async fn organization_by_cnpj(
        &self,
        tenant: TenantId,
        cnpj: &str,
    ) -> StoreResult<Option<Organization>> {
        let row = sqlx::query_as::<_, OrgRow>(&format!(
            "SELECT {ORG_COLUMNS} FROM organizations WHERE tenant_id = $1 AND cnpj = $2"
        ))
        .bind(tenant.as_uuid())
        .bind(cnpj)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Organization::from))
    }

    async fn insert_person(&self, person: Person) -> StoreResult<()> {
        Self::insert_person_stmt(&self.pool, &person).await
    }

    async fn person(&self, tenant: TenantId, id: PersonId) -> StoreResult<Person> {
        read_with_retry(|| async {
            let row = sqlx::query_as::<_, PersonRow>(&format!(
                "SELECT {PERSON_COLUMNS} FROM people WHERE tenant_id = $1 AND id = $2"
            ))
            .bind(tenant.as_uuid())
            .bind(id.record().as_uuid())
            .fetch_optional(&self.pool)
            .await?;
            row.map(Person::from).ok_or(StoreError::NotFound)
        })
        .await
    }

    async fn people(
        &self,
        tenant: TenantId,
        filter: &PersonFilter,
        page: Pagination,
    ) -> StoreResult<Page<Person>> {
        let tag_members: Vec<Uuid> = if filter.tag_ids.is_empty() {
            Vec::new()
        } else {
            TagStore::records_with_any_tag(self, tenant, EntityKind::Person, &filter.tag_ids)
                .await?
                .into_iter()
                .map(|id| *id.as_uuid())
                .collect()
        };

        let build = |columns: &str| -> (QueryBuilder<'static, Postgres>, FilterOutcome) {
            let mut qb =
                QueryBuilder::new(format!("SELECT {columns} FROM people WHERE tenant_id = "));
            qb.push_bind(*tenant.as_uuid());
            if let Some(search) = &filter.search {
                push_search(&mut qb, search, &["name", "email", "phone"]);
            }
            let owner_ids: Vec<Uuid> = filter.owner_ids.iter().map(|id| *id.as_uuid()).collect();
            push_in_uuid(&mut qb, "owner_id", &owner_ids);
            if let Some(org) = filter.organization_id {
                qb.push(" AND organization_id = ");
                qb.push_bind(*org.record().as_uuid());
            }
            push_date_range(&mut qb, "created_at", filter.created_from, filter.created_to);
            let outcome =
                apply_tag_filter(&mut qb, "id", !filter.tag_ids.is_empty(), &tag_members);
            (qb, outcome)
        };

        let (mut count_qb, outcome) = build("COUNT(*) AS total");
        if outcome == FilterOutcome::Empty {
            return Ok(Page::empty(page));
        }
        let total: i64 = count_qb
            .build()
            .fetch_one(&self.pool)
            .await?
            .try_get("total")?;

        let (mut qb, _) = build(PERSON_COLUMNS);
        qb.push(" ORDER BY updated_at DESC LIMIT ");
        qb.push_bind(page.limit());
        qb.push(" OFFSET ");
        qb.push_bind(page.offset());

        let rows = qb
            .build_query_as::<PersonRow>()
            .fetch_all(&self.pool)
            .await?;
        Ok(Page {
            items: rows.into_iter().map(Person::from).collect(),
            total: total as u64,
            page: page.page,
            per_page: page.per_page,
        })
    }

    async fn update_person(&self, person: Person) -> StoreResult<()> {
        Self::update_person_stmt(&self.pool, &person).await
    }

    async fn delete_person(&self, tenant: TenantId, id: PersonId) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        let record = id.record();

        let children = Self::children_of(&mut tx, tenant, EntityKind::Person, record).await?;
        if !children.activities.is_empty()
            || !children.notes.is_empty()
            || !children.files.is_empty()
        {
            return Err(StoreError::ForeignKey(
                "person still has linked records".to_string(),
            ));
        }

        sqlx::query(
            "DELETE FROM tag_links WHERE tenant_id = $1 AND parent_kind = $2 AND parent_id = $3",
        )
        .bind(tenant.as_uuid())
        .bind(EntityKind::Person.as_str())
        .bind(record.as_uuid())
        .execute(&mut *tx)
        .await?;

        // conversations.person_id is ON DELETE SET NULL.
        let result = sqlx::query("DELETE FROM people WHERE tenant_id = $1 AND id = $2")
            .bind(tenant.as_uuid())
            .bind(record.as_uuid())
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }

        tx.commit().await?;
        Ok(())
    }

    async fn person_by_whatsapp(
        &self,
        tenant: TenantId,
        phone: &str,
    ) -> StoreResult<Option<Person>> {
        let row = sqlx::query_as::<_, PersonRow>(&format!(
            "SELECT {PERSON_COLUMNS} FROM people WHERE tenant_id = $1 AND whatsapp = $2 LIMIT 1"
        ))
        .bind(tenant.as_uuid())
        .bind(phone)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Person::from))
    }

    async fn merge_organizations(
        &self,
        tenant: TenantId,
        keep: OrganizationId,
        delete: OrganizationId,
        choices: &OrganizationFieldChoices,
        actor: UserId,
        now: DateTime<Utc>,
    ) -> StoreResult<(Organization, MergeOutcome)> {
        if keep == delete {
            return Err(DomainError::conflict("cannot merge a record with itself").into());
        }

        let mut tx = self.pool.begin().await?;

        let lock_sql = format!(
            "SELECT {ORG_COLUMNS} FROM organizations WHERE tenant_id = $1 AND id = $2 FOR UPDATE"
        );
        let kept: Organization = sqlx::query_as::<_, OrgRow>(&lock_sql)
            .bind(tenant.as_uuid())
            .bind(keep.record().as_uuid())
            .fetch_optional(&mut *tx)
            .await?
            .map(Into::into)
            .ok_or(StoreError::NotFound)?;
        let removed: Organization = sqlx::query_as::<_, OrgRow>(&lock_sql)
            .bind(tenant.as_uuid())
            .bind(delete.record().as_uuid())
            .fetch_optional(&mut *tx)
            .await?
            .map(Into::into)
            .ok_or(StoreError::NotFound)?;

        // Snapshot + child enumeration persist before any mutation.
        let mut children =
            Self::children_of(&mut tx, tenant, EntityKind::Organization, delete.record()).await?;
        children.kept_tags =
            Self::kept_tag_ids(&mut tx, tenant, EntityKind::Organization, keep.record()).await?;
        let backup = MergeBackup::for_organizations(&kept, &removed, children.clone(), now)?;
        Self::insert_backup_stmt(&mut tx, &backup).await?;

        // The removed row must lose its unique CNPJ before the kept row can
        // inherit it, so clear it first.
        sqlx::query("UPDATE organizations SET cnpj = NULL WHERE tenant_id = $1 AND id = $2")
            .bind(tenant.as_uuid())
            .bind(delete.record().as_uuid())
            .execute(&mut *tx)
            .await?;

        // Winning field values onto the kept row.
        let resolved = resolve_organization(&kept, &removed, choices, now);
        Self::update_org_stmt(&mut *tx, &resolved).await?;

        // Repoint children; union tags without duplicate pairs.
        Self::repoint_children(
            &mut tx,
            tenant,
            EntityKind::Organization,
            &children,
            keep.record(),
        )
        .await?;
        Self::union_tags(
            &mut tx,
            tenant,
            EntityKind::Organization,
            delete.record(),
            keep.record(),
        )
        .await?;

        // Audit entry, then delete the orphaned record.
        let entry = HistoryEntry::new(
            tenant,
            EntityKind::Organization,
            keep.record(),
            HistoryKind::OrganizationsMerged,
            format!("Mesclado com \"{}\"", removed.name),
            serde_json::json!({ "backup_id": backup.id, "removed_name": removed.name }),
            actor,
            now,
        );
        Self::append_history_stmt(&mut *tx, &entry).await?;

        sqlx::query("DELETE FROM organizations WHERE tenant_id = $1 AND id = $2")
            .bind(tenant.as_uuid())
            .bind(delete.record().as_uuid())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok((
            resolved,
            MergeOutcome {
                backup_id: backup.id,
                transferred: children,
            },
        ))
    }

    async fn merge_people(
        &self,
        tenant: TenantId,
        keep: PersonId,
        delete: PersonId,
        choices: &PersonFieldChoices,
        actor: UserId,
        now: DateTime<Utc>,
    ) -> StoreResult<(Person, MergeOutcome)> {
        if keep == delete {
            return Err(DomainError::conflict("cannot merge a record with itself").into());
        }

        let mut tx = self.pool.begin().await?;

        let lock_sql = format!(
            "SELECT {PERSON_COLUMNS} FROM people WHERE tenant_id = $1 AND id = $2 FOR UPDATE"
        );
        let kept: Person = sqlx::query_as::<_, PersonRow>(&lock_sql)
            .bind(tenant.as_uuid())
            .bind(keep.record().as_uuid())
            .fetch_optional(&mut *tx)
            .await?
            .map(Into::into)
            .ok_or(StoreError::NotFound)?;
        let removed: Person = sqlx::query_as::<_, PersonRow>(&lock_sql)
            .bind(tenant.as_uuid())
            .bind(delete.record().as_uuid())
            .fetch_optional(&mut *tx)
            .await?
            .map(Into::into)
            .ok_or(StoreError::NotFound)?;

        let mut children =
            Self::children_of(&mut tx, tenant, EntityKind::Person, delete.record()).await?;
        children.kept_tags =
            Self::kept_tag_ids(&mut tx, tenant, EntityKind::Person, keep.record()).await?;
        let backup = MergeBackup::for_people(&kept, &removed, children.clone(), now)?;
        Self::insert_backup_stmt(&mut tx, &backup).await?;

        let resolved = resolve_person(&kept, &removed, choices, now);
        Self::update_person_stmt(&mut *tx, &resolved).await?;

        Self::repoint_children(
            &mut tx,
            tenant,
            EntityKind::Person,
            &children,
            keep.record(),
        )
        .await?;
        Self::union_tags(
            &mut tx,
            tenant,
            EntityKind::Person,
            delete.record(),
            keep.record(),
        )
        .await?;

        // Conversations follow the kept person.
        sqlx::query(
            "UPDATE conversations SET person_id = $1 WHERE tenant_id = $2 AND person_id = $3",
        )
        .bind(keep.record().as_uuid())
        .bind(tenant.as_uuid())
        .bind(delete.record().as_uuid())
        .execute(&mut *tx)
        .await?;

        let entry = HistoryEntry::new(
            tenant,
            EntityKind::Person,
            keep.record(),
            HistoryKind::ContactsMerged,
            format!("Mesclado com \"{}\"", removed.name),
            serde_json::json!({ "backup_id": backup.id, "removed_name": removed.name }),
            actor,
            now,
        );
        Self::append_history_stmt(&mut *tx, &entry).await?;

        sqlx::query("DELETE FROM people WHERE tenant_id = $1 AND id = $2")
            .bind(tenant.as_uuid())
            .bind(delete.record().as_uuid())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok((
            resolved,
            MergeOutcome {
                backup_id: backup.id,
                transferred: children,
            },
        ))
    }

    async fn merge_backup(&self, tenant: TenantId, id: RecordId) -> StoreResult<MergeBackup> {
        let row = sqlx::query(
            "SELECT * FROM merge_backups WHERE tenant_id = $1 AND id = $2",
        )
        .bind(tenant.as_uuid())
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound)?;
        backup_from_row(&row)
    }

    async fn merge_backups(&self, tenant: TenantId) -> StoreResult<Vec<MergeBackup>> {
        let rows = sqlx::query(
            "SELECT * FROM merge_backups WHERE tenant_id = $1 ORDER BY created_at DESC",
        )
        .bind(tenant.as_uuid())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(backup_from_row).collect()
    }

    async fn undo_merge(
        &self,
        tenant: TenantId,
        backup_id: RecordId,
        actor: UserId,
        now: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            "SELECT * FROM merge_backups WHERE tenant_id = $1 AND id = $2 FOR UPDATE",
        )
        .bind(tenant.as_uuid())
        .bind(backup_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(StoreError::NotFound)?;
        let backup = backup_from_row(&row)?;
        if backup.is_expired(now) {
            return Err(DomainError::conflict("merge backup has expired").into());
        }

        match backup.kind {
            EntityKind::Organization => {
                let kept = backup.kept_organization()?;
                let removed = backup.removed_organization()?;
                // Restore the kept row's prior field values, reinsert the
                // removed row. The kept row must release an inherited CNPJ
                // first (tenant-unique column).
                let current_cnpj: Option<String> = sqlx::query_scalar(
                    "SELECT cnpj FROM organizations WHERE tenant_id = $1 AND id = $2",
                )
                .bind(tenant.as_uuid())
                .bind(kept.id.record().as_uuid())
                .fetch_optional(&mut *tx)
                .await?
                .flatten();
                if removed.cnpj.is_some() && removed.cnpj == current_cnpj {
                    sqlx::query(
                        "UPDATE organizations SET cnpj = NULL WHERE tenant_id = $1 AND id = $2",
                    )
                    .bind(tenant.as_uuid())
                    .bind(kept.id.record().as_uuid())
                    .execute(&mut *tx)
                    .await?;
                }
                Self::insert_org_stmt(&mut *tx, &removed).await?;
                Self::update_org_stmt(&mut *tx, &kept).await?;
            }
            EntityKind::Person => {
                let kept = backup.kept_person()?;
                let removed = backup.removed_person()?;
                Self::insert_person_stmt(&mut *tx, &removed).await?;
                Self::update_person_stmt(&mut *tx, &kept).await?;
            }
            EntityKind::Deal => {
                return Err(DomainError::invariant("deals are never merged").into());
            }
        }

        // Reverse exactly the recorded transfers.
        Self::repoint_children(
            &mut tx,
            tenant,
            backup.kind,
            &backup.children,
            backup.removed_id,
        )
        .await?;

        for tag in &backup.children.tags {
            if !backup.children.kept_tags.contains(tag) {
                sqlx::query(
                    "DELETE FROM tag_links WHERE tenant_id = $1 AND tag_id = $2 AND parent_kind = $3 AND parent_id = $4",
                )
                .bind(tenant.as_uuid())
                .bind(tag.as_uuid())
                .bind(backup.kind.as_str())
                .bind(backup.kept_id.as_uuid())
                .execute(&mut *tx)
                .await?;
            }
            sqlx::query(
                r#"
                INSERT INTO tag_links (tenant_id, tag_id, parent_kind, parent_id)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT DO NOTHING
                "#,
            )
            .bind(tenant.as_uuid())
            .bind(tag.as_uuid())
            .bind(backup.kind.as_str())
            .bind(backup.removed_id.as_uuid())
            .execute(&mut *tx)
            .await?;
        }

        let entry = HistoryEntry::new(
            tenant,
            backup.kind,
            backup.kept_id,
            HistoryKind::MergeUndone,
            "Mesclagem desfeita".to_string(),
            serde_json::json!({ "backup_id": backup_id, "restored_id": backup.removed_id }),
            actor,
            now,
        );
        Self::append_history_stmt(&mut *tx, &entry).await?;

        sqlx::query("DELETE FROM merge_backups WHERE tenant_id = $1 AND id = $2")
            .bind(tenant.as_uuid())
            .bind(backup_id.as_uuid())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn purge_expired_backups(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM merge_backups WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

// ─── DealStore ───────────────────────────────────────────────────────────────

#[async_trait]
impl DealStore for PgStore {
    async fn insert_pipeline(&self, pipeline: Pipeline) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO pipelines (id, tenant_id, name, stages) VALUES ($1, $2, $3, $4)",
        )
        .bind(pipeline.id.record().as_uuid())
        .bind(pipeline.tenant_id.as_uuid())
        .bind(&pipeline.name)
        .bind(serde_json::to_value(&pipeline.stages)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn pipeline(&self, tenant: TenantId, id: PipelineId) -> StoreResult<Pipeline> {
        let row = sqlx::query(
            "SELECT id, tenant_id, name, stages FROM pipelines WHERE tenant_id = $1 AND id = $2",
        )
        .bind(tenant.as_uuid())
        .bind(id.record().as_uuid())
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound)?;
        pipeline_from_row(&row)
    }

    async fn pipelines(&self, tenant: TenantId) -> StoreResult<Vec<Pipeline>> {
        let rows = sqlx::query(
            "SELECT id, tenant_id, name, stages FROM pipelines WHERE tenant_id = $1 ORDER BY name",
        )
        .bind(tenant.as_uuid())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(pipeline_from_row).collect()
    }

    async fn insert_deal(&self, deal: Deal) -> StoreResult<()> {
        let (status, won_at, lost_at, lost_reason) = deal_status_columns(&deal);
        sqlx::query(
            r#"
            INSERT INTO deals (
                id, tenant_id, title, value_cents, pipeline_id, stage_id, status,
                won_at, lost_at, lost_reason, organization_id, person_id, owner_id,
                expected_close, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            "#,
        )
        .bind(deal.id.record().as_uuid())
        .bind(deal.tenant_id.as_uuid())
        .bind(&deal.title)
        .bind(deal.value_cents)
        .bind(deal.pipeline_id.record().as_uuid())
        .bind(deal.stage_id.record().as_uuid())
        .bind(status)
        .bind(won_at)
        .bind(lost_at)
        .bind(lost_reason)
        .bind(deal.organization_id.map(|id| *id.record().as_uuid()))
        .bind(deal.person_id.map(|id| *id.record().as_uuid()))
        .bind(deal.owner_id.as_uuid())
        .bind(deal.expected_close)
        .bind(deal.created_at)
        .bind(deal.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn deal(&self, tenant: TenantId, id: DealId) -> StoreResult<Deal> {
        let row = sqlx::query_as::<_, DealRow>(&format!(
            "SELECT {DEAL_COLUMNS} FROM deals WHERE tenant_id = $1 AND id = $2"
        ))
        .bind(tenant.as_uuid())
        .bind(id.record().as_uuid())
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound)?;
        row.into_deal()
    }

    async fn deals(
        &self,
        tenant: TenantId,
        filter: &DealFilter,
        page: Pagination,
    ) -> StoreResult<Page<Deal>> {
        let build = |columns: &str| -> QueryBuilder<'static, Postgres> {
            let mut qb =
                QueryBuilder::new(format!("SELECT {columns} FROM deals WHERE tenant_id = "));
            qb.push_bind(*tenant.as_uuid());
            if let Some(search) = &filter.search {
                push_search(&mut qb, search, &["title"]);
            }
            if let Some(pipeline) = filter.pipeline_id {
                qb.push(" AND pipeline_id = ");
                qb.push_bind(*pipeline.record().as_uuid());
            }
            if let Some(stage) = filter.stage_id {
                qb.push(" AND stage_id = ");
                qb.push_bind(*stage.record().as_uuid());
            }
            if let Some(status) = &filter.status {
                qb.push(" AND status = ");
                qb.push_bind(status.clone());
            }
            let owner_ids: Vec<Uuid> = filter.owner_ids.iter().map(|id| *id.as_uuid()).collect();
            push_in_uuid(&mut qb, "owner_id", &owner_ids);
            if let Some(org) = filter.organization_id {
                qb.push(" AND organization_id = ");
                qb.push_bind(*org.record().as_uuid());
            }
            if let Some(person) = filter.person_id {
                qb.push(" AND person_id = ");
                qb.push_bind(*person.record().as_uuid());
            }
            qb
        };

        let total: i64 = build("COUNT(*) AS total")
            .build()
            .fetch_one(&self.pool)
            .await?
            .try_get("total")?;

        let mut qb = build(DEAL_COLUMNS);
        qb.push(" ORDER BY updated_at DESC LIMIT ");
        qb.push_bind(page.limit());
        qb.push(" OFFSET ");
        qb.push_bind(page.offset());

        let rows = qb.build_query_as::<DealRow>().fetch_all(&self.pool).await?;
        let items = rows
            .into_iter()
            .map(DealRow::into_deal)
            .collect::<StoreResult<Vec<_>>>()?;
        Ok(Page {
            items,
            total: total as u64,
            page: page.page,
            per_page: page.per_page,
        })
    }

    async fn all_deals(&self, tenant: TenantId) -> StoreResult<Vec<Deal>> {
        let rows = sqlx::query_as::<_, DealRow>(&format!(
            "SELECT {DEAL_COLUMNS} FROM deals WHERE tenant_id = $1"
        ))
        .bind(tenant.as_uuid())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(DealRow::into_deal).collect()
    }

    async fn update_deal(&self, deal: Deal) -> StoreResult<()> {
        let (status, won_at, lost_at, lost_reason) = deal_status_columns(&deal);
        let result = sqlx::query(
            r#"
            UPDATE deals SET
                title = $3, value_cents = $4, pipeline_id = $5, stage_id = $6,
                status = $7, won_at = $8, lost_at = $9, lost_reason = $10,
                organization_id = $11, person_id = $12, owner_id = $13,
                expected_close = $14, updated_at = $15
            WHERE tenant_id = $1 AND id = $2
            "#,
        )
        .bind(deal.tenant_id.as_uuid())
        .bind(deal.id.record().as_uuid())
        .bind(&deal.title)
        .bind(deal.value_cents)
        .bind(deal.pipeline_id.record().as_uuid())
        .bind(deal.stage_id.record().as_uuid())
        .bind(status)
        .bind(won_at)
        .bind(lost_at)
        .bind(lost_reason)
        .bind(deal.organization_id.map(|id| *id.record().as_uuid()))
        .bind(deal.person_id.map(|id| *id.record().as_uuid()))
        .bind(deal.owner_id.as_uuid())
        .bind(deal.expected_close)
        .bind(deal.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn delete_deal(&self, tenant: TenantId, id: DealId) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        let record = id.record();

        let children = Self::children_of(&mut tx, tenant, EntityKind::Deal, record).await?;
        if !children.activities.is_empty()
            || !children.notes.is_empty()
            || !children.files.is_empty()
        {
            return Err(StoreError::ForeignKey(
                "deal still has linked records".to_string(),
            ));
        }

        sqlx::query(
            "DELETE FROM tag_links WHERE tenant_id = $1 AND parent_kind = $2 AND parent_id = $3",
        )
        .bind(tenant.as_uuid())
        .bind(EntityKind::Deal.as_str())
        .bind(record.as_uuid())
        .execute(&mut *tx)
        .await?;

        let result = sqlx::query("DELETE FROM deals WHERE tenant_id = $1 AND id = $2")
            .bind(tenant.as_uuid())
            .bind(record.as_uuid())
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }

        tx.commit().await?;
        Ok(())
    }
}

fn pipeline_from_row(row: &PgRow) -> StoreResult<Pipeline> {
    let stages: Vec<Stage> = serde_json::from_value(row.try_get("stages")?)?;
    Ok(Pipeline {
        id: PipelineId::new(RecordId::from_uuid(row.try_get("id")?)),
        tenant_id: TenantId::from_uuid(row.try_get("tenant_id")?),
        name: row.try_get("name")?,
        stages,
    })
}

// ─── TimelineStore ───────────────────────────────────────────────────────────

#[async_trait]
impl TimelineStore for PgStore {
    async fn insert_activity(&self, activity: Activity) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO activities (
                id, tenant_id, parent_kind, parent_id, kind, subject, due_at,
                done_at, owner_id, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(activity.id.record().as_uuid())
        .bind(activity.tenant_id.as_uuid())
        .bind(activity.parent_kind.as_str())
        .bind(activity.parent_id.as_uuid())
        .bind(enum_to_str(&activity.kind)?)
        .bind(&activity.subject)
        .bind(activity.due_at)
        .bind(activity.done_at)
        .bind(activity.owner_id.as_uuid())
        .bind(activity.created_at)
        .bind(activity.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn activity(&self, tenant: TenantId, id: ActivityId) -> StoreResult<Activity> {
        let row = sqlx::query("SELECT * FROM activities WHERE tenant_id = $1 AND id = $2")
            .bind(tenant.as_uuid())
            .bind(id.record().as_uuid())
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound)?;
        activity_from_row(&row)
    }

    async fn update_activity(&self, activity: Activity) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE activities SET
                kind = $3, subject = $4, due_at = $5, done_at = $6,
                owner_id = $7, updated_at = $8
            WHERE tenant_id = $1 AND id = $2
            "#,
        )
        .bind(activity.tenant_id.as_uuid())
        .bind(activity.id.record().as_uuid())
        .bind(enum_to_str(&activity.kind)?)
        .bind(&activity.subject)
        .bind(activity.due_at)
        .bind(activity.done_at)
        .bind(activity.owner_id.as_uuid())
        .bind(activity.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn delete_activity(&self, tenant: TenantId, id: ActivityId) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM activities WHERE tenant_id = $1 AND id = $2")
            .bind(tenant.as_uuid())
            .bind(id.record().as_uuid())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn activities_for(
        &self,
        tenant: TenantId,
        kind: EntityKind,
        parent: RecordId,
    ) -> StoreResult<Vec<Activity>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM activities
            WHERE tenant_id = $1 AND parent_kind = $2 AND parent_id = $3
            ORDER BY created_at DESC
            "#,
        )
        .bind(tenant.as_uuid())
        .bind(kind.as_str())
        .bind(parent.as_uuid())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(activity_from_row).collect()
    }

    async fn activities_for_owner(
        &self,
        tenant: TenantId,
        owner: UserId,
    ) -> StoreResult<Vec<Activity>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM activities
            WHERE tenant_id = $1 AND owner_id = $2
            ORDER BY due_at ASC NULLS LAST
            "#,
        )
        .bind(tenant.as_uuid())
        .bind(owner.as_uuid())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(activity_from_row).collect()
    }

    async fn all_activities(&self, tenant: TenantId) -> StoreResult<Vec<Activity>> {
        let rows = sqlx::query("SELECT * FROM activities WHERE tenant_id = $1")
            .bind(tenant.as_uuid())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(activity_from_row).collect()
    }

    async fn insert_note(&self, note: Note) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO notes (
                id, tenant_id, parent_kind, parent_id, body, pinned,
                created_by, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(note.id.record().as_uuid())
        .bind(note.tenant_id.as_uuid())
        .bind(note.parent_kind.as_str())
        .bind(note.parent_id.as_uuid())
        .bind(&note.body)
        .bind(note.pinned)
        .bind(note.created_by.as_uuid())
        .bind(note.created_at)
        .bind(note.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn note(&self, tenant: TenantId, id: NoteId) -> StoreResult<Note> {
        let row = sqlx::query("SELECT * FROM notes WHERE tenant_id = $1 AND id = $2")
            .bind(tenant.as_uuid())
            .bind(id.record().as_uuid())
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound)?;
        note_from_row(&row)
    }

    async fn update_note(&self, note: Note) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE notes SET body = $3, pinned = $4, updated_at = $5
            WHERE tenant_id = $1 AND id = $2
            "#,
        )
        .bind(note.tenant_id.as_uuid())
        .bind(note.id.record().as_uuid())
        .bind(&note.body)
        .bind(note.pinned)
        .bind(note.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn delete_note(&self, tenant: TenantId, id: NoteId) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM notes WHERE tenant_id = $1 AND id = $2")
            .bind(tenant.as_uuid())
            .bind(id.record().as_uuid())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn notes_for(
        &self,
        tenant: TenantId,
        kind: EntityKind,
        parent: RecordId,
    ) -> StoreResult<Vec<NoteView>> {
        let rows = sqlx::query(
            r#"
            SELECT n.*, p.display_name AS author_name
            FROM notes n
            LEFT JOIN profiles p ON p.tenant_id = n.tenant_id AND p.user_id = n.created_by
            WHERE n.tenant_id = $1 AND n.parent_kind = $2 AND n.parent_id = $3
            ORDER BY n.pinned DESC, n.created_at DESC
            "#,
        )
        .bind(tenant.as_uuid())
        .bind(kind.as_str())
        .bind(parent.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(NoteView {
                    note: note_from_row(row)?,
                    author_name: row.try_get("author_name")?,
                })
            })
            .collect()
    }

    async fn insert_file(&self, file: FileAttachment) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO files (
                id, tenant_id, parent_kind, parent_id, file_name, content_type,
                size_bytes, storage_path, uploaded_by, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(file.id.record().as_uuid())
        .bind(file.tenant_id.as_uuid())
        .bind(file.parent_kind.as_str())
        .bind(file.parent_id.as_uuid())
        .bind(&file.file_name)
        .bind(&file.content_type)
        .bind(file.size_bytes)
        .bind(&file.storage_path)
        .bind(file.uploaded_by.as_uuid())
        .bind(file.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn file(&self, tenant: TenantId, id: FileId) -> StoreResult<FileAttachment> {
        let row = sqlx::query("SELECT * FROM files WHERE tenant_id = $1 AND id = $2")
            .bind(tenant.as_uuid())
            .bind(id.record().as_uuid())
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound)?;
        file_from_row(&row)
    }

    async fn delete_file(&self, tenant: TenantId, id: FileId) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM files WHERE tenant_id = $1 AND id = $2")
            .bind(tenant.as_uuid())
            .bind(id.record().as_uuid())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn files_for(
        &self,
        tenant: TenantId,
        kind: EntityKind,
        parent: RecordId,
    ) -> StoreResult<Vec<FileAttachment>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM files
            WHERE tenant_id = $1 AND parent_kind = $2 AND parent_id = $3
            ORDER BY created_at DESC
            "#,
        )
        .bind(tenant.as_uuid())
        .bind(kind.as_str())
        .bind(parent.as_uuid())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(file_from_row).collect()
    }

    async fn append_history(&self, entry: HistoryEntry) -> StoreResult<()> {
        Self::append_history_stmt(&self.pool, &entry).await
    }

    async fn history_for(
        &self,
        tenant: TenantId,
        kind: EntityKind,
        parent: RecordId,
    ) -> StoreResult<Vec<HistoryView>> {
        let rows = sqlx::query(
            r#"
            SELECT h.*, p.display_name AS actor_name
            FROM history h
            LEFT JOIN profiles p ON p.tenant_id = h.tenant_id AND p.user_id = h.actor_id
            WHERE h.tenant_id = $1 AND h.parent_kind = $2 AND h.parent_id = $3
            ORDER BY h.created_at DESC
            "#,
        )
        .bind(tenant.as_uuid())
        .bind(kind.as_str())
        .bind(parent.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(HistoryView {
                    entry: history_from_row(row)?,
                    actor_name: row.try_get("actor_name")?,
                })
            })
            .collect()
    }
}

// ─── DirectoryStore ──────────────────────────────────────────────────────────

#[async_trait]
impl DirectoryStore for PgStore {
    async fn upsert_profile(&self, tenant: TenantId, profile: Profile) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO profiles (tenant_id, user_id, display_name, email)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (tenant_id, user_id)
            DO UPDATE SET display_name = EXCLUDED.display_name, email = EXCLUDED.email
            "#,
        )
        .bind(tenant.as_uuid())
        .bind(profile.user_id.as_uuid())
        .bind(&profile.display_name)
        .bind(&profile.email)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn profile(&self, tenant: TenantId, user_id: UserId) -> StoreResult<Option<Profile>> {
        let row = sqlx::query(
            "SELECT user_id, display_name, email FROM profiles WHERE tenant_id = $1 AND user_id = $2",
        )
        .bind(tenant.as_uuid())
        .bind(user_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| {
            Ok(Profile {
                user_id: UserId::from_uuid(r.try_get("user_id")?),
                display_name: r.try_get("display_name")?,
                email: r.try_get("email")?,
            })
        })
        .transpose()
    }

    async fn profiles(&self, tenant: TenantId) -> StoreResult<Vec<Profile>> {
        let rows = sqlx::query(
            "SELECT user_id, display_name, email FROM profiles WHERE tenant_id = $1 ORDER BY display_name",
        )
        .bind(tenant.as_uuid())
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|r| {
                Ok(Profile {
                    user_id: UserId::from_uuid(r.try_get("user_id")?),
                    display_name: r.try_get("display_name")?,
                    email: r.try_get("email")?,
                })
            })
            .collect()
    }
}

// ─── TagStore ────────────────────────────────────────────────────────────────

#[async_trait]
impl TagStore for PgStore {
    async fn insert_tag(&self, tag: Tag) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO tags (id, tenant_id, name, color, created_at) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(tag.id.record().as_uuid())
        .bind(tag.tenant_id.as_uuid())
        .bind(&tag.name)
        .bind(&tag.color)
        .bind(tag.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn tags(&self, tenant: TenantId) -> StoreResult<Vec<Tag>> {
        let rows = sqlx::query("SELECT * FROM tags WHERE tenant_id = $1 ORDER BY name")
            .bind(tenant.as_uuid())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(tag_from_row).collect()
    }

    async fn delete_tag(&self, tenant: TenantId, id: TagId) -> StoreResult<()> {
        // tag_links has ON DELETE CASCADE on tag_id.
        let result = sqlx::query("DELETE FROM tags WHERE tenant_id = $1 AND id = $2")
            .bind(tenant.as_uuid())
            .bind(id.record().as_uuid())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn assign_tag(
        &self,
        tenant: TenantId,
        tag_id: TagId,
        kind: EntityKind,
        parent: RecordId,
    ) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO tag_links (tenant_id, tag_id, parent_kind, parent_id)
            SELECT $1, id, $3, $4 FROM tags WHERE tenant_id = $1 AND id = $2
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(tenant.as_uuid())
        .bind(tag_id.record().as_uuid())
        .bind(kind.as_str())
        .bind(parent.as_uuid())
        .execute(&self.pool)
        .await?;

        // Zero inserted rows with a missing tag means NotFound; an existing
        // link is fine (idempotent assign).
        if result.rows_affected() == 0 {
            let exists: Option<Uuid> =
                sqlx::query_scalar("SELECT id FROM tags WHERE tenant_id = $1 AND id = $2")
                    .bind(tenant.as_uuid())
                    .bind(tag_id.record().as_uuid())
                    .fetch_optional(&self.pool)
                    .await?;
            if exists.is_none() {
                return Err(StoreError::NotFound);
            }
        }
        Ok(())
    }

    async fn unassign_tag(
        &self,
        tenant: TenantId,
        tag_id: TagId,
        kind: EntityKind,
        parent: RecordId,
    ) -> StoreResult<()> {
        sqlx::query(
            "DELETE FROM tag_links WHERE tenant_id = $1 AND tag_id = $2 AND parent_kind = $3 AND parent_id = $4",
        )
        .bind(tenant.as_uuid())
        .bind(tag_id.record().as_uuid())
        .bind(kind.as_str())
        .bind(parent.as_uuid())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn tags_of(
        &self,
        tenant: TenantId,
        kind: EntityKind,
        parent: RecordId,
    ) -> StoreResult<Vec<Tag>> {
        let rows = sqlx::query(
            r#"
            SELECT t.*
            FROM tags t
            JOIN tag_links l ON l.tenant_id = t.tenant_id AND l.tag_id = t.id
            WHERE t.tenant_id = $1 AND l.parent_kind = $2 AND l.parent_id = $3
            ORDER BY t.name
            "#,
        )
        .bind(tenant.as_uuid())
        .bind(kind.as_str())
        .bind(parent.as_uuid())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(tag_from_row).collect()
    }

    async fn records_with_any_tag(
        &self,
        tenant: TenantId,
        kind: EntityKind,
        tag_ids: &[TagId],
    ) -> StoreResult<Vec<RecordId>> {
        if tag_ids.is_empty() {
            return Ok(Vec::new());
        }
        let uuids: Vec<Uuid> = tag_ids.iter().map(|id| *id.record().as_uuid()).collect();
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT parent_id FROM tag_links
            WHERE tenant_id = $1 AND parent_kind = $2 AND tag_id = ANY($3)
            "#,
        )
        .bind(tenant.as_uuid())
        .bind(kind.as_str())
        .bind(&uuids)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|r| {
                r.try_get::<Uuid, _>("parent_id")
                    .map(RecordId::from_uuid)
                    .map_err(Into::into)
            })
            .collect()
    }
}

fn tag_from_row(row: &PgRow) -> StoreResult<Tag> {
    Ok(Tag {
        id: TagId::new(RecordId::from_uuid(row.try_get("id")?)),
        tenant_id: TenantId::from_uuid(row.try_get("tenant_id")?),
        name: row.try_get("name")?,
        color: row.try_get("color")?,
        created_at: row.try_get("created_at")?,
    })
}

// ─── InboxStore ──────────────────────────────────────────────────────────────

#[async_trait]
impl InboxStore for PgStore {
    async fn conversation_for_phone(
        &self,
        tenant: TenantId,
        phone: &str,
        person_id: Option<PersonId>,
        now: DateTime<Utc>,
    ) -> StoreResult<Conversation> {
        let row = sqlx::query(
            r#"
            INSERT INTO conversations (id, tenant_id, phone, person_id, unread_count, created_at)
            VALUES ($1, $2, $3, $4, 0, $5)
            ON CONFLICT (tenant_id, phone) DO UPDATE SET phone = EXCLUDED.phone
            RETURNING *
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(tenant.as_uuid())
        .bind(phone)
        .bind(person_id.map(|id| *id.record().as_uuid()))
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        conversation_from_row(&row)
    }

    async fn conversation(
        &self,
        tenant: TenantId,
        id: ConversationId,
    ) -> StoreResult<Conversation> {
        let row = sqlx::query("SELECT * FROM conversations WHERE tenant_id = $1 AND id = $2")
            .bind(tenant.as_uuid())
            .bind(id.record().as_uuid())
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound)?;
        conversation_from_row(&row)
    }

    async fn conversations(&self, tenant: TenantId) -> StoreResult<Vec<Conversation>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM conversations
            WHERE tenant_id = $1
            ORDER BY last_message_at DESC NULLS LAST
            "#,
        )
        .bind(tenant.as_uuid())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(conversation_from_row).collect()
    }

    async fn mark_conversation_read(
        &self,
        tenant: TenantId,
        id: ConversationId,
    ) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE conversations SET unread_count = 0 WHERE tenant_id = $1 AND id = $2",
        )
        .bind(tenant.as_uuid())
        .bind(id.record().as_uuid())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn link_conversation_person(
        &self,
        tenant: TenantId,
        id: ConversationId,
        person_id: PersonId,
    ) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE conversations SET person_id = $3 WHERE tenant_id = $1 AND id = $2",
        )
        .bind(tenant.as_uuid())
        .bind(id.record().as_uuid())
        .bind(person_id.record().as_uuid())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn record_message(&self, message: Message) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO messages (
                id, tenant_id, conversation_id, direction, body,
                relay_message_id, status, occurred_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(message.id.record().as_uuid())
        .bind(message.tenant_id.as_uuid())
        .bind(message.conversation_id.record().as_uuid())
        .bind(enum_to_str(&message.direction)?)
        .bind(&message.body)
        .bind(&message.relay_message_id)
        .bind(enum_to_str(&message.status)?)
        .bind(message.occurred_at)
        .execute(&mut *tx)
        .await?;

        let bump = match message.direction {
            MessageDirection::Inbound => "unread_count = unread_count + 1,",
            MessageDirection::Outbound => "",
        };
        let result = sqlx::query(&format!(
            "UPDATE conversations SET {bump} last_message_at = $3 WHERE tenant_id = $1 AND id = $2"
        ))
        .bind(message.tenant_id.as_uuid())
        .bind(message.conversation_id.record().as_uuid())
        .bind(message.occurred_at)
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }

        tx.commit().await?;
        Ok(())
    }

    async fn messages(
        &self,
        tenant: TenantId,
        conversation_id: ConversationId,
    ) -> StoreResult<Vec<Message>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM messages
            WHERE tenant_id = $1 AND conversation_id = $2
            ORDER BY occurred_at ASC
            "#,
        )
        .bind(tenant.as_uuid())
        .bind(conversation_id.record().as_uuid())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(message_from_row).collect()
    }

    async fn update_message_status(
        &self,
        tenant: TenantId,
        relay_message_id: &str,
        status: MessageStatus,
    ) -> StoreResult<()> {
        let row = sqlx::query(
            "SELECT * FROM messages WHERE tenant_id = $1 AND relay_message_id = $2",
        )
        .bind(tenant.as_uuid())
        .bind(relay_message_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound)?;
        let mut message = message_from_row(&row)?;
        message.update_status(status);

        sqlx::query("UPDATE messages SET status = $3 WHERE tenant_id = $1 AND id = $2")
            .bind(tenant.as_uuid())
            .bind(message.id.record().as_uuid())
            .bind(enum_to_str(&message.status)?)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

// ─── OutreachStore ───────────────────────────────────────────────────────────

#[async_trait]
impl OutreachStore for PgStore {
    async fn insert_campaign(&self, campaign: Campaign) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO campaigns (
                id, tenant_id, name, subject, body, status, recipients,
                created_by, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(campaign.id.record().as_uuid())
        .bind(campaign.tenant_id.as_uuid())
        .bind(&campaign.name)
        .bind(&campaign.subject)
        .bind(&campaign.body)
        .bind(enum_to_str(&campaign.status)?)
        .bind(serde_json::to_value(&campaign.recipients)?)
        .bind(campaign.created_by.as_uuid())
        .bind(campaign.created_at)
        .bind(campaign.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn campaign(&self, tenant: TenantId, id: CampaignId) -> StoreResult<Campaign> {
        let row = sqlx::query("SELECT * FROM campaigns WHERE tenant_id = $1 AND id = $2")
            .bind(tenant.as_uuid())
            .bind(id.record().as_uuid())
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound)?;
        campaign_from_row(&row)
    }

    async fn campaigns(&self, tenant: TenantId) -> StoreResult<Vec<Campaign>> {
        let rows =
            sqlx::query("SELECT * FROM campaigns WHERE tenant_id = $1 ORDER BY created_at DESC")
                .bind(tenant.as_uuid())
                .fetch_all(&self.pool)
                .await?;
        rows.iter().map(campaign_from_row).collect()
    }

    async fn update_campaign(&self, campaign: Campaign) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE campaigns SET
                name = $3, subject = $4, body = $5, status = $6,
                recipients = $7, updated_at = $8
            WHERE tenant_id = $1 AND id = $2
            "#,
        )
        .bind(campaign.tenant_id.as_uuid())
        .bind(campaign.id.record().as_uuid())
        .bind(&campaign.name)
        .bind(&campaign.subject)
        .bind(&campaign.body)
        .bind(enum_to_str(&campaign.status)?)
        .bind(serde_json::to_value(&campaign.recipients)?)
        .bind(campaign.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn record_sent_email(&self, email: SentEmail) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO sent_emails (
                id, tenant_id, organization_id, person_id, campaign_id,
                to_email, subject, sent_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(email.id.as_uuid())
        .bind(email.tenant_id.as_uuid())
        .bind(email.organization_id.map(|id| *id.record().as_uuid()))
        .bind(email.person_id.map(|id| *id.record().as_uuid()))
        .bind(email.campaign_id.map(|id| *id.record().as_uuid()))
        .bind(&email.to_email)
        .bind(&email.subject)
        .bind(email.sent_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn sent_emails_for(
        &self,
        tenant: TenantId,
        kind: EntityKind,
        parent: RecordId,
    ) -> StoreResult<Vec<SentEmail>> {
        if !kind.supports_merge() {
            return Ok(Vec::new());
        }
        let fk = kind.parent_column();
        let rows = sqlx::query(&format!(
            "SELECT * FROM sent_emails WHERE tenant_id = $1 AND {fk} = $2 ORDER BY sent_at DESC"
        ))
        .bind(tenant.as_uuid())
        .bind(parent.as_uuid())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(sent_email_from_row).collect()
    }
}

fn campaign_from_row(row: &PgRow) -> StoreResult<Campaign> {
    let recipients: Vec<Recipient> = serde_json::from_value(row.try_get("recipients")?)?;
    Ok(Campaign {
        id: CampaignId::new(RecordId::from_uuid(row.try_get("id")?)),
        tenant_id: TenantId::from_uuid(row.try_get("tenant_id")?),
        name: row.try_get("name")?,
        subject: row.try_get("subject")?,
        body: row.try_get("body")?,
        status: enum_from_str::<CampaignStatus>(&row.try_get::<String, _>("status")?)?,
        recipients,
        created_by: UserId::from_uuid(row.try_get("created_by")?),
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn sent_email_from_row(row: &PgRow) -> StoreResult<SentEmail> {
    Ok(SentEmail {
        id: RecordId::from_uuid(row.try_get("id")?),
        tenant_id: TenantId::from_uuid(row.try_get("tenant_id")?),
        organization_id: row
            .try_get::<Option<Uuid>, _>("organization_id")?
            .map(|id| OrganizationId::new(RecordId::from_uuid(id))),
        person_id: row
            .try_get::<Option<Uuid>, _>("person_id")?
            .map(|id| PersonId::new(RecordId::from_uuid(id))),
        campaign_id: row
            .try_get::<Option<Uuid>, _>("campaign_id")?
            .map(|id| CampaignId::new(RecordId::from_uuid(id))),
        to_email: row.try_get("to_email")?,
        subject: row.try_get("subject")?,
        sent_at: row.try_get("sent_at")?,
    })
}
