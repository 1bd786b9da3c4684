//! In-memory backend.
//!
//! Default for dev and tests. One mutex over the whole state keeps every
//! multi-table operation (merge, undo, message recording) atomic the same
//! way the Postgres backend uses one transaction.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use funil_contacts::{
    merge::{resolve_organization, resolve_person},
    MergeBackup, MergeChildRefs, Organization, OrganizationFieldChoices, OrganizationId, Person,
    PersonFieldChoices, PersonId,
};
use funil_core::{DomainError, EntityKind, RecordId, TenantId, UserId};
use funil_deals::{Deal, DealId, DealStatus, Pipeline, PipelineId};
use funil_inbox::{Conversation, ConversationId, Message, MessageDirection, MessageStatus};
use funil_outreach::{Campaign, CampaignId, SentEmail};
use funil_timeline::{
    Activity, ActivityId, FileAttachment, FileId, HistoryEntry, HistoryKind, Note, NoteId, Tag,
    TagId,
};

use crate::error::{StoreError, StoreResult};
use crate::filter::{Page, Pagination};
use crate::store::{
    ContactsStore, DealFilter, DealStore, DirectoryStore, HistoryView, InboxStore, MergeOutcome,
    NoteView, OrganizationFilter, OutreachStore, PersonFilter, Profile, TagStore, TimelineStore,
};

#[derive(Default)]
struct MemState {
    organizations: HashMap<RecordId, Organization>,
    people: HashMap<RecordId, Person>,
    pipelines: HashMap<RecordId, Pipeline>,
    deals: HashMap<RecordId, Deal>,
    activities: HashMap<RecordId, Activity>,
    notes: HashMap<RecordId, Note>,
    files: HashMap<RecordId, FileAttachment>,
    history: Vec<HistoryEntry>,
    profiles: HashMap<(TenantId, UserId), Profile>,
    tags: HashMap<RecordId, Tag>,
    tag_links: HashSet<(TenantId, TagId, EntityKind, RecordId)>,
    conversations: HashMap<RecordId, Conversation>,
    messages: HashMap<RecordId, Message>,
    campaigns: HashMap<RecordId, Campaign>,
    sent_emails: HashMap<RecordId, SentEmail>,
    backups: HashMap<RecordId, MergeBackup>,
}

/// In-memory store; cheap to clone via `Arc` at the wiring layer.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn lock_poisoned() -> StoreError {
    StoreError::Backend("store lock poisoned".to_string())
}

impl MemState {
    fn children_of(&self, tenant: TenantId, kind: EntityKind, id: RecordId) -> MergeChildRefs {
        let mut refs = MergeChildRefs {
            activities: self
                .activities
                .values()
                .filter(|a| a.tenant_id == tenant && a.parent_kind == kind && a.parent_id == id)
                .map(|a| a.id.record())
                .collect(),
            notes: self
                .notes
                .values()
                .filter(|n| n.tenant_id == tenant && n.parent_kind == kind && n.parent_id == id)
                .map(|n| n.id.record())
                .collect(),
            files: self
                .files
                .values()
                .filter(|f| f.tenant_id == tenant && f.parent_kind == kind && f.parent_id == id)
                .map(|f| f.id.record())
                .collect(),
            tags: self
                .tag_links
                .iter()
                .filter(|(t, _, k, p)| *t == tenant && *k == kind && *p == id)
                .map(|(_, tag_id, _, _)| tag_id.record())
                .collect(),
            ..Default::default()
        };

        match kind {
            EntityKind::Organization => {
                let org_id = Some(OrganizationId::new(id));
                refs.deals = self
                    .deals
                    .values()
                    .filter(|d| d.tenant_id == tenant && d.organization_id == org_id)
                    .map(|d| d.id.record())
                    .collect();
                refs.people = self
                    .people
                    .values()
                    .filter(|p| p.tenant_id == tenant && p.organization_id == org_id)
                    .map(|p| p.id.record())
                    .collect();
                refs.sent_emails = self
                    .sent_emails
                    .values()
                    .filter(|e| e.tenant_id == tenant && e.organization_id == org_id)
                    .map(|e| e.id)
                    .collect();
            }
            EntityKind::Person => {
                let person_id = Some(PersonId::new(id));
                refs.deals = self
                    .deals
                    .values()
                    .filter(|d| d.tenant_id == tenant && d.person_id == person_id)
                    .map(|d| d.id.record())
                    .collect();
                refs.sent_emails = self
                    .sent_emails
                    .values()
                    .filter(|e| e.tenant_id == tenant && e.person_id == person_id)
                    .map(|e| e.id)
                    .collect();
            }
            EntityKind::Deal => {}
        }

        refs
    }

    fn has_children(&self, tenant: TenantId, kind: EntityKind, id: RecordId) -> bool {
        let refs = self.children_of(tenant, kind, id);
        refs.activities.len()
            + refs.deals.len()
            + refs.notes.len()
            + refs.files.len()
            + refs.people.len()
            + refs.sent_emails.len()
            > 0
    }

    fn drop_tag_links_of(&mut self, tenant: TenantId, kind: EntityKind, id: RecordId) {
        self.tag_links
            .retain(|(t, _, k, p)| !(*t == tenant && *k == kind && *p == id));
    }

    /// Move every recorded child FK from `from` to `to`.
    fn repoint_children(
        &mut self,
        tenant: TenantId,
        kind: EntityKind,
        refs: &MergeChildRefs,
        from: RecordId,
        to: RecordId,
    ) {
        for id in &refs.activities {
            if let Some(a) = self.activities.get_mut(id) {
                if a.tenant_id == tenant && a.parent_id == from {
                    a.parent_id = to;
                }
            }
        }
        for id in &refs.notes {
            if let Some(n) = self.notes.get_mut(id) {
                if n.tenant_id == tenant && n.parent_id == from {
                    n.parent_id = to;
                }
            }
        }
        for id in &refs.files {
            if let Some(f) = self.files.get_mut(id) {
                if f.tenant_id == tenant && f.parent_id == from {
                    f.parent_id = to;
                }
            }
        }
        match kind {
            EntityKind::Organization => {
                for id in &refs.deals {
                    if let Some(d) = self.deals.get_mut(id) {
                        if d.tenant_id == tenant {
                            d.organization_id = Some(OrganizationId::new(to));
                        }
                    }
                }
                for id in &refs.people {
                    if let Some(p) = self.people.get_mut(id) {
                        if p.tenant_id == tenant {
                            p.organization_id = Some(OrganizationId::new(to));
                        }
                    }
                }
                for id in &refs.sent_emails {
                    if let Some(e) = self.sent_emails.get_mut(id) {
                        if e.tenant_id == tenant {
                            e.organization_id = Some(OrganizationId::new(to));
                        }
                    }
                }
            }
            EntityKind::Person => {
                for id in &refs.deals {
                    if let Some(d) = self.deals.get_mut(id) {
                        if d.tenant_id == tenant {
                            d.person_id = Some(PersonId::new(to));
                        }
                    }
                }
                for id in &refs.sent_emails {
                    if let Some(e) = self.sent_emails.get_mut(id) {
                        if e.tenant_id == tenant {
                            e.person_id = Some(PersonId::new(to));
                        }
                    }
                }
            }
            EntityKind::Deal => {}
        }
    }

    /// Union the removed record's tag links onto the kept record.
    fn union_tags(
        &mut self,
        tenant: TenantId,
        kind: EntityKind,
        refs: &MergeChildRefs,
        removed: RecordId,
        kept: RecordId,
    ) {
        for tag in &refs.tags {
            let tag_id = TagId::new(*tag);
            self.tag_links.remove(&(tenant, tag_id, kind, removed));
            // HashSet insert drops duplicate (record, tag) pairs.
            self.tag_links.insert((tenant, tag_id, kind, kept));
        }
    }

    fn append_merge_history(
        &mut self,
        tenant: TenantId,
        kind: EntityKind,
        kept: RecordId,
        removed_name: &str,
        backup_id: RecordId,
        actor: UserId,
        now: DateTime<Utc>,
    ) {
        let history_kind = HistoryKind::merge_kind_for(kind)
            .unwrap_or(HistoryKind::Updated);
        self.history.push(HistoryEntry::new(
            tenant,
            kind,
            kept,
            history_kind,
            format!("Mesclado com \"{removed_name}\""),
            serde_json::json!({ "backup_id": backup_id, "removed_name": removed_name }),
            actor,
            now,
        ));
    }
}

#[async_trait]
impl ContactsStore for MemoryStore {
    async fn insert_organization(&self, org: Organization) -> StoreResult<()> {
        let mut state = self.state.lock().map_err(|_| lock_poisoned())?;
        let id = org.id.record();
        if state.organizations.contains_key(&id) {
            return Err(StoreError::Duplicate("organization id".to_string()));
        }
        if let Some(cnpj) = &org.cnpj {
            let clash = state
                .organizations
                .values()
                .any(|o| o.tenant_id == org.tenant_id && o.cnpj.as_deref() == Some(cnpj));
            if clash {
                return Err(StoreError::Duplicate(
                    "unique organizations_tenant_cnpj".to_string(),
                ));
            }
        }
        state.organizations.insert(id, org);
        Ok(())
    }

    async fn organization(
        &self,
        tenant: TenantId,
        id: OrganizationId,
    ) -> StoreResult<Organization> {
        let state = self.state.lock().map_err(|_| lock_poisoned())?;
        state
            .organizations
            .get(&id.record())
            .filter(|o| o.tenant_id == tenant)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn organizations(
        &self,
        tenant: TenantId,
        filter: &OrganizationFilter,
        page: Pagination,
    ) -> StoreResult<Page<Organization>> {
        let state = self.state.lock().map_err(|_| lock_poisoned())?;

        // Tag filter resolves to a membership set first; selected tags with
        // no members prove the result empty without scanning.
        let tag_members: Option<HashSet<RecordId>> = if filter.tag_ids.is_empty() {
            None
        } else {
            let members: HashSet<RecordId> = state
                .tag_links
                .iter()
                .filter(|(t, tag, kind, _)| {
                    *t == tenant
                        && *kind == EntityKind::Organization
                        && filter.tag_ids.contains(tag)
                })
                .map(|(_, _, _, parent)| *parent)
                .collect();
            if members.is_empty() {
                return Ok(Page::empty(page));
            }
            Some(members)
        };

        let mut matches: Vec<Organization> = state
            .organizations
            .values()
            .filter(|o| o.tenant_id == tenant)
            .filter(|o| match &filter.search {
                Some(term) if !term.trim().is_empty() => {
                    let term = term.trim().to_lowercase();
                    o.name.to_lowercase().contains(&term)
                        || o.legal_name
                            .as_deref()
                            .is_some_and(|v| v.to_lowercase().contains(&term))
                        || o.cnpj.as_deref().is_some_and(|v| v.contains(&term))
                        || o.email
                            .as_deref()
                            .is_some_and(|v| v.to_lowercase().contains(&term))
                }
                _ => true,
            })
            .filter(|o| filter.owner_ids.is_empty() || filter.owner_ids.contains(&o.owner_id))
            .filter(|o| match filter.has_cnpj {
                Some(true) => o.cnpj.is_some(),
                Some(false) => o.cnpj.is_none(),
                None => true,
            })
            .filter(|o| filter.created_from.is_none_or(|from| o.created_at >= from))
            .filter(|o| filter.created_to.is_none_or(|to| o.created_at <= to))
            .filter(|o| {
                tag_members
                    .as_ref()
                    .is_none_or(|members| members.contains(&o.id.record()))
            })
            .cloned()
            .collect();

        matches.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        let total = matches.len() as u64;
        Ok(Page {
            items: page.slice(&matches),
            total,
            page: page.page,
            per_page: page.per_page,
        })
    }

    async fn update_organization(&self, org: Organization) -> StoreResult<()> {
        let mut state = self.state.lock().map_err(|_| lock_poisoned())?;
        let id = org.id.record();
        if let Some(cnpj) = &org.cnpj {
            let clash = state.organizations.values().any(|o| {
                o.tenant_id == org.tenant_id
                    && o.id != org.id
                    && o.cnpj.as_deref() == Some(cnpj)
            });
            if clash {
                return Err(StoreError::Duplicate(
                    "unique organizations_tenant_cnpj".to_string(),
                ));
            }
        }
        match state.organizations.get_mut(&id) {
            Some(existing) if existing.tenant_id == org.tenant_id => {
                *existing = org;
                Ok(())
            }
            _ => Err(StoreError::NotFound),
        }
    }

    async fn delete_organization(&self, tenant: TenantId, id: OrganizationId) -> StoreResult<()> {
        let mut state = self.state.lock().map_err(|_| lock_poisoned())?;
        let record = id.record();
        let exists = state
            .organizations
            .get(&record)
            .is_some_and(|o| o.tenant_id == tenant);
        if !exists {
            return Err(StoreError::NotFound);
        }
        if state.has_children(tenant, EntityKind::Organization, record) {
            return Err(StoreError::ForeignKey(
                "organization still has linked records".to_string(),
            ));
        }
        state.drop_tag_links_of(tenant, EntityKind::Organization, record);
        state.organizations.remove(&record);
        Ok(())
    }

    async fn organization_by_cnpj(
        &self,
        tenant: TenantId,
        cnpj: &str,
    ) -> StoreResult<Option<Organization>> {
        let state = self.state.lock().map_err(|_| lock_poisoned())?;
        Ok(state
            .organizations
            .values()
            .find(|o| o.tenant_id == tenant && o.cnpj.as_deref() == Some(cnpj))
            .cloned())
    }

    async fn insert_person(&self, person: Person) -> StoreResult<()> {
        let mut state = self.state.lock().map_err(|_| lock_poisoned())?;
        let id = person.id.record();
        if state.people.contains_key(&id) {
            return Err(StoreError::Duplicate("person id".to_string()));
        }
        state.people.insert(id, person);
        Ok(())
    }

    async fn person(&self, tenant: TenantId, id: PersonId) -> StoreResult<Person> {
        let state = self.state.lock().map_err(|_| lock_poisoned())?;
        state
            .people
            .get(&id.record())
            .filter(|p| p.tenant_id == tenant)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn people(
        &self,
        tenant: TenantId,
        filter: &PersonFilter,
        page: Pagination,
    ) -> StoreResult<Page<Person>> {
        let state = self.state.lock().map_err(|_| lock_poisoned())?;

        let tag_members: Option<HashSet<RecordId>> = if filter.tag_ids.is_empty() {
            None
        } else {
            let members: HashSet<RecordId> = state
                .tag_links
                .iter()
                .filter(|(t, tag, kind, _)| {
                    *t == tenant && *kind == EntityKind::Person && filter.tag_ids.contains(tag)
                })
                .map(|(_, _, _, parent)| *parent)
                .collect();
            if members.is_empty() {
                return Ok(Page::empty(page));
            }
            Some(members)
        };

        let mut matches: Vec<Person> = state
            .people
            .values()
            .filter(|p| p.tenant_id == tenant)
            .filter(|p| match &filter.search {
                Some(term) if !term.trim().is_empty() => {
                    let term = term.trim().to_lowercase();
                    p.name.to_lowercase().contains(&term)
                        || p.email
                            .as_deref()
                            .is_some_and(|v| v.to_lowercase().contains(&term))
                        || p.phone.as_deref().is_some_and(|v| v.contains(&term))
                }
                _ => true,
            })
            .filter(|p| filter.owner_ids.is_empty() || filter.owner_ids.contains(&p.owner_id))
            .filter(|p| {
                filter
                    .organization_id
                    .is_none_or(|org| p.organization_id == Some(org))
            })
            .filter(|p| filter.created_from.is_none_or(|from| p.created_at >= from))
            .filter(|p| filter.created_to.is_none_or(|to| p.created_at <= to))
            .filter(|p| {
                tag_members
                    .as_ref()
                    .is_none_or(|members| members.contains(&p.id.record()))
            })
            .cloned()
            .collect();

        matches.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        let total = matches.len() as u64;
        Ok(Page {
            items: page.slice(&matches),
            total,
            page: page.page,
            per_page: page.per_page,
        })
    }

    async fn update_person(&self, person: Person) -> StoreResult<()> {
        let mut state = self.state.lock().map_err(|_| lock_poisoned())?;
        match state.people.get_mut(&person.id.record()) {
            Some(existing) if existing.tenant_id == person.tenant_id => {
                *existing = person;
                Ok(())
            }
            _ => Err(StoreError::NotFound),
        }
    }

    async fn delete_person(&self, tenant: TenantId, id: PersonId) -> StoreResult<()> {
        let mut state = self.state.lock().map_err(|_| lock_poisoned())?;
        let record = id.record();
        let exists = state
            .people
            .get(&record)
            .is_some_and(|p| p.tenant_id == tenant);
        if !exists {
            return Err(StoreError::NotFound);
        }
        if state.has_children(tenant, EntityKind::Person, record) {
            return Err(StoreError::ForeignKey(
                "person still has linked records".to_string(),
            ));
        }
        // Conversations keep existing but lose their person link.
        for c in state.conversations.values_mut() {
            if c.tenant_id == tenant && c.person_id == Some(id) {
                c.person_id = None;
            }
        }
        state.drop_tag_links_of(tenant, EntityKind::Person, record);
        state.people.remove(&record);
        Ok(())
    }

    async fn person_by_whatsapp(
        &self,
        tenant: TenantId,
        phone: &str,
    ) -> StoreResult<Option<Person>> {
        let state = self.state.lock().map_err(|_| lock_poisoned())?;
        Ok(state
            .people
            .values()
            .find(|p| p.tenant_id == tenant && p.whatsapp.as_deref() == Some(phone))
            .cloned())
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

        let mut state = self.state.lock().map_err(|_| lock_poisoned())?;

        let kept = state
            .organizations
            .get(&keep.record())
            .filter(|o| o.tenant_id == tenant)
            .cloned()
            .ok_or(StoreError::NotFound)?;
        let removed = state
            .organizations
            .get(&delete.record())
            .filter(|o| o.tenant_id == tenant)
            .cloned()
            .ok_or(StoreError::NotFound)?;

        // Snapshot + child enumeration persist before any mutation.
        let mut children = state.children_of(tenant, EntityKind::Organization, delete.record());
        children.kept_tags = state
            .tag_links
            .iter()
            .filter(|(t, _, k, p)| {
                *t == tenant && *k == EntityKind::Organization && *p == keep.record()
            })
            .map(|(_, tag, _, _)| tag.record())
            .collect();
        let backup = MergeBackup::for_organizations(&kept, &removed, children.clone(), now)?;
        let backup_id = backup.id;
        state.backups.insert(backup_id, backup);

        // Winning field values.
        let resolved = resolve_organization(&kept, &removed, choices, now);
        state
            .organizations
            .insert(keep.record(), resolved.clone());

        // Repoint children; union tags without duplicate pairs.
        state.repoint_children(
            tenant,
            EntityKind::Organization,
            &children,
            delete.record(),
            keep.record(),
        );
        state.union_tags(
            tenant,
            EntityKind::Organization,
            &children,
            delete.record(),
            keep.record(),
        );

        // Audit entry, then drop the now-orphaned record.
        state.append_merge_history(
            tenant,
            EntityKind::Organization,
            keep.record(),
            &removed.name,
            backup_id,
            actor,
            now,
        );
        state.organizations.remove(&delete.record());

        Ok((
            resolved,
            MergeOutcome {
                backup_id,
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

        let mut state = self.state.lock().map_err(|_| lock_poisoned())?;

        let kept = state
            .people
            .get(&keep.record())
            .filter(|p| p.tenant_id == tenant)
            .cloned()
            .ok_or(StoreError::NotFound)?;
        let removed = state
            .people
            .get(&delete.record())
            .filter(|p| p.tenant_id == tenant)
            .cloned()
            .ok_or(StoreError::NotFound)?;

        let mut children = state.children_of(tenant, EntityKind::Person, delete.record());
        children.kept_tags = state
            .tag_links
            .iter()
            .filter(|(t, _, k, p)| *t == tenant && *k == EntityKind::Person && *p == keep.record())
            .map(|(_, tag, _, _)| tag.record())
            .collect();
        let backup = MergeBackup::for_people(&kept, &removed, children.clone(), now)?;
        let backup_id = backup.id;
        state.backups.insert(backup_id, backup);

        let resolved = resolve_person(&kept, &removed, choices, now);
        state.people.insert(keep.record(), resolved.clone());

        state.repoint_children(
            tenant,
            EntityKind::Person,
            &children,
            delete.record(),
            keep.record(),
        );
        state.union_tags(
            tenant,
            EntityKind::Person,
            &children,
            delete.record(),
            keep.record(),
        );

        // Conversations follow the kept person.
        for c in state.conversations.values_mut() {
            if c.tenant_id == tenant && c.person_id == Some(delete) {
                c.person_id = Some(keep);
            }
        }

        state.append_merge_history(
            tenant,
            EntityKind::Person,
            keep.record(),
            &removed.name,
            backup_id,
            actor,
            now,
        );
        state.people.remove(&delete.record());

        Ok((
            resolved,
            MergeOutcome {
                backup_id,
                transferred: children,
            },
        ))
    }

    async fn merge_backup(&self, tenant: TenantId, id: RecordId) -> StoreResult<MergeBackup> {
        let state = self.state.lock().map_err(|_| lock_poisoned())?;
        state
            .backups
            .get(&id)
            .filter(|b| b.tenant_id == tenant)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn merge_backups(&self, tenant: TenantId) -> StoreResult<Vec<MergeBackup>> {
        let state = self.state.lock().map_err(|_| lock_poisoned())?;
        let mut backups: Vec<MergeBackup> = state
            .backups
            .values()
            .filter(|b| b.tenant_id == tenant)
            .cloned()
            .collect();
        backups.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(backups)
    }

    async fn undo_merge(
        &self,
        tenant: TenantId,
        backup_id: RecordId,
        actor: UserId,
        now: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut state = self.state.lock().map_err(|_| lock_poisoned())?;

        let backup = state
            .backups
            .get(&backup_id)
            .filter(|b| b.tenant_id == tenant)
            .cloned()
            .ok_or(StoreError::NotFound)?;
        if backup.is_expired(now) {
            return Err(DomainError::conflict("merge backup has expired").into());
        }

        match backup.kind {
            EntityKind::Organization => {
                let kept = backup.kept_organization()?;
                let removed = backup.removed_organization()?;
                state.organizations.insert(kept.id.record(), kept);
                state
                    .organizations
                    .insert(removed.id.record(), removed);
            }
            EntityKind::Person => {
                let kept = backup.kept_person()?;
                let removed = backup.removed_person()?;
                state.people.insert(kept.id.record(), kept);
                state.people.insert(removed.id.record(), removed);
            }
            EntityKind::Deal => {
                return Err(DomainError::invariant("deals are never merged").into());
            }
        }

        // Reverse exactly the recorded transfers.
        state.repoint_children(
            tenant,
            backup.kind,
            &backup.children,
            backup.kept_id,
            backup.removed_id,
        );
        for tag in &backup.children.tags {
            let tag_id = TagId::new(*tag);
            // Drop the unioned link unless the kept record had it before.
            if !backup.children.kept_tags.contains(tag) {
                state
                    .tag_links
                    .remove(&(tenant, tag_id, backup.kind, backup.kept_id));
            }
            state
                .tag_links
                .insert((tenant, tag_id, backup.kind, backup.removed_id));
        }

        state.history.push(HistoryEntry::new(
            tenant,
            backup.kind,
            backup.kept_id,
            HistoryKind::MergeUndone,
            "Mesclagem desfeita".to_string(),
            serde_json::json!({ "backup_id": backup_id, "restored_id": backup.removed_id }),
            actor,
            now,
        ));
        state.backups.remove(&backup_id);
        Ok(())
    }

    async fn purge_expired_backups(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let mut state = self.state.lock().map_err(|_| lock_poisoned())?;
        let before = state.backups.len();
        state.backups.retain(|_, b| !b.is_expired(now));
        Ok((before - state.backups.len()) as u64)
    }
}

#[async_trait]
impl DealStore for MemoryStore {
    async fn insert_pipeline(&self, pipeline: Pipeline) -> StoreResult<()> {
        let mut state = self.state.lock().map_err(|_| lock_poisoned())?;
        let id = pipeline.id.record();
        if state.pipelines.contains_key(&id) {
            return Err(StoreError::Duplicate("pipeline id".to_string()));
        }
        state.pipelines.insert(id, pipeline);
        Ok(())
    }

    async fn pipeline(&self, tenant: TenantId, id: PipelineId) -> StoreResult<Pipeline> {
        let state = self.state.lock().map_err(|_| lock_poisoned())?;
        state
            .pipelines
            .get(&id.record())
            .filter(|p| p.tenant_id == tenant)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn pipelines(&self, tenant: TenantId) -> StoreResult<Vec<Pipeline>> {
        let state = self.state.lock().map_err(|_| lock_poisoned())?;
        let mut pipelines: Vec<Pipeline> = state
            .pipelines
            .values()
            .filter(|p| p.tenant_id == tenant)
            .cloned()
            .collect();
        pipelines.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(pipelines)
    }

    async fn insert_deal(&self, deal: Deal) -> StoreResult<()> {
        let mut state = self.state.lock().map_err(|_| lock_poisoned())?;
        let id = deal.id.record();
        if state.deals.contains_key(&id) {
            return Err(StoreError::Duplicate("deal id".to_string()));
        }
        state.deals.insert(id, deal);
        Ok(())
    }

    async fn deal(&self, tenant: TenantId, id: DealId) -> StoreResult<Deal> {
        let state = self.state.lock().map_err(|_| lock_poisoned())?;
        state
            .deals
            .get(&id.record())
            .filter(|d| d.tenant_id == tenant)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn deals(
        &self,
        tenant: TenantId,
        filter: &DealFilter,
        page: Pagination,
    ) -> StoreResult<Page<Deal>> {
        let state = self.state.lock().map_err(|_| lock_poisoned())?;
        let mut matches: Vec<Deal> = state
            .deals
            .values()
            .filter(|d| d.tenant_id == tenant)
            .filter(|d| match &filter.search {
                Some(term) if !term.trim().is_empty() => d
                    .title
                    .to_lowercase()
                    .contains(&term.trim().to_lowercase()),
                _ => true,
            })
            .filter(|d| filter.pipeline_id.is_none_or(|p| d.pipeline_id == p))
            .filter(|d| filter.stage_id.is_none_or(|s| d.stage_id == s))
            .filter(|d| match filter.status.as_deref() {
                Some("open") => matches!(d.status, DealStatus::Open),
                Some("won") => matches!(d.status, DealStatus::Won { .. }),
                Some("lost") => matches!(d.status, DealStatus::Lost { .. }),
                _ => true,
            })
            .filter(|d| filter.owner_ids.is_empty() || filter.owner_ids.contains(&d.owner_id))
            .filter(|d| {
                filter
                    .organization_id
                    .is_none_or(|org| d.organization_id == Some(org))
            })
            .filter(|d| filter.person_id.is_none_or(|p| d.person_id == Some(p)))
            .cloned()
            .collect();

        matches.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        let total = matches.len() as u64;
        Ok(Page {
            items: page.slice(&matches),
            total,
            page: page.page,
            per_page: page.per_page,
        })
    }

    async fn all_deals(&self, tenant: TenantId) -> StoreResult<Vec<Deal>> {
        let state = self.state.lock().map_err(|_| lock_poisoned())?;
        Ok(state
            .deals
            .values()
            .filter(|d| d.tenant_id == tenant)
            .cloned()
            .collect())
    }

    async fn update_deal(&self, deal: Deal) -> StoreResult<()> {
        let mut state = self.state.lock().map_err(|_| lock_poisoned())?;
        match state.deals.get_mut(&deal.id.record()) {
            Some(existing) if existing.tenant_id == deal.tenant_id => {
                *existing = deal;
                Ok(())
            }
            _ => Err(StoreError::NotFound),
        }
    }

    async fn delete_deal(&self, tenant: TenantId, id: DealId) -> StoreResult<()> {
        let mut state = self.state.lock().map_err(|_| lock_poisoned())?;
        let record = id.record();
        let exists = state
            .deals
            .get(&record)
            .is_some_and(|d| d.tenant_id == tenant);
        if !exists {
            return Err(StoreError::NotFound);
        }
        if state.has_children(tenant, EntityKind::Deal, record) {
            return Err(StoreError::ForeignKey(
                "deal still has linked records".to_string(),
            ));
        }
        state.drop_tag_links_of(tenant, EntityKind::Deal, record);
        state.deals.remove(&record);
        Ok(())
    }
}

#[async_trait]
impl TimelineStore for MemoryStore {
    async fn insert_activity(&self, activity: Activity) -> StoreResult<()> {
        let mut state = self.state.lock().map_err(|_| lock_poisoned())?;
        state.activities.insert(activity.id.record(), activity);
        Ok(())
    }

    async fn activity(&self, tenant: TenantId, id: ActivityId) -> StoreResult<Activity> {
        let state = self.state.lock().map_err(|_| lock_poisoned())?;
        state
            .activities
            .get(&id.record())
            .filter(|a| a.tenant_id == tenant)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn update_activity(&self, activity: Activity) -> StoreResult<()> {
        let mut state = self.state.lock().map_err(|_| lock_poisoned())?;
        match state.activities.get_mut(&activity.id.record()) {
            Some(existing) if existing.tenant_id == activity.tenant_id => {
                *existing = activity;
                Ok(())
            }
            _ => Err(StoreError::NotFound),
        }
    }

    async fn delete_activity(&self, tenant: TenantId, id: ActivityId) -> StoreResult<()> {
        let mut state = self.state.lock().map_err(|_| lock_poisoned())?;
        let removed = state
            .activities
            .get(&id.record())
            .is_some_and(|a| a.tenant_id == tenant);
        if !removed {
            return Err(StoreError::NotFound);
        }
        state.activities.remove(&id.record());
        Ok(())
    }

    async fn activities_for(
        &self,
        tenant: TenantId,
        kind: EntityKind,
        parent: RecordId,
    ) -> StoreResult<Vec<Activity>> {
        let state = self.state.lock().map_err(|_| lock_poisoned())?;
        let mut items: Vec<Activity> = state
            .activities
            .values()
            .filter(|a| a.tenant_id == tenant && a.parent_kind == kind && a.parent_id == parent)
            .cloned()
            .collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(items)
    }

    async fn activities_for_owner(
        &self,
        tenant: TenantId,
        owner: UserId,
    ) -> StoreResult<Vec<Activity>> {
        let state = self.state.lock().map_err(|_| lock_poisoned())?;
        let mut items: Vec<Activity> = state
            .activities
            .values()
            .filter(|a| a.tenant_id == tenant && a.owner_id == owner)
            .cloned()
            .collect();
        items.sort_by(|a, b| a.due_at.cmp(&b.due_at));
        Ok(items)
    }

    async fn all_activities(&self, tenant: TenantId) -> StoreResult<Vec<Activity>> {
        let state = self.state.lock().map_err(|_| lock_poisoned())?;
        Ok(state
            .activities
            .values()
            .filter(|a| a.tenant_id == tenant)
            .cloned()
            .collect())
    }

    async fn insert_note(&self, note: Note) -> StoreResult<()> {
        let mut state = self.state.lock().map_err(|_| lock_poisoned())?;
        state.notes.insert(note.id.record(), note);
        Ok(())
    }

    async fn note(&self, tenant: TenantId, id: NoteId) -> StoreResult<Note> {
        let state = self.state.lock().map_err(|_| lock_poisoned())?;
        state
            .notes
            .get(&id.record())
            .filter(|n| n.tenant_id == tenant)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn update_note(&self, note: Note) -> StoreResult<()> {
        let mut state = self.state.lock().map_err(|_| lock_poisoned())?;
        match state.notes.get_mut(&note.id.record()) {
            Some(existing) if existing.tenant_id == note.tenant_id => {
                *existing = note;
                Ok(())
            }
            _ => Err(StoreError::NotFound),
        }
    }

    async fn delete_note(&self, tenant: TenantId, id: NoteId) -> StoreResult<()> {
        let mut state = self.state.lock().map_err(|_| lock_poisoned())?;
        let exists = state
            .notes
            .get(&id.record())
            .is_some_and(|n| n.tenant_id == tenant);
        if !exists {
            return Err(StoreError::NotFound);
        }
        state.notes.remove(&id.record());
        Ok(())
    }

    async fn notes_for(
        &self,
        tenant: TenantId,
        kind: EntityKind,
        parent: RecordId,
    ) -> StoreResult<Vec<NoteView>> {
        let state = self.state.lock().map_err(|_| lock_poisoned())?;
        let mut notes: Vec<Note> = state
            .notes
            .values()
            .filter(|n| n.tenant_id == tenant && n.parent_kind == kind && n.parent_id == parent)
            .cloned()
            .collect();
        notes.sort_by(|a, b| {
            b.pinned
                .cmp(&a.pinned)
                .then(b.created_at.cmp(&a.created_at))
        });
        Ok(notes
            .into_iter()
            .map(|note| {
                let author_name = state
                    .profiles
                    .get(&(tenant, note.created_by))
                    .map(|p| p.display_name.clone());
                NoteView { note, author_name }
            })
            .collect())
    }

    async fn insert_file(&self, file: FileAttachment) -> StoreResult<()> {
        let mut state = self.state.lock().map_err(|_| lock_poisoned())?;
        state.files.insert(file.id.record(), file);
        Ok(())
    }

    async fn file(&self, tenant: TenantId, id: FileId) -> StoreResult<FileAttachment> {
        let state = self.state.lock().map_err(|_| lock_poisoned())?;
        state
            .files
            .get(&id.record())
            .filter(|f| f.tenant_id == tenant)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn delete_file(&self, tenant: TenantId, id: FileId) -> StoreResult<()> {
        let mut state = self.state.lock().map_err(|_| lock_poisoned())?;
        let exists = state
            .files
            .get(&id.record())
            .is_some_and(|f| f.tenant_id == tenant);
        if !exists {
            return Err(StoreError::NotFound);
        }
        state.files.remove(&id.record());
        Ok(())
    }

    async fn files_for(
        &self,
        tenant: TenantId,
        kind: EntityKind,
        parent: RecordId,
    ) -> StoreResult<Vec<FileAttachment>> {
        let state = self.state.lock().map_err(|_| lock_poisoned())?;
        let mut items: Vec<FileAttachment> = state
            .files
            .values()
            .filter(|f| f.tenant_id == tenant && f.parent_kind == kind && f.parent_id == parent)
            .cloned()
            .collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(items)
    }

    async fn append_history(&self, entry: HistoryEntry) -> StoreResult<()> {
        let mut state = self.state.lock().map_err(|_| lock_poisoned())?;
        state.history.push(entry);
        Ok(())
    }

    async fn history_for(
        &self,
        tenant: TenantId,
        kind: EntityKind,
        parent: RecordId,
    ) -> StoreResult<Vec<HistoryView>> {
        let state = self.state.lock().map_err(|_| lock_poisoned())?;
        let mut entries: Vec<HistoryEntry> = state
            .history
            .iter()
            .filter(|e| e.tenant_id == tenant && e.parent_kind == kind && e.parent_id == parent)
            .cloned()
            .collect();
        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(entries
            .into_iter()
            .map(|entry| {
                let actor_name = state
                    .profiles
                    .get(&(tenant, entry.actor_id))
                    .map(|p| p.display_name.clone());
                HistoryView { entry, actor_name }
            })
            .collect())
    }
}

#[async_trait]
impl DirectoryStore for MemoryStore {
    async fn upsert_profile(&self, tenant: TenantId, profile: Profile) -> StoreResult<()> {
        let mut state = self.state.lock().map_err(|_| lock_poisoned())?;
        state.profiles.insert((tenant, profile.user_id), profile);
        Ok(())
    }

    async fn profile(&self, tenant: TenantId, user_id: UserId) -> StoreResult<Option<Profile>> {
        let state = self.state.lock().map_err(|_| lock_poisoned())?;
        Ok(state.profiles.get(&(tenant, user_id)).cloned())
    }

    async fn profiles(&self, tenant: TenantId) -> StoreResult<Vec<Profile>> {
        let state = self.state.lock().map_err(|_| lock_poisoned())?;
        let mut profiles: Vec<Profile> = state
            .profiles
            .iter()
            .filter(|((t, _), _)| *t == tenant)
            .map(|(_, p)| p.clone())
            .collect();
        profiles.sort_by(|a, b| a.display_name.cmp(&b.display_name));
        Ok(profiles)
    }
}

#[async_trait]
impl TagStore for MemoryStore {
    async fn insert_tag(&self, tag: Tag) -> StoreResult<()> {
        let mut state = self.state.lock().map_err(|_| lock_poisoned())?;
        let clash = state
            .tags
            .values()
            .any(|t| t.tenant_id == tag.tenant_id && t.name.eq_ignore_ascii_case(&tag.name));
        if clash {
            return Err(StoreError::Duplicate("unique tags_tenant_name".to_string()));
        }
        state.tags.insert(tag.id.record(), tag);
        Ok(())
    }

    async fn tags(&self, tenant: TenantId) -> StoreResult<Vec<Tag>> {
        let state = self.state.lock().map_err(|_| lock_poisoned())?;
        let mut tags: Vec<Tag> = state
            .tags
            .values()
            .filter(|t| t.tenant_id == tenant)
            .cloned()
            .collect();
        tags.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(tags)
    }

    async fn delete_tag(&self, tenant: TenantId, id: TagId) -> StoreResult<()> {
        let mut state = self.state.lock().map_err(|_| lock_poisoned())?;
        let exists = state
            .tags
            .get(&id.record())
            .is_some_and(|t| t.tenant_id == tenant);
        if !exists {
            return Err(StoreError::NotFound);
        }
        state.tags.remove(&id.record());
        state
            .tag_links
            .retain(|(t, tag, _, _)| !(*t == tenant && *tag == id));
        Ok(())
    }

    async fn assign_tag(
        &self,
        tenant: TenantId,
        tag_id: TagId,
        kind: EntityKind,
        parent: RecordId,
    ) -> StoreResult<()> {
        let mut state = self.state.lock().map_err(|_| lock_poisoned())?;
        let tag_exists = state
            .tags
            .get(&tag_id.record())
            .is_some_and(|t| t.tenant_id == tenant);
        if !tag_exists {
            return Err(StoreError::NotFound);
        }
        state.tag_links.insert((tenant, tag_id, kind, parent));
        Ok(())
    }

    async fn unassign_tag(
        &self,
        tenant: TenantId,
        tag_id: TagId,
        kind: EntityKind,
        parent: RecordId,
    ) -> StoreResult<()> {
        let mut state = self.state.lock().map_err(|_| lock_poisoned())?;
        state.tag_links.remove(&(tenant, tag_id, kind, parent));
        Ok(())
    }

    async fn tags_of(
        &self,
        tenant: TenantId,
        kind: EntityKind,
        parent: RecordId,
    ) -> StoreResult<Vec<Tag>> {
        let state = self.state.lock().map_err(|_| lock_poisoned())?;
        let mut tags: Vec<Tag> = state
            .tag_links
            .iter()
            .filter(|(t, _, k, p)| *t == tenant && *k == kind && *p == parent)
            .filter_map(|(_, tag, _, _)| state.tags.get(&tag.record()).cloned())
            .collect();
        tags.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(tags)
    }

    async fn records_with_any_tag(
        &self,
        tenant: TenantId,
        kind: EntityKind,
        tag_ids: &[TagId],
    ) -> StoreResult<Vec<RecordId>> {
        let state = self.state.lock().map_err(|_| lock_poisoned())?;
        let mut ids: Vec<RecordId> = state
            .tag_links
            .iter()
            .filter(|(t, tag, k, _)| *t == tenant && *k == kind && tag_ids.contains(tag))
            .map(|(_, _, _, parent)| *parent)
            .collect();
        ids.sort_unstable();
        ids.dedup();
        Ok(ids)
    }
}

#[async_trait]
impl InboxStore for MemoryStore {
    async fn conversation_for_phone(
        &self,
        tenant: TenantId,
        phone: &str,
        person_id: Option<PersonId>,
        now: DateTime<Utc>,
    ) -> StoreResult<Conversation> {
        let mut state = self.state.lock().map_err(|_| lock_poisoned())?;
        if let Some(existing) = state
            .conversations
            .values()
            .find(|c| c.tenant_id == tenant && c.phone == phone)
        {
            return Ok(existing.clone());
        }

        let conversation = Conversation::new(
            ConversationId::new(RecordId::new()),
            tenant,
            phone,
            person_id,
            now,
        );
        state
            .conversations
            .insert(conversation.id.record(), conversation.clone());
        Ok(conversation)
    }

    async fn conversation(
        &self,
        tenant: TenantId,
        id: ConversationId,
    ) -> StoreResult<Conversation> {
        let state = self.state.lock().map_err(|_| lock_poisoned())?;
        state
            .conversations
            .get(&id.record())
            .filter(|c| c.tenant_id == tenant)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn conversations(&self, tenant: TenantId) -> StoreResult<Vec<Conversation>> {
        let state = self.state.lock().map_err(|_| lock_poisoned())?;
        let mut items: Vec<Conversation> = state
            .conversations
            .values()
            .filter(|c| c.tenant_id == tenant)
            .cloned()
            .collect();
        items.sort_by(|a, b| b.last_message_at.cmp(&a.last_message_at));
        Ok(items)
    }

    async fn mark_conversation_read(
        &self,
        tenant: TenantId,
        id: ConversationId,
    ) -> StoreResult<()> {
        let mut state = self.state.lock().map_err(|_| lock_poisoned())?;
        match state.conversations.get_mut(&id.record()) {
            Some(c) if c.tenant_id == tenant => {
                c.mark_read();
                Ok(())
            }
            _ => Err(StoreError::NotFound),
        }
    }

    async fn link_conversation_person(
        &self,
        tenant: TenantId,
        id: ConversationId,
        person_id: PersonId,
    ) -> StoreResult<()> {
        let mut state = self.state.lock().map_err(|_| lock_poisoned())?;
        let person_exists = state
            .people
            .get(&person_id.record())
            .is_some_and(|p| p.tenant_id == tenant);
        if !person_exists {
            return Err(StoreError::NotFound);
        }
        match state.conversations.get_mut(&id.record()) {
            Some(c) if c.tenant_id == tenant => {
                c.person_id = Some(person_id);
                Ok(())
            }
            _ => Err(StoreError::NotFound),
        }
    }

    async fn record_message(&self, message: Message) -> StoreResult<()> {
        let mut state = self.state.lock().map_err(|_| lock_poisoned())?;
        let conversation = state
            .conversations
            .get_mut(&message.conversation_id.record())
            .filter(|c| c.tenant_id == message.tenant_id)
            .ok_or(StoreError::NotFound)?;

        match message.direction {
            MessageDirection::Inbound => conversation.note_inbound(message.occurred_at),
            MessageDirection::Outbound => conversation.note_outbound(message.occurred_at),
        }
        state.messages.insert(message.id.record(), message);
        Ok(())
    }

    async fn messages(
        &self,
        tenant: TenantId,
        conversation_id: ConversationId,
    ) -> StoreResult<Vec<Message>> {
        let state = self.state.lock().map_err(|_| lock_poisoned())?;
        let mut items: Vec<Message> = state
            .messages
            .values()
            .filter(|m| m.tenant_id == tenant && m.conversation_id == conversation_id)
            .cloned()
            .collect();
        items.sort_by(|a, b| a.occurred_at.cmp(&b.occurred_at));
        Ok(items)
    }

    async fn update_message_status(
        &self,
        tenant: TenantId,
        relay_message_id: &str,
        status: MessageStatus,
    ) -> StoreResult<()> {
        let mut state = self.state.lock().map_err(|_| lock_poisoned())?;
        let message = state
            .messages
            .values_mut()
            .find(|m| {
                m.tenant_id == tenant && m.relay_message_id.as_deref() == Some(relay_message_id)
            })
            .ok_or(StoreError::NotFound)?;
        message.update_status(status);
        Ok(())
    }
}

#[async_trait]
impl OutreachStore for MemoryStore {
    async fn insert_campaign(&self, campaign: Campaign) -> StoreResult<()> {
        let mut state = self.state.lock().map_err(|_| lock_poisoned())?;
        let id = campaign.id.record();
        if state.campaigns.contains_key(&id) {
            return Err(StoreError::Duplicate("campaign id".to_string()));
        }
        state.campaigns.insert(id, campaign);
        Ok(())
    }

    async fn campaign(&self, tenant: TenantId, id: CampaignId) -> StoreResult<Campaign> {
        let state = self.state.lock().map_err(|_| lock_poisoned())?;
        state
            .campaigns
            .get(&id.record())
            .filter(|c| c.tenant_id == tenant)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn campaigns(&self, tenant: TenantId) -> StoreResult<Vec<Campaign>> {
        let state = self.state.lock().map_err(|_| lock_poisoned())?;
        let mut items: Vec<Campaign> = state
            .campaigns
            .values()
            .filter(|c| c.tenant_id == tenant)
            .cloned()
            .collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(items)
    }

    async fn update_campaign(&self, campaign: Campaign) -> StoreResult<()> {
        let mut state = self.state.lock().map_err(|_| lock_poisoned())?;
        match state.campaigns.get_mut(&campaign.id.record()) {
            Some(existing) if existing.tenant_id == campaign.tenant_id => {
                *existing = campaign;
                Ok(())
            }
            _ => Err(StoreError::NotFound),
        }
    }

    async fn record_sent_email(&self, email: SentEmail) -> StoreResult<()> {
        let mut state = self.state.lock().map_err(|_| lock_poisoned())?;
        state.sent_emails.insert(email.id, email);
        Ok(())
    }

    async fn sent_emails_for(
        &self,
        tenant: TenantId,
        kind: EntityKind,
        parent: RecordId,
    ) -> StoreResult<Vec<SentEmail>> {
        let state = self.state.lock().map_err(|_| lock_poisoned())?;
        let mut items: Vec<SentEmail> = state
            .sent_emails
            .values()
            .filter(|e| e.tenant_id == tenant)
            .filter(|e| match kind {
                EntityKind::Organization => {
                    e.organization_id == Some(OrganizationId::new(parent))
                }
                EntityKind::Person => e.person_id == Some(PersonId::new(parent)),
                EntityKind::Deal => false,
            })
            .cloned()
            .collect();
        items.sort_by(|a, b| b.sent_at.cmp(&a.sent_at));
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use funil_deals::StageId;
    use funil_timeline::ActivityKind;

    fn org(tenant: TenantId, name: &str, now: DateTime<Utc>) -> Organization {
        Organization::new(
            OrganizationId::new(RecordId::new()),
            tenant,
            name,
            UserId::new(),
            now,
        )
        .unwrap()
    }

    fn deal_for(tenant: TenantId, org: &Organization, now: DateTime<Utc>) -> Deal {
        let mut deal = Deal::new(
            DealId::new(RecordId::new()),
            tenant,
            "Contrato",
            50_000_00,
            PipelineId::new(RecordId::new()),
            StageId::new(RecordId::new()),
            UserId::new(),
            now,
        )
        .unwrap();
        deal.organization_id = Some(org.id);
        deal
    }

    #[tokio::test]
    async fn merge_transfers_deals_and_writes_backup_and_history() {
        let store = MemoryStore::new();
        let tenant = TenantId::new();
        let now = Utc::now();
        let actor = UserId::new();

        let a = org(tenant, "Acme Ltda", now);
        let mut b = org(tenant, "ACME Comercio", now);
        b.email = Some("contato@acme.com".to_string());
        let deal = deal_for(tenant, &b, now);

        store.insert_organization(a.clone()).await.unwrap();
        store.insert_organization(b.clone()).await.unwrap();
        store.insert_deal(deal.clone()).await.unwrap();

        let (kept, outcome) = store
            .merge_organizations(tenant, a.id, b.id, &Default::default(), actor, now)
            .await
            .unwrap();

        // The deal now parents to A.
        let moved = store.deal(tenant, deal.id).await.unwrap();
        assert_eq!(moved.organization_id, Some(a.id));

        // Backup references both records and holds B's full snapshot.
        let backup = store.merge_backup(tenant, outcome.backup_id).await.unwrap();
        assert_eq!(backup.kept_id, a.id.record());
        assert_eq!(backup.removed_id, b.id.record());
        assert_eq!(backup.removed_organization().unwrap(), b);
        assert_eq!(backup.children.deals, vec![deal.id.record()]);

        // B no longer exists.
        assert!(matches!(
            store.organization(tenant, b.id).await,
            Err(StoreError::NotFound)
        ));

        // Exactly one organizations_merged history entry on A.
        let history = store
            .history_for(tenant, EntityKind::Organization, a.id.record())
            .await
            .unwrap();
        let merged: Vec<_> = history
            .iter()
            .filter(|h| h.entry.kind == HistoryKind::OrganizationsMerged)
            .collect();
        assert_eq!(merged.len(), 1);

        // Empty field on A filled from B by the default rule.
        assert_eq!(kept.email.as_deref(), Some("contato@acme.com"));
    }

    #[tokio::test]
    async fn merge_unions_tags_without_duplicates() {
        let store = MemoryStore::new();
        let tenant = TenantId::new();
        let now = Utc::now();

        let a = org(tenant, "A", now);
        let b = org(tenant, "B", now);
        store.insert_organization(a.clone()).await.unwrap();
        store.insert_organization(b.clone()).await.unwrap();

        let shared = Tag::new(TagId::new(RecordId::new()), tenant, "VIP", "#ff0000", now).unwrap();
        let only_b = Tag::new(TagId::new(RecordId::new()), tenant, "Novo", "#00ff00", now).unwrap();
        store.insert_tag(shared.clone()).await.unwrap();
        store.insert_tag(only_b.clone()).await.unwrap();

        for (tag, parent) in [
            (&shared, a.id.record()),
            (&shared, b.id.record()),
            (&only_b, b.id.record()),
        ] {
            store
                .assign_tag(tenant, tag.id, EntityKind::Organization, parent)
                .await
                .unwrap();
        }

        store
            .merge_organizations(tenant, a.id, b.id, &Default::default(), UserId::new(), now)
            .await
            .unwrap();

        let tags = store
            .tags_of(tenant, EntityKind::Organization, a.id.record())
            .await
            .unwrap();
        let names: Vec<&str> = tags.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["Novo", "VIP"]);
    }

    #[tokio::test]
    async fn undo_restores_both_records_and_child_links() {
        let store = MemoryStore::new();
        let tenant = TenantId::new();
        let now = Utc::now();

        let a = org(tenant, "A", now);
        let b = org(tenant, "B", now);
        let deal = deal_for(tenant, &b, now);
        store.insert_organization(a.clone()).await.unwrap();
        store.insert_organization(b.clone()).await.unwrap();
        store.insert_deal(deal.clone()).await.unwrap();

        let (_, outcome) = store
            .merge_organizations(tenant, a.id, b.id, &Default::default(), UserId::new(), now)
            .await
            .unwrap();

        store
            .undo_merge(tenant, outcome.backup_id, UserId::new(), now)
            .await
            .unwrap();

        // B is back, with its prior state.
        let restored = store.organization(tenant, b.id).await.unwrap();
        assert_eq!(restored, b);

        // The deal points at B again.
        let moved_back = store.deal(tenant, deal.id).await.unwrap();
        assert_eq!(moved_back.organization_id, Some(b.id));

        // The backup is consumed.
        assert!(matches!(
            store.merge_backup(tenant, outcome.backup_id).await,
            Err(StoreError::NotFound)
        ));
    }

    #[tokio::test]
    async fn expired_backups_cannot_be_undone_and_get_purged() {
        let store = MemoryStore::new();
        let tenant = TenantId::new();
        let now = Utc::now();

        let a = org(tenant, "A", now);
        let b = org(tenant, "B", now);
        store.insert_organization(a.clone()).await.unwrap();
        store.insert_organization(b.clone()).await.unwrap();

        let (_, outcome) = store
            .merge_organizations(tenant, a.id, b.id, &Default::default(), UserId::new(), now)
            .await
            .unwrap();

        let after_expiry = now + chrono::Duration::days(funil_contacts::BACKUP_TTL_DAYS + 1);
        let err = store
            .undo_merge(tenant, outcome.backup_id, UserId::new(), after_expiry)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::Domain(DomainError::Conflict(_))
        ));

        let purged = store.purge_expired_backups(after_expiry).await.unwrap();
        assert_eq!(purged, 1);
    }

    #[tokio::test]
    async fn tag_filter_with_no_members_returns_an_empty_page() {
        let store = MemoryStore::new();
        let tenant = TenantId::new();
        let now = Utc::now();
        store
            .insert_organization(org(tenant, "Acme", now))
            .await
            .unwrap();
        let tag = Tag::new(TagId::new(RecordId::new()), tenant, "VIP", "#ff0000", now).unwrap();
        store.insert_tag(tag.clone()).await.unwrap();

        let filter = OrganizationFilter {
            tag_ids: vec![tag.id],
            ..Default::default()
        };
        let page = store
            .organizations(tenant, &filter, Pagination::default())
            .await
            .unwrap();
        assert_eq!(page.total, 0);
        assert!(page.items.is_empty());
    }

    #[tokio::test]
    async fn delete_with_children_surfaces_a_foreign_key_error() {
        let store = MemoryStore::new();
        let tenant = TenantId::new();
        let now = Utc::now();
        let a = org(tenant, "Acme", now);
        store.insert_organization(a.clone()).await.unwrap();
        store
            .insert_activity(
                Activity::new(
                    ActivityId::new(RecordId::new()),
                    tenant,
                    EntityKind::Organization,
                    a.id.record(),
                    ActivityKind::Call,
                    "Ligar",
                    UserId::new(),
                    now,
                )
                .unwrap(),
            )
            .await
            .unwrap();

        let err = store.delete_organization(tenant, a.id).await.unwrap_err();
        assert!(matches!(err, StoreError::ForeignKey(_)));
    }

    #[tokio::test]
    async fn tenant_isolation_holds_on_reads() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let a = org(TenantId::new(), "Acme", now);
        store.insert_organization(a.clone()).await.unwrap();

        let other_tenant = TenantId::new();
        assert!(matches!(
            store.organization(other_tenant, a.id).await,
            Err(StoreError::NotFound)
        ));
    }

    #[tokio::test]
    async fn duplicate_cnpj_within_a_tenant_is_rejected() {
        let store = MemoryStore::new();
        let tenant = TenantId::new();
        let now = Utc::now();
        let mut a = org(tenant, "A", now);
        a.cnpj = Some("11222333000181".to_string());
        let mut b = org(tenant, "B", now);
        b.cnpj = Some("11222333000181".to_string());

        store.insert_organization(a).await.unwrap();
        let err = store.insert_organization(b).await.unwrap_err();
        assert!(matches!(err, StoreError::Duplicate(_)));
    }

    #[tokio::test]
    async fn inbound_messages_bump_conversation_unread() {
        let store = MemoryStore::new();
        let tenant = TenantId::new();
        let now = Utc::now();

        let conversation = store
            .conversation_for_phone(tenant, "+5511912345678", None, now)
            .await
            .unwrap();
        let message = Message::new(
            funil_inbox::MessageId::new(RecordId::new()),
            tenant,
            conversation.id,
            MessageDirection::Inbound,
            "Oi!",
            None,
            now,
        )
        .unwrap();
        store.record_message(message).await.unwrap();

        let refreshed = store.conversation(tenant, conversation.id).await.unwrap();
        assert_eq!(refreshed.unread_count, 1);
        assert_eq!(refreshed.last_message_at, Some(now));

        store
            .mark_conversation_read(tenant, conversation.id)
            .await
            .unwrap();
        let read = store.conversation(tenant, conversation.id).await.unwrap();
        assert_eq!(read.unread_count, 0);
    }
}
