use std::collections::{BTreeMap, BTreeSet, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use common::model::{
    CollectionId, CollectionStatus, Company, CompanyId, Contact, ContactId, DocumentCollection,
    Group, GroupId, GroupSummary, RetentionClass, Template, TemplateId, User, UserId,
};

use crate::connector::{
    CompanyConnector, ConnectorError, ConnectorResult, ContactConnector,
    DocumentCollectionConnector, GroupConnector, SideEffect, TemplateConnector, UserConnector,
};
use crate::dependency::{EntityKind, GroupReferences};

#[derive(Debug, Default)]
struct MemoryState {
    companies: BTreeMap<CompanyId, Company>,
    groups: BTreeMap<GroupId, Group>,
    users: BTreeMap<UserId, User>,
    password_history: BTreeMap<UserId, usize>,
    contacts: BTreeMap<ContactId, Contact>,
    contact_group_links: BTreeSet<(ContactId, GroupId)>,
    /// One entry per historical signer row.
    signers: Vec<ContactId>,
    templates: BTreeMap<TemplateId, Template>,
    collections: BTreeMap<CollectionId, DocumentCollection>,
    failing_deletes: HashSet<(EntityKind, i64)>,
}

impl MemoryState {
    fn company(&self, company: &Company) -> Company {
        let mut company = company.clone();
        company.groups = self
            .groups
            .values()
            .filter(|g| g.company_id == company.id)
            .map(|g| GroupSummary {
                id: g.id,
                status: g.status,
            })
            .collect();
        company
    }

    fn group(&self, group: &Group) -> Group {
        let mut group = group.clone();
        group.users = self
            .users
            .values()
            .filter(|u| u.group_id == group.id)
            .cloned()
            .collect();
        group
    }

    fn contact(&self, contact: &Contact) -> Contact {
        let mut contact = contact.clone();
        contact.signer_references = self.signers.iter().filter(|s| **s == contact.id).count() as u32;
        contact
    }

    fn template_is_referenced(&self, template: TemplateId) -> bool {
        self.collections
            .values()
            .flat_map(|c| c.documents.iter())
            .any(|d| d.template_id == template)
    }

    fn contact_is_referenced(&self, contact: ContactId) -> bool {
        self.signers.contains(&contact)
    }

    fn references(&self, group: GroupId) -> GroupReferences {
        let user_mappings = self
            .users
            .values()
            .filter(|u| u.additional_group_mappings.contains(&group))
            .count();
        let contact_links = self
            .contact_group_links
            .iter()
            .filter(|(_, g)| *g == group)
            .count();

        GroupReferences {
            contacts: self.contacts.values().filter(|c| c.group_id == group).count() as u64,
            templates: self.templates.values().filter(|t| t.group_id == group).count() as u64,
            document_collections: self
                .collections
                .values()
                .filter(|c| c.group_id == group)
                .count() as u64,
            users: self.users.values().filter(|u| u.group_id == group).count() as u64,
            additional_mappings: (user_mappings + contact_links) as u64,
        }
    }

    fn check_failure(&self, kind: EntityKind, id: i64) -> ConnectorResult<()> {
        if self.failing_deletes.contains(&(kind, id)) {
            return Err(ConnectorError::Unavailable(format!(
                "injected failure deleting {kind} {id}"
            )));
        }
        Ok(())
    }
}

async fn run_side_effect(
    kind: EntityKind,
    id: i64,
    side_effect: SideEffect<'_>,
) -> ConnectorResult<()> {
    side_effect
        .await
        .map_err(|e| ConnectorError::side_effect(kind, id, e))
}

/// In-process store implementing every connector.
///
/// Each deletion holds the state lock across its side effect and applies the
/// mutation only when the side effect succeeds, so a failed cleanup leaves
/// the rows as they were.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_company(&self, company: Company) -> Company {
        let mut state = self.state.lock().await;
        state.companies.insert(company.id, company.clone());
        company
    }

    /// Insert the group and any users it carries.
    pub async fn insert_group(&self, group: Group) -> Group {
        let mut state = self.state.lock().await;
        for user in &group.users {
            state.users.insert(user.id, user.clone());
        }
        state.groups.insert(group.id, group.clone());
        group
    }

    pub async fn insert_user(&self, user: User) -> User {
        let mut state = self.state.lock().await;
        state.users.insert(user.id, user.clone());
        user
    }

    pub async fn insert_password_history(&self, user: UserId) {
        *self
            .state
            .lock()
            .await
            .password_history
            .entry(user)
            .or_default() += 1;
    }

    pub async fn insert_contact(&self, contact: Contact) -> Contact {
        let mut state = self.state.lock().await;
        state.contacts.insert(contact.id, contact.clone());
        contact
    }

    pub async fn link_contact_to_group(&self, contact: ContactId, group: GroupId) {
        self.state
            .lock()
            .await
            .contact_group_links
            .insert((contact, group));
    }

    /// Record a historical signer row for the contact.
    pub async fn insert_signer(&self, contact: ContactId) {
        self.state.lock().await.signers.push(contact);
    }

    pub async fn insert_template(&self, template: Template) -> Template {
        let mut state = self.state.lock().await;
        state.templates.insert(template.id, template.clone());
        template
    }

    pub async fn insert_collection(&self, collection: DocumentCollection) -> DocumentCollection {
        let mut state = self.state.lock().await;
        state.collections.insert(collection.id, collection.clone());
        collection
    }

    /// Make every later deletion of this row fail as if the store were down.
    pub async fn fail_deletes_for(&self, kind: EntityKind, id: i64) {
        self.state.lock().await.failing_deletes.insert((kind, id));
    }

    pub async fn company(&self, id: CompanyId) -> Option<Company> {
        let state = self.state.lock().await;
        state.companies.get(&id).map(|c| state.company(c))
    }

    pub async fn group(&self, id: GroupId) -> Option<Group> {
        let state = self.state.lock().await;
        state.groups.get(&id).map(|g| state.group(g))
    }

    pub async fn user(&self, id: UserId) -> Option<User> {
        self.state.lock().await.users.get(&id).cloned()
    }

    pub async fn has_company(&self, id: CompanyId) -> bool {
        self.state.lock().await.companies.contains_key(&id)
    }

    pub async fn has_group(&self, id: GroupId) -> bool {
        self.state.lock().await.groups.contains_key(&id)
    }

    pub async fn has_user(&self, id: UserId) -> bool {
        self.state.lock().await.users.contains_key(&id)
    }

    pub async fn has_contact(&self, id: ContactId) -> bool {
        self.state.lock().await.contacts.contains_key(&id)
    }

    pub async fn has_template(&self, id: TemplateId) -> bool {
        self.state.lock().await.templates.contains_key(&id)
    }

    pub async fn has_collection(&self, id: CollectionId) -> bool {
        self.state.lock().await.collections.contains_key(&id)
    }

    pub async fn password_history_len(&self, user: UserId) -> usize {
        self.state
            .lock()
            .await
            .password_history
            .get(&user)
            .copied()
            .unwrap_or(0)
    }

    /// Total rows across every entity table.
    pub async fn row_count(&self) -> usize {
        let state = self.state.lock().await;
        state.companies.len()
            + state.groups.len()
            + state.users.len()
            + state.contacts.len()
            + state.templates.len()
            + state.collections.len()
    }
}

#[async_trait]
impl CompanyConnector for MemoryStore {
    async fn read(&self, id: CompanyId) -> ConnectorResult<Option<Company>> {
        Ok(self.company(id).await)
    }

    async fn list_deleted(&self) -> ConnectorResult<Vec<Company>> {
        let state = self.state.lock().await;
        Ok(state
            .companies
            .values()
            .filter(|c| c.status.is_deleted())
            .map(|c| state.company(c))
            .collect())
    }

    async fn list_page(&self, offset: usize, limit: usize) -> ConnectorResult<Vec<Company>> {
        let state = self.state.lock().await;
        Ok(state
            .companies
            .values()
            .skip(offset)
            .take(limit)
            .map(|c| state.company(c))
            .collect())
    }

    async fn delete<'a>(
        &'a self,
        company: &'a Company,
        side_effect: SideEffect<'a>,
    ) -> ConnectorResult<()> {
        let mut state = self.state.lock().await;
        let (kind, id) = (EntityKind::Company, company.id.0);

        if !state.companies.contains_key(&company.id) {
            return Err(ConnectorError::NotFound { kind, id });
        }
        if state.groups.values().any(|g| g.company_id == company.id) {
            return Err(ConnectorError::StillReferenced { kind, id });
        }
        state.check_failure(kind, id)?;
        run_side_effect(kind, id, side_effect).await?;

        state.companies.remove(&company.id);
        Ok(())
    }
}

#[async_trait]
impl GroupConnector for MemoryStore {
    async fn read(&self, id: GroupId) -> ConnectorResult<Option<Group>> {
        Ok(self.group(id).await)
    }

    async fn list_deleted(&self) -> ConnectorResult<Vec<Group>> {
        let state = self.state.lock().await;
        Ok(state
            .groups
            .values()
            .filter(|g| g.status.is_deleted())
            .map(|g| state.group(g))
            .collect())
    }

    async fn references(&self, id: GroupId) -> ConnectorResult<GroupReferences> {
        Ok(self.state.lock().await.references(id))
    }

    async fn remove_additional_mappings(&self, id: GroupId) -> ConnectorResult<u64> {
        let mut state = self.state.lock().await;
        let mut removed = 0u64;

        for user in state.users.values_mut() {
            let before = user.additional_group_mappings.len();
            user.additional_group_mappings.retain(|g| *g != id);
            removed += (before - user.additional_group_mappings.len()) as u64;
        }

        let before = state.contact_group_links.len();
        state.contact_group_links.retain(|(_, g)| *g != id);
        removed += (before - state.contact_group_links.len()) as u64;

        Ok(removed)
    }

    async fn delete(&self, group: &Group) -> ConnectorResult<()> {
        let mut state = self.state.lock().await;
        let (kind, id) = (EntityKind::Group, group.id.0);

        if !state.groups.contains_key(&group.id) {
            return Err(ConnectorError::NotFound { kind, id });
        }
        if !state.references(group.id).is_clear() {
            return Err(ConnectorError::StillReferenced { kind, id });
        }
        state.check_failure(kind, id)?;

        state.groups.remove(&group.id);
        Ok(())
    }
}

#[async_trait]
impl UserConnector for MemoryStore {
    async fn list_deleted(&self) -> ConnectorResult<Vec<User>> {
        Ok(self
            .state
            .lock()
            .await
            .users
            .values()
            .filter(|u| u.status.is_deleted())
            .cloned()
            .collect())
    }

    async fn reassign_primary_group(&self, user: UserId, group: GroupId) -> ConnectorResult<()> {
        let mut state = self.state.lock().await;
        let row = state.users.get_mut(&user).ok_or(ConnectorError::NotFound {
            kind: EntityKind::User,
            id: user.0,
        })?;
        row.group_id = group;
        row.additional_group_mappings.retain(|g| *g != group);
        Ok(())
    }

    async fn delete<'a>(
        &'a self,
        user: &'a User,
        side_effect: SideEffect<'a>,
    ) -> ConnectorResult<()> {
        let mut state = self.state.lock().await;
        let (kind, id) = (EntityKind::User, user.id.0);

        if !state.users.contains_key(&user.id) {
            return Err(ConnectorError::NotFound { kind, id });
        }
        state.check_failure(kind, id)?;
        run_side_effect(kind, id, side_effect).await?;

        state.users.remove(&user.id);
        state.password_history.remove(&user.id);
        Ok(())
    }
}

#[async_trait]
impl ContactConnector for MemoryStore {
    async fn list_deleted_unreferenced(&self) -> ConnectorResult<Vec<Contact>> {
        let state = self.state.lock().await;
        Ok(state
            .contacts
            .values()
            .filter(|c| c.status.is_deleted() && !state.contact_is_referenced(c.id))
            .map(|c| state.contact(c))
            .collect())
    }

    async fn list_active_by_group(&self, group: GroupId) -> ConnectorResult<Vec<Contact>> {
        let state = self.state.lock().await;
        Ok(state
            .contacts
            .values()
            .filter(|c| c.group_id == group && !c.status.is_deleted())
            .map(|c| state.contact(c))
            .collect())
    }

    async fn delete_batch(&self, contacts: &[Contact]) -> ConnectorResult<Vec<ContactId>> {
        let mut state = self.state.lock().await;

        for contact in contacts {
            state.check_failure(EntityKind::Contact, contact.id.0)?;
        }

        let removable: Vec<ContactId> = contacts
            .iter()
            .map(|c| c.id)
            .filter(|id| state.contacts.contains_key(id) && !state.contact_is_referenced(*id))
            .collect();

        for id in &removable {
            state.contacts.remove(id);
            state.contact_group_links.retain(|(c, _)| c != id);
        }
        Ok(removable)
    }
}

#[async_trait]
impl TemplateConnector for MemoryStore {
    async fn read(&self, id: TemplateId) -> ConnectorResult<Option<Template>> {
        Ok(self.state.lock().await.templates.get(&id).cloned())
    }

    async fn list_deleted_unreferenced(&self) -> ConnectorResult<Vec<Template>> {
        let state = self.state.lock().await;
        Ok(state
            .templates
            .values()
            .filter(|t| t.status.is_deleted() && !state.template_is_referenced(t.id))
            .cloned()
            .collect())
    }

    async fn list_one_time_unreferenced(&self) -> ConnectorResult<Vec<Template>> {
        let state = self.state.lock().await;
        Ok(state
            .templates
            .values()
            .filter(|t| t.is_one_time && !state.template_is_referenced(t.id))
            .cloned()
            .collect())
    }

    async fn list_unreferenced_by_group(&self, group: GroupId) -> ConnectorResult<Vec<Template>> {
        let state = self.state.lock().await;
        Ok(state
            .templates
            .values()
            .filter(|t| t.group_id == group && !state.template_is_referenced(t.id))
            .cloned()
            .collect())
    }

    async fn delete<'a>(
        &'a self,
        template: &'a Template,
        side_effect: SideEffect<'a>,
    ) -> ConnectorResult<()> {
        let mut state = self.state.lock().await;
        let (kind, id) = (EntityKind::Template, template.id.0);

        if !state.templates.contains_key(&template.id) {
            return Err(ConnectorError::NotFound { kind, id });
        }
        state.check_failure(kind, id)?;
        run_side_effect(kind, id, side_effect).await?;

        state.templates.remove(&template.id);
        Ok(())
    }
}

#[async_trait]
impl DocumentCollectionConnector for MemoryStore {
    async fn exists(&self, id: CollectionId) -> ConnectorResult<bool> {
        Ok(self.state.lock().await.collections.contains_key(&id))
    }

    async fn list_expired(
        &self,
        company: CompanyId,
        class: RetentionClass,
        cutoff: DateTime<Utc>,
    ) -> ConnectorResult<Vec<DocumentCollection>> {
        let state = self.state.lock().await;
        let statuses = CollectionStatus::in_class(class);
        Ok(state
            .collections
            .values()
            .filter(|c| {
                state
                    .groups
                    .get(&c.group_id)
                    .is_some_and(|g| g.company_id == company)
            })
            .filter(|c| statuses.contains(&c.status))
            .filter(|c| c.retention_anchor(class).is_some_and(|anchor| anchor < cutoff))
            .cloned()
            .collect())
    }

    async fn list_deleted(&self) -> ConnectorResult<Vec<DocumentCollection>> {
        Ok(self
            .state
            .lock()
            .await
            .collections
            .values()
            .filter(|c| c.is_soft_deleted())
            .cloned()
            .collect())
    }

    async fn list_active_by_group(
        &self,
        group: GroupId,
    ) -> ConnectorResult<Vec<DocumentCollection>> {
        Ok(self
            .state
            .lock()
            .await
            .collections
            .values()
            .filter(|c| c.group_id == group && !c.is_soft_deleted())
            .cloned()
            .collect())
    }

    async fn delete<'a>(
        &'a self,
        collection: &'a DocumentCollection,
        side_effect: SideEffect<'a>,
    ) -> ConnectorResult<()> {
        let mut state = self.state.lock().await;
        let (kind, id) = (EntityKind::DocumentCollection, collection.id.0);

        if !state.collections.contains_key(&collection.id) {
            return Err(ConnectorError::NotFound { kind, id });
        }
        state.check_failure(kind, id)?;
        run_side_effect(kind, id, side_effect).await?;

        state.collections.remove(&collection.id);
        Ok(())
    }
}
