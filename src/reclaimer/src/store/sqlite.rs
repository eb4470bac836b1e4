use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnection, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool, query, query_scalar};

use common::model::{
    CollectionId, CollectionStatus, Company, CompanyId, Contact, ContactId, Document, DocumentId,
    DocumentCollection, EntityStatus, FieldType, Group, GroupId, GroupSummary, ProgramTier,
    RetentionClass, SealId, SignatureField, Template, TemplateId, UnknownVariant, User, UserId,
};

use crate::connector::{
    CompanyConnector, ConnectorError, ConnectorResult, ContactConnector,
    DocumentCollectionConnector, GroupConnector, SideEffect, TemplateConnector, UserConnector,
};
use crate::dependency::{EntityKind, GroupReferences};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS companies (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL,
        status TEXT NOT NULL,
        signed_retention_days INTEGER,
        unsigned_retention_days INTEGER
    )"#,
    r#"
    CREATE TABLE IF NOT EXISTS user_groups (
        id INTEGER PRIMARY KEY,
        company_id INTEGER NOT NULL,
        name TEXT NOT NULL,
        status TEXT NOT NULL
    )"#,
    r#"
    CREATE TABLE IF NOT EXISTS users (
        id INTEGER PRIMARY KEY,
        group_id INTEGER NOT NULL,
        email TEXT NOT NULL,
        status TEXT NOT NULL,
        program_tier TEXT NOT NULL
    )"#,
    r#"
    CREATE TABLE IF NOT EXISTS user_group_mappings (
        user_id INTEGER NOT NULL,
        group_id INTEGER NOT NULL,
        position INTEGER NOT NULL,
        PRIMARY KEY (user_id, group_id)
    )"#,
    r#"
    CREATE TABLE IF NOT EXISTS password_history (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER NOT NULL,
        password_hash TEXT NOT NULL,
        created_at INTEGER NOT NULL
    )"#,
    r#"
    CREATE TABLE IF NOT EXISTS contacts (
        id INTEGER PRIMARY KEY,
        group_id INTEGER NOT NULL,
        email TEXT NOT NULL,
        status TEXT NOT NULL
    )"#,
    r#"
    CREATE TABLE IF NOT EXISTS contact_group_links (
        contact_id INTEGER NOT NULL,
        group_id INTEGER NOT NULL,
        PRIMARY KEY (contact_id, group_id)
    )"#,
    r#"
    CREATE TABLE IF NOT EXISTS contact_seals (
        id INTEGER PRIMARY KEY,
        contact_id INTEGER NOT NULL
    )"#,
    r#"
    CREATE TABLE IF NOT EXISTS signers (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        contact_id INTEGER NOT NULL
    )"#,
    r#"
    CREATE TABLE IF NOT EXISTS templates (
        id INTEGER PRIMARY KEY,
        group_id INTEGER NOT NULL,
        name TEXT NOT NULL,
        status TEXT NOT NULL,
        is_one_time INTEGER NOT NULL
    )"#,
    r#"
    CREATE TABLE IF NOT EXISTS template_fields (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        template_id INTEGER NOT NULL,
        position INTEGER NOT NULL,
        name TEXT NOT NULL,
        field_type TEXT NOT NULL,
        value TEXT
    )"#,
    r#"
    CREATE TABLE IF NOT EXISTS document_collections (
        id INTEGER PRIMARY KEY,
        group_id INTEGER NOT NULL,
        user_id INTEGER NOT NULL,
        name TEXT NOT NULL,
        status TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        signed_at INTEGER
    )"#,
    r#"
    CREATE TABLE IF NOT EXISTS documents (
        id INTEGER PRIMARY KEY,
        collection_id INTEGER NOT NULL,
        template_id INTEGER NOT NULL
    )"#,
];

/// Timestamps are stored as unix milliseconds so range filters compare numerically.
fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn from_millis(ms: i64) -> ConnectorResult<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).ok_or_else(|| {
        ConnectorError::Corrupt(UnknownVariant {
            kind: "timestamp",
            value: ms.to_string(),
        })
    })
}

fn parse<T>(row: &SqliteRow, column: &str) -> ConnectorResult<T>
where
    T: FromStr<Err = UnknownVariant>,
{
    let raw: String = row.try_get(column)?;
    Ok(raw.parse()?)
}

async fn exists(
    conn: &mut SqliteConnection,
    table: &'static str,
    id: i64,
) -> ConnectorResult<bool> {
    let sql = format!("SELECT COUNT(*) FROM {table} WHERE id = ?");
    let count: i64 = query_scalar(&sql).bind(id).fetch_one(&mut *conn).await?;
    Ok(count > 0)
}

async fn count_references(
    conn: &mut SqliteConnection,
    group: GroupId,
) -> ConnectorResult<GroupReferences> {
    async fn count(conn: &mut SqliteConnection, sql: &str, group: GroupId) -> ConnectorResult<u64> {
        let n: i64 = query_scalar(sql).bind(group.0).fetch_one(&mut *conn).await?;
        Ok(n as u64)
    }

    let user_mappings = count(
        conn,
        "SELECT COUNT(*) FROM user_group_mappings WHERE group_id = ?",
        group,
    )
    .await?;
    let contact_links = count(
        conn,
        "SELECT COUNT(*) FROM contact_group_links WHERE group_id = ?",
        group,
    )
    .await?;

    Ok(GroupReferences {
        contacts: count(conn, "SELECT COUNT(*) FROM contacts WHERE group_id = ?", group).await?,
        templates: count(conn, "SELECT COUNT(*) FROM templates WHERE group_id = ?", group).await?,
        document_collections: count(
            conn,
            "SELECT COUNT(*) FROM document_collections WHERE group_id = ?",
            group,
        )
        .await?,
        users: count(conn, "SELECT COUNT(*) FROM users WHERE group_id = ?", group).await?,
        additional_mappings: user_mappings + contact_links,
    })
}

/// Connector implementation over a SQLite database.
///
/// Each deletion runs in its own transaction; the side effect is awaited
/// after the rows are removed and before the commit.
#[derive(Clone, Debug)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Connect and create the schema when missing.
    ///
    /// In-memory databases are pinned to one connection so every query sees
    /// the same data.
    pub async fn connect(dsn: &str) -> Result<Self, sqlx::Error> {
        log::info!("Connecting to reclaimer database with DSN: {dsn}");

        let pool = if dsn.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect(dsn)
                .await?
        } else {
            // Create the database file if it doesn't exist
            let dsn_with_create = if dsn.contains("mode=") {
                dsn.to_string()
            } else if dsn.contains('?') {
                format!("{dsn}&mode=rwc")
            } else {
                format!("{dsn}?mode=rwc")
            };
            SqlitePool::connect(&dsn_with_create).await.map_err(|e| {
                log::error!("Failed to connect to SQLite database with DSN '{dsn_with_create}': {e}");
                e
            })?
        };

        let store = Self { pool };
        store.init().await?;
        log::info!("Reclaimer schema initialized successfully");
        Ok(store)
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn init(&self) -> Result<(), sqlx::Error> {
        for statement in SCHEMA {
            query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    pub async fn insert_company(&self, company: &Company) -> ConnectorResult<()> {
        query(
            r#"
            INSERT INTO companies (id, name, status, signed_retention_days, unsigned_retention_days)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(company.id.0)
        .bind(&company.name)
        .bind(company.status.as_str())
        .bind(company.signed_retention_days.map(i64::from))
        .bind(company.unsigned_retention_days.map(i64::from))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Insert the group and any users it carries.
    pub async fn insert_group(&self, group: &Group) -> ConnectorResult<()> {
        query("INSERT INTO user_groups (id, company_id, name, status) VALUES (?, ?, ?, ?)")
            .bind(group.id.0)
            .bind(group.company_id.0)
            .bind(&group.name)
            .bind(group.status.as_str())
            .execute(&self.pool)
            .await?;
        for user in &group.users {
            self.insert_user(user).await?;
        }
        Ok(())
    }

    pub async fn insert_user(&self, user: &User) -> ConnectorResult<()> {
        let mut tx = self.pool.begin().await?;
        query("INSERT INTO users (id, group_id, email, status, program_tier) VALUES (?, ?, ?, ?, ?)")
            .bind(user.id.0)
            .bind(user.group_id.0)
            .bind(&user.email)
            .bind(user.status.as_str())
            .bind(user.program_tier.as_str())
            .execute(&mut *tx)
            .await?;
        for (position, group) in user.additional_group_mappings.iter().enumerate() {
            query("INSERT INTO user_group_mappings (user_id, group_id, position) VALUES (?, ?, ?)")
                .bind(user.id.0)
                .bind(group.0)
                .bind(position as i64)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn insert_password_history(&self, user: UserId, hash: &str) -> ConnectorResult<()> {
        query("INSERT INTO password_history (user_id, password_hash, created_at) VALUES (?, ?, ?)")
            .bind(user.0)
            .bind(hash)
            .bind(to_millis(Utc::now()))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Insert the contact with its seals. Signer references are separate rows.
    pub async fn insert_contact(&self, contact: &Contact) -> ConnectorResult<()> {
        let mut tx = self.pool.begin().await?;
        query("INSERT INTO contacts (id, group_id, email, status) VALUES (?, ?, ?, ?)")
            .bind(contact.id.0)
            .bind(contact.group_id.0)
            .bind(&contact.email)
            .bind(contact.status.as_str())
            .execute(&mut *tx)
            .await?;
        for seal in &contact.seals {
            query("INSERT INTO contact_seals (id, contact_id) VALUES (?, ?)")
                .bind(seal.0)
                .bind(contact.id.0)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn link_contact_to_group(
        &self,
        contact: ContactId,
        group: GroupId,
    ) -> ConnectorResult<()> {
        query("INSERT INTO contact_group_links (contact_id, group_id) VALUES (?, ?)")
            .bind(contact.0)
            .bind(group.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn insert_signer(&self, contact: ContactId) -> ConnectorResult<()> {
        query("INSERT INTO signers (contact_id) VALUES (?)")
            .bind(contact.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn insert_template(&self, template: &Template) -> ConnectorResult<()> {
        let mut tx = self.pool.begin().await?;
        query("INSERT INTO templates (id, group_id, name, status, is_one_time) VALUES (?, ?, ?, ?, ?)")
            .bind(template.id.0)
            .bind(template.group_id.0)
            .bind(&template.name)
            .bind(template.status.as_str())
            .bind(template.is_one_time)
            .execute(&mut *tx)
            .await?;
        for (position, field) in template.signature_fields.iter().enumerate() {
            query(
                r#"
                INSERT INTO template_fields (template_id, position, name, field_type, value)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(template.id.0)
            .bind(position as i64)
            .bind(&field.name)
            .bind(field.field_type.as_str())
            .bind(field.value.as_deref())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn insert_collection(&self, collection: &DocumentCollection) -> ConnectorResult<()> {
        let mut tx = self.pool.begin().await?;
        query(
            r#"
            INSERT INTO document_collections (id, group_id, user_id, name, status, created_at, signed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(collection.id.0)
        .bind(collection.group_id.0)
        .bind(collection.user_id.0)
        .bind(&collection.name)
        .bind(collection.status.as_str())
        .bind(to_millis(collection.created_at))
        .bind(collection.signed_at.map(to_millis))
        .execute(&mut *tx)
        .await?;
        for document in &collection.documents {
            query("INSERT INTO documents (id, collection_id, template_id) VALUES (?, ?, ?)")
                .bind(document.id.0)
                .bind(collection.id.0)
                .bind(document.template_id.0)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn company_from_row(&self, row: &SqliteRow) -> ConnectorResult<Company> {
        let id = CompanyId(row.try_get("id")?);
        let groups = query("SELECT id, status FROM user_groups WHERE company_id = ? ORDER BY id")
            .bind(id.0)
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(|g| {
                Ok(GroupSummary {
                    id: GroupId(g.try_get("id")?),
                    status: parse(g, "status")?,
                })
            })
            .collect::<ConnectorResult<Vec<_>>>()?;

        Ok(Company {
            id,
            name: row.try_get("name")?,
            status: parse(row, "status")?,
            signed_retention_days: row
                .try_get::<Option<i64>, _>("signed_retention_days")?
                .map(|d| d as u32),
            unsigned_retention_days: row
                .try_get::<Option<i64>, _>("unsigned_retention_days")?
                .map(|d| d as u32),
            groups,
        })
    }

    async fn companies_from_rows(&self, rows: Vec<SqliteRow>) -> ConnectorResult<Vec<Company>> {
        let mut companies = Vec::with_capacity(rows.len());
        for row in &rows {
            companies.push(self.company_from_row(row).await?);
        }
        Ok(companies)
    }

    async fn user_from_row(&self, row: &SqliteRow) -> ConnectorResult<User> {
        let id = UserId(row.try_get("id")?);
        let mappings: Vec<i64> = query_scalar(
            "SELECT group_id FROM user_group_mappings WHERE user_id = ? ORDER BY position",
        )
        .bind(id.0)
        .fetch_all(&self.pool)
        .await?;

        Ok(User {
            id,
            group_id: GroupId(row.try_get("group_id")?),
            email: row.try_get("email")?,
            status: parse(row, "status")?,
            program_tier: parse::<ProgramTier>(row, "program_tier")?,
            additional_group_mappings: mappings.into_iter().map(GroupId).collect(),
        })
    }

    async fn group_from_row(&self, row: &SqliteRow) -> ConnectorResult<Group> {
        let id = GroupId(row.try_get("id")?);
        let user_rows = query("SELECT * FROM users WHERE group_id = ? ORDER BY id")
            .bind(id.0)
            .fetch_all(&self.pool)
            .await?;
        let mut users = Vec::with_capacity(user_rows.len());
        for user in &user_rows {
            users.push(self.user_from_row(user).await?);
        }

        Ok(Group {
            id,
            company_id: CompanyId(row.try_get("company_id")?),
            name: row.try_get("name")?,
            status: parse(row, "status")?,
            users,
        })
    }

    async fn contacts_from_rows(&self, rows: Vec<SqliteRow>) -> ConnectorResult<Vec<Contact>> {
        let mut contacts = Vec::with_capacity(rows.len());
        for row in &rows {
            let id = ContactId(row.try_get("id")?);
            let seals: Vec<i64> =
                query_scalar("SELECT id FROM contact_seals WHERE contact_id = ? ORDER BY id")
                    .bind(id.0)
                    .fetch_all(&self.pool)
                    .await?;
            let signer_references: i64 =
                query_scalar("SELECT COUNT(*) FROM signers WHERE contact_id = ?")
                    .bind(id.0)
                    .fetch_one(&self.pool)
                    .await?;

            contacts.push(Contact {
                id,
                group_id: GroupId(row.try_get("group_id")?),
                email: row.try_get("email")?,
                status: parse(row, "status")?,
                seals: seals.into_iter().map(SealId).collect(),
                signer_references: signer_references as u32,
            });
        }
        Ok(contacts)
    }

    async fn templates_from_rows(&self, rows: Vec<SqliteRow>) -> ConnectorResult<Vec<Template>> {
        let mut templates = Vec::with_capacity(rows.len());
        for row in &rows {
            let id = TemplateId(row.try_get("id")?);
            let signature_fields = query(
                "SELECT name, field_type, value FROM template_fields WHERE template_id = ? ORDER BY position",
            )
            .bind(id.0)
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(|f| {
                Ok(SignatureField {
                    name: f.try_get("name")?,
                    field_type: parse::<FieldType>(f, "field_type")?,
                    value: f.try_get("value")?,
                })
            })
            .collect::<ConnectorResult<Vec<_>>>()?;

            templates.push(Template {
                id,
                group_id: GroupId(row.try_get("group_id")?),
                name: row.try_get("name")?,
                status: parse(row, "status")?,
                is_one_time: row.try_get("is_one_time")?,
                signature_fields,
            });
        }
        Ok(templates)
    }

    async fn collections_from_rows(
        &self,
        rows: Vec<SqliteRow>,
    ) -> ConnectorResult<Vec<DocumentCollection>> {
        let mut collections = Vec::with_capacity(rows.len());
        for row in &rows {
            let id = CollectionId(row.try_get("id")?);
            let documents = query(
                "SELECT id, template_id FROM documents WHERE collection_id = ? ORDER BY id",
            )
            .bind(id.0)
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(|d| {
                Ok(Document {
                    id: DocumentId(d.try_get("id")?),
                    template_id: TemplateId(d.try_get("template_id")?),
                })
            })
            .collect::<ConnectorResult<Vec<_>>>()?;

            collections.push(DocumentCollection {
                id,
                group_id: GroupId(row.try_get("group_id")?),
                user_id: UserId(row.try_get("user_id")?),
                name: row.try_get("name")?,
                status: parse::<CollectionStatus>(row, "status")?,
                created_at: from_millis(row.try_get("created_at")?)?,
                signed_at: row
                    .try_get::<Option<i64>, _>("signed_at")?
                    .map(from_millis)
                    .transpose()?,
                documents,
            });
        }
        Ok(collections)
    }
}

#[async_trait]
impl CompanyConnector for SqliteStore {
    async fn read(&self, id: CompanyId) -> ConnectorResult<Option<Company>> {
        let row = query("SELECT * FROM companies WHERE id = ?")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(Some(self.company_from_row(&row).await?)),
            None => Ok(None),
        }
    }

    async fn list_deleted(&self) -> ConnectorResult<Vec<Company>> {
        let rows = query("SELECT * FROM companies WHERE status = ? ORDER BY id")
            .bind(EntityStatus::Deleted.as_str())
            .fetch_all(&self.pool)
            .await?;
        self.companies_from_rows(rows).await
    }

    async fn list_page(&self, offset: usize, limit: usize) -> ConnectorResult<Vec<Company>> {
        let rows = query("SELECT * FROM companies ORDER BY id LIMIT ? OFFSET ?")
            .bind(limit as i64)
            .bind(offset as i64)
            .fetch_all(&self.pool)
            .await?;
        self.companies_from_rows(rows).await
    }

    async fn delete<'a>(
        &'a self,
        company: &'a Company,
        side_effect: SideEffect<'a>,
    ) -> ConnectorResult<()> {
        let (kind, id) = (EntityKind::Company, company.id.0);
        let mut tx = self.pool.begin().await?;

        if !exists(&mut tx, "companies", id).await? {
            return Err(ConnectorError::NotFound { kind, id });
        }
        let groups: i64 = query_scalar("SELECT COUNT(*) FROM user_groups WHERE company_id = ?")
            .bind(id)
            .fetch_one(&mut *tx)
            .await?;
        if groups > 0 {
            return Err(ConnectorError::StillReferenced { kind, id });
        }

        query("DELETE FROM companies WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        side_effect
            .await
            .map_err(|e| ConnectorError::side_effect(kind, id, e))?;
        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl GroupConnector for SqliteStore {
    async fn read(&self, id: GroupId) -> ConnectorResult<Option<Group>> {
        let row = query("SELECT * FROM user_groups WHERE id = ?")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(Some(self.group_from_row(&row).await?)),
            None => Ok(None),
        }
    }

    async fn list_deleted(&self) -> ConnectorResult<Vec<Group>> {
        let rows = query("SELECT * FROM user_groups WHERE status = ? ORDER BY id")
            .bind(EntityStatus::Deleted.as_str())
            .fetch_all(&self.pool)
            .await?;
        let mut groups = Vec::with_capacity(rows.len());
        for row in &rows {
            groups.push(self.group_from_row(row).await?);
        }
        Ok(groups)
    }

    async fn references(&self, id: GroupId) -> ConnectorResult<GroupReferences> {
        let mut conn = self.pool.acquire().await?;
        count_references(&mut conn, id).await
    }

    async fn remove_additional_mappings(&self, id: GroupId) -> ConnectorResult<u64> {
        let mut tx = self.pool.begin().await?;
        let users = query("DELETE FROM user_group_mappings WHERE group_id = ?")
            .bind(id.0)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        let contacts = query("DELETE FROM contact_group_links WHERE group_id = ?")
            .bind(id.0)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;
        Ok(users + contacts)
    }

    async fn delete(&self, group: &Group) -> ConnectorResult<()> {
        let (kind, id) = (EntityKind::Group, group.id.0);
        let mut tx = self.pool.begin().await?;

        if !exists(&mut tx, "user_groups", id).await? {
            return Err(ConnectorError::NotFound { kind, id });
        }
        if !count_references(&mut tx, group.id).await?.is_clear() {
            return Err(ConnectorError::StillReferenced { kind, id });
        }

        query("DELETE FROM user_groups WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl UserConnector for SqliteStore {
    async fn list_deleted(&self) -> ConnectorResult<Vec<User>> {
        let rows = query("SELECT * FROM users WHERE status = ? ORDER BY id")
            .bind(EntityStatus::Deleted.as_str())
            .fetch_all(&self.pool)
            .await?;
        let mut users = Vec::with_capacity(rows.len());
        for row in &rows {
            users.push(self.user_from_row(row).await?);
        }
        Ok(users)
    }

    async fn reassign_primary_group(&self, user: UserId, group: GroupId) -> ConnectorResult<()> {
        let mut tx = self.pool.begin().await?;
        let updated = query("UPDATE users SET group_id = ? WHERE id = ?")
            .bind(group.0)
            .bind(user.0)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        if updated == 0 {
            return Err(ConnectorError::NotFound {
                kind: EntityKind::User,
                id: user.0,
            });
        }
        query("DELETE FROM user_group_mappings WHERE user_id = ? AND group_id = ?")
            .bind(user.0)
            .bind(group.0)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn delete<'a>(
        &'a self,
        user: &'a User,
        side_effect: SideEffect<'a>,
    ) -> ConnectorResult<()> {
        let (kind, id) = (EntityKind::User, user.id.0);
        let mut tx = self.pool.begin().await?;

        if !exists(&mut tx, "users", id).await? {
            return Err(ConnectorError::NotFound { kind, id });
        }
        for statement in [
            "DELETE FROM password_history WHERE user_id = ?",
            "DELETE FROM user_group_mappings WHERE user_id = ?",
            "DELETE FROM users WHERE id = ?",
        ] {
            query(statement).bind(id).execute(&mut *tx).await?;
        }

        side_effect
            .await
            .map_err(|e| ConnectorError::side_effect(kind, id, e))?;
        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl ContactConnector for SqliteStore {
    async fn list_deleted_unreferenced(&self) -> ConnectorResult<Vec<Contact>> {
        let rows = query(
            r#"
            SELECT * FROM contacts c
            WHERE c.status = ?
              AND NOT EXISTS (SELECT 1 FROM signers s WHERE s.contact_id = c.id)
            ORDER BY c.id
            "#,
        )
        .bind(EntityStatus::Deleted.as_str())
        .fetch_all(&self.pool)
        .await?;
        self.contacts_from_rows(rows).await
    }

    async fn list_active_by_group(&self, group: GroupId) -> ConnectorResult<Vec<Contact>> {
        let rows = query("SELECT * FROM contacts WHERE group_id = ? AND status = ? ORDER BY id")
            .bind(group.0)
            .bind(EntityStatus::Active.as_str())
            .fetch_all(&self.pool)
            .await?;
        self.contacts_from_rows(rows).await
    }

    async fn delete_batch(&self, contacts: &[Contact]) -> ConnectorResult<Vec<ContactId>> {
        let mut tx = self.pool.begin().await?;
        let mut removed = Vec::with_capacity(contacts.len());

        for contact in contacts {
            let id = contact.id.0;
            let signers: i64 = query_scalar("SELECT COUNT(*) FROM signers WHERE contact_id = ?")
                .bind(id)
                .fetch_one(&mut *tx)
                .await?;
            if signers > 0 || !exists(&mut tx, "contacts", id).await? {
                continue;
            }

            for statement in [
                "DELETE FROM contact_seals WHERE contact_id = ?",
                "DELETE FROM contact_group_links WHERE contact_id = ?",
                "DELETE FROM contacts WHERE id = ?",
            ] {
                query(statement).bind(id).execute(&mut *tx).await?;
            }
            removed.push(contact.id);
        }

        tx.commit().await?;
        Ok(removed)
    }
}

#[async_trait]
impl TemplateConnector for SqliteStore {
    async fn read(&self, id: TemplateId) -> ConnectorResult<Option<Template>> {
        let rows = query("SELECT * FROM templates WHERE id = ?")
            .bind(id.0)
            .fetch_all(&self.pool)
            .await?;
        Ok(self.templates_from_rows(rows).await?.into_iter().next())
    }

    async fn list_deleted_unreferenced(&self) -> ConnectorResult<Vec<Template>> {
        let rows = query(
            r#"
            SELECT * FROM templates t
            WHERE t.status = ?
              AND NOT EXISTS (SELECT 1 FROM documents d WHERE d.template_id = t.id)
            ORDER BY t.id
            "#,
        )
        .bind(EntityStatus::Deleted.as_str())
        .fetch_all(&self.pool)
        .await?;
        self.templates_from_rows(rows).await
    }

    async fn list_one_time_unreferenced(&self) -> ConnectorResult<Vec<Template>> {
        let rows = query(
            r#"
            SELECT * FROM templates t
            WHERE t.is_one_time = 1
              AND NOT EXISTS (SELECT 1 FROM documents d WHERE d.template_id = t.id)
            ORDER BY t.id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        self.templates_from_rows(rows).await
    }

    async fn list_unreferenced_by_group(&self, group: GroupId) -> ConnectorResult<Vec<Template>> {
        let rows = query(
            r#"
            SELECT * FROM templates t
            WHERE t.group_id = ?
              AND NOT EXISTS (SELECT 1 FROM documents d WHERE d.template_id = t.id)
            ORDER BY t.id
            "#,
        )
        .bind(group.0)
        .fetch_all(&self.pool)
        .await?;
        self.templates_from_rows(rows).await
    }

    async fn delete<'a>(
        &'a self,
        template: &'a Template,
        side_effect: SideEffect<'a>,
    ) -> ConnectorResult<()> {
        let (kind, id) = (EntityKind::Template, template.id.0);
        let mut tx = self.pool.begin().await?;

        if !exists(&mut tx, "templates", id).await? {
            return Err(ConnectorError::NotFound { kind, id });
        }
        for statement in [
            "DELETE FROM template_fields WHERE template_id = ?",
            "DELETE FROM templates WHERE id = ?",
        ] {
            query(statement).bind(id).execute(&mut *tx).await?;
        }

        side_effect
            .await
            .map_err(|e| ConnectorError::side_effect(kind, id, e))?;
        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl DocumentCollectionConnector for SqliteStore {
    async fn exists(&self, id: CollectionId) -> ConnectorResult<bool> {
        let mut conn = self.pool.acquire().await?;
        exists(&mut conn, "document_collections", id.0).await
    }

    async fn list_expired(
        &self,
        company: CompanyId,
        class: RetentionClass,
        cutoff: DateTime<Utc>,
    ) -> ConnectorResult<Vec<DocumentCollection>> {
        let statuses = CollectionStatus::in_class(class);
        let anchor = match class {
            RetentionClass::Signed => "dc.signed_at",
            RetentionClass::Unsigned => "dc.created_at",
        };
        let placeholders = vec!["?"; statuses.len()].join(", ");
        let sql = format!(
            r#"
            SELECT dc.* FROM document_collections dc
            JOIN user_groups g ON g.id = dc.group_id
            WHERE g.company_id = ?
              AND dc.status IN ({placeholders})
              AND {anchor} IS NOT NULL
              AND {anchor} < ?
            ORDER BY dc.id
            "#
        );

        let mut statement = query(&sql).bind(company.0);
        for status in statuses {
            statement = statement.bind(status.as_str());
        }
        let rows = statement
            .bind(to_millis(cutoff))
            .fetch_all(&self.pool)
            .await?;
        self.collections_from_rows(rows).await
    }

    async fn list_deleted(&self) -> ConnectorResult<Vec<DocumentCollection>> {
        let rows = query("SELECT * FROM document_collections WHERE status = ? ORDER BY id")
            .bind(CollectionStatus::Deleted.as_str())
            .fetch_all(&self.pool)
            .await?;
        self.collections_from_rows(rows).await
    }

    async fn list_active_by_group(
        &self,
        group: GroupId,
    ) -> ConnectorResult<Vec<DocumentCollection>> {
        let rows =
            query("SELECT * FROM document_collections WHERE group_id = ? AND status != ? ORDER BY id")
                .bind(group.0)
                .bind(CollectionStatus::Deleted.as_str())
                .fetch_all(&self.pool)
                .await?;
        self.collections_from_rows(rows).await
    }

    async fn delete<'a>(
        &'a self,
        collection: &'a DocumentCollection,
        side_effect: SideEffect<'a>,
    ) -> ConnectorResult<()> {
        let (kind, id) = (EntityKind::DocumentCollection, collection.id.0);
        let mut tx = self.pool.begin().await?;

        if !exists(&mut tx, "document_collections", id).await? {
            return Err(ConnectorError::NotFound { kind, id });
        }
        for statement in [
            "DELETE FROM documents WHERE collection_id = ?",
            "DELETE FROM document_collections WHERE id = ?",
        ] {
            query(statement).bind(id).execute(&mut *tx).await?;
        }

        side_effect
            .await
            .map_err(|e| ConnectorError::side_effect(kind, id, e))?;
        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::no_side_effect;
    use crate::testing;
    use chrono::Duration;
    use futures::FutureExt;

    async fn store() -> SqliteStore {
        SqliteStore::connect("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn test_schema_init_is_idempotent() {
        let store = store().await;
        store.init().await.unwrap();
        assert!(CompanyConnector::list_deleted(&store).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_company_reads_load_groups() {
        let store = store().await;
        let mut company = testing::company_with_retention(1, Some(30), None);
        company.status = EntityStatus::Deleted;
        store.insert_company(&company).await.unwrap();
        let mut group = testing::group(10, company.id);
        group.status = EntityStatus::Deleted;
        store.insert_group(&group).await.unwrap();

        let deleted = CompanyConnector::list_deleted(&store).await.unwrap();
        assert_eq!(deleted.len(), 1);
        assert_eq!(deleted[0].signed_retention_days, Some(30));
        assert_eq!(deleted[0].unsigned_retention_days, None);
        assert_eq!(
            deleted[0].groups,
            vec![GroupSummary {
                id: GroupId(10),
                status: EntityStatus::Deleted,
            }]
        );

        let err = CompanyConnector::delete(&store, &deleted[0], no_side_effect())
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectorError::StillReferenced { .. }));
    }

    #[tokio::test]
    async fn test_list_page_orders_by_id() {
        let store = store().await;
        for id in [3, 1, 2] {
            store.insert_company(&testing::company(id)).await.unwrap();
        }

        let page = store.list_page(1, 5).await.unwrap();
        let ids: Vec<_> = page.iter().map(|c| c.id.0).collect();
        assert_eq!(ids, vec![2, 3]);
    }

    #[tokio::test]
    async fn test_side_effect_failure_rolls_back() {
        let store = store().await;
        let company = testing::company(1);
        store.insert_company(&company).await.unwrap();
        store.insert_group(&testing::group(10, company.id)).await.unwrap();
        let collection = testing::signed_collection(100, GroupId(10), Duration::days(5));
        store.insert_collection(&collection).await.unwrap();

        let err = DocumentCollectionConnector::delete(
            &store,
            &collection,
            async { Err(anyhow::anyhow!("bucket unavailable")) }.boxed(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ConnectorError::SideEffect { .. }));

        let refs = GroupConnector::references(&store, GroupId(10)).await.unwrap();
        assert_eq!(refs.document_collections, 1);

        DocumentCollectionConnector::delete(&store, &collection, no_side_effect())
            .await
            .unwrap();
        let err = DocumentCollectionConnector::delete(&store, &collection, no_side_effect())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_list_expired_filters_by_anchor_and_company() {
        let store = store().await;
        store.insert_company(&testing::company(1)).await.unwrap();
        store.insert_company(&testing::company(2)).await.unwrap();
        store.insert_group(&testing::group(10, CompanyId(1))).await.unwrap();
        store.insert_group(&testing::group(20, CompanyId(2))).await.unwrap();

        let mut old = testing::signed_collection(100, GroupId(10), Duration::days(40));
        old.documents = vec![testing::document(1000, TemplateId(5))];
        store.insert_collection(&old).await.unwrap();
        store
            .insert_collection(&testing::signed_collection(101, GroupId(10), Duration::days(10)))
            .await
            .unwrap();
        store
            .insert_collection(&testing::signed_collection(200, GroupId(20), Duration::days(40)))
            .await
            .unwrap();
        store
            .insert_collection(&testing::draft_collection(102, GroupId(10), Duration::days(40)))
            .await
            .unwrap();

        let cutoff = Utc::now() - Duration::days(30);
        let expired = store
            .list_expired(CompanyId(1), RetentionClass::Signed, cutoff)
            .await
            .unwrap();

        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, CollectionId(100));
        assert_eq!(expired[0].documents.len(), 1);
        assert_eq!(expired[0].status, CollectionStatus::Signed);

        let unsigned = store
            .list_expired(CompanyId(1), RetentionClass::Unsigned, cutoff)
            .await
            .unwrap();
        assert_eq!(unsigned.len(), 1);
        assert_eq!(unsigned[0].id, CollectionId(102));
    }

    #[tokio::test]
    async fn test_contact_batch_and_group_references() {
        let store = store().await;
        store.insert_company(&testing::company(1)).await.unwrap();
        store.insert_group(&testing::group(10, CompanyId(1))).await.unwrap();
        store.insert_group(&testing::group(11, CompanyId(1))).await.unwrap();

        let mut kept = testing::contact(30, GroupId(10));
        kept.seals = vec![SealId(1)];
        store.insert_contact(&kept).await.unwrap();
        store.insert_signer(kept.id).await.unwrap();
        store.insert_contact(&testing::contact(31, GroupId(10))).await.unwrap();
        store.link_contact_to_group(ContactId(31), GroupId(11)).await.unwrap();

        let refs = GroupConnector::references(&store, GroupId(11)).await.unwrap();
        assert_eq!(refs.additional_mappings, 1);

        let candidates = ContactConnector::list_active_by_group(&store, GroupId(10))
            .await
            .unwrap();
        assert_eq!(candidates[0].signer_references, 1);
        assert_eq!(candidates[0].seals, vec![SealId(1)]);

        let removed = store.delete_batch(&candidates).await.unwrap();
        assert_eq!(removed, vec![ContactId(31)]);

        let refs = GroupConnector::references(&store, GroupId(11)).await.unwrap();
        assert!(refs.is_clear());
        let refs = GroupConnector::references(&store, GroupId(10)).await.unwrap();
        assert_eq!(refs.contacts, 1);
    }

    #[tokio::test]
    async fn test_user_reassignment_and_delete() {
        let store = store().await;
        store.insert_company(&testing::company(1)).await.unwrap();
        store.insert_group(&testing::group(10, CompanyId(1))).await.unwrap();
        store.insert_group(&testing::group(11, CompanyId(1))).await.unwrap();

        let mut user = testing::user(40, GroupId(10), ProgramTier::FreeTrial);
        user.additional_group_mappings = vec![GroupId(11)];
        store.insert_user(&user).await.unwrap();
        store.insert_password_history(user.id, "hash").await.unwrap();

        store.reassign_primary_group(user.id, GroupId(11)).await.unwrap();

        let group = GroupConnector::read(&store, GroupId(11)).await.unwrap().unwrap();
        assert_eq!(group.users.len(), 1);
        assert!(group.users[0].additional_group_mappings.is_empty());

        UserConnector::delete(&store, &group.users[0], no_side_effect())
            .await
            .unwrap();
        let history: i64 = query_scalar("SELECT COUNT(*) FROM password_history")
            .fetch_one(&store.pool)
            .await
            .unwrap();
        assert_eq!(history, 0);

        let err = store
            .reassign_primary_group(user.id, GroupId(10))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_template_fields_round_trip_and_unreferenced_listing() {
        let store = store().await;
        store.insert_company(&testing::company(1)).await.unwrap();
        store.insert_group(&testing::group(10, CompanyId(1))).await.unwrap();

        let mut template = testing::template(20, GroupId(10));
        template.status = EntityStatus::Deleted;
        store.insert_template(&template).await.unwrap();

        let read = TemplateConnector::read(&store, template.id).await.unwrap().unwrap();
        assert_eq!(read, template);

        let candidates = TemplateConnector::list_deleted_unreferenced(&store)
            .await
            .unwrap();
        assert_eq!(candidates.len(), 1);

        let mut collection = testing::draft_collection(100, GroupId(10), Duration::hours(1));
        collection.documents = vec![testing::document(1000, template.id)];
        store.insert_collection(&collection).await.unwrap();

        let candidates = TemplateConnector::list_deleted_unreferenced(&store)
            .await
            .unwrap();
        assert!(candidates.is_empty());

        let mut other = testing::template(21, GroupId(10));
        other.status = EntityStatus::Deleted;
        store.insert_template(&other).await.unwrap();
        let in_group = TemplateConnector::list_unreferenced_by_group(&store, GroupId(10))
            .await
            .unwrap();
        assert_eq!(
            in_group.iter().map(|t| t.id).collect::<Vec<_>>(),
            vec![TemplateId(21)]
        );
    }
}
