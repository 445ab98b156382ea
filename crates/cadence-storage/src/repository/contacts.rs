//! Contact directory
//!
//! Read-only view over the address book and the suppression list. The
//! address book is owned by another system; snapshots only read from it.

use async_trait::async_trait;
use cadence_common::types::ContactId;
use cadence_common::{Error, Result};
use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use crate::db::DatabasePool;
use crate::models::{Contact, RecipientFilter};

/// Contact directory trait
#[async_trait]
pub trait ContactDirectory: Send + Sync {
    async fn get(&self, id: ContactId) -> Result<Option<Contact>>;
    /// Contacts matching `filter`, oldest first
    async fn find(&self, filter: &RecipientFilter) -> Result<Vec<Contact>>;
    async fn is_suppressed(&self, address: &str) -> Result<bool>;
}

#[derive(FromRow)]
struct ContactRow {
    id: Uuid,
    email: String,
    first_name: Option<String>,
    last_name: Option<String>,
    tags: Vec<String>,
    fields: serde_json::Value,
    unsubscribed: bool,
    suppressed: bool,
    created_at: DateTime<Utc>,
}

impl From<ContactRow> for Contact {
    fn from(row: ContactRow) -> Self {
        Contact {
            id: row.id,
            email: row.email,
            first_name: row.first_name,
            last_name: row.last_name,
            tags: row.tags,
            fields: row.fields,
            unsubscribed: row.unsubscribed,
            suppressed: row.suppressed,
            created_at: row.created_at,
        }
    }
}

const CONTACT_COLUMNS: &str = r#"
    c.id, c.email, c.first_name, c.last_name, c.tags, c.fields, c.unsubscribed,
    EXISTS(SELECT 1 FROM suppressions s WHERE s.email = lower(trim(c.email))) AS suppressed,
    c.created_at
"#;

/// Database contact directory
pub struct DbContactDirectory {
    pool: DatabasePool,
}

impl DbContactDirectory {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ContactDirectory for DbContactDirectory {
    async fn get(&self, id: ContactId) -> Result<Option<Contact>> {
        let sql = format!("SELECT {} FROM contacts c WHERE c.id = $1", CONTACT_COLUMNS);
        let row = sqlx::query_as::<_, ContactRow>(&sql)
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        Ok(row.map(Contact::from))
    }

    async fn find(&self, filter: &RecipientFilter) -> Result<Vec<Contact>> {
        let sql = format!(
            r#"
            SELECT {} FROM contacts c
            WHERE (cardinality($1::text[]) = 0 OR c.tags && $1)
              AND c.tags @> $2::text[]
              AND NOT (c.tags && $3::text[])
              AND ($4::uuid[] IS NULL OR c.id = ANY($4))
            ORDER BY c.created_at ASC, c.id ASC
            "#,
            CONTACT_COLUMNS
        );
        let rows = sqlx::query_as::<_, ContactRow>(&sql)
            .bind(&filter.tags_any)
            .bind(&filter.tags_all)
            .bind(&filter.exclude_tags)
            .bind(&filter.contact_ids)
            .fetch_all(self.pool.pool())
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        Ok(rows.into_iter().map(Contact::from).collect())
    }

    async fn is_suppressed(&self, address: &str) -> Result<bool> {
        sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS(SELECT 1 FROM suppressions WHERE email = lower(trim($1)))
                OR EXISTS(SELECT 1 FROM contacts WHERE lower(trim(email)) = lower(trim($1)) AND unsubscribed)
            "#,
        )
        .bind(address)
        .fetch_one(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))
    }
}
