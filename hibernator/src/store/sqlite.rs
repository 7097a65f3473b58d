//! SQLite-backed document store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Pool, Row, Sqlite, SqlitePool};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, error, info};

use super::{Document, DocumentStore};
use crate::errors::{HibernatorError, Result, StoreError};

pub struct SqliteDocumentStore {
    pool: Pool<Sqlite>,
}

impl SqliteDocumentStore {
    pub async fn new(database_path: &str) -> anyhow::Result<Self> {
        info!("Opening document store at {}", database_path);

        if let Some(parent) = Path::new(database_path).parent() {
            if !parent.as_os_str().is_empty() {
                if let Err(e) = tokio::fs::create_dir_all(parent).await {
                    error!("Failed to create parent directory {:?}: {}", parent, e);
                    return Err(e.into());
                }
            }
        }

        let database_url = format!("sqlite:{}?mode=rwc", database_path);
        let pool = SqlitePool::connect(&database_url).await.map_err(|e| {
            error!("Failed to connect to {}: {}", database_url, e);
            e
        })?;

        let store = Self { pool };
        store.initialize_tables().await?;

        info!("Document store ready");
        Ok(store)
    }

    async fn initialize_tables(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                namespace TEXT NOT NULL,
                name TEXT NOT NULL,
                data TEXT NOT NULL,
                resource_version INTEGER NOT NULL,
                updated_at DATETIME NOT NULL,
                PRIMARY KEY (namespace, name)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        debug!("documents table ready");
        Ok(())
    }

    fn encode_data(document: &Document) -> Result<String> {
        serde_json::to_string(&document.data).map_err(|e| {
            HibernatorError::Store(StoreError::Serialization {
                key: document.key(),
                reason: e.to_string(),
            })
        })
    }

    fn row_to_document(namespace: &str, name: &str, row: &SqliteRow) -> Result<Document> {
        let raw: String = row.try_get("data")?;
        let version: i64 = row.try_get("resource_version")?;
        let updated_at: DateTime<Utc> = row.try_get("updated_at")?;

        let data: BTreeMap<String, String> = serde_json::from_str(&raw).map_err(|e| {
            HibernatorError::Store(StoreError::Serialization {
                key: format!("{}/{}", namespace, name),
                reason: e.to_string(),
            })
        })?;

        Ok(Document {
            namespace: namespace.to_string(),
            name: name.to_string(),
            data,
            resource_version: version as u64,
            updated_at: Some(updated_at),
        })
    }
}

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Document>> {
        let row = sqlx::query(
            r#"
            SELECT data, resource_version, updated_at
            FROM documents
            WHERE namespace = ? AND name = ?
            "#,
        )
        .bind(namespace)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| Self::row_to_document(namespace, name, &r))
            .transpose()
    }

    async fn create(&self, mut document: Document) -> Result<Document> {
        document.check_size()?;
        let data = Self::encode_data(&document)?;
        let now = Utc::now();

        let result = sqlx::query(
            r#"
            INSERT INTO documents (namespace, name, data, resource_version, updated_at)
            VALUES (?, ?, ?, 1, ?)
            "#,
        )
        .bind(&document.namespace)
        .bind(&document.name)
        .bind(&data)
        .bind(now)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {
                debug!("Created document {}", document.key());
                document.resource_version = 1;
                document.updated_at = Some(now);
                Ok(document)
            }
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Err(
                HibernatorError::conflict(document.key(), "document already exists"),
            ),
            Err(e) => Err(e.into()),
        }
    }

    async fn update(&self, mut document: Document) -> Result<Document> {
        document.check_size()?;
        let data = Self::encode_data(&document)?;
        let now = Utc::now();

        let result = sqlx::query(
            r#"
            UPDATE documents
            SET data = ?, resource_version = resource_version + 1, updated_at = ?
            WHERE namespace = ? AND name = ? AND resource_version = ?
            "#,
        )
        .bind(&data)
        .bind(now)
        .bind(&document.namespace)
        .bind(&document.name)
        .bind(document.resource_version as i64)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return match self.get(&document.namespace, &document.name).await? {
                Some(current) => Err(HibernatorError::conflict(
                    document.key(),
                    format!(
                        "stale resource version {} (current {})",
                        document.resource_version, current.resource_version
                    ),
                )),
                None => Err(HibernatorError::Store(StoreError::NotFound {
                    key: document.key(),
                })),
            };
        }

        document.resource_version += 1;
        document.updated_at = Some(now);
        Ok(document)
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM documents WHERE namespace = ? AND name = ?")
            .bind(namespace)
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list(&self, namespace: &str, prefix: &str) -> Result<Vec<Document>> {
        let rows = sqlx::query(
            r#"
            SELECT name, data, resource_version, updated_at
            FROM documents
            WHERE namespace = ? AND substr(name, 1, length(?)) = ?
            ORDER BY name
            "#,
        )
        .bind(namespace)
        .bind(prefix)
        .bind(prefix)
        .fetch_all(&self.pool)
        .await?;

        let mut documents = Vec::with_capacity(rows.len());
        for row in rows {
            let name: String = row.try_get("name")?;
            documents.push(Self::row_to_document(namespace, &name, &row)?);
        }
        Ok(documents)
    }
}
