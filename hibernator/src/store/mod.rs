//! Namespaced key/value document storage
//!
//! Plans and restore points both live in documents addressed by `(namespace, name)`.
//! A document is a flat map of string keys to string values. There are no multi-key
//! transactions; every write carries the `resource_version` it was based on and fails
//! with a conflict when someone else wrote in between.
//!
//! Two backends are provided:
//!
//! - [`InMemoryDocumentStore`]: process-local, used by tests and embedders
//! - [`SqliteDocumentStore`]: durable, used by the daemon

pub mod memory;
pub mod sqlite;

pub use memory::InMemoryDocumentStore;
pub use sqlite::SqliteDocumentStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

use crate::constants::store::{CONFLICT_BACKOFF_MILLIS, CONFLICT_RETRY_ATTEMPTS, MAX_DOCUMENT_BYTES};
use crate::errors::{HibernatorError, Result};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    pub namespace: String,
    pub name: String,
    pub data: BTreeMap<String, String>,
    /// Optimistic concurrency token; 0 for documents not yet created
    pub resource_version: u64,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Document {
    pub fn new(namespace: &str, name: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
            data: BTreeMap::new(),
            resource_version: 0,
            updated_at: None,
        }
    }

    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }

    /// Approximate stored size: keys plus values
    pub fn size_bytes(&self) -> usize {
        self.data.iter().map(|(k, v)| k.len() + v.len()).sum()
    }

    pub(crate) fn check_size(&self) -> Result<()> {
        let size = self.size_bytes();
        if size > MAX_DOCUMENT_BYTES {
            return Err(HibernatorError::SizeExceeded {
                key: self.key(),
                size,
                limit: MAX_DOCUMENT_BYTES,
            });
        }
        Ok(())
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fetch a document; `Ok(None)` when it does not exist
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Document>>;

    /// Create a document; conflicts if it already exists
    async fn create(&self, document: Document) -> Result<Document>;

    /// Replace a document if its stored version still equals `document.resource_version`
    async fn update(&self, document: Document) -> Result<Document>;

    /// Delete a document; returns false when it did not exist
    async fn delete(&self, namespace: &str, name: &str) -> Result<bool>;

    /// All documents in `namespace` whose name starts with `prefix`
    async fn list(&self, namespace: &str, prefix: &str) -> Result<Vec<Document>>;
}

/// Read-modify-write a document under optimistic concurrency.
///
/// `mutate` receives the current document (an empty one when absent, with
/// `resource_version == 0`) and returns `Ok(None)` to skip the write. On a version
/// conflict the document is re-read and `mutate` runs again.
pub async fn modify_document<S, F, T>(
    store: &S,
    namespace: &str,
    name: &str,
    mut mutate: F,
) -> Result<Option<T>>
where
    S: DocumentStore + ?Sized,
    F: FnMut(&mut Document) -> Result<Option<T>>,
{
    for attempt in 1..=CONFLICT_RETRY_ATTEMPTS {
        let mut document = store
            .get(namespace, name)
            .await?
            .unwrap_or_else(|| Document::new(namespace, name));

        let value = match mutate(&mut document)? {
            Some(value) => value,
            None => return Ok(None),
        };

        let written = if document.resource_version == 0 {
            store.create(document).await
        } else {
            store.update(document).await
        };

        match written {
            Ok(_) => return Ok(Some(value)),
            Err(e) if e.is_conflict() => {
                debug!(
                    "Conflict writing {}/{} (attempt {}/{}): {}",
                    namespace, name, attempt, CONFLICT_RETRY_ATTEMPTS, e
                );
                let pause = CONFLICT_BACKOFF_MILLIS * u64::from(attempt);
                tokio::time::sleep(Duration::from_millis(pause)).await;
            }
            Err(e) => return Err(e),
        }
    }

    Err(HibernatorError::conflict(
        format!("{}/{}", namespace, name),
        format!("gave up after {} conflicting attempts", CONFLICT_RETRY_ATTEMPTS),
    ))
}
