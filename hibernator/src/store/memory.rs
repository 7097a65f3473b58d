use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use super::{Document, DocumentStore};
use crate::errors::{HibernatorError, Result, StoreError};

/// Process-local document store with the same version semantics as the durable one
pub struct InMemoryDocumentStore {
    documents: Arc<RwLock<HashMap<(String, String), Document>>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self {
            documents: Arc::new(RwLock::new(HashMap::with_capacity(32))),
        }
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Document>> {
        let documents = self.documents.read().await;
        Ok(documents
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn create(&self, mut document: Document) -> Result<Document> {
        document.check_size()?;
        let mut documents = self.documents.write().await;
        let key = (document.namespace.clone(), document.name.clone());

        if documents.contains_key(&key) {
            return Err(HibernatorError::conflict(document.key(), "document already exists"));
        }

        document.resource_version = 1;
        document.updated_at = Some(Utc::now());
        documents.insert(key, document.clone());
        debug!("Created document {}", document.key());
        Ok(document)
    }

    async fn update(&self, mut document: Document) -> Result<Document> {
        document.check_size()?;
        let mut documents = self.documents.write().await;
        let key = (document.namespace.clone(), document.name.clone());

        let current = documents.get(&key).ok_or_else(|| {
            HibernatorError::Store(StoreError::NotFound { key: document.key() })
        })?;

        if current.resource_version != document.resource_version {
            return Err(HibernatorError::conflict(
                document.key(),
                format!(
                    "stale resource version {} (current {})",
                    document.resource_version, current.resource_version
                ),
            ));
        }

        document.resource_version += 1;
        document.updated_at = Some(Utc::now());
        documents.insert(key, document.clone());
        Ok(document)
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<bool> {
        let mut documents = self.documents.write().await;
        Ok(documents
            .remove(&(namespace.to_string(), name.to_string()))
            .is_some())
    }

    async fn list(&self, namespace: &str, prefix: &str) -> Result<Vec<Document>> {
        let documents = self.documents.read().await;
        let mut found: Vec<Document> = documents
            .values()
            .filter(|d| d.namespace == namespace && d.name.starts_with(prefix))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(found)
    }
}

impl Default for InMemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for InMemoryDocumentStore {
    fn clone(&self) -> Self {
        Self {
            documents: self.documents.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stale_update_conflicts() {
        let store = InMemoryDocumentStore::new();
        let created = store.create(Document::new("ns", "doc")).await.unwrap();
        assert_eq!(created.resource_version, 1);

        let mut first = created.clone();
        first.data.insert("a".to_string(), "1".to_string());
        store.update(first).await.unwrap();

        let mut second = created;
        second.data.insert("b".to_string(), "2".to_string());
        let err = store.update(second).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_duplicate_create_conflicts() {
        let store = InMemoryDocumentStore::new();
        store.create(Document::new("ns", "doc")).await.unwrap();
        assert!(store
            .create(Document::new("ns", "doc"))
            .await
            .unwrap_err()
            .is_conflict());
    }
}
