//! Plan persistence on top of the document store.

use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

use super::{Plan, PlanMetadata, PlanSpec, PlanStatus};
use crate::constants::plan::DOCUMENT_PREFIX;
use crate::errors::{HibernatorError, Result, StoreError};
use crate::store::{modify_document, Document, DocumentStore};

const SPEC_KEY: &str = "spec";
const STATUS_KEY: &str = "status";
const ANNOTATIONS_KEY: &str = "annotations";

pub struct PlanRepository {
    store: Arc<dyn DocumentStore>,
}

impl PlanRepository {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    pub async fn get(&self, namespace: &str, name: &str) -> Result<Option<Plan>> {
        match self.store.get(namespace, &document_name(name)).await? {
            Some(document) => decode_plan(&document).map(Some),
            None => Ok(None),
        }
    }

    pub async fn list(&self, namespace: &str) -> Result<Vec<Plan>> {
        self.store
            .list(namespace, DOCUMENT_PREFIX)
            .await?
            .iter()
            .map(decode_plan)
            .collect()
    }

    /// Create the plan or replace its spec, keeping status and annotations
    pub async fn apply_spec(&self, namespace: &str, name: &str, spec: PlanSpec) -> Result<Plan> {
        let encoded = encode(name, &spec)?;

        let key = document_name(name);
        let created = modify_document(self.store.as_ref(), namespace, &key, |document| {
            let created = document.resource_version == 0;
            document.data.insert(SPEC_KEY.to_string(), encoded.clone());
            if created {
                document
                    .data
                    .insert(STATUS_KEY.to_string(), encode(name, &PlanStatus::default())?);
            }
            Ok(Some(created))
        })
        .await?;

        if created == Some(true) {
            info!("Registered plan {}/{}", namespace, name);
        } else {
            debug!("Updated spec of plan {}/{}", namespace, name);
        }

        self.get(namespace, name).await?.ok_or_else(|| {
            HibernatorError::Store(StoreError::NotFound {
                key: format!("{}/{}", namespace, name),
            })
        })
    }

    /// Apply `mutate` to the stored status, re-reading on conflict
    pub async fn update_status<F>(
        &self,
        namespace: &str,
        name: &str,
        mut mutate: F,
    ) -> Result<PlanStatus>
    where
        F: FnMut(&mut PlanStatus),
    {
        let key = document_name(name);
        let updated = modify_document(self.store.as_ref(), namespace, &key, |document| {
            if document.resource_version == 0 {
                return Err(HibernatorError::Store(StoreError::NotFound { key: document.key() }));
            }
            let mut status: PlanStatus = decode_key(document, STATUS_KEY)?.unwrap_or_default();
            mutate(&mut status);
            document
                .data
                .insert(STATUS_KEY.to_string(), encode(name, &status)?);
            Ok(Some(status))
        })
        .await?;

        updated.ok_or_else(|| {
            HibernatorError::Other(format!("status update of {} was skipped", name))
        })
    }

    /// Set (`Some`) or remove (`None`) annotations in one write
    pub async fn patch_annotations(
        &self,
        namespace: &str,
        name: &str,
        patch: BTreeMap<String, Option<String>>,
    ) -> Result<()> {
        modify_document(self.store.as_ref(), namespace, &document_name(name), |document| {
            if document.resource_version == 0 {
                return Err(HibernatorError::Store(StoreError::NotFound { key: document.key() }));
            }
            let mut annotations: BTreeMap<String, String> =
                decode_key(document, ANNOTATIONS_KEY)?.unwrap_or_default();

            for (key, value) in &patch {
                match value {
                    Some(v) => {
                        annotations.insert(key.clone(), v.clone());
                    }
                    None => {
                        annotations.remove(key);
                    }
                }
            }

            document
                .data
                .insert(ANNOTATIONS_KEY.to_string(), encode(name, &annotations)?);
            Ok(Some(()))
        })
        .await?;
        Ok(())
    }

    pub async fn delete(&self, namespace: &str, name: &str) -> Result<bool> {
        self.store.delete(namespace, &document_name(name)).await
    }
}

fn document_name(plan: &str) -> String {
    format!("{}{}", DOCUMENT_PREFIX, plan)
}

fn decode_plan(document: &Document) -> Result<Plan> {
    let name = document
        .name
        .strip_prefix(DOCUMENT_PREFIX)
        .unwrap_or(&document.name)
        .to_string();

    let spec: PlanSpec = decode_key(document, SPEC_KEY)?.ok_or_else(|| {
        HibernatorError::Store(StoreError::Serialization {
            key: document.key(),
            reason: "plan document has no spec".to_string(),
        })
    })?;

    Ok(Plan {
        metadata: PlanMetadata {
            namespace: document.namespace.clone(),
            name,
            annotations: decode_key(document, ANNOTATIONS_KEY)?.unwrap_or_default(),
            resource_version: document.resource_version,
        },
        spec,
        status: decode_key(document, STATUS_KEY)?.unwrap_or_default(),
    })
}

fn decode_key<T: serde::de::DeserializeOwned>(document: &Document, key: &str) -> Result<Option<T>> {
    match document.data.get(key) {
        Some(raw) => serde_json::from_str(raw).map(Some).map_err(|e| {
            HibernatorError::Store(StoreError::Serialization {
                key: format!("{}#{}", document.key(), key),
                reason: e.to_string(),
            })
        }),
        None => Ok(None),
    }
}

fn encode<T: serde::Serialize>(name: &str, value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| {
        HibernatorError::Store(StoreError::Serialization {
            key: name.to_string(),
            reason: e.to_string(),
        })
    })
}
