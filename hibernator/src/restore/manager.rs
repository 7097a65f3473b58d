use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use super::{merge, RestoreData, RestoreQuality};
use crate::constants::restore::{
    DOCUMENT_PREFIX, MAX_TARGET_PAYLOAD_BYTES, PAYLOAD_KEY, RESTORED_MARKER_PREFIX,
};
use crate::errors::{HibernatorError, Result, StoreError};
use crate::store::{modify_document, Document, DocumentStore};

/// Quality-aware restore point store keyed by `(namespace, plan, target)`
pub struct RestoreManager {
    store: Arc<dyn DocumentStore>,
}

impl RestoreManager {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Current restore data of a target, `None` when nothing was captured yet
    pub async fn load(
        &self,
        namespace: &str,
        plan: &str,
        target: &str,
    ) -> Result<Option<RestoreData>> {
        let name = target_document_name(plan, target);
        match self.store.get(namespace, &name).await? {
            Some(document) => decode_payload(&document),
            None => Ok(None),
        }
    }

    /// Overwrite a target's restore data unconditionally
    #[instrument(skip(self, data), fields(target = %data.target))]
    pub async fn save(
        &self,
        namespace: &str,
        plan: &str,
        mut data: RestoreData,
    ) -> Result<RestoreData> {
        let name = target_document_name(plan, &data.target);

        let saved = modify_document(self.store.as_ref(), namespace, &name, |document| {
            let previous = decode_payload(document)?;
            data.version = previous.as_ref().map_or(1, |p| p.version + 1);
            document
                .data
                .insert(PAYLOAD_KEY.to_string(), encode_payload(&data)?);
            Ok(Some(data.clone()))
        })
        .await?;

        saved.ok_or_else(|| HibernatorError::Other(format!("save of '{}' was skipped", name)))
    }

    /// Merge `incoming` into the stored record without losing high-fidelity values
    #[instrument(skip(self, incoming), fields(target = %incoming.target, live = incoming.is_live))]
    pub async fn save_or_preserve(
        &self,
        namespace: &str,
        plan: &str,
        incoming: RestoreData,
    ) -> Result<RestoreData> {
        let name = target_document_name(plan, &incoming.target);

        let saved = modify_document(self.store.as_ref(), namespace, &name, |document| {
            let merged = match decode_payload(document)? {
                Some(existing) => {
                    if existing.is_live && !incoming.is_live {
                        debug!(
                            "Preserving live restore data for {} against a non-live capture",
                            incoming.target
                        );
                    }
                    merge(&existing, incoming.clone())
                }
                None => RestoreData {
                    version: 1,
                    ..incoming.clone()
                },
            };
            document
                .data
                .insert(PAYLOAD_KEY.to_string(), encode_payload(&merged)?);
            Ok(Some(merged))
        })
        .await?;

        let merged = saved
            .ok_or_else(|| HibernatorError::Other(format!("save of '{}' was skipped", name)))?;
        info!(
            "Stored restore data for {} (version {}, {} resources, live: {})",
            merged.target,
            merged.version,
            merged.state.len(),
            merged.is_live
        );
        Ok(merged)
    }

    /// Flag a target as restored and downgrade its record to non-live
    #[instrument(skip(self))]
    pub async fn mark_target_restored(
        &self,
        namespace: &str,
        plan: &str,
        target: &str,
    ) -> Result<()> {
        let payload_name = target_document_name(plan, target);
        modify_document(self.store.as_ref(), namespace, &payload_name, |document| {
            match decode_payload(document)? {
                Some(mut data) if data.is_live => {
                    data.is_live = false;
                    document
                        .data
                        .insert(PAYLOAD_KEY.to_string(), encode_payload(&data)?);
                    Ok(Some(()))
                }
                _ => Ok(None),
            }
        })
        .await?;

        let marker = marker_key(target);
        modify_document(self.store.as_ref(), namespace, &plan_document_name(plan), |document| {
            document.data.insert(marker.clone(), "true".to_string());
            Ok(Some(()))
        })
        .await?;

        debug!("Marked {} restored for plan {}", target, plan);
        Ok(())
    }

    /// True once every named target carries its `restored-<target>` marker
    pub async fn mark_all_targets_restored(
        &self,
        namespace: &str,
        plan: &str,
        targets: &[String],
    ) -> Result<bool> {
        let document = match self.store.get(namespace, &plan_document_name(plan)).await? {
            Some(document) => document,
            None => return Ok(targets.is_empty()),
        };

        Ok(targets.iter().all(|target| {
            document
                .data
                .get(&marker_key(target))
                .map(|v| v == "true")
                .unwrap_or(false)
        }))
    }

    /// Clear all restored markers of a plan for the next cycle
    #[instrument(skip(self))]
    pub async fn unlock_restore_data(&self, namespace: &str, plan: &str) -> Result<()> {
        let key = plan_document_name(plan);
        let cleared = modify_document(self.store.as_ref(), namespace, &key, |document| {
            if document.resource_version == 0 {
                return Ok(None);
            }
            let before = document.data.len();
            document
                .data
                .retain(|key, _| !key.starts_with(RESTORED_MARKER_PREFIX));
            Ok(Some(before - document.data.len()))
        })
        .await?;

        if let Some(count) = cleared {
            info!("Unlocked restore data for plan {} ({} markers cleared)", plan, count);
        }
        Ok(())
    }

    /// True when any target of the plan holds restore data
    pub async fn has_restore_data(&self, namespace: &str, plan: &str) -> Result<bool> {
        Ok(self.restore_quality(namespace, plan).await? != RestoreQuality::Empty)
    }

    pub async fn restore_quality(&self, namespace: &str, plan: &str) -> Result<RestoreQuality> {
        let mut quality = RestoreQuality::Empty;
        for document in self.target_documents(namespace, plan).await? {
            match decode_payload(&document)? {
                Some(data) if data.state.is_empty() => {}
                Some(data) if data.is_live => return Ok(RestoreQuality::Live),
                Some(_) => quality = RestoreQuality::Stale,
                None => {}
            }
        }
        Ok(quality)
    }

    /// Names of targets that have a restore record
    pub async fn list_targets(&self, namespace: &str, plan: &str) -> Result<Vec<String>> {
        let prefix = target_document_prefix(plan);
        Ok(self
            .target_documents(namespace, plan)
            .await?
            .into_iter()
            .filter_map(|d| d.name.strip_prefix(&prefix).map(str::to_string))
            .collect())
    }

    /// Drop one target's restore record and marker
    pub async fn delete_target(&self, namespace: &str, plan: &str, target: &str) -> Result<bool> {
        let removed = self
            .store
            .delete(namespace, &target_document_name(plan, target))
            .await?;

        let marker = marker_key(target);
        modify_document(self.store.as_ref(), namespace, &plan_document_name(plan), |document| {
            Ok(document.data.remove(&marker).map(|_| ()))
        })
        .await?;

        if removed {
            warn!("Deleted restore data for {} in plan {}", target, plan);
        }
        Ok(removed)
    }

    async fn target_documents(&self, namespace: &str, plan: &str) -> Result<Vec<Document>> {
        self.store.list(namespace, &target_document_prefix(plan)).await
    }
}

fn plan_document_name(plan: &str) -> String {
    format!("{}{}", DOCUMENT_PREFIX, plan)
}

fn target_document_prefix(plan: &str) -> String {
    format!("{}{}.", DOCUMENT_PREFIX, plan)
}

fn target_document_name(plan: &str, target: &str) -> String {
    format!("{}{}", target_document_prefix(plan), target)
}

fn marker_key(target: &str) -> String {
    format!("{}{}", RESTORED_MARKER_PREFIX, target)
}

fn decode_payload(document: &Document) -> Result<Option<RestoreData>> {
    match document.data.get(PAYLOAD_KEY) {
        Some(raw) => serde_json::from_str(raw).map(Some).map_err(|e| {
            HibernatorError::Store(StoreError::Serialization {
                key: document.key(),
                reason: e.to_string(),
            })
        }),
        None => Ok(None),
    }
}

fn encode_payload(data: &RestoreData) -> Result<String> {
    let encoded = serde_json::to_string(data).map_err(|e| {
        HibernatorError::Store(StoreError::Serialization {
            key: data.target.clone(),
            reason: e.to_string(),
        })
    })?;

    if encoded.len() > MAX_TARGET_PAYLOAD_BYTES {
        return Err(HibernatorError::SizeExceeded {
            key: data.target.clone(),
            size: encoded.len(),
            limit: MAX_TARGET_PAYLOAD_BYTES,
        });
    }
    Ok(encoded)
}
