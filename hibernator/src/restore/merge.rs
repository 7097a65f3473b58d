use super::RestoreData;

/// Quality-aware, per-key merge of an incoming capture into an existing record.
///
/// - keys only in `incoming` are always admitted
/// - keys in both keep the existing value when a live record meets a non-live capture,
///   otherwise the incoming value wins
/// - keys only in `existing` survive
///
/// The merged record is live if either input was.
pub fn merge(existing: &RestoreData, incoming: RestoreData) -> RestoreData {
    let protect_existing = existing.is_live && !incoming.is_live;
    let mut state = existing.state.clone();

    for (key, value) in incoming.state {
        if protect_existing && state.contains_key(&key) {
            continue;
        }
        state.insert(key, value);
    }

    RestoreData {
        target: incoming.target,
        executor: incoming.executor,
        version: existing.version + 1,
        created_at: existing.created_at,
        is_live: existing.is_live || incoming.is_live,
        captured_at: incoming.captured_at.or_else(|| existing.captured_at.clone()),
        state,
    }
}
