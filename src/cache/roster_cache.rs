use crate::error::StoreError;
use crate::services::traits::RosterProvider;
use crate::types::ReferenceIdentity;
use std::sync::{Arc, RwLock};

/// Shared roster snapshot in front of a slower provider. Pipelines read the
/// same `Arc` until an import calls [`RosterCache::invalidate`].
pub struct RosterCache {
    source: Arc<dyn RosterProvider>,
    snapshot: RwLock<Option<Arc<Vec<ReferenceIdentity>>>>,
}

impl RosterCache {
    pub fn new(source: Arc<dyn RosterProvider>) -> Self {
        RosterCache {
            source,
            snapshot: RwLock::new(None),
        }
    }

    pub fn invalidate(&self) {
        if let Ok(mut guard) = self.snapshot.write() {
            *guard = None;
        }
    }
}

impl RosterProvider for RosterCache {
    fn list_reference_identities(&self) -> Result<Arc<Vec<ReferenceIdentity>>, StoreError> {
        if let Some(cached) = self.snapshot.read().ok().and_then(|g| g.clone()) {
            return Ok(cached);
        }
        let fresh = self.source.list_reference_identities()?;
        if let Ok(mut guard) = self.snapshot.write() {
            *guard = Some(Arc::clone(&fresh));
        }
        tracing::debug!(entries = fresh.len(), "roster snapshot loaded");
        Ok(fresh)
    }
}
