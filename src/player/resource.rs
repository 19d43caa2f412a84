use bytes::Bytes;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tracing::trace;
use uuid::Uuid;

const BLOB_PREFIX: &str = "blob:tourplay/";

/// Process-local store for fetched stream data, addressed by `blob:` URLs.
#[derive(Clone, Default)]
pub struct ResourceRegistry {
    inner: Arc<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    entries: Mutex<HashMap<Uuid, Bytes>>,
    created: AtomicU64,
    revoked: AtomicU64,
}

impl RegistryInner {
    fn entries(&self) -> MutexGuard<'_, HashMap<Uuid, Bytes>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `data` and returns the only handle that can revoke it.
    pub fn create(&self, data: Bytes) -> ResourceHandle {
        let id = Uuid::new_v4();
        let len = data.len();
        self.inner.entries().insert(id, data);
        self.inner.created.fetch_add(1, Ordering::SeqCst);
        trace!("Created resource {} ({} bytes)", id, len);

        ResourceHandle {
            inner: Arc::new(HandleInner {
                id,
                url: format!("{}{}", BLOB_PREFIX, id),
                len,
                revoked: AtomicBool::new(false),
                registry: Arc::downgrade(&self.inner),
            }),
        }
    }

    /// Data behind a live `blob:` URL.
    pub fn resolve(&self, url: &str) -> Option<Bytes> {
        let id = parse_blob_url(url)?;
        self.inner.entries().get(&id).cloned()
    }

    pub fn live_count(&self) -> usize {
        self.inner.entries().len()
    }

    pub fn created_count(&self) -> u64 {
        self.inner.created.load(Ordering::SeqCst)
    }

    pub fn revoked_count(&self) -> u64 {
        self.inner.revoked.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for ResourceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceRegistry")
            .field("live", &self.live_count())
            .field("created", &self.created_count())
            .field("revoked", &self.revoked_count())
            .finish()
    }
}

fn parse_blob_url(url: &str) -> Option<Uuid> {
    url.strip_prefix(BLOB_PREFIX)
        .and_then(|id| Uuid::parse_str(id).ok())
}

/// Revocable reference to fetched stream data. Clones share one revocation;
/// dropping the last clone revokes.
#[derive(Clone)]
pub struct ResourceHandle {
    inner: Arc<HandleInner>,
}

struct HandleInner {
    id: Uuid,
    url: String,
    len: usize,
    revoked: AtomicBool,
    registry: Weak<RegistryInner>,
}

impl HandleInner {
    fn revoke(&self) -> bool {
        if self.revoked.swap(true, Ordering::SeqCst) {
            return false;
        }
        if let Some(registry) = self.registry.upgrade() {
            registry.entries().remove(&self.id);
            registry.revoked.fetch_add(1, Ordering::SeqCst);
        }
        trace!("Revoked resource {}", self.id);
        true
    }
}

impl Drop for HandleInner {
    fn drop(&mut self) {
        self.revoke();
    }
}

impl ResourceHandle {
    pub fn url(&self) -> &str {
        &self.inner.url
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn len(&self) -> usize {
        self.inner.len
    }

    pub fn is_empty(&self) -> bool {
        self.inner.len == 0
    }

    pub fn is_revoked(&self) -> bool {
        self.inner.revoked.load(Ordering::SeqCst)
    }

    /// Returns `true` only for the call that actually revoked.
    pub fn revoke(&self) -> bool {
        self.inner.revoke()
    }
}

impl fmt::Debug for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceHandle")
            .field("url", &self.inner.url)
            .field("len", &self.inner.len)
            .field("revoked", &self.is_revoked())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_live_handle() {
        let registry = ResourceRegistry::new();
        let handle = registry.create(Bytes::from_static(b"mp4 bytes"));

        assert!(handle.url().starts_with("blob:tourplay/"));
        assert_eq!(handle.len(), 9);
        assert_eq!(
            registry.resolve(handle.url()),
            Some(Bytes::from_static(b"mp4 bytes"))
        );
        assert_eq!(registry.live_count(), 1);
    }

    #[test]
    fn test_revoke_is_idempotent() {
        let registry = ResourceRegistry::new();
        let handle = registry.create(Bytes::from_static(b"data"));
        let clone = handle.clone();

        assert!(handle.revoke());
        assert!(!handle.revoke());
        assert!(!clone.revoke());
        assert!(clone.is_revoked());

        drop(handle);
        drop(clone);
        assert_eq!(registry.revoked_count(), 1);
        assert_eq!(registry.live_count(), 0);
        assert_eq!(registry.resolve("blob:tourplay/not-a-uuid"), None);
    }

    #[test]
    fn test_dropping_last_clone_revokes() {
        let registry = ResourceRegistry::new();
        let handle = registry.create(Bytes::from_static(b"data"));
        let url = handle.url().to_string();
        let clone = handle.clone();

        drop(handle);
        assert!(registry.resolve(&url).is_some());
        drop(clone);
        assert!(registry.resolve(&url).is_none());
        assert_eq!(registry.revoked_count(), 1);
    }

    #[test]
    fn test_handle_outliving_registry() {
        let registry = ResourceRegistry::new();
        let handle = registry.create(Bytes::from_static(b"data"));
        drop(registry);
        assert!(handle.revoke());
        assert!(handle.is_revoked());
    }
}
