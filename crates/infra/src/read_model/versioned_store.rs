use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use thiserror::Error;

use catchup_core::EntityId;
use catchup_messaging::VersionedProjection;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReadStoreError {
    /// The backing store could not be reached. Readers treat this as transient.
    #[error("read store unavailable: {0}")]
    Unavailable(String),

    /// A writer tried to move an entity backwards (or sideways) in version order.
    #[error("stale write for {entity_id}: version {found} is not newer than {current}")]
    StaleWrite {
        entity_id: EntityId,
        current: u64,
        found: u64,
    },
}

/// Opaque versioned key/value lookup backing a read model.
///
/// Must be safe for unbounded concurrent readers. Only the processor writes; the
/// write side is not part of this trait because pollers never write.
#[async_trait]
pub trait VersionedReadStore<T>: Send + Sync {
    /// Latest known projection for `entity_id`, or `None` when the entity has not
    /// been projected yet.
    async fn get_by_id(
        &self,
        entity_id: EntityId,
    ) -> Result<Option<VersionedProjection<T>>, ReadStoreError>;
}

#[async_trait]
impl<T, S> VersionedReadStore<T> for Arc<S>
where
    T: Send + 'static,
    S: VersionedReadStore<T> + ?Sized,
{
    async fn get_by_id(
        &self,
        entity_id: EntityId,
    ) -> Result<Option<VersionedProjection<T>>, ReadStoreError> {
        (**self).get_by_id(entity_id).await
    }
}

/// In-memory versioned store for tests/dev.
///
/// Versions start at 1 for the first write and grow by one per `apply`.
#[derive(Debug)]
pub struct InMemoryVersionedStore<T> {
    inner: RwLock<HashMap<EntityId, VersionedProjection<T>>>,
    failing_reads: AtomicU32,
}

impl<T> InMemoryVersionedStore<T> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
            failing_reads: AtomicU32::new(0),
        }
    }

    /// Make the next `n` reads fail with [`ReadStoreError::Unavailable`].
    pub fn fail_next_reads(&self, n: u32) {
        self.failing_reads.store(n, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.inner.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn take_injected_failure(&self) -> bool {
        self.failing_reads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl<T> Default for InMemoryVersionedStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> InMemoryVersionedStore<T> {
    /// Mutate (or create) an entity's state and bump its version by one.
    ///
    /// Returns the new version.
    pub fn apply(
        &self,
        entity_id: EntityId,
        f: impl FnOnce(Option<&T>) -> T,
    ) -> Result<u64, ReadStoreError> {
        let mut map = self
            .inner
            .write()
            .map_err(|_| ReadStoreError::Unavailable("lock poisoned".to_string()))?;

        let current = map.get(&entity_id);
        let version = current.map(|p| p.version()).unwrap_or(0) + 1;
        let state = f(current.map(|p| p.state()));
        map.insert(entity_id, VersionedProjection::new(entity_id, version, state));
        Ok(version)
    }

    /// Store a projection with an explicit version. The version must be strictly
    /// newer than what is already stored.
    pub fn put(&self, projection: VersionedProjection<T>) -> Result<(), ReadStoreError> {
        let mut map = self
            .inner
            .write()
            .map_err(|_| ReadStoreError::Unavailable("lock poisoned".to_string()))?;

        let entity_id = projection.entity_id();
        if let Some(current) = map.get(&entity_id) {
            if projection.version() <= current.version() {
                return Err(ReadStoreError::StaleWrite {
                    entity_id,
                    current: current.version(),
                    found: projection.version(),
                });
            }
        }
        map.insert(entity_id, projection);
        Ok(())
    }

    /// Synchronous read that bypasses failure injection (handlers, assertions).
    pub fn snapshot(&self, entity_id: EntityId) -> Option<VersionedProjection<T>> {
        self.inner.read().ok()?.get(&entity_id).cloned()
    }
}

#[async_trait]
impl<T> VersionedReadStore<T> for InMemoryVersionedStore<T>
where
    T: Clone + Send + Sync + 'static,
{
    async fn get_by_id(
        &self,
        entity_id: EntityId,
    ) -> Result<Option<VersionedProjection<T>>, ReadStoreError> {
        if self.take_injected_failure() {
            return Err(ReadStoreError::Unavailable("injected failure".to_string()));
        }

        let map = self
            .inner
            .read()
            .map_err(|_| ReadStoreError::Unavailable("lock poisoned".to_string()))?;
        Ok(map.get(&entity_id).cloned())
    }
}
