use serde::{Deserialize, Serialize};

use catchup_core::EntityId;

/// Read-only snapshot of an entity's state plus its version.
///
/// `version` increases by at least one every time command processing mutates
/// the entity. Two snapshots of the same entity are ordered by version only;
/// equal versions are assumed to carry identical state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionedProjection<T> {
    entity_id: EntityId,
    version: u64,
    state: T,
}

impl<T> VersionedProjection<T> {
    pub fn new(entity_id: EntityId, version: u64, state: T) -> Self {
        Self {
            entity_id,
            version,
            state,
        }
    }

    pub fn entity_id(&self) -> EntityId {
        self.entity_id
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn state(&self) -> &T {
        &self.state
    }

    pub fn into_state(self) -> T {
        self.state
    }

    /// True when this snapshot is strictly newer than `baseline`.
    pub fn is_newer_than(&self, baseline: u64) -> bool {
        self.version > baseline
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> VersionedProjection<U> {
        VersionedProjection {
            entity_id: self.entity_id,
            version: self.version,
            state: f(self.state),
        }
    }
}
