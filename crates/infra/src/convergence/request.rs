use catchup_core::EntityId;
use catchup_messaging::VersionedProjection;

use super::ConvergenceBudget;

/// Caller-supplied test over projection state ("is this a terminal state?").
pub type ExitPredicate<T> = Box<dyn Fn(&T) -> bool + Send + Sync>;

/// One convergence wait. Consumed by the poll call; never stored.
pub struct ConvergenceRequest<T> {
    entity_id: EntityId,
    baseline_version: u64,
    budget: ConvergenceBudget,
    exit_predicate: Option<ExitPredicate<T>>,
}

impl<T> core::fmt::Debug for ConvergenceRequest<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ConvergenceRequest")
            .field("entity_id", &self.entity_id)
            .field("baseline_version", &self.baseline_version)
            .field("budget", &self.budget)
            .field("exit_predicate", &self.exit_predicate.is_some())
            .finish()
    }
}

impl<T> ConvergenceRequest<T> {
    /// Wait for any version of `entity_id` newer than `baseline_version`.
    ///
    /// A baseline of 0 means any observed version counts as progress.
    pub fn new(entity_id: EntityId, baseline_version: u64, budget: ConvergenceBudget) -> Self {
        Self {
            entity_id,
            baseline_version,
            budget,
            exit_predicate: None,
        }
    }

    /// Only accept newer versions whose state satisfies `predicate`. Newer
    /// versions that fail it are intermediate states; polling continues against
    /// the original baseline.
    pub fn until(mut self, predicate: impl Fn(&T) -> bool + Send + Sync + 'static) -> Self {
        self.exit_predicate = Some(Box::new(predicate));
        self
    }

    pub fn entity_id(&self) -> EntityId {
        self.entity_id
    }

    pub fn baseline_version(&self) -> u64 {
        self.baseline_version
    }

    pub fn budget(&self) -> ConvergenceBudget {
        self.budget
    }

    pub(crate) fn accepts(&self, projection: &VersionedProjection<T>) -> bool {
        projection.is_newer_than(self.baseline_version)
            && self
                .exit_predicate
                .as_ref()
                .is_none_or(|accept| accept(projection.state()))
    }
}

/// Result of a convergence wait.
///
/// Only `Converged` carries a projection, and its version is always strictly
/// greater than the request's baseline.
#[must_use]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Convergence<T> {
    Converged(VersionedProjection<T>),
    /// Budget exhausted. `last_seen_version` is the newest version sampled, if any.
    TimedOut { last_seen_version: Option<u64> },
    /// The caller's cancellation token fired first.
    Cancelled,
}

impl<T> Convergence<T> {
    pub fn is_converged(&self) -> bool {
        matches!(self, Self::Converged(_))
    }

    pub fn projection(&self) -> Option<&VersionedProjection<T>> {
        match self {
            Self::Converged(p) => Some(p),
            _ => None,
        }
    }

    pub fn into_projection(self) -> Option<VersionedProjection<T>> {
        match self {
            Self::Converged(p) => Some(p),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn budget() -> ConvergenceBudget {
        ConvergenceBudget::new(Duration::from_secs(1), Duration::from_millis(100)).unwrap()
    }

    #[test]
    fn baseline_version_is_never_accepted() {
        let id = EntityId::new();
        let req = ConvergenceRequest::<&str>::new(id, 3, budget());

        assert!(!req.accepts(&VersionedProjection::new(id, 2, "old")));
        assert!(!req.accepts(&VersionedProjection::new(id, 3, "same")));
        assert!(req.accepts(&VersionedProjection::new(id, 4, "new")));
    }

    #[test]
    fn predicate_filters_intermediate_states() {
        let id = EntityId::new();
        let req = ConvergenceRequest::new(id, 3, budget()).until(|s: &&str| *s == "confirmed");

        assert!(!req.accepts(&VersionedProjection::new(id, 4, "pending")));
        assert!(req.accepts(&VersionedProjection::new(id, 5, "confirmed")));
        // Terminal state at the baseline does not count.
        assert!(!req.accepts(&VersionedProjection::new(id, 3, "confirmed")));
    }
}
