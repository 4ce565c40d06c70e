use tokio::time::{Instant, sleep, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use catchup_observability::{Telemetry, counters};

use super::{Convergence, ConvergenceRequest};
use crate::read_model::VersionedReadStore;

/// Samples a versioned read store until it catches up with a caller's write.
///
/// The poller is read-only and keeps no state between calls, so any number of
/// waits (for the same entity or not, with different budgets) can run at once on
/// a shared instance.
///
/// ## Algorithm
///
/// 1. `deadline = now + timeout`
/// 2. if `now >= deadline` → `TimedOut`
/// 3. read the entity; accept it when `version > baseline` and the exit predicate
///    (if any) holds → `Converged`, without waiting out the budget
/// 4. otherwise wait one fixed `poll_interval` and go to 2
///
/// Read failures are transient: logged, counted, and polling continues. A read
/// that is still pending at the deadline is abandoned. Cancellation is observed
/// both while reading and while waiting between samples.
#[derive(Debug, Clone)]
pub struct ConvergencePoller<S> {
    store: S,
    telemetry: Telemetry,
}

impl<S> ConvergencePoller<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            telemetry: Telemetry::disabled(),
        }
    }

    pub fn with_telemetry(mut self, telemetry: Telemetry) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Wait without an external cancellation signal.
    pub async fn wait<T>(&self, request: ConvergenceRequest<T>) -> Convergence<T>
    where
        S: VersionedReadStore<T>,
    {
        self.wait_for_version(request, &CancellationToken::new()).await
    }

    /// Wait until the read model moves past the request's baseline.
    pub async fn wait_for_version<T>(
        &self,
        request: ConvergenceRequest<T>,
        cancel: &CancellationToken,
    ) -> Convergence<T>
    where
        S: VersionedReadStore<T>,
    {
        let entity_id = request.entity_id();
        let baseline = request.baseline_version();
        let budget = request.budget();
        let deadline = Instant::now() + budget.timeout();
        let mut last_seen_version: Option<u64> = None;

        loop {
            if Instant::now() >= deadline {
                return self.timed_out(&request, last_seen_version);
            }

            let read = tokio::select! {
                biased;
                _ = cancel.cancelled() => return self.cancelled(&request),
                _ = sleep_until(deadline) => return self.timed_out(&request, last_seen_version),
                read = self.store.get_by_id(entity_id) => read,
            };

            match read {
                Ok(Some(projection)) => {
                    let version = projection.version();
                    last_seen_version = Some(last_seen_version.map_or(version, |v| v.max(version)));

                    if request.accepts(&projection) {
                        debug!(entity = %entity_id, baseline, version, "read model converged");
                        self.telemetry.increment(counters::CONVERGENCE_CONVERGED);
                        return Convergence::Converged(projection);
                    }
                    if version > baseline {
                        debug!(
                            entity = %entity_id,
                            baseline,
                            version,
                            "read model advanced to an intermediate state"
                        );
                    }
                }
                Ok(None) => {}
                Err(err) => {
                    warn!(entity = %entity_id, error = %err, "read model sample failed; retrying");
                    self.telemetry.increment(counters::CONVERGENCE_READ_ERRORS);
                }
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return self.cancelled(&request),
                _ = sleep(budget.poll_interval()) => {}
            }
        }
    }

    fn timed_out<T>(
        &self,
        request: &ConvergenceRequest<T>,
        last_seen_version: Option<u64>,
    ) -> Convergence<T> {
        debug!(
            entity = %request.entity_id(),
            baseline = request.baseline_version(),
            last_seen_version = ?last_seen_version,
            "read model did not converge within budget"
        );
        self.telemetry.increment(counters::CONVERGENCE_TIMED_OUT);
        Convergence::TimedOut { last_seen_version }
    }

    fn cancelled<T>(&self, request: &ConvergenceRequest<T>) -> Convergence<T> {
        debug!(entity = %request.entity_id(), "convergence wait cancelled");
        self.telemetry.increment(counters::CONVERGENCE_CANCELLED);
        Convergence::Cancelled
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use proptest::prelude::*;

    use catchup_core::EntityId;
    use catchup_messaging::VersionedProjection;
    use catchup_observability::InMemoryTelemetrySink;

    use super::*;
    use crate::convergence::ConvergenceBudget;
    use crate::read_model::{InMemoryVersionedStore, ReadStoreError};

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum OrderState {
        Pending,
        Confirmed,
    }

    /// Store whose content is a function of (paused) time since creation.
    struct ScriptedStore<T> {
        started: Instant,
        /// (offset, version, state); the latest entry whose offset has passed wins.
        script: Vec<(Duration, u64, T)>,
        reads: AtomicUsize,
    }

    impl<T> ScriptedStore<T> {
        fn new(script: Vec<(Duration, u64, T)>) -> Self {
            Self {
                started: Instant::now(),
                script,
                reads: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl<T: Clone + Send + Sync + 'static> VersionedReadStore<T> for ScriptedStore<T> {
        async fn get_by_id(
            &self,
            entity_id: EntityId,
        ) -> Result<Option<VersionedProjection<T>>, ReadStoreError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            let elapsed = self.started.elapsed();
            Ok(self
                .script
                .iter()
                .filter(|(at, _, _)| *at <= elapsed)
                .last()
                .map(|(_, v, s)| VersionedProjection::new(entity_id, *v, s.clone())))
        }
    }

    /// Store whose reads never complete in time.
    struct HangingStore;

    #[async_trait]
    impl VersionedReadStore<u8> for HangingStore {
        async fn get_by_id(
            &self,
            _entity_id: EntityId,
        ) -> Result<Option<VersionedProjection<u8>>, ReadStoreError> {
            sleep(Duration::from_secs(3600)).await;
            Ok(None)
        }
    }

    fn budget(timeout_ms: u64, interval_ms: u64) -> ConvergenceBudget {
        ConvergenceBudget::new(
            Duration::from_millis(timeout_ms),
            Duration::from_millis(interval_ms),
        )
        .unwrap()
    }

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[tokio::test(start_paused = true)]
    async fn returns_newer_version_within_one_interval_of_its_arrival() {
        let id = EntityId::new();
        let poller = ConvergencePoller::new(ScriptedStore::new(vec![
            (ms(0), 3, OrderState::Confirmed),
            (ms(2000), 4, OrderState::Confirmed),
        ]));

        let start = Instant::now();
        let outcome = poller.wait(ConvergenceRequest::new(id, 3, budget(5000, 300))).await;
        let elapsed = start.elapsed();

        assert_eq!(outcome.projection().map(|p| p.version()), Some(4));
        assert!(elapsed >= ms(2000), "returned before the write landed: {elapsed:?}");
        assert!(elapsed <= ms(2300), "returned too late: {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_when_store_never_advances() {
        let id = EntityId::new();
        let poller = ConvergencePoller::new(ScriptedStore::new(vec![(ms(0), 3, ())]));

        let start = Instant::now();
        let outcome = poller.wait(ConvergenceRequest::new(id, 3, budget(1000, 300))).await;
        let elapsed = start.elapsed();

        assert_eq!(
            outcome,
            Convergence::TimedOut {
                last_seen_version: Some(3)
            }
        );
        assert!(elapsed >= ms(1000) && elapsed <= ms(1300), "elapsed {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn skips_intermediate_states_until_predicate_holds() {
        let id = EntityId::new();
        let poller = ConvergencePoller::new(ScriptedStore::new(vec![
            (ms(0), 3, OrderState::Pending),
            (ms(400), 4, OrderState::Pending),
            (ms(1500), 5, OrderState::Confirmed),
        ]));

        let outcome = poller
            .wait(
                ConvergenceRequest::new(id, 3, budget(5000, 300))
                    .until(|s: &OrderState| *s == OrderState::Confirmed),
            )
            .await;

        let p = outcome.into_projection().unwrap();
        assert_eq!(p.version(), 5);
        assert_eq!(*p.state(), OrderState::Confirmed);
    }

    #[tokio::test(start_paused = true)]
    async fn intermediate_state_at_deadline_is_still_a_timeout() {
        let id = EntityId::new();
        let poller = ConvergencePoller::new(ScriptedStore::new(vec![
            (ms(0), 3, OrderState::Pending),
            (ms(100), 4, OrderState::Pending),
        ]));

        let outcome = poller
            .wait(
                ConvergenceRequest::new(id, 3, budget(1000, 300))
                    .until(|s: &OrderState| *s == OrderState::Confirmed),
            )
            .await;

        assert_eq!(
            outcome,
            Convergence::TimedOut {
                last_seen_version: Some(4)
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn zero_baseline_accepts_first_projection() {
        let id = EntityId::new();
        let poller = ConvergencePoller::new(ScriptedStore::new(vec![(ms(500), 1, "created")]));

        let outcome = poller.wait(ConvergenceRequest::new(id, 0, budget(2000, 200))).await;

        assert_eq!(outcome.projection().map(|p| p.version()), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_read_errors_are_retried_and_counted() {
        let id = EntityId::new();
        let store = Arc::new(InMemoryVersionedStore::<u32>::new());
        store.apply(id, |_| 1).unwrap();
        store.apply(id, |_| 2).unwrap();
        store.fail_next_reads(3);

        let sink = Arc::new(InMemoryTelemetrySink::new());
        let poller = ConvergencePoller::new(store).with_telemetry(Telemetry::new(sink.clone()));

        let outcome = poller.wait(ConvergenceRequest::new(id, 1, budget(2000, 100))).await;

        assert_eq!(outcome.projection().map(|p| p.version()), Some(2));
        assert_eq!(sink.counter(counters::CONVERGENCE_READ_ERRORS), Some(3));
        assert_eq!(sink.counter(counters::CONVERGENCE_CONVERGED), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn failing_store_times_out_instead_of_erroring() {
        let id = EntityId::new();
        let store = InMemoryVersionedStore::<u32>::new();
        store.apply(id, |_| 1).unwrap();
        store.fail_next_reads(u32::MAX);

        let poller = ConvergencePoller::new(store);
        let outcome = poller.wait(ConvergenceRequest::new(id, 0, budget(1000, 300))).await;

        assert_eq!(
            outcome,
            Convergence::TimedOut {
                last_seen_version: None
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_the_wait_promptly() {
        let id = EntityId::new();
        let poller = ConvergencePoller::new(ScriptedStore::new(vec![(ms(0), 3, ())]));
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            sleep(ms(400)).await;
            trigger.cancel();
        });

        let start = Instant::now();
        let outcome = poller
            .wait_for_version(ConvergenceRequest::new(id, 3, budget(5000, 1000)), &cancel)
            .await;

        assert_eq!(outcome, Convergence::Cancelled);
        // Woken by the token, not by the next 1s poll tick.
        assert!(start.elapsed() < ms(500), "elapsed {:?}", start.elapsed());
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_read_is_abandoned_at_the_deadline() {
        let poller = ConvergencePoller::new(HangingStore);

        let start = Instant::now();
        let outcome = poller
            .wait(ConvergenceRequest::new(EntityId::new(), 0, budget(1000, 300)))
            .await;

        assert_eq!(
            outcome,
            Convergence::TimedOut {
                last_seen_version: None
            }
        );
        assert!(start.elapsed() >= ms(1000) && start.elapsed() < ms(1300));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_waits_with_different_budgets_are_independent() {
        let id = EntityId::new();
        let poller = ConvergencePoller::new(ScriptedStore::new(vec![
            (ms(0), 3, ()),
            (ms(1500), 4, ()),
        ]));

        let (short, long) = tokio::join!(
            poller.wait(ConvergenceRequest::new(id, 3, budget(1000, 200))),
            poller.wait(ConvergenceRequest::new(id, 3, budget(3000, 200))),
        );

        assert!(matches!(short, Convergence::TimedOut { .. }));
        assert_eq!(long.projection().map(|p| p.version()), Some(4));
    }

    #[tokio::test(start_paused = true)]
    async fn converged_wait_stops_sampling() {
        let id = EntityId::new();
        let store = Arc::new(ScriptedStore::new(vec![(ms(0), 9, ())]));
        let poller = ConvergencePoller::new(store.clone());

        let outcome = poller.wait(ConvergenceRequest::new(id, 3, budget(5000, 300))).await;

        assert!(outcome.is_converged());
        assert_eq!(store.reads.load(Ordering::SeqCst), 1);
    }

    proptest! {
        #[test]
        fn never_returns_a_version_at_or_below_the_baseline(
            versions in proptest::collection::vec(0u64..20, 1..8),
            baseline in 0u64..20,
        ) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .start_paused(true)
                .build()
                .unwrap();

            let outcome = rt.block_on(async {
                // Each scripted version lands 250ms after the previous one.
                let script = versions
                    .iter()
                    .enumerate()
                    .map(|(i, v)| (ms(250 * i as u64), *v, ()))
                    .collect();
                let poller = ConvergencePoller::new(ScriptedStore::new(script));
                poller
                    .wait(ConvergenceRequest::new(EntityId::new(), baseline, budget(3000, 100)))
                    .await
            });

            match outcome {
                Convergence::Converged(p) => prop_assert!(p.version() > baseline),
                // Every scripted version stays visible for at least two samples,
                // so a timeout means nothing newer than the baseline ever existed.
                Convergence::TimedOut { .. } => {
                    prop_assert!(versions.iter().all(|v| *v <= baseline));
                }
                Convergence::Cancelled => prop_assert!(false, "nothing cancelled this wait"),
            }
        }
    }
}
