//! Interval-driven escalation sweeps.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

use granta_core::escalation::{EscalationEngine, SweepStats};

/// Runs escalation sweeps on a fixed interval. The first sweep fires
/// immediately on start. A sweep that is still running when the next tick
/// arrives is never doubled up; the tick is skipped instead.
pub struct EscalationRunner {
    engine: Arc<EscalationEngine>,
    interval: Duration,
    active: Arc<AtomicBool>,
    in_flight: Arc<AtomicBool>,
    worker: Mutex<Option<Worker>>,
}

struct Worker {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl EscalationRunner {
    pub fn new(engine: Arc<EscalationEngine>, interval: Duration) -> Self {
        Self {
            engine,
            interval,
            active: Arc::new(AtomicBool::new(false)),
            in_flight: Arc::new(AtomicBool::new(false)),
            worker: Mutex::new(None),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub async fn start(&self) {
        if self.active.swap(true, Ordering::SeqCst) {
            tracing::warn!("escalation runner is already active");
            return;
        }

        let engine = self.engine.clone();
        let in_flight = self.in_flight.clone();
        let interval = self.interval;
        let (shutdown, mut signal) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        Self::guarded_sweep(&engine, &in_flight).await;
                    }
                    _ = signal.changed() => return,
                }
            }
        });

        *self.worker.lock().await = Some(Worker { shutdown, handle });
        tracing::info!(interval_secs = interval.as_secs(), "escalation runner started");
    }

    /// Stops future ticks and waits for the loop to exit. A sweep already
    /// underway runs to completion first.
    pub async fn stop(&self) {
        if !self.active.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(worker) = self.worker.lock().await.take() {
            let _ = worker.shutdown.send(true);
            let _ = worker.handle.await;
        }
        tracing::info!("escalation runner stopped");
    }

    /// Run a single sweep outside the timer, subject to the same
    /// no-overlap guard.
    pub async fn sweep_now(&self) -> Option<SweepStats> {
        Self::guarded_sweep(&self.engine, &self.in_flight).await
    }

    async fn guarded_sweep(
        engine: &EscalationEngine,
        in_flight: &AtomicBool,
    ) -> Option<SweepStats> {
        if in_flight.swap(true, Ordering::SeqCst) {
            tracing::warn!("previous escalation sweep still running, skipping this tick");
            return None;
        }

        let result = engine.process_all().await;
        in_flight.store(false, Ordering::SeqCst);

        match result {
            Ok(stats) => {
                tracing::info!(
                    processed = stats.processed,
                    escalated = stats.escalated,
                    already_notified = stats.already_notified,
                    below_threshold = stats.below_threshold,
                    skipped_no_recipient = stats.skipped_no_recipient,
                    dispatch_failures = stats.dispatch_failures,
                    store_errors = stats.store_errors,
                    "escalation sweep finished"
                );
                Some(stats)
            }
            Err(err) => {
                // The timer keeps running; the next tick retries.
                tracing::error!(error = %err, "escalation sweep failed");
                None
            }
        }
    }
}

impl Drop for EscalationRunner {
    fn drop(&mut self) {
        // Dropping the sender ends the loop at its next await; the task
        // never observes a cancelled sweep.
        if let Ok(mut guard) = self.worker.try_lock() {
            if let Some(worker) = guard.take() {
                let _ = worker.shutdown.send(true);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::Utc;

    use granta_core::domain::escalation::PendingApproval;
    use granta_core::domain::practitioner::{
        Practitioner, PractitionerType, Specialty, UserId,
    };
    use granta_core::domain::request::{
        Privilege, PrivilegeRequest, PrivilegeType, RequestId, RequestStatus,
    };
    use granta_core::escalation::{EscalationConfig, EscalationEngine};
    use granta_core::memory::{
        InMemoryDirectory, InMemoryEscalationStore, InMemoryRequestStore,
        RecordingDispatcher,
    };
    use granta_core::ports::{
        DispatchOutcome, EscalationNotice, NotificationDispatcher,
    };

    use super::EscalationRunner;

    fn consultant(id: &str) -> Practitioner {
        Practitioner {
            id: UserId(id.to_string()),
            display_name: id.to_string(),
            practitioner_type: PractitionerType::Consultant,
            primary_specialty: Some(Specialty("gastroenterology".to_string())),
            additional_specialties: Vec::new(),
            can_approve: true,
            committee_member: false,
            medical_director: false,
            manager_id: None,
        }
    }

    fn stale_pending(id: &str, approver: &str) -> PendingApproval {
        PendingApproval {
            request: PrivilegeRequest {
                id: RequestId(id.to_string()),
                applicant_id: UserId("u-applicant".to_string()),
                privilege_type: PrivilegeType::NonCore,
                status: RequestStatus::InReview,
                privileges: vec![Privilege {
                    id: "priv-1".to_string(),
                    name: "Endoscopy".to_string(),
                    category: PrivilegeType::NonCore,
                    required_specialty: None,
                }],
                submitted_at: Utc::now() - chrono::Duration::hours(30),
                completed_at: None,
            },
            approver: consultant(approver),
            pending_since: Utc::now() - chrono::Duration::hours(30),
        }
    }

    async fn engine_with(
        pending: Vec<PendingApproval>,
    ) -> (Arc<EscalationEngine>, Arc<RecordingDispatcher>) {
        let requests = Arc::new(InMemoryRequestStore::default());
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let mut users = vec![consultant("u-applicant")];
        for item in pending {
            users.push(item.approver.clone());
            requests.insert_pending(item).await;
        }
        let engine = EscalationEngine::new(
            EscalationConfig::default(),
            requests,
            Arc::new(InMemoryDirectory::with_users(users)),
            Arc::new(InMemoryEscalationStore::default()),
            dispatcher.clone(),
        );
        (Arc::new(engine), dispatcher)
    }

    /// Dispatcher that stalls inside `send`, keeping a sweep in flight long
    /// enough for another caller to collide with it.
    struct SlowDispatcher {
        delay: Duration,
        entered: AtomicUsize,
    }

    impl SlowDispatcher {
        fn new(delay: Duration) -> Self {
            Self { delay, entered: AtomicUsize::new(0) }
        }

        fn entered(&self) -> usize {
            self.entered.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl NotificationDispatcher for SlowDispatcher {
        async fn send(&self, _notice: EscalationNotice) -> DispatchOutcome {
            self.entered.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            DispatchOutcome::delivered()
        }
    }

    async fn slow_engine(
        pending: Vec<PendingApproval>,
        delay: Duration,
    ) -> (Arc<EscalationEngine>, Arc<SlowDispatcher>) {
        let requests = Arc::new(InMemoryRequestStore::default());
        let dispatcher = Arc::new(SlowDispatcher::new(delay));
        let mut users = vec![consultant("u-applicant")];
        for item in pending {
            users.push(item.approver.clone());
            requests.insert_pending(item).await;
        }
        let engine = EscalationEngine::new(
            EscalationConfig::default(),
            requests,
            Arc::new(InMemoryDirectory::with_users(users)),
            Arc::new(InMemoryEscalationStore::default()),
            dispatcher.clone(),
        );
        (Arc::new(engine), dispatcher)
    }

    async fn wait_until(deadline: Duration, condition: impl Fn() -> bool) {
        tokio::time::timeout(deadline, async {
            loop {
                if condition() {
                    break;
                }
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("condition should hold before the deadline");
    }

    #[tokio::test]
    async fn start_runs_an_immediate_sweep() {
        let (engine, dispatcher) =
            engine_with(vec![stale_pending("req-1", "u-approver")]).await;

        let runner = EscalationRunner::new(engine, Duration::from_secs(3600));
        runner.start().await;
        assert!(runner.is_active());

        // The hour-long interval means any notice observed here came from
        // the immediate first sweep.
        tokio::time::timeout(Duration::from_secs(1), async {
            loop {
                if !dispatcher.notices().await.is_empty() {
                    break;
                }
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("first sweep should dispatch a reminder");

        runner.stop().await;
        assert!(!runner.is_active());
    }

    #[tokio::test]
    async fn start_is_idempotent_and_stop_halts_ticking() {
        let (engine, _dispatcher) = engine_with(Vec::new()).await;
        let runner = EscalationRunner::new(engine, Duration::from_millis(10));

        runner.start().await;
        runner.start().await;
        assert!(runner.is_active());

        runner.stop().await;
        runner.stop().await;
        assert!(!runner.is_active());
    }

    #[tokio::test]
    async fn sweep_now_reports_stats() {
        let (engine, _dispatcher) = engine_with(Vec::new()).await;
        let runner = EscalationRunner::new(engine, Duration::from_secs(3600));

        let stats = runner.sweep_now().await.expect("sweep should run");
        assert_eq!(stats.processed, 0);
        assert_eq!(stats.escalated, 0);
    }

    #[tokio::test]
    async fn overlapping_sweep_is_skipped_not_doubled() {
        let (engine, dispatcher) = slow_engine(
            vec![stale_pending("req-1", "u-approver")],
            Duration::from_millis(200),
        )
        .await;
        let runner = Arc::new(EscalationRunner::new(engine, Duration::from_secs(3600)));

        let first = tokio::spawn({
            let runner = runner.clone();
            async move { runner.sweep_now().await }
        });
        wait_until(Duration::from_secs(1), || dispatcher.entered() == 1).await;

        // The first sweep is stalled in the dispatcher; a second attempt
        // must skip rather than run concurrently.
        assert!(runner.sweep_now().await.is_none());

        let stats = first
            .await
            .expect("sweep task should not panic")
            .expect("first sweep should complete");
        assert_eq!(stats.escalated, 1);
        assert_eq!(dispatcher.entered(), 1);

        // The guard is released once the sweep finishes.
        let stats = runner.sweep_now().await.expect("sweep after release should run");
        assert_eq!(stats.already_notified, 1);
    }

    #[tokio::test]
    async fn stop_during_a_sweep_lets_it_finish_and_leaves_the_guard_clear() {
        let (engine, dispatcher) = slow_engine(
            vec![stale_pending("req-1", "u-approver")],
            Duration::from_millis(200),
        )
        .await;
        let runner = EscalationRunner::new(engine, Duration::from_secs(3600));

        runner.start().await;
        wait_until(Duration::from_secs(1), || dispatcher.entered() == 1).await;

        // stop() returns only after the in-flight sweep has completed.
        runner.stop().await;
        assert!(!runner.is_active());

        // The completed sweep persisted its record, and the guard is free
        // for the next sweep.
        let stats = runner.sweep_now().await.expect("sweep after stop should run");
        assert_eq!(stats.already_notified, 1);
        assert_eq!(dispatcher.entered(), 1);
    }
}
