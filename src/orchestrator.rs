//! Generation orchestrator: submission and completion tracking.
//!
//! The remote service has no push notifications, so a submitted job is
//! watched with client-side timers only.
//!
//! ```text
//! Idle ──submit──▶ Submitted ──▶ Waiting ──grace delay──▶ Checking / Refreshing
//!                      │                                       │
//!                      ▼                                       ▼
//!                   Failed                 Completed | TimedOut | Failed
//!                                                     │
//!            (any active state) ──cancel──▶ Cancelled ┴──▶ Idle
//! ```
//!
//! At most one job is tracked. All timers of a job live in one
//! [`TaskSet`] on the job record and are aborted by every terminal
//! transition. Each job also carries an epoch; a timer that wakes up after
//! its job was replaced or cancelled sees a stale epoch and does nothing.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::catalog::{parse_timestamp, CatalogStore};
use crate::client::RemoteService;
use crate::config::{CompletionStrategy, Config};
use crate::error::{ResearchError, Result};
use crate::models::{GenerationRequest, JobId, RawObject};
use crate::progress::{ProgressEvent, ProgressReporter};
use crate::scheduler::TaskSet;

/// Lifecycle state of the (single) generation job slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    #[default]
    Idle,
    Submitted,
    Waiting,
    Checking,
    Refreshing,
    Completed,
    TimedOut,
    Cancelled,
    Failed,
}

impl JobState {
    /// True while a job occupies the slot.
    pub fn is_active(self) -> bool {
        !matches!(self, JobState::Idle)
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::TimedOut | JobState::Cancelled | JobState::Failed
        )
    }
}

/// A submitted generation job.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationJob {
    pub id: JobId,
    pub request: GenerationRequest,
    pub started_at: DateTime<Utc>,
}

/// What `GET /api/job` and the CLI show about the slot.
#[derive(Debug, Clone, Serialize)]
pub struct JobSnapshot {
    pub state: JobState,
    pub job: Option<GenerationJob>,
    /// Terminal state reached by the most recent job.
    pub last_outcome: Option<JobState>,
}

/// Callback run whenever a finished job frees the slot.
pub type ResetHook = Arc<dyn Fn() + Send + Sync>;

struct ActiveJob {
    job: GenerationJob,
    tasks: TaskSet,
}

#[derive(Default)]
struct Slot {
    epoch: u64,
    state: JobState,
    last_outcome: Option<JobState>,
    job: Option<ActiveJob>,
    /// Post-completion refresh and dwell, kept apart from the job's timers.
    finisher: TaskSet,
}

struct Shared {
    client: Arc<dyn RemoteService>,
    catalog: Arc<CatalogStore>,
    config: Arc<Config>,
    reporter: Arc<dyn ProgressReporter>,
    slot: Mutex<Slot>,
    state_tx: watch::Sender<JobState>,
    reset_hook: Mutex<Option<ResetHook>>,
}

/// Handle to the orchestrator; cheap to clone.
#[derive(Clone)]
pub struct Orchestrator {
    shared: Arc<Shared>,
}

impl Orchestrator {
    pub fn new(
        client: Arc<dyn RemoteService>,
        catalog: Arc<CatalogStore>,
        config: Arc<Config>,
        reporter: Arc<dyn ProgressReporter>,
    ) -> Self {
        let (state_tx, _) = watch::channel(JobState::Idle);
        Self {
            shared: Arc::new(Shared {
                client,
                catalog,
                config,
                reporter,
                slot: Mutex::new(Slot::default()),
                state_tx,
                reset_hook: Mutex::new(None),
            }),
        }
    }

    /// Run `hook` each time a completed, cancelled, timed-out or failed
    /// job returns the slot to `Idle`.
    pub fn set_reset_hook(&self, hook: ResetHook) {
        *lock(&self.shared.reset_hook) = Some(hook);
    }

    pub fn state(&self) -> JobState {
        lock(&self.shared.slot).state
    }

    pub fn subscribe(&self) -> watch::Receiver<JobState> {
        self.shared.state_tx.subscribe()
    }

    pub fn snapshot(&self) -> JobSnapshot {
        let slot = lock(&self.shared.slot);
        JobSnapshot {
            state: slot.state,
            job: slot.job.as_ref().map(|a| a.job.clone()),
            last_outcome: slot.last_outcome,
        }
    }

    /// Terminal state of the most recent job, `None` before the first one
    /// finishes or while a new one runs.
    pub fn last_outcome(&self) -> Option<JobState> {
        lock(&self.shared.slot).last_outcome
    }

    /// Submit a generation request and start tracking it.
    ///
    /// Fails with [`ResearchError::Validation`] when area or topic is
    /// missing or another job is active. A failed submission resets the
    /// slot to `Idle` and returns the remote error for the caller to show.
    pub async fn submit(&self, request: GenerationRequest) -> Result<JobId> {
        request.validate()?;
        let shared = &self.shared;

        let epoch = {
            let mut slot = lock(&shared.slot);
            if slot.state.is_active() {
                return Err(ResearchError::Validation(
                    "a research job is already in progress".to_string(),
                ));
            }
            slot.epoch += 1;
            slot.last_outcome = None;
            shared.set_state(&mut slot, JobState::Submitted);
            slot.epoch
        };

        let task = request.task_prompt();
        let started_at = Utc::now();
        info!(topic = %request.topic, area = %request.area, "submitting research job");

        let job_id = match shared.client.execute_async(&task).await {
            Ok(id) => id,
            Err(e) => {
                warn!(error = %e, "failed to start research");
                let owned = {
                    let mut slot = lock(&shared.slot);
                    let owned = slot.epoch == epoch;
                    if owned {
                        shared.set_state(&mut slot, JobState::Failed);
                        shared.set_state(&mut slot, JobState::Idle);
                    }
                    owned
                };
                if owned {
                    shared.report(ProgressEvent::Failed {
                        message: e.to_string(),
                    });
                    shared.report(ProgressEvent::Reset);
                }
                return Err(e);
            }
        };

        let job = GenerationJob {
            id: job_id.clone(),
            request,
            started_at,
        };

        {
            let mut slot = lock(&shared.slot);
            if slot.epoch != epoch {
                // Cancelled while execute_async was in flight; the remote
                // job is abandoned.
                info!(job_id = %job_id, "job cancelled before tracking started");
                return Err(ResearchError::Cancelled);
            }
            let mut tasks = TaskSet::new();
            shared.start_countdown(&mut tasks, epoch);
            let detector = shared.clone();
            tasks.after(shared.config.generation.poll_start_delay(), async move {
                detector.detect(epoch).await;
            });
            slot.job = Some(ActiveJob {
                job: job.clone(),
                tasks,
            });
            shared.set_state(&mut slot, JobState::Waiting);
        }

        shared.report(ProgressEvent::Submitted {
            job_id: job_id.to_string(),
            topic: job.request.topic.clone(),
            details: job.request.params.details(),
        });
        shared.report(ProgressEvent::Countdown {
            remaining_secs: shared.config.generation.estimated_duration_secs,
        });
        info!(job_id = %job_id, "research job submitted");

        Ok(job_id)
    }

    /// Stop tracking the active job. No remote call is made; a running
    /// remote job is abandoned. Returns `false` when the slot was idle.
    pub fn cancel(&self) -> bool {
        let shared = &self.shared;
        let (job, finisher, was) = {
            let mut slot = lock(&shared.slot);
            let was = slot.state;
            if !was.is_active() {
                return false;
            }
            slot.epoch += 1;
            let job = slot.job.take();
            let finisher = std::mem::take(&mut slot.finisher);
            if was != JobState::Completed {
                shared.set_state(&mut slot, JobState::Cancelled);
            }
            shared.set_state(&mut slot, JobState::Idle);
            (job, finisher, was)
        };

        // Dropping a TaskSet aborts its timers.
        drop(job);
        drop(finisher);

        if was != JobState::Completed {
            info!("research job cancelled");
            shared.report(ProgressEvent::Cancelled);
        }
        shared.report(ProgressEvent::Reset);
        shared.run_reset_hook();
        true
    }
}

impl Shared {
    fn set_state(&self, slot: &mut Slot, state: JobState) {
        debug!(from = ?slot.state, to = ?state, "job state");
        if state.is_terminal() {
            slot.last_outcome = Some(state);
        }
        slot.state = state;
        self.state_tx.send_replace(state);
    }

    fn report(&self, event: ProgressEvent) {
        self.reporter.report(event);
    }

    fn run_reset_hook(&self) {
        let hook = lock(&self.reset_hook).clone();
        if let Some(hook) = hook {
            hook();
        }
    }

    /// The job for `epoch`, if it still owns the slot.
    fn current_job(&self, epoch: u64) -> Option<GenerationJob> {
        let slot = lock(&self.slot);
        if slot.epoch != epoch {
            return None;
        }
        slot.job.as_ref().map(|a| a.job.clone())
    }

    fn start_countdown(self: &Arc<Self>, tasks: &mut TaskSet, epoch: u64) {
        let total = self.config.generation.estimated_duration_secs;
        if total == 0 {
            return;
        }
        let remaining = Arc::new(AtomicU64::new(total));
        let shared = self.clone();
        tasks.every(Duration::from_secs(1), move || {
            let shared = shared.clone();
            let remaining = remaining.clone();
            async move {
                if shared.current_job(epoch).is_none() {
                    return false;
                }
                let left = remaining.load(Ordering::SeqCst).saturating_sub(1);
                remaining.store(left, Ordering::SeqCst);
                shared.report(ProgressEvent::Countdown {
                    remaining_secs: left,
                });
                if left == 0 {
                    shared.report(ProgressEvent::Finalizing);
                    return false;
                }
                true
            }
        });
    }

    /// Completion detection, started after the grace delay.
    async fn detect(self: Arc<Self>, epoch: u64) {
        let generation = &self.config.generation;
        let strategy = generation.strategy;
        let max_attempts = generation.max_poll_attempts;

        let job = {
            let mut slot = lock(&self.slot);
            if slot.epoch != epoch || slot.job.is_none() {
                return;
            }
            let next = match strategy {
                CompletionStrategy::Poll => JobState::Checking,
                CompletionStrategy::Refresh => JobState::Refreshing,
            };
            self.set_state(&mut slot, next);
            slot.job.as_ref().map(|a| a.job.clone())
        };
        let Some(job) = job else { return };

        self.report(ProgressEvent::Checking {
            topic: job.request.topic.clone(),
            interval_secs: generation.poll_interval_secs,
        });
        info!(job_id = %job.id, ?strategy, "starting completion checks");

        let mut ticker = tokio::time::interval(generation.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut consecutive_errors = 0u32;

        for attempt in 1..=max_attempts {
            ticker.tick().await;
            if self.current_job(epoch).is_none() {
                return;
            }

            let checked = match strategy {
                CompletionStrategy::Poll => self.poll_once(&job).await,
                CompletionStrategy::Refresh => self.refresh_once().await,
            };

            match checked {
                Ok(true) => {
                    self.complete(epoch);
                    return;
                }
                Ok(false) => {
                    consecutive_errors = 0;
                    debug!(attempt, max_attempts, "document not ready");
                }
                Err(e)
                    if e.is_transient()
                        && consecutive_errors < generation.max_transient_errors =>
                {
                    consecutive_errors += 1;
                    warn!(attempt, consecutive_errors, error = %e, "completion check failed");
                }
                Err(e) => {
                    self.finish(epoch, JobState::Failed, ProgressEvent::Failed {
                        message: e.to_string(),
                    });
                    return;
                }
            }
            self.report(ProgressEvent::Attempt {
                attempt,
                max_attempts,
            });
        }

        let err = ResearchError::JobTimeout {
            attempts: max_attempts,
        };
        warn!(job_id = %job.id, error = %err, "giving up on research job");
        self.finish(
            epoch,
            JobState::TimedOut,
            ProgressEvent::TimedOut {
                topic: job.request.topic.clone(),
                attempts: max_attempts,
            },
        );
    }

    /// Polling strategy: scan the listing for the artifact, then consult the
    /// job status. Only a remote failure status ends the job from here; a
    /// status call that errors never hides an artifact that is present.
    async fn poll_once(&self, job: &GenerationJob) -> Result<bool> {
        let objects = self
            .client
            .list_objects(self.config.documents.batch_size, 0)
            .await?;
        let prefix = &self.config.documents.prefix;
        if objects
            .iter()
            .any(|obj| is_generated_after(obj, prefix, job.started_at))
        {
            return Ok(true);
        }

        match self.client.job_status(&job.id).await {
            Ok(status) if status.is_failed() => Err(ResearchError::JobFailed(format!(
                "remote job reported '{}'",
                status.status.unwrap_or_default()
            ))),
            Ok(_) => Ok(false),
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "job status unavailable");
                Ok(false)
            }
        }
    }

    /// Periodic-refresh strategy: a growing catalog means a new document.
    async fn refresh_once(&self) -> Result<bool> {
        let before = self.catalog.snapshot().len();
        let after = self.catalog.try_refresh().await?.len();
        if after > before {
            info!(new_documents = after - before, "catalog grew");
        }
        Ok(after > before)
    }

    /// Stop the job's timers and hand off to the finisher, which does the
    /// final refresh, dwells on the success state, then frees the slot.
    fn complete(self: &Arc<Self>, epoch: u64) {
        let (job, topic) = {
            let mut slot = lock(&self.slot);
            if slot.epoch != epoch {
                return;
            }
            let Some(active) = slot.job.take() else { return };
            let topic = active.job.request.topic.clone();
            self.set_state(&mut slot, JobState::Completed);

            let shared = self.clone();
            let finished_topic = topic.clone();
            slot.finisher.cancel_all();
            slot.finisher.spawn(async move {
                shared.catalog.refresh().await;
                shared.report(ProgressEvent::Completed {
                    topic: finished_topic,
                });
                tokio::time::sleep(shared.config.generation.completion_dwell()).await;
                shared.release(epoch, JobState::Completed);
            });
            (active, topic)
        };
        info!(job_id = %job.job.id, %topic, "research job completed");
        // Aborts the detection task we may be running on; nothing after
        // this point awaits.
        drop(job);
    }

    /// Terminal failure or timeout: stop timers and free the slot.
    fn finish(&self, epoch: u64, terminal: JobState, event: ProgressEvent) {
        let job = {
            let mut slot = lock(&self.slot);
            if slot.epoch != epoch {
                return;
            }
            self.set_state(&mut slot, terminal);
            self.set_state(&mut slot, JobState::Idle);
            slot.job.take()
        };
        self.report(event);
        self.report(ProgressEvent::Reset);
        self.run_reset_hook();
        drop(job);
    }

    /// Return a completed job's slot to `Idle` after the dwell.
    fn release(&self, epoch: u64, expected: JobState) {
        {
            let mut slot = lock(&self.slot);
            if slot.epoch != epoch || slot.state != expected {
                return;
            }
            self.set_state(&mut slot, JobState::Idle);
        }
        self.report(ProgressEvent::Reset);
        self.run_reset_hook();
    }
}

/// A prefixed object created at or after `since`.
pub fn is_generated_after(obj: &RawObject, prefix: &str, since: DateTime<Utc>) -> bool {
    let named = obj
        .name
        .as_deref()
        .is_some_and(|name| name.starts_with(prefix));
    let created = obj
        .created_at
        .as_deref()
        .or_else(|| obj.property("generated_at"))
        .and_then(parse_timestamp);
    named && created.is_some_and(|at| at >= since)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GenerationConfig;
    use crate::memory::{InMemoryService, Op};
    use crate::models::{Depth, Focus, ResearchParams, Rigor};
    use crate::progress::RecordingProgress;
    use std::sync::atomic::AtomicU32;

    struct Harness {
        service: Arc<InMemoryService>,
        catalog: Arc<CatalogStore>,
        progress: Arc<RecordingProgress>,
        orchestrator: Orchestrator,
        resets: Arc<AtomicU32>,
    }

    fn harness(strategy: CompletionStrategy) -> Harness {
        let mut config = Config::minimal();
        config.generation = GenerationConfig {
            strategy,
            estimated_duration_secs: 3,
            poll_interval_secs: 5,
            poll_start_delay_secs: 30,
            max_poll_attempts: 4,
            max_transient_errors: 3,
            completion_dwell_secs: 2,
        };
        let config = Arc::new(config);
        let service = Arc::new(InMemoryService::new());
        let client: Arc<dyn RemoteService> = service.clone();
        let catalog = Arc::new(CatalogStore::new(client.clone(), config.clone()));
        let progress = Arc::new(RecordingProgress::new());
        let orchestrator =
            Orchestrator::new(client, catalog.clone(), config, progress.clone());
        let resets = Arc::new(AtomicU32::new(0));
        let r = resets.clone();
        orchestrator.set_reset_hook(Arc::new(move || {
            r.fetch_add(1, Ordering::SeqCst);
        }));
        Harness {
            service,
            catalog,
            progress,
            orchestrator,
            resets,
        }
    }

    fn gdp_request() -> GenerationRequest {
        GenerationRequest {
            area: "Markets".into(),
            topic: "GDP".into(),
            params: ResearchParams {
                depth: Depth::Focused,
                rigor: Rigor::DetailedAnalysis,
                focus: Focus::TechnicalAnalysis,
            },
        }
    }

    fn new_document(id: &str) -> RawObject {
        serde_json::from_value(serde_json::json!({
            "id": id,
            "name": format!("DeepResearch_{}", id),
            "created_at": Utc::now().to_rfc3339(),
        }))
        .unwrap()
    }

    async fn sleep_secs(secs: u64) {
        tokio::time::sleep(Duration::from_secs(secs)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn happy_path_completes_after_grace_delay() {
        let h = harness(CompletionStrategy::Poll);
        let job_id = h.orchestrator.submit(gdp_request()).await.unwrap();
        assert_eq!(job_id, JobId("job-1".into()));
        assert_eq!(h.orchestrator.state(), JobState::Waiting);
        assert_eq!(
            h.service.submitted_tasks(),
            vec!["GDP: Depth - Focused, Rigor - Detailed Analysis, Focus - Technical Analysis"]
        );

        sleep_secs(29).await;
        assert_eq!(h.orchestrator.state(), JobState::Waiting);
        assert_eq!(h.service.calls(Op::JobStatus), 0);

        h.service.insert(new_document("GDP_Outlook"), None);
        sleep_secs(2).await;
        assert_eq!(h.orchestrator.state(), JobState::Completed);
        assert_eq!(h.catalog.refresh_count(), 1);
        assert_eq!(h.catalog.snapshot().len(), 1);

        sleep_secs(2).await;
        assert_eq!(h.orchestrator.state(), JobState::Idle);
        assert_eq!(h.catalog.refresh_count(), 1);
        assert_eq!(h.resets.load(Ordering::SeqCst), 1);
        assert_eq!(h.orchestrator.last_outcome(), Some(JobState::Completed));

        let events = h.progress.events();
        assert!(matches!(events[0], ProgressEvent::Submitted { .. }));
        assert!(events.contains(&ProgressEvent::Completed { topic: "GDP".into() }));
        assert_eq!(events.last(), Some(&ProgressEvent::Reset));
    }

    #[tokio::test(start_paused = true)]
    async fn submitted_is_published_while_execute_is_in_flight() {
        let h = harness(CompletionStrategy::Poll);
        h.service.delay(Op::Execute, Duration::from_secs(1));
        let mut states = h.orchestrator.subscribe();

        let orchestrator = h.orchestrator.clone();
        let submit = tokio::spawn(async move { orchestrator.submit(gdp_request()).await });

        states.changed().await.unwrap();
        assert_eq!(*states.borrow_and_update(), JobState::Submitted);
        assert_eq!(h.orchestrator.state(), JobState::Submitted);
        assert!(h.service.submitted_tasks().is_empty());

        states.changed().await.unwrap();
        assert_eq!(*states.borrow_and_update(), JobState::Waiting);
        assert_eq!(submit.await.unwrap().unwrap(), JobId("job-1".into()));
        assert_eq!(h.service.submitted_tasks().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn old_documents_do_not_count_as_completion() {
        let h = harness(CompletionStrategy::Poll);
        let mut stale = new_document("Old");
        stale.created_at = Some("2020-01-01T00:00:00Z".into());
        h.service.insert(stale, None);

        h.orchestrator.submit(gdp_request()).await.unwrap();
        sleep_secs(31).await;
        assert_eq!(h.orchestrator.state(), JobState::Checking);
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_after_max_attempts() {
        let h = harness(CompletionStrategy::Poll);
        h.orchestrator.submit(gdp_request()).await.unwrap();

        // Checks at 30, 35, 40 and 45 seconds.
        sleep_secs(44).await;
        assert_eq!(h.orchestrator.state(), JobState::Checking);
        assert_eq!(h.service.calls(Op::JobStatus), 3);

        sleep_secs(2).await;
        assert_eq!(h.orchestrator.state(), JobState::Idle);
        assert_eq!(h.service.calls(Op::JobStatus), 4);
        assert_eq!(h.orchestrator.last_outcome(), Some(JobState::TimedOut));
        assert!(h.progress.events().contains(&ProgressEvent::TimedOut {
            topic: "GDP".into(),
            attempts: 4,
        }));

        sleep_secs(120).await;
        assert_eq!(h.service.calls(Op::JobStatus), 4);
        assert_eq!(h.resets.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_stops_all_timers() {
        let h = harness(CompletionStrategy::Poll);
        h.orchestrator.submit(gdp_request()).await.unwrap();
        sleep_secs(31).await;
        assert_eq!(h.orchestrator.state(), JobState::Checking);

        assert!(h.orchestrator.cancel());
        assert_eq!(h.orchestrator.state(), JobState::Idle);
        let calls = h.service.calls(Op::JobStatus);
        let events = h.progress.events().len();

        h.service.insert(new_document("GDP"), None);
        sleep_secs(300).await;
        assert_eq!(h.service.calls(Op::JobStatus), calls);
        assert_eq!(h.progress.events().len(), events);
        assert_eq!(h.catalog.refresh_count(), 0);
        assert!(!h.orchestrator.cancel());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_while_waiting_stops_countdown() {
        let h = harness(CompletionStrategy::Poll);
        h.orchestrator.submit(gdp_request()).await.unwrap();
        sleep_secs(1).await;
        assert!(h.orchestrator.cancel());

        let events = h.progress.events();
        assert!(events.contains(&ProgressEvent::Cancelled));
        sleep_secs(60).await;
        assert_eq!(h.progress.events(), events);
        assert_eq!(h.service.calls(Op::JobStatus), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn countdown_runs_down_then_finalizes() {
        let h = harness(CompletionStrategy::Poll);
        h.orchestrator.submit(gdp_request()).await.unwrap();
        sleep_secs(10).await;

        let countdown: Vec<ProgressEvent> = h
            .progress
            .events()
            .into_iter()
            .filter(|e| matches!(e, ProgressEvent::Countdown { .. } | ProgressEvent::Finalizing))
            .collect();
        assert_eq!(
            countdown,
            vec![
                ProgressEvent::Countdown { remaining_secs: 3 },
                ProgressEvent::Countdown { remaining_secs: 2 },
                ProgressEvent::Countdown { remaining_secs: 1 },
                ProgressEvent::Countdown { remaining_secs: 0 },
                ProgressEvent::Finalizing,
            ]
        );
        // The countdown never gates completion.
        assert_eq!(h.orchestrator.state(), JobState::Waiting);
    }

    #[tokio::test(start_paused = true)]
    async fn second_submit_is_blocked() {
        let h = harness(CompletionStrategy::Poll);
        h.orchestrator.submit(gdp_request()).await.unwrap();
        let err = h.orchestrator.submit(gdp_request()).await.unwrap_err();
        assert!(matches!(err, ResearchError::Validation(_)));
        assert_eq!(h.service.calls(Op::Execute), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_topic_never_reaches_remote() {
        let h = harness(CompletionStrategy::Poll);
        let mut request = gdp_request();
        request.topic.clear();
        assert!(h.orchestrator.submit(request).await.is_err());
        assert_eq!(h.service.calls(Op::Execute), 0);
        assert_eq!(h.orchestrator.state(), JobState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn submit_failure_resets_to_idle() {
        let h = harness(CompletionStrategy::Poll);
        h.service.fail_next(
            Op::Execute,
            ResearchError::Api {
                status: 500,
                message: "Internal Server Error".into(),
            },
        );
        let err = h.orchestrator.submit(gdp_request()).await.unwrap_err();
        assert!(matches!(err, ResearchError::Api { status: 500, .. }));
        assert_eq!(h.orchestrator.state(), JobState::Idle);
        assert!(matches!(h.progress.events()[0], ProgressEvent::Failed { .. }));

        // The slot is free again.
        assert!(h.orchestrator.submit(gdp_request()).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_are_tolerated_then_escalate() {
        let h = harness(CompletionStrategy::Poll);
        for _ in 0..3 {
            h.service
                .fail_next(Op::List, ResearchError::Transport("reset".into()));
        }
        h.orchestrator.submit(gdp_request()).await.unwrap();
        sleep_secs(41).await;
        assert_eq!(h.orchestrator.state(), JobState::Checking);

        let h = harness(CompletionStrategy::Poll);
        for _ in 0..4 {
            h.service
                .fail_next(Op::List, ResearchError::Transport("reset".into()));
        }
        h.orchestrator.submit(gdp_request()).await.unwrap();
        sleep_secs(46).await;
        assert_eq!(h.orchestrator.state(), JobState::Idle);
        assert!(h
            .progress
            .events()
            .iter()
            .any(|e| matches!(e, ProgressEvent::Failed { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn status_error_does_not_fail_job() {
        let h = harness(CompletionStrategy::Poll);
        h.service.fail_next(
            Op::JobStatus,
            ResearchError::Api {
                status: 404,
                message: "Not Found".into(),
            },
        );
        h.orchestrator.submit(gdp_request()).await.unwrap();
        sleep_secs(31).await;
        assert_eq!(h.orchestrator.state(), JobState::Checking);
        assert_eq!(h.service.calls(Op::List), 1);
        assert_eq!(h.service.calls(Op::JobStatus), 1);

        h.service.insert(new_document("GDP_Outlook"), None);
        sleep_secs(5).await;
        assert_eq!(h.orchestrator.state(), JobState::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn present_artifact_completes_despite_missing_status() {
        let h = harness(CompletionStrategy::Poll);
        h.orchestrator.submit(gdp_request()).await.unwrap();
        h.service.insert(new_document("GDP_Outlook"), None);
        h.service.fail_next(
            Op::JobStatus,
            ResearchError::Api {
                status: 404,
                message: "Not Found".into(),
            },
        );
        sleep_secs(31).await;
        assert_eq!(h.orchestrator.state(), JobState::Completed);
        assert_eq!(h.orchestrator.last_outcome(), Some(JobState::Completed));
        assert_eq!(h.service.calls(Op::JobStatus), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn artifact_wins_over_status_error_on_last_check() {
        let h = harness(CompletionStrategy::Poll);
        h.orchestrator.submit(gdp_request()).await.unwrap();
        sleep_secs(44).await;
        assert_eq!(h.orchestrator.state(), JobState::Checking);

        h.service
            .fail_next(Op::JobStatus, ResearchError::Transport("reset".into()));
        h.service.insert(new_document("GDP_Outlook"), None);
        sleep_secs(2).await;
        assert_eq!(h.orchestrator.state(), JobState::Completed);

        sleep_secs(2).await;
        assert_eq!(h.orchestrator.last_outcome(), Some(JobState::Completed));
        assert!(!h
            .progress
            .events()
            .iter()
            .any(|e| matches!(e, ProgressEvent::TimedOut { .. } | ProgressEvent::Failed { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn remote_failure_status_fails_job() {
        let h = harness(CompletionStrategy::Poll);
        h.service.set_job_status("failed");
        h.orchestrator.submit(gdp_request()).await.unwrap();
        sleep_secs(31).await;
        assert_eq!(h.orchestrator.state(), JobState::Idle);
        assert_eq!(h.service.calls(Op::JobStatus), 1);
        assert!(h
            .progress
            .events()
            .iter()
            .any(|e| matches!(e, ProgressEvent::Failed { message } if message.contains("failed"))));
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_strategy_detects_growth() {
        let h = harness(CompletionStrategy::Refresh);
        h.service.insert(new_document("Existing"), None);
        h.catalog.refresh().await;
        assert_eq!(h.catalog.snapshot().len(), 1);

        h.orchestrator.submit(gdp_request()).await.unwrap();
        sleep_secs(31).await;
        assert_eq!(h.orchestrator.state(), JobState::Refreshing);
        assert_eq!(h.catalog.refresh_count(), 2);

        h.service.insert(new_document("GDP"), None);
        sleep_secs(5).await;
        assert_eq!(h.orchestrator.state(), JobState::Completed);
        // initial + two ticks + one final refresh
        assert_eq!(h.catalog.refresh_count(), 4);
        assert_eq!(h.catalog.snapshot().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_dwell_frees_slot_early() {
        let h = harness(CompletionStrategy::Poll);
        h.orchestrator.submit(gdp_request()).await.unwrap();
        h.service.insert(new_document("GDP"), None);
        sleep_secs(31).await;
        assert_eq!(h.orchestrator.state(), JobState::Completed);

        assert!(h.orchestrator.cancel());
        assert_eq!(h.orchestrator.state(), JobState::Idle);
        assert!(!h.progress.events().contains(&ProgressEvent::Cancelled));
        sleep_secs(10).await;
        assert_eq!(h.resets.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn generated_after_requires_prefix_and_time() {
        let since = Utc::now() - chrono::Duration::minutes(1);
        let fresh = new_document("X");
        assert!(is_generated_after(&fresh, "DeepResearch_", since));
        assert!(!is_generated_after(&fresh, "Other_", since));

        let mut undated = new_document("Y");
        undated.created_at = None;
        assert!(!is_generated_after(&undated, "DeepResearch_", since));
    }
}
