//! Single-flight action scheduler.
//!
//! Every hardware-affecting operation, from a one-off `point` to a whole
//! survey, runs as an [`Action`] on one dedicated worker thread. Other threads
//! only enqueue, cancel and read snapshots.
//!
//! ## Worker loop
//!
//! ```text
//!            ┌────────── backlog non-empty ──────────┐
//!            ▼                                       │
//!   start pipeline ─▶ pop head ─▶ active ─▶ run (lock released) ─▶ clear active
//!            │
//!   backlog empty ─▶ release pipeline unless sessions attached ─▶ wait
//! ```
//!
//! The backlog and active slot sit behind one `parking_lot` mutex/condvar
//! pair. The lock is released while an action runs, so `enqueue`, `cancel`
//! and `snapshot` stay responsive during a long survey.
//!
//! Actions are async closures. The worker owns a current-thread tokio runtime
//! and blocks on each one in turn; a failing or panicking action is logged and
//! the worker moves on.

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt};
use parking_lot::{Condvar, Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::Settings;
use crate::error::{AppResult, ScanError};
use crate::hardware::{SessionId, Station, PARK_POSITION};
use crate::plan::PlanArgs;
use crate::survey::{Survey, SurveyProgress};

/// Work run by the scheduler. Receives the station it may drive.
pub type ActionFn =
    Box<dyn FnOnce(Arc<Station>) -> BoxFuture<'static, anyhow::Result<()>> + Send + 'static>;

/// Opaque handle for a queued or running action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActionId(Uuid);

impl ActionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A unit of scheduler work.
pub struct Action {
    id: ActionId,
    name: String,
    enqueued_at: DateTime<Utc>,
    /// Set for survey runs, which are abortable
    survey: Option<Arc<Survey>>,
    run: ActionFn,
}

impl Action {
    fn info(&self) -> ActionInfo {
        ActionInfo::new(self.id, &self.name, self.enqueued_at, self.survey.as_ref())
    }
}

/// Display view of an action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionInfo {
    /// Handle accepted by [`ActionScheduler::cancel`]
    pub id: ActionId,
    /// Human-readable label given at enqueue time
    pub name: String,
    /// When the action entered the backlog
    pub enqueued_at: DateTime<Utc>,
    /// Present for survey actions
    pub survey: Option<SurveyProgress>,
}

impl ActionInfo {
    fn new(
        id: ActionId,
        name: &str,
        enqueued_at: DateTime<Utc>,
        survey: Option<&Arc<Survey>>,
    ) -> Self {
        Self {
            id,
            name: name.to_string(),
            enqueued_at,
            survey: survey.map(|s| s.progress()),
        }
    }

    /// True for survey runs, which can be aborted while active.
    pub fn is_survey(&self) -> bool {
        self.survey.is_some()
    }
}

/// Consistent view of the queue, taken under the scheduler lock.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    /// The action the worker is running, if any
    pub active: Option<ActionInfo>,
    /// In execution order
    pub backlog: Vec<ActionInfo>,
}

impl QueueSnapshot {
    /// Nothing running and nothing queued.
    pub fn is_idle(&self) -> bool {
        self.active.is_none() && self.backlog.is_empty()
    }

    /// Whether `id` is running or still queued.
    pub fn contains(&self, id: ActionId) -> bool {
        self.active.as_ref().is_some_and(|a| a.id == id) || self.backlog.iter().any(|a| a.id == id)
    }
}

struct ActiveSlot {
    id: ActionId,
    name: String,
    enqueued_at: DateTime<Utc>,
    survey: Option<Arc<Survey>>,
}

#[derive(Default)]
struct SchedulerState {
    backlog: VecDeque<Action>,
    active: Option<ActiveSlot>,
    /// A session detached; the idle path must look again
    idle_check_pending: bool,
    exit: bool,
}

impl SchedulerState {
    fn is_idle(&self) -> bool {
        self.active.is_none() && self.backlog.is_empty()
    }
}

struct Shared {
    state: Mutex<SchedulerState>,
    work: Condvar,
    idle: Condvar,
    station: Arc<Station>,
}

/// Serializes all hardware work through one active slot.
pub struct ActionScheduler {
    shared: Arc<Shared>,
    settings: Arc<Settings>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ActionScheduler {
    /// Spawn the worker thread.
    pub fn new(station: Station, settings: Settings) -> AppResult<Self> {
        let shared = Arc::new(Shared {
            state: Mutex::new(SchedulerState::default()),
            work: Condvar::new(),
            idle: Condvar::new(),
            station: Arc::new(station),
        });

        let worker_shared = shared.clone();
        let worker = std::thread::Builder::new()
            .name("action-scheduler".to_string())
            .spawn(move || worker_loop(worker_shared))?;
        info!("Action scheduler started");

        Ok(Self {
            shared,
            settings: Arc::new(settings),
            worker: Mutex::new(Some(worker)),
        })
    }

    /// The station actions are run against.
    pub fn station(&self) -> &Arc<Station> {
        &self.shared.station
    }

    /// Settings used for queued runs.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Queue an interactive command.
    ///
    /// If other work is already waiting and `allow_queue` is false the
    /// command is dropped with a warning and `None` is returned; interactive
    /// commands never silently wait behind an unrelated backlog.
    pub fn enqueue(
        &self,
        name: impl Into<String>,
        allow_queue: bool,
        run: ActionFn,
    ) -> Option<ActionId> {
        let name = name.into();
        let mut state = self.shared.state.lock();
        if state.exit {
            warn!(action = %name, "Scheduler is shut down, dropping command");
            return None;
        }
        if !state.backlog.is_empty() && !allow_queue {
            warn!(
                action = %name,
                queued = state.backlog.len(),
                "Scheduler busy, dropping command"
            );
            return None;
        }
        Some(self.push(&mut state, name, None, run))
    }

    /// Queue a survey run. Surveys always queue.
    pub fn enqueue_survey(&self, name: impl Into<String>, survey: Arc<Survey>) -> AppResult<ActionId> {
        let name = name.into();
        let run_survey = survey.clone();
        let run: ActionFn = Box::new(move |station: Arc<Station>| {
            async move {
                let outcome = run_survey.run(&station).await?;
                info!(
                    state = ?outcome.state,
                    records = outcome.records,
                    skipped = outcome.skipped,
                    "Survey action finished"
                );
                Ok::<(), anyhow::Error>(())
            }
            .boxed()
        });

        let mut state = self.shared.state.lock();
        if state.exit {
            return Err(ScanError::Shutdown);
        }
        Ok(self.push(&mut state, name, Some(survey), run))
    }

    fn push(
        &self,
        state: &mut SchedulerState,
        name: String,
        survey: Option<Arc<Survey>>,
        run: ActionFn,
    ) -> ActionId {
        let action = Action {
            id: ActionId::new(),
            name,
            enqueued_at: Utc::now(),
            survey,
            run,
        };
        let id = action.id;
        info!(action_id = %id, action = %action.name, queued = state.backlog.len(), "Enqueued action");
        state.backlog.push_back(action);
        self.shared.work.notify_one();
        id
    }

    /// Validate a plan and queue it as a survey writing into `output_dir`.
    ///
    /// Invalid plans are rejected here, before anything is queued.
    pub fn enqueue_run(&self, plan: &PlanArgs, output_dir: impl Into<PathBuf>) -> AppResult<ActionId> {
        let survey = plan.build(&self.settings, output_dir)?;
        let name = format!("Survey: {}", survey.targets());
        self.enqueue_survey(name, Arc::new(survey))
    }

    /// Point the dish. Dropped if other work is waiting.
    pub fn point(&self, azimuth: f64, elevation: f64) -> Option<ActionId> {
        self.enqueue(
            format!("Point ({azimuth:.2}, {elevation:.2})"),
            false,
            Box::new(move |station: Arc<Station>| {
                async move { station.mount.point(azimuth, elevation).await }.boxed()
            }),
        )
    }

    /// Return the dish to its stow position. Dropped if other work is waiting.
    pub fn park(&self) -> Option<ActionId> {
        let (azimuth, elevation) = PARK_POSITION;
        self.enqueue(
            "Park",
            false,
            Box::new(move |station: Arc<Station>| {
                async move { station.mount.point(azimuth, elevation).await }.boxed()
            }),
        )
    }

    /// Set receiver gain. Dropped if other work is waiting.
    pub fn set_gain(&self, gain_db: f64) -> Option<ActionId> {
        self.enqueue(
            format!("Set gain {gain_db} dB"),
            false,
            Box::new(move |station: Arc<Station>| {
                async move { station.spectrometer().set_gain(gain_db).await }.boxed()
            }),
        )
    }

    /// Remove a queued action, or abort the running survey.
    ///
    /// Returns `false` for unknown ids and for a running non-survey action,
    /// which cannot be interrupted.
    pub fn cancel(&self, id: ActionId) -> bool {
        let mut state = self.shared.state.lock();
        if let Some(pos) = state.backlog.iter().position(|a| a.id == id) {
            if let Some(action) = state.backlog.remove(pos) {
                info!(action_id = %id, action = %action.name, "Cancelled queued action");
            }
            if state.is_idle() {
                self.shared.idle.notify_all();
            }
            return true;
        }

        match &state.active {
            Some(active) if active.id == id => match &active.survey {
                Some(survey) => {
                    info!(action_id = %id, action = %active.name, "Aborting running survey");
                    survey.abort();
                    true
                }
                None => {
                    warn!(action_id = %id, action = %active.name, "Running command cannot be interrupted");
                    false
                }
            },
            _ => {
                debug!(action_id = %id, "Cancel requested for unknown action");
                false
            }
        }
    }

    /// Active action and backlog, read under one lock.
    pub fn snapshot(&self) -> QueueSnapshot {
        let state = self.shared.state.lock();
        QueueSnapshot {
            active: state
                .active
                .as_ref()
                .map(|a| ActionInfo::new(a.id, &a.name, a.enqueued_at, a.survey.as_ref())),
            backlog: state.backlog.iter().map(Action::info).collect(),
        }
    }

    /// The survey in the active slot, for progress and time estimates.
    pub fn active_survey(&self) -> Option<Arc<Survey>> {
        self.shared
            .state
            .lock()
            .active
            .as_ref()
            .and_then(|a| a.survey.clone())
    }

    /// Block until nothing is queued or running. Returns `false` on timeout.
    pub fn wait_until_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        while !state.is_idle() {
            if self.shared.idle.wait_until(&mut state, deadline).timed_out() {
                return state.is_idle();
            }
        }
        true
    }

    /// Register an operator session; the pipeline stays up while any exist.
    pub async fn attach_session(&self) -> AppResult<SessionId> {
        self.shared
            .station
            .pipeline
            .attach_session()
            .await
            .map_err(|e| ScanError::hardware("attach_session", e))
    }

    /// Forget a session and let the worker re-check whether it can stop the
    /// pipeline.
    pub async fn detach_session(&self, id: SessionId) -> bool {
        let removed = self.shared.station.pipeline.detach_session(id).await;
        let mut state = self.shared.state.lock();
        state.idle_check_pending = true;
        self.shared.work.notify_one();
        removed
    }

    /// Stop the worker.
    ///
    /// A running survey is aborted cooperatively and its partial results are
    /// persisted; queued actions that never started are dropped. Idempotent.
    pub fn shutdown(&self) {
        {
            let mut state = self.shared.state.lock();
            if !state.exit {
                info!(queued = state.backlog.len(), "Shutting down action scheduler");
                state.exit = true;
                if let Some(survey) = state.active.as_ref().and_then(|a| a.survey.as_ref()) {
                    survey.abort();
                }
            }
            self.shared.work.notify_all();
        }

        if let Some(handle) = self.worker.lock().take() {
            if handle.join().is_err() {
                error!("Action scheduler worker panicked");
            }
        }
    }
}

impl Drop for ActionScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(shared: Arc<Shared>) {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "Could not build scheduler runtime");
            let mut state = shared.state.lock();
            state.exit = true;
            state.backlog.clear();
            shared.idle.notify_all();
            return;
        }
    };
    let pipeline = shared.station.pipeline.clone();

    let mut state = shared.state.lock();
    loop {
        if state.exit {
            break;
        }

        if let Some(action) = state.backlog.pop_front() {
            let Action {
                id,
                name,
                enqueued_at,
                survey,
                run,
            } = action;
            state.active = Some(ActiveSlot {
                id,
                name: name.clone(),
                enqueued_at,
                survey,
            });

            MutexGuard::unlocked(&mut state, || {
                if let Err(e) = runtime.block_on(pipeline.ensure_started()) {
                    error!(error = %format!("{e:#}"), "Could not start acquisition pipeline");
                }

                info!(action_id = %id, action = %name, "Running action");
                let station = shared.station.clone();
                let result =
                    runtime.block_on(AssertUnwindSafe(async move { run(station).await }).catch_unwind());
                match result {
                    Ok(Ok(())) => info!(action_id = %id, action = %name, "Action completed"),
                    Ok(Err(e)) => error!(
                        action_id = %id,
                        action = %name,
                        error = %format!("{e:#}"),
                        "Action failed"
                    ),
                    Err(_) => error!(action_id = %id, action = %name, "Action panicked"),
                }
            });

            state.active = None;
            if state.is_idle() {
                shared.idle.notify_all();
            }
            continue;
        }

        // Idle: free the receiver unless a session still watches it.
        state.idle_check_pending = false;
        let released = MutexGuard::unlocked(&mut state, || runtime.block_on(pipeline.release()));
        match released {
            Ok(true) => debug!("Scheduler idle, pipeline stopped"),
            Ok(false) => debug!("Scheduler idle, pipeline kept for sessions"),
            Err(e) => error!(error = %format!("{e:#}"), "Could not stop acquisition pipeline"),
        }

        if state.backlog.is_empty() && !state.exit && !state.idle_check_pending {
            shared.work.wait(&mut state);
        }
    }

    let dropped = state.backlog.len();
    if dropped > 0 {
        let names: Vec<_> = state.backlog.iter().map(|a| a.name.clone()).collect();
        info!(dropped, ?names, "Dropping queued actions at shutdown");
        state.backlog.clear();
    }
    shared.idle.notify_all();
    drop(state);

    if let Err(e) = runtime.block_on(pipeline.shutdown()) {
        error!(error = %format!("{e:#}"), "Could not shut down acquisition pipeline");
    }
    info!("Action scheduler stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SiteConfig;
    use crate::coords::{RefractionEnvironment, SiteTransform};
    use crate::hardware::mock::{MockMount, MockSpectrometer};
    use crate::hardware::{Pipeline, Spectrometer};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::mpsc;

    fn station() -> (Arc<MockSpectrometer>, Station) {
        let spectrometer = Arc::new(MockSpectrometer::new(1420.406e6, 2.4e6, 8));
        let sky = SiteTransform::new(SiteConfig::default(), RefractionEnvironment::new());
        let station = Station::new(
            Arc::new(MockMount::instant()),
            Arc::new(Pipeline::new(spectrometer.clone())),
            Arc::new(sky),
        );
        (spectrometer, station)
    }

    fn action<F>(work: F) -> ActionFn
    where
        F: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Box::new(move |_: Arc<Station>| work.boxed())
    }

    fn flag_action(flag: Arc<AtomicBool>) -> ActionFn {
        action(async move {
            flag.store(true, Ordering::SeqCst);
            Ok(())
        })
    }

    /// An action that holds the active slot until the returned sender fires.
    fn gate() -> (mpsc::Sender<()>, ActionFn) {
        let (tx, rx) = mpsc::channel::<()>();
        let run = action(async move {
            let _ = rx.recv();
            Ok(())
        });
        (tx, run)
    }

    fn wait_for_active(scheduler: &ActionScheduler, id: ActionId) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while scheduler.snapshot().active.map(|a| a.id) != Some(id) {
            assert!(Instant::now() < deadline, "action never became active");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn interactive_command_runs_when_idle() {
        let (_, station) = station();
        let mount = station.mount.clone();
        let scheduler = ActionScheduler::new(station, Settings::default()).unwrap();

        assert!(scheduler.point(123.0, 45.0).is_some());
        assert!(scheduler.wait_until_idle(Duration::from_secs(5)));

        let pos = tokio::runtime::Runtime::new()
            .unwrap()
            .block_on(mount.position())
            .unwrap();
        assert_eq!(pos.azimuth, 123.0);
    }

    #[test]
    fn park_returns_dish_to_stow() {
        let (_, station) = station();
        let mount = station.mount.clone();
        let scheduler = ActionScheduler::new(station, Settings::default()).unwrap();
        let rt = tokio::runtime::Runtime::new().unwrap();

        scheduler.point(90.0, 20.0).unwrap();
        assert!(scheduler.wait_until_idle(Duration::from_secs(5)));
        assert_eq!(rt.block_on(mount.position()).unwrap().azimuth, 90.0);

        let id = scheduler.park().unwrap();
        assert!(scheduler.wait_until_idle(Duration::from_secs(5)));
        assert!(!scheduler.snapshot().contains(id));
        let pos = rt.block_on(mount.position()).unwrap();
        assert_eq!((pos.azimuth, pos.elevation), PARK_POSITION);
    }

    #[test]
    fn park_is_dropped_behind_queued_work() {
        let (_, station) = station();
        let scheduler = ActionScheduler::new(station, Settings::default()).unwrap();

        let (release, blocker) = gate();
        let first = scheduler.enqueue("blocker", false, blocker).unwrap();
        wait_for_active(&scheduler, first);
        scheduler
            .enqueue("queued", true, action(async { Ok(()) }))
            .unwrap();

        assert!(scheduler.park().is_none());
        release.send(()).unwrap();
        assert!(scheduler.wait_until_idle(Duration::from_secs(5)));
    }

    #[test]
    fn cancelled_action_never_runs() {
        let (_, station) = station();
        let scheduler = ActionScheduler::new(station, Settings::default()).unwrap();

        let (release, blocker) = gate();
        let first = scheduler.enqueue("blocker", false, blocker).unwrap();
        wait_for_active(&scheduler, first);

        let ran = Arc::new(AtomicBool::new(false));
        let second = scheduler
            .enqueue("victim", true, flag_action(ran.clone()))
            .unwrap();

        assert!(scheduler.snapshot().contains(second));
        assert!(scheduler.cancel(second));
        assert!(!scheduler.snapshot().contains(second));
        assert!(!scheduler.cancel(second));

        release.send(()).unwrap();
        assert!(scheduler.wait_until_idle(Duration::from_secs(5)));
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[test]
    fn running_command_cannot_be_cancelled() {
        let (_, station) = station();
        let scheduler = ActionScheduler::new(station, Settings::default()).unwrap();
        let (release, blocker) = gate();
        let id = scheduler.enqueue("blocker", false, blocker).unwrap();
        wait_for_active(&scheduler, id);

        assert!(!scheduler.cancel(id));
        release.send(()).unwrap();
        assert!(scheduler.wait_until_idle(Duration::from_secs(5)));
    }

    #[test]
    fn failing_action_does_not_stop_worker() {
        let (_, station) = station();
        let scheduler = ActionScheduler::new(station, Settings::default()).unwrap();

        scheduler
            .enqueue("fails", true, action(async { Err(anyhow::anyhow!("boom")) }))
            .unwrap();
        scheduler
            .enqueue(
                "panics",
                true,
                action(async {
                    if true {
                        panic!("kaboom");
                    }
                    Ok(())
                }),
            )
            .unwrap();
        let ran = Arc::new(AtomicBool::new(false));
        scheduler
            .enqueue("after", true, flag_action(ran.clone()))
            .unwrap();

        assert!(scheduler.wait_until_idle(Duration::from_secs(5)));
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn idle_scheduler_stops_pipeline_unless_session_attached() {
        let (spectrometer, station) = station();
        let scheduler = ActionScheduler::new(station, Settings::default()).unwrap();
        let rt = tokio::runtime::Runtime::new().unwrap();

        scheduler.set_gain(42.0).unwrap();
        assert!(scheduler.wait_until_idle(Duration::from_secs(5)));
        // give the idle path a moment after the action clears
        std::thread::sleep(Duration::from_millis(100));
        assert!(!spectrometer.is_streaming());
        assert_eq!(spectrometer.gain(), 42.0);

        let session = rt.block_on(scheduler.attach_session()).unwrap();
        scheduler.point(10.0, 20.0).unwrap();
        assert!(scheduler.wait_until_idle(Duration::from_secs(5)));
        std::thread::sleep(Duration::from_millis(100));
        assert!(spectrometer.is_streaming());

        assert!(rt.block_on(scheduler.detach_session(session)));
        let deadline = Instant::now() + Duration::from_secs(5);
        while spectrometer.is_streaming() {
            assert!(Instant::now() < deadline, "pipeline never stopped");
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn shutdown_drops_backlog_and_rejects_new_work() {
        let (spectrometer, station) = station();
        let scheduler = ActionScheduler::new(station, Settings::default()).unwrap();

        let (release, blocker) = gate();
        let id = scheduler.enqueue("blocker", false, blocker).unwrap();
        wait_for_active(&scheduler, id);
        let ran = Arc::new(AtomicBool::new(false));
        scheduler
            .enqueue("never", true, flag_action(ran.clone()))
            .unwrap();

        let releaser = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            release.send(()).unwrap();
        });
        scheduler.shutdown();
        releaser.join().unwrap();

        assert!(!ran.load(Ordering::SeqCst));
        assert!(!spectrometer.is_streaming());
        assert!(scheduler.point(0.0, 0.0).is_none());
        assert!(scheduler.snapshot().is_idle());
    }
}
