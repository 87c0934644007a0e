use crate::data_sync::config::RefreshConfig;
use crate::error::SchedulerError;
use ahash::RandomState;
use dashmap::DashMap;
use eyre::eyre;
use futures::FutureExt;
use futures::future::BoxFuture;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, info, warn};

const MIN_INTERVAL: Duration = Duration::from_millis(1);

pub type TaskFuture = BoxFuture<'static, eyre::Result<()>>;
pub type TaskCallback = Arc<dyn Fn() -> TaskFuture + Send + Sync>;

/// Wrap an async closure as a scheduler callback.
pub fn task_fn<F, Fut>(f: F) -> TaskCallback
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = eyre::Result<()>> + Send + 'static,
{
    Arc::new(move || f().boxed())
}

/// Point-in-time view of one registered task
#[derive(Debug, Clone)]
pub struct TaskStatus {
    pub name: String,
    pub interval: Duration,
    pub last_run_at: Option<Instant>,
    pub successful_runs: u64,
    pub failed_runs: u64,
}

struct TaskState {
    name: String,
    callback: TaskCallback,
    interval: Duration,
    last_run_at: Mutex<Option<Instant>>,
    successful_runs: AtomicU64,
    failed_runs: AtomicU64,
}

impl TaskState {
    /// Run the callback once. Errors and panics are logged and counted here,
    /// never propagated into the timer.
    async fn run(&self) -> eyre::Result<()> {
        let callback = Arc::clone(&self.callback);
        let outcome = AssertUnwindSafe(async move { callback().await }).catch_unwind().await;

        let result = match outcome {
            Ok(result) => result,
            Err(panic) => Err(eyre!("task panicked: {}", panic_message(panic.as_ref()))),
        };

        match &result {
            Ok(()) => {
                *self.last_run_at.lock().unwrap_or_else(|e| e.into_inner()) = Some(Instant::now());
                self.successful_runs.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.failed_runs.fetch_add(1, Ordering::Relaxed);
                warn!("Refresh task {} failed: {:#}", self.name, e);
            }
        }
        result
    }

    fn status(&self) -> TaskStatus {
        TaskStatus {
            name: self.name.clone(),
            interval: self.interval,
            last_run_at: *self.last_run_at.lock().unwrap_or_else(|e| e.into_inner()),
            successful_runs: self.successful_runs.load(Ordering::Relaxed),
            failed_runs: self.failed_runs.load(Ordering::Relaxed),
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// A registered task and its timer. Dropping it stops the timer.
struct RefreshTask {
    state: Arc<TaskState>,
    timer: JoinHandle<()>,
}

impl Drop for RefreshTask {
    fn drop(&mut self) {
        self.timer.abort();
    }
}

/// Each tick runs detached so a stopped timer never cancels work in flight.
fn spawn_tick(state: Arc<TaskState>) {
    tokio::spawn(async move {
        let _ = state.run().await;
    });
}

async fn run_timer(state: Arc<TaskState>, paused: Arc<AtomicBool>) {
    let mut ticker = interval_at(Instant::now() + state.interval, state.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        // pausing gates execution only, the timer keeps its phase
        if paused.load(Ordering::SeqCst) {
            continue;
        }
        spawn_tick(Arc::clone(&state));
    }
}

struct SchedulerInner {
    tasks: DashMap<String, RefreshTask, RandomState>,
    paused: Arc<AtomicBool>,
    config: RefreshConfig,
}

/// Named repeating tasks with a global pause gate.
///
/// A failing or panicking callback only affects its own tick; the task keeps
/// its interval and other tasks are untouched. Must be used from inside a
/// tokio runtime.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl Scheduler {
    pub fn new(config: RefreshConfig) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                tasks: DashMap::with_hasher(RandomState::new()),
                paused: Arc::new(AtomicBool::new(false)),
                config,
            }),
        }
    }

    /// Register (or replace) a task, run it once unless paused, and start its
    /// timer. Without an interval the per-name default from config is used.
    pub fn register(&self, name: impl Into<String>, callback: TaskCallback, interval: Option<Duration>) {
        let name = name.into();
        let mut interval = interval.unwrap_or_else(|| self.inner.config.default_interval(&name));
        if interval < MIN_INTERVAL {
            warn!("Interval {:?} for task {} is too short, using {:?}", interval, name, MIN_INTERVAL);
            interval = MIN_INTERVAL;
        }

        if self.inner.tasks.remove(&name).is_some() {
            debug!("Replacing refresh task {}", name);
        }

        let state = Arc::new(TaskState {
            name: name.clone(),
            callback,
            interval,
            last_run_at: Mutex::new(None),
            successful_runs: AtomicU64::new(0),
            failed_runs: AtomicU64::new(0),
        });

        if !self.is_paused() {
            spawn_tick(Arc::clone(&state));
        }
        let timer = tokio::spawn(run_timer(Arc::clone(&state), Arc::clone(&self.inner.paused)));

        info!("Registered refresh task {} every {:?}", name, interval);
        self.inner.tasks.insert(name, RefreshTask { state, timer });
    }

    /// Stop a task's timer and forget it. Returns false for unknown names.
    pub fn stop(&self, name: &str) -> bool {
        let stopped = self.inner.tasks.remove(name).is_some();
        if stopped {
            info!("Stopped refresh task {}", name);
        }
        stopped
    }

    pub fn stop_all(&self) {
        let count = self.inner.tasks.len();
        self.inner.tasks.clear();
        info!("Stopped {} refresh tasks", count);
    }

    pub fn pause(&self) {
        if !self.inner.paused.swap(true, Ordering::SeqCst) {
            info!("Refresh scheduler paused");
        }
    }

    /// Lift the pause and immediately run every registered task once.
    pub fn resume(&self) {
        self.inner.paused.store(false, Ordering::SeqCst);
        let states: Vec<Arc<TaskState>> =
            self.inner.tasks.iter().map(|task| Arc::clone(&task.state)).collect();
        info!("Refresh scheduler resumed, re-syncing {} tasks", states.len());
        for state in states {
            spawn_tick(state);
        }
    }

    pub fn is_paused(&self) -> bool {
        self.inner.paused.load(Ordering::SeqCst)
    }

    /// Run a task once out of band, whatever the pause state.
    pub async fn trigger(&self, name: &str) -> Result<(), SchedulerError> {
        let state = self
            .inner
            .tasks
            .get(name)
            .map(|task| Arc::clone(&task.state))
            .ok_or_else(|| SchedulerError::UnknownTask(name.to_string()))?;

        state
            .run()
            .await
            .map_err(|source| SchedulerError::TaskFailed { name: name.to_string(), source })
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.inner.tasks.contains_key(name)
    }

    pub fn task_count(&self) -> usize {
        self.inner.tasks.len()
    }

    pub fn task_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.tasks.iter().map(|task| task.key().clone()).collect();
        names.sort();
        names
    }

    pub fn task_status(&self, name: &str) -> Option<TaskStatus> {
        self.inner.tasks.get(name).map(|task| task.state.status())
    }

    pub fn config(&self) -> &RefreshConfig {
        &self.inner.config
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(RefreshConfig::default())
    }
}
