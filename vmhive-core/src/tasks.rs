//! Background task scheduling
//!
//! A [`TaskGroup`] owns a set of [`ScheduledTask`]s and starts or stops them as
//! a unit. The daemon keeps two groups: general maintenance, and cluster-only
//! jobs that must stop as soon as the member leaves its cluster role.

use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{HiveError, HiveResult};

/// Body of a scheduled task; receives the group's cancellation token
pub type TaskFn = Arc<dyn Fn(CancellationToken) -> BoxFuture<'static, ()> + Send + Sync>;

/// How often a task runs
#[derive(Clone)]
pub enum Schedule {
    /// Fixed period. With `skip_first` the first run waits one period.
    Every { period: Duration, skip_first: bool },
    /// Evaluated before each run; `None` pauses until the next check
    Custom(Arc<dyn Fn() -> Option<Duration> + Send + Sync>),
}

/// Delay before re-evaluating a paused custom schedule
const PAUSED_RECHECK: Duration = Duration::from_secs(60);

impl Schedule {
    pub fn every(period: Duration) -> Self {
        Schedule::Every {
            period,
            skip_first: false,
        }
    }

    fn next_delay(&self, first: bool) -> (Duration, bool) {
        match self {
            Schedule::Every { period, skip_first } => {
                if first && !skip_first {
                    (Duration::ZERO, true)
                } else {
                    (*period, true)
                }
            }
            Schedule::Custom(next) => match next() {
                Some(delay) => (delay, true),
                None => (PAUSED_RECHECK, false),
            },
        }
    }
}

impl std::fmt::Debug for Schedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Schedule::Every { period, skip_first } => f
                .debug_struct("Every")
                .field("period", period)
                .field("skip_first", skip_first)
                .finish(),
            Schedule::Custom(_) => f.write_str("Custom"),
        }
    }
}

#[derive(Clone)]
pub struct ScheduledTask {
    pub name: String,
    pub func: TaskFn,
    pub schedule: Schedule,
    reset: Arc<Notify>,
}

impl ScheduledTask {
    pub fn new<F, Fut>(name: impl Into<String>, schedule: Schedule, func: F) -> Self
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let func: TaskFn = Arc::new(move |token: CancellationToken| -> BoxFuture<'static, ()> {
            Box::pin(func(token))
        });
        Self {
            name: name.into(),
            func,
            schedule,
            reset: Arc::new(Notify::new()),
        }
    }

    pub fn handle(&self) -> TaskHandle {
        TaskHandle {
            reset: self.reset.clone(),
        }
    }
}

/// Lets other components trigger an immediate run
#[derive(Clone, Debug)]
pub struct TaskHandle {
    reset: Arc<Notify>,
}

impl TaskHandle {
    pub fn reset(&self) {
        self.reset.notify_one();
    }
}

struct Running {
    token: CancellationToken,
    handles: Vec<(String, JoinHandle<()>)>,
}

pub struct TaskGroup {
    name: String,
    tasks: Mutex<Vec<ScheduledTask>>,
    running: Mutex<Option<Running>>,
}

impl std::fmt::Debug for TaskGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskGroup")
            .field("name", &self.name)
            .field("tasks", &self.tasks.lock().len())
            .field("running", &self.is_running())
            .finish()
    }
}

impl TaskGroup {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tasks: Mutex::new(Vec::new()),
            running: Mutex::new(None),
        }
    }

    /// Add a task; it starts with the group's next `start`
    pub fn add(&self, task: ScheduledTask) -> TaskHandle {
        let handle = task.handle();
        self.tasks.lock().push(task);
        handle
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Start every task. Cancelling `parent` also stops the group.
    pub fn start(&self, parent: &CancellationToken) {
        let mut running = self.running.lock();
        if running.is_some() {
            debug!(group = %self.name, "Task group already running");
            return;
        }

        let token = parent.child_token();
        let handles = self
            .tasks
            .lock()
            .iter()
            .cloned()
            .map(|task| {
                let name = task.name.clone();
                (name, tokio::spawn(run_task(task, token.clone())))
            })
            .collect::<Vec<_>>();

        info!(group = %self.name, tasks = handles.len(), "Started task group");
        *running = Some(Running { token, handles });
    }

    /// Stop all tasks, waiting at most `grace` for them to return.
    ///
    /// Tasks still running after the grace period are left to finish on
    /// their own and reported in the returned error.
    pub async fn stop(&self, grace: Duration) -> HiveResult<()> {
        let Some(running) = self.running.lock().take() else {
            return Ok(());
        };
        running.token.cancel();

        let deadline = tokio::time::Instant::now() + grace;
        let mut abandoned = Vec::new();
        for (name, handle) in running.handles {
            match tokio::time::timeout_at(deadline, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(group = %self.name, task = %name, error = %e, "Task failed"),
                Err(_) => abandoned.push(name),
            }
        }

        if abandoned.is_empty() {
            info!(group = %self.name, "Stopped task group");
            Ok(())
        } else {
            warn!(group = %self.name, tasks = ?abandoned, "Tasks did not stop within grace period");
            Err(HiveError::timeout(
                format!("stopping {} tasks: {}", self.name, abandoned.join(", ")),
                grace,
            ))
        }
    }
}

async fn run_task(task: ScheduledTask, token: CancellationToken) {
    let mut first = true;
    loop {
        let (delay, should_run) = task.schedule.next_delay(first);
        first = false;

        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
            _ = task.reset.notified() => {}
        }

        if token.is_cancelled() {
            break;
        }
        if should_run {
            debug!(task = %task.name, "Running scheduled task");
            (task.func)(token.clone()).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_task(name: &str, schedule: Schedule, counter: Arc<AtomicUsize>) -> ScheduledTask {
        ScheduledTask::new(name, schedule, move |_token| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_every_runs_immediately_then_periodically() {
        let counter = Arc::new(AtomicUsize::new(0));
        let group = TaskGroup::new("general");
        group.add(counting_task(
            "tick",
            Schedule::every(Duration::from_secs(10)),
            counter.clone(),
        ));

        let parent = CancellationToken::new();
        group.start(&parent);
        tokio::time::sleep(Duration::from_secs(25)).await;
        group.stop(Duration::from_secs(1)).await.unwrap();

        assert_eq!(counter.load(Ordering::SeqCst), 3);
        assert!(!group.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_skip_first_and_reset() {
        let counter = Arc::new(AtomicUsize::new(0));
        let group = TaskGroup::new("general");
        let handle = group.add(counting_task(
            "tick",
            Schedule::Every {
                period: Duration::from_secs(3600),
                skip_first: true,
            },
            counter.clone(),
        ));

        group.start(&CancellationToken::new());
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        handle.reset();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        group.stop(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_abandons_stuck_task() {
        let group = TaskGroup::new("cluster");
        group.add(ScheduledTask::new(
            "stuck",
            Schedule::every(Duration::from_secs(1)),
            |_token| async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            },
        ));

        group.start(&CancellationToken::new());
        tokio::time::sleep(Duration::from_millis(10)).await;

        let err = group.stop(Duration::from_secs(3)).await.unwrap_err();
        assert!(matches!(err, HiveError::Timeout { .. }));
        assert!(!group.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_parent_cancellation_stops_group() {
        let counter = Arc::new(AtomicUsize::new(0));
        let group = TaskGroup::new("general");
        group.add(counting_task(
            "tick",
            Schedule::every(Duration::from_secs(1)),
            counter.clone(),
        ));

        let parent = CancellationToken::new();
        group.start(&parent);
        tokio::time::sleep(Duration::from_millis(1500)).await;
        parent.cancel();
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(counter.load(Ordering::SeqCst), 2);
        group.stop(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_schedule_pause() {
        let counter = Arc::new(AtomicUsize::new(0));
        let group = TaskGroup::new("general");
        group.add(counting_task(
            "paused",
            Schedule::Custom(Arc::new(|| None)),
            counter.clone(),
        ));

        group.start(&CancellationToken::new());
        tokio::time::sleep(Duration::from_secs(300)).await;
        group.stop(Duration::from_secs(1)).await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }
}
