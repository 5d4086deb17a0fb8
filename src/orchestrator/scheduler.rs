//! Pool scheduler.
//!
//! Tasks are admitted into a pool as `queued` and launched in priority
//! order (FIFO among equal priorities) while the pool has free slots. The
//! in-memory live table is the authority on what is running: a task is
//! written `running` before its handle is registered, both under the
//! scheduling lock, and a `running` row with no live handle is failed as an
//! orphan. Finished tasks report their pool on a channel; a consumer task
//! re-schedules that pool.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use super::runner::BackgroundRunner;
use super::{ensure_session, finish_task, EngineDeps, RunEnd};
use crate::agent::AgentService;
use crate::models::pool::Pool;
use crate::models::task::{SpawnRequest, Task, TaskKind, TaskStatus};
use crate::notify::AgentEvent;
use crate::persistence::pool_repo::PoolRepo;
use crate::persistence::reconcile::{reconcile_orphans, ReconcileReport};
use crate::persistence::session_repo::SessionRepo;
use crate::persistence::task_repo::TaskRepo;
use crate::{AppError, Result};

/// Error text for a `running` row found without a live handle.
pub const LOST_HANDLE_MESSAGE: &str = "orphaned: no live handle for running task";

const DONE_CHANNEL_CAPACITY: usize = 256;

type TaskFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

/// A launched task.
struct LiveTask {
    pool_id: String,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Pool scheduler; share it behind the `Arc` returned by [`start`](Self::start).
pub struct Scheduler {
    deps: EngineDeps,
    pools: PoolRepo,
    tasks: TaskRepo,
    sessions: SessionRepo,
    agent: AgentService,
    runner: BackgroundRunner,
    live: Mutex<HashMap<String, LiveTask>>,
    schedule_lock: Mutex<()>,
    done_tx: mpsc::Sender<String>,
    consumer: Mutex<Option<JoinHandle<()>>>,
    shutdown: CancellationToken,
}

impl Scheduler {
    /// Reconcile orphaned work, then start the scheduler.
    ///
    /// Pools that still hold queued tasks are scheduled immediately.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the risk patterns are invalid, or
    /// `AppError::Db` if reconciliation fails.
    pub async fn start(
        deps: EngineDeps,
        agent: AgentService,
    ) -> Result<(Arc<Self>, ReconcileReport)> {
        let report = reconcile_orphans(&deps.db).await?;
        let runner =
            BackgroundRunner::new(deps.clone())?.with_session_cancels(agent.session_cancels());
        let (done_tx, done_rx) = mpsc::channel(DONE_CHANNEL_CAPACITY);

        let scheduler = Arc::new(Self {
            pools: PoolRepo::new(Arc::clone(&deps.db)),
            tasks: TaskRepo::new(Arc::clone(&deps.db)),
            sessions: SessionRepo::new(Arc::clone(&deps.db)),
            agent,
            runner,
            live: Mutex::new(HashMap::new()),
            schedule_lock: Mutex::new(()),
            done_tx,
            consumer: Mutex::new(None),
            shutdown: CancellationToken::new(),
            deps,
        });

        let consumer = spawn_reschedule_consumer(Arc::downgrade(&scheduler), done_rx);
        *scheduler.consumer.lock().await = Some(consumer);

        for pool_id in scheduler.tasks.pools_with_queued().await? {
            scheduler.schedule(&pool_id).await?;
        }

        info!(?report, "scheduler started");
        Ok((scheduler, report))
    }

    /// Create a pool.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Validation` if `max_concurrent_agents` is zero.
    pub async fn create_pool(
        &self,
        owner_id: &str,
        name: &str,
        max_concurrent_agents: u32,
    ) -> Result<Pool> {
        if max_concurrent_agents == 0 {
            return Err(AppError::Validation(
                "max_concurrent_agents must be at least 1".into(),
            ));
        }
        let pool = self
            .pools
            .create(&Pool::new(owner_id.to_owned(), name.to_owned(), max_concurrent_agents))
            .await?;
        info!(pool_id = %pool.id, owner_id, max_concurrent_agents, "pool created");
        Ok(pool)
    }

    /// The most recent pool owned by a chat/session.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn get_pool_by_session(&self, owner_id: &str) -> Result<Option<Pool>> {
        self.pools.get_by_owner(owner_id).await
    }

    /// Queue a task in a pool and try to launch it straight away.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown pool,
    /// `AppError::Validation` for an empty goal or zero iteration budget, or
    /// `AppError::Db`.
    pub async fn spawn_agent(&self, pool_id: &str, request: SpawnRequest) -> Result<Task> {
        if self.pools.get_by_id(pool_id).await?.is_none() {
            return Err(AppError::NotFound(format!("pool {pool_id} not found")));
        }
        if request.goal.trim().is_empty() {
            return Err(AppError::Validation("task goal must not be empty".into()));
        }
        if request.max_iterations == Some(0) {
            return Err(AppError::Validation("max_iterations must be at least 1".into()));
        }

        let task = Task::new(
            pool_id.to_owned(),
            request,
            self.deps.config.scheduler.max_iterations,
        );
        let task = self.tasks.create(&task).await?;
        info!(
            task_id = %task.id,
            pool_id,
            priority = task.priority,
            kind = ?task.kind,
            "task queued"
        );
        self.emit_task(&task.id, pool_id, TaskStatus::Queued);

        self.schedule(pool_id).await?;
        self.tasks.require(&task.id).await
    }

    /// Launch queued tasks of a pool while it has free slots.
    ///
    /// Returns the ids of the tasks launched.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown pool or `AppError::Db`.
    pub async fn schedule(&self, pool_id: &str) -> Result<Vec<String>> {
        let span = info_span!("schedule", pool_id);
        async {
            let _guard = self.schedule_lock.lock().await;
            if self.shutdown.is_cancelled() {
                return Ok(Vec::new());
            }

            let pool = self
                .pools
                .get_by_id(pool_id)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("pool {pool_id} not found")))?;

            self.sweep_lost_handles(pool_id).await?;

            let running = self.live_count(pool_id).await;
            if running >= pool.max_concurrent_agents {
                debug!(running, max = pool.max_concurrent_agents, "pool is full");
                return Ok(Vec::new());
            }

            let queued = self
                .tasks
                .list_queued(pool_id, pool.max_concurrent_agents - running)
                .await?;
            let mut launched = Vec::with_capacity(queued.len());
            for task in queued {
                match self.launch(task).await {
                    Ok(id) => launched.push(id),
                    Err(err) => error!(%err, "failed to launch task"),
                }
            }
            Ok(launched)
        }
        .instrument(span)
        .await
    }

    /// Stop a task.
    ///
    /// A live task is cancelled and finishes as failed ("cancelled") with
    /// its session stopped. A queued or paused task is failed directly.
    /// Returns `false` if the task had already finished.
    ///
    /// Runs under the scheduling lock so a task cannot be launched between
    /// the live-table check and the write.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown task or `AppError::Db`.
    pub async fn stop(&self, task_id: &str) -> Result<bool> {
        let _guard = self.schedule_lock.lock().await;
        if let Some(live) = self.live.lock().await.get(task_id) {
            info!(task_id, "cancelling live task");
            live.cancel.cancel();
            return Ok(true);
        }

        let task = self.tasks.require(task_id).await?;
        if !matches!(task.status, TaskStatus::Queued | TaskStatus::Paused) {
            return Ok(false);
        }
        let changed = self.tasks.cancel_waiting(task_id, "cancelled").await?;
        if changed {
            if let Some(ref session_id) = task.agent_session_id {
                self.sessions.stop(session_id).await?;
            }
            info!(task_id, "queued task cancelled");
            self.emit_task(task_id, &task.pool_id, TaskStatus::Failed);
        }
        Ok(changed)
    }

    /// Hold a queued task back from scheduling.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidTransition` unless the task is queued.
    pub async fn pause(&self, task_id: &str) -> Result<Task> {
        let _guard = self.schedule_lock.lock().await;
        let task = self.tasks.update_status(task_id, TaskStatus::Paused).await?;
        info!(task_id, "task paused");
        self.emit_task(task_id, &task.pool_id, TaskStatus::Paused);
        Ok(task)
    }

    /// Return a paused task to the queue and schedule its pool.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidTransition` unless the task is paused.
    pub async fn resume(&self, task_id: &str) -> Result<Task> {
        let task = {
            let _guard = self.schedule_lock.lock().await;
            self.tasks.update_status(task_id, TaskStatus::Queued).await?
        };
        info!(task_id, "task resumed");
        self.emit_task(task_id, &task.pool_id, TaskStatus::Queued);
        self.schedule(&task.pool_id).await?;
        self.tasks.require(task_id).await
    }

    /// Running and queued tasks of a pool, running first.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn active_tasks(&self, pool_id: &str) -> Result<Vec<Task>> {
        self.tasks.list_active(pool_id).await
    }

    /// Number of live tasks across all pools.
    pub async fn live_tasks(&self) -> usize {
        self.live.lock().await.len()
    }

    /// Cancel every live task and wait for them to unwind.
    ///
    /// Tasks that do not finish within the configured grace period are
    /// aborted and failed as orphans.
    pub async fn shutdown(&self) {
        let span = info_span!("scheduler_shutdown");
        async {
            self.shutdown.cancel();
            let live: Vec<(String, LiveTask)> = self.live.lock().await.drain().collect();
            info!(count = live.len(), "stopping live tasks");

            let grace = Duration::from_secs(self.deps.config.scheduler.shutdown_grace_seconds);
            for (task_id, mut task) in live {
                task.cancel.cancel();
                if tokio::time::timeout(grace, &mut task.handle).await.is_err() {
                    warn!(task_id, "task did not stop within grace period, aborting");
                    task.handle.abort();
                    if let Err(err) = self.tasks.force_fail(&task_id, LOST_HANDLE_MESSAGE).await {
                        error!(task_id, %err, "failed to mark aborted task");
                    }
                }
            }

            if let Some(consumer) = self.consumer.lock().await.take() {
                if let Err(err) = consumer.await {
                    warn!(%err, "reschedule consumer ended abnormally");
                }
            }
        }
        .instrument(span)
        .await;
    }

    async fn live_count(&self, pool_id: &str) -> u32 {
        let live = self.live.lock().await;
        let count = live.values().filter(|t| t.pool_id == pool_id).count();
        u32::try_from(count).unwrap_or(u32::MAX)
    }

    async fn sweep_lost_handles(&self, pool_id: &str) -> Result<()> {
        let running = self.tasks.list_running(pool_id).await?;
        for task in running {
            if self.live.lock().await.contains_key(&task.id) {
                continue;
            }
            warn!(task_id = %task.id, "running task has no live handle, failing it");
            if self.tasks.force_fail(&task.id, LOST_HANDLE_MESSAGE).await? {
                if let Some(ref session_id) = task.agent_session_id {
                    let session = self.sessions.require(session_id).await?;
                    if !session.status.is_terminal() {
                        self.sessions.fail(session_id, LOST_HANDLE_MESSAGE).await?;
                    }
                }
                self.emit_task(&task.id, pool_id, TaskStatus::Failed);
            }
        }
        Ok(())
    }

    /// Start one queued task. Caller holds the scheduling lock.
    async fn launch(&self, task: Task) -> Result<String> {
        let session = ensure_session(&self.deps.db, &task).await?;
        let task = self.tasks.mark_running(&task.id).await?;
        self.emit_task(&task.id, &task.pool_id, TaskStatus::Running);

        let cancel = self.shutdown.child_token();
        let job = self.job(&task, session.id, cancel.clone());
        let task_id = task.id.clone();
        let pool_id = task.pool_id.clone();
        let db = Arc::clone(&self.deps.db);
        let notifier = self.deps.notifier.clone();
        let done_tx = self.done_tx.clone();
        let span = info_span!("task", task_id = %task_id, pool_id = %pool_id);

        // Registration happens under the live lock so the completion path
        // cannot remove the entry before it exists.
        let mut live = self.live.lock().await;
        let handle = tokio::spawn(
            {
                let task_id = task_id.clone();
                async move {
                    if let Err(err) = job.await {
                        warn!(%err, "task ended with error");
                        if let Err(err) =
                            finish_task(&db, &notifier, &task_id, RunEnd::from_error(&err)).await
                        {
                            error!(%err, "failed to record task failure");
                        }
                    }
                    if done_tx.send(task_id).await.is_err() {
                        debug!("scheduler gone, skipping reschedule");
                    }
                }
            }
            .instrument(span),
        );
        live.insert(
            task_id.clone(),
            LiveTask {
                pool_id,
                cancel,
                handle,
            },
        );
        drop(live);

        info!(task_id = %task_id, kind = ?task.kind, "task launched");
        Ok(task_id)
    }

    fn job(&self, task: &Task, session_id: String, cancel: CancellationToken) -> TaskFuture {
        match task.kind {
            TaskKind::Background => {
                let runner = self.runner.clone();
                let task_id = task.id.clone();
                Box::pin(async move {
                    runner.run(&task_id, cancel).await?;
                    Ok(())
                })
            }
            TaskKind::Interactive => {
                let agent = self.agent.clone();
                let deps = self.deps.clone();
                let task_id = task.id.clone();
                let target = task.target_server_id.clone();
                Box::pin(async move {
                    let provider = deps.providers.require(None)?;
                    let executor = deps.executors.connect(target.as_deref()).await?;
                    let session = agent
                        .run_loop_with_cancel(&session_id, provider, executor, cancel)
                        .await?;
                    let end = RunEnd::from_session(&session);
                    finish_task(&deps.db, &deps.notifier, &task_id, end).await?;
                    Ok(())
                })
            }
        }
    }

    async fn on_finished(&self, task_id: &str) {
        let entry = self.live.lock().await.remove(task_id);
        let Some(entry) = entry else {
            return;
        };
        if let Err(err) = self.schedule(&entry.pool_id).await {
            error!(pool_id = %entry.pool_id, %err, "reschedule after completion failed");
        }
    }

    fn emit_task(&self, task_id: &str, pool_id: &str, status: TaskStatus) {
        self.deps.notifier.emit(&AgentEvent::TaskStatusChanged {
            task_id: task_id.to_owned(),
            pool_id: pool_id.to_owned(),
            status,
        });
    }
}

/// Consume completion reports and re-schedule the finished task's pool.
fn spawn_reschedule_consumer(
    scheduler: Weak<Scheduler>,
    mut done_rx: mpsc::Receiver<String>,
) -> JoinHandle<()> {
    tokio::spawn(
        async move {
            loop {
                let Some(strong) = scheduler.upgrade() else {
                    break;
                };
                let cancel = strong.shutdown.clone();
                drop(strong);

                let task_id = tokio::select! {
                    () = cancel.cancelled() => break,
                    next = done_rx.recv() => match next {
                        Some(task_id) => task_id,
                        None => break,
                    },
                };

                let Some(strong) = scheduler.upgrade() else {
                    break;
                };
                strong.on_finished(&task_id).await;
            }
            info!("reschedule consumer shutting down");
        }
        .instrument(info_span!("reschedule_consumer")),
    )
}
