//! Top-level orchestrator
//!
//! A run moves through `Created -> Planning -> Executing -> Aggregating ->
//! Completed`, or to `Failed` when its plan cannot be computed. During
//! `Executing` the orchestrator walks the plan wave by wave, hands ready tasks
//! to the [`TaskRunner`] on the shared worker pool and folds every envelope
//! into the run as it arrives.

use crate::aggregator::{MinimumViableSet, ResultAggregator};
use crate::config::OrchestratorConfig;
use crate::guard::SharedResourceGuard;
use crate::planner::{ExecutionPlan, ExecutionPlanner};
use crate::registry::TaskRegistry;
use crate::run::{RunInstance, RunPhase};
use crate::runner::TaskRunner;
use crate::stats::{RunStats, StatsSnapshot};
use crate::store::ReportStore;
use finflash_core::context::keys;
use finflash_core::{
    AggregatedReport, ErrorKind, ExecutionMode, Payload, Result, ResultEnvelope, RunRequest,
    TaskContext, TaskDescriptor, TaskKind, TaskState,
};
use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Instant;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Progress of a streamed run
///
/// One `TaskCompleted` per folded envelope, in fold order, then exactly one
/// terminal event: `RunFinished` carrying the report, or `RunAborted` if the
/// engine itself failed mid-run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    TaskCompleted {
        run_id: Uuid,
        kind: TaskKind,
        state: TaskState,
        envelope: ResultEnvelope,
    },
    RunFinished {
        report: Box<AggregatedReport>,
    },
    RunAborted {
        run_id: Uuid,
        error: String,
    },
}

type EventSender = mpsc::Sender<RunEvent>;

struct Shared {
    registry: TaskRegistry,
    config: OrchestratorConfig,
    guard: Arc<SharedResourceGuard>,
    runner: Arc<TaskRunner>,
    aggregator: ResultAggregator,
    store: Option<Arc<dyn ReportStore>>,
    stats: RunStats,
}

/// A run whose plan is computed and whose tasks are pending
struct PreparedRun {
    run: RunInstance,
    plan: ExecutionPlan,
    payload: Value,
    title: Option<String>,
}

/// Accepts analysis requests and drives them to an aggregated report
///
/// Cloning is cheap; clones share the registry, the resource guard and the
/// statistics.
#[derive(Clone)]
pub struct Orchestrator {
    shared: Arc<Shared>,
}

/// Builder for [`Orchestrator`]
pub struct OrchestratorBuilder {
    registry: TaskRegistry,
    config: Option<OrchestratorConfig>,
    guard: Option<Arc<SharedResourceGuard>>,
    store: Option<Arc<dyn ReportStore>>,
}

impl OrchestratorBuilder {
    /// Set the configuration (defaults otherwise)
    pub fn config(mut self, config: OrchestratorConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Share an existing resource guard instead of building one from the config
    pub fn guard(mut self, guard: Arc<SharedResourceGuard>) -> Self {
        self.guard = Some(guard);
        self
    }

    /// Persist every finished report to `store`
    pub fn store(mut self, store: Arc<dyn ReportStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn build(self) -> Result<Orchestrator> {
        let config = self.config.unwrap_or_default();
        config.validate()?;

        let guard = self
            .guard
            .unwrap_or_else(|| Arc::new(SharedResourceGuard::from_config(&config)));
        let runner = Arc::new(TaskRunner::new(Arc::clone(&guard), &config));
        let aggregator =
            ResultAggregator::new(MinimumViableSet::new(config.minimum_viable.clone()));

        info!(
            tasks = self.registry.len(),
            workers = guard.max_slots(),
            "Orchestrator ready"
        );

        Ok(Orchestrator {
            shared: Arc::new(Shared {
                registry: self.registry,
                config,
                guard,
                runner,
                aggregator,
                store: self.store,
                stats: RunStats::new(),
            }),
        })
    }
}

impl Orchestrator {
    /// Create an orchestrator with its own resource guard and no report store
    pub fn new(registry: TaskRegistry, config: OrchestratorConfig) -> Result<Self> {
        Self::builder(registry).config(config).build()
    }

    pub fn builder(registry: TaskRegistry) -> OrchestratorBuilder {
        OrchestratorBuilder {
            registry,
            config: None,
            guard: None,
            store: None,
        }
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.shared.registry
    }

    pub fn guard(&self) -> &Arc<SharedResourceGuard> {
        &self.shared.guard
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.shared.config
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Compute the plan a request would run, without running it
    pub fn plan_for(&self, request: &RunRequest) -> Result<ExecutionPlan> {
        let selected = self
            .shared
            .registry
            .select(request.payload.shape(), request.tasks.as_ref())?;
        ExecutionPlanner::new(&self.shared.registry).plan(&selected, request.mode)
    }

    /// Run a request to completion
    ///
    /// Task failures and run timeouts are reported inside the returned
    /// report. An error is returned only when the run cannot be planned.
    pub async fn submit(&self, request: RunRequest) -> Result<AggregatedReport> {
        let prepared = self.prepare(request)?;
        self.drive(prepared, None).await
    }

    /// Run a request in the background and stream its progress
    pub async fn submit_streaming(&self, request: RunRequest) -> Result<ReceiverStream<RunEvent>> {
        let prepared = self.prepare(request)?;
        let (tx, rx) = mpsc::channel(prepared.plan.task_count() + 1);

        let orchestrator = self.clone();
        tokio::spawn(async move { orchestrator.publish(prepared, tx).await });

        Ok(ReceiverStream::new(rx))
    }

    /// Drive a prepared run, always ending the stream with a terminal event
    async fn publish(&self, prepared: PreparedRun, tx: EventSender) {
        let run_id = prepared.run.run_id();
        if let Err(err) = self.drive(prepared, Some(tx.clone())).await {
            error!(run_id = %run_id, error = %err, "Streamed run aborted");
            let _ = tx
                .send(RunEvent::RunAborted {
                    run_id,
                    error: err.to_string(),
                })
                .await;
        }
    }

    /// Run several requests concurrently on the shared worker pool
    ///
    /// Results come back in request order.
    pub async fn submit_batch(&self, requests: Vec<RunRequest>) -> Vec<Result<AggregatedReport>> {
        futures::future::join_all(requests.into_iter().map(|request| self.submit(request))).await
    }

    fn prepare(&self, request: RunRequest) -> Result<PreparedRun> {
        let mut run = RunInstance::new(&request);
        info!(
            run_id = %run.run_id(),
            mode = %request.mode,
            source = %request.source,
            payload = %run.payload_shape(),
            "Run created"
        );

        run.advance(RunPhase::Planning)?;
        let plan = match self.plan_for(&request) {
            Ok(plan) => plan,
            Err(err) => {
                let _ = run.advance(RunPhase::Failed);
                warn!(run_id = %run.run_id(), error = %err, "Run planning failed");
                return Err(err);
            }
        };

        let payload = request.payload.normalized();
        let title = match &payload {
            Payload::Text { title, .. } => title.clone(),
            _ => None,
        };

        run.add_tasks(plan.tasks());
        Ok(PreparedRun {
            run,
            plan,
            payload: serde_json::to_value(&payload)?,
            title,
        })
    }

    async fn drive(
        &self,
        prepared: PreparedRun,
        events: Option<EventSender>,
    ) -> Result<AggregatedReport> {
        let PreparedRun {
            mut run,
            plan,
            payload,
            title,
        } = prepared;
        let events = events.as_ref();
        let run_id = run.run_id();

        run.advance(RunPhase::Executing)?;
        let deadline = Instant::now().checked_add(self.run_deadline(&plan));

        for wave in &plan.waves {
            if deadline_passed(deadline) {
                self.skip_unstarted(&mut run, events).await;
                break;
            }

            let mut ready = Vec::with_capacity(wave.len());
            for kind in &wave.tasks {
                let unmet: Vec<TaskKind> = plan
                    .dependencies_of(kind)
                    .into_iter()
                    .flatten()
                    .filter(|dep| !run.succeeded(dep))
                    .cloned()
                    .collect();

                if unmet.is_empty() {
                    ready.push(kind.clone());
                } else {
                    debug!(run_id = %run_id, task = %kind, "Skipping task with unmet dependencies");
                    let envelope = ResultEnvelope::dependency_unmet(kind.clone(), &unmet);
                    self.record(&mut run, envelope, events).await;
                }
            }

            if ready.is_empty() {
                continue;
            }

            let concurrent = match plan.mode {
                ExecutionMode::Sequential => false,
                ExecutionMode::Parallel => true,
                ExecutionMode::Adaptive => {
                    ready.len() > self.shared.config.adaptive_threshold
                        && self.shared.guard.has_budget(&self.limit_keys(&ready)?)
                }
            };
            debug!(
                run_id = %run_id,
                wave = wave.index,
                tasks = ready.len(),
                concurrent,
                "Dispatching wave"
            );

            let task_input = TaskInputs {
                plan: &plan,
                payload: &payload,
                title: title.as_deref(),
            };
            if concurrent {
                self.dispatch_concurrent(&mut run, &task_input, &ready, events)
                    .await?;
            } else if !self
                .dispatch_sequential(&mut run, &task_input, &ready, deadline, events)
                .await?
            {
                self.skip_unstarted(&mut run, events).await;
                break;
            }
        }

        run.advance(RunPhase::Aggregating)?;
        let report = self.shared.aggregator.finalize(&run)?;
        run.advance(RunPhase::Completed)?;

        self.shared.stats.record(&report);
        if let Some(store) = &self.shared.store {
            if let Err(err) = store.save(&report).await {
                error!(run_id = %run_id, error = %err, "Failed to persist report");
            }
        }

        info!(
            run_id = %run_id,
            status = %report.status,
            succeeded = report.succeeded(),
            failed = report.failed(),
            skipped = report.skipped(),
            cache_hits = report.cache_hits(),
            "Run finished"
        );

        if let Some(tx) = events {
            let _ = tx
                .send(RunEvent::RunFinished {
                    report: Box::new(report.clone()),
                })
                .await;
        }
        Ok(report)
    }

    /// Dispatch a whole wave and fold results in completion order
    async fn dispatch_concurrent(
        &self,
        run: &mut RunInstance,
        inputs: &TaskInputs<'_>,
        ready: &[TaskKind],
        events: Option<&EventSender>,
    ) -> Result<()> {
        let mut in_flight = FuturesUnordered::new();
        for kind in ready {
            let handle = self.spawn_task(run, inputs, kind)?;
            let kind = kind.clone();
            in_flight.push(async move { (kind, handle.await) });
        }

        while let Some((kind, joined)) = in_flight.next().await {
            self.record(run, joined_envelope(kind, joined), events).await;
        }
        Ok(())
    }

    /// Dispatch one task at a time; returns `false` if the deadline cut the wave short
    async fn dispatch_sequential(
        &self,
        run: &mut RunInstance,
        inputs: &TaskInputs<'_>,
        ready: &[TaskKind],
        deadline: Option<Instant>,
        events: Option<&EventSender>,
    ) -> Result<bool> {
        for kind in ready {
            if deadline_passed(deadline) {
                return Ok(false);
            }
            let handle = self.spawn_task(run, inputs, kind)?;
            let envelope = joined_envelope(kind.clone(), handle.await);
            self.record(run, envelope, events).await;
        }
        Ok(true)
    }

    /// Mark a task running and hand it to the worker pool
    fn spawn_task(
        &self,
        run: &mut RunInstance,
        inputs: &TaskInputs<'_>,
        kind: &TaskKind,
    ) -> Result<JoinHandle<ResultEnvelope>> {
        let descriptor = self.shared.registry.resolve(kind)?.clone();
        let capability = self.shared.registry.capability(kind)?;
        let input = inputs.input_for(&descriptor, run);

        let mut ctx = TaskContext::new(run.run_id(), kind.clone(), run.source());
        if let Some(title) = inputs.title {
            ctx = ctx.with_metadata(keys::TITLE, Value::String(title.to_string()));
        }

        run.mark_running(kind)?;

        let runner = Arc::clone(&self.shared.runner);
        Ok(tokio::spawn(async move {
            runner
                .run(&descriptor, capability.as_ref(), input, &ctx)
                .await
        }))
    }

    /// Fold an envelope and publish it to streaming subscribers
    async fn record(
        &self,
        run: &mut RunInstance,
        envelope: ResultEnvelope,
        events: Option<&EventSender>,
    ) {
        let kind = envelope.kind.clone();
        match self.shared.aggregator.fold(run, envelope.clone()) {
            Ok(state) => {
                if let Some(tx) = events {
                    let _ = tx
                        .send(RunEvent::TaskCompleted {
                            run_id: run.run_id(),
                            kind,
                            state,
                            envelope,
                        })
                        .await;
                }
            }
            Err(err) => {
                error!(run_id = %run.run_id(), task = %kind, error = %err, "Failed to fold envelope");
            }
        }
    }

    /// Mark every undispatched task as skipped by the run deadline
    async fn skip_unstarted(&self, run: &mut RunInstance, events: Option<&EventSender>) {
        let pending = run.pending();
        warn!(
            run_id = %run.run_id(),
            skipped = pending.len(),
            "Run deadline exceeded, skipping unstarted tasks"
        );
        for kind in pending {
            self.record(run, ResultEnvelope::run_timeout(kind), events)
                .await;
        }
    }

    /// Rate-limit key of every task in `ready`
    fn limit_keys(&self, ready: &[TaskKind]) -> Result<Vec<&str>> {
        ready
            .iter()
            .map(|kind| {
                self.shared
                    .registry
                    .resolve(kind)
                    .map(TaskDescriptor::limit_key)
            })
            .collect()
    }

    /// Sum of per-task attempt timeouts scaled by the deadline multiplier
    fn run_deadline(&self, plan: &ExecutionPlan) -> Duration {
        let total: Duration = plan
            .tasks()
            .map(|kind| self.shared.runner.timeout_for(kind))
            .sum();
        Duration::try_from_secs_f64(total.as_secs_f64() * self.shared.config.run_deadline_multiplier)
            .unwrap_or(Duration::MAX)
    }
}

/// Everything needed to build task inputs for one run
struct TaskInputs<'a> {
    plan: &'a ExecutionPlan,
    payload: &'a Value,
    title: Option<&'a str>,
}

impl TaskInputs<'_> {
    /// `{ payload?, upstream: { dependency: value } }`
    ///
    /// The payload is included for tasks that consume a payload shape or have
    /// no dependency inside the run.
    fn input_for(&self, descriptor: &TaskDescriptor, run: &RunInstance) -> Value {
        let deps = self.plan.dependencies_of(&descriptor.kind);

        let mut upstream = Map::new();
        for dep in deps.into_iter().flatten() {
            if let Some(value) = run.envelope(dep).and_then(ResultEnvelope::value) {
                upstream.insert(dep.to_string(), value.clone());
            }
        }

        let mut input = Map::new();
        if descriptor.input_shape.is_payload() || deps.is_none_or(|d| d.is_empty()) {
            input.insert("payload".to_string(), self.payload.clone());
        }
        input.insert("upstream".to_string(), Value::Object(upstream));
        Value::Object(input)
    }
}

fn deadline_passed(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|deadline| Instant::now() >= deadline)
}

fn joined_envelope(
    kind: TaskKind,
    joined: std::result::Result<ResultEnvelope, JoinError>,
) -> ResultEnvelope {
    joined.unwrap_or_else(|err| {
        error!(task = %kind, error = %err, "Task worker panicked");
        ResultEnvelope::failure(
            kind,
            ErrorKind::AgentExecution,
            format!("task worker failed: {err}"),
            0,
            None,
            Duration::ZERO,
        )
    })
}
