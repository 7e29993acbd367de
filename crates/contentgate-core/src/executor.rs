//! Bounded-parallelism stage runner.
//!
//! One semaphore per executor bounds every boundary call it runs: whole
//! stage graphs and single submitted tasks share the same permits.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, instrument, warn};

use crate::config::PipelineConfig;
use crate::domain::{GateError, Result};

type StageFn = Box<dyn FnOnce() -> BoxFuture<'static, Result<Value>> + Send>;

/// A named unit of work.
pub struct Stage {
    name: String,
    timeout: Option<Duration>,
    run: StageFn,
}

impl Stage {
    pub fn new<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        Self {
            name: name.into(),
            timeout: None,
            run: Box::new(move || f().boxed()),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stage")
            .field("name", &self.name)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[derive(Debug)]
enum Step {
    Sequential(Stage),
    Parallel(Vec<Stage>),
}

/// Sequential stages and parallel groups, run in declaration order.
#[derive(Debug, Default)]
pub struct StageGraph {
    steps: Vec<Step>,
}

impl StageGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then(mut self, stage: Stage) -> Self {
        self.steps.push(Step::Sequential(stage));
        self
    }

    pub fn parallel(mut self, stages: Vec<Stage>) -> Self {
        self.steps.push(Step::Parallel(stages));
        self
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.steps
            .iter()
            .flat_map(|s| match s {
                Step::Sequential(stage) => vec![stage.name()],
                Step::Parallel(stages) => stages.iter().map(Stage::name).collect(),
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Completed,
    Failed,
    /// Never started: the run failed or was cancelled first
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageResult {
    pub name: String,
    pub status: StageStatus,
    pub output: Option<Value>,
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl StageResult {
    fn skipped(name: String) -> Self {
        Self {
            name,
            status: StageStatus::Skipped,
            output: None,
            error: None,
            duration_ms: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunStatus {
    Succeeded,
    Failed { stage: String },
    Cancelled,
}

/// Outcome of a run: overall status plus one result per declared stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineResult {
    pub status: RunStatus,
    pub stages: Vec<StageResult>,
}

impl PipelineResult {
    pub fn succeeded(&self) -> bool {
        self.status == RunStatus::Succeeded
    }

    pub fn stage(&self, name: &str) -> Option<&StageResult> {
        self.stages.iter().find(|s| s.name == name)
    }

    pub fn output(&self, name: &str) -> Option<&Value> {
        self.stage(name).and_then(|s| s.output.as_ref())
    }

    pub fn completed(&self) -> impl Iterator<Item = &StageResult> {
        self.stages
            .iter()
            .filter(|s| s.status == StageStatus::Completed)
    }
}

/// Cooperative cancellation, observed between stages only.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct ConcurrencyExecutor {
    semaphore: Arc<Semaphore>,
    limit: usize,
}

fn closed(name: String) -> StageResult {
    StageResult {
        name,
        status: StageStatus::Failed,
        output: None,
        error: Some("executor closed".to_string()),
        duration_ms: 0,
    }
}

/// Run a stage. The caller holds the permit.
async fn execute(stage: Stage) -> StageResult {
    let Stage { name, timeout, run } = stage;
    let started = Instant::now();
    let fut = run();
    let outcome = match timeout {
        Some(limit) => match tokio::time::timeout(limit, fut).await {
            Ok(r) => r,
            Err(_) => Err(GateError::StageFailed {
                stage: name.clone(),
                message: format!("timed out after {}ms", limit.as_millis()),
            }),
        },
        None => fut.await,
    };
    let duration_ms = started.elapsed().as_millis() as u64;

    match outcome {
        Ok(value) => {
            debug!(stage = %name, duration_ms, "stage completed");
            StageResult {
                name,
                status: StageStatus::Completed,
                output: Some(value),
                error: None,
                duration_ms,
            }
        }
        Err(e) => {
            warn!(stage = %name, error = %e, "stage failed");
            StageResult {
                name,
                status: StageStatus::Failed,
                output: None,
                error: Some(e.to_string()),
                duration_ms,
            }
        }
    }
}

impl ConcurrencyExecutor {
    pub fn new(max_concurrent: usize) -> Self {
        let limit = max_concurrent.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(limit)),
            limit,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.max_concurrent_stages)
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub async fn run(&self, graph: StageGraph) -> PipelineResult {
        self.run_with_cancel(graph, &CancelToken::new()).await
    }

    /// Run `graph`, stopping at the first failed stage.
    ///
    /// Siblings already running in the failing parallel group finish and
    /// keep their results; nothing after the group starts.
    #[instrument(skip(self, graph, cancel), fields(stages = graph.stage_names().len()))]
    pub async fn run_with_cancel(&self, graph: StageGraph, cancel: &CancelToken) -> PipelineResult {
        let mut results = Vec::new();
        let mut status = RunStatus::Succeeded;

        for step in graph.steps {
            if status != RunStatus::Succeeded || cancel.is_cancelled() {
                if status == RunStatus::Succeeded {
                    debug!("run cancelled between stages");
                    status = RunStatus::Cancelled;
                }
                match step {
                    Step::Sequential(s) => results.push(StageResult::skipped(s.name)),
                    Step::Parallel(group) => results
                        .extend(group.into_iter().map(|s| StageResult::skipped(s.name))),
                }
                continue;
            }

            match step {
                Step::Sequential(stage) => {
                    let r = match self.semaphore.acquire().await {
                        Ok(_permit) => execute(stage).await,
                        Err(_) => closed(stage.name),
                    };
                    if r.status == StageStatus::Failed {
                        status = RunStatus::Failed {
                            stage: r.name.clone(),
                        };
                    }
                    results.push(r);
                }
                Step::Parallel(group) => {
                    let (group_results, first_failure) = self.run_group(group).await;
                    if let Some(stage) = first_failure {
                        status = RunStatus::Failed { stage };
                    }
                    results.extend(group_results);
                }
            }
        }

        PipelineResult {
            status,
            stages: results,
        }
    }

    async fn run_group(&self, group: Vec<Stage>) -> (Vec<StageResult>, Option<String>) {
        let (fail_tx, _fail_rx) = tokio::sync::watch::channel(false);
        let fail_flag = Arc::new(fail_tx);
        let first_failure: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));

        let mut names = Vec::with_capacity(group.len());
        let mut tasks = Vec::with_capacity(group.len());
        for stage in group {
            names.push(stage.name.clone());
            let semaphore = Arc::clone(&self.semaphore);
            let fail_flag = Arc::clone(&fail_flag);
            let fail_rx = fail_flag.subscribe();
            let first_failure = Arc::clone(&first_failure);

            tasks.push(tokio::spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return closed(stage.name);
                };
                // a sibling failed while this stage waited for a permit
                if *fail_rx.borrow() {
                    return StageResult::skipped(stage.name);
                }
                let r = execute(stage).await;
                if r.status == StageStatus::Failed {
                    let mut first = first_failure.lock().await;
                    if first.is_none() {
                        *first = Some(r.name.clone());
                    }
                    let _ = fail_flag.send(true);
                }
                r
            }));
        }

        let mut results = Vec::with_capacity(tasks.len());
        for (name, task) in names.into_iter().zip(tasks) {
            match task.await {
                Ok(r) => results.push(r),
                Err(e) => {
                    let mut first = first_failure.lock().await;
                    if first.is_none() {
                        *first = Some(name.clone());
                    }
                    results.push(StageResult {
                        name,
                        status: StageStatus::Failed,
                        output: None,
                        error: Some(format!("stage task aborted: {e}")),
                        duration_ms: 0,
                    });
                }
            }
        }

        let first = first_failure.lock().await.clone();
        (results, first)
    }

    /// Run one boundary call under the shared limit.
    pub async fn submit<T, Fut>(&self, stage: &str, timeout: Option<Duration>, fut: Fut) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| GateError::StageFailed {
                stage: stage.to_string(),
                message: "executor closed".to_string(),
            })?;
        match timeout {
            Some(limit) => tokio::time::timeout(limit, fut)
                .await
                .map_err(|_| GateError::StageFailed {
                    stage: stage.to_string(),
                    message: format!("timed out after {}ms", limit.as_millis()),
                })?,
            None => fut.await,
        }
    }
}
