//! Wave scheduler.
//!
//! Each wave runs every ready task concurrently (up to the configured
//! fan-out), then waits for the whole wave before looking at the graph
//! again. Tasks asking to be retried are re-queued with back-off; a
//! terminal error fails the run once the wave has drained.

use std::collections::{BTreeMap, HashMap};

use futures::stream::{self, StreamExt};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::graph::TaskGraph;
use super::{RunContext, RunReport, Task, TaskOutcome, TaskSet};
use crate::audit::DeployAuditLogger;
use crate::config::DeployConfig;
use crate::error::{Error, Result};
use crate::model::TaskKey;
use crate::target::Target;

#[derive(Debug)]
enum TaskState {
    Pending {
        attempts: u32,
        not_before: Instant,
        last_error: Option<String>,
    },
    Done,
}

/// Runs a task set against one target.
pub struct Executor {
    target: Target,
    config: DeployConfig,
    audit: DeployAuditLogger,
    prune: bool,
    cancel: watch::Receiver<bool>,
}

impl Executor {
    pub fn new(target: Target, config: DeployConfig) -> Self {
        let (_, cancel) = watch::channel(false);
        Self {
            target,
            config: config.normalized(),
            audit: DeployAuditLogger::default(),
            prune: true,
            cancel,
        }
    }

    /// Whether superseded versions found by the deletion pass are removed.
    pub fn with_prune(mut self, prune: bool) -> Self {
        self.prune = prune;
        self
    }

    /// Abort in-flight tasks once `cancel` reads `true`.
    pub fn with_cancel(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_audit(mut self, audit: DeployAuditLogger) -> Self {
        self.audit = audit;
        self
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn config(&self) -> &DeployConfig {
        &self.config
    }

    /// Reconcile every task, then run the deletion pass.
    pub async fn run(&self, tasks: &mut TaskSet) -> Result<RunReport> {
        let graph = TaskGraph::build(tasks)?;
        let order = graph.order()?;
        let dependencies: HashMap<TaskKey, Vec<TaskKey>> = order
            .iter()
            .map(|key| (key.clone(), graph.dependencies_of(key)))
            .collect();

        let start = Instant::now();
        let deadline = start + self.config.max_task_duration;
        let mut states: BTreeMap<TaskKey, TaskState> = order
            .iter()
            .map(|key| {
                let state = TaskState::Pending {
                    attempts: 0,
                    not_before: start,
                    last_error: None,
                };
                (key.clone(), state)
            })
            .collect();
        let mut report = RunReport::default();

        info!(
            "Reconciling {} tasks against the {} target",
            order.len(),
            self.target.name()
        );

        loop {
            if self.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let unblocked: Vec<&TaskKey> = order
                .iter()
                .filter(|key| matches!(states.get(*key), Some(TaskState::Pending { .. })))
                .filter(|key| {
                    dependencies[*key]
                        .iter()
                        .all(|dep| matches!(states.get(dep), Some(TaskState::Done)))
                })
                .collect();
            if unblocked.is_empty() {
                break;
            }

            let now = Instant::now();
            let ready: Vec<TaskKey> = unblocked
                .iter()
                .filter(|key| match states.get(**key) {
                    Some(TaskState::Pending { not_before, .. }) => *not_before <= now,
                    _ => false,
                })
                .map(|key| (*key).clone())
                .collect();

            if ready.is_empty() {
                if now >= deadline {
                    return Err(self.deadline_error(start, &states));
                }
                let wake = unblocked
                    .iter()
                    .filter_map(|key| match states.get(*key) {
                        Some(TaskState::Pending { not_before, .. }) => Some(*not_before),
                        _ => None,
                    })
                    .min()
                    .unwrap_or(deadline)
                    .min(deadline);
                debug!("All ready tasks are backing off; sleeping until next retry");
                tokio::select! {
                    _ = tokio::time::sleep_until(wake) => {}
                    _ = cancelled(self.cancel.clone()) => return Err(Error::Cancelled),
                }
                continue;
            }

            report.waves += 1;
            debug!("Wave {}: {} tasks", report.waves, ready.len());
            let running: Vec<Box<dyn Task>> =
                ready.iter().filter_map(|key| tasks.take(key)).collect();
            let results = self.run_wave(tasks, running).await;

            let finished = Instant::now();
            let mut failure: Option<Error> = None;
            for (task, result) in results {
                let key = task.key();
                tasks.put_back(task);
                match result {
                    Ok(outcome) => {
                        debug!("{}: {}", key, outcome);
                        report.outcomes.insert(key.clone(), outcome);
                        states.insert(key, TaskState::Done);
                    }
                    Err(e) if e.is_retryable() => {
                        let attempts = match states.get(&key) {
                            Some(TaskState::Pending { attempts, .. }) => attempts + 1,
                            _ => 1,
                        };
                        let delay = self.config.backoff(attempts);
                        warn!(
                            "{} not ready (attempt {}), retrying in {:?}: {}",
                            key, attempts, delay, e
                        );
                        states.insert(
                            key,
                            TaskState::Pending {
                                attempts,
                                not_before: finished + delay,
                                last_error: Some(e.to_string()),
                            },
                        );
                    }
                    Err(Error::Aborted) => {
                        debug!("{} aborted", key);
                    }
                    Err(e) => {
                        error!("{} failed: {}", key, e);
                        let replaces = match &failure {
                            None => true,
                            Some(first) => e.is_fatal() && !first.is_fatal(),
                        };
                        if replaces {
                            failure = Some(Error::task(key, e));
                        }
                    }
                }
            }
            if let Some(e) = failure {
                return Err(e);
            }
        }

        if states.values().any(|s| matches!(s, TaskState::Pending { .. })) {
            // Only reachable if a dependency never finished, which the
            // cycle check rules out; report it rather than loop.
            return Err(self.deadline_error(start, &states));
        }

        self.delete_superseded(tasks, &mut report).await?;
        info!(
            "Reconcile finished in {} waves: {} changes, {} deletions",
            report.waves,
            report.changes().len(),
            report.deletions.len()
        );
        Ok(report)
    }

    async fn run_wave(
        &self,
        tasks: &TaskSet,
        running: Vec<Box<dyn Task>>,
    ) -> Vec<(Box<dyn Task>, Result<TaskOutcome>)> {
        let ctx = RunContext::new(
            &self.target,
            &self.config,
            &self.audit,
            tasks,
            self.cancel.clone(),
        );
        let ctx = &ctx;
        // A fatal error stops the rest of the wave instead of letting it drain.
        let (abort_tx, abort_rx) = watch::channel(false);
        let mut wave = stream::iter(running.into_iter().map(|mut task| {
            let abort = abort_rx.clone();
            async move {
                let result = tokio::select! {
                    biased;
                    _ = cancelled(abort) => Err(Error::Aborted),
                    result = run_task(task.as_mut(), ctx) => result,
                };
                (task, result)
            }
        }))
        .buffer_unordered(self.config.fanout);

        let mut results = Vec::new();
        while let Some((task, result)) = wave.next().await {
            if let Err(e) = &result {
                if e.is_fatal() && !*abort_tx.borrow() {
                    warn!("{}: fatal error, aborting the rest of the wave", task.key());
                    let _ = abort_tx.send(true);
                }
            }
            results.push((task, result));
        }
        results
    }

    /// List resources owned by finished tasks that are no longer wanted and
    /// delete them unless pruning is off or the run is a dry run.
    async fn delete_superseded(&self, tasks: &TaskSet, report: &mut RunReport) -> Result<()> {
        let Target::Api(api) = &self.target else {
            return Ok(());
        };
        let ctx = RunContext::new(
            &self.target,
            &self.config,
            &self.audit,
            tasks,
            self.cancel.clone(),
        );
        for (key, task) in tasks.iter() {
            ctx.check_cancelled()?;
            let deletions = task
                .find_deletions(&ctx)
                .await
                .map_err(|e| Error::task(key.clone(), e))?;
            for deletion in deletions {
                let description = deletion.description();
                if api.is_dry_run() {
                    info!("Would delete {}", description);
                    report.deletions.push(description);
                    continue;
                }
                if !self.prune {
                    debug!("Keeping {} (pruning disabled)", description);
                    continue;
                }
                deletion
                    .delete(api.cloud())
                    .await
                    .map_err(|e| Error::task(key.clone(), e))?;
                info!("Deleted {}", description);
                self.audit.deleted(&description, &deletion.id());
                report.deletions.push(description);
            }
        }
        Ok(())
    }

    fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    fn deadline_error(&self, start: Instant, states: &BTreeMap<TaskKey, TaskState>) -> Error {
        let pending = states
            .iter()
            .filter_map(|(key, state)| match state {
                TaskState::Pending { last_error, .. } => Some((
                    key.clone(),
                    last_error
                        .clone()
                        .unwrap_or_else(|| "waiting for dependencies".to_string()),
                )),
                TaskState::Done => None,
            })
            .collect();
        Error::Deadline {
            elapsed: start.elapsed(),
            pending,
        }
    }
}

async fn run_task(task: &mut dyn Task, ctx: &RunContext<'_>) -> Result<TaskOutcome> {
    tokio::select! {
        result = task.run(ctx) => result,
        _ = cancelled(ctx.cancel_receiver()) => Err(Error::Cancelled),
    }
}

/// Resolves once the flag reads `true`; never, if the sender is gone.
async fn cancelled(mut cancel: watch::Receiver<bool>) {
    if cancel.wait_for(|c| *c).await.is_err() {
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::cloud::MemoryCloud;
    use crate::model::{Attr, Kind, Lifecycle, Link};
    use crate::reconciler::Deletion;
    use crate::target::ApiTarget;

    #[derive(Debug)]
    struct Step {
        name: String,
        deps: Vec<String>,
        transient_failures: u32,
        conflict: bool,
        invalid: bool,
        delay: Duration,
        id: Option<String>,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl Step {
        fn new(name: &str, deps: &[&str], log: &Arc<Mutex<Vec<String>>>) -> Self {
            Self {
                name: name.to_string(),
                deps: deps.iter().map(|d| d.to_string()).collect(),
                transient_failures: 0,
                conflict: false,
                invalid: false,
                delay: Duration::ZERO,
                id: None,
                log: log.clone(),
            }
        }
    }

    #[async_trait]
    impl Task for Step {
        fn key(&self) -> TaskKey {
            TaskKey::new(Kind::Vpc, self.name.clone())
        }

        fn lifecycle(&self) -> Lifecycle {
            Lifecycle::Sync
        }

        fn dependencies(&self) -> Vec<TaskKey> {
            self.deps
                .iter()
                .map(|d| TaskKey::new(Kind::Vpc, d.clone()))
                .collect()
        }

        fn attribute(&self, attr: Attr) -> Option<String> {
            match attr {
                Attr::Id => self.id.clone(),
                _ => None,
            }
        }

        async fn run(&mut self, ctx: &RunContext<'_>) -> Result<TaskOutcome> {
            for dep in &self.deps {
                ctx.attribute(&Link::new(Kind::Vpc, dep.clone()), Attr::Id)?;
            }
            if self.transient_failures > 0 {
                self.transient_failures -= 1;
                return Err(Error::Propagation(format!("{} not visible yet", self.name)));
            }
            if self.invalid {
                return Err(Error::InvalidRecord {
                    key: self.key(),
                    message: "malformed".to_string(),
                });
            }
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.conflict {
                return Err(Error::CannotChange {
                    key: self.key(),
                    field: "CIDR",
                });
            }
            self.log.lock().unwrap().push(self.name.clone());
            self.id = Some(format!("id-{}", self.name));
            Ok(TaskOutcome::Created)
        }

        async fn find_deletions(&self, _ctx: &RunContext<'_>) -> Result<Vec<Box<dyn Deletion>>> {
            Ok(Vec::new())
        }
    }

    fn executor(config: DeployConfig) -> Executor {
        let cloud = Arc::new(MemoryCloud::new());
        Executor::new(Target::Api(ApiTarget::new(cloud)), config)
            .with_audit(DeployAuditLogger::new_noop())
    }

    fn fast_config() -> DeployConfig {
        DeployConfig {
            wait_after_all_tasks_failed: Duration::from_millis(10),
            max_task_duration: Duration::from_secs(5),
            ..DeployConfig::default()
        }
    }

    #[tokio::test]
    async fn test_dependencies_run_first() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut tasks = TaskSet::new();
        tasks.add(Step::new("c", &["b"], &log)).unwrap();
        tasks.add(Step::new("b", &["a"], &log)).unwrap();
        tasks.add(Step::new("a", &[], &log)).unwrap();
        tasks.add(Step::new("d", &["a"], &log)).unwrap();

        let report = executor(fast_config()).run(&mut tasks).await.unwrap();

        let log = log.lock().unwrap().clone();
        let position = |n: &str| log.iter().position(|l| l == n).unwrap();
        assert!(position("a") < position("b"));
        assert!(position("b") < position("c"));
        assert!(position("a") < position("d"));
        assert_eq!(report.waves, 3);
        assert_eq!(report.changes().len(), 4);
        assert_eq!(
            tasks.id_of(&TaskKey::new(Kind::Vpc, "c")).as_deref(),
            Some("id-c")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_is_retried() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut tasks = TaskSet::new();
        let mut flaky = Step::new("profile", &[], &log);
        flaky.transient_failures = 2;
        tasks.add(flaky).unwrap();
        tasks.add(Step::new("node", &["profile"], &log)).unwrap();

        let report = executor(fast_config()).run(&mut tasks).await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["profile", "node"]);
        assert_eq!(report.waves, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_perpetual_retry_hits_deadline() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut tasks = TaskSet::new();
        let mut stuck = Step::new("stuck", &[], &log);
        stuck.transient_failures = u32::MAX;
        tasks.add(stuck).unwrap();
        tasks.add(Step::new("after", &["stuck"], &log)).unwrap();

        match executor(fast_config()).run(&mut tasks).await {
            Err(Error::Deadline { pending, .. }) => {
                let keys: Vec<_> = pending.iter().map(|(k, _)| k.name.as_str()).collect();
                assert_eq!(keys, vec!["after", "stuck"]);
                assert!(pending[1].1.contains("not visible yet"));
            }
            other => panic!("Expected deadline error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_terminal_error_fails_after_wave() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut tasks = TaskSet::new();
        let mut broken = Step::new("broken", &[], &log);
        broken.conflict = true;
        tasks.add(broken).unwrap();
        tasks.add(Step::new("sibling", &[], &log)).unwrap();
        tasks.add(Step::new("child", &["broken"], &log)).unwrap();

        let err = executor(fast_config()).run(&mut tasks).await.unwrap_err();
        match &err {
            Error::TaskFailed { key, source } => {
                assert_eq!(key.name, "broken");
                assert!(matches!(**source, Error::CannotChange { field: "CIDR", .. }));
            }
            other => panic!("Unexpected error: {:?}", other),
        }
        // The sibling in the same wave still completed; the child never ran.
        assert_eq!(*log.lock().unwrap(), vec!["sibling"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_error_aborts_wave() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut tasks = TaskSet::new();
        let mut malformed = Step::new("malformed", &[], &log);
        malformed.invalid = true;
        tasks.add(malformed).unwrap();
        let mut slow = Step::new("slow", &[], &log);
        slow.delay = Duration::from_secs(60);
        tasks.add(slow).unwrap();

        let started = Instant::now();
        let err = executor(fast_config()).run(&mut tasks).await.unwrap_err();
        match &err {
            Error::TaskFailed { key, source } => {
                assert_eq!(key.name, "malformed");
                assert!(matches!(**source, Error::InvalidRecord { .. }));
            }
            other => panic!("Unexpected error: {:?}", other),
        }
        assert!(started.elapsed() < Duration::from_secs(60));
        assert!(log.lock().unwrap().is_empty());
        // Both tasks are back in the arena.
        assert_eq!(tasks.len(), 2);
    }

    #[tokio::test]
    async fn test_cycle_is_rejected() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut tasks = TaskSet::new();
        tasks.add(Step::new("a", &["b"], &log)).unwrap();
        tasks.add(Step::new("b", &["a"], &log)).unwrap();
        tasks.add(Step::new("c", &[], &log)).unwrap();

        match executor(fast_config()).run(&mut tasks).await {
            Err(Error::DependencyCycle(keys)) => {
                let names: Vec<_> = keys.iter().map(|k| k.name.as_str()).collect();
                assert_eq!(names, vec!["a", "b"]);
            }
            other => panic!("Expected cycle error, got {:?}", other),
        }
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_run_stops() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut tasks = TaskSet::new();
        tasks.add(Step::new("a", &[], &log)).unwrap();

        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();
        let result = executor(fast_config())
            .with_cancel(rx)
            .run(&mut tasks)
            .await;
        assert!(matches!(result, Err(Error::Cancelled)));
        assert!(log.lock().unwrap().is_empty());
    }
}
