//! Shared harness for the integration tests.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};

use mvirt_deploy::audit::DeployAuditLogger;
use mvirt_deploy::cloud::MemoryCloud;
use mvirt_deploy::gc::Clock;
use mvirt_deploy::target::{ApiTarget, HclTarget, JsonTarget, Target};
use mvirt_deploy::{DeployConfig, Executor, Inventory, Result, RunReport, TaskSet};

pub const CLUSTER: &str = "test.example.com";

pub fn config() -> DeployConfig {
    DeployConfig {
        wait_after_all_tasks_failed: Duration::from_millis(10),
        waiter_interval: Duration::from_millis(1),
        waiter_timeout: Duration::from_millis(100),
        ..DeployConfig::for_cluster(CLUSTER)
    }
}

pub fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

pub fn golden(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("golden")
        .join(name)
}

pub async fn load(name: &str) -> TaskSet {
    Inventory::load(&fixture(name))
        .await
        .expect("Failed to load fixture")
        .into_task_set()
        .expect("Invalid fixture")
}

/// A clock that advances one minute on every read.
pub fn stepping_clock() -> Clock {
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let ticks = Arc::new(AtomicI64::new(0));
    Arc::new(move || start + chrono::Duration::minutes(ticks.fetch_add(1, Ordering::SeqCst)))
}

/// An in-memory account plus the settings every run against it shares.
pub struct Harness {
    pub cloud: Arc<MemoryCloud>,
    pub clock: Clock,
    pub config: DeployConfig,
}

impl Harness {
    pub fn new() -> Self {
        let clock = stepping_clock();
        Self {
            cloud: Arc::new(MemoryCloud::new().with_clock(clock.clone())),
            clock,
            config: config(),
        }
    }

    fn api(&self, dry_run: bool) -> Target {
        Target::Api(
            ApiTarget::new(self.cloud.clone())
                .with_clock(self.clock.clone())
                .with_dry_run(dry_run),
        )
    }

    pub async fn apply(&self, tasks: &mut TaskSet) -> Result<RunReport> {
        Executor::new(self.api(false), self.config.clone())
            .with_audit(DeployAuditLogger::new_noop())
            .run(tasks)
            .await
    }

    pub async fn plan(&self, tasks: &mut TaskSet) -> Result<RunReport> {
        Executor::new(self.api(true), self.config.clone())
            .with_audit(DeployAuditLogger::new_noop())
            .run(tasks)
            .await
    }

    pub async fn mutations(&self) -> Vec<String> {
        self.cloud.mutations().await
    }
}

/// Render `tasks` as HCL; returns the file tree by relative path.
pub async fn render_hcl(tasks: &mut TaskSet) -> BTreeMap<String, String> {
    let executor = Executor::new(Target::Hcl(HclTarget::new("us-east-1")), config())
        .with_audit(DeployAuditLogger::new_noop());
    executor.run(tasks).await.expect("HCL render failed");
    match executor.target() {
        Target::Hcl(target) => target.files().await,
        _ => unreachable!(),
    }
}

/// Render `tasks` as a stack document.
pub async fn render_json(tasks: &mut TaskSet) -> String {
    let executor = Executor::new(Target::Json(JsonTarget::new()), config())
        .with_audit(DeployAuditLogger::new_noop());
    executor.run(tasks).await.expect("JSON render failed");
    match executor.target() {
        Target::Json(target) => target.render().await.expect("JSON serialization failed"),
        _ => unreachable!(),
    }
}
