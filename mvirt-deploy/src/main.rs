use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use mvirt_deploy::audit::DeployAuditLogger;
use mvirt_deploy::cloud::MemoryCloud;
use mvirt_deploy::target::{ApiTarget, HclTarget, JsonTarget, Target};
use mvirt_deploy::{DeployConfig, Executor, Inventory, RunReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum TargetKind {
    Api,
    Hcl,
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "mvirt-deploy", version)]
#[command(about = "Reconcile a cloud inventory, or render it as HCL or JSON")]
struct Args {
    /// Inventory document ({"tasks": [...]})
    inventory: PathBuf,

    /// Render target
    #[arg(long, value_enum, default_value = "api")]
    target: TargetKind,

    /// Output directory for manifest targets
    #[arg(long, default_value = "out")]
    out: PathBuf,

    /// Run finders and the differ only; issue no mutations
    #[arg(long)]
    dry_run: bool,

    /// Keep superseded versions instead of deleting them
    #[arg(long)]
    no_prune: bool,

    /// Cluster name, used as the cluster tag value
    #[arg(long, default_value = "")]
    cluster_name: String,

    /// Overall deadline in seconds
    #[arg(long, default_value = "600")]
    max_task_duration: u64,

    /// Pause between retry waves in seconds
    #[arg(long, default_value = "10")]
    wait_after_all_tasks_failed: u64,

    /// Versions of launch configurations and templates to keep
    #[arg(long, default_value = "3")]
    retain_versions: usize,

    /// Tasks run concurrently within a wave
    #[arg(long, default_value = "10")]
    fanout: usize,

    /// Provider region
    #[arg(long, default_value = "us-east-1")]
    region: String,
}

impl Args {
    fn config(&self) -> DeployConfig {
        DeployConfig {
            max_task_duration: Duration::from_secs(self.max_task_duration),
            wait_after_all_tasks_failed: Duration::from_secs(self.wait_after_all_tasks_failed),
            retain_versions: self.retain_versions,
            fanout: self.fanout,
            region: self.region.clone(),
            ..DeployConfig::for_cluster(&self.cluster_name)
        }
    }

    fn target(&self) -> Target {
        match self.target {
            // Real provider SDKs are not wired in; the API target drives
            // the in-memory provider.
            TargetKind::Api => Target::Api(
                ApiTarget::new(Arc::new(MemoryCloud::new())).with_dry_run(self.dry_run),
            ),
            TargetKind::Hcl => Target::Hcl(HclTarget::new(&self.region)),
            TargetKind::Json => Target::Json(JsonTarget::new()),
        }
    }
}

fn print_report(report: &RunReport) {
    for (key, outcome) in &report.outcomes {
        println!("{:<60} {}", key.to_string(), outcome);
    }
    for deletion in &report.deletions {
        println!("{:<60} deleted", deletion);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("mvirt_deploy=info".parse()?),
        )
        .init();

    let args = Args::parse();

    let inventory = Inventory::load(&args.inventory)
        .await
        .with_context(|| format!("Failed to load inventory {}", args.inventory.display()))?;
    let mut tasks = inventory
        .into_task_set()
        .context("Invalid inventory")?;
    info!(tasks = tasks.len(), target = ?args.target, "Loaded inventory");

    let (cancel_tx, cancel_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            warn!("Received SIGINT, cancelling run");
            let _ = cancel_tx.send(true);
        }
    });

    let executor = Executor::new(args.target(), args.config())
        .with_prune(!args.no_prune)
        .with_cancel(cancel_rx)
        .with_audit(DeployAuditLogger::new("mvirt-deploy"));
    let report = executor.run(&mut tasks).await.context("Run failed")?;
    print_report(&report);

    match executor.target() {
        Target::Hcl(hcl) => {
            let written = hcl
                .write_to(&args.out)
                .await
                .context("Failed to write HCL manifest")?;
            info!(files = written.len(), out = %args.out.display(), "Wrote HCL manifest");
        }
        Target::Json(json) => {
            let path = json
                .write_to(&args.out)
                .await
                .context("Failed to write stack document")?;
            info!(path = %path.display(), "Wrote stack document");
        }
        Target::Api(_) => {
            info!(
                changes = report.changes().len(),
                deletions = report.deletions.len(),
                waves = report.waves,
                "Run complete"
            );
        }
    }

    Ok(())
}
