//! Run configuration, passed explicitly through the reconciler context.

use std::time::Duration;

use crate::model::Tags;

/// Default overall deadline for a run.
pub const DEFAULT_MAX_TASK_DURATION: Duration = Duration::from_secs(10 * 60);
/// Default pause between retry waves when every remaining task is waiting.
pub const DEFAULT_WAIT_AFTER_ALL_TASKS_FAILED: Duration = Duration::from_secs(10);
/// Default number of immutable versions kept by the GC.
pub const DEFAULT_RETAIN_VERSIONS: usize = 3;
/// Default maximum number of tasks run concurrently within a wave.
pub const DEFAULT_FANOUT: usize = 10;

/// Configuration for a reconcile or render run.
#[derive(Debug, Clone)]
pub struct DeployConfig {
    /// Overall deadline per run.
    pub max_task_duration: Duration,
    /// Back-off between retry waves.
    pub wait_after_all_tasks_failed: Duration,
    /// Number of most recent versions of a versioned resource to keep.
    pub retain_versions: usize,
    /// Tag key applied to every owned resource.
    pub cluster_tag_key: String,
    /// Tag value applied to every owned resource.
    pub cluster_tag_value: String,
    /// Maximum tasks in flight within one wave.
    pub fanout: usize,
    /// Provider region, used by the manifest renderers.
    pub region: String,
    /// Upper bound for a single waiter.
    pub waiter_timeout: Duration,
    /// Interval between waiter polls.
    pub waiter_interval: Duration,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            max_task_duration: DEFAULT_MAX_TASK_DURATION,
            wait_after_all_tasks_failed: DEFAULT_WAIT_AFTER_ALL_TASKS_FAILED,
            retain_versions: DEFAULT_RETAIN_VERSIONS,
            cluster_tag_key: "KubernetesCluster".to_string(),
            cluster_tag_value: String::new(),
            fanout: DEFAULT_FANOUT,
            region: "us-east-1".to_string(),
            waiter_timeout: Duration::from_secs(5 * 60),
            waiter_interval: Duration::from_secs(5),
        }
    }
}

impl DeployConfig {
    /// Create a configuration for the given cluster.
    pub fn for_cluster(cluster: &str) -> Self {
        Self {
            cluster_tag_value: cluster.to_string(),
            ..Self::default()
        }
    }

    /// Clamp values that would make the run meaningless.
    pub fn normalized(mut self) -> Self {
        self.retain_versions = self.retain_versions.max(1);
        self.fanout = self.fanout.max(1);
        self
    }

    /// The discriminator tag applied to every owned resource.
    pub fn cluster_tags(&self) -> Tags {
        let mut tags = Tags::new();
        if !self.cluster_tag_value.is_empty() {
            tags.insert(self.cluster_tag_key.clone(), self.cluster_tag_value.clone());
        }
        tags
    }

    /// Back-off before retry `attempt` (1-based) of a task.
    ///
    /// Doubles from `wait_after_all_tasks_failed`, capped at 16 times that interval.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(4);
        self.wait_after_all_tasks_failed
            .saturating_mul(2u32.saturating_pow(exponent))
    }
}
