//! Narrow provider interfaces consumed by finders and renderers.
//!
//! Each capability group is a trait so the in-memory provider used by the
//! tests and the binary can stand in for a real account. Calls return
//! [`ProviderError`]; the `From` conversion into [`crate::Error`] classifies
//! them as retryable, fatal, or plain provider failures.

pub mod autoscaling;
pub mod compute;
pub mod dns;
pub mod elb;
pub mod events;
pub mod iam;
pub mod memory;
pub mod sqs;

use async_trait::async_trait;

use crate::error::ProviderError;
use crate::model::Tags;

pub use autoscaling::Autoscaling;
pub use compute::Compute;
pub use dns::Dns;
pub use elb::LoadBalancing;
pub use events::Events;
pub use iam::Iam;
pub use memory::MemoryCloud;
pub use sqs::Queues;

/// Result of a single provider call.
pub type CloudResult<T> = std::result::Result<T, ProviderError>;

/// A provider account, split by capability group.
pub trait Cloud: Send + Sync {
    fn region(&self) -> &str;
    fn compute(&self) -> &dyn Compute;
    fn autoscaling(&self) -> &dyn Autoscaling;
    fn load_balancing(&self) -> &dyn LoadBalancing;
    fn iam(&self) -> &dyn Iam;
    fn dns(&self) -> &dyn Dns;
    fn queues(&self) -> &dyn Queues;
    fn events(&self) -> &dyn Events;
    fn tagging(&self) -> &dyn Tagging;
}

/// Which API owns a tagged object. IDs are only unique within a scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TagScope {
    /// EC2 resource IDs.
    Compute,
    /// Autoscaling group names.
    Autoscaling,
    /// Classic load balancer names and v2 ARNs.
    LoadBalancing,
    /// IAM ARNs.
    Iam,
    /// Hosted zone IDs.
    Dns,
    /// Queue URLs.
    Queues,
    /// Rule ARNs.
    Events,
}

/// Tag add/delete, shared by every capability group.
#[async_trait]
pub trait Tagging: Send + Sync {
    /// Add or overwrite tags.
    async fn create_tags(&self, scope: TagScope, id: &str, tags: &Tags) -> CloudResult<()>;
    /// Remove tags by key.
    async fn delete_tags(&self, scope: TagScope, id: &str, keys: &[String]) -> CloudResult<()>;
}

/// Selection criteria for describe calls. Empty criteria match everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    /// Match any of these IDs.
    pub ids: Vec<String>,
    /// Match objects carrying every one of these tags.
    pub tags: Tags,
    /// Match objects inside this VPC.
    pub vpc_id: Option<String>,
}

impl Filter {
    pub fn by_id(id: impl Into<String>) -> Self {
        Self {
            ids: vec![id.into()],
            ..Self::default()
        }
    }

    pub fn by_tags(tags: Tags) -> Self {
        Self {
            tags,
            ..Self::default()
        }
    }

    pub fn in_vpc(mut self, vpc_id: Option<&str>) -> Self {
        self.vpc_id = vpc_id.map(str::to_string);
        self
    }

    /// Whether an object with this ID, tags, and VPC matches.
    pub fn matches(&self, id: &str, tags: &Tags, vpc_id: Option<&str>) -> bool {
        if !self.ids.is_empty() && !self.ids.iter().any(|i| i == id) {
            return false;
        }
        if !self.tags.iter().all(|(k, v)| tags.get(k) == Some(v)) {
            return false;
        }
        match (&self.vpc_id, vpc_id) {
            (Some(wanted), Some(actual)) => wanted == actual,
            (Some(_), None) => false,
            (None, _) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(pairs: &[(&str, &str)]) -> Tags {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_filter_matches_all_tags() {
        let filter = Filter::by_tags(tags(&[("Name", "a"), ("KubernetesCluster", "c")]));
        assert!(filter.matches("x", &tags(&[("Name", "a"), ("KubernetesCluster", "c"), ("Other", "1")]), None));
        assert!(!filter.matches("x", &tags(&[("Name", "a")]), None));
    }

    #[test]
    fn test_filter_by_id_and_vpc() {
        let filter = Filter::by_id("subnet-1").in_vpc(Some("vpc-1"));
        assert!(filter.matches("subnet-1", &Tags::new(), Some("vpc-1")));
        assert!(!filter.matches("subnet-1", &Tags::new(), Some("vpc-2")));
        assert!(!filter.matches("subnet-2", &Tags::new(), Some("vpc-1")));
        assert!(Filter::default().matches("anything", &Tags::new(), None));
    }
}
