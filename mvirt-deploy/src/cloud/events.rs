//! Events capability group: pattern rules and their targets.

use async_trait::async_trait;

use super::CloudResult;
use crate::model::Tags;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuleInfo {
    pub name: String,
    pub arn: String,
    pub event_pattern: Option<String>,
    pub tags: Tags,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventTargetInfo {
    pub id: String,
    pub arn: String,
}

#[async_trait]
pub trait Events: Send + Sync {
    async fn describe_rule(&self, name: &str) -> CloudResult<Option<RuleInfo>>;
    /// Create or update; returns the rule ARN.
    async fn put_rule(&self, request: &RuleInfo) -> CloudResult<String>;
    async fn list_targets_by_rule(&self, rule: &str) -> CloudResult<Vec<EventTargetInfo>>;
    async fn put_targets(&self, rule: &str, targets: &[EventTargetInfo]) -> CloudResult<()>;
}
