//! Messaging capability group.

use async_trait::async_trait;

use super::CloudResult;
use crate::model::Tags;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueueInfo {
    pub url: String,
    pub arn: String,
    pub name: String,
    pub message_retention_period: Option<i64>,
    pub policy: Option<String>,
    pub tags: Tags,
}

#[async_trait]
pub trait Queues: Send + Sync {
    async fn describe_queue(&self, name: &str) -> CloudResult<Option<QueueInfo>>;
    async fn create_queue(&self, request: &QueueInfo) -> CloudResult<QueueInfo>;
    async fn set_queue_attributes(
        &self,
        url: &str,
        message_retention_period: Option<i64>,
        policy: Option<&str>,
    ) -> CloudResult<()>;
}
