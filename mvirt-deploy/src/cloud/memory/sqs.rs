use async_trait::async_trait;

use super::{not_found, MemoryCloud, ACCOUNT_ID};
use crate::cloud::sqs::{QueueInfo, Queues};
use crate::cloud::{CloudResult, TagScope};
use crate::error::ProviderError;

#[async_trait]
impl Queues for MemoryCloud {
    async fn describe_queue(&self, name: &str) -> CloudResult<Option<QueueInfo>> {
        let state = self.state().await;
        Ok(state.queues.get(name).map(|q| QueueInfo {
            tags: state.tags_of(TagScope::Queues, &q.url),
            ..q.clone()
        }))
    }

    async fn create_queue(&self, request: &QueueInfo) -> CloudResult<QueueInfo> {
        let mut state = self.state().await;
        if state.queues.contains_key(&request.name) {
            return Err(ProviderError::new(
                "QueueAlreadyExists",
                format!("{} already exists", request.name),
            ));
        }
        state.record(format!("CreateQueue {}", request.name));
        let url = format!(
            "https://sqs.us-east-1.amazonaws.com/{}/{}",
            ACCOUNT_ID, request.name
        );
        let queue = QueueInfo {
            url: url.clone(),
            arn: state.arn("sqs", &request.name),
            ..request.clone()
        };
        state.queues.insert(request.name.clone(), queue.clone());
        state.set_tags(TagScope::Queues, &url, &request.tags);
        Ok(queue)
    }

    async fn set_queue_attributes(
        &self,
        url: &str,
        message_retention_period: Option<i64>,
        policy: Option<&str>,
    ) -> CloudResult<()> {
        let mut state = self.state().await;
        state.record(format!("SetQueueAttributes {}", url));
        let queue = state
            .queues
            .values_mut()
            .find(|q| q.url == url)
            .ok_or_else(|| not_found("AWS.SimpleQueueService.NonExistentQueue", url))?;
        if message_retention_period.is_some() {
            queue.message_retention_period = message_retention_period;
        }
        if let Some(policy) = policy {
            queue.policy = Some(policy.to_string());
        }
        Ok(())
    }
}
