//! SQS queues, used to receive instance lifecycle events.
//!
//! The queue URL is the ID. A queue found through an ID keeps the name in
//! its URL, which cannot change.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{check_immutable, found_meta, found_tags, json_document, json_equivalent, meta_id, properties};
use crate::cloud::sqs::QueueInfo;
use crate::cloud::{Cloud, TagScope};
use crate::error::Result;
use crate::impl_diff;
use crate::model::{Attr, Kind, Meta, Tags};
use crate::reconciler::{Resource, RunContext};
use crate::target::json::tag_list;
use crate::target::{ApiTarget, HclBlock, HclTarget, JsonTarget};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SqsQueue {
    #[serde(flatten)]
    pub meta: Meta,
    /// Seconds a message is kept.
    pub message_retention_period: Option<i64>,
    pub policy: Option<String>,
    pub tags: Option<Tags>,
    #[serde(skip)]
    pub arn: Option<String>,
    #[serde(skip)]
    pub queue_name: Option<String>,
}

impl_diff!(SqsQueue {
    message_retention_period,
    policy,
    tags
});

fn name_from_url(url: &str) -> &str {
    url.rsplit('/').next().unwrap_or(url)
}

#[async_trait]
impl Resource for SqsQueue {
    const KIND: Kind = Kind::SqsQueue;

    fn meta(&self) -> &Meta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut Meta {
        &mut self.meta
    }

    fn tags_mut(&mut self) -> Option<&mut Tags> {
        Some(self.tags.get_or_insert_with(Tags::new))
    }

    fn output(&self, attr: Attr) -> Option<String> {
        match attr {
            Attr::Id | Attr::Url => self.meta.id.clone(),
            Attr::Arn => self.arn.clone(),
            Attr::Name => Some(self.meta.name.clone()),
            _ => None,
        }
    }

    fn adopt(&mut self, actual: &Self) {
        self.arn = actual.arn.clone();
    }

    async fn find(&self, ctx: &RunContext<'_>, cloud: &dyn Cloud) -> Result<Option<Self>> {
        let name = match &self.meta.id {
            Some(url) => name_from_url(url),
            None => self.meta.name.as_str(),
        };
        let Some(queue) = cloud.queues().describe_queue(name).await? else {
            return Ok(None);
        };
        let policy = match (&self.policy, queue.policy) {
            (Some(desired), Some(actual)) if json_equivalent(desired, &actual) => {
                Some(desired.clone())
            }
            (_, actual) => actual,
        };
        Ok(Some(SqsQueue {
            meta: found_meta(&self.meta, &queue.url),
            message_retention_period: queue.message_retention_period,
            policy,
            tags: found_tags(ctx, &queue.tags, &self.tags),
            arn: Some(queue.arn),
            queue_name: Some(queue.name),
        }))
    }

    fn check_changes(actual: Option<&Self>, desired: &Self, _changes: &Self) -> Result<()> {
        let key = desired.task_key();
        if let Some(policy) = &desired.policy {
            json_document(&key, policy)?;
        }
        let renamed = actual
            .and_then(|a| a.queue_name.as_deref())
            .is_some_and(|name| name != desired.meta.name);
        check_immutable(&key, actual.is_some(), &[("Name", renamed)])
    }

    async fn render_api(
        target: &ApiTarget,
        ctx: &RunContext<'_>,
        actual: Option<&Self>,
        desired: &mut Self,
        changes: &Self,
    ) -> Result<()> {
        let api = target.cloud().queues();
        let tags = desired.tags.clone().unwrap_or_default();
        let Some(actual) = actual else {
            let queue = api
                .create_queue(&QueueInfo {
                    name: desired.meta.name.clone(),
                    message_retention_period: desired.message_retention_period,
                    policy: desired.policy.clone(),
                    tags,
                    ..QueueInfo::default()
                })
                .await?;
            desired.arn = Some(queue.arn);
            desired.meta.id = Some(queue.url);
            return Ok(());
        };

        let url = meta_id(Self::KIND, &desired.meta)?;
        if changes.message_retention_period.is_some() || changes.policy.is_some() {
            api.set_queue_attributes(
                &url,
                changes.message_retention_period,
                changes.policy.as_deref(),
            )
            .await?;
        }
        if changes.tags.is_some() {
            target
                .reconcile_tags(ctx.audit, TagScope::Queues, &url, actual.tags.as_ref(), &tags)
                .await?;
        }
        Ok(())
    }

    async fn render_hcl(target: &HclTarget, _ctx: &RunContext<'_>, desired: &Self) -> Result<()> {
        let mut body = HclBlock::new()
            .set("name", &desired.meta.name)
            .set_opt("message_retention_seconds", desired.message_retention_period)
            .set_opt("tags", desired.tags.as_ref());
        if let Some(policy) = &desired.policy {
            let file = target
                .add_file(Self::KIND, &desired.meta.name, "policy", policy)
                .await;
            body = body.set("policy", file);
        }
        target
            .render_resource(Self::KIND, &desired.meta.name, body)
            .await
    }

    /// The policy is a resource of its own in stack documents.
    async fn render_json(
        target: &JsonTarget,
        _ctx: &RunContext<'_>,
        desired: &Self,
    ) -> Result<()> {
        let key = desired.task_key();
        let props = properties(json!({
            "QueueName": desired.meta.name,
            "MessageRetentionPeriod": desired.message_retention_period,
            "Tags": desired.tags.as_ref().map(tag_list),
        }));
        target
            .render_resource(Self::KIND, &desired.meta.name, props)
            .await?;

        let Some(policy) = &desired.policy else {
            return Ok(());
        };
        let policy_props = properties(json!({
            "Queues": [JsonTarget::reference(Self::KIND, &desired.meta.name, Attr::Id)],
            "PolicyDocument": json_document(&key, policy)?,
        }));
        target
            .render_typed(
                "AWS::SQS::QueuePolicy",
                Self::KIND,
                &format!("{}-policy", desired.meta.name),
                policy_props,
            )
            .await
    }
}
