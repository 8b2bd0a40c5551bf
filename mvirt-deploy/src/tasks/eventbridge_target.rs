//! A queue subscribed to an EventBridge rule.
//!
//! The task name is the target ID within the rule. Stack documents carry
//! targets as a property of the rule.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{check_immutable, check_required, found_meta, link_id, opt_link_id};
use crate::cloud::events::EventTargetInfo;
use crate::cloud::Cloud;
use crate::error::{Error, Result};
use crate::impl_diff;
use crate::model::{Attr, Kind, Link, Meta};
use crate::reconciler::{Resource, RunContext};
use crate::target::{ApiTarget, HclBlock, HclTarget, JsonTarget};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventBridgeTarget {
    #[serde(flatten)]
    pub meta: Meta,
    pub rule: Option<Link>,
    pub sqs_queue: Option<Link>,
}

impl_diff!(EventBridgeTarget { rule, sqs_queue });

fn target_id(rule: &str, id: &str) -> String {
    format!("{}:{}", rule, id)
}

#[async_trait]
impl Resource for EventBridgeTarget {
    const KIND: Kind = Kind::EventBridgeTarget;

    fn meta(&self) -> &Meta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut Meta {
        &mut self.meta
    }

    fn links(&self) -> Vec<&Link> {
        self.rule.iter().chain(self.sqs_queue.iter()).collect()
    }

    fn links_mut(&mut self) -> Vec<&mut Link> {
        self.rule
            .iter_mut()
            .chain(self.sqs_queue.iter_mut())
            .collect()
    }

    async fn find(&self, ctx: &RunContext<'_>, cloud: &dyn Cloud) -> Result<Option<Self>> {
        let Some(rule) = opt_link_id(&self.rule) else {
            return Ok(None);
        };
        let Some(target) = cloud
            .events()
            .list_targets_by_rule(&rule)
            .await?
            .into_iter()
            .find(|t| t.id == self.meta.name)
        else {
            return Ok(None);
        };

        // Targets are stored by ARN; queue links carry the URL.
        let sqs_queue = match &self.sqs_queue {
            Some(desired)
                if ctx
                    .attribute(desired, Attr::Arn)
                    .is_ok_and(|arn| arn == target.arn) =>
            {
                desired.clone()
            }
            _ => Link::found(Kind::SqsQueue, target.arn.clone()),
        };
        Ok(Some(EventBridgeTarget {
            meta: found_meta(&self.meta, target_id(&rule, &target.id)),
            rule: Some(Link::found(Kind::EventBridgeRule, rule)),
            sqs_queue: Some(sqs_queue),
        }))
    }

    fn check_changes(actual: Option<&Self>, desired: &Self, changes: &Self) -> Result<()> {
        let key = desired.task_key();
        check_required(
            &key,
            &[
                ("Rule", desired.rule.is_some()),
                ("SQSQueue", desired.sqs_queue.is_some()),
            ],
        )?;
        check_immutable(&key, actual.is_some(), &[("Rule", changes.rule.is_some())])
    }

    /// Put replaces any target with the same ID.
    async fn render_api(
        target: &ApiTarget,
        ctx: &RunContext<'_>,
        _actual: Option<&Self>,
        desired: &mut Self,
        _changes: &Self,
    ) -> Result<()> {
        let key = desired.task_key();
        let rule = link_id(&key, "Rule", &desired.rule)?;
        let queue = desired.sqs_queue.as_ref().ok_or_else(|| Error::RequiredFieldMissing {
            key: key.clone(),
            field: "SQSQueue",
        })?;
        let arn = ctx.attribute(queue, Attr::Arn)?;
        target
            .cloud()
            .events()
            .put_targets(
                &rule,
                &[EventTargetInfo {
                    id: desired.meta.name.clone(),
                    arn,
                }],
            )
            .await?;
        desired.meta.id = Some(target_id(&rule, &desired.meta.name));
        Ok(())
    }

    async fn render_hcl(target: &HclTarget, ctx: &RunContext<'_>, desired: &Self) -> Result<()> {
        let body = HclBlock::new()
            .set("target_id", &desired.meta.name)
            .set_opt("rule", desired.rule.as_ref().map(|r| ctx.hcl_ref(r, Attr::Name)))
            .set_opt("arn", desired.sqs_queue.as_ref().map(|q| ctx.hcl_ref(q, Attr::Arn)));
        target
            .render_resource(Self::KIND, &desired.meta.name, body)
            .await
    }

    async fn render_json(
        target: &JsonTarget,
        ctx: &RunContext<'_>,
        desired: &Self,
    ) -> Result<()> {
        let (Some(rule), Some(queue)) = (&desired.rule, &desired.sqs_queue) else {
            return Ok(());
        };
        target
            .append_property(
                Kind::EventBridgeRule,
                &rule.name,
                "Targets",
                json!({
                    "Id": desired.meta.name,
                    "Arn": ctx.json_ref(queue, Attr::Arn),
                }),
            )
            .await
    }
}
