//! EventBridge rules matching instance lifecycle events.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{check_required, found_meta, found_tags, json_document, json_equivalent, properties};
use crate::cloud::events::RuleInfo;
use crate::cloud::{Cloud, TagScope};
use crate::error::{Error, Result};
use crate::impl_diff;
use crate::model::{Attr, Kind, Meta, Tags};
use crate::reconciler::{Resource, RunContext};
use crate::target::json::tag_list;
use crate::target::{ApiTarget, HclBlock, HclTarget, JsonTarget};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventBridgeRule {
    #[serde(flatten)]
    pub meta: Meta,
    pub event_pattern: Option<String>,
    pub tags: Option<Tags>,
    #[serde(skip)]
    pub arn: Option<String>,
}

impl_diff!(EventBridgeRule { event_pattern, tags });

#[async_trait]
impl Resource for EventBridgeRule {
    const KIND: Kind = Kind::EventBridgeRule;

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
            Attr::Id | Attr::Name => self.meta.id.clone(),
            Attr::Arn => self.arn.clone(),
            _ => None,
        }
    }

    fn adopt(&mut self, actual: &Self) {
        self.arn = actual.arn.clone();
    }

    async fn find(&self, ctx: &RunContext<'_>, cloud: &dyn Cloud) -> Result<Option<Self>> {
        let Some(rule) = cloud.events().describe_rule(&self.meta.name).await? else {
            return Ok(None);
        };
        let event_pattern = match (&self.event_pattern, rule.event_pattern) {
            (Some(desired), Some(actual)) if json_equivalent(desired, &actual) => {
                Some(desired.clone())
            }
            (_, actual) => actual,
        };
        Ok(Some(EventBridgeRule {
            meta: found_meta(&self.meta, &rule.name),
            event_pattern,
            tags: found_tags(ctx, &rule.tags, &self.tags),
            arn: Some(rule.arn),
        }))
    }

    fn check_changes(_actual: Option<&Self>, desired: &Self, _changes: &Self) -> Result<()> {
        let key = desired.task_key();
        check_required(&key, &[("EventPattern", desired.event_pattern.is_some())])?;
        if let Some(pattern) = &desired.event_pattern {
            json_document(&key, pattern)?;
        }
        Ok(())
    }

    async fn render_api(
        target: &ApiTarget,
        ctx: &RunContext<'_>,
        actual: Option<&Self>,
        desired: &mut Self,
        changes: &Self,
    ) -> Result<()> {
        let tags = desired.tags.clone().unwrap_or_default();
        if actual.is_none() || changes.event_pattern.is_some() {
            let arn = target
                .cloud()
                .events()
                .put_rule(&RuleInfo {
                    name: desired.meta.name.clone(),
                    event_pattern: desired.event_pattern.clone(),
                    tags: tags.clone(),
                    ..RuleInfo::default()
                })
                .await?;
            desired.arn = Some(arn);
            desired.meta.id = Some(desired.meta.name.clone());
        }
        let Some(actual) = actual else {
            return Ok(());
        };
        if changes.tags.is_some() {
            let arn = actual.arn.clone().ok_or_else(|| Error::MissingAttribute {
                key: desired.task_key(),
                attribute: Attr::Arn.as_str(),
            })?;
            target
                .reconcile_tags(ctx.audit, TagScope::Events, &arn, actual.tags.as_ref(), &tags)
                .await?;
        }
        Ok(())
    }

    async fn render_hcl(target: &HclTarget, _ctx: &RunContext<'_>, desired: &Self) -> Result<()> {
        let mut body = HclBlock::new()
            .set("name", &desired.meta.name)
            .set_opt("tags", desired.tags.as_ref());
        if let Some(pattern) = &desired.event_pattern {
            let file = target
                .add_file(Self::KIND, &desired.meta.name, "event_pattern", pattern)
                .await;
            body = body.set("event_pattern", file);
        }
        target
            .render_resource(Self::KIND, &desired.meta.name, body)
            .await
    }

    /// Targets are appended by the target tasks.
    async fn render_json(
        target: &JsonTarget,
        _ctx: &RunContext<'_>,
        desired: &Self,
    ) -> Result<()> {
        let key = desired.task_key();
        let pattern = desired
            .event_pattern
            .as_ref()
            .map(|p| json_document(&key, p))
            .transpose()?;
        let props = properties(json!({
            "Name": desired.meta.name,
            "EventPattern": pattern,
            "State": "ENABLED",
            "Tags": desired.tags.as_ref().map(tag_list),
        }));
        target
            .render_resource(Self::KIND, &desired.meta.name, props)
            .await
    }
}
