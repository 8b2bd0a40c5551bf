//! Lifecycle hooks on an autoscaling group.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{check_immutable, check_required, found_meta, link_id, opt_link_id, properties, single};
use crate::cloud::autoscaling::LifecycleHookInfo;
use crate::cloud::Cloud;
use crate::error::{Error, Result};
use crate::impl_diff;
use crate::model::{Attr, Kind, Link, Meta};
use crate::reconciler::{Resource, RunContext};
use crate::target::{ApiTarget, HclBlock, HclTarget, JsonTarget};

pub const DEFAULT_HEARTBEAT_TIMEOUT: i64 = 3600;

const TRANSITIONS: &[&str] = &[
    "autoscaling:EC2_INSTANCE_LAUNCHING",
    "autoscaling:EC2_INSTANCE_TERMINATING",
];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AutoscalingLifecycleHook {
    #[serde(flatten)]
    pub meta: Meta,
    pub autoscaling_group: Option<Link>,
    pub transition: Option<String>,
    /// `CONTINUE` or `ABANDON`.
    pub default_result: Option<String>,
    pub heartbeat_timeout: Option<i64>,
}

impl_diff!(AutoscalingLifecycleHook {
    autoscaling_group,
    transition,
    default_result,
    heartbeat_timeout
});

impl AutoscalingLifecycleHook {
    fn default_result(&self) -> String {
        self.default_result
            .clone()
            .unwrap_or_else(|| "ABANDON".to_string())
    }
}

#[async_trait]
impl Resource for AutoscalingLifecycleHook {
    const KIND: Kind = Kind::AutoscalingLifecycleHook;

    fn meta(&self) -> &Meta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut Meta {
        &mut self.meta
    }

    fn links(&self) -> Vec<&Link> {
        self.autoscaling_group.iter().collect()
    }

    fn links_mut(&mut self) -> Vec<&mut Link> {
        self.autoscaling_group.iter_mut().collect()
    }

    async fn find(&self, _ctx: &RunContext<'_>, cloud: &dyn Cloud) -> Result<Option<Self>> {
        let Some(group) = opt_link_id(&self.autoscaling_group) else {
            return Ok(None);
        };
        let hooks: Vec<LifecycleHookInfo> = cloud
            .autoscaling()
            .describe_lifecycle_hooks(&group)
            .await?
            .into_iter()
            .filter(|h| h.name == self.meta.name)
            .collect();
        let Some(hook) = single(&self.task_key(), hooks)? else {
            return Ok(None);
        };
        Ok(Some(AutoscalingLifecycleHook {
            meta: found_meta(&self.meta, &hook.name),
            autoscaling_group: Some(Link::found(Kind::AutoscalingGroup, hook.group_name)),
            transition: Some(hook.transition),
            default_result: Some(hook.default_result),
            heartbeat_timeout: Some(hook.heartbeat_timeout),
        }))
    }

    fn check_changes(actual: Option<&Self>, desired: &Self, changes: &Self) -> Result<()> {
        let key = desired.task_key();
        check_required(
            &key,
            &[
                ("AutoscalingGroup", desired.autoscaling_group.is_some()),
                ("Transition", desired.transition.is_some()),
            ],
        )?;
        if let Some(transition) = &desired.transition {
            if !TRANSITIONS.contains(&transition.as_str()) {
                return Err(Error::InvalidRecord {
                    key,
                    message: format!("unknown lifecycle transition {}", transition),
                });
            }
        }
        check_immutable(
            &key,
            actual.is_some(),
            &[("AutoscalingGroup", changes.autoscaling_group.is_some())],
        )
    }

    /// Put is an upsert, so creation and update are the same call.
    async fn render_api(
        target: &ApiTarget,
        _ctx: &RunContext<'_>,
        _actual: Option<&Self>,
        desired: &mut Self,
        _changes: &Self,
    ) -> Result<()> {
        let group = link_id(&desired.task_key(), "AutoscalingGroup", &desired.autoscaling_group)?;
        let hook = LifecycleHookInfo {
            name: desired.meta.name.clone(),
            group_name: group,
            transition: desired.transition.clone().unwrap_or_default(),
            default_result: desired.default_result(),
            heartbeat_timeout: desired
                .heartbeat_timeout
                .unwrap_or(DEFAULT_HEARTBEAT_TIMEOUT),
        };
        target.cloud().autoscaling().put_lifecycle_hook(&hook).await?;
        desired.meta.id = Some(hook.name);
        Ok(())
    }

    async fn render_hcl(target: &HclTarget, ctx: &RunContext<'_>, desired: &Self) -> Result<()> {
        let body = HclBlock::new()
            .set("name", &desired.meta.name)
            .set_opt(
                "autoscaling_group_name",
                desired
                    .autoscaling_group
                    .as_ref()
                    .map(|l| ctx.hcl_ref(l, Attr::Name)),
            )
            .set_opt("lifecycle_transition", desired.transition.as_ref())
            .set("default_result", desired.default_result())
            .set(
                "heartbeat_timeout",
                desired.heartbeat_timeout.unwrap_or(DEFAULT_HEARTBEAT_TIMEOUT),
            );
        target
            .render_resource(Self::KIND, &desired.meta.name, body)
            .await
    }

    async fn render_json(
        target: &JsonTarget,
        ctx: &RunContext<'_>,
        desired: &Self,
    ) -> Result<()> {
        let props = properties(json!({
            "LifecycleHookName": desired.meta.name,
            "AutoScalingGroupName": desired
                .autoscaling_group
                .as_ref()
                .map(|l| ctx.json_ref(l, Attr::Id)),
            "LifecycleTransition": desired.transition,
            "DefaultResult": desired.default_result(),
            "HeartbeatTimeout": desired.heartbeat_timeout.unwrap_or(DEFAULT_HEARTBEAT_TIMEOUT),
        }));
        target
            .render_resource(Self::KIND, &desired.meta.name, props)
            .await
    }
}
