//! Autoscaling groups.
//!
//! A group runs either a launch configuration or a launch template. Load
//! balancers, target groups and suspended processes are attached and
//! detached incrementally; tags live in the autoscaling tag scope, keyed by
//! group name, and propagate to the instances the group launches.

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{check_required, found_meta, found_tags, link_ids, meta_id, opt_link_id, properties, single};
use crate::cloud::autoscaling::{AutoscalingGroupInfo, AutoscalingGroupUpdate, WarmPoolInfo};
use crate::cloud::{Cloud, TagScope};
use crate::error::{Error, Result};
use crate::impl_diff;
use crate::model::diff::{DiffValue, Unordered};
use crate::model::{Attr, Kind, Link, Meta, Tags};
use crate::tags::{owned_tags, process_compare};
use crate::reconciler::{Resource, RunContext};
use crate::target::hcl::HclValue;
use crate::target::{ApiTarget, HclBlock, HclTarget, JsonTarget};

/// Pre-initialized instances kept next to the group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WarmPool {
    #[serde(default = "enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub min_size: i64,
    pub max_size: Option<i64>,
    /// `Stopped`, `Running` or `Hibernated`.
    #[serde(default = "stopped")]
    pub pool_state: String,
}

fn enabled() -> bool {
    true
}

fn stopped() -> String {
    "Stopped".to_string()
}

impl Default for WarmPool {
    fn default() -> Self {
        Self {
            enabled: true,
            min_size: 0,
            max_size: None,
            pool_state: stopped(),
        }
    }
}

impl WarmPool {
    fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    fn info(&self) -> WarmPoolInfo {
        WarmPoolInfo {
            min_size: self.min_size,
            max_group_prepared_capacity: self.max_size,
            pool_state: self.pool_state.clone(),
        }
    }
}

impl DiffValue for WarmPool {
    fn unchanged(actual: &Self, desired: &Self) -> bool {
        match (actual.enabled, desired.enabled) {
            (false, false) => true,
            _ => actual == desired,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AutoscalingGroup {
    #[serde(flatten)]
    pub meta: Meta,
    pub min_size: Option<i64>,
    pub max_size: Option<i64>,
    pub launch_configuration: Option<Link>,
    pub launch_template: Option<Link>,
    pub subnets: Option<Unordered<Link>>,
    pub load_balancers: Option<Unordered<Link>>,
    pub target_groups: Option<Unordered<Link>>,
    pub suspended_processes: Option<Unordered<String>>,
    pub max_instance_lifetime: Option<i64>,
    pub warm_pool: Option<WarmPool>,
    pub tags: Option<Tags>,
    #[serde(skip)]
    pub arn: Option<String>,
}

impl_diff!(AutoscalingGroup {
    min_size,
    max_size,
    launch_configuration,
    launch_template,
    subnets,
    load_balancers,
    target_groups,
    suspended_processes,
    max_instance_lifetime,
    warm_pool,
    tags
});

fn id_set<'a, I: IntoIterator<Item = &'a Link>>(links: I) -> BTreeSet<String> {
    link_ids(links).into_iter().collect()
}

/// `(to add, to remove)` to bring `actual` to `desired`.
fn set_delta(actual: &BTreeSet<String>, desired: &BTreeSet<String>) -> (Vec<String>, Vec<String>) {
    (
        desired.difference(actual).cloned().collect(),
        actual.difference(desired).cloned().collect(),
    )
}

#[async_trait]
impl Resource for AutoscalingGroup {
    const KIND: Kind = Kind::AutoscalingGroup;

    fn meta(&self) -> &Meta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut Meta {
        &mut self.meta
    }

    fn links(&self) -> Vec<&Link> {
        self.launch_configuration
            .iter()
            .chain(self.launch_template.iter())
            .chain(self.subnets.iter().flat_map(|s| s.iter()))
            .chain(self.load_balancers.iter().flat_map(|l| l.iter()))
            .chain(self.target_groups.iter().flat_map(|t| t.iter()))
            .collect()
    }

    fn links_mut(&mut self) -> Vec<&mut Link> {
        self.launch_configuration
            .iter_mut()
            .chain(self.launch_template.iter_mut())
            .chain(self.subnets.iter_mut().flat_map(|s| s.iter_mut()))
            .chain(self.load_balancers.iter_mut().flat_map(|l| l.iter_mut()))
            .chain(self.target_groups.iter_mut().flat_map(|t| t.iter_mut()))
            .collect()
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
        let groups = cloud
            .autoscaling()
            .describe_auto_scaling_groups(&[self.meta.name.clone()])
            .await?;
        let Some(group) = single(&self.task_key(), groups)? else {
            return Ok(None);
        };
        let found = |kind: Kind, ids: Vec<String>| -> Unordered<Link> {
            ids.into_iter().map(|id| Link::found(kind, id)).collect()
        };
        Ok(Some(AutoscalingGroup {
            meta: found_meta(&self.meta, &group.name),
            min_size: Some(group.min_size),
            max_size: Some(group.max_size),
            launch_configuration: group
                .launch_configuration_name
                .map(|name| Link::found(Kind::LaunchConfiguration, name)),
            launch_template: group
                .launch_template_id
                .map(|id| Link::found(Kind::LaunchTemplate, id)),
            subnets: Some(found(Kind::Subnet, group.subnet_ids)),
            load_balancers: Some(found(Kind::ClassicLoadBalancer, group.load_balancer_names)),
            target_groups: Some(found(Kind::TargetGroup, group.target_group_arns)),
            suspended_processes: Some(group.suspended_processes.into_iter().collect()),
            max_instance_lifetime: group.max_instance_lifetime,
            warm_pool: Some(match group.warm_pool {
                Some(pool) => WarmPool {
                    enabled: true,
                    min_size: pool.min_size,
                    max_size: pool.max_group_prepared_capacity,
                    pool_state: pool.pool_state,
                },
                None => WarmPool::disabled(),
            }),
            // A managed group's tags belong to this run, so keys dropped from
            // the record are found and deleted.
            tags: if self.meta.lifecycle.is_managed() {
                Some(owned_tags(&group.tags))
            } else {
                found_tags(ctx, &group.tags, &self.tags)
            },
            arn: Some(group.arn),
        }))
    }

    fn check_changes(_actual: Option<&Self>, desired: &Self, _changes: &Self) -> Result<()> {
        let key = desired.task_key();
        if desired.launch_configuration.is_some() && desired.launch_template.is_some() {
            return Err(Error::InvalidRecord {
                key,
                message: "only one of LaunchConfiguration and LaunchTemplate may be set".into(),
            });
        }
        check_required(
            &key,
            &[
                ("MinSize", desired.min_size.is_some()),
                ("MaxSize", desired.max_size.is_some()),
                ("Subnets", desired.subnets.as_ref().is_some_and(|s| !s.is_empty())),
                (
                    "LaunchConfiguration",
                    desired.launch_configuration.is_some() || desired.launch_template.is_some(),
                ),
            ],
        )?;
        if let (Some(min), Some(max)) = (desired.min_size, desired.max_size) {
            if min > max {
                return Err(Error::InvalidRecord {
                    key,
                    message: format!("MinSize {} exceeds MaxSize {}", min, max),
                });
            }
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
        let name = desired.meta.name.clone();
        let api = target.cloud().autoscaling();
        let tags = desired.tags.clone().unwrap_or_default();
        let ids = |links: &Option<Unordered<Link>>| {
            links.as_ref().map(|l| link_ids(l)).unwrap_or_default()
        };

        let Some(actual) = actual else {
            api.create_auto_scaling_group(&AutoscalingGroupInfo {
                name: name.clone(),
                min_size: desired.min_size.unwrap_or_default(),
                max_size: desired.max_size.unwrap_or_default(),
                launch_configuration_name: opt_link_id(&desired.launch_configuration),
                launch_template_id: opt_link_id(&desired.launch_template),
                subnet_ids: ids(&desired.subnets),
                load_balancer_names: ids(&desired.load_balancers),
                target_group_arns: ids(&desired.target_groups),
                max_instance_lifetime: desired.max_instance_lifetime,
                tags,
                ..AutoscalingGroupInfo::default()
            })
            .await?;
            if let Some(processes) = desired.suspended_processes.as_ref().filter(|p| !p.is_empty()) {
                api.suspend_processes(&name, &processes.0).await?;
            }
            if let Some(pool) = desired.warm_pool.as_ref().filter(|p| p.enabled) {
                api.put_warm_pool(&name, &pool.info()).await?;
            }
            let created = api.describe_auto_scaling_groups(&[name.clone()]).await?;
            desired.arn = created.into_iter().next().map(|g| g.arn);
            desired.meta.id = Some(name);
            return Ok(());
        };

        let id = meta_id(Self::KIND, &desired.meta)?;
        let update = AutoscalingGroupUpdate {
            min_size: changes.min_size,
            max_size: changes.max_size,
            launch_configuration_name: opt_link_id(&changes.launch_configuration),
            launch_template_id: opt_link_id(&changes.launch_template),
            subnet_ids: changes.subnets.as_ref().map(|s| link_ids(s)),
            max_instance_lifetime: changes.max_instance_lifetime,
        };
        if update != AutoscalingGroupUpdate::default() {
            api.update_auto_scaling_group(&id, &update).await?;
        }

        if changes.load_balancers.is_some() {
            let (attach, detach) = set_delta(
                &id_set(actual.load_balancers.iter().flat_map(|l| l.iter())),
                &id_set(desired.load_balancers.iter().flat_map(|l| l.iter())),
            );
            if !attach.is_empty() {
                api.attach_load_balancers(&id, &attach).await?;
            }
            if !detach.is_empty() {
                api.detach_load_balancers(&id, &detach).await?;
            }
        }
        if changes.target_groups.is_some() {
            let (attach, detach) = set_delta(
                &id_set(actual.target_groups.iter().flat_map(|t| t.iter())),
                &id_set(desired.target_groups.iter().flat_map(|t| t.iter())),
            );
            if !attach.is_empty() {
                api.attach_target_groups(&id, &attach).await?;
            }
            if !detach.is_empty() {
                api.detach_target_groups(&id, &detach).await?;
            }
        }
        if changes.suspended_processes.is_some() {
            let list = |p: &Option<Unordered<String>>| -> Vec<String> {
                p.iter().flat_map(|p| p.iter().cloned()).collect()
            };
            let current = list(&actual.suspended_processes);
            let wanted = list(&desired.suspended_processes);
            let suspend = process_compare(&wanted, &current);
            let resume = process_compare(&current, &wanted);
            if !suspend.is_empty() {
                api.suspend_processes(&id, &suspend).await?;
            }
            if !resume.is_empty() {
                api.resume_processes(&id, &resume).await?;
            }
        }
        if let Some(pool) = &changes.warm_pool {
            if pool.enabled {
                api.put_warm_pool(&id, &pool.info()).await?;
            } else {
                api.delete_warm_pool(&id).await?;
            }
        }
        if changes.tags.is_some() {
            target
                .reconcile_tags(ctx.audit, TagScope::Autoscaling, &id, actual.tags.as_ref(), &tags)
                .await?;
        }
        Ok(())
    }

    async fn render_hcl(target: &HclTarget, ctx: &RunContext<'_>, desired: &Self) -> Result<()> {
        let refs = |links: &Option<Unordered<Link>>, attr: Attr| -> Option<Vec<HclValue>> {
            links
                .as_ref()
                .map(|l| l.iter().map(|link| ctx.hcl_ref(link, attr)).collect())
        };
        let mut body = HclBlock::new()
            .set("name", &desired.meta.name)
            .set_opt("min_size", desired.min_size)
            .set_opt("max_size", desired.max_size)
            .set_opt(
                "launch_configuration",
                desired
                    .launch_configuration
                    .as_ref()
                    .map(|l| ctx.hcl_ref(l, Attr::Id)),
            )
            .set_opt("vpc_zone_identifier", refs(&desired.subnets, Attr::Id))
            .set_opt("load_balancers", refs(&desired.load_balancers, Attr::Id))
            .set_opt("target_group_arns", refs(&desired.target_groups, Attr::Arn))
            .set_opt(
                "suspended_processes",
                desired.suspended_processes.as_ref().map(|p| p.0.clone()),
            )
            .set_opt("max_instance_lifetime", desired.max_instance_lifetime);
        if let Some(template) = &desired.launch_template {
            body = body.block(
                "launch_template",
                HclBlock::new()
                    .set("id", ctx.hcl_ref(template, Attr::Id))
                    .set("version", "$Latest"),
            );
        }
        if let Some(pool) = desired.warm_pool.as_ref().filter(|p| p.enabled) {
            body = body.block(
                "warm_pool",
                HclBlock::new()
                    .set("min_size", pool.min_size)
                    .set_opt("max_group_prepared_capacity", pool.max_size)
                    .set("pool_state", &pool.pool_state),
            );
        }
        for (key, value) in desired.tags.iter().flatten() {
            body = body.block(
                "tag",
                HclBlock::new()
                    .set("key", key)
                    .set("value", value)
                    .set("propagate_at_launch", true),
            );
        }
        target
            .render_resource(Self::KIND, &desired.meta.name, body)
            .await
    }

    async fn render_json(
        target: &JsonTarget,
        ctx: &RunContext<'_>,
        desired: &Self,
    ) -> Result<()> {
        let refs = |links: &Option<Unordered<Link>>, attr: Attr| -> Option<Vec<Value>> {
            links
                .as_ref()
                .map(|l| l.iter().map(|link| ctx.json_ref(link, attr)).collect())
        };
        let tags: Option<Vec<Value>> = desired.tags.as_ref().map(|tags| {
            tags.iter()
                .map(|(k, v)| json!({ "Key": k, "Value": v, "PropagateAtLaunch": true }))
                .collect()
        });
        let props = properties(json!({
            "AutoScalingGroupName": desired.meta.name,
            "MinSize": desired.min_size.map(|n| n.to_string()),
            "MaxSize": desired.max_size.map(|n| n.to_string()),
            "LaunchConfigurationName": desired
                .launch_configuration
                .as_ref()
                .map(|l| ctx.json_ref(l, Attr::Id)),
            "LaunchTemplate": desired.launch_template.as_ref().map(|l| json!({
                "LaunchTemplateId": ctx.json_ref(l, Attr::Id),
                "Version": {
                    "Fn::GetAtt": [
                        crate::target::json::resource_key(Kind::LaunchTemplate, &l.name),
                        "LatestVersionNumber",
                    ],
                },
            })),
            "VPCZoneIdentifier": refs(&desired.subnets, Attr::Id),
            "LoadBalancerNames": refs(&desired.load_balancers, Attr::Id),
            "TargetGroupARNs": refs(&desired.target_groups, Attr::Arn),
            "MaxInstanceLifetime": desired.max_instance_lifetime,
            "Tags": tags,
        }));
        target
            .render_resource(Self::KIND, &desired.meta.name, props)
            .await?;

        if let Some(pool) = desired.warm_pool.as_ref().filter(|p| p.enabled) {
            let pool_props = properties(json!({
                "AutoScalingGroupName": JsonTarget::reference(Self::KIND, &desired.meta.name, Attr::Id),
                "MinSize": pool.min_size,
                "MaxGroupPreparedCapacity": pool.max_size,
                "PoolState": pool.pool_state,
            }));
            target
                .render_typed(
                    "AWS::AutoScaling::WarmPool",
                    Self::KIND,
                    &format!("{}-warm-pool", desired.meta.name),
                    pool_props,
                )
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::cloud::MemoryCloud;
    use crate::model::TaskKey;
    use crate::reconciler::{TaskOutcome, TaskSet};
    use crate::tasks::testing::{apply, hcl, json};
    use crate::tasks::{LaunchConfiguration, Subnet, Vpc};

    fn tasks(group: AutoscalingGroup) -> TaskSet {
        let mut tasks = TaskSet::new();
        tasks
            .add(Vpc {
                meta: Meta::new("main"),
                cidr: Some("10.0.0.0/16".into()),
                ..Vpc::default()
            })
            .unwrap();
        for (name, cidr) in [("a", "10.0.1.0/24"), ("b", "10.0.2.0/24")] {
            tasks
                .add(Subnet {
                    meta: Meta::new(name),
                    vpc: Some(Link::new(Kind::Vpc, "main")),
                    cidr: Some(cidr.into()),
                    availability_zone: Some(format!("us-east-1{}", name)),
                    ..Subnet::default()
                })
                .unwrap();
        }
        tasks
            .add(LaunchConfiguration {
                meta: Meta::new("nodes"),
                image_id: Some("ami-12345678".into()),
                instance_type: Some("m5.large".into()),
                ..LaunchConfiguration::default()
            })
            .unwrap();
        tasks.add(group).unwrap();
        tasks
    }

    fn group(subnets: &[&str], max: i64) -> AutoscalingGroup {
        AutoscalingGroup {
            meta: Meta::new("nodes"),
            min_size: Some(1),
            max_size: Some(max),
            launch_configuration: Some(Link::new(Kind::LaunchConfiguration, "nodes")),
            subnets: Some(subnets.iter().map(|s| Link::new(Kind::Subnet, *s)).collect()),
            suspended_processes: Some(Unordered(vec!["AZRebalance".into()])),
            ..AutoscalingGroup::default()
        }
    }

    fn key() -> TaskKey {
        TaskKey::new(Kind::AutoscalingGroup, "nodes")
    }

    #[tokio::test]
    async fn test_group_created_then_unchanged() {
        let cloud = Arc::new(MemoryCloud::new());
        let report = apply(&cloud, &mut tasks(group(&["a", "b"], 3))).await.unwrap();
        assert_eq!(report.outcome(&key()), Some(&TaskOutcome::Created));

        let groups = cloud.autoscaling().describe_auto_scaling_groups(&[]).await.unwrap();
        assert_eq!(groups[0].suspended_processes, vec!["AZRebalance".to_string()]);
        assert_eq!(groups[0].tags.get("KubernetesCluster").map(String::as_str), Some("test.example.com"));

        let report = apply(&cloud, &mut tasks(group(&["b", "a"], 3))).await.unwrap();
        assert!(report.is_unchanged(), "{:?}", report.changes());
    }

    #[tokio::test]
    async fn test_resize_updates_in_place() {
        let cloud = Arc::new(MemoryCloud::new());
        apply(&cloud, &mut tasks(group(&["a", "b"], 3))).await.unwrap();
        cloud.clear_mutations().await;

        let report = apply(&cloud, &mut tasks(group(&["a", "b"], 5))).await.unwrap();
        assert_eq!(report.outcome(&key()), Some(&TaskOutcome::Updated(vec!["max_size"])));
        assert_eq!(cloud.mutations().await, vec!["UpdateAutoScalingGroup nodes".to_string()]);
    }

    #[tokio::test]
    async fn test_dropped_tag_is_deleted() {
        let cloud = Arc::new(MemoryCloud::new());
        let mut tagged = group(&["a"], 3);
        tagged.tags = Some(Tags::from([("OldTag".to_string(), "OldValue".to_string())]));
        apply(&cloud, &mut tasks(tagged)).await.unwrap();
        cloud.clear_mutations().await;

        let mut untagged = group(&["a"], 3);
        untagged.tags = Some(Tags::new());
        let report = apply(&cloud, &mut tasks(untagged)).await.unwrap();
        assert_eq!(report.outcome(&key()), Some(&TaskOutcome::Updated(vec!["tags"])));
        assert_eq!(cloud.mutations().await, vec![r#"DeleteTags nodes ["OldTag"]"#.to_string()]);

        let groups = cloud.autoscaling().describe_auto_scaling_groups(&[]).await.unwrap();
        assert!(!groups[0].tags.contains_key("OldTag"));
        assert!(groups[0].tags.contains_key("KubernetesCluster"));
    }

    #[tokio::test]
    async fn test_suspended_processes_swapped() {
        let cloud = Arc::new(MemoryCloud::new());
        apply(&cloud, &mut tasks(group(&["a"], 3))).await.unwrap();
        cloud.clear_mutations().await;

        let mut swapped = group(&["a"], 3);
        swapped.suspended_processes = Some(Unordered(vec!["Launch".into(), "AZRebalance".into(), "Terminate".into()]));
        apply(&cloud, &mut tasks(swapped)).await.unwrap();
        let mut suspended = group(&["a"], 3);
        suspended.suspended_processes = Some(Unordered(vec!["Terminate".into()]));
        let report = apply(&cloud, &mut tasks(suspended)).await.unwrap();
        assert_eq!(report.outcome(&key()), Some(&TaskOutcome::Updated(vec!["suspended_processes"])));

        assert_eq!(
            cloud.mutations().await,
            vec![
                "SuspendProcesses nodes".to_string(),
                "ResumeProcesses nodes".to_string(),
            ]
        );
        let groups = cloud.autoscaling().describe_auto_scaling_groups(&[]).await.unwrap();
        assert_eq!(groups[0].suspended_processes, vec!["Terminate".to_string()]);
    }

    #[tokio::test]
    async fn test_warm_pool_added_and_removed() {
        let cloud = Arc::new(MemoryCloud::new());
        apply(&cloud, &mut tasks(group(&["a"], 3))).await.unwrap();

        let mut pooled = group(&["a"], 3);
        pooled.warm_pool = Some(WarmPool {
            min_size: 1,
            ..WarmPool::default()
        });
        apply(&cloud, &mut tasks(pooled)).await.unwrap();
        let groups = cloud.autoscaling().describe_auto_scaling_groups(&[]).await.unwrap();
        assert_eq!(groups[0].warm_pool.as_ref().map(|p| p.min_size), Some(1));

        let mut unpooled = group(&["a"], 3);
        unpooled.warm_pool = Some(WarmPool::disabled());
        apply(&cloud, &mut tasks(unpooled)).await.unwrap();
        let groups = cloud.autoscaling().describe_auto_scaling_groups(&[]).await.unwrap();
        assert!(groups[0].warm_pool.is_none());
    }

    #[tokio::test]
    async fn test_launch_configuration_and_template_exclusive() {
        let cloud = Arc::new(MemoryCloud::new());
        let mut both = group(&["a"], 3);
        both.launch_template = Some(Link::new(Kind::LaunchTemplate, "nodes"));
        let mut set = tasks(both);
        set.add(crate::tasks::LaunchTemplate {
            meta: Meta::new("nodes"),
            image_id: Some("ami-12345678".into()),
            instance_type: Some("m5.large".into()),
            ..crate::tasks::LaunchTemplate::default()
        })
        .unwrap();
        let err = apply(&cloud, &mut set).await.unwrap_err();
        assert!(matches!(err.root(), Error::InvalidRecord { .. }));
    }

    #[tokio::test]
    async fn test_manifests_propagate_tags() {
        let manifest = hcl(&mut tasks(group(&["a"], 3))).await;
        assert!(manifest.contains("propagate_at_launch = true"));
        assert!(manifest.contains("launch_configuration = \"${aws_launch_configuration.nodes.id}\""));

        let doc = json(&mut tasks(group(&["a"], 3))).await;
        let key = crate::target::json::resource_key(Kind::AutoscalingGroup, "nodes");
        let props = &doc["Resources"][key.as_str()]["Properties"];
        assert_eq!(props["MaxSize"], "3");
        assert_eq!(props["Tags"][0]["PropagateAtLaunch"], true);
    }
}
