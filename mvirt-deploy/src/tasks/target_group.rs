//! Target groups for network load balancers.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{check_immutable, check_required, found_meta, found_tags, link_id, meta_id, properties, single};
use crate::cloud::elb::{TargetGroupHealthCheck, TargetGroupInfo};
use crate::cloud::{Cloud, TagScope};
use crate::error::{Error, Result};
use crate::impl_diff;
use crate::model::{Attr, Kind, Link, Meta, Tags};
use crate::reconciler::{Resource, RunContext};
use crate::target::json::tag_list;
use crate::target::{ApiTarget, HclBlock, HclTarget, JsonTarget};

const MAX_NAME_LENGTH: usize = 32;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TargetGroup {
    #[serde(flatten)]
    pub meta: Meta,
    pub vpc: Option<Link>,
    pub port: Option<i64>,
    pub protocol: Option<String>,
    pub health_check_protocol: Option<String>,
    pub health_check_path: Option<String>,
    pub healthy_threshold: Option<i64>,
    pub unhealthy_threshold: Option<i64>,
    pub interval: Option<i64>,
    pub tags: Option<Tags>,
}

impl_diff!(TargetGroup {
    vpc,
    port,
    protocol,
    health_check_protocol,
    health_check_path,
    healthy_threshold,
    unhealthy_threshold,
    interval,
    tags
});

impl TargetGroup {
    fn health_check(&self) -> TargetGroupHealthCheck {
        TargetGroupHealthCheck {
            protocol: self.health_check_protocol.clone(),
            path: self.health_check_path.clone(),
            healthy_threshold: self.healthy_threshold,
            unhealthy_threshold: self.unhealthy_threshold,
            interval: self.interval,
        }
    }
}

#[async_trait]
impl Resource for TargetGroup {
    const KIND: Kind = Kind::TargetGroup;

    fn meta(&self) -> &Meta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut Meta {
        &mut self.meta
    }

    fn links(&self) -> Vec<&Link> {
        self.vpc.iter().collect()
    }

    fn links_mut(&mut self) -> Vec<&mut Link> {
        self.vpc.iter_mut().collect()
    }

    fn tags_mut(&mut self) -> Option<&mut Tags> {
        Some(self.tags.get_or_insert_with(Tags::new))
    }

    fn output(&self, attr: Attr) -> Option<String> {
        match attr {
            Attr::Id | Attr::Arn => self.meta.id.clone(),
            Attr::Name => Some(self.meta.name.clone()),
            _ => None,
        }
    }

    async fn find(&self, ctx: &RunContext<'_>, cloud: &dyn Cloud) -> Result<Option<Self>> {
        let found = cloud
            .load_balancing()
            .describe_target_groups(&[self.meta.name.clone()])
            .await?;
        let Some(group) = single(&self.task_key(), found)? else {
            return Ok(None);
        };
        Ok(Some(TargetGroup {
            meta: found_meta(&self.meta, &group.arn),
            vpc: Some(Link::found(Kind::Vpc, group.vpc_id)),
            port: Some(group.port),
            protocol: Some(group.protocol),
            health_check_protocol: Some(group.health_check_protocol),
            health_check_path: group.health_check_path,
            healthy_threshold: Some(group.healthy_threshold),
            unhealthy_threshold: Some(group.unhealthy_threshold),
            interval: Some(group.interval),
            tags: found_tags(ctx, &group.tags, &self.tags),
        }))
    }

    fn check_changes(actual: Option<&Self>, desired: &Self, changes: &Self) -> Result<()> {
        let key = desired.task_key();
        if desired.meta.name.len() > MAX_NAME_LENGTH {
            return Err(Error::InvalidRecord {
                key,
                message: format!("target group name longer than {} characters", MAX_NAME_LENGTH),
            });
        }
        check_required(
            &key,
            &[
                ("VPC", desired.vpc.is_some()),
                ("Port", desired.port.is_some()),
                ("Protocol", desired.protocol.is_some()),
            ],
        )?;
        check_immutable(
            &key,
            actual.is_some(),
            &[
                ("Port", changes.port.is_some()),
                ("Protocol", changes.protocol.is_some()),
                ("VPC", changes.vpc.is_some()),
            ],
        )
    }

    async fn render_api(
        target: &ApiTarget,
        ctx: &RunContext<'_>,
        actual: Option<&Self>,
        desired: &mut Self,
        changes: &Self,
    ) -> Result<()> {
        let api = target.cloud().load_balancing();
        let tags = desired.tags.clone().unwrap_or_default();
        let Some(actual) = actual else {
            let protocol = desired.protocol.clone().unwrap_or_default();
            let created = api
                .create_target_group(&TargetGroupInfo {
                    name: desired.meta.name.clone(),
                    port: desired.port.unwrap_or_default(),
                    vpc_id: link_id(&desired.task_key(), "VPC", &desired.vpc)?,
                    health_check_protocol: desired
                        .health_check_protocol
                        .clone()
                        .unwrap_or_else(|| protocol.clone()),
                    health_check_path: desired.health_check_path.clone(),
                    healthy_threshold: desired.healthy_threshold.unwrap_or(3),
                    unhealthy_threshold: desired.unhealthy_threshold.unwrap_or(3),
                    interval: desired.interval.unwrap_or(30),
                    protocol,
                    tags,
                    ..TargetGroupInfo::default()
                })
                .await?;
            desired.meta.id = Some(created.arn);
            return Ok(());
        };

        let arn = meta_id(Self::KIND, &desired.meta)?;
        let check = changes.health_check();
        if check != TargetGroupHealthCheck::default() {
            api.modify_target_group(&arn, &check).await?;
        }
        if changes.tags.is_some() {
            target
                .reconcile_tags(ctx.audit, TagScope::LoadBalancing, &arn, actual.tags.as_ref(), &tags)
                .await?;
        }
        Ok(())
    }

    async fn render_hcl(target: &HclTarget, ctx: &RunContext<'_>, desired: &Self) -> Result<()> {
        let check = desired.health_check();
        let mut body = HclBlock::new()
            .set("name", &desired.meta.name)
            .set_opt("port", desired.port)
            .set_opt("protocol", desired.protocol.as_ref())
            .set_opt("vpc_id", desired.vpc.as_ref().map(|l| ctx.hcl_ref(l, Attr::Id)))
            .set_opt("tags", desired.tags.as_ref());
        if check != TargetGroupHealthCheck::default() {
            body = body.block(
                "health_check",
                HclBlock::new()
                    .set_opt("protocol", check.protocol)
                    .set_opt("path", check.path)
                    .set_opt("healthy_threshold", check.healthy_threshold)
                    .set_opt("unhealthy_threshold", check.unhealthy_threshold)
                    .set_opt("interval", check.interval),
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
        let props = properties(json!({
            "Name": desired.meta.name,
            "Port": desired.port,
            "Protocol": desired.protocol,
            "VpcId": desired.vpc.as_ref().map(|l| ctx.json_ref(l, Attr::Id)),
            "HealthCheckProtocol": desired.health_check_protocol,
            "HealthCheckPath": desired.health_check_path,
            "HealthyThresholdCount": desired.healthy_threshold,
            "UnhealthyThresholdCount": desired.unhealthy_threshold,
            "HealthCheckIntervalSeconds": desired.interval,
            "Tags": desired.tags.as_ref().map(tag_list),
        }));
        target
            .render_resource(Self::KIND, &desired.meta.name, props)
            .await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::cloud::MemoryCloud;
    use crate::model::TaskKey;
    use crate::reconciler::{TaskOutcome, TaskSet};
    use crate::tasks::testing::{apply, hcl};
    use crate::tasks::Vpc;

    fn tasks(port: i64, interval: i64) -> TaskSet {
        let mut tasks = TaskSet::new();
        tasks
            .add(Vpc {
                meta: Meta::new("main"),
                cidr: Some("10.0.0.0/16".into()),
                ..Vpc::default()
            })
            .unwrap();
        tasks
            .add(TargetGroup {
                meta: Meta::new("tcp-api"),
                vpc: Some(Link::new(Kind::Vpc, "main")),
                port: Some(port),
                protocol: Some("TCP".into()),
                healthy_threshold: Some(2),
                unhealthy_threshold: Some(2),
                interval: Some(interval),
                ..TargetGroup::default()
            })
            .unwrap();
        tasks
    }

    fn key() -> TaskKey {
        TaskKey::new(Kind::TargetGroup, "tcp-api")
    }

    #[tokio::test]
    async fn test_id_is_arn() {
        let cloud = Arc::new(MemoryCloud::new());
        let mut set = tasks(443, 10);
        apply(&cloud, &mut set).await.unwrap();
        let arn = set.id_of(&key()).unwrap();
        assert!(arn.contains(":targetgroup/tcp-api/"));
        assert_eq!(set.get(&key()).unwrap().attribute(Attr::Arn), Some(arn));
        assert!(apply(&cloud, &mut tasks(443, 10)).await.unwrap().is_unchanged());
    }

    #[tokio::test]
    async fn test_health_check_modified_in_place() {
        let cloud = Arc::new(MemoryCloud::new());
        apply(&cloud, &mut tasks(443, 10)).await.unwrap();
        let report = apply(&cloud, &mut tasks(443, 30)).await.unwrap();
        assert_eq!(report.outcome(&key()), Some(&TaskOutcome::Updated(vec!["interval"])));
        let groups = cloud.load_balancing().describe_target_groups(&[]).await.unwrap();
        assert_eq!(groups[0].interval, 30);
    }

    #[tokio::test]
    async fn test_port_is_immutable() {
        let cloud = Arc::new(MemoryCloud::new());
        apply(&cloud, &mut tasks(443, 10)).await.unwrap();
        let err = apply(&cloud, &mut tasks(8443, 10)).await.unwrap_err();
        assert!(matches!(err.root(), Error::CannotChange { field: "Port", .. }));
    }

    #[tokio::test]
    async fn test_hcl_health_check_block() {
        let manifest = hcl(&mut tasks(443, 10)).await;
        assert!(manifest.contains("resource \"aws_lb_target_group\" \"tcp-api\""));
        assert!(manifest.contains("health_check {"));
        assert!(manifest.contains("vpc_id = \"${aws_vpc.main.id}\""));
    }
}
