//! Subnets.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{
    check_immutable, check_required, found_meta, found_tags, link_id, meta_id, properties, single,
};
use crate::cloud::compute::SubnetInfo;
use crate::cloud::{Cloud, TagScope};
use crate::error::Result;
use crate::impl_diff;
use crate::model::{Attr, Kind, Link, Meta, Tags};
use crate::reconciler::{Resource, RunContext};
use crate::target::json::tag_list;
use crate::target::{ApiTarget, HclBlock, HclTarget, JsonTarget};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Subnet {
    #[serde(flatten)]
    pub meta: Meta,
    pub vpc: Option<Link>,
    pub cidr: Option<String>,
    pub ipv6_cidr: Option<String>,
    pub availability_zone: Option<String>,
    pub map_public_ip: Option<bool>,
    pub tags: Option<Tags>,
}

impl_diff!(Subnet {
    vpc,
    cidr,
    ipv6_cidr,
    availability_zone,
    map_public_ip,
    tags
});

#[async_trait]
impl Resource for Subnet {
    const KIND: Kind = Kind::Subnet;

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

    async fn find(&self, ctx: &RunContext<'_>, cloud: &dyn Cloud) -> Result<Option<Self>> {
        let subnets = cloud
            .compute()
            .describe_subnets(&ctx.find_filter(&self.meta))
            .await?;
        let Some(subnet) = single(&self.task_key(), subnets)? else {
            return Ok(None);
        };
        Ok(Some(Subnet {
            meta: found_meta(&self.meta, &subnet.id),
            vpc: Some(Link::found(Kind::Vpc, subnet.vpc_id)),
            cidr: Some(subnet.cidr_block),
            ipv6_cidr: subnet.ipv6_cidr_block,
            availability_zone: Some(subnet.availability_zone),
            map_public_ip: Some(subnet.map_public_ip_on_launch),
            tags: found_tags(ctx, &subnet.tags, &self.tags),
        }))
    }

    fn check_changes(actual: Option<&Self>, desired: &Self, changes: &Self) -> Result<()> {
        let key = desired.task_key();
        check_required(
            &key,
            &[
                ("CIDR", desired.cidr.is_some()),
                ("VPC", desired.vpc.is_some()),
            ],
        )?;
        check_immutable(
            &key,
            actual.is_some(),
            &[
                ("CIDR", changes.cidr.is_some()),
                ("IPv6CIDR", changes.ipv6_cidr.is_some()),
                ("AvailabilityZone", changes.availability_zone.is_some()),
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
        let compute = target.cloud().compute();
        let tags = desired.tags.clone().unwrap_or_default();
        let Some(actual) = actual else {
            let vpc_id = link_id(&desired.task_key(), "VPC", &desired.vpc)?;
            let subnet = compute
                .create_subnet(&SubnetInfo {
                    vpc_id,
                    cidr_block: desired.cidr.clone().unwrap_or_default(),
                    ipv6_cidr_block: desired.ipv6_cidr.clone(),
                    availability_zone: desired.availability_zone.clone().unwrap_or_default(),
                    map_public_ip_on_launch: false,
                    tags,
                    ..SubnetInfo::default()
                })
                .await?;
            if desired.map_public_ip == Some(true) {
                compute.modify_subnet_map_public_ip(&subnet.id, true).await?;
            }
            desired.meta.id = Some(subnet.id);
            return Ok(());
        };

        let id = meta_id(Self::KIND, &desired.meta)?;
        if let Some(enabled) = changes.map_public_ip {
            compute.modify_subnet_map_public_ip(&id, enabled).await?;
        }
        if changes.tags.is_some() {
            target
                .reconcile_tags(ctx.audit, TagScope::Compute, &id, actual.tags.as_ref(), &tags)
                .await?;
        }
        Ok(())
    }

    async fn render_hcl(target: &HclTarget, ctx: &RunContext<'_>, desired: &Self) -> Result<()> {
        let body = HclBlock::new()
            .set_opt("vpc_id", desired.vpc.as_ref().map(|l| ctx.hcl_ref(l, Attr::Id)))
            .set_opt("cidr_block", desired.cidr.as_ref())
            .set_opt("ipv6_cidr_block", desired.ipv6_cidr.as_ref())
            .set_opt("availability_zone", desired.availability_zone.as_ref())
            .set_opt("map_public_ip_on_launch", desired.map_public_ip)
            .set_opt("tags", desired.tags.as_ref());
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
            "VpcId": desired.vpc.as_ref().map(|l| ctx.json_ref(l, Attr::Id)),
            "CidrBlock": desired.cidr,
            "Ipv6CidrBlock": desired.ipv6_cidr,
            "AvailabilityZone": desired.availability_zone,
            "MapPublicIpOnLaunch": desired.map_public_ip,
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
    use crate::cloud::{Filter, MemoryCloud};
    use crate::error::Error;
    use crate::reconciler::TaskSet;
    use crate::tasks::testing::{apply, json};
    use crate::tasks::Vpc;

    fn tasks(cidr: &str, public: bool) -> TaskSet {
        let mut tasks = TaskSet::new();
        tasks
            .add(Vpc {
                meta: Meta::new("main"),
                cidr: Some("10.0.0.0/16".into()),
                ..Vpc::default()
            })
            .unwrap();
        tasks
            .add(Subnet {
                meta: Meta::new("us-east-1a.example.com"),
                vpc: Some(Link::new(Kind::Vpc, "main")),
                cidr: Some(cidr.into()),
                availability_zone: Some("us-east-1a".into()),
                map_public_ip: Some(public),
                ..Subnet::default()
            })
            .unwrap();
        tasks
    }

    #[tokio::test]
    async fn test_cidr_change_rejected_without_mutation() {
        let cloud = Arc::new(MemoryCloud::new());
        apply(&cloud, &mut tasks("10.0.1.0/24", false)).await.unwrap();
        cloud.clear_mutations().await;

        let err = apply(&cloud, &mut tasks("10.0.2.0/24", false))
            .await
            .unwrap_err();
        match err.root() {
            Error::CannotChange { key, field } => {
                assert_eq!(key.kind, Kind::Subnet);
                assert_eq!(*field, "CIDR");
            }
            other => panic!("Expected CannotChange, got {:?}", other),
        }
        assert!(cloud.mutations().await.is_empty());
    }

    #[tokio::test]
    async fn test_map_public_ip_is_updated_in_place() {
        let cloud = Arc::new(MemoryCloud::new());
        apply(&cloud, &mut tasks("10.0.1.0/24", true)).await.unwrap();
        let subnets = cloud.compute().describe_subnets(&Filter::default()).await.unwrap();
        assert!(subnets[0].map_public_ip_on_launch);

        apply(&cloud, &mut tasks("10.0.1.0/24", false)).await.unwrap();
        let after = cloud.compute().describe_subnets(&Filter::default()).await.unwrap();
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].id, subnets[0].id);
        assert!(!after[0].map_public_ip_on_launch);
    }

    #[tokio::test]
    async fn test_json_references_vpc() {
        let doc = json(&mut tasks("10.0.1.0/24", false)).await;
        let props = &doc["Resources"]["AWSEC2Subnetuseast1aexamplecom"]["Properties"];
        assert_eq!(props["VpcId"], json!({ "Ref": "AWSEC2VPCmain" }));
    }
}
