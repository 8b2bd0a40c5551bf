//! Elastic IP addresses.
//!
//! An address without an owner tag can still be located two ways: through
//! the `AssociatedElasticIp` tag on the subnet it was allocated for, or by
//! following a route table's default route to its NAT gateway and from
//! there to the gateway's allocation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{check_immutable, found_meta, found_tags, meta_id, opt_link_id, properties, single};
use crate::cloud::compute::AddressInfo;
use crate::cloud::{Cloud, Filter, TagScope};
use crate::error::Result;
use crate::impl_diff;
use crate::model::{Attr, Kind, Link, Meta, Tags};
use crate::reconciler::{Resource, RunContext};
use crate::target::json::tag_list;
use crate::target::{ApiTarget, HclBlock, HclTarget, JsonTarget};

/// Subnet tag holding the allocation ID of the subnet's address.
pub const SUBNET_TAG: &str = "AssociatedElasticIp";

const DEFAULT_ROUTE: &str = "0.0.0.0/0";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ElasticIp {
    #[serde(flatten)]
    pub meta: Meta,
    pub public_ip: Option<String>,
    /// Record the allocation on this subnet's tags.
    pub tag_on_subnet: Option<Link>,
    /// Discover the address through this route table's NAT gateway.
    pub associated_nat_gateway_route_table: Option<Link>,
    pub tags: Option<Tags>,
}

impl_diff!(ElasticIp {
    public_ip,
    tag_on_subnet,
    tags
});

impl ElasticIp {
    /// Allocation ID recorded on the tagged subnet, if any.
    async fn allocation_from_subnet(cloud: &dyn Cloud, subnet_id: &str) -> Result<Option<String>> {
        let subnets = cloud.compute().describe_subnets(&Filter::by_id(subnet_id)).await?;
        Ok(subnets
            .into_iter()
            .next()
            .and_then(|s| s.tags.get(SUBNET_TAG).cloned()))
    }

    /// Allocation ID of the NAT gateway behind the route table's default route.
    async fn allocation_from_route_table(
        cloud: &dyn Cloud,
        route_table_id: &str,
    ) -> Result<Option<String>> {
        let compute = cloud.compute();
        let tables = compute
            .describe_route_tables(&Filter::by_id(route_table_id))
            .await?;
        let nat_id = tables
            .iter()
            .flat_map(|t| t.routes.iter())
            .find(|r| r.destination_cidr_block.as_deref() == Some(DEFAULT_ROUTE))
            .and_then(|r| r.nat_gateway_id.clone());
        let Some(nat_id) = nat_id else {
            return Ok(None);
        };
        let gateways = compute.describe_nat_gateways(&Filter::by_id(nat_id)).await?;
        Ok(gateways.into_iter().next().map(|g| g.allocation_id))
    }

    async fn lookup(&self, ctx: &RunContext<'_>, cloud: &dyn Cloud) -> Result<Vec<AddressInfo>> {
        let compute = cloud.compute();
        if self.meta.id.is_some() {
            return Ok(compute.describe_addresses(&ctx.find_filter(&self.meta)).await?);
        }
        if let Some(subnet_id) = opt_link_id(&self.tag_on_subnet) {
            if let Some(allocation) = Self::allocation_from_subnet(cloud, &subnet_id).await? {
                return Ok(compute.describe_addresses(&Filter::by_id(allocation)).await?);
            }
        }
        if let Some(table_id) = opt_link_id(&self.associated_nat_gateway_route_table) {
            return match Self::allocation_from_route_table(cloud, &table_id).await? {
                Some(allocation) => Ok(compute.describe_addresses(&Filter::by_id(allocation)).await?),
                None => Ok(Vec::new()),
            };
        }
        Ok(compute.describe_addresses(&ctx.find_filter(&self.meta)).await?)
    }
}

#[async_trait]
impl Resource for ElasticIp {
    const KIND: Kind = Kind::ElasticIp;

    fn meta(&self) -> &Meta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut Meta {
        &mut self.meta
    }

    fn links(&self) -> Vec<&Link> {
        self.tag_on_subnet
            .iter()
            .chain(self.associated_nat_gateway_route_table.iter())
            .collect()
    }

    fn links_mut(&mut self) -> Vec<&mut Link> {
        self.tag_on_subnet
            .iter_mut()
            .chain(self.associated_nat_gateway_route_table.iter_mut())
            .collect()
    }

    fn tags_mut(&mut self) -> Option<&mut Tags> {
        Some(self.tags.get_or_insert_with(Tags::new))
    }

    fn output(&self, attr: Attr) -> Option<String> {
        match attr {
            Attr::Id => self.meta.id.clone(),
            Attr::PublicIp => self.public_ip.clone(),
            _ => None,
        }
    }

    fn adopt(&mut self, actual: &Self) {
        if self.public_ip.is_none() {
            self.public_ip = actual.public_ip.clone();
        }
    }

    async fn find(&self, ctx: &RunContext<'_>, cloud: &dyn Cloud) -> Result<Option<Self>> {
        let addresses = self.lookup(ctx, cloud).await?;
        let Some(address) = single(&self.task_key(), addresses)? else {
            return Ok(None);
        };

        let mut tag_on_subnet = None;
        if let Some(subnet_id) = opt_link_id(&self.tag_on_subnet) {
            let recorded = Self::allocation_from_subnet(cloud, &subnet_id).await?;
            if recorded.as_deref() == Some(address.allocation_id.as_str()) {
                tag_on_subnet = Some(Link::found(Kind::Subnet, subnet_id));
            }
        }

        Ok(Some(ElasticIp {
            meta: found_meta(&self.meta, &address.allocation_id),
            public_ip: Some(address.public_ip),
            tag_on_subnet,
            associated_nat_gateway_route_table: self.associated_nat_gateway_route_table.clone(),
            tags: found_tags(ctx, &address.tags, &self.tags),
        }))
    }

    fn check_changes(actual: Option<&Self>, desired: &Self, changes: &Self) -> Result<()> {
        check_immutable(
            &desired.task_key(),
            actual.is_some(),
            &[("PublicIp", changes.public_ip.is_some())],
        )
    }

    async fn render_api(
        target: &ApiTarget,
        ctx: &RunContext<'_>,
        actual: Option<&Self>,
        desired: &mut Self,
        changes: &Self,
    ) -> Result<()> {
        let tags = desired.tags.clone().unwrap_or_default();
        let id = match actual {
            None => {
                let address = target.cloud().compute().allocate_address(&tags).await?;
                desired.public_ip = Some(address.public_ip);
                desired.meta.id = Some(address.allocation_id.clone());
                address.allocation_id
            }
            Some(actual) => {
                let id = meta_id(Self::KIND, &desired.meta)?;
                if changes.tags.is_some() {
                    target
                        .reconcile_tags(ctx.audit, TagScope::Compute, &id, actual.tags.as_ref(), &tags)
                        .await?;
                }
                id
            }
        };

        if changes.tag_on_subnet.is_some() {
            if let Some(subnet_id) = opt_link_id(&desired.tag_on_subnet) {
                let mut subnet_tags = Tags::new();
                subnet_tags.insert(SUBNET_TAG.to_string(), id);
                target
                    .cloud()
                    .tagging()
                    .create_tags(TagScope::Compute, &subnet_id, &subnet_tags)
                    .await?;
            }
        }
        Ok(())
    }

    async fn render_hcl(target: &HclTarget, _ctx: &RunContext<'_>, desired: &Self) -> Result<()> {
        let body = HclBlock::new()
            .set("domain", "vpc")
            .set_opt("tags", desired.tags.as_ref());
        target
            .render_resource(Self::KIND, &desired.meta.name, body)
            .await
    }

    async fn render_json(
        target: &JsonTarget,
        _ctx: &RunContext<'_>,
        desired: &Self,
    ) -> Result<()> {
        let props = properties(json!({
            "Domain": "vpc",
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
    use crate::cloud::compute::{RouteInfo, SubnetInfo, VpcInfo};
    use crate::cloud::MemoryCloud;
    use crate::model::{Lifecycle, TaskKey};
    use crate::reconciler::TaskSet;
    use crate::tasks::testing::apply;
    use crate::tasks::{RouteTable, Subnet, Vpc};

    fn on_subnet() -> TaskSet {
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
                meta: Meta::new("utility-a"),
                vpc: Some(Link::new(Kind::Vpc, "main")),
                cidr: Some("10.0.1.0/24".into()),
                ..Subnet::default()
            })
            .unwrap();
        tasks
            .add(ElasticIp {
                meta: Meta::new("nat-a"),
                tag_on_subnet: Some(Link::new(Kind::Subnet, "utility-a")),
                ..ElasticIp::default()
            })
            .unwrap();
        tasks
    }

    #[tokio::test]
    async fn test_created_once_with_vpc_domain() {
        let cloud = Arc::new(MemoryCloud::new());
        let mut tasks = on_subnet();
        apply(&cloud, &mut tasks).await.unwrap();

        let addresses = cloud
            .compute()
            .describe_addresses(&Filter::default())
            .await
            .unwrap();
        assert_eq!(addresses.len(), 1);
        assert_eq!(addresses[0].domain, "vpc");
        assert!(!addresses[0].public_ip.is_empty());
        let key = TaskKey::new(Kind::ElasticIp, "nat-a");
        assert_eq!(
            tasks.get(&key).unwrap().attribute(Attr::PublicIp),
            Some(addresses[0].public_ip.clone())
        );

        let subnets = cloud.compute().describe_subnets(&Filter::default()).await.unwrap();
        assert_eq!(subnets[0].tags[SUBNET_TAG], addresses[0].allocation_id);

        assert!(apply(&cloud, &mut on_subnet()).await.unwrap().is_unchanged());
    }

    #[tokio::test]
    async fn test_found_through_nat_gateway_route() {
        let cloud = Arc::new(MemoryCloud::new());
        let compute = cloud.compute();
        let vpc = compute
            .create_vpc(&VpcInfo {
                cidr_block: "10.0.0.0/16".into(),
                ..VpcInfo::default()
            })
            .await
            .unwrap();
        let subnet = compute
            .create_subnet(&SubnetInfo {
                vpc_id: vpc.id.clone(),
                cidr_block: "10.0.1.0/24".into(),
                ..SubnetInfo::default()
            })
            .await
            .unwrap();
        let address = compute.allocate_address(&Tags::new()).await.unwrap();
        let nat = compute
            .create_nat_gateway(&subnet.id, &address.allocation_id, &Tags::new())
            .await
            .unwrap();
        let table = compute.create_route_table(&vpc.id, &Tags::new()).await.unwrap();
        compute
            .create_route(
                &table.id,
                &RouteInfo {
                    destination_cidr_block: Some(DEFAULT_ROUTE.into()),
                    nat_gateway_id: Some(nat.id.clone()),
                    ..RouteInfo::default()
                },
            )
            .await
            .unwrap();
        cloud.clear_mutations().await;

        let mut tasks = TaskSet::new();
        tasks
            .add(RouteTable {
                meta: Meta::shared("private-a", Some(table.id.clone())),
                ..RouteTable::default()
            })
            .unwrap();
        tasks
            .add(ElasticIp {
                meta: Meta {
                    lifecycle: Lifecycle::Shared,
                    ..Meta::new("nat-a")
                },
                associated_nat_gateway_route_table: Some(Link::new(Kind::RouteTable, "private-a")),
                ..ElasticIp::default()
            })
            .unwrap();
        apply(&cloud, &mut tasks).await.unwrap();

        let eip = tasks.get(&TaskKey::new(Kind::ElasticIp, "nat-a")).unwrap();
        assert_eq!(eip.attribute(Attr::Id), Some(address.allocation_id));
        assert_eq!(eip.attribute(Attr::PublicIp), Some(address.public_ip));
        assert!(cloud.mutations().await.is_empty());
    }

    #[tokio::test]
    async fn test_broken_chain_finds_nothing() {
        let cloud = Arc::new(MemoryCloud::new());
        let vpc = cloud
            .compute()
            .create_vpc(&VpcInfo {
                cidr_block: "10.0.0.0/16".into(),
                ..VpcInfo::default()
            })
            .await
            .unwrap();
        let table = cloud
            .compute()
            .create_route_table(&vpc.id, &Tags::new())
            .await
            .unwrap();
        let found = ElasticIp::allocation_from_route_table(cloud.as_ref(), &table.id)
            .await
            .unwrap();
        assert!(found.is_none());
    }
}
