//! NAT gateways.
//!
//! A new gateway is `pending` for a while; creation waits until it is
//! `available` so routes through it can be created in the next wave.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{
    check_immutable, check_required, found_meta, found_tags, link_id, meta_id, opt_link_id,
    properties, single,
};
use crate::cloud::compute::NatGatewayInfo;
use crate::cloud::{Cloud, Filter, TagScope};
use crate::error::{Error, Result};
use crate::impl_diff;
use crate::model::{Attr, Kind, Link, Meta, Tags};
use crate::reconciler::{Resource, RunContext};
use crate::target::json::tag_list;
use crate::target::{ApiTarget, HclBlock, HclTarget, JsonTarget};
use crate::waiter::PollState;

const DEFAULT_ROUTE: &str = "0.0.0.0/0";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NatGateway {
    #[serde(flatten)]
    pub meta: Meta,
    pub subnet: Option<Link>,
    pub elastic_ip: Option<Link>,
    /// Locate an unowned gateway through this route table's default route.
    pub associated_route_table: Option<Link>,
    pub tags: Option<Tags>,
}

impl_diff!(NatGateway {
    subnet,
    elastic_ip,
    tags
});

fn is_gone(gateway: &NatGatewayInfo) -> bool {
    matches!(gateway.state.as_str(), "deleted" | "deleting" | "failed")
}

impl NatGateway {
    async fn lookup(&self, ctx: &RunContext<'_>, cloud: &dyn Cloud) -> Result<Vec<NatGatewayInfo>> {
        let compute = cloud.compute();
        if self.meta.id.is_none() {
            if let Some(table_id) = opt_link_id(&self.associated_route_table) {
                let tables = compute.describe_route_tables(&Filter::by_id(table_id)).await?;
                let nat_id = tables
                    .iter()
                    .flat_map(|t| t.routes.iter())
                    .find(|r| r.destination_cidr_block.as_deref() == Some(DEFAULT_ROUTE))
                    .and_then(|r| r.nat_gateway_id.clone());
                return match nat_id {
                    Some(id) => Ok(compute.describe_nat_gateways(&Filter::by_id(id)).await?),
                    None => Ok(Vec::new()),
                };
            }
        }
        Ok(compute
            .describe_nat_gateways(&ctx.find_filter(&self.meta))
            .await?)
    }
}

#[async_trait]
impl Resource for NatGateway {
    const KIND: Kind = Kind::NatGateway;

    fn meta(&self) -> &Meta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut Meta {
        &mut self.meta
    }

    fn links(&self) -> Vec<&Link> {
        self.subnet
            .iter()
            .chain(self.elastic_ip.iter())
            .chain(self.associated_route_table.iter())
            .collect()
    }

    fn links_mut(&mut self) -> Vec<&mut Link> {
        self.subnet
            .iter_mut()
            .chain(self.elastic_ip.iter_mut())
            .chain(self.associated_route_table.iter_mut())
            .collect()
    }

    fn tags_mut(&mut self) -> Option<&mut Tags> {
        Some(self.tags.get_or_insert_with(Tags::new))
    }

    async fn find(&self, ctx: &RunContext<'_>, cloud: &dyn Cloud) -> Result<Option<Self>> {
        let gateways: Vec<NatGatewayInfo> = self
            .lookup(ctx, cloud)
            .await?
            .into_iter()
            .filter(|g| !is_gone(g))
            .collect();
        let Some(gateway) = single(&self.task_key(), gateways)? else {
            return Ok(None);
        };
        if gateway.state == "pending" {
            return Err(Error::NotYetAvailable(format!(
                "NAT gateway {} is {}",
                gateway.id, gateway.state
            )));
        }
        Ok(Some(NatGateway {
            meta: found_meta(&self.meta, &gateway.id),
            subnet: Some(Link::found(Kind::Subnet, gateway.subnet_id)),
            elastic_ip: Some(Link::found(Kind::ElasticIp, gateway.allocation_id)),
            associated_route_table: self.associated_route_table.clone(),
            tags: found_tags(ctx, &gateway.tags, &self.tags),
        }))
    }

    fn check_changes(actual: Option<&Self>, desired: &Self, changes: &Self) -> Result<()> {
        let key = desired.task_key();
        check_required(
            &key,
            &[
                ("Subnet", desired.subnet.is_some()),
                ("ElasticIp", desired.elastic_ip.is_some()),
            ],
        )?;
        check_immutable(
            &key,
            actual.is_some(),
            &[
                ("Subnet", changes.subnet.is_some()),
                ("ElasticIp", changes.elastic_ip.is_some()),
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
        if let Some(actual) = actual {
            if changes.tags.is_some() {
                let id = meta_id(Self::KIND, &desired.meta)?;
                target
                    .reconcile_tags(ctx.audit, TagScope::Compute, &id, actual.tags.as_ref(), &tags)
                    .await?;
            }
            return Ok(());
        }

        let key = desired.task_key();
        let subnet_id = link_id(&key, "Subnet", &desired.subnet)?;
        let allocation_id = link_id(&key, "ElasticIp", &desired.elastic_ip)?;
        let gateway = compute
            .create_nat_gateway(&subnet_id, &allocation_id, &tags)
            .await?;
        desired.meta.id = Some(gateway.id.clone());

        let filter = Filter::by_id(&gateway.id);
        let filter = &filter;
        target
            .waiter(ctx.config)
            .wait(&format!("NAT gateway {}", gateway.id), move || async move {
                let found = compute.describe_nat_gateways(filter).await?;
                let state = match found.first().map(|g| g.state.as_str()) {
                    Some("available") => PollState::Ready,
                    Some(state @ ("failed" | "deleted")) => PollState::Failed(state.to_string()),
                    Some(state) => PollState::Pending(state.to_string()),
                    None => PollState::Pending("not visible".to_string()),
                };
                Ok::<PollState, Error>(state)
            })
            .await
    }

    async fn render_hcl(target: &HclTarget, ctx: &RunContext<'_>, desired: &Self) -> Result<()> {
        let body = HclBlock::new()
            .set_opt(
                "allocation_id",
                desired.elastic_ip.as_ref().map(|l| ctx.hcl_ref(l, Attr::Id)),
            )
            .set_opt("subnet_id", desired.subnet.as_ref().map(|l| ctx.hcl_ref(l, Attr::Id)))
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
            "AllocationId": desired.elastic_ip.as_ref().map(|l| ctx.json_ref(l, Attr::Id)),
            "SubnetId": desired.subnet.as_ref().map(|l| ctx.json_ref(l, Attr::Id)),
            "Tags": desired.tags.as_ref().map(tag_list),
        }));
        target
            .render_resource(Self::KIND, &desired.meta.name, props)
            .await
    }
}
