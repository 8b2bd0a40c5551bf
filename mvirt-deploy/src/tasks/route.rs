//! A single route in a route table.
//!
//! Routes have no provider ID; the route table and destination identify
//! one, and changing the target replaces it in place.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{check_required, found_meta, link_id, opt_link_id, properties, single};
use crate::cloud::compute::RouteInfo;
use crate::cloud::{Cloud, Filter};
use crate::error::{Error, Result};
use crate::impl_diff;
use crate::model::{Attr, Kind, Link, Meta};
use crate::reconciler::{Resource, RunContext};
use crate::target::{ApiTarget, HclBlock, HclTarget, JsonTarget};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Route {
    #[serde(flatten)]
    pub meta: Meta,
    pub route_table: Option<Link>,
    pub cidr: Option<String>,
    pub ipv6_cidr: Option<String>,
    pub internet_gateway: Option<Link>,
    pub nat_gateway: Option<Link>,
    pub egress_only_internet_gateway: Option<Link>,
    pub instance: Option<Link>,
    pub transit_gateway_id: Option<String>,
}

impl_diff!(Route {
    internet_gateway,
    nat_gateway,
    egress_only_internet_gateway,
    instance,
    transit_gateway_id
});

impl Route {
    fn destination(&self) -> Option<&str> {
        self.cidr.as_deref().or(self.ipv6_cidr.as_deref())
    }

    fn target_count(&self) -> usize {
        [
            self.internet_gateway.is_some(),
            self.nat_gateway.is_some(),
            self.egress_only_internet_gateway.is_some(),
            self.instance.is_some(),
            self.transit_gateway_id.is_some(),
        ]
        .into_iter()
        .filter(|set| *set)
        .count()
    }

    fn request(&self) -> RouteInfo {
        RouteInfo {
            destination_cidr_block: self.cidr.clone(),
            destination_ipv6_cidr_block: self.ipv6_cidr.clone(),
            gateway_id: opt_link_id(&self.internet_gateway),
            nat_gateway_id: opt_link_id(&self.nat_gateway),
            egress_only_internet_gateway_id: opt_link_id(&self.egress_only_internet_gateway),
            instance_id: opt_link_id(&self.instance),
            transit_gateway_id: self.transit_gateway_id.clone(),
        }
    }
}

#[async_trait]
impl Resource for Route {
    const KIND: Kind = Kind::Route;

    fn meta(&self) -> &Meta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut Meta {
        &mut self.meta
    }

    fn links(&self) -> Vec<&Link> {
        self.route_table
            .iter()
            .chain(self.internet_gateway.iter())
            .chain(self.nat_gateway.iter())
            .chain(self.egress_only_internet_gateway.iter())
            .chain(self.instance.iter())
            .collect()
    }

    fn links_mut(&mut self) -> Vec<&mut Link> {
        self.route_table
            .iter_mut()
            .chain(self.internet_gateway.iter_mut())
            .chain(self.nat_gateway.iter_mut())
            .chain(self.egress_only_internet_gateway.iter_mut())
            .chain(self.instance.iter_mut())
            .collect()
    }

    async fn find(&self, _ctx: &RunContext<'_>, cloud: &dyn Cloud) -> Result<Option<Self>> {
        let (Some(table_id), Some(destination)) = (opt_link_id(&self.route_table), self.destination())
        else {
            return Ok(None);
        };
        let tables = cloud
            .compute()
            .describe_route_tables(&Filter::by_id(&table_id))
            .await?;
        let Some(table) = single(&self.task_key(), tables)? else {
            return Ok(None);
        };
        let Some(route) = table
            .routes
            .into_iter()
            .find(|r| r.destination() == Some(destination))
        else {
            return Ok(None);
        };
        Ok(Some(Route {
            meta: found_meta(&self.meta, format!("{}:{}", table_id, destination)),
            route_table: Some(Link::found(Kind::RouteTable, &table_id)),
            cidr: route.destination_cidr_block,
            ipv6_cidr: route.destination_ipv6_cidr_block,
            internet_gateway: route.gateway_id.map(|id| Link::found(Kind::InternetGateway, id)),
            nat_gateway: route.nat_gateway_id.map(|id| Link::found(Kind::NatGateway, id)),
            egress_only_internet_gateway: route
                .egress_only_internet_gateway_id
                .map(|id| Link::found(Kind::EgressOnlyInternetGateway, id)),
            instance: route.instance_id.map(|id| Link::found(Kind::Instance, id)),
            transit_gateway_id: route.transit_gateway_id,
        }))
    }

    fn check_changes(_actual: Option<&Self>, desired: &Self, _changes: &Self) -> Result<()> {
        let key = desired.task_key();
        check_required(
            &key,
            &[
                ("RouteTable", desired.route_table.is_some()),
                ("CIDR", desired.destination().is_some()),
                ("Target", desired.target_count() > 0),
            ],
        )?;
        if desired.target_count() > 1 {
            return Err(Error::InvalidRecord {
                key,
                message: "a route must have exactly one target".to_string(),
            });
        }
        Ok(())
    }

    async fn render_api(
        target: &ApiTarget,
        _ctx: &RunContext<'_>,
        actual: Option<&Self>,
        desired: &mut Self,
        _changes: &Self,
    ) -> Result<()> {
        let table_id = link_id(&desired.task_key(), "RouteTable", &desired.route_table)?;
        let request = desired.request();
        let compute = target.cloud().compute();
        match actual {
            None => compute.create_route(&table_id, &request).await?,
            Some(_) => compute.replace_route(&table_id, &request).await?,
        }
        desired.meta.id = Some(format!(
            "{}:{}",
            table_id,
            desired.destination().unwrap_or_default()
        ));
        Ok(())
    }

    async fn render_hcl(target: &HclTarget, ctx: &RunContext<'_>, desired: &Self) -> Result<()> {
        let id = |link: &Option<Link>| link.as_ref().map(|l| ctx.hcl_ref(l, Attr::Id));
        let body = HclBlock::new()
            .set_opt("route_table_id", id(&desired.route_table))
            .set_opt("destination_cidr_block", desired.cidr.as_ref())
            .set_opt("destination_ipv6_cidr_block", desired.ipv6_cidr.as_ref())
            .set_opt("gateway_id", id(&desired.internet_gateway))
            .set_opt("nat_gateway_id", id(&desired.nat_gateway))
            .set_opt(
                "egress_only_gateway_id",
                id(&desired.egress_only_internet_gateway),
            )
            .set_opt("instance_id", id(&desired.instance))
            .set_opt("transit_gateway_id", desired.transit_gateway_id.as_ref());
        target
            .render_resource(Self::KIND, &desired.meta.name, body)
            .await
    }

    async fn render_json(
        target: &JsonTarget,
        ctx: &RunContext<'_>,
        desired: &Self,
    ) -> Result<()> {
        let id = |link: &Option<Link>| link.as_ref().map(|l| ctx.json_ref(l, Attr::Id));
        let props = properties(json!({
            "RouteTableId": id(&desired.route_table),
            "DestinationCidrBlock": desired.cidr,
            "DestinationIpv6CidrBlock": desired.ipv6_cidr,
            "GatewayId": id(&desired.internet_gateway),
            "NatGatewayId": id(&desired.nat_gateway),
            "EgressOnlyInternetGatewayId": id(&desired.egress_only_internet_gateway),
            "InstanceId": id(&desired.instance),
            "TransitGatewayId": desired.transit_gateway_id,
        }));
        target
            .render_resource(Self::KIND, &desired.meta.name, props)
            .await
    }
}
