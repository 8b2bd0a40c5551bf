//! Association of a DHCP option set with a VPC. Its ID is the VPC's ID.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{found_meta, link_id, opt_link_id, properties, single};
use crate::cloud::{Cloud, Filter};
use crate::error::Result;
use crate::impl_diff;
use crate::model::{Attr, Kind, Link, Meta};
use crate::reconciler::{Resource, RunContext};
use crate::target::{ApiTarget, HclBlock, HclTarget, JsonTarget};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VpcDhcpOptionsAssociation {
    #[serde(flatten)]
    pub meta: Meta,
    pub vpc: Option<Link>,
    pub dhcp_options: Option<Link>,
}

impl_diff!(VpcDhcpOptionsAssociation { dhcp_options });

#[async_trait]
impl Resource for VpcDhcpOptionsAssociation {
    const KIND: Kind = Kind::VpcDhcpOptionsAssociation;

    fn meta(&self) -> &Meta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut Meta {
        &mut self.meta
    }

    fn links(&self) -> Vec<&Link> {
        self.vpc.iter().chain(self.dhcp_options.iter()).collect()
    }

    fn links_mut(&mut self) -> Vec<&mut Link> {
        self.vpc
            .iter_mut()
            .chain(self.dhcp_options.iter_mut())
            .collect()
    }

    async fn find(&self, _ctx: &RunContext<'_>, cloud: &dyn Cloud) -> Result<Option<Self>> {
        let Some(vpc_id) = opt_link_id(&self.vpc) else {
            return Ok(None);
        };
        let vpcs = cloud.compute().describe_vpcs(&Filter::by_id(&vpc_id)).await?;
        let Some(vpc) = single(&self.task_key(), vpcs)? else {
            return Ok(None);
        };
        let Some(options_id) = vpc.dhcp_options_id else {
            return Ok(None);
        };
        Ok(Some(VpcDhcpOptionsAssociation {
            meta: found_meta(&self.meta, &vpc.id),
            vpc: Some(Link::found(Kind::Vpc, &vpc.id)),
            dhcp_options: Some(Link::found(Kind::DhcpOptions, options_id)),
        }))
    }

    async fn render_api(
        target: &ApiTarget,
        _ctx: &RunContext<'_>,
        _actual: Option<&Self>,
        desired: &mut Self,
        _changes: &Self,
    ) -> Result<()> {
        let key = desired.task_key();
        let vpc_id = link_id(&key, "VPC", &desired.vpc)?;
        let options_id = link_id(&key, "DhcpOptions", &desired.dhcp_options)?;
        target
            .cloud()
            .compute()
            .associate_dhcp_options(&options_id, &vpc_id)
            .await?;
        desired.meta.id = Some(vpc_id);
        Ok(())
    }

    async fn render_hcl(target: &HclTarget, ctx: &RunContext<'_>, desired: &Self) -> Result<()> {
        let body = HclBlock::new()
            .set_opt("vpc_id", desired.vpc.as_ref().map(|l| ctx.hcl_ref(l, Attr::Id)))
            .set_opt(
                "dhcp_options_id",
                desired.dhcp_options.as_ref().map(|l| ctx.hcl_ref(l, Attr::Id)),
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
            "VpcId": desired.vpc.as_ref().map(|l| ctx.json_ref(l, Attr::Id)),
            "DhcpOptionsId": desired.dhcp_options.as_ref().map(|l| ctx.json_ref(l, Attr::Id)),
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
    use crate::reconciler::TaskSet;
    use crate::tasks::testing::apply;
    use crate::tasks::{DhcpOptions, Vpc};

    #[tokio::test]
    async fn test_associates_once() {
        let build = || {
            let mut tasks = TaskSet::new();
            tasks
                .add(Vpc {
                    meta: Meta::new("main"),
                    cidr: Some("10.0.0.0/16".into()),
                    ..Vpc::default()
                })
                .unwrap();
            tasks
                .add(DhcpOptions {
                    meta: Meta::new("dhcp"),
                    domain_name: Some("ec2.internal".into()),
                    ..DhcpOptions::default()
                })
                .unwrap();
            tasks
                .add(VpcDhcpOptionsAssociation {
                    meta: Meta::new("main"),
                    vpc: Some(Link::new(Kind::Vpc, "main")),
                    dhcp_options: Some(Link::new(Kind::DhcpOptions, "dhcp")),
                })
                .unwrap();
            tasks
        };

        let cloud = Arc::new(MemoryCloud::new());
        apply(&cloud, &mut build()).await.unwrap();
        let vpcs = cloud.compute().describe_vpcs(&Filter::default()).await.unwrap();
        assert!(vpcs[0].dhcp_options_id.as_deref().unwrap().starts_with("dopt-"));

        cloud.clear_mutations().await;
        assert!(apply(&cloud, &mut build()).await.unwrap().is_unchanged());
        assert!(cloud.mutations().await.is_empty());
    }
}
