//! Virtual private network.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{check_immutable, check_required, found_meta, found_tags, meta_id, properties, single};
use crate::cloud::compute::VpcInfo;
use crate::cloud::{Cloud, TagScope};
use crate::error::Result;
use crate::impl_diff;
use crate::model::{Attr, Kind, Meta, Tags};
use crate::reconciler::{Resource, RunContext};
use crate::target::json::tag_list;
use crate::target::{ApiTarget, HclBlock, HclTarget, JsonTarget};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Vpc {
    #[serde(flatten)]
    pub meta: Meta,
    pub cidr: Option<String>,
    pub enable_dns_hostnames: Option<bool>,
    pub enable_dns_support: Option<bool>,
    pub tags: Option<Tags>,
}

impl_diff!(Vpc {
    cidr,
    enable_dns_hostnames,
    enable_dns_support,
    tags
});

#[async_trait]
impl Resource for Vpc {
    const KIND: Kind = Kind::Vpc;

    fn meta(&self) -> &Meta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut Meta {
        &mut self.meta
    }

    fn tags_mut(&mut self) -> Option<&mut Tags> {
        Some(self.tags.get_or_insert_with(Tags::new))
    }

    async fn find(&self, ctx: &RunContext<'_>, cloud: &dyn Cloud) -> Result<Option<Self>> {
        let vpcs = cloud
            .compute()
            .describe_vpcs(&ctx.find_filter(&self.meta))
            .await?;
        let Some(vpc) = single(&self.task_key(), vpcs)? else {
            return Ok(None);
        };
        Ok(Some(Vpc {
            meta: found_meta(&self.meta, &vpc.id),
            cidr: Some(vpc.cidr_block),
            enable_dns_hostnames: Some(vpc.enable_dns_hostnames),
            enable_dns_support: Some(vpc.enable_dns_support),
            tags: found_tags(ctx, &vpc.tags, &self.tags),
        }))
    }

    fn check_changes(actual: Option<&Self>, desired: &Self, changes: &Self) -> Result<()> {
        let key = desired.task_key();
        check_required(&key, &[("CIDR", desired.cidr.is_some())])?;
        check_immutable(&key, actual.is_some(), &[("CIDR", changes.cidr.is_some())])
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
            let vpc = compute
                .create_vpc(&VpcInfo {
                    cidr_block: desired.cidr.clone().unwrap_or_default(),
                    enable_dns_hostnames: desired.enable_dns_hostnames.unwrap_or(false),
                    enable_dns_support: desired.enable_dns_support.unwrap_or(true),
                    tags,
                    ..VpcInfo::default()
                })
                .await?;
            desired.meta.id = Some(vpc.id);
            return Ok(());
        };

        let id = meta_id(Self::KIND, &desired.meta)?;
        if changes.enable_dns_hostnames.is_some() || changes.enable_dns_support.is_some() {
            compute
                .modify_vpc_attributes(
                    &id,
                    changes.enable_dns_hostnames,
                    changes.enable_dns_support,
                )
                .await?;
        }
        if changes.tags.is_some() {
            target
                .reconcile_tags(ctx.audit, TagScope::Compute, &id, actual.tags.as_ref(), &tags)
                .await?;
        }
        Ok(())
    }

    async fn render_hcl(target: &HclTarget, _ctx: &RunContext<'_>, desired: &Self) -> Result<()> {
        let body = HclBlock::new()
            .set_opt("cidr_block", desired.cidr.as_ref())
            .set_opt("enable_dns_hostnames", desired.enable_dns_hostnames)
            .set_opt("enable_dns_support", desired.enable_dns_support)
            .set_opt("tags", desired.tags.as_ref());
        target
            .render_resource(Self::KIND, &desired.meta.name, body)
            .await?;
        target
            .add_output(
                "vpc_id",
                HclTarget::reference(Self::KIND, &desired.meta.name, Attr::Id),
            )
            .await;
        Ok(())
    }

    async fn render_json(
        target: &JsonTarget,
        _ctx: &RunContext<'_>,
        desired: &Self,
    ) -> Result<()> {
        let props = properties(json!({
            "CidrBlock": desired.cidr,
            "EnableDnsHostnames": desired.enable_dns_hostnames,
            "EnableDnsSupport": desired.enable_dns_support,
            "Tags": desired.tags.as_ref().map(tag_list),
        }));
        target
            .render_resource(Self::KIND, &desired.meta.name, props)
            .await?;
        target
            .add_output(
                "VpcId",
                JsonTarget::reference(Self::KIND, &desired.meta.name, Attr::Id),
            )
            .await;
        Ok(())
    }
}
