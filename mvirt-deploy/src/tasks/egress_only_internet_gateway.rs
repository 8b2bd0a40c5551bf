//! IPv6 egress-only internet gateways.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{
    check_immutable, check_required, found_meta, found_tags, link_id, meta_id, properties, single,
};
use crate::cloud::{Cloud, TagScope};
use crate::error::Result;
use crate::impl_diff;
use crate::model::{Attr, Kind, Link, Meta, Tags};
use crate::reconciler::{Resource, RunContext};
use crate::target::{ApiTarget, HclBlock, HclTarget, JsonTarget};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EgressOnlyInternetGateway {
    #[serde(flatten)]
    pub meta: Meta,
    pub vpc: Option<Link>,
    pub tags: Option<Tags>,
}

impl_diff!(EgressOnlyInternetGateway { vpc, tags });

#[async_trait]
impl Resource for EgressOnlyInternetGateway {
    const KIND: Kind = Kind::EgressOnlyInternetGateway;

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
        let gateways = cloud
            .compute()
            .describe_egress_only_internet_gateways(&ctx.find_filter(&self.meta))
            .await?;
        let Some(gateway) = single(&self.task_key(), gateways)? else {
            return Ok(None);
        };
        Ok(Some(EgressOnlyInternetGateway {
            meta: found_meta(&self.meta, &gateway.id),
            vpc: Some(Link::found(Kind::Vpc, gateway.vpc_id)),
            tags: found_tags(ctx, &gateway.tags, &self.tags),
        }))
    }

    fn check_changes(actual: Option<&Self>, desired: &Self, changes: &Self) -> Result<()> {
        let key = desired.task_key();
        check_required(&key, &[("VPC", desired.vpc.is_some())])?;
        check_immutable(&key, actual.is_some(), &[("VPC", changes.vpc.is_some())])
    }

    async fn render_api(
        target: &ApiTarget,
        ctx: &RunContext<'_>,
        actual: Option<&Self>,
        desired: &mut Self,
        changes: &Self,
    ) -> Result<()> {
        let tags = desired.tags.clone().unwrap_or_default();
        match actual {
            None => {
                let vpc_id = link_id(&desired.task_key(), "VPC", &desired.vpc)?;
                let gateway = target
                    .cloud()
                    .compute()
                    .create_egress_only_internet_gateway(&vpc_id, &tags)
                    .await?;
                desired.meta.id = Some(gateway.id);
            }
            Some(actual) if changes.tags.is_some() => {
                let id = meta_id(Self::KIND, &desired.meta)?;
                target
                    .reconcile_tags(ctx.audit, TagScope::Compute, &id, actual.tags.as_ref(), &tags)
                    .await?;
            }
            Some(_) => {}
        }
        Ok(())
    }

    async fn render_hcl(target: &HclTarget, ctx: &RunContext<'_>, desired: &Self) -> Result<()> {
        let body = HclBlock::new()
            .set_opt("vpc_id", desired.vpc.as_ref().map(|l| ctx.hcl_ref(l, Attr::Id)))
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
        // The stack resource carries no tags.
        let props = properties(json!({
            "VpcId": desired.vpc.as_ref().map(|l| ctx.json_ref(l, Attr::Id)),
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
    use crate::error::Error;
    use crate::reconciler::TaskSet;
    use crate::tasks::testing::{apply, hcl};

    #[tokio::test]
    async fn test_vpc_required() {
        let cloud = Arc::new(MemoryCloud::new());
        let mut tasks = TaskSet::new();
        tasks
            .add(EgressOnlyInternetGateway {
                meta: Meta::new("v6"),
                ..EgressOnlyInternetGateway::default()
            })
            .unwrap();
        let err = apply(&cloud, &mut tasks).await.unwrap_err();
        assert!(matches!(
            err.root(),
            Error::RequiredFieldMissing { field: "VPC", .. }
        ));
    }

    #[tokio::test]
    async fn test_hcl_references_vpc() {
        let mut tasks = TaskSet::new();
        tasks
            .add(crate::tasks::Vpc {
                meta: Meta::new("main"),
                cidr: Some("10.0.0.0/16".into()),
                ..Default::default()
            })
            .unwrap();
        tasks
            .add(EgressOnlyInternetGateway {
                meta: Meta::new("v6"),
                vpc: Some(Link::new(Kind::Vpc, "main")),
                ..EgressOnlyInternetGateway::default()
            })
            .unwrap();
        let manifest = hcl(&mut tasks).await;
        assert!(manifest.contains("vpc_id = \"${aws_vpc.main.id}\""));
    }
}
