//! Route tables. Routes and subnet associations are tasks of their own.

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
use crate::target::json::tag_list;
use crate::target::{ApiTarget, HclBlock, HclTarget, JsonTarget};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RouteTable {
    #[serde(flatten)]
    pub meta: Meta,
    pub vpc: Option<Link>,
    pub tags: Option<Tags>,
}

impl_diff!(RouteTable { vpc, tags });

#[async_trait]
impl Resource for RouteTable {
    const KIND: Kind = Kind::RouteTable;

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
        let tables = cloud
            .compute()
            .describe_route_tables(&ctx.find_filter(&self.meta))
            .await?;
        let Some(table) = single(&self.task_key(), tables)? else {
            return Ok(None);
        };
        Ok(Some(RouteTable {
            meta: found_meta(&self.meta, &table.id),
            vpc: Some(Link::found(Kind::Vpc, table.vpc_id)),
            tags: found_tags(ctx, &table.tags, &self.tags),
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
                let table = target
                    .cloud()
                    .compute()
                    .create_route_table(&vpc_id, &tags)
                    .await?;
                desired.meta.id = Some(table.id);
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
        let props = properties(json!({
            "VpcId": desired.vpc.as_ref().map(|l| ctx.json_ref(l, Attr::Id)),
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
    use crate::error::Error;
    use crate::reconciler::TaskSet;
    use crate::tasks::testing::apply;
    use crate::tasks::Vpc;

    fn tasks(vpc: &str) -> TaskSet {
        let mut tasks = TaskSet::new();
        for (name, cidr) in [("a", "10.0.0.0/16"), ("b", "10.1.0.0/16")] {
            tasks
                .add(Vpc {
                    meta: Meta::new(name),
                    cidr: Some(cidr.into()),
                    ..Vpc::default()
                })
                .unwrap();
        }
        tasks
            .add(RouteTable {
                meta: Meta::new("private"),
                vpc: Some(Link::new(Kind::Vpc, vpc)),
                ..RouteTable::default()
            })
            .unwrap();
        tasks
    }

    #[tokio::test]
    async fn test_moving_to_another_vpc_is_rejected() {
        let cloud = Arc::new(MemoryCloud::new());
        apply(&cloud, &mut tasks("a")).await.unwrap();
        assert!(apply(&cloud, &mut tasks("a")).await.unwrap().is_unchanged());

        let err = apply(&cloud, &mut tasks("b")).await.unwrap_err();
        assert!(matches!(err.root(), Error::CannotChange { field: "VPC", .. }));
    }
}
