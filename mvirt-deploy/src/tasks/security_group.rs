//! Security groups. Rules are tasks of their own.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{
    check_immutable, check_required, found_meta, found_tags, link_id, meta_id, opt_link_id,
    properties, single,
};
use crate::cloud::compute::SecurityGroupInfo;
use crate::cloud::{Cloud, Filter, TagScope};
use crate::error::Result;
use crate::impl_diff;
use crate::model::{Attr, Kind, Link, Meta, Tags};
use crate::reconciler::{Resource, RunContext};
use crate::target::json::tag_list;
use crate::target::{ApiTarget, HclBlock, HclTarget, JsonTarget};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecurityGroup {
    #[serde(flatten)]
    pub meta: Meta,
    pub vpc: Option<Link>,
    pub description: Option<String>,
    pub tags: Option<Tags>,
}

impl_diff!(SecurityGroup {
    vpc,
    description,
    tags
});

#[async_trait]
impl Resource for SecurityGroup {
    const KIND: Kind = Kind::SecurityGroup;

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

    /// Group names are unique per VPC, so an untagged group with the
    /// right name is also a match.
    async fn find(&self, ctx: &RunContext<'_>, cloud: &dyn Cloud) -> Result<Option<Self>> {
        let vpc_id = opt_link_id(&self.vpc);
        let compute = cloud.compute();
        let mut groups = compute
            .describe_security_groups(&ctx.find_filter(&self.meta).in_vpc(vpc_id.as_deref()))
            .await?;
        if groups.is_empty() && self.meta.id.is_none() {
            groups = compute
                .describe_security_groups(&Filter::default().in_vpc(vpc_id.as_deref()))
                .await?
                .into_iter()
                .filter(|g| g.name == self.meta.name)
                .collect();
        }
        let Some(group) = single(&self.task_key(), groups)? else {
            return Ok(None);
        };
        Ok(Some(SecurityGroup {
            meta: found_meta(&self.meta, &group.id),
            vpc: Some(Link::found(Kind::Vpc, group.vpc_id)),
            description: Some(group.description),
            tags: found_tags(ctx, &group.tags, &self.tags),
        }))
    }

    fn check_changes(actual: Option<&Self>, desired: &Self, changes: &Self) -> Result<()> {
        let key = desired.task_key();
        check_required(&key, &[("VPC", desired.vpc.is_some())])?;
        check_immutable(
            &key,
            actual.is_some(),
            &[
                ("VPC", changes.vpc.is_some()),
                ("Description", changes.description.is_some()),
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
        let tags = desired.tags.clone().unwrap_or_default();
        match actual {
            None => {
                let request = SecurityGroupInfo {
                    vpc_id: link_id(&desired.task_key(), "VPC", &desired.vpc)?,
                    name: desired.meta.name.clone(),
                    description: desired
                        .description
                        .clone()
                        .unwrap_or_else(|| desired.meta.name.clone()),
                    tags: tags.clone(),
                    ..SecurityGroupInfo::default()
                };
                let group = target
                    .cloud()
                    .compute()
                    .create_security_group(&request)
                    .await?;
                desired.meta.id = Some(group.id);
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
            .set("name", &desired.meta.name)
            .set_opt("description", desired.description.as_ref())
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
            "GroupName": desired.meta.name,
            "GroupDescription": desired.description.as_ref().unwrap_or(&desired.meta.name),
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

    fn tasks(description: &str) -> TaskSet {
        let mut tasks = TaskSet::new();
        tasks
            .add(Vpc {
                meta: Meta::new("main"),
                cidr: Some("10.0.0.0/16".into()),
                ..Vpc::default()
            })
            .unwrap();
        tasks
            .add(SecurityGroup {
                meta: Meta::new("nodes.test.example.com"),
                vpc: Some(Link::new(Kind::Vpc, "main")),
                description: Some(description.into()),
                ..SecurityGroup::default()
            })
            .unwrap();
        tasks
    }

    #[tokio::test]
    async fn test_group_named_after_task() {
        let cloud = Arc::new(MemoryCloud::new());
        apply(&cloud, &mut tasks("Security group for nodes"))
            .await
            .unwrap();
        let groups = cloud
            .compute()
            .describe_security_groups(&Filter::default())
            .await
            .unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].name, "nodes.test.example.com");
        assert!(apply(&cloud, &mut tasks("Security group for nodes"))
            .await
            .unwrap()
            .is_unchanged());
    }

    #[tokio::test]
    async fn test_description_is_immutable() {
        let cloud = Arc::new(MemoryCloud::new());
        apply(&cloud, &mut tasks("one")).await.unwrap();
        let err = apply(&cloud, &mut tasks("two")).await.unwrap_err();
        assert!(matches!(
            err.root(),
            Error::CannotChange { field: "Description", .. }
        ));
    }
}
