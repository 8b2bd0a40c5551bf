//! Internet gateways and their VPC attachment.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{found_meta, found_tags, link_id, meta_id, properties, single};
use crate::cloud::{Cloud, TagScope};
use crate::error::Result;
use crate::impl_diff;
use crate::model::{Attr, Kind, Link, Meta, Tags};
use crate::reconciler::{Resource, RunContext};
use crate::target::json::tag_list;
use crate::target::{ApiTarget, HclBlock, HclTarget, JsonTarget};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InternetGateway {
    #[serde(flatten)]
    pub meta: Meta,
    pub vpc: Option<Link>,
    pub tags: Option<Tags>,
}

impl_diff!(InternetGateway { vpc, tags });

#[async_trait]
impl Resource for InternetGateway {
    const KIND: Kind = Kind::InternetGateway;

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
            .describe_internet_gateways(&ctx.find_filter(&self.meta))
            .await?;
        let Some(gateway) = single(&self.task_key(), gateways)? else {
            return Ok(None);
        };
        Ok(Some(InternetGateway {
            meta: found_meta(&self.meta, &gateway.id),
            vpc: gateway
                .attached_vpc_ids
                .first()
                .map(|id| Link::found(Kind::Vpc, id)),
            tags: found_tags(ctx, &gateway.tags, &self.tags),
        }))
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
        let id = match actual {
            None => {
                let gateway = compute.create_internet_gateway(&tags).await?;
                desired.meta.id = Some(gateway.id.clone());
                gateway.id
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
        if changes.vpc.is_some() {
            let vpc_id = link_id(&desired.task_key(), "VPC", &desired.vpc)?;
            compute.attach_internet_gateway(&id, &vpc_id).await?;
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
        let name = &desired.meta.name;
        let props = properties(json!({
            "Tags": desired.tags.as_ref().map(tag_list),
        }));
        target.render_resource(Self::KIND, name, props).await?;

        if let Some(vpc) = &desired.vpc {
            let attachment = properties(json!({
                "VpcId": ctx.json_ref(vpc, Attr::Id),
                "InternetGatewayId": JsonTarget::reference(Self::KIND, name, Attr::Id),
            }));
            target
                .render_typed(
                    "AWS::EC2::VPCGatewayAttachment",
                    Self::KIND,
                    &format!("{}-attachment", name),
                    attachment,
                )
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::cloud::compute::VpcInfo;
    use crate::cloud::{Filter, MemoryCloud};
    use crate::model::TaskKey;
    use crate::reconciler::{TaskOutcome, TaskSet};
    use crate::tasks::testing::{apply, json};
    use crate::tasks::Vpc;

    fn managed() -> TaskSet {
        let mut tasks = TaskSet::new();
        tasks
            .add(Vpc {
                meta: Meta::new("main"),
                cidr: Some("10.0.0.0/16".into()),
                ..Vpc::default()
            })
            .unwrap();
        tasks
            .add(InternetGateway {
                meta: Meta::new("main"),
                vpc: Some(Link::new(Kind::Vpc, "main")),
                ..InternetGateway::default()
            })
            .unwrap();
        tasks
    }

    #[tokio::test]
    async fn test_created_and_attached() {
        let cloud = Arc::new(MemoryCloud::new());
        apply(&cloud, &mut managed()).await.unwrap();
        let gateways = cloud
            .compute()
            .describe_internet_gateways(&Filter::default())
            .await
            .unwrap();
        assert_eq!(gateways.len(), 1);
        assert_eq!(gateways[0].attached_vpc_ids.len(), 1);
        assert!(apply(&cloud, &mut managed()).await.unwrap().is_unchanged());
    }

    #[tokio::test]
    async fn test_shared_gateway_is_not_touched() {
        let cloud = Arc::new(MemoryCloud::new());
        let compute = cloud.compute();
        let vpc = compute
            .create_vpc(&VpcInfo {
                cidr_block: "10.0.0.0/16".into(),
                ..VpcInfo::default()
            })
            .await
            .unwrap();
        let igw = compute.create_internet_gateway(&Tags::new()).await.unwrap();
        compute.attach_internet_gateway(&igw.id, &vpc.id).await.unwrap();
        cloud.clear_mutations().await;

        let mut tasks = TaskSet::new();
        tasks
            .add(Vpc {
                meta: Meta::shared("main", Some(vpc.id.clone())),
                ..Vpc::default()
            })
            .unwrap();
        tasks
            .add(InternetGateway {
                meta: Meta::shared("main", Some(igw.id.clone())),
                vpc: Some(Link::new(Kind::Vpc, "main")),
                ..InternetGateway::default()
            })
            .unwrap();
        let report = apply(&cloud, &mut tasks).await.unwrap();

        assert!(cloud.mutations().await.is_empty());
        let key = TaskKey::new(Kind::InternetGateway, "main");
        assert_eq!(report.outcome(&key), Some(&TaskOutcome::Verified));
        assert_eq!(tasks.id_of(&key), Some(igw.id));
        assert_eq!(tasks.id_of(&TaskKey::new(Kind::Vpc, "main")), Some(vpc.id));
    }

    #[tokio::test]
    async fn test_json_renders_attachment() {
        let doc = json(&mut managed()).await;
        let attachment = &doc["Resources"]["AWSEC2InternetGatewaymainattachment"];
        assert_eq!(attachment["Type"], "AWS::EC2::VPCGatewayAttachment");
        assert_eq!(
            attachment["Properties"]["InternetGatewayId"],
            json!({ "Ref": "AWSEC2InternetGatewaymain" })
        );
    }
}
