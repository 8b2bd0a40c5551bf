//! Route 53 hosted zones.
//!
//! Zones are usually shared with the cluster rather than owned by it, so
//! they are found by DNS name when no ID is given. A private zone must be
//! associated with the cluster VPC.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{check_immutable, check_required, found_meta, found_tags, meta_id, opt_link_id, properties, single};
use crate::cloud::dns::{fqdn, HostedZoneInfo};
use crate::cloud::{Cloud, TagScope};
use crate::error::Result;
use crate::impl_diff;
use crate::model::{Attr, Kind, Link, Meta, Tags};
use crate::reconciler::{Resource, RunContext};
use crate::target::json::tag_list;
use crate::target::{ApiTarget, HclBlock, HclTarget, JsonTarget};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DnsZone {
    #[serde(flatten)]
    pub meta: Meta,
    pub dns_name: Option<String>,
    pub private: Option<bool>,
    pub vpc: Option<Link>,
    pub comment: Option<String>,
    pub tags: Option<Tags>,
}

impl_diff!(DnsZone {
    dns_name,
    private,
    vpc,
    comment,
    tags
});

impl DnsZone {
    fn dns_name(&self) -> String {
        fqdn(self.dns_name.as_deref().unwrap_or(&self.meta.name))
    }
}

#[async_trait]
impl Resource for DnsZone {
    const KIND: Kind = Kind::DnsZone;

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

    fn output(&self, attr: Attr) -> Option<String> {
        match attr {
            Attr::Id | Attr::HostedZoneId => self.meta.id.clone(),
            Attr::Name => Some(self.dns_name()),
            _ => None,
        }
    }

    async fn find(&self, ctx: &RunContext<'_>, cloud: &dyn Cloud) -> Result<Option<Self>> {
        let api = cloud.dns();
        let zone = match &self.meta.id {
            Some(id) => api.get_hosted_zone(id).await?,
            None => {
                let zones = api
                    .list_hosted_zones_by_name(&self.dns_name())
                    .await?
                    .into_iter()
                    .filter(|z| self.private.map_or(true, |p| z.private == p))
                    .collect();
                single(&self.task_key(), zones)?
            }
        };
        let Some(zone) = zone else {
            return Ok(None);
        };

        // Only the desired VPC matters; other associations are left alone.
        let desired_vpc = opt_link_id(&self.vpc);
        let vpc = match &desired_vpc {
            Some(id) if zone.vpc_ids.contains(id) => Some(Link::found(Kind::Vpc, id.clone())),
            _ => zone
                .vpc_ids
                .first()
                .map(|id| Link::found(Kind::Vpc, id.clone())),
        };
        let comment = match &self.comment {
            Some(_) => zone.comment,
            None => None,
        };
        // The provider always answers with a trailing dot.
        let dns_name = match &self.dns_name {
            Some(desired) if fqdn(desired) == zone.name => desired.clone(),
            _ => zone.name,
        };
        Ok(Some(DnsZone {
            meta: found_meta(&self.meta, &zone.id),
            dns_name: Some(dns_name),
            private: Some(zone.private),
            vpc,
            comment,
            tags: found_tags(ctx, &zone.tags, &self.tags),
        }))
    }

    fn check_changes(actual: Option<&Self>, desired: &Self, changes: &Self) -> Result<()> {
        let key = desired.task_key();
        if desired.private == Some(true) {
            check_required(&key, &[("VPC", desired.vpc.is_some())])?;
        }
        check_immutable(
            &key,
            actual.is_some(),
            &[
                ("DNSName", changes.dns_name.is_some()),
                ("Private", changes.private.is_some()),
                ("Comment", changes.comment.is_some()),
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
        let api = target.cloud().dns();
        let tags = desired.tags.clone().unwrap_or_default();
        let vpc = opt_link_id(&desired.vpc);
        let Some(actual) = actual else {
            let zone = api
                .create_hosted_zone(&HostedZoneInfo {
                    name: desired.dns_name(),
                    private: desired.private.unwrap_or(false),
                    vpc_ids: vpc.into_iter().collect(),
                    comment: desired.comment.clone(),
                    tags,
                    ..HostedZoneInfo::default()
                })
                .await?;
            desired.meta.id = Some(zone.id);
            return Ok(());
        };

        let id = meta_id(Self::KIND, &desired.meta)?;
        if changes.vpc.is_some() {
            if let Some(vpc) = &vpc {
                api.associate_vpc_with_hosted_zone(&id, vpc).await?;
            }
        }
        if changes.tags.is_some() {
            target
                .reconcile_tags(ctx.audit, TagScope::Dns, &id, actual.tags.as_ref(), &tags)
                .await?;
        }
        Ok(())
    }

    async fn render_hcl(target: &HclTarget, ctx: &RunContext<'_>, desired: &Self) -> Result<()> {
        let mut body = HclBlock::new()
            .set("name", desired.dns_name().trim_end_matches('.'))
            .set_opt("comment", desired.comment.as_ref())
            .set_opt("tags", desired.tags.as_ref());
        if let Some(vpc) = &desired.vpc {
            body = body.block(
                "vpc",
                HclBlock::new().set("vpc_id", ctx.hcl_ref(vpc, Attr::Id)),
            );
        }
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
            "Name": desired.dns_name(),
            "HostedZoneConfig": desired.comment.as_ref().map(|c| json!({ "Comment": c })),
            "VPCs": desired.vpc.as_ref().map(|v| json!([{
                "VPCId": ctx.json_ref(v, Attr::Id),
                "VPCRegion": ctx.config.region,
            }])),
            "HostedZoneTags": desired.tags.as_ref().map(tag_list),
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
    use crate::model::TaskKey;
    use crate::reconciler::{TaskOutcome, TaskSet};
    use crate::tasks::testing::{apply, hcl, json};
    use crate::tasks::Vpc;

    fn private_zone(vpc: &str) -> TaskSet {
        let mut tasks = TaskSet::new();
        for name in ["main", "other"] {
            tasks
                .add(Vpc {
                    meta: Meta::new(name),
                    cidr: Some(if name == "main" { "10.0.0.0/16" } else { "10.1.0.0/16" }.into()),
                    ..Vpc::default()
                })
                .unwrap();
        }
        tasks
            .add(DnsZone {
                meta: Meta::new("internal.example.com"),
                private: Some(true),
                vpc: Some(Link::new(Kind::Vpc, vpc)),
                ..DnsZone::default()
            })
            .unwrap();
        tasks
    }

    fn key() -> TaskKey {
        TaskKey::new(Kind::DnsZone, "internal.example.com")
    }

    #[tokio::test]
    async fn test_private_zone_created_with_vpc() {
        let cloud = Arc::new(MemoryCloud::new());
        let mut set = private_zone("main");
        apply(&cloud, &mut set).await.unwrap();
        let id = set.id_of(&key()).unwrap();
        let zone = cloud.dns().get_hosted_zone(&id).await.unwrap().unwrap();
        assert_eq!(zone.name, "internal.example.com.");
        assert!(zone.private);
        assert_eq!(zone.vpc_ids.len(), 1);

        let report = apply(&cloud, &mut private_zone("main")).await.unwrap();
        assert!(report.is_unchanged(), "{:?}", report.changes());
    }

    #[tokio::test]
    async fn test_missing_vpc_is_associated() {
        let cloud = Arc::new(MemoryCloud::new());
        apply(&cloud, &mut private_zone("main")).await.unwrap();
        cloud.clear_mutations().await;

        let report = apply(&cloud, &mut private_zone("other")).await.unwrap();
        assert_eq!(report.outcome(&key()), Some(&TaskOutcome::Updated(vec!["vpc"])));
        assert!(cloud
            .mutations()
            .await
            .iter()
            .any(|m| m.starts_with("AssociateVPCWithHostedZone")));
    }

    #[tokio::test]
    async fn test_shared_public_zone_found_by_name() {
        let cloud = Arc::new(MemoryCloud::new());
        let existing = cloud
            .dns()
            .create_hosted_zone(&HostedZoneInfo {
                name: "example.com".into(),
                ..HostedZoneInfo::default()
            })
            .await
            .unwrap();

        let mut set = TaskSet::new();
        set.add(DnsZone {
            meta: Meta::shared("example.com", None),
            private: Some(false),
            ..DnsZone::default()
        })
        .unwrap();
        let report = apply(&cloud, &mut set).await.unwrap();
        let key = TaskKey::new(Kind::DnsZone, "example.com");
        assert_eq!(report.outcome(&key), Some(&TaskOutcome::Verified));
        assert_eq!(
            set.id_of(&TaskKey::new(Kind::DnsZone, "example.com")),
            Some(existing.id)
        );
    }

    #[tokio::test]
    async fn test_private_zone_requires_vpc() {
        let cloud = Arc::new(MemoryCloud::new());
        let mut set = TaskSet::new();
        set.add(DnsZone {
            meta: Meta::new("internal.example.com"),
            private: Some(true),
            ..DnsZone::default()
        })
        .unwrap();
        let err = apply(&cloud, &mut set).await.unwrap_err();
        assert!(matches!(err.root(), Error::RequiredFieldMissing { field: "VPC", .. }));
    }

    #[tokio::test]
    async fn test_manifests_attach_vpc() {
        let manifest = hcl(&mut private_zone("main")).await;
        assert!(manifest.contains("name = \"internal.example.com\""));
        assert!(manifest.contains("vpc_id = \"${aws_vpc.main.id}\""));

        let doc = json(&mut private_zone("main")).await;
        let key = crate::target::json::resource_key(Kind::DnsZone, "internal.example.com");
        let vpcs = &doc["Resources"][key.as_str()]["Properties"]["VPCs"];
        assert_eq!(vpcs[0]["VPCRegion"], "us-east-1");
    }
}
