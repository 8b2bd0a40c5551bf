//! Launch templates, versioned like launch configurations.
//!
//! The template ID is the task's ID; the timestamped name is published as
//! its `Name`. Tag-only changes are applied to the current template without
//! creating a new version.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::launch_configuration::{launch_refs_in_use, spec_links, ROOT_DEVICE};
use super::{check_required, found_meta, found_tags, link_ids, meta_id, opt_link_id, properties};
use crate::cloud::autoscaling::{LaunchSpec, LaunchTemplateInfo};
use crate::cloud::{Cloud, TagScope};
use crate::error::{Error, Result};
use crate::gc::{is_version_of, latest, select_for_deletion, versioned_name, VersionRecord};
use crate::impl_diff;
use crate::model::diff::{Diff, Unordered};
use crate::model::{Attr, Kind, Link, Meta, Tags};
use crate::reconciler::{Deletion, Resource, RunContext};
use crate::target::hcl::HclValue;
use crate::target::json::tag_list;
use crate::target::{ApiTarget, HclBlock, HclTarget, JsonTarget};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LaunchTemplate {
    #[serde(flatten)]
    pub meta: Meta,
    pub image_id: Option<String>,
    pub instance_type: Option<String>,
    pub ssh_key: Option<Link>,
    pub security_groups: Option<Unordered<Link>>,
    pub iam_instance_profile: Option<Link>,
    pub user_data: Option<String>,
    pub associate_public_ip: Option<bool>,
    pub spot_price: Option<String>,
    pub root_volume_size: Option<i64>,
    pub root_volume_type: Option<String>,
    pub tags: Option<Tags>,
    /// Name of the current version.
    #[serde(skip)]
    pub version_name: Option<String>,
}

impl_diff!(LaunchTemplate {
    image_id,
    instance_type,
    ssh_key,
    security_groups,
    iam_instance_profile,
    user_data,
    associate_public_ip,
    spot_price,
    root_volume_size,
    root_volume_type,
    tags
});

impl LaunchTemplate {
    fn spec(&self) -> LaunchSpec {
        LaunchSpec {
            image_id: self.image_id.clone().unwrap_or_default(),
            instance_type: self.instance_type.clone().unwrap_or_default(),
            key_name: opt_link_id(&self.ssh_key),
            security_group_ids: self
                .security_groups
                .as_ref()
                .map(|g| link_ids(g))
                .unwrap_or_default(),
            iam_instance_profile: opt_link_id(&self.iam_instance_profile),
            user_data: self.user_data.clone(),
            associate_public_ip: self.associate_public_ip,
            spot_price: self.spot_price.clone(),
            root_volume_size: self.root_volume_size,
            root_volume_type: self.root_volume_type.clone(),
        }
    }

    async fn versions(&self, cloud: &dyn Cloud) -> Result<Vec<LaunchTemplateInfo>> {
        Ok(cloud
            .autoscaling()
            .describe_launch_templates()
            .await?
            .into_iter()
            .filter(|t| is_version_of(&self.meta.name, &t.name))
            .collect())
    }
}

fn version_record(template: &LaunchTemplateInfo) -> VersionRecord {
    VersionRecord {
        name: template.name.clone(),
        id: template.id.clone(),
        created: template.created,
    }
}

#[async_trait]
impl Resource for LaunchTemplate {
    const KIND: Kind = Kind::LaunchTemplate;

    fn meta(&self) -> &Meta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut Meta {
        &mut self.meta
    }

    fn links(&self) -> Vec<&Link> {
        self.ssh_key
            .iter()
            .chain(self.security_groups.iter().flat_map(|g| g.iter()))
            .chain(self.iam_instance_profile.iter())
            .collect()
    }

    fn links_mut(&mut self) -> Vec<&mut Link> {
        self.ssh_key
            .iter_mut()
            .chain(self.security_groups.iter_mut().flat_map(|g| g.iter_mut()))
            .chain(self.iam_instance_profile.iter_mut())
            .collect()
    }

    fn tags_mut(&mut self) -> Option<&mut Tags> {
        Some(self.tags.get_or_insert_with(Tags::new))
    }

    fn output(&self, attr: Attr) -> Option<String> {
        match attr {
            Attr::Id => self.meta.id.clone(),
            Attr::Name => self.version_name.clone(),
            _ => None,
        }
    }

    fn adopt(&mut self, actual: &Self) {
        self.version_name = actual.version_name.clone();
    }

    async fn find(&self, ctx: &RunContext<'_>, cloud: &dyn Cloud) -> Result<Option<Self>> {
        let versions = self.versions(cloud).await?;
        let records: Vec<VersionRecord> = versions.iter().map(version_record).collect();
        let Some(newest) = latest(&records) else {
            return Ok(None);
        };
        let Some(template) = versions.into_iter().find(|t| t.id == newest.id) else {
            return Ok(None);
        };
        let (ssh_key, security_groups, iam_instance_profile) = spec_links(&template.spec);
        let spec = template.spec;
        Ok(Some(LaunchTemplate {
            meta: found_meta(&self.meta, &template.id),
            image_id: Some(spec.image_id),
            instance_type: Some(spec.instance_type),
            ssh_key,
            security_groups: Some(security_groups),
            iam_instance_profile,
            user_data: spec.user_data,
            associate_public_ip: spec.associate_public_ip,
            spot_price: spec.spot_price,
            root_volume_size: spec.root_volume_size,
            root_volume_type: spec.root_volume_type,
            tags: found_tags(ctx, &template.tags, &self.tags),
            version_name: Some(template.name),
        }))
    }

    fn check_changes(_actual: Option<&Self>, desired: &Self, _changes: &Self) -> Result<()> {
        check_required(
            &desired.task_key(),
            &[
                ("ImageId", desired.image_id.is_some()),
                ("InstanceType", desired.instance_type.is_some()),
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
        if let Some(actual) = actual {
            let spec_changed = changes.changed_fields().iter().any(|f| *f != "tags");
            if !spec_changed {
                let id = meta_id(Self::KIND, &desired.meta)?;
                return target
                    .reconcile_tags(ctx.audit, TagScope::Compute, &id, actual.tags.as_ref(), &tags)
                    .await;
            }
        }

        let name = versioned_name(&desired.meta.name, target.now());
        if actual.and_then(|a| a.version_name.as_deref()) == Some(name.as_str()) {
            return Err(Error::Propagation(format!(
                "launch template {} already exists, waiting for a new timestamp",
                name
            )));
        }
        let template = target
            .cloud()
            .autoscaling()
            .create_launch_template(&name, &desired.spec(), &tags)
            .await?;
        desired.meta.id = Some(template.id);
        desired.version_name = Some(template.name);
        Ok(())
    }

    async fn render_hcl(target: &HclTarget, ctx: &RunContext<'_>, desired: &Self) -> Result<()> {
        let id = |link: &Option<Link>| link.as_ref().map(|l| ctx.hcl_ref(l, Attr::Id));
        let groups: Option<Vec<HclValue>> = desired
            .security_groups
            .as_ref()
            .map(|g| g.iter().map(|l| ctx.hcl_ref(l, Attr::Id)).collect());
        let mut body = HclBlock::new()
            .set("name_prefix", format!("{}-", desired.meta.name))
            .set_opt("image_id", desired.image_id.as_ref())
            .set_opt("instance_type", desired.instance_type.as_ref())
            .set_opt("key_name", id(&desired.ssh_key))
            .set_opt("tags", desired.tags.as_ref());
        if let Some(user_data) = &desired.user_data {
            let file = target
                .add_file(Self::KIND, &desired.meta.name, "user_data", user_data)
                .await;
            let encoded = match file {
                HclValue::Raw(expr) => HclValue::Raw(format!("base64encode({})", expr)),
                other => other,
            };
            body = body.set("user_data", encoded);
        }
        if let Some(profile) = id(&desired.iam_instance_profile) {
            body = body.block("iam_instance_profile", HclBlock::new().set("name", profile));
        }
        match desired.associate_public_ip {
            Some(public) => {
                body = body.block(
                    "network_interfaces",
                    HclBlock::new()
                        .set("associate_public_ip_address", public)
                        .set("delete_on_termination", true)
                        .set_opt("security_groups", groups),
                );
            }
            None => body = body.set_opt("vpc_security_group_ids", groups),
        }
        if let Some(price) = &desired.spot_price {
            body = body.block(
                "instance_market_options",
                HclBlock::new()
                    .set("market_type", "spot")
                    .block("spot_options", HclBlock::new().set("max_price", price)),
            );
        }
        if desired.root_volume_size.is_some() || desired.root_volume_type.is_some() {
            body = body.block(
                "block_device_mappings",
                HclBlock::new().set("device_name", ROOT_DEVICE).block(
                    "ebs",
                    HclBlock::new()
                        .set_opt("volume_size", desired.root_volume_size)
                        .set_opt("volume_type", desired.root_volume_type.as_ref())
                        .set("delete_on_termination", true),
                ),
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
        let id = |link: &Option<Link>| link.as_ref().map(|l| ctx.json_ref(l, Attr::Id));
        let groups: Option<Vec<Value>> = desired
            .security_groups
            .as_ref()
            .map(|g| g.iter().map(|l| ctx.json_ref(l, Attr::Id)).collect());
        let (groups, interfaces) = match desired.associate_public_ip {
            Some(public) => (
                None,
                Some(json!([{
                    "DeviceIndex": 0,
                    "AssociatePublicIpAddress": public,
                    "DeleteOnTermination": true,
                    "Groups": groups,
                }])),
            ),
            None => (groups, None),
        };
        let root = (desired.root_volume_size.is_some() || desired.root_volume_type.is_some())
            .then(|| {
                json!([{
                    "DeviceName": ROOT_DEVICE,
                    "Ebs": properties(json!({
                        "VolumeSize": desired.root_volume_size,
                        "VolumeType": desired.root_volume_type,
                        "DeleteOnTermination": true,
                    })),
                }])
            });
        let data = properties(json!({
            "ImageId": desired.image_id,
            "InstanceType": desired.instance_type,
            "KeyName": id(&desired.ssh_key),
            "SecurityGroupIds": groups,
            "NetworkInterfaces": interfaces,
            "IamInstanceProfile": id(&desired.iam_instance_profile).map(|p| json!({ "Name": p })),
            "UserData": desired.user_data.as_ref().map(|u| json!({ "Fn::Base64": u })),
            "InstanceMarketOptions": desired.spot_price.as_ref().map(|p| json!({
                "MarketType": "spot",
                "SpotOptions": { "MaxPrice": p },
            })),
            "BlockDeviceMappings": root,
        }));
        let props = properties(json!({
            "LaunchTemplateData": data,
            "TagSpecifications": desired.tags.as_ref().map(|t| json!([{
                "ResourceType": "launch-template",
                "Tags": tag_list(t),
            }])),
        }));
        target
            .render_resource(Self::KIND, &desired.meta.name, props)
            .await
    }

    async fn deletions(&self, ctx: &RunContext<'_>) -> Result<Vec<Box<dyn Deletion>>> {
        let Some(cloud) = ctx.target.cloud() else {
            return Ok(Vec::new());
        };
        let records = self
            .versions(cloud.as_ref())
            .await?
            .iter()
            .map(version_record)
            .collect();
        let mut in_use = launch_refs_in_use(cloud.as_ref()).await?;
        in_use.extend(self.meta.id.clone());
        Ok(select_for_deletion(records, ctx.config.retain_versions, &in_use)
            .into_iter()
            .map(|v| {
                Box::new(LaunchTemplateDeletion {
                    id: v.id,
                    name: v.name,
                }) as Box<dyn Deletion>
            })
            .collect())
    }
}

#[derive(Debug)]
struct LaunchTemplateDeletion {
    id: String,
    name: String,
}

#[async_trait]
impl Deletion for LaunchTemplateDeletion {
    fn description(&self) -> String {
        format!("LaunchTemplate {} ({})", self.name, self.id)
    }

    fn id(&self) -> String {
        self.id.clone()
    }

    async fn delete(&self, cloud: &dyn Cloud) -> Result<()> {
        cloud.autoscaling().delete_launch_template(&self.id).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::cloud::MemoryCloud;
    use crate::model::TaskKey;
    use crate::reconciler::{TaskOutcome, TaskSet};
    use crate::tasks::testing::{apply_with_clock, hcl, json, stepping_clock};

    fn tasks(instance_type: &str, extra_tag: Option<&str>) -> TaskSet {
        let mut tags = Tags::new();
        if let Some(value) = extra_tag {
            tags.insert("team".into(), value.into());
        }
        let mut tasks = TaskSet::new();
        tasks
            .add(LaunchTemplate {
                meta: Meta::new("nodes.test.example.com"),
                image_id: Some("ami-12345678".into()),
                instance_type: Some(instance_type.into()),
                associate_public_ip: Some(false),
                spot_price: Some("0.05".into()),
                user_data: Some("#!/bin/sh\n".into()),
                tags: Some(tags),
                ..LaunchTemplate::default()
            })
            .unwrap();
        tasks
    }

    fn key() -> TaskKey {
        TaskKey::new(Kind::LaunchTemplate, "nodes.test.example.com")
    }

    #[tokio::test]
    async fn test_tag_change_does_not_create_version() {
        let clock = stepping_clock();
        let cloud = Arc::new(MemoryCloud::new().with_clock(clock.clone()));
        let mut first = tasks("m5.large", None);
        apply_with_clock(&cloud, &mut first, clock.clone()).await.unwrap();

        let mut tagged = tasks("m5.large", Some("infra"));
        let report = apply_with_clock(&cloud, &mut tagged, clock.clone())
            .await
            .unwrap();
        assert_eq!(report.outcome(&key()), Some(&TaskOutcome::Updated(vec!["tags"])));
        assert_eq!(tagged.id_of(&key()), first.id_of(&key()));
        let templates = cloud.autoscaling().describe_launch_templates().await.unwrap();
        assert_eq!(templates.len(), 1);
        assert_eq!(templates[0].tags.get("team").map(String::as_str), Some("infra"));
    }

    #[tokio::test]
    async fn test_spec_change_creates_version() {
        let clock = stepping_clock();
        let cloud = Arc::new(MemoryCloud::new().with_clock(clock.clone()));
        let mut first = tasks("m5.large", None);
        apply_with_clock(&cloud, &mut first, clock.clone()).await.unwrap();
        let mut second = tasks("m5.xlarge", None);
        apply_with_clock(&cloud, &mut second, clock.clone()).await.unwrap();

        assert_ne!(second.id_of(&key()), first.id_of(&key()));
        let name = second
            .get(&key())
            .and_then(|t| t.attribute(Attr::Name))
            .unwrap();
        assert!(is_version_of("nodes.test.example.com", &name));
        assert_eq!(cloud.autoscaling().describe_launch_templates().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_manifests_render_spot_and_interfaces() {
        let manifest = hcl(&mut tasks("m5.large", None)).await;
        assert!(manifest.contains("market_type = \"spot\""));
        assert!(manifest.contains("associate_public_ip_address = false"));
        assert!(manifest.contains("user_data = base64encode(file("));

        let doc = json(&mut tasks("m5.large", None)).await;
        let key = crate::target::json::resource_key(Kind::LaunchTemplate, "nodes.test.example.com");
        let data = &doc["Resources"][key.as_str()]["Properties"]["LaunchTemplateData"];
        assert_eq!(data["InstanceMarketOptions"]["SpotOptions"]["MaxPrice"], "0.05");
        assert_eq!(data["NetworkInterfaces"][0]["AssociatePublicIpAddress"], false);
    }
}
