//! Launch configurations.
//!
//! Launch configurations are immutable. Each change creates a new version
//! named `<name>-<timestamp>`; the latest version is the actual record, and
//! versions beyond the retention count are deleted once no group uses them.

use std::collections::HashSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{check_required, found_meta, link_ids, opt_link_id, properties};
use crate::cloud::autoscaling::LaunchSpec;
use crate::cloud::Cloud;
use crate::error::{Error, Result};
use crate::gc::{is_version_of, latest, select_for_deletion, versioned_name, VersionRecord};
use crate::impl_diff;
use crate::model::diff::Unordered;
use crate::model::{Attr, Kind, Link, Meta};
use crate::reconciler::{Deletion, Resource, RunContext};
use crate::target::hcl::HclValue;
use crate::target::{ApiTarget, HclBlock, HclTarget, JsonTarget};

/// Root device for the block device mapping in stack templates.
pub(crate) const ROOT_DEVICE: &str = "/dev/xvda";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LaunchConfiguration {
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
}

impl_diff!(LaunchConfiguration {
    image_id,
    instance_type,
    ssh_key,
    security_groups,
    iam_instance_profile,
    user_data,
    associate_public_ip,
    spot_price,
    root_volume_size,
    root_volume_type
});

impl LaunchConfiguration {
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

    async fn versions(&self, cloud: &dyn Cloud) -> Result<Vec<(VersionRecord, LaunchSpec)>> {
        Ok(cloud
            .autoscaling()
            .describe_launch_configurations()
            .await?
            .into_iter()
            .filter(|lc| is_version_of(&self.meta.name, &lc.name))
            .map(|lc| {
                let record = VersionRecord {
                    name: lc.name.clone(),
                    id: lc.name,
                    created: lc.created,
                };
                (record, lc.spec)
            })
            .collect())
    }
}

/// Links for provider-side references in a launch spec.
pub(crate) fn spec_links(spec: &LaunchSpec) -> (Option<Link>, Unordered<Link>, Option<Link>) {
    let key = spec.key_name.as_ref().map(|k| Link::found(Kind::SshKey, k));
    let groups = spec
        .security_group_ids
        .iter()
        .map(|id| Link::found(Kind::SecurityGroup, id))
        .collect();
    let profile = spec
        .iam_instance_profile
        .as_ref()
        .map(|p| Link::found(Kind::IamInstanceProfile, p));
    (key, groups, profile)
}

/// Launch configurations and templates currently referenced by any group.
pub(crate) async fn launch_refs_in_use(cloud: &dyn Cloud) -> Result<HashSet<String>> {
    let groups = cloud.autoscaling().describe_auto_scaling_groups(&[]).await?;
    Ok(groups
        .into_iter()
        .flat_map(|g| [g.launch_configuration_name, g.launch_template_id])
        .flatten()
        .collect())
}

#[async_trait]
impl Resource for LaunchConfiguration {
    const KIND: Kind = Kind::LaunchConfiguration;

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

    fn output(&self, attr: Attr) -> Option<String> {
        match attr {
            Attr::Id | Attr::Name => self.meta.id.clone(),
            _ => None,
        }
    }

    async fn find(&self, _ctx: &RunContext<'_>, cloud: &dyn Cloud) -> Result<Option<Self>> {
        let versions = self.versions(cloud).await?;
        let records: Vec<VersionRecord> = versions.iter().map(|(r, _)| r.clone()).collect();
        let Some(newest) = latest(&records) else {
            return Ok(None);
        };
        let Some((record, spec)) = versions.into_iter().find(|(r, _)| r.name == newest.name)
        else {
            return Ok(None);
        };
        let (ssh_key, security_groups, iam_instance_profile) = spec_links(&spec);
        Ok(Some(LaunchConfiguration {
            meta: found_meta(&self.meta, record.name),
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

    /// Every change is a new version; nothing is modified in place.
    async fn render_api(
        target: &ApiTarget,
        _ctx: &RunContext<'_>,
        actual: Option<&Self>,
        desired: &mut Self,
        _changes: &Self,
    ) -> Result<()> {
        let name = versioned_name(&desired.meta.name, target.now());
        if actual.and_then(|a| a.meta.id.as_deref()) == Some(name.as_str()) {
            return Err(Error::Propagation(format!(
                "launch configuration {} already exists, waiting for a new timestamp",
                name
            )));
        }
        target
            .cloud()
            .autoscaling()
            .create_launch_configuration(&name, &desired.spec())
            .await?;
        desired.meta.id = Some(name);
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
            .set_opt("security_groups", groups)
            .set_opt("iam_instance_profile", id(&desired.iam_instance_profile))
            .set_opt("associate_public_ip_address", desired.associate_public_ip)
            .set_opt("spot_price", desired.spot_price.as_ref());
        if let Some(user_data) = &desired.user_data {
            let file = target
                .add_file(Self::KIND, &desired.meta.name, "user_data", user_data)
                .await;
            body = body.set("user_data", file);
        }
        if desired.root_volume_size.is_some() || desired.root_volume_type.is_some() {
            body = body.block(
                "root_block_device",
                HclBlock::new()
                    .set_opt("volume_size", desired.root_volume_size)
                    .set_opt("volume_type", desired.root_volume_type.as_ref())
                    .set("delete_on_termination", true),
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
        let props = properties(json!({
            "ImageId": desired.image_id,
            "InstanceType": desired.instance_type,
            "KeyName": id(&desired.ssh_key),
            "SecurityGroups": groups,
            "IamInstanceProfile": id(&desired.iam_instance_profile),
            "AssociatePublicIpAddress": desired.associate_public_ip,
            "SpotPrice": desired.spot_price,
            "UserData": desired.user_data.as_ref().map(|u| json!({ "Fn::Base64": u })),
            "BlockDeviceMappings": root,
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
            .into_iter()
            .map(|(r, _)| r)
            .collect();
        let mut in_use = launch_refs_in_use(cloud.as_ref()).await?;
        in_use.extend(self.meta.id.clone());
        Ok(select_for_deletion(records, ctx.config.retain_versions, &in_use)
            .into_iter()
            .map(|v| Box::new(LaunchConfigurationDeletion { name: v.name }) as Box<dyn Deletion>)
            .collect())
    }
}

#[derive(Debug)]
struct LaunchConfigurationDeletion {
    name: String,
}

#[async_trait]
impl Deletion for LaunchConfigurationDeletion {
    fn description(&self) -> String {
        format!("LaunchConfiguration {}", self.name)
    }

    fn id(&self) -> String {
        self.name.clone()
    }

    async fn delete(&self, cloud: &dyn Cloud) -> Result<()> {
        cloud
            .autoscaling()
            .delete_launch_configuration(&self.name)
            .await?;
        Ok(())
    }
}
