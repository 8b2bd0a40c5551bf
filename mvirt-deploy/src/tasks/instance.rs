//! Standalone instances.
//!
//! Creation waits for the instance to be `running` so volume attachments
//! in the next wave succeed. An instance profile created moments earlier
//! may be rejected as unknown; that error is retryable and the executor
//! backs off.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{
    check_immutable, check_required, found_meta, found_tags, link_id, link_ids, meta_id,
    opt_link_id, properties, single,
};
use crate::cloud::compute::InstanceInfo;
use crate::cloud::{Cloud, Filter, TagScope};
use crate::error::{Error, Result};
use crate::impl_diff;
use crate::model::diff::Unordered;
use crate::model::{Attr, Kind, Link, Meta, Tags};
use crate::reconciler::{Resource, RunContext};
use crate::target::hcl::HclValue;
use crate::target::json::tag_list;
use crate::target::{ApiTarget, HclBlock, HclTarget, JsonTarget};
use crate::waiter::PollState;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Instance {
    #[serde(flatten)]
    pub meta: Meta,
    pub image_id: Option<String>,
    pub instance_type: Option<String>,
    pub subnet: Option<Link>,
    pub security_groups: Option<Unordered<Link>>,
    pub ssh_key: Option<Link>,
    pub iam_instance_profile: Option<Link>,
    pub user_data: Option<String>,
    pub associate_public_ip: Option<bool>,
    pub tags: Option<Tags>,
    #[serde(skip)]
    pub public_ip: Option<String>,
}

impl_diff!(Instance {
    image_id,
    instance_type,
    subnet,
    security_groups,
    ssh_key,
    iam_instance_profile,
    user_data,
    associate_public_ip,
    tags
});

impl Instance {
    fn security_group_ids(&self) -> Vec<String> {
        self.security_groups
            .as_ref()
            .map(|groups| link_ids(groups))
            .unwrap_or_default()
    }
}

#[async_trait]
impl Resource for Instance {
    const KIND: Kind = Kind::Instance;

    fn meta(&self) -> &Meta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut Meta {
        &mut self.meta
    }

    fn links(&self) -> Vec<&Link> {
        self.subnet
            .iter()
            .chain(self.security_groups.iter().flat_map(|g| g.iter()))
            .chain(self.ssh_key.iter())
            .chain(self.iam_instance_profile.iter())
            .collect()
    }

    fn links_mut(&mut self) -> Vec<&mut Link> {
        self.subnet
            .iter_mut()
            .chain(self.security_groups.iter_mut().flat_map(|g| g.iter_mut()))
            .chain(self.ssh_key.iter_mut())
            .chain(self.iam_instance_profile.iter_mut())
            .collect()
    }

    fn tags_mut(&mut self) -> Option<&mut Tags> {
        Some(self.tags.get_or_insert_with(Tags::new))
    }

    fn output(&self, attr: Attr) -> Option<String> {
        match attr {
            Attr::Id => self.meta.id.clone(),
            Attr::PublicIp => self.public_ip.clone(),
            _ => None,
        }
    }

    fn adopt(&mut self, actual: &Self) {
        self.public_ip = actual.public_ip.clone();
    }

    async fn find(&self, ctx: &RunContext<'_>, cloud: &dyn Cloud) -> Result<Option<Self>> {
        let instances = cloud
            .compute()
            .describe_instances(&ctx.find_filter(&self.meta))
            .await?;
        let Some(instance) = single(&self.task_key(), instances)? else {
            return Ok(None);
        };
        let security_groups = instance
            .security_group_ids
            .iter()
            .map(|id| Link::found(Kind::SecurityGroup, id))
            .collect();
        Ok(Some(Instance {
            meta: found_meta(&self.meta, &instance.id),
            image_id: Some(instance.image_id),
            instance_type: Some(instance.instance_type),
            subnet: Some(Link::found(Kind::Subnet, instance.subnet_id)),
            security_groups: Some(security_groups),
            ssh_key: instance.key_name.map(|k| Link::found(Kind::SshKey, k)),
            iam_instance_profile: instance
                .iam_instance_profile
                .map(|p| Link::found(Kind::IamInstanceProfile, p)),
            user_data: instance.user_data,
            associate_public_ip: Some(instance.associate_public_ip),
            tags: found_tags(ctx, &instance.tags, &self.tags),
            public_ip: instance.public_ip,
        }))
    }

    fn check_changes(actual: Option<&Self>, desired: &Self, changes: &Self) -> Result<()> {
        let key = desired.task_key();
        check_required(
            &key,
            &[
                ("ImageId", desired.image_id.is_some()),
                ("InstanceType", desired.instance_type.is_some()),
                ("Subnet", desired.subnet.is_some()),
            ],
        )?;
        check_immutable(
            &key,
            actual.is_some(),
            &[
                ("ImageId", changes.image_id.is_some()),
                ("InstanceType", changes.instance_type.is_some()),
                ("Subnet", changes.subnet.is_some()),
                ("SSHKey", changes.ssh_key.is_some()),
                ("IAMInstanceProfile", changes.iam_instance_profile.is_some()),
                ("UserData", changes.user_data.is_some()),
                ("AssociatePublicIP", changes.associate_public_ip.is_some()),
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
        let compute = target.cloud().compute();
        let tags = desired.tags.clone().unwrap_or_default();
        if let Some(actual) = actual {
            let id = meta_id(Self::KIND, &desired.meta)?;
            if changes.security_groups.is_some() {
                compute
                    .modify_instance_security_groups(&id, &desired.security_group_ids())
                    .await?;
            }
            if changes.tags.is_some() {
                target
                    .reconcile_tags(ctx.audit, TagScope::Compute, &id, actual.tags.as_ref(), &tags)
                    .await?;
            }
            return Ok(());
        }

        let request = InstanceInfo {
            image_id: desired.image_id.clone().unwrap_or_default(),
            instance_type: desired.instance_type.clone().unwrap_or_default(),
            subnet_id: link_id(&desired.task_key(), "Subnet", &desired.subnet)?,
            security_group_ids: desired.security_group_ids(),
            key_name: opt_link_id(&desired.ssh_key),
            iam_instance_profile: opt_link_id(&desired.iam_instance_profile),
            user_data: desired.user_data.clone(),
            associate_public_ip: desired.associate_public_ip.unwrap_or(false),
            tags,
            ..InstanceInfo::default()
        };
        let instance = compute.run_instance(&request).await?;
        desired.meta.id = Some(instance.id.clone());
        desired.public_ip = instance.public_ip.clone();

        let filter = Filter::by_id(&instance.id);
        let filter = &filter;
        target
            .waiter(ctx.config)
            .wait(&format!("instance {}", instance.id), move || async move {
                let found = compute.describe_instances(filter).await?;
                let state = match found.first().map(|i| i.state.as_str()) {
                    Some("running") => PollState::Ready,
                    Some(state @ ("stopping" | "stopped" | "shutting-down")) => {
                        PollState::Failed(state.to_string())
                    }
                    Some(state) => PollState::Pending(state.to_string()),
                    None => PollState::Pending("not visible".to_string()),
                };
                Ok::<PollState, Error>(state)
            })
            .await
    }

    async fn render_hcl(target: &HclTarget, ctx: &RunContext<'_>, desired: &Self) -> Result<()> {
        let id = |link: &Option<Link>| link.as_ref().map(|l| ctx.hcl_ref(l, Attr::Id));
        let groups: Option<Vec<HclValue>> = desired
            .security_groups
            .as_ref()
            .map(|g| g.iter().map(|l| ctx.hcl_ref(l, Attr::Id)).collect());
        let mut body = HclBlock::new()
            .set_opt("ami", desired.image_id.as_ref())
            .set_opt("instance_type", desired.instance_type.as_ref())
            .set_opt("subnet_id", id(&desired.subnet))
            .set_opt("vpc_security_group_ids", groups)
            .set_opt("key_name", id(&desired.ssh_key))
            .set_opt("iam_instance_profile", id(&desired.iam_instance_profile))
            .set_opt("associate_public_ip_address", desired.associate_public_ip)
            .set_opt("tags", desired.tags.as_ref());
        if let Some(user_data) = &desired.user_data {
            let file = target
                .add_file(Self::KIND, &desired.meta.name, "user_data", user_data)
                .await;
            body = body.set("user_data", file);
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
        let props = properties(json!({
            "ImageId": desired.image_id,
            "InstanceType": desired.instance_type,
            "SubnetId": id(&desired.subnet),
            "SecurityGroupIds": groups,
            "KeyName": id(&desired.ssh_key),
            "IamInstanceProfile": id(&desired.iam_instance_profile),
            "UserData": desired.user_data.as_ref().map(|u| json!({ "Fn::Base64": u })),
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
    use crate::model::TaskKey;
    use crate::reconciler::{TaskOutcome, TaskSet};
    use crate::tasks::testing::{apply, hcl};
    use crate::tasks::{SecurityGroup, Subnet, Vpc};

    fn tasks(groups: &[&str], instance_type: &str) -> TaskSet {
        let mut tasks = TaskSet::new();
        tasks
            .add(Vpc {
                meta: Meta::new("main"),
                cidr: Some("10.0.0.0/16".into()),
                ..Vpc::default()
            })
            .unwrap();
        tasks
            .add(Subnet {
                meta: Meta::new("a"),
                vpc: Some(Link::new(Kind::Vpc, "main")),
                cidr: Some("10.0.1.0/24".into()),
                ..Subnet::default()
            })
            .unwrap();
        for name in ["bastion", "ssh"] {
            tasks
                .add(SecurityGroup {
                    meta: Meta::new(name),
                    vpc: Some(Link::new(Kind::Vpc, "main")),
                    ..SecurityGroup::default()
                })
                .unwrap();
        }
        tasks
            .add(Instance {
                meta: Meta::new("bastion"),
                image_id: Some("ami-12345678".into()),
                instance_type: Some(instance_type.into()),
                subnet: Some(Link::new(Kind::Subnet, "a")),
                security_groups: Some(
                    groups
                        .iter()
                        .map(|g| Link::new(Kind::SecurityGroup, *g))
                        .collect(),
                ),
                associate_public_ip: Some(true),
                user_data: Some("#!/bin/sh\necho hi\n".into()),
                ..Instance::default()
            })
            .unwrap();
        tasks
    }

    #[tokio::test]
    async fn test_waits_for_running() {
        let cloud = Arc::new(MemoryCloud::new());
        cloud.set_instance_pending_polls(3).await;
        let mut set = tasks(&["bastion"], "t3.micro");
        apply(&cloud, &mut set).await.unwrap();

        let instances = cloud
            .compute()
            .describe_instances(&Filter::default())
            .await
            .unwrap();
        assert_eq!(instances.len(), 1);
        assert_eq!(instances[0].state, "running");
        let public_ip = set
            .get(&TaskKey::new(Kind::Instance, "bastion"))
            .and_then(|t| t.attribute(Attr::PublicIp));
        assert_eq!(public_ip, instances[0].public_ip);
    }

    #[tokio::test]
    async fn test_security_groups_compare_unordered() {
        let cloud = Arc::new(MemoryCloud::new());
        apply(&cloud, &mut tasks(&["bastion", "ssh"], "t3.micro"))
            .await
            .unwrap();
        assert!(apply(&cloud, &mut tasks(&["ssh", "bastion"], "t3.micro"))
            .await
            .unwrap()
            .is_unchanged());

        let report = apply(&cloud, &mut tasks(&["ssh"], "t3.micro")).await.unwrap();
        assert_eq!(
            report.outcome(&TaskKey::new(Kind::Instance, "bastion")),
            Some(&TaskOutcome::Updated(vec!["security_groups"]))
        );
    }

    #[tokio::test]
    async fn test_instance_type_is_immutable() {
        let cloud = Arc::new(MemoryCloud::new());
        apply(&cloud, &mut tasks(&["bastion"], "t3.micro")).await.unwrap();
        let err = apply(&cloud, &mut tasks(&["bastion"], "t3.large"))
            .await
            .unwrap_err();
        assert!(matches!(
            err.root(),
            Error::CannotChange { field: "InstanceType", .. }
        ));
    }

    #[tokio::test]
    async fn test_hcl_user_data_file() {
        let manifest = hcl(&mut tasks(&["bastion"], "t3.micro")).await;
        assert!(manifest.contains(
            "user_data = file(\"${path.module}/data/aws_instance_bastion_user_data\")"
        ));
        assert!(manifest.contains("vpc_security_group_ids = [\"${aws_security_group.bastion.id}\"]"));
    }
}
