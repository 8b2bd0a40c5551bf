//! Attachment of a role to an instance profile.
//!
//! A profile holds at most one role. In manifests the attachment is an
//! attribute of the profile resource rather than a resource of its own.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{check_immutable, check_required, found_meta, link_id, opt_link_id};
use crate::cloud::Cloud;
use crate::error::Result;
use crate::impl_diff;
use crate::model::{Attr, Kind, Link, Meta};
use crate::reconciler::{Resource, RunContext};
use crate::target::{ApiTarget, HclTarget, JsonTarget};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IamInstanceProfileRole {
    #[serde(flatten)]
    pub meta: Meta,
    pub instance_profile: Option<Link>,
    pub role: Option<Link>,
}

impl_diff!(IamInstanceProfileRole {
    instance_profile,
    role
});

fn attachment_id(profile: &str, role: &str) -> String {
    format!("{}:{}", profile, role)
}

#[async_trait]
impl Resource for IamInstanceProfileRole {
    const KIND: Kind = Kind::IamInstanceProfileRole;

    fn meta(&self) -> &Meta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut Meta {
        &mut self.meta
    }

    fn links(&self) -> Vec<&Link> {
        self.instance_profile.iter().chain(self.role.iter()).collect()
    }

    fn links_mut(&mut self) -> Vec<&mut Link> {
        self.instance_profile
            .iter_mut()
            .chain(self.role.iter_mut())
            .collect()
    }

    async fn find(&self, _ctx: &RunContext<'_>, cloud: &dyn Cloud) -> Result<Option<Self>> {
        let Some(profile_name) = opt_link_id(&self.instance_profile) else {
            return Ok(None);
        };
        let Some(profile) = cloud.iam().get_instance_profile(&profile_name).await? else {
            return Ok(None);
        };
        let Some(role) = profile.role_names.into_iter().next() else {
            return Ok(None);
        };
        Ok(Some(IamInstanceProfileRole {
            meta: found_meta(&self.meta, attachment_id(&profile.name, &role)),
            instance_profile: Some(Link::found(Kind::IamInstanceProfile, profile.name)),
            role: Some(Link::found(Kind::IamRole, role)),
        }))
    }

    fn check_changes(actual: Option<&Self>, desired: &Self, changes: &Self) -> Result<()> {
        let key = desired.task_key();
        check_required(
            &key,
            &[
                ("InstanceProfile", desired.instance_profile.is_some()),
                ("Role", desired.role.is_some()),
            ],
        )?;
        check_immutable(&key, actual.is_some(), &[("Role", changes.role.is_some())])
    }

    async fn render_api(
        target: &ApiTarget,
        _ctx: &RunContext<'_>,
        _actual: Option<&Self>,
        desired: &mut Self,
        _changes: &Self,
    ) -> Result<()> {
        let key = desired.task_key();
        let profile = link_id(&key, "InstanceProfile", &desired.instance_profile)?;
        let role = link_id(&key, "Role", &desired.role)?;
        target
            .cloud()
            .iam()
            .add_role_to_instance_profile(&profile, &role)
            .await?;
        desired.meta.id = Some(attachment_id(&profile, &role));
        Ok(())
    }

    async fn render_hcl(target: &HclTarget, ctx: &RunContext<'_>, desired: &Self) -> Result<()> {
        let (Some(profile), Some(role)) = (&desired.instance_profile, &desired.role) else {
            return Ok(());
        };
        target
            .set_attribute(
                Kind::IamInstanceProfile,
                &profile.name,
                "role",
                ctx.hcl_ref(role, Attr::Name),
            )
            .await
    }

    async fn render_json(
        target: &JsonTarget,
        ctx: &RunContext<'_>,
        desired: &Self,
    ) -> Result<()> {
        let (Some(profile), Some(role)) = (&desired.instance_profile, &desired.role) else {
            return Ok(());
        };
        target
            .append_property(
                Kind::IamInstanceProfile,
                &profile.name,
                "Roles",
                ctx.json_ref(role, Attr::Id),
            )
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
    use crate::tasks::iam_role::tests::EC2_TRUST;
    use crate::tasks::testing::{apply, hcl, json};
    use crate::tasks::{IamInstanceProfile, IamRole};

    fn tasks(role: &str) -> TaskSet {
        let mut tasks = TaskSet::new();
        for name in ["nodes", "masters"] {
            tasks
                .add(IamRole {
                    meta: Meta::new(name),
                    assume_role_policy: Some(EC2_TRUST.into()),
                    ..IamRole::default()
                })
                .unwrap();
        }
        tasks
            .add(IamInstanceProfile {
                meta: Meta::new("nodes"),
                ..IamInstanceProfile::default()
            })
            .unwrap();
        tasks
            .add(IamInstanceProfileRole {
                meta: Meta::new("nodes"),
                instance_profile: Some(Link::new(Kind::IamInstanceProfile, "nodes")),
                role: Some(Link::new(Kind::IamRole, role)),
            })
            .unwrap();
        tasks
    }

    #[tokio::test]
    async fn test_role_attached_once() {
        let cloud = Arc::new(MemoryCloud::new());
        apply(&cloud, &mut tasks("nodes")).await.unwrap();
        let profile = cloud.iam().get_instance_profile("nodes").await.unwrap().unwrap();
        assert_eq!(profile.role_names, vec!["nodes".to_string()]);
        assert!(apply(&cloud, &mut tasks("nodes")).await.unwrap().is_unchanged());
    }

    #[tokio::test]
    async fn test_role_swap_rejected() {
        let cloud = Arc::new(MemoryCloud::new());
        apply(&cloud, &mut tasks("nodes")).await.unwrap();
        let err = apply(&cloud, &mut tasks("masters")).await.unwrap_err();
        assert!(matches!(err.root(), Error::CannotChange { field: "Role", .. }));
    }

    #[tokio::test]
    async fn test_manifests_fold_into_profile() {
        let manifest = hcl(&mut tasks("nodes")).await;
        assert!(manifest.contains("role = \"${aws_iam_role.nodes.name}\""));
        assert!(!manifest.contains("aws_iam_instance_profile_role"));

        let doc = json(&mut tasks("nodes")).await;
        let key = crate::target::json::resource_key(Kind::IamInstanceProfile, "nodes");
        assert_eq!(
            doc["Resources"][key.as_str()]["Properties"]["Roles"][0]["Ref"],
            crate::target::json::resource_key(Kind::IamRole, "nodes")
        );
    }
}
