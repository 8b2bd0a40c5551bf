//! IAM roles.
//!
//! The role name is its ID. Policy documents compare as JSON values, so
//! whitespace and key order in the inventory do not cause updates.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{check_immutable, check_required, found_meta, found_tags, json_document, json_equivalent, meta_id, properties};
use crate::cloud::iam::RoleInfo;
use crate::cloud::{Cloud, TagScope};
use crate::error::{Error, Result};
use crate::impl_diff;
use crate::model::{Attr, Kind, Meta, Tags};
use crate::reconciler::{Resource, RunContext};
use crate::target::json::tag_list;
use crate::target::{ApiTarget, HclBlock, HclTarget, JsonTarget};

pub const DEFAULT_PATH: &str = "/";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IamRole {
    #[serde(flatten)]
    pub meta: Meta,
    pub path: Option<String>,
    pub assume_role_policy: Option<String>,
    pub permissions_boundary: Option<String>,
    pub tags: Option<Tags>,
    #[serde(skip)]
    pub arn: Option<String>,
}

impl_diff!(IamRole {
    path,
    assume_role_policy,
    permissions_boundary,
    tags
});

impl IamRole {
    fn path(&self) -> String {
        self.path.clone().unwrap_or_else(|| DEFAULT_PATH.to_string())
    }
}

#[async_trait]
impl Resource for IamRole {
    const KIND: Kind = Kind::IamRole;

    fn meta(&self) -> &Meta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut Meta {
        &mut self.meta
    }

    fn tags_mut(&mut self) -> Option<&mut Tags> {
        Some(self.tags.get_or_insert_with(Tags::new))
    }

    fn output(&self, attr: Attr) -> Option<String> {
        match attr {
            Attr::Id | Attr::Name => self.meta.id.clone(),
            Attr::Arn => self.arn.clone(),
            _ => None,
        }
    }

    fn adopt(&mut self, actual: &Self) {
        self.arn = actual.arn.clone();
    }

    async fn find(&self, ctx: &RunContext<'_>, cloud: &dyn Cloud) -> Result<Option<Self>> {
        let Some(role) = cloud.iam().get_role(&self.meta.name).await? else {
            return Ok(None);
        };
        // Report the desired text when the documents are equivalent.
        let assume_role_policy = match &self.assume_role_policy {
            Some(desired) if json_equivalent(desired, &role.assume_role_policy) => desired.clone(),
            _ => role.assume_role_policy,
        };
        Ok(Some(IamRole {
            meta: found_meta(&self.meta, &role.name),
            path: Some(role.path),
            assume_role_policy: Some(assume_role_policy),
            permissions_boundary: role.permissions_boundary,
            tags: found_tags(ctx, &role.tags, &self.tags),
            arn: Some(role.arn),
        }))
    }

    fn check_changes(actual: Option<&Self>, desired: &Self, changes: &Self) -> Result<()> {
        let key = desired.task_key();
        check_required(&key, &[("AssumeRolePolicy", desired.assume_role_policy.is_some())])?;
        if let Some(document) = &desired.assume_role_policy {
            json_document(&key, document)?;
        }
        if let Some(path) = &desired.path {
            if !path.starts_with('/') || !path.ends_with('/') {
                return Err(Error::InvalidRecord {
                    key,
                    message: format!("role path {:?} must begin and end with /", path),
                });
            }
        }
        check_immutable(&key, actual.is_some(), &[("Path", changes.path.is_some())])
    }

    async fn render_api(
        target: &ApiTarget,
        ctx: &RunContext<'_>,
        actual: Option<&Self>,
        desired: &mut Self,
        changes: &Self,
    ) -> Result<()> {
        let api = target.cloud().iam();
        let tags = desired.tags.clone().unwrap_or_default();
        let Some(actual) = actual else {
            let role = api
                .create_role(&RoleInfo {
                    name: desired.meta.name.clone(),
                    path: desired.path(),
                    assume_role_policy: desired.assume_role_policy.clone().unwrap_or_default(),
                    permissions_boundary: desired.permissions_boundary.clone(),
                    tags,
                    ..RoleInfo::default()
                })
                .await?;
            desired.arn = Some(role.arn);
            desired.meta.id = Some(role.name);
            return Ok(());
        };

        let name = meta_id(Self::KIND, &desired.meta)?;
        if let Some(document) = &changes.assume_role_policy {
            api.update_assume_role_policy(&name, document).await?;
        }
        if let Some(boundary) = &changes.permissions_boundary {
            api.put_role_permissions_boundary(&name, Some(boundary)).await?;
        }
        if changes.tags.is_some() {
            let arn = actual.arn.clone().ok_or_else(|| Error::MissingAttribute {
                key: desired.task_key(),
                attribute: Attr::Arn.as_str(),
            })?;
            target
                .reconcile_tags(ctx.audit, TagScope::Iam, &arn, actual.tags.as_ref(), &tags)
                .await?;
        }
        Ok(())
    }

    async fn render_hcl(target: &HclTarget, _ctx: &RunContext<'_>, desired: &Self) -> Result<()> {
        let mut body = HclBlock::new()
            .set("name", &desired.meta.name)
            .set("path", desired.path())
            .set_opt("permissions_boundary", desired.permissions_boundary.as_ref())
            .set_opt("tags", desired.tags.as_ref());
        if let Some(document) = &desired.assume_role_policy {
            let file = target
                .add_file(Self::KIND, &desired.meta.name, "policy", document)
                .await;
            body = body.set("assume_role_policy", file);
        }
        target
            .render_resource(Self::KIND, &desired.meta.name, body)
            .await
    }

    async fn render_json(
        target: &JsonTarget,
        _ctx: &RunContext<'_>,
        desired: &Self,
    ) -> Result<()> {
        let key = desired.task_key();
        let document = desired
            .assume_role_policy
            .as_ref()
            .map(|d| json_document(&key, d))
            .transpose()?;
        let props = properties(json!({
            "RoleName": desired.meta.name,
            "Path": desired.path(),
            "AssumeRolePolicyDocument": document,
            "PermissionsBoundary": desired.permissions_boundary,
            "Tags": desired.tags.as_ref().map(tag_list),
        }));
        target
            .render_resource(Self::KIND, &desired.meta.name, props)
            .await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::cloud::MemoryCloud;
    use crate::model::TaskKey;
    use crate::reconciler::{TaskOutcome, TaskSet};
    use crate::tasks::testing::{apply, hcl, json};

    pub(crate) const EC2_TRUST: &str = r#"{"Version":"2012-10-17","Statement":[{"Effect":"Allow","Principal":{"Service":"ec2.amazonaws.com"},"Action":"sts:AssumeRole"}]}"#;

    fn role(policy: &str, path: Option<&str>) -> TaskSet {
        let mut tasks = TaskSet::new();
        tasks
            .add(IamRole {
                meta: Meta::new("nodes.test.example.com"),
                path: path.map(str::to_string),
                assume_role_policy: Some(policy.into()),
                ..IamRole::default()
            })
            .unwrap();
        tasks
    }

    fn key() -> TaskKey {
        TaskKey::new(Kind::IamRole, "nodes.test.example.com")
    }

    #[tokio::test]
    async fn test_reformatted_policy_is_unchanged() {
        let cloud = Arc::new(MemoryCloud::new());
        let mut set = role(EC2_TRUST, None);
        apply(&cloud, &mut set).await.unwrap();
        let arn = set.get(&key()).unwrap().attribute(Attr::Arn).unwrap();
        assert!(arn.ends_with(":role/nodes.test.example.com"));

        let pretty = serde_json::to_string_pretty(&serde_json::from_str::<serde_json::Value>(EC2_TRUST).unwrap()).unwrap();
        let report = apply(&cloud, &mut role(&pretty, None)).await.unwrap();
        assert!(report.is_unchanged(), "{:?}", report.changes());
    }

    #[tokio::test]
    async fn test_policy_change_updates_role() {
        let cloud = Arc::new(MemoryCloud::new());
        apply(&cloud, &mut role(EC2_TRUST, None)).await.unwrap();
        let lambda = EC2_TRUST.replace("ec2.amazonaws.com", "lambda.amazonaws.com");
        let report = apply(&cloud, &mut role(&lambda, None)).await.unwrap();
        assert_eq!(
            report.outcome(&key()),
            Some(&TaskOutcome::Updated(vec!["assume_role_policy"]))
        );
    }

    #[tokio::test]
    async fn test_path_is_immutable() {
        let cloud = Arc::new(MemoryCloud::new());
        apply(&cloud, &mut role(EC2_TRUST, None)).await.unwrap();
        let err = apply(&cloud, &mut role(EC2_TRUST, Some("/kops/"))).await.unwrap_err();
        assert!(matches!(err.root(), Error::CannotChange { field: "Path", .. }));
    }

    #[tokio::test]
    async fn test_invalid_policy_rejected() {
        let cloud = Arc::new(MemoryCloud::new());
        let err = apply(&cloud, &mut role("{not json", None)).await.unwrap_err();
        assert!(matches!(err.root(), Error::InvalidRecord { .. }));
    }

    #[tokio::test]
    async fn test_manifests_embed_policy() {
        let manifest = hcl(&mut role(EC2_TRUST, None)).await;
        assert!(manifest.contains(
            "assume_role_policy = file(\"${path.module}/data/aws_iam_role_nodes-test-example-com_policy\")"
        ));

        let doc = json(&mut role(EC2_TRUST, None)).await;
        let key = crate::target::json::resource_key(Kind::IamRole, "nodes.test.example.com");
        let props = &doc["Resources"][key.as_str()]["Properties"];
        assert_eq!(props["AssumeRolePolicyDocument"]["Version"], "2012-10-17");
    }
}
