//! IAM instance profiles. Roles are attached by
//! [`super::IamInstanceProfileRole`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{check_immutable, found_meta, found_tags, properties};
use crate::cloud::{Cloud, TagScope};
use crate::error::{Error, Result};
use crate::impl_diff;
use crate::model::{Attr, Kind, Meta, Tags};
use crate::reconciler::{Resource, RunContext};
use crate::target::{ApiTarget, HclBlock, HclTarget, JsonTarget};

use super::iam_role::DEFAULT_PATH;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IamInstanceProfile {
    #[serde(flatten)]
    pub meta: Meta,
    pub path: Option<String>,
    pub tags: Option<Tags>,
    #[serde(skip)]
    pub arn: Option<String>,
}

impl_diff!(IamInstanceProfile { path, tags });

impl IamInstanceProfile {
    fn path(&self) -> String {
        self.path.clone().unwrap_or_else(|| DEFAULT_PATH.to_string())
    }
}

#[async_trait]
impl Resource for IamInstanceProfile {
    const KIND: Kind = Kind::IamInstanceProfile;

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
        let Some(profile) = cloud.iam().get_instance_profile(&self.meta.name).await? else {
            return Ok(None);
        };
        Ok(Some(IamInstanceProfile {
            meta: found_meta(&self.meta, &profile.name),
            path: Some(profile.path),
            tags: found_tags(ctx, &profile.tags, &self.tags),
            arn: Some(profile.arn),
        }))
    }

    fn check_changes(actual: Option<&Self>, desired: &Self, changes: &Self) -> Result<()> {
        check_immutable(
            &desired.task_key(),
            actual.is_some(),
            &[("Path", changes.path.is_some())],
        )
    }

    async fn render_api(
        target: &ApiTarget,
        ctx: &RunContext<'_>,
        actual: Option<&Self>,
        desired: &mut Self,
        _changes: &Self,
    ) -> Result<()> {
        let tags = desired.tags.clone().unwrap_or_default();
        let Some(actual) = actual else {
            let profile = target
                .cloud()
                .iam()
                .create_instance_profile(&desired.meta.name, &desired.path(), &tags)
                .await?;
            desired.arn = Some(profile.arn);
            desired.meta.id = Some(profile.name);
            return Ok(());
        };
        let arn = actual.arn.clone().ok_or_else(|| Error::MissingAttribute {
            key: desired.task_key(),
            attribute: Attr::Arn.as_str(),
        })?;
        target
            .reconcile_tags(ctx.audit, TagScope::Iam, &arn, actual.tags.as_ref(), &tags)
            .await
    }

    async fn render_hcl(target: &HclTarget, _ctx: &RunContext<'_>, desired: &Self) -> Result<()> {
        let body = HclBlock::new()
            .set("name", &desired.meta.name)
            .set("path", desired.path())
            .set_opt("tags", desired.tags.as_ref());
        target
            .render_resource(Self::KIND, &desired.meta.name, body)
            .await
    }

    /// Roles are appended by the profile-role tasks.
    async fn render_json(
        target: &JsonTarget,
        _ctx: &RunContext<'_>,
        desired: &Self,
    ) -> Result<()> {
        let props = properties(json!({
            "InstanceProfileName": desired.meta.name,
            "Path": desired.path(),
            "Roles": [],
        }));
        target
            .render_resource(Self::KIND, &desired.meta.name, props)
            .await
    }
}
