//! Inline policies attached to an IAM role.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{check_immutable, check_required, found_meta, json_document, json_equivalent, link_id, opt_link_id, properties};
use crate::cloud::Cloud;
use crate::error::Result;
use crate::impl_diff;
use crate::model::{Attr, Kind, Link, Meta};
use crate::reconciler::{Resource, RunContext};
use crate::target::{ApiTarget, HclBlock, HclTarget, JsonTarget};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IamRolePolicy {
    #[serde(flatten)]
    pub meta: Meta,
    pub role: Option<Link>,
    pub policy_document: Option<String>,
}

impl_diff!(IamRolePolicy {
    role,
    policy_document
});

fn policy_id(role: &str, policy: &str) -> String {
    format!("{}:{}", role, policy)
}

#[async_trait]
impl Resource for IamRolePolicy {
    const KIND: Kind = Kind::IamRolePolicy;

    fn meta(&self) -> &Meta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut Meta {
        &mut self.meta
    }

    fn links(&self) -> Vec<&Link> {
        self.role.iter().collect()
    }

    fn links_mut(&mut self) -> Vec<&mut Link> {
        self.role.iter_mut().collect()
    }

    async fn find(&self, _ctx: &RunContext<'_>, cloud: &dyn Cloud) -> Result<Option<Self>> {
        let Some(role) = opt_link_id(&self.role) else {
            return Ok(None);
        };
        let Some(document) = cloud.iam().get_role_policy(&role, &self.meta.name).await? else {
            return Ok(None);
        };
        let document = match &self.policy_document {
            Some(desired) if json_equivalent(desired, &document) => desired.clone(),
            _ => document,
        };
        Ok(Some(IamRolePolicy {
            meta: found_meta(&self.meta, policy_id(&role, &self.meta.name)),
            role: Some(Link::found(Kind::IamRole, role)),
            policy_document: Some(document),
        }))
    }

    fn check_changes(actual: Option<&Self>, desired: &Self, changes: &Self) -> Result<()> {
        let key = desired.task_key();
        check_required(
            &key,
            &[
                ("Role", desired.role.is_some()),
                ("PolicyDocument", desired.policy_document.is_some()),
            ],
        )?;
        if let Some(document) = &desired.policy_document {
            json_document(&key, document)?;
        }
        check_immutable(&key, actual.is_some(), &[("Role", changes.role.is_some())])
    }

    /// Put is an upsert, so creation and update are the same call.
    async fn render_api(
        target: &ApiTarget,
        _ctx: &RunContext<'_>,
        _actual: Option<&Self>,
        desired: &mut Self,
        _changes: &Self,
    ) -> Result<()> {
        let role = link_id(&desired.task_key(), "Role", &desired.role)?;
        let document = desired.policy_document.clone().unwrap_or_default();
        target
            .cloud()
            .iam()
            .put_role_policy(&role, &desired.meta.name, &document)
            .await?;
        desired.meta.id = Some(policy_id(&role, &desired.meta.name));
        Ok(())
    }

    async fn render_hcl(target: &HclTarget, ctx: &RunContext<'_>, desired: &Self) -> Result<()> {
        let mut body = HclBlock::new()
            .set("name", &desired.meta.name)
            .set_opt("role", desired.role.as_ref().map(|l| ctx.hcl_ref(l, Attr::Name)));
        if let Some(document) = &desired.policy_document {
            let file = target
                .add_file(Self::KIND, &desired.meta.name, "policy", document)
                .await;
            body = body.set("policy", file);
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
        let key = desired.task_key();
        let document = desired
            .policy_document
            .as_ref()
            .map(|d| json_document(&key, d))
            .transpose()?;
        let props = properties(json!({
            "PolicyName": desired.meta.name,
            "Roles": desired.role.as_ref().map(|l| json!([ctx.json_ref(l, Attr::Id)])),
            "PolicyDocument": document,
        }));
        target
            .render_resource(Self::KIND, &desired.meta.name, props)
            .await
    }
}
