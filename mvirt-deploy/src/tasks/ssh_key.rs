//! Imported SSH key pairs.
//!
//! The key pair is addressed by name; its provider ID is only needed for
//! tagging. The provider keeps a fingerprint, never the key material, so
//! the finder compares fingerprints.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{check_immutable, check_required, found_meta, found_tags, properties, single};
use crate::cloud::compute::fingerprint;
use crate::cloud::{Cloud, Filter, TagScope};
use crate::error::{Error, Result};
use crate::impl_diff;
use crate::model::{Attr, Kind, Meta, Tags};
use crate::reconciler::{Resource, RunContext};
use crate::target::json::tag_list;
use crate::target::{ApiTarget, HclBlock, HclTarget, JsonTarget};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SshKey {
    #[serde(flatten)]
    pub meta: Meta,
    pub public_key: Option<String>,
    pub tags: Option<Tags>,
    /// Provider-assigned key pair ID (`key-...`).
    #[serde(skip)]
    pub key_pair_id: Option<String>,
}

impl_diff!(SshKey { public_key, tags });

#[async_trait]
impl Resource for SshKey {
    const KIND: Kind = Kind::SshKey;

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
            _ => None,
        }
    }

    fn adopt(&mut self, actual: &Self) {
        self.key_pair_id = actual.key_pair_id.clone();
    }

    async fn find(&self, ctx: &RunContext<'_>, cloud: &dyn Cloud) -> Result<Option<Self>> {
        let name = self.meta.id.as_deref().unwrap_or(&self.meta.name);
        let pairs: Vec<_> = cloud
            .compute()
            .describe_key_pairs(&Filter::default())
            .await?
            .into_iter()
            .filter(|k| k.name == name)
            .collect();
        let Some(pair) = single(&self.task_key(), pairs)? else {
            return Ok(None);
        };
        let public_key = match &self.public_key {
            Some(key) if fingerprint(key) == pair.fingerprint => Some(key.clone()),
            _ => Some(pair.fingerprint.clone()),
        };
        Ok(Some(SshKey {
            meta: found_meta(&self.meta, &pair.name),
            public_key,
            tags: found_tags(ctx, &pair.tags, &self.tags),
            key_pair_id: Some(pair.id),
        }))
    }

    fn check_changes(actual: Option<&Self>, desired: &Self, changes: &Self) -> Result<()> {
        let key = desired.task_key();
        check_required(&key, &[("PublicKey", desired.public_key.is_some())])?;
        check_immutable(
            &key,
            actual.is_some(),
            &[("PublicKey", changes.public_key.is_some())],
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
                let public_key = desired.public_key.clone().unwrap_or_default();
                let pair = target
                    .cloud()
                    .compute()
                    .import_key_pair(&desired.meta.name, &public_key, &tags)
                    .await?;
                desired.meta.id = Some(pair.name);
                desired.key_pair_id = Some(pair.id);
            }
            Some(actual) if changes.tags.is_some() => {
                let id = actual.key_pair_id.clone().ok_or_else(|| Error::MissingAttribute {
                    key: desired.task_key(),
                    attribute: "key_pair_id",
                })?;
                target
                    .reconcile_tags(ctx.audit, TagScope::Compute, &id, actual.tags.as_ref(), &tags)
                    .await?;
            }
            Some(_) => {}
        }
        Ok(())
    }

    async fn render_hcl(target: &HclTarget, _ctx: &RunContext<'_>, desired: &Self) -> Result<()> {
        let mut body = HclBlock::new().set("key_name", &desired.meta.name);
        if let Some(key) = &desired.public_key {
            let file = target
                .add_file(Self::KIND, &desired.meta.name, "public_key", key)
                .await;
            body = body.set("public_key", file);
        }
        let body = body.set_opt("tags", desired.tags.as_ref());
        target
            .render_resource(Self::KIND, &desired.meta.name, body)
            .await
    }

    async fn render_json(
        target: &JsonTarget,
        _ctx: &RunContext<'_>,
        desired: &Self,
    ) -> Result<()> {
        let props = properties(json!({
            "KeyName": desired.meta.name,
            "PublicKeyMaterial": desired.public_key,
            "Tags": desired.tags.as_ref().map(tag_list),
        }));
        target
            .render_resource(Self::KIND, &desired.meta.name, props)
            .await
    }
}
