//! OpenID Connect identity providers.
//!
//! Identified by issuer URL; the provider's ARN is its ID. URLs are
//! compared without the `https://` scheme, which the provider strips.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{check_immutable, check_required, found_meta, found_tags, meta_id, properties, single};
use crate::cloud::iam::OidcProviderInfo;
use crate::cloud::{Cloud, TagScope};
use crate::error::Result;
use crate::impl_diff;
use crate::model::diff::Unordered;
use crate::model::{Attr, Kind, Meta, Tags};
use crate::reconciler::{Resource, RunContext};
use crate::target::json::tag_list;
use crate::target::{ApiTarget, HclBlock, HclTarget, JsonTarget};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IamOidcProvider {
    #[serde(flatten)]
    pub meta: Meta,
    pub url: Option<String>,
    pub client_ids: Option<Unordered<String>>,
    pub thumbprints: Option<Unordered<String>>,
    pub tags: Option<Tags>,
}

impl_diff!(IamOidcProvider {
    url,
    client_ids,
    thumbprints,
    tags
});

fn host(url: &str) -> &str {
    url.trim_start_matches("https://").trim_end_matches('/')
}

fn https(url: &str) -> String {
    format!("https://{}", host(url))
}

#[async_trait]
impl Resource for IamOidcProvider {
    const KIND: Kind = Kind::IamOidcProvider;

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
            Attr::Id | Attr::Arn => self.meta.id.clone(),
            Attr::Url => self.url.as_deref().map(https),
            _ => None,
        }
    }

    async fn find(&self, ctx: &RunContext<'_>, cloud: &dyn Cloud) -> Result<Option<Self>> {
        let providers = cloud.iam().list_open_id_connect_providers().await?;
        let matching: Vec<OidcProviderInfo> = providers
            .into_iter()
            .filter(|p| match (&self.meta.id, &self.url) {
                (Some(arn), _) => &p.arn == arn,
                (None, Some(url)) => host(&p.url) == host(url),
                (None, None) => false,
            })
            .collect();
        let Some(provider) = single(&self.task_key(), matching)? else {
            return Ok(None);
        };
        // Keep the desired spelling when only the scheme differs.
        let url = match &self.url {
            Some(desired) if host(desired) == host(&provider.url) => desired.clone(),
            _ => provider.url,
        };
        Ok(Some(IamOidcProvider {
            meta: found_meta(&self.meta, &provider.arn),
            url: Some(url),
            client_ids: Some(provider.client_ids.into_iter().collect()),
            thumbprints: Some(provider.thumbprints.into_iter().collect()),
            tags: found_tags(ctx, &provider.tags, &self.tags),
        }))
    }

    fn check_changes(actual: Option<&Self>, desired: &Self, changes: &Self) -> Result<()> {
        let key = desired.task_key();
        check_required(
            &key,
            &[
                ("URL", desired.url.is_some()),
                ("ClientIDs", desired.client_ids.is_some()),
            ],
        )?;
        check_immutable(&key, actual.is_some(), &[("URL", changes.url.is_some())])
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
        let list = |values: &Option<Unordered<String>>| -> Vec<String> {
            values.iter().flat_map(|v| v.iter().cloned()).collect()
        };
        let Some(actual) = actual else {
            let provider = api
                .create_open_id_connect_provider(&OidcProviderInfo {
                    url: https(desired.url.as_deref().unwrap_or_default()),
                    client_ids: list(&desired.client_ids),
                    thumbprints: list(&desired.thumbprints),
                    tags,
                    ..OidcProviderInfo::default()
                })
                .await?;
            desired.meta.id = Some(provider.arn);
            return Ok(());
        };

        let arn = meta_id(Self::KIND, &desired.meta)?;
        if changes.thumbprints.is_some() {
            api.update_thumbprints(&arn, &list(&desired.thumbprints)).await?;
        }
        if changes.client_ids.is_some() {
            api.set_client_ids(&arn, &list(&desired.client_ids)).await?;
        }
        if changes.tags.is_some() {
            target
                .reconcile_tags(ctx.audit, TagScope::Iam, &arn, actual.tags.as_ref(), &tags)
                .await?;
        }
        Ok(())
    }

    async fn render_hcl(target: &HclTarget, _ctx: &RunContext<'_>, desired: &Self) -> Result<()> {
        let body = HclBlock::new()
            .set_opt("url", desired.url.as_deref().map(https))
            .set_opt("client_id_list", desired.client_ids.as_ref().map(|c| c.0.clone()))
            .set_opt("thumbprint_list", desired.thumbprints.as_ref().map(|t| t.0.clone()))
            .set_opt("tags", desired.tags.as_ref());
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
            "Url": desired.url.as_deref().map(https),
            "ClientIdList": desired.client_ids,
            "ThumbprintList": desired.thumbprints,
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
    use crate::error::Error;
    use crate::model::TaskKey;
    use crate::reconciler::{TaskOutcome, TaskSet};
    use crate::tasks::testing::{apply, hcl};

    fn tasks(url: &str, thumbprint: &str) -> TaskSet {
        let mut tasks = TaskSet::new();
        tasks
            .add(IamOidcProvider {
                meta: Meta::new("irsa"),
                url: Some(url.into()),
                client_ids: Some(Unordered(vec!["sts.amazonaws.com".into()])),
                thumbprints: Some(Unordered(vec![thumbprint.into()])),
                ..IamOidcProvider::default()
            })
            .unwrap();
        tasks
    }

    fn key() -> TaskKey {
        TaskKey::new(Kind::IamOidcProvider, "irsa")
    }

    #[tokio::test]
    async fn test_scheme_is_normalized() {
        let cloud = Arc::new(MemoryCloud::new());
        let mut set = tasks("discovery.test.example.com", "9e99a48a9960b14926bb7f3b02e22da2b0ab7280");
        apply(&cloud, &mut set).await.unwrap();
        assert!(set.id_of(&key()).unwrap().ends_with(":oidc-provider/discovery.test.example.com"));

        let report = apply(
            &cloud,
            &mut tasks("https://discovery.test.example.com", "9e99a48a9960b14926bb7f3b02e22da2b0ab7280"),
        )
        .await
        .unwrap();
        assert!(report.is_unchanged(), "{:?}", report.changes());
    }

    #[tokio::test]
    async fn test_thumbprint_rotation() {
        let cloud = Arc::new(MemoryCloud::new());
        apply(&cloud, &mut tasks("https://discovery.test.example.com", "aaaa")).await.unwrap();
        let report = apply(&cloud, &mut tasks("https://discovery.test.example.com", "bbbb"))
            .await
            .unwrap();
        assert_eq!(report.outcome(&key()), Some(&TaskOutcome::Updated(vec!["thumbprints"])));
    }

    #[tokio::test]
    async fn test_url_is_immutable_once_known() {
        let cloud = Arc::new(MemoryCloud::new());
        let mut set = tasks("https://discovery.test.example.com", "aaaa");
        apply(&cloud, &mut set).await.unwrap();
        let arn = set.id_of(&key()).unwrap();

        let mut moved = TaskSet::new();
        moved
            .add(IamOidcProvider {
                meta: Meta {
                    id: Some(arn),
                    ..Meta::new("irsa")
                },
                url: Some("https://other.example.com".into()),
                client_ids: Some(Unordered(vec!["sts.amazonaws.com".into()])),
                ..IamOidcProvider::default()
            })
            .unwrap();
        let err = apply(&cloud, &mut moved).await.unwrap_err();
        assert!(matches!(err.root(), Error::CannotChange { field: "URL", .. }));
    }

    #[tokio::test]
    async fn test_hcl_lists() {
        let manifest = hcl(&mut tasks("discovery.test.example.com", "aaaa")).await;
        assert!(manifest.contains("url = \"https://discovery.test.example.com\""));
        assert!(manifest.contains("client_id_list = [\"sts.amazonaws.com\"]"));
    }
}
