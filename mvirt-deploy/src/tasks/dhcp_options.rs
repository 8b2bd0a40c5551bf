//! DHCP option sets. Option values cannot be changed after creation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{check_immutable, found_meta, found_tags, meta_id, properties, single};
use crate::cloud::compute::DhcpOptionsInfo;
use crate::cloud::{Cloud, TagScope};
use crate::error::Result;
use crate::impl_diff;
use crate::model::{Kind, Meta, Tags};
use crate::reconciler::{Resource, RunContext};
use crate::target::json::tag_list;
use crate::target::{ApiTarget, HclBlock, HclTarget, JsonTarget};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DhcpOptions {
    #[serde(flatten)]
    pub meta: Meta,
    pub domain_name: Option<String>,
    pub domain_name_servers: Option<Vec<String>>,
    pub ntp_servers: Option<Vec<String>>,
    pub tags: Option<Tags>,
}

impl_diff!(DhcpOptions {
    domain_name,
    domain_name_servers,
    ntp_servers,
    tags
});

fn non_empty(values: Vec<String>) -> Option<Vec<String>> {
    (!values.is_empty()).then_some(values)
}

#[async_trait]
impl Resource for DhcpOptions {
    const KIND: Kind = Kind::DhcpOptions;

    fn meta(&self) -> &Meta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut Meta {
        &mut self.meta
    }

    fn tags_mut(&mut self) -> Option<&mut Tags> {
        Some(self.tags.get_or_insert_with(Tags::new))
    }

    async fn find(&self, ctx: &RunContext<'_>, cloud: &dyn Cloud) -> Result<Option<Self>> {
        let found = cloud
            .compute()
            .describe_dhcp_options(&ctx.find_filter(&self.meta))
            .await?;
        let Some(options) = single(&self.task_key(), found)? else {
            return Ok(None);
        };
        Ok(Some(DhcpOptions {
            meta: found_meta(&self.meta, &options.id),
            domain_name: options.domain_name,
            domain_name_servers: non_empty(options.domain_name_servers),
            ntp_servers: non_empty(options.ntp_servers),
            tags: found_tags(ctx, &options.tags, &self.tags),
        }))
    }

    fn check_changes(actual: Option<&Self>, desired: &Self, changes: &Self) -> Result<()> {
        check_immutable(
            &desired.task_key(),
            actual.is_some(),
            &[
                ("DomainName", changes.domain_name.is_some()),
                ("DomainNameServers", changes.domain_name_servers.is_some()),
                ("NtpServers", changes.ntp_servers.is_some()),
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
        match actual {
            None => {
                let options = target
                    .cloud()
                    .compute()
                    .create_dhcp_options(&DhcpOptionsInfo {
                        domain_name: desired.domain_name.clone(),
                        domain_name_servers: desired.domain_name_servers.clone().unwrap_or_default(),
                        ntp_servers: desired.ntp_servers.clone().unwrap_or_default(),
                        tags,
                        ..DhcpOptionsInfo::default()
                    })
                    .await?;
                desired.meta.id = Some(options.id);
            }
            Some(actual) if changes.tags.is_some() => {
                let id = meta_id(Self::KIND, &desired.meta)?;
                target
                    .reconcile_tags(ctx.audit, TagScope::Compute, &id, actual.tags.as_ref(), &tags)
                    .await?;
            }
            Some(_) => {}
        }
        Ok(())
    }

    async fn render_hcl(target: &HclTarget, _ctx: &RunContext<'_>, desired: &Self) -> Result<()> {
        let body = HclBlock::new()
            .set_opt("domain_name", desired.domain_name.as_ref())
            .set_opt("domain_name_servers", desired.domain_name_servers.clone())
            .set_opt("ntp_servers", desired.ntp_servers.clone())
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
            "DomainName": desired.domain_name,
            "DomainNameServers": desired.domain_name_servers,
            "NtpServers": desired.ntp_servers,
            "Tags": desired.tags.as_ref().map(tag_list),
        }));
        target
            .render_resource(Self::KIND, &desired.meta.name, props)
            .await
    }
}
