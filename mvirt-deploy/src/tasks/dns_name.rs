//! Route 53 record sets.
//!
//! A record either carries literal values or aliases a load balancer. The
//! task name is the record name; records are written with UPSERT, so
//! creation and update are the same call.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{check_immutable, check_required, found_meta, link_id, opt_link_id, properties, single};
use crate::cloud::dns::{fqdn, AliasTargetInfo, RecordSetInfo};
use crate::cloud::Cloud;
use crate::error::{Error, Result};
use crate::impl_diff;
use crate::model::diff::Unordered;
use crate::model::{Attr, Kind, Link, Meta};
use crate::reconciler::{Resource, RunContext};
use crate::target::{ApiTarget, HclBlock, HclTarget, JsonTarget};

pub const DEFAULT_TTL: i64 = 60;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DnsName {
    #[serde(flatten)]
    pub meta: Meta,
    pub zone: Option<Link>,
    pub record_type: Option<String>,
    pub ttl: Option<i64>,
    pub values: Option<Unordered<String>>,
    /// Alias target; a classic or network load balancer.
    pub target_load_balancer: Option<Link>,
}

impl_diff!(DnsName {
    zone,
    record_type,
    ttl,
    values,
    target_load_balancer
});

impl DnsName {
    fn record_type(&self) -> String {
        self.record_type.clone().unwrap_or_else(|| "A".to_string())
    }
}

fn record_id(zone: &str, name: &str, record_type: &str) -> String {
    format!("{}:{}:{}", zone, name, record_type)
}

fn same_host(a: &str, b: &str) -> bool {
    a.trim_end_matches('.').eq_ignore_ascii_case(b.trim_end_matches('.'))
}

#[async_trait]
impl Resource for DnsName {
    const KIND: Kind = Kind::DnsName;

    fn meta(&self) -> &Meta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut Meta {
        &mut self.meta
    }

    fn links(&self) -> Vec<&Link> {
        self.zone
            .iter()
            .chain(self.target_load_balancer.iter())
            .collect()
    }

    fn links_mut(&mut self) -> Vec<&mut Link> {
        self.zone
            .iter_mut()
            .chain(self.target_load_balancer.iter_mut())
            .collect()
    }

    fn output(&self, attr: Attr) -> Option<String> {
        match attr {
            Attr::Id => self.meta.id.clone(),
            Attr::Name => Some(fqdn(&self.meta.name)),
            _ => None,
        }
    }

    async fn find(&self, ctx: &RunContext<'_>, cloud: &dyn Cloud) -> Result<Option<Self>> {
        let Some(zone) = opt_link_id(&self.zone) else {
            return Ok(None);
        };
        let name = fqdn(&self.meta.name);
        let record_type = self.record_type();
        let records = cloud
            .dns()
            .list_resource_record_sets(&zone)
            .await?
            .into_iter()
            .filter(|r| same_host(&r.name, &name) && r.record_type == record_type)
            .collect();
        let Some(record) = single(&self.task_key(), records)? else {
            return Ok(None);
        };

        // An alias is matched back to the desired load balancer by its DNS name.
        let target_load_balancer = record.alias.as_ref().map(|alias| {
            match &self.target_load_balancer {
                Some(desired)
                    if ctx
                        .attribute(desired, Attr::DnsName)
                        .is_ok_and(|d| same_host(&d, &alias.dns_name)) =>
                {
                    desired.clone()
                }
                desired => Link::found(
                    desired.as_ref().map_or(Kind::ClassicLoadBalancer, |l| l.kind),
                    alias.dns_name.clone(),
                ),
            }
        });
        let values = if record.alias.is_some() {
            None
        } else {
            Some(Unordered(record.values))
        };
        Ok(Some(DnsName {
            meta: found_meta(&self.meta, record_id(&zone, &name, &record_type)),
            zone: Some(Link::found(Kind::DnsZone, zone)),
            record_type: Some(record.record_type),
            ttl: record.ttl,
            values,
            target_load_balancer,
        }))
    }

    fn check_changes(actual: Option<&Self>, desired: &Self, changes: &Self) -> Result<()> {
        let key = desired.task_key();
        check_required(&key, &[("Zone", desired.zone.is_some())])?;
        match (&desired.values, &desired.target_load_balancer) {
            (Some(_), Some(_)) => {
                return Err(Error::InvalidRecord {
                    key,
                    message: "values and an alias target are mutually exclusive".to_string(),
                })
            }
            (None, None) => {
                return Err(Error::RequiredFieldMissing {
                    key,
                    field: "Values",
                })
            }
            _ => {}
        }
        if let Some(lb) = &desired.target_load_balancer {
            if !matches!(lb.kind, Kind::ClassicLoadBalancer | Kind::NetworkLoadBalancer) {
                return Err(Error::InvalidRecord {
                    key,
                    message: format!("alias target {} is not a load balancer", lb.key()),
                });
            }
        }
        check_immutable(&key, actual.is_some(), &[("Zone", changes.zone.is_some())])
    }

    async fn render_api(
        target: &ApiTarget,
        ctx: &RunContext<'_>,
        _actual: Option<&Self>,
        desired: &mut Self,
        _changes: &Self,
    ) -> Result<()> {
        let key = desired.task_key();
        let zone = link_id(&key, "Zone", &desired.zone)?;
        let alias = match &desired.target_load_balancer {
            Some(lb) => Some(AliasTargetInfo {
                dns_name: ctx.attribute(lb, Attr::DnsName)?,
                hosted_zone_id: ctx.attribute(lb, Attr::HostedZoneId)?,
                evaluate_target_health: false,
            }),
            None => None,
        };
        let record = RecordSetInfo {
            name: fqdn(&desired.meta.name),
            record_type: desired.record_type(),
            ttl: match alias {
                Some(_) => None,
                None => Some(desired.ttl.unwrap_or(DEFAULT_TTL)),
            },
            values: desired.values.iter().flat_map(|v| v.iter().cloned()).collect(),
            alias,
        };
        target.cloud().dns().upsert_record_set(&zone, &record).await?;
        desired.meta.id = Some(record_id(&zone, &record.name, &record.record_type));
        Ok(())
    }

    async fn render_hcl(target: &HclTarget, ctx: &RunContext<'_>, desired: &Self) -> Result<()> {
        let mut body = HclBlock::new()
            .set("name", desired.meta.name.trim_end_matches('.'))
            .set("type", desired.record_type())
            .set_opt("zone_id", desired.zone.as_ref().map(|z| ctx.hcl_ref(z, Attr::Id)));
        match &desired.target_load_balancer {
            Some(lb) => {
                body = body.block(
                    "alias",
                    HclBlock::new()
                        .set("name", ctx.hcl_ref(lb, Attr::DnsName))
                        .set("zone_id", ctx.hcl_ref(lb, Attr::HostedZoneId))
                        .set("evaluate_target_health", false),
                );
            }
            None => {
                body = body
                    .set("ttl", desired.ttl.unwrap_or(DEFAULT_TTL))
                    .set_opt("records", desired.values.as_ref().map(|v| v.0.clone()));
            }
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
        let alias = desired.target_load_balancer.as_ref().map(|lb| {
            json!({
                "DNSName": ctx.json_ref(lb, Attr::DnsName),
                "HostedZoneId": ctx.json_ref(lb, Attr::HostedZoneId),
                "EvaluateTargetHealth": false,
            })
        });
        let ttl = match alias {
            Some(_) => None,
            None => Some(desired.ttl.unwrap_or(DEFAULT_TTL).to_string()),
        };
        let props = properties(json!({
            "Name": fqdn(&desired.meta.name),
            "Type": desired.record_type(),
            "HostedZoneId": desired.zone.as_ref().map(|z| ctx.json_ref(z, Attr::Id)),
            "TTL": ttl,
            "ResourceRecords": desired.values,
            "AliasTarget": alias,
        }));
        target
            .render_resource(Self::KIND, &desired.meta.name, props)
            .await
    }
}
