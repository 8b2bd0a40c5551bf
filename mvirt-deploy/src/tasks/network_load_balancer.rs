//! Network load balancers and their listeners.
//!
//! Listeners are owned by the load balancer task and matched by port:
//! missing ports are created, changed ones modified, and ports no longer
//! listed are deleted.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{check_immutable, check_required, found_meta, found_tags, link_ids, meta_id, properties, single};
use crate::cloud::elb::{ListenerInfo, LoadBalancerInfo};
use crate::cloud::{Cloud, TagScope};
use crate::error::{Error, Result};
use crate::impl_diff;
use crate::model::diff::{DiffValue, Unordered};
use crate::model::{Attr, Kind, Link, Meta, Tags};
use crate::reconciler::{Resource, RunContext};
use crate::target::hcl::HclValue;
use crate::target::json::tag_list;
use crate::target::{ApiTarget, HclBlock, HclTarget, JsonTarget};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NlbListener {
    pub port: i64,
    #[serde(default = "tcp")]
    pub protocol: String,
    pub target_group: Link,
    pub certificate_arn: Option<String>,
    #[serde(skip)]
    pub arn: Option<String>,
}

fn tcp() -> String {
    "TCP".to_string()
}

impl DiffValue for NlbListener {
    fn unchanged(actual: &Self, desired: &Self) -> bool {
        actual.port == desired.port
            && actual.protocol == desired.protocol
            && actual.certificate_arn == desired.certificate_arn
            && Link::unchanged(&actual.target_group, &desired.target_group)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkLoadBalancer {
    #[serde(flatten)]
    pub meta: Meta,
    /// `internet-facing` or `internal`.
    pub scheme: Option<String>,
    pub subnets: Option<Unordered<Link>>,
    pub cross_zone: Option<bool>,
    pub listeners: Option<Unordered<NlbListener>>,
    pub tags: Option<Tags>,
    #[serde(skip)]
    pub dns_name: Option<String>,
    #[serde(skip)]
    pub hosted_zone_id: Option<String>,
}

impl_diff!(NetworkLoadBalancer {
    scheme,
    subnets,
    cross_zone,
    listeners,
    tags
});

fn listener_info(lb_arn: &str, listener: &NlbListener) -> ListenerInfo {
    ListenerInfo {
        arn: listener.arn.clone().unwrap_or_default(),
        load_balancer_arn: lb_arn.to_string(),
        port: listener.port,
        protocol: listener.protocol.clone(),
        target_group_arn: listener.target_group.id.clone().unwrap_or_default(),
        certificate_arn: listener.certificate_arn.clone(),
    }
}

fn listener_name(lb: &str, port: i64) -> String {
    format!("{}-{}", lb, port)
}

#[async_trait]
impl Resource for NetworkLoadBalancer {
    const KIND: Kind = Kind::NetworkLoadBalancer;

    fn meta(&self) -> &Meta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut Meta {
        &mut self.meta
    }

    fn links(&self) -> Vec<&Link> {
        self.subnets
            .iter()
            .flat_map(|s| s.iter())
            .chain(
                self.listeners
                    .iter()
                    .flat_map(|l| l.iter())
                    .map(|l| &l.target_group),
            )
            .collect()
    }

    fn links_mut(&mut self) -> Vec<&mut Link> {
        self.subnets
            .iter_mut()
            .flat_map(|s| s.iter_mut())
            .chain(
                self.listeners
                    .iter_mut()
                    .flat_map(|l| l.iter_mut())
                    .map(|l| &mut l.target_group),
            )
            .collect()
    }

    fn tags_mut(&mut self) -> Option<&mut Tags> {
        Some(self.tags.get_or_insert_with(Tags::new))
    }

    fn output(&self, attr: Attr) -> Option<String> {
        match attr {
            Attr::Id | Attr::Arn => self.meta.id.clone(),
            Attr::Name => Some(self.meta.name.clone()),
            Attr::DnsName => self.dns_name.clone(),
            Attr::HostedZoneId => self.hosted_zone_id.clone(),
            _ => None,
        }
    }

    fn adopt(&mut self, actual: &Self) {
        self.dns_name = actual.dns_name.clone();
        self.hosted_zone_id = actual.hosted_zone_id.clone();
    }

    async fn find(&self, ctx: &RunContext<'_>, cloud: &dyn Cloud) -> Result<Option<Self>> {
        let api = cloud.load_balancing();
        let found = api.describe_load_balancers(&[self.meta.name.clone()]).await?;
        let Some(lb) = single(&self.task_key(), found)? else {
            return Ok(None);
        };
        let listeners = api
            .describe_listeners(&lb.arn)
            .await?
            .into_iter()
            .map(|l| NlbListener {
                port: l.port,
                protocol: l.protocol,
                target_group: Link::found(Kind::TargetGroup, l.target_group_arn),
                certificate_arn: l.certificate_arn,
                arn: Some(l.arn),
            })
            .collect();
        Ok(Some(NetworkLoadBalancer {
            meta: found_meta(&self.meta, &lb.arn),
            scheme: Some(lb.scheme),
            subnets: Some(lb.subnet_ids.into_iter().map(|id| Link::found(Kind::Subnet, id)).collect()),
            cross_zone: Some(lb.cross_zone),
            listeners: Some(listeners),
            tags: found_tags(ctx, &lb.tags, &self.tags),
            dns_name: Some(lb.dns_name),
            hosted_zone_id: Some(lb.hosted_zone_id),
        }))
    }

    fn check_changes(actual: Option<&Self>, desired: &Self, changes: &Self) -> Result<()> {
        let key = desired.task_key();
        check_required(&key, &[("Subnets", desired.subnets.as_ref().is_some_and(|s| !s.is_empty()))])?;
        let mut ports: Vec<i64> = desired.listeners.iter().flatten().map(|l| l.port).collect();
        ports.sort_unstable();
        if let Some(pair) = ports.windows(2).find(|w| w[0] == w[1]) {
            return Err(Error::InvalidRecord {
                key,
                message: format!("more than one listener on port {}", pair[0]),
            });
        }
        check_immutable(&key, actual.is_some(), &[("Scheme", changes.scheme.is_some())])
    }

    async fn render_api(
        target: &ApiTarget,
        ctx: &RunContext<'_>,
        actual: Option<&Self>,
        desired: &mut Self,
        changes: &Self,
    ) -> Result<()> {
        let api = target.cloud().load_balancing();
        let tags = desired.tags.clone().unwrap_or_default();
        let subnet_ids = desired.subnets.as_ref().map(|s| link_ids(s)).unwrap_or_default();

        let arn = match actual {
            None => {
                let created = api
                    .create_load_balancer(&LoadBalancerInfo {
                        name: desired.meta.name.clone(),
                        scheme: desired
                            .scheme
                            .clone()
                            .unwrap_or_else(|| "internet-facing".to_string()),
                        subnet_ids,
                        tags: tags.clone(),
                        ..LoadBalancerInfo::default()
                    })
                    .await?;
                if desired.cross_zone == Some(true) {
                    api.set_cross_zone(&created.arn, true).await?;
                }
                desired.dns_name = Some(created.dns_name);
                desired.hosted_zone_id = Some(created.hosted_zone_id);
                desired.meta.id = Some(created.arn.clone());
                created.arn
            }
            Some(actual) => {
                let arn = meta_id(Self::KIND, &desired.meta)?;
                if changes.subnets.is_some() {
                    api.set_subnets(&arn, &subnet_ids).await?;
                }
                if let Some(enabled) = changes.cross_zone {
                    api.set_cross_zone(&arn, enabled).await?;
                }
                if changes.tags.is_some() {
                    target
                        .reconcile_tags(
                            ctx.audit,
                            TagScope::LoadBalancing,
                            &arn,
                            actual.tags.as_ref(),
                            &tags,
                        )
                        .await?;
                }
                arn
            }
        };

        if actual.is_some() && changes.listeners.is_none() {
            return Ok(());
        }
        let existing: BTreeMap<i64, &NlbListener> = actual
            .and_then(|a| a.listeners.as_ref())
            .map(|l| l.iter().map(|l| (l.port, l)).collect())
            .unwrap_or_default();
        let wanted: Vec<&NlbListener> = desired.listeners.iter().flatten().collect();
        for listener in &wanted {
            match existing.get(&listener.port) {
                None => {
                    api.create_listener(&listener_info(&arn, listener)).await?;
                }
                Some(current) if !NlbListener::unchanged(current, listener) => {
                    let mut info = listener_info(&arn, listener);
                    info.arn = current.arn.clone().unwrap_or_default();
                    api.modify_listener(&info).await?;
                }
                Some(_) => {}
            }
        }
        for (port, current) in &existing {
            if wanted.iter().all(|l| l.port != *port) {
                if let Some(listener_arn) = &current.arn {
                    api.delete_listener(listener_arn).await?;
                }
            }
        }
        Ok(())
    }

    async fn render_hcl(target: &HclTarget, ctx: &RunContext<'_>, desired: &Self) -> Result<()> {
        let subnets: Option<Vec<HclValue>> = desired
            .subnets
            .as_ref()
            .map(|s| s.iter().map(|l| ctx.hcl_ref(l, Attr::Id)).collect());
        let body = HclBlock::new()
            .set("name", &desired.meta.name)
            .set("load_balancer_type", "network")
            .set("internal", desired.scheme.as_deref() == Some("internal"))
            .set_opt("subnets", subnets)
            .set_opt("enable_cross_zone_load_balancing", desired.cross_zone)
            .set_opt("tags", desired.tags.as_ref());
        target
            .render_resource(Self::KIND, &desired.meta.name, body)
            .await?;

        let lb_arn = HclTarget::reference(Self::KIND, &desired.meta.name, Attr::Arn);
        for listener in desired.listeners.iter().flatten() {
            let body = HclBlock::new()
                .set("load_balancer_arn", lb_arn.clone())
                .set("port", listener.port)
                .set("protocol", &listener.protocol)
                .set_opt("certificate_arn", listener.certificate_arn.as_ref())
                .block(
                    "default_action",
                    HclBlock::new()
                        .set("type", "forward")
                        .set("target_group_arn", ctx.hcl_ref(&listener.target_group, Attr::Arn)),
                );
            target
                .render_typed(
                    "aws_lb_listener",
                    &listener_name(&desired.meta.name, listener.port),
                    body,
                )
                .await?;
        }
        Ok(())
    }

    async fn render_json(
        target: &JsonTarget,
        ctx: &RunContext<'_>,
        desired: &Self,
    ) -> Result<()> {
        let subnets: Option<Vec<Value>> = desired
            .subnets
            .as_ref()
            .map(|s| s.iter().map(|l| ctx.json_ref(l, Attr::Id)).collect());
        let props = properties(json!({
            "Name": desired.meta.name,
            "Type": "network",
            "Scheme": desired.scheme,
            "Subnets": subnets,
            "LoadBalancerAttributes": desired.cross_zone.map(|enabled| json!([{
                "Key": "load_balancing.cross_zone.enabled",
                "Value": enabled.to_string(),
            }])),
            "Tags": desired.tags.as_ref().map(tag_list),
        }));
        target
            .render_resource(Self::KIND, &desired.meta.name, props)
            .await?;

        let lb_arn = JsonTarget::reference(Self::KIND, &desired.meta.name, Attr::Id);
        for listener in desired.listeners.iter().flatten() {
            let props = properties(json!({
                "LoadBalancerArn": lb_arn,
                "Port": listener.port,
                "Protocol": listener.protocol,
                "Certificates": listener
                    .certificate_arn
                    .as_ref()
                    .map(|arn| json!([{ "CertificateArn": arn }])),
                "DefaultActions": [{
                    "Type": "forward",
                    "TargetGroupArn": ctx.json_ref(&listener.target_group, Attr::Id),
                }],
            }));
            target
                .render_typed(
                    "AWS::ElasticLoadBalancingV2::Listener",
                    Self::KIND,
                    &listener_name(&desired.meta.name, listener.port),
                    props,
                )
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::cloud::MemoryCloud;
    use crate::model::TaskKey;
    use crate::reconciler::TaskSet;
    use crate::tasks::testing::{apply, hcl, json};
    use crate::tasks::{Subnet, TargetGroup, Vpc};

    fn listener(port: i64, target_group: &str) -> NlbListener {
        NlbListener {
            port,
            protocol: tcp(),
            target_group: Link::new(Kind::TargetGroup, target_group),
            certificate_arn: None,
            arn: None,
        }
    }

    fn tasks(listeners: Vec<NlbListener>, scheme: &str) -> TaskSet {
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
                availability_zone: Some("us-east-1a".into()),
                ..Subnet::default()
            })
            .unwrap();
        for (name, port) in [("tcp-api", 443), ("tcp-kops", 3988)] {
            tasks
                .add(TargetGroup {
                    meta: Meta::new(name),
                    vpc: Some(Link::new(Kind::Vpc, "main")),
                    port: Some(port),
                    protocol: Some("TCP".into()),
                    ..TargetGroup::default()
                })
                .unwrap();
        }
        tasks
            .add(NetworkLoadBalancer {
                meta: Meta::new("api-test"),
                scheme: Some(scheme.into()),
                subnets: Some(Unordered(vec![Link::new(Kind::Subnet, "a")])),
                cross_zone: Some(true),
                listeners: Some(Unordered(listeners)),
                ..NetworkLoadBalancer::default()
            })
            .unwrap();
        tasks
    }

    fn key() -> TaskKey {
        TaskKey::new(Kind::NetworkLoadBalancer, "api-test")
    }

    #[tokio::test]
    async fn test_listeners_created_and_stable() {
        let cloud = Arc::new(MemoryCloud::new());
        let mut set = tasks(vec![listener(443, "tcp-api"), listener(3988, "tcp-kops")], "internet-facing");
        apply(&cloud, &mut set).await.unwrap();
        let arn = set.id_of(&key()).unwrap();
        assert_eq!(cloud.load_balancing().describe_listeners(&arn).await.unwrap().len(), 2);
        assert!(set.get(&key()).unwrap().attribute(Attr::DnsName).is_some());

        let report = apply(
            &cloud,
            &mut tasks(vec![listener(3988, "tcp-kops"), listener(443, "tcp-api")], "internet-facing"),
        )
        .await
        .unwrap();
        assert!(report.is_unchanged(), "{:?}", report.changes());
    }

    #[tokio::test]
    async fn test_removed_listener_deleted() {
        let cloud = Arc::new(MemoryCloud::new());
        let mut set = tasks(vec![listener(443, "tcp-api"), listener(3988, "tcp-kops")], "internet-facing");
        apply(&cloud, &mut set).await.unwrap();
        let arn = set.id_of(&key()).unwrap();

        apply(&cloud, &mut tasks(vec![listener(443, "tcp-kops")], "internet-facing"))
            .await
            .unwrap();
        let listeners = cloud.load_balancing().describe_listeners(&arn).await.unwrap();
        assert_eq!(listeners.len(), 1);
        assert_eq!(listeners[0].port, 443);
        assert!(listeners[0].target_group_arn.contains("/tcp-kops/"));
    }

    #[tokio::test]
    async fn test_scheme_is_immutable() {
        let cloud = Arc::new(MemoryCloud::new());
        apply(&cloud, &mut tasks(vec![listener(443, "tcp-api")], "internet-facing"))
            .await
            .unwrap();
        let err = apply(&cloud, &mut tasks(vec![listener(443, "tcp-api")], "internal"))
            .await
            .unwrap_err();
        assert!(matches!(err.root(), Error::CannotChange { field: "Scheme", .. }));
    }

    #[tokio::test]
    async fn test_duplicate_port_rejected() {
        let cloud = Arc::new(MemoryCloud::new());
        let err = apply(
            &cloud,
            &mut tasks(vec![listener(443, "tcp-api"), listener(443, "tcp-kops")], "internal"),
        )
        .await
        .unwrap_err();
        assert!(matches!(err.root(), Error::InvalidRecord { .. }));
    }

    #[tokio::test]
    async fn test_listeners_rendered_as_own_resources() {
        let manifest = hcl(&mut tasks(vec![listener(443, "tcp-api")], "internal")).await;
        assert!(manifest.contains("resource \"aws_lb_listener\" \"api-test-443\""));
        assert!(manifest.contains("target_group_arn = \"${aws_lb_target_group.tcp-api.arn}\""));
        assert!(manifest.contains("load_balancer_arn = \"${aws_lb.api-test.arn}\""));

        let doc = json(&mut tasks(vec![listener(443, "tcp-api")], "internal")).await;
        let key = crate::target::json::resource_key(Kind::NetworkLoadBalancer, "api-test-443");
        assert_eq!(doc["Resources"][key.as_str()]["Type"], "AWS::ElasticLoadBalancingV2::Listener");
    }
}
