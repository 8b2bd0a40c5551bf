//! Classic load balancers.
//!
//! The load balancer's name is its ID. Listeners are replaced as a set;
//! attributes (cross-zone, idle timeout, connection draining, access logs)
//! are written together, with unspecified values kept from the provider.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{check_immutable, check_required, found_meta, found_tags, link_ids, meta_id, properties, single};
use crate::cloud::elb::{
    AccessLogInfo, ClassicAttributes, ClassicListenerInfo, ClassicLoadBalancerInfo,
    HealthCheckInfo,
};
use crate::cloud::{Cloud, TagScope};
use crate::diff_value_by_eq;
use crate::error::{Error, Result};
use crate::impl_diff;
use crate::model::diff::{DiffValue, Unordered};
use crate::model::{Attr, Kind, Link, Meta, Tags};
use crate::reconciler::{Resource, RunContext};
use crate::target::hcl::HclValue;
use crate::target::json::tag_list;
use crate::target::{ApiTarget, HclBlock, HclTarget, JsonTarget};

const MAX_NAME_LENGTH: usize = 32;
const DEFAULT_IDLE_TIMEOUT: i64 = 60;
const DEFAULT_DRAINING_TIMEOUT: i64 = 300;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassicListener {
    pub load_balancer_port: i64,
    pub instance_port: i64,
    #[serde(default = "tcp")]
    pub protocol: String,
    #[serde(default = "tcp")]
    pub instance_protocol: String,
    pub ssl_certificate_id: Option<String>,
}

fn tcp() -> String {
    "TCP".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheck {
    /// `PROTOCOL:PORT[/path]`.
    pub target: String,
    pub healthy_threshold: i64,
    pub unhealthy_threshold: i64,
    pub interval: i64,
    pub timeout: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccessLog {
    pub enabled: bool,
    pub bucket: Option<String>,
    pub prefix: Option<String>,
    /// Minutes; 5 or 60.
    pub emit_interval: Option<i64>,
}

diff_value_by_eq!(ClassicListener, HealthCheck);

impl DiffValue for AccessLog {
    fn unchanged(actual: &Self, desired: &Self) -> bool {
        match (actual.enabled, desired.enabled) {
            (false, false) => true,
            _ => actual == desired,
        }
    }
}

impl From<&ClassicListener> for ClassicListenerInfo {
    fn from(l: &ClassicListener) -> Self {
        ClassicListenerInfo {
            load_balancer_port: l.load_balancer_port,
            instance_port: l.instance_port,
            protocol: l.protocol.clone(),
            instance_protocol: l.instance_protocol.clone(),
            ssl_certificate_id: l.ssl_certificate_id.clone(),
        }
    }
}

impl From<&HealthCheck> for HealthCheckInfo {
    fn from(h: &HealthCheck) -> Self {
        HealthCheckInfo {
            target: h.target.clone(),
            healthy_threshold: h.healthy_threshold,
            unhealthy_threshold: h.unhealthy_threshold,
            interval: h.interval,
            timeout: h.timeout,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClassicLoadBalancer {
    #[serde(flatten)]
    pub meta: Meta,
    /// `internet-facing` or `internal`.
    pub scheme: Option<String>,
    pub subnets: Option<Unordered<Link>>,
    pub security_groups: Option<Unordered<Link>>,
    pub listeners: Option<Unordered<ClassicListener>>,
    pub health_check: Option<HealthCheck>,
    pub access_log: Option<AccessLog>,
    pub cross_zone: Option<bool>,
    pub idle_timeout: Option<i64>,
    /// Seconds; zero disables draining.
    pub connection_draining_timeout: Option<i64>,
    pub tags: Option<Tags>,
    #[serde(skip)]
    pub dns_name: Option<String>,
    #[serde(skip)]
    pub hosted_zone_id: Option<String>,
}

impl_diff!(ClassicLoadBalancer {
    scheme,
    subnets,
    security_groups,
    listeners,
    health_check,
    access_log,
    cross_zone,
    idle_timeout,
    connection_draining_timeout,
    tags
});

impl ClassicLoadBalancer {
    fn attributes_changed(changes: &Self) -> bool {
        changes.access_log.is_some()
            || changes.cross_zone.is_some()
            || changes.idle_timeout.is_some()
            || changes.connection_draining_timeout.is_some()
    }

    /// Desired attributes, falling back to `actual` for unspecified values.
    fn attributes(&self, actual: Option<&Self>) -> ClassicAttributes {
        let draining = self
            .connection_draining_timeout
            .or_else(|| actual.and_then(|a| a.connection_draining_timeout))
            .unwrap_or(0);
        let access_log = self
            .access_log
            .as_ref()
            .or_else(|| actual.and_then(|a| a.access_log.as_ref()))
            .filter(|log| log.enabled)
            .map(|log| AccessLogInfo {
                enabled: true,
                bucket: log.bucket.clone(),
                prefix: log.prefix.clone(),
                emit_interval: log.emit_interval,
            });
        ClassicAttributes {
            cross_zone: self
                .cross_zone
                .or_else(|| actual.and_then(|a| a.cross_zone))
                .unwrap_or(false),
            idle_timeout: self
                .idle_timeout
                .or_else(|| actual.and_then(|a| a.idle_timeout))
                .unwrap_or(DEFAULT_IDLE_TIMEOUT),
            connection_draining_enabled: draining > 0,
            connection_draining_timeout: if draining > 0 {
                draining
            } else {
                DEFAULT_DRAINING_TIMEOUT
            },
            access_log,
        }
    }

    fn is_internal(&self) -> bool {
        self.scheme.as_deref() == Some("internal")
    }
}

#[async_trait]
impl Resource for ClassicLoadBalancer {
    const KIND: Kind = Kind::ClassicLoadBalancer;

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
            .chain(self.security_groups.iter().flat_map(|g| g.iter()))
            .collect()
    }

    fn links_mut(&mut self) -> Vec<&mut Link> {
        self.subnets
            .iter_mut()
            .flat_map(|s| s.iter_mut())
            .chain(self.security_groups.iter_mut().flat_map(|g| g.iter_mut()))
            .collect()
    }

    fn tags_mut(&mut self) -> Option<&mut Tags> {
        Some(self.tags.get_or_insert_with(Tags::new))
    }

    fn output(&self, attr: Attr) -> Option<String> {
        match attr {
            Attr::Id | Attr::Name => self.meta.id.clone(),
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
        let name = self.meta.id.clone().unwrap_or_else(|| self.meta.name.clone());
        let found = cloud
            .load_balancing()
            .describe_classic_load_balancers(&[name])
            .await?;
        let Some(lb) = single(&self.task_key(), found)? else {
            return Ok(None);
        };
        let attributes = lb.attributes;
        Ok(Some(ClassicLoadBalancer {
            meta: found_meta(&self.meta, &lb.name),
            scheme: Some(lb.scheme),
            subnets: Some(lb.subnet_ids.into_iter().map(|id| Link::found(Kind::Subnet, id)).collect()),
            security_groups: Some(
                lb.security_group_ids
                    .into_iter()
                    .map(|id| Link::found(Kind::SecurityGroup, id))
                    .collect(),
            ),
            listeners: Some(
                lb.listeners
                    .into_iter()
                    .map(|l| ClassicListener {
                        load_balancer_port: l.load_balancer_port,
                        instance_port: l.instance_port,
                        protocol: l.protocol,
                        instance_protocol: l.instance_protocol,
                        ssl_certificate_id: l.ssl_certificate_id,
                    })
                    .collect(),
            ),
            health_check: lb.health_check.map(|h| HealthCheck {
                target: h.target,
                healthy_threshold: h.healthy_threshold,
                unhealthy_threshold: h.unhealthy_threshold,
                interval: h.interval,
                timeout: h.timeout,
            }),
            access_log: Some(match attributes.access_log {
                Some(log) => AccessLog {
                    enabled: log.enabled,
                    bucket: log.bucket,
                    prefix: log.prefix,
                    emit_interval: log.emit_interval,
                },
                None => AccessLog::default(),
            }),
            cross_zone: Some(attributes.cross_zone),
            idle_timeout: Some(attributes.idle_timeout),
            connection_draining_timeout: Some(if attributes.connection_draining_enabled {
                attributes.connection_draining_timeout
            } else {
                0
            }),
            tags: found_tags(ctx, &lb.tags, &self.tags),
            dns_name: Some(lb.dns_name),
            hosted_zone_id: Some(lb.hosted_zone_id),
        }))
    }

    fn check_changes(actual: Option<&Self>, desired: &Self, changes: &Self) -> Result<()> {
        let key = desired.task_key();
        let name = &desired.meta.name;
        if name.len() > MAX_NAME_LENGTH
            || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        {
            return Err(Error::InvalidRecord {
                key,
                message: format!(
                    "load balancer name {:?} must be at most {} alphanumerics or hyphens",
                    name, MAX_NAME_LENGTH
                ),
            });
        }
        check_required(
            &key,
            &[
                ("Subnets", desired.subnets.is_some()),
                ("Listeners", desired.listeners.as_ref().is_some_and(|l| !l.is_empty())),
            ],
        )?;
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
        let ids = |links: &Option<Unordered<Link>>| {
            links.as_ref().map(|l| link_ids(l)).unwrap_or_default()
        };
        let listeners: Vec<ClassicListenerInfo> = desired
            .listeners
            .iter()
            .flat_map(|l| l.iter())
            .map(ClassicListenerInfo::from)
            .collect();

        let Some(actual) = actual else {
            let created = api
                .create_classic_load_balancer(&ClassicLoadBalancerInfo {
                    name: desired.meta.name.clone(),
                    scheme: desired
                        .scheme
                        .clone()
                        .unwrap_or_else(|| "internet-facing".to_string()),
                    subnet_ids: ids(&desired.subnets),
                    security_group_ids: ids(&desired.security_groups),
                    listeners,
                    tags,
                    ..ClassicLoadBalancerInfo::default()
                })
                .await?;
            if let Some(check) = &desired.health_check {
                api.configure_health_check(&created.name, &check.into()).await?;
            }
            api.modify_classic_attributes(&created.name, &desired.attributes(None))
                .await?;
            desired.dns_name = Some(created.dns_name);
            desired.hosted_zone_id = Some(created.hosted_zone_id);
            desired.meta.id = Some(created.name);
            return Ok(());
        };

        let name = meta_id(Self::KIND, &desired.meta)?;
        if changes.listeners.is_some() {
            api.set_classic_listeners(&name, &listeners).await?;
        }
        if changes.subnets.is_some() {
            api.set_classic_subnets(&name, &ids(&desired.subnets)).await?;
        }
        if changes.security_groups.is_some() {
            api.set_classic_security_groups(&name, &ids(&desired.security_groups))
                .await?;
        }
        if let Some(check) = &changes.health_check {
            api.configure_health_check(&name, &check.into()).await?;
        }
        if Self::attributes_changed(changes) {
            api.modify_classic_attributes(&name, &desired.attributes(Some(actual)))
                .await?;
        }
        if changes.tags.is_some() {
            target
                .reconcile_tags(ctx.audit, TagScope::LoadBalancing, &name, actual.tags.as_ref(), &tags)
                .await?;
        }
        Ok(())
    }

    async fn render_hcl(target: &HclTarget, ctx: &RunContext<'_>, desired: &Self) -> Result<()> {
        let refs = |links: &Option<Unordered<Link>>| -> Option<Vec<HclValue>> {
            links
                .as_ref()
                .map(|l| l.iter().map(|link| ctx.hcl_ref(link, Attr::Id)).collect())
        };
        let attributes = desired.attributes(None);
        let mut body = HclBlock::new()
            .set("name", &desired.meta.name)
            .set("internal", desired.is_internal())
            .set_opt("subnets", refs(&desired.subnets))
            .set_opt("security_groups", refs(&desired.security_groups))
            .set("cross_zone_load_balancing", attributes.cross_zone)
            .set("idle_timeout", attributes.idle_timeout)
            .set("connection_draining", attributes.connection_draining_enabled)
            .set("connection_draining_timeout", attributes.connection_draining_timeout)
            .set_opt("tags", desired.tags.as_ref());
        for listener in desired.listeners.iter().flat_map(|l| l.iter()) {
            body = body.block(
                "listener",
                HclBlock::new()
                    .set("lb_port", listener.load_balancer_port)
                    .set("lb_protocol", &listener.protocol)
                    .set("instance_port", listener.instance_port)
                    .set("instance_protocol", &listener.instance_protocol)
                    .set_opt("ssl_certificate_id", listener.ssl_certificate_id.as_ref()),
            );
        }
        if let Some(check) = &desired.health_check {
            body = body.block(
                "health_check",
                HclBlock::new()
                    .set("target", &check.target)
                    .set("healthy_threshold", check.healthy_threshold)
                    .set("unhealthy_threshold", check.unhealthy_threshold)
                    .set("interval", check.interval)
                    .set("timeout", check.timeout),
            );
        }
        if let Some(log) = desired.access_log.as_ref().filter(|l| l.enabled) {
            body = body.block(
                "access_logs",
                HclBlock::new()
                    .set("enabled", true)
                    .set_opt("bucket", log.bucket.as_ref())
                    .set_opt("bucket_prefix", log.prefix.as_ref())
                    .set_opt("interval", log.emit_interval),
            );
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
        let refs = |links: &Option<Unordered<Link>>| -> Option<Vec<Value>> {
            links
                .as_ref()
                .map(|l| l.iter().map(|link| ctx.json_ref(link, Attr::Id)).collect())
        };
        let attributes = desired.attributes(None);
        let listeners: Option<Vec<Value>> = desired.listeners.as_ref().map(|listeners| {
            listeners
                .iter()
                .map(|l| {
                    Value::Object(properties(json!({
                        "LoadBalancerPort": l.load_balancer_port.to_string(),
                        "Protocol": l.protocol,
                        "InstancePort": l.instance_port.to_string(),
                        "InstanceProtocol": l.instance_protocol,
                        "SSLCertificateId": l.ssl_certificate_id,
                    })))
                })
                .collect()
        });
        let props = properties(json!({
            "LoadBalancerName": desired.meta.name,
            "Scheme": desired.scheme,
            "Subnets": refs(&desired.subnets),
            "SecurityGroups": refs(&desired.security_groups),
            "Listeners": listeners,
            "HealthCheck": desired.health_check.as_ref().map(|h| json!({
                "Target": h.target,
                "HealthyThreshold": h.healthy_threshold.to_string(),
                "UnhealthyThreshold": h.unhealthy_threshold.to_string(),
                "Interval": h.interval.to_string(),
                "Timeout": h.timeout.to_string(),
            })),
            "AccessLoggingPolicy": desired.access_log.as_ref().filter(|l| l.enabled).map(|l| {
                properties(json!({
                    "Enabled": true,
                    "S3BucketName": l.bucket,
                    "S3BucketPrefix": l.prefix,
                    "EmitInterval": l.emit_interval,
                }))
            }),
            "CrossZone": attributes.cross_zone,
            "ConnectionSettings": { "IdleTimeout": attributes.idle_timeout },
            "ConnectionDrainingPolicy": {
                "Enabled": attributes.connection_draining_enabled,
                "Timeout": attributes.connection_draining_timeout,
            },
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
    use crate::tasks::{Subnet, Vpc};

    pub(crate) fn api(idle_timeout: i64, scheme: &str) -> ClassicLoadBalancer {
        ClassicLoadBalancer {
            meta: Meta::new("api-test"),
            scheme: Some(scheme.into()),
            subnets: Some(Unordered(vec![Link::new(Kind::Subnet, "a")])),
            listeners: Some(Unordered(vec![ClassicListener {
                load_balancer_port: 443,
                instance_port: 443,
                protocol: tcp(),
                instance_protocol: tcp(),
                ssl_certificate_id: None,
            }])),
            health_check: Some(HealthCheck {
                target: "SSL:443".into(),
                healthy_threshold: 2,
                unhealthy_threshold: 2,
                interval: 10,
                timeout: 5,
            }),
            cross_zone: Some(true),
            idle_timeout: Some(idle_timeout),
            ..ClassicLoadBalancer::default()
        }
    }

    pub(crate) fn tasks(lb: ClassicLoadBalancer) -> TaskSet {
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
        tasks.add(lb).unwrap();
        tasks
    }

    fn key() -> TaskKey {
        TaskKey::new(Kind::ClassicLoadBalancer, "api-test")
    }

    #[tokio::test]
    async fn test_created_with_dns_outputs() {
        let cloud = Arc::new(MemoryCloud::new());
        let mut set = tasks(api(300, "internet-facing"));
        apply(&cloud, &mut set).await.unwrap();
        let lb = set.get(&key()).unwrap();
        assert!(lb.attribute(Attr::DnsName).is_some_and(|d| d.starts_with("api-test-")));
        assert!(lb.attribute(Attr::HostedZoneId).is_some());

        let report = apply(&cloud, &mut tasks(api(300, "internet-facing"))).await.unwrap();
        assert!(report.is_unchanged(), "{:?}", report.changes());
    }

    #[tokio::test]
    async fn test_idle_timeout_updates_attributes_only() {
        let cloud = Arc::new(MemoryCloud::new());
        apply(&cloud, &mut tasks(api(300, "internet-facing"))).await.unwrap();
        cloud.clear_mutations().await;

        let report = apply(&cloud, &mut tasks(api(600, "internet-facing"))).await.unwrap();
        assert_eq!(report.outcome(&key()), Some(&TaskOutcome::Updated(vec!["idle_timeout"])));
        assert_eq!(
            cloud.mutations().await,
            vec!["ModifyLoadBalancerAttributes api-test".to_string()]
        );
        let lbs = cloud.load_balancing().describe_classic_load_balancers(&[]).await.unwrap();
        assert!(lbs[0].attributes.cross_zone);
        assert_eq!(lbs[0].attributes.idle_timeout, 600);
    }

    #[tokio::test]
    async fn test_scheme_is_immutable() {
        let cloud = Arc::new(MemoryCloud::new());
        apply(&cloud, &mut tasks(api(300, "internet-facing"))).await.unwrap();
        let err = apply(&cloud, &mut tasks(api(300, "internal"))).await.unwrap_err();
        assert!(matches!(err.root(), Error::CannotChange { field: "Scheme", .. }));
    }

    #[tokio::test]
    async fn test_dotted_name_rejected() {
        let cloud = Arc::new(MemoryCloud::new());
        let mut lb = api(300, "internal");
        lb.meta = Meta::new("api.test.example.com");
        let err = apply(&cloud, &mut tasks(lb)).await.unwrap_err();
        assert!(matches!(err.root(), Error::InvalidRecord { .. }));
    }

    #[tokio::test]
    async fn test_manifests_render_listeners() {
        let manifest = hcl(&mut tasks(api(300, "internal"))).await;
        assert!(manifest.contains("internal = true"));
        assert!(manifest.contains("lb_port = 443"));
        assert!(manifest.contains("target = \"SSL:443\""));

        let doc = json(&mut tasks(api(300, "internal"))).await;
        let key = crate::target::json::resource_key(Kind::ClassicLoadBalancer, "api-test");
        let props = &doc["Resources"][key.as_str()]["Properties"];
        assert_eq!(props["Listeners"][0]["LoadBalancerPort"], "443");
        assert_eq!(props["ConnectionSettings"]["IdleTimeout"], 300);
    }
}
