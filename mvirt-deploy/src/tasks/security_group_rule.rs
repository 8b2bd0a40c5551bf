//! A single ingress or egress permission on a security group.
//!
//! Rules have no provider ID and are never modified: either the group
//! already carries an identical permission or one is authorized.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{check_required, found_meta, link_id, opt_link_id, properties, single};
use crate::cloud::compute::SecurityGroupRuleInfo;
use crate::cloud::{Cloud, Filter};
use crate::error::{Error, Result};
use crate::impl_diff;
use crate::model::{Attr, Kind, Link, Meta};
use crate::reconciler::{Resource, RunContext};
use crate::target::{ApiTarget, HclBlock, HclTarget, JsonTarget};

/// Protocol value meaning "all traffic".
const ALL_PROTOCOLS: &str = "-1";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecurityGroupRule {
    #[serde(flatten)]
    pub meta: Meta,
    pub security_group: Option<Link>,
    pub egress: Option<bool>,
    pub protocol: Option<String>,
    pub from_port: Option<i64>,
    pub to_port: Option<i64>,
    pub cidr: Option<String>,
    pub ipv6_cidr: Option<String>,
    pub source_group: Option<Link>,
}

impl_diff!(SecurityGroupRule {
    security_group,
    egress,
    protocol,
    from_port,
    to_port,
    cidr,
    ipv6_cidr,
    source_group
});

impl SecurityGroupRule {
    fn is_egress(&self) -> bool {
        self.egress.unwrap_or(false)
    }

    fn direction(&self) -> &'static str {
        if self.is_egress() {
            "egress"
        } else {
            "ingress"
        }
    }

    fn protocol(&self) -> &str {
        self.protocol.as_deref().unwrap_or(ALL_PROTOCOLS)
    }

    fn permission(&self) -> SecurityGroupRuleInfo {
        SecurityGroupRuleInfo {
            protocol: self.protocol().to_string(),
            from_port: self.from_port,
            to_port: self.to_port,
            cidr: self.cidr.clone(),
            ipv6_cidr: self.ipv6_cidr.clone(),
            source_group_id: opt_link_id(&self.source_group),
        }
    }

    /// Synthetic ID: the group plus every field of the permission.
    fn rule_id(&self, group_id: &str) -> String {
        let permission = self.permission();
        let source = permission
            .cidr
            .or(permission.ipv6_cidr)
            .or(permission.source_group_id)
            .unwrap_or_default();
        format!(
            "{}-{}-{}-{}-{}-{}",
            group_id,
            self.direction(),
            permission.protocol,
            permission.from_port.unwrap_or(0),
            permission.to_port.unwrap_or(0),
            source
        )
    }
}

#[async_trait]
impl Resource for SecurityGroupRule {
    const KIND: Kind = Kind::SecurityGroupRule;

    fn meta(&self) -> &Meta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut Meta {
        &mut self.meta
    }

    fn links(&self) -> Vec<&Link> {
        self.security_group
            .iter()
            .chain(self.source_group.iter())
            .collect()
    }

    fn links_mut(&mut self) -> Vec<&mut Link> {
        self.security_group
            .iter_mut()
            .chain(self.source_group.iter_mut())
            .collect()
    }

    async fn find(&self, _ctx: &RunContext<'_>, cloud: &dyn Cloud) -> Result<Option<Self>> {
        let Some(group_id) = opt_link_id(&self.security_group) else {
            return Ok(None);
        };
        let groups = cloud
            .compute()
            .describe_security_groups(&Filter::by_id(&group_id))
            .await?;
        let Some(group) = single(&self.task_key(), groups)? else {
            return Ok(None);
        };
        let existing = if self.is_egress() {
            &group.egress
        } else {
            &group.ingress
        };
        if !existing.contains(&self.permission()) {
            return Ok(None);
        }
        let mut found = self.clone();
        found.meta = found_meta(&self.meta, self.rule_id(&group_id));
        Ok(Some(found))
    }

    fn check_changes(_actual: Option<&Self>, desired: &Self, _changes: &Self) -> Result<()> {
        let key = desired.task_key();
        check_required(&key, &[("SecurityGroup", desired.security_group.is_some())])?;
        let sources = [
            desired.cidr.is_some(),
            desired.ipv6_cidr.is_some(),
            desired.source_group.is_some(),
        ]
        .into_iter()
        .filter(|set| *set)
        .count();
        if sources > 1 {
            return Err(Error::InvalidRecord {
                key,
                message: "at most one of CIDR, IPv6CIDR and SourceGroup may be set".to_string(),
            });
        }
        Ok(())
    }

    async fn render_api(
        target: &ApiTarget,
        _ctx: &RunContext<'_>,
        _actual: Option<&Self>,
        desired: &mut Self,
        _changes: &Self,
    ) -> Result<()> {
        let group_id = link_id(&desired.task_key(), "SecurityGroup", &desired.security_group)?;
        let permission = desired.permission();
        let compute = target.cloud().compute();
        if desired.is_egress() {
            compute.authorize_egress(&group_id, &permission).await?;
        } else {
            compute.authorize_ingress(&group_id, &permission).await?;
        }
        desired.meta.id = Some(desired.rule_id(&group_id));
        Ok(())
    }

    async fn render_hcl(target: &HclTarget, ctx: &RunContext<'_>, desired: &Self) -> Result<()> {
        let id = |link: &Option<Link>| link.as_ref().map(|l| ctx.hcl_ref(l, Attr::Id));
        let body = HclBlock::new()
            .set("type", desired.direction())
            .set_opt("security_group_id", id(&desired.security_group))
            .set("protocol", desired.protocol())
            .set("from_port", desired.from_port.unwrap_or(0))
            .set("to_port", desired.to_port.unwrap_or(0))
            .set_opt("cidr_blocks", desired.cidr.as_ref().map(|c| vec![c.clone()]))
            .set_opt(
                "ipv6_cidr_blocks",
                desired.ipv6_cidr.as_ref().map(|c| vec![c.clone()]),
            )
            .set_opt("source_security_group_id", id(&desired.source_group));
        target
            .render_resource(Self::KIND, &desired.meta.name, body)
            .await
    }

    async fn render_json(
        target: &JsonTarget,
        ctx: &RunContext<'_>,
        desired: &Self,
    ) -> Result<()> {
        let id = |link: &Option<Link>| link.as_ref().map(|l| ctx.json_ref(l, Attr::Id));
        let peer_key = if desired.is_egress() {
            "DestinationSecurityGroupId"
        } else {
            "SourceSecurityGroupId"
        };
        let mut props = properties(json!({
            "GroupId": id(&desired.security_group),
            "IpProtocol": desired.protocol(),
            "FromPort": desired.from_port,
            "ToPort": desired.to_port,
            "CidrIp": desired.cidr,
            "CidrIpv6": desired.ipv6_cidr,
        }));
        if let Some(peer) = id(&desired.source_group) {
            props.insert(peer_key.to_string(), peer);
        }
        if desired.is_egress() {
            target
                .render_typed(
                    "AWS::EC2::SecurityGroupEgress",
                    Self::KIND,
                    &desired.meta.name,
                    props,
                )
                .await
        } else {
            target
                .render_resource(Self::KIND, &desired.meta.name, props)
                .await
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::cloud::MemoryCloud;
    use crate::reconciler::TaskSet;
    use crate::target::json::resource_key;
    use crate::tasks::testing::{apply, json};
    use crate::tasks::{SecurityGroup, Vpc};

    fn tasks(rules: Vec<SecurityGroupRule>) -> TaskSet {
        let mut tasks = TaskSet::new();
        tasks
            .add(Vpc {
                meta: Meta::new("main"),
                cidr: Some("10.0.0.0/16".into()),
                ..Vpc::default()
            })
            .unwrap();
        for name in ["masters", "nodes"] {
            tasks
                .add(SecurityGroup {
                    meta: Meta::new(name),
                    vpc: Some(Link::new(Kind::Vpc, "main")),
                    ..SecurityGroup::default()
                })
                .unwrap();
        }
        for rule in rules {
            tasks.add(rule).unwrap();
        }
        tasks
    }

    fn https_from_nodes() -> SecurityGroupRule {
        SecurityGroupRule {
            meta: Meta::new("https-nodes-to-masters"),
            security_group: Some(Link::new(Kind::SecurityGroup, "masters")),
            protocol: Some("tcp".into()),
            from_port: Some(443),
            to_port: Some(443),
            source_group: Some(Link::new(Kind::SecurityGroup, "nodes")),
            ..SecurityGroupRule::default()
        }
    }

    fn all_egress() -> SecurityGroupRule {
        SecurityGroupRule {
            meta: Meta::new("masters-egress"),
            security_group: Some(Link::new(Kind::SecurityGroup, "masters")),
            egress: Some(true),
            cidr: Some("0.0.0.0/0".into()),
            ..SecurityGroupRule::default()
        }
    }

    #[tokio::test]
    async fn test_rule_authorized_once() {
        let cloud = Arc::new(MemoryCloud::new());
        let report = apply(&cloud, &mut tasks(vec![https_from_nodes()]))
            .await
            .unwrap();
        assert_eq!(report.changes().len(), 4);
        let groups = cloud
            .compute()
            .describe_security_groups(&Filter::default())
            .await
            .unwrap();
        let masters = groups.iter().find(|g| g.name == "masters").unwrap();
        assert_eq!(masters.ingress.len(), 1);
        assert_eq!(masters.ingress[0].from_port, Some(443));

        cloud.clear_mutations().await;
        assert!(apply(&cloud, &mut tasks(vec![https_from_nodes()]))
            .await
            .unwrap()
            .is_unchanged());
        assert!(cloud.mutations().await.is_empty());
    }

    #[tokio::test]
    async fn test_default_egress_already_present() {
        let cloud = Arc::new(MemoryCloud::new());
        let report = apply(&cloud, &mut tasks(vec![all_egress()])).await.unwrap();
        let key = crate::model::TaskKey::new(Kind::SecurityGroupRule, "masters-egress");
        assert_eq!(
            report.outcome(&key),
            Some(&crate::reconciler::TaskOutcome::Unchanged)
        );
    }

    #[tokio::test]
    async fn test_egress_rendered_as_egress_resource() {
        let doc = json(&mut tasks(vec![all_egress(), https_from_nodes()])).await;
        let resources = &doc["Resources"];
        let egress = &resources[resource_key(Kind::SecurityGroupRule, "masters-egress")];
        assert_eq!(egress["Type"], "AWS::EC2::SecurityGroupEgress");
        assert_eq!(egress["Properties"]["IpProtocol"], "-1");
        let ingress = &resources[resource_key(Kind::SecurityGroupRule, "https-nodes-to-masters")];
        assert_eq!(ingress["Type"], "AWS::EC2::SecurityGroupIngress");
        assert!(ingress["Properties"]["SourceSecurityGroupId"]["Ref"].is_string());
    }

    #[tokio::test]
    async fn test_two_sources_rejected() {
        let cloud = Arc::new(MemoryCloud::new());
        let rule = SecurityGroupRule {
            cidr: Some("10.0.0.0/8".into()),
            ..https_from_nodes()
        };
        let err = apply(&cloud, &mut tasks(vec![rule])).await.unwrap_err();
        assert!(matches!(err.root(), Error::InvalidRecord { .. }));
    }
}
