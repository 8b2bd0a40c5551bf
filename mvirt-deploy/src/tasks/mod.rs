//! Resource kinds.
//!
//! One module per kind. Each record implements [`crate::reconciler::Resource`]
//! and its fields double as the differ's changes record.

pub mod autoscaling_group;
pub mod autoscaling_lifecycle_hook;
pub mod classic_load_balancer;
pub mod dhcp_options;
pub mod dns_name;
pub mod dns_zone;
pub mod ebs_volume;
pub mod egress_only_internet_gateway;
pub mod elastic_ip;
pub mod eventbridge_rule;
pub mod eventbridge_target;
pub mod iam_instance_profile;
pub mod iam_instance_profile_role;
pub mod iam_oidc_provider;
pub mod iam_role;
pub mod iam_role_policy;
pub mod instance;
pub mod internet_gateway;
pub mod launch_configuration;
pub mod launch_template;
pub mod nat_gateway;
pub mod network_load_balancer;
pub mod route;
pub mod route_table;
pub mod route_table_association;
pub mod security_group;
pub mod security_group_rule;
pub mod sqs_queue;
pub mod ssh_key;
pub mod subnet;
pub mod target_group;
pub mod volume_attachment;
pub mod vpc;
pub mod vpc_dhcp_options_association;

use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::model::{Kind, Link, Meta, TaskKey, Tags};
use crate::reconciler::RunContext;
use crate::tags::observed_tags;

pub use autoscaling_group::{AutoscalingGroup, WarmPool};
pub use autoscaling_lifecycle_hook::AutoscalingLifecycleHook;
pub use classic_load_balancer::{AccessLog, ClassicListener, ClassicLoadBalancer, HealthCheck};
pub use dhcp_options::DhcpOptions;
pub use dns_name::DnsName;
pub use dns_zone::DnsZone;
pub use ebs_volume::EbsVolume;
pub use egress_only_internet_gateway::EgressOnlyInternetGateway;
pub use elastic_ip::ElasticIp;
pub use eventbridge_rule::EventBridgeRule;
pub use eventbridge_target::EventBridgeTarget;
pub use iam_instance_profile::IamInstanceProfile;
pub use iam_instance_profile_role::IamInstanceProfileRole;
pub use iam_oidc_provider::IamOidcProvider;
pub use iam_role::IamRole;
pub use iam_role_policy::IamRolePolicy;
pub use instance::Instance;
pub use internet_gateway::InternetGateway;
pub use launch_configuration::LaunchConfiguration;
pub use launch_template::LaunchTemplate;
pub use nat_gateway::NatGateway;
pub use network_load_balancer::{NetworkLoadBalancer, NlbListener};
pub use route::Route;
pub use route_table::RouteTable;
pub use route_table_association::RouteTableAssociation;
pub use security_group::SecurityGroup;
pub use security_group_rule::SecurityGroupRule;
pub use sqs_queue::SqsQueue;
pub use ssh_key::SshKey;
pub use subnet::Subnet;
pub use target_group::TargetGroup;
pub use volume_attachment::VolumeAttachment;
pub use vpc::Vpc;
pub use vpc_dhcp_options_association::VpcDhcpOptionsAssociation;

/// At most one match; more is fatal.
pub(crate) fn single<T>(key: &TaskKey, mut found: Vec<T>) -> Result<Option<T>> {
    match found.len() {
        0 => Ok(None),
        1 => Ok(found.pop()),
        count => Err(Error::AmbiguousFind {
            key: key.clone(),
            count,
        }),
    }
}

/// Identity of a found object: the desired name and lifecycle with the
/// provider's ID.
pub(crate) fn found_meta(meta: &Meta, id: impl Into<String>) -> Meta {
    Meta {
        name: meta.name.clone(),
        id: Some(id.into()),
        lifecycle: meta.lifecycle,
    }
}

/// The provider ID of a record that has been found or created.
pub(crate) fn meta_id(kind: Kind, meta: &Meta) -> Result<String> {
    meta.id.clone().ok_or_else(|| Error::MissingAttribute {
        key: TaskKey::new(kind, meta.name.clone()),
        attribute: "id",
    })
}

/// Reject an existing resource whose changes touch immutable fields.
pub(crate) fn check_immutable(
    key: &TaskKey,
    exists: bool,
    fields: &[(&'static str, bool)],
) -> Result<()> {
    if !exists {
        return Ok(());
    }
    match fields.iter().find(|(_, changed)| *changed) {
        Some((field, _)) => Err(Error::CannotChange {
            key: key.clone(),
            field,
        }),
        None => Ok(()),
    }
}

/// Reject a record that lacks any of the listed fields.
pub(crate) fn check_required(key: &TaskKey, fields: &[(&'static str, bool)]) -> Result<()> {
    match fields.iter().find(|(_, present)| !*present) {
        Some((field, _)) => Err(Error::RequiredFieldMissing {
            key: key.clone(),
            field,
        }),
        None => Ok(()),
    }
}

/// The resolved ID of a required reference.
pub(crate) fn link_id(key: &TaskKey, field: &'static str, link: &Option<Link>) -> Result<String> {
    let link = link.as_ref().ok_or_else(|| Error::RequiredFieldMissing {
        key: key.clone(),
        field,
    })?;
    link.id.clone().ok_or_else(|| Error::MissingAttribute {
        key: link.key(),
        attribute: "id",
    })
}

/// The resolved ID of an optional reference.
pub(crate) fn opt_link_id(link: &Option<Link>) -> Option<String> {
    link.as_ref().and_then(|l| l.id.clone())
}

/// Resolved IDs of a list of references, in order.
pub(crate) fn link_ids<'a, I>(links: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a Link>,
{
    links.into_iter().filter_map(|l| l.id.clone()).collect()
}

/// Observed tags reduced to what the desired record cares about.
pub(crate) fn found_tags(ctx: &RunContext<'_>, observed: &Tags, desired: &Option<Tags>) -> Option<Tags> {
    let empty = Tags::new();
    let desired = desired.as_ref().unwrap_or(&empty);
    Some(observed_tags(observed, desired, &ctx.well_known_tags()))
}

/// Whether two policy documents are the same JSON value.
pub(crate) fn json_equivalent(a: &str, b: &str) -> bool {
    match (
        serde_json::from_str::<Value>(a),
        serde_json::from_str::<Value>(b),
    ) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

/// Parse a JSON document for embedding in a stack template.
pub(crate) fn json_document(key: &TaskKey, document: &str) -> Result<Value> {
    serde_json::from_str(document).map_err(|e| Error::InvalidRecord {
        key: key.clone(),
        message: format!("invalid JSON document: {}", e),
    })
}

/// A stack property map with unset (null) properties dropped.
pub(crate) fn properties(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map.into_iter().filter(|(_, v)| !v.is_null()).collect(),
        _ => Map::new(),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::Arc;

    use chrono::{TimeZone, Utc};

    use crate::audit::DeployAuditLogger;
    use crate::gc::Clock;
    use crate::cloud::MemoryCloud;
    use crate::config::DeployConfig;
    use crate::reconciler::{Executor, RunReport, TaskSet};
    use crate::target::{ApiTarget, HclTarget, JsonTarget, Target};

    pub fn config() -> DeployConfig {
        DeployConfig {
            wait_after_all_tasks_failed: std::time::Duration::from_millis(10),
            waiter_interval: std::time::Duration::from_millis(1),
            waiter_timeout: std::time::Duration::from_millis(50),
            ..DeployConfig::for_cluster("test.example.com")
        }
    }

    pub async fn apply(cloud: &Arc<MemoryCloud>, tasks: &mut TaskSet) -> crate::Result<RunReport> {
        Executor::new(Target::Api(ApiTarget::new(cloud.clone())), config())
            .with_audit(DeployAuditLogger::new_noop())
            .run(tasks)
            .await
    }

    /// A clock that advances one minute on every read.
    pub fn stepping_clock() -> Clock {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let ticks = Arc::new(AtomicI64::new(0));
        Arc::new(move || start + chrono::Duration::minutes(ticks.fetch_add(1, Ordering::SeqCst)))
    }

    pub async fn apply_with_clock(
        cloud: &Arc<MemoryCloud>,
        tasks: &mut TaskSet,
        clock: Clock,
    ) -> crate::Result<RunReport> {
        Executor::new(
            Target::Api(ApiTarget::new(cloud.clone()).with_clock(clock)),
            config(),
        )
        .with_audit(DeployAuditLogger::new_noop())
        .run(tasks)
        .await
    }

    pub async fn plan(cloud: &Arc<MemoryCloud>, tasks: &mut TaskSet) -> crate::Result<RunReport> {
        Executor::new(
            Target::Api(ApiTarget::new(cloud.clone()).with_dry_run(true)),
            config(),
        )
        .with_audit(DeployAuditLogger::new_noop())
        .run(tasks)
        .await
    }

    /// Render `tasks` as HCL and return `main.tf`.
    pub async fn hcl(tasks: &mut TaskSet) -> String {
        let executor = Executor::new(Target::Hcl(HclTarget::new("us-east-1")), config())
            .with_audit(DeployAuditLogger::new_noop());
        executor.run(tasks).await.unwrap();
        match executor.target() {
            Target::Hcl(t) => t.files().await[crate::target::hcl::MANIFEST_FILE].clone(),
            _ => unreachable!(),
        }
    }

    /// Render `tasks` as a JSON stack document.
    pub async fn json(tasks: &mut TaskSet) -> serde_json::Value {
        let executor = Executor::new(Target::Json(JsonTarget::new()), config())
            .with_audit(DeployAuditLogger::new_noop());
        executor.run(tasks).await.unwrap();
        match executor.target() {
            Target::Json(t) => t.document().await,
            _ => unreachable!(),
        }
    }
}
