//! In-memory provider account.
//!
//! Behaves like the real capability groups closely enough for full
//! reconciles: IDs are assigned on create, tags live in a per-scope store,
//! and a few knobs reproduce the provider's eventual consistency (pending
//! NAT gateways and instances, instance profile propagation lag). Every
//! mutating call is appended to a log so tests can assert "no mutations".

mod autoscaling;
mod compute;
mod dns;
mod elb;
mod events;
mod iam;
mod sqs;

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::{Mutex, MutexGuard};

use super::autoscaling::{AutoscalingGroupInfo, LaunchConfigurationInfo, LaunchTemplateInfo, LifecycleHookInfo};
use super::compute::{
    AddressInfo, DhcpOptionsInfo, EgressOnlyInternetGatewayInfo, InstanceInfo,
    InternetGatewayInfo, KeyPairInfo, NatGatewayInfo, RouteTableInfo, SecurityGroupInfo,
    SubnetInfo, VolumeInfo, VpcInfo,
};
use super::dns::{HostedZoneInfo, RecordSetInfo};
use super::elb::{ClassicLoadBalancerInfo, ListenerInfo, LoadBalancerInfo, TargetGroupInfo};
use super::events::{EventTargetInfo, RuleInfo};
use super::iam::{InstanceProfileInfo, OidcProviderInfo, RoleInfo};
use super::sqs::QueueInfo;
use super::{
    Autoscaling, Cloud, CloudResult, Compute, Dns, Events, Filter, Iam, LoadBalancing, Queues,
    TagScope, Tagging,
};
use crate::error::ProviderError;
use crate::gc::{system_clock, Clock};
use crate::model::Tags;

const ACCOUNT_ID: &str = "123456789012";

/// A provider record the in-memory store can filter and tag.
trait Tagged: Clone {
    fn tag_id(&self) -> &str;
    fn tags_mut(&mut self) -> &mut Tags;
    fn vpc(&self) -> Option<&str> {
        None
    }
}

macro_rules! tagged {
    ($ty:ty, $id:ident) => {
        impl Tagged for $ty {
            fn tag_id(&self) -> &str {
                &self.$id
            }
            fn tags_mut(&mut self) -> &mut Tags {
                &mut self.tags
            }
        }
    };
    ($ty:ty, $id:ident, $vpc:ident) => {
        impl Tagged for $ty {
            fn tag_id(&self) -> &str {
                &self.$id
            }
            fn tags_mut(&mut self) -> &mut Tags {
                &mut self.tags
            }
            fn vpc(&self) -> Option<&str> {
                Some(&self.$vpc)
            }
        }
    };
}

tagged!(VpcInfo, id, id);
tagged!(DhcpOptionsInfo, id);
tagged!(SubnetInfo, id, vpc_id);
tagged!(EgressOnlyInternetGatewayInfo, id, vpc_id);
tagged!(AddressInfo, allocation_id);
tagged!(NatGatewayInfo, id, vpc_id);
tagged!(RouteTableInfo, id, vpc_id);
tagged!(SecurityGroupInfo, id, vpc_id);
tagged!(KeyPairInfo, id);
tagged!(VolumeInfo, id);
tagged!(InstanceInfo, id);

impl Tagged for InternetGatewayInfo {
    fn tag_id(&self) -> &str {
        &self.id
    }
    fn tags_mut(&mut self) -> &mut Tags {
        &mut self.tags
    }
    fn vpc(&self) -> Option<&str> {
        self.attached_vpc_ids.first().map(String::as_str)
    }
}

/// Account state. Tags are kept apart from the records, keyed by scope and ID.
#[derive(Default)]
struct State {
    counter: u64,
    mutations: Vec<String>,
    tags: BTreeMap<(TagScope, String), Tags>,

    vpcs: BTreeMap<String, VpcInfo>,
    dhcp_options: BTreeMap<String, DhcpOptionsInfo>,
    subnets: BTreeMap<String, SubnetInfo>,
    internet_gateways: BTreeMap<String, InternetGatewayInfo>,
    egress_only_gateways: BTreeMap<String, EgressOnlyInternetGatewayInfo>,
    addresses: BTreeMap<String, AddressInfo>,
    nat_gateways: BTreeMap<String, NatGatewayInfo>,
    route_tables: BTreeMap<String, RouteTableInfo>,
    security_groups: BTreeMap<String, SecurityGroupInfo>,
    key_pairs: BTreeMap<String, KeyPairInfo>,
    volumes: BTreeMap<String, VolumeInfo>,
    instances: BTreeMap<String, InstanceInfo>,

    launch_configurations: BTreeMap<String, LaunchConfigurationInfo>,
    launch_templates: BTreeMap<String, LaunchTemplateInfo>,
    groups: BTreeMap<String, AutoscalingGroupInfo>,
    lifecycle_hooks: BTreeMap<(String, String), LifecycleHookInfo>,

    classic_load_balancers: BTreeMap<String, ClassicLoadBalancerInfo>,
    load_balancers: BTreeMap<String, LoadBalancerInfo>,
    listeners: BTreeMap<String, ListenerInfo>,
    target_groups: BTreeMap<String, TargetGroupInfo>,

    roles: BTreeMap<String, RoleInfo>,
    role_policies: BTreeMap<(String, String), String>,
    instance_profiles: BTreeMap<String, InstanceProfileInfo>,
    oidc_providers: BTreeMap<String, OidcProviderInfo>,

    hosted_zones: BTreeMap<String, HostedZoneInfo>,
    record_sets: BTreeMap<String, Vec<RecordSetInfo>>,

    queues: BTreeMap<String, QueueInfo>,

    rules: BTreeMap<String, RuleInfo>,
    rule_targets: BTreeMap<String, Vec<EventTargetInfo>>,

    knobs: Knobs,
}

/// Eventual-consistency behavior.
#[derive(Debug, Default, Clone)]
struct Knobs {
    /// Describes that report a new NAT gateway as `pending`.
    nat_gateway_pending_polls: u32,
    /// Describes that report a new instance as `pending`.
    instance_pending_polls: u32,
    /// Remaining calls that reject a freshly created instance profile.
    instance_profile_lag: u32,
    /// Per-object remaining pending describes.
    pending: BTreeMap<String, u32>,
}

impl State {
    fn next_id(&mut self, prefix: &str) -> String {
        self.counter += 1;
        format!("{}-{:017x}", prefix, self.counter)
    }

    fn arn(&self, service: &str, resource: &str) -> String {
        format!("arn:aws:{}:us-east-1:{}:{}", service, ACCOUNT_ID, resource)
    }

    fn global_arn(&self, service: &str, resource: &str) -> String {
        format!("arn:aws:{}::{}:{}", service, ACCOUNT_ID, resource)
    }

    fn record(&mut self, operation: impl Into<String>) {
        self.mutations.push(operation.into());
    }

    fn tags_of(&self, scope: TagScope, id: &str) -> Tags {
        self.tags
            .get(&(scope, id.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    fn set_tags(&mut self, scope: TagScope, id: &str, tags: &Tags) {
        if !tags.is_empty() {
            self.tags
                .entry((scope, id.to_string()))
                .or_default()
                .extend(tags.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
    }

    /// Copy out the records matching `filter`, with their current tags.
    fn select<'a, T, I>(&self, scope: TagScope, items: I, filter: &Filter) -> Vec<T>
    where
        T: Tagged + 'a,
        I: IntoIterator<Item = &'a T>,
    {
        items
            .into_iter()
            .filter_map(|item| {
                let tags = self.tags_of(scope, item.tag_id());
                if !filter.matches(item.tag_id(), &tags, item.vpc()) {
                    return None;
                }
                let mut copy = item.clone();
                *copy.tags_mut() = tags;
                Some(copy)
            })
            .collect()
    }

    /// Count down an object's remaining pending describes; true while pending.
    fn still_pending(&mut self, id: &str) -> bool {
        match self.knobs.pending.get_mut(id) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }

    /// Reject use of an instance profile while propagation lag remains.
    fn check_instance_profile(&mut self, profile: Option<&str>) -> CloudResult<()> {
        let Some(profile) = profile else {
            return Ok(());
        };
        if self.knobs.instance_profile_lag > 0 {
            self.knobs.instance_profile_lag -= 1;
            return Err(ProviderError::new(
                "ValidationError",
                format!("Invalid IamInstanceProfile: {}", profile),
            ));
        }
        let known = self.instance_profiles.values().any(|p| p.name == profile || p.arn == profile);
        if !known {
            return Err(ProviderError::new(
                "ValidationError",
                format!("Invalid IamInstanceProfile: {}", profile),
            ));
        }
        Ok(())
    }
}

fn not_found(code: &str, what: &str) -> ProviderError {
    ProviderError::not_found(code, format!("{} does not exist", what))
}

/// An in-memory provider account.
pub struct MemoryCloud {
    region: String,
    clock: Clock,
    state: Mutex<State>,
}

impl MemoryCloud {
    pub fn new() -> Self {
        Self {
            region: "us-east-1".to_string(),
            clock: system_clock(),
            state: Mutex::new(State::default()),
        }
    }

    /// Use `clock` for creation timestamps.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    async fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().await
    }

    /// Mutating calls issued so far, in order.
    pub async fn mutations(&self) -> Vec<String> {
        self.state().await.mutations.clone()
    }

    pub async fn clear_mutations(&self) {
        self.state().await.mutations.clear();
    }

    /// New NAT gateways report `pending` for this many describes.
    pub async fn set_nat_gateway_pending_polls(&self, polls: u32) {
        self.state().await.knobs.nat_gateway_pending_polls = polls;
    }

    /// New instances report `pending` for this many describes.
    pub async fn set_instance_pending_polls(&self, polls: u32) {
        self.state().await.knobs.instance_pending_polls = polls;
    }

    /// Reject this many uses of an instance profile as not yet propagated.
    pub async fn set_instance_profile_lag(&self, calls: u32) {
        self.state().await.knobs.instance_profile_lag = calls;
    }
}

impl Default for MemoryCloud {
    fn default() -> Self {
        Self::new()
    }
}

impl Cloud for MemoryCloud {
    fn region(&self) -> &str {
        &self.region
    }

    fn compute(&self) -> &dyn Compute {
        self
    }

    fn autoscaling(&self) -> &dyn Autoscaling {
        self
    }

    fn load_balancing(&self) -> &dyn LoadBalancing {
        self
    }

    fn iam(&self) -> &dyn Iam {
        self
    }

    fn dns(&self) -> &dyn Dns {
        self
    }

    fn queues(&self) -> &dyn Queues {
        self
    }

    fn events(&self) -> &dyn Events {
        self
    }

    fn tagging(&self) -> &dyn Tagging {
        self
    }
}

#[async_trait]
impl Tagging for MemoryCloud {
    async fn create_tags(&self, scope: TagScope, id: &str, tags: &Tags) -> CloudResult<()> {
        let mut state = self.state().await;
        state.record(format!("CreateTags {} {:?}", id, tags.keys().collect::<Vec<_>>()));
        state.set_tags(scope, id, tags);
        Ok(())
    }

    async fn delete_tags(&self, scope: TagScope, id: &str, keys: &[String]) -> CloudResult<()> {
        let mut state = self.state().await;
        state.record(format!("DeleteTags {} {:?}", id, keys));
        if let Some(existing) = state.tags.get_mut(&(scope, id.to_string())) {
            for key in keys {
                existing.remove(key);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_tags_are_scoped() {
        let cloud = MemoryCloud::new();
        let mut tags = Tags::new();
        tags.insert("Name".into(), "a".into());
        cloud.create_tags(TagScope::Iam, "x", &tags).await.unwrap();
        let state = cloud.state().await;
        assert_eq!(state.tags_of(TagScope::Iam, "x"), tags);
        assert!(state.tags_of(TagScope::Autoscaling, "x").is_empty());
        assert_eq!(state.mutations.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_tags_removes_keys() {
        let cloud = MemoryCloud::new();
        let mut tags = Tags::new();
        tags.insert("Name".into(), "a".into());
        tags.insert("Old".into(), "b".into());
        cloud.create_tags(TagScope::Compute, "vpc-1", &tags).await.unwrap();
        cloud
            .delete_tags(TagScope::Compute, "vpc-1", &["Old".to_string()])
            .await
            .unwrap();
        let state = cloud.state().await;
        assert_eq!(state.tags_of(TagScope::Compute, "vpc-1").len(), 1);
    }

    #[tokio::test]
    async fn test_instance_profile_lag_counts_down() {
        let cloud = MemoryCloud::new();
        cloud.set_instance_profile_lag(1).await;
        let mut state = cloud.state().await;
        state.instance_profiles.insert(
            "nodes".into(),
            InstanceProfileInfo {
                name: "nodes".into(),
                ..InstanceProfileInfo::default()
            },
        );
        assert!(state.check_instance_profile(Some("nodes")).is_err());
        assert!(state.check_instance_profile(Some("nodes")).is_ok());
        assert!(state.check_instance_profile(Some("missing")).is_err());
    }
}
