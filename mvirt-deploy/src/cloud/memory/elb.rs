use async_trait::async_trait;

use super::{not_found, MemoryCloud};
use crate::cloud::elb::{
    ClassicAttributes, ClassicListenerInfo, ClassicLoadBalancerInfo, HealthCheckInfo, ListenerInfo,
    LoadBalancerInfo, LoadBalancing, TargetGroupHealthCheck, TargetGroupInfo,
};
use crate::cloud::{CloudResult, TagScope};
use crate::error::ProviderError;

const SCOPE: TagScope = TagScope::LoadBalancing;
const CLASSIC_ZONE_ID: &str = "Z35SXDOTRQ7X7K";
const NETWORK_ZONE_ID: &str = "Z26RNL4JYFTOTI";

fn duplicate(what: &str) -> ProviderError {
    ProviderError::new("DuplicateLoadBalancerName", format!("{} already exists", what))
}

#[async_trait]
impl LoadBalancing for MemoryCloud {
    async fn describe_classic_load_balancers(
        &self,
        names: &[String],
    ) -> CloudResult<Vec<ClassicLoadBalancerInfo>> {
        let state = self.state().await;
        Ok(state
            .classic_load_balancers
            .values()
            .filter(|lb| names.is_empty() || names.contains(&lb.name))
            .map(|lb| ClassicLoadBalancerInfo {
                tags: state.tags_of(SCOPE, &lb.name),
                ..lb.clone()
            })
            .collect())
    }

    async fn create_classic_load_balancer(
        &self,
        request: &ClassicLoadBalancerInfo,
    ) -> CloudResult<ClassicLoadBalancerInfo> {
        let mut state = self.state().await;
        if state.classic_load_balancers.contains_key(&request.name) {
            return Err(duplicate(&request.name));
        }
        state.record(format!("CreateLoadBalancer {}", request.name));
        let lb = ClassicLoadBalancerInfo {
            dns_name: format!("{}-{}.us-east-1.elb.amazonaws.com", request.name, state.counter),
            hosted_zone_id: CLASSIC_ZONE_ID.to_string(),
            ..request.clone()
        };
        state
            .classic_load_balancers
            .insert(request.name.clone(), lb.clone());
        state.set_tags(SCOPE, &request.name, &request.tags);
        Ok(lb)
    }

    async fn set_classic_listeners(
        &self,
        name: &str,
        listeners: &[ClassicListenerInfo],
    ) -> CloudResult<()> {
        let mut state = self.state().await;
        state.record(format!("SetLoadBalancerListeners {}", name));
        let lb = state
            .classic_load_balancers
            .get_mut(name)
            .ok_or_else(|| not_found("LoadBalancerNotFound", name))?;
        lb.listeners = listeners.to_vec();
        Ok(())
    }

    async fn set_classic_subnets(&self, name: &str, subnet_ids: &[String]) -> CloudResult<()> {
        let mut state = self.state().await;
        state.record(format!("SetLoadBalancerSubnets {}", name));
        let lb = state
            .classic_load_balancers
            .get_mut(name)
            .ok_or_else(|| not_found("LoadBalancerNotFound", name))?;
        lb.subnet_ids = subnet_ids.to_vec();
        Ok(())
    }

    async fn set_classic_security_groups(
        &self,
        name: &str,
        group_ids: &[String],
    ) -> CloudResult<()> {
        let mut state = self.state().await;
        state.record(format!("ApplySecurityGroupsToLoadBalancer {}", name));
        let lb = state
            .classic_load_balancers
            .get_mut(name)
            .ok_or_else(|| not_found("LoadBalancerNotFound", name))?;
        lb.security_group_ids = group_ids.to_vec();
        Ok(())
    }

    async fn configure_health_check(&self, name: &str, check: &HealthCheckInfo) -> CloudResult<()> {
        let mut state = self.state().await;
        state.record(format!("ConfigureHealthCheck {}", name));
        let lb = state
            .classic_load_balancers
            .get_mut(name)
            .ok_or_else(|| not_found("LoadBalancerNotFound", name))?;
        lb.health_check = Some(check.clone());
        Ok(())
    }

    async fn modify_classic_attributes(
        &self,
        name: &str,
        attributes: &ClassicAttributes,
    ) -> CloudResult<()> {
        let mut state = self.state().await;
        state.record(format!("ModifyLoadBalancerAttributes {}", name));
        let lb = state
            .classic_load_balancers
            .get_mut(name)
            .ok_or_else(|| not_found("LoadBalancerNotFound", name))?;
        lb.attributes = attributes.clone();
        Ok(())
    }

    async fn describe_load_balancers(&self, names: &[String]) -> CloudResult<Vec<LoadBalancerInfo>> {
        let state = self.state().await;
        Ok(state
            .load_balancers
            .values()
            .filter(|lb| names.is_empty() || names.contains(&lb.name))
            .map(|lb| LoadBalancerInfo {
                tags: state.tags_of(SCOPE, &lb.arn),
                ..lb.clone()
            })
            .collect())
    }

    async fn create_load_balancer(
        &self,
        request: &LoadBalancerInfo,
    ) -> CloudResult<LoadBalancerInfo> {
        let mut state = self.state().await;
        if state.load_balancers.values().any(|lb| lb.name == request.name) {
            return Err(duplicate(&request.name));
        }
        let suffix = state.next_id("net");
        state.record(format!("CreateLoadBalancer {}", request.name));
        let arn = state.arn(
            "elasticloadbalancing",
            &format!("loadbalancer/net/{}/{}", request.name, suffix),
        );
        let lb = LoadBalancerInfo {
            arn: arn.clone(),
            dns_name: format!("{}-{}.elb.us-east-1.amazonaws.com", request.name, state.counter),
            hosted_zone_id: NETWORK_ZONE_ID.to_string(),
            state: "active".to_string(),
            ..request.clone()
        };
        state.load_balancers.insert(arn.clone(), lb.clone());
        state.set_tags(SCOPE, &arn, &request.tags);
        Ok(lb)
    }

    async fn set_subnets(&self, arn: &str, subnet_ids: &[String]) -> CloudResult<()> {
        let mut state = self.state().await;
        state.record(format!("SetSubnets {}", arn));
        let lb = state
            .load_balancers
            .get_mut(arn)
            .ok_or_else(|| not_found("LoadBalancerNotFound", arn))?;
        lb.subnet_ids = subnet_ids.to_vec();
        Ok(())
    }

    async fn set_cross_zone(&self, arn: &str, enabled: bool) -> CloudResult<()> {
        let mut state = self.state().await;
        state.record(format!("ModifyLoadBalancerAttributes {}", arn));
        let lb = state
            .load_balancers
            .get_mut(arn)
            .ok_or_else(|| not_found("LoadBalancerNotFound", arn))?;
        lb.cross_zone = enabled;
        Ok(())
    }

    async fn describe_listeners(&self, load_balancer_arn: &str) -> CloudResult<Vec<ListenerInfo>> {
        let state = self.state().await;
        Ok(state
            .listeners
            .values()
            .filter(|l| l.load_balancer_arn == load_balancer_arn)
            .cloned()
            .collect())
    }

    async fn create_listener(&self, request: &ListenerInfo) -> CloudResult<ListenerInfo> {
        let mut state = self.state().await;
        if !state.load_balancers.contains_key(&request.load_balancer_arn) {
            return Err(not_found("LoadBalancerNotFound", &request.load_balancer_arn));
        }
        if !state.target_groups.contains_key(&request.target_group_arn) {
            return Err(not_found("TargetGroupNotFound", &request.target_group_arn));
        }
        let suffix = state.next_id("listener");
        state.record(format!("CreateListener {}", request.port));
        let arn = format!("{}/{}", request.load_balancer_arn.replace(":loadbalancer/", ":listener/"), suffix);
        let listener = ListenerInfo {
            arn: arn.clone(),
            ..request.clone()
        };
        state.listeners.insert(arn, listener.clone());
        Ok(listener)
    }

    async fn modify_listener(&self, request: &ListenerInfo) -> CloudResult<()> {
        let mut state = self.state().await;
        state.record(format!("ModifyListener {}", request.arn));
        let listener = state
            .listeners
            .get_mut(&request.arn)
            .ok_or_else(|| not_found("ListenerNotFound", &request.arn))?;
        *listener = request.clone();
        Ok(())
    }

    async fn delete_listener(&self, arn: &str) -> CloudResult<()> {
        let mut state = self.state().await;
        state.record(format!("DeleteListener {}", arn));
        state
            .listeners
            .remove(arn)
            .map(|_| ())
            .ok_or_else(|| not_found("ListenerNotFound", arn))
    }

    async fn describe_target_groups(&self, names: &[String]) -> CloudResult<Vec<TargetGroupInfo>> {
        let state = self.state().await;
        Ok(state
            .target_groups
            .values()
            .filter(|tg| names.is_empty() || names.contains(&tg.name))
            .map(|tg| TargetGroupInfo {
                tags: state.tags_of(SCOPE, &tg.arn),
                ..tg.clone()
            })
            .collect())
    }

    async fn create_target_group(&self, request: &TargetGroupInfo) -> CloudResult<TargetGroupInfo> {
        let mut state = self.state().await;
        if state.target_groups.values().any(|tg| tg.name == request.name) {
            return Err(ProviderError::new(
                "DuplicateTargetGroupName",
                format!("{} already exists", request.name),
            ));
        }
        let suffix = state.next_id("tg");
        state.record(format!("CreateTargetGroup {}", request.name));
        let arn = state.arn(
            "elasticloadbalancing",
            &format!("targetgroup/{}/{}", request.name, suffix),
        );
        let group = TargetGroupInfo {
            arn: arn.clone(),
            ..request.clone()
        };
        state.target_groups.insert(arn.clone(), group.clone());
        state.set_tags(SCOPE, &arn, &request.tags);
        Ok(group)
    }

    async fn modify_target_group(
        &self,
        arn: &str,
        check: &TargetGroupHealthCheck,
    ) -> CloudResult<()> {
        let mut state = self.state().await;
        state.record(format!("ModifyTargetGroup {}", arn));
        let group = state
            .target_groups
            .get_mut(arn)
            .ok_or_else(|| not_found("TargetGroupNotFound", arn))?;
        if let Some(v) = &check.protocol {
            group.health_check_protocol = v.clone();
        }
        if check.path.is_some() {
            group.health_check_path = check.path.clone();
        }
        if let Some(v) = check.healthy_threshold {
            group.healthy_threshold = v;
        }
        if let Some(v) = check.unhealthy_threshold {
            group.unhealthy_threshold = v;
        }
        if let Some(v) = check.interval {
            group.interval = v;
        }
        Ok(())
    }
}
