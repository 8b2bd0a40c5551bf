//! Load balancing capability group: classic and network load balancers,
//! listeners, target groups.

use async_trait::async_trait;

use super::CloudResult;
use crate::model::Tags;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClassicListenerInfo {
    pub load_balancer_port: i64,
    pub instance_port: i64,
    pub protocol: String,
    pub instance_protocol: String,
    pub ssl_certificate_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct HealthCheckInfo {
    pub target: String,
    pub healthy_threshold: i64,
    pub unhealthy_threshold: i64,
    pub interval: i64,
    pub timeout: i64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AccessLogInfo {
    pub enabled: bool,
    pub bucket: Option<String>,
    pub prefix: Option<String>,
    pub emit_interval: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClassicAttributes {
    pub cross_zone: bool,
    pub idle_timeout: i64,
    pub connection_draining_enabled: bool,
    pub connection_draining_timeout: i64,
    pub access_log: Option<AccessLogInfo>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClassicLoadBalancerInfo {
    pub name: String,
    pub dns_name: String,
    pub hosted_zone_id: String,
    pub scheme: String,
    pub subnet_ids: Vec<String>,
    pub security_group_ids: Vec<String>,
    pub listeners: Vec<ClassicListenerInfo>,
    pub health_check: Option<HealthCheckInfo>,
    pub attributes: ClassicAttributes,
    pub tags: Tags,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadBalancerInfo {
    pub arn: String,
    pub name: String,
    pub dns_name: String,
    pub hosted_zone_id: String,
    pub scheme: String,
    pub subnet_ids: Vec<String>,
    pub cross_zone: bool,
    /// `provisioning`, `active`, `failed`.
    pub state: String,
    pub tags: Tags,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListenerInfo {
    pub arn: String,
    pub load_balancer_arn: String,
    pub port: i64,
    pub protocol: String,
    pub target_group_arn: String,
    pub certificate_arn: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TargetGroupInfo {
    pub arn: String,
    pub name: String,
    pub port: i64,
    pub protocol: String,
    pub vpc_id: String,
    pub health_check_protocol: String,
    pub health_check_path: Option<String>,
    pub healthy_threshold: i64,
    pub unhealthy_threshold: i64,
    pub interval: i64,
    pub tags: Tags,
}

/// Health check settings of a target group.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TargetGroupHealthCheck {
    pub protocol: Option<String>,
    pub path: Option<String>,
    pub healthy_threshold: Option<i64>,
    pub unhealthy_threshold: Option<i64>,
    pub interval: Option<i64>,
}

#[async_trait]
pub trait LoadBalancing: Send + Sync {
    async fn describe_classic_load_balancers(
        &self,
        names: &[String],
    ) -> CloudResult<Vec<ClassicLoadBalancerInfo>>;
    async fn create_classic_load_balancer(
        &self,
        request: &ClassicLoadBalancerInfo,
    ) -> CloudResult<ClassicLoadBalancerInfo>;
    async fn set_classic_listeners(
        &self,
        name: &str,
        listeners: &[ClassicListenerInfo],
    ) -> CloudResult<()>;
    async fn set_classic_subnets(&self, name: &str, subnet_ids: &[String]) -> CloudResult<()>;
    async fn set_classic_security_groups(&self, name: &str, group_ids: &[String])
        -> CloudResult<()>;
    async fn configure_health_check(&self, name: &str, check: &HealthCheckInfo) -> CloudResult<()>;
    async fn modify_classic_attributes(
        &self,
        name: &str,
        attributes: &ClassicAttributes,
    ) -> CloudResult<()>;

    async fn describe_load_balancers(&self, names: &[String]) -> CloudResult<Vec<LoadBalancerInfo>>;
    async fn create_load_balancer(&self, request: &LoadBalancerInfo)
        -> CloudResult<LoadBalancerInfo>;
    async fn set_subnets(&self, arn: &str, subnet_ids: &[String]) -> CloudResult<()>;
    async fn set_cross_zone(&self, arn: &str, enabled: bool) -> CloudResult<()>;

    async fn describe_listeners(&self, load_balancer_arn: &str) -> CloudResult<Vec<ListenerInfo>>;
    async fn create_listener(&self, request: &ListenerInfo) -> CloudResult<ListenerInfo>;
    async fn modify_listener(&self, request: &ListenerInfo) -> CloudResult<()>;
    async fn delete_listener(&self, arn: &str) -> CloudResult<()>;

    async fn describe_target_groups(&self, names: &[String]) -> CloudResult<Vec<TargetGroupInfo>>;
    async fn create_target_group(&self, request: &TargetGroupInfo) -> CloudResult<TargetGroupInfo>;
    async fn modify_target_group(&self, arn: &str, check: &TargetGroupHealthCheck)
        -> CloudResult<()>;
}
