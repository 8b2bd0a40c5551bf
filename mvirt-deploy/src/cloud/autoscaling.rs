//! Autoscaling capability group: groups, launch configurations and templates,
//! warm pools, lifecycle hooks.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::CloudResult;
use crate::model::Tags;

/// Instance settings shared by launch configurations and launch templates.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LaunchSpec {
    pub image_id: String,
    pub instance_type: String,
    pub key_name: Option<String>,
    pub security_group_ids: Vec<String>,
    pub iam_instance_profile: Option<String>,
    pub user_data: Option<String>,
    pub associate_public_ip: Option<bool>,
    pub spot_price: Option<String>,
    pub root_volume_size: Option<i64>,
    pub root_volume_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LaunchConfigurationInfo {
    pub name: String,
    pub created: DateTime<Utc>,
    pub spec: LaunchSpec,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LaunchTemplateInfo {
    pub id: String,
    pub name: String,
    pub created: DateTime<Utc>,
    pub spec: LaunchSpec,
    pub tags: Tags,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WarmPoolInfo {
    pub min_size: i64,
    pub max_group_prepared_capacity: Option<i64>,
    /// `Stopped`, `Running`, or `Hibernated`.
    pub pool_state: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AutoscalingGroupInfo {
    pub name: String,
    pub arn: String,
    pub min_size: i64,
    pub max_size: i64,
    pub launch_configuration_name: Option<String>,
    pub launch_template_id: Option<String>,
    pub subnet_ids: Vec<String>,
    pub load_balancer_names: Vec<String>,
    pub target_group_arns: Vec<String>,
    pub suspended_processes: Vec<String>,
    pub max_instance_lifetime: Option<i64>,
    pub warm_pool: Option<WarmPoolInfo>,
    pub tags: Tags,
}

/// Field-selective group update.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AutoscalingGroupUpdate {
    pub min_size: Option<i64>,
    pub max_size: Option<i64>,
    pub launch_configuration_name: Option<String>,
    pub launch_template_id: Option<String>,
    pub subnet_ids: Option<Vec<String>>,
    pub max_instance_lifetime: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LifecycleHookInfo {
    pub name: String,
    pub group_name: String,
    pub transition: String,
    pub default_result: String,
    pub heartbeat_timeout: i64,
}

#[async_trait]
pub trait Autoscaling: Send + Sync {
    async fn describe_launch_configurations(&self) -> CloudResult<Vec<LaunchConfigurationInfo>>;
    async fn create_launch_configuration(&self, name: &str, spec: &LaunchSpec) -> CloudResult<()>;
    async fn delete_launch_configuration(&self, name: &str) -> CloudResult<()>;

    async fn describe_launch_templates(&self) -> CloudResult<Vec<LaunchTemplateInfo>>;
    async fn create_launch_template(
        &self,
        name: &str,
        spec: &LaunchSpec,
        tags: &Tags,
    ) -> CloudResult<LaunchTemplateInfo>;
    async fn delete_launch_template(&self, id: &str) -> CloudResult<()>;

    /// All groups when `names` is empty.
    async fn describe_auto_scaling_groups(
        &self,
        names: &[String],
    ) -> CloudResult<Vec<AutoscalingGroupInfo>>;
    async fn create_auto_scaling_group(&self, request: &AutoscalingGroupInfo) -> CloudResult<()>;
    async fn update_auto_scaling_group(
        &self,
        name: &str,
        update: &AutoscalingGroupUpdate,
    ) -> CloudResult<()>;
    async fn attach_load_balancers(&self, name: &str, load_balancers: &[String]) -> CloudResult<()>;
    async fn detach_load_balancers(&self, name: &str, load_balancers: &[String]) -> CloudResult<()>;
    async fn attach_target_groups(&self, name: &str, target_groups: &[String]) -> CloudResult<()>;
    async fn detach_target_groups(&self, name: &str, target_groups: &[String]) -> CloudResult<()>;
    async fn suspend_processes(&self, name: &str, processes: &[String]) -> CloudResult<()>;
    async fn resume_processes(&self, name: &str, processes: &[String]) -> CloudResult<()>;
    async fn put_warm_pool(&self, name: &str, pool: &WarmPoolInfo) -> CloudResult<()>;
    async fn delete_warm_pool(&self, name: &str) -> CloudResult<()>;

    async fn describe_lifecycle_hooks(&self, group_name: &str)
        -> CloudResult<Vec<LifecycleHookInfo>>;
    async fn put_lifecycle_hook(&self, hook: &LifecycleHookInfo) -> CloudResult<()>;
}
