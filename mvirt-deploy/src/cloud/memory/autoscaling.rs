use async_trait::async_trait;

use super::{not_found, MemoryCloud};
use crate::cloud::autoscaling::{
    Autoscaling, AutoscalingGroupInfo, AutoscalingGroupUpdate, LaunchConfigurationInfo,
    LaunchSpec, LaunchTemplateInfo, LifecycleHookInfo, WarmPoolInfo,
};
use crate::cloud::{CloudResult, TagScope};
use crate::error::ProviderError;
use crate::model::Tags;

fn in_use(what: &str, by: &str) -> ProviderError {
    ProviderError::new(
        "ResourceInUse",
        format!("{} is in use by autoscaling group {}", what, by),
    )
}

#[async_trait]
impl Autoscaling for MemoryCloud {
    async fn describe_launch_configurations(&self) -> CloudResult<Vec<LaunchConfigurationInfo>> {
        let state = self.state().await;
        Ok(state.launch_configurations.values().cloned().collect())
    }

    async fn create_launch_configuration(&self, name: &str, spec: &LaunchSpec) -> CloudResult<()> {
        let created = (self.clock)();
        let mut state = self.state().await;
        state.check_instance_profile(spec.iam_instance_profile.as_deref())?;
        if state.launch_configurations.contains_key(name) {
            return Err(ProviderError::new(
                "AlreadyExists",
                format!("launch configuration {} already exists", name),
            ));
        }
        state.record(format!("CreateLaunchConfiguration {}", name));
        state.launch_configurations.insert(
            name.to_string(),
            LaunchConfigurationInfo {
                name: name.to_string(),
                created,
                spec: spec.clone(),
            },
        );
        Ok(())
    }

    async fn delete_launch_configuration(&self, name: &str) -> CloudResult<()> {
        let mut state = self.state().await;
        if let Some(group) = state
            .groups
            .values()
            .find(|g| g.launch_configuration_name.as_deref() == Some(name))
        {
            return Err(in_use(name, &group.name));
        }
        state.record(format!("DeleteLaunchConfiguration {}", name));
        state
            .launch_configurations
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| not_found("ValidationError", name))
    }

    async fn describe_launch_templates(&self) -> CloudResult<Vec<LaunchTemplateInfo>> {
        let state = self.state().await;
        Ok(state
            .launch_templates
            .values()
            .map(|t| LaunchTemplateInfo {
                tags: state.tags_of(TagScope::Compute, &t.id),
                ..t.clone()
            })
            .collect())
    }

    async fn create_launch_template(
        &self,
        name: &str,
        spec: &LaunchSpec,
        tags: &Tags,
    ) -> CloudResult<LaunchTemplateInfo> {
        let created = (self.clock)();
        let mut state = self.state().await;
        state.check_instance_profile(spec.iam_instance_profile.as_deref())?;
        if state.launch_templates.values().any(|t| t.name == name) {
            return Err(ProviderError::new(
                "InvalidLaunchTemplateName.AlreadyExistsException",
                format!("launch template {} already exists", name),
            ));
        }
        let id = state.next_id("lt");
        state.record(format!("CreateLaunchTemplate {}", name));
        let template = LaunchTemplateInfo {
            id: id.clone(),
            name: name.to_string(),
            created,
            spec: spec.clone(),
            tags: tags.clone(),
        };
        state.launch_templates.insert(id.clone(), template.clone());
        state.set_tags(TagScope::Compute, &id, tags);
        Ok(template)
    }

    async fn delete_launch_template(&self, id: &str) -> CloudResult<()> {
        let mut state = self.state().await;
        if let Some(group) = state
            .groups
            .values()
            .find(|g| g.launch_template_id.as_deref() == Some(id))
        {
            return Err(in_use(id, &group.name));
        }
        state.record(format!("DeleteLaunchTemplate {}", id));
        state
            .launch_templates
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| not_found("InvalidLaunchTemplateId.NotFound", id))
    }

    async fn describe_auto_scaling_groups(
        &self,
        names: &[String],
    ) -> CloudResult<Vec<AutoscalingGroupInfo>> {
        let state = self.state().await;
        Ok(state
            .groups
            .values()
            .filter(|g| names.is_empty() || names.contains(&g.name))
            .map(|g| AutoscalingGroupInfo {
                tags: state.tags_of(TagScope::Autoscaling, &g.name),
                ..g.clone()
            })
            .collect())
    }

    async fn create_auto_scaling_group(&self, request: &AutoscalingGroupInfo) -> CloudResult<()> {
        let mut state = self.state().await;
        if state.groups.contains_key(&request.name) {
            return Err(ProviderError::new(
                "AlreadyExists",
                format!("autoscaling group {} already exists", request.name),
            ));
        }
        if let Some(lc) = &request.launch_configuration_name {
            if !state.launch_configurations.contains_key(lc) {
                return Err(ProviderError::new(
                    "ValidationError",
                    format!("Launch configuration name not found - {} does not exist", lc),
                ));
            }
        }
        state.record(format!("CreateAutoScalingGroup {}", request.name));
        let arn = state.arn(
            "autoscaling",
            &format!("autoScalingGroup:{}", request.name),
        );
        state.groups.insert(
            request.name.clone(),
            AutoscalingGroupInfo {
                arn,
                tags: Tags::new(),
                ..request.clone()
            },
        );
        state.set_tags(TagScope::Autoscaling, &request.name, &request.tags);
        Ok(())
    }

    async fn update_auto_scaling_group(
        &self,
        name: &str,
        update: &AutoscalingGroupUpdate,
    ) -> CloudResult<()> {
        let mut state = self.state().await;
        if let Some(lc) = &update.launch_configuration_name {
            if !state.launch_configurations.contains_key(lc) {
                return Err(not_found("ValidationError", lc));
            }
        }
        state.record(format!("UpdateAutoScalingGroup {}", name));
        let group = state
            .groups
            .get_mut(name)
            .ok_or_else(|| not_found("ValidationError", name))?;
        if let Some(v) = update.min_size {
            group.min_size = v;
        }
        if let Some(v) = update.max_size {
            group.max_size = v;
        }
        if let Some(lc) = &update.launch_configuration_name {
            group.launch_configuration_name = Some(lc.clone());
            group.launch_template_id = None;
        }
        if let Some(lt) = &update.launch_template_id {
            group.launch_template_id = Some(lt.clone());
            group.launch_configuration_name = None;
        }
        if let Some(subnets) = &update.subnet_ids {
            group.subnet_ids = subnets.clone();
        }
        if update.max_instance_lifetime.is_some() {
            group.max_instance_lifetime = update.max_instance_lifetime;
        }
        Ok(())
    }

    async fn attach_load_balancers(&self, name: &str, load_balancers: &[String]) -> CloudResult<()> {
        let mut state = self.state().await;
        state.record(format!("AttachLoadBalancers {}", name));
        let group = state
            .groups
            .get_mut(name)
            .ok_or_else(|| not_found("ValidationError", name))?;
        for lb in load_balancers {
            if !group.load_balancer_names.contains(lb) {
                group.load_balancer_names.push(lb.clone());
            }
        }
        Ok(())
    }

    async fn detach_load_balancers(&self, name: &str, load_balancers: &[String]) -> CloudResult<()> {
        let mut state = self.state().await;
        state.record(format!("DetachLoadBalancers {}", name));
        let group = state
            .groups
            .get_mut(name)
            .ok_or_else(|| not_found("ValidationError", name))?;
        group.load_balancer_names.retain(|lb| !load_balancers.contains(lb));
        Ok(())
    }

    async fn attach_target_groups(&self, name: &str, target_groups: &[String]) -> CloudResult<()> {
        let mut state = self.state().await;
        state.record(format!("AttachLoadBalancerTargetGroups {}", name));
        let group = state
            .groups
            .get_mut(name)
            .ok_or_else(|| not_found("ValidationError", name))?;
        for tg in target_groups {
            if !group.target_group_arns.contains(tg) {
                group.target_group_arns.push(tg.clone());
            }
        }
        Ok(())
    }

    async fn detach_target_groups(&self, name: &str, target_groups: &[String]) -> CloudResult<()> {
        let mut state = self.state().await;
        state.record(format!("DetachLoadBalancerTargetGroups {}", name));
        let group = state
            .groups
            .get_mut(name)
            .ok_or_else(|| not_found("ValidationError", name))?;
        group.target_group_arns.retain(|tg| !target_groups.contains(tg));
        Ok(())
    }

    async fn suspend_processes(&self, name: &str, processes: &[String]) -> CloudResult<()> {
        let mut state = self.state().await;
        state.record(format!("SuspendProcesses {}", name));
        let group = state
            .groups
            .get_mut(name)
            .ok_or_else(|| not_found("ValidationError", name))?;
        for p in processes {
            if !group.suspended_processes.contains(p) {
                group.suspended_processes.push(p.clone());
            }
        }
        Ok(())
    }

    async fn resume_processes(&self, name: &str, processes: &[String]) -> CloudResult<()> {
        let mut state = self.state().await;
        state.record(format!("ResumeProcesses {}", name));
        let group = state
            .groups
            .get_mut(name)
            .ok_or_else(|| not_found("ValidationError", name))?;
        group.suspended_processes.retain(|p| !processes.contains(p));
        Ok(())
    }

    async fn put_warm_pool(&self, name: &str, pool: &WarmPoolInfo) -> CloudResult<()> {
        let mut state = self.state().await;
        state.record(format!("PutWarmPool {}", name));
        let group = state
            .groups
            .get_mut(name)
            .ok_or_else(|| not_found("ValidationError", name))?;
        group.warm_pool = Some(pool.clone());
        Ok(())
    }

    async fn delete_warm_pool(&self, name: &str) -> CloudResult<()> {
        let mut state = self.state().await;
        state.record(format!("DeleteWarmPool {}", name));
        let group = state
            .groups
            .get_mut(name)
            .ok_or_else(|| not_found("ValidationError", name))?;
        group.warm_pool = None;
        Ok(())
    }

    async fn describe_lifecycle_hooks(
        &self,
        group_name: &str,
    ) -> CloudResult<Vec<LifecycleHookInfo>> {
        let state = self.state().await;
        Ok(state
            .lifecycle_hooks
            .values()
            .filter(|h| h.group_name == group_name)
            .cloned()
            .collect())
    }

    async fn put_lifecycle_hook(&self, hook: &LifecycleHookInfo) -> CloudResult<()> {
        let mut state = self.state().await;
        if !state.groups.contains_key(&hook.group_name) {
            return Err(not_found("ValidationError", &hook.group_name));
        }
        state.record(format!("PutLifecycleHook {}", hook.name));
        state
            .lifecycle_hooks
            .insert((hook.group_name.clone(), hook.name.clone()), hook.clone());
        Ok(())
    }
}
