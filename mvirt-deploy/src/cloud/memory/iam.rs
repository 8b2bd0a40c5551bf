use async_trait::async_trait;

use super::{not_found, MemoryCloud};
use crate::cloud::iam::{Iam, InstanceProfileInfo, OidcProviderInfo, RoleInfo};
use crate::cloud::{CloudResult, TagScope};
use crate::error::ProviderError;
use crate::model::Tags;

const SCOPE: TagScope = TagScope::Iam;

fn exists(what: &str) -> ProviderError {
    ProviderError::new("EntityAlreadyExists", format!("{} already exists", what))
}

#[async_trait]
impl Iam for MemoryCloud {
    async fn get_role(&self, name: &str) -> CloudResult<Option<RoleInfo>> {
        let state = self.state().await;
        Ok(state.roles.get(name).map(|r| RoleInfo {
            tags: state.tags_of(SCOPE, &r.arn),
            ..r.clone()
        }))
    }

    async fn create_role(&self, request: &RoleInfo) -> CloudResult<RoleInfo> {
        let mut state = self.state().await;
        if state.roles.contains_key(&request.name) {
            return Err(exists(&request.name));
        }
        let id = state.next_id("AROA").to_uppercase();
        state.record(format!("CreateRole {}", request.name));
        let arn = state.global_arn("iam", &format!("role{}{}", request.path, request.name));
        let role = RoleInfo {
            id,
            arn: arn.clone(),
            ..request.clone()
        };
        state.roles.insert(request.name.clone(), role.clone());
        state.set_tags(SCOPE, &arn, &request.tags);
        Ok(role)
    }

    async fn update_assume_role_policy(&self, name: &str, document: &str) -> CloudResult<()> {
        let mut state = self.state().await;
        state.record(format!("UpdateAssumeRolePolicy {}", name));
        let role = state
            .roles
            .get_mut(name)
            .ok_or_else(|| not_found("NoSuchEntity", name))?;
        role.assume_role_policy = document.to_string();
        Ok(())
    }

    async fn put_role_permissions_boundary(&self, name: &str, arn: Option<&str>) -> CloudResult<()> {
        let mut state = self.state().await;
        state.record(format!("PutRolePermissionsBoundary {}", name));
        let role = state
            .roles
            .get_mut(name)
            .ok_or_else(|| not_found("NoSuchEntity", name))?;
        role.permissions_boundary = arn.map(str::to_string);
        Ok(())
    }

    async fn get_role_policy(&self, role: &str, policy: &str) -> CloudResult<Option<String>> {
        let state = self.state().await;
        Ok(state
            .role_policies
            .get(&(role.to_string(), policy.to_string()))
            .cloned())
    }

    async fn put_role_policy(&self, role: &str, policy: &str, document: &str) -> CloudResult<()> {
        let mut state = self.state().await;
        if !state.roles.contains_key(role) {
            return Err(not_found("NoSuchEntity", role));
        }
        state.record(format!("PutRolePolicy {} {}", role, policy));
        state
            .role_policies
            .insert((role.to_string(), policy.to_string()), document.to_string());
        Ok(())
    }

    async fn get_instance_profile(&self, name: &str) -> CloudResult<Option<InstanceProfileInfo>> {
        let state = self.state().await;
        Ok(state.instance_profiles.get(name).map(|p| InstanceProfileInfo {
            tags: state.tags_of(SCOPE, &p.arn),
            ..p.clone()
        }))
    }

    async fn create_instance_profile(
        &self,
        name: &str,
        path: &str,
        tags: &Tags,
    ) -> CloudResult<InstanceProfileInfo> {
        let mut state = self.state().await;
        if state.instance_profiles.contains_key(name) {
            return Err(exists(name));
        }
        let id = state.next_id("AIPA").to_uppercase();
        state.record(format!("CreateInstanceProfile {}", name));
        let arn = state.global_arn("iam", &format!("instance-profile{}{}", path, name));
        let profile = InstanceProfileInfo {
            name: name.to_string(),
            id,
            arn: arn.clone(),
            path: path.to_string(),
            role_names: Vec::new(),
            tags: tags.clone(),
        };
        state.instance_profiles.insert(name.to_string(), profile.clone());
        state.set_tags(SCOPE, &arn, tags);
        Ok(profile)
    }

    async fn add_role_to_instance_profile(&self, profile: &str, role: &str) -> CloudResult<()> {
        let mut state = self.state().await;
        if !state.roles.contains_key(role) {
            return Err(not_found("NoSuchEntity", role));
        }
        state.record(format!("AddRoleToInstanceProfile {} {}", profile, role));
        let entry = state
            .instance_profiles
            .get_mut(profile)
            .ok_or_else(|| not_found("NoSuchEntity", profile))?;
        if !entry.role_names.is_empty() {
            return Err(ProviderError::new(
                "LimitExceeded",
                "Cannot exceed quota for InstanceSessionsPerInstanceProfile: 1",
            ));
        }
        entry.role_names.push(role.to_string());
        Ok(())
    }

    async fn list_open_id_connect_providers(&self) -> CloudResult<Vec<OidcProviderInfo>> {
        let state = self.state().await;
        Ok(state
            .oidc_providers
            .values()
            .map(|p| OidcProviderInfo {
                tags: state.tags_of(SCOPE, &p.arn),
                ..p.clone()
            })
            .collect())
    }

    async fn create_open_id_connect_provider(
        &self,
        request: &OidcProviderInfo,
    ) -> CloudResult<OidcProviderInfo> {
        let mut state = self.state().await;
        let host = request.url.trim_start_matches("https://");
        let arn = state.global_arn("iam", &format!("oidc-provider/{}", host));
        if state.oidc_providers.contains_key(&arn) {
            return Err(exists(&request.url));
        }
        state.record(format!("CreateOpenIDConnectProvider {}", host));
        let provider = OidcProviderInfo {
            arn: arn.clone(),
            ..request.clone()
        };
        state.oidc_providers.insert(arn.clone(), provider.clone());
        state.set_tags(SCOPE, &arn, &request.tags);
        Ok(provider)
    }

    async fn update_thumbprints(&self, arn: &str, thumbprints: &[String]) -> CloudResult<()> {
        let mut state = self.state().await;
        state.record(format!("UpdateOpenIDConnectProviderThumbprint {}", arn));
        let provider = state
            .oidc_providers
            .get_mut(arn)
            .ok_or_else(|| not_found("NoSuchEntity", arn))?;
        provider.thumbprints = thumbprints.to_vec();
        Ok(())
    }

    async fn set_client_ids(&self, arn: &str, client_ids: &[String]) -> CloudResult<()> {
        let mut state = self.state().await;
        state.record(format!("SetOpenIDConnectProviderClientIds {}", arn));
        let provider = state
            .oidc_providers
            .get_mut(arn)
            .ok_or_else(|| not_found("NoSuchEntity", arn))?;
        provider.client_ids = client_ids.to_vec();
        Ok(())
    }
}
