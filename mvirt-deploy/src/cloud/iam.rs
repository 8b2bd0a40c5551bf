//! Identity capability group. Lookups by name return `None` when absent.

use async_trait::async_trait;

use super::CloudResult;
use crate::model::Tags;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoleInfo {
    pub name: String,
    pub id: String,
    pub arn: String,
    pub path: String,
    pub assume_role_policy: String,
    pub permissions_boundary: Option<String>,
    pub tags: Tags,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct InstanceProfileInfo {
    pub name: String,
    pub id: String,
    pub arn: String,
    pub path: String,
    pub role_names: Vec<String>,
    pub tags: Tags,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OidcProviderInfo {
    pub arn: String,
    pub url: String,
    pub client_ids: Vec<String>,
    pub thumbprints: Vec<String>,
    pub tags: Tags,
}

#[async_trait]
pub trait Iam: Send + Sync {
    async fn get_role(&self, name: &str) -> CloudResult<Option<RoleInfo>>;
    async fn create_role(&self, request: &RoleInfo) -> CloudResult<RoleInfo>;
    async fn update_assume_role_policy(&self, name: &str, document: &str) -> CloudResult<()>;
    async fn put_role_permissions_boundary(&self, name: &str, arn: Option<&str>) -> CloudResult<()>;

    async fn get_role_policy(&self, role: &str, policy: &str) -> CloudResult<Option<String>>;
    async fn put_role_policy(&self, role: &str, policy: &str, document: &str) -> CloudResult<()>;

    async fn get_instance_profile(&self, name: &str) -> CloudResult<Option<InstanceProfileInfo>>;
    async fn create_instance_profile(
        &self,
        name: &str,
        path: &str,
        tags: &Tags,
    ) -> CloudResult<InstanceProfileInfo>;
    async fn add_role_to_instance_profile(&self, profile: &str, role: &str) -> CloudResult<()>;

    async fn list_open_id_connect_providers(&self) -> CloudResult<Vec<OidcProviderInfo>>;
    async fn create_open_id_connect_provider(
        &self,
        request: &OidcProviderInfo,
    ) -> CloudResult<OidcProviderInfo>;
    async fn update_thumbprints(&self, arn: &str, thumbprints: &[String]) -> CloudResult<()>;
    async fn set_client_ids(&self, arn: &str, client_ids: &[String]) -> CloudResult<()>;
}
