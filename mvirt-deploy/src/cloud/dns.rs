//! DNS capability group: hosted zones and record sets.

use async_trait::async_trait;

use super::CloudResult;
use crate::model::Tags;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct HostedZoneInfo {
    pub id: String,
    /// Fully qualified, with trailing dot.
    pub name: String,
    pub private: bool,
    pub vpc_ids: Vec<String>,
    pub comment: Option<String>,
    pub tags: Tags,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AliasTargetInfo {
    pub dns_name: String,
    pub hosted_zone_id: String,
    pub evaluate_target_health: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordSetInfo {
    /// Fully qualified, with trailing dot.
    pub name: String,
    pub record_type: String,
    pub ttl: Option<i64>,
    pub values: Vec<String>,
    pub alias: Option<AliasTargetInfo>,
}

/// Normalize a DNS name to its fully qualified form.
pub fn fqdn(name: &str) -> String {
    if name.ends_with('.') {
        name.to_string()
    } else {
        format!("{}.", name)
    }
}

#[async_trait]
pub trait Dns: Send + Sync {
    async fn list_hosted_zones_by_name(&self, name: &str) -> CloudResult<Vec<HostedZoneInfo>>;
    async fn get_hosted_zone(&self, id: &str) -> CloudResult<Option<HostedZoneInfo>>;
    async fn create_hosted_zone(&self, request: &HostedZoneInfo) -> CloudResult<HostedZoneInfo>;
    async fn associate_vpc_with_hosted_zone(&self, zone_id: &str, vpc_id: &str) -> CloudResult<()>;

    async fn list_resource_record_sets(&self, zone_id: &str) -> CloudResult<Vec<RecordSetInfo>>;
    /// Create or replace the record set with the same name and type.
    async fn upsert_record_set(&self, zone_id: &str, record: &RecordSetInfo) -> CloudResult<()>;
}
