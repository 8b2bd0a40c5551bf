//! Compute capability group: networking, instances, volumes, key pairs.

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use super::{CloudResult, Filter};
use crate::model::Tags;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct VpcInfo {
    pub id: String,
    pub cidr_block: String,
    pub enable_dns_hostnames: bool,
    pub enable_dns_support: bool,
    pub dhcp_options_id: Option<String>,
    pub tags: Tags,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DhcpOptionsInfo {
    pub id: String,
    pub domain_name: Option<String>,
    pub domain_name_servers: Vec<String>,
    pub ntp_servers: Vec<String>,
    pub tags: Tags,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubnetInfo {
    pub id: String,
    pub vpc_id: String,
    pub cidr_block: String,
    pub ipv6_cidr_block: Option<String>,
    pub availability_zone: String,
    pub map_public_ip_on_launch: bool,
    pub tags: Tags,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct InternetGatewayInfo {
    pub id: String,
    pub attached_vpc_ids: Vec<String>,
    pub tags: Tags,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EgressOnlyInternetGatewayInfo {
    pub id: String,
    pub vpc_id: String,
    pub tags: Tags,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AddressInfo {
    pub allocation_id: String,
    pub public_ip: String,
    /// `"vpc"` for VPC addresses.
    pub domain: String,
    pub tags: Tags,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NatGatewayInfo {
    pub id: String,
    pub vpc_id: String,
    pub subnet_id: String,
    pub allocation_id: String,
    pub public_ip: String,
    /// `pending`, `available`, `failed`, `deleted`.
    pub state: String,
    pub tags: Tags,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RouteInfo {
    pub destination_cidr_block: Option<String>,
    pub destination_ipv6_cidr_block: Option<String>,
    pub gateway_id: Option<String>,
    pub nat_gateway_id: Option<String>,
    pub egress_only_internet_gateway_id: Option<String>,
    pub instance_id: Option<String>,
    pub transit_gateway_id: Option<String>,
}

impl RouteInfo {
    /// The destination this route matches, IPv4 or IPv6.
    pub fn destination(&self) -> Option<&str> {
        self.destination_cidr_block
            .as_deref()
            .or(self.destination_ipv6_cidr_block.as_deref())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RouteTableAssociationInfo {
    pub id: String,
    pub route_table_id: String,
    pub subnet_id: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RouteTableInfo {
    pub id: String,
    pub vpc_id: String,
    pub routes: Vec<RouteInfo>,
    pub associations: Vec<RouteTableAssociationInfo>,
    pub tags: Tags,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SecurityGroupRuleInfo {
    /// `tcp`, `udp`, `icmp`, or `-1` for all.
    pub protocol: String,
    pub from_port: Option<i64>,
    pub to_port: Option<i64>,
    pub cidr: Option<String>,
    pub ipv6_cidr: Option<String>,
    pub source_group_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SecurityGroupInfo {
    pub id: String,
    pub vpc_id: String,
    pub name: String,
    pub description: String,
    pub ingress: Vec<SecurityGroupRuleInfo>,
    pub egress: Vec<SecurityGroupRuleInfo>,
    pub tags: Tags,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct KeyPairInfo {
    pub id: String,
    pub name: String,
    pub fingerprint: String,
    pub tags: Tags,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct VolumeAttachmentInfo {
    pub instance_id: String,
    pub device: String,
    pub state: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct VolumeInfo {
    pub id: String,
    pub availability_zone: String,
    pub size_gb: i64,
    pub volume_type: String,
    pub iops: Option<i64>,
    pub throughput: Option<i64>,
    pub encrypted: bool,
    pub kms_key_id: Option<String>,
    pub attachments: Vec<VolumeAttachmentInfo>,
    pub tags: Tags,
}

/// Field-selective volume modification.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VolumeModification {
    pub size_gb: Option<i64>,
    pub volume_type: Option<String>,
    pub iops: Option<i64>,
    pub throughput: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct InstanceInfo {
    pub id: String,
    pub image_id: String,
    pub instance_type: String,
    pub subnet_id: String,
    pub private_ip: Option<String>,
    pub public_ip: Option<String>,
    pub security_group_ids: Vec<String>,
    pub key_name: Option<String>,
    pub iam_instance_profile: Option<String>,
    pub user_data: Option<String>,
    pub associate_public_ip: bool,
    /// `pending`, `running`, `stopped`, `terminated`.
    pub state: String,
    pub tags: Tags,
}

/// Fingerprint the provider reports for an imported public key.
pub fn fingerprint(public_key: &str) -> String {
    let material = public_key
        .split_whitespace()
        .nth(1)
        .unwrap_or(public_key.trim());
    let digest = Sha256::digest(material.as_bytes());
    digest
        .iter()
        .take(16)
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(":")
}

#[async_trait]
pub trait Compute: Send + Sync {
    async fn describe_vpcs(&self, filter: &Filter) -> CloudResult<Vec<VpcInfo>>;
    async fn create_vpc(&self, request: &VpcInfo) -> CloudResult<VpcInfo>;
    async fn modify_vpc_attributes(
        &self,
        vpc_id: &str,
        enable_dns_hostnames: Option<bool>,
        enable_dns_support: Option<bool>,
    ) -> CloudResult<()>;

    async fn describe_dhcp_options(&self, filter: &Filter) -> CloudResult<Vec<DhcpOptionsInfo>>;
    async fn create_dhcp_options(&self, request: &DhcpOptionsInfo) -> CloudResult<DhcpOptionsInfo>;
    async fn associate_dhcp_options(&self, dhcp_options_id: &str, vpc_id: &str) -> CloudResult<()>;

    async fn describe_subnets(&self, filter: &Filter) -> CloudResult<Vec<SubnetInfo>>;
    async fn create_subnet(&self, request: &SubnetInfo) -> CloudResult<SubnetInfo>;
    async fn modify_subnet_map_public_ip(&self, subnet_id: &str, enabled: bool) -> CloudResult<()>;

    async fn describe_internet_gateways(
        &self,
        filter: &Filter,
    ) -> CloudResult<Vec<InternetGatewayInfo>>;
    async fn create_internet_gateway(&self, tags: &Tags) -> CloudResult<InternetGatewayInfo>;
    async fn attach_internet_gateway(&self, gateway_id: &str, vpc_id: &str) -> CloudResult<()>;

    async fn describe_egress_only_internet_gateways(
        &self,
        filter: &Filter,
    ) -> CloudResult<Vec<EgressOnlyInternetGatewayInfo>>;
    async fn create_egress_only_internet_gateway(
        &self,
        vpc_id: &str,
        tags: &Tags,
    ) -> CloudResult<EgressOnlyInternetGatewayInfo>;

    /// Filter IDs are allocation IDs.
    async fn describe_addresses(&self, filter: &Filter) -> CloudResult<Vec<AddressInfo>>;
    async fn allocate_address(&self, tags: &Tags) -> CloudResult<AddressInfo>;

    async fn describe_nat_gateways(&self, filter: &Filter) -> CloudResult<Vec<NatGatewayInfo>>;
    async fn create_nat_gateway(
        &self,
        subnet_id: &str,
        allocation_id: &str,
        tags: &Tags,
    ) -> CloudResult<NatGatewayInfo>;

    async fn describe_route_tables(&self, filter: &Filter) -> CloudResult<Vec<RouteTableInfo>>;
    async fn create_route_table(&self, vpc_id: &str, tags: &Tags) -> CloudResult<RouteTableInfo>;
    async fn create_route(&self, route_table_id: &str, route: &RouteInfo) -> CloudResult<()>;
    async fn replace_route(&self, route_table_id: &str, route: &RouteInfo) -> CloudResult<()>;
    /// Returns the association ID.
    async fn associate_route_table(
        &self,
        route_table_id: &str,
        subnet_id: &str,
    ) -> CloudResult<String>;

    async fn describe_security_groups(
        &self,
        filter: &Filter,
    ) -> CloudResult<Vec<SecurityGroupInfo>>;
    async fn create_security_group(
        &self,
        request: &SecurityGroupInfo,
    ) -> CloudResult<SecurityGroupInfo>;
    async fn authorize_ingress(&self, group_id: &str, rule: &SecurityGroupRuleInfo)
        -> CloudResult<()>;
    async fn authorize_egress(&self, group_id: &str, rule: &SecurityGroupRuleInfo) -> CloudResult<()>;

    async fn describe_key_pairs(&self, filter: &Filter) -> CloudResult<Vec<KeyPairInfo>>;
    async fn import_key_pair(
        &self,
        name: &str,
        public_key: &str,
        tags: &Tags,
    ) -> CloudResult<KeyPairInfo>;

    async fn describe_volumes(&self, filter: &Filter) -> CloudResult<Vec<VolumeInfo>>;
    async fn create_volume(&self, request: &VolumeInfo) -> CloudResult<VolumeInfo>;
    async fn modify_volume(&self, volume_id: &str, modification: &VolumeModification)
        -> CloudResult<()>;
    async fn attach_volume(&self, volume_id: &str, instance_id: &str, device: &str)
        -> CloudResult<()>;

    /// Terminated instances are never returned.
    async fn describe_instances(&self, filter: &Filter) -> CloudResult<Vec<InstanceInfo>>;
    async fn run_instance(&self, request: &InstanceInfo) -> CloudResult<InstanceInfo>;
    async fn modify_instance_security_groups(
        &self,
        instance_id: &str,
        group_ids: &[String],
    ) -> CloudResult<()>;
}
