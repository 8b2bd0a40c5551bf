use async_trait::async_trait;

use super::{not_found, MemoryCloud};
use crate::cloud::compute::{
    fingerprint, AddressInfo, Compute, DhcpOptionsInfo, EgressOnlyInternetGatewayInfo,
    InstanceInfo, InternetGatewayInfo, KeyPairInfo, NatGatewayInfo, RouteInfo,
    RouteTableAssociationInfo, RouteTableInfo, SecurityGroupInfo, SecurityGroupRuleInfo,
    SubnetInfo, VolumeAttachmentInfo, VolumeInfo, VolumeModification, VpcInfo,
};
use crate::cloud::{CloudResult, Filter, TagScope};
use crate::error::ProviderError;
use crate::model::Tags;

const SCOPE: TagScope = TagScope::Compute;

#[async_trait]
impl Compute for MemoryCloud {
    async fn describe_vpcs(&self, filter: &Filter) -> CloudResult<Vec<VpcInfo>> {
        let state = self.state().await;
        Ok(state.select(SCOPE, state.vpcs.values(), filter))
    }

    async fn create_vpc(&self, request: &VpcInfo) -> CloudResult<VpcInfo> {
        let mut state = self.state().await;
        let id = state.next_id("vpc");
        state.record(format!("CreateVpc {}", id));
        let vpc = VpcInfo {
            id: id.clone(),
            tags: Tags::new(),
            ..request.clone()
        };
        state.vpcs.insert(id.clone(), vpc.clone());
        state.set_tags(SCOPE, &id, &request.tags);
        Ok(VpcInfo {
            tags: request.tags.clone(),
            ..vpc
        })
    }

    async fn modify_vpc_attributes(
        &self,
        vpc_id: &str,
        enable_dns_hostnames: Option<bool>,
        enable_dns_support: Option<bool>,
    ) -> CloudResult<()> {
        let mut state = self.state().await;
        state.record(format!("ModifyVpcAttribute {}", vpc_id));
        let vpc = state
            .vpcs
            .get_mut(vpc_id)
            .ok_or_else(|| not_found("InvalidVpcID.NotFound", vpc_id))?;
        if let Some(v) = enable_dns_hostnames {
            vpc.enable_dns_hostnames = v;
        }
        if let Some(v) = enable_dns_support {
            vpc.enable_dns_support = v;
        }
        Ok(())
    }

    async fn describe_dhcp_options(&self, filter: &Filter) -> CloudResult<Vec<DhcpOptionsInfo>> {
        let state = self.state().await;
        Ok(state.select(SCOPE, state.dhcp_options.values(), filter))
    }

    async fn create_dhcp_options(&self, request: &DhcpOptionsInfo) -> CloudResult<DhcpOptionsInfo> {
        let mut state = self.state().await;
        let id = state.next_id("dopt");
        state.record(format!("CreateDhcpOptions {}", id));
        let options = DhcpOptionsInfo {
            id: id.clone(),
            ..request.clone()
        };
        state.dhcp_options.insert(id.clone(), options.clone());
        state.set_tags(SCOPE, &id, &request.tags);
        Ok(options)
    }

    async fn associate_dhcp_options(&self, dhcp_options_id: &str, vpc_id: &str) -> CloudResult<()> {
        let mut state = self.state().await;
        state.record(format!("AssociateDhcpOptions {} {}", dhcp_options_id, vpc_id));
        if !state.dhcp_options.contains_key(dhcp_options_id) {
            return Err(not_found("InvalidDhcpOptionID.NotFound", dhcp_options_id));
        }
        let vpc = state
            .vpcs
            .get_mut(vpc_id)
            .ok_or_else(|| not_found("InvalidVpcID.NotFound", vpc_id))?;
        vpc.dhcp_options_id = Some(dhcp_options_id.to_string());
        Ok(())
    }

    async fn describe_subnets(&self, filter: &Filter) -> CloudResult<Vec<SubnetInfo>> {
        let state = self.state().await;
        Ok(state.select(SCOPE, state.subnets.values(), filter))
    }

    async fn create_subnet(&self, request: &SubnetInfo) -> CloudResult<SubnetInfo> {
        let mut state = self.state().await;
        if !state.vpcs.contains_key(&request.vpc_id) {
            return Err(not_found("InvalidVpcID.NotFound", &request.vpc_id));
        }
        let id = state.next_id("subnet");
        state.record(format!("CreateSubnet {}", id));
        let subnet = SubnetInfo {
            id: id.clone(),
            ..request.clone()
        };
        state.subnets.insert(id.clone(), subnet.clone());
        state.set_tags(SCOPE, &id, &request.tags);
        Ok(subnet)
    }

    async fn modify_subnet_map_public_ip(&self, subnet_id: &str, enabled: bool) -> CloudResult<()> {
        let mut state = self.state().await;
        state.record(format!("ModifySubnetAttribute {}", subnet_id));
        let subnet = state
            .subnets
            .get_mut(subnet_id)
            .ok_or_else(|| not_found("InvalidSubnetID.NotFound", subnet_id))?;
        subnet.map_public_ip_on_launch = enabled;
        Ok(())
    }

    async fn describe_internet_gateways(
        &self,
        filter: &Filter,
    ) -> CloudResult<Vec<InternetGatewayInfo>> {
        let state = self.state().await;
        Ok(state.select(SCOPE, state.internet_gateways.values(), filter))
    }

    async fn create_internet_gateway(&self, tags: &Tags) -> CloudResult<InternetGatewayInfo> {
        let mut state = self.state().await;
        let id = state.next_id("igw");
        state.record(format!("CreateInternetGateway {}", id));
        let gateway = InternetGatewayInfo {
            id: id.clone(),
            attached_vpc_ids: Vec::new(),
            tags: tags.clone(),
        };
        state.internet_gateways.insert(id.clone(), gateway.clone());
        state.set_tags(SCOPE, &id, tags);
        Ok(gateway)
    }

    async fn attach_internet_gateway(&self, gateway_id: &str, vpc_id: &str) -> CloudResult<()> {
        let mut state = self.state().await;
        state.record(format!("AttachInternetGateway {} {}", gateway_id, vpc_id));
        if !state.vpcs.contains_key(vpc_id) {
            return Err(not_found("InvalidVpcID.NotFound", vpc_id));
        }
        let gateway = state
            .internet_gateways
            .get_mut(gateway_id)
            .ok_or_else(|| not_found("InvalidInternetGatewayID.NotFound", gateway_id))?;
        if !gateway.attached_vpc_ids.is_empty() {
            return Err(ProviderError::new(
                "Resource.AlreadyAssociated",
                format!("{} is already attached", gateway_id),
            ));
        }
        gateway.attached_vpc_ids.push(vpc_id.to_string());
        Ok(())
    }

    async fn describe_egress_only_internet_gateways(
        &self,
        filter: &Filter,
    ) -> CloudResult<Vec<EgressOnlyInternetGatewayInfo>> {
        let state = self.state().await;
        Ok(state.select(SCOPE, state.egress_only_gateways.values(), filter))
    }

    async fn create_egress_only_internet_gateway(
        &self,
        vpc_id: &str,
        tags: &Tags,
    ) -> CloudResult<EgressOnlyInternetGatewayInfo> {
        let mut state = self.state().await;
        if !state.vpcs.contains_key(vpc_id) {
            return Err(not_found("InvalidVpcID.NotFound", vpc_id));
        }
        let id = state.next_id("eigw");
        state.record(format!("CreateEgressOnlyInternetGateway {}", id));
        let gateway = EgressOnlyInternetGatewayInfo {
            id: id.clone(),
            vpc_id: vpc_id.to_string(),
            tags: tags.clone(),
        };
        state.egress_only_gateways.insert(id.clone(), gateway.clone());
        state.set_tags(SCOPE, &id, tags);
        Ok(gateway)
    }

    async fn describe_addresses(&self, filter: &Filter) -> CloudResult<Vec<AddressInfo>> {
        let state = self.state().await;
        Ok(state.select(SCOPE, state.addresses.values(), filter))
    }

    async fn allocate_address(&self, tags: &Tags) -> CloudResult<AddressInfo> {
        let mut state = self.state().await;
        let id = state.next_id("eipalloc");
        let octet = state.counter % 250 + 1;
        state.record(format!("AllocateAddress {}", id));
        let address = AddressInfo {
            allocation_id: id.clone(),
            public_ip: format!("203.0.113.{}", octet),
            domain: "vpc".to_string(),
            tags: tags.clone(),
        };
        state.addresses.insert(id.clone(), address.clone());
        state.set_tags(SCOPE, &id, tags);
        Ok(address)
    }

    async fn describe_nat_gateways(&self, filter: &Filter) -> CloudResult<Vec<NatGatewayInfo>> {
        let mut state = self.state().await;
        let ids: Vec<String> = state.nat_gateways.keys().cloned().collect();
        for id in ids {
            let pending = state.still_pending(&id);
            if let Some(gateway) = state.nat_gateways.get_mut(&id) {
                if gateway.state == "pending" && !pending {
                    gateway.state = "available".to_string();
                }
            }
        }
        Ok(state.select(SCOPE, state.nat_gateways.values(), filter))
    }

    async fn create_nat_gateway(
        &self,
        subnet_id: &str,
        allocation_id: &str,
        tags: &Tags,
    ) -> CloudResult<NatGatewayInfo> {
        let mut state = self.state().await;
        let vpc_id = state
            .subnets
            .get(subnet_id)
            .map(|s| s.vpc_id.clone())
            .ok_or_else(|| not_found("InvalidSubnetID.NotFound", subnet_id))?;
        let public_ip = state
            .addresses
            .get(allocation_id)
            .map(|a| a.public_ip.clone())
            .ok_or_else(|| not_found("InvalidAllocationID.NotFound", allocation_id))?;
        let id = state.next_id("nat");
        state.record(format!("CreateNatGateway {}", id));
        let polls = state.knobs.nat_gateway_pending_polls;
        state.knobs.pending.insert(id.clone(), polls);
        let gateway = NatGatewayInfo {
            id: id.clone(),
            vpc_id,
            subnet_id: subnet_id.to_string(),
            allocation_id: allocation_id.to_string(),
            public_ip,
            state: "pending".to_string(),
            tags: tags.clone(),
        };
        state.nat_gateways.insert(id.clone(), gateway.clone());
        state.set_tags(SCOPE, &id, tags);
        Ok(gateway)
    }

    async fn describe_route_tables(&self, filter: &Filter) -> CloudResult<Vec<RouteTableInfo>> {
        let state = self.state().await;
        Ok(state.select(SCOPE, state.route_tables.values(), filter))
    }

    async fn create_route_table(&self, vpc_id: &str, tags: &Tags) -> CloudResult<RouteTableInfo> {
        let mut state = self.state().await;
        let cidr = state
            .vpcs
            .get(vpc_id)
            .map(|v| v.cidr_block.clone())
            .ok_or_else(|| not_found("InvalidVpcID.NotFound", vpc_id))?;
        let id = state.next_id("rtb");
        state.record(format!("CreateRouteTable {}", id));
        let table = RouteTableInfo {
            id: id.clone(),
            vpc_id: vpc_id.to_string(),
            routes: vec![RouteInfo {
                destination_cidr_block: Some(cidr),
                gateway_id: Some("local".to_string()),
                ..RouteInfo::default()
            }],
            associations: Vec::new(),
            tags: tags.clone(),
        };
        state.route_tables.insert(id.clone(), table.clone());
        state.set_tags(SCOPE, &id, tags);
        Ok(table)
    }

    async fn create_route(&self, route_table_id: &str, route: &RouteInfo) -> CloudResult<()> {
        let mut state = self.state().await;
        state.record(format!(
            "CreateRoute {} {}",
            route_table_id,
            route.destination().unwrap_or_default()
        ));
        if let Some(nat) = &route.nat_gateway_id {
            if !state.nat_gateways.contains_key(nat) {
                return Err(ProviderError::new(
                    "InvalidNatGatewayID.NotFound",
                    format!("The natGateway ID '{}' does not exist", nat),
                ));
            }
        }
        let table = state
            .route_tables
            .get_mut(route_table_id)
            .ok_or_else(|| not_found("InvalidRouteTableID.NotFound", route_table_id))?;
        if table.routes.iter().any(|r| r.destination() == route.destination()) {
            return Err(ProviderError::new(
                "RouteAlreadyExists",
                format!("route {:?} already exists", route.destination()),
            ));
        }
        table.routes.push(route.clone());
        Ok(())
    }

    async fn replace_route(&self, route_table_id: &str, route: &RouteInfo) -> CloudResult<()> {
        let mut state = self.state().await;
        state.record(format!(
            "ReplaceRoute {} {}",
            route_table_id,
            route.destination().unwrap_or_default()
        ));
        let table = state
            .route_tables
            .get_mut(route_table_id)
            .ok_or_else(|| not_found("InvalidRouteTableID.NotFound", route_table_id))?;
        match table
            .routes
            .iter_mut()
            .find(|r| r.destination() == route.destination())
        {
            Some(existing) => {
                *existing = route.clone();
                Ok(())
            }
            None => Err(not_found("InvalidRoute.NotFound", route_table_id)),
        }
    }

    async fn associate_route_table(
        &self,
        route_table_id: &str,
        subnet_id: &str,
    ) -> CloudResult<String> {
        let mut state = self.state().await;
        if !state.subnets.contains_key(subnet_id) {
            return Err(not_found("InvalidSubnetID.NotFound", subnet_id));
        }
        let id = state.next_id("rtbassoc");
        state.record(format!("AssociateRouteTable {} {}", route_table_id, subnet_id));
        // A subnet has at most one explicit association.
        for table in state.route_tables.values_mut() {
            table.associations.retain(|a| a.subnet_id != subnet_id);
        }
        let table = state
            .route_tables
            .get_mut(route_table_id)
            .ok_or_else(|| not_found("InvalidRouteTableID.NotFound", route_table_id))?;
        table.associations.push(RouteTableAssociationInfo {
            id: id.clone(),
            route_table_id: route_table_id.to_string(),
            subnet_id: subnet_id.to_string(),
        });
        Ok(id)
    }

    async fn describe_security_groups(
        &self,
        filter: &Filter,
    ) -> CloudResult<Vec<SecurityGroupInfo>> {
        let state = self.state().await;
        Ok(state.select(SCOPE, state.security_groups.values(), filter))
    }

    async fn create_security_group(
        &self,
        request: &SecurityGroupInfo,
    ) -> CloudResult<SecurityGroupInfo> {
        let mut state = self.state().await;
        if state
            .security_groups
            .values()
            .any(|g| g.vpc_id == request.vpc_id && g.name == request.name)
        {
            return Err(ProviderError::new(
                "InvalidGroup.Duplicate",
                format!("security group {} already exists", request.name),
            ));
        }
        let id = state.next_id("sg");
        state.record(format!("CreateSecurityGroup {}", id));
        let group = SecurityGroupInfo {
            id: id.clone(),
            ingress: Vec::new(),
            egress: vec![SecurityGroupRuleInfo {
                protocol: "-1".to_string(),
                cidr: Some("0.0.0.0/0".to_string()),
                ..SecurityGroupRuleInfo::default()
            }],
            ..request.clone()
        };
        state.security_groups.insert(id.clone(), group.clone());
        state.set_tags(SCOPE, &id, &request.tags);
        Ok(group)
    }

    async fn authorize_ingress(
        &self,
        group_id: &str,
        rule: &SecurityGroupRuleInfo,
    ) -> CloudResult<()> {
        let mut state = self.state().await;
        state.record(format!("AuthorizeSecurityGroupIngress {}", group_id));
        let group = state
            .security_groups
            .get_mut(group_id)
            .ok_or_else(|| not_found("InvalidGroup.NotFound", group_id))?;
        if group.ingress.contains(rule) {
            return Err(ProviderError::new(
                "InvalidPermission.Duplicate",
                "the specified rule already exists",
            ));
        }
        group.ingress.push(rule.clone());
        Ok(())
    }

    async fn authorize_egress(&self, group_id: &str, rule: &SecurityGroupRuleInfo) -> CloudResult<()> {
        let mut state = self.state().await;
        state.record(format!("AuthorizeSecurityGroupEgress {}", group_id));
        let group = state
            .security_groups
            .get_mut(group_id)
            .ok_or_else(|| not_found("InvalidGroup.NotFound", group_id))?;
        if group.egress.contains(rule) {
            return Err(ProviderError::new(
                "InvalidPermission.Duplicate",
                "the specified rule already exists",
            ));
        }
        group.egress.push(rule.clone());
        Ok(())
    }

    async fn describe_key_pairs(&self, filter: &Filter) -> CloudResult<Vec<KeyPairInfo>> {
        let state = self.state().await;
        Ok(state.select(SCOPE, state.key_pairs.values(), filter))
    }

    async fn import_key_pair(
        &self,
        name: &str,
        public_key: &str,
        tags: &Tags,
    ) -> CloudResult<KeyPairInfo> {
        let mut state = self.state().await;
        if state.key_pairs.values().any(|k| k.name == name) {
            return Err(ProviderError::new(
                "InvalidKeyPair.Duplicate",
                format!("key pair {} already exists", name),
            ));
        }
        let id = state.next_id("key");
        state.record(format!("ImportKeyPair {}", name));
        let key = KeyPairInfo {
            id: id.clone(),
            name: name.to_string(),
            fingerprint: fingerprint(public_key),
            tags: tags.clone(),
        };
        state.key_pairs.insert(id.clone(), key.clone());
        state.set_tags(SCOPE, &id, tags);
        Ok(key)
    }

    async fn describe_volumes(&self, filter: &Filter) -> CloudResult<Vec<VolumeInfo>> {
        let state = self.state().await;
        Ok(state.select(SCOPE, state.volumes.values(), filter))
    }

    async fn create_volume(&self, request: &VolumeInfo) -> CloudResult<VolumeInfo> {
        let mut state = self.state().await;
        let id = state.next_id("vol");
        state.record(format!("CreateVolume {}", id));
        let volume = VolumeInfo {
            id: id.clone(),
            attachments: Vec::new(),
            ..request.clone()
        };
        state.volumes.insert(id.clone(), volume.clone());
        state.set_tags(SCOPE, &id, &request.tags);
        Ok(volume)
    }

    async fn modify_volume(
        &self,
        volume_id: &str,
        modification: &VolumeModification,
    ) -> CloudResult<()> {
        let mut state = self.state().await;
        state.record(format!("ModifyVolume {}", volume_id));
        let volume = state
            .volumes
            .get_mut(volume_id)
            .ok_or_else(|| not_found("InvalidVolume.NotFound", volume_id))?;
        if let Some(size) = modification.size_gb {
            if size < volume.size_gb {
                return Err(ProviderError::new(
                    "InvalidParameterValue",
                    "new size cannot be smaller than the existing size",
                ));
            }
            volume.size_gb = size;
        }
        if let Some(t) = &modification.volume_type {
            volume.volume_type = t.clone();
        }
        if modification.iops.is_some() {
            volume.iops = modification.iops;
        }
        if modification.throughput.is_some() {
            volume.throughput = modification.throughput;
        }
        Ok(())
    }

    async fn attach_volume(
        &self,
        volume_id: &str,
        instance_id: &str,
        device: &str,
    ) -> CloudResult<()> {
        let mut state = self.state().await;
        state.record(format!("AttachVolume {} {}", volume_id, instance_id));
        let running = state
            .instances
            .get(instance_id)
            .map(|i| i.state == "running")
            .ok_or_else(|| not_found("InvalidInstanceID.NotFound", instance_id))?;
        if !running {
            return Err(ProviderError::new(
                "IncorrectState",
                format!("instance {} is not running", instance_id),
            ));
        }
        let volume = state
            .volumes
            .get_mut(volume_id)
            .ok_or_else(|| not_found("InvalidVolume.NotFound", volume_id))?;
        if !volume.attachments.is_empty() {
            return Err(ProviderError::new(
                "VolumeInUse",
                format!("{} is already attached", volume_id),
            ));
        }
        volume.attachments.push(VolumeAttachmentInfo {
            instance_id: instance_id.to_string(),
            device: device.to_string(),
            state: "attached".to_string(),
        });
        Ok(())
    }

    async fn describe_instances(&self, filter: &Filter) -> CloudResult<Vec<InstanceInfo>> {
        let mut state = self.state().await;
        let ids: Vec<String> = state.instances.keys().cloned().collect();
        for id in ids {
            let pending = state.still_pending(&id);
            if let Some(instance) = state.instances.get_mut(&id) {
                if instance.state == "pending" && !pending {
                    instance.state = "running".to_string();
                }
            }
        }
        let live = state
            .instances
            .values()
            .filter(|i| i.state != "terminated")
            .collect::<Vec<_>>();
        Ok(state.select(SCOPE, live, filter))
    }

    async fn run_instance(&self, request: &InstanceInfo) -> CloudResult<InstanceInfo> {
        let mut state = self.state().await;
        state.check_instance_profile(request.iam_instance_profile.as_deref())?;
        if !state.subnets.contains_key(&request.subnet_id) {
            return Err(not_found("InvalidSubnetID.NotFound", &request.subnet_id));
        }
        let id = state.next_id("i");
        let host = state.counter % 250 + 1;
        state.record(format!("RunInstances {}", id));
        let polls = state.knobs.instance_pending_polls;
        state.knobs.pending.insert(id.clone(), polls);
        let instance = InstanceInfo {
            id: id.clone(),
            private_ip: Some(format!("10.0.0.{}", host)),
            public_ip: request
                .associate_public_ip
                .then(|| format!("198.51.100.{}", host)),
            state: "pending".to_string(),
            ..request.clone()
        };
        state.instances.insert(id.clone(), instance.clone());
        state.set_tags(SCOPE, &id, &request.tags);
        Ok(instance)
    }

    async fn modify_instance_security_groups(
        &self,
        instance_id: &str,
        group_ids: &[String],
    ) -> CloudResult<()> {
        let mut state = self.state().await;
        state.record(format!("ModifyInstanceAttribute {}", instance_id));
        let instance = state
            .instances
            .get_mut(instance_id)
            .ok_or_else(|| not_found("InvalidInstanceID.NotFound", instance_id))?;
        instance.security_group_ids = group_ids.to_vec();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(name: &str) -> Tags {
        let mut tags = Tags::new();
        tags.insert("Name".into(), name.into());
        tags
    }

    #[tokio::test]
    async fn test_describe_by_tags_returns_created() {
        let cloud = MemoryCloud::new();
        let vpc = cloud
            .create_vpc(&VpcInfo {
                cidr_block: "10.0.0.0/16".into(),
                tags: tags("main"),
                ..VpcInfo::default()
            })
            .await
            .unwrap();
        let found = cloud.describe_vpcs(&Filter::by_tags(tags("main"))).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, vpc.id);
        assert_eq!(found[0].tags, tags("main"));
        assert!(cloud
            .describe_vpcs(&Filter::by_tags(tags("other")))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_nat_gateway_pending_then_available() {
        let cloud = MemoryCloud::new();
        cloud.set_nat_gateway_pending_polls(1).await;
        let vpc = cloud
            .create_vpc(&VpcInfo {
                cidr_block: "10.0.0.0/16".into(),
                ..VpcInfo::default()
            })
            .await
            .unwrap();
        let subnet = cloud
            .create_subnet(&SubnetInfo {
                vpc_id: vpc.id.clone(),
                cidr_block: "10.0.1.0/24".into(),
                ..SubnetInfo::default()
            })
            .await
            .unwrap();
        let eip = cloud.allocate_address(&Tags::new()).await.unwrap();
        let nat = cloud
            .create_nat_gateway(&subnet.id, &eip.allocation_id, &Tags::new())
            .await
            .unwrap();
        let filter = Filter::by_id(&nat.id);
        assert_eq!(cloud.describe_nat_gateways(&filter).await.unwrap()[0].state, "pending");
        assert_eq!(cloud.describe_nat_gateways(&filter).await.unwrap()[0].state, "available");
    }

    #[tokio::test]
    async fn test_create_route_rejects_duplicate_destination() {
        let cloud = MemoryCloud::new();
        let vpc = cloud
            .create_vpc(&VpcInfo {
                cidr_block: "10.0.0.0/16".into(),
                ..VpcInfo::default()
            })
            .await
            .unwrap();
        let table = cloud.create_route_table(&vpc.id, &Tags::new()).await.unwrap();
        let route = RouteInfo {
            destination_cidr_block: Some("0.0.0.0/0".into()),
            gateway_id: Some("igw-1".into()),
            ..RouteInfo::default()
        };
        cloud.create_route(&table.id, &route).await.unwrap();
        let err = cloud.create_route(&table.id, &route).await.unwrap_err();
        assert_eq!(err.code, "RouteAlreadyExists");
    }
}
