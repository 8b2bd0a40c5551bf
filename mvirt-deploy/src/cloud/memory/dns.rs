use async_trait::async_trait;

use super::{not_found, MemoryCloud};
use crate::cloud::dns::{fqdn, Dns, HostedZoneInfo, RecordSetInfo};
use crate::cloud::{CloudResult, TagScope};
use crate::error::ProviderError;

const SCOPE: TagScope = TagScope::Dns;

#[async_trait]
impl Dns for MemoryCloud {
    async fn list_hosted_zones_by_name(&self, name: &str) -> CloudResult<Vec<HostedZoneInfo>> {
        let wanted = fqdn(name);
        let state = self.state().await;
        Ok(state
            .hosted_zones
            .values()
            .filter(|z| z.name == wanted)
            .map(|z| HostedZoneInfo {
                tags: state.tags_of(SCOPE, &z.id),
                ..z.clone()
            })
            .collect())
    }

    async fn get_hosted_zone(&self, id: &str) -> CloudResult<Option<HostedZoneInfo>> {
        let state = self.state().await;
        Ok(state.hosted_zones.get(id).map(|z| HostedZoneInfo {
            tags: state.tags_of(SCOPE, &z.id),
            ..z.clone()
        }))
    }

    async fn create_hosted_zone(&self, request: &HostedZoneInfo) -> CloudResult<HostedZoneInfo> {
        let mut state = self.state().await;
        let id = state.next_id("Z").replace('-', "").to_uppercase();
        state.record(format!("CreateHostedZone {}", request.name));
        let zone = HostedZoneInfo {
            id: id.clone(),
            name: fqdn(&request.name),
            ..request.clone()
        };
        state.hosted_zones.insert(id.clone(), zone.clone());
        state.record_sets.insert(id.clone(), Vec::new());
        state.set_tags(SCOPE, &id, &request.tags);
        Ok(zone)
    }

    async fn associate_vpc_with_hosted_zone(&self, zone_id: &str, vpc_id: &str) -> CloudResult<()> {
        let mut state = self.state().await;
        state.record(format!("AssociateVPCWithHostedZone {} {}", zone_id, vpc_id));
        let zone = state
            .hosted_zones
            .get_mut(zone_id)
            .ok_or_else(|| not_found("NoSuchHostedZone", zone_id))?;
        if zone.vpc_ids.iter().any(|v| v == vpc_id) {
            return Err(ProviderError::new(
                "ConflictingDomainExists",
                format!("{} is already associated", vpc_id),
            ));
        }
        zone.vpc_ids.push(vpc_id.to_string());
        Ok(())
    }

    async fn list_resource_record_sets(&self, zone_id: &str) -> CloudResult<Vec<RecordSetInfo>> {
        let state = self.state().await;
        state
            .record_sets
            .get(zone_id)
            .cloned()
            .ok_or_else(|| not_found("NoSuchHostedZone", zone_id))
    }

    async fn upsert_record_set(&self, zone_id: &str, record: &RecordSetInfo) -> CloudResult<()> {
        let mut state = self.state().await;
        state.record(format!(
            "ChangeResourceRecordSets UPSERT {} {}",
            record.name, record.record_type
        ));
        let records = state
            .record_sets
            .get_mut(zone_id)
            .ok_or_else(|| not_found("NoSuchHostedZone", zone_id))?;
        let record = RecordSetInfo {
            name: fqdn(&record.name),
            ..record.clone()
        };
        records.retain(|r| !(r.name == record.name && r.record_type == record.record_type));
        records.push(record);
        Ok(())
    }
}
