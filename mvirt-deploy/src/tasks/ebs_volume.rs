//! EBS volumes.
//!
//! Size, type, IOPS and throughput are modified in place. A volume can only
//! grow; shrinking is rejected like any other immutable change.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{check_immutable, check_required, found_meta, found_tags, meta_id, properties, single};
use crate::cloud::compute::{VolumeInfo, VolumeModification};
use crate::cloud::{Cloud, TagScope};
use crate::error::{Error, Result};
use crate::impl_diff;
use crate::model::{Kind, Meta, Tags};
use crate::reconciler::{Resource, RunContext};
use crate::target::json::tag_list;
use crate::target::{ApiTarget, HclBlock, HclTarget, JsonTarget};

const DEFAULT_VOLUME_TYPE: &str = "gp3";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EbsVolume {
    #[serde(flatten)]
    pub meta: Meta,
    pub availability_zone: Option<String>,
    pub size_gb: Option<i64>,
    pub volume_type: Option<String>,
    pub iops: Option<i64>,
    pub throughput: Option<i64>,
    pub encrypted: Option<bool>,
    pub kms_key_id: Option<String>,
    pub tags: Option<Tags>,
}

impl_diff!(EbsVolume {
    availability_zone,
    size_gb,
    volume_type,
    iops,
    throughput,
    encrypted,
    kms_key_id,
    tags
});

#[async_trait]
impl Resource for EbsVolume {
    const KIND: Kind = Kind::EbsVolume;

    fn meta(&self) -> &Meta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut Meta {
        &mut self.meta
    }

    fn tags_mut(&mut self) -> Option<&mut Tags> {
        Some(self.tags.get_or_insert_with(Tags::new))
    }

    async fn find(&self, ctx: &RunContext<'_>, cloud: &dyn Cloud) -> Result<Option<Self>> {
        let volumes = cloud
            .compute()
            .describe_volumes(&ctx.find_filter(&self.meta))
            .await?;
        let Some(volume) = single(&self.task_key(), volumes)? else {
            return Ok(None);
        };
        Ok(Some(EbsVolume {
            meta: found_meta(&self.meta, &volume.id),
            availability_zone: Some(volume.availability_zone),
            size_gb: Some(volume.size_gb),
            volume_type: Some(volume.volume_type),
            iops: volume.iops,
            throughput: volume.throughput,
            encrypted: Some(volume.encrypted),
            kms_key_id: volume.kms_key_id,
            tags: found_tags(ctx, &volume.tags, &self.tags),
        }))
    }

    fn check_changes(actual: Option<&Self>, desired: &Self, changes: &Self) -> Result<()> {
        let key = desired.task_key();
        check_required(
            &key,
            &[
                ("AvailabilityZone", desired.availability_zone.is_some()),
                ("SizeGB", desired.size_gb.is_some()),
            ],
        )?;
        let shrinking = match (actual.and_then(|a| a.size_gb), changes.size_gb) {
            (Some(current), Some(wanted)) => wanted < current,
            _ => false,
        };
        if shrinking {
            return Err(Error::CannotChange { key, field: "SizeGB" });
        }
        check_immutable(
            &key,
            actual.is_some(),
            &[
                ("AvailabilityZone", changes.availability_zone.is_some()),
                ("Encrypted", changes.encrypted.is_some()),
                ("KmsKeyId", changes.kms_key_id.is_some()),
            ],
        )
    }

    async fn render_api(
        target: &ApiTarget,
        ctx: &RunContext<'_>,
        actual: Option<&Self>,
        desired: &mut Self,
        changes: &Self,
    ) -> Result<()> {
        let compute = target.cloud().compute();
        let tags = desired.tags.clone().unwrap_or_default();
        let Some(actual) = actual else {
            let request = VolumeInfo {
                availability_zone: desired.availability_zone.clone().unwrap_or_default(),
                size_gb: desired.size_gb.unwrap_or_default(),
                volume_type: desired
                    .volume_type
                    .clone()
                    .unwrap_or_else(|| DEFAULT_VOLUME_TYPE.to_string()),
                iops: desired.iops,
                throughput: desired.throughput,
                encrypted: desired.encrypted.unwrap_or(false),
                kms_key_id: desired.kms_key_id.clone(),
                tags,
                ..VolumeInfo::default()
            };
            let volume = compute.create_volume(&request).await?;
            desired.meta.id = Some(volume.id);
            return Ok(());
        };

        let id = meta_id(Self::KIND, &desired.meta)?;
        let modification = VolumeModification {
            size_gb: changes.size_gb,
            volume_type: changes.volume_type.clone(),
            iops: changes.iops,
            throughput: changes.throughput,
        };
        if modification != VolumeModification::default() {
            compute.modify_volume(&id, &modification).await?;
        }
        if changes.tags.is_some() {
            target
                .reconcile_tags(ctx.audit, TagScope::Compute, &id, actual.tags.as_ref(), &tags)
                .await?;
        }
        Ok(())
    }

    async fn render_hcl(target: &HclTarget, _ctx: &RunContext<'_>, desired: &Self) -> Result<()> {
        let body = HclBlock::new()
            .set_opt("availability_zone", desired.availability_zone.as_ref())
            .set_opt("size", desired.size_gb)
            .set_opt("type", desired.volume_type.as_ref())
            .set_opt("iops", desired.iops)
            .set_opt("throughput", desired.throughput)
            .set_opt("encrypted", desired.encrypted)
            .set_opt("kms_key_id", desired.kms_key_id.as_ref())
            .set_opt("tags", desired.tags.as_ref());
        target
            .render_resource(Self::KIND, &desired.meta.name, body)
            .await
    }

    async fn render_json(
        target: &JsonTarget,
        _ctx: &RunContext<'_>,
        desired: &Self,
    ) -> Result<()> {
        let props = properties(json!({
            "AvailabilityZone": desired.availability_zone,
            "Size": desired.size_gb,
            "VolumeType": desired.volume_type,
            "Iops": desired.iops,
            "Throughput": desired.throughput,
            "Encrypted": desired.encrypted,
            "KmsKeyId": desired.kms_key_id,
            "Tags": desired.tags.as_ref().map(tag_list),
        }));
        target
            .render_resource(Self::KIND, &desired.meta.name, props)
            .await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::cloud::{Filter, MemoryCloud};
    use crate::reconciler::{TaskOutcome, TaskSet};
    use crate::tasks::testing::apply;

    fn tasks(size: i64, encrypted: bool) -> TaskSet {
        let mut tasks = TaskSet::new();
        tasks
            .add(EbsVolume {
                meta: Meta::new("a.etcd-main.test.example.com"),
                availability_zone: Some("us-east-1a".into()),
                size_gb: Some(size),
                volume_type: Some("gp3".into()),
                encrypted: Some(encrypted),
                ..EbsVolume::default()
            })
            .unwrap();
        tasks
    }

    fn key() -> crate::model::TaskKey {
        crate::model::TaskKey::new(Kind::EbsVolume, "a.etcd-main.test.example.com")
    }

    #[tokio::test]
    async fn test_volume_grows_in_place() {
        let cloud = Arc::new(MemoryCloud::new());
        apply(&cloud, &mut tasks(20, true)).await.unwrap();
        let report = apply(&cloud, &mut tasks(40, true)).await.unwrap();
        assert_eq!(
            report.outcome(&key()),
            Some(&TaskOutcome::Updated(vec!["size_gb"]))
        );
        let volumes = cloud.compute().describe_volumes(&Filter::default()).await.unwrap();
        assert_eq!(volumes.len(), 1);
        assert_eq!(volumes[0].size_gb, 40);
    }

    #[tokio::test]
    async fn test_shrinking_rejected() {
        let cloud = Arc::new(MemoryCloud::new());
        apply(&cloud, &mut tasks(40, true)).await.unwrap();
        let err = apply(&cloud, &mut tasks(20, true)).await.unwrap_err();
        assert!(matches!(err.root(), Error::CannotChange { field: "SizeGB", .. }));
    }

    #[tokio::test]
    async fn test_encryption_is_immutable() {
        let cloud = Arc::new(MemoryCloud::new());
        apply(&cloud, &mut tasks(20, false)).await.unwrap();
        let err = apply(&cloud, &mut tasks(20, true)).await.unwrap_err();
        assert!(matches!(err.root(), Error::CannotChange { field: "Encrypted", .. }));
    }
}
