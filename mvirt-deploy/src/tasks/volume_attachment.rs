//! Attachment of an EBS volume to an instance.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{check_immutable, check_required, found_meta, link_id, opt_link_id, properties, single};
use crate::cloud::{Cloud, Filter};
use crate::error::{Error, Result};
use crate::impl_diff;
use crate::model::{Attr, Kind, Link, Meta};
use crate::reconciler::{Resource, RunContext};
use crate::target::{ApiTarget, HclBlock, HclTarget, JsonTarget};
use crate::waiter::PollState;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VolumeAttachment {
    #[serde(flatten)]
    pub meta: Meta,
    pub volume: Option<Link>,
    pub instance: Option<Link>,
    pub device: Option<String>,
}

impl_diff!(VolumeAttachment {
    volume,
    instance,
    device
});

fn attachment_id(volume_id: &str, instance_id: &str) -> String {
    format!("{}:{}", volume_id, instance_id)
}

#[async_trait]
impl Resource for VolumeAttachment {
    const KIND: Kind = Kind::VolumeAttachment;

    fn meta(&self) -> &Meta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut Meta {
        &mut self.meta
    }

    fn links(&self) -> Vec<&Link> {
        self.volume.iter().chain(self.instance.iter()).collect()
    }

    fn links_mut(&mut self) -> Vec<&mut Link> {
        self.volume
            .iter_mut()
            .chain(self.instance.iter_mut())
            .collect()
    }

    /// A volume has at most one attachment, so the volume identifies it.
    async fn find(&self, _ctx: &RunContext<'_>, cloud: &dyn Cloud) -> Result<Option<Self>> {
        let Some(volume_id) = opt_link_id(&self.volume) else {
            return Ok(None);
        };
        let volumes = cloud
            .compute()
            .describe_volumes(&Filter::by_id(&volume_id))
            .await?;
        let Some(volume) = single(&self.task_key(), volumes)? else {
            return Ok(None);
        };
        let Some(attachment) = volume.attachments.into_iter().next() else {
            return Ok(None);
        };
        Ok(Some(VolumeAttachment {
            meta: found_meta(&self.meta, attachment_id(&volume_id, &attachment.instance_id)),
            volume: Some(Link::found(Kind::EbsVolume, &volume_id)),
            instance: Some(Link::found(Kind::Instance, attachment.instance_id)),
            device: Some(attachment.device),
        }))
    }

    fn check_changes(actual: Option<&Self>, desired: &Self, changes: &Self) -> Result<()> {
        let key = desired.task_key();
        check_required(
            &key,
            &[
                ("Volume", desired.volume.is_some()),
                ("Instance", desired.instance.is_some()),
                ("Device", desired.device.is_some()),
            ],
        )?;
        check_immutable(
            &key,
            actual.is_some(),
            &[
                ("Instance", changes.instance.is_some()),
                ("Device", changes.device.is_some()),
            ],
        )
    }

    async fn render_api(
        target: &ApiTarget,
        ctx: &RunContext<'_>,
        _actual: Option<&Self>,
        desired: &mut Self,
        _changes: &Self,
    ) -> Result<()> {
        let key = desired.task_key();
        let volume_id = link_id(&key, "Volume", &desired.volume)?;
        let instance_id = link_id(&key, "Instance", &desired.instance)?;
        let device = desired.device.clone().unwrap_or_default();
        let compute = target.cloud().compute();

        let filter = Filter::by_id(&instance_id);
        let filter = &filter;
        target
            .waiter(ctx.config)
            .wait(&format!("instance {}", instance_id), move || async move {
                let found = compute.describe_instances(filter).await?;
                let state = match found.first().map(|i| i.state.as_str()) {
                    Some("running") => PollState::Ready,
                    Some(state) => PollState::Pending(state.to_string()),
                    None => PollState::Failed("instance not found".to_string()),
                };
                Ok::<PollState, Error>(state)
            })
            .await?;

        compute.attach_volume(&volume_id, &instance_id, &device).await?;
        desired.meta.id = Some(attachment_id(&volume_id, &instance_id));
        Ok(())
    }

    async fn render_hcl(target: &HclTarget, ctx: &RunContext<'_>, desired: &Self) -> Result<()> {
        let body = HclBlock::new()
            .set_opt("device_name", desired.device.as_ref())
            .set_opt("volume_id", desired.volume.as_ref().map(|l| ctx.hcl_ref(l, Attr::Id)))
            .set_opt(
                "instance_id",
                desired.instance.as_ref().map(|l| ctx.hcl_ref(l, Attr::Id)),
            );
        target
            .render_resource(Self::KIND, &desired.meta.name, body)
            .await
    }

    async fn render_json(
        target: &JsonTarget,
        ctx: &RunContext<'_>,
        desired: &Self,
    ) -> Result<()> {
        let props = properties(json!({
            "Device": desired.device,
            "VolumeId": desired.volume.as_ref().map(|l| ctx.json_ref(l, Attr::Id)),
            "InstanceId": desired.instance.as_ref().map(|l| ctx.json_ref(l, Attr::Id)),
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
    use crate::cloud::MemoryCloud;
    use crate::reconciler::TaskSet;
    use crate::tasks::testing::apply;
    use crate::tasks::{EbsVolume, Instance, Subnet, Vpc};

    fn tasks(device: &str) -> TaskSet {
        let mut tasks = TaskSet::new();
        tasks
            .add(Vpc {
                meta: Meta::new("main"),
                cidr: Some("10.0.0.0/16".into()),
                ..Vpc::default()
            })
            .unwrap();
        tasks
            .add(Subnet {
                meta: Meta::new("a"),
                vpc: Some(Link::new(Kind::Vpc, "main")),
                cidr: Some("10.0.1.0/24".into()),
                availability_zone: Some("us-east-1a".into()),
                ..Subnet::default()
            })
            .unwrap();
        tasks
            .add(Instance {
                meta: Meta::new("etcd-a"),
                image_id: Some("ami-12345678".into()),
                instance_type: Some("m5.large".into()),
                subnet: Some(Link::new(Kind::Subnet, "a")),
                ..Instance::default()
            })
            .unwrap();
        tasks
            .add(EbsVolume {
                meta: Meta::new("etcd-a"),
                availability_zone: Some("us-east-1a".into()),
                size_gb: Some(20),
                ..EbsVolume::default()
            })
            .unwrap();
        tasks
            .add(VolumeAttachment {
                meta: Meta::new("etcd-a"),
                volume: Some(Link::new(Kind::EbsVolume, "etcd-a")),
                instance: Some(Link::new(Kind::Instance, "etcd-a")),
                device: Some(device.into()),
            })
            .unwrap();
        tasks
    }

    #[tokio::test]
    async fn test_attaches_after_instance_runs() {
        let cloud = Arc::new(MemoryCloud::new());
        cloud.set_instance_pending_polls(2).await;
        apply(&cloud, &mut tasks("/dev/xvdu")).await.unwrap();
        let volumes = cloud.compute().describe_volumes(&Filter::default()).await.unwrap();
        assert_eq!(volumes[0].attachments.len(), 1);
        assert_eq!(volumes[0].attachments[0].device, "/dev/xvdu");
        assert!(apply(&cloud, &mut tasks("/dev/xvdu")).await.unwrap().is_unchanged());
    }

    #[tokio::test]
    async fn test_device_is_immutable() {
        let cloud = Arc::new(MemoryCloud::new());
        apply(&cloud, &mut tasks("/dev/xvdu")).await.unwrap();
        let err = apply(&cloud, &mut tasks("/dev/xvdv")).await.unwrap_err();
        assert!(matches!(err.root(), Error::CannotChange { field: "Device", .. }));
    }
}
