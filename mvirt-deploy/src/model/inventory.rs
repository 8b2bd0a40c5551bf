//! Inventory documents.
//!
//! An inventory is a JSON document listing the desired tasks:
//!
//! ```json
//! {"tasks": [
//!   {"kind": "Vpc", "name": "main", "cidr": "10.0.0.0/16"},
//!   {"kind": "Subnet", "name": "a", "vpc": "Vpc/main", "cidr": "10.0.1.0/24",
//!    "availability_zone": "us-east-1a"}
//! ]}
//! ```
//!
//! References are written as `"Kind/name"` and resolved by the reconciler.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::reconciler::{Task, TaskSet};
use crate::tasks::*;

macro_rules! task_specs {
    ($($kind:ident),* $(,)?) => {
        /// One task of any kind, tagged by `kind`.
        #[derive(Debug, Clone, Serialize, Deserialize)]
        #[serde(tag = "kind")]
        pub enum TaskSpec {
            $($kind($kind),)*
        }

        impl TaskSpec {
            pub fn into_task(self) -> Box<dyn Task> {
                match self {
                    $(TaskSpec::$kind(task) => Box::new(task),)*
                }
            }
        }

        $(
            impl From<$kind> for TaskSpec {
                fn from(task: $kind) -> Self {
                    TaskSpec::$kind(task)
                }
            }
        )*
    };
}

task_specs! {
    Vpc,
    DhcpOptions,
    VpcDhcpOptionsAssociation,
    Subnet,
    InternetGateway,
    EgressOnlyInternetGateway,
    ElasticIp,
    NatGateway,
    RouteTable,
    RouteTableAssociation,
    Route,
    SecurityGroup,
    SecurityGroupRule,
    SshKey,
    EbsVolume,
    Instance,
    VolumeAttachment,
    LaunchConfiguration,
    LaunchTemplate,
    AutoscalingGroup,
    AutoscalingLifecycleHook,
    ClassicLoadBalancer,
    NetworkLoadBalancer,
    TargetGroup,
    IamRole,
    IamRolePolicy,
    IamInstanceProfile,
    IamInstanceProfileRole,
    IamOidcProvider,
    DnsZone,
    DnsName,
    SqsQueue,
    EventBridgeRule,
    EventBridgeTarget,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Inventory {
    #[serde(default)]
    pub tasks: Vec<TaskSpec>,
}

impl Inventory {
    pub fn from_json(document: &str) -> Result<Self> {
        Ok(serde_json::from_str(document)?)
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let document = tokio::fs::read_to_string(path).await?;
        Self::from_json(&document)
    }

    pub fn push(&mut self, task: impl Into<TaskSpec>) {
        self.tasks.push(task.into());
    }

    /// Build the task arena; duplicate keys are rejected.
    pub fn into_task_set(self) -> Result<TaskSet> {
        let mut set = TaskSet::new();
        for spec in self.tasks {
            set.insert(spec.into_task())?;
        }
        Ok(set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::model::{Kind, Lifecycle, TaskKey};

    const DOCUMENT: &str = r#"{"tasks": [
        {"kind": "Vpc", "name": "main", "cidr": "10.0.0.0/16"},
        {"kind": "Subnet", "name": "a", "vpc": "Vpc/main", "cidr": "10.0.1.0/24",
         "availability_zone": "us-east-1a"},
        {"kind": "InternetGateway", "name": "main", "lifecycle": "shared", "id": "igw-1234"}
    ]}"#;

    #[test]
    fn test_parse_inventory() {
        let inventory = Inventory::from_json(DOCUMENT).unwrap();
        assert_eq!(inventory.tasks.len(), 3);
        match &inventory.tasks[1] {
            TaskSpec::Subnet(subnet) => {
                let vpc = subnet.vpc.as_ref().unwrap();
                assert_eq!(vpc.key(), TaskKey::new(Kind::Vpc, "main"));
                assert!(vpc.id.is_none());
            }
            other => panic!("unexpected task {:?}", other),
        }
        match &inventory.tasks[2] {
            TaskSpec::InternetGateway(igw) => {
                assert_eq!(igw.meta.lifecycle, Lifecycle::Shared);
                assert_eq!(igw.meta.id.as_deref(), Some("igw-1234"));
            }
            other => panic!("unexpected task {:?}", other),
        }
    }

    #[test]
    fn test_task_set_keys() {
        let set = Inventory::from_json(DOCUMENT).unwrap().into_task_set().unwrap();
        let keys: Vec<String> = set.keys().map(|k| k.to_string()).collect();
        assert_eq!(keys.len(), 3);
        assert!(set.get(&TaskKey::new(Kind::InternetGateway, "main")).is_some());
    }

    #[test]
    fn test_duplicate_task_rejected() {
        let mut inventory = Inventory::default();
        inventory.push(Vpc {
            meta: crate::model::Meta::new("main"),
            ..Vpc::default()
        });
        inventory.push(Vpc {
            meta: crate::model::Meta::new("main"),
            ..Vpc::default()
        });
        let err = inventory.into_task_set().unwrap_err();
        assert!(matches!(err, Error::DuplicateTask(_)));
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let err = Inventory::from_json(r#"{"tasks": [{"kind": "Bucket", "name": "b"}]}"#)
            .unwrap_err();
        assert!(matches!(err, Error::Json(_)));
    }

    #[test]
    fn test_bad_reference_rejected() {
        let err = Inventory::from_json(
            r#"{"tasks": [{"kind": "Subnet", "name": "a", "vpc": "main"}]}"#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Json(_)));
    }
}
