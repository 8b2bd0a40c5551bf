//! End-to-end reconciles of inventory fixtures against the in-memory provider.

mod common;

use std::collections::HashSet;

use chrono::{TimeZone, Utc};
use tokio::sync::watch;

use common::Harness;
use mvirt_deploy::audit::DeployAuditLogger;
use mvirt_deploy::cloud::compute::VpcInfo;
use mvirt_deploy::cloud::{Cloud, Filter};
use mvirt_deploy::gc::{select_for_deletion, VersionRecord};
use mvirt_deploy::model::{Kind, TaskKey, Tags};
use mvirt_deploy::tags::{process_compare, tags_to_delete};
use mvirt_deploy::target::{ApiTarget, Target};
use mvirt_deploy::{Error, Executor, Inventory, TaskOutcome, TaskSet};

fn position(mutations: &[String], prefix: &str) -> usize {
    mutations
        .iter()
        .position(|m| m.starts_with(prefix))
        .unwrap_or_else(|| panic!("no {} in {:?}", prefix, mutations))
}

async fn cluster_with_instance_type(instance_type: &str) -> TaskSet {
    let document = tokio::fs::read_to_string(common::fixture("cluster.json"))
        .await
        .unwrap();
    Inventory::from_json(&document.replace("m5.large", instance_type))
        .unwrap()
        .into_task_set()
        .unwrap()
}

async fn cluster_with_group_tags(group_tags: &str) -> TaskSet {
    let document = tokio::fs::read_to_string(common::fixture("cluster.json"))
        .await
        .unwrap();
    let document = document.replace(
        "\"max_size\": 2,",
        &format!("\"max_size\": 2,\n      \"tags\": {},", group_tags),
    );
    Inventory::from_json(&document)
        .unwrap()
        .into_task_set()
        .unwrap()
}

fn tags(pairs: &[(&str, &str)]) -> Tags {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[tokio::test]
async fn test_network_converges_then_is_unchanged() {
    let harness = Harness::new();
    let report = harness
        .apply(&mut common::load("network.json").await)
        .await
        .unwrap();
    assert_eq!(report.outcomes.len(), 4);
    assert!(report
        .outcomes
        .values()
        .all(|outcome| *outcome == TaskOutcome::Created));

    harness.cloud.clear_mutations().await;
    let second = harness
        .apply(&mut common::load("network.json").await)
        .await
        .unwrap();
    assert!(second.is_unchanged(), "{:?}", second.changes());
    assert!(harness.mutations().await.is_empty());
}

#[tokio::test]
async fn test_owner_tags_applied() {
    let harness = Harness::new();
    harness
        .apply(&mut common::load("network.json").await)
        .await
        .unwrap();

    let subnets = harness
        .cloud
        .compute()
        .describe_subnets(&Filter::default())
        .await
        .unwrap();
    assert_eq!(subnets.len(), 1);
    assert_eq!(subnets[0].tags["KubernetesCluster"], common::CLUSTER);
    assert_eq!(subnets[0].tags["Name"], "us-east-1a.test.example.com");
}

#[tokio::test]
async fn test_dry_run_plans_without_mutations() {
    let harness = Harness::new();
    let report = harness
        .plan(&mut common::load("network.json").await)
        .await
        .unwrap();

    assert_eq!(report.changes().len(), 4);
    assert!(report
        .outcomes
        .values()
        .all(|outcome| *outcome == TaskOutcome::WouldCreate));
    assert!(harness.mutations().await.is_empty());
}

#[tokio::test]
async fn test_cluster_created_in_dependency_order() {
    let harness = Harness::new();
    harness.cloud.set_nat_gateway_pending_polls(2).await;
    let mut tasks = common::load("cluster.json").await;
    let report = harness.apply(&mut tasks).await.unwrap();
    assert_eq!(report.outcomes.len(), 11);

    let mutations = harness.mutations().await;
    assert!(position(&mutations, "CreateVpc") < position(&mutations, "CreateSubnet"));
    assert!(position(&mutations, "CreateVpc") < position(&mutations, "CreateInternetGateway"));
    assert!(position(&mutations, "AllocateAddress") < position(&mutations, "CreateNatGateway"));
    assert!(position(&mutations, "CreateNatGateway") < position(&mutations, "CreateRoute"));
    assert!(position(&mutations, "CreateRouteTable") < position(&mutations, "AssociateRouteTable"));
    assert!(
        position(&mutations, "CreateLaunchConfiguration")
            < position(&mutations, "CreateAutoScalingGroup")
    );

    let nat = TaskKey::new(Kind::NatGateway, "us-east-1a.test.example.com");
    let gateways = harness
        .cloud
        .compute()
        .describe_nat_gateways(&Filter::default())
        .await
        .unwrap();
    assert_eq!(gateways.len(), 1);
    assert_eq!(gateways[0].state, "available");
    assert_eq!(tasks.id_of(&nat), Some(gateways[0].id.clone()));
}

#[tokio::test]
async fn test_cluster_second_run_is_unchanged() {
    let harness = Harness::new();
    harness
        .apply(&mut common::load("cluster.json").await)
        .await
        .unwrap();
    harness.cloud.clear_mutations().await;

    let report = harness
        .apply(&mut common::load("cluster.json").await)
        .await
        .unwrap();
    assert!(report.is_unchanged(), "{:?}", report.changes());
    assert!(harness.mutations().await.is_empty());
}

#[tokio::test]
async fn test_elastic_ip_recorded_on_subnet() {
    let harness = Harness::new();
    harness
        .apply(&mut common::load("cluster.json").await)
        .await
        .unwrap();

    let addresses = harness
        .cloud
        .compute()
        .describe_addresses(&Filter::default())
        .await
        .unwrap();
    assert_eq!(addresses.len(), 1);
    let subnets = harness
        .cloud
        .compute()
        .describe_subnets(&Filter::default())
        .await
        .unwrap();
    let private = subnets
        .iter()
        .find(|s| s.cidr_block == "10.0.32.0/19")
        .unwrap();
    assert_eq!(
        private.tags["AssociatedElasticIp"],
        addresses[0].allocation_id
    );
}

#[tokio::test]
async fn test_launch_configuration_rotation_keeps_three() {
    let harness = Harness::new();
    let key = TaskKey::new(Kind::LaunchConfiguration, "nodes.test.example.com");
    let mut deleted = Vec::new();
    let mut current = None;
    for instance_type in ["m5.large", "m5.xlarge", "m5.2xlarge", "c5.large", "c5.xlarge"] {
        let mut tasks = cluster_with_instance_type(instance_type).await;
        let report = harness.apply(&mut tasks).await.unwrap();
        deleted.extend(report.deletions);
        current = tasks.id_of(&key);
    }

    let mut names: Vec<String> = harness
        .cloud
        .autoscaling()
        .describe_launch_configurations()
        .await
        .unwrap()
        .into_iter()
        .map(|lc| lc.name)
        .collect();
    names.sort();
    assert_eq!(names.len(), 3);
    assert_eq!(deleted.len(), 2);
    assert_eq!(current.as_ref(), names.last());

    let groups = harness
        .cloud
        .autoscaling()
        .describe_auto_scaling_groups(&["nodes.test.example.com".to_string()])
        .await
        .unwrap();
    assert_eq!(groups[0].launch_configuration_name, current);
}

#[tokio::test]
async fn test_subnet_cidr_change_is_rejected() {
    let harness = Harness::new();
    harness
        .apply(&mut common::load("network.json").await)
        .await
        .unwrap();
    harness.cloud.clear_mutations().await;

    let document = tokio::fs::read_to_string(common::fixture("network.json"))
        .await
        .unwrap();
    let mut tasks = Inventory::from_json(&document.replace("10.0.32.0/19", "10.0.64.0/19"))
        .unwrap()
        .into_task_set()
        .unwrap();
    let err = harness.apply(&mut tasks).await.unwrap_err();

    match err.root() {
        Error::CannotChange { key, field } => {
            assert_eq!(key.kind, Kind::Subnet);
            assert_eq!(*field, "CIDR");
        }
        other => panic!("Expected CannotChange, got {:?}", other),
    }
    assert!(harness.mutations().await.is_empty());
}

#[tokio::test]
async fn test_shared_network_is_verified_only() {
    let harness = Harness::new();
    let compute = harness.cloud.compute();
    let vpc = compute
        .create_vpc(&VpcInfo {
            cidr_block: "172.20.0.0/16".into(),
            ..VpcInfo::default()
        })
        .await
        .unwrap();
    let igw = compute.create_internet_gateway(&Tags::new()).await.unwrap();
    compute.attach_internet_gateway(&igw.id, &vpc.id).await.unwrap();
    harness.cloud.clear_mutations().await;

    let document = format!(
        r#"{{"tasks": [
            {{"kind": "Vpc", "name": "shared", "lifecycle": "shared", "id": "{}"}},
            {{"kind": "InternetGateway", "name": "shared", "lifecycle": "shared",
              "id": "{}", "vpc": "Vpc/shared"}},
            {{"kind": "Subnet", "name": "us-east-1a.test.example.com", "vpc": "Vpc/shared",
              "cidr": "172.20.32.0/19", "availability_zone": "us-east-1a"}}
        ]}}"#,
        vpc.id, igw.id
    );
    let mut tasks = Inventory::from_json(&document)
        .unwrap()
        .into_task_set()
        .unwrap();
    let report = harness.apply(&mut tasks).await.unwrap();

    assert_eq!(
        report.outcome(&TaskKey::new(Kind::InternetGateway, "shared")),
        Some(&TaskOutcome::Verified)
    );
    assert_eq!(
        report.outcome(&TaskKey::new(Kind::Vpc, "shared")),
        Some(&TaskOutcome::Verified)
    );
    let mutations = harness.mutations().await;
    assert_eq!(mutations.len(), 1, "{:?}", mutations);
    assert!(mutations[0].starts_with("CreateSubnet"));
}

#[tokio::test]
async fn test_missing_shared_resource_fails() {
    let harness = Harness::new();
    let mut tasks = Inventory::from_json(
        r#"{"tasks": [{"kind": "Vpc", "name": "shared", "lifecycle": "shared", "id": "vpc-missing"}]}"#,
    )
    .unwrap()
    .into_task_set()
    .unwrap();

    let err = harness.apply(&mut tasks).await.unwrap_err();
    assert!(matches!(err.root(), Error::SharedNotFound { .. }));
    assert!(harness.mutations().await.is_empty());
}

#[tokio::test]
async fn test_cancelled_before_start() {
    let harness = Harness::new();
    let (tx, rx) = watch::channel(false);
    tx.send(true).unwrap();

    let executor = Executor::new(
        Target::Api(ApiTarget::new(harness.cloud.clone())),
        common::config(),
    )
    .with_cancel(rx)
    .with_audit(DeployAuditLogger::new_noop());
    let result = executor.run(&mut common::load("network.json").await).await;

    assert!(matches!(result, Err(Error::Cancelled)));
    assert!(harness.mutations().await.is_empty());
}

#[test]
fn test_autoscaling_tag_deletion() {
    let cases = [
        (vec![("a", "1")], vec![("a", "1")], vec![]),
        (vec![("a", "1"), ("b", "2")], vec![("a", "1")], vec!["b"]),
        (vec![("a", "1")], vec![("a", "2")], vec![]),
        (vec![("aws:cloudformation:stack-name", "x")], vec![], vec![]),
        (vec![], vec![("a", "1")], vec![]),
    ];
    for (actual, desired, expected) in cases {
        let deleted = tags_to_delete(&tags(&actual), &tags(&desired));
        let keys: Vec<&str> = deleted.keys().map(String::as_str).collect();
        assert_eq!(keys, expected, "actual {:?} desired {:?}", actual, desired);
    }
}

#[tokio::test]
async fn test_tag_dropped_from_group_is_deleted() {
    let harness = Harness::new();
    harness
        .apply(&mut cluster_with_group_tags(r#"{"OldTag": "OldValue"}"#).await)
        .await
        .unwrap();
    let group_name = "nodes.test.example.com".to_string();
    let groups = harness
        .cloud
        .autoscaling()
        .describe_auto_scaling_groups(&[group_name.clone()])
        .await
        .unwrap();
    assert_eq!(groups[0].tags.get("OldTag").map(String::as_str), Some("OldValue"));

    let report = harness
        .apply(&mut cluster_with_group_tags("{}").await)
        .await
        .unwrap();
    let key = TaskKey::new(Kind::AutoscalingGroup, "nodes.test.example.com");
    assert_eq!(report.outcome(&key), Some(&TaskOutcome::Updated(vec!["tags"])));

    let groups = harness
        .cloud
        .autoscaling()
        .describe_auto_scaling_groups(&[group_name])
        .await
        .unwrap();
    assert!(!groups[0].tags.contains_key("OldTag"), "{:?}", groups[0].tags);
    assert_eq!(
        groups[0].tags.get("Name").map(String::as_str),
        Some("nodes.test.example.com")
    );
}

#[test]
fn test_process_compare() {
    let strings = |items: &[&str]| items.iter().map(|s| s.to_string()).collect::<Vec<_>>();
    assert_eq!(
        process_compare(&strings(&["AZRebalance", "Launch"]), &strings(&["Launch"])),
        strings(&["AZRebalance"])
    );
    assert!(process_compare(&strings(&["Launch"]), &strings(&["Launch", "Terminate"])).is_empty());
    assert_eq!(
        process_compare(&strings(&["a", "a"]), &strings(&["a"])),
        strings(&["a"])
    );
}

#[test]
fn test_version_retention_spares_in_use() {
    let versions: Vec<VersionRecord> = (0..5)
        .map(|i| VersionRecord {
            name: format!("nodes-{}", i),
            id: format!("lt-{}", i),
            created: Utc.with_ymd_and_hms(2024, 1, 1, i, 0, 0).unwrap(),
        })
        .collect();
    let in_use: HashSet<String> = ["lt-0".to_string()].into_iter().collect();

    let deleted = select_for_deletion(versions, 3, &in_use);
    let names: Vec<&str> = deleted.iter().map(|v| v.name.as_str()).collect();
    assert_eq!(names, vec!["nodes-1"]);
}
