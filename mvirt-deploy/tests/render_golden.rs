//! Manifest renders of the network fixture, compared against checked-in files.

mod common;

use mvirt_deploy::audit::DeployAuditLogger;
use mvirt_deploy::target::hcl::MANIFEST_FILE;
use mvirt_deploy::target::json::STACK_FILE;
use mvirt_deploy::target::{HclTarget, JsonTarget, Target};
use mvirt_deploy::Executor;

const TRUST_POLICY: &str = r#"{"Version":"2012-10-17","Statement":[{"Effect":"Allow","Principal":{"Service":"ec2.amazonaws.com"},"Action":"sts:AssumeRole"}]}"#;

async fn golden(name: &str) -> String {
    tokio::fs::read_to_string(common::golden(name))
        .await
        .expect("Failed to read golden file")
}

#[tokio::test]
async fn test_hcl_matches_golden() {
    let mut tasks = common::load("network.json").await;
    let files = common::render_hcl(&mut tasks).await;

    assert_eq!(files[MANIFEST_FILE], golden("main.tf").await);
    assert_eq!(
        files["data/aws_iam_role_nodes-test-example-com_policy"],
        TRUST_POLICY
    );
    assert_eq!(files.len(), 2);
}

#[tokio::test]
async fn test_json_matches_golden() {
    let mut tasks = common::load("network.json").await;
    let rendered = common::render_json(&mut tasks).await;

    let expected: serde_json::Value =
        serde_json::from_str(&golden("stack.json").await).expect("golden is JSON");
    let actual: serde_json::Value = serde_json::from_str(&rendered).unwrap();
    assert_eq!(actual, expected);
    assert!(rendered.ends_with("}\n"));
}

#[tokio::test]
async fn test_renders_are_deterministic() {
    let mut first = common::load("network.json").await;
    let mut second = common::load("network.json").await;

    assert_eq!(
        common::render_hcl(&mut first).await,
        common::render_hcl(&mut second).await
    );
    assert_eq!(
        common::render_json(&mut first).await,
        common::render_json(&mut second).await
    );
}

#[tokio::test]
async fn test_hcl_written_to_directory() {
    let dir = tempfile::tempdir().unwrap();
    let mut tasks = common::load("network.json").await;

    let executor = Executor::new(Target::Hcl(HclTarget::new("us-east-1")), common::config())
        .with_audit(DeployAuditLogger::new_noop());
    executor.run(&mut tasks).await.unwrap();
    let Target::Hcl(hcl) = executor.target() else {
        unreachable!()
    };
    let written = hcl.write_to(dir.path()).await.unwrap();

    assert_eq!(written.len(), 2);
    let manifest = tokio::fs::read_to_string(dir.path().join(MANIFEST_FILE))
        .await
        .unwrap();
    assert_eq!(manifest, golden("main.tf").await);
    let policy = tokio::fs::read_to_string(
        dir.path()
            .join("data")
            .join("aws_iam_role_nodes-test-example-com_policy"),
    )
    .await
    .unwrap();
    assert_eq!(policy, TRUST_POLICY);
}

#[tokio::test]
async fn test_stack_written_to_directory() {
    let dir = tempfile::tempdir().unwrap();
    let mut tasks = common::load("network.json").await;

    let executor = Executor::new(Target::Json(JsonTarget::new()), common::config())
        .with_audit(DeployAuditLogger::new_noop());
    executor.run(&mut tasks).await.unwrap();
    let Target::Json(json) = executor.target() else {
        unreachable!()
    };
    let path = json.write_to(dir.path()).await.unwrap();

    assert_eq!(path, dir.path().join(STACK_FILE));
    let written: serde_json::Value =
        serde_json::from_str(&tokio::fs::read_to_string(&path).await.unwrap()).unwrap();
    assert_eq!(written["Outputs"]["VpcId"]["Value"]["Ref"], "AWSEC2VPCmain");
    assert_eq!(
        written["Resources"]["AWSEC2Subnetuseast1atestexamplecom"]["Properties"]["VpcId"]["Ref"],
        "AWSEC2VPCmain"
    );
}
