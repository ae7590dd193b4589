// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use dropshot::test_util::read_json;
use gateway_test_utils::setup;
use http::method::Method;
use http::StatusCode;
use provisioning_gateway::params::InstanceView;
use serde_json::json;

#[tokio::test]
async fn aws_create_range() {
    let testctx = setup::test_setup("aws_create_range").await;
    let client = &testctx.client;

    let mut response = client
        .make_request(
            Method::POST,
            "/aws",
            Some(json!({
                "env": "prod",
                "tier": "app",
                "os": "redhat",
                "flavor": "8",
                "disks": "100GB, 200GB",
                "countTO": "1-3",
                "appCode": "app",
                "requestNum": "CHG100",
                "instanceType": "m5.large",
            })),
            StatusCode::CREATED,
        )
        .await
        .unwrap();
    let views: Vec<InstanceView> = read_json(&mut response).await;

    let names =
        views.iter().map(|v| v.instance_name.as_str()).collect::<Vec<_>>();
    assert_eq!(names, vec!["awspxepapp01", "awspxepapp02", "awspxepapp03"]);
    for view in &views {
        assert_eq!(view.status, "running");
        assert!(view.network_interfaces.is_some());
        assert!(view.error.is_none());
    }

    let launches = testctx.fakes.ec2.launches();
    assert_eq!(launches.len(), 3);
    for launch in &launches {
        assert_eq!(launch.subnet_id, "subnet-prod-app");
        assert_eq!(launch.security_group_ids, vec!["sg-prod-app"]);
        assert_eq!(launch.image_id, "ami-rhel-new");
        assert_eq!(launch.instance_type, "m5.large");
        assert_eq!(launch.data_disks.len(), 2);
        assert_eq!(launch.tags["ChangeNum"], "CHG100");
        assert_eq!(launch.tags["env"], "prod");
        assert_eq!(launch.tags["Name"], launch.name);
    }

    testctx.teardown().await;
}

#[tokio::test]
async fn aws_min_max_range() {
    let testctx = setup::test_setup("aws_min_max_range").await;
    let client = &testctx.client;

    let mut response = client
        .make_request(
            Method::POST,
            "/aws",
            Some(json!({
                "env": "base",
                "tier": "web",
                "os": "windows",
                "flavor": "2019",
                "min": 4,
                "max": 5,
                "appCode": "web",
                "requestNum": "CHG101",
            })),
            StatusCode::CREATED,
        )
        .await
        .unwrap();
    let views: Vec<InstanceView> = read_json(&mut response).await;
    assert_eq!(views.len(), 2);
    assert_eq!(views[0].instance_name, "awsbwedweb04");
    assert_eq!(views[1].instance_name, "awsbwedweb05");

    let launches = testctx.fakes.ec2.launches();
    assert!(launches.iter().all(|l| l.subnet_id == "subnet-base-web"));
    assert!(launches.iter().all(|l| l.image_id == "ami-win2019"));
    assert!(launches.iter().all(|l| l.instance_type == "t2.micro"));
    assert!(launches.iter().all(|l| l.data_disks.is_empty()));

    testctx.teardown().await;
}

#[tokio::test]
async fn aws_partial_failure_is_inline() {
    let testctx = setup::test_setup("aws_partial_failure_is_inline").await;
    let client = &testctx.client;
    testctx.fakes.ec2.fail_launch("awspxepapp02");

    let mut response = client
        .make_request(
            Method::POST,
            "/aws",
            Some(json!({
                "env": "prod",
                "tier": "app",
                "os": "redhat",
                "flavor": "8",
                "countTO": "1-3",
                "appCode": "app",
                "requestNum": "CHG102",
            })),
            StatusCode::CREATED,
        )
        .await
        .unwrap();
    let views: Vec<InstanceView> = read_json(&mut response).await;

    assert_eq!(views.len(), 3);
    assert!(views[0].error.is_none());
    assert_eq!(views[1].instance_name, "awspxepapp02");
    assert_eq!(views[1].status, "failed");
    let error = views[1].error.as_deref().unwrap();
    assert!(error.contains("InsufficientInstanceCapacity"), "{error}");
    assert!(views[2].error.is_none());

    testctx.teardown().await;
}

#[tokio::test]
async fn aws_every_index_failed() {
    let testctx = setup::test_setup("aws_every_index_failed").await;
    let client = &testctx.client;
    testctx.fakes.ec2.fail_launch("awspxepapp01");
    testctx.fakes.ec2.fail_launch("awspxepapp02");

    let error = client
        .make_request(
            Method::POST,
            "/aws",
            Some(json!({
                "env": "prod",
                "tier": "app",
                "os": "redhat",
                "flavor": "8",
                "countTO": "1-2",
                "appCode": "app",
                "requestNum": "CHG103",
            })),
            StatusCode::BAD_GATEWAY,
        )
        .await
        .expect_err("expected every index to fail");
    assert_eq!(error.error_code.as_deref(), Some("FanoutFailed"));
    assert!(error.message.contains("[1]"), "{}", error.message);
    assert!(error.message.contains("[2]"), "{}", error.message);

    testctx.teardown().await;
}

#[tokio::test]
async fn aws_missing_subnet_creates_nothing() {
    let testctx =
        setup::test_setup("aws_missing_subnet_creates_nothing").await;
    let client = &testctx.client;

    let error = client
        .make_request(
            Method::POST,
            "/aws",
            Some(json!({
                "env": "base",
                "tier": "db",
                "os": "redhat",
                "flavor": "8",
                "countTO": "1-2",
                "appCode": "db",
                "requestNum": "CHG104",
            })),
            StatusCode::INTERNAL_SERVER_ERROR,
        )
        .await
        .expect_err("expected subnet lookup to fail");
    assert_eq!(error.error_code.as_deref(), Some("ResourceNotFound"));
    assert!(
        error.message.starts_with("subnet not found"),
        "{}",
        error.message
    );
    assert!(testctx.fakes.ec2.launches().is_empty());

    testctx.teardown().await;
}
