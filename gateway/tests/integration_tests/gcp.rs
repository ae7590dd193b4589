// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use dropshot::test_util::read_json;
use gateway_test_utils::setup;
use http::method::Method;
use http::StatusCode;
use provisioning_gateway::params::InstanceView;
use serde_json::json;

fn prod_web_body(count: &str) -> serde_json::Value {
    json!({
        "env": "prod",
        "tier": "web",
        "os": "centos",
        "flavor": "7",
        "disks": "50GB",
        "countTO": count,
        "appCode": "web",
        "requestNum": "CHG200",
        "description": "frontend pool",
    })
}

#[tokio::test]
async fn gcp_create_then_get() {
    let testctx = setup::test_setup("gcp_create_then_get").await;
    let client = &testctx.client;

    let mut response = client
        .make_request(
            Method::POST,
            "/gcp",
            Some(prod_web_body("1-3")),
            StatusCode::CREATED,
        )
        .await
        .unwrap();
    let views: Vec<InstanceView> = read_json(&mut response).await;

    let placed = views
        .iter()
        .map(|v| (v.instance_name.as_str(), v.zone.as_deref().unwrap()))
        .collect::<Vec<_>>();
    assert_eq!(
        placed,
        vec![
            ("gcppxepweb01", "us-east1-b"),
            ("gcppxepweb02", "us-east1-c"),
            ("gcppxepweb03", "us-east1-b"),
        ]
    );
    assert!(views.iter().all(|v| v.status == "RUNNING"));

    let inserts = testctx.fakes.compute.inserts();
    assert_eq!(inserts.len(), 3);
    for insert in &inserts {
        assert!(insert.subnetwork.ends_with("/subnetworks/prod-web-subnet"));
        assert_eq!(insert.source_image, "centos-7-v20200101");
        assert_eq!(insert.description.as_deref(), Some("frontend pool"));
        assert_eq!(insert.data_disks.len(), 1);
        assert_eq!(insert.labels["change"], "chg200");
    }

    let created = views[1].clone();
    let mut response = client
        .make_request(
            Method::GET,
            "/gcp?instanceName=gcppxepweb02&zone=us-east1-c",
            None as Option<()>,
            StatusCode::OK,
        )
        .await
        .unwrap();
    let fetched: InstanceView = read_json(&mut response).await;
    assert_eq!(fetched, created);

    testctx.teardown().await;
}

#[tokio::test]
async fn gcp_get_missing_instance() {
    let testctx = setup::test_setup("gcp_get_missing_instance").await;
    let client = &testctx.client;

    let error = client
        .make_request(
            Method::GET,
            "/gcp?instanceName=gcppxepweb09&zone=us-east1-b",
            None as Option<()>,
            StatusCode::NOT_FOUND,
        )
        .await
        .expect_err("expected instance lookup to fail");
    assert_eq!(error.error_code.as_deref(), Some("ResourceNotFound"));
    assert!(error.message.contains("gcppxepweb09"), "{}", error.message);

    testctx.teardown().await;
}

#[tokio::test]
async fn gcp_failed_operation_is_inline() {
    let testctx = setup::test_setup("gcp_failed_operation_is_inline").await;
    let client = &testctx.client;
    testctx.fakes.compute.fail_insert("gcppxepweb01");

    let mut response = client
        .make_request(
            Method::POST,
            "/gcp",
            Some(prod_web_body("1-2")),
            StatusCode::CREATED,
        )
        .await
        .unwrap();
    let views: Vec<InstanceView> = read_json(&mut response).await;

    let error = views[0].error.as_deref().unwrap();
    assert!(error.contains("QUOTA_EXCEEDED"), "{error}");
    assert_eq!(views[1].instance_name, "gcppxepweb02");
    assert!(views[1].error.is_none());

    testctx.teardown().await;
}
