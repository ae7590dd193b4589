// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use dropshot::test_util::read_json;
use gateway_test_utils::setup;
use http::method::Method;
use http::StatusCode;
use provisioning_gateway::params::InstanceView;
use serde_json::json;

fn windows_body(tier: &str, resource_group: Option<&str>) -> serde_json::Value {
    let mut body = json!({
        "env": "nonProd",
        "tier": tier,
        "os": "windows",
        "flavor": "2019-Datacenter",
        "disks": "128GB",
        "countTO": "1-2",
        "appCode": "app",
        "requestNum": "REQ300",
    });
    if let Some(rg) = resource_group {
        body["resourceGroup"] = json!(rg);
    }
    body
}

#[tokio::test]
async fn azure_create_then_get() {
    let testctx = setup::test_setup("azure_create_then_get").await;
    let client = &testctx.client;

    let mut response = client
        .make_request(
            Method::POST,
            "/azure",
            Some(windows_body("web", Some("rg-apps"))),
            StatusCode::CREATED,
        )
        .await
        .unwrap();
    let views: Vec<InstanceView> = read_json(&mut response).await;

    let names =
        views.iter().map(|v| v.instance_name.as_str()).collect::<Vec<_>>();
    assert_eq!(names, vec!["azswwdapp01", "azswwdapp02"]);
    for view in &views {
        assert_eq!(view.status, "Succeeded");
        assert_eq!(view.zone.as_deref(), Some("eastus"));
        assert!(view.network_interfaces.is_some());
    }

    let arm = &testctx.fakes.arm;
    assert_eq!(arm.availability_sets(), vec!["az-nonprod-avs-001"]);
    let mut nics = arm.nics().into_iter().map(|n| n.name).collect::<Vec<_>>();
    nics.sort();
    assert_eq!(nics, vec!["azswwdapp01-nic-01", "azswwdapp02-nic-01"]);
    for vm in arm.vms() {
        assert_eq!(vm.tags["Request#"], "REQ300");
        assert_eq!(vm.vm_size, "Standard_B1s");
        assert_eq!(vm.data_disks.len(), 1);
        assert_eq!(vm.os_disk_name(), format!("{}-os", vm.name));
    }

    let created = views[1].clone();
    let mut response = client
        .make_request(
            Method::GET,
            "/azure?resourceGroup=rg-apps&vmName=azswwdapp02",
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
async fn azure_resource_group_required() {
    let testctx = setup::test_setup("azure_resource_group_required").await;
    let client = &testctx.client;

    let error = client
        .make_request(
            Method::POST,
            "/azure",
            Some(windows_body("web", None)),
            StatusCode::BAD_REQUEST,
        )
        .await
        .expect_err("expected a missing resource group to be rejected");
    assert_eq!(error.error_code.as_deref(), Some("InvalidInput"));
    assert!(testctx.fakes.arm.availability_sets().is_empty());
    assert!(testctx.fakes.arm.nics().is_empty());

    testctx.teardown().await;
}

#[tokio::test]
async fn azure_db_tier_has_no_subnet() {
    let testctx = setup::test_setup("azure_db_tier_has_no_subnet").await;
    let client = &testctx.client;

    let error = client
        .make_request(
            Method::POST,
            "/azure",
            Some(windows_body("db", Some("rg-apps"))),
            StatusCode::INTERNAL_SERVER_ERROR,
        )
        .await
        .expect_err("expected subnet resolution to fail");
    assert_eq!(error.error_code.as_deref(), Some("ResourceNotFound"));
    assert!(testctx.fakes.arm.vms().is_empty());

    testctx.teardown().await;
}

#[tokio::test]
async fn azure_failed_vm_is_inline() {
    let testctx = setup::test_setup("azure_failed_vm_is_inline").await;
    let client = &testctx.client;
    testctx.fakes.arm.fail_vm("azswwdapp02");

    let mut response = client
        .make_request(
            Method::POST,
            "/azure",
            Some(windows_body("app", Some("rg-apps"))),
            StatusCode::CREATED,
        )
        .await
        .unwrap();
    let views: Vec<InstanceView> = read_json(&mut response).await;
    assert!(views[0].error.is_none());
    let error = views[1].error.as_deref().unwrap();
    assert!(error.contains("create virtual machine"), "{error}");
    assert!(error.contains("AllocationFailed"), "{error}");

    let error = client
        .make_request(
            Method::GET,
            "/azure?resourceGroup=rg-apps&vmName=azswwdapp02",
            None as Option<()>,
            StatusCode::NOT_FOUND,
        )
        .await
        .expect_err("expected the failed VM to be absent");
    assert_eq!(error.error_code.as_deref(), Some("ResourceNotFound"));

    testctx.teardown().await;
}

#[tokio::test]
async fn azure_rejects_unnamed_linux() {
    let testctx = setup::test_setup("azure_rejects_unnamed_linux").await;
    let client = &testctx.client;

    let mut body = windows_body("app", Some("rg-apps"));
    body["os"] = json!("ubuntu");
    body["flavor"] = json!("22.04");
    let error = client
        .make_request(
            Method::POST,
            "/azure",
            Some(body),
            StatusCode::BAD_REQUEST,
        )
        .await
        .expect_err("expected ubuntu to be rejected");
    assert_eq!(error.error_code.as_deref(), Some("UnsupportedOs"));
    assert!(testctx.fakes.arm.availability_sets().is_empty());

    testctx.teardown().await;
}
