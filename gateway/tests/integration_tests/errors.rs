// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Requests rejected before any provider call.

use gateway_test_utils::setup;
use gateway_test_utils::setup::ProviderFakes;
use http::method::Method;
use http::StatusCode;
use serde_json::json;

fn body(env: &str, os: &str, disks: &str, count: &str) -> serde_json::Value {
    json!({
        "env": env,
        "tier": "app",
        "os": os,
        "flavor": "8",
        "disks": disks,
        "countTO": count,
        "appCode": "app",
        "requestNum": "CHG400",
    })
}

#[tokio::test]
async fn unconfigured_provider() {
    let mut config = setup::load_test_config();
    config.azure = None;
    let testctx = setup::test_setup_with_config(
        "unconfigured_provider",
        config,
        ProviderFakes::populated(),
    )
    .await;
    let client = &testctx.client;

    let error = client
        .make_request(
            Method::POST,
            "/azure",
            Some(body("nonprod", "redhat", "", "1-1")),
            StatusCode::SERVICE_UNAVAILABLE,
        )
        .await
        .expect_err("expected azure to be disabled");
    assert_eq!(error.error_code.as_deref(), Some("ProviderNotConfigured"));

    let error = client
        .make_request(
            Method::GET,
            "/azure?resourceGroup=rg&vmName=azsxwdapp01",
            None as Option<()>,
            StatusCode::SERVICE_UNAVAILABLE,
        )
        .await
        .expect_err("expected azure to be disabled");
    assert_eq!(error.error_code.as_deref(), Some("ProviderNotConfigured"));
    assert!(testctx.fakes.arm.availability_sets().is_empty());

    // The other providers keep working.
    client
        .make_request(
            Method::POST,
            "/aws",
            Some(body("prod", "redhat", "", "1-1")),
            StatusCode::CREATED,
        )
        .await
        .unwrap();

    testctx.teardown().await;
}

#[tokio::test]
async fn invalid_requests() {
    let testctx = setup::test_setup("invalid_requests").await;
    let client = &testctx.client;

    let cases = [
        (body("staging", "redhat", "", "1-2"), "InvalidInput"),
        (body("prod", "redhat", "", "3-1"), "InvalidInput"),
        // More than the configured `max_instances`.
        (body("prod", "redhat", "", "1-11"), "InvalidInput"),
        (body("prod", "redhat", "100GB,abcGB", "1-2"), "InvalidSize"),
        (body("prod", "redhat", "0GB", "1-2"), "InvalidSize"),
        // AWS attaches at most four data disks.
        (
            body("prod", "redhat", "10GB,10GB,10GB,10GB,10GB", "1-2"),
            "InvalidSize",
        ),
        // AWS names have no nonprod environment.
        (body("nonprod", "redhat", "", "1-2"), "UnsupportedCombination"),
        (body("prod", "plan9", "", "1-2"), "UnsupportedCombination"),
    ];
    for (request, code) in cases {
        let error = client
            .make_request(
                Method::POST,
                "/aws",
                Some(request.clone()),
                StatusCode::BAD_REQUEST,
            )
            .await
            .expect_err("expected request to be rejected");
        assert_eq!(error.error_code.as_deref(), Some(code), "{request}");
    }
    assert!(testctx.fakes.ec2.launches().is_empty());

    testctx.teardown().await;
}
