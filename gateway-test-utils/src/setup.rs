// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use camino::Utf8Path;
use dropshot::test_util::ClientTestContext;
use dropshot::test_util::LogContext;
use provisioner::fakes::FakeArm;
use provisioner::fakes::FakeCompute;
use provisioner::fakes::FakeEc2;
use provisioning_gateway::Backends;
use provisioning_gateway::Config;
use slog::o;
use std::sync::Arc;

/// In-memory provider APIs shared between a test and its gateway.
#[derive(Clone)]
pub struct ProviderFakes {
    pub ec2: Arc<FakeEc2>,
    pub compute: Arc<FakeCompute>,
    pub arm: Arc<FakeArm>,
}

impl ProviderFakes {
    pub fn populated() -> ProviderFakes {
        ProviderFakes {
            ec2: Arc::new(FakeEc2::populated()),
            compute: Arc::new(FakeCompute::populated()),
            arm: Arc::new(FakeArm::populated()),
        }
    }

    pub fn backends(&self) -> Backends {
        Backends {
            ec2: Some(self.ec2.clone()),
            compute: Some(self.compute.clone()),
            arm: Some(self.arm.clone()),
        }
    }
}

pub struct GatewayTestContext {
    pub client: ClientTestContext,
    pub server: provisioning_gateway::Server,
    pub fakes: ProviderFakes,
    pub logctx: LogContext,
}

impl GatewayTestContext {
    pub async fn teardown(self) {
        self.server.close().await.unwrap();
        self.logctx.cleanup_successful();
    }
}

pub fn load_test_config() -> Config {
    // The test config is located relative to the directory this file is in.
    let manifest_dir = Utf8Path::new(env!("CARGO_MANIFEST_DIR"));
    let config_file_path = manifest_dir.join("configs/config.test.toml");
    Config::from_file(&config_file_path)
        .expect("failed to load config.test.toml")
}

pub async fn test_setup(test_name: &str) -> GatewayTestContext {
    test_setup_with_config(
        test_name,
        load_test_config(),
        ProviderFakes::populated(),
    )
    .await
}

pub async fn test_setup_with_config(
    test_name: &str,
    config: Config,
    fakes: ProviderFakes,
) -> GatewayTestContext {
    let logctx = LogContext::new(test_name, &config.log);
    let log = &logctx.log;

    let server =
        provisioning_gateway::Server::start(&config, fakes.backends(), log)
            .await
            .unwrap();

    let client = ClientTestContext::new(
        server.local_addr(),
        log.new(o!("component" => "client test context")),
    );

    GatewayTestContext { client, server, fakes, logctx }
}
