// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::error::Error;
use crate::Config;
use provisioner::aws::AwsPipeline;
use provisioner::aws::Ec2Api;
use provisioner::aws::SdkEc2;
use provisioner::azure::ArmApi;
use provisioner::azure::ArmRest;
use provisioner::azure::AzurePipeline;
use provisioner::fanout::Orchestrator;
use provisioner::gcp::ComputeApi;
use provisioner::gcp::SdkCompute;
use provisioner::gcp::GcpPipeline;
use provisioner::Provider;
use slog::debug;
use slog::Logger;
use std::sync::Arc;

/// Provider API clients the pipelines run against. A provider with no
/// client is disabled.
#[derive(Clone, Default)]
pub struct Backends {
    pub ec2: Option<Arc<dyn Ec2Api>>,
    pub compute: Option<Arc<dyn ComputeApi>>,
    pub arm: Option<Arc<dyn ArmApi>>,
}

impl Backends {
    /// Connects a production client for every provider with a config table.
    pub async fn connect(
        config: &Config,
        log: &Logger,
    ) -> Result<Backends, provisioner::Error> {
        let mut backends = Backends::default();
        if let Some(aws) = &config.aws {
            debug!(log, "connecting to EC2"; "region" => &aws.region);
            backends.ec2 = Some(Arc::new(SdkEc2::connect(aws).await));
        }
        if let Some(gcp) = &config.gcp {
            debug!(log, "connecting to compute engine";
                "project" => &gcp.project_id);
            backends.compute = Some(Arc::new(SdkCompute::new(gcp).await?));
        }
        if let Some(azure) = &config.azure {
            debug!(log, "connecting to resource manager";
                "subscription" => &azure.subscription_id);
            backends.arm = Some(Arc::new(ArmRest::new(azure)?));
        }
        Ok(backends)
    }
}

/// Shared state used by API request handlers
pub struct ServerContext {
    pub log: Logger,
    pub orchestrator: Orchestrator,
    aws: Option<Arc<AwsPipeline>>,
    gcp: Option<Arc<GcpPipeline>>,
    azure: Option<Arc<AzurePipeline>>,
}

fn missing_backend(provider: Provider) -> String {
    format!("provider {provider} is configured but has no API client")
}

impl ServerContext {
    pub fn new(
        config: &Config,
        backends: Backends,
        log: &Logger,
    ) -> Result<Arc<Self>, String> {
        let retry = &config.lookup_retry;
        let aws = match (&config.aws, backends.ec2) {
            (None, _) => None,
            (Some(aws), Some(ec2)) => Some(Arc::new(AwsPipeline::new(
                aws.clone(),
                retry.clone(),
                ec2,
            ))),
            (Some(_), None) => return Err(missing_backend(Provider::Aws)),
        };
        let gcp = match (&config.gcp, backends.compute) {
            (None, _) => None,
            (Some(gcp), Some(compute)) => Some(Arc::new(GcpPipeline::new(
                gcp.clone(),
                retry.clone(),
                compute,
            ))),
            (Some(_), None) => return Err(missing_backend(Provider::Gcp)),
        };
        let azure = match (&config.azure, backends.arm) {
            (None, _) => None,
            (Some(azure), Some(arm)) => Some(Arc::new(AzurePipeline::new(
                azure.clone(),
                retry.clone(),
                arm,
            ))),
            (Some(_), None) => return Err(missing_backend(Provider::Azure)),
        };

        Ok(Arc::new(ServerContext {
            log: log.clone(),
            orchestrator: Orchestrator::new(config.fanout.clone()),
            aws,
            gcp,
            azure,
        }))
    }

    pub(crate) fn aws(&self) -> Result<Arc<AwsPipeline>, Error> {
        self.aws.clone().ok_or(Error::ProviderNotConfigured(Provider::Aws))
    }

    pub(crate) fn gcp(&self) -> Result<Arc<GcpPipeline>, Error> {
        self.gcp.clone().ok_or(Error::ProviderNotConfigured(Provider::Gcp))
    }

    pub(crate) fn azure(&self) -> Result<Arc<AzurePipeline>, Error> {
        self.azure
            .clone()
            .ok_or(Error::ProviderNotConfigured(Provider::Azure))
    }

    /// Providers that can serve requests.
    pub fn enabled_providers(&self) -> Vec<Provider> {
        let mut providers = Vec::new();
        if self.aws.is_some() {
            providers.push(Provider::Aws);
        }
        if self.gcp.is_some() {
            providers.push(Provider::Gcp);
        }
        if self.azure.is_some() {
            providers.push(Provider::Azure);
        }
        providers
    }
}
