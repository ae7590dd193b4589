// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Interfaces for parsing configuration files and working with a gateway server
//! configuration

use camino::Utf8Path;
use camino::Utf8PathBuf;
use dropshot::ConfigLogging;
use provisioner::aws::AwsConfig;
use provisioner::azure::AzureConfig;
use provisioner::backoff::LookupRetryConfig;
use provisioner::fanout::FanoutConfig;
use provisioner::gcp::GcpConfig;
use serde::Deserialize;
use serde::Serialize;
use slog_error_chain::SlogInlineError;
use std::net::SocketAddr;
use thiserror::Error;

/// Configuration for a gateway server
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Config {
    /// Partial configuration for our dropshot server.
    pub dropshot: PartialDropshotConfig,
    /// Server-wide logging configuration.
    pub log: ConfigLogging,
    /// Bounds on the per-request worker pool.
    #[serde(default)]
    pub fanout: FanoutConfig,
    /// Backoff applied to read-only lookups against the providers.
    #[serde(default)]
    pub lookup_retry: LookupRetryConfig,
    /// A provider without a table is disabled.
    #[serde(default)]
    pub aws: Option<AwsConfig>,
    #[serde(default)]
    pub gcp: Option<GcpConfig>,
    #[serde(default)]
    pub azure: Option<AzureConfig>,
}

impl Config {
    /// Load a `Config` from the given TOML file
    ///
    /// This config object can then be used to create a new gateway server.
    pub fn from_file(path: &Utf8Path) -> Result<Config, LoadError> {
        let file_contents = std::fs::read_to_string(path)
            .map_err(|err| LoadError::Io { path: path.into(), err })?;
        let config_parsed: Config = toml::from_str(&file_contents)
            .map_err(|err| LoadError::Parse { path: path.into(), err })?;
        Ok(config_parsed)
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct PartialDropshotConfig {
    pub bind_address: SocketAddr,
    pub request_body_max_bytes: usize,
}

#[derive(Debug, Error, SlogInlineError)]
pub enum LoadError {
    #[error("error reading \"{path}\": {err}")]
    Io {
        path: Utf8PathBuf,
        #[source]
        err: std::io::Error,
    },
    #[error("error parsing \"{path}\": {err}")]
    Parse {
        path: Utf8PathBuf,
        #[source]
        err: toml::de::Error,
    },
}

#[cfg(test)]
mod test {
    use super::*;
    use dropshot::ConfigLoggingLevel;

    #[test]
    fn test_minimal_config_disables_every_provider() {
        let config: Config = toml::from_str(
            r#"
            [dropshot]
            bind_address = "127.0.0.1:12230"
            request_body_max_bytes = 1048576

            [log]
            mode = "stderr-terminal"
            level = "info"
            "#,
        )
        .unwrap();

        assert_eq!(config.dropshot.bind_address.port(), 12230);
        assert_eq!(
            config.log,
            ConfigLogging::StderrTerminal { level: ConfigLoggingLevel::Info }
        );
        assert_eq!(config.fanout, FanoutConfig::default());
        assert_eq!(config.lookup_retry, LookupRetryConfig::default());
        assert!(config.aws.is_none());
        assert!(config.gcp.is_none());
        assert!(config.azure.is_none());
    }

    #[test]
    fn test_provider_tables() {
        let config: Config = toml::from_str(
            r#"
            [dropshot]
            bind_address = "[::1]:0"
            request_body_max_bytes = 65536

            [log]
            mode = "stderr-terminal"
            level = "debug"

            [fanout]
            max_parallelism = 2

            [aws]
            region = "us-west-2"

            [gcp]
            project_id = "infra-1234"

            [azure]
            subscription_id = "00000000-0000-0000-0000-000000000000"
            default_resource_group = "az-apps-rg"
            "#,
        )
        .unwrap();

        assert_eq!(config.fanout.max_parallelism, 2);
        assert_eq!(
            config.fanout.worker_timeout_secs,
            FanoutConfig::default().worker_timeout_secs
        );
        assert_eq!(config.aws.unwrap().region, "us-west-2");
        assert_eq!(config.gcp.unwrap().project_id, "infra-1234");
        assert_eq!(
            config.azure.unwrap().default_resource_group.as_deref(),
            Some("az-apps-rg")
        );
    }

    #[test]
    fn test_load_errors_name_the_file() {
        let missing = Utf8Path::new("/nonexistent/provgw.toml");
        let error = Config::from_file(missing).unwrap_err();
        assert!(matches!(error, LoadError::Io { .. }));
        assert!(error.to_string().contains("/nonexistent/provgw.toml"));
    }
}
