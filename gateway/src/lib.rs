// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! HTTP front end of the provisioner: one create endpoint per cloud provider
//! plus single-instance status lookups for GCP and Azure.

mod config;
mod context;
mod error;
pub mod http_entrypoints;
pub mod params;

pub use config::Config;
pub use config::LoadError;
pub use config::PartialDropshotConfig;
pub use context::Backends;
pub use context::ServerContext;

use dropshot::ConfigDropshot;
use dropshot::HandlerTaskMode;
use slog::error;
use slog::info;
use slog::o;
use slog::Logger;
use slog_error_chain::InlineErrorChain;
use slog_error_chain::SlogInlineError;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;

/// Run the OpenAPI generator for the API; which emits the OpenAPI spec
/// to stdout.
pub fn run_openapi() -> Result<(), String> {
    http_entrypoints::api()
        .openapi("Provisioning Gateway API", "0.1.0")
        .description(
            "Provision virtual machines on AWS, GCP and Azure from one \
             declarative request",
        )
        .write(&mut std::io::stdout())
        .map_err(|e| e.to_string())
}

#[derive(Debug, Error, SlogInlineError)]
pub enum StartError {
    #[error("failed to initialize logger")]
    InitializeLogger(#[source] std::io::Error),
    #[error("failed to connect to provider APIs")]
    ConnectBackends(#[source] provisioner::Error),
    #[error("failed to initialize server context: {0}")]
    InitializeContext(String),
    #[error("failed to initialize HTTP server")]
    InitializeHttpServer(#[source] dropshot::BuildError),
    #[error("HTTP server stopped: {0}")]
    Shutdown(String),
}

type HttpServer = dropshot::HttpServer<Arc<ServerContext>>;

pub struct Server {
    /// shared state used by API request handlers
    apictx: Arc<ServerContext>,
    http_server: HttpServer,
}

impl Server {
    /// Start a gateway server against the given provider clients.
    pub async fn start(
        config: &Config,
        backends: Backends,
        log: &Logger,
    ) -> Result<Server, StartError> {
        info!(log, "setting up provisioning gateway");

        let apictx = ServerContext::new(config, backends, log)
            .map_err(StartError::InitializeContext)?;
        info!(
            log,
            "providers enabled";
            "providers" => ?apictx.enabled_providers(),
        );

        let dropshot = ConfigDropshot {
            bind_address: config.dropshot.bind_address,
            default_request_body_max_bytes: config
                .dropshot
                .request_body_max_bytes,
            // Dropping a handler drops its fan-out, which aborts every
            // worker the request still has running.
            default_handler_task_mode: HandlerTaskMode::CancelOnDisconnect,
            ..Default::default()
        };
        let http_server = dropshot::ServerBuilder::new(
            http_entrypoints::api(),
            Arc::clone(&apictx),
            log.new(o!("component" => "dropshot")),
        )
        .config(dropshot)
        .start()
        .map_err(StartError::InitializeHttpServer)?;

        Ok(Server { apictx, http_server })
    }

    pub fn apictx(&self) -> &Arc<ServerContext> {
        &self.apictx
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.http_server.local_addr()
    }

    /// Wait for the server to shut down
    ///
    /// Note that this doesn't initiate a graceful shutdown, so if you call this
    /// immediately after calling `start()`, the program will block indefinitely
    /// or until something else initiates a graceful shutdown.
    pub async fn wait_for_finish(self) -> Result<(), String> {
        self.http_server.wait_for_shutdown().await
    }

    pub async fn close(self) -> Result<(), String> {
        self.http_server.close().await
    }
}

/// Run an instance of the [Server] against the production provider APIs.
pub async fn run_server(config: Config) -> Result<(), StartError> {
    let log = config
        .log
        .to_logger("provgw")
        .map_err(StartError::InitializeLogger)?;
    let result: Result<(), StartError> = async {
        let backends = Backends::connect(&config, &log)
            .await
            .map_err(StartError::ConnectBackends)?;
        let server = Server::start(&config, backends, &log).await?;
        info!(log, "listening"; "local_addr" => %server.local_addr());
        server.wait_for_finish().await.map_err(StartError::Shutdown)
    }
    .await;
    if let Err(e) = &result {
        error!(log, "provisioning gateway failed"; InlineErrorChain::new(e));
    }
    result
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_start_error_chain_names_the_cause() {
        let error = StartError::ConnectBackends(provisioner::Error::unavailable(
            "connect to Compute Engine",
            "no application default credentials",
        ));
        let rendered = InlineErrorChain::new(&error).to_string();
        assert!(
            rendered.starts_with("failed to connect to provider APIs: "),
            "{rendered}"
        );
        assert!(
            rendered.contains("no application default credentials"),
            "{rendered}"
        );
    }
}
