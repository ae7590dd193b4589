// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Executable program to run the provisioning gateway

use camino::Utf8PathBuf;
use clap::Parser;
use provisioning_gateway::run_openapi;
use provisioning_gateway::run_server;
use provisioning_gateway::Config;
use slog_error_chain::InlineErrorChain;

#[derive(Debug, Parser)]
#[clap(name = "provgw", about = "Provision virtual machines over HTTP")]
struct Args {
    #[clap(
        short = 'O',
        long = "openapi",
        help = "Print the external OpenAPI Spec document and exit",
        action
    )]
    openapi: bool,

    #[clap(
        name = "CONFIG_FILE_PATH",
        action,
        required_unless_present = "openapi"
    )]
    config_file_path: Option<Utf8PathBuf>,
}

/// Why the command failed, and so which exit code it ends with.
#[derive(Debug)]
enum CmdError {
    /// The arguments could not be used.
    Usage(String),
    /// Startup or the server itself failed.
    Failure(String),
}

fn fatal(cmd_error: CmdError) -> ! {
    let (message, code) = match cmd_error {
        CmdError::Usage(message) => (message, 2),
        CmdError::Failure(message) => (message, 1),
    };
    eprintln!("provgw: {message}");
    std::process::exit(code);
}

#[tokio::main]
async fn main() {
    if let Err(cmd_error) = do_run().await {
        fatal(cmd_error);
    }
}

async fn do_run() -> Result<(), CmdError> {
    let args = Args::parse();

    if args.openapi {
        return run_openapi().map_err(CmdError::Failure);
    }
    let Some(config_file_path) = args.config_file_path else {
        return Err(CmdError::Usage(String::from(
            "CONFIG_FILE_PATH is required",
        )));
    };
    let config = Config::from_file(&config_file_path)
        .map_err(|e| CmdError::Failure(e.to_string()))?;

    run_server(config).await.map_err(|e| {
        CmdError::Failure(InlineErrorChain::new(&e).to_string())
    })
}
