// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error handling facilities for the provisioning gateway.

use dropshot::ErrorStatusCode;
use dropshot::HttpError;
use provisioner::Error as ProvisionError;
use provisioner::Provider;
use provisioner::ResourceKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub(crate) enum Error {
    #[error("provider {0} is not configured on this gateway")]
    ProviderNotConfigured(Provider),
    #[error(transparent)]
    Provision(#[from] ProvisionError),
}

/// Short name of a provisioning error, used as the `error_code` of the HTTP
/// error body.
fn error_code(err: &ProvisionError) -> &'static str {
    match err {
        ProvisionError::InvalidInput { .. } => "InvalidInput",
        ProvisionError::InvalidSize { .. } => "InvalidSize",
        ProvisionError::UnsupportedCombination { .. } => {
            "UnsupportedCombination"
        }
        ProvisionError::UnsupportedOs { .. } => "UnsupportedOs",
        ProvisionError::ResourceNotFound { .. } => "ResourceNotFound",
        ProvisionError::RemoteRejected { .. } => "RemoteRejected",
        ProvisionError::RemoteUnavailable { .. } => "RemoteUnavailable",
        ProvisionError::Timeout { .. } => "Timeout",
        ProvisionError::PartialFanoutFailure { .. } => "PartialFanoutFailure",
        ProvisionError::FanoutFailed { .. } => "FanoutFailed",
        ProvisionError::Internal { .. } => "Internal",
    }
}

fn http_err_with_message(
    status_code: ErrorStatusCode,
    error_code: &str,
    message: String,
) -> HttpError {
    HttpError {
        status_code,
        error_code: Some(error_code.to_string()),
        external_message: message.clone(),
        internal_message: message,
        headers: None,
    }
}

impl From<Error> for HttpError {
    fn from(err: Error) -> Self {
        match err {
            Error::ProviderNotConfigured(_) => HttpError::for_unavail(
                Some("ProviderNotConfigured".to_string()),
                err.to_string(),
            ),
            Error::Provision(err) => provision_http_error(err),
        }
    }
}

fn provision_http_error(err: ProvisionError) -> HttpError {
    let code = error_code(&err);
    let message = err.to_string();
    match err {
        ProvisionError::InvalidInput { .. }
        | ProvisionError::InvalidSize { .. }
        | ProvisionError::UnsupportedCombination { .. }
        | ProvisionError::UnsupportedOs { .. } => {
            HttpError::for_bad_request(Some(code.to_string()), message)
        }
        // Only a status lookup asks for a single instance by name.
        ProvisionError::ResourceNotFound {
            kind: ResourceKind::Instance,
            ..
        } => HttpError::for_not_found(Some(code.to_string()), message),
        ProvisionError::RemoteRejected { .. }
        | ProvisionError::FanoutFailed { .. } => http_err_with_message(
            ErrorStatusCode::BAD_GATEWAY,
            code,
            message,
        ),
        ProvisionError::RemoteUnavailable { .. } => {
            HttpError::for_unavail(Some(code.to_string()), message)
        }
        ProvisionError::Timeout { .. } => http_err_with_message(
            ErrorStatusCode::GATEWAY_TIMEOUT,
            code,
            message,
        ),
        ProvisionError::ResourceNotFound { .. }
        | ProvisionError::PartialFanoutFailure { .. }
        | ProvisionError::Internal { .. } => http_err_with_message(
            ErrorStatusCode::INTERNAL_SERVER_ERROR,
            code,
            message,
        ),
    }
}
