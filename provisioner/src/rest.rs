// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Bearer-token JSON client for the Azure Resource Manager binding.

use crate::error::ResourceKind;
use crate::Error;
use reqwest::header::HeaderMap;
use reqwest::Method;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

/// A JSON response along with the headers it came with.
#[derive(Debug)]
pub struct RestResponse<T> {
    pub body: T,
    pub headers: HeaderMap,
}

#[derive(Clone, Debug)]
pub struct RestClient {
    client: reqwest::Client,
    base_url: String,
    token_env: String,
}

impl RestClient {
    pub fn new(
        base_url: impl Into<String>,
        token_env: impl Into<String>,
        request_timeout: Duration,
    ) -> Result<RestClient, Error> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| Error::internal(format!("building HTTP client: {e}")))?;
        Ok(RestClient {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token_env: token_env.into(),
        })
    }

    /// `path` relative to the base URL. Absolute URLs (e.g. operation links
    /// handed back by the provider) are used as they are.
    pub fn url(&self, path: &str) -> String {
        if path.starts_with("https://") || path.starts_with("http://") {
            path.to_string()
        } else {
            format!("{}/{}", self.base_url, path.trim_start_matches('/'))
        }
    }

    /// The token is read on every call so that an external refresher can
    /// rotate it without restarting the server.
    fn token(&self, operation: &str) -> Result<String, Error> {
        match std::env::var(&self.token_env) {
            Ok(token) if !token.trim().is_empty() => Ok(token),
            _ => Err(Error::rejected(
                operation,
                format!("no bearer token in ${}", self.token_env),
            )),
        }
    }

    /// GET `path`. A 404 becomes [`Error::ResourceNotFound`] of `kind`.
    pub async fn get<T: DeserializeOwned>(
        &self,
        operation: &str,
        kind: ResourceKind,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, Error> {
        self.send::<(), T>(operation, Some(kind), Method::GET, path, query, None)
            .await
            .map(|response| response.body)
    }

    pub async fn send<B: Serialize, T: DeserializeOwned>(
        &self,
        operation: &str,
        not_found_kind: Option<ResourceKind>,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&B>,
    ) -> Result<RestResponse<T>, Error> {
        let url = self.url(path);
        let mut request = self
            .client
            .request(method, &url)
            .bearer_auth(self.token(operation)?)
            .query(query);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::unavailable(operation, e.to_string()))?;
        let status = response.status();
        let headers = response.headers().clone();
        let text = response
            .text()
            .await
            .map_err(|e| Error::unavailable(operation, e.to_string()))?;

        if !status.is_success() {
            return Err(status_error(operation, not_found_kind, &url, status, &text));
        }
        // Some calls answer 202 with no body at all.
        let text = if text.trim().is_empty() { "null" } else { text.as_str() };
        let body = serde_json::from_str(text).map_err(|e| {
            Error::internal(format!("decoding {operation} response: {e}"))
        })?;
        Ok(RestResponse { body, headers })
    }
}

/// Pulls `error.message` out of an ARM error body.
fn provider_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value
        .pointer("/error/message")
        .and_then(|m| m.as_str())
        .map(str::to_string)
}

pub(crate) fn status_error(
    operation: &str,
    not_found_kind: Option<ResourceKind>,
    url: &str,
    status: StatusCode,
    body: &str,
) -> Error {
    let message = provider_message(body)
        .unwrap_or_else(|| format!("{status}: {}", body.trim()));
    match (status, not_found_kind) {
        (StatusCode::NOT_FOUND, Some(kind)) => Error::not_found(kind, url),
        (StatusCode::TOO_MANY_REQUESTS, _) => {
            Error::unavailable(operation, message)
        }
        (s, _) if s.is_server_error() => Error::unavailable(operation, message),
        _ => Error::rejected(operation, message),
    }
}
