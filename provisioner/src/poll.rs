// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Awaiting the terminal state of asynchronous remote operations.

use crate::timeout::Deadline;
use crate::Error;
use std::future::Future;
use std::time::Duration;

/// Result of one condition check.
#[derive(Debug)]
pub enum CondCheckError {
    /// The operation has not reached a terminal state yet.
    NotYet,
    /// The operation reached a terminal failure, or checking it failed.
    Failed(Error),
}

impl From<Error> for CondCheckError {
    fn from(error: Error) -> Self {
        CondCheckError::Failed(error)
    }
}

/// Polls `cond` every `poll_interval` until it returns `Ok`, returns
/// `Failed`, or `poll_max` elapses ([`Error::Timeout`] naming `operation`).
///
/// The first check happens immediately.
pub async fn wait_for_condition<T, F, Fut>(
    operation: &str,
    mut cond: F,
    poll_interval: &Duration,
    poll_max: &Duration,
) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CondCheckError>>,
{
    let deadline = Deadline::after(*poll_max);
    deadline
        .bound(operation, async {
            loop {
                match cond().await {
                    Ok(output) => return Ok(output),
                    Err(CondCheckError::Failed(error)) => return Err(error),
                    Err(CondCheckError::NotYet) => {
                        tokio::time::sleep(*poll_interval).await;
                    }
                }
            }
        })
        .await?
}
