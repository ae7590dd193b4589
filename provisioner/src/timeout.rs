// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::Error;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// A fixed point in time by which a unit of work must finish, remembered
/// together with the budget it was created from so errors can report it.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    start: Instant,
    budget: Duration,
}

impl Deadline {
    /// A deadline `budget` from [`Instant::now()`].
    pub fn after(budget: Duration) -> Self {
        Self { start: Instant::now(), budget }
    }

    pub fn expires_at(&self) -> Instant {
        self.start + self.budget
    }

    /// Runs `future` to completion unless the deadline passes first, in
    /// which case the future is dropped and [`Error::Timeout`] names
    /// `operation`.
    pub async fn bound<F>(
        self,
        operation: &str,
        future: F,
    ) -> Result<F::Output, Error>
    where
        F: Future,
    {
        tokio::time::timeout_at(self.expires_at(), future).await.map_err(
            |_| Error::Timeout {
                operation: operation.to_string(),
                timeout: self.budget,
            },
        )
    }
}
