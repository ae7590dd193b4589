// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The Fan-out Orchestrator.
//!
//! A request goes through three phases:
//!
//! 1. Pure validation ([`Orchestrator::plan`]): count range, base name, disk
//!    plan and image catalog filter. Nothing remote has been touched if any
//!    of these fail.
//! 2. Shared prerequisites ([`Pipeline::prepare`]): topology then image,
//!    resolved once and shared read-only by every worker.
//! 3. Fan-out: one worker per index in the count range, bounded by
//!    `max_parallelism`, each with its own deadline. Each worker writes only
//!    its own slot; slots are reported in index order.
//!
//! A failed index does not stop the others. The request as a whole fails
//! only if every index failed.

use crate::disk::DiskPlan;
use crate::image::CatalogFilter;
use crate::instance::InstanceRecord;
use crate::instance::InstanceTags;
use crate::naming;
use crate::timeout::Deadline;
use crate::Error;
use crate::IndexedError;
use crate::ProvisionRequest;
use crate::Provider;
use async_trait::async_trait;
use parallel_task_set::ParallelTaskSet;
use serde::Deserialize;
use serde::Serialize;
use slog::debug;
use slog::error;
use slog::info;
use slog::o;
use slog::warn;
use slog::Logger;
use slog_error_chain::InlineErrorChain;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// `[fanout]` configuration.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct FanoutConfig {
    /// Most workers running at once for a single request.
    pub max_parallelism: usize,
    /// Deadline for one worker, from the moment it starts running.
    pub worker_timeout_secs: u64,
    /// Largest count range a single request may ask for.
    pub max_instances: usize,
}

impl Default for FanoutConfig {
    fn default() -> Self {
        FanoutConfig {
            max_parallelism: 8,
            worker_timeout_secs: 1800,
            max_instances: 64,
        }
    }
}

impl FanoutConfig {
    pub fn worker_timeout(&self) -> Duration {
        Duration::from_secs(self.worker_timeout_secs)
    }
}

/// A request that passed pure validation.
#[derive(Debug)]
pub struct RequestPlan<E> {
    pub provisioning_id: Uuid,
    pub provider: Provider,
    pub request: ProvisionRequest<E>,
    /// Name shared by every instance; see [`naming::instance_name`].
    pub base_name: String,
    pub disks: DiskPlan,
    pub image_filter: CatalogFilter,
}

/// One index of the count range, as handed to a worker.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InstanceSlot {
    /// Index from the request's count range, e.g. 1..=5.
    pub index: u32,
    /// Zero-based position within the range.
    pub ordinal: usize,
    pub name: String,
}

impl InstanceSlot {
    pub fn tags<E>(&self, plan: &RequestPlan<E>) -> InstanceTags {
        InstanceTags {
            environment: plan.request.environment,
            change_number: plan.request.change_number.clone(),
            name: self.name.clone(),
        }
    }
}

/// A provider's provisioning workflow, split into the part done once per
/// request and the part done once per instance.
#[async_trait]
pub trait Pipeline: Send + Sync + 'static {
    /// Provider specific request fields.
    type Extras: Send + Sync + 'static;
    /// Prerequisites resolved once per request.
    type Prepared: Send + Sync + 'static;

    fn provider(&self) -> Provider;

    /// Most data disks one instance may have attached.
    fn max_data_disks(&self) -> usize;

    /// Resolves topology and image. Must not create billable resources that
    /// are specific to one instance.
    async fn prepare(
        &self,
        log: &Logger,
        plan: &RequestPlan<Self::Extras>,
    ) -> Result<Self::Prepared, Error>;

    /// Creates one instance and waits for the create to reach a terminal
    /// state.
    async fn provision_one(
        &self,
        log: &Logger,
        plan: &RequestPlan<Self::Extras>,
        prepared: &Self::Prepared,
        slot: &InstanceSlot,
    ) -> Result<InstanceRecord, Error>;
}

/// Per-index worker lifecycle: `Pending -> Running -> {Succeeded, Failed}`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WorkerState {
    Pending,
    Running,
    Succeeded,
    Failed,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SlotOutcome {
    pub index: u32,
    pub name: String,
    pub result: Result<InstanceRecord, Error>,
}

impl SlotOutcome {
    pub fn state(&self) -> WorkerState {
        match self.result {
            Ok(_) => WorkerState::Succeeded,
            Err(_) => WorkerState::Failed,
        }
    }
}

/// Aggregated outcome of a request, one slot per index in index order.
#[derive(Clone, Debug, PartialEq)]
pub struct ProvisionResult {
    pub provisioning_id: Uuid,
    pub slots: Vec<SlotOutcome>,
}

impl ProvisionResult {
    pub fn failed_count(&self) -> usize {
        self.slots.iter().filter(|s| s.result.is_err()).count()
    }

    /// [`Error::PartialFanoutFailure`] when some but not all indices failed.
    pub fn partial_failure(&self) -> Option<Error> {
        let failed = self.failed_count();
        let total = self.slots.len();
        (failed > 0 && failed < total)
            .then_some(Error::PartialFanoutFailure { failed, total })
    }

    /// Fails with [`Error::FanoutFailed`] if no index succeeded.
    pub fn ensure_any_succeeded(self) -> Result<ProvisionResult, Error> {
        if !self.slots.is_empty() && self.failed_count() == self.slots.len() {
            let failures = self
                .slots
                .into_iter()
                .filter_map(|slot| {
                    slot.result
                        .err()
                        .map(|error| IndexedError { index: slot.index, error })
                })
                .collect();
            return Err(Error::FanoutFailed { failures });
        }
        Ok(self)
    }
}

pub struct Orchestrator {
    config: FanoutConfig,
}

impl Orchestrator {
    pub fn new(config: FanoutConfig) -> Orchestrator {
        Orchestrator { config }
    }

    pub fn config(&self) -> &FanoutConfig {
        &self.config
    }

    /// Pure validation. Makes no remote calls.
    pub fn plan<E>(
        &self,
        provider: Provider,
        max_data_disks: usize,
        request: ProvisionRequest<E>,
    ) -> Result<RequestPlan<E>, Error> {
        if request.count.len() > self.config.max_instances {
            return Err(Error::invalid_input(format!(
                "count range {} asks for {} instances, at most {} allowed",
                request.count,
                request.count.len(),
                self.config.max_instances
            )));
        }
        let base_name = naming::resolve(
            provider,
            request.environment,
            &request.os,
            &request.app_code,
        )?;
        let disks = DiskPlan::build(&request.disk_sizes, max_data_disks)?;
        let image_filter = CatalogFilter::for_os(provider, &request.os)?;

        Ok(RequestPlan {
            provisioning_id: Uuid::new_v4(),
            provider,
            request,
            base_name,
            disks,
            image_filter,
        })
    }

    /// Runs a whole request through `pipeline`.
    ///
    /// Dropping the returned future aborts every outstanding worker.
    pub async fn provision<P: Pipeline>(
        &self,
        log: &Logger,
        pipeline: Arc<P>,
        request: ProvisionRequest<P::Extras>,
    ) -> Result<ProvisionResult, Error> {
        let plan = self.plan(
            pipeline.provider(),
            pipeline.max_data_disks(),
            request,
        )?;
        let log = log.new(o!(
            "provisioning_id" => plan.provisioning_id.to_string(),
            "provider" => plan.provider.to_string(),
        ));
        info!(
            log,
            "provisioning request validated";
            "base_name" => &plan.base_name,
            "count" => %plan.request.count,
            "data_disks" => plan.disks.len(),
            "image_filter" => %plan.image_filter,
        );

        let prepared = pipeline.prepare(&log, &plan).await.map_err(|e| {
            error!(
                log,
                "resolving shared prerequisites failed";
                InlineErrorChain::new(&e),
            );
            e
        })?;

        let slots: Vec<InstanceSlot> = plan
            .request
            .count
            .indices()
            .enumerate()
            .map(|(ordinal, index)| InstanceSlot {
                index,
                ordinal,
                name: naming::instance_name(&plan.base_name, index),
            })
            .collect();

        let plan = Arc::new(plan);
        let prepared = Arc::new(prepared);
        let worker_timeout = self.config.worker_timeout();
        let mut workers =
            ParallelTaskSet::new_with_parallelism(self.config.max_parallelism);

        for slot in &slots {
            let worker_log = log.new(o!(
                "index" => slot.index,
                "instance" => slot.name.clone(),
            ));
            debug!(worker_log, "worker state"; "state" => ?WorkerState::Pending);
            let pipeline = Arc::clone(&pipeline);
            let plan = Arc::clone(&plan);
            let prepared = Arc::clone(&prepared);
            let slot = slot.clone();
            workers.spawn(slot.ordinal, async move {
                debug!(
                    worker_log,
                    "worker state";
                    "state" => ?WorkerState::Running,
                );
                let operation = format!("provisioning {}", slot.name);
                let result = Deadline::after(worker_timeout)
                    .bound(
                        &operation,
                        pipeline.provision_one(
                            &worker_log,
                            &plan,
                            &prepared,
                            &slot,
                        ),
                    )
                    .await
                    .and_then(|r| r);
                match &result {
                    Ok(record) => info!(
                        worker_log,
                        "instance provisioned";
                        "state" => ?WorkerState::Succeeded,
                        "status" => &record.status,
                        "address" => %record.address,
                    ),
                    Err(e) => warn!(
                        worker_log,
                        "instance failed to provision";
                        "state" => ?WorkerState::Failed,
                        InlineErrorChain::new(e),
                    ),
                }
                result
            });
        }

        let joined = workers.join_all().await;
        let outcomes = slots
            .into_iter()
            .zip(joined)
            .map(|(slot, (ordinal, output))| {
                debug_assert_eq!(slot.ordinal, ordinal);
                let result = output.unwrap_or_else(|e| {
                    Err(Error::internal(format!(
                        "worker for {} did not finish: {}",
                        slot.name,
                        InlineErrorChain::new(&e)
                    )))
                });
                SlotOutcome { index: slot.index, name: slot.name, result }
            })
            .collect();

        let result = ProvisionResult {
            provisioning_id: plan.provisioning_id,
            slots: outcomes,
        };
        if let Some(partial) = result.partial_failure() {
            warn!(
                log,
                "request partially failed";
                InlineErrorChain::new(&partial),
            );
        }
        result.ensure_any_succeeded().map_err(|e| {
            error!(log, "request failed"; InlineErrorChain::new(&e));
            e
        })
    }
}
