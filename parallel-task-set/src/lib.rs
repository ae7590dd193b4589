// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use futures::FutureExt;
use std::any::Any;
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// The default number of parallel tasks used by [ParallelTaskSet].
pub const DEFAULT_MAX_PARALLELISM: usize = 16;

/// Reasons a task in a [ParallelTaskSet] produced no output.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    #[error("task panicked: {0}")]
    Panicked(String),
    #[error("task was cancelled before completing")]
    Cancelled,
}

type Slot<T> = (usize, Result<T, TaskError>);

/// A collection of tokio tasks, each tagged with a caller-chosen index, which
/// execute in parallel on distinct tokio tasks up to a user-specified maximum
/// amount of parallelism.
///
/// Outputs are reported against the index they were spawned with rather than
/// the order in which they complete, so [Self::join_all] always returns the
/// same layout for the same set of spawned indices.
///
/// # Why not just use a JoinSet?
///
/// The tokio [JoinSet] has no limit on the "maximum number of tasks".
/// Given a large request, it's possible to spawn an enormous number
/// of tasks, which may not be desirable.
///
/// Dropping a [ParallelTaskSet] aborts every task that has not finished yet,
/// including tasks still waiting for a permit.
pub struct ParallelTaskSet<T> {
    semaphore: Arc<Semaphore>,
    set: JoinSet<Slot<T>>,
    spawned: BTreeSet<usize>,
}

impl<T: 'static + Send> Default for ParallelTaskSet<T> {
    fn default() -> Self {
        ParallelTaskSet::new()
    }
}

impl<T: 'static + Send> ParallelTaskSet<T> {
    /// Creates a new [ParallelTaskSet], with [DEFAULT_MAX_PARALLELISM] as the
    /// maximum number of tasks to run in parallel.
    ///
    /// If a different amount of parallism is desired, refer to:
    /// [Self::new_with_parallelism].
    pub fn new() -> ParallelTaskSet<T> {
        Self::new_with_parallelism(DEFAULT_MAX_PARALLELISM)
    }

    /// Creates a new [ParallelTaskSet], with `max_parallism` as the
    /// maximum number of tasks to run in parallel.
    ///
    /// A limit of zero is treated as one.
    pub fn new_with_parallelism(max_parallism: usize) -> ParallelTaskSet<T> {
        let semaphore = Arc::new(Semaphore::new(max_parallism.max(1)));
        let set = JoinSet::new();

        Self { semaphore, set, spawned: BTreeSet::new() }
    }

    /// Number of tasks spawned so far.
    pub fn len(&self) -> usize {
        self.spawned.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spawned.is_empty()
    }

    /// Spawn a task immediately, but only allow it to execute if the task
    /// set is within the maximum parallelism constraint.
    ///
    /// # Panics
    ///
    /// Panics if a task was already spawned with the same `index`.
    pub fn spawn<F>(&mut self, index: usize, command: F)
    where
        F: Future<Output = T> + Send + 'static,
    {
        assert!(
            self.spawned.insert(index),
            "task index {index} spawned more than once"
        );
        let semaphore = Arc::clone(&self.semaphore);
        let _abort_handle = self.set.spawn(async move {
            // Hold onto the permit until the command finishes executing
            let permit =
                semaphore.acquire_owned().await.expect("semaphore acquire");
            let output = AssertUnwindSafe(command).catch_unwind().await;
            drop(permit);
            (index, output.map_err(panic_message))
        });
    }

    /// Waits for the next task to complete and returns its index and output.
    ///
    /// Returns `None` once every task has been joined. Tasks that were
    /// cancelled by the runtime are skipped here; [Self::join_all] reports
    /// them as [TaskError::Cancelled].
    pub async fn join_next(&mut self) -> Option<Slot<T>> {
        loop {
            match self.set.join_next().await? {
                Ok(slot) => return Some(slot),
                Err(_) => continue,
            }
        }
    }

    /// Wait for all tasks to execute and return their outputs ordered by
    /// index.
    pub async fn join_all(mut self) -> Vec<Slot<T>> {
        let mut outputs = BTreeMap::new();
        while let Some((index, output)) = self.join_next().await {
            outputs.insert(index, output);
        }
        std::mem::take(&mut self.spawned)
            .into_iter()
            .map(|index| {
                let output =
                    outputs.remove(&index).unwrap_or(Err(TaskError::Cancelled));
                (index, output)
            })
            .collect()
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> TaskError {
    let message = if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        String::from("unknown panic payload")
    };
    TaskError::Panicked(message)
}

#[cfg(test)]
mod test {
    use super::*;
    use rand::Rng;
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    #[tokio::test]
    async fn test_spawn_many() {
        let count = Arc::new(AtomicUsize::new(0));

        let task_limit = 16;
        let mut set = ParallelTaskSet::new_with_parallelism(task_limit);

        for i in 0..task_limit * 10 {
            set.spawn(i, {
                let count = count.clone();
                async move {
                    // How many tasks - including our own - are running right
                    // now?
                    let watermark = count.fetch_add(1, Ordering::SeqCst) + 1;

                    // The tasks should all execute for a short but variable
                    // amount of time.
                    let duration_ms = rand::thread_rng().gen_range(0..10);
                    tokio::time::sleep(Duration::from_millis(duration_ms))
                        .await;

                    count.fetch_sub(1, Ordering::SeqCst);

                    watermark
                }
            });
        }

        let watermarks = set.join_all().await;
        assert_eq!(watermarks.len(), task_limit * 10);

        for (i, watermark) in watermarks {
            let watermark = watermark.unwrap();
            println!("task {i} saw {watermark} concurrent tasks");

            assert!(
                watermark <= task_limit,
                "Observed simultaneous task execution of {watermark} tasks on the {i}-th worker"
            );
        }
    }

    #[tokio::test]
    async fn test_outputs_ordered_by_index() {
        let mut set = ParallelTaskSet::new_with_parallelism(4);

        // Later indices finish first.
        for i in 1..=5usize {
            set.spawn(i, async move {
                tokio::time::sleep(Duration::from_millis(
                    (6 - i as u64) * 10,
                ))
                .await;
                i * 100
            });
        }
        assert_eq!(set.len(), 5);

        let outputs = set.join_all().await;
        let indices: Vec<_> = outputs.iter().map(|(i, _)| *i).collect();
        assert_eq!(indices, vec![1, 2, 3, 4, 5]);
        for (i, output) in outputs {
            assert_eq!(output, Ok(i * 100));
        }
    }

    #[tokio::test]
    async fn test_panic_is_reported_in_slot() {
        let mut set = ParallelTaskSet::new_with_parallelism(2);
        set.spawn(0, async { 1 });
        set.spawn(1, async { panic!("boom") });
        set.spawn(2, async { 3 });

        let outputs = set.join_all().await;
        assert_eq!(outputs[0], (0, Ok(1)));
        assert_eq!(
            outputs[1],
            (1, Err(TaskError::Panicked(String::from("boom"))))
        );
        assert_eq!(outputs[2], (2, Ok(3)));
    }

    #[tokio::test]
    async fn test_drop_aborts_pending_tasks() {
        let started = Arc::new(AtomicUsize::new(0));
        let mut set = ParallelTaskSet::new_with_parallelism(1);
        for i in 0..3 {
            let started = started.clone();
            set.spawn(i, async move {
                started.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(60)).await;
            });
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(set);
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Only the task holding the single permit ever started.
        assert_eq!(started.load(Ordering::SeqCst), 1);
    }
}
