//! Bounded-parallel batch execution for `for_each` phases

use futures::{stream::FuturesUnordered, Future, StreamExt};
use tokio::sync::Semaphore;
use workflow_engine_sdk::{Result, WorkflowError};

/// Position of one item within its batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BatchSlot {
    /// 0-based index in input order
    pub index: usize,
    pub total: usize,
}

/// Execute items with at most `limit` in flight.
///
/// All futures are polled on the calling task, so the executor may borrow
/// from the caller.
///
/// # Returns
/// Results in input order (not completion order)
///
/// # Error Handling
/// Fails fast: the first error is returned and the remaining in-flight
/// futures are dropped.
pub(crate) async fn execute_bounded<T, R, F, Fut>(items: Vec<T>, limit: usize, executor: F) -> Result<Vec<R>>
where
    F: Fn(T, BatchSlot) -> Fut,
    Fut: Future<Output = Result<R>>,
{
    let total = items.len();
    let sem = Semaphore::new(limit.max(1));
    let mut tasks = FuturesUnordered::new();

    for (index, item) in items.into_iter().enumerate() {
        let sem = &sem;
        let executor = &executor;
        let slot = BatchSlot { index, total };

        tasks.push(async move {
            // Blocks while `limit` items are running
            let _permit = sem
                .acquire()
                .await
                .map_err(|_| WorkflowError::Internal("batch semaphore closed".into()))?;

            executor(item, slot).await.map(|value| (index, value))
        });
    }

    let mut results: Vec<Option<R>> = std::iter::repeat_with(|| None).take(total).collect();
    while let Some(result) = tasks.next().await {
        let (index, value) = result?;
        results[index] = Some(value);
    }

    Ok(results.into_iter().flatten().collect())
}
