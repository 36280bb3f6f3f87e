use std::future::Future;

use futures::stream::{self, StreamExt};

#[derive(Debug, Clone, Copy)]
pub struct BatchOptions {
    pub concurrency: usize,
    pub continue_on_error: bool,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            concurrency: 8,
            continue_on_error: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BatchSuccess<I, T> {
    pub index: usize,
    pub item: I,
    pub value: T,
}

#[derive(Debug, Clone)]
pub struct BatchFailure<I, E> {
    pub index: usize,
    pub item: I,
    pub error: E,
}

#[derive(Debug, Clone)]
pub struct BatchOutcome<I, T, E> {
    pub succeeded: Vec<BatchSuccess<I, T>>,
    pub failed: Vec<BatchFailure<I, E>>,
    /// Items never started because the batch stopped on an error.
    pub skipped: usize,
}

impl<I, T, E> BatchOutcome<I, T, E> {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.skipped == 0
    }
}

/// Bounded-concurrency dispatch. Results are aggregated before returning.
#[derive(Debug, Clone, Default)]
pub struct BatchRunner {
    options: BatchOptions,
}

impl BatchRunner {
    pub fn new(options: BatchOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> BatchOptions {
        self.options
    }

    pub async fn run<I, T, E, F, Fut>(&self, items: Vec<I>, operation: F) -> BatchOutcome<I, T, E>
    where
        I: Clone,
        F: Fn(I) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.run_with_callbacks(items, operation, |_, _| {}, |_, _| {})
            .await
    }

    /// `on_success` / `on_error` fire in completion order as each item settles.
    pub async fn run_with_callbacks<I, T, E, F, Fut, S, R>(
        &self,
        items: Vec<I>,
        operation: F,
        mut on_success: S,
        mut on_error: R,
    ) -> BatchOutcome<I, T, E>
    where
        I: Clone,
        F: Fn(I) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        S: FnMut(&I, &T),
        R: FnMut(&I, &E),
    {
        let total = items.len();
        let limit = self.options.concurrency.max(1);
        let operation = &operation;
        let mut pending = stream::iter(items.into_iter().enumerate().map(|(index, item)| {
            let future = operation(item.clone());
            async move { (index, item, future.await) }
        }))
        .buffer_unordered(limit);

        let mut succeeded = Vec::new();
        let mut failed = Vec::new();
        while let Some((index, item, result)) = pending.next().await {
            match result {
                Ok(value) => {
                    on_success(&item, &value);
                    succeeded.push(BatchSuccess { index, item, value });
                }
                Err(error) => {
                    on_error(&item, &error);
                    failed.push(BatchFailure { index, item, error });
                    if !self.options.continue_on_error {
                        break;
                    }
                }
            }
        }
        drop(pending);

        succeeded.sort_by_key(|entry| entry.index);
        failed.sort_by_key(|entry| entry.index);
        let skipped = total - succeeded.len() - failed.len();
        BatchOutcome {
            succeeded,
            failed,
            skipped,
        }
    }
}
