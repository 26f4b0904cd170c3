//! Structured task group for managing related async tasks.

use super::CancellationToken;
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// A group of related tasks with structured cancellation.
///
/// Tasks share one cancellation token. Dropping the group aborts every task
/// still running, so no task outlives the scope that spawned it.
pub struct StructuredTaskGroup<T> {
    cancel_token: Arc<CancellationToken>,
    limit: Option<Arc<Semaphore>>,
    tasks: JoinSet<(String, Result<T, String>)>,
}

impl<T: Send + 'static> StructuredTaskGroup<T> {
    /// Creates a new task group.
    #[must_use]
    pub fn new() -> Self {
        Self {
            cancel_token: Arc::new(CancellationToken::new()),
            limit: None,
            tasks: JoinSet::new(),
        }
    }

    /// Creates a task group that runs at most `max` tasks at a time.
    #[must_use]
    pub fn with_concurrency_limit(max: usize) -> Self {
        Self {
            limit: Some(Arc::new(Semaphore::new(max.max(1)))),
            ..Self::new()
        }
    }

    /// Returns the cancellation token.
    #[must_use]
    pub fn cancel_token(&self) -> &Arc<CancellationToken> {
        &self.cancel_token
    }

    /// Spawns a named task in the group.
    ///
    /// A panic inside the task is reported as an error result for that task.
    pub fn spawn<F, Fut>(&mut self, name: impl Into<String>, task: F)
    where
        F: FnOnce(Arc<CancellationToken>) -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        let name = name.into();
        let token = self.cancel_token.clone();
        let limit = self.limit.clone();

        self.tasks.spawn(async move {
            let _permit = match limit {
                Some(semaphore) => semaphore.acquire_owned().await.ok(),
                None => None,
            };
            let result = AssertUnwindSafe(task(token))
                .catch_unwind()
                .await
                .map_err(|payload| panic_message(payload.as_ref()));
            (name, result)
        });
    }

    /// Waits for the next task to finish.
    ///
    /// Returns `None` once the group is empty.
    pub async fn next(&mut self) -> Option<(String, Result<T, String>)> {
        loop {
            match self.tasks.join_next().await? {
                Ok(outcome) => return Some(outcome),
                // Aborted tasks have nothing to report.
                Err(err) if err.is_cancelled() => {}
                Err(err) => {
                    tracing::warn!(error = %err, "Task group member failed to join");
                }
            }
        }
    }

    /// Cancels the token and aborts every running task.
    pub fn cancel_all(&mut self, reason: &str) {
        self.cancel_token.cancel(reason);
        self.tasks.abort_all();
    }

    /// Returns the number of tasks not yet collected.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Returns true when no tasks remain.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

impl<T: Send + 'static> Default for StructuredTaskGroup<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for StructuredTaskGroup<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StructuredTaskGroup")
            .field("task_count", &self.tasks.len())
            .field("cancelled", &self.cancel_token.is_cancelled())
            .finish()
    }
}

/// Extracts a readable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn explode() -> u32 {
        panic!("exploded")
    }

    async fn collect<T: Send + 'static>(
        group: &mut StructuredTaskGroup<T>,
    ) -> Vec<(String, Result<T, String>)> {
        let mut out = Vec::new();
        while let Some(item) = group.next().await {
            out.push(item);
        }
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    #[tokio::test]
    async fn test_task_group_success() {
        let mut group = StructuredTaskGroup::new();

        group.spawn("task1", |_token| async { 1 });
        group.spawn("task2", |_token| async { 2 });
        assert_eq!(group.len(), 2);

        let results = collect(&mut group).await;
        assert_eq!(
            results,
            vec![("task1".to_string(), Ok(1)), ("task2".to_string(), Ok(2))]
        );
        assert!(group.is_empty());
    }

    #[tokio::test]
    async fn test_task_group_panic_is_reported() {
        let mut group: StructuredTaskGroup<u32> = StructuredTaskGroup::new();

        group.spawn("ok", |_token| async { 7 });
        group.spawn("boom", |_token| async { explode() });

        let results = collect(&mut group).await;
        assert_eq!(results[0], ("boom".to_string(), Err("exploded".to_string())));
        assert_eq!(results[1], ("ok".to_string(), Ok(7)));
    }

    #[tokio::test]
    async fn test_cancel_all_aborts_running_tasks() {
        let mut group: StructuredTaskGroup<()> = StructuredTaskGroup::new();
        let finished = Arc::new(AtomicUsize::new(0));

        let counter = finished.clone();
        group.spawn("slow", move |_token| async move {
            tokio::time::sleep(Duration::from_secs(30)).await;
            counter.fetch_add(1, Ordering::SeqCst);
        });

        group.cancel_all("stop");
        assert!(group.cancel_token().is_cancelled());
        assert!(group.next().await.is_none());
        assert_eq!(finished.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_concurrency_limit() {
        let mut group = StructuredTaskGroup::with_concurrency_limit(2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        for i in 0..6 {
            let running = running.clone();
            let peak = peak.clone();
            group.spawn(format!("t{i}"), move |_token| async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                running.fetch_sub(1, Ordering::SeqCst);
            });
        }

        let results = collect(&mut group).await;
        assert_eq!(results.len(), 6);
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[test]
    fn test_panic_message_variants() {
        let owned: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(owned.as_ref()), "owned");
        let other: Box<dyn Any + Send> = Box::new(42_u8);
        assert_eq!(panic_message(other.as_ref()), "panic with non-string payload");
    }
}
