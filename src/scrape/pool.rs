use futures::stream::{self, StreamExt};
use std::future::Future;
use std::time::Duration;

use crate::error::ServiceError;

/// At most `workers` tasks in flight, each slot held for `delay` after its
/// task ends. Results keep the order of `sources`, failures included.
pub async fn run_pool<S, T, F, Fut>(
    sources: Vec<S>,
    workers: usize,
    delay: Duration,
    task: F,
) -> Vec<(S, Result<T, ServiceError>)>
where
    S: Clone,
    F: Fn(S) -> Fut,
    Fut: Future<Output = Result<T, ServiceError>>,
{
    let total = sources.len();
    stream::iter(sources.into_iter().enumerate())
        .map(|(index, source)| {
            let work = task(source.clone());
            async move {
                let result = work.await;
                if let Err(err) = &result {
                    tracing::warn!("source {}/{} failed: {}", index + 1, total, err.msg);
                }
                tokio::time::sleep(delay).await;
                (source, result)
            }
        })
        .buffered(workers.max(1))
        .collect()
        .await
}
