use flowcore::FlowError;
use futures::stream::{FuturesUnordered, StreamExt};
use std::future::Future;

/// Spawn one task per item and wait for all of them.
///
/// At most `max_parallel` tasks are in flight (`None` or zero means no cap). Each
/// output lands in the slot of the item that produced it, so the result
/// order matches the input order whatever order the tasks finish in. Every
/// task is awaited before returning, even when one of them failed to join.
pub async fn run_indexed<T, F, Fut>(
    items: Vec<T>,
    max_parallel: Option<usize>,
    mut task: F,
) -> Result<Vec<Fut::Output>, FlowError>
where
    F: FnMut(usize, T) -> Fut,
    Fut: Future + Send + 'static,
    Fut::Output: Send + 'static,
{
    let total = items.len();
    let limit = max_parallel.filter(|c| *c > 0).unwrap_or(total).max(1);
    let mut slots: Vec<Option<Fut::Output>> = (0..total).map(|_| None).collect();
    let mut pending = items.into_iter().enumerate();
    let mut running = FuturesUnordered::new();
    let mut join_error = None;

    loop {
        while running.len() < limit {
            let Some((idx, item)) = pending.next() else {
                break;
            };
            let fut = task(idx, item);
            running.push(tokio::spawn(async move { (idx, fut.await) }));
        }

        match running.next().await {
            Some(Ok((idx, output))) => slots[idx] = Some(output),
            Some(Err(e)) => {
                tracing::error!("Batch task failed to join: {}", e);
                join_error.get_or_insert_with(|| FlowError::Execution(format!("Task join error: {}", e)));
            }
            None => break,
        }
    }

    if let Some(e) = join_error {
        return Err(e);
    }

    slots
        .into_iter()
        .enumerate()
        .map(|(idx, slot)| {
            slot.ok_or_else(|| FlowError::Execution(format!("batch slot {} was never filled", idx)))
        })
        .collect()
}
