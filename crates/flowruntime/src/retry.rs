use crate::trace;
use flowcore::{AsyncNode, Node, NodeContext, NodeError, RetryPolicy, Value};
use futures::FutureExt;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

/// Run `exec` under `policy`.
///
/// Attempt `i` sees `ctx.attempt == i`. The first success is returned at
/// once. A failure, whether an `Err` or a panic, is retried after a fixed
/// `wait`; the last failure goes to `exec_fallback`, whose result is returned
/// as if exec had produced it. Only an error returned by the fallback itself
/// leaves this function.
///
/// The wait blocks the calling thread.
pub fn exec_with_retry<N>(
    node: &N,
    policy: &RetryPolicy,
    ctx: &NodeContext,
    prep: &Value,
) -> Result<Value, NodeError>
where
    N: Node + ?Sized,
{
    let attempts = policy.attempts();
    let mut attempt = 0;
    loop {
        let attempt_ctx = ctx.with_attempt(attempt);
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| node.exec(&attempt_ctx, prep)))
            .unwrap_or_else(|payload| Err(NodeError::Panicked(panic_message(payload.as_ref()))));

        let error = match outcome {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        if attempt + 1 >= attempts {
            trace::exec_fallback(&attempt_ctx, node.name(), &error);
            return node.exec_fallback(&attempt_ctx, prep, error);
        }

        trace::exec_retry(&attempt_ctx, node.name(), attempt, &error);
        if !policy.wait().is_zero() {
            std::thread::sleep(policy.wait());
        }
        attempt += 1;
    }
}

/// Async counterpart of [`exec_with_retry`]; the wait suspends only the
/// calling task.
pub async fn exec_with_retry_async<N>(
    node: &N,
    policy: &RetryPolicy,
    ctx: &NodeContext,
    prep: &Value,
) -> Result<Value, NodeError>
where
    N: AsyncNode + ?Sized,
{
    let attempts = policy.attempts();
    let mut attempt = 0;
    loop {
        let attempt_ctx = ctx.with_attempt(attempt);
        let outcome = AssertUnwindSafe(node.exec_async(&attempt_ctx, prep))
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| Err(NodeError::Panicked(panic_message(payload.as_ref()))));

        let error = match outcome {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        if attempt + 1 >= attempts {
            trace::exec_fallback(&attempt_ctx, node.name(), &error);
            return node
                .exec_fallback_async(&attempt_ctx, prep, error)
                .await;
        }

        trace::exec_retry(&attempt_ctx, node.name(), attempt, &error);
        if !policy.wait().is_zero() {
            tokio::time::sleep(policy.wait()).await;
        }
        attempt += 1;
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
