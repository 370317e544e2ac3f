use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Poll `probe` until `done` holds for its value, at most `attempts` times
/// with `delay` between tries.
///
/// Returns whether the condition was observed. Running out of attempts is
/// logged and left to the caller; probe errors count as a failed attempt.
pub async fn poll_until<T, F, Fut, P>(
    what: &str,
    attempts: u32,
    delay: Duration,
    mut probe: F,
    done: P,
) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<Option<T>>>,
    P: Fn(&T) -> bool,
{
    for attempt in 1..=attempts.max(1) {
        match probe().await {
            Ok(Some(value)) if done(&value) => {
                debug!("{} converged after {} attempt(s)", what, attempt);
                return true;
            }
            Ok(_) => {}
            Err(e) => debug!("{}: probe failed: {}", what, e),
        }
        if attempt < attempts {
            tokio::time::sleep(delay).await;
        }
    }
    warn!("{} did not converge after {} attempt(s)", what, attempts.max(1));
    false
}
