//! Cancellable periodic tasks.
//!
//! Both the one-second tick and the remote flush run through
//! [`spawn_periodic`]. The first firing happens one full period after the
//! spawn, never immediately.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Run `on_tick` every `period` until `token` is cancelled.
///
/// A tick that is already executing finishes its current await, but no
/// further tick starts after cancellation.
pub fn spawn_periodic<F, Fut>(
    period: Duration,
    missed: MissedTickBehavior,
    token: CancellationToken,
    mut on_tick: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(missed);
        loop {
            tokio::select! {
                biased;

                _ = token.cancelled() => break,

                _ = interval.tick() => {
                    if token.is_cancelled() {
                        break;
                    }
                    on_tick().await;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counter_task(
        period: Duration,
        token: CancellationToken,
    ) -> (Arc<AtomicUsize>, JoinHandle<()>) {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        let handle = spawn_periodic(period, MissedTickBehavior::Delay, token, move || {
            let seen = Arc::clone(&seen);
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
            }
        });
        (count, handle)
    }

    #[tokio::test(start_paused = true)]
    async fn fires_once_per_period_after_the_first_period() {
        let token = CancellationToken::new();
        let (count, _handle) = counter_task(Duration::from_secs(30), token.clone());

        tokio::time::sleep(Duration::from_secs(29)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
        token.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn stops_after_cancellation() {
        let token = CancellationToken::new();
        let (count, handle) = counter_task(Duration::from_secs(1), token.clone());

        tokio::time::sleep(Duration::from_millis(3_500)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);

        token.cancel();
        handle.await.unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }
}
