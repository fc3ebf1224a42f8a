use std::future::Future;
use std::time::Duration;

use time::OffsetDateTime;
use tokio::sync::watch;
use tokio::time::sleep;

/// Upper bound on one sleep slice. The deadline is re-evaluated against the
/// wall clock after every slice, so a suspended host or clock jump delays a
/// fire by at most this much.
const MAX_SLICE: Duration = Duration::from_secs(1);

/// Drive a session's deadline. Sleeps until the armed deadline passes, then
/// invokes `on_fire` exactly once for that deadline value; re-arming with an
/// earlier or later instant reschedules, `None` disarms. Returns when the
/// deadline sender is dropped.
pub async fn run<F, Fut>(mut deadline_rx: watch::Receiver<Option<OffsetDateTime>>, mut on_fire: F)
where
    F: FnMut(OffsetDateTime) -> Fut,
    Fut: Future<Output = ()>,
{
    let mut last_fired: Option<OffsetDateTime> = None;

    loop {
        let deadline = *deadline_rx.borrow_and_update();
        match deadline {
            Some(at) if last_fired != Some(at) => {
                let now = OffsetDateTime::now_utc();
                if at <= now {
                    last_fired = Some(at);
                    on_fire(at).await;
                    continue;
                }

                let wait = Duration::try_from(at - now)
                    .unwrap_or(Duration::ZERO)
                    .min(MAX_SLICE);
                tokio::select! {
                    changed = deadline_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    _ = sleep(wait) => {}
                }
            }
            _ => {
                // Nothing armed, or the armed deadline already fired.
                if deadline_rx.changed().await.is_err() {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn spawn_counting_clock(
        rx: watch::Receiver<Option<OffsetDateTime>>,
    ) -> (Arc<AtomicUsize>, tokio::task::JoinHandle<()>) {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        let handle = tokio::spawn(run(rx, move |_at| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        }));
        (fired, handle)
    }

    #[tokio::test]
    async fn fires_exactly_once_per_deadline() {
        let (tx, rx) = watch::channel(None);
        let (fired, handle) = spawn_counting_clock(rx);

        tx.send_replace(Some(OffsetDateTime::now_utc() + time::Duration::milliseconds(100)));
        sleep(Duration::from_millis(400)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        sleep(Duration::from_millis(200)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        drop(tx);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn rearming_to_an_earlier_instant_fires_sooner() {
        let (tx, rx) = watch::channel(None);
        let (fired, handle) = spawn_counting_clock(rx);

        tx.send_replace(Some(OffsetDateTime::now_utc() + time::Duration::seconds(30)));
        sleep(Duration::from_millis(50)).await;
        tx.send_replace(Some(OffsetDateTime::now_utc() + time::Duration::milliseconds(100)));

        sleep(Duration::from_millis(400)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        drop(tx);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn disarming_cancels_the_pending_fire() {
        let (tx, rx) = watch::channel(None);
        let (fired, handle) = spawn_counting_clock(rx);

        tx.send_replace(Some(OffsetDateTime::now_utc() + time::Duration::milliseconds(200)));
        sleep(Duration::from_millis(50)).await;
        tx.send_replace(None);

        sleep(Duration::from_millis(400)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        drop(tx);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn past_deadline_fires_immediately() {
        let (tx, rx) = watch::channel(None);
        let (fired, handle) = spawn_counting_clock(rx);

        tx.send_replace(Some(OffsetDateTime::now_utc() - time::Duration::seconds(5)));
        sleep(Duration::from_millis(100)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        drop(tx);
        handle.await.unwrap();
    }
}
