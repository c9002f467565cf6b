//! Long-lived change subscriptions.
//!
//! A [`Subscription`] owns one background task that keeps a change feed open,
//! reconnecting with capped exponential backoff whenever the feed ends.
//! Dropping the handle (or calling [`Subscription::unsubscribe`]) stops the task.

use async_trait::async_trait;
use backon::Retryable;
use futures_util::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tasksync_core::{ChangeEvent, SyncError};
use tokio::task::JoinHandle;

use crate::config::ReconnectPolicy;
use crate::events::{EventDispatcher, SyncEvent};
use crate::remote::RemoteSync;

#[derive(Debug, Clone, PartialEq)]
pub enum FeedUpdate {
    Change(ChangeEvent),
    /// The feed just connected. Anything pushed before this point was
    /// missed, so the collection should be fetched again. Sent on the first
    /// connect as well as after every reconnect.
    Resync,
    /// The feed failed with an error that retrying will not fix. The
    /// subscription has stopped.
    Failed(SyncError),
}

#[async_trait]
pub trait ChangeHandler: Send + Sync + 'static {
    async fn handle(&self, update: FeedUpdate);
}

pub struct Subscription {
    task: JoinHandle<()>,
}

impl Subscription {
    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }

    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if !self.task.is_finished() {
            tracing::debug!("stopping change subscription");
            self.task.abort();
        }
    }
}

/// Starts delivering remote changes to `handler`. Updates are handed over one
/// at a time, in feed order.
pub fn subscribe_to_changes<R, H>(
    remote: Arc<R>,
    handler: H,
    policy: ReconnectPolicy,
    events: Option<Arc<EventDispatcher>>,
) -> Subscription
where
    R: RemoteSync,
    H: ChangeHandler,
{
    let task = tokio::spawn(run_feed(remote, handler, policy, events));
    Subscription { task }
}

async fn run_feed<R, H>(
    remote: Arc<R>,
    handler: H,
    policy: ReconnectPolicy,
    events: Option<Arc<EventDispatcher>>,
) where
    R: RemoteSync,
    H: ChangeHandler,
{
    let emit = |event: SyncEvent| {
        if let Some(events) = &events {
            events.emit(event);
        }
    };
    let mut attempt = 0usize;

    loop {
        let opened = (|| {
            attempt += 1;
            emit(SyncEvent::ConnectionAttempted { attempt });
            remote.open_change_feed()
        })
        .retry(policy.backoff())
        .when(SyncError::is_retryable)
        .notify(|err: &SyncError, delay: Duration| {
            tracing::warn!(%err, ?delay, "change feed unavailable, retrying");
        })
        .await;

        match opened {
            Ok(mut feed) => {
                attempt = 0;
                emit(SyncEvent::ConnectionSucceeded);
                tracing::info!("change feed connected");

                handler.handle(FeedUpdate::Resync).await;

                while let Some(event) = feed.next().await {
                    handler.handle(FeedUpdate::Change(event)).await;
                }

                tracing::warn!("change feed disconnected, reconnecting");
                emit(SyncEvent::ConnectionLost {
                    reason: "change feed closed".to_string(),
                });
            }
            Err(err) if err.is_retryable() => {
                tracing::warn!(%err, cooldown = ?policy.max_delay, "change feed still unavailable");
                emit(SyncEvent::ConnectionLost {
                    reason: err.to_string(),
                });
                tokio::time::sleep(policy.max_delay).await;
            }
            Err(err) => {
                tracing::error!(%err, "change feed failed permanently");
                handler.handle(FeedUpdate::Failed(err)).await;
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryRemote;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tasksync_core::{ChangeKind, Priority, Task};
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    struct Collect(mpsc::UnboundedSender<FeedUpdate>);

    #[async_trait]
    impl ChangeHandler for Collect {
        async fn handle(&self, update: FeedUpdate) {
            let _ = self.0.send(update);
        }
    }

    fn fast_policy() -> ReconnectPolicy {
        ReconnectPolicy {
            min_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(20),
            attempts_per_round: 3,
        }
    }

    async fn wait_until(check: impl Fn() -> bool) {
        timeout(Duration::from_secs(5), async {
            while !check() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_resyncs_on_every_connect() {
        let remote = Arc::new(MemoryRemote::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let subscription = subscribe_to_changes(remote.clone(), Collect(tx), fast_policy(), None);
        assert_eq!(rx.recv().await.unwrap(), FeedUpdate::Resync);
        wait_until(|| remote.subscriber_count() == 1).await;

        remote
            .create(&Task::new("Buy milk", Priority::Low, ""))
            .await
            .unwrap();
        match rx.recv().await.unwrap() {
            FeedUpdate::Change(event) => assert_eq!(event.kind, ChangeKind::Added),
            other => panic!("expected a change, got {other:?}"),
        }

        remote.disconnect_feeds();
        assert_eq!(rx.recv().await.unwrap(), FeedUpdate::Resync);
        assert!(subscription.is_active());
    }

    #[tokio::test]
    async fn test_transport_failure_is_retried() {
        let remote = Arc::new(MemoryRemote::new());
        remote.fail_next(SyncError::transport("connection refused"));

        let events = EventDispatcher::new();
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        let _guard = events.register(move |event| {
            if matches!(event, SyncEvent::ConnectionAttempted { .. }) {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        let (tx, _rx) = mpsc::unbounded_channel();
        let _subscription =
            subscribe_to_changes(remote.clone(), Collect(tx), fast_policy(), Some(events));

        wait_until(|| remote.subscriber_count() == 1).await;
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_permanent_failure_ends_subscription() {
        let remote = Arc::new(MemoryRemote::new());
        remote.fail_next(SyncError::validation("bad feed address"));

        let (tx, mut rx) = mpsc::unbounded_channel();
        let subscription = subscribe_to_changes(remote.clone(), Collect(tx), fast_policy(), None);

        assert!(matches!(
            rx.recv().await.unwrap(),
            FeedUpdate::Failed(SyncError::Validation(_))
        ));
        wait_until(|| !subscription.is_active()).await;
        assert_eq!(remote.feed_opens(), 1);
    }

    #[tokio::test]
    async fn test_dropping_handle_closes_feed() {
        let remote = Arc::new(MemoryRemote::new());
        let (tx, _rx) = mpsc::unbounded_channel();
        let subscription = subscribe_to_changes(remote.clone(), Collect(tx), fast_policy(), None);
        wait_until(|| remote.subscriber_count() == 1).await;

        subscription.unsubscribe();
        wait_until(|| remote.subscriber_count() == 0).await;
    }
}
