//! Notification fan-out
//!
//! The [`EventRouter`] hands every unsolicited notification to each
//! subscription whose [`EventFilter`] matches. Each subscription owns an
//! unbounded FIFO queue drained by its own task, so a slow or failing
//! consumer never stalls the receive loop or the other consumers, and every
//! consumer sees notifications in wire arrival order.
//!
//! # Example
//!
//! ```rust,no_run
//! use ispbx_ami_core::events::{EventFilter, EventRouter};
//!
//! # async fn demo() {
//! let router = EventRouter::new();
//! let id = router.subscribe_fn(EventFilter::types(["Hangup", "Newchannel"]), |n| async move {
//!     println!("{} on {}", n.event_type, n.get("Channel").unwrap_or(""));
//!     Ok(())
//! });
//! router.unsubscribe(id);
//! # }
//! ```

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::record::Record;

/// Synthetic notification published when the connection is lost
pub const LINK_DOWN_EVENT: &str = "GatewayLinkDown";
/// Synthetic notification published after a successful (re)connect
pub const LINK_UP_EVENT: &str = "GatewayLinkUp";

/// Identifier returned by [`EventRouter::subscribe`]
pub type SubscriptionId = Uuid;

/// One unsolicited record pushed by the switch
#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub event_type: String,
    pub record: Record,
    pub received_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(record: Record) -> Self {
        let event_type = record.event().unwrap_or("Unknown").to_string();
        Self {
            event_type,
            record,
            received_at: Utc::now(),
        }
    }

    /// Build a notification that did not come off the wire
    pub fn synthetic<K, V, I>(event_type: &str, fields: I) -> Self
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        let mut record = Record::new();
        record.push(crate::record::EVENT, event_type);
        for (k, v) in fields {
            record.push(k, v);
        }
        Self::new(record)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.record.get(key)
    }

    pub fn is(&self, event_type: &str) -> bool {
        self.event_type.eq_ignore_ascii_case(event_type)
    }
}

/// Which notifications a subscription receives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventFilter {
    /// Wildcard
    Any,
    Type(String),
    Types(Vec<String>),
}

impl EventFilter {
    pub fn of_type(event_type: impl Into<String>) -> Self {
        Self::Type(event_type.into())
    }

    pub fn types<S: Into<String>>(types: impl IntoIterator<Item = S>) -> Self {
        Self::Types(types.into_iter().map(Into::into).collect())
    }

    /// Case-insensitive match on the notification type
    pub fn matches(&self, event_type: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Type(t) => t.eq_ignore_ascii_case(event_type),
            Self::Types(ts) => ts.iter().any(|t| t.eq_ignore_ascii_case(event_type)),
        }
    }
}

/// Consumer of notifications.
///
/// Errors and panics are logged by the router and do not end the
/// subscription. Implementations must treat the notification as read-only.
#[async_trait]
pub trait NotificationHandler: Send + Sync + 'static {
    async fn on_notification(&self, notification: &Notification) -> anyhow::Result<()>;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> NotificationHandler for FnHandler<F>
where
    F: Fn(Notification) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn on_notification(&self, notification: &Notification) -> anyhow::Result<()> {
        (self.0)(notification.clone()).await
    }
}

struct Subscription {
    id: SubscriptionId,
    filter: EventFilter,
    queue: mpsc::UnboundedSender<Arc<Notification>>,
    task: JoinHandle<()>,
}

/// Publish/subscribe hub for notifications.
///
/// Every subscription gets its own queue and delivery task, so a slow or
/// failing consumer never holds up the receive loop or other consumers.
///
/// # Examples
///
/// ```rust
/// use ispbx_ami_core::{EventFilter, EventRouter, Notification};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let router = EventRouter::new();
/// let id = router.subscribe_fn(EventFilter::of_type("Hangup"), |n: Notification| async move {
///     println!("{} hung up", n.get("Channel").unwrap_or("?"));
///     Ok(())
/// });
/// router.publish(Notification::synthetic("Hangup", [("Channel", "PJSIP/1001-00000001")]));
/// assert_eq!(router.subscription_count(), 1);
/// assert!(router.unsubscribe(id));
/// # }
/// ```
pub struct EventRouter {
    subscriptions: RwLock<Vec<Subscription>>,
    handler_timeout: Option<Duration>,
}

impl EventRouter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::build(None))
    }

    /// Router that abandons a handler invocation after `timeout`
    pub fn with_handler_timeout(timeout: Option<Duration>) -> Arc<Self> {
        Arc::new(Self::build(timeout))
    }

    fn build(handler_timeout: Option<Duration>) -> Self {
        Self {
            subscriptions: RwLock::new(Vec::new()),
            handler_timeout,
        }
    }

    /// Register a consumer. Must be called from within a Tokio runtime.
    pub fn subscribe(&self, filter: EventFilter, handler: Arc<dyn NotificationHandler>) -> SubscriptionId {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(deliver(id, handler, rx, self.handler_timeout));
        debug!(subscription = %id, ?filter, "Subscription added");
        self.subscriptions.write().push(Subscription {
            id,
            filter,
            queue: tx,
            task,
        });
        id
    }

    /// Register an async closure as a consumer
    pub fn subscribe_fn<F, Fut>(&self, filter: EventFilter, f: F) -> SubscriptionId
    where
        F: Fn(Notification) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.subscribe(filter, Arc::new(FnHandler(f)))
    }

    /// Stop delivery to a subscription. Returns false for unknown ids.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscriptions = self.subscriptions.write();
        match subscriptions.iter().position(|s| s.id == id) {
            Some(pos) => {
                let sub = subscriptions.remove(pos);
                sub.task.abort();
                debug!(subscription = %id, "Subscription removed");
                true
            }
            None => false,
        }
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.read().len()
    }

    /// Queue a notification for every matching subscription. Never blocks.
    pub fn publish(&self, notification: Notification) {
        let notification = Arc::new(notification);
        let subscriptions = self.subscriptions.read();
        let mut delivered = 0usize;
        for sub in subscriptions.iter().filter(|s| s.filter.matches(&notification.event_type)) {
            if sub.queue.send(notification.clone()).is_err() {
                warn!(subscription = %sub.id, "Subscription task has stopped, dropping notification");
                continue;
            }
            delivered += 1;
        }
        debug!(event = %notification.event_type, consumers = delivered, "Notification published");
    }

    /// Remove every subscription
    pub fn clear(&self) {
        for sub in self.subscriptions.write().drain(..) {
            sub.task.abort();
        }
    }
}

impl Drop for EventRouter {
    fn drop(&mut self) {
        for sub in self.subscriptions.get_mut().drain(..) {
            sub.task.abort();
        }
    }
}

async fn deliver(
    id: SubscriptionId,
    handler: Arc<dyn NotificationHandler>,
    mut rx: mpsc::UnboundedReceiver<Arc<Notification>>,
    handler_timeout: Option<Duration>,
) {
    while let Some(notification) = rx.recv().await {
        let call = AssertUnwindSafe(handler.on_notification(&notification)).catch_unwind();
        let outcome = match handler_timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!(
                        subscription = %id,
                        event = %notification.event_type,
                        timeout_ms = limit.as_millis() as u64,
                        "Notification handler timed out"
                    );
                    continue;
                }
            },
            None => call.await,
        };

        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!(subscription = %id, event = %notification.event_type, error = %e, "Notification handler failed");
            }
            Err(_) => {
                error!(subscription = %id, event = %notification.event_type, "Notification handler panicked");
            }
        }
    }
}
