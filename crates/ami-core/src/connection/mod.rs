//! Correlation engine
//!
//! [`AmiConnection`] owns the single persistent session with the switch. It
//! stamps every submitted action with a correlation token, suspends the
//! caller until the matching reply has been assembled by the receive loop,
//! and forwards everything else to the [`EventRouter`].
//!
//! ```text
//! Disconnected --connect--> Connecting --login ok--> Ready
//!       ^                        |                     |
//!       +-------- I/O error -----+---------------------+
//!       +-------- shutdown <---- Closing <-------------+
//! ```

mod connector;
mod pending;
mod session;

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

pub use connector::{AmiStream, BoxedStream, Connector, TcpConnector};

use crate::action::Action;
use crate::codec;
use crate::config::AmiConfig;
use crate::error::{AmiError, AmiResult};
use crate::events::EventRouter;
use crate::record::Reply;

use pending::PendingTable;
use session::Session;

/// Lifecycle of the managed connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Ready,
    Closing,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Ready => "ready",
            Self::Closing => "closing",
        };
        f.write_str(s)
    }
}

/// Anything that can execute an action and return its reply.
///
/// The configuration and entity layers depend on this rather than on the
/// connection itself.
#[async_trait]
pub trait ActionSubmitter: Send + Sync {
    async fn submit(&self, action: Action) -> AmiResult<Reply>;
}

pub(crate) struct Inner {
    config: AmiConfig,
    connector: Arc<dyn Connector>,
    router: Arc<EventRouter>,
    state: RwLock<ConnectionState>,
    pending: PendingTable,
    session: tokio::sync::Mutex<Option<Session>>,
    /// Serializes connect attempts
    connect_lock: tokio::sync::Mutex<()>,
    /// One permit; held per request when pipelining is off
    serial: Semaphore,
    next_id: AtomicU64,
    /// Bumped for every new session and on teardown
    generation: AtomicU64,
    shutting_down: AtomicBool,
    reconnect_task: Mutex<Option<JoinHandle<()>>>,
}

impl Inner {
    fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    fn set_state(&self, next: ConnectionState) {
        let prev = std::mem::replace(&mut *self.state.write(), next);
        if prev != next {
            info!(from = %prev, to = %next, "Connection state changed");
        }
    }

    fn next_token(&self) -> String {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        format!("{}-{}", self.config.action_id_prefix, n)
    }

    fn current_generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }
}

/// Handle to the managed connection. Cheap to clone; all clones share the
/// same session.
#[derive(Clone)]
pub struct AmiConnection {
    inner: Arc<Inner>,
}

impl AmiConnection {
    /// Connection over TCP
    pub fn new(config: AmiConfig, router: Arc<EventRouter>) -> Self {
        Self::with_connector(config, Arc::new(TcpConnector), router)
    }

    pub fn with_connector(config: AmiConfig, connector: Arc<dyn Connector>, router: Arc<EventRouter>) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                connector,
                router,
                state: RwLock::new(ConnectionState::Disconnected),
                pending: PendingTable::new(),
                session: tokio::sync::Mutex::new(None),
                connect_lock: tokio::sync::Mutex::new(()),
                serial: Semaphore::new(1),
                next_id: AtomicU64::new(0),
                generation: AtomicU64::new(0),
                shutting_down: AtomicBool::new(false),
                reconnect_task: Mutex::new(None),
            }),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    pub fn is_ready(&self) -> bool {
        self.state() == ConnectionState::Ready
    }

    pub fn config(&self) -> &AmiConfig {
        &self.inner.config
    }

    pub fn router(&self) -> &Arc<EventRouter> {
        &self.inner.router
    }

    /// Number of requests awaiting a reply
    pub fn in_flight(&self) -> usize {
        self.inner.pending.len()
    }

    /// Open the socket, read the banner and log in.
    ///
    /// A rejected login surfaces as [`AmiError::Protocol`] and leaves the
    /// connection `Disconnected`.
    pub async fn connect(&self) -> AmiResult<()> {
        self.inner.config.validate()?;
        self.inner.shutting_down.store(false, Ordering::SeqCst);
        session::establish(&self.inner).await
    }

    /// Submit with the configured response timeout
    pub async fn submit(&self, action: Action) -> AmiResult<Reply> {
        let timeout = self.inner.config.response_timeout();
        self.submit_with_timeout(action, timeout).await
    }

    /// Send `action` and wait up to `timeout` for its reply.
    ///
    /// In serialized mode the wait for the request slot counts against the
    /// same deadline. Error responses from the switch are returned as `Ok`;
    /// use [`Reply::into_result`] to turn them into [`AmiError::Protocol`].
    pub async fn submit_with_timeout(&self, action: Action, timeout: Duration) -> AmiResult<Reply> {
        let inner = &self.inner;
        let state = inner.state();
        if state != ConnectionState::Ready {
            return Err(AmiError::link_down(format!("connection is {}", state)));
        }
        let deadline = Instant::now() + timeout;
        let timeout_ms = timeout.as_millis() as u64;

        let _permit = if inner.config.pipelining {
            None
        } else {
            match timeout_at(deadline, inner.serial.acquire()).await {
                Ok(permit) => Some(permit.map_err(|_| AmiError::link_down("connection closed"))?),
                Err(_) => {
                    warn!(action = %action, timeout_ms, "Timed out waiting for the request slot");
                    return Err(AmiError::timeout(action.name(), timeout_ms));
                }
            }
        };

        let token = inner.next_token();
        let mut rx = inner.pending.register(&token, action.name());
        let bytes = codec::encode(&action, Some(&token));
        debug!(action = %action, action_id = %token, "Submitting action");

        if let Err(e) = session::write(inner, &bytes).await {
            inner.pending.remove(&token);
            return Err(e);
        }

        match timeout_at(deadline, &mut rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(AmiError::link_down("reply channel closed")),
            Err(_) => {
                if !inner.pending.abandon(&token) {
                    // Completed while the deadline fired
                    if let Ok(result) = rx.try_recv() {
                        return result;
                    }
                }
                warn!(action = %action, action_id = %token, timeout_ms, "Action timed out");
                Err(AmiError::timeout(action.name(), timeout_ms))
            }
        }
    }

    /// Log off and close the session.
    ///
    /// Every waiter fails with `LinkDown`, background loops stop and no
    /// reconnect is attempted.
    pub async fn shutdown(&self) -> AmiResult<()> {
        session::shutdown(&self.inner).await
    }
}

#[async_trait]
impl ActionSubmitter for AmiConnection {
    async fn submit(&self, action: Action) -> AmiResult<Reply> {
        AmiConnection::submit(self, action).await
    }
}

impl fmt::Debug for AmiConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AmiConnection")
            .field("address", &self.inner.config.address())
            .field("state", &self.state())
            .field("in_flight", &self.in_flight())
            .finish()
    }
}
