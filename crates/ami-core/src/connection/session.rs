//! Session lifecycle: handshake, background loops, teardown, reconnect

use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::watch;
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::connector::BoxedStream;
use super::pending::Routed;
use super::{AmiConnection, ConnectionState, Inner};
use crate::action::Action;
use crate::codec::{self, AmiCodec, Frame};
use crate::error::{AmiError, AmiResult};
use crate::events::{Notification, LINK_DOWN_EVENT, LINK_UP_EVENT};
use crate::record::Record;
use crate::retry::retry_with_backoff;

const READ_BUFFER: usize = 8192;
const LOGOFF_GRACE: Duration = Duration::from_millis(500);

/// Write side of an established session
pub(super) struct Session {
    generation: u64,
    writer: WriteHalf<BoxedStream>,
    /// Flipped on teardown to stop this session's loops
    closed: watch::Sender<bool>,
}

struct Handshake {
    banner: String,
    reader: ReadHalf<BoxedStream>,
    writer: WriteHalf<BoxedStream>,
    decoder: AmiCodec,
}

/// Connect and log in, then start the receive and keep-alive loops
pub(super) async fn establish(inner: &Arc<Inner>) -> AmiResult<()> {
    let _guard = inner.connect_lock.lock().await;
    if inner.state() == ConnectionState::Ready {
        return Ok(());
    }

    inner.set_state(ConnectionState::Connecting);
    let hs = match handshake(inner).await {
        Ok(hs) => hs,
        Err(e) => {
            inner.set_state(ConnectionState::Disconnected);
            warn!(error = %e, category = e.category(), "Connection attempt failed");
            // A rejected login is an answer, not a lost link
            if matches!(e, AmiError::LinkDown { .. }) {
                inner
                    .router
                    .publish(Notification::synthetic(LINK_DOWN_EVENT, [("Reason", e.to_string())]));
            }
            return Err(e);
        }
    };

    if inner.shutting_down.load(Ordering::SeqCst) {
        inner.set_state(ConnectionState::Disconnected);
        return Err(AmiError::link_down("shutdown requested"));
    }

    let generation = inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
    let (closed_tx, closed_rx) = watch::channel(false);
    *inner.session.lock().await = Some(Session {
        generation,
        writer: hs.writer,
        closed: closed_tx,
    });
    inner.set_state(ConnectionState::Ready);

    tokio::spawn(receive_loop(
        Arc::downgrade(inner),
        hs.reader,
        hs.decoder,
        generation,
        closed_rx.clone(),
    ));
    if let Some(every) = inner.config.keepalive_interval() {
        tokio::spawn(keepalive_loop(Arc::downgrade(inner), generation, every, closed_rx));
    }

    info!(banner = %hs.banner, generation, "Manager session ready");
    inner
        .router
        .publish(Notification::synthetic(LINK_UP_EVENT, [("Banner", hs.banner)]));
    Ok(())
}

async fn handshake(inner: &Inner) -> AmiResult<Handshake> {
    let config = &inner.config;
    let deadline = config.response_timeout();
    let timeout_ms = config.response_timeout_ms;

    let stream = inner.connector.connect(config).await?;
    let (mut reader, mut writer) = tokio::io::split(stream);
    let mut decoder = AmiCodec::new().with_max_buffered(config.max_frame_bytes);

    let first = timeout(deadline, read_frame(&mut reader, &mut decoder))
        .await
        .map_err(|_| AmiError::timeout("banner", timeout_ms))??;
    let Frame::Banner(banner) = first else {
        return Err(AmiError::protocol("banner", "expected greeting line"));
    };
    debug!(%banner, "Greeting received");

    let token = inner.next_token();
    let login = codec::encode(&Action::login(&config.username, &config.secret), Some(&token));
    writer.write_all(&login).await?;
    writer.flush().await?;

    let response = timeout(deadline, async {
        loop {
            if let Frame::Record(record) = read_frame(&mut reader, &mut decoder).await? {
                if record.is_response() && record.action_id().map_or(true, |id| id == token) {
                    return Ok::<Record, AmiError>(record);
                }
                debug!(event = ?record.event(), "Ignoring record received before login completed");
            }
        }
    })
    .await
    .map_err(|_| AmiError::timeout("Login", timeout_ms))??;

    if response.is_error() {
        return Err(AmiError::protocol("Login", response.message()));
    }

    Ok(Handshake {
        banner,
        reader,
        writer,
        decoder,
    })
}

async fn read_frame(reader: &mut ReadHalf<BoxedStream>, decoder: &mut AmiCodec) -> AmiResult<Frame> {
    let mut buf = [0u8; 4096];
    loop {
        if let Some(frame) = decoder.next_frame() {
            return Ok(frame);
        }
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Err(AmiError::link_down("connection closed during handshake"));
        }
        decoder.feed(&buf[..n])?;
    }
}

/// Write one encoded action on the current session
pub(super) async fn write(inner: &Arc<Inner>, bytes: &[u8]) -> AmiResult<()> {
    let mut guard = inner.session.lock().await;
    let session = guard
        .as_mut()
        .ok_or_else(|| AmiError::link_down("not connected"))?;
    let generation = session.generation;
    let result = match session.writer.write_all(bytes).await {
        Ok(()) => session.writer.flush().await,
        Err(e) => Err(e),
    };
    drop(guard);

    if let Err(e) = result {
        let reason = format!("write failed: {}", e);
        link_lost(inner, generation, reason.clone()).await;
        return Err(AmiError::link_down(reason));
    }
    Ok(())
}

/// Sole reader of the socket. Never submits actions itself.
async fn receive_loop(
    weak: Weak<Inner>,
    mut reader: ReadHalf<BoxedStream>,
    mut decoder: AmiCodec,
    generation: u64,
    mut closed: watch::Receiver<bool>,
) {
    let mut buf = vec![0u8; READ_BUFFER];
    let reason = loop {
        while let Some(frame) = decoder.next_frame() {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            match frame {
                Frame::Record(record) => dispatch(&inner, record),
                Frame::Banner(line) => debug!(%line, "Ignoring unexpected greeting"),
            }
        }

        tokio::select! {
            read = reader.read(&mut buf) => match read {
                Ok(0) => break "connection closed by peer".to_string(),
                Ok(n) => {
                    if let Err(e) = decoder.feed(&buf[..n]) {
                        break e.to_string();
                    }
                }
                Err(e) => break format!("read failed: {}", e),
            },
            _ = closed.changed() => {
                debug!(generation, "Receive loop stopped");
                return;
            }
        }
    };

    if let Some(inner) = weak.upgrade() {
        link_lost(&inner, generation, reason).await;
    }
}

fn dispatch(inner: &Inner, record: Record) {
    debug!(
        response = ?record.response(),
        event = ?record.event(),
        action_id = ?record.action_id(),
        "Record received"
    );
    match inner.pending.accept(record) {
        Routed::Reply | Routed::Discarded => {}
        Routed::Notification(record) => inner.router.publish(Notification::new(record)),
    }
}

async fn keepalive_loop(
    weak: Weak<Inner>,
    generation: u64,
    every: Duration,
    mut closed: watch::Receiver<bool>,
) {
    let mut ticker = interval_at(Instant::now() + every, every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut failures = 0u32;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = closed.changed() => return,
        }
        let Some(inner) = weak.upgrade() else {
            return;
        };
        if inner.current_generation() != generation {
            return;
        }

        let max_failures = inner.config.keepalive_max_failures;
        let connection = AmiConnection { inner: inner.clone() };
        match connection.submit(Action::ping()).await {
            Ok(_) => {
                if failures > 0 {
                    debug!(previous_failures = failures, "Keep-alive recovered");
                }
                failures = 0;
            }
            Err(e) => {
                failures += 1;
                warn!(error = %e, failures, max_failures, "Keep-alive failed");
                if failures >= max_failures {
                    let reason = format!("{} consecutive keep-alive failures", failures);
                    link_lost(&inner, generation, reason).await;
                    return;
                }
            }
        }
    }
}

/// Tear down session `generation` after an I/O or keep-alive failure.
///
/// Only the first caller for a given generation has any effect.
pub(super) async fn link_lost(inner: &Arc<Inner>, generation: u64, reason: String) {
    if inner
        .generation
        .compare_exchange(generation, generation + 1, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        debug!(generation, %reason, "Ignoring teardown of a superseded session");
        return;
    }

    warn!(%reason, generation, "Link down");
    inner.set_state(ConnectionState::Disconnected);
    if let Some(session) = inner.session.lock().await.take() {
        let _ = session.closed.send(true);
    }
    inner.pending.fail_all(&AmiError::link_down(reason.clone()));
    inner
        .router
        .publish(Notification::synthetic(LINK_DOWN_EVENT, [("Reason", reason)]));

    if inner.config.auto_reconnect && !inner.shutting_down.load(Ordering::SeqCst) {
        schedule_reconnect(inner);
    }
}

fn schedule_reconnect(inner: &Arc<Inner>) {
    let weak = Arc::downgrade(inner);
    let policy = inner.config.reconnect.clone();
    let handle = tokio::spawn(async move {
        let result = retry_with_backoff("reconnect", &policy, || reconnect_attempt(weak.clone())).await;

        match result {
            Ok(()) => info!("Reconnected to manager interface"),
            Err(e) => error!(error = %e, "Reconnect abandoned, connection stays down"),
        }
    });

    if let Some(previous) = inner.reconnect_task.lock().replace(handle) {
        previous.abort();
    }
}

// Boxed so the reconnect task does not make `establish` depend on itself
fn reconnect_attempt(weak: Weak<Inner>) -> BoxFuture<'static, AmiResult<()>> {
    Box::pin(async move {
        let inner = weak
            .upgrade()
            .ok_or_else(|| AmiError::config("connection handle dropped"))?;
        if inner.shutting_down.load(Ordering::SeqCst) {
            return Err(AmiError::config("shutdown requested"));
        }
        establish(&inner).await
    })
}

pub(super) async fn shutdown(inner: &Arc<Inner>) -> AmiResult<()> {
    inner.shutting_down.store(true, Ordering::SeqCst);
    if let Some(task) = inner.reconnect_task.lock().take() {
        task.abort();
    }

    let _guard = inner.connect_lock.lock().await;
    inner.generation.fetch_add(1, Ordering::SeqCst);
    inner.set_state(ConnectionState::Closing);

    let session = inner.session.lock().await.take();
    if let Some(mut session) = session {
        let logoff = codec::encode(&Action::logoff(), Some(&inner.next_token()));
        let _ = timeout(LOGOFF_GRACE, async {
            if session.writer.write_all(&logoff).await.is_ok() {
                let _ = session.writer.shutdown().await;
            }
        })
        .await;
        let _ = session.closed.send(true);
    }

    inner
        .pending
        .fail_all(&AmiError::link_down("connection shut down"));
    inner.set_state(ConnectionState::Disconnected);
    info!("Manager session closed");
    Ok(())
}
