//! Client Sessions
//!
//! A session is a bounded outbound queue plus a close signal, shared between
//! the hub (which only ever enqueues and closes) and the two tasks that own
//! the socket: an inbound task turning frames into operations and an
//! outbound task draining the queue and pinging the client.

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};

use super::hub::HubLink;
use super::operation::SessionId;
use crate::shared::signal;

/// Transport-neutral WebSocket frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close,
}

/// Why a non-blocking enqueue failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueError {
    /// Queue at capacity: the client is not keeping up.
    Full,
    /// Session already closing.
    Closed,
}

/// The hub's view of a session.
#[derive(Clone, Debug)]
pub struct SessionHandle {
    id: SessionId,
    outbound: mpsc::Sender<Arc<str>>,
    closed: Arc<watch::Sender<bool>>,
}

/// The session tasks' side of a [`SessionHandle`].
#[derive(Debug)]
pub struct SessionChannels {
    pub outbound: mpsc::Receiver<Arc<str>>,
    pub closed: watch::Receiver<bool>,
}

/// Create a session handle and its task-side channels.
pub fn session_pair(id: SessionId, capacity: usize) -> (SessionHandle, SessionChannels) {
    let (outbound_tx, outbound_rx) = mpsc::channel(capacity);
    let (closed_tx, closed_rx) = watch::channel(false);
    (
        SessionHandle {
            id,
            outbound: outbound_tx,
            closed: Arc::new(closed_tx),
        },
        SessionChannels {
            outbound: outbound_rx,
            closed: closed_rx,
        },
    )
}

impl SessionHandle {
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Enqueue without waiting.
    pub fn try_enqueue(&self, payload: Arc<str>) -> Result<(), EnqueueError> {
        if self.is_closed() {
            return Err(EnqueueError::Closed);
        }
        self.outbound.try_send(payload).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => EnqueueError::Full,
            mpsc::error::TrySendError::Closed(_) => EnqueueError::Closed,
        })
    }

    /// Start the close sequence. Idempotent.
    pub fn close(&self) {
        self.closed.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow() || self.outbound.is_closed()
    }
}

/// Socket timing for one session.
#[derive(Debug, Clone, Copy)]
pub struct SessionTimings {
    pub ping_period: Duration,
    pub pong_wait: Duration,
    pub write_wait: Duration,
}

/// Spawn the inbound and outbound tasks of an admitted session.
///
/// Each task holds a clone of `tracker`; the hub waits for every clone to be
/// dropped during shutdown.
pub(crate) fn spawn<S, K, E, W>(
    handle: SessionHandle,
    channels: SessionChannels,
    link: HubLink,
    stream: S,
    sink: K,
    timings: SessionTimings,
    tracker: mpsc::Sender<()>,
) where
    S: Stream<Item = Result<Frame, E>> + Send + 'static,
    K: Sink<Frame, Error = W> + Send + 'static,
    E: Display + Send + 'static,
    W: Display + Send + 'static,
{
    let SessionChannels { outbound, closed } = channels;

    tokio::spawn(read_loop(
        handle.clone(),
        link.clone(),
        stream,
        closed.clone(),
        timings,
        tracker.clone(),
    ));
    tokio::spawn(write_loop(handle, link, sink, outbound, closed, timings, tracker));
}

async fn read_loop<S, E>(
    handle: SessionHandle,
    link: HubLink,
    stream: S,
    mut closed: watch::Receiver<bool>,
    timings: SessionTimings,
    _tracker: mpsc::Sender<()>,
) where
    S: Stream<Item = Result<Frame, E>>,
    E: Display,
{
    futures::pin_mut!(stream);
    let session_id = handle.id();

    loop {
        let next = tokio::select! {
            _ = signal::raised(&mut closed) => break,
            next = timeout(timings.pong_wait, stream.next()) => next,
        };

        match next {
            Err(_) => {
                tracing::debug!(session_id = %session_id, "Client silent past liveness window");
                break;
            }
            Ok(None) | Ok(Some(Ok(Frame::Close))) => {
                tracing::debug!(session_id = %session_id, "Connection closed by client");
                break;
            }
            Ok(Some(Err(e))) => {
                tracing::debug!(session_id = %session_id, error = %e, "Socket read failed");
                break;
            }
            Ok(Some(Ok(Frame::Ping(_) | Frame::Pong(_)))) => continue,
            Ok(Some(Ok(Frame::Text(text)))) => {
                tracing::trace!(session_id = %session_id, size = text.len(), "Inbound frame");
                let response = link.submit(session_id, &text).await;
                if let Err(e) = handle.try_enqueue(response) {
                    tracing::warn!(
                        session_id = %session_id,
                        reason = ?e,
                        "Could not queue operation response"
                    );
                    break;
                }
            }
        }
    }

    link.release(&session_id);
}

async fn write_loop<K, W>(
    handle: SessionHandle,
    link: HubLink,
    sink: K,
    mut outbound: mpsc::Receiver<Arc<str>>,
    mut closed: watch::Receiver<bool>,
    timings: SessionTimings,
    _tracker: mpsc::Sender<()>,
) where
    K: Sink<Frame, Error = W>,
    W: Display,
{
    futures::pin_mut!(sink);
    let session_id = handle.id();

    let mut ping = interval_at(Instant::now() + timings.ping_period, timings.ping_period);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let frame = tokio::select! {
            _ = signal::raised(&mut closed) => break,
            next = outbound.recv() => match next {
                Some(text) => Frame::Text(text.to_string()),
                None => break,
            },
            _ = ping.tick() => Frame::Ping(Vec::new()),
        };

        match timeout(timings.write_wait, sink.send(frame)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::debug!(session_id = %session_id, error = %e, "Socket write failed");
                break;
            }
            Err(_) => {
                tracing::debug!(session_id = %session_id, "Socket write timed out");
                break;
            }
        }
    }

    outbound.close();
    link.release(&session_id);
    let _ = timeout(timings.write_wait, sink.send(Frame::Close)).await;
}
