//! One live feed connection and its read loop.
//!
//! A [`Connection`] is built per socket and never reused: the client builds a
//! fresh one on every (re)connect. It owns the [`Correlator`] (and through it
//! the write half) and a background task that reads lines, decodes them and
//! dispatches them. The read loop only waits on the socket and on quick
//! in-memory bookkeeping; events leave it through a bounded channel via
//! `try_send`.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use pf_core::types::{ConnectionState, FeedEvent, FeedEventSender};
use tokio::sync::{mpsc::error::TrySendError, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::codec;
use crate::correlator::{Correlator, Resolution};
use crate::processor::ChangeProcessor;
use crate::protocol::Message;
use crate::transport::{FeedReader, FeedStream};

/// Authentication progress of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthState {
    #[default]
    Unauthenticated,
    Authenticating,
    Authenticated,
}

/// Application key and session token sent in the authentication message.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub app_key: String,
    pub session: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("app_key", &self.app_key)
            .field("session", &"<redacted>")
            .finish()
    }
}

/// State shared between the client and every connection it builds.
#[derive(Clone)]
pub(crate) struct Shared {
    pub label: String,
    pub processor: Arc<Mutex<ChangeProcessor>>,
    pub events: FeedEventSender,
    pub state: Arc<watch::Sender<ConnectionState>>,
}

impl Shared {
    pub fn emit(&self, event: FeedEvent) {
        match self.events.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => warn!("[{}] event channel full, dropping event", self.label),
            Err(TrySendError::Closed(_)) => debug!("[{}] no event receiver", self.label),
        }
    }

    /// Move to `state`, emitting a lifecycle event if it changed.
    pub fn set_state(&self, state: ConnectionState) {
        let changed = self.state.send_if_modified(|s| {
            if *s == state {
                false
            } else {
                *s = state;
                true
            }
        });
        if changed {
            self.emit(FeedEvent::ConnectionState(state));
        }
    }

    fn processor(&self) -> std::sync::MutexGuard<'_, ChangeProcessor> {
        self.processor.lock().unwrap_or_else(|e| e.into_inner())
    }
}

pub struct Connection {
    shared: Shared,
    peer: String,
    correlator: Arc<Correlator>,
    auth: Mutex<AuthState>,
    credentials: Mutex<Option<Credentials>>,
    last_heartbeat: Mutex<Option<Instant>>,
    shutdown: watch::Sender<bool>,
    reader: Mutex<Option<JoinHandle<()>>>,
    torn_down: AtomicBool,
}

impl Connection {
    /// Wrap a connected stream and start its read loop.
    pub(crate) fn open(stream: FeedStream, request_timeout: Duration, shared: Shared) -> Arc<Self> {
        let FeedStream { reader, writer, peer } = stream;
        let correlator = Arc::new(Correlator::new(writer, request_timeout, shared.label.clone()));
        let (shutdown, shutdown_rx) = watch::channel(false);

        let conn = Arc::new(Self {
            shared,
            peer,
            correlator,
            auth: Mutex::new(AuthState::Unauthenticated),
            credentials: Mutex::new(None),
            last_heartbeat: Mutex::new(None),
            shutdown,
            reader: Mutex::new(None),
            torn_down: AtomicBool::new(false),
        });

        info!("[{}] connected to {}", conn.shared.label, conn.peer);
        conn.shared.set_state(ConnectionState::Connected);

        let task = tokio::spawn(read_loop(Arc::clone(&conn), reader, shutdown_rx));
        *lock(&conn.reader) = Some(task);
        conn
    }

    pub fn correlator(&self) -> &Correlator {
        &self.correlator
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn auth_state(&self) -> AuthState {
        *lock(&self.auth)
    }

    pub(crate) fn set_auth(&self, auth: AuthState) {
        *lock(&self.auth) = auth;
        let state = match auth {
            AuthState::Unauthenticated => ConnectionState::Connected,
            AuthState::Authenticating => ConnectionState::Authenticating,
            AuthState::Authenticated => ConnectionState::Authenticated,
        };
        if !self.is_closed() {
            self.shared.set_state(state);
        }
    }

    pub fn credentials(&self) -> Option<Credentials> {
        lock(&self.credentials).clone()
    }

    pub(crate) fn set_credentials(&self, credentials: Credentials) {
        *lock(&self.credentials) = Some(credentials);
    }

    pub fn last_heartbeat(&self) -> Option<Instant> {
        *lock(&self.last_heartbeat)
    }

    pub(crate) fn mark_heartbeat(&self) {
        *lock(&self.last_heartbeat) = Some(Instant::now());
    }

    pub fn is_closed(&self) -> bool {
        self.torn_down.load(Ordering::Acquire)
    }

    /// Stop the read loop and tear the connection down. Idempotent.
    pub(crate) async fn close(&self) {
        let _ = self.shutdown.send(true);
        self.teardown("disconnect requested").await;
        let task = lock(&self.reader).take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!("[{}] read loop panicked: {e}", self.shared.label);
            }
        }
    }

    /// Fail outstanding requests, release the socket, publish `Disconnected`.
    async fn teardown(&self, reason: &str) {
        if self.torn_down.swap(true, Ordering::AcqRel) {
            return;
        }
        self.correlator.fail_all().await;
        *lock(&self.auth) = AuthState::Unauthenticated;
        info!("[{}] disconnected from {}: {reason}", self.shared.label, self.peer);
        self.shared.set_state(ConnectionState::Disconnected);
    }

    /// Decode and route one inbound line.
    async fn dispatch(&self, line: &str) {
        let label = &self.shared.label;
        let msg = match codec::decode(line) {
            Ok(msg) => msg,
            Err(e) => {
                warn!("[{label}] skipping line: {e}");
                return;
            }
        };

        match msg {
            Message::Connection(c) => self.correlator.on_connection(&c.connection_id),
            Message::Status(status) => {
                let closing = status.connection_closed;
                if let Resolution::Uncorrelated(status) = self.correlator.resolve(status).await {
                    if !status.is_success() {
                        warn!(
                            "[{label}] feed status {:?}: {:?}",
                            status.error_code, status.error_message
                        );
                    }
                    self.shared.emit(FeedEvent::Status(status));
                }
                if closing {
                    warn!("[{label}] feed is closing the connection");
                }
            }
            Message::Mcm(mcm) => {
                let events = self.shared.processor().process_market_change(mcm);
                for event in events {
                    self.shared.emit(FeedEvent::MarketChanged(event));
                }
            }
            Message::Ocm(ocm) => {
                let event = self.shared.processor().process_order_change(ocm);
                if let Some(event) = event {
                    self.shared.emit(FeedEvent::OrderChanged(event));
                }
            }
            other => warn!("[{label}] unexpected {} from feed", other.op()),
        }
    }
}

async fn read_loop(conn: Arc<Connection>, mut reader: FeedReader, mut shutdown: watch::Receiver<bool>) {
    let label = conn.shared.label.clone();
    let reason = loop {
        tokio::select! {
            _ = shutdown.changed() => break "shutdown",
            line = reader.next() => match line {
                Some(Ok(line)) => conn.dispatch(&line).await,
                Some(Err(e)) => {
                    error!("[{label}] read error: {e}");
                    break "read error";
                }
                None => break "closed by peer",
            },
        }
    };
    debug!("[{label}] read loop exiting ({reason})");
    conn.teardown(reason).await;
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}
