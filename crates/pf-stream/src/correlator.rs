//! Request/response correlation over the push-oriented feed socket.
//!
//! Requests carry an integer id, allocated from 1 per connection. The feed
//! answers each with a `status` echoing the id, interleaved with pushed
//! change messages. [`Correlator`] owns the write half of the socket (behind
//! the single writer lock) and the table of outstanding requests. The read
//! loop hands every `status` to [`Correlator::resolve`].
//!
//! Each id is resolved at most once: by its response, by its deadline, or by
//! [`Correlator::fail_all`] when the connection goes away.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use futures_util::SinkExt;
use pf_core::error::RequestError;
use pf_core::types::StatusMessage;
use tokio::sync::{Mutex, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::codec;
use crate::protocol::Message;
use crate::transport::FeedWriter;

type Reply = oneshot::Sender<Result<StatusMessage, RequestError>>;

struct OutstandingRequest {
    /// `None` for fire-and-forget requests.
    reply: Option<Reply>,
    op: &'static str,
    deadline: Instant,
}

/// What [`Correlator::resolve`] did with a `status`.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Delivered to the waiting caller.
    Correlated(u64),
    /// Matched a fire-and-forget request; consumed.
    Fired(u64),
    /// Carried an id with no outstanding request (late or bogus).
    Unknown(u64),
    /// Carried no id; the caller should surface it as a notice.
    Uncorrelated(StatusMessage),
}

#[derive(Debug, Clone, PartialEq)]
enum Gate {
    Pending,
    Open(String),
    Closed,
}

pub struct Correlator {
    label: String,
    next_id: AtomicU64,
    timeout: Duration,
    writer: Mutex<Option<FeedWriter>>,
    pending: Mutex<HashMap<u64, OutstandingRequest>>,
    gate: watch::Sender<Gate>,
    closed: AtomicBool,
}

impl Correlator {
    pub fn new(writer: FeedWriter, timeout: Duration, label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            next_id: AtomicU64::new(1),
            timeout,
            writer: Mutex::new(Some(writer)),
            pending: Mutex::new(HashMap::new()),
            gate: watch::Sender::new(Gate::Pending),
            closed: AtomicBool::new(false),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Send a request and await its `status` response.
    ///
    /// `build` receives the allocated id. A non-success status is returned
    /// as [`RequestError::Rejected`]. On deadline the entry is removed and
    /// [`RequestError::Timeout`] returned.
    pub async fn send<F>(&self, op: &'static str, build: F) -> Result<StatusMessage, RequestError>
    where
        F: FnOnce(u64) -> Message,
    {
        if self.is_closed() {
            return Err(RequestError::ConnectionClosed);
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let deadline = Instant::now() + self.timeout;
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(
            id,
            OutstandingRequest {
                reply: Some(tx),
                op,
                deadline,
            },
        );

        if let Err(e) = self.write(&build(id)).await {
            self.pending.lock().await.remove(&id);
            return Err(e);
        }
        debug!("[{}] sent {op} id={id}", self.label);

        match tokio::time::timeout_at(deadline, rx).await {
            Ok(Ok(result)) => result,
            // Sender dropped without an answer: the table was torn down.
            Ok(Err(_)) => Err(RequestError::ConnectionClosed),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                warn!("[{}] {op} id={id} timed out after {:?}", self.label, self.timeout);
                Err(RequestError::Timeout { id, op })
            }
        }
    }

    /// Send a request whose response is not awaited. Returns the id used.
    ///
    /// The entry is kept until the response arrives (and is consumed
    /// quietly) or [`Correlator::purge_expired`] drops it.
    pub async fn fire<F>(&self, op: &'static str, build: F) -> Result<u64, RequestError>
    where
        F: FnOnce(u64) -> Message,
    {
        if self.is_closed() {
            return Err(RequestError::ConnectionClosed);
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let deadline = Instant::now() + self.timeout;
        self.pending.lock().await.insert(
            id,
            OutstandingRequest {
                reply: None,
                op,
                deadline,
            },
        );
        if let Err(e) = self.write(&build(id)).await {
            self.pending.lock().await.remove(&id);
            return Err(e);
        }
        debug!("[{}] fired {op} id={id}", self.label);
        Ok(id)
    }

    async fn write(&self, msg: &Message) -> Result<(), RequestError> {
        let line = codec::encode(msg).map_err(|e| RequestError::Io(e.to_string()))?;
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(RequestError::ConnectionClosed)?;
        // `send` flushes before returning; the lock is held until then.
        writer
            .send(line)
            .await
            .map_err(|e| RequestError::Io(e.to_string()))
    }

    /// Route a `status` to whoever is waiting for it.
    pub async fn resolve(&self, status: StatusMessage) -> Resolution {
        let Some(id) = status.id else {
            return Resolution::Uncorrelated(status);
        };
        let Some(entry) = self.pending.lock().await.remove(&id) else {
            warn!("[{}] status for unknown id={id} dropped", self.label);
            return Resolution::Unknown(id);
        };
        match entry.reply {
            Some(reply) => {
                if reply.send(status.into_result()).is_err() {
                    debug!("[{}] {} id={id} caller gone", self.label, entry.op);
                }
                Resolution::Correlated(id)
            }
            None => {
                if !status.is_success() {
                    warn!(
                        "[{}] {} id={id} failed: {:?} {:?}",
                        self.label, entry.op, status.error_code, status.error_message
                    );
                }
                Resolution::Fired(id)
            }
        }
    }

    /// Record the server's `connection` push and release anyone waiting for it.
    ///
    /// Only the first one counts.
    pub fn on_connection(&self, connection_id: &str) {
        let opened = self.gate.send_if_modified(|gate| {
            if *gate == Gate::Pending {
                *gate = Gate::Open(connection_id.to_string());
                true
            } else {
                false
            }
        });
        if opened {
            info!("[{}] connection id {connection_id}", self.label);
        } else {
            warn!("[{}] repeated connection message ignored", self.label);
        }
    }

    /// Wait (bounded) for the `connection` push. Returns the connection id.
    pub async fn wait_connected(&self, within: Duration) -> Result<String, RequestError> {
        let mut rx = self.gate.subscribe();
        let waited = tokio::time::timeout(within, async {
            rx.wait_for(|g| *g != Gate::Pending)
                .await
                .map(|g| g.clone())
        })
        .await;
        match waited {
            Ok(Ok(Gate::Open(id))) => Ok(id),
            Ok(Ok(_)) | Ok(Err(_)) => Err(RequestError::ConnectionClosed),
            Err(_) => Err(RequestError::Timeout {
                id: 0,
                op: "connection",
            }),
        }
    }

    /// The connection id, once the `connection` push has arrived.
    pub fn connection_id(&self) -> Option<String> {
        match &*self.gate.borrow() {
            Gate::Open(id) => Some(id.clone()),
            _ => None,
        }
    }

    /// Tear down: refuse new requests, fail every outstanding one with
    /// [`RequestError::ConnectionClosed`] and release the socket's write half.
    ///
    /// Idempotent.
    pub async fn fail_all(&self) -> usize {
        self.closed.store(true, Ordering::Release);
        self.gate.send_if_modified(|gate| {
            if *gate == Gate::Pending {
                *gate = Gate::Closed;
                true
            } else {
                false
            }
        });

        let drained: Vec<(u64, OutstandingRequest)> = self.pending.lock().await.drain().collect();
        let failed = drained.len();
        for (_, entry) in drained {
            if let Some(reply) = entry.reply {
                let _ = reply.send(Err(RequestError::ConnectionClosed));
            }
        }
        if failed > 0 {
            info!("[{}] failed {failed} outstanding request(s)", self.label);
        }

        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.close().await;
        }
        failed
    }

    /// Drop entries nobody can receive any more: expired fire-and-forget
    /// requests and requests whose caller went away.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut pending = self.pending.lock().await;
        let before = pending.len();
        pending.retain(|_, entry| match &entry.reply {
            Some(reply) => !reply.is_closed(),
            None => entry.deadline > now,
        });
        before - pending.len()
    }

    /// Number of requests awaiting a response.
    pub async fn outstanding(&self) -> usize {
        self.pending.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use futures_util::StreamExt;

    use super::*;
    use crate::protocol::HeartbeatMessage;
    use crate::transport::FeedStream;

    fn pair(timeout: Duration) -> (Arc<Correlator>, FeedStream) {
        let (a, b) = tokio::io::duplex(64 * 1024);
        let ours = FeedStream::from_io(a, "client");
        let feed = FeedStream::from_io(b, "feed");
        (Arc::new(Correlator::new(ours.writer, timeout, "test")), feed)
    }

    fn heartbeat(id: u64) -> Message {
        Message::Heartbeat(HeartbeatMessage { id })
    }

    #[tokio::test]
    async fn ids_start_at_one_and_resolve_once() {
        let (corr, mut feed) = pair(Duration::from_secs(5));
        let c = corr.clone();
        let call = tokio::spawn(async move { c.send("heartbeat", heartbeat).await });

        let line = feed.reader.next().await.unwrap().unwrap();
        let sent = codec::decode(&line).unwrap();
        assert_eq!(sent.id(), Some(1));

        assert_eq!(corr.resolve(StatusMessage::success(1)).await, Resolution::Correlated(1));
        assert!(call.await.unwrap().unwrap().is_success());
        // A second response for the same id finds nothing.
        assert_eq!(corr.resolve(StatusMessage::success(1)).await, Resolution::Unknown(1));
        assert_eq!(corr.outstanding().await, 0);
    }

    #[tokio::test]
    async fn timeout_removes_entry() {
        let (corr, mut feed) = pair(Duration::from_millis(50));
        let err = corr.send("heartbeat", heartbeat).await.unwrap_err();
        assert_eq!(err, RequestError::Timeout { id: 1, op: "heartbeat" });
        assert_eq!(corr.outstanding().await, 0);
        assert!(feed.reader.next().await.is_some());
        // Late response is dropped.
        assert_eq!(corr.resolve(StatusMessage::success(1)).await, Resolution::Unknown(1));
    }

    #[tokio::test]
    async fn fired_requests_are_consumed_quietly() {
        let (corr, _feed) = pair(Duration::from_secs(5));
        let id = corr.fire("heartbeat", heartbeat).await.unwrap();
        assert_eq!(corr.outstanding().await, 1);
        assert_eq!(corr.resolve(StatusMessage::success(id)).await, Resolution::Fired(id));
        assert_eq!(corr.outstanding().await, 0);
    }

    #[tokio::test]
    async fn purge_drops_expired_fire_and_forget() {
        let (corr, _feed) = pair(Duration::from_millis(20));
        corr.fire("heartbeat", heartbeat).await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(corr.purge_expired().await, 1);
        assert_eq!(corr.outstanding().await, 0);
    }

    #[tokio::test]
    async fn uncorrelated_status_is_returned() {
        let (corr, _feed) = pair(Duration::from_secs(5));
        let mut notice = StatusMessage::success(0);
        notice.id = None;
        assert!(matches!(corr.resolve(notice).await, Resolution::Uncorrelated(_)));
    }

    #[tokio::test]
    async fn fail_all_fails_waiters_and_refuses_new_requests() {
        let (corr, mut feed) = pair(Duration::from_secs(5));
        let c = corr.clone();
        let call = tokio::spawn(async move { c.send("heartbeat", heartbeat).await });
        feed.reader.next().await.unwrap().unwrap();

        assert_eq!(corr.fail_all().await, 1);
        assert_eq!(call.await.unwrap(), Err(RequestError::ConnectionClosed));
        assert_eq!(
            corr.send("heartbeat", heartbeat).await,
            Err(RequestError::ConnectionClosed)
        );
        // Idempotent.
        assert_eq!(corr.fail_all().await, 0);
    }

    #[tokio::test]
    async fn connection_gate() {
        let (corr, _feed) = pair(Duration::from_secs(5));
        assert!(matches!(
            corr.wait_connected(Duration::from_millis(20)).await,
            Err(RequestError::Timeout { .. })
        ));

        let c = corr.clone();
        let waiter = tokio::spawn(async move { c.wait_connected(Duration::from_secs(5)).await });
        corr.on_connection("002-1");
        corr.on_connection("002-2");
        assert_eq!(waiter.await.unwrap(), Ok("002-1".to_string()));
        assert_eq!(corr.connection_id().as_deref(), Some("002-1"));
    }
}
