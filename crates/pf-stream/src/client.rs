//! Caller-facing streaming client.
//!
//! [`StreamClient`] ties the pieces together: it opens (or adopts) a socket,
//! authenticates through the correlator, manages subscriptions and publishes
//! every processed change on a bounded event channel.
//!
//! ```no_run
//! # async fn demo() -> anyhow::Result<()> {
//! use pf_core::config::StreamConfig;
//! use pf_stream::StreamClient;
//!
//! let config = StreamConfig { app_key: "key".into(), session_token: "token".into(), ..Default::default() };
//! let (client, mut events) = StreamClient::new(config.clone());
//! client.connect().await?;
//! client.authenticate(&config.app_key, &config.session_token).await?;
//! client.subscribe_market("1.234567", &[], Some(3)).await?;
//! while let Some(event) = events.recv().await {
//!     println!("{event:?}");
//! }
//! # Ok(())
//! # }
//! ```

use std::sync::{Arc, Mutex};
use std::time::Instant;

use pf_core::config::StreamConfig;
use pf_core::error::{ConnectError, RequestError};
use pf_core::types::{ConnectionState, FeedEventReceiver};
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::connection::{AuthState, Connection, Credentials, Shared};
use crate::processor::{ChangeProcessor, ClockState};
use crate::protocol::{AuthenticationMessage, HeartbeatMessage, MarketDataField, Message, OrderFilter};
use crate::subscription::{MarketSubscription, SubscriptionAck, SubscriptionManager};
use crate::transport::{self, FeedStream};

pub struct StreamClient {
    config: StreamConfig,
    shared: Shared,
    subscriptions: SubscriptionManager,
    connection: tokio::sync::Mutex<Option<Arc<Connection>>>,
}

impl StreamClient {
    /// Build a client (no socket yet) and the receiver for its events.
    pub fn new(config: StreamConfig) -> (Self, FeedEventReceiver) {
        let (tx, rx) = tokio::sync::mpsc::channel(config.event_channel_capacity.max(1));
        let shared = Shared {
            label: config.label.clone(),
            processor: Arc::new(Mutex::new(ChangeProcessor::new(config.label.clone()))),
            events: tx,
            state: Arc::new(watch::Sender::new(ConnectionState::Disconnected)),
        };
        let subscriptions =
            SubscriptionManager::new(config.label.clone(), config.conflate_ms, config.heartbeat_ms);
        let client = Self {
            config,
            shared,
            subscriptions,
            connection: tokio::sync::Mutex::new(None),
        };
        (client, rx)
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Open the TLS socket to the configured host.
    ///
    /// Any previous connection is closed first. Connect failures are returned
    /// as-is; reconnect policy belongs to the caller.
    pub async fn connect(&self) -> Result<(), ConnectError> {
        let stream = transport::connect(&self.config).await?;
        self.attach(stream).await;
        Ok(())
    }

    /// Adopt an already-connected stream as the new connection.
    pub async fn attach(&self, stream: FeedStream) {
        let mut slot = self.connection.lock().await;
        if let Some(old) = slot.take() {
            old.close().await;
        }
        self.subscriptions.reset_connection().await;
        *slot = Some(Connection::open(
            stream,
            self.config.request_timeout(),
            self.shared.clone(),
        ));
    }

    async fn current(&self) -> Result<Arc<Connection>, RequestError> {
        match &*self.connection.lock().await {
            Some(conn) if !conn.is_closed() => Ok(Arc::clone(conn)),
            _ => Err(RequestError::ConnectionClosed),
        }
    }

    async fn authenticated(&self) -> Result<Arc<Connection>, RequestError> {
        let conn = self.current().await?;
        if conn.auth_state() != AuthState::Authenticated {
            return Err(RequestError::NotAuthenticated);
        }
        Ok(conn)
    }

    /// Run the authentication handshake on the current connection.
    ///
    /// Waits for the feed's `connection` message, then sends the credentials.
    /// Returns `Ok(true)` on success and `Ok(false)` when the feed rejects
    /// them. Rejection and timeout are fatal to the session: the connection
    /// is closed and the caller must reconnect. On success every tracked
    /// subscription is replayed.
    pub async fn authenticate(&self, app_key: &str, session: &str) -> Result<bool, RequestError> {
        let conn = self.current().await?;
        let label = &self.config.label;
        conn.set_auth(AuthState::Authenticating);

        let corr = conn.correlator();
        let outcome = match corr.wait_connected(corr.timeout()).await {
            Ok(_) => {
                corr.send("authentication", |id| {
                    Message::Authentication(AuthenticationMessage {
                        id,
                        app_key: app_key.to_string(),
                        session: session.to_string(),
                    })
                })
                .await
            }
            Err(e) => Err(e),
        };

        match outcome {
            Ok(_) => {
                conn.set_credentials(Credentials {
                    app_key: app_key.to_string(),
                    session: session.to_string(),
                });
                conn.set_auth(AuthState::Authenticated);
                info!("[{label}] authenticated");
                if let Err(e) = self.subscriptions.replay(conn.correlator()).await {
                    warn!("[{label}] subscription replay failed: {e}");
                }
                Ok(true)
            }
            Err(RequestError::Rejected {
                error_code,
                error_message,
                ..
            }) => {
                error!("[{label}] authentication rejected: {error_code:?} {error_message:?}");
                conn.close().await;
                Ok(false)
            }
            Err(e) => {
                error!("[{label}] authentication failed: {e}");
                conn.close().await;
                Err(e)
            }
        }
    }

    /// Subscribe to one market (added to the tracked set).
    pub async fn subscribe_market(
        &self,
        market_id: &str,
        fields: &[MarketDataField],
        ladder_levels: Option<u32>,
    ) -> Result<SubscriptionAck, RequestError> {
        self.subscribe_markets(&[market_id.to_string()], fields, ladder_levels)
            .await
    }

    /// Subscribe to several markets (added to the tracked set).
    ///
    /// A timeout or rejection is reported but leaves the connection up.
    pub async fn subscribe_markets(
        &self,
        market_ids: &[String],
        fields: &[MarketDataField],
        ladder_levels: Option<u32>,
    ) -> Result<SubscriptionAck, RequestError> {
        let conn = self.authenticated().await?;
        self.subscriptions
            .subscribe_markets(conn.correlator(), market_ids, fields, ladder_levels)
            .await
    }

    pub async fn subscribe_orders(
        &self,
        filter: Option<OrderFilter>,
    ) -> Result<SubscriptionAck, RequestError> {
        let conn = self.authenticated().await?;
        self.subscriptions
            .subscribe_orders(conn.correlator(), filter)
            .await
    }

    /// Stop tracking a market and drop its cached state. Local only.
    pub async fn unsubscribe(&self, market_id: &str) -> bool {
        let tracked = self.subscriptions.unsubscribe(market_id).await;
        self.shared
            .processor
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .forget(market_id);
        tracked
    }

    /// Send a keep-alive. The response is consumed without being awaited.
    pub async fn send_heartbeat(&self) -> Result<u64, RequestError> {
        let conn = self.authenticated().await?;
        let corr = conn.correlator();
        corr.purge_expired().await;
        let id = corr
            .fire("heartbeat", |id| Message::Heartbeat(HeartbeatMessage { id }))
            .await?;
        conn.mark_heartbeat();
        Ok(id)
    }

    /// Close the current connection, failing its outstanding requests.
    /// Idempotent; tracked subscriptions are kept for the next connection.
    pub async fn disconnect(&self) {
        let conn = self.connection.lock().await.take();
        if let Some(conn) = conn {
            conn.close().await;
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    /// Watch connection state transitions.
    pub fn state_watch(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    pub async fn outstanding_requests(&self) -> usize {
        match self.current().await {
            Ok(conn) => conn.correlator().outstanding().await,
            Err(_) => 0,
        }
    }

    pub async fn connection_id(&self) -> Option<String> {
        self.current().await.ok()?.correlator().connection_id()
    }

    /// When this client last sent a heartbeat on the current connection.
    pub async fn last_heartbeat_sent(&self) -> Option<Instant> {
        self.current().await.ok()?.last_heartbeat()
    }

    /// Change tokens of the market stream.
    pub fn market_clock(&self) -> ClockState {
        self.shared
            .processor
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .market_clock()
            .clone()
    }

    pub async fn tracked_markets(&self) -> MarketSubscription {
        self.subscriptions.markets().await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures_util::{SinkExt, StreamExt};
    use pf_core::types::{FeedEvent, StatusMessage};

    use super::*;
    use crate::codec;

    /// The far end of a duplex pipe, playing the exchange.
    struct FakeFeed {
        stream: FeedStream,
    }

    impl FakeFeed {
        async fn push(&mut self, line: &str) {
            self.stream.writer.send(line.to_string()).await.unwrap();
        }

        async fn recv(&mut self) -> Message {
            let line = self.stream.reader.next().await.unwrap().unwrap();
            codec::decode(&line).unwrap()
        }

        async fn ack(&mut self, id: u64) {
            let line = codec::encode(&Message::Status(StatusMessage::success(id))).unwrap();
            self.push(&line).await;
        }
    }

    fn client(timeout_ms: u64) -> (Arc<StreamClient>, FeedEventReceiver) {
        let config = StreamConfig {
            request_timeout_ms: timeout_ms,
            label: "test".into(),
            ..Default::default()
        };
        let (client, rx) = StreamClient::new(config);
        (Arc::new(client), rx)
    }

    async fn attach(client: &StreamClient) -> FakeFeed {
        let (a, b) = tokio::io::duplex(64 * 1024);
        client.attach(FeedStream::from_io(a, "pipe")).await;
        FakeFeed {
            stream: FeedStream::from_io(b, "feed"),
        }
    }

    /// Connection push, authentication (acked), returns the feed.
    async fn authenticated(client: &Arc<StreamClient>) -> FakeFeed {
        let mut feed = attach(client).await;
        feed.push(r#"{"op":"connection","connectionId":"002-1"}"#).await;
        let c = client.clone();
        let auth = tokio::spawn(async move { c.authenticate("key", "token").await });
        let msg = feed.recv().await;
        feed.ack(msg.id().unwrap()).await;
        assert_eq!(auth.await.unwrap(), Ok(true));
        feed
    }

    #[tokio::test]
    async fn authentication_handshake() {
        let (client, mut events) = client(5_000);
        let mut feed = attach(&client).await;
        assert_eq!(client.state(), ConnectionState::Connected);

        let c = client.clone();
        let auth = tokio::spawn(async move { c.authenticate("key", "token").await });

        // Authentication waits for the connection push.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(client.outstanding_requests().await, 0);
        feed.push(r#"{"op":"connection","connectionId":"002-1"}"#).await;

        let Message::Authentication(m) = feed.recv().await else {
            panic!("expected authentication")
        };
        assert_eq!(m.id, 1);
        assert_eq!(m.app_key, "key");
        assert_eq!(m.session, "token");
        feed.ack(1).await;

        assert_eq!(auth.await.unwrap(), Ok(true));
        assert_eq!(client.state(), ConnectionState::Authenticated);
        assert_eq!(client.connection_id().await.as_deref(), Some("002-1"));

        let mut states = Vec::new();
        while let Ok(FeedEvent::ConnectionState(s)) = events.try_recv() {
            states.push(s);
        }
        assert_eq!(
            states,
            vec![
                ConnectionState::Connected,
                ConnectionState::Authenticating,
                ConnectionState::Authenticated
            ]
        );
    }

    #[tokio::test]
    async fn rejected_authentication_closes_session() {
        let (client, _events) = client(5_000);
        let mut feed = attach(&client).await;
        feed.push(r#"{"op":"connection","connectionId":"002-1"}"#).await;

        let c = client.clone();
        let auth = tokio::spawn(async move { c.authenticate("key", "bad").await });
        let msg = feed.recv().await;
        feed.push(&format!(
            r#"{{"op":"status","id":{},"statusCode":"FAILURE","errorCode":"NO_SESSION","connectionClosed":true}}"#,
            msg.id().unwrap()
        ))
        .await;

        assert_eq!(auth.await.unwrap(), Ok(false));
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn subscribe_requires_authentication() {
        let (client, _events) = client(5_000);
        assert_eq!(
            client.subscribe_market("1.23", &[], None).await,
            Err(RequestError::ConnectionClosed)
        );
        let _feed = attach(&client).await;
        assert_eq!(
            client.subscribe_market("1.23", &[], None).await,
            Err(RequestError::NotAuthenticated)
        );
        assert_eq!(client.send_heartbeat().await, Err(RequestError::NotAuthenticated));
    }

    #[tokio::test]
    async fn subscription_timeout_is_not_fatal() {
        let (client, _events) = client(150);
        let mut feed = authenticated(&client).await;

        let c = client.clone();
        let sub = tokio::spawn(async move { c.subscribe_market("1.23", &[], None).await });
        let Message::MarketSubscription(m) = feed.recv().await else {
            panic!("expected marketSubscription")
        };
        assert_eq!(m.id, 2);

        assert_eq!(
            sub.await.unwrap(),
            Err(RequestError::Timeout { id: 2, op: "marketSubscription" })
        );
        assert_eq!(client.outstanding_requests().await, 0);
        assert_eq!(client.state(), ConnectionState::Authenticated);
        // A late answer for the expired id is dropped quietly.
        feed.ack(2).await;
        assert!(client.tracked_markets().await.is_empty());
    }

    #[tokio::test]
    async fn malformed_lines_do_not_stop_the_read_loop() {
        let (client, mut events) = client(5_000);
        let mut feed = authenticated(&client).await;
        while events.try_recv().is_ok() {}

        feed.push("this is not json").await;
        feed.push(r#"{"op":"keepAlive"}"#).await;
        feed.push(r#"{"op":"mcm","id":2,"clk":"c1","pt":1,"mc":[{"id":"1.23","rc":[{"id":7,"ltp":3.5}]}]}"#)
            .await;

        let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .unwrap()
            .unwrap();
        let FeedEvent::MarketChanged(e) = event else {
            panic!("expected market change")
        };
        assert_eq!(e.market_id, "1.23");
        assert_eq!(e.runners[0].last_traded, Some(3.5));
        assert_eq!(client.market_clock().clk.as_deref(), Some("c1"));
    }

    #[tokio::test]
    async fn disconnect_fails_outstanding_requests() {
        let (client, _events) = client(5_000);
        let mut feed = authenticated(&client).await;

        let c = client.clone();
        let sub = tokio::spawn(async move { c.subscribe_market("1.23", &[], None).await });
        feed.recv().await;

        client.disconnect().await;
        assert_eq!(sub.await.unwrap(), Err(RequestError::ConnectionClosed));
        assert_eq!(client.state(), ConnectionState::Disconnected);
        client.disconnect().await;
    }

    #[tokio::test]
    async fn peer_close_is_observed() {
        let (client, _events) = client(5_000);
        let feed = authenticated(&client).await;
        let mut state = client.state_watch();
        drop(feed);
        tokio::time::timeout(
            Duration::from_secs(2),
            state.wait_for(|s| *s == ConnectionState::Disconnected),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(client.outstanding_requests().await, 0);
    }

    #[tokio::test]
    async fn heartbeat_response_is_consumed() {
        let (client, mut events) = client(5_000);
        let mut feed = authenticated(&client).await;
        while events.try_recv().is_ok() {}

        let id = client.send_heartbeat().await.unwrap();
        let Message::Heartbeat(hb) = feed.recv().await else {
            panic!("expected heartbeat")
        };
        assert_eq!(hb.id, id);
        feed.ack(id).await;
        // Unsolicited status (no id) still reaches observers; the heartbeat
        // ack before it does not.
        feed.push(r#"{"op":"status","statusCode":"SUCCESS","connectionClosed":false}"#).await;
        let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(event, FeedEvent::Status(s) if s.id.is_none()));
        assert_eq!(client.outstanding_requests().await, 0);
        assert!(client.last_heartbeat_sent().await.is_some());
    }

    #[tokio::test]
    async fn subscriptions_replay_after_reconnect() {
        let (client, _events) = client(5_000);
        let mut feed = authenticated(&client).await;

        let c = client.clone();
        let sub = tokio::spawn(async move { c.subscribe_market("1.23", &[], Some(2)).await });
        let msg = feed.recv().await;
        feed.ack(msg.id().unwrap()).await;
        sub.await.unwrap().unwrap();

        // New socket: ids restart at 1 and the subscription is re-sent after auth.
        let mut feed = attach(&client).await;
        feed.push(r#"{"op":"connection","connectionId":"002-2"}"#).await;
        let c = client.clone();
        let auth = tokio::spawn(async move { c.authenticate("key", "token").await });
        let msg = feed.recv().await;
        assert_eq!(msg.id(), Some(1));
        feed.ack(1).await;
        let Message::MarketSubscription(m) = feed.recv().await else {
            panic!("expected replayed subscription")
        };
        assert_eq!(m.id, 2);
        assert_eq!(m.market_filter.market_ids, vec!["1.23"]);
        assert_eq!(m.market_data_filter.ladder_levels, Some(2));
        feed.ack(2).await;
        assert_eq!(auth.await.unwrap(), Ok(true));
    }
}
