//! Connection manager: one duplex connection with bounded reconnection.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chat_core::{
    ClientIntent, ConnectionStatus, EventKind, ResponsePayload, ServerEvent, SocketRequest,
    Transport, TransportError,
};
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use crate::bus::{EventBus, HandlerError, SubscriptionId};
use crate::error::SyncError;
use crate::lock;

/// Default timeout for request/response calls (10 seconds).
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// How the connection manager retries a lost or refused connection.
///
/// Retries use a fixed delay. The attempt budget resets after every
/// successful connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Consecutive failed opens before giving up.
    pub max_attempts: u32,
    /// Pause between attempts.
    pub delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_secs(1),
        }
    }
}

impl ReconnectPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }
}

/// Lifecycle of the duplex connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Agent,
    Customer,
}

/// Identity the server confirmed for this connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub role: Role,
    pub id: String,
}

struct Inner {
    transport: Arc<dyn Transport>,
    policy: ReconnectPolicy,
    bus: EventBus,
    state: watch::Sender<ConnectionState>,
    identity: Mutex<Option<Identity>>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
    /// Bumped on every successful connect.
    generation: AtomicU64,
    next_request: AtomicU64,
}

/// Owns the duplex connection and the event bus in front of it.
///
/// Cloning is cheap; clones share one connection. Subscriptions live on the
/// bus, not on the transport, so they survive reconnects and
/// [`disconnect`](Self::disconnect).
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
    request_timeout: Duration,
}

impl ConnectionManager {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::with_policy(transport, ReconnectPolicy::default())
    }

    pub fn with_policy(transport: Arc<dyn Transport>, policy: ReconnectPolicy) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(Inner {
                transport,
                policy,
                bus: EventBus::new(),
                state,
                identity: Mutex::new(None),
                supervisor: Mutex::new(None),
                generation: AtomicU64::new(0),
                next_request: AtomicU64::new(1),
            }),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Override the request/response timeout for this handle.
    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    /// Start the connection.
    ///
    /// A no-op while connected. Otherwise any previous attempt is torn down
    /// and a fresh supervisor task takes over; progress is reported through
    /// `connectionStatus` events and [`state`](Self::state).
    pub fn connect(&self) {
        let mut supervisor = lock(&self.inner.supervisor);
        let running = supervisor.as_ref().is_some_and(|task| !task.is_finished());
        if running && self.state() == ConnectionState::Connected {
            debug!("Already connected");
            return;
        }
        if let Some(task) = supervisor.take() {
            debug!("Tearing down stale connection");
            task.abort();
        }

        info!("Connecting via {} transport", self.inner.transport.name());
        self.inner.set_state(ConnectionState::Connecting);
        *supervisor = Some(tokio::spawn(supervise(self.inner.clone())));
    }

    /// Tear down the connection. Subscriptions are kept.
    pub fn disconnect(&self) {
        if let Some(task) = lock(&self.inner.supervisor).take() {
            task.abort();
        }
        lock(&self.inner.identity).take();

        let was = self.inner.state.send_replace(ConnectionState::Disconnected);
        if was != ConnectionState::Disconnected {
            info!("Disconnected");
            self.inner
                .bus
                .publish(&ServerEvent::ConnectionStatus(ConnectionStatus::down(None)));
        }
    }

    /// Alias of [`disconnect`](Self::disconnect) for owners shutting down.
    pub fn shutdown(&self) {
        self.disconnect();
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Watch state changes.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Wait until the connection reaches `state`.
    pub async fn wait_for_state(&self, state: ConnectionState) {
        let mut rx = self.inner.state.subscribe();
        // The sender lives as long as self.
        let _ = rx.wait_for(|current| *current == state).await;
    }

    /// Identity confirmed by the server on the current connection.
    pub fn identity(&self) -> Option<Identity> {
        lock(&self.inner.identity).clone()
    }

    /// Number of successful connects so far.
    pub fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::SeqCst)
    }

    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&ServerEvent) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.inner.bus.subscribe(kind, handler)
    }

    pub fn unsubscribe(&self, kind: EventKind, id: SubscriptionId) -> bool {
        self.inner.bus.unsubscribe(kind, id)
    }

    /// Dispatch an event to local subscribers without touching the transport.
    pub fn publish(&self, event: &ServerEvent) -> usize {
        self.inner.bus.publish(event)
    }

    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.inner.bus.handler_count(kind)
    }

    /// Send an intent over the live connection.
    pub async fn emit(&self, intent: ClientIntent) -> Result<(), SyncError> {
        if !self.is_connected() {
            return Err(SyncError::NotConnected);
        }
        debug!("Emitting {}", intent.name());
        self.inner.transport.emit(&intent).await?;
        Ok(())
    }

    /// Issue a request and wait for its correlated response, using the
    /// configured timeout.
    pub async fn request(&self, request: SocketRequest) -> Result<ResponsePayload, SyncError> {
        self.request_with_timeout(request, self.request_timeout)
            .await
    }

    /// Issue a request and wait up to `wait` for its response.
    ///
    /// The response handler is removed whether the call succeeds, fails,
    /// times out or is cancelled.
    pub async fn request_with_timeout(
        &self,
        request: SocketRequest,
        wait: Duration,
    ) -> Result<ResponsePayload, SyncError> {
        if !self.is_connected() {
            return Err(SyncError::NotConnected);
        }

        let request_id = self.inner.next_request.fetch_add(1, Ordering::Relaxed);
        let kind = request.response_kind();
        let (tx, rx) = oneshot::channel();
        let slot = Mutex::new(Some(tx));

        let id = self.subscribe(kind, move |event| {
            if event.request_id() != Some(request_id) {
                return Ok(());
            }
            if let Some(tx) = lock(&slot).take() {
                let _ = tx.send(event.clone());
            }
            Ok(())
        });
        let _guard = SubscriptionGuard {
            connection: self,
            kind,
            id,
        };

        debug!(request_id, "Request awaiting {}", kind);
        self.emit(request.into_intent(request_id)).await?;

        match timeout(wait, rx).await {
            Ok(Ok(event)) => response_payload(event).ok_or_else(|| {
                SyncError::Protocol(format!("{} carried no response payload", kind))
            }),
            Ok(Err(_)) => Err(SyncError::Protocol("response channel closed".to_string())),
            Err(_) => {
                warn!(request_id, "Request timed out waiting for {}", kind);
                Err(SyncError::Timeout(wait))
            }
        }
    }
}

impl Inner {
    fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }

    /// Record identity confirmations, then fan the event out.
    fn dispatch(&self, event: ServerEvent) {
        match &event {
            ServerEvent::AgentConnected(confirmed) => {
                let id = match &confirmed.agent_id {
                    Value::String(id) => id.clone(),
                    other => other.to_string(),
                };
                info!(agent_id = %id, "Agent identity confirmed");
                *lock(&self.identity) = Some(Identity {
                    role: Role::Agent,
                    id,
                });
            }
            ServerEvent::CustomerConnected(confirmed) => {
                if let Some(phone) = confirmed
                    .customer
                    .as_ref()
                    .and_then(|c| c.phone_number.clone())
                {
                    info!(phone = %phone, "Customer identity confirmed");
                    *lock(&self.identity) = Some(Identity {
                        role: Role::Customer,
                        id: phone,
                    });
                }
            }
            _ => {}
        }
        self.bus.publish(&event);
    }

    fn publish_down(&self, error: Option<String>) {
        lock(&self.identity).take();
        self.set_state(ConnectionState::Disconnected);
        self.bus
            .publish(&ServerEvent::ConnectionStatus(ConnectionStatus::down(error)));
    }
}

/// Open, pump and reopen the transport until the retry budget runs out.
async fn supervise(inner: Arc<Inner>) {
    let mut failures = 0u32;
    loop {
        inner.set_state(ConnectionState::Connecting);
        match inner.transport.open().await {
            Ok(mut stream) => {
                failures = 0;
                let generation = inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
                inner.set_state(ConnectionState::Connected);
                info!(generation, "Connected");
                inner
                    .bus
                    .publish(&ServerEvent::ConnectionStatus(ConnectionStatus::up()));

                let reason = loop {
                    match stream.next().await {
                        Some(Ok(event)) => {
                            debug!("Received {}", event.kind());
                            inner.dispatch(event);
                        }
                        Some(Err(TransportError::Protocol(e))) => {
                            warn!("Skipping undecodable frame: {}", e);
                        }
                        Some(Err(e)) => break Some(e.to_string()),
                        None => break None,
                    }
                };

                warn!("Connection lost: {}", reason.as_deref().unwrap_or("stream ended"));
                inner.publish_down(reason);
            }
            Err(e) => {
                failures += 1;
                error!(
                    attempt = failures,
                    max = inner.policy.max_attempts,
                    "Connect failed: {}",
                    e
                );
                inner.publish_down(Some(e.to_string()));
                if failures >= inner.policy.max_attempts {
                    error!("Giving up after {} attempts", failures);
                    return;
                }
            }
        }

        sleep(inner.policy.delay).await;
    }
}

/// Unsubscribes a one-shot response handler on drop.
struct SubscriptionGuard<'a> {
    connection: &'a ConnectionManager,
    kind: EventKind,
    id: SubscriptionId,
}

impl Drop for SubscriptionGuard<'_> {
    fn drop(&mut self) {
        self.connection.unsubscribe(self.kind, self.id);
    }
}

fn response_payload(event: ServerEvent) -> Option<ResponsePayload> {
    match event {
        ServerEvent::TicketUpdated(p)
        | ServerEvent::TicketsResponse(p)
        | ServerEvent::TicketResponse(p)
        | ServerEvent::TicketMessagesResponse(p)
        | ServerEvent::MessageSent(p)
        | ServerEvent::TicketAssigned(p)
        | ServerEvent::TicketClosed(p) => Some(p),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chat_core::{AgentConnected, ServerError};
    use mock_backend::MockTransport;
    use serde_json::{json, Map};

    fn manager(transport: &MockTransport) -> ConnectionManager {
        ConnectionManager::with_policy(
            Arc::new(transport.clone()),
            ReconnectPolicy::new(3, Duration::from_millis(50)),
        )
    }

    fn status_log(connection: &ConnectionManager) -> Arc<Mutex<Vec<bool>>> {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = log.clone();
        connection.subscribe(EventKind::ConnectionStatus, move |event| {
            if let ServerEvent::ConnectionStatus(status) = event {
                sink.lock().unwrap().push(status.connected);
            }
            Ok(())
        });
        log
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_publishes_status() {
        let transport = MockTransport::new();
        let connection = manager(&transport);
        let log = status_log(&connection);

        connection.connect();
        connection.wait_for_state(ConnectionState::Connected).await;

        assert_eq!(*log.lock().unwrap(), vec![true]);
        assert_eq!(connection.generation(), 1);
        assert_eq!(transport.open_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_is_idempotent_while_connected() {
        let transport = MockTransport::new();
        let connection = manager(&transport);

        connection.connect();
        connection.wait_for_state(ConnectionState::Connected).await;
        connection.connect();
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(transport.open_count(), 1);
        assert!(connection.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnects_after_drop() {
        let transport = MockTransport::new();
        let connection = manager(&transport);
        let log = status_log(&connection);

        connection.connect();
        connection.wait_for_state(ConnectionState::Connected).await;
        transport.drop_connection();
        connection.wait_for_state(ConnectionState::Disconnected).await;
        connection.wait_for_state(ConnectionState::Connected).await;

        assert_eq!(*log.lock().unwrap(), vec![true, false, true]);
        assert_eq!(connection.generation(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_budget() {
        let transport = MockTransport::new();
        transport.fail_next_opens(10);
        let connection = manager(&transport);
        let log = status_log(&connection);

        connection.connect();
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(*log.lock().unwrap(), vec![false, false, false]);
        assert_eq!(connection.state(), ConnectionState::Disconnected);
        assert_eq!(transport.open_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_resets_after_success() {
        let transport = MockTransport::new();
        transport.fail_next_opens(2);
        let connection = manager(&transport);

        connection.connect();
        connection.wait_for_state(ConnectionState::Connected).await;

        transport.fail_next_opens(2);
        transport.drop_connection();
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert!(connection.is_connected());
        assert_eq!(transport.open_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_emit_requires_connection() {
        let transport = MockTransport::new();
        let connection = manager(&transport);

        let result = connection.emit(ClientIntent::JoinAgent("1".to_string())).await;
        assert!(matches!(result, Err(SyncError::NotConnected)));

        connection.connect();
        connection.wait_for_state(ConnectionState::Connected).await;
        connection
            .emit(ClientIntent::JoinAgent("1".to_string()))
            .await
            .unwrap();
        assert_eq!(transport.emitted().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_identity_set_on_confirmation_and_cleared_on_disconnect() {
        let transport = MockTransport::new();
        let connection = manager(&transport);
        let log = status_log(&connection);

        connection.connect();
        connection.wait_for_state(ConnectionState::Connected).await;
        assert!(connection.identity().is_none());

        transport.push(ServerEvent::AgentConnected(AgentConnected {
            agent_id: json!(1),
        }));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(
            connection.identity(),
            Some(Identity {
                role: Role::Agent,
                id: "1".to_string()
            })
        );

        connection.disconnect();
        assert!(connection.identity().is_none());
        assert_eq!(connection.state(), ConnectionState::Disconnected);
        assert_eq!(*log.lock().unwrap(), vec![true, false]);
        // Subscriptions survive the teardown.
        assert_eq!(connection.handler_count(EventKind::ConnectionStatus), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_undecodable_frame_is_skipped() {
        let transport = MockTransport::new();
        let connection = manager(&transport);
        let errors = Arc::new(Mutex::new(Vec::new()));
        {
            let errors = errors.clone();
            connection.subscribe(EventKind::Error, move |event| {
                if let ServerEvent::Error(e) = event {
                    errors.lock().unwrap().push(e.message.clone());
                }
                Ok(())
            });
        }

        connection.connect();
        connection.wait_for_state(ConnectionState::Connected).await;
        transport.push_garbage("unknown event fooBar");
        transport.push(ServerEvent::Error(ServerError {
            message: "later".to_string(),
        }));
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(connection.is_connected());
        assert_eq!(*errors.lock().unwrap(), vec!["later".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_matches_request_id() {
        let transport = MockTransport::new();
        transport.set_responder(|intent| match intent {
            ClientIntent::CloseTicket { request_id, id } => {
                let mut body = Map::new();
                body.insert("id".to_string(), json!(id));
                body.insert("success".to_string(), json!(true));
                Some(ServerEvent::TicketClosed(ResponsePayload {
                    request_id: Some(*request_id),
                    body,
                }))
            }
            _ => None,
        });
        let connection = manager(&transport);
        connection.connect();
        connection.wait_for_state(ConnectionState::Connected).await;

        let response = connection
            .request(SocketRequest::CloseTicket {
                id: "T-1".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(response.body.get("id"), Some(&json!("T-1")));
        assert_eq!(connection.handler_count(EventKind::TicketClosed), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_timeout_leaves_no_subscription() {
        let transport = MockTransport::new();
        let connection = manager(&transport);
        connection.connect();
        connection.wait_for_state(ConnectionState::Connected).await;

        let result = connection
            .request(SocketRequest::GetTicket {
                id: "T-1".to_string(),
            })
            .await;

        assert!(matches!(result, Err(SyncError::Timeout(d)) if d == DEFAULT_REQUEST_TIMEOUT));
        assert_eq!(connection.handler_count(EventKind::TicketResponse), 0);
    }

    #[tokio::test]
    async fn test_request_requires_connection() {
        let connection = manager(&MockTransport::new());
        let result = connection
            .request(SocketRequest::GetTicket {
                id: "T-1".to_string(),
            })
            .await;
        assert!(matches!(result, Err(SyncError::NotConnected)));
    }
}
