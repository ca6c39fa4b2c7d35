//! Mock transport - an in-memory duplex connection driven by the test.

use std::sync::{Arc, Mutex};

use chat_core::{async_trait, ClientIntent, EventStream, ServerEvent, Transport, TransportError};
use futures::channel::mpsc::{unbounded, UnboundedSender};
use tracing::debug;

type Frame = Result<ServerEvent, TransportError>;
type Responder = Arc<dyn Fn(&ClientIntent) -> Option<ServerEvent> + Send + Sync>;

#[derive(Default)]
struct State {
    live: Option<UnboundedSender<Frame>>,
    emitted: Vec<ClientIntent>,
    opens: u32,
    failing_opens: u32,
    responder: Option<Responder>,
}

/// A transport whose connection is controlled by the test.
///
/// Clones share the same state, so a test can keep one handle while the
/// connection manager owns another.
///
/// # Example
///
/// ```rust
/// use chat_core::{ServerEvent, SystemMessageEvent, Transport};
/// use futures::StreamExt;
/// use mock_backend::MockTransport;
///
/// #[tokio::main(flavor = "current_thread")]
/// async fn main() {
///     let transport = MockTransport::new();
///     let mut stream = transport.open().await.unwrap();
///
///     transport.push(ServerEvent::SystemMessage(SystemMessageEvent::default()));
///     assert!(stream.next().await.unwrap().is_ok());
/// }
/// ```
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<State>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` calls to `open` fail.
    pub fn fail_next_opens(&self, count: u32) {
        self.lock().failing_opens = count;
    }

    /// Answer emitted intents: the returned event, if any, is pushed back
    /// over the live connection.
    pub fn set_responder<F>(&self, responder: F)
    where
        F: Fn(&ClientIntent) -> Option<ServerEvent> + Send + Sync + 'static,
    {
        self.lock().responder = Some(Arc::new(responder));
    }

    /// Push an event over the live connection. Returns false when there is none.
    pub fn push(&self, event: ServerEvent) -> bool {
        self.push_frame(Ok(event))
    }

    /// Push a frame that failed to decode.
    pub fn push_garbage(&self, reason: impl Into<String>) -> bool {
        self.push_frame(Err(TransportError::Protocol(reason.into())))
    }

    /// Drop the live connection; its event stream ends.
    pub fn drop_connection(&self) {
        if self.lock().live.take().is_some() {
            debug!("Mock connection dropped");
        }
    }

    /// Whether a connection is currently open.
    pub fn is_open(&self) -> bool {
        self.lock()
            .live
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }

    /// Number of successful opens so far.
    pub fn open_count(&self) -> u32 {
        self.lock().opens
    }

    /// All intents emitted so far, in order.
    pub fn emitted(&self) -> Vec<ClientIntent> {
        self.lock().emitted.clone()
    }

    /// Emitted intents with the given wire name.
    pub fn emitted_named(&self, name: &str) -> Vec<ClientIntent> {
        self.lock()
            .emitted
            .iter()
            .filter(|intent| intent.name() == name)
            .cloned()
            .collect()
    }

    pub fn clear_emitted(&self) {
        self.lock().emitted.clear();
    }

    fn push_frame(&self, frame: Frame) -> bool {
        match &self.lock().live {
            Some(tx) => tx.unbounded_send(frame).is_ok(),
            None => false,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(&self) -> Result<EventStream, TransportError> {
        let mut state = self.lock();
        if state.failing_opens > 0 {
            state.failing_opens -= 1;
            return Err(TransportError::Connect("mock refused".to_string()));
        }

        let (tx, rx) = unbounded();
        state.live = Some(tx);
        state.opens += 1;
        debug!("Mock connection opened (#{})", state.opens);
        Ok(Box::pin(rx))
    }

    async fn emit(&self, intent: &ClientIntent) -> Result<(), TransportError> {
        let responder = {
            let mut state = self.lock();
            if !state.live.as_ref().is_some_and(|tx| !tx.is_closed()) {
                return Err(TransportError::NotConnected);
            }
            state.emitted.push(intent.clone());
            state.responder.clone()
        };

        if let Some(reply) = responder.and_then(|respond| respond(intent)) {
            self.push(reply);
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chat_core::SystemMessageEvent;
    use futures::StreamExt;

    fn system(text: &str) -> ServerEvent {
        ServerEvent::SystemMessage(SystemMessageEvent {
            phone_number: None,
            message: text.to_string(),
        })
    }

    #[tokio::test]
    async fn test_push_reaches_stream() {
        let transport = MockTransport::new();
        let mut stream = transport.open().await.unwrap();

        assert!(transport.push(system("one")));
        let event = stream.next().await.unwrap().unwrap();
        assert_eq!(event, system("one"));
    }

    #[tokio::test]
    async fn test_drop_ends_stream() {
        let transport = MockTransport::new();
        let mut stream = transport.open().await.unwrap();

        transport.drop_connection();
        assert!(stream.next().await.is_none());
        assert!(!transport.push(system("late")));
    }

    #[tokio::test]
    async fn test_failing_opens() {
        let transport = MockTransport::new();
        transport.fail_next_opens(2);

        assert!(transport.open().await.is_err());
        assert!(transport.open().await.is_err());
        assert!(transport.open().await.is_ok());
        assert_eq!(transport.open_count(), 1);
    }

    #[tokio::test]
    async fn test_emit_requires_connection() {
        let transport = MockTransport::new();
        let intent = ClientIntent::JoinAgent("1".to_string());
        assert!(matches!(
            transport.emit(&intent).await,
            Err(TransportError::NotConnected)
        ));

        let _stream = transport.open().await.unwrap();
        transport.emit(&intent).await.unwrap();
        assert_eq!(transport.emitted_named("joinAgent").len(), 1);
    }

    #[tokio::test]
    async fn test_responder_pushes_reply() {
        let transport = MockTransport::new();
        transport.set_responder(|intent| match intent {
            ClientIntent::JoinAgent(_) => Some(system("joined")),
            _ => None,
        });
        let mut stream = transport.open().await.unwrap();

        transport
            .emit(&ClientIntent::JoinAgent("1".to_string()))
            .await
            .unwrap();
        assert_eq!(stream.next().await.unwrap().unwrap(), system("joined"));
    }
}
