//! Duplex transport: Server-Sent Events for push, JSON POST for intents.

use chat_core::{async_trait, ClientIntent, EventStream, ServerEvent, Transport, TransportError};
use futures::stream::{self, Stream, StreamExt};
use reqwest::Client;
use reqwest_eventsource::{Event, EventSource, RequestBuilderExt};
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::error::ClientError;

/// [`Transport`] over the chat server's SSE push endpoint.
///
/// Each call to [`open`](Transport::open) creates a fresh event source. The
/// event source's own retry loop is disabled by closing it on the first
/// error: reconnection is the connection manager's job.
#[derive(Clone)]
pub struct EventSourceTransport {
    /// Client for the long-lived push stream; no request timeout.
    stream_http: Client,
    /// Client for emits; bounded by the configured timeout.
    emit_http: Client,
    config: ServerConfig,
}

impl EventSourceTransport {
    pub fn new(config: ServerConfig) -> Result<Self, ClientError> {
        let stream_http = Client::builder().build()?;
        let emit_http = Client::builder().timeout(config.request_timeout).build()?;

        Ok(Self {
            stream_http,
            emit_http,
            config,
        })
    }

    /// Get the configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

#[async_trait]
impl Transport for EventSourceTransport {
    async fn open(&self) -> Result<EventStream, TransportError> {
        let url = self.config.events_url();
        info!("Opening SSE connection to {}", url);

        let mut source = self
            .stream_http
            .get(&url)
            .eventsource()
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        loop {
            match source.next().await {
                Some(Ok(Event::Open)) => break,
                Some(Ok(Event::Message(msg))) => {
                    debug!("Ignoring SSE event before open: {}", msg.event);
                }
                Some(Err(e)) => {
                    source.close();
                    return Err(TransportError::Connect(e.to_string()));
                }
                None => {
                    return Err(TransportError::Connect(
                        "stream ended before open".to_string(),
                    ))
                }
            }
        }

        debug!("SSE connection opened");
        Ok(Box::pin(inbound_events(source)))
    }

    async fn emit(&self, intent: &ClientIntent) -> Result<(), TransportError> {
        let url = self.config.emit_url();
        debug!("Emitting {} to {}", intent.name(), url);

        let response = self
            .emit_http
            .post(&url)
            .json(intent)
            .send()
            .await
            .map_err(|e| TransportError::Emit(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Emit(format!("HTTP {}: {}", status, body)));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "sse"
    }
}

/// Decode the frames of an open event source until it fails or ends.
///
/// Frames that do not decode are yielded as [`TransportError::Protocol`]
/// and the stream continues; a source error is yielded once as
/// [`TransportError::Closed`] and ends the stream.
fn inbound_events(
    source: EventSource,
) -> impl Stream<Item = Result<ServerEvent, TransportError>> + Send {
    stream::unfold(Some(source), |state| async move {
        let mut source = state?;
        loop {
            match source.next().await {
                Some(Ok(Event::Open)) => continue,
                Some(Ok(Event::Message(msg))) => {
                    let item = ServerEvent::from_frame(&msg.event, &msg.data).map_err(|e| {
                        warn!("Failed to parse SSE event {}: {}", msg.event, e);
                        debug!("Raw data: {}", msg.data);
                        TransportError::Protocol(format!("{}: {}", msg.event, e))
                    });
                    return Some((item, Some(source)));
                }
                Some(Err(e)) => {
                    error!("SSE error: {}", e);
                    source.close();
                    return Some((Err(TransportError::Closed(e.to_string())), None));
                }
                None => {
                    info!("SSE stream ended");
                    return None;
                }
            }
        }
    })
}
