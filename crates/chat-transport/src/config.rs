//! Configuration types for chat-transport.

use std::time::Duration;

/// Default bound on request/response calls.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration for reaching the chat server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Base URL of the real-time endpoint (e.g., "http://localhost:4000").
    pub socket_url: String,
    /// Base URL of the REST API (e.g., "http://localhost:4000/api").
    pub api_url: String,
    /// Client id sent with push and emit calls so the server can pair them.
    /// If None, the server pairs them by connection.
    pub client_id: Option<String>,
    /// Timeout for REST and emit calls. The push stream has none.
    pub request_timeout: Duration,
}

impl ServerConfig {
    /// Create a configuration with the given real-time and REST base URLs.
    pub fn new(socket_url: impl Into<String>, api_url: impl Into<String>) -> Self {
        Self {
            socket_url: trim_slash(socket_url.into()),
            api_url: trim_slash(api_url.into()),
            client_id: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Set the client id used to pair the push stream with emits.
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Get the push (SSE) endpoint URL.
    pub fn events_url(&self) -> String {
        self.with_client_query(format!("{}/events", self.socket_url))
    }

    /// Get the endpoint outbound intents are posted to.
    pub fn emit_url(&self) -> String {
        self.with_client_query(format!("{}/emit", self.socket_url))
    }

    /// Get the history URL of one customer.
    pub fn messages_url(&self, phone: &str) -> String {
        format!(
            "{}/customers/{}/messages",
            self.api_url,
            urlencoding::encode(phone)
        )
    }

    /// Get the send URL of one customer.
    pub fn send_url(&self, phone: &str) -> String {
        format!(
            "{}/customers/{}/message",
            self.api_url,
            urlencoding::encode(phone)
        )
    }

    /// Get the ticket listing URL of one customer.
    pub fn customer_tickets_url(&self, phone: &str) -> String {
        format!(
            "{}/tickets/customer/{}",
            self.api_url,
            urlencoding::encode(phone)
        )
    }

    /// Get the customer listing URL.
    pub fn customers_url(&self) -> String {
        format!("{}/customers", self.api_url)
    }

    /// Get the health check endpoint URL.
    pub fn health_url(&self) -> String {
        format!("{}/webhook/health", self.api_url)
    }

    fn with_client_query(&self, url: String) -> String {
        match &self.client_id {
            Some(id) => format!("{}?clientId={}", url, urlencoding::encode(id)),
            None => url,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new("http://localhost:4000", "http://localhost:4000/api")
    }
}

fn trim_slash(mut url: String) -> String {
    while url.ends_with('/') {
        url.pop();
    }
    url
}
