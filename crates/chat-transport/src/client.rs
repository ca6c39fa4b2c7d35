//! REST client for the chat backend.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chat_core::{
    async_trait, BackendError, ChatBackend, ConversationKey, HistoryPage, HistoryQuery,
    SendReceipt, TicketSummary,
};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::error::ClientError;

/// Standard `{success, data, error}` response envelope.
#[derive(Debug, Deserialize)]
struct ApiEnvelope<T> {
    #[serde(default)]
    success: bool,
    data: Option<T>,
    #[serde(default)]
    error: Option<String>,
}

impl<T> ApiEnvelope<T> {
    fn into_data(self) -> Result<Option<T>, ClientError> {
        if self.success {
            Ok(self.data)
        } else {
            Err(ClientError::Rejected(
                self.error.unwrap_or_else(|| "unknown error".to_string()),
            ))
        }
    }
}

/// Body of a send request.
#[derive(Debug, Serialize)]
struct SendBody<'a> {
    message: &'a str,
    agent_id: &'a str,
}

/// Client for the chat backend's REST API.
#[derive(Clone)]
pub struct RestClient {
    http: Client,
    config: ServerConfig,
    reachable: Arc<AtomicBool>,
}

impl RestClient {
    /// Build a client without contacting the server.
    pub fn new(config: ServerConfig) -> Result<Self, ClientError> {
        let http = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(ClientError::Http)?;

        Ok(Self {
            http,
            config,
            reachable: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Build a client and verify the server answers its health check.
    pub async fn connect(config: ServerConfig) -> Result<Self, ClientError> {
        let client = Self::new(config)?;
        if !client.health_check().await? {
            return Err(ClientError::Status {
                status: 503,
                body: "health check failed".to_string(),
            });
        }
        info!("Connected to chat API at {}", client.config.api_url);
        Ok(client)
    }

    /// Whether the last health check succeeded.
    pub fn is_reachable(&self) -> bool {
        self.reachable.load(Ordering::SeqCst)
    }

    /// Perform a health check against the API.
    pub async fn health_check(&self) -> Result<bool, ClientError> {
        let url = self.config.health_url();
        debug!("Health check: {}", url);

        match self.http.get(&url).send().await {
            Ok(resp) => {
                let ok = resp.status().is_success();
                self.reachable.store(ok, Ordering::SeqCst);
                Ok(ok)
            }
            Err(e) => {
                self.reachable.store(false, Ordering::SeqCst);
                Err(ClientError::Http(e))
            }
        }
    }

    /// List customers with their stats, as opaque records.
    pub async fn get_customers(&self) -> Result<Vec<Value>, ClientError> {
        let envelope: ApiEnvelope<Vec<Value>> =
            self.get_json(&self.config.customers_url(), &[]).await?;
        Ok(envelope.into_data()?.unwrap_or_default())
    }

    /// Fetch one page of a customer's messages.
    pub async fn get_customer_messages(
        &self,
        phone: &str,
        query: HistoryQuery,
    ) -> Result<HistoryPage, ClientError> {
        let params = [
            ("limit", query.limit.to_string()),
            ("offset", query.offset.to_string()),
            ("order", query.order.as_str().to_string()),
        ];
        self.get_json(&self.config.messages_url(phone), &params).await
    }

    /// Send a message to a customer on behalf of an agent.
    pub async fn send_message_to_customer(
        &self,
        phone: &str,
        message: &str,
        agent_id: &str,
    ) -> Result<SendReceipt, ClientError> {
        let url = self.config.send_url(phone);
        debug!(phone = %phone, "POST {}", url);

        let response = self
            .http
            .post(&url)
            .json(&SendBody { message, agent_id })
            .send()
            .await?;
        let response = check_status(response).await?;
        Ok(response.json().await?)
    }

    /// List the tickets of one customer.
    pub async fn get_tickets_by_customer(
        &self,
        phone: &str,
    ) -> Result<Vec<TicketSummary>, ClientError> {
        let envelope: ApiEnvelope<Vec<TicketSummary>> = self
            .get_json(&self.config.customer_tickets_url(phone), &[])
            .await?;
        Ok(envelope.into_data()?.unwrap_or_default())
    }

    /// Get the configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Get the underlying HTTP client.
    pub fn http_client(&self) -> &Client {
        &self.http
    }

    async fn get_json<R: DeserializeOwned>(
        &self,
        url: &str,
        params: &[(&str, String)],
    ) -> Result<R, ClientError> {
        debug!("GET {}", url);
        let response = self.http.get(url).query(params).send().await?;
        let response = check_status(response).await?;
        Ok(response.json().await?)
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    warn!("API error: HTTP {}: {}", status, body);
    Err(ClientError::Status {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl ChatBackend for RestClient {
    async fn fetch_history(
        &self,
        key: &ConversationKey,
        query: HistoryQuery,
    ) -> Result<HistoryPage, BackendError> {
        Ok(self.get_customer_messages(key.as_str(), query).await?)
    }

    async fn send_message(
        &self,
        key: &ConversationKey,
        text: &str,
        agent_id: &str,
    ) -> Result<SendReceipt, BackendError> {
        Ok(self
            .send_message_to_customer(key.as_str(), text, agent_id)
            .await?)
    }

    async fn fetch_open_tickets(
        &self,
        key: &ConversationKey,
    ) -> Result<Vec<TicketSummary>, BackendError> {
        let tickets = self.get_tickets_by_customer(key.as_str()).await?;
        Ok(tickets.into_iter().filter(TicketSummary::is_open).collect())
    }
}

impl std::fmt::Debug for RestClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestClient")
            .field("config", &self.config)
            .field("reachable", &self.is_reachable())
            .finish()
    }
}
