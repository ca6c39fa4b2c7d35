//! Agent dashboard: connection lifecycle, registration and ticket requests.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chat_core::{
    ChatBackend, ClientIntent, EventKind, ResponsePayload, ServerEvent, SocketRequest,
};
use serde_json::Value;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::bus::SubscriptionId;
use crate::connection::ConnectionManager;
use crate::error::SyncError;
use crate::registrar::SessionRegistrar;
use crate::lock;
use crate::session::{ConversationSession, SessionConfig};

/// Pause between a connect and re-registration.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(100);

/// Configuration for the agent dashboard.
#[derive(Debug, Clone)]
pub struct DashboardConfig {
    pub agent_id: String,
    pub agent_name: String,

    /// Room joined on every connection. Default: the agent id.
    pub room: String,

    /// Wait after a connect before registering. Default: 100 ms.
    pub settle_delay: Duration,

    /// Passed to every conversation session.
    pub require_open_ticket: bool,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self::new("1", "Admin User")
    }
}

impl DashboardConfig {
    pub fn new(agent_id: impl Into<String>, agent_name: impl Into<String>) -> Self {
        let agent_id = agent_id.into();
        Self {
            room: agent_id.clone(),
            agent_id,
            agent_name: agent_name.into(),
            settle_delay: DEFAULT_SETTLE_DELAY,
            require_open_ticket: false,
        }
    }
}

/// Dashboard-wide changes pushed by the server.
#[derive(Debug, Clone, PartialEq)]
pub enum DashboardActivity {
    NewTicket(Value),
    TicketEscalated(Value),
    NewCustomer(Value),
    CustomerUpdated(Value),
    StatsUpdated(Value),
    ActionCompleted(Value),
}

impl DashboardActivity {
    fn from_event(event: &ServerEvent) -> Option<Self> {
        match event {
            ServerEvent::NewTicketCreated(v) => Some(Self::NewTicket(v.clone())),
            ServerEvent::TicketEscalated(v) => Some(Self::TicketEscalated(v.clone())),
            ServerEvent::NewCustomer(v) => Some(Self::NewCustomer(v.clone())),
            ServerEvent::CustomerUpdated(v) => Some(Self::CustomerUpdated(v.clone())),
            ServerEvent::DashboardStatsUpdated(v) => Some(Self::StatsUpdated(v.clone())),
            ServerEvent::AgentActionCompleted(v) => Some(Self::ActionCompleted(v.clone())),
            _ => None,
        }
    }
}

const ACTIVITY_EVENTS: [EventKind; 6] = [
    EventKind::NewTicketCreated,
    EventKind::TicketEscalated,
    EventKind::NewCustomer,
    EventKind::CustomerUpdated,
    EventKind::DashboardStatsUpdated,
    EventKind::AgentActionCompleted,
];

type ActivityObserver = Arc<dyn Fn(&DashboardActivity) + Send + Sync>;

/// The agent-facing entry point.
///
/// Every time the connection comes up, the dashboard waits for the settle
/// delay, announces the agent and rejoins its rooms. Conversation sessions
/// are created from it and share its connection.
pub struct AgentDashboard {
    connection: ConnectionManager,
    registrar: Arc<SessionRegistrar>,
    config: DashboardConfig,
    observer: Arc<Mutex<Option<ActivityObserver>>>,
    subscriptions: Mutex<Vec<(EventKind, SubscriptionId)>>,
}

impl AgentDashboard {
    pub fn new(connection: ConnectionManager, config: DashboardConfig) -> Self {
        let registrar = Arc::new(SessionRegistrar::new(connection.clone()));
        let observer: Arc<Mutex<Option<ActivityObserver>>> = Arc::default();
        let mut subscriptions = Vec::new();

        let on_status = {
            let connection = connection.clone();
            let registrar = registrar.clone();
            let config = config.clone();
            move |event: &ServerEvent| -> Result<(), crate::bus::HandlerError> {
                let ServerEvent::ConnectionStatus(status) = event else {
                    return Ok(());
                };
                if !status.connected {
                    return Ok(());
                }
                let runtime = tokio::runtime::Handle::try_current()?;
                let generation = connection.generation();
                let connection = connection.clone();
                let registrar = registrar.clone();
                let config = config.clone();
                runtime.spawn(async move {
                    sleep(config.settle_delay).await;
                    if !connection.is_connected() || connection.generation() != generation {
                        debug!("Connection changed while settling; skipping registration");
                        return;
                    }
                    if let Err(e) = register(&registrar, &config).await {
                        warn!("Registration failed: {}", e);
                    }
                });
                Ok(())
            }
        };
        subscriptions.push((
            EventKind::ConnectionStatus,
            connection.subscribe(EventKind::ConnectionStatus, on_status),
        ));

        for kind in ACTIVITY_EVENTS {
            let observer = observer.clone();
            let id = connection.subscribe(kind, move |event| {
                let Some(activity) = DashboardActivity::from_event(event) else {
                    return Ok(());
                };
                let current = lock(&observer).clone();
                if let Some(observer) = current {
                    observer(&activity);
                }
                Ok(())
            });
            subscriptions.push((kind, id));
        }

        Self {
            connection,
            registrar,
            config,
            observer,
            subscriptions: Mutex::new(subscriptions),
        }
    }

    /// Connect. Registration follows every successful connect.
    pub fn start(&self) {
        info!(agent_id = %self.config.agent_id, "Starting agent dashboard");
        self.connection.connect();
    }

    /// Remove the dashboard's handlers and close the connection.
    pub fn shutdown(&self) {
        let subscriptions = std::mem::take(&mut *lock(&self.subscriptions));
        for (kind, id) in subscriptions {
            self.connection.unsubscribe(kind, id);
        }
        self.connection.disconnect();
        info!("Agent dashboard stopped");
    }

    /// Open a conversation session on this dashboard's connection.
    pub fn conversation<B: ChatBackend + 'static>(&self, backend: B) -> ConversationSession<B> {
        let config = SessionConfig {
            agent_id: self.config.agent_id.clone(),
            require_open_ticket: self.config.require_open_ticket,
            ..SessionConfig::default()
        };
        ConversationSession::new(backend, self.connection.clone(), config)
    }

    /// Observe dashboard-wide activity (new tickets, customers, stats).
    pub fn on_activity<F>(&self, observer: F)
    where
        F: Fn(&DashboardActivity) + Send + Sync + 'static,
    {
        *lock(&self.observer) = Some(Arc::new(observer));
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    pub fn registrar(&self) -> &SessionRegistrar {
        &self.registrar
    }

    pub fn config(&self) -> &DashboardConfig {
        &self.config
    }

    pub async fn get_tickets(
        &self,
        page: u32,
        limit: u32,
        status: Option<&str>,
    ) -> Result<ResponsePayload, SyncError> {
        self.connection
            .request(SocketRequest::GetTickets {
                page,
                limit,
                status: status.map(str::to_string),
            })
            .await
    }

    pub async fn get_ticket(&self, id: &str) -> Result<ResponsePayload, SyncError> {
        self.connection
            .request(SocketRequest::GetTicket { id: id.to_string() })
            .await
    }

    pub async fn update_ticket_status(
        &self,
        id: &str,
        status: &str,
    ) -> Result<ResponsePayload, SyncError> {
        self.connection
            .request(SocketRequest::UpdateTicketStatus {
                id: id.to_string(),
                status: status.to_string(),
                agent_id: Some(self.config.agent_id.clone()),
            })
            .await
    }

    /// Assign a ticket to this agent.
    pub async fn assign_ticket(&self, id: &str) -> Result<ResponsePayload, SyncError> {
        self.connection
            .request(SocketRequest::AssignTicket {
                id: id.to_string(),
                agent_id: self.config.agent_id.clone(),
            })
            .await
    }

    pub async fn close_ticket(&self, id: &str) -> Result<ResponsePayload, SyncError> {
        self.connection
            .request(SocketRequest::CloseTicket { id: id.to_string() })
            .await
    }

    pub async fn get_ticket_messages(
        &self,
        id: &str,
        limit: u32,
        offset: u32,
    ) -> Result<ResponsePayload, SyncError> {
        self.connection
            .request(SocketRequest::GetTicketMessages {
                id: id.to_string(),
                limit,
                offset,
            })
            .await
    }

    /// Post a message into a ticket thread.
    pub async fn send_ticket_message(
        &self,
        ticket_id: &str,
        text: &str,
    ) -> Result<ResponsePayload, SyncError> {
        self.connection
            .request(SocketRequest::SendMessage {
                ticket_id: ticket_id.to_string(),
                message_text: text.to_string(),
                agent_id: self.config.agent_id.clone(),
            })
            .await
    }

    /// Fire-and-forget agent action on a ticket.
    pub async fn agent_action(
        &self,
        action: &str,
        ticket_id: &str,
        data: Value,
    ) -> Result<(), SyncError> {
        self.connection
            .emit(ClientIntent::AgentAction {
                action: action.to_string(),
                ticket_id: ticket_id.to_string(),
                data,
            })
            .await
    }
}

impl Drop for AgentDashboard {
    fn drop(&mut self) {
        let subscriptions = std::mem::take(&mut *lock(&self.subscriptions));
        for (kind, id) in subscriptions {
            self.connection.unsubscribe(kind, id);
        }
    }
}

async fn register(registrar: &SessionRegistrar, config: &DashboardConfig) -> Result<(), SyncError> {
    registrar
        .register_as_agent(&config.agent_id, &config.agent_name)
        .await?;
    registrar.join_room(&config.room).await?;
    registrar.rejoin_all().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{ConnectionState, ReconnectPolicy};
    use mock_backend::MockTransport;
    use serde_json::json;

    fn dashboard(transport: &MockTransport) -> AgentDashboard {
        let connection = ConnectionManager::with_policy(
            Arc::new(transport.clone()),
            ReconnectPolicy::new(3, Duration::from_millis(50)),
        );
        AgentDashboard::new(connection, DashboardConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_registers_after_settle_delay() {
        let transport = MockTransport::new();
        let dashboard = dashboard(&transport);

        dashboard.start();
        dashboard
            .connection()
            .wait_for_state(ConnectionState::Connected)
            .await;
        assert!(transport.emitted().is_empty());

        sleep(Duration::from_millis(150)).await;
        assert_eq!(
            transport.emitted(),
            vec![
                ClientIntent::AgentConnect {
                    agent_id: "1".to_string(),
                    agent_name: Some("Admin User".to_string()),
                },
                ClientIntent::JoinAgent("1".to_string()),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_activity_observer() {
        let transport = MockTransport::new();
        let dashboard = dashboard(&transport);
        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let seen = seen.clone();
            dashboard.on_activity(move |activity| seen.lock().unwrap().push(activity.clone()));
        }

        dashboard.start();
        dashboard
            .connection()
            .wait_for_state(ConnectionState::Connected)
            .await;
        transport.push(ServerEvent::DashboardStatsUpdated(json!({"openTickets": 4})));
        sleep(Duration::from_millis(10)).await;

        assert_eq!(
            *seen.lock().unwrap(),
            vec![DashboardActivity::StatsUpdated(json!({"openTickets": 4}))]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_removes_handlers() {
        let transport = MockTransport::new();
        let dashboard = dashboard(&transport);
        dashboard.start();
        dashboard
            .connection()
            .wait_for_state(ConnectionState::Connected)
            .await;

        dashboard.shutdown();
        assert_eq!(dashboard.connection().state(), ConnectionState::Disconnected);
        assert_eq!(dashboard.connection().handler_count(EventKind::ConnectionStatus), 0);
        assert_eq!(dashboard.connection().handler_count(EventKind::NewCustomer), 0);
    }
}
