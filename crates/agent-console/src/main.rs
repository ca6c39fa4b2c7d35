//! Terminal console for a support agent.
//!
//! Connects to the chat server, registers the agent, opens a conversation and
//! sends every stdin line as an agent message. Lines starting with `/` are
//! commands; see [`Command`].

mod config;

use std::sync::Arc;
use std::time::Duration;

use chat_core::{EventKind, Message, SenderKind};
use chat_sync::{
    AgentDashboard, ConnectionManager, ConnectionState, ConversationSession, LoadOutcome,
    MutationKind, SendOutcome,
};
use chat_transport::{EventSourceTransport, RestClient};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use crate::config::ConsoleConfig;

/// How long to wait for the first connection before giving up.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Live events that may append to the open conversation.
const MESSAGE_EVENTS: [EventKind; 7] = [
    EventKind::NewCustomerMessage,
    EventKind::NewAgentMessage,
    EventKind::SystemMessage,
    EventKind::InteractiveMessage,
    EventKind::FormStep,
    EventKind::TicketCreated,
    EventKind::Error,
];

/// A line of console input.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    /// `/open <phone>`
    Open(String),
    /// `/older`
    Older,
    /// `/choose <id> <label>`
    Choose { id: String, label: String },
    /// `/tickets`
    Tickets,
    /// `/close <ticket id>`
    Close(String),
    /// `/quit`
    Quit,
    /// Anything else is sent as a message.
    Say(String),
}

impl Command {
    fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        if !line.starts_with('/') {
            return Some(Command::Say(line.to_string()));
        }

        let mut parts = line.splitn(3, char::is_whitespace);
        let name = parts.next().unwrap_or_default();
        let first = parts.next().map(str::trim).filter(|s| !s.is_empty());
        let rest = parts.next().map(str::trim).filter(|s| !s.is_empty());

        match (name, first, rest) {
            ("/open", Some(phone), None) => Some(Command::Open(phone.to_string())),
            ("/older", None, None) => Some(Command::Older),
            ("/choose", Some(id), label) => Some(Command::Choose {
                id: id.to_string(),
                label: label.unwrap_or(id).to_string(),
            }),
            ("/tickets", None, None) => Some(Command::Tickets),
            ("/close", Some(id), None) => Some(Command::Close(id.to_string())),
            ("/quit", None, None) => Some(Command::Quit),
            _ => None,
        }
    }
}

fn print_message(message: &Message) {
    let who = match message.sender {
        SenderKind::Customer => "customer",
        SenderKind::Agent => "agent",
        SenderKind::System => "system",
        SenderKind::Error => "error",
    };
    println!(
        "[{}] {:>8}: {}",
        message.timestamp.format("%H:%M:%S"),
        who,
        message.text
    );
}

/// Number of lines in front of the message that was oldest before a load.
fn prepended(previous_oldest: Option<&str>, messages: &[Message]) -> usize {
    previous_oldest
        .and_then(|id| messages.iter().position(|m| m.id == id))
        .unwrap_or(messages.len())
}

async fn open(session: &ConversationSession<RestClient>, phone: &str) {
    match session.select(phone).await {
        Ok(LoadOutcome::Loaded(count)) => {
            println!("--- {} ({} messages) ---", phone, count);
            for message in session.messages() {
                print_message(&message);
            }
            session.take_last_mutation();
        }
        Ok(_) => {}
        Err(e) => eprintln!("Could not open {}: {}", phone, e),
    }
}

async fn handle(
    command: Command,
    dashboard: &AgentDashboard,
    session: &ConversationSession<RestClient>,
) -> bool {
    match command {
        Command::Open(phone) => open(session, &phone).await,
        Command::Older => {
            let oldest = session.messages().first().map(|m| m.id.clone());
            match session.load_older(0.0).await {
                Ok(LoadOutcome::Loaded(_)) => {
                    let messages = session.messages();
                    let added = prepended(oldest.as_deref(), &messages);
                    println!("--- {} older messages ---", added);
                    for message in messages.iter().take(added) {
                        print_message(message);
                    }
                    session.take_last_mutation();
                }
                Ok(_) => println!("Nothing more to load"),
                Err(e) => eprintln!("{}", e),
            }
        }
        Command::Choose { id, label } => {
            if let Err(e) = session.respond_to_interactive(&id, &label).await {
                eprintln!("{}", e);
            }
        }
        Command::Tickets => match dashboard.get_tickets(1, 20, None).await {
            Ok(payload) => match payload.body.get("tickets") {
                Some(tickets) => println!("{}", tickets),
                None => println!("No tickets"),
            },
            Err(e) => eprintln!("{}", e),
        },
        Command::Close(id) => match dashboard.close_ticket(&id).await {
            Ok(_) => println!("Ticket {} closed", id),
            Err(e) => eprintln!("{}", e),
        },
        Command::Say(text) => {
            if !session.can_send() {
                warn!("Sending while offline or without an open ticket");
            }
            match session.send_agent_message(&text).await {
                Ok(SendOutcome::Sent { .. }) => {}
                Ok(SendOutcome::Skipped) => println!("Open a conversation first: /open <phone>"),
                Err(e) => eprintln!("{}", e),
            }
        }
        Command::Quit => return false,
    }
    true
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = ConsoleConfig::from_env()?;
    let server = config.server_config();

    let backend = RestClient::connect(server.clone()).await?;
    let transport = EventSourceTransport::new(server)?;
    let connection = ConnectionManager::new(Arc::new(transport))
        .with_request_timeout(config.request_timeout);
    let dashboard = AgentDashboard::new(connection.clone(), config.dashboard_config());
    dashboard.on_activity(|activity| info!("Dashboard activity: {:?}", activity));

    info!("Connecting to {} as agent {}", config.socket_url, config.agent_id);
    dashboard.start();
    tokio::time::timeout(
        CONNECT_TIMEOUT,
        connection.wait_for_state(ConnectionState::Connected),
    )
    .await
    .map_err(|_| "timed out waiting for the chat server")?;

    let session = dashboard.conversation(backend);
    let mut printers = Vec::new();
    for kind in MESSAGE_EVENTS {
        let session = session.clone();
        let id = connection.subscribe(kind, move |_| {
            if session.take_last_mutation() == Some(MutationKind::Append) {
                if let Some(message) = session.messages().last() {
                    print_message(message);
                }
            }
            Ok(())
        });
        printers.push((kind, id));
    }

    if let Some(phone) = &config.conversation {
        open(&session, phone).await;
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match Command::parse(&line) {
            Some(command) => {
                if !handle(command, &dashboard, &session).await {
                    break;
                }
            }
            None if line.trim().is_empty() => {}
            None => eprintln!("Unknown command: {}", line.trim()),
        }
    }

    for (kind, id) in printers {
        connection.unsubscribe(kind, id);
    }
    dashboard.shutdown();
    Ok(())
}
