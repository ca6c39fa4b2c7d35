//! Session registrar: identity announcements and logical rooms.

use std::sync::Mutex;

use chat_core::ClientIntent;
use indexmap::IndexMap;
use tracing::{debug, info, warn};

use crate::connection::ConnectionManager;
use crate::error::SyncError;
use crate::lock;

/// Announces who this client is and which rooms it listens to.
///
/// Joined rooms are remembered in join order together with the connection
/// generation they were last announced on, so a room is emitted at most
/// once per connection no matter how often it is joined or rejoined.
pub struct SessionRegistrar {
    connection: ConnectionManager,
    rooms: Mutex<IndexMap<String, Option<u64>>>,
}

impl SessionRegistrar {
    pub fn new(connection: ConnectionManager) -> Self {
        Self {
            connection,
            rooms: Mutex::new(IndexMap::new()),
        }
    }

    /// Announce an agent identity. Logs a warning when disconnected.
    pub async fn register_as_agent(
        &self,
        agent_id: &str,
        display_name: &str,
    ) -> Result<(), SyncError> {
        let intent = ClientIntent::AgentConnect {
            agent_id: agent_id.to_string(),
            agent_name: Some(display_name.to_string()),
        };
        self.announce(intent, agent_id).await
    }

    /// Announce a customer identity. Logs a warning when disconnected.
    pub async fn register_as_customer(
        &self,
        phone: &str,
        name: Option<&str>,
    ) -> Result<(), SyncError> {
        let intent = ClientIntent::CustomerConnect {
            phone_number: phone.to_string(),
            customer_name: name.map(str::to_string),
        };
        self.announce(intent, phone).await
    }

    /// Join a room. Remembered across reconnects; repeating is harmless.
    pub async fn join_room(&self, room: &str) -> Result<(), SyncError> {
        let generation = self.connection.generation();
        let announce = {
            let mut rooms = lock(&self.rooms);
            let entry = rooms.entry(room.to_string()).or_insert(None);
            self.connection.is_connected() && *entry != Some(generation)
        };
        if !announce {
            debug!(room, "Room remembered, nothing to emit");
            return Ok(());
        }

        self.connection
            .emit(ClientIntent::JoinAgent(room.to_string()))
            .await?;
        if let Some(entry) = lock(&self.rooms).get_mut(room) {
            *entry = Some(generation);
        }
        info!(room, "Joined room");
        Ok(())
    }

    /// Leave a room and forget it.
    pub async fn leave_room(&self, room: &str) -> Result<(), SyncError> {
        let known = lock(&self.rooms).shift_remove(room).is_some();
        if !known {
            debug!(room, "Leaving a room that was never joined");
        }
        if !self.connection.is_connected() {
            return Ok(());
        }
        self.connection
            .emit(ClientIntent::LeaveAgent(room.to_string()))
            .await?;
        info!(room, "Left room");
        Ok(())
    }

    /// Re-announce every remembered room not yet joined on this connection.
    pub async fn rejoin_all(&self) -> Result<usize, SyncError> {
        let rooms: Vec<String> = lock(&self.rooms).keys().cloned().collect();
        let before = self.connection.generation();
        let mut announced = 0;
        for room in rooms {
            let pending = lock(&self.rooms)
                .get(&room)
                .is_some_and(|joined| *joined != Some(before));
            if pending {
                self.join_room(&room).await?;
                announced += 1;
            }
        }
        Ok(announced)
    }

    /// Remembered rooms, in join order.
    pub fn joined_rooms(&self) -> Vec<String> {
        lock(&self.rooms).keys().cloned().collect()
    }

    async fn announce(&self, intent: ClientIntent, who: &str) -> Result<(), SyncError> {
        if !self.connection.is_connected() {
            warn!("Cannot {} as {}: not connected", intent.name(), who);
            return Ok(());
        }
        info!("Sending {} for {}", intent.name(), who);
        let name = intent.name();
        match self.connection.emit(intent).await {
            Err(SyncError::NotConnected) => {
                warn!("Cannot {} as {}: connection dropped", name, who);
                Ok(())
            }
            other => other,
        }
    }
}
