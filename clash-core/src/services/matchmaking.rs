use crate::error::{ClashError, Result};
use crate::services::MatchmakingService;
use crate::types::{LobbyDescriptor, LobbyId, LobbyMetadata, PlayerId, QuickJoin};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

#[derive(Debug, Clone)]
struct LobbyRecord {
    descriptor: LobbyDescriptor,
    is_private: bool,
    heartbeats: u64,
    last_heartbeat: Option<DateTime<Utc>>,
}

/// In-process lobby backend shared by every participant of a simulation.
#[derive(Debug, Default)]
pub struct MemoryMatchmaker {
    lobbies: RwLock<HashMap<LobbyId, LobbyRecord>>,
    offline: AtomicBool,
}

impl MemoryMatchmaker {
    pub fn new() -> Self {
        Self::default()
    }

    /// While offline every call fails with a transport error.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn heartbeats(&self, lobby: &LobbyId) -> u64 {
        self.lobbies
            .read()
            .get(lobby)
            .map_or(0, |record| record.heartbeats)
    }

    pub fn last_heartbeat(&self, lobby: &LobbyId) -> Option<DateTime<Utc>> {
        self.lobbies
            .read()
            .get(lobby)
            .and_then(|record| record.last_heartbeat)
    }

    pub fn lobby_count(&self) -> usize {
        self.lobbies.read().len()
    }

    /// Add `player` to a specific lobby, as a join-by-id would.
    pub fn join(&self, lobby: &LobbyId, player: &PlayerId) -> Result<LobbyDescriptor> {
        self.check_online()?;

        let mut lobbies = self.lobbies.write();
        let record = lobbies
            .get_mut(lobby)
            .ok_or_else(|| ClashError::LobbyNotFound {
                id: lobby.to_string(),
            })?;

        if !record.descriptor.players.contains(player) {
            if record.descriptor.is_full() {
                return Err(ClashError::LobbyFull {
                    id: lobby.to_string(),
                });
            }
            record.descriptor.players.push(player.clone());
        }

        Ok(record.descriptor.clone())
    }

    fn check_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(ClashError::transport("matchmaking service unreachable"));
        }
        Ok(())
    }
}

#[async_trait]
impl MatchmakingService for MemoryMatchmaker {
    async fn quick_join(&self, player: &PlayerId) -> Result<QuickJoin> {
        self.check_online()?;

        let mut lobbies = self.lobbies.write();
        let oldest_open = lobbies
            .values_mut()
            .filter(|record| !record.is_private && record.descriptor.available_slots() > 0)
            .filter(|record| !record.descriptor.players.contains(player))
            .min_by(|a, b| {
                a.descriptor
                    .created_at
                    .cmp(&b.descriptor.created_at)
                    .then_with(|| a.descriptor.id.as_str().cmp(b.descriptor.id.as_str()))
            });

        match oldest_open {
            Some(record) => {
                record.descriptor.players.push(player.clone());
                tracing::debug!(
                    "Player {} quick-joined lobby {} ({}/{})",
                    player,
                    record.descriptor.id,
                    record.descriptor.player_count(),
                    record.descriptor.capacity
                );
                Ok(QuickJoin::Joined(record.descriptor.clone()))
            }
            None => Ok(QuickJoin::NoOpenLobbies),
        }
    }

    async fn create(
        &self,
        host: &PlayerId,
        capacity: usize,
        metadata: LobbyMetadata,
    ) -> Result<LobbyDescriptor> {
        self.check_online()?;

        if capacity == 0 {
            return Err(ClashError::config("Lobby capacity must be greater than 0"));
        }

        let descriptor = LobbyDescriptor {
            id: LobbyId::new(Uuid::new_v4().to_string()),
            name: metadata.name,
            host: host.clone(),
            players: vec![host.clone()],
            capacity,
            data: metadata.data,
            created_at: Utc::now(),
        };

        self.lobbies.write().insert(
            descriptor.id.clone(),
            LobbyRecord {
                descriptor: descriptor.clone(),
                is_private: metadata.is_private,
                heartbeats: 0,
                last_heartbeat: None,
            },
        );

        tracing::debug!("Created lobby {} for host {}", descriptor.id, host);
        Ok(descriptor)
    }

    async fn heartbeat(&self, lobby: &LobbyId) -> Result<()> {
        self.check_online()?;

        let mut lobbies = self.lobbies.write();
        let record = lobbies
            .get_mut(lobby)
            .ok_or_else(|| ClashError::LobbyNotFound {
                id: lobby.to_string(),
            })?;
        record.heartbeats += 1;
        record.last_heartbeat = Some(Utc::now());
        Ok(())
    }

    async fn poll(&self, lobby: &LobbyId) -> Result<LobbyDescriptor> {
        self.check_online()?;

        self.lobbies
            .read()
            .get(lobby)
            .map(|record| record.descriptor.clone())
            .ok_or_else(|| ClashError::LobbyNotFound {
                id: lobby.to_string(),
            })
    }

    async fn update_metadata(&self, lobby: &LobbyId, blob: String) -> Result<()> {
        self.check_online()?;

        let mut lobbies = self.lobbies.write();
        let record = lobbies
            .get_mut(lobby)
            .ok_or_else(|| ClashError::LobbyNotFound {
                id: lobby.to_string(),
            })?;
        record.descriptor.data = Some(blob);
        Ok(())
    }

    async fn leave(&self, lobby: &LobbyId, player: &PlayerId) -> Result<()> {
        self.check_online()?;

        let mut lobbies = self.lobbies.write();
        let Some(record) = lobbies.get_mut(lobby) else {
            return Err(ClashError::LobbyNotFound {
                id: lobby.to_string(),
            });
        };

        record.descriptor.players.retain(|p| p != player);

        if record.descriptor.players.is_empty() {
            lobbies.remove(lobby);
            tracing::debug!("Lobby {} closed after last player left", lobby);
        } else if record.descriptor.host == *player {
            // host migrates to the longest-standing member
            record.descriptor.host = record.descriptor.players[0].clone();
        }

        Ok(())
    }
}
