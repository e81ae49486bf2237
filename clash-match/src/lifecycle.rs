//! Lobby lifecycle: join or create a lobby, keep it alive, and start the
//! session once it fills.
//!
//! States move `Idle -> Joining -> Waiting -> Full -> SessionStarted`.
//! A failed join lands in `Failed`; `stop` lands in `Stopped` from anywhere.
//! While `Waiting`, one background task drives two independent timers:
//! the heartbeat keeps the lobby alive and the poll refreshes the player
//! count. Both are measured from the moment `Waiting` was entered and
//! both end when the lobby fills or the lifecycle stops.

use crate::session::Session;
use crate::teams::assign_teams;
use crate::{MatchError, Result};
use clash_core::{
    IdentityService, LobbyDescriptor, LobbyId, LobbyMetadata, MatchConfig, MatchmakingService,
    PlayerId, QuickJoin, Roster,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LifecycleState {
    Idle,
    Joining,
    Waiting { lobby: LobbyId },
    Failed { reason: String },
    Full { lobby: LobbyId },
    SessionStarted { lobby: LobbyId, roster: Roster },
    Stopped,
}

impl LifecycleState {
    pub fn name(&self) -> &'static str {
        match self {
            LifecycleState::Idle => "idle",
            LifecycleState::Joining => "joining",
            LifecycleState::Waiting { .. } => "waiting",
            LifecycleState::Failed { .. } => "failed",
            LifecycleState::Full { .. } => "full",
            LifecycleState::SessionStarted { .. } => "session-started",
            LifecycleState::Stopped => "stopped",
        }
    }

    pub fn lobby(&self) -> Option<&LobbyId> {
        match self {
            LifecycleState::Waiting { lobby }
            | LifecycleState::Full { lobby }
            | LifecycleState::SessionStarted { lobby, .. } => Some(lobby),
            _ => None,
        }
    }
}

struct Inner {
    config: MatchConfig,
    session: Arc<Session>,
    matchmaking: Arc<dyn MatchmakingService>,
    identity: Arc<dyn IdentityService>,
    state: watch::Sender<LifecycleState>,
}

impl Inner {
    fn transition(&self, next: LifecycleState) {
        let previous = self.state.send_replace(next);
        tracing::debug!(
            "Lifecycle {} -> {}",
            previous.name(),
            self.state.borrow().name()
        );
    }

    async fn join_or_create(&self, player: &PlayerId) -> Result<LobbyDescriptor> {
        match self.matchmaking.quick_join(player).await? {
            QuickJoin::Joined(lobby) => {
                tracing::info!(
                    "Joined lobby {} ({}/{})",
                    lobby.id,
                    lobby.player_count(),
                    lobby.capacity
                );
                Ok(lobby)
            }
            QuickJoin::NoOpenLobbies => {
                tracing::info!("No open lobbies, creating \"{}\"", self.config.lobby_name);
                let metadata = LobbyMetadata {
                    name: self.config.lobby_name.clone(),
                    ..Default::default()
                };
                let lobby = self
                    .matchmaking
                    .create(player, self.config.capacity, metadata)
                    .await?;
                tracing::info!("Created lobby {} as host", lobby.id);
                Ok(lobby)
            }
        }
    }

    async fn send_heartbeat(&self, lobby: &LobbyId) {
        match self.matchmaking.heartbeat(lobby).await {
            Ok(()) => tracing::trace!("Heartbeat sent for lobby {}", lobby),
            Err(e) => tracing::warn!("Heartbeat for lobby {} failed: {}", lobby, e),
        }
    }

    /// Returns `true` once the waiting phase is over.
    async fn poll_capacity(&self, lobby: &LobbyId, me: &PlayerId) -> bool {
        let descriptor = match self.matchmaking.poll(lobby).await {
            Ok(descriptor) => descriptor,
            Err(e) => {
                tracing::warn!("Polling lobby {} failed: {}", lobby, e);
                return false;
            }
        };

        tracing::debug!(
            "Lobby {} has {}/{} players",
            lobby,
            descriptor.player_count(),
            descriptor.capacity
        );

        if descriptor.player_count() < descriptor.capacity {
            return false;
        }

        if !self.session.try_mark_full() {
            tracing::error!("Lobby {} filled but its session was already started", lobby);
            self.transition(LifecycleState::Failed {
                reason: "Session already started for this lobby".to_string(),
            });
            return true;
        }

        self.transition(LifecycleState::Full {
            lobby: lobby.clone(),
        });
        tracing::info!("Lobby {} is full", lobby);

        match self.start_session(&descriptor, me).await {
            Ok(roster) => {
                tracing::info!(
                    "Session started with {} players on {} teams",
                    roster.len(),
                    roster.team_ids().len()
                );
                self.transition(LifecycleState::SessionStarted {
                    lobby: lobby.clone(),
                    roster,
                });
            }
            Err(e) => {
                tracing::error!("Failed to start session in lobby {}: {}", lobby, e);
                self.transition(LifecycleState::Failed {
                    reason: e.to_string(),
                });
            }
        }

        true
    }

    async fn start_session(&self, lobby: &LobbyDescriptor, me: &PlayerId) -> Result<Roster> {
        let roster = assign_teams(&lobby.players, self.config.team_count)?;
        self.session.publish_roster(roster.clone())?;

        if lobby.is_host(me) {
            match roster.encode() {
                Ok(blob) => {
                    if let Err(e) = self.matchmaking.update_metadata(&lobby.id, blob).await {
                        tracing::warn!("Could not publish roster to lobby {}: {}", lobby.id, e);
                    }
                }
                Err(e) => tracing::warn!("Could not encode roster: {}", e),
            }
        } else if let Some(published) = lobby.data.as_deref() {
            // the host's copy comes from the same join order
            match Roster::decode(published) {
                Ok(remote) if remote != roster => tracing::warn!(
                    "Roster published in lobby {} differs from the local assignment",
                    lobby.id
                ),
                Ok(_) => {}
                Err(e) => tracing::debug!("Ignoring lobby data: {}", e),
            }
        }

        Ok(roster)
    }
}

/// Drives one participant through a lobby until the session starts.
pub struct LobbyLifecycle {
    inner: Arc<Inner>,
    shutdown: watch::Sender<bool>,
    timers: Mutex<Option<JoinHandle<()>>>,
    joined: Mutex<Option<LobbyId>>,
}

impl LobbyLifecycle {
    pub fn new(
        config: MatchConfig,
        session: Arc<Session>,
        matchmaking: Arc<dyn MatchmakingService>,
        identity: Arc<dyn IdentityService>,
    ) -> Self {
        let (state, _) = watch::channel(LifecycleState::Idle);
        let (shutdown, _) = watch::channel(false);

        Self {
            inner: Arc::new(Inner {
                config,
                session,
                matchmaking,
                identity,
                state,
            }),
            shutdown,
            timers: Mutex::new(None),
            joined: Mutex::new(None),
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.inner.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.inner.state.subscribe()
    }

    /// Join the oldest open lobby or create one, then start waiting for it
    /// to fill. Requires a signed-in identity.
    ///
    /// Restarting after `stop` or a failure clears the previous session,
    /// unless it still holds contributions or is settling.
    pub async fn start(&self) -> Result<LobbyDescriptor> {
        match self.state() {
            LifecycleState::Idle => {}
            LifecycleState::Failed { .. } | LifecycleState::Stopped => {
                let session = &self.inner.session;
                if session.is_settling() || !session.pool_total().is_zero() {
                    return Err(MatchError::InvalidState(
                        "Previous session still holds contributions".to_string(),
                    ));
                }
                session.reset()?;
            }
            other => {
                return Err(MatchError::InvalidState(format!(
                    "Lifecycle already {}",
                    other.name()
                )))
            }
        }

        let me = self
            .inner
            .identity
            .current_player_id()
            .ok_or(MatchError::NotSignedIn)?;

        let previous = self.joined.lock().take();
        if let Some(previous) = previous {
            if let Err(e) = self.inner.matchmaking.leave(&previous, &me).await {
                tracing::warn!("Leaving previous lobby {} failed: {}", previous, e);
            }
        }

        self.inner.transition(LifecycleState::Joining);

        let lobby = match self.inner.join_or_create(&me).await {
            Ok(lobby) => lobby,
            Err(e) => {
                tracing::error!("Matchmaking failed: {}", e);
                self.inner.transition(LifecycleState::Failed {
                    reason: e.to_string(),
                });
                return Err(MatchError::LobbyFailed(e.to_string()));
            }
        };

        *self.joined.lock() = Some(lobby.id.clone());
        self.inner.session.set_lobby(lobby.id.clone());
        self.inner.transition(LifecycleState::Waiting {
            lobby: lobby.id.clone(),
        });

        self.shutdown.send_replace(false);
        let handle = tokio::spawn(run_timers(
            self.inner.clone(),
            lobby.id.clone(),
            me,
            self.shutdown.subscribe(),
        ));
        if let Some(previous) = self.timers.lock().replace(handle) {
            previous.abort();
        }

        Ok(lobby)
    }

    /// Resolve with the roster once the session starts.
    pub async fn wait_for_session(&self) -> Result<Roster> {
        let mut rx = self.subscribe();
        loop {
            match &*rx.borrow_and_update() {
                LifecycleState::SessionStarted { roster, .. } => return Ok(roster.clone()),
                LifecycleState::Failed { reason } => {
                    return Err(MatchError::LobbyFailed(reason.clone()))
                }
                LifecycleState::Stopped => {
                    return Err(MatchError::InvalidState("Lifecycle stopped".to_string()))
                }
                LifecycleState::Idle => return Err(MatchError::SessionNotStarted),
                _ => {}
            }

            rx.changed()
                .await
                .map_err(|_| MatchError::InvalidState("Lifecycle dropped".to_string()))?;
        }
    }

    /// Cancel both timers and leave the lobby. Leaving is best-effort.
    pub async fn stop(&self) {
        self.shutdown.send_replace(true);
        if let Some(handle) = self.timers.lock().take() {
            handle.abort();
        }

        let lobby = self.joined.lock().take();
        let me = self.inner.identity.current_player_id();
        if let (Some(lobby), Some(me)) = (lobby, me) {
            if let Err(e) = self.inner.matchmaking.leave(&lobby, &me).await {
                tracing::warn!("Leaving lobby {} failed: {}", lobby, e);
            } else {
                tracing::info!("Left lobby {}", lobby);
            }
        }

        self.inner.transition(LifecycleState::Stopped);
    }

    /// Return to `Idle` so `start` can run again. The current lobby is kept
    /// until `stop`.
    pub(crate) fn rearm(&self) {
        if let Some(handle) = self.timers.lock().take() {
            handle.abort();
        }
        self.inner.transition(LifecycleState::Idle);
    }

    #[cfg(test)]
    fn timers_running(&self) -> bool {
        self.timers
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for LobbyLifecycle {
    fn drop(&mut self) {
        if let Some(handle) = self.timers.get_mut().take() {
            handle.abort();
        }
    }
}

async fn run_timers(
    inner: Arc<Inner>,
    lobby: LobbyId,
    me: PlayerId,
    mut shutdown: watch::Receiver<bool>,
) {
    let entered = Instant::now();

    let mut heartbeat = interval_at(
        entered + inner.config.heartbeat_interval,
        inner.config.heartbeat_interval,
    );
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut poll = interval_at(
        entered + inner.config.poll_interval,
        inner.config.poll_interval,
    );
    poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    tracing::debug!("Lobby timers for {} stopped", lobby);
                    break;
                }
            }
            _ = heartbeat.tick() => inner.send_heartbeat(&lobby).await,
            _ = poll.tick() => {
                if inner.poll_capacity(&lobby, &me).await {
                    tracing::debug!("Lobby timers for {} finished", lobby);
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clash_core::{AnonymousIdentity, MemoryMatchmaker, TeamId};
    use std::time::Duration;

    fn lifecycle(
        player: &str,
        capacity: usize,
        matchmaker: &Arc<MemoryMatchmaker>,
    ) -> (LobbyLifecycle, Arc<Session>) {
        let session = Arc::new(Session::new());
        let lifecycle = LobbyLifecycle::new(
            MatchConfig::new(capacity),
            session.clone(),
            matchmaker.clone(),
            Arc::new(AnonymousIdentity::signed_in(player)),
        );
        (lifecycle, session)
    }

    #[tokio::test(start_paused = true)]
    async fn test_creates_lobby_when_none_open() {
        let matchmaker = Arc::new(MemoryMatchmaker::new());
        let (lifecycle, session) = lifecycle("host", 4, &matchmaker);

        let lobby = lifecycle.start().await.unwrap();
        assert!(lobby.is_host(&"host".into()));
        assert_eq!(session.lobby_id(), Some(lobby.id.clone()));
        assert_eq!(lifecycle.state(), LifecycleState::Waiting { lobby: lobby.id });
    }

    #[tokio::test(start_paused = true)]
    async fn test_joins_existing_lobby() {
        let matchmaker = Arc::new(MemoryMatchmaker::new());
        let (host, _) = lifecycle("host", 4, &matchmaker);
        let (guest, _) = lifecycle("guest", 4, &matchmaker);

        let created = host.start().await.unwrap();
        let joined = guest.start().await.unwrap();

        assert_eq!(created.id, joined.id);
        assert_eq!(joined.player_count(), 2);
        assert_eq!(matchmaker.lobby_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_requires_sign_in() {
        let matchmaker = Arc::new(MemoryMatchmaker::new());
        let lifecycle = LobbyLifecycle::new(
            MatchConfig::default(),
            Arc::new(Session::new()),
            matchmaker.clone(),
            Arc::new(AnonymousIdentity::new()),
        );

        assert!(matches!(
            lifecycle.start().await,
            Err(MatchError::NotSignedIn)
        ));
        assert_eq!(lifecycle.state(), LifecycleState::Idle);
        assert_eq!(matchmaker.lobby_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_matchmaking_failure_is_terminal() {
        let matchmaker = Arc::new(MemoryMatchmaker::new());
        matchmaker.set_offline(true);
        let (lifecycle, _) = lifecycle("host", 4, &matchmaker);

        assert!(matches!(
            lifecycle.start().await,
            Err(MatchError::LobbyFailed(_))
        ));
        assert!(matches!(lifecycle.state(), LifecycleState::Failed { .. }));
        assert!(!lifecycle.timers_running());
        assert!(matches!(
            lifecycle.wait_for_session().await,
            Err(MatchError::LobbyFailed(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeats_follow_interval() {
        let matchmaker = Arc::new(MemoryMatchmaker::new());
        let (lifecycle, _) = lifecycle("host", 4, &matchmaker);
        let lobby = lifecycle.start().await.unwrap();

        tokio::time::sleep(Duration::from_secs(14)).await;
        assert_eq!(matchmaker.heartbeats(&lobby.id), 0);

        tokio::time::sleep(Duration::from_secs(17)).await;
        assert_eq!(matchmaker.heartbeats(&lobby.id), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_failures_are_retried() {
        let matchmaker = Arc::new(MemoryMatchmaker::new());
        let (lifecycle, _) = lifecycle("host", 2, &matchmaker);
        let lobby = lifecycle.start().await.unwrap();

        matchmaker.set_offline(true);
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert!(matches!(lifecycle.state(), LifecycleState::Waiting { .. }));

        matchmaker.set_offline(false);
        matchmaker.join(&lobby.id, &"guest".into()).unwrap();
        let roster = tokio::time::timeout(Duration::from_secs(10), lifecycle.wait_for_session())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(roster.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_lobby_starts_session_once() {
        let matchmaker = Arc::new(MemoryMatchmaker::new());
        let (lifecycle, session) = lifecycle("host", 4, &matchmaker);
        let lobby = lifecycle.start().await.unwrap();

        for guest in ["b", "c", "d"] {
            matchmaker.join(&lobby.id, &guest.into()).unwrap();
        }

        let roster = lifecycle.wait_for_session().await.unwrap();
        assert_eq!(roster.team_of(&"host".into()), Some(TeamId::new(1)));
        assert_eq!(roster.team_of(&"b".into()), Some(TeamId::new(2)));
        assert_eq!(roster.team_of(&"c".into()), Some(TeamId::new(1)));
        assert_eq!(roster.team_of(&"d".into()), Some(TeamId::new(2)));
        assert_eq!(session.roster(), Some(roster));

        // polls and heartbeats stop after the session starts
        let heartbeats = matchmaker.heartbeats(&lobby.id);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(matchmaker.heartbeats(&lobby.id), heartbeats);
        assert!(!lifecycle.timers_running());
        assert!(!session.try_mark_full());
    }

    #[tokio::test(start_paused = true)]
    async fn test_host_publishes_roster_to_lobby() {
        let matchmaker = Arc::new(MemoryMatchmaker::new());
        let (host, _) = lifecycle("host", 2, &matchmaker);
        let (guest, _) = lifecycle("guest", 2, &matchmaker);

        let lobby = host.start().await.unwrap();
        guest.start().await.unwrap();

        let host_roster = host.wait_for_session().await.unwrap();
        let guest_roster = guest.wait_for_session().await.unwrap();
        assert_eq!(host_roster, guest_roster);

        let polled = matchmaker.poll(&lobby.id).await.unwrap();
        let published = Roster::decode(polled.data.as_deref().unwrap()).unwrap();
        assert_eq!(published, host_roster);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_timers_and_leaves() {
        let matchmaker = Arc::new(MemoryMatchmaker::new());
        let (lifecycle, _) = lifecycle("host", 4, &matchmaker);
        let lobby = lifecycle.start().await.unwrap();

        tokio::time::sleep(Duration::from_secs(16)).await;
        assert_eq!(matchmaker.heartbeats(&lobby.id), 1);

        lifecycle.stop().await;
        assert_eq!(lifecycle.state(), LifecycleState::Stopped);
        assert!(!lifecycle.timers_running());
        // last player left, so the lobby is gone
        assert_eq!(matchmaker.lobby_count(), 0);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(matchmaker.heartbeats(&lobby.id), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_twice_rejected() {
        let matchmaker = Arc::new(MemoryMatchmaker::new());
        let (lifecycle, _) = lifecycle("host", 4, &matchmaker);
        lifecycle.start().await.unwrap();

        assert!(matches!(
            lifecycle.start().await,
            Err(MatchError::InvalidState(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_after_stop_starts_fresh_session() {
        let matchmaker = Arc::new(MemoryMatchmaker::new());
        let (host, session) = lifecycle("host", 2, &matchmaker);
        let (guest, _) = lifecycle("guest", 2, &matchmaker);

        host.start().await.unwrap();
        guest.start().await.unwrap();
        host.wait_for_session().await.unwrap();
        guest.wait_for_session().await.unwrap();

        host.stop().await;
        guest.stop().await;
        assert_eq!(matchmaker.lobby_count(), 0);

        let lobby = host.start().await.unwrap();
        assert!(session.roster().is_none());
        assert_eq!(session.lobby_id(), Some(lobby.id.clone()));

        let (late, _) = lifecycle("late", 2, &matchmaker);
        late.start().await.unwrap();

        let roster = tokio::time::timeout(Duration::from_secs(30), host.wait_for_session())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(roster.len(), 2);
        assert!(roster.contains(&"host".into()));
        assert!(roster.contains(&"late".into()));
        assert_eq!(session.roster(), Some(roster));
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_refused_while_pool_holds_tokens() {
        let matchmaker = Arc::new(MemoryMatchmaker::new());
        let (host, session) = lifecycle("host", 2, &matchmaker);
        let (guest, _) = lifecycle("guest", 2, &matchmaker);

        host.start().await.unwrap();
        guest.start().await.unwrap();
        host.wait_for_session().await.unwrap();
        session
            .contribute(&"host".into(), clash_core::Tokens::new(5))
            .unwrap();

        host.stop().await;
        assert!(matches!(
            host.start().await,
            Err(MatchError::InvalidState(_))
        ));
        assert_eq!(host.state(), LifecycleState::Stopped);
        assert_eq!(session.pool_total(), clash_core::Tokens::new(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_lobby_with_latched_session_fails() {
        let matchmaker = Arc::new(MemoryMatchmaker::new());
        let (lifecycle, session) = lifecycle("host", 2, &matchmaker);
        let lobby = lifecycle.start().await.unwrap();

        assert!(session.try_mark_full());
        matchmaker.join(&lobby.id, &"guest".into()).unwrap();

        let outcome = tokio::time::timeout(Duration::from_secs(30), lifecycle.wait_for_session())
            .await
            .unwrap();
        assert!(matches!(outcome, Err(MatchError::LobbyFailed(_))));
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(!lifecycle.timers_running());
    }
}
