//! Room session manager
//!
//! Runs one session task per room. Every track subscribed in one room gets a
//! relay into the other room once that room's session is available.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::BridgeError;
use crate::registry::SessionRegistry;
use crate::relay::{create_relay, RelaySettings, TrackRelay};
use crate::room::{RoomConnection, RoomConnector, RoomEvent, RoomSide, TrackSubscribed};

/// Where and how to join one room
#[derive(Debug, Clone)]
pub struct RoomTarget {
    pub side: RoomSide,
    /// Room name, used in logs
    pub name: String,
    /// Conferencing server URL
    pub host: String,
    pub token: String,
}

/// A relay is keyed by the room its inbound track came from and the track id
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RelayKey {
    source: RoomSide,
    track_id: String,
}

/// `None` marks a relay that is still being created
type RelayTable = HashMap<RelayKey, Option<Arc<TrackRelay>>>;

/// Owns the room sessions and the relays running between them
#[derive(Clone)]
pub struct SessionManager {
    connector: Arc<dyn RoomConnector>,
    registry: Arc<SessionRegistry>,
    relays: Arc<RwLock<RelayTable>>,
    settings: Arc<RelaySettings>,
    destination_wait: Duration,
}

impl SessionManager {
    /// Manager with empty registry and relay table
    pub fn new(
        connector: Arc<dyn RoomConnector>,
        settings: RelaySettings,
        destination_wait: Duration,
    ) -> Self {
        Self {
            connector,
            registry: Arc::new(SessionRegistry::new()),
            relays: Arc::new(RwLock::new(HashMap::new())),
            settings: Arc::new(settings),
            destination_wait,
        }
    }

    /// Sessions joined so far, by side
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Relays currently running
    pub async fn relays(&self) -> Vec<Arc<TrackRelay>> {
        self.relays
            .read()
            .await
            .values()
            .filter_map(|relay| relay.clone())
            .collect()
    }

    /// Number of relays currently running
    pub async fn relay_count(&self) -> usize {
        self.relays.read().await.values().flatten().count()
    }

    /// Run [`SessionManager::run_session`] on its own task
    pub fn spawn_session(&self, target: RoomTarget, cancel: CancellationToken) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move { manager.run_session(target, cancel).await })
    }

    /// Connect to one room and relay its tracks until cancelled
    ///
    /// A failed connection is logged and ends this session only; the other
    /// room keeps running.
    pub async fn run_session(&self, target: RoomTarget, cancel: CancellationToken) {
        let result = tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!("Session for room {} cancelled before connecting", target.name);
                return;
            }
            result = self.connector.connect(&target.host, &target.token) => result,
        };

        let RoomConnection {
            session,
            mut events,
        } = match result {
            Ok(connection) => connection,
            Err(e) => {
                let e = match e {
                    BridgeError::Connection { .. } => e,
                    other => BridgeError::connection(&target.name, other),
                };
                tracing::error!("Side {}: {}", target.side, e);
                return;
            }
        };

        tracing::info!("Joined room {} as side {}", target.name, target.side);

        if self.registry.set(target.side, session.clone()).is_err() {
            tracing::warn!("Side {} already has a session, leaving room {}", target.side, target.name);
            session.disconnect().await;
            return;
        }

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(RoomEvent::TrackSubscribed(subscribed)) => {
                        self.spawn_relay(target.side, subscribed, &cancel);
                    }
                    Some(RoomEvent::Disconnected) | None => {
                        tracing::warn!("Room {} closed the session", target.name);
                        break;
                    }
                },
            }
        }

        session.disconnect().await;
        tracing::info!("Left room {} (side {})", target.name, target.side);
    }

    fn spawn_relay(&self, source: RoomSide, subscribed: TrackSubscribed, cancel: &CancellationToken) {
        let manager = self.clone();
        let cancel = cancel.child_token();
        tokio::spawn(async move { manager.start_relay(source, subscribed, cancel).await });
    }

    async fn start_relay(&self, source: RoomSide, subscribed: TrackSubscribed, cancel: CancellationToken) {
        let key = RelayKey {
            source,
            track_id: subscribed.track.id(),
        };

        {
            let mut relays = self.relays.write().await;
            if relays.contains_key(&key) {
                tracing::debug!("Track {} from side {} already relayed", key.track_id, source);
                return;
            }
            relays.insert(key.clone(), None);
        }

        tracing::info!(
            "Track {} from {} subscribed on side {}",
            key.track_id,
            subscribed.participant,
            source
        );

        let destination = tokio::select! {
            _ = cancel.cancelled() => None,
            destination = self.registry.wait_for(source.opposite(), self.destination_wait) => {
                if destination.is_none() {
                    tracing::warn!(
                        "Side {} not joined after {}s, track {} will not be relayed",
                        source.opposite(),
                        self.destination_wait.as_secs(),
                        key.track_id
                    );
                }
                destination
            }
        };

        let Some(destination) = destination else {
            self.relays.write().await.remove(&key);
            return;
        };

        match create_relay(subscribed, destination, &self.settings, cancel).await {
            Ok(relay) => {
                let relay = Arc::new(relay);
                self.relays
                    .write()
                    .await
                    .insert(key.clone(), Some(relay.clone()));

                let relays = self.relays.clone();
                tokio::spawn(async move {
                    relay.closed().await;
                    relays.write().await.remove(&key);
                    tracing::debug!("Relay for track {} removed", key.track_id);
                });
            }
            Err(BridgeError::UnsupportedCodec(mime_type)) => {
                tracing::info!("Track {} uses unsupported codec {}, not relayed", key.track_id, mime_type);
                self.relays.write().await.remove(&key);
            }
            Err(e) => {
                tracing::warn!("Failed to create relay for track {}: {}", key.track_id, e);
                self.relays.write().await.remove(&key);
            }
        }
    }
}
