//! Audio loopback
//!
//! Joins one room and republishes the first subscribed audio track back into
//! that same room, so a participant can hear themselves through the relay
//! path.

use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use roombridge_media::MediaKind;

use crate::error::Result;
use crate::manager::RoomTarget;
use crate::relay::{create_relay, RelaySettings, RelayStats, TrackRelay};
use crate::room::{RoomConnection, RoomConnector, RoomEvent};

/// Echo the first audio track of a room until `signal` resolves or the room
/// closes the session
///
/// Returns the echo relay's counters, or `None` when no audio track was
/// echoed.
pub async fn run_echo<F>(
    target: RoomTarget,
    connector: Arc<dyn RoomConnector>,
    settings: RelaySettings,
    signal: F,
) -> Result<Option<RelayStats>>
where
    F: Future<Output = ()>,
{
    let RoomConnection {
        session,
        mut events,
    } = connector.connect(&target.host, &target.token).await?;
    tracing::info!("Joined room {} for echo", target.name);

    let cancel = CancellationToken::new();
    let mut echo: Option<TrackRelay> = None;
    tokio::pin!(signal);

    loop {
        tokio::select! {
            _ = &mut signal => break,
            event = events.recv() => match event {
                Some(RoomEvent::TrackSubscribed(subscribed)) => {
                    let is_audio = subscribed.track.codec().kind() == Some(MediaKind::Audio);
                    if echo.is_some() || !is_audio {
                        tracing::debug!(
                            "Not echoing track {} from {}",
                            subscribed.track.id(),
                            subscribed.participant
                        );
                        continue;
                    }

                    let participant = subscribed.participant.clone();
                    match create_relay(subscribed, session.clone(), &settings, cancel.child_token()).await {
                        Ok(relay) => {
                            tracing::info!("Echoing audio of {} in room {}", participant, target.name);
                            echo = Some(relay);
                        }
                        // Keep waiting for another audio track
                        Err(e) => tracing::warn!("Failed to echo audio of {}: {}", participant, e),
                    }
                }
                Some(RoomEvent::Disconnected) | None => {
                    tracing::warn!("Room {} closed the session", target.name);
                    break;
                }
            },
        }
    }

    cancel.cancel();
    let stats = match echo {
        Some(relay) => {
            relay.closed().await;
            Some(relay.stats())
        }
        None => None,
    };

    session.disconnect().await;
    tracing::info!("Left room {}", target.name);
    Ok(stats)
}
