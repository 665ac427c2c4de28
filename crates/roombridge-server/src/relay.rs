//! Track relay
//!
//! Reads RTP packets from one inbound track, rebuilds frames through a
//! [`FrameReassembler`] and writes every completed frame to an outbound track
//! published in the opposite room.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use roombridge_media::{FrameReassembler, ReassemblerConfig};

use crate::error::{BridgeError, Result};
use crate::room::{InboundTrack, OutboundTrack, RoomSession, TrackSubscribed};

/// Lifecycle of a relay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    Initializing,
    Relaying,
    /// Terminal
    Closed,
}

/// Relay tuning shared by every relay of the bridge
#[derive(Debug, Clone, Default)]
pub struct RelaySettings {
    pub reassembler: ReassemblerConfig,
    /// Unpublish the outbound track when the relay closes
    pub unpublish_on_close: bool,
}

#[derive(Debug, Default)]
struct RelayStatsInner {
    packets_received: AtomicU64,
    frames_written: AtomicU64,
    write_failures: AtomicU64,
    loss_events: AtomicU64,
    keyframe_requests: AtomicU64,
}

/// Relay counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RelayStats {
    pub packets_received: u64,
    pub frames_written: u64,
    /// Frames the outbound track refused; the relay keeps going
    pub write_failures: u64,
    pub loss_events: u64,
    /// Loss events that asked the publisher for a keyframe (video only)
    pub keyframe_requests: u64,
}

impl RelayStatsInner {
    fn snapshot(&self) -> RelayStats {
        RelayStats {
            packets_received: self.packets_received.load(Ordering::Relaxed),
            frames_written: self.frames_written.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
            loss_events: self.loss_events.load(Ordering::Relaxed),
            keyframe_requests: self.keyframe_requests.load(Ordering::Relaxed),
        }
    }
}

/// Handle to a running relay
pub struct TrackRelay {
    inbound_track_id: String,
    outbound: Arc<dyn OutboundTrack>,
    state: watch::Receiver<RelayState>,
    stats: Arc<RelayStatsInner>,
    cancel: CancellationToken,
}

impl TrackRelay {
    /// Id of the track being read
    pub fn inbound_track_id(&self) -> &str {
        &self.inbound_track_id
    }

    /// Track published in the destination room
    pub fn outbound_track(&self) -> &Arc<dyn OutboundTrack> {
        &self.outbound
    }

    /// Current lifecycle state
    pub fn state(&self) -> RelayState {
        *self.state.borrow()
    }

    /// Snapshot of the relay counters
    pub fn stats(&self) -> RelayStats {
        self.stats.snapshot()
    }

    /// Wait until the relay reaches [`RelayState::Closed`]
    pub async fn closed(&self) {
        let mut state = self.state.clone();
        // The sender only goes away after publishing Closed
        let _ = state.wait_for(|s| *s == RelayState::Closed).await;
    }

    /// Ask the read loop to stop
    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

impl fmt::Debug for TrackRelay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackRelay")
            .field("inbound_track_id", &self.inbound_track_id)
            .field("outbound_track_id", &self.outbound.id())
            .field("state", &self.state())
            .finish()
    }
}

/// Bind an inbound track to a new outbound track in `destination`
///
/// Fails with [`BridgeError::UnsupportedCodec`] before anything is created,
/// or with [`BridgeError::Publish`] when the destination refuses the track.
pub async fn create_relay(
    subscribed: TrackSubscribed,
    destination: Arc<dyn RoomSession>,
    settings: &RelaySettings,
    cancel: CancellationToken,
) -> Result<TrackRelay> {
    let TrackSubscribed {
        track: inbound,
        keyframes,
        participant,
    } = subscribed;

    let capability = inbound.codec();
    let track_id = inbound.id();
    let ssrc = inbound.ssrc();
    let (state_tx, state_rx) = watch::channel(RelayState::Initializing);

    let reassembler = settings.reassembler.build(&capability.mime_type)?;
    let stats = Arc::new(RelayStatsInner::default());

    let loss_stats = stats.clone();
    let reassembler = reassembler.with_loss_handler(move || {
        loss_stats.keyframe_requests.fetch_add(1, Ordering::Relaxed);
        keyframes.request_keyframe(ssrc);
    });

    tracing::info!(
        "Creating relay for {} track {} from {} ({}, max late {}) into room {}",
        reassembler.kind(),
        track_id,
        participant,
        capability.mime_type,
        reassembler.max_late(),
        destination.name()
    );

    let outbound = destination
        .publish_track(capability)
        .await
        .map_err(|e| match e {
            BridgeError::Publish(_) => e,
            other => BridgeError::Publish(other.to_string()),
        })?;

    state_tx.send_replace(RelayState::Relaying);

    let worker = RelayWorker {
        track_id: track_id.clone(),
        inbound,
        outbound: outbound.clone(),
        destination,
        reassembler,
        stats: stats.clone(),
        cancel: cancel.clone(),
        state: state_tx,
        unpublish_on_close: settings.unpublish_on_close,
    };
    tokio::spawn(worker.run());

    Ok(TrackRelay {
        inbound_track_id: track_id,
        outbound,
        state: state_rx,
        stats,
        cancel,
    })
}

struct RelayWorker {
    track_id: String,
    inbound: Arc<dyn InboundTrack>,
    outbound: Arc<dyn OutboundTrack>,
    destination: Arc<dyn RoomSession>,
    reassembler: FrameReassembler,
    stats: Arc<RelayStatsInner>,
    cancel: CancellationToken,
    state: watch::Sender<RelayState>,
    unpublish_on_close: bool,
}

impl RelayWorker {
    async fn run(mut self) {
        loop {
            let packet = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    tracing::debug!("Relay for track {} cancelled", self.track_id);
                    break;
                }
                result = self.inbound.read_packet() => match result {
                    Ok(packet) => packet,
                    Err(BridgeError::EndOfStream) => {
                        tracing::info!("Inbound track {} ended", self.track_id);
                        break;
                    }
                    Err(e) => {
                        tracing::warn!("Error reading inbound track {}: {}", self.track_id, e);
                        break;
                    }
                },
            };

            self.stats.packets_received.fetch_add(1, Ordering::Relaxed);
            self.reassembler.push(packet);
            self.stats
                .loss_events
                .store(self.reassembler.loss_events(), Ordering::Relaxed);

            for frame in self.reassembler.pop() {
                match self.outbound.write_frame(&frame).await {
                    Ok(()) => {
                        self.stats.frames_written.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => {
                        let failures = self.stats.write_failures.fetch_add(1, Ordering::Relaxed);
                        if failures % 100 == 0 {
                            tracing::warn!(
                                "Failed to write frame for track {} ({} failures): {}",
                                self.track_id,
                                failures + 1,
                                e
                            );
                        }
                    }
                }
            }
        }

        if self.unpublish_on_close {
            if let Err(e) = self.destination.unpublish_track(&self.outbound).await {
                tracing::warn!("Failed to unpublish relay of track {}: {}", self.track_id, e);
            }
        }

        let stats = self.stats.snapshot();
        tracing::info!(
            "Relay {} -> {} closed: {} packets, {} frames, {} losses, {} keyframe requests",
            self.track_id,
            self.outbound.id(),
            stats.packets_received,
            stats.frames_written,
            stats.loss_events,
            stats.keyframe_requests
        );

        self.state.send_replace(RelayState::Closed);
    }
}
