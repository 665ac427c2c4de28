//! In-memory room fakes shared by the integration tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use webrtc::rtp::header::Header;
use webrtc::rtp::packet::Packet;

use roombridge::error::{BridgeError, Result};
use roombridge::room::{
    InboundTrack, KeyframeRequester, OutboundTrack, RoomConnection, RoomConnector, RoomEvent,
    RoomSession, TrackSubscribed,
};
use roombridge_media::{CodecCapability, Frame, MIME_TYPE_OPUS, MIME_TYPE_VP8};

pub fn vp8(sequence_number: u16, timestamp: u32, start: bool, marker: bool) -> Packet {
    let descriptor = if start { 0x10 } else { 0x00 };
    Packet {
        header: Header {
            version: 2,
            payload_type: 96,
            sequence_number,
            timestamp,
            marker,
            ssrc: 1234,
            ..Default::default()
        },
        payload: Bytes::from(vec![descriptor, sequence_number as u8, 0xaa, 0xbb]),
    }
}

/// Single-packet VP8 frame
pub fn vp8_frame(sequence_number: u16) -> Packet {
    vp8(sequence_number, u32::from(sequence_number) * 3000, true, true)
}

pub fn opus(sequence_number: u16) -> Packet {
    Packet {
        header: Header {
            version: 2,
            payload_type: 111,
            sequence_number,
            timestamp: u32::from(sequence_number) * 960,
            ssrc: 5678,
            ..Default::default()
        },
        payload: Bytes::from(vec![0xfc, sequence_number as u8, 0xff]),
    }
}

/// Poll `condition` until it holds, failing the test after five seconds
pub async fn eventually<F>(what: &str, condition: F)
where
    F: Fn() -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub struct FakeInbound {
    id: String,
    ssrc: u32,
    codec: CodecCapability,
    packets: tokio::sync::Mutex<mpsc::UnboundedReceiver<Packet>>,
}

impl FakeInbound {
    /// Track fed through the returned sender; dropping it ends the stream
    pub fn new(id: &str, mime_type: &str) -> (Arc<Self>, mpsc::UnboundedSender<Packet>) {
        let clock_rate = if mime_type.starts_with("audio/") { 48000 } else { 90000 };
        let (tx, rx) = mpsc::unbounded_channel();
        let track = Arc::new(Self {
            id: id.to_string(),
            ssrc: 1234,
            codec: CodecCapability::new(mime_type, clock_rate),
            packets: tokio::sync::Mutex::new(rx),
        });
        (track, tx)
    }

    pub fn video(id: &str) -> (Arc<Self>, mpsc::UnboundedSender<Packet>) {
        Self::new(id, MIME_TYPE_VP8)
    }

    pub fn audio(id: &str) -> (Arc<Self>, mpsc::UnboundedSender<Packet>) {
        Self::new(id, MIME_TYPE_OPUS)
    }
}

#[async_trait]
impl InboundTrack for FakeInbound {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn ssrc(&self) -> u32 {
        self.ssrc
    }

    fn codec(&self) -> CodecCapability {
        self.codec.clone()
    }

    async fn read_packet(&self) -> Result<Packet> {
        self.packets
            .lock()
            .await
            .recv()
            .await
            .ok_or(BridgeError::EndOfStream)
    }
}

pub struct FakeOutbound {
    id: String,
    pub capability: CodecCapability,
    frames: Mutex<Vec<Frame>>,
    fail_writes: bool,
}

impl FakeOutbound {
    pub fn frames(&self) -> Vec<Frame> {
        self.frames.lock().unwrap().clone()
    }

    pub fn frame_count(&self) -> usize {
        self.frames.lock().unwrap().len()
    }
}

#[async_trait]
impl OutboundTrack for FakeOutbound {
    fn id(&self) -> String {
        self.id.clone()
    }

    async fn write_frame(&self, frame: &Frame) -> Result<()> {
        if self.fail_writes {
            return Err(BridgeError::Write("sink closed".to_string()));
        }
        self.frames.lock().unwrap().push(frame.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeSession {
    name: String,
    published: Mutex<Vec<Arc<FakeOutbound>>>,
    unpublished: Mutex<Vec<String>>,
    pub fail_publish: AtomicBool,
    pub fail_writes: AtomicBool,
    disconnected: AtomicBool,
}

impl FakeSession {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            ..Default::default()
        })
    }

    pub fn published(&self) -> Vec<Arc<FakeOutbound>> {
        self.published.lock().unwrap().clone()
    }

    pub fn published_count(&self) -> usize {
        self.published.lock().unwrap().len()
    }

    pub fn unpublished(&self) -> Vec<String> {
        self.unpublished.lock().unwrap().clone()
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RoomSession for FakeSession {
    fn name(&self) -> &str {
        &self.name
    }

    async fn publish_track(&self, capability: CodecCapability) -> Result<Arc<dyn OutboundTrack>> {
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(BridgeError::Publish("permission denied".to_string()));
        }

        let mut published = self.published.lock().unwrap();
        let track = Arc::new(FakeOutbound {
            id: format!("{}-out-{}", self.name, published.len()),
            capability,
            frames: Mutex::new(Vec::new()),
            fail_writes: self.fail_writes.load(Ordering::SeqCst),
        });
        published.push(track.clone());
        Ok(track)
    }

    async fn unpublish_track(&self, track: &Arc<dyn OutboundTrack>) -> Result<()> {
        self.unpublished.lock().unwrap().push(track.id());
        Ok(())
    }

    async fn disconnect(&self) {
        self.disconnected.store(true, Ordering::SeqCst);
    }
}

/// Keyframe requester that counts its calls
pub fn counting_keyframes() -> (Arc<dyn KeyframeRequester>, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let requester: Arc<dyn KeyframeRequester> = Arc::new(move |_ssrc: u32| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    (requester, calls)
}

pub fn subscribed(track: Arc<FakeInbound>, keyframes: Arc<dyn KeyframeRequester>) -> TrackSubscribed {
    TrackSubscribed {
        track,
        keyframes,
        participant: "alice".to_string(),
    }
}

enum FakeRoom {
    Joinable {
        session: Arc<FakeSession>,
        events: Option<mpsc::UnboundedReceiver<RoomEvent>>,
        delay: Duration,
    },
    Refused,
}

/// Handle a test uses to drive one fake room
pub struct RoomHandle {
    pub session: Arc<FakeSession>,
    pub events: mpsc::UnboundedSender<RoomEvent>,
}

impl RoomHandle {
    pub fn subscribe(&self, subscribed: TrackSubscribed) {
        let _ = self.events.send(RoomEvent::TrackSubscribed(subscribed));
    }
}

/// Connector keyed by join token
#[derive(Default)]
pub struct FakeConnector {
    rooms: Mutex<HashMap<String, FakeRoom>>,
    attempts: AtomicUsize,
}

impl FakeConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_room(&self, token: &str, name: &str) -> RoomHandle {
        self.add_delayed_room(token, name, Duration::ZERO)
    }

    /// Room whose join completes after `delay`
    pub fn add_delayed_room(&self, token: &str, name: &str, delay: Duration) -> RoomHandle {
        let session = FakeSession::new(name);
        let (tx, rx) = mpsc::unbounded_channel();
        self.rooms.lock().unwrap().insert(
            token.to_string(),
            FakeRoom::Joinable {
                session: session.clone(),
                events: Some(rx),
                delay,
            },
        );
        RoomHandle {
            session,
            events: tx,
        }
    }

    pub fn refuse(&self, token: &str) {
        self.rooms
            .lock()
            .unwrap()
            .insert(token.to_string(), FakeRoom::Refused);
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RoomConnector for FakeConnector {
    async fn connect(&self, host: &str, token: &str) -> Result<RoomConnection> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        let joined = match self.rooms.lock().unwrap().get_mut(token) {
            Some(FakeRoom::Joinable {
                session,
                events,
                delay,
            }) => events.take().map(|events| (session.clone(), events, *delay)),
            _ => None,
        };

        let Some((session, events, delay)) = joined else {
            return Err(BridgeError::connection(host, "invalid token"));
        };

        tokio::time::sleep(delay).await;
        Ok(RoomConnection { session, events })
    }
}
