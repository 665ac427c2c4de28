//! Frame reassembly (jitter buffer)
//!
//! Packets are buffered by sequence number inside a window of `max_late`
//! packets behind the newest one. Frames are emitted strictly in sequence
//! order once every packet from the playout head up to the frame's terminal
//! packet is present. When the window moves past positions that were never
//! emitted, those positions are evicted as one loss event and playout resumes
//! at the next buffered frame start.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;

use webrtc::rtp::packet::Packet;

use crate::codec::{FrameCodec, MediaKind};
use crate::frame::Frame;

/// Extended sequence numbers start here so that packets arriving before the
/// very first one still unwrap without underflow
const SEQUENCE_ORIGIN: u64 = 1 << 32;

/// Invoked once per loss event on video buffers
pub type LossHandler = Box<dyn FnMut() + Send>;

struct PartialFrame {
    start: u64,
    timestamp: u32,
    packets: Vec<Packet>,
}

/// Bounded reordering buffer turning RTP packets into complete frames
pub struct FrameReassembler {
    codec: Box<dyn FrameCodec>,
    max_late: u16,
    buffer: BTreeMap<u64, Packet>,
    highest: Option<u64>,
    /// Next extended sequence number to hand to the codec
    head: Option<u64>,
    partial: Option<PartialFrame>,
    /// Frames completed while making room in the window, not yet popped
    ready: VecDeque<Frame>,
    dropped: u64,
    loss_events: u64,
    on_loss: Option<LossHandler>,
}

impl FrameReassembler {
    /// Create a reassembler; a `max_late` of zero is treated as one
    pub fn new(codec: Box<dyn FrameCodec>, max_late: u16) -> Self {
        Self {
            codec,
            max_late: max_late.max(1),
            buffer: BTreeMap::new(),
            highest: None,
            head: None,
            partial: None,
            ready: VecDeque::new(),
            dropped: 0,
            loss_events: 0,
            on_loss: None,
        }
    }

    /// Register the loss-recovery callback
    ///
    /// Only video buffers invoke it; audio loss is concealed by the decoder.
    pub fn with_loss_handler<F>(mut self, handler: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        self.on_loss = Some(Box::new(handler));
        self
    }

    /// Media kind of the codec
    pub fn kind(&self) -> MediaKind {
        self.codec.kind()
    }

    /// Mime type of the codec
    pub fn mime_type(&self) -> &'static str {
        self.codec.mime_type()
    }

    /// Window size, in packets
    pub fn max_late(&self) -> u16 {
        self.max_late
    }

    /// Number of packets currently waiting in the window
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Loss events recorded so far
    pub fn loss_events(&self) -> u64 {
        self.loss_events
    }

    /// Insert a packet
    ///
    /// Duplicates, packets behind the playout head and packets older than the
    /// window are discarded.
    pub fn push(&mut self, packet: Packet) {
        let sequence = self.extend_sequence(packet.header.sequence_number);

        if self.head.is_some_and(|head| sequence < head) {
            tracing::trace!(
                "Discarding packet {} behind playout head",
                packet.header.sequence_number
            );
            return;
        }

        if let Some(highest) = self.highest {
            if sequence + self.window() <= highest {
                tracing::trace!(
                    "Discarding packet {} older than lateness window",
                    packet.header.sequence_number
                );
                return;
            }
        }

        if self.buffer.contains_key(&sequence) {
            tracing::trace!("Duplicate packet {}", packet.header.sequence_number);
            return;
        }

        self.buffer.insert(sequence, packet);
        if self.highest.is_none_or(|highest| sequence > highest) {
            self.highest = Some(sequence);
        }

        self.enforce_window();
    }

    /// Frames that are ready, in ascending sequence order
    ///
    /// The iterator is lazy; an empty iterator only means the next frame is
    /// still incomplete.
    pub fn pop(&mut self) -> Pop<'_> {
        Pop { reassembler: self }
    }

    fn window(&self) -> u64 {
        u64::from(self.max_late)
    }

    fn extend_sequence(&self, sequence: u16) -> u64 {
        match self.highest {
            None => SEQUENCE_ORIGIN + u64::from(sequence),
            Some(highest) => {
                let delta = sequence.wrapping_sub(highest as u16) as i16;
                highest.wrapping_add_signed(i64::from(delta))
            }
        }
    }

    fn first_pending(&self) -> Option<u64> {
        self.head.or_else(|| self.buffer.keys().next().copied())
    }

    fn is_stale(&self, floor: u64) -> bool {
        self.first_pending().is_some_and(|head| head < floor)
            || self.partial.as_ref().is_some_and(|partial| partial.start < floor)
    }

    fn enforce_window(&mut self) {
        let Some(highest) = self.highest else {
            return;
        };
        let floor = (highest + 1).saturating_sub(self.window());
        if !self.is_stale(floor) {
            return;
        }

        // Complete frames are never sacrificed to eviction
        while let Some(frame) = self.next_frame() {
            self.ready.push_back(frame);
        }
        if !self.is_stale(floor) {
            return;
        }

        self.evict(floor, highest);
    }

    fn evict(&mut self, floor: u64, highest: u64) {
        let head = self.first_pending().unwrap_or(floor);
        let mut dropped = 0;

        if let Some(partial) = self.partial.take() {
            dropped += partial.packets.len() as u64;
            self.codec.reset();
        }

        let mut retained = self.buffer.split_off(&head.max(floor));
        let resume = retained
            .iter()
            .find(|(_, packet)| self.codec.is_frame_start(packet))
            .map_or(highest + 1, |(sequence, _)| *sequence);
        self.buffer = retained.split_off(&resume);
        self.head = Some(resume);
        dropped += resume - head;

        tracing::debug!(
            "Lateness window exceeded for {}, evicted {} packets ({} still buffered)",
            self.codec.mime_type(),
            dropped,
            self.buffer.len()
        );
        self.record_loss(dropped);
    }

    fn record_loss(&mut self, dropped: u64) {
        self.dropped += dropped;
        self.loss_events += 1;

        if self.codec.kind() == MediaKind::Video {
            if let Some(handler) = self.on_loss.as_mut() {
                handler();
            }
        }
    }

    /// Before the first frame, playout waits until a frame start is buffered
    ///
    /// Fragments ahead of the earliest start are discarded. Until a start
    /// shows up they stay buffered and only the window can evict them.
    fn anchor(&mut self) -> bool {
        let Some(start) = self
            .buffer
            .iter()
            .find(|(_, packet)| self.codec.is_frame_start(packet))
            .map(|(sequence, _)| *sequence)
        else {
            return false;
        };

        let retained = self.buffer.split_off(&start);
        let skipped = std::mem::replace(&mut self.buffer, retained).len();
        self.dropped += skipped as u64;
        self.head = Some(start);
        true
    }

    fn next_frame(&mut self) -> Option<Frame> {
        if self.head.is_none() && !self.anchor() {
            return None;
        }

        loop {
            let head = self.first_pending()?;
            let packet = self.buffer.remove(&head)?;
            self.head = Some(head + 1);

            let is_start = self.codec.is_frame_start(&packet);

            // A new frame began before the previous one saw its terminal packet
            if is_start
                && self
                    .partial
                    .as_ref()
                    .is_some_and(|partial| partial.timestamp != packet.header.timestamp)
            {
                let dropped = self.partial.take().map_or(0, |p| p.packets.len() as u64);
                self.codec.reset();
                self.record_loss(dropped);
            }

            if self.partial.is_none() {
                if !is_start {
                    self.dropped += 1;
                    continue;
                }
                self.partial = Some(PartialFrame {
                    start: head,
                    timestamp: packet.header.timestamp,
                    packets: Vec::new(),
                });
            }

            if let Err(e) = self.codec.consume(&packet) {
                tracing::debug!("Dropping malformed frame: {}", e);
                let dropped = self.partial.take().map_or(0, |p| p.packets.len() as u64) + 1;
                self.codec.reset();
                self.record_loss(dropped);
                continue;
            }

            if let Some(partial) = self.partial.as_mut() {
                partial.packets.push(packet);
            }

            if self.codec.frame_complete() {
                if let Some(partial) = self.partial.take() {
                    return Some(self.finish(partial));
                }
            }
        }
    }

    fn finish(&mut self, partial: PartialFrame) -> Frame {
        let data = self.codec.emit_frame();
        let first_sequence = partial
            .packets
            .first()
            .map_or(0, |p| p.header.sequence_number);
        let last_sequence = partial
            .packets
            .last()
            .map_or(first_sequence, |p| p.header.sequence_number);

        Frame {
            timestamp: partial.timestamp,
            first_sequence,
            last_sequence,
            extended_sequence: partial.start,
            dropped_before: std::mem::take(&mut self.dropped),
            packets: partial.packets,
            data,
        }
    }
}

impl fmt::Debug for FrameReassembler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameReassembler")
            .field("mime_type", &self.codec.mime_type())
            .field("max_late", &self.max_late)
            .field("buffered", &self.buffer.len())
            .field("head", &self.head)
            .field("loss_events", &self.loss_events)
            .finish()
    }
}

/// Iterator returned by [`FrameReassembler::pop`]
pub struct Pop<'a> {
    reassembler: &'a mut FrameReassembler,
}

impl Iterator for Pop<'_> {
    type Item = Frame;

    fn next(&mut self) -> Option<Frame> {
        if let Some(frame) = self.reassembler.ready.pop_front() {
            return Some(frame);
        }
        self.reassembler.next_frame()
    }
}
