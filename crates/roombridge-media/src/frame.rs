use bytes::Bytes;
use webrtc::rtp::packet::Packet;

/// A complete media frame rebuilt from one or more RTP packets
#[derive(Debug, Clone)]
pub struct Frame {
    /// RTP timestamp shared by every packet of the frame
    pub timestamp: u32,
    /// Sequence number of the first packet
    pub first_sequence: u16,
    /// Sequence number of the last packet
    pub last_sequence: u16,
    /// First sequence number unwrapped into a monotonic 64-bit space
    pub extended_sequence: u64,
    /// Sequence positions discarded since the previous frame
    pub dropped_before: u64,
    /// Original packets, in sequence order
    pub packets: Vec<Packet>,
    /// Depacketized payload
    pub data: Bytes,
}

impl Frame {
    /// Number of RTP packets carrying the frame
    pub fn packet_count(&self) -> usize {
        self.packets.len()
    }

    /// Depacketized payload size in bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the payload is empty
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
