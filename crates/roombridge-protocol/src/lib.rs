//! Shared signaling protocol for roombridge
//!
//! Defines the JSON messages exchanged with a room server over WebSocket
//! while joining a room, negotiating the peer connection and trickling ICE.

pub mod messages;
pub mod types;

pub use messages::*;
pub use types::*;
