//! Wire format for the per-session WebSocket.
//!
//! Outbound frames are always binary PTY output. Inbound frames are raw
//! terminal input unless they parse as a [`ControlMessage`].

use serde::{Deserialize, Serialize};

/// Structured control frame sent by a read-write client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ControlMessage {
    Resize { cols: u16, rows: u16 },
}

/// How an inbound frame from a read-write client is applied.
#[derive(Debug, PartialEq, Eq)]
pub enum Inbound<'a> {
    Control(ControlMessage),
    Input(&'a [u8]),
}

impl<'a> Inbound<'a> {
    /// Classify a frame. Anything that does not parse as a control message,
    /// malformed JSON included, is terminal input.
    pub fn classify(frame: &'a [u8]) -> Self {
        match serde_json::from_slice::<ControlMessage>(frame) {
            Ok(msg) => Inbound::Control(msg),
            Err(_) => Inbound::Input(frame),
        }
    }
}
