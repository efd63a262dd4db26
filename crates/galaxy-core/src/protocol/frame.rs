//! Frames carried by a peer channel

use crate::errors::ProtocolError;
use crate::protocol::message::ControlMessage;

/// A single message on a peer channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireFrame {
    /// JSON control message
    Text(String),
    /// Raw chunk bytes
    Binary(Vec<u8>),
}

impl WireFrame {
    /// Encode a control message as a text frame
    pub fn control(message: &ControlMessage) -> Result<Self, ProtocolError> {
        message.encode().map(WireFrame::Text)
    }

    /// Payload size in bytes
    pub fn len(&self) -> usize {
        match self {
            WireFrame::Text(text) => text.len(),
            WireFrame::Binary(bytes) => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Interpret the frame: text frames must parse as control messages
    pub fn decode(self) -> Result<InboundFrame, ProtocolError> {
        match self {
            WireFrame::Text(text) => ControlMessage::decode(&text).map(InboundFrame::Control),
            WireFrame::Binary(bytes) => Ok(InboundFrame::Chunk(bytes)),
        }
    }
}

/// Decoded inbound frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    Control(ControlMessage),
    Chunk(Vec<u8>),
}
