//! Control messages
//!
//! JSON text frames tagged by `type`, interleaved on the same ordered channel
//! as raw binary chunk frames.

use serde::{Deserialize, Serialize};

use crate::errors::ProtocolError;
use crate::protocol::file_transfer::{FileId, FileMetadata};
use crate::types::DeviceCode;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ControlMessage {
    /// Sent by the dialing side as soon as its channel opens
    #[serde(rename_all = "camelCase")]
    PairRequest {
        from: DeviceCode,
        claims_trusted: bool,
    },
    PairAccept {
        from: DeviceCode,
    },
    PairReject,
    #[serde(rename_all = "camelCase")]
    FileStart {
        file_id: FileId,
        name: String,
        size: u64,
        mime_type: String,
        chunk_count: u64,
    },
    #[serde(rename_all = "camelCase")]
    FileEnd { file_id: FileId },
    /// Sender aborted the file; the receiver drops its partial transfer
    #[serde(rename_all = "camelCase")]
    FileCancel { file_id: FileId },
}

impl ControlMessage {
    pub fn file_start(metadata: &FileMetadata) -> Self {
        ControlMessage::FileStart {
            file_id: metadata.file_id.clone(),
            name: metadata.name.clone(),
            size: metadata.size,
            mime_type: metadata.mime_type.clone(),
            chunk_count: metadata.chunk_count,
        }
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Malformed {
            reason: e.to_string(),
        })
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::Malformed {
            reason: e.to_string(),
        })
    }

    /// Message name as it appears in the `type` field
    pub fn kind(&self) -> &'static str {
        match self {
            ControlMessage::PairRequest { .. } => "pair-request",
            ControlMessage::PairAccept { .. } => "pair-accept",
            ControlMessage::PairReject => "pair-reject",
            ControlMessage::FileStart { .. } => "file-start",
            ControlMessage::FileEnd { .. } => "file-end",
            ControlMessage::FileCancel { .. } => "file-cancel",
        }
    }
}
