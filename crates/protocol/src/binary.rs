//! Binary append frame: 4-byte big-endian header length + JSON header + raw chunk.

use sha2::{Digest, Sha256};

use crate::messages::AppendHeader;

/// Computes SHA-256 of a chunk and returns the hex-encoded digest.
///
/// This is the value carried in [`AppendHeader::checksum`].
pub fn checksum_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// A decoded append frame.
#[derive(Debug)]
pub struct AppendFrame {
    pub header: AppendHeader,
    pub data: Vec<u8>,
}

/// Parses a raw binary WebSocket frame into an [`AppendFrame`].
///
/// Wire format: `[4 bytes: header_len (big-endian)][header_len bytes: JSON][rest: payload]`
pub fn parse_append_frame(data: &[u8]) -> Result<AppendFrame, FrameError> {
    if data.len() < 4 {
        return Err(FrameError::TooShort);
    }

    let header_len = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;

    if data.len() - 4 < header_len {
        return Err(FrameError::HeaderTruncated {
            expected: header_len,
            got: data.len() - 4,
        });
    }

    let header_bytes = &data[4..4 + header_len];
    let header: AppendHeader = serde_json::from_slice(header_bytes)
        .map_err(|e| FrameError::InvalidJson(e.to_string()))?;

    Ok(AppendFrame {
        header,
        data: data[4 + header_len..].to_vec(),
    })
}

/// Encodes an append frame for sending over WebSocket.
pub fn encode_append_frame(
    header: &AppendHeader,
    payload: &[u8],
) -> Result<Vec<u8>, serde_json::Error> {
    let header_json = serde_json::to_vec(header)?;
    let header_len = header_json.len() as u32;

    let mut buf = Vec::with_capacity(4 + header_json.len() + payload.len());
    buf.extend_from_slice(&header_len.to_be_bytes());
    buf.extend_from_slice(&header_json);
    buf.extend_from_slice(payload);
    Ok(buf)
}

/// Errors from binary frame parsing.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame too short (need at least 4 bytes)")]
    TooShort,

    #[error("header truncated: expected {expected} bytes, got {got}")]
    HeaderTruncated { expected: usize, got: usize },

    #[error("invalid header JSON: {0}")]
    InvalidJson(String),
}
