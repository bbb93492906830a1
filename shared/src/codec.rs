//! JSON codec for MQTT payloads
//!
//! All structured payloads on the bus are UTF-8 JSON. Inbound payloads are
//! size-checked before parsing so a hostile client cannot make the daemon
//! buffer an arbitrarily large request.

use bytes::Bytes;
use serde::Serialize;
use thiserror::Error;

use crate::CommandRequest;

/// Maximum accepted payload size (64 KiB)
pub const MAX_PAYLOAD_SIZE: usize = 64 * 1024;

/// Errors that can occur while encoding/decoding payloads
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("payload too large: {0} bytes (max: {MAX_PAYLOAD_SIZE})")]
    PayloadTooLarge(usize),

    #[error("malformed JSON payload: {0}")]
    Json(#[from] serde_json::Error),
}

/// Decode an inbound RPC request payload
pub fn decode_command(payload: &[u8]) -> Result<CommandRequest, CodecError> {
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(CodecError::PayloadTooLarge(payload.len()));
    }
    Ok(serde_json::from_slice(payload)?)
}

/// Encode any payload type into bytes ready for publication
pub fn encode<T: Serialize>(value: &T) -> Result<Bytes, CodecError> {
    let buf = serde_json::to_vec(value)?;
    if buf.len() > MAX_PAYLOAD_SIZE {
        return Err(CodecError::PayloadTooLarge(buf.len()));
    }
    Ok(Bytes::from(buf))
}
