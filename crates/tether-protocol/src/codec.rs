//! JSON codec for tether messages.
//!
//! Inbound frames are bounded by [`MAX_FRAME_SIZE`]; anything larger is a hard
//! error and the transport is expected to close the connection.

use thiserror::Error;

use crate::command::{ClientCommand, RawCommand};
use crate::event::Event;

/// Maximum inbound frame size (4 KiB).
pub const MAX_FRAME_SIZE: usize = 4096;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds maximum size.
    #[error("Frame size {0} exceeds maximum {MAX_FRAME_SIZE}")]
    FrameTooLarge(usize),

    /// The frame is not a JSON envelope.
    #[error("Malformed frame: {0}")]
    Json(#[from] serde_json::Error),

    /// The envelope is valid but the payload does not fit the command.
    #[error("Invalid {command} payload: {source}")]
    InvalidPayload {
        command: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// Encode an event to its text frame.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode(event: &Event) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(event)?)
}

/// Decode a client command from a text frame.
///
/// # Errors
///
/// Returns an error if the frame is too large, is not a JSON envelope, or the
/// payload does not match its type tag.
pub fn decode_command(text: &str) -> Result<ClientCommand, ProtocolError> {
    decode_command_with_limit(text, MAX_FRAME_SIZE)
}

/// Decode a client command with a caller supplied frame limit.
///
/// # Errors
///
/// See [`decode_command`].
pub fn decode_command_with_limit(
    text: &str,
    max_frame_size: usize,
) -> Result<ClientCommand, ProtocolError> {
    if text.len() > max_frame_size {
        return Err(ProtocolError::FrameTooLarge(text.len()));
    }

    let raw: RawCommand = serde_json::from_str(text)?;
    ClientCommand::from_raw(raw)
}

/// Decode an event from a text frame. Used by clients and tests.
///
/// # Errors
///
/// Returns an error if the frame is not a valid event envelope.
pub fn decode_event(text: &str) -> Result<Event, ProtocolError> {
    Ok(serde_json::from_str(text)?)
}
