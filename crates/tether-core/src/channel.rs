//! Logical channel identifiers.
//!
//! A channel id is an opaque string naming a broadcast topic: a chat channel,
//! a DM conversation, or a voice channel. The empty id addresses every
//! connection on the instance (a global event) and can never be subscribed to.

/// Maximum channel id length.
pub const MAX_CHANNEL_ID_LENGTH: usize = 256;

/// A channel identifier.
pub type ChannelId = String;

/// The channel id of global events.
pub const GLOBAL: &str = "";

/// Whether a channel id addresses every connection.
#[must_use]
pub fn is_global(channel_id: &str) -> bool {
    channel_id.is_empty()
}

/// Validate a channel id supplied by a client.
///
/// # Errors
///
/// Returns an error message if the id is empty, too long, or contains
/// control characters.
pub fn validate_channel_id(channel_id: &str) -> Result<(), &'static str> {
    if channel_id.is_empty() {
        return Err("Channel id cannot be empty");
    }
    if channel_id.len() > MAX_CHANNEL_ID_LENGTH {
        return Err("Channel id too long");
    }
    if channel_id.chars().any(char::is_control) {
        return Err("Channel id contains invalid characters");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_channel_id() {
        assert!(validate_channel_id("3f7c9a52-7f4e-4b43-9a44-2b1f8f0f1d2e").is_ok());
        assert!(validate_channel_id("").is_err());
        assert!(validate_channel_id(&"x".repeat(MAX_CHANNEL_ID_LENGTH + 1)).is_err());
        assert!(validate_channel_id("bad\nid").is_err());
    }

    #[test]
    fn test_global_channel() {
        assert!(is_global(GLOBAL));
        assert!(!is_global("general"));
    }
}
