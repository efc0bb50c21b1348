//! Queue wire codec for notification messages
//!
//! Messages travel as UTF-8 JSON objects with exactly three fields:
//!
//! ```text
//! {"Subject":"Welcome","Email":"a@x.com","Content":"<b>Hi</b>"}
//! ```
//!
//! Decoding is strict: unknown or missing fields, non-UTF-8 input and values
//! that fail message validation are all rejected.

use crate::messaging::error::{MessagingError, MessagingResult};
use crate::models::NotificationMessage;
use validator::Validate;

/// Serialize a notification into its queue payload
pub fn encode(message: &NotificationMessage) -> MessagingResult<Vec<u8>> {
    serde_json::to_vec(message).map_err(|e| MessagingError::Encoding(e.to_string()))
}

/// Parse a queue payload back into a notification
pub fn decode(payload: &[u8]) -> MessagingResult<NotificationMessage> {
    let text = std::str::from_utf8(payload)
        .map_err(|e| MessagingError::Decoding(format!("payload is not UTF-8: {}", e)))?;

    let message: NotificationMessage =
        serde_json::from_str(text).map_err(|e| MessagingError::Decoding(e.to_string()))?;

    message
        .validate()
        .map_err(|e| MessagingError::Decoding(format!("invalid notification: {}", e)))?;

    Ok(message)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> NotificationMessage {
        NotificationMessage::new("Welcome", "a@x.com", "<p>Hi &amp; welcome</p>").unwrap()
    }

    #[test]
    fn test_round_trip() {
        let message = sample();
        let bytes = encode(&message).unwrap();
        assert_eq!(decode(&bytes).unwrap(), message);
    }

    #[test]
    fn test_round_trip_unicode() {
        let message = NotificationMessage::new("Zahlung bestätigt ✓", "kunde@example.de", "ü\n\"q\"").unwrap();
        let bytes = encode(&message).unwrap();
        assert_eq!(decode(&bytes).unwrap(), message);
    }

    #[test]
    fn test_wire_field_names() {
        let bytes = encode(&sample()).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["Subject"], "Welcome");
        assert_eq!(value["Email"], "a@x.com");
        assert!(value["Content"].is_string());
    }

    #[test]
    fn test_encoding_is_deterministic() {
        assert_eq!(encode(&sample()).unwrap(), encode(&sample()).unwrap());
    }

    #[test]
    fn test_rejects_truncated_payload() {
        let bytes = encode(&sample()).unwrap();
        let result = decode(&bytes[..bytes.len() / 2]);
        assert!(matches!(result, Err(MessagingError::Decoding(_))));
    }

    #[test]
    fn test_rejects_non_utf8() {
        let result = decode(&[0xff, 0xfe, 0x00]);
        assert!(matches!(result, Err(MessagingError::Decoding(_))));
    }

    #[test]
    fn test_rejects_missing_field() {
        let result = decode(br#"{"Subject":"Welcome","Email":"a@x.com"}"#);
        assert!(matches!(result, Err(MessagingError::Decoding(_))));
    }

    #[test]
    fn test_rejects_foreign_payload() {
        let result = decode(br#"{"event":"user.created","user_id":"u-001"}"#);
        assert!(matches!(result, Err(MessagingError::Decoding(_))));
    }

    #[test]
    fn test_rejects_unknown_field() {
        let result =
            decode(br#"{"Subject":"a","Email":"a@x.com","Content":"c","Priority":1}"#);
        assert!(matches!(result, Err(MessagingError::Decoding(_))));
    }

    #[test]
    fn test_rejects_invalid_recipient() {
        let result = decode(br#"{"Subject":"a","Email":"nobody","Content":"c"}"#);
        assert!(matches!(result, Err(MessagingError::Decoding(_))));
    }

    #[test]
    fn test_rejects_empty_subject() {
        let result = decode(br#"{"Subject":"","Email":"a@x.com","Content":"c"}"#);
        assert!(matches!(result, Err(MessagingError::Decoding(_))));
    }
}
