use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationErrors};

/// Outbound e-mail notification carried through the queue
///
/// Fields are private so a message cannot change between construction and
/// delivery. The serialized field names (`Subject`, `Email`, `Content`) are the
/// queue wire format and must stay stable across releases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct NotificationMessage {
    #[serde(rename = "Subject")]
    #[validate(length(min = 1, message = "subject must not be empty"))]
    subject: String,

    #[serde(rename = "Email")]
    #[validate(email(message = "recipient must be a valid e-mail address"))]
    recipient: String,

    #[serde(rename = "Content")]
    content: String,
}

impl NotificationMessage {
    /// Create a new validated notification
    pub fn new(
        subject: impl Into<String>,
        recipient: impl Into<String>,
        content: impl Into<String>,
    ) -> Result<Self, ValidationErrors> {
        let message = Self {
            subject: subject.into(),
            recipient: recipient.into(),
            content: content.into(),
        };
        message.validate()?;
        Ok(message)
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn recipient(&self) -> &str {
        &self.recipient
    }

    /// HTML body fragment
    pub fn content(&self) -> &str {
        &self.content
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_message() {
        let message = NotificationMessage::new("Welcome", "a@x.com", "Hi").unwrap();
        assert_eq!(message.subject(), "Welcome");
        assert_eq!(message.recipient(), "a@x.com");
        assert_eq!(message.content(), "Hi");
    }

    #[test]
    fn test_empty_subject_rejected() {
        let result = NotificationMessage::new("", "a@x.com", "Hi");
        let errors = result.unwrap_err();
        assert!(errors.field_errors().contains_key("subject"));
    }

    #[test]
    fn test_invalid_recipient_rejected() {
        let result = NotificationMessage::new("Welcome", "not-an-address", "Hi");
        let errors = result.unwrap_err();
        assert!(errors.field_errors().contains_key("recipient"));
    }

    #[test]
    fn test_empty_content_allowed() {
        assert!(NotificationMessage::new("Ping", "ops@example.com", "").is_ok());
    }
}
