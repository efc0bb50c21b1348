use crate::models::NotificationMessage;
use crate::notifications::config::{SmtpConfig, TlsMode};
use crate::notifications::error::DeliveryError;
use crate::notifications::transport::DirectTransport;
use async_trait::async_trait;
use lettre::message::{header::ContentType, Mailbox};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Address, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::{debug, info, warn};

/// Reply codes a relay uses to refuse authentication
const AUTH_FAILURE_CODES: [&str; 3] = ["530", "534", "535"];

/// SMTP transport sending each notification in its own session
///
/// Built without connection pooling: every `send` connects, transmits and
/// quits.
#[derive(Clone)]
pub struct SmtpEmailTransport {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    reply_to: Option<Mailbox>,
    host: String,
}

impl SmtpEmailTransport {
    /// Create a transport from static configuration
    ///
    /// Credentials are read from the environment variables named in the
    /// configuration; naming a variable that is not set is an error.
    pub fn new(config: &SmtpConfig) -> Result<Self, DeliveryError> {
        if config.host.is_empty() {
            return Err(DeliveryError::Configuration(
                "SMTP host cannot be empty".to_string(),
            ));
        }

        let from_address: Address = config.from.parse().map_err(|e| {
            DeliveryError::InvalidAddress(format!("from address '{}': {}", config.from, e))
        })?;
        let from = Mailbox::new(config.from_name.clone(), from_address);

        let reply_to = match &config.reply_to {
            Some(reply_to) => Some(reply_to.parse::<Mailbox>().map_err(|e| {
                DeliveryError::InvalidAddress(format!("reply-to address '{}': {}", reply_to, e))
            })?),
            None => None,
        };

        let mut builder = match config.tls {
            TlsMode::None => AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host),
            TlsMode::StartTls => AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
                .map_err(|e| DeliveryError::Configuration(format!("SMTP relay: {}", e)))?,
            TlsMode::Wrapper => AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
                .map_err(|e| DeliveryError::Configuration(format!("SMTP relay: {}", e)))?,
        }
        .port(config.port)
        .timeout(Some(config.timeout()));

        if let Some(credentials) = resolve_credentials(config)? {
            builder = builder.credentials(credentials);
        }

        info!(
            host = %config.host,
            port = config.port,
            tls = ?config.tls,
            "SMTP transport configured"
        );

        Ok(Self {
            mailer: builder.build(),
            from,
            reply_to,
            host: config.host.clone(),
        })
    }

    /// Build the MIME message for one notification
    pub(crate) fn build_message(
        &self,
        notification: &NotificationMessage,
    ) -> Result<Message, DeliveryError> {
        let to: Address = notification.recipient().parse().map_err(|e| {
            DeliveryError::InvalidAddress(format!(
                "recipient '{}': {}",
                notification.recipient(),
                e
            ))
        })?;

        let mut builder = Message::builder()
            .from(self.from.clone())
            .to(Mailbox::new(None, to))
            .subject(notification.subject())
            .header(ContentType::TEXT_HTML);

        if let Some(reply_to) = &self.reply_to {
            builder = builder.reply_to(reply_to.clone());
        }

        builder
            .body(notification.content().to_string())
            .map_err(|e| DeliveryError::Configuration(format!("failed to build message: {}", e)))
    }
}

#[async_trait]
impl DirectTransport for SmtpEmailTransport {
    fn name(&self) -> &'static str {
        "smtp"
    }

    async fn send(&self, notification: &NotificationMessage) -> Result<(), DeliveryError> {
        let message = self.build_message(notification)?;

        match self.mailer.send(message).await {
            Ok(response) => {
                debug!(
                    host = %self.host,
                    recipient = %notification.recipient(),
                    code = %response.code(),
                    "SMTP relay accepted message"
                );
                Ok(())
            }
            Err(e) => {
                let err = classify(&e);
                warn!(
                    host = %self.host,
                    recipient = %notification.recipient(),
                    kind = err.kind(),
                    error = %e,
                    "SMTP send failed"
                );
                Err(err)
            }
        }
    }
}

fn resolve_credentials(config: &SmtpConfig) -> Result<Option<Credentials>, DeliveryError> {
    let (Some(user_env), Some(pass_env)) = (&config.username_env, &config.password_env) else {
        return Ok(None);
    };

    let read = |name: &str| {
        std::env::var(name).map_err(|_| {
            DeliveryError::Configuration(format!("environment variable {} is not set", name))
        })
    };

    Ok(Some(Credentials::new(read(user_env)?, read(pass_env)?)))
}

fn classify(err: &lettre::transport::smtp::Error) -> DeliveryError {
    if err.is_timeout() {
        return DeliveryError::Timeout(err.to_string());
    }

    if let Some(code) = err.status() {
        if AUTH_FAILURE_CODES.contains(&code.to_string().as_str()) {
            return DeliveryError::Authentication(err.to_string());
        }
    }

    if err.is_permanent() {
        DeliveryError::Rejected(err.to_string())
    } else if err.is_transient() {
        DeliveryError::Deferred(err.to_string())
    } else {
        DeliveryError::Network(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_config() -> SmtpConfig {
        SmtpConfig {
            host: "127.0.0.1".to_string(),
            port: 1,
            tls: TlsMode::None,
            from: "test@example.com".to_string(),
            from_name: Some("TestFromName".to_string()),
            reply_to: Some("reply@example.com".to_string()),
            timeout_secs: 2,
            ..Default::default()
        }
    }

    #[test]
    fn test_transport_creation() {
        assert!(SmtpEmailTransport::new(&local_config()).is_ok());
    }

    #[test]
    fn test_empty_host_rejected() {
        let config = SmtpConfig {
            host: String::new(),
            ..local_config()
        };
        assert!(matches!(
            SmtpEmailTransport::new(&config),
            Err(DeliveryError::Configuration(_))
        ));
    }

    #[test]
    fn test_invalid_sender_rejected() {
        let config = SmtpConfig {
            from: "not an address".to_string(),
            ..local_config()
        };
        assert!(matches!(
            SmtpEmailTransport::new(&config),
            Err(DeliveryError::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_missing_credential_variable() {
        let config = SmtpConfig {
            username_env: Some("NOTIFY_RELAY_TEST_UNSET_USER".to_string()),
            password_env: Some("NOTIFY_RELAY_TEST_UNSET_PASS".to_string()),
            ..local_config()
        };
        assert!(matches!(
            SmtpEmailTransport::new(&config),
            Err(DeliveryError::Configuration(_))
        ));
    }

    #[test]
    fn test_build_message_headers() {
        let transport = SmtpEmailTransport::new(&local_config()).unwrap();
        let notification =
            NotificationMessage::new("Welcome", "a@x.com", "<b>Hello</b>").unwrap();

        let message = transport.build_message(&notification).unwrap();
        let formatted = String::from_utf8(message.formatted()).unwrap();

        assert!(formatted.contains("Subject: Welcome"));
        assert!(formatted.contains("To: a@x.com"));
        assert!(formatted.contains("Reply-To: reply@example.com"));
        assert!(formatted.contains("TestFromName"));
        assert!(formatted.contains("text/html"));
        assert!(formatted.contains("<b>Hello</b>"));
    }

    #[tokio::test]
    async fn test_unreachable_relay_is_network_error() {
        let transport = SmtpEmailTransport::new(&local_config()).unwrap();
        let notification = NotificationMessage::new("Welcome", "a@x.com", "Hi").unwrap();

        let result = transport.send(&notification).await;
        assert!(matches!(
            result,
            Err(DeliveryError::Network(_)) | Err(DeliveryError::Timeout(_))
        ));
    }
}
