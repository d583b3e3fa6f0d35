use super::{build_message, sender_mailbox, EmailError, EmailRecipient};
use crate::config::SmtpConfig;
use crate::dispatch::{SendAction, SendFailure};
use crate::template::RenderedMessage;
use async_trait::async_trait;
use lettre::{
    message::Mailbox,
    transport::smtp::{
        authentication::Credentials,
        client::{Tls, TlsParameters},
    },
    AsyncSmtpTransport, AsyncTransport, Tokio1Executor,
};
use log::{debug, info, warn};

/// Sends each message over one pooled SMTP transport.
pub struct SmtpSender {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpSender {
    pub fn new(smtp_config: &SmtpConfig) -> Result<Self, EmailError> {
        if smtp_config.host.is_empty() || smtp_config.user.is_empty() {
            return Err(EmailError::ConfigError(
                "Incomplete SMTP configuration".to_string(),
            ));
        }

        let password = smtp_config.resolve_password()?;
        if password.is_empty() {
            return Err(EmailError::ConfigError(
                "Incomplete SMTP configuration".to_string(),
            ));
        }
        let creds = Credentials::new(smtp_config.user.clone(), password);

        let tls_parameters = TlsParameters::new(smtp_config.host.clone())
            .map_err(|e| EmailError::TlsConfig(format!("Invalid SMTP host for TLS: {}", e)))?;
        // Implicit TLS (465) when `secure`, STARTTLS otherwise.
        let tls = if smtp_config.secure {
            Tls::Wrapper(tls_parameters)
        } else {
            Tls::Required(tls_parameters)
        };

        let transport = AsyncSmtpTransport::<Tokio1Executor>::relay(&smtp_config.host)
            .map_err(EmailError::TransportCreation)?
            .port(smtp_config.port)
            .credentials(creds)
            .tls(tls)
            .build();

        let from_address = smtp_config.from_email.as_deref().unwrap_or(&smtp_config.user);
        let from = sender_mailbox(from_address, smtp_config.sender_name.as_deref())?;

        Ok(Self { transport, from })
    }

    /// Opens a connection once so a bad server fails the run up front.
    pub async fn verify(&self) -> Result<(), EmailError> {
        match self.transport.test_connection().await {
            Ok(true) => {
                info!("SMTP connection verified");
                Ok(())
            }
            Ok(false) => Err(EmailError::Verify(
                "server did not accept the connection".to_string(),
            )),
            Err(e) => Err(EmailError::Verify(e.to_string())),
        }
    }
}

#[async_trait]
impl SendAction<EmailRecipient> for SmtpSender {
    async fn send_one(
        &self,
        recipient: &EmailRecipient,
        message: &RenderedMessage,
    ) -> Result<(), SendFailure> {
        let email = build_message(&self.from, recipient, message)
            .map_err(|e| SendFailure::rejected(e.to_string()))?;

        match self.transport.send(email).await {
            Ok(_) => {
                debug!("Email sent successfully to {}", recipient.address);
                Ok(())
            }
            Err(e) if e.is_permanent() => {
                warn!("Server refused {}: {}", recipient.address, e);
                Err(SendFailure::rejected(e.to_string()))
            }
            Err(e) => {
                warn!("Error sending email to {}: {}", recipient.address, e);
                Err(SendFailure::transport(e.to_string()))
            }
        }
    }
}
