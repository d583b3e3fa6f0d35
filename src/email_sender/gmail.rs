use super::{build_message, sender_mailbox, EmailError, EmailRecipient};
use crate::config::GmailConfig;
use crate::dispatch::{SendAction, SendFailure};
use crate::template::RenderedMessage;
use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE, Engine as _};
use hyper_util::client::legacy::connect::Connect;
use lettre::message::Mailbox;
use log::{debug, info, warn};
use secrecy::{ExposeSecret, SecretString};
use yup_oauth2::{
    authenticator::Authenticator, ApplicationSecret, InstalledFlowAuthenticator,
    InstalledFlowReturnMethod,
};

pub const GMAIL_SEND_SCOPE: &str = "https://www.googleapis.com/auth/gmail.send";
pub const GMAIL_SEND_URL: &str = "https://gmail.googleapis.com/gmail/v1/users/me/messages/send";
const GOOGLE_AUTH_URI: &str = "https://accounts.google.com/o/oauth2/auth";
const GOOGLE_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// Something that can hand out a bearer token for the Gmail API.
#[async_trait]
pub trait AccessTokenSource: Send + Sync {
    async fn access_token(&self) -> Result<String, EmailError>;
}

#[async_trait]
impl<C> AccessTokenSource for Authenticator<C>
where
    C: Connect + Clone + Send + Sync + 'static,
{
    async fn access_token(&self) -> Result<String, EmailError> {
        let token = self
            .token(&[GMAIL_SEND_SCOPE])
            .await
            .map_err(|e| EmailError::Auth(e.to_string()))?;
        token
            .token()
            .map(str::to_string)
            .ok_or_else(|| EmailError::Auth("Not authenticated with Gmail".to_string()))
    }
}

/// A token obtained elsewhere, e.g. from `BLASTER__GMAIL__ACCESS_TOKEN`.
pub struct StaticToken(pub SecretString);

#[async_trait]
impl AccessTokenSource for StaticToken {
    async fn access_token(&self) -> Result<String, EmailError> {
        Ok(self.0.expose_secret().to_string())
    }
}

/// Builds the installed-app authenticator. The consent screen only shows up
/// when the token cache is empty or stale.
pub async fn authenticator(config: &GmailConfig) -> Result<Box<dyn AccessTokenSource>, EmailError> {
    if let Some(token) = &config.access_token {
        return Ok(Box::new(StaticToken(token.clone())));
    }

    if config.client_id.is_empty() || config.client_secret.expose_secret().is_empty() {
        return Err(EmailError::ConfigError(
            "Missing Gmail client_id or client_secret".to_string(),
        ));
    }

    let secret = ApplicationSecret {
        client_id: config.client_id.clone(),
        client_secret: config.client_secret.expose_secret().to_string(),
        auth_uri: GOOGLE_AUTH_URI.to_string(),
        token_uri: GOOGLE_TOKEN_URI.to_string(),
        redirect_uris: vec!["http://localhost".to_string()],
        ..Default::default()
    };

    let mut builder =
        InstalledFlowAuthenticator::builder(secret, InstalledFlowReturnMethod::HTTPRedirect);
    if let Some(path) = config.token_cache() {
        debug!("Caching Gmail tokens at {}", path.display());
        builder = builder.persist_tokens_to_disk(path);
    }

    let auth = builder
        .build()
        .await
        .map_err(|e| EmailError::Auth(e.to_string()))?;
    Ok(Box::new(auth))
}

/// Sends through `users.messages.send` with a base64url-encoded RFC 5322 body.
pub struct GmailSender {
    http: reqwest::Client,
    tokens: Box<dyn AccessTokenSource>,
    from: Mailbox,
    endpoint: String,
}

impl GmailSender {
    /// Fetches a token up front; an unauthenticated sender never starts a batch.
    pub async fn connect(
        tokens: Box<dyn AccessTokenSource>,
        from_email: &str,
        sender_name: Option<&str>,
    ) -> Result<Self, EmailError> {
        tokens.access_token().await?;
        info!("Gmail token available");
        Ok(Self {
            http: reqwest::Client::new(),
            tokens,
            from: sender_mailbox(from_email, sender_name)?,
            endpoint: GMAIL_SEND_URL.to_string(),
        })
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[async_trait]
impl SendAction<EmailRecipient> for GmailSender {
    async fn send_one(
        &self,
        recipient: &EmailRecipient,
        message: &RenderedMessage,
    ) -> Result<(), SendFailure> {
        let email = build_message(&self.from, recipient, message)
            .map_err(|e| SendFailure::rejected(e.to_string()))?;
        let raw = URL_SAFE.encode(email.formatted());

        let token = self
            .tokens
            .access_token()
            .await
            .map_err(|e| SendFailure::transport(e.to_string()))?;

        let resp = self
            .http
            .post(&self.endpoint)
            .bearer_auth(token)
            .json(&serde_json::json!({ "raw": raw }))
            .send()
            .await
            .map_err(|e| SendFailure::transport(e.to_string()))?;

        let status = resp.status();
        if status.is_success() {
            debug!("Gmail accepted message to {}", recipient.address);
            return Ok(());
        }

        let body = resp.text().await.unwrap_or_default();
        warn!("Failed to send email to {}: HTTP {} {}", recipient.address, status, body);
        let message = format!("HTTP {}: {}", status, body.trim());
        if status.is_client_error() && status != reqwest::StatusCode::TOO_MANY_REQUESTS {
            Err(SendFailure::rejected(message))
        } else {
            Err(SendFailure::transport(message))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::FailureKind;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn sender(server: &MockServer) -> GmailSender {
        let tokens = Box::new(StaticToken(SecretString::new("tok".into())));
        GmailSender::connect(tokens, "me@example.com", None)
            .await
            .unwrap()
            .with_endpoint(format!("{}/send", server.uri()))
    }

    fn recipient() -> EmailRecipient {
        EmailRecipient {
            address: "you@example.com".into(),
        }
    }

    fn rendered() -> RenderedMessage {
        RenderedMessage {
            subject: Some("Hi".into()),
            body: "<p>Hello</p>".into(),
        }
    }

    #[tokio::test]
    async fn posts_raw_message_with_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/send"))
            .and(header("authorization", "Bearer tok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "1"})))
            .expect(1)
            .mount(&server)
            .await;

        sender(&server).await.send_one(&recipient(), &rendered()).await.unwrap();

        let requests = server.received_requests().await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
        let raw = URL_SAFE.decode(body["raw"].as_str().unwrap()).unwrap();
        let raw = String::from_utf8(raw).unwrap();
        assert!(raw.contains("To: you@example.com"));
        assert!(raw.contains("Subject: Hi"));
    }

    #[tokio::test]
    async fn client_errors_are_rejections() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("Invalid To header"))
            .mount(&server)
            .await;

        let failure = sender(&server)
            .await
            .send_one(&recipient(), &rendered())
            .await
            .unwrap_err();
        assert_eq!(failure.kind, FailureKind::Rejected);
        assert!(failure.message.contains("Invalid To header"));
    }

    #[tokio::test]
    async fn server_errors_are_transport_failures() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let failure = sender(&server)
            .await
            .send_one(&recipient(), &rendered())
            .await
            .unwrap_err();
        assert_eq!(failure.kind, FailureKind::Transport);
    }

    #[tokio::test]
    async fn missing_credentials_fail_before_dispatch() {
        let config = GmailConfig {
            client_id: String::new(),
            ..GmailConfig::default()
        };
        assert!(matches!(
            authenticator(&config).await,
            Err(EmailError::ConfigError(_))
        ));
    }
}
