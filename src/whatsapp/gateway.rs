use super::{SessionState, WhatsAppError, WhatsAppSession};
use async_trait::async_trait;
use log::{info, warn};
use reqwest::Client as HttpClient;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;

#[derive(Debug, Deserialize)]
struct StatusResponse {
    state: SessionState,
}

#[derive(Debug, Deserialize)]
struct RegisteredResponse {
    registered: bool,
}

/// Talks to a local WhatsApp Web bridge over HTTP.
///
/// Bridge endpoints:
/// * `GET  /status` -> `{"state": "ready"}`
/// * `GET  /contacts/{chat_id}/registered` -> `{"registered": true}`
/// * `POST /messages` with `{"chatId": ..., "text": ...}`
pub struct GatewaySession {
    http: HttpClient,
    base_url: String,
    api_key: Option<SecretString>,
    state: SessionState,
}

impl GatewaySession {
    pub fn new(base_url: &str, api_key: Option<SecretString>) -> Self {
        Self {
            http: HttpClient::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            state: SessionState::Uninitialized,
        }
    }

    fn with_auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => req.header("x-api-key", key.expose_secret()),
            None => req,
        }
    }

    /// Asks the bridge whether its browser session is logged in.
    pub async fn connect(&mut self) -> Result<SessionState, WhatsAppError> {
        self.state = SessionState::Connecting;
        let endpoint = format!("{}/status", self.base_url);

        let status: Result<StatusResponse, reqwest::Error> = async {
            let resp = self
                .with_auth(self.http.get(&endpoint))
                .send()
                .await?
                .error_for_status()?;
            resp.json::<StatusResponse>().await
        }
        .await;

        let reported = match status {
            Ok(StatusResponse { state }) => state,
            Err(e) => {
                self.state = SessionState::Disconnected;
                return Err(e.into());
            }
        };
        if reported != SessionState::Ready {
            warn!("WhatsApp bridge reports {:?}", reported);
        }
        self.state = match reported {
            SessionState::Ready => SessionState::Ready,
            _ => SessionState::Disconnected,
        };
        info!("WhatsApp session state: {:?}", self.state);
        Ok(self.state)
    }
}

#[async_trait]
impl WhatsAppSession for GatewaySession {
    fn state(&self) -> SessionState {
        self.state
    }

    async fn is_registered_user(&self, chat_id: &str) -> Result<bool, WhatsAppError> {
        let endpoint = format!("{}/contacts/{}/registered", self.base_url, chat_id);
        let resp = self
            .with_auth(self.http.get(&endpoint))
            .send()
            .await?
            .error_for_status()?;
        Ok(resp.json::<RegisteredResponse>().await?.registered)
    }

    async fn send_message(&self, chat_id: &str, text: &str) -> Result<(), WhatsAppError> {
        let endpoint = format!("{}/messages", self.base_url);
        let resp = self
            .with_auth(self.http.post(&endpoint))
            .json(&json!({ "chatId": chat_id, "text": text }))
            .send()
            .await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(WhatsAppError::Session(format!(
                "HTTP {}: {}",
                status,
                body.trim()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn mount_status(server: &MockServer, state: &str) {
        Mock::given(method("GET"))
            .and(path("/status"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "state": state })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn connects_when_bridge_is_ready() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/status"))
            .and(header("x-api-key", "k"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "state": "ready" })))
            .mount(&server)
            .await;

        let mut session = GatewaySession::new(&server.uri(), Some(SecretString::new("k".into())));
        assert_eq!(session.state(), SessionState::Uninitialized);
        assert_eq!(session.connect().await.unwrap(), SessionState::Ready);
        assert_eq!(session.state(), SessionState::Ready);
    }

    #[tokio::test]
    async fn logged_out_bridge_is_disconnected() {
        let server = MockServer::start().await;
        mount_status(&server, "connecting").await;

        let mut session = GatewaySession::new(&server.uri(), None);
        assert_eq!(session.connect().await.unwrap(), SessionState::Disconnected);
    }

    #[tokio::test]
    async fn unreachable_bridge_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let mut session = GatewaySession::new(&server.uri(), None);
        assert!(session.connect().await.is_err());
        assert_eq!(session.state(), SessionState::Disconnected);
    }

    #[tokio::test]
    async fn checks_registration_and_sends() {
        let server = MockServer::start().await;
        mount_status(&server, "ready").await;
        Mock::given(method("GET"))
            .and(path("/contacts/15551234567@c.us/registered"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "registered": true })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/messages"))
            .and(body_json(json!({ "chatId": "15551234567@c.us", "text": "hi" })))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        let mut session = GatewaySession::new(&format!("{}/", server.uri()), None);
        session.connect().await.unwrap();
        assert!(session.is_registered_user("15551234567@c.us").await.unwrap());
        session.send_message("15551234567@c.us", "hi").await.unwrap();
    }

    #[tokio::test]
    async fn failed_send_carries_bridge_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/messages"))
            .respond_with(ResponseTemplate::new(500).set_body_string("page crashed"))
            .mount(&server)
            .await;

        let session = GatewaySession::new(&server.uri(), None);
        let err = session.send_message("1@c.us", "hi").await.unwrap_err();
        assert!(err.to_string().contains("page crashed"));
    }
}
