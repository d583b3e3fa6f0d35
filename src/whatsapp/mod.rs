//! WhatsApp flavor of the dispatcher.
//!
//! The browser automation lives outside this crate. A [`WhatsAppSession`] is
//! whatever drives it; [`WhatsAppSender`] only needs a session that has
//! reached [`SessionState::Ready`].

pub mod gateway;

pub use gateway::GatewaySession;

use crate::contacts::Contact;
use crate::dispatch::{SendAction, SendFailure};
use crate::template::RenderedMessage;
use async_trait::async_trait;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WhatsAppError {
    #[error("WhatsApp client not ready (state: {0:?}). Please scan QR first.")]
    NotReady(SessionState),
    #[error("WhatsApp session error: {0}")]
    Session(String),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Uninitialized,
    Connecting,
    Ready,
    Disconnected,
}

/// A caller-owned handle to a logged-in WhatsApp Web session.
#[async_trait]
pub trait WhatsAppSession: Send + Sync {
    fn state(&self) -> SessionState;

    async fn is_registered_user(&self, chat_id: &str) -> Result<bool, WhatsAppError>;

    async fn send_message(&self, chat_id: &str, text: &str) -> Result<(), WhatsAppError>;
}

/// `+15551234567` -> `15551234567@c.us`
pub fn chat_id(number: &str) -> String {
    format!("{}@c.us", number.trim_start_matches('+'))
}

pub struct WhatsAppSender<S> {
    session: S,
}

impl<S: WhatsAppSession> WhatsAppSender<S> {
    pub fn new(session: S) -> Result<Self, WhatsAppError> {
        match session.state() {
            SessionState::Ready => Ok(Self { session }),
            other => Err(WhatsAppError::NotReady(other)),
        }
    }

    pub fn session(&self) -> &S {
        &self.session
    }
}

#[async_trait]
impl<S: WhatsAppSession> SendAction<Contact> for WhatsAppSender<S> {
    async fn send_one(&self, contact: &Contact, message: &RenderedMessage) -> Result<(), SendFailure> {
        let id = chat_id(&contact.number);

        let registered = self
            .session
            .is_registered_user(&id)
            .await
            .map_err(|e| SendFailure::transport(e.to_string()))?;
        if !registered {
            debug!("{} is not on WhatsApp", contact.number);
            return Err(SendFailure::rejected(format!(
                "{} not registered",
                contact.number
            )));
        }

        self.session
            .send_message(&id, &message.body)
            .await
            .map_err(|e| {
                warn!("Failed to send to {}: {}", contact.number, e);
                SendFailure::transport(e.to_string())
            })
    }
}
