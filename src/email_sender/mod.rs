//! Email flavors: recipient validation plus the SMTP and Gmail send actions.

pub mod gmail;
pub mod smtp;

pub use gmail::GmailSender;
pub use smtp::SmtpSender;

use crate::dispatch::DispatchTarget;
use crate::template::{MessageTemplate, RenderedMessage};
use lettre::{
    address::AddressError,
    error::Error as LettreError,
    message::{Mailbox, MultiPart},
    Message,
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use thiserror::Error;

static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap());
static HTML_TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").unwrap());

// --- Error Handling ---
#[derive(Error, Debug)]
pub enum EmailError {
    #[error("Failed to parse email address: {0}")]
    Address(#[from] AddressError),

    #[error("Failed to build email message: {0}")]
    MessageBuild(#[from] LettreError),

    #[error("Failed to create SMTP transport: {0}")]
    TransportCreation(lettre::transport::smtp::Error),

    #[error("SMTP server rejected the connection check: {0}")]
    Verify(String),

    #[error("Configuration error for TLS: {0}")]
    TlsConfig(String),

    #[error("Gmail authentication failed: {0}")]
    Auth(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("General configuration error: {0}")]
    ConfigError(String),
}

/// Problems that stop an email batch before anything is sent.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Please enter at least one email address")]
    NoRecipients,
    #[error("Please enter a subject")]
    MissingSubject,
    #[error("Please enter a message")]
    MissingMessage,
    #[error("Invalid email addresses found: {}", .0.join(", "))]
    InvalidAddresses(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailRecipient {
    pub address: String,
}

impl DispatchTarget for EmailRecipient {
    fn label(&self) -> &str {
        &self.address
    }
}

pub fn is_valid_address(address: &str) -> bool {
    EMAIL_RE.is_match(address)
}

/// One address per line; blank lines are ignored.
pub fn parse_recipients(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

/// Rejects the whole list if any address is malformed, naming every bad one.
pub fn validate_recipients(addresses: &[String]) -> Result<Vec<EmailRecipient>, ValidationError> {
    if addresses.is_empty() {
        return Err(ValidationError::NoRecipients);
    }

    let invalid: Vec<String> = addresses
        .iter()
        .filter(|a| !is_valid_address(a.trim()))
        .cloned()
        .collect();
    if !invalid.is_empty() {
        return Err(ValidationError::InvalidAddresses(invalid));
    }

    Ok(addresses
        .iter()
        .map(|a| EmailRecipient {
            address: a.trim().to_string(),
        })
        .collect())
}

/// Checks a pasted recipient list and composed email before dispatch.
pub fn validate_batch(
    recipients_text: &str,
    template: &MessageTemplate,
) -> Result<Vec<EmailRecipient>, ValidationError> {
    let addresses = parse_recipients(recipients_text);
    if addresses.is_empty() {
        return Err(ValidationError::NoRecipients);
    }
    if template.subject_is_blank() {
        return Err(ValidationError::MissingSubject);
    }
    if template.body_is_blank() {
        return Err(ValidationError::MissingMessage);
    }
    validate_recipients(&addresses)
}

pub(crate) fn strip_html(html: &str) -> String {
    HTML_TAG_RE.replace_all(html, "").into_owned()
}

pub(crate) fn sender_mailbox(from_email: &str, name: Option<&str>) -> Result<Mailbox, EmailError> {
    Ok(Mailbox::new(
        name.map(str::to_string).filter(|n| !n.trim().is_empty()),
        from_email.parse()?,
    ))
}

/// Builds the HTML message with a tag-stripped plain-text alternative.
pub(crate) fn build_message(
    from: &Mailbox,
    to: &EmailRecipient,
    rendered: &RenderedMessage,
) -> Result<Message, EmailError> {
    let email = Message::builder()
        .from(from.clone())
        .to(to.address.parse()?)
        .subject(rendered.subject.clone().unwrap_or_default())
        .multipart(MultiPart::alternative_plain_html(
            strip_html(&rendered.body),
            rendered.body.clone(),
        ))?;
    Ok(email)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template(subject: &str, body: &str) -> MessageTemplate {
        MessageTemplate::from_content(Some(subject), body, "t").unwrap()
    }

    #[test]
    fn invalid_addresses_reject_the_batch() {
        let err = validate_batch("a@x.com\nnot-an-email\nb@x.com", &template("Hi", "Body")).unwrap_err();
        assert_eq!(err, ValidationError::InvalidAddresses(vec!["not-an-email".into()]));
        assert_eq!(err.to_string(), "Invalid email addresses found: not-an-email");
    }

    #[test]
    fn every_bad_address_is_listed() {
        let err = validate_batch("x@\n@y.com\nok@z.io\nspace y@z.io", &template("Hi", "Body")).unwrap_err();
        assert_eq!(
            err,
            ValidationError::InvalidAddresses(vec!["x@".into(), "@y.com".into(), "space y@z.io".into()])
        );
    }

    #[test]
    fn valid_batch_keeps_order_and_duplicates() {
        let recipients =
            validate_batch("  b@x.com \n\na@x.com\nb@x.com", &template("Hi", "Body")).unwrap();
        let addresses: Vec<_> = recipients.iter().map(|r| r.address.as_str()).collect();
        assert_eq!(addresses, vec!["b@x.com", "a@x.com", "b@x.com"]);
    }

    #[test]
    fn empty_fields_are_rejected() {
        assert_eq!(
            validate_batch("\n  \n", &template("Hi", "Body")).unwrap_err(),
            ValidationError::NoRecipients
        );
        assert_eq!(
            validate_batch("a@x.com", &template("  ", "Body")).unwrap_err(),
            ValidationError::MissingSubject
        );
        assert_eq!(
            validate_batch("a@x.com", &template("Hi", " ")).unwrap_err(),
            ValidationError::MissingMessage
        );
    }

    #[test]
    fn strips_tags_for_plain_text() {
        assert_eq!(strip_html("<p>Hello <b>there</b></p>"), "Hello there");
    }

    #[test]
    fn builds_multipart_message() {
        let from = sender_mailbox("me@example.com", Some("Me")).unwrap();
        let to = EmailRecipient {
            address: "you@example.com".into(),
        };
        let rendered = RenderedMessage {
            subject: Some("Greetings".into()),
            body: "<p>Hi</p>".into(),
        };
        let formatted = String::from_utf8(build_message(&from, &to, &rendered).unwrap().formatted()).unwrap();
        assert!(formatted.contains("To: you@example.com"));
        assert!(formatted.contains("Subject: Greetings"));
        assert!(formatted.contains("multipart/alternative"));
    }
}
