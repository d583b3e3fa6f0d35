use crate::contacts::ContactConfig;
use crate::dispatch::{clamp_delay, BackoffPolicy};
use crate::email_sender::EmailError;
use crate::template::DEFAULT_NAME_FALLBACK;
use config::{Config, ConfigError, Environment, File}; // Use the config crate
use directories_next::ProjectDirs;
use log::debug;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

const KEYRING_SERVICE: &str = "bulk-blaster-smtp";

// Structure for SMTP server configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SmtpConfig {
    pub host: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    pub user: String,
    // Use `secrecy::Secret` for the password to prevent accidental logging
    #[serde(default)] // Make password optional in file if set by env or keyring
    pub password: SecretString,
    /// Defaults to `user`.
    #[serde(default)]
    pub from_email: Option<String>,
    #[serde(default)]
    pub sender_name: Option<String>,
    /// Implicit TLS instead of STARTTLS.
    #[serde(default)]
    pub secure: bool,
    /// Look the password up in the OS keyring when it is not configured.
    #[serde(default)]
    pub use_keyring: bool,
}

fn default_smtp_port() -> u16 {
    587
}

impl SmtpConfig {
    pub fn get_password(&self) -> &str {
        self.password.expose_secret()
    }

    /// The configured password, or the keyring entry for `user`.
    pub fn resolve_password(&self) -> Result<String, EmailError> {
        if !self.get_password().is_empty() || !self.use_keyring {
            return Ok(self.get_password().to_string());
        }
        debug!("Reading SMTP password for {} from keyring", self.user);
        keyring::Entry::new(KEYRING_SERVICE, &self.user)
            .and_then(|entry| entry.get_password())
            .map_err(|e| EmailError::ConfigError(format!("Keyring lookup failed: {}", e)))
    }

    /// Saves the password so later runs can leave it out of the config.
    pub fn store_password(&self) -> Result<(), EmailError> {
        keyring::Entry::new(KEYRING_SERVICE, &self.user)
            .and_then(|entry| entry.set_password(self.get_password()))
            .map_err(|e| EmailError::ConfigError(format!("Keyring store failed: {}", e)))
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct GmailConfig {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: SecretString,
    /// Skips the OAuth flow entirely when set.
    #[serde(default)]
    pub access_token: Option<SecretString>,
    #[serde(default)]
    pub token_cache_path: Option<PathBuf>,
    #[serde(default)]
    pub from_email: String,
    #[serde(default)]
    pub sender_name: Option<String>,
}

impl GmailConfig {
    pub fn token_cache(&self) -> Option<PathBuf> {
        self.token_cache_path
            .clone()
            .or_else(|| project_dirs().map(|d| d.data_dir().join("gmail_token.json")))
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct WhatsAppConfig {
    pub gateway_url: String,
    pub api_key: Option<SecretString>,
    /// Pause after a number that is not on WhatsApp.
    pub rejected_backoff_ms: u64,
    /// Pause after a session/transport error.
    pub transport_backoff_ms: u64,
}

impl Default for WhatsAppConfig {
    fn default() -> Self {
        Self {
            gateway_url: "http://127.0.0.1:3000".to_string(),
            api_key: None,
            rejected_backoff_ms: 3_000,
            transport_backoff_ms: 5_000,
        }
    }
}

impl WhatsAppConfig {
    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy {
            rejected: Some(Duration::from_millis(self.rejected_backoff_ms)),
            transport: Some(Duration::from_millis(self.transport_backoff_ms)),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DispatchConfig {
    pub delay_ms: u64,
    pub name_fallback: String,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            delay_ms: 1_000,
            name_fallback: DEFAULT_NAME_FALLBACK.to_string(),
        }
    }
}

impl DispatchConfig {
    pub fn delay(&self) -> Duration {
        clamp_delay(self.delay_ms)
    }
}

// Top-level application configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub smtp: Option<SmtpConfig>,
    #[serde(default)]
    pub gmail: Option<GmailConfig>,
    #[serde(default)]
    pub whatsapp: WhatsAppConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub contacts: ContactConfig,
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "bulk-blaster")
}

/// `bulk-blaster.toml` under the platform config directory.
pub fn default_config_path() -> Option<PathBuf> {
    project_dirs().map(|d| d.config_dir().join("bulk-blaster.toml"))
}

impl AppConfig {
    /// Loads configuration from files and environment variables.
    ///
    /// Reads configuration from, lowest priority first:
    /// 1. the platform config file (optional)
    /// 2. `bulk-blaster.toml` in the working directory (optional), or
    ///    `explicit` when given (required)
    /// 3. Environment variables prefixed with `BLASTER__`
    ///    (e.g., `BLASTER__SMTP__PASSWORD`)
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        if let Some(path) = default_config_path() {
            builder = builder.add_source(File::from(path).required(false));
        }

        builder = match explicit {
            Some(path) => builder.add_source(File::from(path).required(true)),
            None => builder.add_source(File::with_name("bulk-blaster").required(false)),
        };

        // Note: `__` separates struct levels.
        let config = builder
            .add_source(
                Environment::with_prefix("BLASTER")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}
