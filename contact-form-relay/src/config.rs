use std::{fmt, num::ParseIntError};
use thiserror::Error;

const SMTP_URL: &str = "smtp://smtpout.secureserver.net:587?tls=required";
const RECAPTCHA_VERIFY_URL: &str = "https://www.google.com/recaptcha/api/siteverify";
const DEFAULT_PORT: u16 = 8080;

/// Process-wide settings, read once at startup and never mutated afterwards.
#[derive(Clone)]
pub struct Config {
    /// Mail account identity. Doubles as SMTP username, envelope sender and `From` address.
    pub smtp_email: String,
    pub smtp_password: String,
    /// `None` when unset or empty, in which case every verification fails.
    pub recaptcha_secret: Option<String>,
    pub port: u16,
    pub smtp_url: String,
    pub recaptcha_verify_url: String,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("PORT must be a number between 0 and 65535, got {value:?}")]
    InvalidPort {
        value: String,
        #[source]
        source: ParseIntError,
    },
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup, so that callers can substitute
    /// values without touching the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let port = match lookup("PORT").filter(|value| !value.is_empty()) {
            Some(value) => value
                .parse()
                .map_err(|source| ConfigError::InvalidPort { value, source })?,
            None => DEFAULT_PORT,
        };
        Ok(Self {
            smtp_email: lookup("SMTP_EMAIL").unwrap_or_default(),
            smtp_password: lookup("SMTP_PASSWORD").unwrap_or_default(),
            recaptcha_secret: lookup("RECAPTCHA_SECRET").filter(|secret| !secret.is_empty()),
            port,
            smtp_url: lookup("SMTP_URL").unwrap_or_else(|| SMTP_URL.into()),
            recaptcha_verify_url: lookup("RECAPTCHA_VERIFY_URL")
                .unwrap_or_else(|| RECAPTCHA_VERIFY_URL.into()),
        })
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("smtp_email", &self.smtp_email)
            .field("smtp_password", &"<redacted>")
            .field(
                "recaptcha_secret",
                &self.recaptcha_secret.as_ref().map(|_| "<redacted>"),
            )
            .field("port", &self.port)
            .field("smtp_url", &self.smtp_url)
            .field("recaptcha_verify_url", &self.recaptcha_verify_url)
            .finish()
    }
}
