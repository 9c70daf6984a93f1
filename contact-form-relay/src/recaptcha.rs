use crate::config::Config;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

/// Scores at or below this value are treated as bot traffic.
pub const SCORE_THRESHOLD: f64 = 0.5;

/// Decides whether a CAPTCHA token comes from a human.
///
/// Implementations must fail closed: whenever the outcome cannot be established, the token is
/// rejected.
#[async_trait]
pub trait VerificationService: Send + Sync {
    async fn verify(&self, token: &str) -> Result<(), VerificationError>;
}

#[derive(Debug, Error)]
pub enum VerificationError {
    #[error("No reCAPTCHA secret configured")]
    MissingSecret,
    #[error("Error contacting reCAPTCHA: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("Unparseable response from reCAPTCHA: {0}")]
    InvalidResponse(#[source] reqwest::Error),
    #[error("reCAPTCHA rejected token (success: {success}, score: {score})")]
    Rejected { success: bool, score: f64 },
}

/// Checks tokens against the reCAPTCHA v3 `siteverify` endpoint.
pub struct RecaptchaVerifier {
    client: Client,
    secret: Option<String>,
    verify_url: String,
}

impl RecaptchaVerifier {
    pub fn new(config: &Config) -> Self {
        Self {
            client: Client::new(),
            secret: config.recaptcha_secret.clone(),
            verify_url: config.recaptcha_verify_url.clone(),
        }
    }

    async fn send_token(
        &self,
        payload: RecaptchaVerifyPayload<'_>,
    ) -> Result<RecaptchaResponse, VerificationError> {
        let response = self
            .client
            .post(&self.verify_url)
            .form(&payload)
            .send()
            .await
            .map_err(VerificationError::Transport)?;
        // The status code carries no information beyond what the body says.
        response
            .json()
            .await
            .map_err(VerificationError::InvalidResponse)
    }
}

#[async_trait]
impl VerificationService for RecaptchaVerifier {
    async fn verify(&self, token: &str) -> Result<(), VerificationError> {
        let Some(secret) = self.secret.as_deref() else {
            warn!("Missing RECAPTCHA_SECRET, rejecting submission");
            return Err(VerificationError::MissingSecret);
        };
        let response = self
            .send_token(RecaptchaVerifyPayload {
                secret,
                response: token,
            })
            .await?;
        info!("reCAPTCHA score: {}", response.score);
        response.evaluate()
    }
}

#[derive(Serialize)]
struct RecaptchaVerifyPayload<'a> {
    secret: &'a str,
    response: &'a str,
}

#[derive(Deserialize, Debug)]
struct RecaptchaResponse {
    success: bool,
    #[serde(default)]
    score: f64,
    #[serde(default, rename = "error-codes")]
    error_codes: Vec<String>,
}

impl RecaptchaResponse {
    fn evaluate(&self) -> Result<(), VerificationError> {
        if self.success && self.score > SCORE_THRESHOLD {
            Ok(())
        } else {
            if !self.error_codes.is_empty() {
                warn!("reCAPTCHA reported errors: {:?}", self.error_codes);
            }
            Err(VerificationError::Rejected {
                success: self.success,
                score: self.score,
            })
        }
    }
}
