use crate::{
    config::Config,
    mail::{compose_contact_message, MailError, MailSender},
    recaptcha::{VerificationError, VerificationService},
    submission::{DecodeError, Submission, ValidationError},
};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

/// Runs one contact form submission from raw request body to relayed email.
pub struct ContactFormHandler<V: VerificationService, M: MailSender> {
    config: Arc<Config>,
    verifier: V,
    mailer: M,
}

impl<V: VerificationService, M: MailSender> ContactFormHandler<V, M> {
    pub fn new(config: Arc<Config>, verifier: V, mailer: M) -> Self {
        Self {
            config,
            verifier,
            mailer,
        }
    }

    /// Decodes, verifies, validates and sends, stopping at the first failure. Nothing is sent
    /// unless every earlier step succeeded.
    pub async fn process(&self, body: &[u8]) -> Result<(), ContactFormError> {
        let submission = Submission::decode(body)?;
        self.verifier
            .verify(&submission.verification_token)
            .await?;
        let validated = submission.validate()?;
        let message = compose_contact_message(&self.config, &validated)?;
        self.mailer.send(message).await?;
        info!("Relayed contact form message");
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum ContactFormError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Verification(#[from] VerificationError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Transmission(#[from] MailError),
}

impl ContactFormError {
    pub fn status(&self) -> StatusCode {
        match self {
            ContactFormError::Decode(_) | ContactFormError::Validation(_) => {
                StatusCode::BAD_REQUEST
            }
            ContactFormError::Verification(_) => StatusCode::UNAUTHORIZED,
            ContactFormError::Transmission(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// What the caller gets to see. Details stay in the server log.
    pub fn public_message(&self) -> &'static str {
        match self {
            ContactFormError::Decode(_) => "Invalid JSON body",
            ContactFormError::Verification(_) => "reCAPTCHA failed",
            ContactFormError::Validation(ValidationError::InvalidEmail(_)) => "Invalid email",
            ContactFormError::Validation(ValidationError::MissingFields) => {
                "Missing required fields"
            }
            ContactFormError::Transmission(_) => "Failed to send email",
        }
    }

    pub fn log(&self) {
        match self {
            ContactFormError::Transmission(error) => {
                error!("Email send error: {error}");
            }
            error => {
                warn!("Rejected contact form submission: {error}");
            }
        }
    }
}

impl IntoResponse for ContactFormError {
    fn into_response(self) -> Response {
        (self.status(), self.public_message()).into_response()
    }
}
