use crate::{
    config::Config,
    mail::{MailError, MailSender},
    recaptcha::{VerificationError, VerificationService},
};
use async_trait::async_trait;
use lettre::{AsyncSmtpTransport, Message, Tokio1Executor};
use std::sync::{Arc, Mutex};

pub fn fake_config() -> Config {
    Config {
        smtp_email: "relay@next-kiosk.com".into(),
        smtp_password: "fake SMTP password".into(),
        recaptcha_secret: Some("fake reCAPTCHA secret".into()),
        port: 8080,
        smtp_url: "smtp://localhost:2525".into(),
        recaptcha_verify_url: "http://localhost:5283/recaptcha/api/siteverify".into(),
    }
}

/// Accepts or rejects every token and remembers which tokens it saw.
#[derive(Clone)]
pub struct FakeVerificationService {
    score: f64,
    tokens: Arc<Mutex<Vec<String>>>,
}

impl FakeVerificationService {
    pub fn with_score(score: f64) -> Self {
        Self {
            score,
            tokens: Default::default(),
        }
    }

    pub fn passing() -> Self {
        Self::with_score(0.9)
    }

    pub fn failing() -> Self {
        Self::with_score(0.1)
    }

    pub fn tokens(&self) -> Vec<String> {
        self.tokens.lock().unwrap().clone()
    }
}

#[async_trait]
impl VerificationService for FakeVerificationService {
    async fn verify(&self, token: &str) -> Result<(), VerificationError> {
        self.tokens.lock().unwrap().push(token.into());
        if self.score > crate::recaptcha::SCORE_THRESHOLD {
            Ok(())
        } else {
            Err(VerificationError::Rejected {
                success: true,
                score: self.score,
            })
        }
    }
}

/// Records every message handed to it instead of delivering it.
#[derive(Clone, Default)]
pub struct RecordingMailSender {
    sent: Arc<Mutex<Vec<String>>>,
    fail: bool,
}

impl RecordingMailSender {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    /// Every message passed to [`MailSender::send`], formatted, including failed attempts.
    pub fn attempts(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl MailSender for RecordingMailSender {
    async fn send(&self, message: Message) -> Result<(), MailError> {
        self.sent
            .lock()
            .unwrap()
            .push(String::from_utf8_lossy(&message.formatted()).into_owned());
        if self.fail {
            Err(relay_error())
        } else {
            Ok(())
        }
    }
}

fn relay_error() -> MailError {
    // lettre offers no public constructor for its SMTP error, so provoke a genuine one.
    match AsyncSmtpTransport::<Tokio1Executor>::from_url("unsupported://relay.invalid") {
        Ok(_) => unreachable!("unsupported scheme accepted"),
        Err(error) => MailError::Transport(error),
    }
}
