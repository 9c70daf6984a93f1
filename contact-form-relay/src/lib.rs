//! Relays contact form submissions from the website to the support mailbox, after checking them
//! with reCAPTCHA.

pub mod config;
pub mod handler;
pub mod http;
pub mod mail;
pub mod recaptcha;
pub mod submission;

#[cfg(test)]
mod test_support;

pub use config::{Config, ConfigError};
pub use handler::{ContactFormError, ContactFormHandler};
pub use http::router;
pub use mail::{send_self_test, MailError, MailSender, SmtpMailSender};
pub use recaptcha::{RecaptchaVerifier, VerificationError, VerificationService};
pub use submission::Submission;
