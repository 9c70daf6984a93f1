use crate::{config::Config, submission::ValidatedSubmission};
use async_trait::async_trait;
use chrono::{DateTime, Local};
use lettre::{
    address::AddressError,
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::{Credentials, Mechanism},
    Address, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use serde::Serialize;
use thiserror::Error;
use tinytemplate::{format_unescaped, TinyTemplate};
use tracing::{debug, warn};
use url::Url;

pub const SUPPORT_ADDRESS: &str = "info@next-kiosk.com";
pub const SELF_TEST_ADDRESS: &str = "nextkiosksolutions@gmail.com";

const CONTACT_SUBJECT: &str = "New Contact Form Submission";
const SELF_TEST_SUBJECT: &str = "✅ Mail System Check - Next Kiosk";
const SELF_TEST_SENDER_NAME: &str = "Next Kiosk";

const CONTACT_TEMPLATE_NAME: &str = "contact-notification";
const CONTACT_TEMPLATE: &str = "New message from: {first_name} {last_name}
Email: {email}
Phone: {phone}
Company: {company}

Message:
{message}
";

/// Delivers a composed message to the relay.
#[async_trait]
pub trait MailSender: Send + Sync {
    async fn send(&self, message: Message) -> Result<(), MailError>;
}

#[derive(Debug, Error)]
pub enum MailError {
    #[error("Invalid mail address {address:?}: {source}")]
    InvalidAddress {
        address: String,
        #[source]
        source: AddressError,
    },
    #[error("Error rendering message body: {0}")]
    Template(#[from] tinytemplate::error::Error),
    #[error("Error building message: {0}")]
    Build(#[from] lettre::error::Error),
    #[error("Error talking to SMTP relay: {0}")]
    Transport(#[from] lettre::transport::smtp::Error),
}

/// Sends mail through the configured relay using PLAIN authentication.
pub struct SmtpMailSender(AsyncSmtpTransport<Tokio1Executor>);

impl SmtpMailSender {
    pub fn new(config: &Config) -> Result<Self, MailError> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::from_url(&config.smtp_url)?
            .authentication(vec![Mechanism::Plain]);

        // Credentials only go over an encrypted connection. A plaintext relay gets none and
        // rejects the message if it requires them.
        if is_encrypted(&config.smtp_url) {
            builder = builder.credentials(Credentials::new(
                config.smtp_email.clone(),
                config.smtp_password.clone(),
            ));
        } else {
            warn!(
                "SMTP relay {} is not encrypted; sending without credentials",
                config.smtp_url
            );
        }

        Ok(Self(builder.build()))
    }
}

#[async_trait]
impl MailSender for SmtpMailSender {
    async fn send(&self, message: Message) -> Result<(), MailError> {
        let response = self.0.send(message).await?;
        debug!("Relay accepted message: {:?}", response.code());
        Ok(())
    }
}

fn is_encrypted(smtp_url: &str) -> bool {
    let Ok(url) = Url::parse(smtp_url) else {
        return false;
    };
    url.scheme() == "smtps"
        || url
            .query_pairs()
            .any(|(key, value)| key == "tls" && (value == "required" || value == "opportunistic"))
}

#[derive(Serialize)]
struct ContactContext<'a> {
    first_name: &'a str,
    last_name: &'a str,
    email: &'a str,
    phone: &'a str,
    company: &'a str,
    message: &'a str,
}

/// Builds the notification sent to the support address for one submission.
pub fn compose_contact_message(
    config: &Config,
    submission: &ValidatedSubmission,
) -> Result<Message, MailError> {
    let body = render_contact_body(submission)?;
    Ok(Message::builder()
        .from(Mailbox::new(None, parse_address(&config.smtp_email)?))
        .to(Mailbox::new(None, parse_address(SUPPORT_ADDRESS)?))
        .subject(CONTACT_SUBJECT)
        .header(ContentType::TEXT_PLAIN)
        .body(body)?)
}

fn render_contact_body(submission: &ValidatedSubmission) -> Result<String, MailError> {
    let mut tt = TinyTemplate::new();
    tt.set_default_formatter(&format_unescaped);
    tt.add_template(CONTACT_TEMPLATE_NAME, CONTACT_TEMPLATE)?;
    let context = ContactContext {
        first_name: submission.first_name,
        last_name: submission.last_name,
        email: submission.email,
        phone: submission.phone,
        company: submission.company,
        message: submission.message,
    };
    Ok(tt.render(CONTACT_TEMPLATE_NAME, &context)?)
}

/// Builds the message which proves at startup that the relay accepts our credentials.
pub fn compose_self_test_message(
    config: &Config,
    now: DateTime<Local>,
) -> Result<Message, MailError> {
    Ok(Message::builder()
        .from(Mailbox::new(
            Some(SELF_TEST_SENDER_NAME.into()),
            parse_address(&config.smtp_email)?,
        ))
        .to(Mailbox::new(None, parse_address(SELF_TEST_ADDRESS)?))
        .subject(SELF_TEST_SUBJECT)
        .date(now.into())
        .header(ContentType::TEXT_PLAIN)
        .body(format!(
            "Mail functionality has been deployed and it's working. Time: {}",
            now.format("%Y-%m-%d %H:%M:%S")
        ))?)
}

pub async fn send_self_test(config: &Config, sender: &impl MailSender) -> Result<(), MailError> {
    let message = compose_self_test_message(config, Local::now())?;
    sender.send(message).await
}

fn parse_address(address: &str) -> Result<Address, MailError> {
    address
        .parse()
        .map_err(|source| MailError::InvalidAddress {
            address: address.into(),
            source,
        })
}
