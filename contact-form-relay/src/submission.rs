use regex::Regex;
use serde::{
    de::{IgnoredAny, MapAccess, Visitor},
    Deserialize, Deserializer,
};
use std::{fmt, sync::OnceLock};
use thiserror::Error;

const EMAIL_PATTERN: &str = r"^[a-z0-9._%+\-]+@[a-z0-9.\-]+\.[a-z]{2,}$";

static EMAIL_REGEX: OnceLock<Regex> = OnceLock::new();

/// One contact form request. Any field missing from the request body is left empty.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Submission {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
    pub company: String,
    pub message: String,
    pub verification_token: String,
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Empty request body")]
    Empty,
    #[error("Malformed request body: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("Invalid email address {0:?}")]
    InvalidEmail(String),
    #[error("Missing required fields")]
    MissingFields,
}

impl Submission {
    /// Decodes the first JSON value of `body` and ignores whatever follows it. A `null`
    /// value decodes to an empty submission.
    pub fn decode(body: &[u8]) -> Result<Self, DecodeError> {
        let first = serde_json::Deserializer::from_slice(body)
            .into_iter::<Option<Submission>>()
            .next()
            .ok_or(DecodeError::Empty)??;
        Ok(first.unwrap_or_default())
    }

    /// Keys are matched ignoring ASCII case.
    fn field_mut(&mut self, key: &str) -> Option<&mut String> {
        let Submission {
            first_name,
            last_name,
            email,
            phone,
            company,
            message,
            verification_token,
        } = self;
        [
            ("firstName", first_name),
            ("lastName", last_name),
            ("email", email),
            ("phone", phone),
            ("company", company),
            ("message", message),
            ("recaptchaToken", verification_token),
        ]
        .into_iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(key))
        .map(|(_, field)| field)
    }

    pub fn validate(&self) -> Result<ValidatedSubmission<'_>, ValidationError> {
        if !is_valid_email(&self.email) {
            return Err(ValidationError::InvalidEmail(self.email.clone()));
        }
        let Submission {
            first_name,
            last_name,
            email,
            phone,
            company,
            message,
            ..
        } = self;
        if first_name.is_empty() || last_name.is_empty() || message.is_empty() {
            return Err(ValidationError::MissingFields);
        }
        Ok(ValidatedSubmission {
            first_name,
            last_name,
            email,
            phone,
            company,
            message,
        })
    }
}

impl<'de> Deserialize<'de> for Submission {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(SubmissionVisitor)
    }
}

struct SubmissionVisitor;

impl<'de> Visitor<'de> for SubmissionVisitor {
    type Value = Submission;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a contact form object")
    }

    // A repeated key overwrites the earlier value. A `null` value leaves the field as it was.
    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Submission, A::Error> {
        let mut submission = Submission::default();
        while let Some(key) = map.next_key::<String>()? {
            match submission.field_mut(&key) {
                Some(field) => {
                    if let Some(value) = map.next_value::<Option<String>>()? {
                        *field = value;
                    }
                }
                None => {
                    map.next_value::<IgnoredAny>()?;
                }
            }
        }
        Ok(submission)
    }
}

/// A submission whose email address and required fields have been checked.
#[derive(Debug, Clone, Copy)]
pub struct ValidatedSubmission<'a> {
    pub first_name: &'a str,
    pub last_name: &'a str,
    pub email: &'a str,
    pub phone: &'a str,
    pub company: &'a str,
    pub message: &'a str,
}

/// Case-sensitive: addresses containing uppercase letters are rejected.
pub fn is_valid_email(email: &str) -> bool {
    EMAIL_REGEX
        .get_or_init(|| Regex::new(EMAIL_PATTERN).unwrap())
        .is_match(email)
}
