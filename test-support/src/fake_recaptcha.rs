use axum::{
    extract::{Form, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::{
    borrow::Cow,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};
use tokio::net::TcpListener;

const VERIFY_PATH: &str = "/recaptcha/api/siteverify";

/// In-process stand-in for the reCAPTCHA `siteverify` endpoint.
#[derive(Clone)]
pub struct FakeRecaptcha {
    required_secret: Cow<'static, str>,
    required_token: Option<String>,
    score: f64,
    report_failure: bool,
    return_invalid_response: bool,
    requests: RequestCounter,
}

/// Number of verification requests a [`FakeRecaptcha`] has received.
#[derive(Clone, Default)]
pub struct RequestCounter(Arc<AtomicUsize>);

impl RequestCounter {
    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    fn increment(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Deserialize)]
struct VerifyRequestPayload {
    secret: String,
    #[serde(default)]
    response: String,
}

#[derive(Serialize)]
struct VerifyResponsePayload {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    score: Option<f64>,
    #[serde(rename = "error-codes", skip_serializing_if = "Vec::is_empty")]
    error_codes: Vec<&'static str>,
}

impl VerifyResponsePayload {
    fn failure(error_code: &'static str) -> Self {
        Self {
            success: false,
            score: None,
            error_codes: vec![error_code],
        }
    }
}

impl FakeRecaptcha {
    pub fn new(required_secret: impl Into<Cow<'static, str>>) -> Self {
        Self {
            required_secret: required_secret.into(),
            required_token: None,
            score: 0.9,
            report_failure: false,
            return_invalid_response: false,
            requests: RequestCounter::default(),
        }
    }

    pub fn require_token(self, required_token: impl AsRef<str>) -> Self {
        Self {
            required_token: Some(required_token.as_ref().into()),
            ..self
        }
    }

    pub fn with_score(self, score: f64) -> Self {
        Self { score, ..self }
    }

    /// Answers `success: false` while still reporting the configured score.
    pub fn report_failure(self) -> Self {
        Self {
            report_failure: true,
            ..self
        }
    }

    pub fn return_invalid_response(self) -> Self {
        Self {
            return_invalid_response: true,
            ..self
        }
    }

    pub fn request_counter(&self) -> RequestCounter {
        self.requests.clone()
    }

    /// Serves on an ephemeral local port and returns the verification URL.
    pub async fn start(self) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let app = Router::new()
            .route(VERIFY_PATH, post(verify))
            .with_state(self);
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{address}{VERIFY_PATH}")
    }
}

async fn verify(
    State(state): State<FakeRecaptcha>,
    Form(payload): Form<VerifyRequestPayload>,
) -> Response {
    state.requests.increment();
    if state.return_invalid_response {
        (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain")],
            "Invalid response",
        )
            .into_response()
    } else if payload.secret != state.required_secret {
        Json(VerifyResponsePayload::failure("invalid-input-secret")).into_response()
    } else if payload.response.is_empty() {
        Json(VerifyResponsePayload::failure("missing-input-response")).into_response()
    } else if state
        .required_token
        .as_ref()
        .is_some_and(|required| *required != payload.response)
    {
        Json(VerifyResponsePayload::failure("invalid-input-response")).into_response()
    } else {
        Json(VerifyResponsePayload {
            success: !state.report_failure,
            score: Some(state.score),
            error_codes: vec![],
        })
        .into_response()
    }
}
