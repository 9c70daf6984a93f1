use crate::{handler::ContactFormHandler, mail::MailSender, recaptcha::VerificationService};
use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Request, State},
    http::{
        header::{
            ACCESS_CONTROL_ALLOW_CREDENTIALS, ACCESS_CONTROL_ALLOW_HEADERS,
            ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN, ORIGIN,
        },
        HeaderValue, Method, StatusCode,
    },
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;

pub const CONTACT_PATH: &str = "/api/contact";

/// Origins whose requests get an `Access-Control-Allow-Origin` header. Matched exactly.
pub const ALLOWED_ORIGINS: [&str; 4] = [
    "http://localhost:3000",
    "https://next-kiosk.com",
    "https://next-kiosk.netlify.app",
    "http://next-kiosk.netlify.app",
];

pub fn router<V, M>(handler: Arc<ContactFormHandler<V, M>>) -> Router
where
    V: VerificationService + 'static,
    M: MailSender + 'static,
{
    Router::new()
        .route(
            CONTACT_PATH,
            post(submit::<V, M>)
                .fallback(method_not_allowed)
                .layer(middleware::from_fn(cors))
                .with_state(handler),
        )
        // Submissions of any size are accepted.
        .layer(DefaultBodyLimit::disable())
}

async fn submit<V, M>(
    State(handler): State<Arc<ContactFormHandler<V, M>>>,
    body: Bytes,
) -> Response
where
    V: VerificationService + 'static,
    M: MailSender + 'static,
{
    match handler.process(&body).await {
        Ok(()) => Json(json!({ "status": "success" })).into_response(),
        Err(error) => {
            error.log();
            error.into_response()
        }
    }
}

async fn method_not_allowed() -> (StatusCode, &'static str) {
    (StatusCode::METHOD_NOT_ALLOWED, "Method not allowed")
}

/// Adds the cross-origin headers to every response and answers preflight requests itself.
async fn cors(request: Request, next: Next) -> Response {
    let allowed_origin = request
        .headers()
        .get(ORIGIN)
        .filter(|origin| {
            ALLOWED_ORIGINS
                .iter()
                .any(|allowed| origin.as_bytes() == allowed.as_bytes())
        })
        .cloned();

    let mut response = if request.method() == Method::OPTIONS {
        StatusCode::OK.into_response()
    } else {
        next.run(request).await
    };

    let headers = response.headers_mut();
    if let Some(origin) = allowed_origin {
        headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, origin);
    }
    headers.insert(
        ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("POST, OPTIONS"),
    );
    headers.insert(
        ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type"),
    );
    headers.insert(
        ACCESS_CONTROL_ALLOW_CREDENTIALS,
        HeaderValue::from_static("true"),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::{router, ALLOWED_ORIGINS, CONTACT_PATH};
    use crate::{
        handler::ContactFormHandler,
        test_support::{fake_config, FakeVerificationService, RecordingMailSender},
    };
    use axum::{
        body::{to_bytes, Body},
        http::{header::ACCESS_CONTROL_ALLOW_ORIGIN, Method, Request, Response},
        Router,
    };
    use googletest::prelude::*;
    use std::sync::Arc;
    use tower::ServiceExt;

    const VALID_BODY: &str = r#"{
        "firstName": "Ada",
        "lastName": "Lovelace",
        "email": "a@b.co",
        "phone": "",
        "company": "",
        "message": "Hello there",
        "recaptchaToken": "human token"
    }"#;

    struct TestApp {
        router: Router,
        verifier: FakeVerificationService,
        mailer: RecordingMailSender,
    }

    impl TestApp {
        fn new(verifier: FakeVerificationService, mailer: RecordingMailSender) -> Self {
            let handler =
                ContactFormHandler::new(Arc::new(fake_config()), verifier.clone(), mailer.clone());
            Self {
                router: router(Arc::new(handler)),
                verifier,
                mailer,
            }
        }

        fn passing() -> Self {
            Self::new(
                FakeVerificationService::passing(),
                RecordingMailSender::default(),
            )
        }

        async fn send(&self, request: Request<Body>) -> Response<Body> {
            self.router.clone().oneshot(request).await.unwrap()
        }

        async fn post(&self, body: impl Into<Body>) -> Response<Body> {
            self.send(
                Request::builder()
                    .method(Method::POST)
                    .uri(CONTACT_PATH)
                    .header("Content-Type", "application/json")
                    .body(body.into())
                    .unwrap(),
            )
            .await
        }
    }

    async fn body_text(response: Response<Body>) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn allow_origin(response: &Response<Body>) -> Option<&str> {
        response
            .headers()
            .get(ACCESS_CONTROL_ALLOW_ORIGIN)
            .and_then(|value| value.to_str().ok())
    }

    #[googletest::test]
    #[tokio::test]
    async fn returns_success_json_for_valid_submission() {
        let app = TestApp::passing();

        let response = app.post(VALID_BODY).await;

        expect_that!(response.status().as_u16(), eq(200));
        expect_that!(
            response
                .headers()
                .get("Content-Type")
                .and_then(|value| value.to_str().ok()),
            some(eq("application/json"))
        );
        expect_that!(body_text(response).await, eq(r#"{"status":"success"}"#));
        expect_that!(app.mailer.attempts(), len(eq(1)));
    }

    #[googletest::test]
    #[tokio::test]
    async fn accepts_body_without_content_type() {
        let app = TestApp::passing();
        let request = Request::builder()
            .method(Method::POST)
            .uri(CONTACT_PATH)
            .body(Body::from(VALID_BODY))
            .unwrap();

        let response = app.send(request).await;

        expect_that!(response.status().as_u16(), eq(200));
    }

    #[googletest::test]
    #[tokio::test]
    async fn accepts_submission_larger_than_default_body_limit() {
        let app = TestApp::passing();
        let long_message = "x".repeat(3 * 1024 * 1024);

        let response = app
            .post(VALID_BODY.replace("Hello there", &long_message))
            .await;

        expect_that!(response.status().as_u16(), eq(200));
        expect_that!(app.mailer.attempts(), len(eq(1)));
    }

    #[googletest::test]
    #[tokio::test]
    async fn returns_401_for_null_body() {
        let app = TestApp::new(
            FakeVerificationService::failing(),
            RecordingMailSender::default(),
        );

        let response = app.post("null").await;

        expect_that!(response.status().as_u16(), eq(401));
        expect_that!(body_text(response).await, eq("reCAPTCHA failed"));
        expect_that!(app.verifier.tokens(), elements_are![eq("")]);
    }

    #[googletest::test]
    #[tokio::test]
    async fn returns_400_for_malformed_body() {
        let app = TestApp::passing();

        let response = app.post("this is not json").await;

        expect_that!(response.status().as_u16(), eq(400));
        expect_that!(body_text(response).await, eq("Invalid JSON body"));
        expect_that!(app.verifier.tokens(), empty());
    }

    #[googletest::test]
    #[tokio::test]
    async fn returns_401_when_verification_fails() {
        let app = TestApp::new(
            FakeVerificationService::failing(),
            RecordingMailSender::default(),
        );

        let response = app.post(VALID_BODY).await;

        expect_that!(response.status().as_u16(), eq(401));
        expect_that!(body_text(response).await, eq("reCAPTCHA failed"));
        expect_that!(app.mailer.attempts(), empty());
    }

    #[googletest::test]
    #[tokio::test]
    async fn returns_400_for_uppercase_email() {
        let app = TestApp::passing();

        let response = app
            .post(VALID_BODY.replace("a@b.co", "Foo@bar.com"))
            .await;

        expect_that!(response.status().as_u16(), eq(400));
        expect_that!(body_text(response).await, eq("Invalid email"));
        expect_that!(app.mailer.attempts(), empty());
    }

    #[googletest::test]
    #[tokio::test]
    async fn returns_400_for_missing_required_field() {
        let app = TestApp::passing();

        let response = app
            .post(VALID_BODY.replace(r#""lastName": "Lovelace","#, ""))
            .await;

        expect_that!(response.status().as_u16(), eq(400));
        expect_that!(body_text(response).await, eq("Missing required fields"));
    }

    #[googletest::test]
    #[tokio::test]
    async fn returns_500_with_generic_message_when_sending_fails() {
        let app = TestApp::new(
            FakeVerificationService::passing(),
            RecordingMailSender::failing(),
        );

        let response = app.post(VALID_BODY).await;

        expect_that!(response.status().as_u16(), eq(500));
        expect_that!(body_text(response).await, eq("Failed to send email"));
    }

    #[googletest::test]
    #[tokio::test]
    async fn returns_405_for_other_methods() {
        let app = TestApp::passing();

        for method in [Method::GET, Method::PUT, Method::DELETE, Method::PATCH] {
            let response = app
                .send(
                    Request::builder()
                        .method(method.clone())
                        .uri(CONTACT_PATH)
                        .body(Body::empty())
                        .unwrap(),
                )
                .await;

            expect_that!(response.status().as_u16(), eq(405));
        }
        expect_that!(app.verifier.tokens(), empty());
    }

    #[googletest::test]
    #[tokio::test]
    async fn answers_preflight_without_running_pipeline() {
        let app = TestApp::passing();
        let request = Request::builder()
            .method(Method::OPTIONS)
            .uri(CONTACT_PATH)
            .header("Origin", "https://next-kiosk.com")
            .body(Body::from(VALID_BODY))
            .unwrap();

        let response = app.send(request).await;

        expect_that!(response.status().as_u16(), eq(200));
        expect_that!(allow_origin(&response), some(eq("https://next-kiosk.com")));
        expect_that!(
            response
                .headers()
                .get("Access-Control-Allow-Methods")
                .and_then(|value| value.to_str().ok()),
            some(eq("POST, OPTIONS"))
        );
        expect_that!(body_text(response).await, eq(""));
        expect_that!(app.verifier.tokens(), empty());
        expect_that!(app.mailer.attempts(), empty());
    }

    #[googletest::test]
    #[tokio::test]
    async fn echoes_each_allowed_origin() {
        let app = TestApp::passing();

        for origin in ALLOWED_ORIGINS {
            let response = app
                .send(
                    Request::builder()
                        .method(Method::POST)
                        .uri(CONTACT_PATH)
                        .header("Origin", origin)
                        .body(Body::from(VALID_BODY))
                        .unwrap(),
                )
                .await;

            expect_that!(allow_origin(&response), some(eq(origin)));
        }
    }

    #[googletest::test]
    #[tokio::test]
    async fn omits_allow_origin_for_unknown_origin() {
        let app = TestApp::passing();

        for origin in [
            "https://evil.example.com",
            "https://next-kiosk.com.evil.example.com",
            "HTTPS://NEXT-KIOSK.COM",
            "https://next-kiosk.com/",
        ] {
            let response = app
                .send(
                    Request::builder()
                        .method(Method::POST)
                        .uri(CONTACT_PATH)
                        .header("Origin", origin)
                        .body(Body::from(VALID_BODY))
                        .unwrap(),
                )
                .await;

            expect_that!(allow_origin(&response), none());
        }
    }

    #[googletest::test]
    #[tokio::test]
    async fn sets_cors_headers_on_error_responses() {
        let app = TestApp::passing();
        let request = Request::builder()
            .method(Method::GET)
            .uri(CONTACT_PATH)
            .header("Origin", "http://localhost:3000")
            .body(Body::empty())
            .unwrap();

        let response = app.send(request).await;

        expect_that!(response.status().as_u16(), eq(405));
        expect_that!(allow_origin(&response), some(eq("http://localhost:3000")));
    }

    #[googletest::test]
    #[tokio::test]
    async fn returns_404_for_other_paths() {
        let app = TestApp::passing();
        let request = Request::builder()
            .method(Method::POST)
            .uri("/api/contacts")
            .body(Body::from(VALID_BODY))
            .unwrap();

        let response = app.send(request).await;

        expect_that!(response.status().as_u16(), eq(404));
        expect_that!(app.verifier.tokens(), empty());
    }
}
