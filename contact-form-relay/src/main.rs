use anyhow::Context;
use contact_form_relay::{
    router, send_self_test, Config, ContactFormHandler, RecaptchaVerifier, SmtpMailSender,
};
use std::sync::Arc;
use tokio::{net::TcpListener, signal};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = Arc::new(Config::from_env().context("Invalid configuration")?);
    let mailer = SmtpMailSender::new(&config).context("Unable to set up SMTP relay")?;

    // A failed self-test is logged only; the server starts regardless.
    match send_self_test(&config, &mailer).await {
        Ok(()) => info!("Test mail sent successfully"),
        Err(error) => error!("Test mail failed: {error}"),
    }

    let handler = ContactFormHandler::new(config.clone(), RecaptchaVerifier::new(&config), mailer);
    let listener = TcpListener::bind(("0.0.0.0", config.port))
        .await
        .with_context(|| format!("Unable to listen on port {}", config.port))?;
    info!("Server running on port {}", config.port);
    axum::serve(listener, router(Arc::new(handler)))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server terminated abnormally")
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = signal::ctrl_c().await {
            error!("Unable to listen for Ctrl-C: {error}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(error) => {
                error!("Unable to listen for SIGTERM: {error}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutting down");
}
