//! Herdbook ledger server
//!
//! Serves the loan, investor and payment APIs over HTTP and runs the
//! scheduled maintenance sweep.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};

use herdbook_server::clock::{Clock, SystemClock};
use herdbook_server::collateral::OwnershipService;
use herdbook_server::config::{Config, LedgerBackend};
use herdbook_server::investor::InvestorService;
use herdbook_server::ledger::{LedgerStore, MemoryLedger};
use herdbook_server::loan::LoanService;
use herdbook_server::payments::{
    DarajaClient, PaymentGateway, PaymentService, PaymentSettings, PushThrottle, SandboxGateway,
};
use herdbook_server::state::AppState;
use herdbook_server::{db, jobs, middleware, routes};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::info!(environment = config.environment.as_str(), "Starting ledger server");

    let store: Arc<dyn LedgerStore> = match config.ledger_backend {
        LedgerBackend::Postgres => Arc::new(db::open_ledger(&config).await?),
        LedgerBackend::Memory => {
            tracing::warn!("Using the in-memory ledger; all records are lost on restart");
            Arc::new(MemoryLedger::new())
        }
    };
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let gateway: Arc<dyn PaymentGateway> = match config.daraja.clone() {
        Some(daraja) => {
            tracing::info!(
                shortcode = %daraja.shortcode,
                production = daraja.production,
                "Using the M-Pesa Daraja gateway"
            );
            Arc::new(DarajaClient::new(daraja).context("failed to build Daraja client")?)
        }
        None => {
            tracing::warn!("Daraja credentials not set; push payments use the sandbox gateway");
            Arc::new(SandboxGateway::new())
        }
    };

    let loan_service = Arc::new(LoanService::new(store.clone(), clock.clone()));
    let investor_service = Arc::new(InvestorService::new(store.clone(), clock.clone()));
    let ownership_service = Arc::new(OwnershipService::new(store.clone(), clock.clone()));
    let payment_service = Arc::new(PaymentService::new(
        store.clone(),
        clock.clone(),
        gateway,
        PushThrottle::new(config.push_limit_per_minute),
        PaymentSettings {
            session_retention: chrono::Duration::minutes(config.session_retention_minutes),
            auto_poll: true,
        },
    ));

    // Kept alive for the lifetime of the server
    let _scheduler = jobs::start_scheduler(loan_service.clone(), payment_service.clone()).await?;

    let app_state = AppState::new(
        loan_service,
        investor_service,
        ownership_service,
        payment_service,
        store,
        config.callback_secret.clone(),
    );

    let app = routes::app_router(app_state)
        .layer(axum::middleware::from_fn(middleware::security_headers))
        .layer(axum::middleware::from_fn(middleware::request_tracing))
        .layer(configure_cors(config.cors_allowed_origins.as_deref()));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;

    tracing::info!("Server listening on {}", addr);
    tracing::info!("Health check at http://{}/health", addr);

    // Serve with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

fn configure_cors(allowed_origins: Option<&str>) -> CorsLayer {
    let allowed_origins = allowed_origins.unwrap_or_default();

    if allowed_origins.trim().is_empty() {
        tracing::warn!("CORS_ALLOWED_ORIGINS not set, allowing all origins (permissive)");
        return CorsLayer::permissive();
    }

    let origins: Vec<HeaderValue> = allowed_origins
        .split(',')
        .filter_map(|s| s.trim().parse().ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers(Any)
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
        }
    }
}
