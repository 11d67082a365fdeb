//! Application entry point.

use std::env;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use dotenvy::dotenv;
use secrecy::SecretString;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use merchant_payment_gateway::api::{
    RateLimitConfig, create_router, create_router_with_rate_limit,
};
use merchant_payment_gateway::app::{
    AppState, DispatcherConfig, WebhookDispatcher, spawn_dispatcher,
};
use merchant_payment_gateway::domain::{ProofRecorder, RetryPolicy};
use merchant_payment_gateway::infra::{
    HttpProofRecorder, NoopProofRecorder, PostgresClient, PostgresConfig, ProofBridgeConfig,
};

/// Application configuration
struct Config {
    database_url: String,
    host: String,
    port: u16,
    enable_rate_limiting: bool,
    rate_limit_config: RateLimitConfig,
    dispatcher_config: DispatcherConfig,
    /// Proof bridge URL (optional - proof recording is disabled if not set)
    proof_bridge: Option<ProofBridgeConfig>,
}

impl Config {
    fn from_env() -> Result<Self> {
        let database_url = env::var("DATABASE_URL").context("DATABASE_URL not set")?;
        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(3000);
        let enable_rate_limiting = env::var("ENABLE_RATE_LIMITING")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);
        let rate_limit_config = RateLimitConfig::from_env();

        let defaults = DispatcherConfig::default();
        let policy_defaults = RetryPolicy::default();
        let dispatcher_config = DispatcherConfig {
            enabled: env::var("ENABLE_WEBHOOK_DISPATCHER")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(true),
            poll_interval: env_duration_secs("DISPATCHER_POLL_INTERVAL_SECS")
                .unwrap_or(defaults.poll_interval),
            batch_size: env_parse("DISPATCHER_BATCH_SIZE").unwrap_or(defaults.batch_size),
            visibility_timeout: env_duration_secs("WEBHOOK_VISIBILITY_TIMEOUT_SECS")
                .unwrap_or(defaults.visibility_timeout),
            delivery_timeout: env_duration_secs("WEBHOOK_DELIVERY_TIMEOUT_SECS")
                .unwrap_or(defaults.delivery_timeout),
            retry_policy: RetryPolicy {
                max_attempts: env_parse("WEBHOOK_MAX_ATTEMPTS")
                    .unwrap_or(policy_defaults.max_attempts),
                base_backoff_secs: env_parse("WEBHOOK_BACKOFF_BASE_SECS")
                    .unwrap_or(policy_defaults.base_backoff_secs),
                max_backoff_secs: env_parse("WEBHOOK_BACKOFF_MAX_SECS")
                    .unwrap_or(policy_defaults.max_backoff_secs),
                jitter_secs: env_parse("WEBHOOK_BACKOFF_JITTER_SECS")
                    .unwrap_or(policy_defaults.jitter_secs),
            },
            endpoint_failure_threshold: env_parse("ENDPOINT_FAILURE_THRESHOLD")
                .unwrap_or(defaults.endpoint_failure_threshold),
        };

        // Proof bridge configuration (optional)
        let proof_bridge = env::var("PROOF_BRIDGE_URL")
            .ok()
            .filter(|u| !u.is_empty())
            .map(|endpoint_url| {
                let bridge_defaults = ProofBridgeConfig::default();
                ProofBridgeConfig {
                    endpoint_url,
                    chain_id: env_parse("PROOF_BRIDGE_CHAIN_ID").unwrap_or(bridge_defaults.chain_id),
                    contract_address: env::var("PROOF_BRIDGE_CONTRACT_ADDRESS")
                        .unwrap_or_default(),
                    api_key: env::var("PROOF_BRIDGE_API_KEY")
                        .ok()
                        .filter(|k| !k.is_empty())
                        .map(SecretString::from),
                    timeout: env_duration_secs("PROOF_BRIDGE_TIMEOUT_SECS")
                        .unwrap_or(bridge_defaults.timeout),
                }
            });

        Ok(Self {
            database_url,
            host,
            port,
            enable_rate_limiting,
            rate_limit_config,
            dispatcher_config,
            proof_bridge,
        })
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}

fn env_duration_secs(key: &str) -> Option<Duration> {
    env_parse::<u64>(key).map(Duration::from_secs)
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug,sqlx=warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    init_tracing();

    info!(
        "🏗️  Merchant Payment Gateway v{}",
        env!("CARGO_PKG_VERSION")
    );

    let config = Config::from_env()?;

    info!("📦 Initializing infrastructure...");

    // Initialize database
    let db_config = PostgresConfig::default();
    let postgres_client = PostgresClient::new(&config.database_url, db_config).await?;
    postgres_client.run_migrations().await?;
    info!("   ✓ Database connected and migrations applied");

    let postgres = Arc::new(postgres_client);

    // Initialize proof recording bridge (best-effort collaborator)
    let proof_recorder: Arc<dyn ProofRecorder> = match &config.proof_bridge {
        Some(bridge_config) => {
            info!(
                "   ✓ Proof bridge configured (chain {}, {})",
                bridge_config.chain_id, bridge_config.endpoint_url
            );
            Arc::new(HttpProofRecorder::new(bridge_config.clone())?)
        }
        None => {
            info!("   ○ Proof bridge not configured (proof recording disabled)");
            Arc::new(NoopProofRecorder)
        }
    };

    // Create application state; one Postgres client backs every repository
    let app_state = Arc::new(AppState::new(
        postgres.clone(),
        postgres.clone(),
        postgres.clone(),
        postgres.clone(),
        postgres.clone(),
        proof_recorder,
    ));

    // Start webhook dispatcher if enabled
    let dispatcher_shutdown_tx = if config.dispatcher_config.enabled {
        let dispatcher = Arc::new(WebhookDispatcher::new(
            Arc::clone(&app_state.events),
            Arc::clone(&app_state.endpoints),
            config.dispatcher_config.clone(),
        )?);
        let (_dispatcher_handle, shutdown_tx) = spawn_dispatcher(dispatcher);
        info!(
            "   ✓ Webhook dispatcher started (poll: {:?}, batch: {}, max attempts: {})",
            config.dispatcher_config.poll_interval,
            config.dispatcher_config.batch_size,
            config.dispatcher_config.retry_policy.max_attempts
        );
        Some(shutdown_tx)
    } else {
        info!("   ○ Webhook dispatcher disabled");
        None
    };

    // Create router
    let router = if config.enable_rate_limiting {
        info!("   ✓ Rate limiting enabled");
        create_router_with_rate_limit(app_state, config.rate_limit_config)
    } else {
        info!("   ○ Rate limiting disabled");
        create_router(app_state)
    };

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!("🚀 Server starting on http://{}", addr);
    info!("📖 Swagger UI available at http://{}/swagger-ui", addr);
    info!("📄 OpenAPI spec at http://{}/api-docs/openapi.json", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Signal dispatcher to shutdown; in-flight claims are released by the
    // visibility-timeout reclaim on restart
    if let Some(tx) = dispatcher_shutdown_tx {
        let _ = tx.send(true);
    }

    info!("Server shutdown complete");
    Ok(())
}
