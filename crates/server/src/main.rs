//! Atlas Cortex server entry point

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use cortex_config::{load_settings, Settings};
use cortex_gateway::SpatialResolver;
use cortex_guardrails::GuardrailEngine;
use cortex_memory::{ColdWorker, MemoryStore, MemoryStoreConfig};
use cortex_pipeline::{ContextAssembler, GenerationOrchestrator, InteractionLog, PipelineDriver};
use cortex_profiles::ProfileService;
use cortex_providers::build_registry;
use cortex_server::{create_router, init_metrics, AppState, NullTranscriber};
use cortex_speech::{NightMode, TtsBridge};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Priority: env vars > config/{env}.yaml > config/default.yaml > defaults.
    let env = std::env::var("CORTEX_ENV").ok();
    let settings = match load_settings(env.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            // Tracing not yet initialized; eprintln for early logging.
            eprintln!("Warning: failed to load config: {}. Using defaults.", e);
            Settings::default()
        }
    };

    init_tracing(&settings);
    tracing::info!("Starting Atlas Cortex v{}", env!("CARGO_PKG_VERSION"));

    let metrics = init_metrics();
    tracing::info!("Prometheus metrics at /metrics");

    // Provider registry with background health checks.
    let registry = build_registry(&settings)?;
    registry.refresh_health().await;
    let _health_task = registry
        .spawn_health_task(Duration::from_secs(settings.providers.health_interval_secs));
    tracing::info!(health = ?registry.health_snapshot(), "provider registry ready");

    // Memory store and the long-lived COLD consumer.
    let data_dir = PathBuf::from(&settings.storage.data_dir);
    let store_config = MemoryStoreConfig {
        data_dir: Some(data_dir.clone()),
        candidate_top_n: settings.memory.candidate_top_n,
        rrf_k: settings.memory.rrf_k,
        hot_soft_timeout: Duration::from_millis(settings.memory.hot_soft_timeout_ms),
        hot_hard_timeout: Duration::from_millis(settings.memory.hot_hard_timeout_ms),
    };
    let (memory, cold_rx) = MemoryStore::new(store_config, Arc::clone(&registry))?;
    let cold_worker = ColdWorker::new(Arc::clone(&memory), cold_rx, Some(data_dir));
    tokio::spawn(cold_worker.run());
    tracing::info!(records = memory.record_count(), "memory store ready");

    let profiles = Arc::new(ProfileService::new());
    let guardrails = Arc::new(GuardrailEngine::new(
        settings.guardrails.false_positive_ceiling,
        settings.guardrails.semantic_threshold,
    )?);
    let actions = Arc::new(cortex_actions::ActionRegistry::new(Arc::clone(&profiles)));

    let log = Arc::new(InteractionLog::new());
    let assembler = Arc::new(ContextAssembler::new(
        Arc::clone(&registry),
        Arc::clone(&log),
        settings.context.window_default,
        settings.context.window_thinking,
    ));
    let orchestrator = GenerationOrchestrator::new(
        Arc::clone(&registry),
        Arc::clone(&profiles),
        Arc::clone(&assembler),
        settings.orchestrator.clone(),
    );
    let driver = Arc::new(PipelineDriver::new(
        Arc::clone(&registry),
        Arc::clone(&memory),
        Arc::clone(&profiles),
        Arc::clone(&guardrails),
        Arc::clone(&actions),
        Arc::clone(&assembler),
        orchestrator,
        Arc::clone(&log),
    ));

    let tts = Arc::new(TtsBridge::new(
        Arc::clone(&registry),
        NightMode {
            night_start_hour: settings.speech.night_start_hour,
            night_end_hour: settings.speech.night_end_hour,
        },
    ));
    let spatial = Arc::new(SpatialResolver::new());

    let state = AppState {
        settings: Arc::new(settings.clone()),
        registry,
        memory: Arc::clone(&memory),
        profiles,
        guardrails,
        driver,
        actions,
        log,
        tts,
        spatial,
        transcriber: Arc::new(NullTranscriber),
        metrics,
    };

    let app = create_router(state);

    let addr: SocketAddr = format!("{}:{}", settings.server.host, settings.server.port).parse()?;
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Persist the dense index on the way out.
    if let Err(e) = memory.snapshot() {
        tracing::warn!(error = %e, "vector snapshot failed on shutdown");
    }
    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, shutting down");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, shutting down");
        }
    }
}

fn init_tracing(settings: &Settings) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("atlas_cortex={},cortex={},tower_http=info", settings.server.log_level, settings.server.log_level)
            .into()
    });

    let subscriber = tracing_subscriber::registry().with(env_filter);
    let fmt_layer = if settings.server.log_json {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };
    subscriber.with(fmt_layer).init();
}
