// =============================================================================
// Synth Engine — Main Entry Point
// =============================================================================
//
// Wires the composition root (`AppState`), spawns the broker ingest worker,
// the orchestrator's tick-consumer loop, and the REST/WebSocket presentation
// surface, then waits for Ctrl+C. Shutdown order follows the concurrency
// model's contract: stop the broker first, then let the orchestrator drain,
// then close the broadcast workers (they observe the same cancel token and
// tear down on their own next suspension point).
// =============================================================================

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use synth_engine::api;
use synth_engine::app_state::AppState;
use synth_engine::runtime_config::EngineConfig;

const CONFIG_PATH: &str = "engine_config.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║        Synth Engine — Starting Up                        ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    // ── 1. Configuration ──────────────────────────────────────────────────
    let mut config = EngineConfig::load(CONFIG_PATH).unwrap_or_else(|e| {
        warn!(error = %e, "failed to load engine config, using defaults");
        EngineConfig::default()
    });

    if let Ok(syms) = std::env::var("SYNTH_SYMBOLS") {
        config.symbols = syms
            .split(',')
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect();
    }
    if let Ok(url) = std::env::var("SYNTH_BROKER_WS_URL") {
        config.broker_ws_url = url;
    }
    if let Ok(addr) = std::env::var("SYNTH_BIND_ADDR") {
        config.bind_addr = addr;
    }

    info!(symbols = ?config.symbols, active_timeframe = %config.default_timeframe, "engine configured");

    // ── 2. Composition root ───────────────────────────────────────────────
    let state = Arc::new(AppState::new(config));
    let cancel = Arc::new(AtomicBool::new(false));

    // ── 3. Broker ingest worker ───────────────────────────────────────────
    let broker_state = state.clone();
    let broker_cancel = cancel.clone();
    let broker_handle = tokio::spawn(async move {
        tokio::select! {
            _ = broker_state.broker_client.run(broker_state.bus.clone()) => {}
            _ = wait_for_cancel(broker_cancel) => {
                broker_state.broker_client.shutdown();
            }
        }
    });

    // ── 4. Orchestrator — sole consumer of `tick` ─────────────────────────
    let orch_state = state.clone();
    let orch_cancel = cancel.clone();
    let orchestrator_handle = tokio::spawn(async move {
        orch_state.orchestrator.run(orch_cancel).await;
    });

    // ── 5. Presentation surface (REST + WebSocket) ────────────────────────
    let api_state = state.clone();
    let bind_addr = api_state.config.read().bind_addr.clone();
    let api_handle = tokio::spawn(async move {
        let app = api::rest::router(api_state);
        let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
            Ok(l) => l,
            Err(e) => {
                tracing::error!(error = %e, addr = %bind_addr, "failed to bind API server");
                return;
            }
        };
        info!(addr = %bind_addr, "API server listening");
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "API server exited");
        }
    });

    info!("All subsystems running. Press Ctrl+C to stop.");

    // ── 6. Graceful shutdown ──────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("shutdown signal received — stopping gracefully");

    // Stop the broker first so no new ticks enter the bus, then let the
    // orchestrator drain whatever is already queued before tearing the rest
    // of the process down.
    state.broker_client.shutdown();
    cancel.store(true, Ordering::SeqCst);

    let _ = broker_handle.await;
    let _ = tokio::time::timeout(std::time::Duration::from_secs(5), orchestrator_handle).await;
    api_handle.abort();

    if let Err(e) = state.config.read().save(CONFIG_PATH) {
        tracing::error!(error = %e, "failed to save engine config on shutdown");
    }

    info!("synth-engine shut down complete.");
    Ok(())
}

async fn wait_for_cancel(cancel: Arc<AtomicBool>) {
    while !cancel.load(Ordering::SeqCst) {
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    }
}
