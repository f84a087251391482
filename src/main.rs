// =============================================================================
// Aurora Cascade Engine — Main Entry Point
// =============================================================================
//
// The engine starts in Paused + Paper mode for safety. Operators must
// explicitly switch to Live trading via the dashboard or API.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod api;
mod app_state;
mod binance;
mod cascade;
mod consensus;
mod errors;
mod fee_model;
mod indicators;
mod journal;
mod market_data;
mod orchestrator;
mod position;
mod ports;
mod reconcile;
mod risk;
mod runtime_config;
mod treasury;
mod types;

use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::ports::exchange::{BinanceExchange, PaperExchange};
use crate::ports::notification::{LoggingNotifier, WebhookNotifier};
use crate::ports::{ExchangePort, NotificationPort};
use crate::runtime_config::RuntimeConfig;
use crate::types::AccountMode;

const RUNTIME_CONFIG_PATH: &str = "runtime_config.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║        Aurora Cascade Engine — Starting Up               ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let mut config = RuntimeConfig::load(RUNTIME_CONFIG_PATH).unwrap_or_else(|e| {
        warn!(error = %e, "failed to load config, using defaults");
        RuntimeConfig::default()
    });

    // SAFETY: force Paused + Paper on every boot regardless of what the
    // persisted config says. An operator must explicitly re-arm the engine.
    config.engine_mode = types::EngineMode::Paused;
    config.account_mode = AccountMode::Paper;

    if let Ok(syms) = std::env::var("AURORA_SYMBOLS") {
        let symbols: Vec<String> = syms
            .split(',')
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect();
        if !symbols.is_empty() {
            config.symbols = symbols;
        }
    }

    if let Err(e) = config.validate() {
        error!(error = %e, "runtime config failed validation, refusing to start");
        std::process::exit(1);
    }

    info!(symbols = ?config.symbols, "configured trading pairs");
    info!(
        engine_mode = %config.engine_mode,
        account_mode = %config.account_mode,
        "engine starting in SAFE mode (Paused + Paper)"
    );

    // ── 2. Build ports ────────────────────────────────────────────────────
    let api_key = std::env::var("BINANCE_API_KEY").unwrap_or_default();
    let api_secret = std::env::var("BINANCE_API_SECRET").unwrap_or_default();
    let binance_client = binance::client::BinanceClient::new(api_key, api_secret);

    let exchange: Arc<dyn ExchangePort> = match config.account_mode {
        AccountMode::Live => Arc::new(BinanceExchange::new("binance", binance_client.clone())),
        AccountMode::Paper => Arc::new(PaperExchange::new("binance")),
    };

    let notifier: Arc<dyn NotificationPort> = match std::env::var("AURORA_WEBHOOK_URL") {
        Ok(url) if !url.is_empty() => Arc::new(WebhookNotifier::new(url)),
        _ => Arc::new(LoggingNotifier),
    };

    // ── 3. Build shared state ─────────────────────────────────────────────
    let state = Arc::new(AppState::new(config, exchange, notifier));

    // ── 4. Spawn market data streams ──────────────────────────────────────
    let symbols = state.runtime_config.read().symbols.clone();

    for symbol in &symbols {
        // Kline 1m stream
        let cb = state.candle_buffer.clone();
        let sym = symbol.clone();
        tokio::spawn(async move {
            loop {
                if let Err(e) =
                    market_data::candle_buffer::run_kline_stream(&sym, "1m", &cb).await
                {
                    error!(symbol = %sym, error = %e, "kline 1m stream error, reconnecting in 5s");
                }
                tokio::time::sleep(tokio::time::Duration::from_secs(5)).await;
            }
        });

        // Kline 5m stream
        let cb = state.candle_buffer.clone();
        let sym = symbol.clone();
        tokio::spawn(async move {
            loop {
                if let Err(e) =
                    market_data::candle_buffer::run_kline_stream(&sym, "5m", &cb).await
                {
                    error!(symbol = %sym, error = %e, "kline 5m stream error, reconnecting in 5s");
                }
                tokio::time::sleep(tokio::time::Duration::from_secs(5)).await;
            }
        });

        // Trade stream
        {
            let procs = state.trade_processors.read();
            if let Some(tp) = procs.get(symbol) {
                let processor = tp.clone();
                let sym = symbol.clone();
                tokio::spawn(async move {
                    loop {
                        if let Err(e) =
                            market_data::trade_stream::run_trade_stream(&sym, &processor).await
                        {
                            error!(symbol = %sym, error = %e, "trade stream error, reconnecting in 5s");
                        }
                        tokio::time::sleep(tokio::time::Duration::from_secs(5)).await;
                    }
                });
            }
        }

        // Orderbook stream
        let ob = state.orderbook_manager.clone();
        let sym = symbol.clone();
        tokio::spawn(async move {
            loop {
                if let Err(e) = market_data::orderbook::run_depth_stream(&sym, &ob).await {
                    error!(symbol = %sym, error = %e, "depth stream error, reconnecting in 5s");
                }
                tokio::time::sleep(tokio::time::Duration::from_secs(5)).await;
            }
        });

        // Price feed into the orchestrator's open-position monitor and, for
        // the paper venue, the simulator's ticker.
        let state_price = state.clone();
        let sym = symbol.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(2));
            loop {
                interval.tick().await;
                let procs = state_price.trade_processors.read();
                if let Some(tp) = procs.get(&sym) {
                    let price = tp.last_price();
                    if price > 0.0 {
                        if let Some(decimal_price) = rust_decimal::Decimal::from_f64_retain(price) {
                            state_price.position_store.update_price(&sym, decimal_price);
                            state_price.executor.sync_reference_price(&sym, decimal_price);
                        }
                    }
                }
            }
        });
    }

    info!(count = symbols.len(), "market data streams launched");

    // ── 5. Start the API server ───────────────────────────────────────────
    let api_state = state.clone();
    let bind_addr = std::env::var("AURORA_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3001".into());
    let bind_addr_clone = bind_addr.clone();

    tokio::spawn(async move {
        let app = api::rest::router(api_state);
        let listener = tokio::net::TcpListener::bind(&bind_addr_clone)
            .await
            .expect("failed to bind API server");
        info!(addr = %bind_addr_clone, "API server listening");
        axum::serve(listener, app).await.expect("API server failed");
    });

    // ── 6. Orchestrator scan loop ──────────────────────────────────────────
    let orchestrator = state.orchestrator.clone();
    let orchestrator_handle = tokio::spawn(async move {
        // Wait for initial candle history to accumulate.
        tokio::time::sleep(tokio::time::Duration::from_secs(30)).await;
        info!("orchestrator scan loop starting");
        orchestrator.run().await;
    });

    // ── 7. Reconciliation loop ────────────────────────────────────────────
    let recon_state = state.clone();
    let recon_client = binance_client.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(60));
        loop {
            interval.tick().await;

            if recon_state.runtime_config.read().account_mode != AccountMode::Live {
                continue;
            }

            match reconcile::reconcile_once(
                &recon_client,
                &recon_state.position_store,
                &recon_state.balances,
            )
            .await
            {
                Ok(result) => {
                    *recon_state.last_reconcile_ok.write() = Some(std::time::Instant::now());
                    *recon_state.last_reconcile_error.write() = None;
                    recon_state.increment_version();
                    info!(?result, "reconciliation cycle completed");
                }
                Err(e) => {
                    *recon_state.last_reconcile_error.write() = Some(format!("{e}"));
                    warn!(error = %e, "reconciliation failed");
                }
            }
        }
    });

    info!("all subsystems running, press Ctrl+C to stop");

    // ── 8. Graceful shutdown ──────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("shutdown signal received, stopping gracefully");

    state.orchestrator.shutdown_flag().store(true, std::sync::atomic::Ordering::SeqCst);
    orchestrator_handle.abort();

    match state.executor.shutdown_closeout().await {
        Ok(count) => info!(count, "closed all open positions before exit"),
        Err(e) => {
            error!(error = %e, "failed to close one or more positions during shutdown");
            if let Err(e2) = state.runtime_config.read().save(RUNTIME_CONFIG_PATH) {
                error!(error = %e2, "failed to save runtime config on shutdown");
            }
            std::process::exit(2);
        }
    }

    if let Err(e) = state.runtime_config.read().save(RUNTIME_CONFIG_PATH) {
        error!(error = %e, "failed to save runtime config on shutdown");
    }

    info!("Aurora Cascade Engine shut down complete.");
    Ok(())
}
