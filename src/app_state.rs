// =============================================================================
// Central Application State — composition root for the market-data engine
// =============================================================================
//
// The single source of truth for the entire engine. Dependency assembly
// happens once, here, in `AppState::new`: every subsystem is built from the
// `EngineConfig` it is handed and wired together by `Arc` reference, never a
// shared mutable global. `state_version` is retained purely for the external
// WebSocket fan-out to detect changes; it plays no role in core pipeline
// correctness, which depends only on the orchestrator's FIFO tick sequencing.
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;

use crate::broker_client::{BrokerClient, BrokerClientConfig, BrokerCounters};
use crate::candle_builder::CandleBuilder;
use crate::event_bus::EventBus;
use crate::indicators::engine::{IndicatorEngine, IndicatorParams};
use crate::market_state::MarketState;
use crate::orchestrator::Orchestrator;
use crate::persistence::{NoopSink, TradeSink};
use crate::runtime_config::EngineConfig;
use crate::signal_engine::{SignalConfig, SignalEngine};
use crate::signal_filter::{AllowAll, SignalFilter};
use crate::sr_engine::{SrConfig, SrEngine};
use crate::stats_engine::StatsEngine;
use crate::timeframe_aggregator::TimeframeAggregator;
use crate::trade_simulator::TradeSimulator;
use crate::trade_state::TradeState;
use crate::types::{PerformanceMetrics, Timeframe};

/// A recorded error event, retained for operator-facing diagnostics. Nothing
/// in the pipeline reads this back; it exists purely for observability.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    pub message: String,
    pub at: String,
}

const MAX_RECENT_ERRORS: usize = 50;

/// Central application state shared across every async worker via
/// `Arc<AppState>`.
pub struct AppState {
    /// Monotonically increasing counter bumped on every published event;
    /// consulted only by the external WebSocket fan-out.
    pub state_version: AtomicU64,

    pub config: RwLock<EngineConfig>,

    pub bus: Arc<EventBus>,
    pub market_state: Arc<MarketState>,
    pub indicator_engine: Arc<IndicatorEngine>,
    pub sr_engine: Arc<SrEngine>,
    pub signal_engine: Arc<SignalEngine>,
    pub trade_simulator: Arc<TradeSimulator>,
    pub trade_state: Arc<TradeState>,
    pub stats_engine: Arc<StatsEngine>,
    pub signal_filter: Arc<dyn SignalFilter>,
    pub trade_sink: Arc<dyn TradeSink>,
    pub orchestrator: Arc<Orchestrator>,
    pub broker_client: Arc<BrokerClient>,

    pub recent_errors: RwLock<Vec<ErrorRecord>>,
    pub start_time: std::time::Instant,
}

impl AppState {
    /// Construct a new `AppState` from engine configuration. All subsystems
    /// are built here once and handed to the orchestrator, which becomes the
    /// sole mutator of every per-symbol engine.
    pub fn new(config: EngineConfig) -> Self {
        let bus = Arc::new(EventBus::new(config.event_bus_max_queue_size));
        let market_state = Arc::new(MarketState::new(config.max_candles_buffer));

        let indicator_engine = Arc::new(IndicatorEngine::new(IndicatorParams {
            p_fast: config.ema_fast_period,
            p_slow: config.ema_slow_period,
            p_rsi: config.rsi_period,
        }));

        let sr_engine = Arc::new(SrEngine::new(SrConfig {
            tolerance_pct: config.signal_sr_tolerance_pct,
            k_break: config.signal_breakout_candle_mult,
            consolidation_candles: config.signal_consolidation_candles,
            k_consol: config.signal_consolidation_atr_mult,
            avg_range_window: config.avg_range_window,
            max_levels: config.signal_sr_max_levels,
        }));

        let signal_engine = Arc::new(SignalEngine::new(SignalConfig {
            min_confirmations: config.signal_min_confirmations,
            rr_target: config.signal_rr_ratio,
            min_rr: config.signal_min_rr,
            rsi_oversold: config.signal_rsi_oversold,
            rsi_overbought: config.signal_rsi_overbought,
            min_sl_pct: config.signal_min_sl_pct,
            cooldown_candles: config.signal_cooldown_candles,
            avg_range_window: config.avg_range_window,
        }));

        let trade_simulator = Arc::new(TradeSimulator::new());
        let trade_state = Arc::new(TradeState::new());
        let stats_engine = Arc::new(StatsEngine::new());
        let signal_filter: Arc<dyn SignalFilter> = Arc::new(AllowAll);
        let trade_sink: Arc<dyn TradeSink> = Arc::new(NoopSink);

        let candle_builder = CandleBuilder::new(config.candle_interval_seconds);
        let tf_aggregator = TimeframeAggregator::new(config.available_timeframes.clone());

        let max_trade_duration_seconds = config.max_trade_duration_minutes * 60;

        let orchestrator = Arc::new(Orchestrator::new(
            bus.clone(),
            market_state.clone(),
            candle_builder,
            tf_aggregator,
            indicator_engine.clone(),
            sr_engine.clone(),
            signal_engine.clone(),
            trade_simulator.clone(),
            trade_state.clone(),
            stats_engine.clone(),
            signal_filter.clone(),
            trade_sink.clone(),
            max_trade_duration_seconds,
            config.default_timeframe,
        ));

        let broker_client = Arc::new(BrokerClient::new(BrokerClientConfig {
            ws_url: config.broker_ws_url.clone(),
            symbols: config.symbols.clone(),
            reconnect_base_delay: config.ws_reconnect_base_delay,
            reconnect_max_delay: config.ws_reconnect_max_delay,
            heartbeat_interval: std::time::Duration::from_secs(config.ws_heartbeat_interval),
        }));

        Self {
            state_version: AtomicU64::new(0),
            config: RwLock::new(config),
            bus,
            market_state,
            indicator_engine,
            sr_engine,
            signal_engine,
            trade_simulator,
            trade_state,
            stats_engine,
            signal_filter,
            trade_sink,
            orchestrator,
            broker_client,
            recent_errors: RwLock::new(Vec::new()),
            start_time: std::time::Instant::now(),
        }
    }

    pub fn bump_version(&self) -> u64 {
        self.state_version.fetch_add(1, Ordering::Relaxed)
    }

    pub fn record_error(&self, message: impl Into<String>) {
        let mut errors = self.recent_errors.write();
        if errors.len() >= MAX_RECENT_ERRORS {
            errors.remove(0);
        }
        errors.push(ErrorRecord {
            message: message.into(),
            at: chrono::Utc::now().to_rfc3339(),
        });
    }

    pub fn broker_counters(&self) -> Arc<BrokerCounters> {
        self.broker_client.counters()
    }

    pub fn metrics(&self, symbol: Option<&str>) -> PerformanceMetrics {
        self.stats_engine.get_metrics(&self.trade_state, symbol)
    }

    pub fn set_active_timeframe(&self, tf: Timeframe) {
        self.orchestrator.set_active_timeframe(tf);
        self.config.write().default_timeframe = tf;
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_app_state_wires_default_timeframe_through() {
        let state = AppState::new(EngineConfig::default());
        assert_eq!(state.orchestrator.active_timeframe(), Timeframe::M5);
    }

    #[test]
    fn set_active_timeframe_updates_orchestrator_and_config() {
        let state = AppState::new(EngineConfig::default());
        state.set_active_timeframe(Timeframe::M30);
        assert_eq!(state.orchestrator.active_timeframe(), Timeframe::M30);
        assert_eq!(state.config.read().default_timeframe, Timeframe::M30);
    }

    #[test]
    fn metrics_for_unknown_symbol_is_empty() {
        let state = AppState::new(EngineConfig::default());
        let m = state.metrics(Some("UNKNOWN"));
        assert_eq!(m.total, 0);
    }

    #[test]
    fn record_error_is_bounded() {
        let state = AppState::new(EngineConfig::default());
        for i in 0..(MAX_RECENT_ERRORS + 10) {
            state.record_error(format!("err {i}"));
        }
        assert_eq!(state.recent_errors.read().len(), MAX_RECENT_ERRORS);
    }
}
