// =============================================================================
// Engine Configuration — hot-loadable settings with atomic save
// =============================================================================
//
// Every tunable parameter named in the system's external-interfaces contract
// lives here as a single immutable value, per the composition-root design:
// dependency assembly happens once at startup and every subsystem is built
// from a `EngineConfig` it is handed, never a shared mutable global.
//
// Persistence uses an atomic tmp + rename pattern to prevent corruption on
// crash. All fields carry `#[serde(default = "...")]` so that adding new
// fields never breaks loading an older config file.
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::types::Timeframe;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_symbols() -> Vec<String> {
    vec!["R_100".to_string(), "R_75".to_string(), "R_50".to_string()]
}

fn default_candle_interval_seconds() -> i64 {
    5
}

fn default_available_timeframes() -> Vec<Timeframe> {
    vec![Timeframe::M5, Timeframe::M15, Timeframe::M30, Timeframe::H1]
}

fn default_active_timeframe() -> Timeframe {
    Timeframe::M5
}

fn default_max_candles_buffer() -> usize {
    200
}

fn default_ws_reconnect_base_delay() -> f64 {
    1.0
}

fn default_ws_reconnect_max_delay() -> f64 {
    60.0
}

fn default_ws_heartbeat_interval() -> u64 {
    30
}

fn default_rr_default() -> f64 {
    2.0
}

fn default_max_trade_duration_minutes() -> i64 {
    30
}

fn default_signal_min_confirmations() -> usize {
    2
}

fn default_signal_rr_ratio() -> f64 {
    2.0
}

fn default_signal_min_rr() -> f64 {
    1.0
}

fn default_signal_rsi_oversold() -> f64 {
    35.0
}

fn default_signal_rsi_overbought() -> f64 {
    65.0
}

fn default_signal_min_sl_pct() -> f64 {
    0.0002
}

fn default_signal_cooldown_candles() -> i64 {
    3
}

fn default_signal_sr_tolerance_pct() -> f64 {
    0.0015
}

fn default_signal_sr_max_levels() -> usize {
    10
}

fn default_signal_breakout_candle_mult() -> f64 {
    1.2
}

fn default_signal_consolidation_candles() -> usize {
    10
}

fn default_signal_consolidation_atr_mult() -> f64 {
    2.0
}

fn default_event_bus_max_queue_size() -> usize {
    10_000
}

fn default_ema_fast_period() -> u64 {
    12
}

fn default_ema_slow_period() -> u64 {
    26
}

fn default_rsi_period() -> u64 {
    14
}

fn default_avg_range_window() -> usize {
    10
}

fn default_broker_ws_url() -> String {
    "wss://broker.example.com/ws".to_string()
}

fn default_bind_addr() -> String {
    "0.0.0.0:3001".to_string()
}

// =============================================================================
// EngineConfig
// =============================================================================

/// Top-level, immutable engine configuration. Every field has a serde default
/// so that older JSON files missing new fields still deserialise correctly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Synthetic-index symbols the engine subscribes to on the broker feed.
    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,

    /// Base candle-builder interval, in seconds.
    #[serde(default = "default_candle_interval_seconds")]
    pub candle_interval_seconds: i64,

    /// Timeframes the aggregator folds base candles into.
    #[serde(default = "default_available_timeframes")]
    pub available_timeframes: Vec<Timeframe>,

    /// The timeframe the signal/S/R pipeline currently evaluates, mutable at
    /// runtime via the control surface.
    #[serde(default = "default_active_timeframe")]
    pub default_timeframe: Timeframe,

    /// Ring-buffer depth for base and per-TF candles in market state.
    #[serde(default = "default_max_candles_buffer")]
    pub max_candles_buffer: usize,

    /// Broker WebSocket endpoint.
    #[serde(default = "default_broker_ws_url")]
    pub broker_ws_url: String,

    /// Base reconnect backoff delay, in seconds.
    #[serde(default = "default_ws_reconnect_base_delay")]
    pub ws_reconnect_base_delay: f64,

    /// Reconnect backoff cap, in seconds.
    #[serde(default = "default_ws_reconnect_max_delay")]
    pub ws_reconnect_max_delay: f64,

    /// Application-level ping interval, in seconds.
    #[serde(default = "default_ws_heartbeat_interval")]
    pub ws_heartbeat_interval: u64,

    /// Default risk:reward multiple used to place take-profit.
    #[serde(default = "default_rr_default")]
    pub rr_default: f64,

    /// Maximum simulated-trade duration before forced expiry, in minutes.
    #[serde(default = "default_max_trade_duration_minutes")]
    pub max_trade_duration_minutes: i64,

    /// Minimum number of confirming condition tags required to emit a signal.
    #[serde(default = "default_signal_min_confirmations")]
    pub signal_min_confirmations: usize,

    /// Risk:reward ratio target used to place take-profit from stop distance.
    #[serde(default = "default_signal_rr_ratio")]
    pub signal_rr_ratio: f64,

    /// Minimum realised RR required to emit a signal.
    #[serde(default = "default_signal_min_rr")]
    pub signal_min_rr: f64,

    /// RSI level below which a rising RSI counts as a buy reversal.
    #[serde(default = "default_signal_rsi_oversold")]
    pub signal_rsi_oversold: f64,

    /// RSI level above which a falling RSI counts as a sell reversal.
    #[serde(default = "default_signal_rsi_overbought")]
    pub signal_rsi_overbought: f64,

    /// Minimum stop-loss distance as a fraction of entry (rejects too-tight
    /// stops).
    #[serde(default = "default_signal_min_sl_pct")]
    pub signal_min_sl_pct: f64,

    /// Cooldown between signals on the same symbol, expressed in candles.
    #[serde(default = "default_signal_cooldown_candles")]
    pub signal_cooldown_candles: i64,

    /// Tolerance band used by the bounce/rejection S/R predicates.
    #[serde(default = "default_signal_sr_tolerance_pct")]
    pub signal_sr_tolerance_pct: f64,

    /// Maximum number of swing levels retained per symbol per side.
    #[serde(default = "default_signal_sr_max_levels")]
    pub signal_sr_max_levels: usize,

    /// Range multiplier beyond the average range required for a breakout.
    #[serde(default = "default_signal_breakout_candle_mult")]
    pub signal_breakout_candle_mult: f64,

    /// Window size (candles) for the consolidation filter.
    #[serde(default = "default_signal_consolidation_candles")]
    pub signal_consolidation_candles: usize,

    /// Range multiplier defining "consolidating" vs "trending" range.
    #[serde(default = "default_signal_consolidation_atr_mult")]
    pub signal_consolidation_atr_mult: f64,

    /// EMA-fast warm-up period.
    #[serde(default = "default_ema_fast_period")]
    pub ema_fast_period: u64,

    /// EMA-slow warm-up period.
    #[serde(default = "default_ema_slow_period")]
    pub ema_slow_period: u64,

    /// Wilder RSI period.
    #[serde(default = "default_rsi_period")]
    pub rsi_period: u64,

    /// Window (candles) used to compute the average range for breakout and
    /// duration-estimate calculations.
    #[serde(default = "default_avg_range_window")]
    pub avg_range_window: usize,

    /// Per-subscriber bounded queue capacity on the event bus.
    #[serde(default = "default_event_bus_max_queue_size")]
    pub event_bus_max_queue_size: usize,

    /// Address the thin presentation surface binds to.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            symbols: default_symbols(),
            candle_interval_seconds: default_candle_interval_seconds(),
            available_timeframes: default_available_timeframes(),
            default_timeframe: default_active_timeframe(),
            max_candles_buffer: default_max_candles_buffer(),
            broker_ws_url: default_broker_ws_url(),
            ws_reconnect_base_delay: default_ws_reconnect_base_delay(),
            ws_reconnect_max_delay: default_ws_reconnect_max_delay(),
            ws_heartbeat_interval: default_ws_heartbeat_interval(),
            rr_default: default_rr_default(),
            max_trade_duration_minutes: default_max_trade_duration_minutes(),
            signal_min_confirmations: default_signal_min_confirmations(),
            signal_rr_ratio: default_signal_rr_ratio(),
            signal_min_rr: default_signal_min_rr(),
            signal_rsi_oversold: default_signal_rsi_oversold(),
            signal_rsi_overbought: default_signal_rsi_overbought(),
            signal_min_sl_pct: default_signal_min_sl_pct(),
            signal_cooldown_candles: default_signal_cooldown_candles(),
            signal_sr_tolerance_pct: default_signal_sr_tolerance_pct(),
            signal_sr_max_levels: default_signal_sr_max_levels(),
            signal_breakout_candle_mult: default_signal_breakout_candle_mult(),
            signal_consolidation_candles: default_signal_consolidation_candles(),
            signal_consolidation_atr_mult: default_signal_consolidation_atr_mult(),
            ema_fast_period: default_ema_fast_period(),
            ema_slow_period: default_ema_slow_period(),
            rsi_period: default_rsi_period(),
            avg_range_window: default_avg_range_window(),
            event_bus_max_queue_size: default_event_bus_max_queue_size(),
            bind_addr: default_bind_addr(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read engine config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse engine config from {}", path.display()))?;

        info!(
            path = %path.display(),
            symbols = ?config.symbols,
            active_timeframe = %config.default_timeframe,
            "engine config loaded"
        );

        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename). Prevents corruption if the process
    /// crashes mid-write.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self)
            .context("failed to serialise engine config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "engine config saved (atomic)");
        Ok(())
    }
}
