// =============================================================================
// Synth Engine — library root
// =============================================================================
//
// Exposes every pipeline module so integration tests (and the `main.rs`
// binary) can exercise the full stack without duplicating wiring logic.
// =============================================================================

pub mod api;
pub mod app_state;
pub mod broker_client;
pub mod candle_builder;
pub mod event_bus;
pub mod indicators;
pub mod market_state;
pub mod orchestrator;
pub mod persistence;
pub mod runtime_config;
pub mod signal_engine;
pub mod signal_filter;
pub mod sr_engine;
pub mod stats_engine;
pub mod timeframe_aggregator;
pub mod trade_simulator;
pub mod trade_state;
pub mod types;
