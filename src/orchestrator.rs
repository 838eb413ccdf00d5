// =============================================================================
// Orchestrator — sole consumer of the `tick` topic
// =============================================================================
//
// Sequences every per-symbol engine in the order the pipeline's correctness
// depends on: candle builder, timeframe aggregator, market state, indicator
// engine, S/R engine, signal engine, trade simulator. Because ticks on the
// `tick` topic are delivered to this single consumer FIFO, per-symbol event
// order is preserved end-to-end and this worker is the sole mutator of every
// per-symbol engine — no other task ever touches them concurrently.
// =============================================================================

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{error, info};

use crate::candle_builder::CandleBuilder;
use crate::event_bus::EventBus;
use crate::indicators::engine::IndicatorEngine;
use crate::market_state::MarketState;
use crate::persistence::TradeSink;
use crate::signal_engine::SignalEngine;
use crate::signal_filter::SignalFilter;
use crate::sr_engine::SrEngine;
use crate::stats_engine::StatsEngine;
use crate::timeframe_aggregator::TimeframeAggregator;
use crate::trade_simulator::{TickOutcome, TradeSimulator};
use crate::trade_state::TradeState;
use crate::types::{Timeframe, Tick};

pub struct Orchestrator {
    pub bus: Arc<EventBus>,
    pub market_state: Arc<MarketState>,
    pub candle_builder: RwLock<CandleBuilder>,
    pub tf_aggregator: RwLock<TimeframeAggregator>,
    pub indicator_engine: Arc<IndicatorEngine>,
    pub sr_engine: Arc<SrEngine>,
    pub signal_engine: Arc<SignalEngine>,
    pub trade_simulator: Arc<TradeSimulator>,
    pub trade_state: Arc<TradeState>,
    pub stats_engine: Arc<StatsEngine>,
    pub signal_filter: Arc<dyn SignalFilter>,
    pub trade_sink: Arc<dyn TradeSink>,
    pub max_trade_duration_seconds: i64,
    active_timeframe: RwLock<Timeframe>,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        bus: Arc<EventBus>,
        market_state: Arc<MarketState>,
        candle_builder: CandleBuilder,
        tf_aggregator: TimeframeAggregator,
        indicator_engine: Arc<IndicatorEngine>,
        sr_engine: Arc<SrEngine>,
        signal_engine: Arc<SignalEngine>,
        trade_simulator: Arc<TradeSimulator>,
        trade_state: Arc<TradeState>,
        stats_engine: Arc<StatsEngine>,
        signal_filter: Arc<dyn SignalFilter>,
        trade_sink: Arc<dyn TradeSink>,
        max_trade_duration_seconds: i64,
        default_timeframe: Timeframe,
    ) -> Self {
        Self {
            bus,
            market_state,
            candle_builder: RwLock::new(candle_builder),
            tf_aggregator: RwLock::new(tf_aggregator),
            indicator_engine,
            sr_engine,
            signal_engine,
            trade_simulator,
            trade_state,
            stats_engine,
            signal_filter,
            trade_sink,
            max_trade_duration_seconds,
            active_timeframe: RwLock::new(default_timeframe),
        }
    }

    /// Control-surface command: changes only affect subsequent TF-candle
    /// closures, no back-recompute of historical signals.
    pub fn set_active_timeframe(&self, tf: Timeframe) {
        *self.active_timeframe.write() = tf;
        info!(timeframe = %tf, "active timeframe changed");
    }

    pub fn active_timeframe(&self) -> Timeframe {
        *self.active_timeframe.read()
    }

    /// Consumes the `tick` topic until `cancel` is set. Each tick's body
    /// runs inside a catch-all so an error on one symbol never affects
    /// another.
    pub async fn run(&self, cancel: Arc<AtomicBool>) {
        let queue = self.bus.subscribe("tick", "orchestrator");
        loop {
            let Some(payload) = queue.recv(&cancel).await else {
                break;
            };
            let tick: Tick = match serde_json::from_value(payload) {
                Ok(t) => t,
                Err(e) => {
                    error!(error = %e, "orchestrator received malformed tick payload");
                    continue;
                }
            };
            self.process_tick(&tick);
        }
        info!("orchestrator stopped");
    }

    /// Synchronously sequence one tick through every per-symbol engine.
    /// `run` is the production entry point (consuming `tick` off the bus
    /// asynchronously); this is exposed directly for deterministic
    /// integration tests that want to drive the pipeline without a running
    /// async consumer loop.
    pub fn process_tick(&self, tick: &Tick) {
        // step 1: update market state last-tick/last-price
        self.market_state.update_last_tick(tick);

        // step 2: advance the symbol's active trade
        match self.trade_simulator.on_tick(&self.trade_state, tick) {
            TickOutcome::Closed(trade) => {
                let payload = serde_json::to_value(&trade).unwrap_or(serde_json::Value::Null);
                self.bus.publish("trade_closed", payload);
                self.stats_engine.on_trade_closed(&trade);
                self.trade_sink.on_trade_closed(&trade);
            }
            TickOutcome::Opened(trade) => {
                let payload = serde_json::to_value(&trade).unwrap_or(serde_json::Value::Null);
                self.bus.publish("trade_opened", payload);
            }
            TickOutcome::NoOp => {}
        }

        // step 3: feed the candle builder; on a closed base candle, cascade
        // through the timeframe aggregator.
        let closed_base = self.candle_builder.write().on_tick(tick);
        if let Some(base) = closed_base {
            self.market_state.push_base_candle(base.clone());
            let candle_payload = serde_json::to_value(&base).unwrap_or(serde_json::Value::Null);
            self.bus.publish("candle", candle_payload);

            let closed_tf_candles = self.tf_aggregator.write().on_base_candle(&base);
            for (tf, tf_candle) in closed_tf_candles {
                self.market_state.push_tf_candle(tf, tf_candle.clone());

                let mut tf_payload = serde_json::to_value(&tf_candle).unwrap_or(serde_json::Value::Null);
                if let Some(obj) = tf_payload.as_object_mut() {
                    obj.insert("timeframe".to_string(), serde_json::json!(tf.to_string()));
                }
                self.bus.publish("tf_candle", tf_payload);

                let snapshot = self.indicator_engine.on_close(&tf_candle.symbol, tf, tf_candle.close);
                if snapshot.is_warm() {
                    let indicators_payload = serde_json::json!({
                        "symbol": tf_candle.symbol,
                        "timeframe": tf.to_string(),
                        "ema_fast": snapshot.ema_fast,
                        "ema_slow": snapshot.ema_slow,
                        "rsi": snapshot.rsi,
                    });
                    self.bus.publish("tf_indicators", indicators_payload);
                }

                if tf == self.active_timeframe() {
                    self.evaluate_active_timeframe(&tf_candle, tf, snapshot);
                }
            }
        }

        self.bus.publish("tick_processed", serde_json::to_value(tick).unwrap_or(serde_json::Value::Null));
    }

    fn evaluate_active_timeframe(
        &self,
        tf_candle: &crate::types::Candle,
        tf: Timeframe,
        snapshot: crate::types::IndicatorSnapshot,
    ) {
        let buffer = self.market_state.tf_candles(&tf_candle.symbol, tf);
        self.sr_engine.on_closed_candle(&tf_candle.symbol, &buffer);
        let consolidating = self.sr_engine.is_consolidating(&buffer);

        let Some(signal) = self.signal_engine.evaluate(
            &tf_candle.symbol,
            tf_candle,
            snapshot,
            &buffer,
            &self.sr_engine,
            consolidating,
        ) else {
            return;
        };

        let decision = self.signal_filter.evaluate(&signal, &snapshot);
        if !decision.is_allowed() {
            return;
        }

        let signal_payload = serde_json::to_value(&signal).unwrap_or(serde_json::Value::Null);
        self.bus.publish("signal", signal_payload);
        self.trade_sink.on_signal(&signal);

        self.trade_simulator.create_trade(&self.trade_state, &signal, self.max_trade_duration_seconds);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::engine::IndicatorParams;
    use crate::signal_engine::SignalConfig;
    use crate::signal_filter::AllowAll;
    use crate::sr_engine::SrConfig;
    use crate::persistence::NoopSink;

    fn make_orchestrator() -> Orchestrator {
        Orchestrator::new(
            Arc::new(EventBus::new(1000)),
            Arc::new(MarketState::new(200)),
            CandleBuilder::new(5),
            TimeframeAggregator::new(vec![Timeframe::M5]),
            Arc::new(IndicatorEngine::new(IndicatorParams::default())),
            Arc::new(SrEngine::new(SrConfig::default())),
            Arc::new(SignalEngine::new(SignalConfig::default())),
            Arc::new(TradeSimulator::new()),
            Arc::new(TradeState::new()),
            Arc::new(StatsEngine::new()),
            Arc::new(AllowAll),
            Arc::new(NoopSink),
            1800,
            Timeframe::M5,
        )
    }

    #[test]
    fn set_active_timeframe_updates_selector() {
        let orch = make_orchestrator();
        assert_eq!(orch.active_timeframe(), Timeframe::M5);
        orch.set_active_timeframe(Timeframe::M15);
        assert_eq!(orch.active_timeframe(), Timeframe::M15);
    }

    #[test]
    fn process_tick_never_panics_on_malformed_sequences() {
        let orch = make_orchestrator();
        for i in 0..20 {
            let tick = Tick { symbol: "S".into(), epoch: i * 5, quote: 100.0 + i as f64 * 0.01, bid: None, ask: None };
            orch.process_tick(&tick);
        }
        assert!(orch.market_state.last_price("S").is_some());
    }

    #[test]
    fn closed_base_candle_publishes_candle_topic() {
        let orch = make_orchestrator();
        let q = orch.bus.subscribe("candle", "test");
        orch.process_tick(&Tick { symbol: "S".into(), epoch: 0, quote: 100.0, bid: None, ask: None });
        orch.process_tick(&Tick { symbol: "S".into(), epoch: 5, quote: 101.0, bid: None, ask: None });
        assert!(q.try_recv().is_some());
    }

    #[test]
    fn tick_processed_is_published_every_tick() {
        let orch = make_orchestrator();
        let q = orch.bus.subscribe("tick_processed", "test");
        orch.process_tick(&Tick { symbol: "S".into(), epoch: 0, quote: 100.0, bid: None, ask: None });
        assert!(q.try_recv().is_some());
    }
}
