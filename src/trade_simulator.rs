// =============================================================================
// Trade Simulator — Signal -> PENDING -> OPEN -> terminal lifecycle
// =============================================================================
//
// Owns all mutation of SimulatedTrade through Trade State. Per-tick evaluation
// order is strict: expiry, then stop-loss, then take-profit; ties on the same
// tick resolve to whichever check matches first in that order. This is a
// deliberate conservative bias, the same shape the execution engine's
// risk-precheck-then-branch flow uses before ever touching mutable state.
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{info, warn};

use crate::trade_state::TradeState;
use crate::types::{Direction, SimulatedTrade, Signal, Tick, TradeStatus};

/// Monitoring counters, exposed the way the broker client exposes its own
/// connection counters.
#[derive(Debug, Default)]
pub struct SimulatorCounters {
    pub trades_opened: AtomicU64,
    pub trades_closed: AtomicU64,
    pub signals_ignored: AtomicU64,
}

/// Outcome of a per-tick evaluation, used by the orchestrator to decide
/// whether to publish `trade_closed`.
pub enum TickOutcome {
    NoOp,
    Opened(SimulatedTrade),
    Closed(SimulatedTrade),
}

pub struct TradeSimulator {
    counters: SimulatorCounters,
}

impl TradeSimulator {
    pub fn new() -> Self {
        Self {
            counters: SimulatorCounters::default(),
        }
    }

    pub fn counters(&self) -> &SimulatorCounters {
        &self.counters
    }

    /// Create a PENDING trade from a signal. Rejected (counted, not raised)
    /// if the symbol already has an active trade.
    pub fn create_trade(
        &self,
        state: &TradeState,
        signal: &Signal,
        max_duration_seconds: i64,
    ) -> Option<SimulatedTrade> {
        let trade = SimulatedTrade::from_signal(signal, max_duration_seconds);
        if state.register(trade.clone()) {
            info!(symbol = %signal.symbol, signal_id = %signal.id, "trade created (PENDING)");
            Some(trade)
        } else {
            self.counters.signals_ignored.fetch_add(1, Ordering::Relaxed);
            warn!(symbol = %signal.symbol, signal_id = %signal.id, "signal ignored: active trade already exists for symbol");
            None
        }
    }

    /// Advance the active trade for `tick.symbol`, if any, by one tick.
    /// Evaluation order inside an OPEN trade is strictly expiry, then SL,
    /// then TP.
    pub fn on_tick(&self, state: &TradeState, tick: &Tick) -> TickOutcome {
        let Some(active) = state.active(&tick.symbol) else {
            return TickOutcome::NoOp;
        };

        match active.status {
            TradeStatus::Pending => {
                let opened = state.mutate_active(&tick.symbol, |t| {
                    t.entry_price = tick.quote;
                    t.open_ts = tick.epoch;
                    t.status = TradeStatus::Open;
                });
                if let Some(trade) = opened {
                    self.counters.trades_opened.fetch_add(1, Ordering::Relaxed);
                    info!(symbol = %tick.symbol, entry_price = trade.entry_price, "trade activated (OPEN)");
                    TickOutcome::Opened(trade)
                } else {
                    TickOutcome::NoOp
                }
            }
            TradeStatus::Open => self.evaluate_open(state, tick, &active),
            _ => TickOutcome::NoOp,
        }
    }

    fn evaluate_open(&self, state: &TradeState, tick: &Tick, active: &SimulatedTrade) -> TickOutcome {
        let terminal_status = if tick.epoch - active.open_ts >= active.max_duration_seconds {
            Some(TradeStatus::Expired)
        } else {
            match active.direction {
                Direction::Buy => {
                    if tick.quote <= active.planned_sl {
                        Some(TradeStatus::Loss)
                    } else if tick.quote >= active.planned_tp {
                        Some(TradeStatus::Profit)
                    } else {
                        None
                    }
                }
                Direction::Sell => {
                    if tick.quote >= active.planned_sl {
                        Some(TradeStatus::Loss)
                    } else if tick.quote <= active.planned_tp {
                        Some(TradeStatus::Profit)
                    } else {
                        None
                    }
                }
            }
        };

        let Some(status) = terminal_status else {
            return TickOutcome::NoOp;
        };

        let close_price = tick.quote;
        let close_ts = tick.epoch;
        let entry_price = active.entry_price;

        let pnl_percent = match active.direction {
            Direction::Buy => (close_price - entry_price) / entry_price * 100.0,
            Direction::Sell => (entry_price - close_price) / entry_price * 100.0,
        };

        state.mutate_active(&tick.symbol, |t| {
            t.status = status;
            t.close_price = close_price;
            t.close_ts = close_ts;
            t.duration_seconds = close_ts - t.open_ts;
            t.pnl_percent = pnl_percent;
        });

        match state.archive_active(&tick.symbol) {
            Some(trade) => {
                self.counters.trades_closed.fetch_add(1, Ordering::Relaxed);
                info!(
                    symbol = %tick.symbol,
                    status = ?trade.status,
                    pnl_percent = trade.pnl_percent,
                    "trade closed"
                );
                TickOutcome::Closed(trade)
            }
            None => {
                warn!(symbol = %tick.symbol, "invariant violation: archive_active found no active trade after close");
                TickOutcome::NoOp
            }
        }
    }
}

impl Default for TradeSimulator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signal(symbol: &str, direction: Direction, entry: f64, sl: f64, tp: f64) -> Signal {
        Signal {
            id: "sig1".into(),
            symbol: symbol.into(),
            direction,
            entry,
            stop_loss: sl,
            take_profit: tp,
            rr_realized: 2.0,
            generated_at: 0,
            confirming_candle_ts: 0,
            conditions: vec!["ema_cross".into()],
            confidence: 1,
            estimated_duration_minutes: 5.0,
        }
    }

    fn tick(symbol: &str, epoch: i64, quote: f64) -> Tick {
        Tick { symbol: symbol.into(), epoch, quote, bid: None, ask: None }
    }

    #[test]
    fn create_trade_rejected_when_active_trade_exists() {
        let state = TradeState::new();
        let sim = TradeSimulator::new();
        let sig = signal("S", Direction::Buy, 100.0, 99.0, 102.0);
        assert!(sim.create_trade(&state, &sig, 1800).is_some());
        assert!(sim.create_trade(&state, &sig, 1800).is_none());
        assert_eq!(sim.counters().signals_ignored.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn pending_activates_on_first_post_signal_tick() {
        let state = TradeState::new();
        let sim = TradeSimulator::new();
        let sig = signal("S", Direction::Buy, 100.0, 99.0, 102.0);
        sim.create_trade(&state, &sig, 1800);

        match sim.on_tick(&state, &tick("S", 100, 100.2)) {
            TickOutcome::Opened(t) => {
                assert_eq!(t.status, TradeStatus::Open);
                assert_eq!(t.entry_price, 100.2);
                assert_eq!(t.open_ts, 100);
            }
            _ => panic!("expected Opened"),
        }
    }

    #[test]
    fn scenario_buy_profit_from_spec() {
        let state = TradeState::new();
        let sim = TradeSimulator::new();
        let sig = signal("S", Direction::Buy, 100.0, 99.0, 102.0);
        sim.create_trade(&state, &sig, 1800);
        sim.on_tick(&state, &tick("S", 100, 100.2));

        match sim.on_tick(&state, &tick("S", 112, 102.4)) {
            TickOutcome::Closed(t) => {
                assert_eq!(t.status, TradeStatus::Profit);
                assert_eq!(t.close_price, 102.4);
                assert!((t.pnl_percent - 2.1954).abs() < 0.001);
            }
            _ => panic!("expected Closed"),
        }
        assert!(state.active("S").is_none());
    }

    #[test]
    fn scenario_expiry_from_spec() {
        let state = TradeState::new();
        let sim = TradeSimulator::new();
        let sig = signal("S", Direction::Buy, 100.0, 99.0, 102.0);
        sim.create_trade(&state, &sig, 1800);
        sim.on_tick(&state, &tick("S", 0, 100.2));

        match sim.on_tick(&state, &tick("S", 1800, 100.5)) {
            TickOutcome::Closed(t) => {
                assert_eq!(t.status, TradeStatus::Expired);
                assert!(t.pnl_percent > 0.0);
            }
            _ => panic!("expected Closed"),
        }
    }

    #[test]
    fn expiry_takes_priority_over_sl_and_tp_on_same_tick() {
        let state = TradeState::new();
        let sim = TradeSimulator::new();
        let sig = signal("S", Direction::Buy, 100.0, 99.0, 102.0);
        sim.create_trade(&state, &sig, 100);
        sim.on_tick(&state, &tick("S", 0, 100.0));

        // this tick both exceeds max duration AND crosses TP; expiry wins.
        match sim.on_tick(&state, &tick("S", 100, 103.0)) {
            TickOutcome::Closed(t) => assert_eq!(t.status, TradeStatus::Expired),
            _ => panic!("expected Closed"),
        }
    }

    #[test]
    fn sell_direction_pnl_sign_is_inverted() {
        let state = TradeState::new();
        let sim = TradeSimulator::new();
        let sig = signal("S", Direction::Sell, 100.0, 101.0, 98.0);
        sim.create_trade(&state, &sig, 1800);
        sim.on_tick(&state, &tick("S", 0, 100.0));

        match sim.on_tick(&state, &tick("S", 10, 98.0)) {
            TickOutcome::Closed(t) => {
                assert_eq!(t.status, TradeStatus::Profit);
                assert!((t.pnl_percent - 2.0).abs() < 0.001);
            }
            _ => panic!("expected Closed"),
        }
    }

    #[test]
    fn sl_before_tp_when_both_crossed_same_tick() {
        let state = TradeState::new();
        let sim = TradeSimulator::new();
        let sig = signal("S", Direction::Buy, 100.0, 99.0, 100.5);
        sim.create_trade(&state, &sig, 1800);
        sim.on_tick(&state, &tick("S", 0, 100.0));

        // a single tick crossing both SL and TP resolves to LOSS (SL first).
        match sim.on_tick(&state, &tick("S", 5, 98.0)) {
            TickOutcome::Closed(t) => assert_eq!(t.status, TradeStatus::Loss),
            _ => panic!("expected Closed"),
        }
    }
}
