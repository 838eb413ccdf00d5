// =============================================================================
// Persistence — seam for an external trade/signal sink
// =============================================================================
//
// Persistent state layout is out of scope for the core pipeline; the
// contract the pipeline actually needs is narrow: hand closed trades and
// emitted signals to something durable after the fact, the same
// observe-only posture reconciliation takes toward exchange state (log,
// never mutate pipeline state from inside the sink).
// =============================================================================

use tracing::debug;

use crate::types::{SimulatedTrade, Signal};

/// An external durability seam. Implementors may write to a database, a
/// file, a message queue — the engine does not care, and never blocks the
/// pipeline waiting on the sink.
pub trait TradeSink: Send + Sync {
    fn on_signal(&self, signal: &Signal);
    fn on_trade_closed(&self, trade: &SimulatedTrade);
}

/// Default sink: discards everything. Used when no external store is wired
/// in.
pub struct NoopSink;

impl TradeSink for NoopSink {
    fn on_signal(&self, signal: &Signal) {
        debug!(signal_id = %signal.id, symbol = %signal.symbol, "noop sink: signal discarded");
    }

    fn on_trade_closed(&self, trade: &SimulatedTrade) {
        debug!(trade_id = %trade.id, symbol = %trade.symbol, status = ?trade.status, "noop sink: trade discarded");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Direction, TradeStatus};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn noop_sink_accepts_signal_without_panicking() {
        let sink = NoopSink;
        let signal = Signal {
            id: "s".into(),
            symbol: "R_100".into(),
            direction: Direction::Buy,
            entry: 100.0,
            stop_loss: 99.0,
            take_profit: 102.0,
            rr_realized: 2.0,
            generated_at: 0,
            confirming_candle_ts: 0,
            conditions: vec![],
            confidence: 1,
            estimated_duration_minutes: 5.0,
        };
        sink.on_signal(&signal);
    }

    struct CountingSink {
        closed: AtomicUsize,
    }
    impl TradeSink for CountingSink {
        fn on_signal(&self, _signal: &Signal) {}
        fn on_trade_closed(&self, _trade: &SimulatedTrade) {
            self.closed.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn custom_sink_observes_closed_trades() {
        let sink = CountingSink { closed: AtomicUsize::new(0) };
        let trade = SimulatedTrade {
            id: "t".into(),
            symbol: "R_100".into(),
            direction: Direction::Buy,
            signal_id: "s".into(),
            planned_entry: 100.0,
            planned_sl: 99.0,
            planned_tp: 102.0,
            planned_rr: 2.0,
            entry_price: 100.0,
            close_price: 101.0,
            status: TradeStatus::Profit,
            open_ts: 0,
            close_ts: 10,
            pnl_percent: 1.0,
            duration_seconds: 10,
            max_duration_seconds: 1800,
            conditions: vec![],
        };
        sink.on_trade_closed(&trade);
        assert_eq!(sink.closed.load(Ordering::Relaxed), 1);
    }
}
