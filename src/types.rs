// =============================================================================
// Core data model shared by every pipeline stage.
//
// Ticks and candles are immutable once published; a SimulatedTrade is the
// one mutable entity in the model and is owned exclusively by trade_state.
// =============================================================================

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

// ---------------------------------------------------------------------------
// Timeframe
// ---------------------------------------------------------------------------

/// A higher timeframe the aggregator can fold base candles into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "30m")]
    M30,
    #[serde(rename = "1h")]
    H1,
}

impl Timeframe {
    pub fn seconds(self) -> i64 {
        match self {
            Timeframe::M5 => 300,
            Timeframe::M15 => 900,
            Timeframe::M30 => 1_800,
            Timeframe::H1 => 3_600,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "5m" => Some(Timeframe::M5),
            "15m" => Some(Timeframe::M15),
            "30m" => Some(Timeframe::M30),
            "1h" => Some(Timeframe::H1),
            _ => None,
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::M30 => "30m",
            Timeframe::H1 => "1h",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Tick
// ---------------------------------------------------------------------------

/// A single broker-delivered price update. Never mutated after construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub symbol: String,
    pub epoch: i64,
    pub quote: f64,
    #[serde(default)]
    pub bid: Option<f64>,
    #[serde(default)]
    pub ask: Option<f64>,
}

// ---------------------------------------------------------------------------
// Candle
// ---------------------------------------------------------------------------

/// An OHLC bucket, frozen the instant it is published. `interval_seconds`
/// is the bucket width (base interval for a base candle, the TF period for
/// a TF-candle reusing this same shape).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub symbol: String,
    pub open_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub tick_count: u64,
    pub interval_seconds: i64,
}

impl Candle {
    pub fn close_time(&self) -> i64 {
        self.open_time + self.interval_seconds
    }
}

// ---------------------------------------------------------------------------
// Indicator snapshot
// ---------------------------------------------------------------------------

/// Per (symbol, timeframe) indicator values. Null (`None`) until warm-up
/// completes for that metric.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSnapshot {
    pub ema_fast: Option<f64>,
    pub ema_slow: Option<f64>,
    pub rsi: Option<f64>,
}

impl IndicatorSnapshot {
    pub fn is_warm(&self) -> bool {
        self.ema_fast.is_some() && self.ema_slow.is_some() && self.rsi.is_some()
    }
}

// ---------------------------------------------------------------------------
// Swing level
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum SwingKind {
    High,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SwingLevel {
    pub price: f64,
    pub timestamp: i64,
    pub kind: SwingKind,
}

/// Bounded FIFO of swing levels, oldest evicted first past `max_levels`.
#[derive(Debug, Clone, Default)]
pub struct SwingDeque {
    pub levels: VecDeque<SwingLevel>,
    pub max_levels: usize,
}

impl SwingDeque {
    pub fn new(max_levels: usize) -> Self {
        Self {
            levels: VecDeque::with_capacity(max_levels),
            max_levels,
        }
    }

    pub fn push(&mut self, level: SwingLevel) {
        if self.levels.len() == self.max_levels {
            self.levels.pop_front();
        }
        self.levels.push_back(level);
    }

    pub fn last(&self) -> Option<&SwingLevel> {
        self.levels.back()
    }
}

// ---------------------------------------------------------------------------
// Direction
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Buy,
    Sell,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Buy => write!(f, "BUY"),
            Direction::Sell => write!(f, "SELL"),
        }
    }
}

// ---------------------------------------------------------------------------
// Signal
// ---------------------------------------------------------------------------

/// An immutable BUY/SELL proposal emitted by the signal engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub id: String,
    pub symbol: String,
    pub direction: Direction,
    pub entry: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub rr_realized: f64,
    pub generated_at: i64,
    pub confirming_candle_ts: i64,
    pub conditions: Vec<String>,
    pub confidence: usize,
    pub estimated_duration_minutes: f64,
}

// ---------------------------------------------------------------------------
// SimulatedTrade
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeStatus {
    Pending,
    Open,
    Profit,
    Loss,
    Expired,
}

impl TradeStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TradeStatus::Profit | TradeStatus::Loss | TradeStatus::Expired)
    }
}

/// The single mutable entity in the model. Owned exclusively by trade_state;
/// the simulator mutates it only through the documented PENDING->OPEN and
/// OPEN->terminal transitions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatedTrade {
    pub id: String,
    pub symbol: String,
    pub direction: Direction,
    pub signal_id: String,
    pub planned_entry: f64,
    pub planned_sl: f64,
    pub planned_tp: f64,
    pub planned_rr: f64,
    pub entry_price: f64,
    pub close_price: f64,
    pub status: TradeStatus,
    pub open_ts: i64,
    pub close_ts: i64,
    pub pnl_percent: f64,
    pub duration_seconds: i64,
    pub max_duration_seconds: i64,
    pub conditions: Vec<String>,
}

impl SimulatedTrade {
    /// Construct a new trade in PENDING status from a signal.
    pub fn from_signal(signal: &Signal, max_duration_seconds: i64) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            symbol: signal.symbol.clone(),
            direction: signal.direction,
            signal_id: signal.id.clone(),
            planned_entry: signal.entry,
            planned_sl: signal.stop_loss,
            planned_tp: signal.take_profit,
            planned_rr: signal.rr_realized,
            entry_price: 0.0,
            close_price: 0.0,
            status: TradeStatus::Pending,
            open_ts: 0,
            close_ts: 0,
            pnl_percent: 0.0,
            duration_seconds: 0,
            max_duration_seconds,
            conditions: signal.conditions.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// PerformanceMetrics
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub total: u64,
    pub wins: u64,
    pub losses: u64,
    pub expired: u64,
    pub win_rate: f64,
    pub loss_rate: f64,
    pub profit_factor: f64,
    pub expectancy: f64,
    pub avg_rr_real: f64,
    pub avg_duration: f64,
    pub max_drawdown: f64,
    pub equity_curve: Vec<f64>,
    pub gross_profit: f64,
    pub gross_loss: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub best_trade: f64,
    pub worst_trade: f64,
    pub total_pnl: f64,
}

impl PerformanceMetrics {
    pub fn empty() -> Self {
        Self {
            total: 0,
            wins: 0,
            losses: 0,
            expired: 0,
            win_rate: 0.0,
            loss_rate: 0.0,
            profit_factor: 0.0,
            expectancy: 0.0,
            avg_rr_real: 0.0,
            avg_duration: 0.0,
            max_drawdown: 0.0,
            equity_curve: Vec::new(),
            gross_profit: 0.0,
            gross_loss: 0.0,
            avg_win: 0.0,
            avg_loss: 0.0,
            best_trade: 0.0,
            worst_trade: 0.0,
            total_pnl: 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeframe_round_trips_through_string() {
        for tf in [Timeframe::M5, Timeframe::M15, Timeframe::M30, Timeframe::H1] {
            assert_eq!(Timeframe::parse(&tf.to_string()), Some(tf));
        }
    }

    #[test]
    fn candle_close_time_is_open_plus_interval() {
        let c = Candle {
            symbol: "R_100".into(),
            open_time: 100,
            open: 1.0,
            high: 1.0,
            low: 1.0,
            close: 1.0,
            tick_count: 1,
            interval_seconds: 5,
        };
        assert_eq!(c.close_time(), 105);
    }

    #[test]
    fn swing_deque_evicts_oldest_past_capacity() {
        let mut d = SwingDeque::new(2);
        d.push(SwingLevel { price: 1.0, timestamp: 1, kind: SwingKind::High });
        d.push(SwingLevel { price: 2.0, timestamp: 2, kind: SwingKind::High });
        d.push(SwingLevel { price: 3.0, timestamp: 3, kind: SwingKind::High });
        assert_eq!(d.levels.len(), 2);
        assert_eq!(d.levels.front().unwrap().price, 2.0);
        assert_eq!(d.last().unwrap().price, 3.0);
    }

    #[test]
    fn trade_from_signal_starts_pending() {
        let sig = Signal {
            id: "abc".into(),
            symbol: "R_100".into(),
            direction: Direction::Buy,
            entry: 100.0,
            stop_loss: 99.0,
            take_profit: 102.0,
            rr_realized: 2.0,
            generated_at: 0,
            confirming_candle_ts: 0,
            conditions: vec!["ema_cross".into()],
            confidence: 1,
            estimated_duration_minutes: 5.0,
        };
        let trade = SimulatedTrade::from_signal(&sig, 1800);
        assert_eq!(trade.status, TradeStatus::Pending);
        assert_eq!(trade.planned_entry, 100.0);
        assert_eq!(trade.max_duration_seconds, 1800);
    }

    #[test]
    fn event_payload_round_trips_through_json() {
        let tick = Tick { symbol: "R_100".into(), epoch: 123, quote: 1.5, bid: None, ask: Some(1.6) };
        let json = serde_json::to_string(&tick).unwrap();
        let back: Tick = serde_json::from_str(&json).unwrap();
        assert_eq!(tick, back);
    }
}
