// =============================================================================
// Support/Resistance Engine — swing detection and bounce/breakout/
// consolidation predicates over a single symbol's active-timeframe buffer.
// =============================================================================

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::types::{Candle, SwingDeque, SwingKind, SwingLevel};

#[derive(Debug, Clone, Copy)]
pub struct SrConfig {
    pub tolerance_pct: f64,
    pub k_break: f64,
    pub consolidation_candles: usize,
    pub k_consol: f64,
    pub avg_range_window: usize,
    pub max_levels: usize,
}

impl Default for SrConfig {
    fn default() -> Self {
        Self {
            tolerance_pct: 0.0015,
            k_break: 1.2,
            consolidation_candles: 10,
            k_consol: 2.0,
            avg_range_window: 10,
            max_levels: 10,
        }
    }
}

struct SymbolLevels {
    highs: SwingDeque,
    lows: SwingDeque,
}

/// Per-symbol swing-level state, guarded independently per symbol.
pub struct SrEngine {
    config: SrConfig,
    levels: RwLock<HashMap<String, SymbolLevels>>,
}

impl SrEngine {
    pub fn new(config: SrConfig) -> Self {
        Self {
            config,
            levels: RwLock::new(HashMap::new()),
        }
    }

    /// Inspect the last three candles of the active TF's buffer and
    /// confirm a swing at the middle candle if its high/low strictly
    /// exceeds both neighbours. Detection is one candle late by
    /// construction: the caller passes the buffer as-of the candle
    /// already closed, so the "middle" candle here is the second-to-last.
    pub fn on_closed_candle(&self, symbol: &str, buffer: &[Candle]) {
        if buffer.len() < 3 {
            return;
        }
        let n = buffer.len();
        let prev = &buffer[n - 3];
        let mid = &buffer[n - 2];
        let next = &buffer[n - 1];

        let mut map = self.levels.write();
        let entry = map.entry(symbol.to_string()).or_insert_with(|| SymbolLevels {
            highs: SwingDeque::new(self.config.max_levels),
            lows: SwingDeque::new(self.config.max_levels),
        });

        if mid.high > prev.high && mid.high > next.high {
            entry.highs.push(SwingLevel {
                price: mid.high,
                timestamp: mid.open_time,
                kind: SwingKind::High,
            });
        }
        if mid.low < prev.low && mid.low < next.low {
            entry.lows.push(SwingLevel {
                price: mid.low,
                timestamp: mid.open_time,
                kind: SwingKind::Low,
            });
        }
    }

    pub fn nearest_support(&self, symbol: &str, price: f64) -> Option<f64> {
        self.levels
            .read()
            .get(symbol)
            .and_then(|l| l.lows.levels.iter().filter(|s| s.price < price).map(|s| s.price).fold(None, max_opt))
    }

    pub fn nearest_resistance(&self, symbol: &str, price: f64) -> Option<f64> {
        self.levels
            .read()
            .get(symbol)
            .and_then(|l| l.highs.levels.iter().filter(|s| s.price > price).map(|s| s.price).fold(None, min_opt))
    }

    pub fn last_swing_low(&self, symbol: &str) -> Option<f64> {
        self.levels.read().get(symbol).and_then(|l| l.lows.last()).map(|s| s.price)
    }

    pub fn last_swing_high(&self, symbol: &str) -> Option<f64> {
        self.levels.read().get(symbol).and_then(|l| l.highs.last()).map(|s| s.price)
    }

    fn avg_range(&self, buffer: &[Candle]) -> f64 {
        let window = buffer.iter().rev().take(self.config.avg_range_window);
        let (sum, n) = window.fold((0.0, 0usize), |(s, n), c| (s + (c.high - c.low), n + 1));
        if n == 0 { 0.0 } else { sum / n as f64 }
    }

    pub fn bounce_on_support(&self, candle: &Candle, support: f64) -> bool {
        let tol = self.config.tolerance_pct;
        candle.low <= support * (1.0 + tol) && candle.close > support && candle.close > candle.open
    }

    pub fn rejection_at_resistance(&self, candle: &Candle, resistance: f64) -> bool {
        let tol = self.config.tolerance_pct;
        candle.high >= resistance * (1.0 - tol) && candle.close < resistance && candle.close < candle.open
    }

    pub fn breakout_above(&self, candle: &Candle, resistance: f64, buffer: &[Candle]) -> bool {
        let range = candle.high - candle.low;
        candle.close > resistance && range > self.avg_range(buffer) * self.config.k_break
    }

    pub fn breakout_below(&self, candle: &Candle, support: f64, buffer: &[Candle]) -> bool {
        let range = candle.high - candle.low;
        candle.close < support && range > self.avg_range(buffer) * self.config.k_break
    }

    /// Conservative by construction: fewer than N candles are treated as
    /// consolidating.
    pub fn is_consolidating(&self, buffer: &[Candle]) -> bool {
        let n = self.config.consolidation_candles;
        if buffer.len() < n {
            return true;
        }
        let window = &buffer[buffer.len() - n..];
        let max_high = window.iter().map(|c| c.high).fold(f64::MIN, f64::max);
        let min_low = window.iter().map(|c| c.low).fold(f64::MAX, f64::min);
        let mean_range: f64 = window.iter().map(|c| c.high - c.low).sum::<f64>() / n as f64;
        (max_high - min_low) < self.config.k_consol * mean_range
    }
}

fn max_opt(acc: Option<f64>, v: f64) -> Option<f64> {
    Some(acc.map_or(v, |a| a.max(v)))
}

fn min_opt(acc: Option<f64>, v: f64) -> Option<f64> {
    Some(acc.map_or(v, |a| a.min(v)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(open_time: i64, o: f64, h: f64, l: f64, c: f64) -> Candle {
        Candle { symbol: "S".into(), open_time, open: o, high: h, low: l, close: c, tick_count: 1, interval_seconds: 300 }
    }

    #[test]
    fn swing_high_requires_strictly_greater_than_both_neighbours() {
        let eng = SrEngine::new(SrConfig::default());
        let buf = vec![
            candle(0, 10.0, 10.0, 9.0, 10.0),
            candle(300, 10.0, 12.0, 9.5, 11.0),
            candle(600, 11.0, 11.0, 10.0, 10.5),
        ];
        eng.on_closed_candle("S", &buf);
        assert_eq!(eng.last_swing_high("S"), Some(12.0));
    }

    #[test]
    fn swing_low_requires_strictly_less_than_both_neighbours() {
        let eng = SrEngine::new(SrConfig::default());
        let buf = vec![
            candle(0, 10.0, 11.0, 9.5, 10.0),
            candle(300, 10.0, 10.5, 8.0, 9.0),
            candle(600, 9.0, 10.0, 8.5, 9.5),
        ];
        eng.on_closed_candle("S", &buf);
        assert_eq!(eng.last_swing_low("S"), Some(8.0));
    }

    #[test]
    fn fewer_than_three_candles_detects_nothing() {
        let eng = SrEngine::new(SrConfig::default());
        eng.on_closed_candle("S", &[candle(0, 1.0, 1.0, 1.0, 1.0)]);
        assert_eq!(eng.last_swing_high("S"), None);
    }

    #[test]
    fn nearest_support_and_resistance_pick_closest_on_each_side() {
        let eng = SrEngine::new(SrConfig::default());
        let buf1 = vec![
            candle(0, 10.0, 10.0, 5.0, 10.0),
            candle(300, 10.0, 10.5, 3.0, 4.0),
            candle(600, 4.0, 11.0, 4.5, 5.0),
        ];
        eng.on_closed_candle("S", &buf1);
        let buf2 = vec![
            candle(600, 4.0, 11.0, 4.5, 5.0),
            candle(900, 5.0, 7.0, 4.8, 6.0),
            candle(1200, 6.0, 6.5, 5.5, 6.2),
        ];
        eng.on_closed_candle("S", &buf2);
        assert_eq!(eng.nearest_support("S", 5.0), Some(3.0));
        assert_eq!(eng.nearest_resistance("S", 5.0), Some(11.0));
    }

    #[test]
    fn scenario_consolidation_rejection_from_spec() {
        let eng = SrEngine::new(SrConfig { k_consol: 2.0, consolidation_candles: 10, ..Default::default() });
        // every candle has h-l = 1.0 (mean range = 1.0); the last candle's
        // low and the first candle's high are pushed apart so that
        // max(high) - min(low) = 1.8 < 2.0 * 1.0 -> consolidating.
        let mut buf = Vec::new();
        for i in 0..10 {
            buf.push(candle(i * 300, 100.0, 101.0, 100.0, 100.5));
        }
        buf[9].low = 99.2;
        buf[9].high = 100.2;
        assert!(eng.is_consolidating(&buf));
    }

    #[test]
    fn fewer_than_n_candles_is_conservatively_consolidating() {
        let eng = SrEngine::new(SrConfig::default());
        let buf = vec![candle(0, 1.0, 2.0, 0.5, 1.5)];
        assert!(eng.is_consolidating(&buf));
    }

    #[test]
    fn bounce_and_rejection_predicates() {
        let eng = SrEngine::new(SrConfig::default());
        let bounce_candle = candle(0, 99.0, 101.0, 99.9, 100.5);
        assert!(eng.bounce_on_support(&bounce_candle, 100.0));
        let reject_candle = candle(0, 101.0, 100.1, 99.0, 99.5);
        assert!(eng.rejection_at_resistance(&reject_candle, 100.0));
    }
}
