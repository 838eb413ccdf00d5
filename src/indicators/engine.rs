// =============================================================================
// Incremental Indicator Engine — per (symbol, timeframe) EMA-fast, EMA-slow
// and Wilder RSI, each warmed up from a seed buffer then updated O(1) per
// closed candle.
// =============================================================================

use std::collections::{HashMap, VecDeque};

use parking_lot::RwLock;

use crate::types::{IndicatorSnapshot, Timeframe};

#[derive(Debug, Clone)]
struct Accumulator {
    warmup_count: u64,
    seed: VecDeque<f64>,
    prev_close: Option<f64>,
    ema_fast: Option<f64>,
    ema_slow: Option<f64>,
    avg_gain: Option<f64>,
    avg_loss: Option<f64>,
    rsi: Option<f64>,
}

impl Accumulator {
    fn new() -> Self {
        Self {
            warmup_count: 0,
            seed: VecDeque::new(),
            prev_close: None,
            ema_fast: None,
            ema_slow: None,
            avg_gain: None,
            avg_loss: None,
            rsi: None,
        }
    }

    fn is_fully_warm(&self) -> bool {
        self.ema_fast.is_some() && self.ema_slow.is_some() && self.rsi.is_some()
    }
}

/// Period parameters for one (symbol, timeframe) accumulator.
#[derive(Debug, Clone, Copy)]
pub struct IndicatorParams {
    pub p_fast: u64,
    pub p_slow: u64,
    pub p_rsi: u64,
}

impl Default for IndicatorParams {
    fn default() -> Self {
        Self { p_fast: 12, p_slow: 26, p_rsi: 14 }
    }
}

pub struct IndicatorEngine {
    params: IndicatorParams,
    accumulators: RwLock<HashMap<(String, Timeframe), Accumulator>>,
}

impl IndicatorEngine {
    pub fn new(params: IndicatorParams) -> Self {
        Self {
            params,
            accumulators: RwLock::new(HashMap::new()),
        }
    }

    fn alpha(period: u64) -> f64 {
        2.0 / (period as f64 + 1.0)
    }

    /// Fold one closed TF candle's close price into the (symbol, tf)
    /// accumulator. Returns the resulting snapshot — null-valued until
    /// warm-up completes for each metric.
    pub fn on_close(&self, symbol: &str, tf: Timeframe, close: f64) -> IndicatorSnapshot {
        let mut map = self.accumulators.write();
        let acc = map
            .entry((symbol.to_string(), tf))
            .or_insert_with(Accumulator::new);

        let p_fast = self.params.p_fast;
        let p_slow = self.params.p_slow;
        let p_rsi = self.params.p_rsi;

        // Seed buffer only needed until every metric is warm.
        if !acc.is_fully_warm() {
            acc.seed.push_back(close);
            acc.warmup_count += 1;

            if acc.ema_fast.is_none() && acc.warmup_count == p_fast {
                let window: f64 = acc.seed.iter().rev().take(p_fast as usize).sum();
                acc.ema_fast = Some(window / p_fast as f64);
            } else if let Some(prev) = acc.ema_fast {
                acc.ema_fast = Some(Self::alpha(p_fast) * close + (1.0 - Self::alpha(p_fast)) * prev);
            }

            if acc.ema_slow.is_none() && acc.warmup_count == p_slow {
                let window: f64 = acc.seed.iter().rev().take(p_slow as usize).sum();
                acc.ema_slow = Some(window / p_slow as f64);
            } else if let Some(prev) = acc.ema_slow {
                acc.ema_slow = Some(Self::alpha(p_slow) * close + (1.0 - Self::alpha(p_slow)) * prev);
            }

            if acc.rsi.is_none() && acc.warmup_count == p_rsi + 1 {
                let closes: Vec<f64> = acc.seed.iter().copied().collect();
                let mut gains = 0.0;
                let mut losses = 0.0;
                for w in closes.windows(2) {
                    let delta = w[1] - w[0];
                    if delta > 0.0 {
                        gains += delta;
                    } else {
                        losses += -delta;
                    }
                }
                let n = p_rsi as f64;
                acc.avg_gain = Some(gains / n);
                acc.avg_loss = Some(losses / n);
                acc.rsi = Some(rsi_from_averages(acc.avg_gain.unwrap(), acc.avg_loss.unwrap()));
                acc.prev_close = Some(close);
            } else if acc.rsi.is_some() {
                update_rsi(acc, close, p_rsi);
            } else {
                acc.prev_close = Some(close);
            }

            if acc.is_fully_warm() {
                acc.seed.clear();
            }
        } else {
            acc.ema_fast = Some(Self::alpha(p_fast) * close + (1.0 - Self::alpha(p_fast)) * acc.ema_fast.unwrap());
            acc.ema_slow = Some(Self::alpha(p_slow) * close + (1.0 - Self::alpha(p_slow)) * acc.ema_slow.unwrap());
            update_rsi(acc, close, p_rsi);
        }

        IndicatorSnapshot {
            ema_fast: acc.ema_fast,
            ema_slow: acc.ema_slow,
            rsi: acc.rsi,
        }
    }
}

fn update_rsi(acc: &mut Accumulator, close: f64, p_rsi: u64) {
    let prev = acc.prev_close.unwrap_or(close);
    let delta = close - prev;
    let gain = delta.max(0.0);
    let loss = (-delta).max(0.0);
    let p = p_rsi as f64;
    let avg_gain = (acc.avg_gain.unwrap_or(0.0) * (p - 1.0) + gain) / p;
    let avg_loss = (acc.avg_loss.unwrap_or(0.0) * (p - 1.0) + loss) / p;
    acc.avg_gain = Some(avg_gain);
    acc.avg_loss = Some(avg_loss);
    acc.rsi = Some(rsi_from_averages(avg_gain, avg_loss));
    acc.prev_close = Some(close);
}

/// Wilder RSI from smoothed average gain/loss, with the edge cases from
/// the warm-up/streaming spec: both zero -> 50, loss zero -> 100, gain
/// zero -> 0.
fn rsi_from_averages(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_gain == 0.0 && avg_loss == 0.0 {
        50.0
    } else if avg_loss == 0.0 {
        100.0
    } else if avg_gain == 0.0 {
        0.0
    } else {
        100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
    }
}
