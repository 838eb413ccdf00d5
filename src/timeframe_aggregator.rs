// =============================================================================
// Timeframe Aggregator — folds closed base candles into higher-TF candles
// =============================================================================
//
// One building TF candle per (symbol, timeframe). The set of timeframes is
// fixed at construction.
// =============================================================================

use std::collections::HashMap;

use crate::types::{Candle, Timeframe};

#[derive(Debug, Clone)]
struct Building {
    open_time: i64,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    tick_count: u64,
}

impl Building {
    fn start(open_time: i64, base: &Candle) -> Self {
        Self {
            open_time,
            open: base.open,
            high: base.high,
            low: base.low,
            close: base.close,
            tick_count: 1,
        }
    }

    fn fold(&mut self, base: &Candle) {
        self.high = self.high.max(base.high);
        self.low = self.low.min(base.low);
        self.close = base.close;
        self.tick_count += 1;
    }

    fn freeze(&self, symbol: &str, tf: Timeframe) -> Candle {
        Candle {
            symbol: symbol.to_string(),
            open_time: self.open_time,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            tick_count: self.tick_count,
            interval_seconds: tf.seconds(),
        }
    }
}

pub struct TimeframeAggregator {
    timeframes: Vec<Timeframe>,
    building: HashMap<(String, Timeframe), Building>,
}

impl TimeframeAggregator {
    pub fn new(timeframes: Vec<Timeframe>) -> Self {
        Self {
            timeframes,
            building: HashMap::new(),
        }
    }

    pub fn timeframes(&self) -> &[Timeframe] {
        &self.timeframes
    }

    fn bucket_open(tf: Timeframe, open_time: i64) -> i64 {
        (open_time.div_euclid(tf.seconds())) * tf.seconds()
    }

    /// Fold one closed base candle into every configured timeframe. Returns
    /// the TF candles that closed as a result, paired with their timeframe.
    pub fn on_base_candle(&mut self, base: &Candle) -> Vec<(Timeframe, Candle)> {
        let mut closed = Vec::new();
        for &tf in &self.timeframes.clone() {
            let key = (base.symbol.clone(), tf);
            let bucket_open = Self::bucket_open(tf, base.open_time);

            match self.building.get_mut(&key) {
                None => {
                    self.building.insert(key, Building::start(bucket_open, base));
                }
                Some(b) => {
                    let tf_close_time = b.open_time + tf.seconds();
                    if base.open_time < tf_close_time {
                        b.fold(base);
                    } else {
                        let frozen = b.freeze(&base.symbol, tf);
                        closed.push((tf, frozen));
                        self.building.insert(key, Building::start(bucket_open, base));
                    }
                }
            }
        }
        closed
    }
}
