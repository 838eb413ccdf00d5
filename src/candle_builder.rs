// =============================================================================
// Candle Builder — folds ticks into OHLC candles at the base interval
// =============================================================================
//
// One building candle per symbol. Emission lags by the first tick of the
// next bucket: a candle is only frozen and published once a tick lands
// past its close time.
// =============================================================================

use std::collections::HashMap;

use crate::types::{Candle, Tick};

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
    fn start(open_time: i64, price: f64) -> Self {
        Self {
            open_time,
            open: price,
            high: price,
            low: price,
            close: price,
            tick_count: 1,
        }
    }

    fn freeze(&self, symbol: &str, interval_seconds: i64) -> Candle {
        Candle {
            symbol: symbol.to_string(),
            open_time: self.open_time,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            tick_count: self.tick_count,
            interval_seconds,
        }
    }
}

/// Maintains at most one building candle per symbol at a single base
/// interval.
pub struct CandleBuilder {
    interval_seconds: i64,
    building: HashMap<String, Building>,
}

impl CandleBuilder {
    pub fn new(interval_seconds: i64) -> Self {
        Self {
            interval_seconds,
            building: HashMap::new(),
        }
    }

    fn bucket_open(&self, epoch: i64) -> i64 {
        (epoch.div_euclid(self.interval_seconds)) * self.interval_seconds
    }

    /// Fold one tick in. Returns the just-closed candle if this tick rolled
    /// the bucket over, along with the newly-opened building candle's
    /// open_time (the caller never needs the building candle itself, only
    /// the closed one).
    pub fn on_tick(&mut self, tick: &Tick) -> Option<Candle> {
        let bucket_open = self.bucket_open(tick.epoch);

        match self.building.get_mut(&tick.symbol) {
            None => {
                self.building
                    .insert(tick.symbol.clone(), Building::start(bucket_open, tick.quote));
                None
            }
            Some(b) => {
                let close_time = b.open_time + self.interval_seconds;
                if tick.epoch < close_time {
                    b.high = b.high.max(tick.quote);
                    b.low = b.low.min(tick.quote);
                    b.close = tick.quote;
                    b.tick_count += 1;
                    None
                } else {
                    let closed = b.freeze(&tick.symbol, self.interval_seconds);
                    self.building
                        .insert(tick.symbol.clone(), Building::start(bucket_open, tick.quote));
                    Some(closed)
                }
            }
        }
    }
}
