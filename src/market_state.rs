// =============================================================================
// Market State — per-symbol ring buffers for ticks and per-timeframe candles
// =============================================================================
//
// Mutation happens exclusively from the orchestrator's single tick loop;
// external readers receive defensive copies via the snapshot accessors.
// =============================================================================

use std::collections::{HashMap, VecDeque};

use parking_lot::RwLock;

use crate::types::{Candle, Tick, Timeframe};

struct SymbolState {
    last_tick: Option<Tick>,
    last_price: Option<f64>,
    base_candles: VecDeque<Candle>,
    tf_candles: HashMap<Timeframe, VecDeque<Candle>>,
}

impl SymbolState {
    fn new() -> Self {
        Self {
            last_tick: None,
            last_price: None,
            base_candles: VecDeque::new(),
            tf_candles: HashMap::new(),
        }
    }
}

/// Arena-indexed per-symbol storage: a single map keyed by symbol, created
/// lazily on first tick. No cross-symbol sharing of mutable state exists.
pub struct MarketState {
    max_candles_buffer: usize,
    symbols: RwLock<HashMap<String, SymbolState>>,
}

impl MarketState {
    pub fn new(max_candles_buffer: usize) -> Self {
        Self {
            max_candles_buffer,
            symbols: RwLock::new(HashMap::new()),
        }
    }

    pub fn update_last_tick(&self, tick: &Tick) {
        let mut map = self.symbols.write();
        let entry = map.entry(tick.symbol.clone()).or_insert_with(SymbolState::new);
        entry.last_price = Some(tick.quote);
        entry.last_tick = Some(tick.clone());
    }

    pub fn last_price(&self, symbol: &str) -> Option<f64> {
        self.symbols.read().get(symbol).and_then(|s| s.last_price)
    }

    pub fn last_tick(&self, symbol: &str) -> Option<Tick> {
        self.symbols.read().get(symbol).and_then(|s| s.last_tick.clone())
    }

    pub fn push_base_candle(&self, candle: Candle) {
        let mut map = self.symbols.write();
        let entry = map.entry(candle.symbol.clone()).or_insert_with(SymbolState::new);
        if entry.base_candles.len() >= self.max_candles_buffer {
            entry.base_candles.pop_front();
        }
        entry.base_candles.push_back(candle);
    }

    pub fn push_tf_candle(&self, tf: Timeframe, candle: Candle) {
        let mut map = self.symbols.write();
        let entry = map.entry(candle.symbol.clone()).or_insert_with(SymbolState::new);
        let buf = entry.tf_candles.entry(tf).or_insert_with(VecDeque::new);
        if buf.len() >= self.max_candles_buffer {
            buf.pop_front();
        }
        buf.push_back(candle);
    }

    /// Defensive copy of the base-candle buffer for a symbol.
    pub fn base_candles(&self, symbol: &str) -> Vec<Candle> {
        self.symbols
            .read()
            .get(symbol)
            .map(|s| s.base_candles.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Defensive copy of the TF-candle buffer for a symbol and timeframe.
    pub fn tf_candles(&self, symbol: &str, tf: Timeframe) -> Vec<Candle> {
        self.symbols
            .read()
            .get(symbol)
            .and_then(|s| s.tf_candles.get(&tf))
            .map(|b| b.iter().cloned().collect())
            .unwrap_or_default()
    }
}
