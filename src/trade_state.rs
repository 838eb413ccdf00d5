// =============================================================================
// Trade State — single active-trade slot per symbol + bounded closed history
// =============================================================================
//
// `register` is a compare-and-set: it fails if the symbol's slot is already
// occupied, guaranteeing at most one PENDING/OPEN trade per symbol at a
// time.
// =============================================================================

use std::collections::{HashMap, VecDeque};

use parking_lot::RwLock;

use crate::types::SimulatedTrade;

const MAX_HISTORY: usize = 500;

struct SymbolTrades {
    active: Option<SimulatedTrade>,
    closed: VecDeque<SimulatedTrade>,
}

pub struct TradeState {
    symbols: RwLock<HashMap<String, SymbolTrades>>,
}

impl TradeState {
    pub fn new() -> Self {
        Self {
            symbols: RwLock::new(HashMap::new()),
        }
    }

    /// Compare-and-set registration of a new active trade. Fails (returns
    /// `false`) if the symbol already has an active trade.
    pub fn register(&self, trade: SimulatedTrade) -> bool {
        let mut map = self.symbols.write();
        let entry = map.entry(trade.symbol.clone()).or_insert_with(|| SymbolTrades {
            active: None,
            closed: VecDeque::new(),
        });
        if entry.active.is_some() {
            return false;
        }
        entry.active = Some(trade);
        true
    }

    pub fn active(&self, symbol: &str) -> Option<SimulatedTrade> {
        self.symbols.read().get(symbol).and_then(|s| s.active.clone())
    }

    pub fn all_active(&self) -> Vec<SimulatedTrade> {
        self.symbols.read().values().filter_map(|s| s.active.clone()).collect()
    }

    /// Mutate the active trade for `symbol` in place via `f`. Returns the
    /// updated trade, or `None` if no active trade exists.
    pub fn mutate_active<F: FnOnce(&mut SimulatedTrade)>(&self, symbol: &str, f: F) -> Option<SimulatedTrade> {
        let mut map = self.symbols.write();
        let entry = map.get_mut(symbol)?;
        let trade = entry.active.as_mut()?;
        f(trade);
        Some(trade.clone())
    }

    /// Move the active trade to the closed history ring buffer. Fails
    /// silently (an `InvariantViolation`, logged by the caller) if there is
    /// no active trade for the symbol.
    pub fn archive_active(&self, symbol: &str) -> Option<SimulatedTrade> {
        let mut map = self.symbols.write();
        let entry = map.get_mut(symbol)?;
        let trade = entry.active.take()?;
        if entry.closed.len() >= MAX_HISTORY {
            entry.closed.pop_front();
        }
        entry.closed.push_back(trade.clone());
        Some(trade)
    }

    pub fn closed(&self, symbol: &str) -> Vec<SimulatedTrade> {
        self.symbols
            .read()
            .get(symbol)
            .map(|s| s.closed.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn all_closed(&self) -> Vec<SimulatedTrade> {
        self.symbols
            .read()
            .values()
            .flat_map(|s| s.closed.iter().cloned())
            .collect()
    }
}

impl Default for TradeState {
    fn default() -> Self {
        Self::new()
    }
}
