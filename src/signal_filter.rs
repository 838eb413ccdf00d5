// =============================================================================
// Signal Filter — seam for an external ML/rules filter over emitted signals
// =============================================================================
//
// The original smart-filter stack gated signals behind a cluster of
// feature-flagged heuristics (HTF alignment, score momentum, entropy, CUSUM,
// ...) read out of a shared config. That surface is re-architected here as a
// single explicit trait: one evaluation method, called once per candidate
// signal, returning an allow/block decision plus an optional reason. Anything
// wanting to plug in a learned filter implements this trait instead of
// reaching into engine internals.
// =============================================================================

use crate::types::{IndicatorSnapshot, Signal};

/// Decision returned by a `SignalFilter`.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterDecision {
    Allow,
    Block(String),
}

impl FilterDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, FilterDecision::Allow)
    }
}

/// A pluggable gate evaluated on every candidate signal before the trade
/// simulator is handed the signal. Implementors must be side-effect free
/// with respect to engine state; they may only read.
pub trait SignalFilter: Send + Sync {
    fn evaluate(&self, signal: &Signal, snapshot: &IndicatorSnapshot) -> FilterDecision;
}

/// Default filter: blocks nothing. Used when no external filter is wired in.
pub struct AllowAll;

impl SignalFilter for AllowAll {
    fn evaluate(&self, _signal: &Signal, _snapshot: &IndicatorSnapshot) -> FilterDecision {
        FilterDecision::Allow
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Direction;

    fn signal() -> Signal {
        Signal {
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
        }
    }

    #[test]
    fn allow_all_never_blocks() {
        let filter = AllowAll;
        let decision = filter.evaluate(&signal(), &IndicatorSnapshot::default());
        assert!(decision.is_allowed());
    }

    struct BlockEverything;
    impl SignalFilter for BlockEverything {
        fn evaluate(&self, _s: &Signal, _snap: &IndicatorSnapshot) -> FilterDecision {
            FilterDecision::Block("test block".into())
        }
    }

    #[test]
    fn custom_filter_can_block() {
        let filter = BlockEverything;
        let decision = filter.evaluate(&signal(), &IndicatorSnapshot::default());
        assert!(!decision.is_allowed());
        assert_eq!(decision, FilterDecision::Block("test block".into()));
    }
}
