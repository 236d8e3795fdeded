//! Rolling-window aggregation
//!
//! Recomputes per-(symbol, timeframe) whale statistics from a classified
//! event set on every cycle. The window is a view: inclusion is decided by
//! filter criteria alone, so duplicate delivery and late arrivals cannot
//! corrupt the counts.

use crate::types::{FlowType, SymbolFilter, Timeframe, WhaleEvent, WindowState};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashSet;

fn default_min_whale_usd() -> Decimal {
    Decimal::new(500_000, 0)
}

fn default_buffer_multiplier() -> f64 {
    2.0
}

/// Aggregation parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct AggregatorConfig {
    /// Minimum transfer size in USD to count as a whale.
    #[serde(default = "default_min_whale_usd")]
    pub min_whale_usd: Decimal,
    /// Widens the fetch window beyond the counting window so late-arriving
    /// events near the boundary are available without a second round-trip.
    /// Must be >= 1. The inclusion test still uses the exact cutoff.
    #[serde(default = "default_buffer_multiplier")]
    pub buffer_multiplier: f64,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            min_whale_usd: default_min_whale_usd(),
            buffer_multiplier: default_buffer_multiplier(),
        }
    }
}

/// Stateless window aggregator. Cheap to clone across worker tasks.
#[derive(Debug, Clone)]
pub struct WindowAggregator {
    config: AggregatorConfig,
}

impl WindowAggregator {
    pub fn new(config: AggregatorConfig) -> Self {
        Self { config }
    }

    pub fn min_whale_usd(&self) -> Decimal {
        self.config.min_whale_usd
    }

    /// Widened cutoff used only when fetching from the event store.
    pub fn fetch_cutoff(&self, timeframe: Timeframe, now: DateTime<Utc>) -> DateTime<Utc> {
        let secs = timeframe.duration().num_seconds() as f64 * self.config.buffer_multiplier;
        now - Duration::seconds(secs.round() as i64)
    }

    /// Aggregate classified events into one window.
    ///
    /// Events are deduplicated by id first, so aggregation is idempotent
    /// under duplicate delivery. Directional stats cover inflow/outflow
    /// only; other flow types land in the diagnostic counters. Zero
    /// matching events yield an all-zero window, not an error.
    pub fn aggregate(
        &self,
        filter: &SymbolFilter,
        timeframe: Timeframe,
        events: &[WhaleEvent],
        now: DateTime<Utc>,
    ) -> WindowState {
        let window_start = now - timeframe.duration();
        let cutoff = window_start.timestamp();
        let now_secs = now.timestamp();

        let mut state = WindowState::empty(filter.clone(), timeframe, window_start, now);
        let mut seen: HashSet<&str> = HashSet::new();

        for event in events {
            if event.timestamp < cutoff || event.timestamp > now_secs {
                continue;
            }
            if event.amount_usd < self.config.min_whale_usd {
                continue;
            }
            if !filter.matches(&event.symbol) {
                continue;
            }
            if !seen.insert(event.id.as_str()) {
                continue;
            }

            match event.flow_type {
                FlowType::Inflow => {
                    state.inflow_count += 1;
                    state.whale_count += 1;
                    state.sell_volume_usd += event.amount_usd;
                }
                FlowType::Outflow => {
                    state.outflow_count += 1;
                    state.whale_count += 1;
                    state.buy_volume_usd += event.amount_usd;
                }
                FlowType::Exchange => state.exchange_count += 1,
                FlowType::Internal => state.internal_count += 1,
                FlowType::Defi => state.defi_count += 1,
            }
        }

        state.total_volume_usd = state.buy_volume_usd + state.sell_volume_usd;
        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::OwnerType;
    use rust_decimal_macros::dec;

    fn agg() -> WindowAggregator {
        WindowAggregator::new(AggregatorConfig {
            min_whale_usd: dec!(500_000),
            buffer_multiplier: 2.0,
        })
    }

    fn event(id: &str, symbol: &str, flow: FlowType, amount: Decimal, ts: i64) -> WhaleEvent {
        WhaleEvent {
            id: id.to_string(),
            timestamp: ts,
            symbol: symbol.to_string(),
            blockchain: "ethereum".to_string(),
            amount_usd: amount,
            from_owner: None,
            to_owner: None,
            from_owner_type: OwnerType::Unknown,
            to_owner_type: OwnerType::Unknown,
            flow_type: flow,
        }
    }

    #[test]
    fn test_empty_input_yields_zero_window() {
        let now = Utc::now();
        let state = agg().aggregate(&SymbolFilter::All, Timeframe::H1, &[], now);
        assert_eq!(state.whale_count, 0);
        assert_eq!(state.total_volume_usd, Decimal::ZERO);
        assert_eq!(state.window_start, now - Duration::hours(1));
    }

    #[test]
    fn test_directional_sums_and_counts() {
        let now = Utc::now();
        let ts = now.timestamp() - 60;
        let events = vec![
            event("a", "BTC", FlowType::Inflow, dec!(1_000_000), ts),
            event("b", "BTC", FlowType::Inflow, dec!(2_000_000), ts),
            event("c", "BTC", FlowType::Outflow, dec!(4_000_000), ts),
            event("d", "BTC", FlowType::Internal, dec!(9_000_000), ts),
            event("e", "BTC", FlowType::Defi, dec!(9_000_000), ts),
        ];
        let state = agg().aggregate(&SymbolFilter::symbol("BTC"), Timeframe::H1, &events, now);

        assert_eq!(state.whale_count, 3);
        assert_eq!(state.inflow_count, 2);
        assert_eq!(state.outflow_count, 1);
        assert_eq!(state.internal_count, 1);
        assert_eq!(state.defi_count, 1);
        assert_eq!(state.sell_volume_usd, dec!(3_000_000));
        assert_eq!(state.buy_volume_usd, dec!(4_000_000));
        assert_eq!(state.total_volume_usd, dec!(7_000_000));
    }

    #[test]
    fn test_duplicate_ids_are_idempotent() {
        let now = Utc::now();
        let ts = now.timestamp() - 60;
        let once = vec![event("a", "BTC", FlowType::Inflow, dec!(1_000_000), ts)];
        let twice = vec![
            event("a", "BTC", FlowType::Inflow, dec!(1_000_000), ts),
            event("a", "BTC", FlowType::Inflow, dec!(1_000_000), ts),
        ];

        let a = agg().aggregate(&SymbolFilter::All, Timeframe::H1, &once, now);
        let b = agg().aggregate(&SymbolFilter::All, Timeframe::H1, &twice, now);

        assert_eq!(a.whale_count, b.whale_count);
        assert_eq!(a.sell_volume_usd, b.sell_volume_usd);
    }

    #[test]
    fn test_min_whale_threshold() {
        let now = Utc::now();
        let ts = now.timestamp() - 60;
        let events = vec![
            event("a", "BTC", FlowType::Inflow, dec!(499_999), ts),
            event("b", "BTC", FlowType::Inflow, dec!(500_000), ts),
        ];
        let state = agg().aggregate(&SymbolFilter::All, Timeframe::H1, &events, now);
        assert_eq!(state.whale_count, 1);
    }

    #[test]
    fn test_symbol_filter_vs_combined() {
        let now = Utc::now();
        let ts = now.timestamp() - 60;
        let events = vec![
            event("a", "BTC", FlowType::Inflow, dec!(1_000_000), ts),
            event("b", "ETH", FlowType::Inflow, dec!(1_000_000), ts),
        ];

        let btc = agg().aggregate(&SymbolFilter::symbol("BTC"), Timeframe::H1, &events, now);
        assert_eq!(btc.whale_count, 1);

        let all = agg().aggregate(&SymbolFilter::All, Timeframe::H1, &events, now);
        assert_eq!(all.whale_count, 2);
    }

    #[test]
    fn test_buffered_fetch_exact_counting_window() {
        // 1h window, buffer multiplier 2: the fetch cutoff reaches 2h back,
        // but an event 90 minutes old stays outside the counting window.
        let aggregator = agg();
        let now = Utc::now();

        let fetch_cutoff = aggregator.fetch_cutoff(Timeframe::H1, now);
        assert_eq!(fetch_cutoff, now - Duration::hours(2));

        let ninety_min_ago = (now - Duration::minutes(90)).timestamp();
        assert!(ninety_min_ago >= fetch_cutoff.timestamp());

        let events = vec![event(
            "late",
            "BTC",
            FlowType::Inflow,
            dec!(1_000_000),
            ninety_min_ago,
        )];
        let state = aggregator.aggregate(&SymbolFilter::All, Timeframe::H1, &events, now);
        assert_eq!(state.whale_count, 0);
    }

    #[test]
    fn test_future_events_excluded() {
        let now = Utc::now();
        let events = vec![event(
            "f",
            "BTC",
            FlowType::Inflow,
            dec!(1_000_000),
            now.timestamp() + 3600,
        )];
        let state = agg().aggregate(&SymbolFilter::All, Timeframe::H1, &events, now);
        assert_eq!(state.whale_count, 0);
    }
}
