//! Smart Whale Sentiment Index (SWSI)
//!
//! Blends four normalized sub-signals into one composite score per
//! timeframe: market-cap change, large-cap basket change, volume change,
//! and the whale-flow imbalance from the current window. Weights are fixed
//! per deployment and validated at startup.
//!
//! The large-cap basket is the equal-weighted mean change of
//! {BTC, ETH, BNB, SOL, XRP}; the market data source reports it as the
//! `coins_change` percentage.

use crate::types::{
    MarketSnapshot, ScoreComponent, SwsiSnapshot, Timeframe, WindowState,
};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Component weights. Must sum to 1.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct SwsiWeights {
    pub global: f64,
    pub coins: f64,
    pub volume: f64,
    pub whale: f64,
}

impl Default for SwsiWeights {
    fn default() -> Self {
        Self {
            global: 0.25,
            coins: 0.25,
            volume: 0.25,
            whale: 0.25,
        }
    }
}

impl SwsiWeights {
    pub fn sum(&self) -> f64 {
        self.global + self.coins + self.volume + self.whale
    }
}

fn default_pct_full_scale() -> f64 {
    10.0
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScorerConfig {
    #[serde(default)]
    pub weights: SwsiWeights,
    /// Percentage move that saturates a market component at +/-1.
    #[serde(default = "default_pct_full_scale")]
    pub pct_full_scale: f64,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            weights: SwsiWeights::default(),
            pct_full_scale: default_pct_full_scale(),
        }
    }
}

/// Sentiment scorer. Holds the last good market snapshot per timeframe so
/// a transient market-data outage reuses stale components (flagged) instead
/// of silently substituting zero, which would bias the score neutral.
pub struct SentimentScorer {
    config: ScorerConfig,
    last_market: RwLock<HashMap<Timeframe, MarketSnapshot>>,
}

impl SentimentScorer {
    pub fn new(config: ScorerConfig) -> Self {
        Self {
            config,
            last_market: RwLock::new(HashMap::new()),
        }
    }

    /// Normalize a percentage change to [-1, 1].
    fn normalize_pct(&self, pct: f64) -> f64 {
        if !pct.is_finite() {
            return 0.0;
        }
        (pct / self.config.pct_full_scale).clamp(-1.0, 1.0)
    }

    /// Compute one snapshot for a timeframe.
    ///
    /// Returns `None` when no market data is available at all (fetch failed
    /// and no prior snapshot exists): the cycle is skipped for this
    /// timeframe and the previous snapshot stays current.
    pub fn score(
        &self,
        timeframe: Timeframe,
        market: Option<MarketSnapshot>,
        window: &WindowState,
        now: DateTime<Utc>,
    ) -> Option<SwsiSnapshot> {
        let mut stale_components = Vec::new();
        let mut reused = false;

        let market = match market {
            Some(m) => {
                self.last_market.write().insert(timeframe, m.clone());
                m
            }
            None => {
                let last = self.last_market.read().get(&timeframe).cloned();
                match last {
                    Some(m) => {
                        debug!(%timeframe, "reusing last market snapshot");
                        reused = true;
                        m
                    }
                    None => {
                        warn!(%timeframe, "no market data available, skipping cycle");
                        return None;
                    }
                }
            }
        };

        // Carried-over components are always flagged; a snapshot older
        // than one full timeframe duration is distrusted even when the
        // fetch just returned it.
        if reused || now - market.fetched_at > timeframe.duration() {
            stale_components.extend([
                ScoreComponent::GlobalChange,
                ScoreComponent::CoinsChange,
                ScoreComponent::VolumeChange,
            ]);
        }

        let global_change = self.normalize_pct(market.global_change);
        let coins_change = self.normalize_pct(market.coins_change);
        let volume_change = self.normalize_pct(market.volume_change);
        let whale_weight = window.flow_imbalance();

        let w = &self.config.weights;
        let swsi_score = w.global * global_change
            + w.coins * coins_change
            + w.volume * volume_change
            + w.whale * whale_weight;

        let bull_ratio = (0.5 + swsi_score / 2.0).clamp(0.0, 1.0);
        let bear_ratio = 1.0 - bull_ratio;

        Some(SwsiSnapshot {
            timeframe,
            global_change,
            coins_change,
            volume_change,
            whale_weight,
            swsi_score,
            bull_ratio,
            bear_ratio,
            whale_count: window.whale_count,
            buy_volume_usd: window.buy_volume_usd,
            sell_volume_usd: window.sell_volume_usd,
            total_volume_usd: window.total_volume_usd,
            stale_components,
            created_at: now,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SymbolFilter;
    use rust_decimal_macros::dec;

    fn scorer() -> SentimentScorer {
        SentimentScorer::new(ScorerConfig::default())
    }

    fn window(buy: rust_decimal::Decimal, sell: rust_decimal::Decimal) -> WindowState {
        let now = Utc::now();
        let mut w = WindowState::empty(SymbolFilter::All, Timeframe::H1, now, now);
        w.buy_volume_usd = buy;
        w.sell_volume_usd = sell;
        w.total_volume_usd = buy + sell;
        w
    }

    fn market(g: f64, c: f64, v: f64, fetched_at: DateTime<Utc>) -> MarketSnapshot {
        MarketSnapshot {
            global_change: g,
            coins_change: c,
            volume_change: v,
            fetched_at,
        }
    }

    #[test]
    fn test_whale_weight_zero_volumes() {
        let now = Utc::now();
        let snap = scorer()
            .score(
                Timeframe::H1,
                Some(market(0.0, 0.0, 0.0, now)),
                &window(dec!(0), dec!(0)),
                now,
            )
            .unwrap();
        assert_eq!(snap.whale_weight, 0.0);
        assert!(snap.swsi_score.is_finite());
    }

    #[test]
    fn test_ratios_sum_to_one() {
        let now = Utc::now();
        let s = scorer();
        for (g, c, v) in [(0.0, 0.0, 0.0), (5.0, -3.0, 2.0), (-9.0, -9.0, -9.0)] {
            let snap = s
                .score(
                    Timeframe::H4,
                    Some(market(g, c, v, now)),
                    &window(dec!(100), dec!(900)),
                    now,
                )
                .unwrap();
            assert!((snap.bull_ratio + snap.bear_ratio - 1.0).abs() < 1e-12);
            assert!((0.0..=1.0).contains(&snap.bull_ratio));
        }
    }

    #[test]
    fn test_ratios_clamped_on_extreme_score() {
        // Weights that push |swsi| beyond 1 still give ratios in [0, 1].
        let config = ScorerConfig {
            weights: SwsiWeights {
                global: 2.0,
                coins: 0.0,
                volume: 0.0,
                whale: -1.0,
            },
            pct_full_scale: 1.0,
        };
        let s = SentimentScorer::new(config);
        let now = Utc::now();
        let snap = s
            .score(
                Timeframe::H1,
                Some(market(50.0, 0.0, 0.0, now)),
                &window(dec!(0), dec!(1_000_000)),
                now,
            )
            .unwrap();
        assert!(snap.swsi_score > 1.0);
        assert_eq!(snap.bull_ratio, 1.0);
        assert_eq!(snap.bear_ratio, 0.0);
    }

    #[test]
    fn test_normalization_saturates() {
        let now = Utc::now();
        let snap = scorer()
            .score(
                Timeframe::H1,
                Some(market(25.0, -25.0, 0.0, now)),
                &window(dec!(0), dec!(0)),
                now,
            )
            .unwrap();
        assert_eq!(snap.global_change, 1.0);
        assert_eq!(snap.coins_change, -1.0);
    }

    #[test]
    fn test_missing_market_reuses_last_with_stale_flags() {
        let now = Utc::now();
        let s = scorer();
        let w = window(dec!(500), dec!(500));

        let first = s
            .score(Timeframe::H1, Some(market(4.0, 2.0, 1.0, now)), &w, now)
            .unwrap();
        assert!(first.stale_components.is_empty());

        // Next cycle: fetch failed, but the reused snapshot is 2h old and
        // must be flagged stale.
        let later = now + chrono::Duration::hours(2);
        let second = s.score(Timeframe::H1, None, &w, later).unwrap();
        assert!(second.is_stale());
        assert_eq!(second.global_change, first.global_change);
    }

    #[test]
    fn test_reuse_within_duration_still_flagged() {
        // The fetch fails only ten minutes after a good one: the reused
        // components are younger than the timeframe but must still carry
        // the staleness flags.
        let now = Utc::now();
        let s = scorer();
        let w = window(dec!(500), dec!(500));

        let first = s
            .score(Timeframe::H1, Some(market(4.0, 2.0, 1.0, now)), &w, now)
            .unwrap();
        assert!(first.stale_components.is_empty());

        let soon = now + chrono::Duration::minutes(10);
        let second = s.score(Timeframe::H1, None, &w, soon).unwrap();
        assert!(second.is_stale());
        assert_eq!(second.stale_components.len(), 3);
        assert_eq!(second.global_change, first.global_change);
    }

    #[test]
    fn test_no_market_ever_skips_cycle() {
        let now = Utc::now();
        let snap = scorer().score(Timeframe::D1, None, &window(dec!(1), dec!(1)), now);
        assert!(snap.is_none());
    }

    #[test]
    fn test_fresh_old_snapshot_flagged() {
        // Even a just-fetched snapshot is flagged when its fetched_at is
        // older than one full timeframe duration.
        let now = Utc::now();
        let old = market(1.0, 1.0, 1.0, now - chrono::Duration::hours(3));
        let snap = scorer()
            .score(Timeframe::H1, Some(old), &window(dec!(1), dec!(1)), now)
            .unwrap();
        assert!(snap.is_stale());
    }

    #[test]
    fn test_whale_weight_direction() {
        let now = Utc::now();
        let s = scorer();
        let bullish = s
            .score(
                Timeframe::H1,
                Some(market(0.0, 0.0, 0.0, now)),
                &window(dec!(900), dec!(100)),
                now,
            )
            .unwrap();
        assert!(bullish.whale_weight > 0.0);
        assert!(bullish.bull_ratio > 0.5);

        let bearish = s
            .score(
                Timeframe::H1,
                Some(market(0.0, 0.0, 0.0, now)),
                &window(dec!(100), dec!(900)),
                now,
            )
            .unwrap();
        assert!(bearish.whale_weight < 0.0);
        assert!(bearish.bear_ratio > 0.5);
    }
}
