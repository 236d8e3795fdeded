//! Rule-based alert evaluation
//!
//! Rules are data, not code paths: each rule carries a typed condition with
//! its own thresholds, so new rules are additive configuration. Firing is
//! governed per (rule, symbol, timeframe) by a cooldown store with atomic
//! check-and-set semantics, which keeps a sustained condition from storming
//! and concurrent evaluators from double-firing.

use crate::error::Result;
use crate::types::{
    Alert, Severity, SwsiSnapshot, Timeframe, WhaleEvent, WindowState,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// Typed alert condition. Threshold values are rule parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuleCondition {
    /// Frequency of large individual transfers within a short window.
    /// Counts directional (inflow/outflow) whales only.
    WhaleSurge {
        window_secs: i64,
        min_amount_usd: Decimal,
        min_count: usize,
    },
    /// Composite score beyond a bound. `min_score` fires on bullish
    /// extremes, `max_score` on bearish ones; at least one must be set.
    SwsiExtreme {
        #[serde(default)]
        min_score: Option<f64>,
        #[serde(default)]
        max_score: Option<f64>,
    },
    /// One-sided buy/sell volume imbalance in a window.
    NetFlowImbalance {
        min_ratio: f64,
        min_volume_usd: Decimal,
    },
}

/// Static alert rule configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRule {
    pub id: String,
    pub description: String,
    /// Lower fires first in the stable emission order.
    pub priority: u32,
    pub severity: Severity,
    pub cooldown_secs: i64,
    pub condition: RuleCondition,
}

impl AlertRule {
    pub fn cooldown(&self) -> Duration {
        Duration::seconds(self.cooldown_secs)
    }
}

/// Built-in rule table.
pub fn default_rules() -> Vec<AlertRule> {
    vec![
        AlertRule {
            id: "whale_surge".to_string(),
            description: "3+ transfers of $100M+ within 10 minutes".to_string(),
            priority: 10,
            severity: Severity::Critical,
            cooldown_secs: 1800,
            condition: RuleCondition::WhaleSurge {
                window_secs: 600,
                min_amount_usd: Decimal::new(100_000_000, 0),
                min_count: 3,
            },
        },
        AlertRule {
            id: "swsi_extreme_bull".to_string(),
            description: "SWSI beyond strong-bull threshold".to_string(),
            priority: 20,
            severity: Severity::Warning,
            cooldown_secs: 3600,
            condition: RuleCondition::SwsiExtreme {
                min_score: Some(0.6),
                max_score: None,
            },
        },
        AlertRule {
            id: "swsi_extreme_bear".to_string(),
            description: "SWSI beyond strong-bear threshold".to_string(),
            priority: 20,
            severity: Severity::Warning,
            cooldown_secs: 3600,
            condition: RuleCondition::SwsiExtreme {
                min_score: None,
                max_score: Some(-0.6),
            },
        },
        AlertRule {
            id: "net_flow_imbalance".to_string(),
            description: "One-sided whale flow above 80% of window volume".to_string(),
            priority: 30,
            severity: Severity::Info,
            cooldown_secs: 3600,
            condition: RuleCondition::NetFlowImbalance {
                min_ratio: 0.8,
                min_volume_usd: Decimal::new(250_000_000, 0),
            },
        },
    ]
}

/// Last-fired bookkeeping, the only cross-cycle mutable state. Implementors
/// must make `try_fire` atomic so two concurrent evaluators cannot both win
/// the same (rule, symbol, timeframe) key.
#[async_trait]
pub trait CooldownStore: Send + Sync {
    async fn last_fired(
        &self,
        rule_id: &str,
        symbol: &str,
        timeframe: Timeframe,
    ) -> Result<Option<DateTime<Utc>>>;

    /// Record a fire iff the cooldown has elapsed (or the key is new).
    /// Returns false when still cooling down or another writer won.
    async fn try_fire(
        &self,
        rule_id: &str,
        symbol: &str,
        timeframe: Timeframe,
        now: DateTime<Utc>,
        cooldown: Duration,
    ) -> Result<bool>;
}

/// In-process cooldown store. Check-and-set runs under a single write lock.
#[derive(Default)]
pub struct MemoryCooldownStore {
    fired: RwLock<HashMap<(String, String, Timeframe), DateTime<Utc>>>,
}

impl MemoryCooldownStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CooldownStore for MemoryCooldownStore {
    async fn last_fired(
        &self,
        rule_id: &str,
        symbol: &str,
        timeframe: Timeframe,
    ) -> Result<Option<DateTime<Utc>>> {
        let key = (rule_id.to_string(), symbol.to_string(), timeframe);
        Ok(self.fired.read().get(&key).copied())
    }

    async fn try_fire(
        &self,
        rule_id: &str,
        symbol: &str,
        timeframe: Timeframe,
        now: DateTime<Utc>,
        cooldown: Duration,
    ) -> Result<bool> {
        let key = (rule_id.to_string(), symbol.to_string(), timeframe);
        let mut fired = self.fired.write();
        if let Some(last) = fired.get(&key) {
            if now - *last < cooldown {
                return Ok(false);
            }
        }
        fired.insert(key, now);
        Ok(true)
    }
}

/// A condition that came out true this cycle, before cooldown gating.
pub struct PendingAlert {
    pub priority: u32,
    pub alert: Alert,
    pub cooldown: Duration,
}

/// Evaluates the rule table against aggregated state.
pub struct AlertEvaluator {
    rules: Vec<AlertRule>,
}

impl AlertEvaluator {
    pub fn new(rules: Vec<AlertRule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[AlertRule] {
        &self.rules
    }

    /// Evaluate all rules and build the candidate list without touching
    /// cooldown state. Candidates come back in stable
    /// (priority, symbol, timeframe) order for deterministic downstream
    /// consumption; gating happens at emission time.
    pub fn pending(
        &self,
        windows: &[WindowState],
        snapshots: &HashMap<Timeframe, SwsiSnapshot>,
        events: &[WhaleEvent],
        now: DateTime<Utc>,
    ) -> Vec<PendingAlert> {
        let mut candidates = Vec::new();

        for rule in &self.rules {
            match &rule.condition {
                RuleCondition::WhaleSurge {
                    window_secs,
                    min_amount_usd,
                    min_count,
                } => self.check_surge(
                    rule,
                    events,
                    *window_secs,
                    *min_amount_usd,
                    *min_count,
                    now,
                    &mut candidates,
                ),
                RuleCondition::SwsiExtreme {
                    min_score,
                    max_score,
                } => self.check_swsi(rule, snapshots, *min_score, *max_score, now, &mut candidates),
                RuleCondition::NetFlowImbalance {
                    min_ratio,
                    min_volume_usd,
                } => self.check_imbalance(
                    rule,
                    windows,
                    *min_ratio,
                    *min_volume_usd,
                    now,
                    &mut candidates,
                ),
            }
        }

        candidates.sort_by(|a, b| {
            (a.priority, &a.alert.symbol, a.alert.timeframe)
                .cmp(&(b.priority, &b.alert.symbol, b.alert.timeframe))
        });
        candidates
    }

    /// Evaluate and gate in one step: each candidate passes the cooldown
    /// gate individually, in the stable order from [`Self::pending`].
    pub async fn evaluate(
        &self,
        windows: &[WindowState],
        snapshots: &HashMap<Timeframe, SwsiSnapshot>,
        events: &[WhaleEvent],
        cooldowns: &dyn CooldownStore,
        now: DateTime<Utc>,
    ) -> Result<Vec<Alert>> {
        let mut alerts = Vec::new();
        for candidate in self.pending(windows, snapshots, events, now) {
            let fired = cooldowns
                .try_fire(
                    &candidate.alert.rule_id,
                    &candidate.alert.symbol,
                    candidate.alert.timeframe,
                    now,
                    candidate.cooldown,
                )
                .await?;
            if fired {
                alerts.push(candidate.alert);
            }
        }

        Ok(alerts)
    }

    fn check_surge(
        &self,
        rule: &AlertRule,
        events: &[WhaleEvent],
        window_secs: i64,
        min_amount_usd: Decimal,
        min_count: usize,
        now: DateTime<Utc>,
        out: &mut Vec<PendingAlert>,
    ) {
        let cutoff = now.timestamp() - window_secs;
        let now_secs = now.timestamp();

        // Per symbol: directional whales above the per-transfer floor,
        // deduplicated by id. Internal transfers never count toward a surge.
        let mut per_symbol: HashMap<&str, (usize, Decimal)> = HashMap::new();
        let mut seen: HashSet<&str> = HashSet::new();

        for event in events {
            if !event.flow_type.is_directional() {
                continue;
            }
            if event.timestamp < cutoff || event.timestamp > now_secs {
                continue;
            }
            if event.amount_usd < min_amount_usd {
                continue;
            }
            if !seen.insert(event.id.as_str()) {
                continue;
            }
            let entry = per_symbol
                .entry(event.symbol.as_str())
                .or_insert((0, Decimal::ZERO));
            entry.0 += 1;
            entry.1 += event.amount_usd;
        }

        for (symbol, (count, volume)) in per_symbol {
            if count < min_count {
                continue;
            }
            out.push(PendingAlert {
                priority: rule.priority,
                cooldown: rule.cooldown(),
                alert: Alert {
                    id: Uuid::new_v4(),
                    rule_id: rule.id.clone(),
                    // Surges are short-window events; reported on the
                    // finest timeframe.
                    timeframe: Timeframe::H1,
                    symbol: symbol.to_string(),
                    severity: rule.severity,
                    message: format!(
                        "{} whale transfers of ${}+ on {} within {}s (total ${})",
                        count, min_amount_usd, symbol, window_secs, volume
                    ),
                    metrics: json!({
                        "whale_count": count,
                        "total_volume_usd": volume.to_string(),
                        "window_secs": window_secs,
                        "min_amount_usd": min_amount_usd.to_string(),
                    }),
                    created_at: now,
                },
            });
        }
    }

    fn check_swsi(
        &self,
        rule: &AlertRule,
        snapshots: &HashMap<Timeframe, SwsiSnapshot>,
        min_score: Option<f64>,
        max_score: Option<f64>,
        now: DateTime<Utc>,
        out: &mut Vec<PendingAlert>,
    ) {
        for (timeframe, snapshot) in snapshots {
            let bullish = min_score.is_some_and(|m| snapshot.swsi_score >= m);
            let bearish = max_score.is_some_and(|m| snapshot.swsi_score <= m);
            if !bullish && !bearish {
                continue;
            }
            out.push(PendingAlert {
                priority: rule.priority,
                cooldown: rule.cooldown(),
                alert: Alert {
                    id: Uuid::new_v4(),
                    rule_id: rule.id.clone(),
                    timeframe: *timeframe,
                    symbol: "ALL".to_string(),
                    severity: rule.severity,
                    message: format!(
                        "SWSI {:.3} on {} (bull {:.0}% / bear {:.0}%)",
                        snapshot.swsi_score,
                        timeframe,
                        snapshot.bull_ratio * 100.0,
                        snapshot.bear_ratio * 100.0
                    ),
                    metrics: json!({
                        "swsi_score": snapshot.swsi_score,
                        "bull_ratio": snapshot.bull_ratio,
                        "bear_ratio": snapshot.bear_ratio,
                        "whale_weight": snapshot.whale_weight,
                        "stale": snapshot.is_stale(),
                    }),
                    created_at: now,
                },
            });
        }
    }

    fn check_imbalance(
        &self,
        rule: &AlertRule,
        windows: &[WindowState],
        min_ratio: f64,
        min_volume_usd: Decimal,
        now: DateTime<Utc>,
        out: &mut Vec<PendingAlert>,
    ) {
        for window in windows {
            if window.total_volume_usd < min_volume_usd {
                continue;
            }
            let imbalance = window.flow_imbalance();
            if imbalance.abs() < min_ratio {
                continue;
            }
            let side = if imbalance > 0.0 { "outflow" } else { "inflow" };
            out.push(PendingAlert {
                priority: rule.priority,
                cooldown: rule.cooldown(),
                alert: Alert {
                    id: Uuid::new_v4(),
                    rule_id: rule.id.clone(),
                    timeframe: window.timeframe,
                    symbol: window.symbol.to_string(),
                    severity: rule.severity,
                    message: format!(
                        "{:.0}% {} imbalance on {} {} (${} total)",
                        imbalance.abs() * 100.0,
                        side,
                        window.symbol,
                        window.timeframe,
                        window.total_volume_usd
                    ),
                    metrics: json!({
                        "imbalance": imbalance,
                        "buy_volume_usd": window.buy_volume_usd.to_string(),
                        "sell_volume_usd": window.sell_volume_usd.to_string(),
                        "whale_count": window.whale_count,
                    }),
                    created_at: now,
                },
            });
        }
    }
}
