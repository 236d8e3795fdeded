//! Configuration management
//!
//! Layered file + environment loading, deserialized into typed sections.
//! Anything invalid is rejected by `validate()` before the scheduler
//! starts; no configuration error can surface mid-cycle.

use crate::aggregator::AggregatorConfig;
use crate::alerts::{default_rules, AlertRule, RuleCondition};
use crate::error::{Result, SentinelError};
use crate::scorer::ScorerConfig;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub market: MarketConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub aggregator: AggregatorConfig,
    #[serde(default)]
    pub scorer: ScorerConfig,
    #[serde(default)]
    pub alerts: AlertsConfig,
    /// Symbols tracked with their own per-symbol windows, in addition to
    /// the combined market-wide window.
    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,
}

fn default_symbols() -> Vec<String> {
    vec!["BTC".to_string(), "ETH".to_string()]
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            market: MarketConfig::default(),
            scheduler: SchedulerConfig::default(),
            aggregator: AggregatorConfig::default(),
            scorer: ScorerConfig::default(),
            alerts: AlertsConfig::default(),
            symbols: default_symbols(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite database path.
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "whale-sentinel.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MarketConfig {
    /// Base URL of the market data source.
    pub base_url: String,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between evaluation cycles.
    pub cycle_interval_secs: u64,
    /// A cycle running longer than this is abandoned; its partial results
    /// are discarded, never partially published.
    pub max_cycle_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            cycle_interval_secs: 60,
            max_cycle_secs: 45,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AlertsConfig {
    #[serde(default = "default_rules")]
    pub rules: Vec<AlertRule>,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            rules: default_rules(),
        }
    }
}

impl Config {
    /// Load configuration from a file, with environment overrides.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_str().ok_or_else(|| {
            SentinelError::Config("config path is not valid UTF-8".to_string())
        })?;
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("WHALE_SENTINEL"))
            .build()
            .map_err(|e| SentinelError::Config(e.to_string()))?;

        let mut cfg: Config = settings
            .try_deserialize()
            .map_err(|e| SentinelError::Config(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load from default locations.
    pub fn load_default() -> Result<Self> {
        let paths = ["config.toml", "~/.config/whale-sentinel/config.toml"];
        for path in paths {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                return Self::load(expanded.as_ref());
            }
        }
        Err(SentinelError::Config(
            "no configuration file found".to_string(),
        ))
    }

    /// Startup validation. Everything here is fatal.
    pub fn validate(&mut self) -> Result<()> {
        let weights = &self.scorer.weights;
        if (weights.sum() - 1.0).abs() > 1e-6 {
            return Err(SentinelError::Config(format!(
                "SWSI weights must sum to 1 (got {})",
                weights.sum()
            )));
        }
        if self.scorer.pct_full_scale <= 0.0 {
            return Err(SentinelError::Config(
                "pct_full_scale must be positive".to_string(),
            ));
        }
        if self.aggregator.buffer_multiplier < 1.0 {
            return Err(SentinelError::Config(format!(
                "buffer_multiplier must be >= 1 (got {})",
                self.aggregator.buffer_multiplier
            )));
        }
        if self.aggregator.min_whale_usd < Decimal::ZERO {
            return Err(SentinelError::Config(
                "min_whale_usd must be non-negative".to_string(),
            ));
        }
        if self.scheduler.cycle_interval_secs == 0 || self.scheduler.max_cycle_secs == 0 {
            return Err(SentinelError::Config(
                "scheduler intervals must be positive".to_string(),
            ));
        }
        if self.alerts.rules.is_empty() {
            return Err(SentinelError::Config("no alert rules configured".to_string()));
        }
        for rule in &self.alerts.rules {
            validate_rule(rule)?;
            // Events below min_whale_usd are never fetched, so a surge
            // floor under it would silently undercount.
            if let RuleCondition::WhaleSurge { min_amount_usd, .. } = &rule.condition {
                if *min_amount_usd < self.aggregator.min_whale_usd {
                    return Err(SentinelError::Config(format!(
                        "rule {}: min_amount_usd {} is below min_whale_usd {}",
                        rule.id, min_amount_usd, self.aggregator.min_whale_usd
                    )));
                }
            }
        }

        for symbol in &mut self.symbols {
            *symbol = symbol.trim().to_ascii_uppercase();
            if symbol.is_empty() {
                return Err(SentinelError::Config("empty symbol in symbol list".to_string()));
            }
        }
        Ok(())
    }
}

fn validate_rule(rule: &AlertRule) -> Result<()> {
    if rule.id.trim().is_empty() {
        return Err(SentinelError::Config("rule with empty id".to_string()));
    }
    if rule.cooldown_secs <= 0 {
        return Err(SentinelError::Config(format!(
            "rule {}: cooldown must be positive",
            rule.id
        )));
    }
    match &rule.condition {
        RuleCondition::WhaleSurge {
            window_secs,
            min_amount_usd,
            min_count,
        } => {
            if *window_secs <= 0 || *min_count == 0 || *min_amount_usd < Decimal::ZERO {
                return Err(SentinelError::Config(format!(
                    "rule {}: invalid surge parameters",
                    rule.id
                )));
            }
        }
        RuleCondition::SwsiExtreme {
            min_score,
            max_score,
        } => {
            if min_score.is_none() && max_score.is_none() {
                return Err(SentinelError::Config(format!(
                    "rule {}: swsi_extreme needs min_score or max_score",
                    rule.id
                )));
            }
        }
        RuleCondition::NetFlowImbalance {
            min_ratio,
            min_volume_usd,
        } => {
            if !(*min_ratio > 0.0 && *min_ratio <= 1.0) || *min_volume_usd < Decimal::ZERO {
                return Err(SentinelError::Config(format!(
                    "rule {}: invalid imbalance parameters",
                    rule.id
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Severity;

    #[test]
    fn test_default_config_validates() {
        let mut cfg = Config::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.symbols, vec!["BTC", "ETH"]);
    }

    #[test]
    fn test_bad_weights_rejected() {
        let mut cfg = Config::default();
        cfg.scorer.weights.whale = 0.5; // sum now 1.25
        assert!(matches!(cfg.validate(), Err(SentinelError::Config(_))));
    }

    #[test]
    fn test_buffer_multiplier_below_one_rejected() {
        let mut cfg = Config::default();
        cfg.aggregator.buffer_multiplier = 0.5;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_unbounded_swsi_rule_rejected() {
        let mut cfg = Config::default();
        cfg.alerts.rules.push(AlertRule {
            id: "bad".to_string(),
            description: String::new(),
            priority: 1,
            severity: Severity::Info,
            cooldown_secs: 60,
            condition: RuleCondition::SwsiExtreme {
                min_score: None,
                max_score: None,
            },
        });
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_surge_floor_below_fetch_floor_rejected() {
        let mut cfg = Config::default();
        cfg.alerts.rules.push(AlertRule {
            id: "tiny_surge".to_string(),
            description: String::new(),
            priority: 1,
            severity: Severity::Info,
            cooldown_secs: 60,
            condition: RuleCondition::WhaleSurge {
                window_secs: 300,
                // Under the default $500k min_whale_usd: never fetched.
                min_amount_usd: Decimal::new(100_000, 0),
                min_count: 2,
            },
        });
        assert!(matches!(cfg.validate(), Err(SentinelError::Config(_))));
    }

    #[test]
    fn test_zero_cooldown_rejected() {
        let mut cfg = Config::default();
        cfg.alerts.rules[0].cooldown_secs = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_symbols_normalized() {
        let mut cfg = Config::default();
        cfg.symbols = vec![" sol ".to_string(), "xrp".to_string()];
        cfg.validate().unwrap();
        assert_eq!(cfg.symbols, vec!["SOL", "XRP"]);
    }
}
