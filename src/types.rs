//! Core domain types: timeframes, owner categories, flow classification,
//! whale events and the derived window/snapshot/alert records.

use crate::error::SentinelError;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Fixed rolling-window durations used for aggregation and alerting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Timeframe {
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "8h")]
    H8,
    #[serde(rename = "12h")]
    H12,
    #[serde(rename = "1d")]
    D1,
}

impl Timeframe {
    pub const ALL: [Timeframe; 5] = [
        Timeframe::H1,
        Timeframe::H4,
        Timeframe::H8,
        Timeframe::H12,
        Timeframe::D1,
    ];

    /// Exact counting-window duration for this timeframe.
    pub fn duration(&self) -> Duration {
        match self {
            Timeframe::H1 => Duration::hours(1),
            Timeframe::H4 => Duration::hours(4),
            Timeframe::H8 => Duration::hours(8),
            Timeframe::H12 => Duration::hours(12),
            Timeframe::D1 => Duration::days(1),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::H1 => "1h",
            Timeframe::H4 => "4h",
            Timeframe::H8 => "8h",
            Timeframe::H12 => "12h",
            Timeframe::D1 => "1d",
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = SentinelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "1h" => Ok(Timeframe::H1),
            "4h" => Ok(Timeframe::H4),
            "8h" => Ok(Timeframe::H8),
            "12h" => Ok(Timeframe::H12),
            "1d" | "24h" => Ok(Timeframe::D1),
            other => Err(SentinelError::UnknownTimeframe(other.to_string())),
        }
    }
}

/// Category of a transfer endpoint owner.
///
/// Raw feeds carry owner types as inconsistent free text; absent or
/// unrecognized values normalize to `Unknown` rather than erroring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OwnerType {
    Exchange,
    Wallet,
    Defi,
    Other,
    Unknown,
}

impl OwnerType {
    /// Normalize a raw owner-type label. Case-insensitive; `None` and
    /// anything unrecognized map to `Unknown`.
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
            Some("exchange") => OwnerType::Exchange,
            Some("wallet") => OwnerType::Wallet,
            Some("defi") => OwnerType::Defi,
            Some("other") => OwnerType::Other,
            _ => OwnerType::Unknown,
        }
    }
}

/// Directional implication of a whale transfer for exchange-held supply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowType {
    /// Capital entering an exchange: sell-pressure proxy.
    Inflow,
    /// Capital leaving an exchange: buy-pressure proxy.
    Outflow,
    /// Exchange-to-exchange shuffle.
    Exchange,
    /// Wallet-to-wallet movement, no directional pressure.
    Internal,
    /// DeFi protocol interaction.
    Defi,
}

impl FlowType {
    /// Directional flows are the only ones that feed sentiment.
    pub fn is_directional(&self) -> bool {
        matches!(self, FlowType::Inflow | FlowType::Outflow)
    }
}

impl fmt::Display for FlowType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FlowType::Inflow => "inflow",
            FlowType::Outflow => "outflow",
            FlowType::Exchange => "exchange",
            FlowType::Internal => "internal",
            FlowType::Defi => "defi",
        };
        f.write_str(s)
    }
}

/// Raw transfer record as delivered by the event source, before
/// normalization. Owner types are free text at this stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawTransfer {
    pub id: String,
    /// Unix seconds. Source order is not guaranteed monotonic.
    pub timestamp: i64,
    pub symbol: String,
    pub blockchain: String,
    pub amount_usd: Decimal,
    pub from_owner: Option<String>,
    pub to_owner: Option<String>,
    pub from_owner_type: Option<String>,
    pub to_owner_type: Option<String>,
}

/// A classified whale transfer. Immutable once built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhaleEvent {
    pub id: String,
    /// Unix seconds.
    pub timestamp: i64,
    /// Canonical uppercase asset code.
    pub symbol: String,
    pub blockchain: String,
    pub amount_usd: Decimal,
    pub from_owner: Option<String>,
    pub to_owner: Option<String>,
    pub from_owner_type: OwnerType,
    pub to_owner_type: OwnerType,
    pub flow_type: FlowType,
}

impl WhaleEvent {
    pub fn occurred_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.timestamp, 0)
    }
}

/// Symbol restriction for window aggregation. `All` means the combined
/// market-wide window with no symbol filter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SymbolFilter {
    All,
    Symbol(String),
}

impl SymbolFilter {
    pub fn symbol(s: &str) -> Self {
        SymbolFilter::Symbol(s.to_ascii_uppercase())
    }

    pub fn matches(&self, symbol: &str) -> bool {
        match self {
            SymbolFilter::All => true,
            SymbolFilter::Symbol(s) => s == symbol,
        }
    }
}

impl fmt::Display for SymbolFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SymbolFilter::All => f.write_str("ALL"),
            SymbolFilter::Symbol(s) => f.write_str(s),
        }
    }
}

/// Rolling-window aggregate for one (symbol, timeframe) pair.
///
/// A recomputed view over the event store, never incrementally mutated:
/// every recomputation re-derives the event set from the filter criteria,
/// so no event can leak between windows or outlive its duration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowState {
    pub symbol: SymbolFilter,
    pub timeframe: Timeframe,
    pub window_start: DateTime<Utc>,
    pub computed_at: DateTime<Utc>,
    /// Count of directional (inflow/outflow) whales only.
    pub whale_count: u64,
    pub inflow_count: u64,
    pub outflow_count: u64,
    /// Diagnostic counts, excluded from directional sentiment.
    pub exchange_count: u64,
    pub internal_count: u64,
    pub defi_count: u64,
    /// Outflow volume: capital leaving exchanges, buy-pressure proxy.
    pub buy_volume_usd: Decimal,
    /// Inflow volume: capital entering exchanges, sell-pressure proxy.
    pub sell_volume_usd: Decimal,
    pub total_volume_usd: Decimal,
}

impl WindowState {
    /// All-zero window, the legitimate result of zero matching events.
    pub fn empty(
        symbol: SymbolFilter,
        timeframe: Timeframe,
        window_start: DateTime<Utc>,
        computed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            symbol,
            timeframe,
            window_start,
            computed_at,
            whale_count: 0,
            inflow_count: 0,
            outflow_count: 0,
            exchange_count: 0,
            internal_count: 0,
            defi_count: 0,
            buy_volume_usd: Decimal::ZERO,
            sell_volume_usd: Decimal::ZERO,
            total_volume_usd: Decimal::ZERO,
        }
    }

    /// Signed buy/sell imbalance in [-1, 1]; 0 when the window is empty.
    pub fn flow_imbalance(&self) -> f64 {
        let total = self.buy_volume_usd + self.sell_volume_usd;
        if total.is_zero() {
            return 0.0;
        }
        let diff = self.buy_volume_usd - self.sell_volume_usd;
        (diff / total).to_f64().unwrap_or(0.0)
    }
}

/// Market-wide percentage changes for one timeframe, as fetched from the
/// market data source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSnapshot {
    /// Total market-cap change over the timeframe, percent.
    pub global_change: f64,
    /// Equal-weighted change across the fixed large-cap basket, percent.
    pub coins_change: f64,
    /// Aggregate traded volume change vs the trailing baseline, percent.
    pub volume_change: f64,
    pub fetched_at: DateTime<Utc>,
}

/// Score component identifiers, used for per-component staleness flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreComponent {
    GlobalChange,
    CoinsChange,
    VolumeChange,
}

/// Smart Whale Sentiment Index snapshot. One per timeframe per cycle;
/// superseded, never mutated. History is append-only for trend display.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwsiSnapshot {
    pub timeframe: Timeframe,
    /// The four weighted components, each normalized to [-1, 1].
    pub global_change: f64,
    pub coins_change: f64,
    pub volume_change: f64,
    pub whale_weight: f64,
    pub swsi_score: f64,
    /// bull_ratio + bear_ratio == 1, both in [0, 1].
    pub bull_ratio: f64,
    pub bear_ratio: f64,
    /// Raw whale stats the whale_weight was derived from.
    pub whale_count: u64,
    pub buy_volume_usd: Decimal,
    pub sell_volume_usd: Decimal,
    pub total_volume_usd: Decimal,
    /// Components carried over from a previous cycle or older than one
    /// full timeframe duration. Empty when everything was fresh.
    pub stale_components: Vec<ScoreComponent>,
    pub created_at: DateTime<Utc>,
}

impl SwsiSnapshot {
    pub fn is_stale(&self) -> bool {
        !self.stale_components.is_empty()
    }
}

/// Alert severity tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// Emitted alert record. Immutable once created; its lifecycle ends at
/// persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub rule_id: String,
    pub timeframe: Timeframe,
    pub symbol: String,
    pub severity: Severity,
    pub message: String,
    /// Triggering metrics at fire time.
    pub metrics: serde_json::Value,
    pub created_at: DateTime<Utc>,
}
