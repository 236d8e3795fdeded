//! External collaborators and persistence
//!
//! The core is transport-agnostic: it consumes an event source and a market
//! data source, and publishes snapshots and alerts to a sink. Each seam is
//! an async trait so the scheduler can run against the SQLite store, the
//! HTTP market source, or in-process doubles interchangeably.

use crate::alerts::CooldownStore;
use crate::error::{Result, SentinelError};
use crate::types::{
    Alert, MarketSnapshot, RawTransfer, Severity, SwsiSnapshot, SymbolFilter, Timeframe,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use uuid::Uuid;

/// Query capability over the persisted raw transfer feed.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Transfers at or above `min_amount_usd` since `since`, ordered by
    /// timestamp ascending.
    async fn fetch_transfers(
        &self,
        filter: &SymbolFilter,
        min_amount_usd: Decimal,
        since: DateTime<Utc>,
    ) -> Result<Vec<RawTransfer>>;
}

/// Market-wide percentage changes per timeframe.
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    async fn fetch_market_snapshot(&self, timeframe: Timeframe) -> Result<MarketSnapshot>;
}

/// Persistence sink for computed outputs. Snapshot publication is an
/// idempotent upsert keyed by (timeframe, created_at); alerts are
/// append-only.
#[async_trait]
pub trait SnapshotSink: Send + Sync {
    async fn publish_snapshot(&self, snapshot: &SwsiSnapshot) -> Result<()>;
    async fn publish_alert(&self, alert: &Alert) -> Result<()>;
}

/// Fixed-width UTC timestamp encoding, safe for lexicographic comparison
/// in SQL.
fn ts_str(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| SentinelError::Internal(format!("bad stored timestamp {s}: {e}")))
}

/// SQLite-backed store: raw transfers, snapshot history, alert log and the
/// cooldown table.
pub struct SentinelStore {
    pool: SqlitePool,
}

impl SentinelStore {
    /// Connect to SQLite (creates the file if missing) and run migrations.
    pub async fn connect<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db_url = format!("sqlite:{}?mode=rwc", path.as_ref().display());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&db_url)
            .await?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// In-memory store for tests and dry runs.
    pub async fn connect_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS transfers (
                id TEXT PRIMARY KEY,
                timestamp INTEGER NOT NULL,
                symbol TEXT NOT NULL,
                blockchain TEXT NOT NULL,
                amount_usd TEXT NOT NULL,
                from_owner TEXT,
                to_owner TEXT,
                from_owner_type TEXT,
                to_owner_type TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_transfers_symbol_time
            ON transfers(symbol, timestamp DESC)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS swsi_snapshots (
                timeframe TEXT NOT NULL,
                created_at TEXT NOT NULL,
                global_change REAL NOT NULL,
                coins_change REAL NOT NULL,
                volume_change REAL NOT NULL,
                whale_weight REAL NOT NULL,
                swsi_score REAL NOT NULL,
                bull_ratio REAL NOT NULL,
                bear_ratio REAL NOT NULL,
                whale_count INTEGER NOT NULL,
                buy_volume_usd TEXT NOT NULL,
                sell_volume_usd TEXT NOT NULL,
                total_volume_usd TEXT NOT NULL,
                stale_components TEXT NOT NULL,
                UNIQUE(timeframe, created_at)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS alerts (
                id TEXT PRIMARY KEY,
                rule_id TEXT NOT NULL,
                timeframe TEXT NOT NULL,
                symbol TEXT NOT NULL,
                severity TEXT NOT NULL,
                message TEXT NOT NULL,
                metrics TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS alert_cooldowns (
                rule_id TEXT NOT NULL,
                symbol TEXT NOT NULL,
                timeframe TEXT NOT NULL,
                last_fired_at TEXT NOT NULL,
                PRIMARY KEY (rule_id, symbol, timeframe)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Store a raw transfer. Upsert by id, so duplicate feed delivery is
    /// harmless.
    pub async fn insert_transfer(&self, transfer: &RawTransfer) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO transfers
            (id, timestamp, symbol, blockchain, amount_usd,
             from_owner, to_owner, from_owner_type, to_owner_type)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&transfer.id)
        .bind(transfer.timestamp)
        .bind(transfer.symbol.to_ascii_uppercase())
        .bind(&transfer.blockchain)
        .bind(transfer.amount_usd.to_string())
        .bind(&transfer.from_owner)
        .bind(&transfer.to_owner)
        .bind(&transfer.from_owner_type)
        .bind(&transfer.to_owner_type)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Latest snapshot for a timeframe, if any.
    pub async fn latest_snapshot(&self, timeframe: Timeframe) -> Result<Option<SwsiSnapshot>> {
        let row = sqlx::query_as::<_, SnapshotRow>(
            r#"
            SELECT timeframe, created_at, global_change, coins_change,
                   volume_change, whale_weight, swsi_score, bull_ratio,
                   bear_ratio, whale_count, buy_volume_usd, sell_volume_usd,
                   total_volume_usd, stale_components
            FROM swsi_snapshots
            WHERE timeframe = ?
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(timeframe.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(SwsiSnapshot::try_from).transpose()
    }

    /// Most recent alerts, newest first.
    pub async fn recent_alerts(&self, limit: i64) -> Result<Vec<Alert>> {
        let rows = sqlx::query_as::<_, AlertRow>(
            r#"
            SELECT id, rule_id, timeframe, symbol, severity, message,
                   metrics, created_at
            FROM alerts
            ORDER BY created_at DESC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Alert::try_from).collect()
    }
}

#[async_trait]
impl EventSource for SentinelStore {
    async fn fetch_transfers(
        &self,
        filter: &SymbolFilter,
        min_amount_usd: Decimal,
        since: DateTime<Utc>,
    ) -> Result<Vec<RawTransfer>> {
        // Amounts are stored as decimal text, so the size filter runs in
        // Rust after the indexed time/symbol query.
        let rows = match filter {
            SymbolFilter::All => {
                sqlx::query_as::<_, TransferRow>(
                    r#"
                    SELECT id, timestamp, symbol, blockchain, amount_usd,
                           from_owner, to_owner, from_owner_type, to_owner_type
                    FROM transfers
                    WHERE timestamp >= ?
                    ORDER BY timestamp ASC
                    "#,
                )
                .bind(since.timestamp())
                .fetch_all(&self.pool)
                .await?
            }
            SymbolFilter::Symbol(symbol) => {
                sqlx::query_as::<_, TransferRow>(
                    r#"
                    SELECT id, timestamp, symbol, blockchain, amount_usd,
                           from_owner, to_owner, from_owner_type, to_owner_type
                    FROM transfers
                    WHERE symbol = ? AND timestamp >= ?
                    ORDER BY timestamp ASC
                    "#,
                )
                .bind(symbol)
                .bind(since.timestamp())
                .fetch_all(&self.pool)
                .await?
            }
        };

        let mut transfers = Vec::with_capacity(rows.len());
        for row in rows {
            let transfer = RawTransfer::try_from(row)?;
            if transfer.amount_usd >= min_amount_usd {
                transfers.push(transfer);
            }
        }
        Ok(transfers)
    }
}

#[async_trait]
impl SnapshotSink for SentinelStore {
    async fn publish_snapshot(&self, snapshot: &SwsiSnapshot) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO swsi_snapshots
            (timeframe, created_at, global_change, coins_change, volume_change,
             whale_weight, swsi_score, bull_ratio, bear_ratio, whale_count,
             buy_volume_usd, sell_volume_usd, total_volume_usd, stale_components)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(snapshot.timeframe.as_str())
        .bind(ts_str(snapshot.created_at))
        .bind(snapshot.global_change)
        .bind(snapshot.coins_change)
        .bind(snapshot.volume_change)
        .bind(snapshot.whale_weight)
        .bind(snapshot.swsi_score)
        .bind(snapshot.bull_ratio)
        .bind(snapshot.bear_ratio)
        .bind(snapshot.whale_count as i64)
        .bind(snapshot.buy_volume_usd.to_string())
        .bind(snapshot.sell_volume_usd.to_string())
        .bind(snapshot.total_volume_usd.to_string())
        .bind(serde_json::to_string(&snapshot.stale_components)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn publish_alert(&self, alert: &Alert) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO alerts
            (id, rule_id, timeframe, symbol, severity, message, metrics, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(alert.id.to_string())
        .bind(&alert.rule_id)
        .bind(alert.timeframe.as_str())
        .bind(&alert.symbol)
        .bind(alert.severity.to_string())
        .bind(&alert.message)
        .bind(alert.metrics.to_string())
        .bind(ts_str(alert.created_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl CooldownStore for SentinelStore {
    async fn last_fired(
        &self,
        rule_id: &str,
        symbol: &str,
        timeframe: Timeframe,
    ) -> Result<Option<DateTime<Utc>>> {
        let row: Option<(String,)> = sqlx::query_as(
            r#"
            SELECT last_fired_at FROM alert_cooldowns
            WHERE rule_id = ? AND symbol = ? AND timeframe = ?
            "#,
        )
        .bind(rule_id)
        .bind(symbol)
        .bind(timeframe.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|(s,)| parse_ts(&s)).transpose()
    }

    async fn try_fire(
        &self,
        rule_id: &str,
        symbol: &str,
        timeframe: Timeframe,
        now: DateTime<Utc>,
        cooldown: Duration,
    ) -> Result<bool> {
        // Compare-and-set in a single statement: the conditional upsert
        // only overwrites when the stored fire time is at or before the
        // cooldown cutoff, so concurrent evaluators cannot both win.
        let cutoff = ts_str(now - cooldown);
        let result = sqlx::query(
            r#"
            INSERT INTO alert_cooldowns (rule_id, symbol, timeframe, last_fired_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(rule_id, symbol, timeframe)
            DO UPDATE SET last_fired_at = excluded.last_fired_at
            WHERE alert_cooldowns.last_fired_at <= ?
            "#,
        )
        .bind(rule_id)
        .bind(symbol)
        .bind(timeframe.as_str())
        .bind(ts_str(now))
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

// SQLx row types

#[derive(Debug, sqlx::FromRow)]
struct TransferRow {
    id: String,
    timestamp: i64,
    symbol: String,
    blockchain: String,
    amount_usd: String,
    from_owner: Option<String>,
    to_owner: Option<String>,
    from_owner_type: Option<String>,
    to_owner_type: Option<String>,
}

impl TryFrom<TransferRow> for RawTransfer {
    type Error = SentinelError;

    fn try_from(row: TransferRow) -> Result<Self> {
        Ok(RawTransfer {
            id: row.id,
            timestamp: row.timestamp,
            symbol: row.symbol,
            blockchain: row.blockchain,
            amount_usd: Decimal::from_str(&row.amount_usd)
                .map_err(|e| SentinelError::Internal(format!("bad stored amount: {e}")))?,
            from_owner: row.from_owner,
            to_owner: row.to_owner,
            from_owner_type: row.from_owner_type,
            to_owner_type: row.to_owner_type,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SnapshotRow {
    timeframe: String,
    created_at: String,
    global_change: f64,
    coins_change: f64,
    volume_change: f64,
    whale_weight: f64,
    swsi_score: f64,
    bull_ratio: f64,
    bear_ratio: f64,
    whale_count: i64,
    buy_volume_usd: String,
    sell_volume_usd: String,
    total_volume_usd: String,
    stale_components: String,
}

impl TryFrom<SnapshotRow> for SwsiSnapshot {
    type Error = SentinelError;

    fn try_from(row: SnapshotRow) -> Result<Self> {
        let parse_dec = |s: &str| {
            Decimal::from_str(s)
                .map_err(|e| SentinelError::Internal(format!("bad stored volume: {e}")))
        };
        Ok(SwsiSnapshot {
            timeframe: row.timeframe.parse()?,
            created_at: parse_ts(&row.created_at)?,
            global_change: row.global_change,
            coins_change: row.coins_change,
            volume_change: row.volume_change,
            whale_weight: row.whale_weight,
            swsi_score: row.swsi_score,
            bull_ratio: row.bull_ratio,
            bear_ratio: row.bear_ratio,
            whale_count: row.whale_count as u64,
            buy_volume_usd: parse_dec(&row.buy_volume_usd)?,
            sell_volume_usd: parse_dec(&row.sell_volume_usd)?,
            total_volume_usd: parse_dec(&row.total_volume_usd)?,
            stale_components: serde_json::from_str(&row.stale_components)?,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct AlertRow {
    id: String,
    rule_id: String,
    timeframe: String,
    symbol: String,
    severity: String,
    message: String,
    metrics: String,
    created_at: String,
}

impl TryFrom<AlertRow> for Alert {
    type Error = SentinelError;

    fn try_from(row: AlertRow) -> Result<Self> {
        let severity = match row.severity.as_str() {
            "info" => Severity::Info,
            "warning" => Severity::Warning,
            "critical" => Severity::Critical,
            other => {
                return Err(SentinelError::Internal(format!(
                    "bad stored severity: {other}"
                )))
            }
        };
        Ok(Alert {
            id: Uuid::parse_str(&row.id)
                .map_err(|e| SentinelError::Internal(format!("bad stored alert id: {e}")))?,
            rule_id: row.rule_id,
            timeframe: row.timeframe.parse()?,
            symbol: row.symbol,
            severity,
            message: row.message,
            metrics: serde_json::from_str(&row.metrics)?,
            created_at: parse_ts(&row.created_at)?,
        })
    }
}

/// Market data over HTTP.
pub struct HttpMarketData {
    http: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct MarketChangesBody {
    global_change: f64,
    coins_change: f64,
    volume_change: f64,
}

impl HttpMarketData {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl MarketDataSource for HttpMarketData {
    async fn fetch_market_snapshot(&self, timeframe: Timeframe) -> Result<MarketSnapshot> {
        let url = format!(
            "{}/v1/market-changes?timeframe={}",
            self.base_url, timeframe
        );
        let resp = self.http.get(&url).send().await?;
        if !resp.status().is_success() {
            return Err(SentinelError::Transient(format!(
                "market source returned {}",
                resp.status()
            )));
        }
        let body: MarketChangesBody = resp.json().await?;
        Ok(MarketSnapshot {
            global_change: body.global_change,
            coins_change: body.coins_change,
            volume_change: body.volume_change,
            fetched_at: Utc::now(),
        })
    }
}

/// In-process doubles for the collaborator seams.
pub mod mem {
    use super::*;
    use parking_lot::RwLock;

    /// Event source backed by a plain vector.
    #[derive(Default)]
    pub struct MemoryEventSource {
        transfers: RwLock<Vec<RawTransfer>>,
        fail: RwLock<bool>,
    }

    impl MemoryEventSource {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn push(&self, transfer: RawTransfer) {
            self.transfers.write().push(transfer);
        }

        pub fn set_failing(&self, failing: bool) {
            *self.fail.write() = failing;
        }
    }

    #[async_trait]
    impl EventSource for MemoryEventSource {
        async fn fetch_transfers(
            &self,
            filter: &SymbolFilter,
            min_amount_usd: Decimal,
            since: DateTime<Utc>,
        ) -> Result<Vec<RawTransfer>> {
            if *self.fail.read() {
                return Err(SentinelError::Transient("event source down".to_string()));
            }
            let mut out: Vec<RawTransfer> = self
                .transfers
                .read()
                .iter()
                .filter(|t| {
                    t.timestamp >= since.timestamp()
                        && t.amount_usd >= min_amount_usd
                        && filter.matches(&t.symbol.to_ascii_uppercase())
                })
                .cloned()
                .collect();
            out.sort_by_key(|t| t.timestamp);
            Ok(out)
        }
    }

    /// Market data double. Empty until `set`, then serves the stored
    /// snapshot; `fail` simulates an upstream outage.
    #[derive(Default)]
    pub struct MemoryMarketData {
        snapshot: RwLock<Option<MarketSnapshot>>,
        fail: RwLock<bool>,
    }

    impl MemoryMarketData {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set(&self, snapshot: MarketSnapshot) {
            *self.snapshot.write() = Some(snapshot);
        }

        pub fn set_failing(&self, failing: bool) {
            *self.fail.write() = failing;
        }
    }

    #[async_trait]
    impl MarketDataSource for MemoryMarketData {
        async fn fetch_market_snapshot(&self, _timeframe: Timeframe) -> Result<MarketSnapshot> {
            if *self.fail.read() {
                return Err(SentinelError::Transient("market source down".to_string()));
            }
            self.snapshot
                .read()
                .clone()
                .ok_or_else(|| SentinelError::Transient("no market snapshot".to_string()))
        }
    }

    /// Collecting sink.
    #[derive(Default)]
    pub struct MemorySink {
        pub snapshots: RwLock<Vec<SwsiSnapshot>>,
        pub alerts: RwLock<Vec<Alert>>,
    }

    impl MemorySink {
        pub fn new() -> Self {
            Self::default()
        }
    }

    #[async_trait]
    impl SnapshotSink for MemorySink {
        async fn publish_snapshot(&self, snapshot: &SwsiSnapshot) -> Result<()> {
            self.snapshots.write().push(snapshot.clone());
            Ok(())
        }

        async fn publish_alert(&self, alert: &Alert) -> Result<()> {
            self.alerts.write().push(alert.clone());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn transfer(id: &str, symbol: &str, amount: Decimal, ts: i64) -> RawTransfer {
        RawTransfer {
            id: id.to_string(),
            timestamp: ts,
            symbol: symbol.to_string(),
            blockchain: "ethereum".to_string(),
            amount_usd: amount,
            from_owner: Some("whale".to_string()),
            to_owner: Some("binance".to_string()),
            from_owner_type: Some("wallet".to_string()),
            to_owner_type: Some("exchange".to_string()),
        }
    }

    #[tokio::test]
    async fn test_transfer_roundtrip_and_filters() {
        let store = SentinelStore::connect_memory().await.unwrap();
        let now = Utc::now();
        let base = now.timestamp();

        store
            .insert_transfer(&transfer("a", "BTC", dec!(2_000_000), base - 100))
            .await
            .unwrap();
        store
            .insert_transfer(&transfer("b", "ETH", dec!(300_000), base - 50))
            .await
            .unwrap();
        store
            .insert_transfer(&transfer("c", "BTC", dec!(5_000_000), base - 10))
            .await
            .unwrap();

        let all = store
            .fetch_transfers(
                &SymbolFilter::All,
                dec!(500_000),
                now - Duration::hours(1),
            )
            .await
            .unwrap();
        // "b" is below the floor; remaining are ordered by timestamp.
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, "a");
        assert_eq!(all[1].id, "c");

        let btc = store
            .fetch_transfers(
                &SymbolFilter::symbol("BTC"),
                Decimal::ZERO,
                now - Duration::hours(1),
            )
            .await
            .unwrap();
        assert_eq!(btc.len(), 2);
    }

    #[tokio::test]
    async fn test_transfer_insert_is_upsert() {
        let store = SentinelStore::connect_memory().await.unwrap();
        let now = Utc::now().timestamp();
        let t = transfer("dup", "BTC", dec!(1_000_000), now - 5);
        store.insert_transfer(&t).await.unwrap();
        store.insert_transfer(&t).await.unwrap();

        let all = store
            .fetch_transfers(
                &SymbolFilter::All,
                Decimal::ZERO,
                Utc::now() - Duration::hours(1),
            )
            .await
            .unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn test_snapshot_upsert_idempotent() {
        let store = SentinelStore::connect_memory().await.unwrap();
        let now = Utc::now();
        let snapshot = SwsiSnapshot {
            timeframe: Timeframe::H4,
            global_change: 0.2,
            coins_change: 0.1,
            volume_change: -0.1,
            whale_weight: 0.5,
            swsi_score: 0.175,
            bull_ratio: 0.5875,
            bear_ratio: 0.4125,
            whale_count: 7,
            buy_volume_usd: dec!(900),
            sell_volume_usd: dec!(300),
            total_volume_usd: dec!(1200),
            stale_components: Vec::new(),
            created_at: now,
        };

        store.publish_snapshot(&snapshot).await.unwrap();
        store.publish_snapshot(&snapshot).await.unwrap();

        let latest = store.latest_snapshot(Timeframe::H4).await.unwrap().unwrap();
        assert_eq!(latest.whale_count, 7);
        assert_eq!(latest.buy_volume_usd, dec!(900));
        assert!((latest.swsi_score - 0.175).abs() < 1e-12);

        assert!(store.latest_snapshot(Timeframe::D1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_alert_append_and_readback() {
        let store = SentinelStore::connect_memory().await.unwrap();
        let alert = Alert {
            id: Uuid::new_v4(),
            rule_id: "whale_surge".to_string(),
            timeframe: Timeframe::H1,
            symbol: "BTC".to_string(),
            severity: Severity::Critical,
            message: "surge".to_string(),
            metrics: json!({"whale_count": 3}),
            created_at: Utc::now(),
        };
        store.publish_alert(&alert).await.unwrap();

        let recent = store.recent_alerts(10).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].rule_id, "whale_surge");
        assert_eq!(recent[0].metrics["whale_count"], 3);
        assert_eq!(recent[0].severity, Severity::Critical);
    }

    #[tokio::test]
    async fn test_cooldown_cas() {
        let store = SentinelStore::connect_memory().await.unwrap();
        let now = Utc::now();
        let cooldown = Duration::minutes(30);

        assert!(store
            .try_fire("r", "BTC", Timeframe::H1, now, cooldown)
            .await
            .unwrap());
        // Inside the cooldown: the conditional upsert must not win.
        assert!(!store
            .try_fire(
                "r",
                "BTC",
                Timeframe::H1,
                now + Duration::minutes(5),
                cooldown
            )
            .await
            .unwrap());
        // After the cooldown it re-arms.
        assert!(store
            .try_fire(
                "r",
                "BTC",
                Timeframe::H1,
                now + Duration::minutes(31),
                cooldown
            )
            .await
            .unwrap());

        let last = store
            .last_fired("r", "BTC", Timeframe::H1)
            .await
            .unwrap()
            .unwrap();
        assert!(last > now);
    }

    #[tokio::test]
    async fn test_memory_event_source_ordering() {
        let source = mem::MemoryEventSource::new();
        let now = Utc::now().timestamp();
        source.push(transfer("late", "BTC", dec!(1_000_000), now - 10));
        source.push(transfer("early", "BTC", dec!(1_000_000), now - 100));

        let transfers = source
            .fetch_transfers(
                &SymbolFilter::All,
                Decimal::ZERO,
                Utc::now() - Duration::hours(1),
            )
            .await
            .unwrap();
        assert_eq!(transfers[0].id, "early");
        assert_eq!(transfers[1].id, "late");
    }
}
