//! Periodic cycle driver
//!
//! One evaluation cycle per tick: fetch events over the buffered window,
//! classify, aggregate every (symbol, timeframe) pair in parallel, score,
//! evaluate alert rules. Cycles never overlap. Computation runs under the
//! cycle budget and publishes nothing; outputs land in one batch
//! afterwards, with each alert's cooldown consumed right beside its
//! emission. A cycle that exceeds its budget is abandoned before the
//! publish phase, so nothing of it is ever visible downstream. A skipped
//! or failed cycle leaves the previous snapshot and alert state current,
//! detectable via `created_at`.

use crate::aggregator::WindowAggregator;
use crate::alerts::{AlertEvaluator, CooldownStore, PendingAlert};
use crate::classifier;
use crate::config::Config;
use crate::error::{Result, SentinelError};
use crate::scorer::SentimentScorer;
use crate::store::{EventSource, MarketDataSource, SnapshotSink};
use crate::types::{MarketSnapshot, SwsiSnapshot, SymbolFilter, Timeframe, WhaleEvent, WindowState};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Outcome of one completed cycle, for logging and tests.
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    pub fetched: usize,
    pub dropped_malformed: usize,
    pub windows: usize,
    pub snapshots: usize,
    pub skipped_timeframes: usize,
    pub alerts: usize,
}

/// Everything a cycle computed, held back until the publish phase.
struct CycleOutcome {
    report: CycleReport,
    snapshots: Vec<SwsiSnapshot>,
    pending: Vec<PendingAlert>,
}

pub struct Scheduler {
    cycle_interval: Duration,
    max_cycle: Duration,
    symbols: Vec<String>,
    aggregator: WindowAggregator,
    scorer: SentimentScorer,
    evaluator: AlertEvaluator,
    events: Arc<dyn EventSource>,
    market: Arc<dyn MarketDataSource>,
    sink: Arc<dyn SnapshotSink>,
    cooldowns: Arc<dyn CooldownStore>,
}

impl Scheduler {
    pub fn new(
        config: &Config,
        events: Arc<dyn EventSource>,
        market: Arc<dyn MarketDataSource>,
        sink: Arc<dyn SnapshotSink>,
        cooldowns: Arc<dyn CooldownStore>,
    ) -> Self {
        Self {
            cycle_interval: Duration::from_secs(config.scheduler.cycle_interval_secs),
            max_cycle: Duration::from_secs(config.scheduler.max_cycle_secs),
            symbols: config.symbols.clone(),
            aggregator: WindowAggregator::new(config.aggregator.clone()),
            scorer: SentimentScorer::new(config.scorer.clone()),
            evaluator: AlertEvaluator::new(config.alerts.rules.clone()),
            events,
            market,
            sink,
            cooldowns,
        }
    }

    /// Run the periodic loop. Ticks that land while a cycle is still
    /// running are skipped rather than queued, so backlog never compounds
    /// under store slowness.
    pub async fn run(&self) -> Result<()> {
        info!(
            interval_secs = self.cycle_interval.as_secs(),
            "starting scheduler"
        );
        let mut interval = tokio::time::interval(self.cycle_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            interval.tick().await;
            match self.run_cycle().await {
                Ok(report) => {
                    info!(
                        fetched = report.fetched,
                        dropped = report.dropped_malformed,
                        windows = report.windows,
                        snapshots = report.snapshots,
                        alerts = report.alerts,
                        "cycle complete"
                    );
                }
                Err(e) => {
                    warn!("cycle failed, retrying next tick: {}", e);
                }
            }
        }
    }

    /// One full evaluation cycle.
    ///
    /// The budget covers computation only. A cycle that blows it is
    /// abandoned before anything is published, so downstream state is
    /// all-or-nothing per cycle. The publish batch itself runs to
    /// completion once computation has made the deadline.
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        let outcome = tokio::time::timeout(self.max_cycle, self.compute())
            .await
            .map_err(|_| {
                SentinelError::Transient(format!(
                    "cycle exceeded {}s budget, abandoned",
                    self.max_cycle.as_secs()
                ))
            })??;
        self.publish(outcome).await
    }

    async fn compute(&self) -> Result<CycleOutcome> {
        let now = Utc::now();
        let mut report = CycleReport::default();

        // One buffered fetch covering the widest timeframe serves every
        // window in the cycle.
        let since = self.aggregator.fetch_cutoff(Timeframe::D1, now);
        let raw = self
            .events
            .fetch_transfers(&SymbolFilter::All, self.aggregator.min_whale_usd(), since)
            .await?;
        report.fetched = raw.len();

        let mut events = Vec::with_capacity(raw.len());
        for transfer in &raw {
            match classifier::normalize(transfer) {
                Some(event) => events.push(event),
                None => report.dropped_malformed += 1,
            }
        }
        if report.dropped_malformed > 0 {
            debug!(dropped = report.dropped_malformed, "dropped malformed transfers");
        }
        let events = Arc::new(events);

        let markets = self.fetch_markets().await;
        let windows = self.aggregate_all(&events, now).await?;
        report.windows = windows.len();

        let mut snapshots = Vec::new();
        for timeframe in Timeframe::ALL {
            let combined = windows
                .iter()
                .find(|w| w.timeframe == timeframe && w.symbol == SymbolFilter::All)
                .ok_or_else(|| {
                    SentinelError::Internal(format!("missing combined window for {timeframe}"))
                })?;
            let market = markets.get(&timeframe).cloned().flatten();
            match self.scorer.score(timeframe, market, combined, now) {
                Some(snapshot) => {
                    snapshots.push(snapshot);
                    report.snapshots += 1;
                }
                None => report.skipped_timeframes += 1,
            }
        }

        let by_timeframe: HashMap<Timeframe, SwsiSnapshot> = snapshots
            .iter()
            .map(|s| (s.timeframe, s.clone()))
            .collect();
        let pending = self
            .evaluator
            .pending(&windows, &by_timeframe, &events, now);

        Ok(CycleOutcome {
            report,
            snapshots,
            pending,
        })
    }

    /// Publish everything the cycle computed. Each alert's cooldown fire
    /// is recorded immediately before its emission, never ahead of it.
    async fn publish(&self, outcome: CycleOutcome) -> Result<CycleReport> {
        let CycleOutcome {
            mut report,
            snapshots,
            pending,
        } = outcome;

        for snapshot in &snapshots {
            self.sink.publish_snapshot(snapshot).await?;
        }

        for candidate in pending {
            let fired = self
                .cooldowns
                .try_fire(
                    &candidate.alert.rule_id,
                    &candidate.alert.symbol,
                    candidate.alert.timeframe,
                    candidate.alert.created_at,
                    candidate.cooldown,
                )
                .await?;
            if !fired {
                continue;
            }
            info!(
                rule = %candidate.alert.rule_id,
                symbol = %candidate.alert.symbol,
                severity = %candidate.alert.severity,
                "{}",
                candidate.alert.message
            );
            self.sink.publish_alert(&candidate.alert).await?;
            report.alerts += 1;
        }

        Ok(report)
    }

    async fn fetch_markets(&self) -> HashMap<Timeframe, Option<MarketSnapshot>> {
        let mut markets = HashMap::new();
        for timeframe in Timeframe::ALL {
            let snapshot = match self.market.fetch_market_snapshot(timeframe).await {
                Ok(m) => Some(m),
                Err(e) => {
                    warn!(%timeframe, "market fetch failed: {}", e);
                    None
                }
            };
            markets.insert(timeframe, snapshot);
        }
        markets
    }

    /// Aggregate every (symbol, timeframe) pair. Each pair reads the same
    /// immutable event snapshot and writes a distinct output, so the fan-out
    /// runs on parallel worker tasks.
    async fn aggregate_all(
        &self,
        events: &Arc<Vec<WhaleEvent>>,
        now: chrono::DateTime<Utc>,
    ) -> Result<Vec<WindowState>> {
        let mut filters = vec![SymbolFilter::All];
        filters.extend(self.symbols.iter().map(|s| SymbolFilter::symbol(s)));

        let mut handles = Vec::with_capacity(filters.len() * Timeframe::ALL.len());
        for timeframe in Timeframe::ALL {
            for filter in &filters {
                let aggregator = self.aggregator.clone();
                let events = Arc::clone(events);
                let filter = filter.clone();
                handles.push(tokio::spawn(async move {
                    aggregator.aggregate(&filter, timeframe, &events, now)
                }));
            }
        }

        let mut windows = Vec::with_capacity(handles.len());
        for joined in futures_util::future::join_all(handles).await {
            windows.push(
                joined.map_err(|e| SentinelError::Internal(format!("aggregation task: {e}")))?,
            );
        }
        Ok(windows)
    }
}
