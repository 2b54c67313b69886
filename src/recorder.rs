//! Sampling, persistence, and summarization loop.
//!
//! Once per tick the recorder reads a live snapshot, classifies the
//! operating mode, and decides whether this instant is worth a durable
//! sample: always on a status change, otherwise only after a
//! status-dependent dwell so standby is logged sparsely and activity
//! densely. Day segments and the month/year/total roll-ups are rebuilt at
//! local-day rollover, on every status change, and for every day touched by
//! an offline gap found at startup.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use tokio::sync::watch;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::classify::{classify, Status};
use crate::config::{ClassifierConfig, RecorderConfig};
use crate::db::DbPool;
use crate::error::Result;
use crate::models::SampleRow;
use crate::repositories::{SampleRepository, SummaryRepository};
use crate::segments::{local_day, split_offline_gap};
use crate::store::{LiveSnapshot, LiveStore};

/// State carried across ticks. None of it survives a restart — the sample
/// tables are the only durable memory, and the ON-boundary/backfill path is
/// what reconciles the two after downtime.
#[derive(Debug)]
struct RecorderState {
    /// Whether this process run has written its first sample yet.
    first_saved: bool,
    /// Previous classifier output, fed back as its hold-over input.
    last_logical: Option<Status>,
    /// Status of the last row actually written.
    last_stored: Option<Status>,
    /// Monotonic time of the last write, for dwell gating.
    last_save_mono: Option<Instant>,
    /// Local calendar day the recorder believes it is in.
    current_local_day: Option<NaiveDate>,
    /// Most recent snapshot seen, persisted or not, for bridging.
    last_read: Option<(i64, LiveSnapshot)>,
    /// Backfilled offline intervals per local day; day rebuilds keep
    /// re-including these for the rest of the run.
    offline: BTreeMap<NaiveDate, Vec<(i64, i64)>>,
}

pub struct Recorder {
    samples: SampleRepository,
    summary: SummaryRepository,
    store: Arc<LiveStore>,
    classifier: ClassifierConfig,
    cfg: RecorderConfig,
    tz: Tz,
    state: RecorderState,
}

impl Recorder {
    pub fn new(
        pool: DbPool,
        store: Arc<LiveStore>,
        classifier: ClassifierConfig,
        cfg: RecorderConfig,
        tz: Tz,
    ) -> Self {
        Self {
            samples: SampleRepository::new(pool.clone()),
            summary: SummaryRepository::new(pool, tz),
            store,
            classifier,
            cfg,
            tz,
            state: RecorderState {
                first_saved: false,
                last_logical: None,
                last_stored: None,
                last_save_mono: None,
                current_local_day: None,
                last_read: None,
                offline: BTreeMap::new(),
            },
        }
    }

    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(tick_secs = self.cfg.tick_secs, "recorder started");
        let mut ticker = interval(Duration::from_secs(self.cfg.tick_secs));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // Skip the immediate first fire so the pollers get one tick's head
        // start to populate the store.
        ticker.tick().await;
        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {
                    let snap = self.store.snapshot();
                    if let Err(e) = self.tick(snap, Utc::now(), Instant::now()).await {
                        // A failed write costs one tick, never the loop.
                        error!("recorder tick failed: {e}");
                    }
                }
            }
        }
        info!("recorder stopped");
    }

    /// One evaluation of the sampling state machine.
    pub async fn tick(
        &mut self,
        snap: LiveSnapshot,
        now_utc: DateTime<Utc>,
        now_mono: Instant,
    ) -> Result<()> {
        // Nothing polled yet: nothing to classify or store.
        if !snap.has_data() {
            return Ok(());
        }

        let ts_now = now_utc.timestamp();
        let today = local_day(ts_now, self.tz);

        // Finalize the previous day before anything else touches today.
        match self.state.current_local_day {
            None => self.state.current_local_day = Some(today),
            Some(prev) if prev != today => {
                info!(day = %prev, "day rollover, finalizing summaries");
                self.rebuild_and_rollup(prev).await?;
                self.state.current_local_day = Some(today);
            }
            Some(_) => {}
        }

        let logical = classify(&snap, self.state.last_logical, &self.classifier);

        // The first write of a run is always the ON boundary event; if
        // samples exist from before, the span since the newest one is an
        // offline gap to backfill after the write lands.
        let mut pending_offline = None;
        let status_to_store = if self.state.first_saved {
            logical
        } else {
            if let Some(last_ts) = self.samples.last_operating_ts().await? {
                if ts_now > last_ts {
                    pending_offline = Some((last_ts, ts_now));
                }
            }
            Status::On
        };

        let status_changed =
            matches!(self.state.last_stored, Some(prev) if prev != status_to_store);

        let should_write = if !self.state.first_saved || status_changed {
            true
        } else {
            let dwell = if status_to_store == Status::Standby {
                self.cfg.standby_dwell_secs
            } else {
                self.cfg.active_dwell_secs
            };
            match self.state.last_save_mono {
                Some(t) => now_mono.duration_since(t) >= Duration::from_secs(dwell),
                None => true,
            }
        };

        if !should_write {
            self.state.last_logical = Some(logical);
            self.state.last_read = Some((ts_now, snap));
            return Ok(());
        }

        // Leaving standby after skipped ticks: first persist the previous
        // read as the true end of the standby stretch, so its cumulative
        // counters don't get folded into the new segment's deltas.
        if self.state.first_saved
            && status_changed
            && self.state.last_stored == Some(Status::Standby)
            && status_to_store != Status::Standby
        {
            let since_last_write = self
                .state
                .last_save_mono
                .map(|t| now_mono.duration_since(t))
                .unwrap_or_default();
            if since_last_write > Duration::from_secs(self.cfg.tick_secs) {
                if let Some((ts, prev_snap)) = &self.state.last_read {
                    debug!(ts, "bridging end of standby");
                    self.samples
                        .upsert(&SampleRow::from_snapshot(*ts, Status::Standby, prev_snap))
                        .await?;
                }
            }
        }

        self.samples
            .upsert(&SampleRow::from_snapshot(ts_now, status_to_store, &snap))
            .await?;

        if !self.state.first_saved {
            self.state.first_saved = true;
            if let Some((gap_start, gap_end)) = pending_offline {
                info!(gap_start, gap_end, "backfilling offline gap");
                let by_day = split_offline_gap(gap_start, gap_end, self.tz);
                for (day, intervals) in &by_day {
                    self.state
                        .offline
                        .entry(*day)
                        .or_default()
                        .extend(intervals.iter().copied());
                }
                for day in by_day.keys() {
                    self.rebuild_and_rollup(*day).await?;
                }
            }
        }

        self.state.last_logical = Some(logical);
        self.state.last_save_mono = Some(now_mono);
        self.state.last_stored = Some(status_to_store);
        self.state.last_read = Some((ts_now, snap));

        // Reflect a mode change in the summaries right away instead of
        // waiting for the day rollover.
        if status_changed {
            self.rebuild_and_rollup(today).await?;
        }
        Ok(())
    }

    async fn rebuild_and_rollup(&self, day: NaiveDate) -> Result<()> {
        let off = self
            .state
            .offline
            .get(&day)
            .map(|v| v.as_slice())
            .unwrap_or(&[]);
        self.summary.rebuild_day(day, off).await?;
        self.summary.rollup_from_day(day).await
    }

    /// Summary access for read-side callers; the recorder stays the sole
    /// writer.
    pub fn summary(&self) -> &SummaryRepository {
        &self.summary
    }
}
