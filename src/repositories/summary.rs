//! Day-segment rebuild and the month/year/total roll-ups.
//!
//! Every level is derived by delete-and-reinsert from the level below it,
//! so a recompute is idempotent over unchanged source rows. Averages are
//! duration-weighted (Σ value·duration / Σ duration); the ON status carries
//! an event count only.

use std::collections::HashMap;

use chrono::{Datelike, NaiveDate};
use chrono_tz::Tz;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::warn;

use crate::classify::Status;
use crate::db::DbPool;
use crate::decode::round2;
use crate::error::Result;
use crate::models::{DaySegmentRow, PeriodRow};
use crate::repositories::SampleRepository;
use crate::segments::{build_day_segments, day_window};

#[derive(Clone)]
pub struct SummaryRepository {
    pool: DbPool,
    samples: SampleRepository,
    tz: Tz,
}

impl SummaryRepository {
    pub fn new(pool: DbPool, tz: Tz) -> Self {
        Self {
            samples: SampleRepository::new(pool.clone()),
            pool,
            tz,
        }
    }

    /// Replace all of `day`'s segment rows with a fresh computation from its
    /// samples plus any backfilled offline intervals.
    pub async fn rebuild_day(&self, day: NaiveDate, off_intervals: &[(i64, i64)]) -> Result<()> {
        let window = day_window(day, self.tz);
        let rows = self
            .samples
            .load_window(window.start_utc_s, window.end_utc_s)
            .await?;

        let mut on_starts = HashMap::new();
        for row in rows.iter().filter(|r| r.status == Status::On) {
            if let Some(prev) = self.samples.last_operating_ts_before(row.ts_utc_s).await? {
                on_starts.insert(row.ts_utc_s, prev);
            }
        }

        let segments = build_day_segments(&window, &rows, &on_starts, off_intervals);
        let day_key = day_key(day);

        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM day_segments WHERE day = ?")
            .bind(&day_key)
            .execute(&mut *tx)
            .await?;
        for seg in &segments {
            sqlx::query(
                "INSERT OR REPLACE INTO day_segments (
                    day, status, start_ts_utc_s, end_ts_utc_s, duration_s,
                    grid_kwh, heat_pos_kwh, heat_neg_kwh, volume_m3,
                    temp_in_c, temp_out_c, temp_diff_c, flow_m3h, ambient_c, ambient_rh
                 ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&day_key)
            .bind(seg.status.as_str())
            .bind(seg.start_ts_utc_s)
            .bind(seg.end_ts_utc_s)
            .bind(seg.duration_s)
            .bind(seg.grid_kwh)
            .bind(seg.heat_pos_kwh)
            .bind(seg.heat_neg_kwh)
            .bind(seg.volume_m3)
            .bind(seg.temp_in_c)
            .bind(seg.temp_out_c)
            .bind(seg.temp_diff_c)
            .bind(seg.flow_m3h)
            .bind(seg.ambient_c)
            .bind(seg.ambient_rh)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Propagate one day's segments up all three roll-up levels.
    pub async fn rollup_from_day(&self, day: NaiveDate) -> Result<()> {
        self.rollup_month_day(day).await?;
        self.rollup_year_month(day.year(), day.month()).await?;
        self.rollup_total_year(day.year()).await
    }

    async fn rollup_month_day(&self, day: NaiveDate) -> Result<()> {
        let periods = self.aggregate(
            "SELECT status, COUNT(*) AS events, SUM(duration_s) AS dur,
                    SUM(grid_kwh) AS grid, SUM(heat_pos_kwh) AS pos,
                    SUM(heat_neg_kwh) AS neg, SUM(volume_m3) AS vol,
                    SUM(temp_in_c * duration_s) AS w_tin,
                    SUM(temp_out_c * duration_s) AS w_tout,
                    SUM(temp_diff_c * duration_s) AS w_dt,
                    SUM(flow_m3h * duration_s) AS w_flow,
                    SUM(ambient_c * duration_s) AS w_amb,
                    SUM(ambient_rh * duration_s) AS w_rh
             FROM day_segments WHERE day = ? GROUP BY status",
            &day_key(day),
        )
        .await?;

        let (year, month, dom) = (day.year() as i64, day.month() as i64, day.day() as i64);
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM month_days WHERE year = ? AND month = ? AND day = ?")
            .bind(year)
            .bind(month)
            .bind(dom)
            .execute(&mut *tx)
            .await?;
        for p in &periods {
            sqlx::query(
                "INSERT OR REPLACE INTO month_days (
                    year, month, day, status, duration_s,
                    grid_kwh, heat_pos_kwh, heat_neg_kwh, volume_m3,
                    temp_in_c, temp_out_c, temp_diff_c, flow_m3h, ambient_c, ambient_rh,
                    event_count
                 ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(year)
            .bind(month)
            .bind(dom)
            .bind(p.status.as_str())
            .bind(p.duration_s)
            .bind(p.grid_kwh)
            .bind(p.heat_pos_kwh)
            .bind(p.heat_neg_kwh)
            .bind(p.volume_m3)
            .bind(p.temp_in_c)
            .bind(p.temp_out_c)
            .bind(p.temp_diff_c)
            .bind(p.flow_m3h)
            .bind(p.ambient_c)
            .bind(p.ambient_rh)
            .bind(p.event_count)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn rollup_year_month(&self, year: i32, month: u32) -> Result<()> {
        let rows = sqlx::query(
            "SELECT status, SUM(event_count) AS events, SUM(duration_s) AS dur,
                    SUM(grid_kwh) AS grid, SUM(heat_pos_kwh) AS pos,
                    SUM(heat_neg_kwh) AS neg, SUM(volume_m3) AS vol,
                    SUM(temp_in_c * duration_s) AS w_tin,
                    SUM(temp_out_c * duration_s) AS w_tout,
                    SUM(temp_diff_c * duration_s) AS w_dt,
                    SUM(flow_m3h * duration_s) AS w_flow,
                    SUM(ambient_c * duration_s) AS w_amb,
                    SUM(ambient_rh * duration_s) AS w_rh
             FROM month_days WHERE year = ? AND month = ? GROUP BY status",
        )
        .bind(year as i64)
        .bind(month as i64)
        .fetch_all(&self.pool)
        .await?;
        let periods: Vec<PeriodRow> = rows.iter().filter_map(map_aggregate).collect();

        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM year_months WHERE year = ? AND month = ?")
            .bind(year as i64)
            .bind(month as i64)
            .execute(&mut *tx)
            .await?;
        for p in &periods {
            sqlx::query(
                "INSERT OR REPLACE INTO year_months (
                    year, month, status, duration_s,
                    grid_kwh, heat_pos_kwh, heat_neg_kwh, volume_m3,
                    temp_in_c, temp_out_c, temp_diff_c, flow_m3h, ambient_c, ambient_rh,
                    event_count
                 ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(year as i64)
            .bind(month as i64)
            .bind(p.status.as_str())
            .bind(p.duration_s)
            .bind(p.grid_kwh)
            .bind(p.heat_pos_kwh)
            .bind(p.heat_neg_kwh)
            .bind(p.volume_m3)
            .bind(p.temp_in_c)
            .bind(p.temp_out_c)
            .bind(p.temp_diff_c)
            .bind(p.flow_m3h)
            .bind(p.ambient_c)
            .bind(p.ambient_rh)
            .bind(p.event_count)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn rollup_total_year(&self, year: i32) -> Result<()> {
        let rows = sqlx::query(
            "SELECT status, SUM(event_count) AS events, SUM(duration_s) AS dur,
                    SUM(grid_kwh) AS grid, SUM(heat_pos_kwh) AS pos,
                    SUM(heat_neg_kwh) AS neg, SUM(volume_m3) AS vol,
                    SUM(temp_in_c * duration_s) AS w_tin,
                    SUM(temp_out_c * duration_s) AS w_tout,
                    SUM(temp_diff_c * duration_s) AS w_dt,
                    SUM(flow_m3h * duration_s) AS w_flow,
                    SUM(ambient_c * duration_s) AS w_amb,
                    SUM(ambient_rh * duration_s) AS w_rh
             FROM year_months WHERE year = ? GROUP BY status",
        )
        .bind(year as i64)
        .fetch_all(&self.pool)
        .await?;
        let periods: Vec<PeriodRow> = rows.iter().filter_map(map_aggregate).collect();

        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM total_years WHERE year = ?")
            .bind(year as i64)
            .execute(&mut *tx)
            .await?;
        for p in &periods {
            sqlx::query(
                "INSERT OR REPLACE INTO total_years (
                    year, status, duration_s,
                    grid_kwh, heat_pos_kwh, heat_neg_kwh, volume_m3,
                    temp_in_c, temp_out_c, temp_diff_c, flow_m3h, ambient_c, ambient_rh,
                    event_count
                 ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(year as i64)
            .bind(p.status.as_str())
            .bind(p.duration_s)
            .bind(p.grid_kwh)
            .bind(p.heat_pos_kwh)
            .bind(p.heat_neg_kwh)
            .bind(p.volume_m3)
            .bind(p.temp_in_c)
            .bind(p.temp_out_c)
            .bind(p.temp_diff_c)
            .bind(p.flow_m3h)
            .bind(p.ambient_c)
            .bind(p.ambient_rh)
            .bind(p.event_count)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn aggregate(&self, sql: &str, key: &str) -> Result<Vec<PeriodRow>> {
        let rows = sqlx::query(sql).bind(key).fetch_all(&self.pool).await?;
        Ok(rows.iter().filter_map(map_aggregate).collect())
    }

    /// The day's segment rows, ordered for stable comparison.
    pub async fn day_segments(&self, day: NaiveDate) -> Result<Vec<DaySegmentRow>> {
        let rows = sqlx::query(
            "SELECT day, status, start_ts_utc_s, end_ts_utc_s, duration_s,
                    grid_kwh, heat_pos_kwh, heat_neg_kwh, volume_m3,
                    temp_in_c, temp_out_c, temp_diff_c, flow_m3h, ambient_c, ambient_rh
             FROM day_segments WHERE day = ?
             ORDER BY start_ts_utc_s ASC, status ASC",
        )
        .bind(day_key(day))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .filter_map(|r| {
                let status = parse_status(r)?;
                let day_text: String = r.get("day");
                let day = NaiveDate::parse_from_str(&day_text, "%Y-%m-%d").ok()?;
                Some(DaySegmentRow {
                    day,
                    status,
                    start_ts_utc_s: r.get("start_ts_utc_s"),
                    end_ts_utc_s: r.get("end_ts_utc_s"),
                    duration_s: r.get("duration_s"),
                    grid_kwh: r.get("grid_kwh"),
                    heat_pos_kwh: r.get("heat_pos_kwh"),
                    heat_neg_kwh: r.get("heat_neg_kwh"),
                    volume_m3: r.get("volume_m3"),
                    temp_in_c: r.get("temp_in_c"),
                    temp_out_c: r.get("temp_out_c"),
                    temp_diff_c: r.get("temp_diff_c"),
                    flow_m3h: r.get("flow_m3h"),
                    ambient_c: r.get("ambient_c"),
                    ambient_rh: r.get("ambient_rh"),
                })
            })
            .collect())
    }

    /// Per-day roll-up rows of one month, as `(day_of_month, row)`.
    pub async fn month_days(&self, year: i32, month: u32) -> Result<Vec<(i64, PeriodRow)>> {
        let rows = sqlx::query(
            "SELECT day, status, duration_s, grid_kwh, heat_pos_kwh, heat_neg_kwh,
                    volume_m3, temp_in_c, temp_out_c, temp_diff_c, flow_m3h,
                    ambient_c, ambient_rh, event_count
             FROM month_days WHERE year = ? AND month = ?
             ORDER BY day ASC, status ASC",
        )
        .bind(year as i64)
        .bind(month as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .filter_map(|r| Some((r.get::<i64, _>("day"), map_period(r)?)))
            .collect())
    }

    /// Per-month roll-up rows of one year, as `(month, row)`.
    pub async fn year_months(&self, year: i32) -> Result<Vec<(i64, PeriodRow)>> {
        let rows = sqlx::query(
            "SELECT month, status, duration_s, grid_kwh, heat_pos_kwh, heat_neg_kwh,
                    volume_m3, temp_in_c, temp_out_c, temp_diff_c, flow_m3h,
                    ambient_c, ambient_rh, event_count
             FROM year_months WHERE year = ?
             ORDER BY month ASC, status ASC",
        )
        .bind(year as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .filter_map(|r| Some((r.get::<i64, _>("month"), map_period(r)?)))
            .collect())
    }

    /// Lifetime roll-up rows, as `(year, row)`.
    pub async fn total_years(&self) -> Result<Vec<(i64, PeriodRow)>> {
        let rows = sqlx::query(
            "SELECT year, status, duration_s, grid_kwh, heat_pos_kwh, heat_neg_kwh,
                    volume_m3, temp_in_c, temp_out_c, temp_diff_c, flow_m3h,
                    ambient_c, ambient_rh, event_count
             FROM total_years ORDER BY year ASC, status ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .filter_map(|r| Some((r.get::<i64, _>("year"), map_period(r)?)))
            .collect())
    }
}

fn day_key(day: NaiveDate) -> String {
    day.format("%Y-%m-%d").to_string()
}

fn parse_status(r: &SqliteRow) -> Option<Status> {
    let text: String = r.get("status");
    match text.parse::<Status>() {
        Ok(s) => Some(s),
        Err(e) => {
            warn!("skipping summary row: {e}");
            None
        }
    }
}

/// Fold one grouped aggregation row into the next level's row. ON carries no
/// duration or physics, only how many times the system (re)started.
fn map_aggregate(r: &SqliteRow) -> Option<PeriodRow> {
    let status = parse_status(r)?;
    let events: Option<i64> = r.get("events");
    let event_count = events.unwrap_or(0);
    if status == Status::On {
        return Some(PeriodRow {
            status,
            duration_s: 0,
            grid_kwh: None,
            heat_pos_kwh: None,
            heat_neg_kwh: None,
            volume_m3: None,
            temp_in_c: None,
            temp_out_c: None,
            temp_diff_c: None,
            flow_m3h: None,
            ambient_c: None,
            ambient_rh: None,
            event_count,
        });
    }
    let dur: Option<i64> = r.get("dur");
    let dur = dur.unwrap_or(0);
    let wavg = |col: &str| -> Option<f64> {
        if dur > 0 {
            r.get::<Option<f64>, _>(col).map(|w| round2(w / dur as f64))
        } else {
            None
        }
    };
    Some(PeriodRow {
        status,
        duration_s: dur,
        grid_kwh: r.get::<Option<f64>, _>("grid").map(round2),
        heat_pos_kwh: r.get::<Option<f64>, _>("pos").map(round2),
        heat_neg_kwh: r.get::<Option<f64>, _>("neg").map(round2),
        volume_m3: r.get::<Option<f64>, _>("vol").map(round2),
        temp_in_c: wavg("w_tin"),
        temp_out_c: wavg("w_tout"),
        temp_diff_c: wavg("w_dt"),
        flow_m3h: wavg("w_flow"),
        ambient_c: wavg("w_amb"),
        ambient_rh: wavg("w_rh"),
        event_count,
    })
}

fn map_period(r: &SqliteRow) -> Option<PeriodRow> {
    let status = parse_status(r)?;
    Some(PeriodRow {
        status,
        duration_s: r.get("duration_s"),
        grid_kwh: r.get("grid_kwh"),
        heat_pos_kwh: r.get("heat_pos_kwh"),
        heat_neg_kwh: r.get("heat_neg_kwh"),
        volume_m3: r.get("volume_m3"),
        temp_in_c: r.get("temp_in_c"),
        temp_out_c: r.get("temp_out_c"),
        temp_diff_c: r.get("temp_diff_c"),
        flow_m3h: r.get("flow_m3h"),
        ambient_c: r.get("ambient_c"),
        ambient_rh: r.get("ambient_rh"),
        event_count: r.get("event_count"),
    })
}
