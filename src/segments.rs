//! Day segmentation.
//!
//! Pure functions that turn one local day's worth of samples into the
//! day-segment rows: maximal same-status runs, zero-duration restart
//! markers, and clipped offline intervals. Everything here is deterministic
//! over its inputs so a rebuild can be replayed at any time.
//!
//! Timekeeping note: sample timestamps are UTC seconds, but calendar days
//! are bounded by midnight in the site's timezone, DST included.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

use crate::classify::Status;
use crate::decode::round2;
use crate::models::{DaySegmentRow, SampleRow};

/// The UTC-second bounds of one local calendar day: `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayWindow {
    pub day: NaiveDate,
    pub start_utc_s: i64,
    pub end_utc_s: i64,
}

/// Local calendar date a UTC-second timestamp falls on.
pub fn local_day(ts_utc_s: i64, tz: Tz) -> NaiveDate {
    let utc = DateTime::<Utc>::from_timestamp(ts_utc_s, 0).unwrap_or(DateTime::UNIX_EPOCH);
    utc.with_timezone(&tz).date_naive()
}

fn local_midnight_utc(day: NaiveDate, tz: Tz) -> i64 {
    let mut naive = day.and_time(NaiveTime::MIN);
    // A DST jump can make local midnight nonexistent; the day then starts at
    // the first representable local time after it.
    for _ in 0..3 {
        if let Some(dt) = tz.from_local_datetime(&naive).earliest() {
            return dt.timestamp();
        }
        naive = naive + ChronoDuration::hours(1);
    }
    Utc.from_utc_datetime(&day.and_time(NaiveTime::MIN)).timestamp()
}

pub fn day_window(day: NaiveDate, tz: Tz) -> DayWindow {
    let next = day.succ_opt().unwrap_or(day);
    DayWindow {
        day,
        start_utc_s: local_midnight_utc(day, tz),
        end_utc_s: local_midnight_utc(next, tz),
    }
}

/// Split an offline interval into per-local-day pieces at midnight
/// boundaries. Returns the touched days in calendar order.
pub fn split_offline_gap(
    start_ts: i64,
    end_ts: i64,
    tz: Tz,
) -> BTreeMap<NaiveDate, Vec<(i64, i64)>> {
    let mut out: BTreeMap<NaiveDate, Vec<(i64, i64)>> = BTreeMap::new();
    if end_ts <= start_ts {
        return out;
    }
    let mut day = local_day(start_ts, tz);
    let last_day = local_day(end_ts, tz);
    loop {
        let window = day_window(day, tz);
        let s = start_ts.max(window.start_utc_s);
        let e = end_ts.min(window.end_utc_s);
        if e > s {
            out.entry(day).or_default().push((s, e));
        }
        if day >= last_day {
            break;
        }
        day = match day.succ_opt() {
            Some(d) => d,
            None => break,
        };
    }
    out
}

/// Build all segment rows for one day from its samples.
///
/// `rows` must be the day's samples in ascending timestamp order.
/// `on_marker_starts` maps each ON sample's timestamp to the timestamp of
/// the last operating sample anywhere before it (the marker is anchored to
/// the reading the process last produced, which may be days earlier).
/// `off_intervals` are backfilled offline spans, clipped here to the day.
pub fn build_day_segments(
    window: &DayWindow,
    rows: &[SampleRow],
    on_marker_starts: &HashMap<i64, i64>,
    off_intervals: &[(i64, i64)],
) -> Vec<DaySegmentRow> {
    let mut segments = Vec::new();

    // Restart markers: boundary events, no duration, no energy. They carry
    // the ON sample's own instantaneous readings for display.
    for row in rows.iter().filter(|r| r.status == Status::On) {
        let start = on_marker_starts
            .get(&row.ts_utc_s)
            .copied()
            .unwrap_or(row.ts_utc_s);
        segments.push(DaySegmentRow {
            day: window.day,
            status: Status::On,
            start_ts_utc_s: start,
            end_ts_utc_s: row.ts_utc_s,
            duration_s: 0,
            grid_kwh: None,
            heat_pos_kwh: None,
            heat_neg_kwh: None,
            volume_m3: None,
            temp_in_c: row.temp_in_c,
            temp_out_c: row.temp_out_c,
            temp_diff_c: row.temp_diff_c,
            flow_m3h: row.flow_m3h,
            ambient_c: row.ambient_c,
            ambient_rh: row.ambient_rh,
        });
    }

    // Maximal runs of one operating status. The run's closing row — the
    // first row of a different status, or a boundary row — is included as
    // the end point, so consecutive segments share their edge sample and no
    // time or energy falls into the crack between them.
    let mut run_start: Option<usize> = None;
    for (i, row) in rows.iter().enumerate() {
        if !row.status.is_accumulating() {
            if let Some(s) = run_start.take() {
                segments.extend(close_run(window.day, rows, s, i));
            }
            continue;
        }
        match run_start {
            None => run_start = Some(i),
            Some(s) if rows[s].status != row.status => {
                segments.extend(close_run(window.day, rows, s, i));
                run_start = Some(i);
            }
            Some(_) => {}
        }
    }
    if let Some(s) = run_start {
        segments.extend(close_run(window.day, rows, s, rows.len() - 1));
    }

    for &(s0, e0) in off_intervals {
        let s = s0.max(window.start_utc_s);
        let e = e0.min(window.end_utc_s);
        if e > s {
            segments.push(DaySegmentRow {
                day: window.day,
                status: Status::Off,
                start_ts_utc_s: s,
                end_ts_utc_s: e,
                duration_s: e - s,
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
            });
        }
    }

    segments
}

fn close_run(
    day: NaiveDate,
    rows: &[SampleRow],
    start_idx: usize,
    end_idx: usize,
) -> Option<DaySegmentRow> {
    let first = &rows[start_idx];
    let last = &rows[end_idx];
    // A run that never got past its opening row has no extent.
    if last.ts_utc_s <= first.ts_utc_s {
        return None;
    }
    let status = first.status;

    let delta = |field: fn(&SampleRow) -> Option<f64>| match (field(first), field(last)) {
        (Some(a), Some(b)) => Some(round2(b - a)),
        _ => None,
    };

    // Averages cover only the rows that actually carry the run's status —
    // the closing row belongs to the next segment's state.
    let avg = |field: fn(&SampleRow) -> Option<f64>| {
        let vals: Vec<f64> = rows[start_idx..=end_idx]
            .iter()
            .filter(|r| r.status == status)
            .filter_map(field)
            .collect();
        if vals.is_empty() {
            None
        } else {
            Some(round2(vals.iter().sum::<f64>() / vals.len() as f64))
        }
    };

    Some(DaySegmentRow {
        day,
        status,
        start_ts_utc_s: first.ts_utc_s,
        end_ts_utc_s: last.ts_utc_s,
        duration_s: last.ts_utc_s - first.ts_utc_s,
        grid_kwh: delta(|r| r.grid_energy_kwh),
        heat_pos_kwh: delta(|r| r.heat_pos_kwh),
        heat_neg_kwh: delta(|r| r.heat_neg_kwh),
        volume_m3: delta(|r| r.volume_m3),
        temp_in_c: avg(|r| r.temp_in_c),
        temp_out_c: avg(|r| r.temp_out_c),
        temp_diff_c: avg(|r| r.temp_diff_c),
        flow_m3h: avg(|r| r.flow_m3h),
        ambient_c: avg(|r| r.ambient_c),
        ambient_rh: avg(|r| r.ambient_rh),
    })
}
