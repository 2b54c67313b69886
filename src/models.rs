//! Persisted row types.
//!
//! Every value field is nullable: a poller that has not yet produced a field
//! leaves a NULL behind, and every downstream computation excludes NULL
//! operands instead of treating them as zero.

use chrono::NaiveDate;

use crate::classify::Status;
use crate::decode::round2;
use crate::store::LiveSnapshot;

/// One persisted sample, keyed by its UTC-second timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleRow {
    pub ts_utc_s: i64,
    pub status: Status,
    pub grid_power_w: Option<f64>,
    pub grid_energy_kwh: Option<f64>,
    pub heat_power_kw: Option<f64>,
    pub heat_pos_kwh: Option<f64>,
    pub heat_neg_kwh: Option<f64>,
    pub temp_in_c: Option<f64>,
    pub temp_out_c: Option<f64>,
    pub temp_diff_c: Option<f64>,
    pub flow_m3h: Option<f64>,
    pub volume_m3: Option<f64>,
    pub fault_code: Option<i64>,
    pub work_hours: Option<i64>,
    pub ambient_c: Option<f64>,
    pub ambient_rh: Option<f64>,
}

impl SampleRow {
    /// Freeze a live snapshot into a sample, rounding to stored precision.
    pub fn from_snapshot(ts_utc_s: i64, status: Status, snap: &LiveSnapshot) -> Self {
        Self {
            ts_utc_s,
            status,
            grid_power_w: snap.grid_power_w.map(round2),
            grid_energy_kwh: snap.grid_energy_kwh.map(round2),
            heat_power_kw: snap.heat_power_kw.map(round2),
            heat_pos_kwh: snap.heat_pos_kwh.map(round2),
            heat_neg_kwh: snap.heat_neg_kwh.map(round2),
            temp_in_c: snap.temp_in_c.map(round2),
            temp_out_c: snap.temp_out_c.map(round2),
            temp_diff_c: snap.temp_diff_c.map(round2),
            flow_m3h: snap.flow_m3h.map(round2),
            volume_m3: snap.volume_m3.map(round2),
            fault_code: snap.fault_code,
            work_hours: snap.work_hours,
            ambient_c: snap.ambient_c.map(round2),
            ambient_rh: snap.ambient_rh.map(round2),
        }
    }
}

/// One contiguous same-status interval within one local calendar day.
///
/// `On` rows are zero-duration boundary markers; `Off` rows are backfilled
/// offline intervals carrying only a duration.
#[derive(Debug, Clone, PartialEq)]
pub struct DaySegmentRow {
    pub day: NaiveDate,
    pub status: Status,
    pub start_ts_utc_s: i64,
    pub end_ts_utc_s: i64,
    pub duration_s: i64,
    /// Grid energy consumed over the segment (kWh, end minus start).
    pub grid_kwh: Option<f64>,
    /// Heating energy delivered over the segment (kWh).
    pub heat_pos_kwh: Option<f64>,
    /// Cooling energy delivered over the segment (kWh).
    pub heat_neg_kwh: Option<f64>,
    /// Circulated volume over the segment (m³).
    pub volume_m3: Option<f64>,
    pub temp_in_c: Option<f64>,
    pub temp_out_c: Option<f64>,
    pub temp_diff_c: Option<f64>,
    pub flow_m3h: Option<f64>,
    pub ambient_c: Option<f64>,
    pub ambient_rh: Option<f64>,
}

/// One per-status roll-up row at the month-day, year-month or total-year
/// level; the period key lives outside the struct.
#[derive(Debug, Clone, PartialEq)]
pub struct PeriodRow {
    pub status: Status,
    pub duration_s: i64,
    pub grid_kwh: Option<f64>,
    pub heat_pos_kwh: Option<f64>,
    pub heat_neg_kwh: Option<f64>,
    pub volume_m3: Option<f64>,
    pub temp_in_c: Option<f64>,
    pub temp_out_c: Option<f64>,
    pub temp_diff_c: Option<f64>,
    pub flow_m3h: Option<f64>,
    pub ambient_c: Option<f64>,
    pub ambient_rh: Option<f64>,
    /// Number of source rows folded in; for `On` this is the (re)start
    /// count and the only meaningful value.
    pub event_count: i64,
}
