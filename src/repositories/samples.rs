use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::warn;

use crate::classify::Status;
use crate::db::DbPool;
use crate::error::Result;
use crate::models::SampleRow;

#[derive(Clone)]
pub struct SampleRepository {
    pool: DbPool,
}

impl SampleRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Insert or replace the sample at its timestamp key.
    pub async fn upsert(&self, row: &SampleRow) -> Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO samples (
                ts_utc_s, status, grid_power_w, grid_energy_kwh, heat_power_kw,
                heat_pos_kwh, heat_neg_kwh, temp_in_c, temp_out_c, temp_diff_c,
                flow_m3h, volume_m3, fault_code, work_hours, ambient_c, ambient_rh
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(row.ts_utc_s)
        .bind(row.status.as_str())
        .bind(row.grid_power_w)
        .bind(row.grid_energy_kwh)
        .bind(row.heat_power_kw)
        .bind(row.heat_pos_kwh)
        .bind(row.heat_neg_kwh)
        .bind(row.temp_in_c)
        .bind(row.temp_out_c)
        .bind(row.temp_diff_c)
        .bind(row.flow_m3h)
        .bind(row.volume_m3)
        .bind(row.fault_code)
        .bind(row.work_hours)
        .bind(row.ambient_c)
        .bind(row.ambient_rh)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Timestamp of the newest operating (non-boundary) sample, if any.
    pub async fn last_operating_ts(&self) -> Result<Option<i64>> {
        let row = sqlx::query(
            "SELECT ts_utc_s FROM samples
             WHERE status NOT IN ('ON', 'OFF')
             ORDER BY ts_utc_s DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| r.get("ts_utc_s")))
    }

    /// Newest operating sample strictly before `ts`, searched over the whole
    /// history (an ON marker may be anchored days back).
    pub async fn last_operating_ts_before(&self, ts: i64) -> Result<Option<i64>> {
        let row = sqlx::query(
            "SELECT ts_utc_s FROM samples
             WHERE ts_utc_s < ? AND status NOT IN ('ON', 'OFF')
             ORDER BY ts_utc_s DESC LIMIT 1",
        )
        .bind(ts)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| r.get("ts_utc_s")))
    }

    /// All samples with `start_ts <= ts < end_ts`, ascending.
    pub async fn load_window(&self, start_ts: i64, end_ts: i64) -> Result<Vec<SampleRow>> {
        let rows = sqlx::query(
            "SELECT ts_utc_s, status, grid_power_w, grid_energy_kwh, heat_power_kw,
                    heat_pos_kwh, heat_neg_kwh, temp_in_c, temp_out_c, temp_diff_c,
                    flow_m3h, volume_m3, fault_code, work_hours, ambient_c, ambient_rh
             FROM samples
             WHERE ts_utc_s >= ? AND ts_utc_s < ?
             ORDER BY ts_utc_s ASC",
        )
        .bind(start_ts)
        .bind(end_ts)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().filter_map(map_sample).collect())
    }
}

fn map_sample(r: &SqliteRow) -> Option<SampleRow> {
    let status_text: String = r.get("status");
    let status = match status_text.parse::<Status>() {
        Ok(s) => s,
        Err(e) => {
            // A foreign writer or corruption put something unexpected here;
            // one bad row must not block the day rebuild.
            warn!("skipping sample: {e}");
            return None;
        }
    };
    Some(SampleRow {
        ts_utc_s: r.get("ts_utc_s"),
        status,
        grid_power_w: r.get("grid_power_w"),
        grid_energy_kwh: r.get("grid_energy_kwh"),
        heat_power_kw: r.get("heat_power_kw"),
        heat_pos_kwh: r.get("heat_pos_kwh"),
        heat_neg_kwh: r.get("heat_neg_kwh"),
        temp_in_c: r.get("temp_in_c"),
        temp_out_c: r.get("temp_out_c"),
        temp_diff_c: r.get("temp_diff_c"),
        flow_m3h: r.get("flow_m3h"),
        volume_m3: r.get("volume_m3"),
        fault_code: r.get("fault_code"),
        work_hours: r.get("work_hours"),
        ambient_c: r.get("ambient_c"),
        ambient_rh: r.get("ambient_rh"),
    })
}
