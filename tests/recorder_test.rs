//! End-to-end recorder tests over an in-memory database, driving the tick
//! state machine with synthetic snapshots and clocks.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use sqlx::Row;
use tokio::time::Instant;

use heatpump_monitor::classify::Status;
use heatpump_monitor::config::{ClassifierConfig, RecorderConfig};
use heatpump_monitor::db::{self, DbPool};
use heatpump_monitor::models::SampleRow;
use heatpump_monitor::recorder::Recorder;
use heatpump_monitor::repositories::{SampleRepository, SummaryRepository};
use heatpump_monitor::store::{LiveSnapshot, LiveStore};

fn tz() -> Tz {
    "Europe/Bucharest".parse().unwrap()
}

async fn setup() -> (Recorder, DbPool) {
    let pool = db::connect_memory().await.unwrap();
    db::init_schema(&pool).await.unwrap();
    let recorder = Recorder::new(
        pool.clone(),
        Arc::new(LiveStore::default()),
        ClassifierConfig::default(),
        RecorderConfig::default(),
        tz(),
    );
    (recorder, pool)
}

fn local(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
    tz()
        .with_ymd_and_hms(y, mo, d, h, mi, s)
        .unwrap()
        .with_timezone(&Utc)
}

fn standby_snap(grid_kwh: f64) -> LiveSnapshot {
    LiveSnapshot {
        grid_power_w: Some(45.0),
        grid_energy_kwh: Some(grid_kwh),
        flow_m3h: Some(0.0),
        temp_in_c: Some(30.0),
        temp_out_c: Some(30.0),
        ambient_c: Some(18.0),
        ..Default::default()
    }
}

fn heating_snap(grid_kwh: f64) -> LiveSnapshot {
    LiveSnapshot {
        grid_power_w: Some(480.0),
        grid_energy_kwh: Some(grid_kwh),
        flow_m3h: Some(0.6),
        temp_in_c: Some(45.0),
        temp_out_c: Some(35.0),
        ambient_c: Some(12.0),
        ..Default::default()
    }
}

async fn sample_count(pool: &DbPool) -> i64 {
    sqlx::query("SELECT COUNT(*) AS c FROM samples")
        .fetch_one(pool)
        .await
        .unwrap()
        .get("c")
}

async fn sample_status(pool: &DbPool, ts: i64) -> Option<String> {
    sqlx::query("SELECT status FROM samples WHERE ts_utc_s = ?")
        .bind(ts)
        .fetch_optional(pool)
        .await
        .unwrap()
        .map(|r| r.get("status"))
}

#[tokio::test]
async fn empty_snapshot_is_skipped() {
    let (mut recorder, pool) = setup().await;
    recorder
        .tick(LiveSnapshot::default(), local(2025, 6, 10, 12, 0, 0), Instant::now())
        .await
        .unwrap();
    assert_eq!(sample_count(&pool).await, 0);
}

#[tokio::test]
async fn first_write_is_an_on_boundary() {
    let (mut recorder, pool) = setup().await;
    let now = local(2025, 6, 10, 12, 0, 0);
    recorder
        .tick(standby_snap(100.0), now, Instant::now())
        .await
        .unwrap();
    assert_eq!(sample_count(&pool).await, 1);
    assert_eq!(sample_status(&pool, now.timestamp()).await.as_deref(), Some("ON"));
}

#[tokio::test]
async fn standby_dwell_gates_repeat_writes() {
    let (mut recorder, pool) = setup().await;
    let base = local(2025, 6, 10, 12, 0, 0);
    let mono = Instant::now();
    let at = |secs: u64| (base + chrono::Duration::seconds(secs as i64), mono + Duration::from_secs(secs));

    // First write is the ON boundary, the next standby tick is a status
    // change; the dwell clock starts there.
    let (now, m) = at(0);
    recorder.tick(standby_snap(100.0), now, m).await.unwrap();
    let (now, m) = at(5);
    recorder.tick(standby_snap(100.0), now, m).await.unwrap();
    assert_eq!(sample_count(&pool).await, 2);

    // 250 s later: still inside the 300 s standby dwell, nothing written.
    let (now, m) = at(255);
    recorder.tick(standby_snap(100.1), now, m).await.unwrap();
    assert_eq!(sample_count(&pool).await, 2);

    // Past the dwell: exactly one new row.
    let (now, m) = at(310);
    recorder.tick(standby_snap(100.2), now, m).await.unwrap();
    assert_eq!(sample_count(&pool).await, 3);
    assert_eq!(
        sample_status(&pool, (base + chrono::Duration::seconds(310)).timestamp())
            .await
            .as_deref(),
        Some("S")
    );
}

#[tokio::test]
async fn leaving_standby_bridges_the_previous_read() {
    let (mut recorder, pool) = setup().await;
    let base = local(2025, 6, 10, 12, 0, 0);
    let mono = Instant::now();
    let at = |secs: u64| (base + chrono::Duration::seconds(secs as i64), mono + Duration::from_secs(secs));

    let (now, m) = at(0);
    recorder.tick(standby_snap(100.0), now, m).await.unwrap();
    let (now, m) = at(5);
    recorder.tick(standby_snap(100.0), now, m).await.unwrap();

    // Skipped standby tick; its snapshot is remembered as the last read.
    let (now, m) = at(255);
    recorder.tick(standby_snap(100.5), now, m).await.unwrap();
    assert_eq!(sample_count(&pool).await, 2);

    // Transition away from standby after skipped ticks: the previous read
    // is persisted first, closing the standby stretch with its counters.
    let (now, m) = at(260);
    recorder.tick(heating_snap(100.6), now, m).await.unwrap();
    assert_eq!(sample_count(&pool).await, 4);

    let bridged_ts = (base + chrono::Duration::seconds(255)).timestamp();
    let row = sqlx::query("SELECT status, grid_energy_kwh FROM samples WHERE ts_utc_s = ?")
        .bind(bridged_ts)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(row.get::<String, _>("status"), "S");
    assert_eq!(row.get::<Option<f64>, _>("grid_energy_kwh"), Some(100.5));

    // Dropping back to standby is not bridged.
    let (now, m) = at(265);
    recorder.tick(standby_snap(100.7), now, m).await.unwrap();
    assert_eq!(sample_count(&pool).await, 5);
}

#[tokio::test]
async fn first_run_backfills_offline_gap() {
    let (mut recorder, pool) = setup().await;
    let samples = SampleRepository::new(pool.clone());
    let summary = SummaryRepository::new(pool.clone(), tz());

    // History from a previous run ending two hours ago.
    let seed_ts = local(2025, 6, 10, 9, 0, 0).timestamp();
    samples
        .upsert(&SampleRow::from_snapshot(seed_ts, Status::Heating, &heating_snap(90.0)))
        .await
        .unwrap();

    let now = local(2025, 6, 10, 11, 0, 0);
    recorder
        .tick(standby_snap(100.0), now, Instant::now())
        .await
        .unwrap();

    assert_eq!(sample_status(&pool, now.timestamp()).await.as_deref(), Some("ON"));

    let day = NaiveDate::from_ymd_opt(2025, 6, 10).unwrap();
    let segs = summary.day_segments(day).await.unwrap();

    let off: Vec<_> = segs.iter().filter(|s| s.status == Status::Off).collect();
    assert_eq!(off.len(), 1);
    assert_eq!(off[0].start_ts_utc_s, seed_ts);
    assert_eq!(off[0].end_ts_utc_s, now.timestamp());
    assert_eq!(off[0].duration_s, 7200);

    // The restart marker is anchored at the last reading of the old run.
    let on: Vec<_> = segs.iter().filter(|s| s.status == Status::On).collect();
    assert_eq!(on.len(), 1);
    assert_eq!(on[0].start_ts_utc_s, seed_ts);
    assert_eq!(on[0].end_ts_utc_s, now.timestamp());
    assert_eq!(on[0].duration_s, 0);
}

#[tokio::test]
async fn offline_gap_splits_at_local_midnight() {
    let (mut recorder, pool) = setup().await;
    let samples = SampleRepository::new(pool.clone());
    let summary = SummaryRepository::new(pool.clone(), tz());

    let seed_ts = local(2025, 6, 9, 23, 0, 0).timestamp();
    samples
        .upsert(&SampleRow::from_snapshot(seed_ts, Status::Standby, &standby_snap(90.0)))
        .await
        .unwrap();

    let now = local(2025, 6, 10, 1, 0, 0);
    recorder
        .tick(standby_snap(100.0), now, Instant::now())
        .await
        .unwrap();

    let d1 = NaiveDate::from_ymd_opt(2025, 6, 9).unwrap();
    let d2 = NaiveDate::from_ymd_opt(2025, 6, 10).unwrap();
    let midnight_ts = local(2025, 6, 10, 0, 0, 0).timestamp();

    let off1: Vec<_> = summary
        .day_segments(d1)
        .await
        .unwrap()
        .into_iter()
        .filter(|s| s.status == Status::Off)
        .collect();
    assert_eq!(off1.len(), 1);
    assert_eq!(off1[0].start_ts_utc_s, seed_ts);
    assert_eq!(off1[0].end_ts_utc_s, midnight_ts);
    assert_eq!(off1[0].duration_s, 3600);

    let off2: Vec<_> = summary
        .day_segments(d2)
        .await
        .unwrap()
        .into_iter()
        .filter(|s| s.status == Status::Off)
        .collect();
    assert_eq!(off2.len(), 1);
    assert_eq!(off2[0].start_ts_utc_s, midnight_ts);
    assert_eq!(off2[0].end_ts_utc_s, now.timestamp());
    assert_eq!(off2[0].duration_s, 3600);
}

/// Ten-minute power ramp: standby, a heating stretch, standby again. The
/// day ends up with exactly one heating segment bounded by the ramp edges.
#[tokio::test]
async fn power_ramp_produces_one_heating_segment() {
    let (mut recorder, pool) = setup().await;
    let summary = SummaryRepository::new(pool.clone(), tz());
    let base = local(2025, 6, 10, 12, 0, 0);
    let mono = Instant::now();

    for i in 0..20u64 {
        let x = i * 30;
        let grid = 100.0 + x as f64 * 0.001;
        let snap = if (4..14).contains(&i) {
            heating_snap(grid)
        } else {
            standby_snap(grid)
        };
        recorder
            .tick(
                snap,
                base + chrono::Duration::seconds(x as i64),
                mono + Duration::from_secs(x),
            )
            .await
            .unwrap();
    }

    let day = NaiveDate::from_ymd_opt(2025, 6, 10).unwrap();
    let segs = summary.day_segments(day).await.unwrap();

    let heating: Vec<_> = segs.iter().filter(|s| s.status == Status::Heating).collect();
    assert_eq!(heating.len(), 1);
    let h = heating[0];
    // Heating held from the x=120 tick until the x=420 standby edge.
    assert_eq!(h.start_ts_utc_s, base.timestamp() + 120);
    assert_eq!(h.end_ts_utc_s, base.timestamp() + 420);
    assert_eq!(h.duration_s, 300);
    assert_eq!(h.grid_kwh, Some(0.3));
    assert_eq!(h.temp_in_c, Some(45.0));
    assert_eq!(h.temp_out_c, Some(35.0));

    // No time lost between segments: standby + heating spans the distance
    // from the first stored standby row to the ramp-down edge.
    let accumulated: i64 = segs
        .iter()
        .filter(|s| s.status.is_accumulating())
        .map(|s| s.duration_s)
        .sum();
    assert_eq!(accumulated, 390);
}

#[tokio::test]
async fn day_rebuild_is_idempotent() {
    let (mut recorder, pool) = setup().await;
    let summary = SummaryRepository::new(pool.clone(), tz());
    let base = local(2025, 6, 10, 12, 0, 0);
    let mono = Instant::now();

    for i in 0..10u64 {
        let x = i * 30;
        let snap = if i >= 3 { heating_snap(100.0 + x as f64 * 0.01) } else { standby_snap(100.0) };
        recorder
            .tick(
                snap,
                base + chrono::Duration::seconds(x as i64),
                mono + Duration::from_secs(x),
            )
            .await
            .unwrap();
    }

    let day = NaiveDate::from_ymd_opt(2025, 6, 10).unwrap();
    summary.rebuild_day(day, &[]).await.unwrap();
    let first = summary.day_segments(day).await.unwrap();
    assert!(!first.is_empty());

    summary.rebuild_day(day, &[]).await.unwrap();
    let second = summary.day_segments(day).await.unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn rollups_agree_across_levels() {
    let (mut recorder, pool) = setup().await;
    let summary = SummaryRepository::new(pool.clone(), tz());
    let base = local(2025, 6, 10, 12, 0, 0);
    let mono = Instant::now();

    for i in 0..20u64 {
        let x = i * 30;
        let grid = 100.0 + x as f64 * 0.001;
        let snap = if (4..14).contains(&i) { heating_snap(grid) } else { standby_snap(grid) };
        recorder
            .tick(
                snap,
                base + chrono::Duration::seconds(x as i64),
                mono + Duration::from_secs(x),
            )
            .await
            .unwrap();
    }

    let month_days = summary.month_days(2025, 6).await.unwrap();
    let year_months = summary.year_months(2025).await.unwrap();
    let total_years = summary.total_years().await.unwrap();
    assert!(!month_days.is_empty());

    for status in [Status::Standby, Status::Heating, Status::On] {
        let day_dur: i64 = month_days
            .iter()
            .filter(|(_, p)| p.status == status)
            .map(|(_, p)| p.duration_s)
            .sum();
        let day_events: i64 = month_days
            .iter()
            .filter(|(_, p)| p.status == status)
            .map(|(_, p)| p.event_count)
            .sum();

        let month = year_months
            .iter()
            .find(|(m, p)| *m == 6 && p.status == status)
            .map(|(_, p)| p)
            .unwrap();
        assert_eq!(month.duration_s, day_dur, "month duration for {status}");
        assert_eq!(month.event_count, day_events, "month events for {status}");

        let year = total_years
            .iter()
            .find(|(y, p)| *y == 2025 && p.status == status)
            .map(|(_, p)| p)
            .unwrap();
        assert_eq!(year.duration_s, day_dur, "year duration for {status}");
        assert_eq!(year.event_count, day_events, "year events for {status}");
    }

    // The ON level carries only the restart count.
    let on = total_years
        .iter()
        .find(|(_, p)| p.status == Status::On)
        .map(|(_, p)| p)
        .unwrap();
    assert_eq!(on.duration_s, 0);
    assert_eq!(on.event_count, 1);
    assert_eq!(on.grid_kwh, None);
}

#[tokio::test]
async fn day_rollover_finalizes_the_previous_day() {
    let (mut recorder, pool) = setup().await;
    let summary = SummaryRepository::new(pool.clone(), tz());
    let mono = Instant::now();

    // Establish samples late on day one.
    let evening = local(2025, 6, 9, 23, 50, 0);
    recorder.tick(standby_snap(100.0), evening, mono).await.unwrap();
    recorder
        .tick(
            standby_snap(100.0),
            evening + chrono::Duration::seconds(5),
            mono + Duration::from_secs(5),
        )
        .await
        .unwrap();
    recorder
        .tick(
            heating_snap(100.1),
            evening + chrono::Duration::seconds(305),
            mono + Duration::from_secs(305),
        )
        .await
        .unwrap();

    // First tick after midnight triggers the previous day's finalization.
    let after_midnight = local(2025, 6, 10, 0, 0, 10);
    recorder
        .tick(
            heating_snap(100.2),
            after_midnight,
            mono + Duration::from_secs(620),
        )
        .await
        .unwrap();

    let d1 = NaiveDate::from_ymd_opt(2025, 6, 9).unwrap();
    let segs = summary.day_segments(d1).await.unwrap();
    assert!(
        segs.iter().any(|s| s.status == Status::Standby),
        "previous day must be summarized after rollover"
    );
    let (_, on_row) = summary
        .month_days(2025, 6)
        .await
        .unwrap()
        .into_iter()
        .find(|(d, p)| *d == 9 && p.status == Status::On)
        .unwrap();
    assert_eq!(on_row.event_count, 1);
}
