use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::{Pool, Sqlite};

use crate::config::DatabaseConfig;
use crate::error::Result;

pub type DbPool = Pool<Sqlite>;

/// Open (creating if needed) the site database.
///
/// The pool is capped at one connection: the recorder is the only writer and
/// WAL mode plus the busy timeout let dashboard readers on separate
/// connections coexist with it.
pub async fn connect(cfg: &DatabaseConfig) -> Result<DbPool> {
    let opts = SqliteConnectOptions::new()
        .filename(&cfg.path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Full)
        .busy_timeout(Duration::from_secs(5));
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(opts)
        .await?;
    Ok(pool)
}

/// In-memory database for tests and tooling. The single pooled connection is
/// pinned so the database outlives individual queries.
pub async fn connect_memory() -> Result<DbPool> {
    let opts = SqliteConnectOptions::from_str("sqlite::memory:")?;
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .connect_with(opts)
        .await?;
    Ok(pool)
}

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS samples (
        ts_utc_s        INTEGER PRIMARY KEY,
        status          TEXT NOT NULL,
        grid_power_w    REAL,
        grid_energy_kwh REAL,
        heat_power_kw   REAL,
        heat_pos_kwh    REAL,
        heat_neg_kwh    REAL,
        temp_in_c       REAL,
        temp_out_c      REAL,
        temp_diff_c     REAL,
        flow_m3h        REAL,
        volume_m3       REAL,
        fault_code      INTEGER,
        work_hours      INTEGER,
        ambient_c       REAL,
        ambient_rh      REAL
    )",
    "CREATE INDEX IF NOT EXISTS idx_samples_status_ts ON samples(status, ts_utc_s)",
    "CREATE TABLE IF NOT EXISTS day_segments (
        day             TEXT NOT NULL,
        status          TEXT NOT NULL,
        start_ts_utc_s  INTEGER NOT NULL,
        end_ts_utc_s    INTEGER NOT NULL,
        duration_s      INTEGER NOT NULL,
        grid_kwh        REAL,
        heat_pos_kwh    REAL,
        heat_neg_kwh    REAL,
        volume_m3       REAL,
        temp_in_c       REAL,
        temp_out_c      REAL,
        temp_diff_c     REAL,
        flow_m3h        REAL,
        ambient_c       REAL,
        ambient_rh      REAL,
        PRIMARY KEY (day, status, start_ts_utc_s)
    )",
    "CREATE TABLE IF NOT EXISTS month_days (
        year            INTEGER NOT NULL,
        month           INTEGER NOT NULL,
        day             INTEGER NOT NULL,
        status          TEXT NOT NULL,
        duration_s      INTEGER NOT NULL,
        grid_kwh        REAL,
        heat_pos_kwh    REAL,
        heat_neg_kwh    REAL,
        volume_m3       REAL,
        temp_in_c       REAL,
        temp_out_c      REAL,
        temp_diff_c     REAL,
        flow_m3h        REAL,
        ambient_c       REAL,
        ambient_rh      REAL,
        event_count     INTEGER NOT NULL,
        PRIMARY KEY (year, month, day, status)
    )",
    "CREATE TABLE IF NOT EXISTS year_months (
        year            INTEGER NOT NULL,
        month           INTEGER NOT NULL,
        status          TEXT NOT NULL,
        duration_s      INTEGER NOT NULL,
        grid_kwh        REAL,
        heat_pos_kwh    REAL,
        heat_neg_kwh    REAL,
        volume_m3       REAL,
        temp_in_c       REAL,
        temp_out_c      REAL,
        temp_diff_c     REAL,
        flow_m3h        REAL,
        ambient_c       REAL,
        ambient_rh      REAL,
        event_count     INTEGER NOT NULL,
        PRIMARY KEY (year, month, status)
    )",
    "CREATE TABLE IF NOT EXISTS total_years (
        year            INTEGER NOT NULL,
        status          TEXT NOT NULL,
        duration_s      INTEGER NOT NULL,
        grid_kwh        REAL,
        heat_pos_kwh    REAL,
        heat_neg_kwh    REAL,
        volume_m3       REAL,
        temp_in_c       REAL,
        temp_out_c      REAL,
        temp_diff_c     REAL,
        flow_m3h        REAL,
        ambient_c       REAL,
        ambient_rh      REAL,
        event_count     INTEGER NOT NULL,
        PRIMARY KEY (year, status)
    )",
];

/// Create the five tables on first start; a no-op afterwards.
pub async fn init_schema(pool: &DbPool) -> Result<()> {
    for ddl in SCHEMA {
        sqlx::query(ddl).execute(pool).await?;
    }
    Ok(())
}
