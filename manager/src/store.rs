use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use tracing::{debug, info, warn};

use crate::errors::Result;
use crate::model::{Alarm, AlarmKind, BinEvent, EventKind, Reading};

const REQUIRED_TABLES: [&str; 3] = ["bin_readings", "bin_events", "bin_alarms"];

const SCHEMA: [&str; 6] = [
    "CREATE TABLE IF NOT EXISTS bin_readings (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        bin_id TEXT NOT NULL,
        fill_level REAL NOT NULL,
        timestamp TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS bin_events (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        bin_id TEXT NOT NULL,
        event_type TEXT NOT NULL,
        details TEXT NOT NULL,
        timestamp TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS bin_alarms (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        bin_id TEXT NOT NULL,
        alarm_type TEXT NOT NULL,
        message TEXT NOT NULL,
        acknowledged INTEGER NOT NULL DEFAULT 0,
        timestamp TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_readings_bin_id ON bin_readings(bin_id)",
    "CREATE INDEX IF NOT EXISTS idx_events_bin_id ON bin_events(bin_id)",
    "CREATE INDEX IF NOT EXISTS idx_alarms_bin_id ON bin_alarms(bin_id)",
];

/// What to do when the database schema is incomplete at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaPolicy {
    /// Create missing tables; existing data is never dropped.
    Preserve,
    /// Drop and recreate all tables when the table set is incomplete.
    Reset,
}

impl FromStr for SchemaPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "preserve" => Ok(SchemaPolicy::Preserve),
            "reset" => Ok(SchemaPolicy::Reset),
            other => Err(format!(
                "invalid DB_SCHEMA_POLICY '{other}' (expected 'preserve' or 'reset')"
            )),
        }
    }
}

/// Handle to the bin database. Cheap to clone; all clones share one pool.
#[derive(Debug, Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    pub async fn open(path: &str, policy: SchemaPolicy) -> Result<Store> {
        info!("Opening database at {}...", path);
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await?;
        info!("Database connection established");

        let store = Store { pool };
        store.init_schema(policy).await?;
        Ok(store)
    }

    #[cfg(test)]
    pub async fn open_in_memory() -> Result<Store> {
        let options = SqliteConnectOptions::new().in_memory(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        let store = Store { pool };
        store.init_schema(SchemaPolicy::Preserve).await?;
        Ok(store)
    }

    async fn init_schema(&self, policy: SchemaPolicy) -> Result<()> {
        let missing = self.missing_tables().await?;
        if missing.is_empty() {
            info!("Using existing database schema");
            return Ok(());
        }
        if policy == SchemaPolicy::Reset && missing.len() < REQUIRED_TABLES.len() {
            warn!(
                "Schema incomplete (missing {:?}), dropping and recreating all tables",
                missing
            );
            for table in REQUIRED_TABLES {
                sqlx::query(&format!("DROP TABLE IF EXISTS {table}"))
                    .execute(&self.pool)
                    .await?;
            }
        } else {
            info!("Creating missing tables: {:?}", missing);
        }
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    async fn missing_tables(&self) -> Result<Vec<String>> {
        let present: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master
             WHERE type = 'table' AND name IN ('bin_readings', 'bin_events', 'bin_alarms')",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(REQUIRED_TABLES
            .iter()
            .filter(|table| !present.iter().any(|p| p == *table))
            .map(|table| table.to_string())
            .collect())
    }

    pub async fn record_reading(
        &self,
        bin_id: &str,
        fill_level: f64,
        timestamp: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query("INSERT INTO bin_readings (bin_id, fill_level, timestamp) VALUES (?, ?, ?)")
            .bind(bin_id)
            .bind(fill_level)
            .bind(timestamp)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn record_event(
        &self,
        bin_id: &str,
        event_type: EventKind,
        details: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO bin_events (bin_id, event_type, details, timestamp) VALUES (?, ?, ?, ?)",
        )
        .bind(bin_id)
        .bind(event_type)
        .bind(details)
        .bind(timestamp)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Insert an unacknowledged alarm and return its store-assigned id.
    pub async fn create_alarm(
        &self,
        bin_id: &str,
        alarm_type: AlarmKind,
        message: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<i64> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO bin_alarms (bin_id, alarm_type, message, acknowledged, timestamp)
             VALUES (?, ?, ?, 0, ?) RETURNING id",
        )
        .bind(bin_id)
        .bind(alarm_type)
        .bind(message)
        .bind(timestamp)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    /// All unacknowledged alarms, newest first.
    pub async fn list_active_alarms(&self) -> Result<Vec<Alarm>> {
        let alarms = sqlx::query_as::<_, Alarm>(
            "SELECT id, bin_id, alarm_type, message, acknowledged, timestamp
             FROM bin_alarms WHERE acknowledged = 0
             ORDER BY timestamp DESC, id DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(alarms)
    }

    /// Mark an alarm acknowledged. A no-op for unknown ids and for alarms
    /// that were already acknowledged.
    pub async fn acknowledge(&self, alarm_id: i64) -> Result<()> {
        let result = sqlx::query("UPDATE bin_alarms SET acknowledged = 1 WHERE id = ?")
            .bind(alarm_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            debug!("Acknowledge for unknown alarm id {} ignored", alarm_id);
        }
        Ok(())
    }

    pub async fn latest_reading(&self, bin_id: &str) -> Result<Option<Reading>> {
        let reading = sqlx::query_as::<_, Reading>(
            "SELECT bin_id, fill_level, timestamp FROM bin_readings
             WHERE bin_id = ? ORDER BY timestamp DESC, id DESC LIMIT 1",
        )
        .bind(bin_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(reading)
    }

    pub async fn recent_readings(&self, bin_id: &str, limit: usize) -> Result<Vec<Reading>> {
        let readings = sqlx::query_as::<_, Reading>(
            "SELECT bin_id, fill_level, timestamp FROM bin_readings
             WHERE bin_id = ? ORDER BY timestamp DESC, id DESC LIMIT ?",
        )
        .bind(bin_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(readings)
    }

    pub async fn recent_events(&self, bin_id: &str, limit: usize) -> Result<Vec<BinEvent>> {
        let events = sqlx::query_as::<_, BinEvent>(
            "SELECT bin_id, event_type, details, timestamp FROM bin_events
             WHERE bin_id = ? ORDER BY timestamp DESC, id DESC LIMIT ?",
        )
        .bind(bin_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(events)
    }

    /// Every bin id that has ever reported a reading, sorted.
    pub async fn distinct_bin_ids(&self) -> Result<Vec<String>> {
        let bin_ids: Vec<String> =
            sqlx::query_scalar("SELECT DISTINCT bin_id FROM bin_readings ORDER BY bin_id")
                .fetch_all(&self.pool)
                .await?;
        Ok(bin_ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    use crate::errors::Error;
    use crate::pipeline::Pipeline;
    use crate::topic::Topics;

    #[test]
    fn test_schema_policy_parse() {
        assert_eq!("preserve".parse::<SchemaPolicy>(), Ok(SchemaPolicy::Preserve));
        assert_eq!("reset".parse::<SchemaPolicy>(), Ok(SchemaPolicy::Reset));
        assert!("wipe".parse::<SchemaPolicy>().is_err());
    }

    #[test]
    fn test_latest_reading_picks_newest() {
        tokio_test::block_on(async {
            let store = Store::open_in_memory().await.unwrap();
            let t0 = Utc::now();
            store.record_reading("bin_1", 10.0, t0).await.unwrap();
            store
                .record_reading("bin_1", 20.0, t0 + ChronoDuration::seconds(1))
                .await
                .unwrap();
            store.record_reading("bin_2", 99.0, t0).await.unwrap();

            let latest = store.latest_reading("bin_1").await.unwrap().unwrap();
            assert_eq!(latest.fill_level, 20.0);
            assert!(store.latest_reading("bin_9").await.unwrap().is_none());
        });
    }

    #[test]
    fn test_latest_reading_tie_breaks_on_insertion_order() {
        tokio_test::block_on(async {
            let store = Store::open_in_memory().await.unwrap();
            let ts = Utc::now();
            store.record_reading("bin_1", 10.0, ts).await.unwrap();
            store.record_reading("bin_1", 11.0, ts).await.unwrap();

            let latest = store.latest_reading("bin_1").await.unwrap().unwrap();
            assert_eq!(latest.fill_level, 11.0);
        });
    }

    #[test]
    fn test_recent_readings_newest_first_with_limit() {
        tokio_test::block_on(async {
            let store = Store::open_in_memory().await.unwrap();
            let t0 = Utc::now();
            for i in 0..3 {
                store
                    .record_reading("bin_1", i as f64, t0 + ChronoDuration::seconds(i))
                    .await
                    .unwrap();
            }

            let readings = store.recent_readings("bin_1", 2).await.unwrap();
            assert_eq!(readings.len(), 2);
            assert_eq!(readings[0].fill_level, 2.0);
            assert_eq!(readings[1].fill_level, 1.0);
        });
    }

    #[test]
    fn test_record_event_roundtrip() {
        tokio_test::block_on(async {
            let store = Store::open_in_memory().await.unwrap();
            store
                .record_event("bin_1", EventKind::StatusChange, "🟢 Normal", Utc::now())
                .await
                .unwrap();
            store
                .record_event("bin_1", EventKind::ActuatorState, "OPENING", Utc::now())
                .await
                .unwrap();

            let events = store.recent_events("bin_1", 10).await.unwrap();
            assert_eq!(events.len(), 2);
            assert_eq!(events[0].event_type, EventKind::ActuatorState);
            assert_eq!(events[0].details, "OPENING");
            assert_eq!(events[1].event_type, EventKind::StatusChange);
        });
    }

    #[test]
    fn test_active_alarms_newest_first_without_acknowledged() {
        tokio_test::block_on(async {
            let store = Store::open_in_memory().await.unwrap();
            let t0 = Utc::now();
            let first = store
                .create_alarm("bin_1", AlarmKind::HighFill, "Bin bin_1 is 81.0% full", t0)
                .await
                .unwrap();
            let second = store
                .create_alarm(
                    "bin_2",
                    AlarmKind::ActuatorError,
                    "Bin bin_2 actuator reported an error",
                    t0 + ChronoDuration::seconds(1),
                )
                .await
                .unwrap();
            let third = store
                .create_alarm(
                    "bin_1",
                    AlarmKind::HighFill,
                    "Bin bin_1 is 82.0% full",
                    t0 + ChronoDuration::seconds(2),
                )
                .await
                .unwrap();
            assert!(first < second && second < third);

            store.acknowledge(second).await.unwrap();

            let active = store.list_active_alarms().await.unwrap();
            assert_eq!(active.len(), 2);
            assert_eq!(active[0].id, third);
            assert_eq!(active[1].id, first);
            assert!(active.iter().all(|a| !a.acknowledged));
        });
    }

    #[test]
    fn test_acknowledge_is_idempotent() {
        tokio_test::block_on(async {
            let store = Store::open_in_memory().await.unwrap();
            let id = store
                .create_alarm("bin_1", AlarmKind::HighFill, "Bin bin_1 is 90.0% full", Utc::now())
                .await
                .unwrap();

            store.acknowledge(id).await.unwrap();
            store.acknowledge(id).await.unwrap();
            store.acknowledge(9999).await.unwrap();

            assert!(store.list_active_alarms().await.unwrap().is_empty());
        });
    }

    #[test]
    fn test_failed_alarm_insert_yields_no_notice() {
        tokio_test::block_on(async {
            let store = Store::open_in_memory().await.unwrap();
            let pipeline = Pipeline::new(store.clone(), Topics::new("base"), 80.0);
            sqlx::query("DROP TABLE bin_alarms")
                .execute(&store.pool)
                .await
                .unwrap();

            let err = pipeline
                .handle_message("base/bin_42/fill_level", b"85.3")
                .await
                .unwrap_err();
            assert!(matches!(err, Error::Storage(_)));

            // The reading landed; only the alarm insert failed.
            let reading = store.latest_reading("bin_42").await.unwrap().unwrap();
            assert_eq!(reading.fill_level, 85.3);
        });
    }

    #[test]
    fn test_distinct_bin_ids_sorted() {
        tokio_test::block_on(async {
            let store = Store::open_in_memory().await.unwrap();
            let ts = Utc::now();
            store.record_reading("bin_9", 1.0, ts).await.unwrap();
            store.record_reading("bin_2", 2.0, ts).await.unwrap();
            store.record_reading("bin_9", 3.0, ts).await.unwrap();

            let bins = store.distinct_bin_ids().await.unwrap();
            assert_eq!(bins, vec!["bin_2".to_string(), "bin_9".to_string()]);
        });
    }

    #[test]
    fn test_schema_policies_on_disk() {
        tokio_test::block_on(async {
            let path = std::env::temp_dir()
                .join(format!("smartbin_store_test_{}.db", std::process::id()));
            let path = path.to_str().unwrap().to_string();
            for suffix in ["", "-wal", "-shm"] {
                let _ = std::fs::remove_file(format!("{path}{suffix}"));
            }

            {
                let store = Store::open(&path, SchemaPolicy::Preserve).await.unwrap();
                store
                    .create_alarm("bin_1", AlarmKind::HighFill, "Bin bin_1 is 90.0% full", Utc::now())
                    .await
                    .unwrap();
                store.pool.close().await;
            }

            // A complete schema is never reset, even under the reset policy.
            {
                let store = Store::open(&path, SchemaPolicy::Reset).await.unwrap();
                assert_eq!(store.list_active_alarms().await.unwrap().len(), 1);
                sqlx::query("DROP TABLE bin_events")
                    .execute(&store.pool)
                    .await
                    .unwrap();
                store.pool.close().await;
            }

            // Preserve recreates the dropped table and keeps the alarm row.
            {
                let store = Store::open(&path, SchemaPolicy::Preserve).await.unwrap();
                assert_eq!(store.list_active_alarms().await.unwrap().len(), 1);
                assert!(store.recent_events("bin_1", 10).await.unwrap().is_empty());
                sqlx::query("DROP TABLE bin_events")
                    .execute(&store.pool)
                    .await
                    .unwrap();
                store.pool.close().await;
            }

            // Reset on an incomplete schema starts over.
            {
                let store = Store::open(&path, SchemaPolicy::Reset).await.unwrap();
                assert!(store.list_active_alarms().await.unwrap().is_empty());
                store.pool.close().await;
            }

            for suffix in ["", "-wal", "-shm"] {
                let _ = std::fs::remove_file(format!("{path}{suffix}"));
            }
        });
    }
}
