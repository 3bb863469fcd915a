use crate::errors::{EngineError, Result};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite-backed repository for every persisted engine record.
///
/// Cloning shares the connection. Separate `Store::open` calls on the same
/// file get separate connections and rely on SQLite locking instead.
#[derive(Clone)]
pub struct Store {
    pub(crate) conn: Arc<Mutex<Connection>>,
}

pub struct StoreStats {
    pub queue_items: Option<u64>,
    pub baselines: Option<u64>,
    pub regressions: Option<u64>,
    pub defects: Option<u64>,
    pub pending_overrides: Option<u64>,
    pub version: Option<String>,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn init_schema(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(crate::storage::schema::DDL)?;
        conn.pragma_update(None, "user_version", crate::storage::schema::SCHEMA_VERSION)?;
        Ok(())
    }

    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| EngineError::LockPoisoned)
    }

    /// Runs `f` inside a `BEGIN IMMEDIATE` transaction: the write lock is taken
    /// before the first read, so read-then-write sequences cannot interleave
    /// with another connection. Any error rolls the whole unit back.
    pub(crate) fn write_tx<T>(
        &self,
        f: impl FnOnce(&Transaction<'_>) -> Result<T>,
    ) -> Result<T> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }

    pub fn count_rows(&self, table: &str) -> Result<i64> {
        if ![
            "validation_results",
            "queue_items",
            "human_validations",
            "override_outbox",
            "baselines",
            "baseline_history",
            "script_results",
            "regressions",
            "defects",
            "defect_patterns",
        ]
        .contains(&table)
        {
            return Err(EngineError::not_found("table", table));
        }
        let conn = self.lock()?;
        let sql = format!("SELECT COUNT(*) FROM {}", table);
        let n: i64 = conn.query_row(&sql, [], |r| r.get(0))?;
        Ok(n)
    }

    pub fn stats_best_effort(&self) -> Result<StoreStats> {
        let conn = self.lock()?;
        let count = |sql: &str| -> Option<u64> {
            conn.query_row(sql, [], |r| r.get::<_, i64>(0).map(|x| x as u64))
                .ok()
        };

        Ok(StoreStats {
            queue_items: count("SELECT COUNT(*) FROM queue_items"),
            baselines: count("SELECT COUNT(*) FROM baselines"),
            regressions: count("SELECT COUNT(*) FROM regressions"),
            defects: count("SELECT COUNT(*) FROM defects"),
            pending_overrides: count(
                "SELECT COUNT(*) FROM override_outbox WHERE delivered_at IS NULL",
            ),
            version: conn
                .query_row("PRAGMA user_version", [], |r| r.get::<_, i64>(0))
                .ok()
                .map(|v| v.to_string()),
        })
    }
}

/// Microsecond RFC 3339 in UTC; fixed width, so lexical order is time order.
pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

pub fn new_id(prefix: &str) -> String {
    format!("{}_{}", prefix, uuid::Uuid::new_v4().simple())
}
