//! SQLite-backed message store.

use super::{
    FailOutcome, FailurePolicy, MessageStatus, MessageStore, NewMessage, RetryingStore, StoreId,
    StoreStats, StoredMessage,
};
use crate::config::StoreConfig;
use crate::errors::StoreError;
use crate::utils::{from_millis, now_utc, to_millis};
use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::types::{Type, Value};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row, TransactionBehavior};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS stored_messages (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    queue           TEXT    NOT NULL,
    payload         BLOB    NOT NULL,
    arrival_ms      INTEGER NOT NULL,
    attempts        INTEGER NOT NULL DEFAULT 0,
    status          TEXT    NOT NULL,
    available_at_ms INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_stored_messages_lockable
    ON stored_messages (status, available_at_ms, id);
";

const COLUMNS: &str = "id, queue, payload, arrival_ms, attempts, status, available_at_ms";

/// A SQL statement with positional parameters.
#[derive(Debug, Clone, PartialEq)]
struct SqlStatement {
    text: String,
    params: Vec<Value>,
}

impl SqlStatement {
    /// Selects the oldest lockable messages.
    fn lockable(queue: Option<&str>, now_ms: i64, limit: usize) -> Self {
        let mut text = format!(
            "SELECT {COLUMNS} FROM stored_messages WHERE status = ?1 AND available_at_ms <= ?2"
        );
        let mut params = vec![
            Value::Text(MessageStatus::Queued.as_str().to_string()),
            Value::Integer(now_ms),
        ];
        if let Some(queue) = queue {
            text.push_str(" AND queue = ?3");
            params.push(Value::Text(queue.to_string()));
        }
        text.push_str(&format!(" ORDER BY id LIMIT {}", i64::try_from(limit).unwrap_or(i64::MAX)));
        Self { text, params }
    }
}

fn row_to_message(row: &Row<'_>) -> rusqlite::Result<StoredMessage> {
    let status: String = row.get(5)?;
    let status = MessageStatus::parse(&status).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            5,
            Type::Text,
            format!("unknown message status '{status}'").into(),
        )
    })?;

    Ok(StoredMessage {
        id: row.get(0)?,
        queue: row.get(1)?,
        payload: row.get(2)?,
        arrival: from_millis(row.get(3)?),
        attempts: row.get(4)?,
        status,
        available_at: from_millis(row.get(6)?),
    })
}

/// Returns the attempt count of a message that must be locked.
fn require_locked(conn: &Connection, id: StoreId, action: &'static str) -> Result<u32, StoreError> {
    let row: Option<(String, u32)> = conn
        .query_row(
            "SELECT status, attempts FROM stored_messages WHERE id = ?1",
            [id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    match row {
        None => Err(StoreError::NotFound(id)),
        Some((status, attempts)) if status == MessageStatus::Locked.as_str() => Ok(attempts),
        Some((status, _)) => Err(StoreError::InvalidTransition { id, status, action }),
    }
}

/// Durable message store over a single SQLite connection.
///
/// Locking runs inside an immediate transaction, so concurrent lockers are
/// serialized by SQLite itself as well as by the connection mutex. Blocking
/// database work runs on tokio's blocking pool.
#[derive(Debug, Clone)]
pub struct SqliteMessageStore {
    conn: Arc<Mutex<Connection>>,
    policy: FailurePolicy,
    location: String,
}

impl SqliteMessageStore {
    /// Opens or creates a database file.
    ///
    /// Messages left `locked` by a previous process are returned to the
    /// queue.
    pub fn open(path: impl AsRef<Path>, config: &StoreConfig) -> Result<Self, StoreError> {
        let path = path.as_ref();
        info!(path = %path.display(), "Opening message store");

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Io(format!("failed to create directory: {e}")))?;
        }
        let conn = Connection::open(path)?;
        Self::initialize(conn, config, path.display().to_string(), true)
    }

    /// Opens a database file wrapped in the configured `io_retry` policy.
    pub fn open_with_retry(
        path: impl AsRef<Path>,
        config: &StoreConfig,
    ) -> Result<RetryingStore<Self>, StoreError> {
        Ok(RetryingStore::from_config(Self::open(path, config)?, config))
    }

    /// Creates a private in-memory database.
    pub fn in_memory(config: &StoreConfig) -> Result<Self, StoreError> {
        Self::initialize(Connection::open_in_memory()?, config, ":memory:".to_string(), false)
    }

    fn initialize(
        conn: Connection,
        config: &StoreConfig,
        location: String,
        wal: bool,
    ) -> Result<Self, StoreError> {
        if wal {
            conn.execute_batch("PRAGMA journal_mode = WAL;")?;
            conn.execute_batch("PRAGMA synchronous = NORMAL;")?;
        }
        conn.execute_batch("PRAGMA busy_timeout = 5000;")?;
        conn.execute_batch(SCHEMA)?;

        let released = conn.execute(
            "UPDATE stored_messages SET status = ?1 WHERE status = ?2",
            params![MessageStatus::Queued.as_str(), MessageStatus::Locked.as_str()],
        )?;
        if released > 0 {
            info!(released, "Released stale message locks");
        }
        debug!(location = %location, "Message store initialized");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            policy: FailurePolicy::from(config),
            location,
        })
    }

    /// Database location, or `:memory:`.
    #[must_use]
    pub fn location(&self) -> &str {
        &self.location
    }

    async fn with_connection<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Connection, &FailurePolicy) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        let policy = self.policy.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock();
            f(&mut conn, &policy)
        })
        .await
        .map_err(|e| StoreError::Backend(format!("store task failed: {e}")))?
    }
}

#[async_trait]
impl MessageStore for SqliteMessageStore {
    async fn persist(&self, message: NewMessage) -> Result<StoreId, StoreError> {
        self.with_connection(move |conn, _| {
            let now = to_millis(now_utc());
            conn.execute(
                "INSERT INTO stored_messages (queue, payload, arrival_ms, attempts, status, available_at_ms)
                 VALUES (?1, ?2, ?3, 0, ?4, ?3)",
                params![message.queue, message.payload, now, MessageStatus::Queued.as_str()],
            )?;
            let id = conn.last_insert_rowid();
            debug!(id, "Message persisted");
            Ok(id)
        })
        .await
    }

    async fn lock_queue(
        &self,
        queue: Option<&str>,
        n: usize,
    ) -> Result<Vec<StoredMessage>, StoreError> {
        if n == 0 {
            return Ok(Vec::new());
        }
        let statement = SqlStatement::lockable(queue, to_millis(now_utc()), n);

        self.with_connection(move |conn, _| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let mut batch = {
                let mut select = tx.prepare(&statement.text)?;
                let rows = select.query_map(params_from_iter(statement.params.iter()), row_to_message)?;
                rows.collect::<Result<Vec<_>, _>>()?
            };
            {
                let mut update = tx.prepare("UPDATE stored_messages SET status = ?1 WHERE id = ?2")?;
                for message in &mut batch {
                    update.execute(params![MessageStatus::Locked.as_str(), message.id])?;
                    message.status = MessageStatus::Locked;
                }
            }
            tx.commit()?;
            Ok(batch)
        })
        .await
    }

    async fn acknowledge(&self, id: StoreId) -> Result<(), StoreError> {
        self.with_connection(move |conn, _| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            require_locked(&tx, id, "acknowledged")?;
            tx.execute(
                "UPDATE stored_messages SET status = ?1 WHERE id = ?2",
                params![MessageStatus::Delivered.as_str(), id],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn fail(&self, id: StoreId) -> Result<FailOutcome, StoreError> {
        self.with_connection(move |conn, policy| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let attempts = require_locked(&tx, id, "failed")?;
            let outcome = policy.on_failure(attempts, now_utc());
            match outcome {
                FailOutcome::Requeued {
                    attempts,
                    available_at,
                } => {
                    tx.execute(
                        "UPDATE stored_messages SET status = ?1, attempts = ?2, available_at_ms = ?3 WHERE id = ?4",
                        params![MessageStatus::Queued.as_str(), attempts, to_millis(available_at), id],
                    )?;
                }
                FailOutcome::DeadLettered { attempts } => {
                    tx.execute(
                        "UPDATE stored_messages SET status = ?1, attempts = ?2 WHERE id = ?3",
                        params![MessageStatus::Dead.as_str(), attempts, id],
                    )?;
                }
            }
            tx.commit()?;
            Ok(outcome)
        })
        .await
    }

    async fn get(&self, id: StoreId) -> Result<Option<StoredMessage>, StoreError> {
        self.with_connection(move |conn, _| {
            let sql = format!("SELECT {COLUMNS} FROM stored_messages WHERE id = ?1");
            Ok(conn.query_row(&sql, [id], row_to_message).optional()?)
        })
        .await
    }

    async fn stats(&self) -> Result<StoreStats, StoreError> {
        self.with_connection(|conn, _| {
            let mut stmt =
                conn.prepare("SELECT status, COUNT(*) FROM stored_messages GROUP BY status")?;
            let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;

            let mut stats = StoreStats::default();
            for row in rows {
                let (status, count) = row?;
                let count = usize::try_from(count).unwrap_or_default();
                match MessageStatus::parse(&status) {
                    Some(MessageStatus::Queued) => stats.queued += count,
                    Some(MessageStatus::Locked) => stats.locked += count,
                    Some(MessageStatus::Delivered) => stats.delivered += count,
                    Some(MessageStatus::Dead) => stats.dead += count,
                    None => {
                        return Err(StoreError::Serialization(format!(
                            "unknown message status '{status}'"
                        )))
                    }
                }
            }
            Ok(stats)
        })
        .await
    }

    async fn purge_delivered(&self) -> Result<usize, StoreError> {
        self.with_connection(|conn, _| {
            Ok(conn.execute(
                "DELETE FROM stored_messages WHERE status = ?1",
                [MessageStatus::Delivered.as_str()],
            )?)
        })
        .await
    }
}
