use crate::model::{Category, Slot, Subscriber, UserLogEntry};
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Authoritative per-chat delivery history plus the `Subscriber` table it
/// shares a storage engine with. Backed by SQLite in WAL
/// mode; the synchronous driver is driven from async call sites via
/// `spawn_blocking`.
#[derive(Clone)]
pub struct DedupStore {
    conn: Arc<Mutex<Connection>>,
}

impl DedupStore {
    pub async fn open(path: &Path) -> Result<Self> {
        let path = path.to_path_buf();
        let conn = tokio::task::spawn_blocking(move || -> Result<Connection> {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)
                        .with_context(|| format!("create data dir {}", parent.display()))?;
                }
            }
            let conn = Connection::open(&path)
                .with_context(|| format!("open sqlite db {}", path.display()))?;
            conn.pragma_update(None, "journal_mode", "WAL")?;
            conn.execute_batch(SCHEMA)?;
            Ok(conn)
        })
        .await??;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().expect("dedup store mutex poisoned");
            f(&guard)
        })
        .await?
    }

    pub async fn has_seen(&self, chat_id: i64, fingerprint: &str) -> Result<bool> {
        let fingerprint = fingerprint.to_string();
        self.with_conn(move |conn| {
            let exists: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM delivery_log WHERE chat_id = ?1 AND fingerprint = ?2",
                    params![chat_id, fingerprint],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(exists.is_some())
        })
        .await
    }

    /// Idempotent on `(chat_id, fingerprint)`.
    pub async fn mark_sent(
        &self,
        chat_id: i64,
        fingerprint: &str,
        category: Category,
        when: DateTime<Utc>,
    ) -> Result<()> {
        let fingerprint = fingerprint.to_string();
        let category = format!("{category:?}");
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO delivery_log (chat_id, fingerprint, category, sent_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(chat_id, fingerprint) DO NOTHING",
                params![chat_id, fingerprint, category, when.to_rfc3339()],
            )?;
            Ok(())
        })
        .await
    }

    /// Deletes delivery-log rows older than `age`; default retention is 7 days.
    pub async fn purge_older_than(&self, age: chrono::Duration) -> Result<usize> {
        let cutoff = (Utc::now() - age).to_rfc3339();
        self.with_conn(move |conn| {
            let n = conn.execute("DELETE FROM delivery_log WHERE sent_at < ?1", params![cutoff])?;
            Ok(n)
        })
        .await
    }

    pub async fn upsert_subscriber(&self, chat_id: i64, timezone: &str) -> Result<()> {
        let timezone = timezone.to_string();
        let now = Utc::now().to_rfc3339();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO subscribers (chat_id, timezone, active, created_at)
                 VALUES (?1, ?2, 1, ?3)
                 ON CONFLICT(chat_id) DO UPDATE SET timezone = excluded.timezone, active = 1",
                params![chat_id, timezone, now],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn set_active(&self, chat_id: i64, active: bool) -> Result<()> {
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE subscribers SET active = ?2 WHERE chat_id = ?1",
                params![chat_id, active as i64],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn set_last_slot_sent(&self, chat_id: i64, slot: Slot, date: NaiveDate) -> Result<()> {
        let column = slot.column();
        let date = date.to_string();
        let sql = format!("UPDATE subscribers SET {column} = ?2 WHERE chat_id = ?1");
        self.with_conn(move |conn| {
            conn.execute(&sql, params![chat_id, date])?;
            Ok(())
        })
        .await
    }

    pub async fn get_active_subscribers(&self) -> Result<Vec<Subscriber>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT chat_id, timezone, active, created_at,
                        last_slot_sent_morning, last_slot_sent_noon,
                        last_slot_sent_evening, last_slot_sent_night
                 FROM subscribers WHERE active = 1",
            )?;
            let rows = stmt.query_map([], |row| {
                let created_raw: String = row.get(3)?;
                let parse_date = |idx: usize| -> rusqlite::Result<Option<NaiveDate>> {
                    let raw: Option<String> = row.get(idx)?;
                    Ok(raw.and_then(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").ok()))
                };
                Ok(Subscriber {
                    chat_id: row.get(0)?,
                    timezone: row.get(1)?,
                    active: row.get::<_, i64>(2)? != 0,
                    created_at: DateTime::parse_from_rfc3339(&created_raw)
                        .map(|d| d.with_timezone(&Utc))
                        .unwrap_or_else(|_| Utc::now()),
                    last_slot_sent: [parse_date(4)?, parse_date(5)?, parse_date(6)?, parse_date(7)?],
                })
            })?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })
        .await
    }

    pub async fn append_user_log(&self, entry: UserLogEntry) -> Result<()> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO user_logs (user_id, username, first_name, interaction_time, message_type, location)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    entry.user_id,
                    entry.username,
                    entry.first_name,
                    entry.interaction_time.to_rfc3339(),
                    entry.message_type,
                    entry.location,
                ],
            )?;
            Ok(())
        })
        .await
    }
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS subscribers (
    chat_id INTEGER PRIMARY KEY,
    timezone TEXT NOT NULL,
    active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL,
    last_slot_sent_morning TEXT,
    last_slot_sent_noon TEXT,
    last_slot_sent_evening TEXT,
    last_slot_sent_night TEXT
);

CREATE TABLE IF NOT EXISTS delivery_log (
    chat_id INTEGER NOT NULL,
    fingerprint TEXT NOT NULL,
    category TEXT NOT NULL,
    sent_at TEXT NOT NULL,
    PRIMARY KEY (chat_id, fingerprint)
);
CREATE INDEX IF NOT EXISTS idx_delivery_log_sent_at ON delivery_log (sent_at);

CREATE TABLE IF NOT EXISTS user_logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL,
    username TEXT,
    first_name TEXT,
    interaction_time TEXT NOT NULL,
    message_type TEXT NOT NULL,
    location TEXT
);
";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Category;

    #[tokio::test]
    async fn mark_sent_is_idempotent() {
        let store = DedupStore::open_in_memory().unwrap();
        let now = Utc::now();
        store.mark_sent(1, "fp1", Category::Local, now).await.unwrap();
        store.mark_sent(1, "fp1", Category::Local, now).await.unwrap();
        assert!(store.has_seen(1, "fp1").await.unwrap());
    }

    #[tokio::test]
    async fn has_seen_is_scoped_per_chat() {
        let store = DedupStore::open_in_memory().unwrap();
        store.mark_sent(1, "fp1", Category::Local, Utc::now()).await.unwrap();
        assert!(!store.has_seen(2, "fp1").await.unwrap());
    }

    #[tokio::test]
    async fn purge_removes_only_old_rows() {
        let store = DedupStore::open_in_memory().unwrap();
        let old = Utc::now() - chrono::Duration::days(10);
        let recent = Utc::now();
        store.mark_sent(1, "old-fp", Category::Local, old).await.unwrap();
        store.mark_sent(1, "new-fp", Category::Local, recent).await.unwrap();

        let purged = store.purge_older_than(chrono::Duration::days(7)).await.unwrap();
        assert_eq!(purged, 1);
        assert!(!store.has_seen(1, "old-fp").await.unwrap());
        assert!(store.has_seen(1, "new-fp").await.unwrap());
    }

    #[tokio::test]
    async fn subscriber_roundtrip_and_slot_tracking() {
        let store = DedupStore::open_in_memory().unwrap();
        store.upsert_subscriber(42, "Asia/Dhaka").await.unwrap();
        let subs = store.get_active_subscribers().await.unwrap();
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].timezone, "Asia/Dhaka");
        assert!(subs[0].last_sent(Slot::Morning).is_none());

        let today = Utc::now().date_naive();
        store.set_last_slot_sent(42, Slot::Morning, today).await.unwrap();
        let subs = store.get_active_subscribers().await.unwrap();
        assert_eq!(subs[0].last_sent(Slot::Morning), Some(today));
    }

    #[tokio::test]
    async fn deactivated_subscriber_is_excluded() {
        let store = DedupStore::open_in_memory().unwrap();
        store.upsert_subscriber(7, "UTC").await.unwrap();
        store.set_active(7, false).await.unwrap();
        assert!(store.get_active_subscribers().await.unwrap().is_empty());
    }
}
