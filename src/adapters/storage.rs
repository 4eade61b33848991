use crate::domain::model::{Category, DomainEntry, MergeReport, ThreatDomain};
use crate::domain::ports::ThreatStore;
use crate::utils::error::{IntelError, Result};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS threat_domains (
    domain   TEXT PRIMARY KEY NOT NULL,
    category TEXT NOT NULL,
    severity INTEGER NOT NULL,
    added_at INTEGER NOT NULL,
    source   TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_threat_domains_source ON threat_domains(source);
";

const INSERT_IF_ABSENT: &str = "INSERT OR IGNORE INTO threat_domains \
     (domain, category, severity, added_at, source) VALUES (?1, ?2, ?3, ?4, ?5)";

/// Rows inserted between cancellation checks inside a merge.
const CANCEL_CHECK_INTERVAL: usize = 512;

/// SQLite-backed threat database. The filter process reads the same file, so
/// the connection runs in WAL mode and only takes the write lock for a merge.
pub struct SqliteThreatStore {
    conn: Mutex<Connection>,
}

impl SqliteThreatStore {
    pub fn open(path: impl AsRef<Path>, busy_timeout: Duration) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(busy_timeout)?;
        let mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        tracing::debug!("Opened threat store at {} (journal_mode={})", path.display(), mode);

        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    // A panic mid-merge drops the transaction, which rolls it back, so the
    // connection behind a poisoned lock is still consistent.
    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get(&self, domain: &str) -> Result<Option<ThreatDomain>> {
        let conn = self.lock();
        let row = conn
            .query_row(
                "SELECT domain, category, severity, added_at, source \
                 FROM threat_domains WHERE domain = ?1",
                params![domain],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()?;

        row.map(|(domain, category, severity, added_at, source)| {
            Ok(ThreatDomain {
                domain,
                category: category.parse::<Category>()?,
                severity,
                added_at,
                source,
            })
        })
        .transpose()
    }

    pub fn count_by_source(&self) -> Result<Vec<(String, u64)>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT source, COUNT(*) FROM threat_domains GROUP BY source ORDER BY source",
        )?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Run arbitrary SQL against the store. Used by tooling and tests.
    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        self.lock().execute_batch(sql)?;
        Ok(())
    }
}

impl ThreatStore for SqliteThreatStore {
    fn merge(
        &self,
        entries: &[DomainEntry],
        added_at: i64,
        cancel: &CancellationToken,
    ) -> Result<MergeReport> {
        let mut conn = self.lock();

        // IMMEDIATE takes the write lock up front; WAL readers are not blocked.
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut added = 0;
        {
            let mut stmt = tx.prepare_cached(INSERT_IF_ABSENT)?;
            for (i, entry) in entries.iter().enumerate() {
                if i % CANCEL_CHECK_INTERVAL == 0 && cancel.is_cancelled() {
                    tracing::warn!("Merge cancelled after {} of {} rows, rolling back", i, entries.len());
                    return Err(IntelError::Cancelled);
                }
                added += stmt.execute(params![
                    entry.domain,
                    entry.category.as_str(),
                    entry.severity,
                    added_at,
                    entry.source,
                ])?;
            }
        }

        if cancel.is_cancelled() {
            tracing::warn!("Merge cancelled before commit, rolling back");
            return Err(IntelError::Cancelled);
        }
        tx.commit()?;

        Ok(MergeReport {
            offered: entries.len(),
            added,
        })
    }

    fn count(&self) -> Result<u64> {
        let count: i64 = self
            .lock()
            .query_row("SELECT COUNT(*) FROM threat_domains", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::functions::FunctionFlags;
    use std::panic::AssertUnwindSafe;
    use tempfile::TempDir;

    fn entry(domain: &str, source: &str) -> DomainEntry {
        DomainEntry {
            domain: domain.to_string(),
            category: Category::Tracker,
            severity: 1,
            source: source.to_string(),
        }
    }

    fn batch(domains: &[&str], source: &str) -> Vec<DomainEntry> {
        domains.iter().map(|d| entry(d, source)).collect()
    }

    #[test]
    fn test_merge_is_idempotent() {
        let store = SqliteThreatStore::open_in_memory().unwrap();
        let entries = batch(&["a.example.com", "b.example.com"], "list-a");
        let cancel = CancellationToken::new();

        let first = store.merge(&entries, 100, &cancel).unwrap();
        let second = store.merge(&entries, 200, &cancel).unwrap();

        assert_eq!(first.added, 2);
        assert_eq!(second.added, 0);
        assert_eq!(second.skipped(), 2);
        assert_eq!(store.count().unwrap(), 2);
    }

    #[test]
    fn test_first_merge_keeps_provenance() {
        let store = SqliteThreatStore::open_in_memory().unwrap();
        let cancel = CancellationToken::new();

        store.merge(&batch(&["a.example.com"], "list-a"), 100, &cancel).unwrap();
        let mut later = entry("a.example.com", "list-b");
        later.category = Category::Malware;
        later.severity = 9;
        store.merge(&[later], 500, &cancel).unwrap();

        let row = store.get("a.example.com").unwrap().unwrap();
        assert_eq!(row.source, "list-a");
        assert_eq!(row.added_at, 100);
        assert_eq!(row.category, Category::Tracker);
        assert_eq!(row.severity, 1);
    }

    #[test]
    fn test_duplicates_within_batch_count_once() {
        let store = SqliteThreatStore::open_in_memory().unwrap();
        let entries = batch(&["a.example.com", "a.example.com", "b.example.com"], "list-a");

        let report = store.merge(&entries, 1, &CancellationToken::new()).unwrap();

        assert_eq!(report.offered, 3);
        assert_eq!(report.added, 2);
        assert_eq!(store.count().unwrap(), 2);
    }

    #[test]
    fn test_storage_fault_rolls_back_whole_batch() {
        let store = SqliteThreatStore::open_in_memory().unwrap();
        let cancel = CancellationToken::new();
        store.merge(&batch(&["existing.example.com"], "list-a"), 1, &cancel).unwrap();

        store
            .execute_batch(
                "CREATE TRIGGER inject_fault BEFORE INSERT ON threat_domains \
                 WHEN NEW.domain = 'poison.example.com' \
                 BEGIN SELECT RAISE(ABORT, 'injected fault'); END;",
            )
            .unwrap();

        let entries = batch(
            &["new-1.example.com", "new-2.example.com", "poison.example.com", "new-3.example.com"],
            "list-a",
        );
        let result = store.merge(&entries, 2, &cancel);

        assert!(matches!(result, Err(IntelError::StorageError(_))));
        assert_eq!(store.count().unwrap(), 1);
        assert!(store.get("new-1.example.com").unwrap().is_none());
        assert!(store.get("existing.example.com").unwrap().is_some());
    }

    #[test]
    fn test_cancelled_merge_commits_nothing() {
        let store = SqliteThreatStore::open_in_memory().unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = store.merge(&batch(&["a.example.com"], "list-a"), 1, &cancel);

        assert!(matches!(result, Err(IntelError::Cancelled)));
        assert_eq!(store.count().unwrap(), 0);
    }

    fn numbered(count: usize) -> Vec<DomainEntry> {
        (0..count)
            .map(|i| entry(&format!("row-{:04}.example.com", i), "list-a"))
            .collect()
    }

    /// Cancels `token` from inside SQLite once `domain` has been inserted.
    fn cancel_after_insert_of(store: &SqliteThreatStore, domain: &str, token: &CancellationToken) {
        let token = AssertUnwindSafe(token.clone());
        store
            .lock()
            .create_scalar_function("cancel_merge", 0, FunctionFlags::SQLITE_UTF8, move |_ctx| {
                token.cancel();
                Ok(1i64)
            })
            .unwrap();
        store
            .execute_batch(&format!(
                "CREATE TRIGGER cancel_mid_merge AFTER INSERT ON threat_domains \
                 WHEN NEW.domain = '{}' BEGIN SELECT cancel_merge(); END;",
                domain
            ))
            .unwrap();
    }

    #[test]
    fn test_cancel_between_inserts_rolls_back_inserted_rows() {
        let store = SqliteThreatStore::open_in_memory().unwrap();
        let cancel = CancellationToken::new();
        cancel_after_insert_of(&store, "row-0100.example.com", &cancel);

        let entries = numbered(CANCEL_CHECK_INTERVAL * 2 + 100);
        let result = store.merge(&entries, 1, &cancel);

        assert!(matches!(result, Err(IntelError::Cancelled)));
        assert!(cancel.is_cancelled());
        assert_eq!(store.count().unwrap(), 0);
        assert!(store.get("row-0000.example.com").unwrap().is_none());
    }

    #[test]
    fn test_cancel_after_last_insert_skips_commit() {
        let store = SqliteThreatStore::open_in_memory().unwrap();
        let cancel = CancellationToken::new();
        // past the last periodic check, so only the pre-commit check can see it
        let entries = numbered(CANCEL_CHECK_INTERVAL + 50);
        cancel_after_insert_of(&store, &entries[entries.len() - 1].domain, &cancel);

        let result = store.merge(&entries, 1, &cancel);

        assert!(matches!(result, Err(IntelError::Cancelled)));
        assert_eq!(store.count().unwrap(), 0);

        // the store stays usable once the rolled-back transaction is gone
        let report = store
            .merge(&numbered(3), 2, &CancellationToken::new())
            .unwrap();
        assert_eq!(report.added, 3);
    }

    #[test]
    fn test_reader_sees_snapshot_until_commit() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("intel").join("threat_intel.db");
        let store = SqliteThreatStore::open(&path, Duration::from_secs(5)).unwrap();
        let cancel = CancellationToken::new();
        store.merge(&batch(&["a.example.com"], "list-a"), 1, &cancel).unwrap();

        let reader = Connection::open(&path).unwrap();
        reader.execute_batch("BEGIN").unwrap();
        let before: i64 = reader
            .query_row("SELECT COUNT(*) FROM threat_domains", [], |row| row.get(0))
            .unwrap();

        // The writer commits while the reader still holds its snapshot.
        let report = store
            .merge(&batch(&["b.example.com", "c.example.com"], "list-a"), 2, &cancel)
            .unwrap();
        assert_eq!(report.added, 2);

        let during: i64 = reader
            .query_row("SELECT COUNT(*) FROM threat_domains", [], |row| row.get(0))
            .unwrap();
        reader.execute_batch("COMMIT").unwrap();
        let after: i64 = reader
            .query_row("SELECT COUNT(*) FROM threat_domains", [], |row| row.get(0))
            .unwrap();

        assert_eq!(before, 1);
        assert_eq!(during, 1);
        assert_eq!(after, 3);
    }

    #[test]
    fn test_count_by_source() {
        let store = SqliteThreatStore::open_in_memory().unwrap();
        let cancel = CancellationToken::new();
        store.merge(&batch(&["a.example.com", "b.example.com"], "list-a"), 1, &cancel).unwrap();
        store.merge(&batch(&["c.example.com"], "list-b"), 1, &cancel).unwrap();

        assert_eq!(
            store.count_by_source().unwrap(),
            vec![("list-a".to_string(), 2), ("list-b".to_string(), 1)]
        );
    }
}
