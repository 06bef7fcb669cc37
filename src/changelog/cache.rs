use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{Connection, OptionalExtension};
use tracing::{debug, info};

use crate::changelog::error::CacheError;
use crate::changelog::types::RawReleaseRow;

/// SQLite store of tokenized changelog rows, one snapshot per repository
pub struct ReleaseCache {
    conn: Mutex<Connection>,
    refresh_interval: i64,
}

impl ReleaseCache {
    pub fn new(db_path: &Path, refresh_interval: i64) -> Result<Self, CacheError> {
        info!("Initializing release cache at {:?}", db_path);

        let conn = Connection::open(db_path)?;

        // Enable WAL mode for better concurrency
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        let cache = Self {
            conn: Mutex::new(conn),
            refresh_interval,
        };

        cache.create_schema()?;
        debug!("Release cache ready");

        Ok(cache)
    }

    /// Acquire database connection lock with proper error handling
    fn lock_conn(&self) -> Result<MutexGuard<'_, Connection>, CacheError> {
        self.conn.lock().map_err(|_| CacheError::LockPoisoned)
    }

    /// Get current timestamp in milliseconds since UNIX epoch
    fn current_timestamp_ms() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    fn create_schema(&self) -> Result<(), CacheError> {
        let conn = self.lock_conn()?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS repositories (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                repository TEXT NOT NULL UNIQUE,
                updated_at INTEGER NOT NULL
            )
            "#,
            [],
        )?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS release_rows (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                repository_id INTEGER NOT NULL,
                position INTEGER NOT NULL,
                release_tag TEXT NOT NULL,
                kubernetes_version TEXT NOT NULL,
                architecture TEXT NOT NULL,
                ami_type TEXT NOT NULL,
                driver_version TEXT NOT NULL,
                release_date TEXT NOT NULL,
                kubelet_version TEXT,
                FOREIGN KEY (repository_id) REFERENCES repositories(id) ON DELETE CASCADE
            )
            "#,
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_release_rows_repository ON release_rows(repository_id, position)",
            [],
        )?;

        Ok(())
    }

    /// Milliseconds timestamp of the last snapshot, if any
    pub fn updated_at(&self, repository: &str) -> Result<Option<i64>, CacheError> {
        let conn = self.lock_conn()?;
        let updated_at = conn
            .query_row(
                "SELECT updated_at FROM repositories WHERE repository = ?1",
                [repository],
                |row| row.get(0),
            )
            .optional()?;
        Ok(updated_at)
    }

    /// True when there is no snapshot or it is older than the refresh interval
    pub fn is_stale(&self, repository: &str) -> Result<bool, CacheError> {
        let stale = match self.updated_at(repository)? {
            Some(updated_at) => Self::current_timestamp_ms() - updated_at >= self.refresh_interval,
            None => true,
        };
        Ok(stale)
    }

    pub fn get_rows(&self, repository: &str) -> Result<Vec<RawReleaseRow>, CacheError> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT r.release_tag, r.kubernetes_version, r.architecture, r.ami_type,
                   r.driver_version, r.release_date, r.kubelet_version
            FROM release_rows r
            JOIN repositories p ON r.repository_id = p.id
            WHERE p.repository = ?1
            ORDER BY r.position
            "#,
        )?;

        let rows = stmt
            .query_map([repository], |row| {
                Ok(RawReleaseRow {
                    release_tag: row.get(0)?,
                    kubernetes_version: row.get(1)?,
                    architecture: row.get(2)?,
                    ami_type: row.get(3)?,
                    driver_version: row.get(4)?,
                    release_date: row.get(5)?,
                    kubelet_version: row.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows)
    }

    /// Replace the snapshot for a repository and stamp it with the current time
    pub fn replace_rows(&self, repository: &str, rows: &[RawReleaseRow]) -> Result<(), CacheError> {
        let mut conn = self.lock_conn()?;
        let tx = conn.transaction()?;
        let now = Self::current_timestamp_ms();

        tx.execute(
            r#"
            INSERT INTO repositories (repository, updated_at)
            VALUES (?1, ?2)
            ON CONFLICT(repository) DO UPDATE SET updated_at = excluded.updated_at
            "#,
            (repository, now),
        )?;

        let repository_id: i64 = tx.query_row(
            "SELECT id FROM repositories WHERE repository = ?1",
            [repository],
            |row| row.get(0),
        )?;

        tx.execute(
            "DELETE FROM release_rows WHERE repository_id = ?1",
            [repository_id],
        )?;

        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO release_rows (
                    repository_id, position, release_tag, kubernetes_version, architecture,
                    ami_type, driver_version, release_date, kubelet_version
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                "#,
            )?;
            for (position, row) in rows.iter().enumerate() {
                stmt.execute(rusqlite::params![
                    repository_id,
                    position as i64,
                    row.release_tag,
                    row.kubernetes_version,
                    row.architecture,
                    row.ami_type,
                    row.driver_version,
                    row.release_date,
                    row.kubelet_version,
                ])?;
            }
        }

        tx.commit()?;
        debug!("Cached {} rows for {}", rows.len(), repository);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn row(tag: &str, driver: &str) -> RawReleaseRow {
        RawReleaseRow {
            release_tag: tag.to_string(),
            kubernetes_version: "1.32".to_string(),
            architecture: "x86_64".to_string(),
            ami_type: "AL2023_x86_64_NVIDIA".to_string(),
            driver_version: driver.to_string(),
            release_date: "2024-11-21".to_string(),
            kubelet_version: Some("1.32.3-eks-473151a".to_string()),
        }
    }

    #[test]
    fn new_cache_is_stale_and_empty() {
        let temp_dir = TempDir::new().unwrap();
        let cache = ReleaseCache::new(&temp_dir.path().join("test.db"), 60_000).unwrap();

        assert!(cache.is_stale("awslabs/amazon-eks-ami").unwrap());
        assert!(cache.get_rows("awslabs/amazon-eks-ami").unwrap().is_empty());
        assert_eq!(cache.updated_at("awslabs/amazon-eks-ami").unwrap(), None);
    }

    #[test]
    fn zero_refresh_interval_is_always_stale() {
        let temp_dir = TempDir::new().unwrap();
        let cache = ReleaseCache::new(&temp_dir.path().join("test.db"), 0).unwrap();

        cache
            .replace_rows("awslabs/amazon-eks-ami", &[row("v1", "570.124.06")])
            .unwrap();

        assert!(cache.is_stale("awslabs/amazon-eks-ami").unwrap());
    }

    #[test]
    fn reopening_database_keeps_rows() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        {
            let cache = ReleaseCache::new(&db_path, 60_000).unwrap();
            cache
                .replace_rows("awslabs/amazon-eks-ami", &[row("v1", "570.124.06")])
                .unwrap();
        }

        let cache = ReleaseCache::new(&db_path, 60_000).unwrap();
        assert_eq!(
            cache.get_rows("awslabs/amazon-eks-ami").unwrap(),
            vec![row("v1", "570.124.06")]
        );
    }

    #[test]
    fn fresh_schema_includes_kubelet_column() {
        let temp_dir = TempDir::new().unwrap();
        let cache = ReleaseCache::new(&temp_dir.path().join("test.db"), 60_000).unwrap();

        let conn = cache.lock_conn().unwrap();
        let user_version: i32 = conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap();
        let has_kubelet: bool = conn
            .query_row(
                "SELECT COUNT(*) FROM pragma_table_info('release_rows') WHERE name = 'kubelet_version'",
                [],
                |row| row.get::<_, i64>(0),
            )
            .map(|count| count == 1)
            .unwrap();

        assert_eq!(user_version, 0);
        assert!(has_kubelet);
    }
}
