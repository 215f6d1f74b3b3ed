//! History store: one connection to the target database.
//!
//! The store owns the history table and hands out transactions for running
//! migration operations. Each dialect is one variant of a closed set picked
//! when the store is opened.

mod sqlserver;

pub use sqlserver::SqlServerClient;

use std::str::FromStr;

use chrono::{DateTime, Utc};
use semver::Version;
use sqlx::mysql::MySqlConnection;
use sqlx::postgres::PgConnection;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection};
use sqlx::{Connection, MySql, Postgres, Row, Sqlite};
use thiserror::Error;
use tracing::debug;

use shipyard_core::config::DatabaseConfig;
use shipyard_core::dialect::Dialect;
use shipyard_core::error::{Result, ShipyardError};
use shipyard_core::migration::{sort_history, HistoryEntry};

/// Driver-level failure, before it is given migration context.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error(transparent)]
    Sql(#[from] sqlx::Error),

    #[error(transparent)]
    SqlServer(#[from] tiberius::error::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Decode(String),

    #[error("timed out after {0}s")]
    Timeout(u64),
}

/// `(tag, name, timestamp)` exactly as stored.
pub(crate) type RawHistoryRow = (String, String, DateTime<Utc>);

enum Backend {
    Postgres(PgConnection),
    Mysql(MySqlConnection),
    Sqlite(SqliteConnection),
    Sqlserver(SqlServerClient),
}

/// Connection to the target database plus the history table operations.
pub struct Store {
    dialect: Dialect,
    backend: Backend,
}

impl Store {
    /// Connect and ping. Any failure, including a timeout, is a
    /// connection error.
    pub async fn open(config: &DatabaseConfig) -> Result<Self> {
        let dialect = config.dialect;
        let timeout = config.connect_timeout();

        let attempt = async {
            let mut backend = connect(dialect, &config.url).await?;
            ping(&mut backend).await?;
            Ok::<_, StoreError>(backend)
        };

        let backend = match tokio::time::timeout(timeout, attempt).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(config.connect_timeout_secs)),
        }
        .map_err(|e| ShipyardError::Connection {
            dialect,
            message: e.to_string(),
        })?;

        debug!("Connected to {} database", dialect);
        Ok(Self { dialect, backend })
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Create the history table if it is absent. Safe to call on every run.
    pub async fn ensure_history_table(&mut self) -> Result<()> {
        let sql = self.dialect.create_history_table_sql();
        self.exec(&sql)
            .await
            .map_err(|e| persistence("create", e))?;
        Ok(())
    }

    /// Whether the history table exists, without creating it.
    pub async fn history_table_exists(&mut self) -> Result<bool> {
        let sql = self.dialect.history_table_exists_sql();

        let count = match &mut self.backend {
            Backend::Postgres(conn) => sqlx::query_scalar::<Postgres, i64>(&sql)
                .fetch_one(conn)
                .await
                .map_err(StoreError::from),
            Backend::Mysql(conn) => sqlx::query_scalar::<MySql, i64>(&sql)
                .fetch_one(conn)
                .await
                .map_err(StoreError::from),
            Backend::Sqlite(conn) => sqlx::query_scalar::<Sqlite, i64>(&sql)
                .fetch_one(conn)
                .await
                .map_err(StoreError::from),
            Backend::Sqlserver(client) => sqlserver::fetch_count(client, &sql).await,
        }
        .map_err(|e| persistence("read", e))?;

        Ok(count > 0)
    }

    /// Record a successfully applied migration.
    pub async fn insert_history_entry(&mut self, entry: &HistoryEntry) -> Result<()> {
        let sql = self.dialect.insert_history_sql();
        let tag = entry.tag.to_string();

        let inserted = match &mut self.backend {
            Backend::Postgres(conn) => sqlx::query::<Postgres>(&sql)
                .bind(&tag)
                .bind(&entry.name)
                .bind(entry.applied_at)
                .execute(conn)
                .await
                .map(|r| r.rows_affected())
                .map_err(StoreError::from),
            Backend::Mysql(conn) => sqlx::query::<MySql>(&sql)
                .bind(&tag)
                .bind(&entry.name)
                .bind(entry.applied_at.naive_utc())
                .execute(conn)
                .await
                .map(|r| r.rows_affected())
                .map_err(StoreError::from),
            Backend::Sqlite(conn) => sqlx::query::<Sqlite>(&sql)
                .bind(&tag)
                .bind(&entry.name)
                .bind(entry.applied_at)
                .execute(conn)
                .await
                .map(|r| r.rows_affected())
                .map_err(StoreError::from),
            Backend::Sqlserver(client) => {
                let applied_at = entry.applied_at.naive_utc();
                sqlserver::execute_with(
                    client,
                    &sql,
                    &[&tag.as_str(), &entry.name.as_str(), &applied_at],
                )
                .await
            }
        }
        .map_err(|e| persistence("insert into", e))?;

        if inserted != 1 {
            return Err(ShipyardError::Persistence {
                action: "insert into",
                message: format!("expected 1 row for tag {}, wrote {}", tag, inserted),
            });
        }
        Ok(())
    }

    /// Remove the record of a rolled back migration. A missing row is an
    /// error: the history would otherwise silently disagree with the plan.
    pub async fn delete_history_entry(&mut self, tag: &Version) -> Result<()> {
        let sql = self.dialect.delete_history_sql();
        let tag = tag.to_string();

        let deleted = match &mut self.backend {
            Backend::Postgres(conn) => sqlx::query::<Postgres>(&sql)
                .bind(&tag)
                .execute(conn)
                .await
                .map(|r| r.rows_affected())
                .map_err(StoreError::from),
            Backend::Mysql(conn) => sqlx::query::<MySql>(&sql)
                .bind(&tag)
                .execute(conn)
                .await
                .map(|r| r.rows_affected())
                .map_err(StoreError::from),
            Backend::Sqlite(conn) => sqlx::query::<Sqlite>(&sql)
                .bind(&tag)
                .execute(conn)
                .await
                .map(|r| r.rows_affected())
                .map_err(StoreError::from),
            Backend::Sqlserver(client) => {
                sqlserver::execute_with(client, &sql, &[&tag.as_str()]).await
            }
        }
        .map_err(|e| persistence("delete from", e))?;

        if deleted == 0 {
            return Err(ShipyardError::Persistence {
                action: "delete from",
                message: format!("no history entry for tag {}", tag),
            });
        }
        Ok(())
    }

    /// Every history entry, ascending by parsed version. Stored tags that do
    /// not parse are reported, never skipped.
    pub async fn sorted_history(&mut self) -> Result<Vec<HistoryEntry>> {
        let sql = self.dialect.select_history_sql();
        let rows = self
            .fetch_history(&sql, None)
            .await
            .map_err(|e| persistence("read", e))?;

        let entries = rows
            .into_iter()
            .map(|(tag, name, applied_at)| HistoryEntry::from_row(&tag, name, applied_at))
            .collect::<Result<Vec<_>>>()?;

        Ok(sort_history(entries))
    }

    /// Look up one entry. `None` means the tag has not been applied.
    pub async fn find_history_entry(&mut self, tag: &Version) -> Result<Option<HistoryEntry>> {
        let sql = self.dialect.select_history_entry_sql();
        let tag = tag.to_string();
        let mut rows = self
            .fetch_history(&sql, Some(&tag))
            .await
            .map_err(|e| persistence("read", e))?;

        match rows.pop() {
            Some((tag, name, applied_at)) => Ok(Some(HistoryEntry::from_row(&tag, name, applied_at)?)),
            None => Ok(None),
        }
    }

    /// Start a transaction on the connection.
    pub async fn begin(&mut self) -> std::result::Result<StoreTransaction<'_>, StoreError> {
        Ok(match &mut self.backend {
            Backend::Postgres(conn) => StoreTransaction::Postgres(conn.begin().await?),
            Backend::Mysql(conn) => StoreTransaction::Mysql(conn.begin().await?),
            Backend::Sqlite(conn) => StoreTransaction::Sqlite(conn.begin().await?),
            Backend::Sqlserver(client) => {
                sqlserver::execute(client, "BEGIN TRANSACTION").await?;
                StoreTransaction::Sqlserver(client)
            }
        })
    }

    /// Run a query directly on the connection, outside any transaction.
    pub async fn exec(&mut self, query: &str) -> std::result::Result<(), StoreError> {
        match &mut self.backend {
            Backend::Postgres(conn) => {
                sqlx::raw_sql(query).execute(conn).await?;
            }
            Backend::Mysql(conn) => {
                sqlx::raw_sql(query).execute(conn).await?;
            }
            Backend::Sqlite(conn) => {
                sqlx::raw_sql(query).execute(conn).await?;
            }
            Backend::Sqlserver(client) => sqlserver::execute(client, query).await?,
        }
        Ok(())
    }

    /// Close the connection gracefully.
    pub async fn close(self) -> std::result::Result<(), StoreError> {
        match self.backend {
            Backend::Postgres(conn) => conn.close().await?,
            Backend::Mysql(conn) => conn.close().await?,
            Backend::Sqlite(conn) => conn.close().await?,
            Backend::Sqlserver(client) => client.close().await?,
        }
        debug!("Closed {} database connection", self.dialect);
        Ok(())
    }

    async fn fetch_history(
        &mut self,
        sql: &str,
        tag: Option<&str>,
    ) -> std::result::Result<Vec<RawHistoryRow>, StoreError> {
        match &mut self.backend {
            Backend::Postgres(conn) => {
                let mut query = sqlx::query::<Postgres>(sql);
                if let Some(tag) = tag {
                    query = query.bind(tag);
                }
                query
                    .fetch_all(conn)
                    .await?
                    .iter()
                    .map(|row| {
                        Ok((
                            row.try_get::<String, _>(0)?,
                            row.try_get::<String, _>(1)?,
                            row.try_get::<DateTime<Utc>, _>(2)?,
                        ))
                    })
                    .collect()
            }
            Backend::Mysql(conn) => {
                let mut query = sqlx::query::<MySql>(sql);
                if let Some(tag) = tag {
                    query = query.bind(tag);
                }
                query
                    .fetch_all(conn)
                    .await?
                    .iter()
                    .map(|row| {
                        Ok((
                            row.try_get::<String, _>(0)?,
                            row.try_get::<String, _>(1)?,
                            row.try_get::<chrono::NaiveDateTime, _>(2)?.and_utc(),
                        ))
                    })
                    .collect()
            }
            Backend::Sqlite(conn) => {
                let mut query = sqlx::query::<Sqlite>(sql);
                if let Some(tag) = tag {
                    query = query.bind(tag);
                }
                query
                    .fetch_all(conn)
                    .await?
                    .iter()
                    .map(|row| {
                        Ok((
                            row.try_get::<String, _>(0)?,
                            row.try_get::<String, _>(1)?,
                            row.try_get::<DateTime<Utc>, _>(2)?,
                        ))
                    })
                    .collect()
            }
            Backend::Sqlserver(client) => match tag {
                Some(tag) => sqlserver::fetch_history(client, sql, &[&tag]).await,
                None => sqlserver::fetch_history(client, sql, &[]).await,
            },
        }
    }
}

/// An open transaction on the store's connection.
///
/// Dropping a sqlx transaction rolls it back; callers still end every
/// transaction with [`commit`](Self::commit) or [`rollback`](Self::rollback)
/// so SQL Server behaves the same way.
pub enum StoreTransaction<'c> {
    Postgres(sqlx::Transaction<'c, Postgres>),
    Mysql(sqlx::Transaction<'c, MySql>),
    Sqlite(sqlx::Transaction<'c, Sqlite>),
    Sqlserver(&'c mut SqlServerClient),
}

impl StoreTransaction<'_> {
    /// Run a query inside the transaction.
    pub async fn exec(&mut self, query: &str) -> std::result::Result<(), StoreError> {
        match self {
            Self::Postgres(tx) => {
                sqlx::raw_sql(query).execute(&mut **tx).await?;
            }
            Self::Mysql(tx) => {
                sqlx::raw_sql(query).execute(&mut **tx).await?;
            }
            Self::Sqlite(tx) => {
                sqlx::raw_sql(query).execute(&mut **tx).await?;
            }
            Self::Sqlserver(client) => sqlserver::execute(client, query).await?,
        }
        Ok(())
    }

    pub async fn commit(self) -> std::result::Result<(), StoreError> {
        match self {
            Self::Postgres(tx) => tx.commit().await?,
            Self::Mysql(tx) => tx.commit().await?,
            Self::Sqlite(tx) => tx.commit().await?,
            Self::Sqlserver(client) => sqlserver::execute(client, "COMMIT TRANSACTION").await?,
        }
        Ok(())
    }

    pub async fn rollback(self) -> std::result::Result<(), StoreError> {
        match self {
            Self::Postgres(tx) => tx.rollback().await?,
            Self::Mysql(tx) => tx.rollback().await?,
            Self::Sqlite(tx) => tx.rollback().await?,
            Self::Sqlserver(client) => sqlserver::execute(client, "ROLLBACK TRANSACTION").await?,
        }
        Ok(())
    }
}

async fn connect(dialect: Dialect, url: &str) -> std::result::Result<Backend, StoreError> {
    Ok(match dialect {
        Dialect::Postgres => Backend::Postgres(PgConnection::connect(url).await?),
        Dialect::Mysql => Backend::Mysql(MySqlConnection::connect(url).await?),
        Dialect::Sqlite => {
            let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
            Backend::Sqlite(SqliteConnection::connect_with(&options).await?)
        }
        Dialect::Sqlserver => Backend::Sqlserver(sqlserver::connect(url).await?),
    })
}

async fn ping(backend: &mut Backend) -> std::result::Result<(), StoreError> {
    match backend {
        Backend::Postgres(conn) => conn.ping().await?,
        Backend::Mysql(conn) => conn.ping().await?,
        Backend::Sqlite(conn) => conn.ping().await?,
        Backend::Sqlserver(client) => sqlserver::execute(client, "SELECT 1").await?,
    }
    Ok(())
}

fn persistence(action: &'static str, err: StoreError) -> ShipyardError {
    ShipyardError::Persistence {
        action,
        message: err.to_string(),
    }
}

#[cfg(test)]
impl Store {
    /// In-memory SQLite store for tests.
    pub(crate) async fn in_memory() -> Self {
        Self::open(&DatabaseConfig::new(Dialect::Sqlite, "sqlite::memory:"))
            .await
            .unwrap()
    }

    /// Read a single text column from an arbitrary query (SQLite only).
    pub(crate) async fn fetch_strings(&mut self, sql: &str) -> Vec<String> {
        match &mut self.backend {
            Backend::Sqlite(conn) => sqlx::query_scalar::<Sqlite, String>(sql)
                .fetch_all(conn)
                .await
                .unwrap(),
            _ => panic!("fetch_strings is only available on SQLite"),
        }
    }

    /// Count rows of a table (SQLite only).
    pub(crate) async fn count(&mut self, table: &str) -> i64 {
        match &mut self.backend {
            Backend::Sqlite(conn) => {
                sqlx::query_scalar::<Sqlite, i64>(&format!("SELECT COUNT(*) FROM {}", table))
                    .fetch_one(conn)
                    .await
                    .unwrap()
            }
            _ => panic!("count is only available on SQLite"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shipyard_core::migration::parse_tag;

    fn entry(tag: &str, name: &str) -> HistoryEntry {
        HistoryEntry {
            tag: parse_tag(tag).unwrap(),
            name: name.to_string(),
            applied_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_ensure_history_table_is_idempotent() {
        let mut store = Store::in_memory().await;
        for _ in 0..3 {
            store.ensure_history_table().await.unwrap();
        }
        assert!(store.sorted_history().await.unwrap().is_empty());
        assert_eq!(store.count("shipyard_migrations").await, 0);
    }

    #[tokio::test]
    async fn test_history_table_exists_does_not_create_it() {
        let mut store = Store::in_memory().await;
        assert!(!store.history_table_exists().await.unwrap());
        assert!(!store.history_table_exists().await.unwrap());

        store.ensure_history_table().await.unwrap();
        assert!(store.history_table_exists().await.unwrap());
    }

    #[tokio::test]
    async fn test_insert_and_sorted_history() {
        let mut store = Store::in_memory().await;
        store.ensure_history_table().await.unwrap();

        store.insert_history_entry(&entry("0.10.0", "ten")).await.unwrap();
        store.insert_history_entry(&entry("0.2.0", "two")).await.unwrap();

        let history = store.sorted_history().await.unwrap();
        let tags: Vec<String> = history.iter().map(|e| e.tag.to_string()).collect();
        assert_eq!(tags, vec!["0.2.0", "0.10.0"]);
        assert_eq!(history[1].name, "ten");
    }

    #[tokio::test]
    async fn test_duplicate_insert_is_persistence_error() {
        let mut store = Store::in_memory().await;
        store.ensure_history_table().await.unwrap();
        store.insert_history_entry(&entry("0.0.1", "a")).await.unwrap();

        let err = store
            .insert_history_entry(&entry("0.0.1", "b"))
            .await
            .unwrap_err();
        assert!(matches!(err, ShipyardError::Persistence { .. }));
    }

    #[tokio::test]
    async fn test_delete_history_entry() {
        let mut store = Store::in_memory().await;
        store.ensure_history_table().await.unwrap();
        store.insert_history_entry(&entry("0.0.1", "a")).await.unwrap();

        let tag = parse_tag("0.0.1").unwrap();
        store.delete_history_entry(&tag).await.unwrap();
        assert!(store.sorted_history().await.unwrap().is_empty());

        let err = store.delete_history_entry(&tag).await.unwrap_err();
        assert!(matches!(err, ShipyardError::Persistence { .. }));
    }

    #[tokio::test]
    async fn test_find_history_entry_distinguishes_absent_rows() {
        let mut store = Store::in_memory().await;
        store.ensure_history_table().await.unwrap();
        store.insert_history_entry(&entry("1.0.0", "one")).await.unwrap();

        let found = store
            .find_history_entry(&parse_tag("1.0.0").unwrap())
            .await
            .unwrap();
        assert_eq!(found.map(|e| e.name), Some("one".to_string()));

        let missing = store
            .find_history_entry(&parse_tag("2.0.0").unwrap())
            .await
            .unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_corrupt_tag_is_reported() {
        let mut store = Store::in_memory().await;
        store.ensure_history_table().await.unwrap();
        store
            .exec(
                "INSERT INTO shipyard_migrations (tag, name, timestamp) \
                 VALUES ('latest', 'hand-edited', '2024-01-01T00:00:00+00:00')",
            )
            .await
            .unwrap();

        let err = store.sorted_history().await.unwrap_err();
        match err {
            ShipyardError::CorruptTag { tag, name, .. } => {
                assert_eq!(tag, "latest");
                assert_eq!(name, "hand-edited");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_transaction_rollback_discards_changes() {
        let mut store = Store::in_memory().await;
        store.exec("CREATE TABLE items (id INTEGER)").await.unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.exec("INSERT INTO items VALUES (1)").await.unwrap();
        tx.rollback().await.unwrap();
        assert_eq!(store.count("items").await, 0);

        let mut tx = store.begin().await.unwrap();
        tx.exec("INSERT INTO items VALUES (2)").await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(store.count("items").await, 1);
    }

    #[tokio::test]
    async fn test_open_unreachable_is_connection_error() {
        let config = DatabaseConfig::new(
            Dialect::Sqlite,
            "sqlite:///nonexistent-dir/for/shipyard/test.db",
        );
        let err = Store::open(&config).await.err().unwrap();
        assert!(matches!(
            err,
            ShipyardError::Connection {
                dialect: Dialect::Sqlite,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_close() {
        let store = Store::in_memory().await;
        assert_eq!(store.dialect(), Dialect::Sqlite);
        store.close().await.unwrap();
    }
}
