//! SQL Server access through tiberius.
//!
//! tiberius has no transaction object, so transactions are driven with
//! explicit `BEGIN`/`COMMIT`/`ROLLBACK` batches on the single connection.

use chrono::NaiveDateTime;
use tiberius::{Client, Config, ToSql};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};

use super::{RawHistoryRow, StoreError};

/// A single SQL Server connection.
pub type SqlServerClient = Client<Compat<TcpStream>>;

/// Connect using an ADO.NET style connection string.
pub(crate) async fn connect(connection_string: &str) -> Result<SqlServerClient, StoreError> {
    let config = Config::from_ado_string(connection_string)?;

    let tcp = TcpStream::connect(config.get_addr()).await?;
    tcp.set_nodelay(true)?;

    Ok(Client::connect(config, tcp.compat_write()).await?)
}

/// Run a batch without parameters, draining every result set.
pub(crate) async fn execute(client: &mut SqlServerClient, sql: &str) -> Result<(), StoreError> {
    client.simple_query(sql).await?.into_results().await?;
    Ok(())
}

/// Run a parameterized statement and return the affected row count.
pub(crate) async fn execute_with(
    client: &mut SqlServerClient,
    sql: &str,
    params: &[&dyn ToSql],
) -> Result<u64, StoreError> {
    let result = client.execute(sql, params).await?;
    Ok(result.total())
}

/// Run a query returning a single `BIGINT` and read it.
pub(crate) async fn fetch_count(client: &mut SqlServerClient, sql: &str) -> Result<i64, StoreError> {
    let row = client
        .simple_query(sql)
        .await?
        .into_row()
        .await?
        .ok_or_else(|| StoreError::Decode("count query returned no rows".into()))?;

    let count: Option<i64> = row.try_get(0)?;
    count.ok_or_else(|| StoreError::Decode("count query returned NULL".into()))
}

/// Fetch `(tag, name, timestamp)` rows.
pub(crate) async fn fetch_history(
    client: &mut SqlServerClient,
    sql: &str,
    params: &[&dyn ToSql],
) -> Result<Vec<RawHistoryRow>, StoreError> {
    let rows = client.query(sql, params).await?.into_first_result().await?;

    let mut records = Vec::with_capacity(rows.len());
    for row in rows {
        let tag: &str = row
            .try_get(0)?
            .ok_or_else(|| StoreError::Decode("NULL tag in history table".into()))?;
        let name: &str = row
            .try_get(1)?
            .ok_or_else(|| StoreError::Decode(format!("NULL name for tag {}", tag)))?;
        let applied_at: NaiveDateTime = row
            .try_get(2)?
            .ok_or_else(|| StoreError::Decode(format!("NULL timestamp for tag {}", tag)))?;

        records.push((tag.to_string(), name.to_string(), applied_at.and_utc()));
    }

    Ok(records)
}
