use sea_orm::{ConnectionTrait, DatabaseConnection, DatabaseTransaction, Statement, TransactionTrait};

use super::dialect::to_sea_value;
use super::{DatabaseError, Value};
use crate::config::BackendKind;

/// A transaction on an adapter's primary.
///
/// Dropping it without calling [`Transaction::commit`] rolls back.
#[derive(Debug)]
pub struct Transaction {
    inner: DatabaseTransaction,
    backend: BackendKind,
}

impl Transaction {
    pub(crate) async fn begin(
        connection: &DatabaseConnection,
        backend: BackendKind,
    ) -> Result<Self, DatabaseError> {
        Ok(Self {
            inner: connection.begin().await?,
            backend,
        })
    }

    #[must_use]
    pub const fn backend(&self) -> BackendKind {
        self.backend
    }

    /// Run a parameterised statement, returning the affected row count.
    pub async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64, DatabaseError> {
        let statement = Statement::from_sql_and_values(
            self.backend.db_backend(),
            sql,
            params.iter().map(to_sea_value),
        );
        Ok(self.inner.execute(statement).await?.rows_affected())
    }

    /// Run a statement without preparing it; used for DDL.
    pub async fn execute_unprepared(&self, sql: &str) -> Result<u64, DatabaseError> {
        Ok(self.inner.execute_unprepared(sql).await?.rows_affected())
    }

    pub async fn commit(self) -> Result<(), DatabaseError> {
        Ok(self.inner.commit().await?)
    }

    pub async fn rollback(self) -> Result<(), DatabaseError> {
        Ok(self.inner.rollback().await?)
    }
}
