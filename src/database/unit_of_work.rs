//! Additional mutations applied inside a gateway transaction.
//!
//! A [`UnitOfWork`] is plain data: parameterized SQL statements that the
//! asset store executes in the same transaction as its own writes, after the
//! image and link rows are in place. If any statement fails the whole
//! upsert or delete is rolled back.

use sqlx::SqliteConnection;

use super::Tables;
use crate::errors::{AppError, AppResult};

/// A value bound to a statement placeholder.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
    /// Resolved to the id of the image being upserted or deleted
    ImageId,
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        Self::Real(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

/// One parameterized statement; `{schema}` in `sql` is substituted with
/// the configured schema namespace.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub binds: Vec<SqlValue>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UnitOfWork {
    statements: Vec<Statement>,
}

impl UnitOfWork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a statement and its bind values.
    pub fn statement<S, I>(mut self, sql: S, binds: I) -> Self
    where
        S: Into<String>,
        I: IntoIterator<Item = SqlValue>,
    {
        self.statements.push(Statement {
            sql: sql.into(),
            binds: binds.into_iter().collect(),
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn statements(&self) -> &[Statement] {
        &self.statements
    }

    /// Execute every statement on `conn`, which must be inside the caller's
    /// transaction. Returns the total number of affected rows.
    pub async fn apply(
        &self,
        conn: &mut SqliteConnection,
        tables: &Tables,
        image_id: i64,
    ) -> AppResult<u64> {
        let mut affected = 0;

        for (index, statement) in self.statements.iter().enumerate() {
            let sql = tables.qualify(&statement.sql);
            let mut query = sqlx::query(&sql);
            for value in &statement.binds {
                query = match value {
                    SqlValue::Null => query.bind(Option::<i64>::None),
                    SqlValue::Integer(v) => query.bind(*v),
                    SqlValue::Real(v) => query.bind(*v),
                    SqlValue::Text(v) => query.bind(v.clone()),
                    SqlValue::Blob(v) => query.bind(v.clone()),
                    SqlValue::ImageId => query.bind(image_id),
                };
            }

            let result = query.execute(&mut *conn).await.map_err(|e| {
                AppError::transaction(format!("unit of work statement {index} failed: {e}"))
            })?;
            affected += result.rows_affected();
        }

        Ok(affected)
    }
}
