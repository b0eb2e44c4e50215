//! ABOUTME: SQLite data sessions on a sqlx connection pool
//! ABOUTME: Builds parameterised SQL from entity descriptors, filters, and orderings

use super::{DataContext, DataSession};
use crate::cache_key::key_filter;
use crate::query::{Aggregate, Filter, Query};
use crate::schema::{Entity, EntitySchema, FieldKind, Value};
use async_trait::async_trait;
use mx_config::DatabaseConfig;
use mx_core::{Error, Result};
use sqlx::{
    sqlite::{SqliteArguments, SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow},
    Row, Sqlite, SqlitePool, Transaction,
};
use tracing::{debug, info, instrument};

type SqlQuery<'q> = sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>;

/// Pool-backed session factory
#[derive(Debug, Clone)]
pub struct SqliteContext {
    pool: SqlitePool,
}

impl SqliteContext {
    /// Open (creating if missing) the database described by `config`
    #[instrument(skip(config), fields(path = %config.path))]
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        info!("Initializing database at: {}", config.path);

        let journal_mode = if config.sqlite_wal {
            SqliteJournalMode::Wal
        } else {
            SqliteJournalMode::Delete
        };

        let connect_options = SqliteConnectOptions::new()
            .filename(&config.path)
            .journal_mode(journal_mode)
            .create_if_missing(true)
            .pragma("foreign_keys", "ON")
            .pragma("synchronous", "NORMAL")
            .pragma("busy_timeout", "30000"); // 30 second timeout for lock contention

        let pool = SqlitePoolOptions::new()
            .max_connections(config.pool_size)
            .min_connections(1)
            .connect_with(connect_options)
            .await
            .map_err(|e| Error::Database(format!("Failed to create connection pool: {}", e)))?;

        info!("Database initialized successfully");
        Ok(Self { pool })
    }

    /// Create a context from an existing pool (for testing/reuse)
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| Error::Database(format!("Health check failed: {}", e)))?;

        debug!("Database health check passed");
        Ok(())
    }

    /// Create the table for `E` from its descriptor if it does not exist
    #[instrument(skip(self), fields(table = E::TABLE))]
    pub async fn ensure_table<E: Entity>(&self) -> Result<()> {
        EntitySchema::<E>::validate()?;

        let columns = E::fields()
            .iter()
            .map(|f| format!("\"{}\" {}", f.name, f.kind.sql_type()))
            .collect::<Vec<_>>()
            .join(", ");
        let key = E::PRIMARY_KEY
            .iter()
            .map(|k| format!("\"{}\"", k))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS \"{}\" ({}, PRIMARY KEY ({}))",
            E::TABLE,
            columns,
            key
        );

        sqlx::query(&sql)
            .execute(&self.pool)
            .await
            .map_err(|e| db_error(&format!("create table {}", E::TABLE), e))?;

        debug!("Ensured table {}", E::TABLE);
        Ok(())
    }
}

#[async_trait]
impl DataContext for SqliteContext {
    type Session = SqliteSession;

    async fn begin(&self) -> Result<SqliteSession> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Error::Database(format!("Failed to begin transaction: {}", e)))?;
        Ok(SqliteSession { tx })
    }
}

/// A pooled connection inside an open transaction. sqlx rolls back on drop.
pub struct SqliteSession {
    tx: Transaction<'static, Sqlite>,
}

impl SqliteSession {
    async fn execute(&mut self, sql: &str, args: &[Value], action: &str) -> Result<u64> {
        let result = bind_all(sqlx::query(sql), args)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| db_error(action, e))?;
        Ok(result.rows_affected())
    }

    async fn fetch_rows(&mut self, sql: &str, args: &[Value], action: &str) -> Result<Vec<SqliteRow>> {
        bind_all(sqlx::query(sql), args)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| db_error(action, e))
    }
}

fn column_list<E: Entity>() -> String {
    E::fields()
        .iter()
        .map(|f| format!("\"{}\"", f.name))
        .collect::<Vec<_>>()
        .join(", ")
}

fn bind_all<'q>(mut query: SqlQuery<'q>, args: &[Value]) -> SqlQuery<'q> {
    for value in args {
        query = match value {
            Value::Null => query.bind(None::<String>),
            Value::Bool(v) => query.bind(*v),
            Value::Int(v) => query.bind(*v),
            Value::Real(v) => query.bind(*v),
            Value::Text(v) => query.bind(v.clone()),
        };
    }
    query
}

fn decode(row: &SqliteRow, index: usize, kind: FieldKind) -> Result<Value> {
    let value = match kind {
        FieldKind::Integer => row.try_get::<Option<i64>, _>(index).map(Value::from),
        FieldKind::Real => row.try_get::<Option<f64>, _>(index).map(Value::from),
        FieldKind::Text => row.try_get::<Option<String>, _>(index).map(Value::from),
        FieldKind::Boolean => row.try_get::<Option<bool>, _>(index).map(Value::from),
    };
    value.map_err(|e| Error::Database(format!("Failed to decode column {}: {}", index, e)))
}

fn hydrate<E: Entity>(row: &SqliteRow) -> Result<E> {
    let values = E::fields()
        .iter()
        .enumerate()
        .map(|(i, f)| decode(row, i, f.kind))
        .collect::<Result<Vec<_>>>()?;
    EntitySchema::<E>::from_row(values)
}

fn db_error(action: &str, err: sqlx::Error) -> Error {
    if let sqlx::Error::Database(db) = &err {
        if db.is_unique_violation() {
            return Error::Conflict(format!("Failed to {}: {}", action, db));
        }
    }
    Error::Database(format!("Failed to {}: {}", action, err))
}

#[async_trait]
impl DataSession for SqliteSession {
    async fn fetch<E: Entity>(&mut self, query: &Query<E>) -> Result<Vec<E>> {
        query.filter.validate::<E>()?;

        let mut args = Vec::new();
        let mut sql = format!(
            "SELECT {} FROM \"{}\" WHERE {}",
            column_list::<E>(),
            E::TABLE,
            query.filter.to_sql(&mut args)
        );
        if let Some(order) = &query.order {
            sql.push_str(" ORDER BY ");
            sql.push_str(&order.to_sql());
        }
        if query.take.is_some() || query.skip.is_some() {
            sql.push_str(" LIMIT ? OFFSET ?");
            args.push(Value::Int(query.take.unwrap_or(-1)));
            args.push(Value::Int(query.skip.unwrap_or(0).max(0)));
        }

        debug!("fetch {}: {}", E::TABLE, sql);
        let rows = self
            .fetch_rows(&sql, &args, &format!("query {}", E::TABLE))
            .await?;
        rows.iter().map(hydrate::<E>).collect()
    }

    async fn count<E: Entity>(&mut self, filter: &Filter) -> Result<i64> {
        filter.validate::<E>()?;

        let mut args = Vec::new();
        let sql = format!(
            "SELECT COUNT(*) FROM \"{}\" WHERE {}",
            E::TABLE,
            filter.to_sql(&mut args)
        );
        let rows = self
            .fetch_rows(&sql, &args, &format!("count {}", E::TABLE))
            .await?;
        rows.first()
            .map(|row| row.try_get::<i64, _>(0))
            .transpose()
            .map_err(|e| Error::Database(format!("Failed to read count: {}", e)))
            .map(|count| count.unwrap_or(0))
    }

    async fn aggregate<E: Entity>(
        &mut self,
        aggregate: Aggregate,
        field: &str,
        filter: &Filter,
    ) -> Result<Value> {
        let field = EntitySchema::<E>::require_field(field)?;
        filter.validate::<E>()?;

        let func = match aggregate {
            Aggregate::Max => "MAX",
            Aggregate::Min => "MIN",
        };
        let mut args = Vec::new();
        let sql = format!(
            "SELECT {}(\"{}\") FROM \"{}\" WHERE {}",
            func,
            field.name,
            E::TABLE,
            filter.to_sql(&mut args)
        );
        let rows = self
            .fetch_rows(&sql, &args, &format!("aggregate {}", E::TABLE))
            .await?;
        match rows.first() {
            Some(row) => decode(row, 0, field.kind),
            None => Ok(Value::Null),
        }
    }

    async fn insert<E: Entity>(&mut self, entity: &E) -> Result<u64> {
        let args = EntitySchema::<E>::to_row(entity);
        let placeholders = vec!["?"; args.len()].join(", ");
        let sql = format!(
            "INSERT INTO \"{}\" ({}) VALUES ({})",
            E::TABLE,
            column_list::<E>(),
            placeholders
        );
        self.execute(&sql, &args, &format!("insert into {}", E::TABLE))
            .await
    }

    async fn update<E: Entity>(&mut self, entity: &E) -> Result<u64> {
        let key = key_filter(entity)?;
        let changes: Vec<(&str, Value)> = E::fields()
            .iter()
            .filter(|f| !EntitySchema::<E>::is_key(f.name))
            .map(|f| (f.name, (f.get)(entity)))
            .collect();

        if changes.is_empty() {
            // Key-only entity: nothing to write, report whether the row exists
            return Ok(self.count::<E>(&key).await?.max(0) as u64);
        }
        self.update_fields::<E>(&key, &changes).await
    }

    async fn update_fields<E: Entity>(
        &mut self,
        filter: &Filter,
        fields: &[(&str, Value)],
    ) -> Result<u64> {
        filter.validate::<E>()?;
        if fields.is_empty() {
            return Err(Error::Validation("No fields to update".to_string()));
        }

        let mut args = Vec::with_capacity(fields.len());
        let mut assignments = Vec::with_capacity(fields.len());
        for (name, value) in fields {
            EntitySchema::<E>::check_assignment(name, value)?;
            assignments.push(format!("\"{}\" = ?", name));
            args.push(value.clone());
        }
        let sql = format!(
            "UPDATE \"{}\" SET {} WHERE {}",
            E::TABLE,
            assignments.join(", "),
            filter.to_sql(&mut args)
        );
        self.execute(&sql, &args, &format!("update {}", E::TABLE))
            .await
    }

    async fn delete<E: Entity>(&mut self, filter: &Filter) -> Result<u64> {
        filter.validate::<E>()?;

        let mut args = Vec::new();
        let sql = format!(
            "DELETE FROM \"{}\" WHERE {}",
            E::TABLE,
            filter.to_sql(&mut args)
        );
        self.execute(&sql, &args, &format!("delete from {}", E::TABLE))
            .await
    }

    async fn commit(self) -> Result<()> {
        self.tx
            .commit()
            .await
            .map_err(|e| Error::Database(format!("Failed to commit transaction: {}", e)))
    }

    async fn rollback(self) -> Result<()> {
        self.tx
            .rollback()
            .await
            .map_err(|e| Error::Database(format!("Failed to roll back transaction: {}", e)))
    }
}
