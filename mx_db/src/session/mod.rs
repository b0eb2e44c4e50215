//! ABOUTME: Data-session abstraction consumed by the repositories
//! ABOUTME: A context opens transactional sessions; a session runs typed entity operations

pub mod memory;
pub mod sqlite;

use crate::query::{Aggregate, Filter, Query};
use crate::schema::{Entity, Value};
use async_trait::async_trait;
use mx_core::Result;

/// Factory for transactional sessions. Cheap to clone.
#[async_trait]
pub trait DataContext: Clone + Send + Sync + 'static {
    type Session: DataSession;

    /// Open a session with its transaction already begun
    async fn begin(&self) -> Result<Self::Session>;
}

/// One open transaction against a store.
///
/// Entities come back as owned values, so nothing returned stays tracked by
/// the session. Dropping a session without calling [`DataSession::commit`]
/// discards its work.
#[async_trait]
pub trait DataSession: Send + Sized {
    async fn fetch<E: Entity>(&mut self, query: &Query<E>) -> Result<Vec<E>>;

    async fn count<E: Entity>(&mut self, filter: &Filter) -> Result<i64>;

    /// Max/min over non-null values of `field`; `Value::Null` when nothing matches
    async fn aggregate<E: Entity>(
        &mut self,
        aggregate: Aggregate,
        field: &str,
        filter: &Filter,
    ) -> Result<Value>;

    /// Fails with `Conflict` when the primary key is taken
    async fn insert<E: Entity>(&mut self, entity: &E) -> Result<u64>;

    /// Replace the row with the same primary key; returns rows affected
    async fn update<E: Entity>(&mut self, entity: &E) -> Result<u64>;

    async fn update_fields<E: Entity>(
        &mut self,
        filter: &Filter,
        fields: &[(&str, Value)],
    ) -> Result<u64>;

    async fn delete<E: Entity>(&mut self, filter: &Filter) -> Result<u64>;

    async fn commit(self) -> Result<()>;

    async fn rollback(self) -> Result<()>;
}
