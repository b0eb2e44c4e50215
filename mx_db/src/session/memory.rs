//! ABOUTME: In-process data store with snapshot transactions
//! ABOUTME: Backs tests and embedded use without a database file

use super::{DataContext, DataSession};
use crate::query::{Aggregate, Filter, Query};
use crate::schema::{Entity, EntitySchema, Value};
use async_trait::async_trait;
use mx_core::{Error, Result};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tracing::debug;

type Row = Vec<Value>;
type Tables = HashMap<&'static str, Arc<Vec<Row>>>;

/// Shared committed state; sessions copy a table on first touch
#[derive(Debug, Clone, Default)]
pub struct MemoryContext {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Committed rows currently stored for `E`
    pub fn row_count<E: Entity>(&self) -> Result<usize> {
        let tables = self
            .tables
            .lock()
            .map_err(|e| Error::Database(format!("memory store poisoned: {}", e)))?;
        Ok(tables.get(E::TABLE).map(|rows| rows.len()).unwrap_or(0))
    }
}

#[async_trait]
impl DataContext for MemoryContext {
    type Session = MemorySession;

    async fn begin(&self) -> Result<MemorySession> {
        Ok(MemorySession {
            store: Arc::clone(&self.tables),
            working: HashMap::new(),
            dirty: HashSet::new(),
        })
    }
}

/// Working copies of the tables this transaction has touched.
///
/// Commit publishes only the tables it wrote, replacing them wholesale:
/// concurrent writers to the same table resolve as last commit wins.
#[derive(Debug)]
pub struct MemorySession {
    store: Arc<Mutex<Tables>>,
    working: HashMap<&'static str, Vec<Row>>,
    dirty: HashSet<&'static str>,
}

impl MemorySession {
    fn rows<E: Entity>(&mut self) -> Result<&mut Vec<Row>> {
        if !self.working.contains_key(E::TABLE) {
            let snapshot = {
                let tables = self
                    .store
                    .lock()
                    .map_err(|e| Error::Database(format!("memory store poisoned: {}", e)))?;
                tables
                    .get(E::TABLE)
                    .map(|rows| rows.as_ref().clone())
                    .unwrap_or_default()
            };
            self.working.insert(E::TABLE, snapshot);
        }

        self.working
            .get_mut(E::TABLE)
            .ok_or_else(|| Error::Database(format!("table '{}' not loaded", E::TABLE)))
    }

    fn rows_mut<E: Entity>(&mut self) -> Result<&mut Vec<Row>> {
        self.dirty.insert(E::TABLE);
        self.rows::<E>()
    }

    fn entities<E: Entity>(&mut self, filter: &Filter) -> Result<Vec<E>> {
        filter.validate::<E>()?;
        let rows = self.rows::<E>()?.clone();

        let mut matched = Vec::new();
        for row in rows {
            let entity = EntitySchema::<E>::from_row(row)?;
            if filter.matches(&entity)? {
                matched.push(entity);
            }
        }
        Ok(matched)
    }
}

fn key_of<E: Entity>(row: &[Value]) -> Result<Vec<Value>> {
    EntitySchema::<E>::key_fields()?
        .iter()
        .map(|key| {
            E::fields()
                .iter()
                .position(|f| f.name == key.name)
                .and_then(|i| row.get(i).cloned())
                .ok_or_else(|| Error::Database(format!("key '{}' missing from row", key.name)))
        })
        .collect()
}

#[async_trait]
impl DataSession for MemorySession {
    async fn fetch<E: Entity>(&mut self, query: &Query<E>) -> Result<Vec<E>> {
        let mut entities = self.entities::<E>(&query.filter)?;

        if let Some(order) = &query.order {
            entities.sort_by(|a, b| order.compare(a, b));
        }

        let skip = query.skip.unwrap_or(0).max(0) as usize;
        let take = query.take.map(|t| t.max(0) as usize).unwrap_or(usize::MAX);
        Ok(entities.into_iter().skip(skip).take(take).collect())
    }

    async fn count<E: Entity>(&mut self, filter: &Filter) -> Result<i64> {
        Ok(self.entities::<E>(filter)?.len() as i64)
    }

    async fn aggregate<E: Entity>(
        &mut self,
        aggregate: Aggregate,
        field: &str,
        filter: &Filter,
    ) -> Result<Value> {
        let field = EntitySchema::<E>::require_field(field)?;
        let wanted = match aggregate {
            Aggregate::Max => Ordering::Greater,
            Aggregate::Min => Ordering::Less,
        };

        let mut best = Value::Null;
        for entity in self.entities::<E>(filter)? {
            let value = (field.get)(&entity);
            if value.is_null() {
                continue;
            }
            if best.is_null() || value.compare(&best) == Some(wanted) {
                best = value;
            }
        }
        Ok(best)
    }

    async fn insert<E: Entity>(&mut self, entity: &E) -> Result<u64> {
        let row = EntitySchema::<E>::to_row(entity);
        let key = key_of::<E>(&row)?;

        let rows = self.rows_mut::<E>()?;
        for existing in rows.iter() {
            if key_of::<E>(existing)? == key {
                return Err(Error::Conflict(format!(
                    "'{}' already has a row with key {:?}",
                    E::TABLE,
                    key
                )));
            }
        }

        rows.push(row);
        debug!("Inserted row into memory table {}", E::TABLE);
        Ok(1)
    }

    async fn update<E: Entity>(&mut self, entity: &E) -> Result<u64> {
        let row = EntitySchema::<E>::to_row(entity);
        let key = key_of::<E>(&row)?;

        let rows = self.rows_mut::<E>()?;
        for existing in rows.iter_mut() {
            if key_of::<E>(existing)? == key {
                *existing = row;
                return Ok(1);
            }
        }
        Ok(0)
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
        let setters = fields
            .iter()
            .map(|(name, value)| Ok((EntitySchema::<E>::check_assignment(name, value)?, value)))
            .collect::<Result<Vec<_>>>()?;

        let rows = self.rows_mut::<E>()?;
        let mut affected = 0;
        for row in rows.iter_mut() {
            let mut entity = EntitySchema::<E>::from_row(row.clone())?;
            if !filter.matches(&entity)? {
                continue;
            }
            for (field, value) in &setters {
                (field.set)(&mut entity, (*value).clone())?;
            }
            *row = EntitySchema::<E>::to_row(&entity);
            affected += 1;
        }
        Ok(affected)
    }

    async fn delete<E: Entity>(&mut self, filter: &Filter) -> Result<u64> {
        filter.validate::<E>()?;
        let rows = std::mem::take(self.rows_mut::<E>()?);

        let mut kept = Vec::with_capacity(rows.len());
        let mut removed = 0;
        for row in rows {
            let entity = EntitySchema::<E>::from_row(row.clone())?;
            if filter.matches(&entity)? {
                removed += 1;
            } else {
                kept.push(row);
            }
        }

        *self.rows_mut::<E>()? = kept;
        Ok(removed)
    }

    async fn commit(self) -> Result<()> {
        let MemorySession {
            store,
            mut working,
            dirty,
        } = self;

        let mut tables = store
            .lock()
            .map_err(|e| Error::Database(format!("memory store poisoned: {}", e)))?;
        for table in dirty {
            if let Some(rows) = working.remove(table) {
                tables.insert(table, Arc::new(rows));
            }
        }
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        debug!(
            "Discarding memory session with {} touched tables",
            self.dirty.len()
        );
        Ok(())
    }
}
