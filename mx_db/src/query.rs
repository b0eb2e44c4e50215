//! ABOUTME: Typed predicate, ordering, and paging builders
//! ABOUTME: Evaluated in memory or rendered to parameterised SQL by the sessions

use crate::schema::{Entity, EntitySchema, Field, Value};
use mx_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    /// SQL LIKE with `%` and `_`, ASCII case-insensitive
    Like,
}

impl CompareOp {
    fn sql(self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "<>",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
            CompareOp::Like => "LIKE",
        }
    }
}

/// Row predicate over named fields
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Filter {
    #[default]
    All,
    Compare {
        field: String,
        op: CompareOp,
        value: Value,
    },
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
}

impl Filter {
    fn compare(field: &str, op: CompareOp, value: impl Into<Value>) -> Self {
        Filter::Compare {
            field: field.to_string(),
            op,
            value: value.into(),
        }
    }

    pub fn eq(field: &str, value: impl Into<Value>) -> Self {
        Self::compare(field, CompareOp::Eq, value)
    }

    pub fn ne(field: &str, value: impl Into<Value>) -> Self {
        Self::compare(field, CompareOp::Ne, value)
    }

    pub fn lt(field: &str, value: impl Into<Value>) -> Self {
        Self::compare(field, CompareOp::Lt, value)
    }

    pub fn le(field: &str, value: impl Into<Value>) -> Self {
        Self::compare(field, CompareOp::Le, value)
    }

    pub fn gt(field: &str, value: impl Into<Value>) -> Self {
        Self::compare(field, CompareOp::Gt, value)
    }

    pub fn ge(field: &str, value: impl Into<Value>) -> Self {
        Self::compare(field, CompareOp::Ge, value)
    }

    pub fn like(field: &str, pattern: &str) -> Self {
        Self::compare(field, CompareOp::Like, pattern)
    }

    pub fn and(self, other: Filter) -> Self {
        match self {
            Filter::All => other,
            Filter::And(mut parts) => {
                parts.push(other);
                Filter::And(parts)
            }
            this => Filter::And(vec![this, other]),
        }
    }

    pub fn or(self, other: Filter) -> Self {
        match self {
            Filter::Or(mut parts) => {
                parts.push(other);
                Filter::Or(parts)
            }
            this => Filter::Or(vec![this, other]),
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        Filter::Not(Box::new(self))
    }

    /// Reject references to fields `E` does not declare
    pub fn validate<E: Entity>(&self) -> Result<()> {
        match self {
            Filter::All => Ok(()),
            Filter::Compare { field, .. } => EntitySchema::<E>::require_field(field).map(|_| ()),
            Filter::And(parts) | Filter::Or(parts) => {
                parts.iter().try_for_each(|p| p.validate::<E>())
            }
            Filter::Not(inner) => inner.validate::<E>(),
        }
    }

    /// In-memory evaluation with SQL NULL semantics
    pub fn matches<E: Entity>(&self, entity: &E) -> Result<bool> {
        match self {
            Filter::All => Ok(true),
            Filter::Compare { field, op, value } => {
                let field = EntitySchema::<E>::require_field(field)?;
                let actual = (field.get)(entity);
                Ok(compare_values(&actual, *op, value))
            }
            Filter::And(parts) => {
                for part in parts {
                    if !part.matches(entity)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Filter::Or(parts) => {
                for part in parts {
                    if part.matches(entity)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Filter::Not(inner) => Ok(!inner.matches(entity)?),
        }
    }

    /// Render as a WHERE fragment, pushing bound values onto `args`.
    /// Field names must have passed [`Filter::validate`].
    pub fn to_sql(&self, args: &mut Vec<Value>) -> String {
        match self {
            Filter::All => "1 = 1".to_string(),
            Filter::Compare { field, op, value } => match (op, value) {
                (CompareOp::Eq, Value::Null) => format!("\"{}\" IS NULL", field),
                (CompareOp::Ne, Value::Null) => format!("\"{}\" IS NOT NULL", field),
                _ => {
                    args.push(value.clone());
                    format!("\"{}\" {} ?", field, op.sql())
                }
            },
            Filter::And(parts) if parts.is_empty() => "1 = 1".to_string(),
            Filter::Or(parts) if parts.is_empty() => "1 = 0".to_string(),
            Filter::And(parts) => join_sql(parts, " AND ", args),
            Filter::Or(parts) => join_sql(parts, " OR ", args),
            Filter::Not(inner) => format!("NOT ({})", inner.to_sql(args)),
        }
    }
}

fn join_sql(parts: &[Filter], sep: &str, args: &mut Vec<Value>) -> String {
    parts
        .iter()
        .map(|p| format!("({})", p.to_sql(args)))
        .collect::<Vec<_>>()
        .join(sep)
}

fn compare_values(actual: &Value, op: CompareOp, expected: &Value) -> bool {
    match (op, expected) {
        (CompareOp::Eq, Value::Null) => return actual.is_null(),
        (CompareOp::Ne, Value::Null) => return !actual.is_null(),
        _ => {}
    }

    if op == CompareOp::Like {
        return match (actual, expected) {
            (Value::Null, _) | (_, Value::Null) => false,
            (actual, Value::Text(pattern)) => like_match(&actual.to_string(), pattern),
            _ => false,
        };
    }

    match actual.compare(expected) {
        None => false,
        Some(ordering) => match op {
            CompareOp::Eq => ordering == Ordering::Equal,
            CompareOp::Ne => ordering != Ordering::Equal,
            CompareOp::Lt => ordering == Ordering::Less,
            CompareOp::Le => ordering != Ordering::Greater,
            CompareOp::Gt => ordering == Ordering::Greater,
            CompareOp::Ge => ordering != Ordering::Less,
            CompareOp::Like => false,
        },
    }
}

/// SQLite LIKE semantics: `%` any run, `_` one char, ASCII case folded
fn like_match(text: &str, pattern: &str) -> bool {
    let text: Vec<char> = text.chars().map(|c| c.to_ascii_lowercase()).collect();
    let pattern: Vec<char> = pattern.chars().map(|c| c.to_ascii_lowercase()).collect();

    // matched[j]: pattern[..j] matches text[..i]
    let mut matched = vec![false; pattern.len() + 1];
    matched[0] = true;
    for j in 1..=pattern.len() {
        matched[j] = matched[j - 1] && pattern[j - 1] == '%';
    }

    for c in &text {
        let mut next = vec![false; pattern.len() + 1];
        for j in 1..=pattern.len() {
            next[j] = match pattern[j - 1] {
                '%' => next[j - 1] || matched[j],
                '_' => matched[j - 1],
                p => matched[j - 1] && p == *c,
            };
        }
        matched = next;
    }

    matched[pattern.len()]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

/// Sort key resolved against the schema when it is built
pub struct OrderBy<E: 'static> {
    field: &'static Field<E>,
    direction: SortDirection,
}

impl<E: Entity> OrderBy<E> {
    /// Unknown field names fail here instead of falling back to another column
    pub fn new(field: &str, direction: SortDirection) -> Result<Self> {
        let field = EntitySchema::<E>::field(field).ok_or_else(|| {
            Error::Validation(format!(
                "cannot sort '{}' by unknown field '{}'",
                E::TABLE,
                field
            ))
        })?;
        Ok(Self { field, direction })
    }

    pub fn asc(field: &str) -> Result<Self> {
        Self::new(field, SortDirection::Asc)
    }

    pub fn desc(field: &str) -> Result<Self> {
        Self::new(field, SortDirection::Desc)
    }

    pub fn field(&self) -> &'static Field<E> {
        self.field
    }

    pub fn direction(&self) -> SortDirection {
        self.direction
    }

    /// NULLs sort first ascending, matching SQLite
    pub fn compare(&self, a: &E, b: &E) -> Ordering {
        let (va, vb) = ((self.field.get)(a), (self.field.get)(b));
        let ordering = match (va.is_null(), vb.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            (false, false) => va.compare(&vb).unwrap_or(Ordering::Equal),
        };
        match self.direction {
            SortDirection::Asc => ordering,
            SortDirection::Desc => ordering.reverse(),
        }
    }

    pub fn to_sql(&self) -> String {
        let dir = match self.direction {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        };
        format!("\"{}\" {}", self.field.name, dir)
    }
}

impl<E: 'static> Clone for OrderBy<E> {
    fn clone(&self) -> Self {
        Self {
            field: self.field,
            direction: self.direction,
        }
    }
}

impl<E: 'static> fmt::Debug for OrderBy<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrderBy")
            .field("field", &self.field.name)
            .field("direction", &self.direction)
            .finish()
    }
}

/// Fetch description handed to a session
pub struct Query<E: 'static> {
    pub filter: Filter,
    pub order: Option<OrderBy<E>>,
    pub skip: Option<i64>,
    pub take: Option<i64>,
}

impl<E: Entity> Query<E> {
    pub fn new(filter: Filter) -> Self {
        Self {
            filter,
            order: None,
            skip: None,
            take: None,
        }
    }

    pub fn order_by(mut self, order: OrderBy<E>) -> Self {
        self.order = Some(order);
        self
    }

    pub fn skip(mut self, skip: i64) -> Self {
        self.skip = Some(skip);
        self
    }

    pub fn take(mut self, take: i64) -> Self {
        self.take = Some(take);
        self
    }
}

impl<E: 'static> Clone for Query<E> {
    fn clone(&self) -> Self {
        Self {
            filter: self.filter.clone(),
            order: self.order.clone(),
            skip: self.skip,
            take: self.take,
        }
    }
}

impl<E: 'static> fmt::Debug for Query<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("filter", &self.filter)
            .field("order", &self.order)
            .field("skip", &self.skip)
            .field("take", &self.take)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregate {
    Max,
    Min,
}

/// Paging and ordering for list reads.
///
/// With a positive `page_size` the request is paged: skip
/// `page_index * page_size`, take `page_size`. Without one it is a plain
/// window: skip `skip`, take `top`.
pub struct PagingRequest<E: 'static> {
    pub order_by: Option<OrderBy<E>>,
    pub page_size: Option<i64>,
    pub page_index: i64,
    pub skip: Option<i64>,
    pub top: Option<i64>,
}

impl<E: Entity> PagingRequest<E> {
    pub fn page(order_by: Option<OrderBy<E>>, page_size: i64, page_index: i64) -> Self {
        Self {
            order_by,
            page_size: Some(page_size),
            page_index,
            skip: None,
            top: None,
        }
    }

    pub fn window(order_by: Option<OrderBy<E>>, skip: Option<i64>, top: Option<i64>) -> Self {
        Self {
            order_by,
            page_size: None,
            page_index: 0,
            skip,
            top,
        }
    }

    pub fn is_paged(&self) -> bool {
        matches!(self.page_size, Some(size) if size > 0)
    }

    /// Shape `query` for this request; `fallback` orders when the caller gave no order
    pub fn apply(&self, query: Query<E>, fallback: &OrderBy<E>) -> Query<E> {
        let order = self.order_by.clone().unwrap_or_else(|| fallback.clone());
        let query = query.order_by(order);

        match self.page_size {
            Some(size) if size > 0 => query
                .skip(self.page_index.max(0).saturating_mul(size))
                .take(size),
            _ => {
                let query = query.skip(self.skip.unwrap_or(0).max(0));
                match self.top {
                    Some(top) => query.take(top.max(0)),
                    None => query,
                }
            }
        }
    }
}

impl<E: 'static> Clone for PagingRequest<E> {
    fn clone(&self) -> Self {
        Self {
            order_by: self.order_by.clone(),
            page_size: self.page_size,
            page_index: self.page_index,
            skip: self.skip,
            top: self.top,
        }
    }
}

impl<E: 'static> fmt::Debug for PagingRequest<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PagingRequest")
            .field("order_by", &self.order_by)
            .field("page_size", &self.page_size)
            .field("page_index", &self.page_index)
            .field("skip", &self.skip)
            .field("top", &self.top)
            .finish()
    }
}

/// One page of results with totals
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaginationModel<T> {
    pub items: Vec<T>,
    pub page_index: i64,
    pub page_size: i64,
    pub total_items: i64,
    pub total_page: i64,
}

impl<T> PaginationModel<T> {
    /// Without a positive page size the result is a single page holding everything
    pub fn new(items: Vec<T>, page_index: i64, page_size: Option<i64>, total_items: i64) -> Self {
        match page_size {
            Some(size) if size > 0 => Self {
                items,
                page_index,
                page_size: size,
                total_items,
                total_page: total_items / size + i64::from(total_items % size != 0),
            },
            _ => Self {
                items,
                page_index: 0,
                page_size: total_items,
                total_items,
                total_page: 1,
            },
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> PaginationModel<U> {
        PaginationModel {
            items: self.items.into_iter().map(f).collect(),
            page_index: self.page_index,
            page_size: self.page_size,
            total_items: self.total_items,
            total_page: self.total_page,
        }
    }
}
