//! ABOUTME: Typed entity metadata standing in for runtime reflection
//! ABOUTME: Field accessors, primary-key order, row conversion, and schema validation

use mx_core::{Error, Result};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;
use std::marker::PhantomData;

/// A single column value as seen by sessions, filters, and cache keys
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Real(f64),
    Text(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_i64(&self) -> Result<i64> {
        match self {
            Value::Int(v) => Ok(*v),
            other => Err(mismatch("integer", other)),
        }
    }

    pub fn as_f64(&self) -> Result<f64> {
        match self {
            Value::Real(v) => Ok(*v),
            Value::Int(v) => Ok(*v as f64),
            other => Err(mismatch("real", other)),
        }
    }

    pub fn as_bool(&self) -> Result<bool> {
        match self {
            Value::Bool(v) => Ok(*v),
            Value::Int(0) => Ok(false),
            Value::Int(1) => Ok(true),
            other => Err(mismatch("boolean", other)),
        }
    }

    pub fn as_str(&self) -> Result<&str> {
        match self {
            Value::Text(v) => Ok(v),
            other => Err(mismatch("text", other)),
        }
    }

    pub fn into_string(self) -> Result<String> {
        match self {
            Value::Text(v) => Ok(v),
            other => Err(mismatch("text", &other)),
        }
    }

    pub fn into_opt_string(self) -> Result<Option<String>> {
        match self {
            Value::Null => Ok(None),
            other => other.into_string().map(Some),
        }
    }

    pub fn as_opt_i64(&self) -> Result<Option<i64>> {
        match self {
            Value::Null => Ok(None),
            other => other.as_i64().map(Some),
        }
    }

    /// Whether this value may be stored in a column of `kind`
    pub fn fits(&self, kind: FieldKind) -> bool {
        matches!(
            (self, kind),
            (Value::Null, _)
                | (Value::Int(_), FieldKind::Integer)
                | (Value::Int(_), FieldKind::Real)
                | (Value::Real(_), FieldKind::Real)
                | (Value::Text(_), FieldKind::Text)
                | (Value::Bool(_), FieldKind::Boolean)
        )
    }

    /// SQL-style comparison: anything involving NULL is unordered
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Real(a), Value::Real(b)) => a.partial_cmp(b),
            (Value::Int(a), Value::Real(b)) => (*a as f64).partial_cmp(b),
            (Value::Real(a), Value::Int(b)) => a.partial_cmp(&(*b as f64)),
            (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

fn mismatch(expected: &str, got: &Value) -> Error {
    Error::Validation(format!("expected {} value, got {:?}", expected, got))
}

/// Key rendering: NULL becomes the empty string
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(v) => write!(f, "{}", v),
            Value::Int(v) => write!(f, "{}", v),
            Value::Real(v) => write!(f, "{}", v),
            Value::Text(v) => f.write_str(v),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Real(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<&String> for Value {
    fn from(v: &String) -> Self {
        Value::Text(v.clone())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Storage class of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Integer,
    Real,
    Text,
    Boolean,
}

impl FieldKind {
    pub fn sql_type(self) -> &'static str {
        match self {
            FieldKind::Integer => "INTEGER",
            FieldKind::Real => "REAL",
            FieldKind::Text => "TEXT",
            FieldKind::Boolean => "BOOLEAN",
        }
    }
}

/// Accessor pair for one field of `E`
pub struct Field<E> {
    pub name: &'static str,
    pub kind: FieldKind,
    pub get: fn(&E) -> Value,
    pub set: fn(&mut E, Value) -> Result<()>,
}

impl<E> Clone for Field<E> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<E> Copy for Field<E> {}

impl<E> fmt::Debug for Field<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Field")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .finish()
    }
}

/// A persistent record type.
///
/// `PRIMARY_KEY` lists key fields in the order the store declares them. Cache
/// keys and key predicates follow this order, never the order of `fields()`.
pub trait Entity:
    Clone + Default + fmt::Debug + Send + Sync + Serialize + DeserializeOwned + 'static
{
    const TABLE: &'static str;
    const PRIMARY_KEY: &'static [&'static str];

    fn fields() -> &'static [Field<Self>];
}

/// Schema helpers for an entity type
pub struct EntitySchema<E>(PhantomData<fn() -> E>);

impl<E: Entity> EntitySchema<E> {
    /// Check the descriptor once, when a repository is built
    pub fn validate() -> Result<()> {
        if !is_safe_sql_identifier(E::TABLE) {
            return Err(Error::Validation(format!(
                "table name '{}' is not a safe SQL identifier",
                E::TABLE
            )));
        }

        let mut seen = HashSet::new();
        for field in E::fields() {
            if !is_safe_sql_identifier(field.name) {
                return Err(Error::Validation(format!(
                    "field name '{}.{}' is not a safe SQL identifier",
                    E::TABLE,
                    field.name
                )));
            }
            if !seen.insert(field.name) {
                return Err(Error::Validation(format!(
                    "field '{}.{}' declared twice",
                    E::TABLE,
                    field.name
                )));
            }
        }

        if E::PRIMARY_KEY.is_empty() {
            return Err(Error::Validation(format!(
                "entity '{}' declares no primary key",
                E::TABLE
            )));
        }
        for key in E::PRIMARY_KEY {
            if !seen.contains(key) {
                return Err(Error::Validation(format!(
                    "primary key field '{}.{}' is not declared",
                    E::TABLE,
                    key
                )));
            }
        }

        Ok(())
    }

    pub fn field(name: &str) -> Option<&'static Field<E>> {
        E::fields().iter().find(|f| f.name == name)
    }

    pub fn require_field(name: &str) -> Result<&'static Field<E>> {
        Self::field(name).ok_or_else(|| {
            Error::Validation(format!("unknown field '{}' on '{}'", name, E::TABLE))
        })
    }

    /// Field `name`, once `value` is known to be storable there. The setter
    /// runs against a default entity, so a value that could never be read
    /// back (NULL in a required column, say) is refused before any write.
    pub fn check_assignment(name: &str, value: &Value) -> Result<&'static Field<E>> {
        let field = Self::require_field(name)?;
        if !value.fits(field.kind) {
            return Err(Error::Validation(format!(
                "value {:?} does not fit {:?} field '{}.{}'",
                value,
                field.kind,
                E::TABLE,
                name
            )));
        }
        (field.set)(&mut E::default(), value.clone()).map_err(|e| {
            Error::Validation(format!(
                "value {:?} cannot be stored in '{}.{}': {}",
                value,
                E::TABLE,
                name,
                e
            ))
        })?;
        Ok(field)
    }

    /// Key fields in declared key order
    pub fn key_fields() -> Result<Vec<&'static Field<E>>> {
        E::PRIMARY_KEY
            .iter()
            .map(|name| Self::require_field(name))
            .collect()
    }

    pub fn key_values(entity: &E) -> Result<Vec<Value>> {
        Ok(Self::key_fields()?
            .into_iter()
            .map(|f| (f.get)(entity))
            .collect())
    }

    pub fn is_key(name: &str) -> bool {
        E::PRIMARY_KEY.contains(&name)
    }

    pub fn to_row(entity: &E) -> Vec<Value> {
        E::fields().iter().map(|f| (f.get)(entity)).collect()
    }

    /// Hydrate from values in `fields()` order
    pub fn from_row(values: Vec<Value>) -> Result<E> {
        let fields = E::fields();
        if values.len() != fields.len() {
            return Err(Error::Database(format!(
                "row for '{}' has {} values, expected {}",
                E::TABLE,
                values.len(),
                fields.len()
            )));
        }

        let mut entity = E::default();
        for (field, value) in fields.iter().zip(values) {
            (field.set)(&mut entity, value)?;
        }
        Ok(entity)
    }
}

/// Validates that a name contains only safe SQL identifier characters
///
/// # Security
/// Table and column names are interpolated into SQL text, so every descriptor
/// is checked by this function before any statement is built:
/// 1. Not empty
/// 2. Starts with a letter or underscore
/// 3. Contains only alphanumeric characters and underscores
pub fn is_safe_sql_identifier(name: &str) -> bool {
    let mut chars = name.chars();

    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }

    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    struct Page {
        id: i64,
        culture: String,
        title: Option<String>,
    }

    impl Entity for Page {
        const TABLE: &'static str = "pages";
        const PRIMARY_KEY: &'static [&'static str] = &["id", "culture"];

        fn fields() -> &'static [Field<Self>] {
            static FIELDS: [Field<Page>; 3] = [
                Field {
                    name: "culture",
                    kind: FieldKind::Text,
                    get: |p| Value::from(&p.culture),
                    set: |p, v| {
                        p.culture = v.into_string()?;
                        Ok(())
                    },
                },
                Field {
                    name: "id",
                    kind: FieldKind::Integer,
                    get: |p| Value::from(p.id),
                    set: |p, v| {
                        p.id = v.as_i64()?;
                        Ok(())
                    },
                },
                Field {
                    name: "title",
                    kind: FieldKind::Text,
                    get: |p| Value::from(p.title.clone()),
                    set: |p, v| {
                        p.title = v.into_opt_string()?;
                        Ok(())
                    },
                },
            ];
            &FIELDS
        }
    }

    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    struct Broken;

    impl Entity for Broken {
        const TABLE: &'static str = "broken";
        const PRIMARY_KEY: &'static [&'static str] = &["missing"];

        fn fields() -> &'static [Field<Self>] {
            &[]
        }
    }

    #[test]
    fn key_fields_follow_declared_key_order() {
        EntitySchema::<Page>::validate().unwrap();
        let names: Vec<_> = EntitySchema::<Page>::key_fields()
            .unwrap()
            .iter()
            .map(|f| f.name)
            .collect();
        assert_eq!(names, vec!["id", "culture"]);
    }

    #[test]
    fn assignment_respects_field_nullability() {
        assert!(EntitySchema::<Page>::check_assignment("title", &Value::Null).is_ok());
        assert!(EntitySchema::<Page>::check_assignment("id", &Value::Int(4)).is_ok());

        let err = EntitySchema::<Page>::check_assignment("id", &Value::Null).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(err.to_string().contains("pages.id"));

        let err = EntitySchema::<Page>::check_assignment("culture", &Value::Int(1)).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(EntitySchema::<Page>::check_assignment("nope", &Value::Null).is_err());
    }

    #[test]
    fn undeclared_key_is_rejected() {
        let err = EntitySchema::<Broken>::validate().unwrap_err();
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn row_conversion_preserves_values() {
        let page = Page {
            id: 3,
            culture: "en-us".into(),
            title: None,
        };
        let row = EntitySchema::<Page>::to_row(&page);
        assert_eq!(row[2], Value::Null);

        let back = EntitySchema::<Page>::from_row(row).unwrap();
        assert_eq!(back.id, 3);
        assert_eq!(back.culture, "en-us");
        assert!(back.title.is_none());
    }

    #[test]
    fn setter_rejects_wrong_kind() {
        let mut page = Page::default();
        let id = EntitySchema::<Page>::field("id").unwrap();
        assert!((id.set)(&mut page, Value::from("three")).is_err());
    }

    #[test]
    fn value_display_and_compare() {
        assert_eq!(Value::Null.to_string(), "");
        assert_eq!(Value::from(3).to_string(), "3");
        assert_eq!(Value::Int(2).compare(&Value::Real(2.5)), Some(Ordering::Less));
        assert_eq!(Value::Null.compare(&Value::Int(1)), None);
        assert!(Value::Int(1).fits(FieldKind::Real));
        assert!(!Value::Text("x".into()).fits(FieldKind::Integer));
    }

    #[test]
    fn test_safe_sql_identifier_validation() {
        assert!(is_safe_sql_identifier("pages"));
        assert!(is_safe_sql_identifier("_private"));
        assert!(is_safe_sql_identifier("table123"));
        assert!(is_safe_sql_identifier("_"));

        assert!(!is_safe_sql_identifier(""));
        assert!(!is_safe_sql_identifier("1pages"));
        assert!(!is_safe_sql_identifier("page-table"));
        assert!(!is_safe_sql_identifier("page table"));
        assert!(!is_safe_sql_identifier("pages; DROP TABLE pages"));
        assert!(!is_safe_sql_identifier("pages--"));
        assert!(!is_safe_sql_identifier("page\"s"));
    }
}
