//! ABOUTME: Cache keys and key predicates derived from primary-key values
//! ABOUTME: The same logical row maps to the same cache slot in every process

use crate::query::Filter;
use crate::schema::{Entity, EntitySchema};
use mx_core::Result;

/// `_` + value for each key field, in declared key order.
///
/// `(id = 3, culture = "en-us")` becomes `_3_en-us`. A NULL key value renders
/// as a bare `_`; such keys collide, so callers populate keys before lookup.
pub fn build_key<E: Entity>(entity: &E) -> Result<String> {
    let mut key = String::new();
    for value in EntitySchema::<E>::key_values(entity)? {
        key.push('_');
        key.push_str(&value.to_string());
    }
    Ok(key)
}

/// Equality on every key field, ANDed. Used to re-read the canonical row.
pub fn key_filter<E: Entity>(entity: &E) -> Result<Filter> {
    let filter = EntitySchema::<E>::key_fields()?
        .into_iter()
        .fold(Filter::And(Vec::new()), |filter, field| {
            filter.and(Filter::eq(field.name, (field.get)(entity)))
        });
    Ok(filter)
}

/// Folder for a view type: its full type path as one file-safe segment
pub fn cache_folder<V>() -> String {
    std::any::type_name::<V>()
        .replace("::", ".")
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Field, FieldKind, Value};
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    struct Post {
        title: String,
        id: i64,
        culture: Option<String>,
    }

    impl Entity for Post {
        const TABLE: &'static str = "posts";
        // Declared key order differs from field order on purpose
        const PRIMARY_KEY: &'static [&'static str] = &["id", "culture"];

        fn fields() -> &'static [Field<Self>] {
            static FIELDS: [Field<Post>; 3] = [
                Field {
                    name: "culture",
                    kind: FieldKind::Text,
                    get: |p| Value::from(p.culture.clone()),
                    set: |p, v| {
                        p.culture = v.into_opt_string()?;
                        Ok(())
                    },
                },
                Field {
                    name: "title",
                    kind: FieldKind::Text,
                    get: |p| Value::from(&p.title),
                    set: |p, v| {
                        p.title = v.into_string()?;
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
            ];
            &FIELDS
        }
    }

    fn post(id: i64, culture: Option<&str>, title: &str) -> Post {
        Post {
            id,
            culture: culture.map(str::to_string),
            title: title.to_string(),
        }
    }

    #[test]
    fn key_uses_declared_order() {
        assert_eq!(build_key(&post(3, Some("en-us"), "Home")).unwrap(), "_3_en-us");
    }

    #[test]
    fn key_ignores_non_key_fields() {
        let a = build_key(&post(3, Some("en-us"), "Home")).unwrap();
        let b = build_key(&post(3, Some("en-us"), "Accueil")).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn null_key_renders_empty() {
        assert_eq!(build_key(&post(3, None, "x")).unwrap(), "_3_");
    }

    #[test]
    fn key_filter_matches_only_same_key() {
        let filter = key_filter(&post(3, Some("en-us"), "Home")).unwrap();
        assert!(filter.matches(&post(3, Some("en-us"), "Other")).unwrap());
        assert!(!filter.matches(&post(3, Some("fr-fr"), "Home")).unwrap());
        assert!(!filter.matches(&post(4, Some("en-us"), "Home")).unwrap());
    }

    #[test]
    fn folder_is_path_safe() {
        let folder = cache_folder::<Vec<Post>>();
        assert!(folder.contains("Post"));
        assert!(!folder.contains("::"));
        assert!(!folder.contains('<'));
    }
}
