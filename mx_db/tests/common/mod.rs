//! ABOUTME: Shared fixtures for repository integration tests
//! ABOUTME: Article entities with revision children and a view exercising every hook

#![allow(dead_code)]

use async_trait::async_trait;
use mx_config::DatabaseConfig;
use mx_core::{Error, Result};
use mx_db::{
    CacheService, DataSession, Entity, Field, FieldKind, Filter, MemoryCacheStore, Query,
    RepositoryResponse, SqliteContext, Value, View, ViewModel,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Title whose related-model cleanup always fails
pub const LOCKED_TITLE: &str = "locked";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Article {
    pub title: String,
    pub id: i64,
    pub culture: String,
    pub views: i64,
    pub published: bool,
}

impl Entity for Article {
    const TABLE: &'static str = "articles";
    const PRIMARY_KEY: &'static [&'static str] = &["id", "culture"];

    fn fields() -> &'static [Field<Self>] {
        static FIELDS: [Field<Article>; 5] = [
            Field {
                name: "title",
                kind: FieldKind::Text,
                get: |a| Value::from(&a.title),
                set: |a, v| {
                    a.title = v.into_string()?;
                    Ok(())
                },
            },
            Field {
                name: "id",
                kind: FieldKind::Integer,
                get: |a| Value::from(a.id),
                set: |a, v| {
                    a.id = v.as_i64()?;
                    Ok(())
                },
            },
            Field {
                name: "culture",
                kind: FieldKind::Text,
                get: |a| Value::from(&a.culture),
                set: |a, v| {
                    a.culture = v.into_string()?;
                    Ok(())
                },
            },
            Field {
                name: "views",
                kind: FieldKind::Integer,
                get: |a| Value::from(a.views),
                set: |a, v| {
                    a.views = v.as_i64()?;
                    Ok(())
                },
            },
            Field {
                name: "published",
                kind: FieldKind::Boolean,
                get: |a| Value::from(a.published),
                set: |a, v| {
                    a.published = v.as_bool()?;
                    Ok(())
                },
            },
        ];
        &FIELDS
    }
}

/// Child row written by `save_sub_models`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Revision {
    pub article_id: i64,
    pub culture: String,
    pub number: i64,
    pub title: String,
}

impl Entity for Revision {
    const TABLE: &'static str = "revisions";
    const PRIMARY_KEY: &'static [&'static str] = &["article_id", "culture", "number"];

    fn fields() -> &'static [Field<Self>] {
        static FIELDS: [Field<Revision>; 4] = [
            Field {
                name: "article_id",
                kind: FieldKind::Integer,
                get: |r| Value::from(r.article_id),
                set: |r, v| {
                    r.article_id = v.as_i64()?;
                    Ok(())
                },
            },
            Field {
                name: "culture",
                kind: FieldKind::Text,
                get: |r| Value::from(&r.culture),
                set: |r, v| {
                    r.culture = v.into_string()?;
                    Ok(())
                },
            },
            Field {
                name: "number",
                kind: FieldKind::Integer,
                get: |r| Value::from(r.number),
                set: |r, v| {
                    r.number = v.as_i64()?;
                    Ok(())
                },
            },
            Field {
                name: "title",
                kind: FieldKind::Text,
                get: |r| Value::from(&r.title),
                set: |r, v| {
                    r.title = v.into_string()?;
                    Ok(())
                },
            },
        ];
        &FIELDS
    }
}

fn revisions_of(article: &Article) -> Filter {
    Filter::eq("article_id", article.id).and(Filter::eq("culture", article.culture.as_str()))
}

/// Article as served to callers: a derived heading plus the revision count,
/// which is related data re-read whenever the view comes out of the cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArticleView {
    pub model: Article,
    pub heading: String,
    pub revision_count: i64,
}

impl ArticleView {
    pub fn new(article: Article) -> Self {
        Self {
            heading: article.title.to_uppercase(),
            model: article,
            revision_count: 0,
        }
    }
}

impl View for ArticleView {
    type Model = Article;

    fn model(&self) -> &Article {
        &self.model
    }

    fn is_cache(&self) -> bool {
        self.model.published
    }
}

#[async_trait]
impl<S: DataSession> ViewModel<S> for ArticleView {
    async fn from_model(model: Article, session: &mut S) -> Result<Self> {
        let revision_count = session.count::<Revision>(&revisions_of(&model)).await?;
        Ok(Self {
            heading: model.title.to_uppercase(),
            model,
            revision_count,
        })
    }

    async fn parse_model(&mut self, _session: &mut S) -> Result<Article> {
        let mut model = self.model.clone();
        model.title = model.title.trim().to_string();
        Ok(model)
    }

    async fn expand_view(&mut self, session: &mut S) -> Result<()> {
        self.revision_count = session.count::<Revision>(&revisions_of(&self.model)).await?;
        Ok(())
    }

    async fn validate(&mut self, _session: &mut S) -> Result<()> {
        if self.model.title.trim().is_empty() {
            return Err(Error::Validation("article title is required".to_string()));
        }
        Ok(())
    }

    async fn save_sub_models(&mut self, parent: &Article, session: &mut S) -> Result<()> {
        let existing = session.count::<Revision>(&revisions_of(parent)).await?;
        let revision = Revision {
            article_id: parent.id,
            culture: parent.culture.clone(),
            number: existing + 1,
            title: parent.title.clone(),
        };
        session.insert(&revision).await?;
        Ok(())
    }

    async fn remove_related_models(&self, session: &mut S) -> RepositoryResponse<bool> {
        if self.model.title == LOCKED_TITLE {
            return RepositoryResponse::with_errors(vec![format!(
                "article {} has locked revisions",
                self.model.id
            )]);
        }
        RepositoryResponse::from_result(
            session
                .delete::<Revision>(&revisions_of(&self.model))
                .await
                .map(|_| true),
        )
    }
}

pub fn article(id: i64, culture: &str, title: &str) -> Article {
    Article {
        title: title.to_string(),
        id,
        culture: culture.to_string(),
        views: id * 10,
        published: true,
    }
}

/// SQLite database with both tables in a scratch directory
pub async fn sqlite_context() -> (SqliteContext, tempfile::TempDir) {
    test_support::init_test_tracing();
    let dir = test_support::scratch_dir();
    let config = DatabaseConfig {
        path: dir.path().join("articles.db").display().to_string(),
        pool_size: 4,
        sqlite_wal: true,
    };
    let ctx = SqliteContext::connect(&config)
        .await
        .expect("sqlite context should connect");
    ctx.ensure_table::<Article>().await.expect("articles table");
    ctx.ensure_table::<Revision>().await.expect("revisions table");
    (ctx, dir)
}

pub fn memory_cache() -> CacheService {
    test_support::init_test_tracing();
    CacheService::new(
        Arc::new(MemoryCacheStore::new(1000, Duration::from_secs(300))),
        64,
    )
    .expect("cache service needs a runtime")
}

/// Revision rows visible to a fresh session
pub async fn revision_count<S: DataSession>(session: &mut S, article: &Article) -> i64 {
    session
        .count::<Revision>(&revisions_of(article))
        .await
        .expect("count revisions")
}

/// Every article, ordered by id then culture
pub async fn all_articles<S: DataSession>(session: &mut S) -> Vec<Article> {
    let query = Query::<Article>::new(Filter::All)
        .order_by(mx_db::OrderBy::asc("id").expect("id is a field"));
    session.fetch(&query).await.expect("fetch articles")
}
