//! ABOUTME: View-translating repository with read-through caching
//! ABOUTME: Reads go through the cache overlay, successful writes invalidate it

use super::model::ModelRepository;
use crate::cache::CacheService;
use crate::cache_overlay::CacheOverlay;
use crate::query::{Filter, PaginationModel, PagingRequest};
use crate::response::RepositoryResponse;
use crate::schema::{Entity, Value};
use crate::session::DataContext;
use crate::unit_of_work::begin_unit_of_work;
use crate::view::{View, ViewModel};
use mx_config::RepositoryConfig;
use mx_core::{Error, Result};
use tracing::{debug, instrument};

type ModelOf<V> = <V as View>::Model;

/// Repository exposing views of `V::Model` rows.
///
/// Caching is on when a [`CacheOverlay`] is attached. Invalidation runs after
/// the unit of work completes successfully; for a borrowed session that is
/// before the caller commits, so a later rollback only costs a cache miss.
/// Reads under a borrowed session may hit the cache but never fill it.
pub struct ViewRepository<C: DataContext, V: View> {
    models: ModelRepository<C, ModelOf<V>>,
    cache: Option<CacheOverlay<V>>,
}

impl<C, V> ViewRepository<C, V>
where
    C: DataContext,
    V: ViewModel<C::Session>,
{
    const TABLE: &'static str = <ModelOf<V> as Entity>::TABLE;

    /// Uncached repository
    pub fn new(context: C) -> Result<Self> {
        Ok(Self {
            models: ModelRepository::new(context)?,
            cache: None,
        })
    }

    /// Cached when `cache` is given
    pub fn with_config(
        context: C,
        config: &RepositoryConfig,
        cache: Option<CacheService>,
    ) -> Result<Self> {
        Ok(Self {
            models: ModelRepository::with_config(context, config)?,
            cache: cache.map(CacheOverlay::new),
        })
    }

    pub fn with_cache(mut self, service: CacheService) -> Self {
        self.cache = Some(CacheOverlay::new(service));
        self
    }

    pub fn models(&self) -> &ModelRepository<C, ModelOf<V>> {
        &self.models
    }

    pub fn cache(&self) -> Option<&CacheOverlay<V>> {
        self.cache.as_ref()
    }

    pub fn is_cached(&self) -> bool {
        self.cache.is_some()
    }

    /// Translate `model`, through the cache when enabled
    pub async fn parse_view(
        &self,
        model: &ModelOf<V>,
        session: Option<&mut C::Session>,
    ) -> RepositoryResponse<V> {
        let mut uow = begin_unit_of_work!(self.models.context(), session);
        let write_back = uow.is_root();
        let result = self.view_in(uow.session(), model, write_back).await;
        uow.complete(result).await
    }

    /// Validate, persist, and return the stored view
    #[instrument(skip_all, fields(table = Self::TABLE))]
    pub async fn create_model(
        &self,
        view: &V,
        session: Option<&mut C::Session>,
    ) -> RepositoryResponse<V> {
        let mut uow = begin_unit_of_work!(self.models.context(), session);
        let result = self.write_in(uow.session(), view, WriteMode::Create, true).await;
        let response = uow.complete(result).await;
        self.invalidate_response(&response).await;
        response
    }

    /// Replace the stored row; `NotFound` when there is none
    #[instrument(skip_all, fields(table = Self::TABLE))]
    pub async fn edit_model(
        &self,
        view: &V,
        session: Option<&mut C::Session>,
    ) -> RepositoryResponse<V> {
        let mut uow = begin_unit_of_work!(self.models.context(), session);
        let result = self.write_in(uow.session(), view, WriteMode::Edit, true).await;
        let response = uow.complete(result).await;
        self.invalidate_response(&response).await;
        response
    }

    /// Upsert by primary key, optionally writing child rows through the view's hook
    #[instrument(skip_all, fields(table = Self::TABLE))]
    pub async fn save_model(
        &self,
        view: &V,
        save_sub_models: bool,
        session: Option<&mut C::Session>,
    ) -> RepositoryResponse<V> {
        let mut uow = begin_unit_of_work!(self.models.context(), session);
        let result = self
            .write_in(uow.session(), view, WriteMode::Upsert, save_sub_models)
            .await;
        let response = uow.complete(result).await;
        self.invalidate_response(&response).await;
        response
    }

    /// Upsert each view in order, stopping at the first failure
    #[instrument(skip_all, fields(table = Self::TABLE, count = views.len()))]
    pub async fn save_list_model(
        &self,
        views: &[V],
        save_sub_models: bool,
        session: Option<&mut C::Session>,
    ) -> RepositoryResponse<Vec<V>> {
        let mut uow = begin_unit_of_work!(self.models.context(), session);
        let mut saved = Vec::with_capacity(views.len());
        let mut failure = None;

        for (index, view) in views.iter().enumerate() {
            match self
                .write_in(uow.session(), view, WriteMode::Upsert, save_sub_models)
                .await
            {
                Ok(stored) => saved.push(stored),
                Err(e) => {
                    debug!("Batch save stopped at item {}: {}", index, e);
                    failure = Some(e);
                    break;
                }
            }
        }

        let result = match failure {
            Some(e) => Err(e),
            None => Ok(saved),
        };
        let response = uow.complete(result).await;
        if let Some(stored) = &response.data {
            for view in stored {
                self.invalidate(view.model()).await;
            }
        }
        response
    }

    #[instrument(skip_all, fields(table = Self::TABLE))]
    pub async fn get_single_model(
        &self,
        filter: &Filter,
        session: Option<&mut C::Session>,
    ) -> RepositoryResponse<V> {
        let mut uow = begin_unit_of_work!(self.models.context(), session);
        let write_back = uow.is_root();
        let result = match self.models.single_in(uow.session(), filter).await {
            Ok(model) => self.view_in(uow.session(), &model, write_back).await,
            Err(e) => Err(e),
        };
        uow.complete(result).await
    }

    #[instrument(skip_all, fields(table = Self::TABLE))]
    pub async fn get_first_model(
        &self,
        filter: &Filter,
        session: Option<&mut C::Session>,
    ) -> RepositoryResponse<V> {
        let mut uow = begin_unit_of_work!(self.models.context(), session);
        let write_back = uow.is_root();
        let result = match self.models.first_in(uow.session(), filter).await {
            Ok(model) => self.view_in(uow.session(), &model, write_back).await,
            Err(e) => Err(e),
        };
        uow.complete(result).await
    }

    pub async fn get_model_list(
        &self,
        paging: Option<&PagingRequest<ModelOf<V>>>,
        session: Option<&mut C::Session>,
    ) -> RepositoryResponse<PaginationModel<V>> {
        self.get_model_list_by(&Filter::All, paging, session).await
    }

    #[instrument(skip_all, fields(table = Self::TABLE))]
    pub async fn get_model_list_by(
        &self,
        filter: &Filter,
        paging: Option<&PagingRequest<ModelOf<V>>>,
        session: Option<&mut C::Session>,
    ) -> RepositoryResponse<PaginationModel<V>> {
        let mut uow = begin_unit_of_work!(self.models.context(), session);
        let write_back = uow.is_root();
        let result = self.list_in(uow.session(), filter, paging, write_back).await;
        uow.complete(result).await
    }

    /// Delete the row `model` identifies. With `remove_related` the view's
    /// cleanup hook must succeed first. A row already gone is not an error.
    #[instrument(skip_all, fields(table = Self::TABLE))]
    pub async fn remove_model(
        &self,
        model: &ModelOf<V>,
        remove_related: bool,
        session: Option<&mut C::Session>,
    ) -> RepositoryResponse<ModelOf<V>> {
        let mut uow = begin_unit_of_work!(self.models.context(), session);
        let response = self.remove_in(uow.session(), model, remove_related).await;
        let response = uow.complete_response(response).await;
        self.invalidate_response_model(&response).await;
        response
    }

    /// Delete the first row matching `filter`; `NotFound` when nothing matches
    #[instrument(skip_all, fields(table = Self::TABLE))]
    pub async fn remove_model_by(
        &self,
        filter: &Filter,
        remove_related: bool,
        session: Option<&mut C::Session>,
    ) -> RepositoryResponse<ModelOf<V>> {
        let mut uow = begin_unit_of_work!(self.models.context(), session);
        let response = match self.models.first_in(uow.session(), filter).await {
            Ok(model) => self.remove_in(uow.session(), &model, remove_related).await,
            Err(e) => RepositoryResponse::failure(e),
        };
        let response = uow.complete_response(response).await;
        self.invalidate_response_model(&response).await;
        response
    }

    /// Delete every matching row, stopping at the first failure. Under a root
    /// session nothing is deleted unless every row is.
    #[instrument(skip_all, fields(table = Self::TABLE))]
    pub async fn remove_list_model(
        &self,
        filter: &Filter,
        remove_related: bool,
        session: Option<&mut C::Session>,
    ) -> RepositoryResponse<Vec<ModelOf<V>>> {
        let mut uow = begin_unit_of_work!(self.models.context(), session);

        let rows = match self.models.matching_in(uow.session(), filter).await {
            Ok(rows) => rows,
            Err(e) => return uow.complete(Err(e)).await,
        };

        let mut removed = Vec::with_capacity(rows.len());
        for row in &rows {
            let response = self
                .remove_model(row, remove_related, Some(uow.session()))
                .await;
            if !response.is_succeed {
                return uow.complete_response(response.cast_failure()).await;
            }
            removed.extend(response.data);
        }

        uow.complete(Ok(removed)).await
    }

    /// Set named fields on every matching row and invalidate those rows
    #[instrument(skip_all, fields(table = Self::TABLE))]
    pub async fn update_fields(
        &self,
        filter: &Filter,
        fields: &[(&str, Value)],
        session: Option<&mut C::Session>,
    ) -> RepositoryResponse<u64> {
        let mut uow = begin_unit_of_work!(self.models.context(), session);

        // Keys of the rows about to change, for invalidation after commit
        let affected = if self.cache.is_some() {
            match self.models.matching_in(uow.session(), filter).await {
                Ok(rows) => rows,
                Err(e) => return uow.complete(Err(e)).await,
            }
        } else {
            Vec::new()
        };
        let result = self
            .models
            .update_fields_in(uow.session(), filter, fields)
            .await;

        let response = uow.complete(result).await;
        if response.is_succeed {
            for model in &affected {
                self.invalidate(model).await;
            }
        }
        response
    }

    pub async fn check_is_exists(
        &self,
        model: &ModelOf<V>,
        session: Option<&mut C::Session>,
    ) -> RepositoryResponse<bool> {
        self.models.check_is_exists(model, session).await
    }

    pub async fn max(
        &self,
        field: &str,
        filter: &Filter,
        session: Option<&mut C::Session>,
    ) -> RepositoryResponse<Value> {
        self.models.max(field, filter, session).await
    }

    pub async fn min(
        &self,
        field: &str,
        filter: &Filter,
        session: Option<&mut C::Session>,
    ) -> RepositoryResponse<Value> {
        self.models.min(field, filter, session).await
    }

    pub async fn count(
        &self,
        filter: &Filter,
        session: Option<&mut C::Session>,
    ) -> RepositoryResponse<i64> {
        self.models.count(filter, session).await
    }

    /// Drop the cached view of one row; `false` when caching is off
    pub async fn remove_cache(&self, model: &ModelOf<V>) -> RepositoryResponse<bool> {
        match &self.cache {
            Some(_) => {
                self.invalidate(model).await;
                RepositoryResponse::success(true)
            }
            None => RepositoryResponse::success(false),
        }
    }

    /// Drop every cached view of this type; `false` when caching is off
    pub async fn clear_cache(&self) -> RepositoryResponse<bool> {
        match &self.cache {
            Some(cache) => RepositoryResponse::from_result(cache.clear().await.map(|()| true)),
            None => RepositoryResponse::success(false),
        }
    }

    /// `write_back` is false under a borrowed session, whose reads may see
    /// rows the caller has not committed yet
    async fn view_in(
        &self,
        session: &mut C::Session,
        model: &ModelOf<V>,
        write_back: bool,
    ) -> Result<V> {
        match &self.cache {
            Some(cache) => cache.get_view(model, session, write_back).await?.ok_or_else(|| {
                Error::NotFound(format!(
                    "{} row {}",
                    Self::TABLE,
                    crate::cache_key::build_key(model).unwrap_or_default()
                ))
            }),
            None => V::from_model(model.clone(), session).await,
        }
    }

    async fn views_in(
        &self,
        session: &mut C::Session,
        models: &[ModelOf<V>],
        write_back: bool,
    ) -> Result<Vec<V>> {
        match &self.cache {
            Some(cache) => cache.get_views(models, session, write_back).await,
            None => {
                let mut views = Vec::with_capacity(models.len());
                for model in models {
                    views.push(V::from_model(model.clone(), session).await?);
                }
                Ok(views)
            }
        }
    }

    async fn list_in(
        &self,
        session: &mut C::Session,
        filter: &Filter,
        paging: Option<&PagingRequest<ModelOf<V>>>,
        write_back: bool,
    ) -> Result<PaginationModel<V>> {
        let page = self.models.list_in(session, filter, paging).await?;
        let items = self.views_in(session, &page.items, write_back).await?;
        Ok(PaginationModel {
            items,
            page_index: page.page_index,
            page_size: page.page_size,
            total_items: page.total_items,
            total_page: page.total_page,
        })
    }

    /// Validate, parse, persist, then rebuild the view from what was written.
    /// The rebuilt view bypasses the cache, which still holds the old row.
    async fn write_in(
        &self,
        session: &mut C::Session,
        view: &V,
        mode: WriteMode,
        save_sub_models: bool,
    ) -> Result<V> {
        let mut view = view.clone();
        view.validate(session).await?;
        let model = view.parse_model(session).await?;

        let stored = match mode {
            WriteMode::Create => self.models.create_in(session, &model).await?,
            WriteMode::Edit => self.models.edit_in(session, &model).await?,
            WriteMode::Upsert => self.models.save_in(session, &model).await?,
        };

        if save_sub_models {
            view.save_sub_models(&stored, session).await?;
        }
        V::from_model(stored, session).await
    }

    async fn remove_in(
        &self,
        session: &mut C::Session,
        model: &ModelOf<V>,
        remove_related: bool,
    ) -> RepositoryResponse<ModelOf<V>> {
        if remove_related {
            let view = match V::from_model(model.clone(), session).await {
                Ok(view) => view,
                Err(e) => return RepositoryResponse::failure(e),
            };
            let related = view.remove_related_models(session).await;
            if !related.is_succeed {
                debug!("Related model cleanup failed: {}", related.errors.join("; "));
                return related.cast_failure();
            }
        }
        RepositoryResponse::from_result(self.models.remove_in(session, model).await)
    }

    async fn invalidate(&self, model: &ModelOf<V>) {
        if let Some(cache) = &self.cache {
            cache.invalidate(model).await;
        }
    }

    async fn invalidate_response(&self, response: &RepositoryResponse<V>) {
        if let Some(view) = &response.data {
            self.invalidate(view.model()).await;
        }
    }

    async fn invalidate_response_model(&self, response: &RepositoryResponse<ModelOf<V>>) {
        if let Some(model) = &response.data {
            self.invalidate(model).await;
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum WriteMode {
    Create,
    Edit,
    Upsert,
}

impl<C: DataContext, V: View> Clone for ViewRepository<C, V> {
    fn clone(&self) -> Self {
        Self {
            models: self.models.clone(),
            cache: self.cache.clone(),
        }
    }
}
