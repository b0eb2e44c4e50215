//! ABOUTME: Synchronous facades over the async repositories
//! ABOUTME: Each facade drives its repository on an owned current-thread runtime

use crate::query::{Filter, PaginationModel, PagingRequest};
use crate::repositories::{ModelRepository, ViewRepository};
use crate::response::RepositoryResponse;
use crate::schema::{Entity, Value};
use crate::session::{DataContext, DataSession};
use crate::view::{View, ViewModel};
use mx_core::{Error, Result};
use std::future::Future;
use tokio::runtime::{Builder, Runtime};

type ModelOf<V> = <V as View>::Model;

fn current_thread_runtime() -> Result<Runtime> {
    Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| Error::Config(format!("Failed to build blocking runtime: {}", e)))
}

/// Must not be used from inside an async context; `block_on` would panic there.
pub struct BlockingModelRepository<C: DataContext, E: Entity> {
    runtime: Runtime,
    repo: ModelRepository<C, E>,
}

impl<C: DataContext, E: Entity> BlockingModelRepository<C, E> {
    pub fn new(repo: ModelRepository<C, E>) -> Result<Self> {
        Ok(Self::with_runtime(current_thread_runtime()?, repo))
    }

    pub fn with_runtime(runtime: Runtime, repo: ModelRepository<C, E>) -> Self {
        Self { runtime, repo }
    }

    /// Run an async constructor (a database connect, for example) on the facade's runtime
    pub fn build<F, Fut>(build: F) -> Result<Self>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<ModelRepository<C, E>>>,
    {
        let runtime = current_thread_runtime()?;
        let repo = runtime.block_on(build())?;
        Ok(Self::with_runtime(runtime, repo))
    }

    pub fn inner(&self) -> &ModelRepository<C, E> {
        &self.repo
    }

    /// Open a session the caller threads through several calls
    pub fn begin_session(&self) -> Result<C::Session> {
        self.runtime.block_on(self.repo.context().begin())
    }

    pub fn commit(&self, session: C::Session) -> Result<()> {
        self.runtime.block_on(session.commit())
    }

    pub fn rollback(&self, session: C::Session) -> Result<()> {
        self.runtime.block_on(session.rollback())
    }

    pub fn create_model(&self, model: &E, session: Option<&mut C::Session>) -> RepositoryResponse<E> {
        self.runtime.block_on(self.repo.create_model(model, session))
    }

    pub fn edit_model(&self, model: &E, session: Option<&mut C::Session>) -> RepositoryResponse<E> {
        self.runtime.block_on(self.repo.edit_model(model, session))
    }

    pub fn save_model(&self, model: &E, session: Option<&mut C::Session>) -> RepositoryResponse<E> {
        self.runtime.block_on(self.repo.save_model(model, session))
    }

    pub fn check_is_exists(
        &self,
        model: &E,
        session: Option<&mut C::Session>,
    ) -> RepositoryResponse<bool> {
        self.runtime.block_on(self.repo.check_is_exists(model, session))
    }

    pub fn get_single_model(
        &self,
        filter: &Filter,
        session: Option<&mut C::Session>,
    ) -> RepositoryResponse<E> {
        self.runtime.block_on(self.repo.get_single_model(filter, session))
    }

    pub fn get_first_model(
        &self,
        filter: &Filter,
        session: Option<&mut C::Session>,
    ) -> RepositoryResponse<E> {
        self.runtime.block_on(self.repo.get_first_model(filter, session))
    }

    pub fn get_model_list(
        &self,
        paging: Option<&PagingRequest<E>>,
        session: Option<&mut C::Session>,
    ) -> RepositoryResponse<PaginationModel<E>> {
        self.runtime.block_on(self.repo.get_model_list(paging, session))
    }

    pub fn get_model_list_by(
        &self,
        filter: &Filter,
        paging: Option<&PagingRequest<E>>,
        session: Option<&mut C::Session>,
    ) -> RepositoryResponse<PaginationModel<E>> {
        self.runtime
            .block_on(self.repo.get_model_list_by(filter, paging, session))
    }

    pub fn remove_model(&self, model: &E, session: Option<&mut C::Session>) -> RepositoryResponse<E> {
        self.runtime.block_on(self.repo.remove_model(model, session))
    }

    pub fn remove_model_by(
        &self,
        filter: &Filter,
        session: Option<&mut C::Session>,
    ) -> RepositoryResponse<E> {
        self.runtime.block_on(self.repo.remove_model_by(filter, session))
    }

    pub fn remove_list_model(
        &self,
        filter: &Filter,
        session: Option<&mut C::Session>,
    ) -> RepositoryResponse<Vec<E>> {
        self.runtime.block_on(self.repo.remove_list_model(filter, session))
    }

    pub fn max(
        &self,
        field: &str,
        filter: &Filter,
        session: Option<&mut C::Session>,
    ) -> RepositoryResponse<Value> {
        self.runtime.block_on(self.repo.max(field, filter, session))
    }

    pub fn min(
        &self,
        field: &str,
        filter: &Filter,
        session: Option<&mut C::Session>,
    ) -> RepositoryResponse<Value> {
        self.runtime.block_on(self.repo.min(field, filter, session))
    }

    pub fn count(&self, filter: &Filter, session: Option<&mut C::Session>) -> RepositoryResponse<i64> {
        self.runtime.block_on(self.repo.count(filter, session))
    }

    pub fn update_fields(
        &self,
        filter: &Filter,
        fields: &[(&str, Value)],
        session: Option<&mut C::Session>,
    ) -> RepositoryResponse<u64> {
        self.runtime
            .block_on(self.repo.update_fields(filter, fields, session))
    }
}

/// Synchronous view repository.
///
/// Build the cache service inside [`BlockingViewRepository::build`] so its
/// write queue runs on this facade's runtime; queued writes progress while a
/// call is blocking.
pub struct BlockingViewRepository<C: DataContext, V: View> {
    runtime: Runtime,
    repo: ViewRepository<C, V>,
}

impl<C, V> BlockingViewRepository<C, V>
where
    C: DataContext,
    V: ViewModel<C::Session>,
{
    pub fn new(repo: ViewRepository<C, V>) -> Result<Self> {
        Ok(Self::with_runtime(current_thread_runtime()?, repo))
    }

    pub fn with_runtime(runtime: Runtime, repo: ViewRepository<C, V>) -> Self {
        Self { runtime, repo }
    }

    pub fn build<F, Fut>(build: F) -> Result<Self>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<ViewRepository<C, V>>>,
    {
        let runtime = current_thread_runtime()?;
        let repo = runtime.block_on(build())?;
        Ok(Self::with_runtime(runtime, repo))
    }

    pub fn inner(&self) -> &ViewRepository<C, V> {
        &self.repo
    }

    pub fn begin_session(&self) -> Result<C::Session> {
        self.runtime.block_on(self.repo.models().context().begin())
    }

    pub fn commit(&self, session: C::Session) -> Result<()> {
        self.runtime.block_on(session.commit())
    }

    pub fn rollback(&self, session: C::Session) -> Result<()> {
        self.runtime.block_on(session.rollback())
    }

    /// Wait for queued cache writes; a no-op without a cache
    pub fn flush_cache(&self) {
        if let Some(cache) = self.repo.cache() {
            self.runtime.block_on(cache.service().flush());
        }
    }

    pub fn parse_view(
        &self,
        model: &ModelOf<V>,
        session: Option<&mut C::Session>,
    ) -> RepositoryResponse<V> {
        self.runtime.block_on(self.repo.parse_view(model, session))
    }

    pub fn create_model(&self, view: &V, session: Option<&mut C::Session>) -> RepositoryResponse<V> {
        self.runtime.block_on(self.repo.create_model(view, session))
    }

    pub fn edit_model(&self, view: &V, session: Option<&mut C::Session>) -> RepositoryResponse<V> {
        self.runtime.block_on(self.repo.edit_model(view, session))
    }

    pub fn save_model(
        &self,
        view: &V,
        save_sub_models: bool,
        session: Option<&mut C::Session>,
    ) -> RepositoryResponse<V> {
        self.runtime
            .block_on(self.repo.save_model(view, save_sub_models, session))
    }

    pub fn save_list_model(
        &self,
        views: &[V],
        save_sub_models: bool,
        session: Option<&mut C::Session>,
    ) -> RepositoryResponse<Vec<V>> {
        self.runtime
            .block_on(self.repo.save_list_model(views, save_sub_models, session))
    }

    pub fn get_single_model(
        &self,
        filter: &Filter,
        session: Option<&mut C::Session>,
    ) -> RepositoryResponse<V> {
        self.runtime.block_on(self.repo.get_single_model(filter, session))
    }

    pub fn get_first_model(
        &self,
        filter: &Filter,
        session: Option<&mut C::Session>,
    ) -> RepositoryResponse<V> {
        self.runtime.block_on(self.repo.get_first_model(filter, session))
    }

    pub fn get_model_list(
        &self,
        paging: Option<&PagingRequest<ModelOf<V>>>,
        session: Option<&mut C::Session>,
    ) -> RepositoryResponse<PaginationModel<V>> {
        self.runtime.block_on(self.repo.get_model_list(paging, session))
    }

    pub fn get_model_list_by(
        &self,
        filter: &Filter,
        paging: Option<&PagingRequest<ModelOf<V>>>,
        session: Option<&mut C::Session>,
    ) -> RepositoryResponse<PaginationModel<V>> {
        self.runtime
            .block_on(self.repo.get_model_list_by(filter, paging, session))
    }

    pub fn remove_model(
        &self,
        model: &ModelOf<V>,
        remove_related: bool,
        session: Option<&mut C::Session>,
    ) -> RepositoryResponse<ModelOf<V>> {
        self.runtime
            .block_on(self.repo.remove_model(model, remove_related, session))
    }

    pub fn remove_model_by(
        &self,
        filter: &Filter,
        remove_related: bool,
        session: Option<&mut C::Session>,
    ) -> RepositoryResponse<ModelOf<V>> {
        self.runtime
            .block_on(self.repo.remove_model_by(filter, remove_related, session))
    }

    pub fn remove_list_model(
        &self,
        filter: &Filter,
        remove_related: bool,
        session: Option<&mut C::Session>,
    ) -> RepositoryResponse<Vec<ModelOf<V>>> {
        self.runtime
            .block_on(self.repo.remove_list_model(filter, remove_related, session))
    }

    pub fn update_fields(
        &self,
        filter: &Filter,
        fields: &[(&str, Value)],
        session: Option<&mut C::Session>,
    ) -> RepositoryResponse<u64> {
        self.runtime
            .block_on(self.repo.update_fields(filter, fields, session))
    }

    pub fn check_is_exists(
        &self,
        model: &ModelOf<V>,
        session: Option<&mut C::Session>,
    ) -> RepositoryResponse<bool> {
        self.runtime.block_on(self.repo.check_is_exists(model, session))
    }

    pub fn max(
        &self,
        field: &str,
        filter: &Filter,
        session: Option<&mut C::Session>,
    ) -> RepositoryResponse<Value> {
        self.runtime.block_on(self.repo.max(field, filter, session))
    }

    pub fn min(
        &self,
        field: &str,
        filter: &Filter,
        session: Option<&mut C::Session>,
    ) -> RepositoryResponse<Value> {
        self.runtime.block_on(self.repo.min(field, filter, session))
    }

    pub fn count(&self, filter: &Filter, session: Option<&mut C::Session>) -> RepositoryResponse<i64> {
        self.runtime.block_on(self.repo.count(filter, session))
    }

    pub fn remove_cache(&self, model: &ModelOf<V>) -> RepositoryResponse<bool> {
        self.runtime.block_on(self.repo.remove_cache(model))
    }

    pub fn clear_cache(&self) -> RepositoryResponse<bool> {
        self.runtime.block_on(self.repo.clear_cache())
    }
}
