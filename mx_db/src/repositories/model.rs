//! ABOUTME: Generic CRUD, query, and aggregate operations over one entity type
//! ABOUTME: No view translation and no cache; every call runs in a unit of work

use crate::cache_key::key_filter;
use crate::query::{Aggregate, Filter, OrderBy, PaginationModel, PagingRequest, Query};
use crate::response::RepositoryResponse;
use crate::schema::{Entity, EntitySchema, Value};
use crate::session::{DataContext, DataSession};
use crate::unit_of_work::begin_unit_of_work;
use mx_config::RepositoryConfig;
use mx_core::{Error, Result};
use tracing::{debug, instrument};

/// Repository for the raw entity `E`.
///
/// Every operation takes an optional caller session. With `None` the call
/// opens, commits or rolls back its own transaction; with `Some` it joins the
/// caller's transaction and leaves commit to the caller.
pub struct ModelRepository<C: DataContext, E: Entity> {
    context: C,
    default_order: OrderBy<E>,
    default_page_size: Option<i64>,
}

impl<C: DataContext, E: Entity> ModelRepository<C, E> {
    /// Fails when the entity descriptor is inconsistent
    pub fn new(context: C) -> Result<Self> {
        EntitySchema::<E>::validate()?;
        let first_key = E::PRIMARY_KEY
            .first()
            .ok_or_else(|| Error::Validation(format!("'{}' has no primary key", E::TABLE)))?;

        Ok(Self {
            context,
            default_order: OrderBy::asc(first_key)?,
            default_page_size: None,
        })
    }

    pub fn with_config(context: C, config: &RepositoryConfig) -> Result<Self> {
        let mut repo = Self::new(context)?;
        repo.default_page_size = config.default_page_size;
        Ok(repo)
    }

    pub fn context(&self) -> &C {
        &self.context
    }

    /// Ordering used when a list request names none: first key field, ascending
    pub fn default_order(&self) -> &OrderBy<E> {
        &self.default_order
    }

    /// Page `page_index` at the configured default size, or everything when none is set
    pub fn page_request(&self, page_index: i64) -> PagingRequest<E> {
        match self.default_page_size {
            Some(size) => PagingRequest::page(None, size, page_index),
            None => PagingRequest::window(None, None, None),
        }
    }

    #[instrument(skip_all, fields(table = E::TABLE))]
    pub async fn create_model(
        &self,
        model: &E,
        session: Option<&mut C::Session>,
    ) -> RepositoryResponse<E> {
        let mut uow = begin_unit_of_work!(&self.context, session);
        let result = self.create_in(uow.session(), model).await;
        uow.complete(result).await
    }

    /// Replace the stored row with the same key; `NotFound` when there is none
    #[instrument(skip_all, fields(table = E::TABLE))]
    pub async fn edit_model(
        &self,
        model: &E,
        session: Option<&mut C::Session>,
    ) -> RepositoryResponse<E> {
        let mut uow = begin_unit_of_work!(&self.context, session);
        let result = self.edit_in(uow.session(), model).await;
        uow.complete(result).await
    }

    /// Edit when a row with the same key exists, create otherwise
    #[instrument(skip_all, fields(table = E::TABLE))]
    pub async fn save_model(
        &self,
        model: &E,
        session: Option<&mut C::Session>,
    ) -> RepositoryResponse<E> {
        let mut uow = begin_unit_of_work!(&self.context, session);
        let result = self.save_in(uow.session(), model).await;
        uow.complete(result).await
    }

    pub async fn check_is_exists(
        &self,
        model: &E,
        session: Option<&mut C::Session>,
    ) -> RepositoryResponse<bool> {
        let mut uow = begin_unit_of_work!(&self.context, session);
        let result = self.exists_in(uow.session(), model).await;
        uow.complete(result).await
    }

    /// The only row matching `filter`; fails on zero or several matches
    #[instrument(skip_all, fields(table = E::TABLE))]
    pub async fn get_single_model(
        &self,
        filter: &Filter,
        session: Option<&mut C::Session>,
    ) -> RepositoryResponse<E> {
        let mut uow = begin_unit_of_work!(&self.context, session);
        let result = self.single_in(uow.session(), filter).await;
        uow.complete(result).await
    }

    /// First row matching `filter` in default order
    #[instrument(skip_all, fields(table = E::TABLE))]
    pub async fn get_first_model(
        &self,
        filter: &Filter,
        session: Option<&mut C::Session>,
    ) -> RepositoryResponse<E> {
        let mut uow = begin_unit_of_work!(&self.context, session);
        let result = self.first_in(uow.session(), filter).await;
        uow.complete(result).await
    }

    pub async fn get_model_list(
        &self,
        paging: Option<&PagingRequest<E>>,
        session: Option<&mut C::Session>,
    ) -> RepositoryResponse<PaginationModel<E>> {
        self.get_model_list_by(&Filter::All, paging, session).await
    }

    #[instrument(skip_all, fields(table = E::TABLE))]
    pub async fn get_model_list_by(
        &self,
        filter: &Filter,
        paging: Option<&PagingRequest<E>>,
        session: Option<&mut C::Session>,
    ) -> RepositoryResponse<PaginationModel<E>> {
        let mut uow = begin_unit_of_work!(&self.context, session);
        let result = self.list_in(uow.session(), filter, paging).await;
        uow.complete(result).await
    }

    /// Delete the row `model` identifies. A row that is already gone is not an error.
    #[instrument(skip_all, fields(table = E::TABLE))]
    pub async fn remove_model(
        &self,
        model: &E,
        session: Option<&mut C::Session>,
    ) -> RepositoryResponse<E> {
        let mut uow = begin_unit_of_work!(&self.context, session);
        let result = self.remove_in(uow.session(), model).await;
        uow.complete(result).await
    }

    /// Delete the first row matching `filter`; `NotFound` when nothing matches
    #[instrument(skip_all, fields(table = E::TABLE))]
    pub async fn remove_model_by(
        &self,
        filter: &Filter,
        session: Option<&mut C::Session>,
    ) -> RepositoryResponse<E> {
        let mut uow = begin_unit_of_work!(&self.context, session);
        let result = match self.first_in(uow.session(), filter).await {
            Ok(model) => self.remove_in(uow.session(), &model).await,
            Err(e) => Err(e),
        };
        uow.complete(result).await
    }

    /// Delete every row matching `filter` and return them
    #[instrument(skip_all, fields(table = E::TABLE))]
    pub async fn remove_list_model(
        &self,
        filter: &Filter,
        session: Option<&mut C::Session>,
    ) -> RepositoryResponse<Vec<E>> {
        let mut uow = begin_unit_of_work!(&self.context, session);
        let result = self.remove_all_in(uow.session(), filter).await;
        uow.complete(result).await
    }

    /// Largest non-null `field` among matching rows; `Value::Null` when none
    pub async fn max(
        &self,
        field: &str,
        filter: &Filter,
        session: Option<&mut C::Session>,
    ) -> RepositoryResponse<Value> {
        self.aggregate(Aggregate::Max, field, filter, session).await
    }

    /// Smallest non-null `field` among matching rows; `Value::Null` when none
    pub async fn min(
        &self,
        field: &str,
        filter: &Filter,
        session: Option<&mut C::Session>,
    ) -> RepositoryResponse<Value> {
        self.aggregate(Aggregate::Min, field, filter, session).await
    }

    pub async fn count(
        &self,
        filter: &Filter,
        session: Option<&mut C::Session>,
    ) -> RepositoryResponse<i64> {
        let mut uow = begin_unit_of_work!(&self.context, session);
        let result = self.count_in(uow.session(), filter).await;
        uow.complete(result).await
    }

    /// Set named fields on every matching row; returns rows affected
    #[instrument(skip_all, fields(table = E::TABLE))]
    pub async fn update_fields(
        &self,
        filter: &Filter,
        fields: &[(&str, Value)],
        session: Option<&mut C::Session>,
    ) -> RepositoryResponse<u64> {
        let mut uow = begin_unit_of_work!(&self.context, session);
        let result = self.update_fields_in(uow.session(), filter, fields).await;
        uow.complete(result).await
    }

    async fn aggregate(
        &self,
        aggregate: Aggregate,
        field: &str,
        filter: &Filter,
        session: Option<&mut C::Session>,
    ) -> RepositoryResponse<Value> {
        let mut uow = begin_unit_of_work!(&self.context, session);
        let result = self.aggregate_in(uow.session(), aggregate, field, filter).await;
        uow.complete(result).await
    }

    pub(crate) async fn create_in(&self, session: &mut C::Session, model: &E) -> Result<E> {
        session.insert(model).await?;
        debug!("Created {} row", E::TABLE);
        Ok(model.clone())
    }

    pub(crate) async fn edit_in(&self, session: &mut C::Session, model: &E) -> Result<E> {
        if session.update(model).await? == 0 {
            return Err(Error::NotFound(format!(
                "{} row {}",
                E::TABLE,
                crate::cache_key::build_key(model)?
            )));
        }
        Ok(model.clone())
    }

    pub(crate) async fn exists_in(&self, session: &mut C::Session, model: &E) -> Result<bool> {
        Ok(session.count::<E>(&key_filter(model)?).await? > 0)
    }

    pub(crate) async fn save_in(&self, session: &mut C::Session, model: &E) -> Result<E> {
        if self.exists_in(session, model).await? {
            self.edit_in(session, model).await
        } else {
            self.create_in(session, model).await
        }
    }

    pub(crate) async fn single_in(&self, session: &mut C::Session, filter: &Filter) -> Result<E> {
        filter.validate::<E>()?;
        let query = Query::new(filter.clone()).order_by(self.default_order.clone()).take(2);
        let mut rows = session.fetch(&query).await?;
        match rows.len() {
            0 => Err(Error::NotFound(format!("no {} row matches", E::TABLE))),
            1 => Ok(rows.remove(0)),
            _ => Err(Error::Validation(format!(
                "more than one {} row matches",
                E::TABLE
            ))),
        }
    }

    pub(crate) async fn first_in(&self, session: &mut C::Session, filter: &Filter) -> Result<E> {
        filter.validate::<E>()?;
        let query = Query::new(filter.clone()).order_by(self.default_order.clone()).take(1);
        session
            .fetch(&query)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::NotFound(format!("no {} row matches", E::TABLE)))
    }

    pub(crate) async fn list_in(
        &self,
        session: &mut C::Session,
        filter: &Filter,
        paging: Option<&PagingRequest<E>>,
    ) -> Result<PaginationModel<E>> {
        filter.validate::<E>()?;
        let total = session.count::<E>(filter).await?;
        let query = Query::new(filter.clone());

        let (query, page_index, page_size) = match paging {
            Some(request) if request.is_paged() => (
                request.apply(query, &self.default_order),
                request.page_index.max(0),
                request.page_size,
            ),
            Some(request) => (request.apply(query, &self.default_order), 0, None),
            None => (query.order_by(self.default_order.clone()), 0, None),
        };

        let items = session.fetch(&query).await?;
        debug!("Listed {} of {} {} rows", items.len(), total, E::TABLE);
        Ok(PaginationModel::new(items, page_index, page_size, total))
    }

    pub(crate) async fn remove_in(&self, session: &mut C::Session, model: &E) -> Result<E> {
        let removed = session.delete::<E>(&key_filter(model)?).await?;
        if removed == 0 {
            debug!("{} row already removed", E::TABLE);
        }
        Ok(model.clone())
    }

    /// Every row matching `filter`, in default order
    pub(crate) async fn matching_in(
        &self,
        session: &mut C::Session,
        filter: &Filter,
    ) -> Result<Vec<E>> {
        filter.validate::<E>()?;
        let query = Query::new(filter.clone()).order_by(self.default_order.clone());
        session.fetch(&query).await
    }

    pub(crate) async fn remove_all_in(
        &self,
        session: &mut C::Session,
        filter: &Filter,
    ) -> Result<Vec<E>> {
        let rows = self.matching_in(session, filter).await?;
        for row in &rows {
            self.remove_in(session, row).await?;
        }
        Ok(rows)
    }

    pub(crate) async fn count_in(&self, session: &mut C::Session, filter: &Filter) -> Result<i64> {
        filter.validate::<E>()?;
        session.count::<E>(filter).await
    }

    pub(crate) async fn aggregate_in(
        &self,
        session: &mut C::Session,
        aggregate: Aggregate,
        field: &str,
        filter: &Filter,
    ) -> Result<Value> {
        EntitySchema::<E>::require_field(field)?;
        filter.validate::<E>()?;
        session.aggregate::<E>(aggregate, field, filter).await
    }

    pub(crate) async fn update_fields_in(
        &self,
        session: &mut C::Session,
        filter: &Filter,
        fields: &[(&str, Value)],
    ) -> Result<u64> {
        filter.validate::<E>()?;
        for (name, value) in fields {
            EntitySchema::<E>::check_assignment(name, value)?;
        }
        session.update_fields::<E>(filter, fields).await
    }
}

impl<C: DataContext, E: Entity> Clone for ModelRepository<C, E> {
    fn clone(&self) -> Self {
        Self {
            context: self.context.clone(),
            default_order: self.default_order.clone(),
            default_page_size: self.default_page_size,
        }
    }
}
