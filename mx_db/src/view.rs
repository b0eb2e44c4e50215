//! ABOUTME: Contract between a stored model and the view callers consume
//! ABOUTME: Translation and lifecycle hooks are supplied by each view type

use crate::response::RepositoryResponse;
use crate::schema::Entity;
use crate::session::DataSession;
use async_trait::async_trait;
use mx_core::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Caller-facing projection of one model row.
///
/// Every view carries the model it was built from. Views are serialized into
/// the cache, so they must round-trip through JSON.
pub trait View: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    type Model: Entity;

    fn model(&self) -> &Self::Model;

    /// `false` for content that must not be shared between callers
    fn is_cache(&self) -> bool {
        true
    }
}

/// Hooks a view type implements for a particular data session type.
///
/// Every hook runs inside the repository call's session, so related reads and
/// writes join the same transaction.
#[async_trait]
pub trait ViewModel<S: DataSession>: View {
    /// Build the view from a freshly read model
    async fn from_model(model: Self::Model, session: &mut S) -> Result<Self>;

    /// Produce the model to persist
    async fn parse_model(&mut self, _session: &mut S) -> Result<Self::Model> {
        Ok(self.model().clone())
    }

    /// Re-resolve relation-bound fields of a view served from cache
    async fn expand_view(&mut self, _session: &mut S) -> Result<()> {
        Ok(())
    }

    /// Reject the view before anything is written
    async fn validate(&mut self, _session: &mut S) -> Result<()> {
        Ok(())
    }

    /// Persist child rows after `parent` was written
    async fn save_sub_models(&mut self, _parent: &Self::Model, _session: &mut S) -> Result<()> {
        Ok(())
    }

    /// Clean up dependent rows before this view's model is deleted
    async fn remove_related_models(&self, _session: &mut S) -> RepositoryResponse<bool> {
        RepositoryResponse::success(true)
    }
}
