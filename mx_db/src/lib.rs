//! ABOUTME: Generic repository layer with unit-of-work sessions and a view cache
//! ABOUTME: Model and view repositories over SQLite or in-memory data sessions

pub mod blocking;
pub mod cache;
pub mod cache_key;
pub mod cache_overlay;
pub mod metrics;
pub mod query;
pub mod repositories;
pub mod response;
pub mod schema;
pub mod session;
pub mod unit_of_work;
pub mod view;

pub use blocking::{BlockingModelRepository, BlockingViewRepository};
pub use cache::{CacheService, CacheStore, FileCacheStore, MemoryCacheStore};
pub use cache_key::{build_key, cache_folder, key_filter};
pub use cache_overlay::CacheOverlay;
pub use metrics::CacheMetrics;
pub use query::{Filter, OrderBy, PaginationModel, PagingRequest, Query, SortDirection};
pub use repositories::{ModelRepository, ViewRepository};
pub use response::RepositoryResponse;
pub use schema::{Entity, EntitySchema, Field, FieldKind, Value};
pub use session::memory::{MemoryContext, MemorySession};
pub use session::sqlite::{SqliteContext, SqliteSession};
pub use session::{DataContext, DataSession};
pub use unit_of_work::UnitOfWork;
pub use view::{View, ViewModel};
