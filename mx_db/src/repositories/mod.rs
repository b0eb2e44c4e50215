//! ABOUTME: Generic repositories over any data context
//! ABOUTME: Model repositories work on raw entities, view repositories add translation and caching

pub mod model;
pub mod view;

pub use model::ModelRepository;
pub use view::ViewRepository;
