//! Application services.

pub mod container;
pub mod generation;

pub use container::{ServiceContainer, Upstreams};
pub use generation::{GenerationService, QuickVideoResponse, VideoResponse};
