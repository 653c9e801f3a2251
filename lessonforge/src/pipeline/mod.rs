//! Generation pipelines and the status state machine they share.

pub mod quiz;
pub mod status;
pub mod video;

pub use quiz::{QuizCollaborators, QuizPipeline, QuizPipelineConfig};
pub use status::{DEFAULT_STALE_AFTER, GenerationClaim, GenerationStateMachine};
pub use video::{VideoPipeline, VideoPipelineConfig, VideoResolution};
