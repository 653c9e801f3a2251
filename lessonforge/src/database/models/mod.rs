//! Database models.

pub mod chapter;
pub mod generation;
pub mod question;

pub use chapter::ChapterDbModel;
pub use generation::GenerationStateDbModel;
pub use question::QuestionDbModel;
