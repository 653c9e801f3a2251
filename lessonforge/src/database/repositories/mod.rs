//! Repository layer.

pub mod chapter;

pub use chapter::{ChapterStore, SqlxChapterStore};
