//! In-process caching.
//!
//! - [`SingleFlightCache`]: TTL cache with per-key request deduplication
//! - [`CacheSweeper`]: background task that evicts expired entries

pub mod single_flight;
pub mod sweeper;

pub use single_flight::{CacheStats, SingleFlightCache};
pub use sweeper::{CacheSweeper, Sweepable};
