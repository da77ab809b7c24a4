pub mod match_store;
pub mod window;

pub use match_store::{CachePartition, MatchStore, StatusFilter, UpsertStats};
pub use window::{CleanupReport, CoverageReport, CoverageStatus, TemporalWindow};
