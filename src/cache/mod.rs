//! Cache module for storing fetched datasets and retry markers on disk
//!
//! The store only records when an entry was written. Whether an entry is still
//! usable is decided by the caller, which passes the maximum age it accepts.

mod manager;

pub use manager::{CacheError, CacheManager, CachedData};
