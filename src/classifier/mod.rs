//! # Fast/slow classification
//!
//! Decides which store connection a compiled query goes to. Verdicts come
//! from a `SlowDetector` and are cached per collection in a
//! `FastQueryCache`, which is invalidated wholesale whenever the store's
//! index set changes.

mod cache;
mod detector;

pub use cache::{CacheKey, FastQueryCache};
pub use detector::{DetectorInput, IndexedFieldsDetector, SlowDetector};
