//! # Collections
//!
//! One `Collection` per document type ties the pieces together: it compiles
//! requests, routes them to the fast or slow connection by cached verdict,
//! short-circuits unsatisfiable filters, runs wait-for sessions and
//! subscriptions over its change bus, and keeps index metadata fresh.

mod live;
mod manager;

pub use manager::{Collection, CollectionBuilder, Explain};
