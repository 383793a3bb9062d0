//! qindex - filter compiler and live-query engine for document-store indexes
//!
//! Client filters over a typed schema are compiled into parameterized store
//! queries, classified as index-backed ("fast") or full-scan ("slow") and
//! routed accordingly. Live queries wait for the first matching document,
//! whether it already exists or is ingested later.
//!
//! - `schema`: type arena describing collections and their fields
//! - `query`: filter, selection and aggregation compilers plus an in-memory
//!   predicate that agrees with them
//! - `classifier`: fast/slow verdicts cached per collection
//! - `store`: document store seam and an in-memory implementation
//! - `realtime`: change bus, wait-for sessions and subscriptions
//! - `collection`: the per-collection façade tying these together

pub mod auth;
pub mod classifier;
pub mod cli;
pub mod collection;
pub mod config;
pub mod observability;
pub mod query;
pub mod realtime;
pub mod schema;
pub mod store;
