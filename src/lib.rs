//! feedroll - a personal RSS/Atom aggregator
//!
//! Feeds are fetched concurrently, parsed into normalized entries and merged
//! into SQLite keyed on entry link. A small axum app serves the categories,
//! feeds and entries as JSON plus an HTML overview.

pub mod config;
pub mod db;
pub mod error;
pub mod favicon;
pub mod fetcher;
pub mod freshness;
pub mod ingest;
pub mod ordering;
pub mod parser;
pub mod reconcile;
pub mod routes;
