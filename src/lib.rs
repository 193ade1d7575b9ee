//! Website analytics reporting over a DuckDB `events` table.
//!
//! [`query`] compiles user filters, aligns time buckets, counts funnel steps
//! and runs the report aggregations; [`api`] and [`server`] expose them over
//! HTTP.

pub mod api;
pub mod config;
pub mod query;
pub mod server;
pub mod storage;
