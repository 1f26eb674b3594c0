//! Windowgate - Per-identity request rate limiting
//!
//! This crate counts requests per identity in fixed time windows and reports
//! the remaining quota, reset time and retry delay for each hit. Counts live
//! in a pluggable store: a process-local map, or Redis when several
//! processes must share one quota.

pub mod config;
pub mod error;
pub mod middleware;
pub mod ratelimit;
