//! DQ Engine - resilient execution of data-quality validation rules
//!
//! Runs SQL validation rules against sqlite, postgres or mysql backends
//! (with read replicas and sharding), shielded by circuit breakers, a
//! two-tier result cache and a persistent job queue. Also moves data
//! between backends with resumable, cancellable migrations.

#![allow(missing_docs)]

pub mod api;
pub mod app;
pub mod boot;
pub mod cache;
pub mod circuit_breaker;
pub mod cli;
pub mod commands;
pub mod config;
pub mod database;
pub mod environment;
pub mod executor;
pub mod migration;
pub mod queue;
pub mod router;
pub mod setup_tracing;
pub mod store;
