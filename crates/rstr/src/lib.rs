//! rstr - a content addressable blob store with an HTTP interface
//!
//! This library provides:
//! - `web`: axum router for upload, fetch, check and delete
//! - `serve`: server startup and graceful shutdown
//! - `commands`: offline CLI commands against a local store
//! - `config`: bridge from `rstrconf` settings to the store
//! - `error`: store errors as HTTP responses
//! - `range`: `Range` header handling
//! - `telemetry`: tracing setup

pub mod commands;
pub mod config;
pub mod error;
pub mod range;
pub mod serve;
pub mod telemetry;
pub mod web;
