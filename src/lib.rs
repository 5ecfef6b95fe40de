//! Code Checker analysis engine
//!
//! Accepts code-analysis requests, runs them through a bounded pool of workers,
//! and races several calls to an OpenAI-compatible API per request, keeping the
//! first valid JSON result. Request status changes are persisted in PostgreSQL
//! and pushed to WebSocket subscribers.

pub mod app_state;
pub mod config;
pub mod db;
pub mod models;
pub mod routes;
pub mod services;
