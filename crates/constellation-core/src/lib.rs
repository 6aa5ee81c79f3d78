//! Constellation core: an access-control broker for MCP servers speaking
//! line-delimited JSON-RPC 2.0 over stdio.
//!
//! The broker sits between a client and a spawned backend server. Every
//! `tools/call` request is evaluated against a declarative rule set before
//! it reaches the backend, `tools/list` responses are filtered down to the
//! allowed tools, every decision lands in a structured audit trail, and the
//! backend's environment is assembled from pluggable secret providers so
//! credentials never appear in the policy file.
//!
//! Module map:
//!
//! - [`config`] - policy file types, loading, validation
//! - [`policy`] - glob matcher and rule evaluation engine
//! - [`secrets`] - provider registry and reference resolution
//! - [`audit`] - NDJSON audit logger and redaction helper
//! - [`proxy`] - child process lifecycle and the two relay loops

pub mod audit;
pub mod config;
pub mod policy;
pub mod proxy;
pub mod secrets;
