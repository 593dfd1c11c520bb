//! Shared domain types for Palaver: errors, provenance, provider-agnostic
//! messages and stream events, external capability traits, trace events
//! and configuration.

pub mod capability;
pub mod config;
pub mod error;
pub mod provenance;
pub mod stream;
pub mod tool;
pub mod trace;
