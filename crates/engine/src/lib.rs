//! Palaver engine: turns a stored chat session plus a prompt template into
//! one streamed, tool-using model turn with aggregated provenance.

pub mod bootstrap;
pub mod cli;
pub mod runtime;
pub mod state;

pub use state::Engine;
