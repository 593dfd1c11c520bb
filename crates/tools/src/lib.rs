//! Model-invocable tools for Palaver.
//!
//! - [`ToolRegistry`]: static tools plus per-conversation dynamic tools
//!   that expire after a fixed TTL
//! - [`ToolMemory`]: provenance recorded by tool executions during a turn
//! - built-in `fetch_url` and knowledge-search tools

pub mod knowledge;
pub mod memory;
pub mod registry;
pub mod tool;
pub mod web_fetch;

pub use knowledge::KnowledgeSearchTool;
pub use memory::{ToolMemory, ToolMemoryEntry};
pub use registry::{tool_definitions, ToolRegistry};
pub use tool::{Tool, ToolContext, ToolErrorPolicy};
pub use web_fetch::{FetchUrlTool, HttpUrlFetcher};
