pub mod echo;
pub mod registry;
pub mod traits;

// Re-exports for convenience.
pub use echo::EchoProvider;
pub use registry::{ProviderRegistry, ResolvedModel};
pub use traits::{ChatRequest, LlmProvider};
