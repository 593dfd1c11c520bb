//! Built-in directives.
//!
//! Each wraps one external capability; the host registers only those whose
//! capability is configured.

mod file;
mod knowledge;
mod snippet;
mod url;

pub use file::FileDirective;
pub use knowledge::KnowledgeDirective;
pub use snippet::SnippetDirective;
pub use url::UrlDirective;
