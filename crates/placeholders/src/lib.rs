//! Prompt templating for Palaver.
//!
//! Message content goes through two passes: plain `{{ name }}` variable
//! substitution, then `{{#directive key=value ...}}` blocks dispatched to
//! registered [`Directive`] implementations which may fetch external
//! content and attach provenance.

pub mod args;
pub mod directive;
pub mod directives;
pub mod injection;
pub mod resolver;
pub mod truncation;
pub mod variables;

pub use args::{parse_arg_body, parse_args, parse_list, ArgMap, ArgValue};
pub use directive::{Directive, DirectiveOutput, ResolveContext};
pub use resolver::{PlaceholderResolver, ResolvedText};
pub use variables::substitute;
