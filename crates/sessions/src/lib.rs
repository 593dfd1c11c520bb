//! Session management for Palaver.
//!
//! Sessions hold the append-only message history of one conversation, the
//! template state carried between turns, and the organisation that owns them.

pub mod store;

pub use store::{
    ChatMessage, ChatRole, MessageMeta, MessagePatch, Session, SessionContext, SessionPatch,
    SessionState, SessionStore,
};
pub use store::seconds_saturating;
