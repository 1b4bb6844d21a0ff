//! Session management: catalog lifecycle, script acquisition, retry policy

pub mod manager;
pub mod source;

pub use manager::{Session, SessionConfig, SessionState};
pub use source::{HttpScriptSource, PlayerState, ScriptSource};
