//! # descramble
//!
//! Decipher engine for obfuscated stream URLs: compiles the signature
//! cipher and n-parameter transform out of a platform's minified player
//! script, then replays them over protected values.
//!
//! The [`decipher`] module holds the pattern catalog, the extractor that
//! binds it to a concrete script release, the statement interpreter for
//! table ciphers and the execution engine. The [`session`] module keeps one
//! compiled catalog alive across callers, reloading it single-flight when
//! it goes stale. [`utils::url`] rebuilds playable URLs from deciphered
//! values.
//!
//! ## Example
//!
//! ```no_run
//! use descramble::{HttpScriptSource, Session};
//!
//! # async fn run() -> Result<(), descramble::DescrambleError> {
//! let session = Session::new(HttpScriptSource::new("https://video.example"));
//! let sig = session.decode_signature("scrambled-signature").await?;
//! let n = session.decode_n("scrambled-n").await?;
//! # Ok(())
//! # }
//! ```

pub mod decipher;
pub mod error;
pub mod session;
pub mod utils;

pub use decipher::{CatalogState, NDecodeProgram, SignatureProgram};
pub use error::DescrambleError;
pub use session::{HttpScriptSource, ScriptSource, Session, SessionConfig, SessionState};
pub use utils::url::{apply_n_decode, resolve_stream_url, CipherFragment};

/// Result type alias for descramble operations
pub type Result<T> = std::result::Result<T, DescrambleError>;
