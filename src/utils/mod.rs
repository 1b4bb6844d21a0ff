//! Utility functions for descramble

pub mod url;

pub use url::*;
