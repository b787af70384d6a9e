//! Polymarket Maker Bot - Main Library
//!
//! Thin shell around the `maker-engine` workspace library; the binaries
//! only wire config, logging and shutdown together.

// Re-export the workspace library for convenience
pub use maker_engine;
