//! Process exit codes.
//!
//! `run` propagates the wrapped server's exit status; these constants cover
//! the proxy's own outcomes.

/// Clean exit.
pub const SUCCESS: i32 = 0;

/// Configuration or startup error (policy load, secret resolution, spawn).
pub const CONFIG_ERROR: i32 = 2;
