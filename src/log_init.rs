//! Logging bootstrap for the `supervise` binary.
//!
//! The core itself only calls `log::{error,warn,info,debug}!` and never
//! decides how those records are formatted or where they go — that policy
//! lives here, at the edge, the way `other_examples/409b05c2_F1rst-Unicorn-cinit__.../process_manager.rs`
//! leaves formatting to its own binary's `env_logger`/`tracing_subscriber`
//! setup rather than the library module doing the supervising.

/// Initialize `env_logger`, defaulting to `info` when `RUST_LOG` is unset.
/// Idempotent: calling this more than once (e.g. from tests) is harmless.
pub fn init() {
	let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).try_init();
}
