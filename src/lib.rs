//! `filicide` — a process-supervision core that guarantees a spawning
//! process cleans up every one of its descendant processes before exiting.
//!
//! The core solves three coupled problems on a POSIX-like OS: becoming a
//! *subreaper* so double-forking daemons cannot escape, driving a process's
//! descendant set to empty under adversarial forking (*filicide*), and doing
//! both from a signal-safe event loop that multiplexes a control channel, a
//! status channel, child state-change notifications, and fatal signals.
//!
//! The five components, leaves first:
//!
//! - [`platform`] — thin contracts over OS signal/process/fd primitives.
//! - [`descendants`] — enumerate the set of PIDs descended from a process.
//! - [`filicide`] — drive a process's descendant set to empty.
//! - [`signals`] — convert synchronous signals into readable event sources.
//! - [`supervisor`] — the event loop that ties the above together.
//!
//! This crate is unix-only: subreaping, `signalfd`, and `/proc` are Linux
//! concepts with no portable equivalent.

#![cfg(unix)]
#![warn(missing_debug_implementations, unused_extern_crates, unused_import_braces, unused_qualifications)]

pub mod descendants;
pub mod error;
pub mod filicide;
pub mod log_init;
pub mod platform;
pub mod protocol;
pub mod signals;
pub mod supervisor;

pub use error::{Error, Result};
pub use supervisor::{Options, Supervisor};
