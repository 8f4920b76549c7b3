//! Convert synchronous signals into readable events.
//!
//! Ported from `original_source/src/subreap_lib.c::fatalsig_set`/`get_fatalfd`
//! and `common.c::get_childfd`. The design explicitly forbids asynchronous
//! signal handlers for application logic (see design notes §9): every
//! signal this crate cares about is blocked at startup and converted into a
//! `signalfd` the supervisor loop polls like any other fd, which is the only
//! known way to get race-free control flow around fork/kill/wait on
//! POSIX-like systems.

use crate::{error::Result, platform};
use nix::{
	libc::signalfd_siginfo, sys::{
		signal::{SigSet, Signal}, signalfd::{SfdFlags, SignalFd}
	}
};

/// The fixed set of signals whose default action terminates or
/// core-dumps the process, enumerated exactly as in the design doc.
///
/// `SIGKILL` and `SIGSTOP` are deliberately absent: POSIX forbids blocking,
/// catching, or ignoring either one, so `sigprocmask`/`signalfd` can never
/// see them — a `SIGKILL` always terminates us immediately regardless of
/// this set, making filicide's own final-resort signal choice (§4.C) the
/// only thing that actually relies on it.
const DEATH_SIGNALS: &[Signal] = &[
	Signal::SIGHUP,
	Signal::SIGINT,
	Signal::SIGPIPE,
	Signal::SIGALRM,
	Signal::SIGTERM,
	Signal::SIGUSR1,
	Signal::SIGUSR2,
	Signal::SIGPOLL,
	Signal::SIGPROF,
	Signal::SIGVTALRM,
	Signal::SIGIO,
	#[cfg(target_os = "linux")]
	Signal::SIGPWR,
	Signal::SIGQUIT,
	Signal::SIGILL,
	Signal::SIGABRT,
	Signal::SIGFPE,
	Signal::SIGSEGV,
	Signal::SIGBUS,
	Signal::SIGSYS,
	Signal::SIGTRAP,
	Signal::SIGXCPU,
	Signal::SIGXFSZ,
];

/// Compute the fatal-signal set: every signal in [`DEATH_SIGNALS`] that is
/// not already blocked or ignored at program start. A signal the caller has
/// chosen to ignore (e.g. a library already ignoring `SIGPIPE`) is left
/// alone rather than hijacked.
pub fn fatal_signal_set() -> Result<SigSet> {
	let already_blocked = platform::blocked_signals()
		.map_err(|e| crate::error::Error::resource("query blocked signals", e))?;
	let mut set = SigSet::empty();
	for &signal in DEATH_SIGNALS {
		if already_blocked.contains(signal) {
			continue;
		}
		if platform::signal_is_ignored(signal) {
			continue;
		}
		set.add(signal);
	}
	Ok(set)
}

/// A `signalfd`-backed event source: becomes readable once per signal
/// pending, with atomic (never-short) reads, exactly matching the design
/// doc's "signal-event source" contract.
#[derive(Debug)]
pub struct SignalEventSource {
	fd: SignalFd,
}

impl SignalEventSource {
	/// Block `set` and open a non-blocking, close-on-exec `signalfd` for it.
	pub fn new(set: &SigSet) -> Result<Self> {
		nix::sys::signal::sigprocmask(nix::sys::signal::SigmaskHow::SIG_BLOCK, Some(set), None)
			.map_err(|e| crate::error::Error::resource("block signal set", e))?;
		let fd = SignalFd::with_flags(set, SfdFlags::SFD_NONBLOCK | SfdFlags::SFD_CLOEXEC)
			.map_err(|e| crate::error::Error::resource("signalfd", e))?;
		Ok(Self { fd })
	}

	/// Read the next pending signal, if any. `Ok(None)` means "nothing
	/// pending right now" (`EAGAIN`), matching the non-blocking-read
	/// contract; this never returns a partial record.
	pub fn read_one(&mut self) -> Result<Option<signalfd_siginfo>> {
		match self.fd.read_signal() {
			Ok(info) => Ok(info),
			Err(e) => Err(crate::error::Error::resource("read signalfd", e)),
		}
	}

	/// Drain every currently pending signal, calling `f` with each.
	pub fn drain(&mut self, mut f: impl FnMut(signalfd_siginfo)) -> Result<()> {
		while let Some(info) = self.read_one()? {
			f(info);
		}
		Ok(())
	}

	/// The underlying fd, for registration with `poll`.
	pub fn as_raw_fd(&self) -> std::os::unix::io::RawFd {
		use std::os::unix::io::AsRawFd;
		self.fd.as_raw_fd()
	}
}

/// Open the fatal-signal event source, blocking [`fatal_signal_set`] as a
/// side effect (per I3, these signals must never be delivered
/// asynchronously again).
pub fn fatal_signal_source() -> Result<SignalEventSource> {
	let set = fatal_signal_set()?;
	SignalEventSource::new(&set)
}

/// Open the child-status event source: readable whenever any child changes
/// state. Implemented as a `signalfd` over the singleton `{SIGCHLD}` set,
/// following `common.c::get_childfd` one-for-one.
pub fn child_status_source() -> Result<SignalEventSource> {
	let mut set = SigSet::empty();
	set.add(Signal::SIGCHLD);
	SignalEventSource::new(&set)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn fatal_set_excludes_already_ignored_signals() {
		platform::ignore_signal(Signal::SIGPIPE).unwrap();
		let set = fatal_signal_set().unwrap();
		assert!(!set.contains(Signal::SIGPIPE));
	}
}
