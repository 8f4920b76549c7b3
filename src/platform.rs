//! Thin contracts over OS signal/process/file-descriptor primitives.
//!
//! Everything in this module is a small, testable wrapper around a single
//! syscall or syscall sequence; the interesting behaviour (the filicide
//! algorithm, the supervisor loop) is built out of these in
//! [`crate::filicide`] and [`crate::supervisor`].

use nix::{
	errno::Errno, fcntl::{self, FcntlArg, FdFlag, OFlag}, libc, sys::signal::{self, SigSet}, unistd
};
use std::{
	io, os::unix::io::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd}
};

/// Log a `file:line function: Failed to <operation>` diagnostic and abort
/// the process. This is the Rust analogue of `original_source/common.c`'s
/// `try_function`: any primitive error that isn't an expected transient
/// condition is treated as fatal, per the failure policy in the design doc.
#[track_caller]
pub fn fatal(operation: &str, err: impl std::fmt::Display) -> ! {
	let loc = std::panic::Location::caller();
	log::error!("{}:{} {}: Failed to {}: {}", loc.file(), loc.line(), operation, operation, err);
	std::process::exit(1);
}

/// Block `set`, returning the signal mask that was in effect beforehand so a
/// caller can restore it later (e.g. across a fork/exec boundary, per I3).
#[derive(Debug)]
pub struct SigmaskGuard {
	previous: SigSet,
}

impl SigmaskGuard {
	/// Block `set` process-wide, remembering the previous mask.
	pub fn block(set: &SigSet) -> nix::Result<Self> {
		let mut old = SigSet::empty();
		signal::sigprocmask(signal::SigmaskHow::SIG_BLOCK, Some(set), Some(&mut old))?;
		Ok(Self { previous: old })
	}

	/// The mask that was blocked before this guard was created.
	pub fn previous(&self) -> SigSet {
		self.previous
	}

	/// Restore the previous mask now. Used across a fork/exec boundary where
	/// the child must not inherit our blocked set.
	pub fn restore(self) -> nix::Result<()> {
		signal::sigprocmask(signal::SigmaskHow::SIG_SETMASK, Some(&self.previous), None)
	}
}

/// Returns the signal mask currently blocked in this thread/process, without
/// changing it.
pub fn blocked_signals() -> nix::Result<SigSet> {
	let mut current = SigSet::empty();
	signal::sigprocmask(signal::SigmaskHow::SIG_SETMASK, None, Some(&mut current))?;
	Ok(current)
}

/// Is `signal` currently disposed to `SIG_IGN`? Used when computing the
/// fatal-signal set (a signal already ignored at startup is excluded, per
/// spec). nix has no safe query-only `sigaction`, so this drops to libc
/// directly, following `alecmocatta-palaver`'s habit of reaching for raw
/// libc calls where nix doesn't expose a primitive.
pub fn signal_is_ignored(signal: signal::Signal) -> bool {
	unsafe {
		let mut current: libc::sigaction = std::mem::zeroed();
		let ret = libc::sigaction(signal as libc::c_int, std::ptr::null(), &mut current);
		assert_eq!(ret, 0, "querying disposition of {:?} cannot fail", signal);
		current.sa_sigaction == libc::SIG_IGN as usize
	}
}

/// Ignore `signal` globally. Used at startup to ignore `SIGPIPE` so writes
/// to a closed status channel surface as ordinary write errors.
pub fn ignore_signal(signal: signal::Signal) -> nix::Result<()> {
	let action = signal::SigAction::new(
		signal::SigHandler::SigIgn,
		signal::SaFlags::empty(),
		SigSet::empty(),
	);
	unsafe { signal::sigaction(signal, &action) }.map(drop)
}

/// Set `O_NONBLOCK` and `FD_CLOEXEC` on `fd`. Per the control/status channel
/// contract both ends the supervisor owns are set non-blocking + close-on-exec
/// on startup.
pub fn set_cloexec_nonblock(fd: RawFd) -> nix::Result<()> {
	let fd_flags = fcntl::fcntl(fd, FcntlArg::F_GETFD)?;
	let fd_flags = FdFlag::from_bits_truncate(fd_flags) | FdFlag::FD_CLOEXEC;
	fcntl::fcntl(fd, FcntlArg::F_SETFD(fd_flags))?;

	let fl_flags = fcntl::fcntl(fd, FcntlArg::F_GETFL)?;
	let fl_flags = OFlag::from_bits_truncate(fl_flags) | OFlag::O_NONBLOCK;
	fcntl::fcntl(fd, FcntlArg::F_SETFL(fl_flags)).map(drop)
}

/// A non-blocking duplex byte channel. Reads that would block instead
/// return `Ok(&[])` via [`NonBlockingChannel::read_available`]; this matches
/// the "non-blocking reads return an empty result instead of blocking"
/// primitive the platform contract requires.
#[derive(Debug)]
pub struct NonBlockingChannel {
	fd: OwnedFd,
}

impl NonBlockingChannel {
	/// Take ownership of `fd`, assumed already non-blocking + close-on-exec
	/// (set via [`set_cloexec_nonblock`]).
	pub fn from_owned(fd: OwnedFd) -> Self {
		Self { fd }
	}

	/// Borrow the underlying fd, e.g. to register it with `poll`.
	pub fn as_borrowed(&self) -> BorrowedFd<'_> {
		std::os::fd::AsFd::as_fd(&self.fd)
	}

	/// The raw fd number, e.g. for diagnostics.
	pub fn as_raw_fd(&self) -> RawFd {
		self.fd.as_raw_fd()
	}

	/// Read whatever is currently available into `buf`. Returns `Ok(0)` both
	/// when the peer closed the channel and when nothing was ready
	/// (`EAGAIN`/`EWOULDBLOCK`) — callers distinguish the two via a separate
	/// hangup check on the poll event, per the platform contract ("reads
	/// return empty instead of blocking").
	pub fn read_available(&self, buf: &mut [u8]) -> io::Result<usize> {
		match unistd::read(self.fd.as_raw_fd(), buf) {
			Ok(n) => Ok(n),
			Err(Errno::EAGAIN) => Ok(0),
			Err(e) => Err(e.into()),
		}
	}

	/// Attempt a single non-blocking write of `buf`, treating `EAGAIN` as
	/// "wrote nothing, try later" rather than an error. Status records are
	/// always well under `PIPE_BUF`, so a single successful call always
	/// writes the whole record atomically; this never does partial-write
	/// bookkeeping because it never needs to.
	pub fn write_all_nonblocking(&self, buf: &[u8]) -> io::Result<usize> {
		match unistd::write(self.fd.as_raw_fd(), buf) {
			Ok(n) => Ok(n),
			Err(Errno::EAGAIN) => Ok(0),
			Err(e) => Err(e.into()),
		}
	}
}

/// The PID of the current process, bypassing any user-space cache. Some
/// libcs used to cache `getpid()` across `fork()`, which is exactly the kind
/// of thing that would silently corrupt the subreaper/filicide logic;
/// `alecmocatta-palaver::thread::gettid` takes the same "go straight to the
/// syscall" approach for thread ids.
pub fn raw_pid() -> unistd::Pid {
	let pid = unsafe { libc::syscall(libc::SYS_getpid) };
	unistd::Pid::from_raw(pid as libc::pid_t)
}

/// Duplicate `oldfd` onto a fresh fd at or above `oldfd`, atomically setting
/// `O_CLOEXEC` if requested. Used when taking ownership of inherited
/// controlfd/statusfd numbers we don't want to collide with.
pub fn dup_cloexec(oldfd: RawFd) -> nix::Result<OwnedFd> {
	let newfd = fcntl::fcntl(oldfd, FcntlArg::F_DUPFD_CLOEXEC(oldfd))?;
	Ok(unsafe { OwnedFd::from_raw_fd(newfd) })
}
