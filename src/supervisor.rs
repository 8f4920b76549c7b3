//! The supervisor loop: own a primary child, multiplex the control channel,
//! the child-status source, and the fatal-signal source, and guarantee
//! filicide on every exit path.
//!
//! Ported from `original_source/supervise.c` and
//! `c/src/supervise_libexec.c::supervise`, generalized per spec into a
//! reusable [`Supervisor`] rather than a single `main()`. Where the original
//! captures `main_child_pid` and `statusfd` in nested-function closures (see
//! design notes §9), this rewrite threads them explicitly as fields on
//! [`Supervisor`] — no dynamic closure capture is needed.

use crate::{
	descendants, error::{Error, Result}, filicide, platform::{self, NonBlockingChannel}, protocol::{Command, LineReader, StatusRecord}, signals::{self, SignalEventSource}
};
use nix::{
	libc, sys::{
		signal::{self, Signal}, wait::{self, WaitPidFlag, WaitStatus}
	}, unistd::{self, ForkResult, Pid}
};
use std::{
	ffi::CString, os::unix::io::{FromRawFd, RawFd}
};

/// Which event source a poll slot corresponds to. The control channel is
/// absent whenever the caller passed `-1` for it (§6), in which case it
/// simply has no slot at all this iteration — POSIX `poll` has no concept
/// of "ignore this fd" that survives Rust's `BorrowedFd` niche (fd `-1` is
/// reserved by `std` as the `Option<OwnedFd>` niche, so it can't be used as
/// the classic C "disabled" sentinel), so we build the slot list fresh each
/// iteration instead of keeping a fixed 3-slot array.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Source {
	Control,
	Child,
	Fatal,
}

/// Parsed startup arguments, per §6: `supervise <controlfd> <statusfd> <program> [args…]`.
pub struct Options {
	pub control_fd: Option<RawFd>,
	pub status_fd: Option<RawFd>,
	pub program: String,
	pub args: Vec<String>,
}

impl Options {
	/// Parse the minimal positional argument contract by hand, the way
	/// `original_source/supervise.c::get_options` does with `strtol` rather
	/// than a CLI-parsing crate — fancy argument parsing is explicitly out
	/// of scope for this core.
	///
	/// `-1` for either fd means "absent"; the corresponding event source is
	/// then permanently non-ready, matching §6.
	pub fn parse(mut argv: impl Iterator<Item = String>) -> Result<Self> {
		let _argv0 = argv.next();
		let control_raw: i32 = argv
			.next()
			.ok_or_else(|| Error::Environmental("usage: supervise <controlfd> <statusfd> <program> [args..]"))?
			.parse()
			.map_err(|_| Error::Environmental("controlfd must be an integer"))?;
		let status_raw: i32 = argv
			.next()
			.ok_or_else(|| Error::Environmental("usage: supervise <controlfd> <statusfd> <program> [args..]"))?
			.parse()
			.map_err(|_| Error::Environmental("statusfd must be an integer"))?;
		let program = argv.next().ok_or_else(|| Error::Environmental("missing program argument"))?;
		let args: Vec<String> = argv.collect();
		// should_hang / non-blocking-ness is computed from the parsed
		// integers up front, not read back off the struct under
		// construction — this is the fix for the self-referential-field
		// bug the design doc flags as a suspected source issue.
		let control_fd = if control_raw < 0 { None } else { Some(control_raw) };
		let status_fd = if status_raw < 0 { None } else { Some(status_raw) };
		Ok(Self { control_fd, status_fd, program, args })
	}
}

/// Owns everything the loop needs: the child-facing state, the three event
/// sources, and the primary child's pid once forked.
pub struct Supervisor {
	control: Option<NonBlockingChannel>,
	status: Option<NonBlockingChannel>,
	child_source: SignalEventSource,
	fatal_source: SignalEventSource,
	primary_child: Pid,
	line_reader: LineReader,
}

impl Supervisor {
	/// Run the full startup sequence (§4.E items 1-9) and the loop to
	/// completion, returning the process exit code per §6's table. This is
	/// the only entry point; by construction it never returns without
	/// having driven the descendant set to empty.
	pub fn run(opt: Options) -> i32 {
		// 1. Ignore SIGPIPE so writes to a closed status channel surface as
		// ordinary write errors rather than killing us.
		if let Err(e) = platform::ignore_signal(Signal::SIGPIPE) {
			platform::fatal("ignore SIGPIPE", e);
		}

		// 2. Non-blocking + close-on-exec both channel fds.
		for fd in [opt.control_fd, opt.status_fd].into_iter().flatten() {
			if let Err(e) = platform::set_cloexec_nonblock(fd) {
				platform::fatal("set controlfd/statusfd non-blocking", e);
			}
		}

		// 3. Self-test: confirm this environment can answer "who is p's
		// parent" at all, mirroring `original_source/src/subreap_lib.c`'s
		// `sanity_check` (a single `ppid_of(getpid())`), not the full
		// `filicide()` sweep — that engine falls back to an up-to-`max_pid`
		// /proc scan on hosts without the fast children-listing path, which
		// would make every `supervise` invocation pay for a ~4M-PID probe
		// before it even forks. A failure here means descendant discovery
		// itself doesn't work, which is what we actually need to prove.
		if let Err(e) = descendants::parent_of(platform::raw_pid()) {
			log::error!("self-test (parent_of) failed: {}", e);
			std::process::exit(1);
		}

		// 4 is implicit: `run` itself guarantees filicide on every return
		// path below, via the scoped-acquisition style the design notes
		// recommend in place of a bare `atexit` hook.

		// 5. Declare ourselves the subreaper for our whole subtree.
		if let Err(e) = set_child_subreaper() {
			platform::fatal("set PR_SET_CHILD_SUBREAPER", e);
		}

		// 6. Capture the currently-blocked mask, to restore in the child.
		let original_mask = match platform::blocked_signals() {
			Ok(mask) => mask,
			Err(e) => platform::fatal("capture blocked signal mask", e),
		};

		// 7. Open the fatal and child-status event sources; this blocks the
		// fatal set as a side effect.
		let fatal_source = match signals::fatal_signal_source() {
			Ok(s) => s,
			Err(e) => platform::fatal("open fatal-signal source", e),
		};
		let child_source = match signals::child_status_source() {
			Ok(s) => s,
			Err(e) => platform::fatal("open child-status source", e),
		};

		// 8. Fork the primary child.
		let primary_child = match fork_and_exec(&opt.program, &opt.args, original_mask) {
			Ok(pid) => pid,
			Err(e) => platform::fatal("fork primary child", e),
		};

		let control = opt.control_fd.map(|fd| NonBlockingChannel::from_owned(unsafe { std::os::fd::OwnedFd::from_raw_fd(fd) }));
		let status = opt.status_fd.map(|fd| NonBlockingChannel::from_owned(unsafe { std::os::fd::OwnedFd::from_raw_fd(fd) }));

		let mut supervisor = Supervisor {
			control,
			status,
			child_source,
			fatal_source,
			primary_child,
			line_reader: LineReader::new(),
		};

		// 9. Announce the primary child.
		supervisor.emit_status(StatusRecord::Pid(primary_child));

		supervisor.event_loop()
	}

	fn emit_status(&self, record: StatusRecord) {
		if let Some(status) = &self.status {
			let line = record.to_string();
			if let Err(e) = status.write_all_nonblocking(line.as_bytes()) {
				log::warn!("write to status channel failed (owner likely gone): {}", e);
			}
		}
	}

	/// The main readiness-multiplex loop. Suspends exactly once per
	/// iteration, in `poll`, per the concurrency model (§5).
	fn event_loop(mut self) -> i32 {
		use nix::poll::{PollFd, PollFlags};

		let mut exit_code: Option<i32> = None;
		loop {
			let mut sources = Vec::with_capacity(3);
			let mut pollfds = Vec::with_capacity(3);
			if let Some(control) = &self.control {
				sources.push(Source::Control);
				pollfds.push(PollFd::new(control.as_borrowed(), PollFlags::POLLIN | PollFlags::POLLRDHUP));
			}
			let child_fd = unsafe { std::os::fd::BorrowedFd::borrow_raw(self.child_source.as_raw_fd()) };
			sources.push(Source::Child);
			pollfds.push(PollFd::new(child_fd, PollFlags::POLLIN));
			let fatal_fd = unsafe { std::os::fd::BorrowedFd::borrow_raw(self.fatal_source.as_raw_fd()) };
			sources.push(Source::Fatal);
			pollfds.push(PollFd::new(fatal_fd, PollFlags::POLLIN));

			match nix::poll::poll(&mut pollfds, -1) {
				Ok(_) => {}
				Err(nix::Error::EINTR) => continue,
				Err(e) => platform::fatal("poll event sources", e),
			}

			for (source, pollfd) in sources.iter().zip(pollfds.iter()) {
				let Some(events) = pollfd.revents() else { continue };
				match source {
					Source::Control => {
						if events.contains(PollFlags::POLLIN) {
							self.drain_control();
						}
						if events.intersects(PollFlags::POLLHUP | PollFlags::POLLRDHUP | PollFlags::POLLERR) {
							self.handle_owner_disconnect();
						}
					}
					Source::Child => {
						if events.intersects(PollFlags::POLLERR | PollFlags::POLLHUP | PollFlags::POLLNVAL) {
							platform::fatal(
								"poll child-status source",
								format!("unexpected revents {:?} on child-status signalfd", events),
							);
						}
						if events.contains(PollFlags::POLLIN) {
							self.child_source
								.drain(|_siginfo| {})
								.unwrap_or_else(|e| platform::fatal("read child-status source", e));
							if let Some(code) = self.reap_and_report() {
								exit_code = Some(code);
							}
							if self.no_children_left() {
								self.emit_status(StatusRecord::NoChildren);
								self.emit_status(StatusRecord::Terminating);
								return finish(exit_code.unwrap_or(0));
							}
						}
					}
					Source::Fatal => {
						if events.intersects(PollFlags::POLLERR | PollFlags::POLLHUP | PollFlags::POLLNVAL) {
							platform::fatal(
								"poll fatal-signal source",
								format!("unexpected revents {:?} on fatal-signal signalfd", events),
							);
						}
						if events.contains(PollFlags::POLLIN) {
							self.fatal_source
								.drain(|siginfo| log::warn!("received fatal signal {}", siginfo.ssi_signo))
								.unwrap_or_else(|e| platform::fatal("read fatal-signal source", e));
							// A primary-child exit code observed here is an
							// artifact of our own filicide sweep, not a
							// natural exit; it must not override an exit
							// code the primary had already reported before
							// this signal arrived (§6: a fatal signal to the
							// supervisor itself is exit code 1, unless the
							// primary had already exited on its own).
							let code_before_sweep = exit_code;
							self.handle_fatal_signal();
							// filicide's kill-then-WNOWAIT-wait already
							// guarantees every descendant has exited, but
							// they're still zombies (I4); reap them now so
							// the status channel still sees whatever
							// happened to the primary child, and so
							// `no_children_left` is actually true rather
							// than optimistically assumed.
							let _ = self.reap_and_report();
							self.emit_status(StatusRecord::NoChildren);
							self.emit_status(StatusRecord::Terminating);
							return finish(code_before_sweep.unwrap_or(1));
						}
					}
				}
			}
		}
	}

	/// Read and act on every complete control-channel command currently
	/// available.
	fn drain_control(&mut self) {
		let Some(control) = &self.control else { return };
		let mut buf = [0u8; 4096];
		loop {
			let n = match control.read_available(&mut buf) {
				Ok(0) => break,
				Ok(n) => n,
				Err(e) => {
					log::warn!("control channel read error: {}", e);
					break;
				}
			};
			for line in self.line_reader.feed(&buf[..n]) {
				match crate::protocol::parse(&line) {
					Some(Command::Signal(signal)) => self.signal_primary(signal),
					Some(Command::SignalAll(signal)) => {
						if let Err(e) = filicide::signal_all(signal) {
							log::warn!("signal_all failed: {}", e);
						}
					}
					Some(Command::SignalPid(pid, signal)) => self.signal_descendant(pid, signal),
					None => log::debug!("ignoring unrecognised control line: {:?}", line),
				}
			}
		}
	}

	fn signal_primary(&self, signal: Signal) {
		match signal::kill(self.primary_child, signal) {
			Ok(()) | Err(nix::Error::ESRCH) => {}
			Err(e) => log::warn!("signal {:?} to primary child failed: {}", signal, e),
		}
	}

	/// Signal an arbitrary descendant, but only if it is still one of our
	/// own unreaped children — the same guard
	/// `supervise_libexec.c::handle_send_signal` uses, so an owner can never
	/// trick us into signalling an unrelated pid that happens to be reused.
	fn signal_descendant(&self, pid: Pid, signal: Signal) {
		// WNOHANG is mandatory here: without it, waitid blocks until `pid`
		// has a state transition, which on the single thread that also owns
		// the loop's one suspension point would freeze the whole supervisor
		// (fatal signals included, since they're blocked via sigprocmask and
		// so never interrupt this) until that descendant happens to
		// exit/stop/continue on its own.
		let waitable = wait::waitid(
			wait::Id::Pid(pid),
			WaitPidFlag::WNOHANG | WaitPidFlag::WNOWAIT | WaitPidFlag::WEXITED | WaitPidFlag::WSTOPPED | WaitPidFlag::WCONTINUED,
		);
		match waitable {
			Ok(_) => {
				let _ = signal::kill(pid, signal);
			}
			Err(_) => log::debug!("signal_pid {}: not a live descendant of ours", pid.as_raw()),
		}
	}

	/// Owner closed the control channel: stop polling it, filicide
	/// immediately, and keep draining child-status until empty.
	fn handle_owner_disconnect(&mut self) {
		log::info!("control channel closed; owner no longer wants us");
		self.control = None;
		if let Err(e) = filicide::filicide() {
			platform::fatal("filicide on owner disconnect", e);
		}
	}

	fn handle_fatal_signal(&mut self) {
		if let Err(e) = filicide::filicide() {
			platform::fatal("filicide on fatal signal", e);
		}
	}

	/// Reap every waitable child with `WNOHANG`, reporting the primary
	/// child's terminal status on the status channel. Non-primary
	/// descendants are reaped silently (only the primary child's status matters here; reaping *outside*
	/// this function or the primary-child handler is forbidden).
	fn reap_and_report(&mut self) -> Option<i32> {
		let mut primary_exit_code = None;
		loop {
			match wait::waitid(wait::Id::All, WaitPidFlag::WEXITED | WaitPidFlag::WNOHANG) {
				Ok(WaitStatus::Exited(pid, code)) => {
					if pid == self.primary_child {
						self.emit_status(StatusRecord::Exited(code));
						primary_exit_code = Some(code);
					}
				}
				Ok(WaitStatus::Signaled(pid, signal, dumped)) => {
					if pid == self.primary_child {
						let record = if dumped { StatusRecord::Dumped(signal as i32) } else { StatusRecord::Killed(signal as i32) };
						self.emit_status(record);
						primary_exit_code = Some(128 + signal as i32);
					}
				}
				Ok(WaitStatus::StillAlive) | Err(nix::Error::ECHILD) => break,
				Ok(_) => continue,
				Err(nix::Error::EINTR) => continue,
				Err(e) => platform::fatal("reap descendants", e),
			}
		}
		primary_exit_code
	}

	fn no_children_left(&self) -> bool {
		let self_pid = platform::raw_pid();
		let self_idx = self_pid.as_raw() as usize;
		match descendants::max_pid().and_then(|max| descendants::descended_from(self_pid, max)) {
			// `descended_from` always marks `self_pid` itself as descended
			// (it's the root of the reflexive-transitive closure), so that
			// entry has to be excluded here — otherwise this would never
			// observe "no children" at all.
			Ok(tree) => !tree.iter().enumerate().any(|(idx, &d)| d && idx != self_idx),
			Err(e) => {
				log::warn!("could not verify no_children, assuming none: {}", e);
				true
			}
		}
	}
}

fn finish(code: i32) -> i32 {
	log::info!("terminating");
	code
}

fn set_child_subreaper() -> nix::Result<()> {
	let ret = unsafe { libc::prctl(libc::PR_SET_CHILD_SUBREAPER, 1, 0, 0, 0) };
	if ret != 0 {
		return Err(nix::Error::last());
	}
	Ok(())
}

/// Fork the primary child and, in the child, restore the pre-block signal
/// mask, arm `PR_SET_PDEATHSIG` so it's terminated if we die unexpectedly,
/// and `execvp` the target program.
fn fork_and_exec(program: &str, args: &[String], original_mask: nix::sys::signal::SigSet) -> nix::Result<Pid> {
	match unsafe { unistd::fork() }? {
		ForkResult::Child => {
			let ret = unsafe { libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM, 0, 0, 0) };
			if ret != 0 {
				unsafe { libc::_exit(1) };
			}
			if signal::sigprocmask(signal::SigmaskHow::SIG_SETMASK, Some(&original_mask), None).is_err() {
				unsafe { libc::_exit(1) };
			}
			let program_c = CString::new(program).unwrap_or_else(|_| unsafe { libc::_exit(1) });
			let mut argv: Vec<CString> = Vec::with_capacity(args.len() + 1);
			argv.push(program_c.clone());
			for a in args {
				match CString::new(a.as_str()) {
					Ok(c) => argv.push(c),
					Err(_) => unsafe { libc::_exit(1) },
				}
			}
			let _ = unistd::execvp(&program_c, &argv);
			// execvp only returns on error.
			unsafe { libc::_exit(127) };
		}
		ForkResult::Parent { child } => Ok(child),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn options_parse_basic_invocation() {
		let argv = ["supervise", "3", "4", "/bin/true"].into_iter().map(String::from);
		let opt = Options::parse(argv).unwrap();
		assert_eq!(opt.control_fd, Some(3));
		assert_eq!(opt.status_fd, Some(4));
		assert_eq!(opt.program, "/bin/true");
		assert!(opt.args.is_empty());
	}

	#[test]
	fn options_parse_treats_negative_one_as_absent() {
		let argv = ["supervise", "-1", "-1", "/bin/true", "a", "b"].into_iter().map(String::from);
		let opt = Options::parse(argv).unwrap();
		assert_eq!(opt.control_fd, None);
		assert_eq!(opt.status_fd, None);
		assert_eq!(opt.args, vec!["a".to_string(), "b".to_string()]);
	}

	#[test]
	fn options_parse_rejects_missing_args() {
		let argv = ["supervise", "3"].into_iter().map(String::from);
		assert!(Options::parse(argv).is_err());
	}
}
