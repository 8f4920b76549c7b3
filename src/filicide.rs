//! The filicide engine: drive a process's descendant set to empty.
//!
//! Ported from `original_source/src/subreap_lib.c::signal_all_children` /
//! `filicide`, generalized (per spec) to take the target signal as a
//! parameter rather than hard-coding `SIGKILL`, since the supervisor's
//! `signal_all` command needs the same sweep machinery with an arbitrary
//! signal.

use crate::{descendants, error::Result, platform};
use nix::{
	sys::{
		signal::{self, Signal}, wait::{self, Id, WaitPidFlag, WaitStatus}
	}, unistd::Pid
};

/// Tracks which PIDs a single filicide sweep has already signalled, so a
/// later pass never re-signals (and, for `SIGKILL`, never re-waits-on) the
/// same PID twice. Scoped to one [`filicide`] call, as the design doc's
/// "dead-set" data model entry specifies.
struct DeadSet {
	signalled: Vec<bool>,
}

impl DeadSet {
	fn new(max_pid: usize) -> Self {
		Self { signalled: vec![false; max_pid] }
	}
	fn is_marked(&self, pid: Pid) -> bool {
		self.signalled.get(pid.as_raw() as usize).copied().unwrap_or(true)
	}
	fn mark(&mut self, pid: Pid) {
		if let Some(slot) = self.signalled.get_mut(pid.as_raw() as usize) {
			*slot = true;
		}
	}
}

/// Wait for `pid` to terminate without reaping it (`WNOWAIT`), so its own
/// children have already been re-parented to us (the subreaper) by the time
/// we observe its death, and so the zombie invariant (I4) is preserved: we
/// never collect a descendant's exit status except through this function or
/// the primary-child status handler.
fn wait_for_exit_without_reaping(pid: Pid) -> Result<()> {
	loop {
		match wait::waitid(Id::Pid(pid), WaitPidFlag::WEXITED | WaitPidFlag::WNOWAIT) {
			Ok(WaitStatus::Exited(..)) | Ok(WaitStatus::Signaled(..)) => return Ok(()),
			Ok(_) => continue,
			Err(nix::Error::EINTR) => continue,
			Err(e) => platform::fatal("wait for descendant exit (WNOWAIT)", e),
		}
	}
}

/// Kill every process descended from us with `signal`, waiting (without
/// reaping) for each before moving on, and repeating full sweeps until one
/// kills nothing. Returns only once the caller's descendant set is
/// provably empty.
///
/// # Termination
/// Each outer pass either kills at least one new PID — which can never
/// happen again, since the dead-set only grows — or kills nothing, in which
/// case we stop. An adversary that forks every cycle can only delay
/// termination by its forking rate, not prevent it: the dead-set is
/// monotonic and bounded by `max_pid`.
///
/// # Idempotence
/// Calling this when the descendant set is already empty performs zero
/// kills and returns on the first pass.
pub fn filicide_with_signal(signal: Signal) -> Result<()> {
	let self_pid = platform::raw_pid();
	let max_pid = descendants::max_pid()? as usize;
	let mut dead = DeadSet::new(max_pid);

	loop {
		let descended = descendants::descended_from(self_pid, max_pid as i32)?;
		let mut killed_this_pass = false;

		for raw in 1..max_pid as i32 {
			let pid = Pid::from_raw(raw);
			if !descended[raw as usize] || pid == self_pid || dead.is_marked(pid) {
				continue;
			}
			log::debug!("filicide: sending {:?} to descendant {}", signal, raw);
			match signal::kill(pid, signal) {
				Ok(()) => {}
				// A zombie is still a valid kill target; any failure here
				// means our invariants about this being our own descendant
				// don't hold, which is unrecoverable.
				Err(e) => platform::fatal("kill descendant during filicide", e),
			}
			if signal == Signal::SIGKILL {
				wait_for_exit_without_reaping(pid)?;
			}
			dead.mark(pid);
			killed_this_pass = true;
		}

		if !killed_this_pass {
			return Ok(());
		}
	}
}

/// The specific operation the design doc calls *filicide*: kill every
/// descendant with `SIGKILL` and wait for the set to empty.
pub fn filicide() -> Result<()> {
	filicide_with_signal(Signal::SIGKILL)
}

/// Send `signal` (not necessarily `SIGKILL`) to every current descendant,
/// without waiting for them to die and without marking them dead for future
/// sweeps — this backs the `signal_all <n>` control command, which must
/// reach every descendant exactly once per invocation but must not assume
/// the signal is fatal.
pub fn signal_all(signal: Signal) -> Result<()> {
	let self_pid = platform::raw_pid();
	let max_pid = descendants::max_pid()? as usize;
	let mut already_signalled = DeadSet::new(max_pid);
	let mut maybe_more = true;

	while maybe_more {
		let descended = descendants::descended_from(self_pid, max_pid as i32)?;
		maybe_more = false;
		for raw in 1..max_pid as i32 {
			let pid = Pid::from_raw(raw);
			if !descended[raw as usize] || pid == self_pid || already_signalled.is_marked(pid) {
				continue;
			}
			match signal::kill(pid, signal) {
				Ok(()) => {}
				Err(nix::Error::ESRCH) => {}
				Err(e) => return Err(crate::error::Error::resource("kill descendant (signal_all)", e)),
			}
			already_signalled.mark(pid);
			maybe_more = true;
		}
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn filicide_with_no_children_is_a_noop() {
		// A process with no descendants should return immediately without
		// touching anything. We can't easily assert "no syscalls happened",
		// but we can assert it completes fast and without error, which is
		// what idempotence means operationally.
		filicide().unwrap();
	}

	#[test]
	fn dead_set_marks_monotonically() {
		let mut dead = DeadSet::new(16);
		let pid = Pid::from_raw(5);
		assert!(!dead.is_marked(pid));
		dead.mark(pid);
		assert!(dead.is_marked(pid));
		dead.mark(pid);
		assert!(dead.is_marked(pid));
	}
}
