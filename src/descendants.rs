//! Enumerate the set of PIDs descended from a given process.
//!
//! Ported from `original_source/src/subreap_lib.c::build_child_tree` and
//! `get_ppid_of`: given only an "immediate parent of PID p" primitive, we
//! classify every PID in `[1, max_pid)` as descended-from-us or not, by
//! walking each PID's ancestor chain until we hit a PID whose classification
//! is already known. The outer [`crate::filicide`] loop is what makes this
//! race-free despite forks happening mid-scan (see the module-level race
//! discipline note below); this module only needs to answer "who is p's
//! immediate parent, right now".

use crate::error::{Error, Result};
use nix::{sys::signal, unistd::Pid};
use std::{fs, io};

/// A conservative upper bound one past the largest PID the kernel will ever
/// hand out, read once at startup from `/proc/sys/kernel/pid_max`. Bounded by
/// 2^22 on Linux, so a dead-set or child-tree array sized to it is at most a
/// few MiB.
pub fn max_pid() -> Result<i32> {
	let raw = fs::read_to_string("/proc/sys/kernel/pid_max")
		.map_err(|e| Error::parse("pid_max", e))?;
	let value: i32 = raw.trim().parse().map_err(|e| Error::parse("pid_max", e))?;
	Ok(value.min(1 << 22))
}

/// Is `pid` currently a live process? A null-signal send that succeeds, or
/// fails with "permission denied", both count as live — we just can't tell
/// it apart from a PID we don't own permission-wise, and per spec that's
/// fine: such a PID can never be ours anyway (we can always signal our own
/// descendants).
fn is_live(pid: Pid) -> bool {
	match signal::kill(pid, None) {
		Ok(()) => true,
		Err(nix::Error::EPERM) => true,
		Err(_) => false,
	}
}

/// Returns `p`'s immediate parent PID, or `None` if `p` is not currently a
/// live process (treated identically whether it never existed, already
/// exited, or vanished between the liveness probe and the `/proc` read —
/// all three are the same "not present" outcome per the race discipline).
pub fn parent_of(pid: Pid) -> Result<Option<Pid>> {
	if !is_live(pid) {
		return Ok(None);
	}
	let stat = match fs::read(format!("/proc/{}/stat", pid.as_raw())) {
		Ok(data) => data,
		Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
		Err(e) => return Err(Error::resource("read /proc/<pid>/stat", nix_err_from_io(e))),
	};
	parse_ppid(&stat).map(Some)
}

fn nix_err_from_io(e: io::Error) -> nix::Error {
	match e.raw_os_error() {
		Some(code) => nix::Error::from_i32(code),
		None => nix::Error::UnknownErrno,
	}
}

/// Parse the parent PID out of a raw `/proc/<pid>/stat` record.
///
/// The `comm` field (2nd, parenthesized) can contain arbitrary bytes
/// including spaces, parentheses, or newlines, so we can't split the record
/// on whitespace naively. We locate the **rightmost** `)` — a process can
/// still fool a *leftmost*-`)` parser by naming itself `a)pid ppid x y(`, but
/// not a rightmost one, since nothing the kernel writes after `comm` ever
/// contains a literal `)` — and treat everything after it as a
/// whitespace-separated field list. The first field is the state character,
/// the second is the parent PID.
fn parse_ppid(stat: &[u8]) -> Result<Pid> {
	let close = stat
		.iter()
		.rposition(|&b| b == b')')
		.ok_or_else(|| Error::parse("/proc/<pid>/stat", "no ')' found"))?;
	let rest = std::str::from_utf8(&stat[close + 1..])
		.map_err(|e| Error::parse("/proc/<pid>/stat", e))?;
	let mut fields = rest.split_ascii_whitespace();
	let _state = fields.next().ok_or_else(|| Error::parse("/proc/<pid>/stat", "missing state field"))?;
	let ppid = fields.next().ok_or_else(|| Error::parse("/proc/<pid>/stat", "missing ppid field"))?;
	ppid.parse::<i32>().map(Pid::from_raw).map_err(|e| Error::parse("/proc/<pid>/stat ppid", e))
}

/// Per-PID classification while building a child tree.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum PidState {
	/// Not yet determined whether `pid` descends from us.
	Unchecked,
	/// `pid` is in our reflexive-transitive child closure.
	Descended,
	/// `pid` is not descended from us (includes "doesn't exist").
	Unrelated,
}

/// Classify every PID in `[1, max_pid)` as descended from `self_pid` or not.
///
/// This is the racy primitive the design doc warns about: a process may
/// fork, exit, or be replaced between the time we check one PID and the
/// next. [`crate::filicide::filicide`] compensates by calling this
/// repeatedly until a full pass kills nothing.
///
/// Tries the [`children_of_fast`] path first, walking it breadth-first from
/// `self_pid`; if the kernel lacks that feature anywhere in the walk, falls
/// back to the guaranteed `O(max_pid)` full-table scan. Per spec the fast
/// path is a hint only — both give an answer for "right now", equally racy —
/// so this never mixes the two within one call.
pub fn descended_from(self_pid: Pid, max_pid: i32) -> Result<Vec<bool>> {
	let max_pid = max_pid as usize;
	if let Some(fast) = descended_from_fast(self_pid, max_pid) {
		return Ok(fast);
	}
	descended_from_full_scan(self_pid, max_pid)
}

/// Depth-first walk of [`children_of_fast`] from `self_pid`, via an explicit
/// stack — traversal order doesn't matter here, only that every reachable
/// pid gets visited once, so a plain `Vec` stack is enough. Returns `None`
/// as soon as any node's children can't be listed this way (old kernel, or
/// `CONFIG_CHECKPOINT_RESTORE=n`), so the caller can fall back wholesale.
fn descended_from_fast(self_pid: Pid, max_pid: usize) -> Option<Vec<bool>> {
	let mut result = vec![false; max_pid];
	let self_idx = self_pid.as_raw() as usize;
	if self_idx < max_pid {
		result[self_idx] = true;
	}
	let mut frontier = vec![self_pid];
	while let Some(pid) = frontier.pop() {
		for child in children_of_fast(pid)? {
			let idx = child.as_raw() as usize;
			if idx < max_pid && !result[idx] {
				result[idx] = true;
				frontier.push(child);
			}
		}
	}
	Some(result)
}

fn descended_from_full_scan(self_pid: Pid, max_pid: usize) -> Result<Vec<bool>> {
	let mut state = vec![PidState::Unchecked; max_pid];
	state[0] = PidState::Unrelated; // the kernel
	if max_pid > 1 {
		state[1] = PidState::Unrelated; // the system root, unless it's us
	}
	let self_idx = self_pid.as_raw() as usize;
	if self_idx < max_pid {
		state[self_idx] = PidState::Descended;
	}

	for pid in 1..max_pid as i32 {
		classify(Pid::from_raw(pid), &mut state)?;
	}

	Ok(state.into_iter().map(|s| s == PidState::Descended).collect())
}

/// Resolve `pid`'s classification by walking its ancestor chain, memoizing
/// as we go. Recursion depth is bounded by the depth of the process tree
/// (ancestry), not by the size of the PID space, so this does not risk stack
/// overflow under any realistic process tree.
fn classify(pid: Pid, state: &mut [PidState]) -> Result<PidState> {
	let raw = pid.as_raw();
	if raw < 0 {
		return Ok(PidState::Unrelated);
	}
	let idx = raw as usize;
	if idx >= state.len() {
		return Ok(PidState::Unrelated);
	}
	if state[idx] != PidState::Unchecked {
		return Ok(state[idx]);
	}
	let resolved = match parent_of(pid)? {
		None => PidState::Unrelated,
		Some(parent) => classify(parent, state)?,
	};
	state[idx] = resolved;
	Ok(resolved)
}

/// Optional faster path: if the kernel exposes
/// `/proc/<pid>/task/<pid>/children`, use it to enumerate immediate children
/// directly instead of scanning the whole PID space. Per spec this is a hint
/// only — callers still apply the same outer re-scan-until-empty loop, since
/// this file only lists *immediate* children at one point in time and can
/// miss a concurrent fork just as easily as the full scan can.
pub fn children_of_fast(pid: Pid) -> Option<Vec<Pid>> {
	let path = format!("/proc/{}/task/{}/children", pid.as_raw(), pid.as_raw());
	let contents = fs::read_to_string(path).ok()?;
	Some(
		contents
			.split_ascii_whitespace()
			.filter_map(|tok| tok.parse::<i32>().ok())
			.map(Pid::from_raw)
			.collect(),
	)
}
