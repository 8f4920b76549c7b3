//! The control/status line protocol.
//!
//! Ported from `original_source/supervise.c::handle_control_message` (the
//! line-oriented variant; the design doc's §4.E promotes this over the
//! binary `struct supervise_send_signal` protocol in
//! `c/src/supervise_protocol.h`). One notable fix over the original: the
//! design doc calls out as a suspected source bug that a single `read()`
//! returning more than one line would silently drop every line after the
//! first. [`LineReader`] buffers partial reads and splits on `\n`, so a
//! cooperating owner writing several lines in one `write()` never loses any.

use crate::error::Error;
use nix::sys::signal::Signal;
use nix::unistd::Pid;

/// A command recognised on the control channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
	/// `signal <n>\n` — send signal `n` to the primary child, if running.
	Signal(Signal),
	/// `signal_all <n>\n` — send signal `n` to every current descendant.
	SignalAll(Signal),
	/// `signal_pid <pid> <n>\n` — send signal `n` to a specific descendant
	/// pid, if it is still one of our live, unreaped children. Additive:
	/// see `original_source/c/src/supervise_libexec.c::handle_send_signal`,
	/// which gates exactly this way with `waitid(P_PID, pid, NULL, WNOWAIT)`.
	SignalPid(Pid, Signal),
}

/// Parse one line (without its trailing `\n`) into a [`Command`]. Unknown or
/// malformed commands are not an error per spec — the control protocol
/// silently ignores them — so this returns `None` rather than [`Error`] for
/// anything it doesn't recognise; callers that want to log the rejection can
/// match on the `Err` variant from [`parse_strict`].
pub fn parse(line: &str) -> Option<Command> {
	parse_strict(line).ok()
}

/// Like [`parse`], but surfaces *why* a line didn't parse, for callers (e.g.
/// tests, or a verbose logging mode) that want the detail the lenient
/// interface throws away.
pub fn parse_strict(line: &str) -> Result<Command, Error> {
	let line = line.trim_end_matches('\n');
	let mut words = line.split_ascii_whitespace();
	let unrecognised = || Error::UnknownCommand(line.to_owned());
	match words.next() {
		Some("signal") => {
			let n: i32 = words.next().ok_or_else(unrecognised)?.parse().map_err(|_| unrecognised())?;
			Ok(Command::Signal(signal_from_raw(n).ok_or_else(unrecognised)?))
		}
		Some("signal_all") => {
			let n: i32 = words.next().ok_or_else(unrecognised)?.parse().map_err(|_| unrecognised())?;
			Ok(Command::SignalAll(signal_from_raw(n).ok_or_else(unrecognised)?))
		}
		Some("signal_pid") => {
			let pid: i32 = words.next().ok_or_else(unrecognised)?.parse().map_err(|_| unrecognised())?;
			let n: i32 = words.next().ok_or_else(unrecognised)?.parse().map_err(|_| unrecognised())?;
			Ok(Command::SignalPid(Pid::from_raw(pid), signal_from_raw(n).ok_or_else(unrecognised)?))
		}
		_ => Err(unrecognised()),
	}
}

fn signal_from_raw(n: i32) -> Option<Signal> {
	Signal::try_from(n).ok()
}

/// A status record emitted on the status channel, per the design doc's
/// vocabulary table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatusRecord {
	/// Emitted immediately after forking the primary child.
	Pid(Pid),
	/// Primary child exited normally with the given code.
	Exited(i32),
	/// Primary child was killed by a signal, without coredump.
	Killed(i32),
	/// Primary child was killed by a signal, with coredump.
	Dumped(i32),
	/// Emitted by the at-exit path on any supervisor termination.
	Terminating,
	/// All descendants have been reaped; the supervisor is about to exit 0.
	NoChildren,
}

impl std::fmt::Display for StatusRecord {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			StatusRecord::Pid(pid) => write!(f, "pid {}\n", pid.as_raw()),
			StatusRecord::Exited(code) => write!(f, "exited {}\n", code),
			StatusRecord::Killed(signal) => write!(f, "killed {}\n", signal),
			StatusRecord::Dumped(signal) => write!(f, "dumped {}\n", signal),
			StatusRecord::Terminating => write!(f, "terminating\n"),
			StatusRecord::NoChildren => write!(f, "no_children\n"),
		}
	}
}

/// Buffers partial reads off the control channel and yields complete lines,
/// fixing the "assumes one full line per read" bug the design doc flags as
/// a suspected source issue.
#[derive(Debug, Default)]
pub struct LineReader {
	buf: Vec<u8>,
}

impl LineReader {
	pub fn new() -> Self {
		Self { buf: Vec::new() }
	}

	/// Feed newly-read bytes in; returns every complete (`\n`-terminated)
	/// line now available, leaving any trailing partial line buffered for
	/// the next call.
	pub fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
		self.buf.extend_from_slice(bytes);
		let mut lines = Vec::new();
		while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
			let line = self.buf.drain(..=pos).collect::<Vec<u8>>();
			if let Ok(s) = String::from_utf8(line) {
				lines.push(s);
			}
		}
		lines
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_signal_command() {
		assert_eq!(parse("signal 15\n"), Some(Command::Signal(Signal::SIGTERM)));
	}

	#[test]
	fn parses_signal_all_command() {
		assert_eq!(parse("signal_all 9\n"), Some(Command::SignalAll(Signal::SIGKILL)));
	}

	#[test]
	fn parses_signal_pid_command() {
		assert_eq!(
			parse("signal_pid 42 15\n"),
			Some(Command::SignalPid(Pid::from_raw(42), Signal::SIGTERM))
		);
	}

	#[test]
	fn unknown_commands_are_ignored_not_erroring() {
		assert_eq!(parse("frobnicate\n"), None);
		assert_eq!(parse(""), None);
	}

	#[test]
	fn multiple_lines_in_one_read_are_not_dropped() {
		let mut reader = LineReader::new();
		let lines = reader.feed(b"signal 15\nsignal_all 9\n");
		assert_eq!(lines, vec!["signal 15\n", "signal_all 9\n"]);
	}

	#[test]
	fn partial_line_is_buffered_until_completed() {
		let mut reader = LineReader::new();
		assert!(reader.feed(b"signal 1").is_empty());
		let lines = reader.feed(b"5\n");
		assert_eq!(lines, vec!["signal 15\n"]);
	}
}
