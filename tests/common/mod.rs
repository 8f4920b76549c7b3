//! Shared scaffolding for the end-to-end `supervise` scenarios in §8 of the
//! design doc. Builds the real `supervise` binary via `escargot` (following
//! `alecmocatta-palaver/tests/env.rs`'s `escargot::CargoBuild` pattern) and
//! wires up real OS pipes for the control/status channels, exactly as an
//! owner process would, rather than mocking anything.

#![allow(dead_code)]

use std::{
	os::fd::{AsRawFd, OwnedFd, RawFd}, path::PathBuf, process::{Child, Command}, sync::OnceLock, time::Duration
};

fn supervise_path() -> &'static PathBuf {
	static PATH: OnceLock<PathBuf> = OnceLock::new();
	PATH.get_or_init(|| {
		escargot::CargoBuild::new()
			.bin("supervise")
			.current_release()
			.current_target()
			.run()
			.unwrap()
			.path()
			.to_path_buf()
	})
}

/// The owner's view of a spawned supervisor: a write end for commands and a
/// read end for status records. Both are ordinary blocking pipe fds from the
/// owner's side — the supervisor is the one required to be non-blocking.
pub struct Supervised {
	pub child: Child,
	control_write: OwnedFd,
	status_read: OwnedFd,
}

impl Supervised {
	/// Launch `program args...` under `supervise`, handing it one end of a
	/// freshly-created control pipe and one end of a freshly-created status
	/// pipe. This relies on the same inherited-fd mechanism real owners use:
	/// `nix::unistd::pipe` does not set `O_CLOEXEC`, so the child process
	/// from `Command::spawn` inherits both ends at the same fd numbers we
	/// pass as argv, and we close the ends we don't need in this process.
	pub fn spawn(program: &str, args: &[&str]) -> Self {
		let (control_read, control_write) = nix::unistd::pipe().unwrap();
		let (status_read, status_write) = nix::unistd::pipe().unwrap();
		// Only the supervisor-side ends (control_read, status_write) should
		// cross the coming exec; the owner-side ends must close on exec so
		// the supervisor sees a real EOF/closed-write-end when *we* decide
		// to drop them, not only when the whole process tree exits.
		set_cloexec(control_write.as_raw_fd());
		set_cloexec(status_read.as_raw_fd());

		let mut cmd = Command::new(supervise_path());
		cmd.arg(control_read.as_raw_fd().to_string())
			.arg(status_write.as_raw_fd().to_string())
			.arg(program)
			.args(args);
		let child = cmd.spawn().unwrap();

		// These fds now live in the child too; this process has no further
		// use for the supervisor-side ends.
		drop(control_read);
		drop(status_write);

		Self { child, control_write, status_read }
	}

	/// Like [`spawn`](Self::spawn), but with no control channel at all
	/// (`-1`), to exercise a supervisor with nothing it can ever be told to
	/// disconnect from.
	pub fn spawn_no_control(program: &str, args: &[&str]) -> (Child, OwnedFd) {
		let (status_read, status_write) = nix::unistd::pipe().unwrap();
		set_cloexec(status_read.as_raw_fd());
		let mut cmd = Command::new(supervise_path());
		cmd.arg("-1").arg(status_write.as_raw_fd().to_string()).arg(program).args(args);
		let child = cmd.spawn().unwrap();
		drop(status_write);
		(child, status_read)
	}

	pub fn write_command(&self, line: &str) {
		nix::unistd::write(self.control_write.as_raw_fd(), line.as_bytes()).unwrap();
	}

	/// Close the control channel, signalling "owner no longer wants you".
	pub fn disconnect(self) -> (Child, OwnedFd) {
		let Self { child, control_write, status_read } = self;
		drop(control_write);
		(child, status_read)
	}

	pub fn status_fd(&self) -> RawFd {
		self.status_read.as_raw_fd()
	}
}

/// Read every status line emitted within `timeout`, by polling the (still
/// blocking) status read end with a short non-blocking probe loop. Stops
/// early once `terminating\n` has been seen, since nothing more is coming.
pub fn read_status_lines(fd: RawFd, timeout: Duration) -> Vec<String> {
	set_nonblocking(fd);
	let deadline = std::time::Instant::now() + timeout;
	let mut buf = Vec::new();
	let mut chunk = [0u8; 4096];
	loop {
		match nix::unistd::read(fd, &mut chunk) {
			Ok(0) => break,
			Ok(n) => buf.extend_from_slice(&chunk[..n]),
			Err(nix::Error::EAGAIN) => {
				if std::time::Instant::now() >= deadline {
					break;
				}
				std::thread::sleep(Duration::from_millis(20));
				continue;
			}
			Err(e) => panic!("status read error: {}", e),
		}
		if String::from_utf8_lossy(&buf).contains("terminating\n") {
			break;
		}
	}
	String::from_utf8_lossy(&buf).lines().map(str::to_owned).collect()
}

fn set_nonblocking(fd: RawFd) {
	use nix::fcntl::{self, FcntlArg, OFlag};
	let flags = fcntl::fcntl(fd, FcntlArg::F_GETFL).unwrap();
	let flags = OFlag::from_bits_truncate(flags) | OFlag::O_NONBLOCK;
	fcntl::fcntl(fd, FcntlArg::F_SETFL(flags)).unwrap();
}

fn set_cloexec(fd: RawFd) {
	use nix::fcntl::{self, FcntlArg, FdFlag};
	let flags = fcntl::fcntl(fd, FcntlArg::F_GETFD).unwrap();
	let flags = FdFlag::from_bits_truncate(flags) | FdFlag::FD_CLOEXEC;
	fcntl::fcntl(fd, FcntlArg::F_SETFD(flags)).unwrap();
}

/// Wait up to `timeout` for `child` to exit, returning its exit code.
pub fn wait_with_timeout(child: &mut Child, timeout: Duration) -> Option<i32> {
	let deadline = std::time::Instant::now() + timeout;
	loop {
		if let Some(status) = child.try_wait().unwrap() {
			return status.code();
		}
		if std::time::Instant::now() >= deadline {
			return None;
		}
		std::thread::sleep(Duration::from_millis(20));
	}
}
