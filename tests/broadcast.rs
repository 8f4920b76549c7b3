//! End-to-end scenario 4 (design doc §8): `signal_all <n>\n` reaches every
//! current descendant. The primary child ignores `SIGTERM` (so it survives
//! being a broadcast target itself, as any other descendant would) and waits
//! on ten long-sleeping children; once `signal_all` reaches them all, `wait`
//! returns almost immediately instead of after 60s.

#![cfg(unix)]

mod common;

use std::time::Duration;

#[test]
fn signal_all_reaches_every_descendant() {
	let script = "trap '' TERM; for i in 1 2 3 4 5 6 7 8 9 10; do sleep 60 & done; wait; exit 5";
	let sup = common::Supervised::spawn("/bin/sh", &["-c", script]);
	let status_fd = sup.status_fd();

	// Let all ten background sleepers actually start before broadcasting.
	std::thread::sleep(Duration::from_millis(500));
	sup.write_command("signal_all 15\n");

	let (mut child, _status_read) = sup.disconnect();
	let lines = common::read_status_lines(status_fd, Duration::from_secs(10));

	assert!(lines.contains(&"exited 5".to_string()), "{:?}", lines);

	let code = common::wait_with_timeout(&mut child, Duration::from_secs(5));
	assert_eq!(code, Some(5), "wait should unblock quickly once every sleeper was broadcast SIGTERM");
}
