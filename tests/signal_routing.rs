//! End-to-end scenario 3 (design doc §8): `signal <n>\n` reaches the primary
//! child and only the primary child. A child that traps `SIGTERM` and exits
//! cleanly should show up as `exited <n>`, not `killed 15`.

#![cfg(unix)]

mod common;

use std::time::Duration;

#[test]
fn signal_command_is_delivered_to_primary_child_only() {
	let script = "trap 'exit 7' TERM; while true; do sleep 1; done";
	let sup = common::Supervised::spawn("/bin/sh", &["-c", script]);
	let status_fd = sup.status_fd();

	// Give the shell a moment to install its trap before we signal it.
	std::thread::sleep(Duration::from_millis(300));
	sup.write_command("signal 15\n");

	let (mut child, _status_read) = sup.disconnect();
	let lines = common::read_status_lines(status_fd, Duration::from_secs(5));

	assert!(lines.contains(&"exited 7".to_string()), "{:?}", lines);
	assert!(!lines.iter().any(|l| l.starts_with("killed")), "child trapped and exited cleanly: {:?}", lines);

	let code = common::wait_with_timeout(&mut child, Duration::from_secs(5));
	assert_eq!(code, Some(7));
}
