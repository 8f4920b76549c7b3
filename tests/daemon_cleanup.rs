//! End-to-end scenario 2 (design doc §8): the primary child double-forks a
//! grandchild that sleeps far longer than the test should take. The owner
//! closes the control channel shortly after launch; the supervisor must
//! still be the subreaper for the orphaned grandchild (even though it is two
//! hops removed from the primary child) and kill it, exiting quickly rather
//! than waiting out the sleep.

#![cfg(unix)]

mod common;

use std::time::Duration;

#[test]
fn orphaned_grandchild_is_reaped_on_owner_disconnect() {
	// Primary child forks an intermediate, which forks a long sleeper and
	// exits; the primary child then exits too, so by the time we act the
	// sleeper has been reparented twice.
	let script = r#"(sh -c '(sleep 60 &) ; exit 0' &) ; exit 0"#;
	let sup = common::Supervised::spawn("/bin/sh", &["-c", script]);
	let status_fd = sup.status_fd();

	std::thread::sleep(Duration::from_secs(1));
	let (mut child, _status_read) = sup.disconnect();

	let lines = common::read_status_lines(status_fd, Duration::from_secs(10));
	assert!(lines.contains(&"no_children".to_string()), "{:?}", lines);
	assert_eq!(lines.last(), Some(&"terminating".to_string()));

	let code = common::wait_with_timeout(&mut child, Duration::from_secs(5));
	assert_eq!(code, Some(0), "supervisor should exit 0 on a clean owner-triggered sweep");
}
