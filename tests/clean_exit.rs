//! End-to-end scenario 1 (design doc §8): launch `/bin/true` and expect
//! `pid <n>`, `exited 0`, `no_children`, `terminating` on the status
//! channel, in that order, with exit code 0.

#![cfg(unix)]

mod common;

use std::time::Duration;

#[test]
fn true_exits_cleanly_with_expected_status_records() {
	let sup = common::Supervised::spawn("/bin/true", &[]);
	let status_fd = sup.status_fd();
	let (mut child, _status_read) = sup.disconnect();

	let lines = common::read_status_lines(status_fd, Duration::from_secs(5));
	assert!(lines[0].starts_with("pid "), "first record should be pid <n>, got {:?}", lines);
	assert!(lines.contains(&"exited 0".to_string()), "{:?}", lines);
	assert!(lines.contains(&"no_children".to_string()), "{:?}", lines);
	assert_eq!(lines.last(), Some(&"terminating".to_string()));

	let code = common::wait_with_timeout(&mut child, Duration::from_secs(5));
	assert_eq!(code, Some(0));
}
