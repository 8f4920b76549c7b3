//! `supervise <controlfd> <statusfd> <program> [args…]`
//!
//! The minimal runnable entry point for the supervisor loop (§4.E / §6 of the
//! design doc). Argument parsing is hand-rolled, following
//! `original_source/supervise.c::get_options`'s own `strtol`-based parsing —
//! a CLI-parsing crate is explicitly out of scope for this core.

fn main() {
	filicide::log_init::init();

	let opt = match filicide::supervisor::Options::parse(std::env::args()) {
		Ok(opt) => opt,
		Err(e) => {
			eprintln!("supervise: {}", e);
			std::process::exit(1);
		}
	};

	let code = filicide::Supervisor::run(opt);
	std::process::exit(code);
}
