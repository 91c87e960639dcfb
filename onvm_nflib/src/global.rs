/*
 * Created on Tue Oct 06 2020:14:22:37
 * Created by Ratnadeep Bhattacharya
 */

//! Process-wide runtime context. One `NfContext` is built per process and
//! every entry point (registration, run loop, scaling) works against it
//! instead of scattered globals. The keep-running flag is the one exception:
//! it backs the signal handler, so it has to be a plain static - the context
//! only hands out a reference to it.

use crate::platform::{set_current_unit, ExecUnits, MASTER_UNIT};
use lazy_static::lazy_static;
use std::sync::atomic::AtomicBool;
use std::sync::{Mutex, Once};

// True as long as the NFs in this process should keep processing packets.
// Cleared by the Stop control message or by SIGINT/SIGTERM.
static KEEP_RUNNING: AtomicBool = AtomicBool::new(false);

/// The initial arguments and tag, captured once so scaled replicas can rerun
/// registration with them
#[derive(Clone)]
pub struct FirstInit {
	pub args: Vec<String>,
	pub nf_tag: String,
}

pub struct NfContext {
	pub units: ExecUnits,
	first_init: Mutex<Option<FirstInit>>,
	bootstrap: Once,
}

impl NfContext {
	fn new() -> Self {
		Self {
			units: ExecUnits::new(num_cpus::get()),
			first_init: Mutex::new(None),
			bootstrap: Once::new(),
		}
	}

	pub fn keep_running(&self) -> &'static AtomicBool {
		&KEEP_RUNNING
	}

	/// One-time platform bootstrap. The first `init` call in the process runs
	/// it: logging comes up, the calling thread is pinned as the orchestrating
	/// unit, and the arguments are kept for later scale-out. Scaled children
	/// call `init` too and skip all of it.
	pub fn bootstrap_once(&self, args: &[String], nf_tag: &str) {
		self.bootstrap.call_once(|| {
			let _ = env_logger::Builder::from_default_env().try_init();
			self.units.claim(MASTER_UNIT);
			set_current_unit(MASTER_UNIT);
			*self.first_init.lock().unwrap() = Some(FirstInit {
				args: args.to_vec(),
				nf_tag: nf_tag.to_string(),
			});
		});
	}

	/// The captured startup arguments, present after the first `init`
	pub fn first_init(&self) -> Option<FirstInit> {
		self.first_init.lock().unwrap().clone()
	}
}

lazy_static! {
	static ref CONTEXT: NfContext = NfContext::new();
}

/// The per-process runtime context
pub fn context() -> &'static NfContext {
	&CONTEXT
}
