/*
 * Created on Fri Oct 09 2020:10:21:30
 * Created by Ratnadeep Bhattacharya
 */

//! A minimal pass-through NF: registers with the manager and forwards every
//! packet unchanged. Run as `onvm_nf_test [-n <instance>] -r <service>`.

use exitfailure::ExitFailure;
use log::info;
use onvm_nflib::{PktMeta, run};
use std::env;

fn forwarder(_pkt: &mut Vec<u8>, _meta: &mut PktMeta) -> i32 {
	// 0 tells the run loop to send the packet on
	0
}

fn main() -> Result<(), ExitFailure> {
	let args: Vec<String> = env::args().collect();
	let (mut nf_local_ctx, consumed) = onvm_nflib::init(&args, "simple_forward")?;
	if consumed < args.len() {
		info!("NF-specific args: {:?}", &args[consumed..]);
	}
	run(&mut nf_local_ctx, forwarder)?;
	Ok(())
}
