/*
 * Created on Thu Oct 08 2020:11:02:45
 * Created by Ratnadeep Bhattacharya
 */

//! Opportunistic scaling: when the manager suggests it, launch another copy
//! of this service on an idle execution unit. Scaling is best effort - every
//! precondition failure is a logged no-op, never an error back to the loop.

use crate::global;
use crate::init;
use crate::platform::{current_unit, set_current_unit, MASTER_UNIT};
use crate::run;
use crate::structs::{NfLocalCtx, NfMode, PktHandler};
use log::{error, info, warn};
use std::thread;

/// Try to launch one replica of this NF's service.
///
/// No-ops (logged) when the instance has no headroom left, when called off
/// the orchestrating unit, or when the instance is not in handler-driven
/// mode. Only the orchestrating unit scans for idle units, so replicas never
/// launch replicas of their own.
pub fn scale(nf_local_ctx: &NfLocalCtx) {
	let info = &nf_local_ctx.info;

	if info.mode() != NfMode::HandlerDriven {
		info!(
			"NF {}: not in handler-driven mode, ignoring scale request",
			info.instance_id()
		);
		return;
	}
	if info.headroom() == 0 {
		info!(
			"NF {}: no headroom left, ignoring scale request",
			info.instance_id()
		);
		return;
	}
	if current_unit() != Some(MASTER_UNIT) {
		info!(
			"NF {}: scale request off the orchestrating unit, ignoring",
			info.instance_id()
		);
		return;
	}

	let units = &global::context().units;
	// scan past the orchestrating unit; no wrap-around
	for unit in (MASTER_UNIT + 1)..units.count() {
		if units.claim(unit) {
			start_child(nf_local_ctx, unit);
			return;
		}
	}
	info!(
		"NF {}: no idle execution unit, ignoring scale request",
		info.instance_id()
	);
}

/// Launch a replica on the claimed `unit`. Fire and forget: the child
/// registers as a fresh instance with the captured startup arguments, runs
/// the parent's handler, and releases the unit when its loop exits.
fn start_child(nf_local_ctx: &NfLocalCtx, unit: usize) {
	let info = &nf_local_ctx.info;
	let ctx = global::context();

	let first_init = match ctx.first_init() {
		Some(fi) => fi,
		None => {
			// cannot happen after bootstrap, but don't hold the unit hostage
			warn!("scale requested before process init, ignoring");
			ctx.units.release(unit);
			return;
		}
	};
	let handler: PktHandler = match info.pkt_function() {
		Some(f) => f,
		None => {
			warn!(
				"NF {}: no packet handler registered, cannot scale",
				info.instance_id()
			);
			ctx.units.release(unit);
			return;
		}
	};

	// the replica takes the headroom from its own context, so the parent's
	// count moves only once the launch actually happened
	let parent_info = info.clone();
	let spawned = thread::Builder::new()
		.name(format!("nf-child-{}", unit))
		.spawn(move || {
			set_current_unit(unit);
			let new_headroom = parent_info.decrement_headroom();
			info!(
				"Starting another copy of service {}, new headroom: {}",
				parent_info.service_id(),
				new_headroom
			);
			child_main(&first_init.args, &first_init.nf_tag, handler);
			global::context().units.release(unit);
		});
	if let Err(e) = spawned {
		error!("could not launch replica thread: {}", e);
		ctx.units.release(unit);
	}
}

/// Body of a replica thread: a full registration handshake under the original
/// startup arguments, then the managed loop until the process-wide running
/// flag clears
fn child_main(args: &[String], nf_tag: &str, handler: PktHandler) {
	let (mut nf_local_ctx, _) = match init::init(args, nf_tag) {
		Ok(v) => v,
		Err(e) => {
			error!("replica failed to register: {:?}", e);
			return;
		}
	};
	if let Err(e) = run::run(&mut nf_local_ctx, handler) {
		error!(
			"replica NF {} exited with error: {:?}",
			nf_local_ctx.info.instance_id(),
			e
		);
	}
}
