/*
 * Created on Wed Oct 07 2020:15:48:19
 * Created by Ratnadeep Bhattacharya
 */

//! The steady-state packet loop and the control-message state machine.

use crate::constants::PACKET_READ_SIZE;
use crate::error_handling::NfError;
use crate::global;
use crate::msg_common::{MsgType, NfMsg};
use crate::platform::PacketRing;
use crate::platform::TxStats;
use crate::scale;
use crate::structs::{NfLocalCtx, NfMode, NfStatus, Packet, PktHandler};
use exitfailure::ExitFailure;
use failure::ResultExt;
use log::info;
use std::sync::atomic::Ordering;
use std::sync::Arc;

// Async-signal context: set the flag and nothing else. All shutdown work
// (status update, the Stopping handshake) runs in the loop's own context.
extern "C" fn handle_signal(_sig: libc::c_int) {
	global::context()
		.keep_running()
		.store(false, Ordering::Relaxed);
}

#[cfg(unix)]
fn install_signal_handlers() {
	unsafe {
		libc::signal(libc::SIGINT, handle_signal as libc::sighandler_t);
		libc::signal(libc::SIGTERM, handle_signal as libc::sighandler_t);
	}
}

#[cfg(not(unix))]
fn install_signal_handlers() {}

/// Drive `handler` over this instance's rx ring until told to stop.
///
/// Fails immediately if the instance already handed its rings out through the
/// direct accessors (the two consuming modes are mutually exclusive). Blocks
/// until the running flag clears - by a `Stop` control message or a
/// SIGINT/SIGTERM - then performs the shutdown handshake exactly once.
pub fn run(nf_local_ctx: &mut NfLocalCtx, handler: PktHandler) -> Result<(), ExitFailure> {
	let ctx = global::context();

	/* Don't allow conflicting NF modes */
	if !nf_local_ctx.info.try_set_mode(NfMode::HandlerDriven) {
		return Err(NfError::ModeConflict.into());
	}

	/* Listen for ^C and docker stop so we can exit gracefully */
	install_signal_handlers();

	nf_local_ctx.info.set_pkt_function_if_none(handler);

	info!(
		"Client process {} handling packets",
		nf_local_ctx.info.instance_id()
	);
	info!("Sending NF_READY message to manager...");
	nf_ready(nf_local_ctx).context("unable to message manager")?;

	info!("[Press Ctrl-C to quit ...]");
	let keep_running = ctx.keep_running();
	while keep_running.load(Ordering::Relaxed) {
		dequeue_packets(nf_local_ctx, handler);
		dequeue_messages(nf_local_ctx);
	}

	/* Stop and free */
	cleanup(nf_local_ctx)?;
	Ok(())
}

/// Drain one burst from the rx ring and run every packet through the handler.
/// Forward-marked packets go to the tx ring in one all-or-nothing bulk
/// enqueue; an insufficient-capacity tx ring drops the whole batch (buffers
/// released, `tx_drop` bumped by the batch size) with no retry.
fn dequeue_packets(nf_local_ctx: &NfLocalCtx, handler: PktHandler) {
	let pkts = nf_local_ctx.rx_ring.dequeue_burst(PACKET_READ_SIZE);
	if pkts.is_empty() {
		return;
	}

	let id = nf_local_ctx.info.instance_id();
	let mut tx_batch = Vec::with_capacity(pkts.len());

	/* Give each packet to the user processing function */
	for mut pkt in pkts {
		let ret_act = {
			let Packet { data, meta } = &mut pkt;
			handler(data, meta)
		};
		/* NF returns 0 to forward packets or nonzero to buffer */
		if ret_act == 0 {
			tx_batch.push(pkt);
		} else {
			// the handler kept the payload; whatever is left of the
			// buffer is released here
			nf_local_ctx.tx_stats.add_tx_buffer(id, 1);
		}
	}

	if tx_batch.is_empty() {
		return;
	}
	let batch_size = tx_batch.len() as u64;
	match nf_local_ctx.tx_ring.enqueue_bulk(tx_batch) {
		Ok(enqueued) => {
			nf_local_ctx.tx_stats.add_tx(id, enqueued as u64);
			// shortfall only if something else produces onto our tx ring
			if (enqueued as u64) < batch_size {
				nf_local_ctx
					.tx_stats
					.add_tx_drop(id, batch_size - enqueued as u64);
			}
		}
		Err(rejected) => {
			/* no partial admission, no retry */
			nf_local_ctx.tx_stats.add_tx_drop(id, batch_size);
			drop(rejected);
		}
	}
}

/// Check whether the manager has a message for this NF and process exactly
/// one, returning it to the shared pool afterwards
fn dequeue_messages(nf_local_ctx: &NfLocalCtx) {
	if nf_local_ctx.msg_ring.is_empty() {
		return;
	}
	if let Some(msg) = nf_local_ctx.msg_ring.dequeue() {
		handle_msg(nf_local_ctx, &msg);
		nf_local_ctx.nf_msg_pool.put(msg);
	}
}

/// Manager -> NF control dispatch. Unknown kinds are deliberately accepted
/// as no-ops so older NFs keep working as the protocol grows.
pub fn handle_msg(nf_local_ctx: &NfLocalCtx, msg: &NfMsg) {
	match msg.msg_type {
		MsgType::Stop => {
			info!(
				"NF {} shutting down...",
				nf_local_ctx.info.instance_id()
			);
			global::context()
				.keep_running()
				.store(false, Ordering::Relaxed);
		}
		MsgType::Scale => {
			info!(
				"NF {} received scale message...",
				nf_local_ctx.info.instance_id()
			);
			scale::scale(nf_local_ctx);
		}
		_ => {}
	}
}

/// Tell the manager we're ready to receive packets
pub fn nf_ready(nf_local_ctx: &NfLocalCtx) -> Result<(), NfError> {
	let mut msg = nf_local_ctx
		.nf_msg_pool
		.get()
		.ok_or_else(|| NfError::PoolExhausted("ready msg".to_string()))?;
	msg.msg_type = MsgType::NfReady;
	msg.msg_data = Some(nf_local_ctx.info.clone());
	if let Err(msg) = nf_local_ctx.mgr_msg_queue.enqueue(msg) {
		nf_local_ctx.nf_msg_pool.put(msg);
		return Err(NfError::ChannelFull);
	}
	Ok(())
}

/// Re-emit a packet the handler previously retained. On a full tx ring the
/// buffer is released and `tx_drop` incremented; otherwise `tx_returned`.
pub fn return_pkt(nf_local_ctx: &NfLocalCtx, pkt: Packet) -> Result<(), NfError> {
	let id = nf_local_ctx.info.instance_id();
	match nf_local_ctx.tx_ring.enqueue(pkt) {
		Ok(()) => {
			nf_local_ctx.tx_stats.add_tx_returned(id, 1);
			Ok(())
		}
		Err(pkt) => {
			drop(pkt);
			nf_local_ctx.tx_stats.add_tx_drop(id, 1);
			Err(NfError::ChannelFull)
		}
	}
}

/// Externally triggered shutdown cleanup, for NFs driving their own loop
pub fn stop(nf_local_ctx: &NfLocalCtx) -> Result<(), ExitFailure> {
	cleanup(nf_local_ctx)?;
	Ok(())
}

/// Set this NF's status to stopped and hand its info struct back to the
/// manager. The manager needs this acknowledgment to reclaim the slot, so a
/// failure here is still fatal even though the process is exiting anyway.
fn cleanup(nf_local_ctx: &NfLocalCtx) -> Result<(), NfError> {
	let info = &nf_local_ctx.info;
	info.set_status(NfStatus::Stopped);
	info!("Shutting down NF {}", info.instance_id());

	let mut shutdown_msg = match nf_local_ctx.nf_msg_pool.get() {
		Some(msg) => msg,
		None => {
			nf_local_ctx.nf_info_pool.put(info.clone());
			return Err(NfError::PoolExhausted("shutdown msg".to_string()));
		}
	};
	shutdown_msg.msg_type = MsgType::NfStopping;
	shutdown_msg.msg_data = Some(info.clone());

	if let Err(msg) = nf_local_ctx.mgr_msg_queue.enqueue(shutdown_msg) {
		nf_local_ctx.nf_info_pool.put(info.clone());
		nf_local_ctx.nf_msg_pool.put(msg);
		return Err(NfError::ChannelFull);
	}
	Ok(())
}

/* Direct ring access for NFs that drive their own loop. The first accessor
call fixes the mode to ExternalAccess; anything incompatible with the
established mode gets None instead of the resource. */

pub fn get_rx_ring(nf_local_ctx: &NfLocalCtx) -> Option<Arc<PacketRing>> {
	if nf_local_ctx.info.try_set_mode(NfMode::ExternalAccess) {
		Some(nf_local_ctx.rx_ring.clone())
	} else {
		None
	}
}

pub fn get_tx_ring(nf_local_ctx: &NfLocalCtx) -> Option<Arc<PacketRing>> {
	if nf_local_ctx.info.try_set_mode(NfMode::ExternalAccess) {
		Some(nf_local_ctx.tx_ring.clone())
	} else {
		None
	}
}

pub fn get_tx_stats(nf_local_ctx: &NfLocalCtx) -> Option<Arc<TxStats>> {
	if nf_local_ctx.info.try_set_mode(NfMode::ExternalAccess) {
		Some(nf_local_ctx.tx_stats.clone())
	} else {
		None
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::constants::NF_MSG_POOL_SIZE;
	use crate::msg_common::MsgRing;
	use crate::platform::{MsgPool, NfInfoPool, PacketRing, ServiceChain, TxStats};
	use crate::structs::{NfInfo, PktMeta};
	use lazy_static::lazy_static;
	use std::sync::Mutex;

	lazy_static! {
		// run() and handle_msg(Stop) touch the process-wide running flag
		static ref LOOP_TESTS: Mutex<()> = Mutex::new(());
	}

	fn forward_all(_: &mut Vec<u8>, _: &mut PktMeta) -> i32 {
		0
	}

	// retain packets with an odd first byte; take the payload like a real
	// buffering handler would
	fn retain_odd(data: &mut Vec<u8>, _: &mut PktMeta) -> i32 {
		if !data.is_empty() && data[0] % 2 == 1 {
			let _owned = std::mem::replace(data, Vec::new());
			1
		} else {
			0
		}
	}

	fn make_ctx(id: u16, tx_capacity: usize) -> NfLocalCtx {
		let info = Arc::new(NfInfo::default());
		info.set_instance_id(id);
		info.set_service_id(1);
		NfLocalCtx {
			info,
			rx_ring: PacketRing::with_capacity(64),
			tx_ring: PacketRing::with_capacity(tx_capacity),
			msg_ring: MsgRing::with_capacity(16),
			mgr_msg_queue: MsgRing::with_capacity(16),
			tx_stats: TxStats::new_region(),
			nf_info_pool: NfInfoPool::with_population(4),
			nf_msg_pool: MsgPool::with_population(NF_MSG_POOL_SIZE),
			default_chain: Arc::new(ServiceChain::default()),
		}
	}

	#[test]
	fn batch_splits_into_forwarded_and_retained() {
		let ctx = make_ctx(2, 64);
		for i in 0..7u8 {
			ctx.rx_ring.enqueue(Packet::new(vec![i])).ok().unwrap();
		}
		dequeue_packets(&ctx, retain_odd);
		// 0,2,4,6 forwarded in their original relative order
		let forwarded: Vec<u8> = std::iter::from_fn(|| ctx.tx_ring.dequeue())
			.map(|p| p.data[0])
			.collect();
		assert_eq!(forwarded, vec![0, 2, 4, 6]);
		assert_eq!(ctx.tx_stats.tx(2), 4);
		assert_eq!(ctx.tx_stats.tx_buffer(2), 3);
		assert_eq!(ctx.tx_stats.tx_drop(2), 0);
	}

	#[test]
	fn empty_rx_ring_is_a_normal_outcome() {
		let ctx = make_ctx(3, 4);
		dequeue_packets(&ctx, forward_all);
		assert_eq!(ctx.tx_stats.tx(3), 0);
		assert!(ctx.tx_ring.is_empty());
	}

	#[test]
	fn insufficient_tx_capacity_drops_the_whole_batch() {
		let ctx = make_ctx(4, 4);
		for i in 0..10u8 {
			ctx.rx_ring.enqueue(Packet::new(vec![i])).ok().unwrap();
		}
		dequeue_packets(&ctx, forward_all);
		assert!(ctx.tx_ring.is_empty());
		assert_eq!(ctx.tx_stats.tx(4), 0);
		assert_eq!(ctx.tx_stats.tx_drop(4), 10);
	}

	#[test]
	fn return_pkt_updates_the_right_counter() {
		let ctx = make_ctx(5, 1);
		assert!(return_pkt(&ctx, Packet::new(vec![1])).is_ok());
		assert_eq!(ctx.tx_stats.tx_returned(5), 1);
		// ring now full, next return drops
		match return_pkt(&ctx, Packet::new(vec![2])) {
			Err(NfError::ChannelFull) => {}
			other => panic!("expected ChannelFull, got {:?}", other),
		}
		assert_eq!(ctx.tx_stats.tx_drop(5), 1);
	}

	#[test]
	fn accessors_conflict_with_the_run_loop_mode() {
		let _guard = LOOP_TESTS.lock().unwrap_or_else(|p| p.into_inner());
		let mut ctx = make_ctx(6, 4);
		let ring = get_rx_ring(&ctx);
		assert!(ring.is_some());
		// repeated requests for the established mode keep working
		assert!(get_tx_ring(&ctx).is_some());
		assert!(get_tx_stats(&ctx).is_some());
		// the managed loop refuses to share the rings
		assert!(run(&mut ctx, forward_all).is_err());
		assert_eq!(ctx.info.mode(), NfMode::ExternalAccess);
	}

	#[test]
	fn run_loop_mode_blocks_the_accessors() {
		let info = Arc::new(NfInfo::default());
		assert!(info.try_set_mode(NfMode::HandlerDriven));
		let ctx = NfLocalCtx {
			info,
			..make_ctx(7, 4)
		};
		assert!(get_rx_ring(&ctx).is_none());
		assert!(get_tx_ring(&ctx).is_none());
		assert!(get_tx_stats(&ctx).is_none());
	}

	#[test]
	fn stop_message_ends_the_loop_with_one_shutdown_ack() {
		let _guard = LOOP_TESTS.lock().unwrap_or_else(|p| p.into_inner());
		let mut ctx = make_ctx(8, 64);
		for i in 0..3u8 {
			ctx.rx_ring.enqueue(Packet::new(vec![i])).ok().unwrap();
		}
		let mut stop_msg = ctx.nf_msg_pool.get().unwrap();
		stop_msg.msg_type = MsgType::Stop;
		ctx.msg_ring.enqueue(stop_msg).ok().unwrap();

		global::context()
			.keep_running()
			.store(true, Ordering::Release);
		run(&mut ctx, forward_all).unwrap();

		// the batch in flight was still forwarded, then the loop exited
		assert_eq!(ctx.tx_stats.tx(8), 3);
		assert_eq!(ctx.info.status(), NfStatus::Stopped);
		let mut ready = 0;
		let mut stopping = 0;
		while let Some(msg) = ctx.mgr_msg_queue.dequeue() {
			match msg.msg_type {
				MsgType::NfReady => ready += 1,
				MsgType::NfStopping => stopping += 1,
				other => panic!("unexpected control message {:?}", other),
			}
		}
		assert_eq!(ready, 1);
		assert_eq!(stopping, 1);
	}

	#[test]
	fn unknown_message_kinds_are_noops() {
		let ctx = make_ctx(9, 4);
		let msg = NfMsg {
			msg_type: MsgType::NfStarting, // not a manager -> NF kind
			msg_data: None,
		};
		handle_msg(&ctx, &msg);
		let noop = NfMsg {
			msg_type: MsgType::Noop,
			msg_data: None,
		};
		handle_msg(&ctx, &noop);
		assert_eq!(ctx.info.status(), NfStatus::WaitingForId);
	}

	#[test]
	fn scale_with_no_headroom_is_a_logged_noop() {
		let ctx = make_ctx(10, 4);
		ctx.info.set_headroom(0);
		let msg = NfMsg {
			msg_type: MsgType::Scale,
			msg_data: None,
		};
		// must not launch anything or panic
		handle_msg(&ctx, &msg);
	}
}
