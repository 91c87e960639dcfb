/*
 * Created on Fri Oct 09 2020:14:55:08
 * Created by Ratnadeep Bhattacharya
 */

//! An in-process stand-in for the manager: provisions the shared namespace
//! and answers the registration protocol the way the real manager would.

#![allow(dead_code)]

use lazy_static::lazy_static;
use onvm_nflib::constants::{
	MZ_CLIENT_INFO, MZ_SCP_INFO, NF_MSG_POOL_SIZE, NF_MSG_QUEUE_SIZE, NF_NO_ID,
	NF_QUEUE_RINGSIZE, _MGR_MSG_QUEUE_NAME, _NF_MEMPOOL_NAME, _NF_MSG_POOL_NAME,
};
use onvm_nflib::msg_common::{MsgRing, MsgType};
use onvm_nflib::platform::{
	directory, MsgPool, NfInfoPool, PacketRing, ServiceChain, ServiceChainEntry, TxStats,
};
use onvm_nflib::structs::NfStatus;
use onvm_nflib::{get_msg_queue_name, get_rx_queue_name, get_tx_queue_name};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

const INFO_POOL_SIZE: usize = 16;

lazy_static! {
	// the namespace and the running flag are process-wide, so tests that
	// provision a manager cannot overlap
	static ref TEST_LOCK: Mutex<()> = Mutex::new(());
}

pub fn serial() -> MutexGuard<'static, ()> {
	TEST_LOCK.lock().unwrap_or_else(|p| p.into_inner())
}

/// What the manager observed, in arrival order
#[derive(Default, Clone)]
pub struct ManagerLog {
	pub assigned: Vec<u16>,
	pub ready: Vec<u16>,
	pub stopped: Vec<u16>,
	pub conflicts: u32,
	in_use: HashSet<u16>,
}

pub struct MockManager {
	pub info_pool: Arc<NfInfoPool>,
	pub msg_pool: Arc<MsgPool>,
	pub stats: Arc<TxStats>,
	pub mgr_ring: Arc<MsgRing>,
	log: Arc<Mutex<ManagerLog>>,
	stop: Arc<AtomicBool>,
	handle: Option<thread::JoinHandle<()>>,
}

impl MockManager {
	/// Provision a fresh namespace and start answering registrations
	pub fn start() -> Self {
		let dir = directory();
		dir.clear();

		let info_pool = NfInfoPool::with_population(INFO_POOL_SIZE);
		let msg_pool = MsgPool::with_population(NF_MSG_POOL_SIZE);
		let stats = TxStats::new_region();
		let chain = Arc::new(ServiceChain {
			sc: vec![ServiceChainEntry {
				destination: 1,
				action: 2,
			}],
		});
		let mgr_ring = MsgRing::with_capacity(NF_MSG_QUEUE_SIZE);

		dir.publish_info_pool(_NF_MEMPOOL_NAME, info_pool.clone());
		dir.publish_msg_pool(_NF_MSG_POOL_NAME, msg_pool.clone());
		dir.publish_stats(MZ_CLIENT_INFO, stats.clone());
		dir.publish_chain(MZ_SCP_INFO, chain);
		dir.publish_msg_ring(_MGR_MSG_QUEUE_NAME, mgr_ring.clone());

		let log = Arc::new(Mutex::new(ManagerLog::default()));
		let stop = Arc::new(AtomicBool::new(false));

		let handle = {
			let mgr_ring = mgr_ring.clone();
			let msg_pool = msg_pool.clone();
			let info_pool = info_pool.clone();
			let log = log.clone();
			let stop = stop.clone();
			thread::spawn(move || {
				while !stop.load(Ordering::Relaxed) {
					while let Some(msg) = mgr_ring.dequeue() {
						handle_nf_message(&msg.msg_type, &msg.msg_data, &info_pool, &log);
						msg_pool.put(msg);
					}
					thread::sleep(Duration::from_millis(2));
				}
			})
		};

		Self {
			info_pool,
			msg_pool,
			stats,
			mgr_ring,
			log,
			stop,
			handle: Some(handle),
		}
	}

	pub fn log(&self) -> ManagerLog {
		self.log.lock().unwrap().clone()
	}

	/// Shared handle to the log, for watcher threads that outlive a borrow
	pub fn log_handle(&self) -> Arc<Mutex<ManagerLog>> {
		self.log.clone()
	}

	/// Push a control message onto an instance's message ring
	pub fn send_control(&self, instance_id: u16, kind: MsgType) {
		let ring = directory()
			.lookup_msg_ring(&get_msg_queue_name!(instance_id))
			.expect("no message ring for that instance");
		let mut msg = self.msg_pool.get().expect("message pool exhausted");
		msg.msg_type = kind;
		ring.enqueue(msg).ok().expect("instance message ring full");
	}
}

impl Drop for MockManager {
	fn drop(&mut self) {
		self.stop.store(true, Ordering::Relaxed);
		if let Some(h) = self.handle.take() {
			let _ = h.join();
		}
	}
}

fn handle_nf_message(
	msg_type: &MsgType,
	msg_data: &Option<Arc<onvm_nflib::NfInfo>>,
	info_pool: &Arc<NfInfoPool>,
	log: &Arc<Mutex<ManagerLog>>,
) {
	let info = match msg_data {
		Some(info) => info,
		None => return,
	};
	let mut log = log.lock().unwrap();
	match msg_type {
		MsgType::NfStarting => {
			let requested = info.instance_id();
			let id = if requested == NF_NO_ID {
				let mut id = 1u16;
				while log.in_use.contains(&id) {
					id += 1;
				}
				Some(id)
			} else if log.in_use.contains(&requested) {
				None
			} else {
				Some(requested)
			};
			match id {
				Some(id) => {
					log.in_use.insert(id);
					let dir = directory();
					dir.publish_packet_ring(
						&get_rx_queue_name!(id),
						PacketRing::with_capacity(NF_QUEUE_RINGSIZE),
					);
					dir.publish_packet_ring(
						&get_tx_queue_name!(id),
						PacketRing::with_capacity(NF_QUEUE_RINGSIZE),
					);
					dir.publish_msg_ring(
						&get_msg_queue_name!(id),
						MsgRing::with_capacity(NF_MSG_QUEUE_SIZE),
					);
					// identity must land before the status flips
					info.set_instance_id(id);
					info.set_status(NfStatus::Starting);
					log.assigned.push(id);
				}
				None => {
					log.conflicts += 1;
					info.set_status(NfStatus::IdConflict);
				}
			}
		}
		MsgType::NfReady => {
			info.set_status(NfStatus::Running);
			let id = info.instance_id();
			log.ready.push(id);
		}
		MsgType::NfStopping => {
			let id = info.instance_id();
			log.in_use.remove(&id);
			log.stopped.push(id);
			info_pool.put(info.clone());
		}
		_ => {}
	}
}

/// Poll `cond` until it holds or `timeout` passes
pub fn wait_until<F: Fn() -> bool>(cond: F, timeout: Duration) -> bool {
	let deadline = Instant::now() + timeout;
	while Instant::now() < deadline {
		if cond() {
			return true;
		}
		thread::sleep(Duration::from_millis(2));
	}
	cond()
}
