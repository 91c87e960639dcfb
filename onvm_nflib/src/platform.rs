/*
 * Created on Tue Oct 06 2020:09:40:26
 * Created by Ratnadeep Bhattacharya
 */

//! Lookup-side facade over the objects the manager owns in shared memory:
//! packet rings, pools, the stats region, the routing policy and the
//! execution-unit table. The NF side only resolves these by name; the
//! `publish_*` half of [`Directory`] exists for the manager process and for
//! test harnesses standing in for it.

use crate::constants::MAX_NFS;
use crate::msg_common::{MsgRing, NfMsg};
use crate::structs::{NfInfo, Packet};
use crossbeam_queue::ArrayQueue;
use lazy_static::lazy_static;
use std::cell::Cell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Bounded lock-free MPMC ring of packets
#[derive(Debug)]
pub struct PacketRing {
	q: ArrayQueue<Packet>,
}

impl PacketRing {
	pub fn with_capacity(cap: usize) -> Arc<Self> {
		Arc::new(Self {
			q: ArrayQueue::new(cap),
		})
	}

	/// Non-blocking single enqueue; hands the packet back on a full ring
	pub fn enqueue(&self, pkt: Packet) -> Result<(), Packet> {
		self.q.push(pkt)
	}

	/// Non-blocking; `None` is a normal outcome
	pub fn dequeue(&self) -> Option<Packet> {
		self.q.pop()
	}

	/// Drain up to `max` packets, preserving ring order
	pub fn dequeue_burst(&self, max: usize) -> Vec<Packet> {
		let mut pkts = Vec::with_capacity(max);
		while pkts.len() < max {
			match self.q.pop() {
				Some(p) => pkts.push(p),
				None => break,
			}
		}
		pkts
	}

	/// All-or-nothing bulk enqueue preserving batch order. Insufficient free
	/// capacity up front rejects the whole batch. The capacity check is exact
	/// only while this side is the ring's sole producer; should another
	/// producer steal slots mid-batch, the unqueued tail is freed and `Ok`
	/// carries the number of packets actually enqueued so nothing gets
	/// credited that never reached the ring.
	pub fn enqueue_bulk(&self, batch: Vec<Packet>) -> Result<usize, Vec<Packet>> {
		if self.q.capacity() - self.q.len() < batch.len() {
			return Err(batch);
		}
		let mut enqueued = 0;
		for pkt in batch {
			if self.q.push(pkt).is_err() {
				break;
			}
			enqueued += 1;
		}
		Ok(enqueued)
	}

	pub fn len(&self) -> usize {
		self.q.len()
	}

	pub fn capacity(&self) -> usize {
		self.q.capacity()
	}

	pub fn is_empty(&self) -> bool {
		self.q.is_empty()
	}
}

/// Fixed population of info structs, co-owned with the manager. `get` takes a
/// free slot, `put` recycles one (clearing identity and mode).
#[derive(Debug)]
pub struct NfInfoPool {
	free: ArrayQueue<Arc<NfInfo>>,
}

impl NfInfoPool {
	pub fn with_population(n: usize) -> Arc<Self> {
		let free = ArrayQueue::new(n);
		for _ in 0..n {
			let _ = free.push(Arc::new(NfInfo::default()));
		}
		Arc::new(Self { free })
	}

	pub fn get(&self) -> Option<Arc<NfInfo>> {
		self.free.pop()
	}

	pub fn put(&self, info: Arc<NfInfo>) {
		info.reset();
		// a full free list means someone double-freed; drop the extra handle
		let _ = self.free.push(info);
	}

	pub fn available(&self) -> usize {
		self.free.len()
	}
}

/// Fixed population of control messages, carried by value between pool and
/// rings so no interior mutability is needed on the message itself
#[derive(Debug)]
pub struct MsgPool {
	free: ArrayQueue<NfMsg>,
}

impl MsgPool {
	pub fn with_population(n: usize) -> Arc<Self> {
		let free = ArrayQueue::new(n);
		for _ in 0..n {
			let _ = free.push(NfMsg::blank());
		}
		Arc::new(Self { free })
	}

	pub fn get(&self) -> Option<NfMsg> {
		self.free.pop()
	}

	pub fn put(&self, mut msg: NfMsg) {
		msg.msg_data = None;
		let _ = self.free.push(msg);
	}

	pub fn available(&self) -> usize {
		self.free.len()
	}
}

const STATS_ZERO: AtomicU64 = AtomicU64::new(0);

/// Shared tx counters, one slot per instance ID. Concurrent writers are fine
/// because each NF only touches its own slot; relaxed ordering throughout.
#[derive(Debug)]
pub struct TxStats {
	tx: [AtomicU64; MAX_NFS],
	tx_drop: [AtomicU64; MAX_NFS],
	tx_returned: [AtomicU64; MAX_NFS],
	tx_buffer: [AtomicU64; MAX_NFS],
}

impl TxStats {
	pub fn new_region() -> Arc<Self> {
		Arc::new(Self {
			tx: [STATS_ZERO; MAX_NFS],
			tx_drop: [STATS_ZERO; MAX_NFS],
			tx_returned: [STATS_ZERO; MAX_NFS],
			tx_buffer: [STATS_ZERO; MAX_NFS],
		})
	}

	pub fn add_tx(&self, id: u16, n: u64) {
		self.tx[id as usize].fetch_add(n, Ordering::Relaxed);
	}

	pub fn add_tx_drop(&self, id: u16, n: u64) {
		self.tx_drop[id as usize].fetch_add(n, Ordering::Relaxed);
	}

	pub fn add_tx_returned(&self, id: u16, n: u64) {
		self.tx_returned[id as usize].fetch_add(n, Ordering::Relaxed);
	}

	pub fn add_tx_buffer(&self, id: u16, n: u64) {
		self.tx_buffer[id as usize].fetch_add(n, Ordering::Relaxed);
	}

	pub fn tx(&self, id: u16) -> u64 {
		self.tx[id as usize].load(Ordering::Relaxed)
	}

	pub fn tx_drop(&self, id: u16) -> u64 {
		self.tx_drop[id as usize].load(Ordering::Relaxed)
	}

	pub fn tx_returned(&self, id: u16) -> u64 {
		self.tx_returned[id as usize].load(Ordering::Relaxed)
	}

	pub fn tx_buffer(&self, id: u16) -> u64 {
		self.tx_buffer[id as usize].load(Ordering::Relaxed)
	}
}

/// One step of the default routing policy
#[derive(Debug, Clone, Copy, Default)]
pub struct ServiceChainEntry {
	pub destination: u16,
	pub action: u8,
}

/// The ordered forwarding configuration the manager publishes. NFs consume
/// it (and log it at startup); they never manage it.
#[derive(Debug, Default)]
pub struct ServiceChain {
	pub sc: Vec<ServiceChainEntry>,
}

impl ServiceChain {
	pub fn chain_length(&self) -> usize {
		self.sc.len()
	}

	/// Startup diagnostic mirroring the manager's view of the policy
	pub fn log_chain(&self) {
		log::info!("Default chain, length {}:", self.sc.len());
		for (i, entry) in self.sc.iter().enumerate() {
			log::info!(
				"  [{}] action {} destination {}",
				i,
				entry.action,
				entry.destination
			);
		}
	}
}

/// Name -> object map standing in for the shared-memory namespace lookup
/// (memzones, rings and mempools are all found by well-known names). One per
/// process; the manager populates it, NFs only read it.
#[derive(Default)]
pub struct Directory {
	packet_rings: Mutex<HashMap<String, Arc<PacketRing>>>,
	msg_rings: Mutex<HashMap<String, Arc<MsgRing>>>,
	info_pools: Mutex<HashMap<String, Arc<NfInfoPool>>>,
	msg_pools: Mutex<HashMap<String, Arc<MsgPool>>>,
	stats: Mutex<HashMap<String, Arc<TxStats>>>,
	chains: Mutex<HashMap<String, Arc<ServiceChain>>>,
}

macro_rules! directory_accessors {
	($publish:ident, $lookup:ident, $field:ident, $t:ty) => {
		pub fn $publish(&self, name: &str, obj: Arc<$t>) {
			self.$field.lock().unwrap().insert(name.to_string(), obj);
		}

		pub fn $lookup(&self, name: &str) -> Option<Arc<$t>> {
			self.$field.lock().unwrap().get(name).cloned()
		}
	};
}

impl Directory {
	directory_accessors!(publish_packet_ring, lookup_packet_ring, packet_rings, PacketRing);
	directory_accessors!(publish_msg_ring, lookup_msg_ring, msg_rings, MsgRing);
	directory_accessors!(publish_info_pool, lookup_info_pool, info_pools, NfInfoPool);
	directory_accessors!(publish_msg_pool, lookup_msg_pool, msg_pools, MsgPool);
	directory_accessors!(publish_stats, lookup_stats, stats, TxStats);
	directory_accessors!(publish_chain, lookup_chain, chains, ServiceChain);

	/// Tear down the namespace, as a manager restart would. Test harness use.
	pub fn clear(&self) {
		self.packet_rings.lock().unwrap().clear();
		self.msg_rings.lock().unwrap().clear();
		self.info_pools.lock().unwrap().clear();
		self.msg_pools.lock().unwrap().clear();
		self.stats.lock().unwrap().clear();
		self.chains.lock().unwrap().clear();
	}
}

lazy_static! {
	static ref DIRECTORY: Directory = Directory::default();
}

pub fn directory() -> &'static Directory {
	&DIRECTORY
}

/// The orchestrating execution unit: the one the process started on, and the
/// only one allowed to launch replicas
pub const MASTER_UNIT: usize = 0;

struct UnitSlot {
	busy: AtomicBool,
}

/// Table of the host's execution units and whether each is running work.
/// Scaling claims an idle unit with a compare-and-set before launching a
/// replica on it, so two concurrent scale triggers cannot pick the same one.
pub struct ExecUnits {
	slots: Vec<UnitSlot>,
}

impl ExecUnits {
	pub fn new(n: usize) -> Self {
		let slots = (0..n)
			.map(|_| UnitSlot {
				busy: AtomicBool::new(false),
			})
			.collect();
		Self { slots }
	}

	pub fn count(&self) -> usize {
		self.slots.len()
	}

	pub fn is_busy(&self, unit: usize) -> bool {
		self.slots[unit].busy.load(Ordering::Acquire)
	}

	/// Claim an idle unit; false means it became busy first
	pub fn claim(&self, unit: usize) -> bool {
		self.slots[unit]
			.busy
			.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
			.is_ok()
	}

	pub fn release(&self, unit: usize) {
		self.slots[unit].busy.store(false, Ordering::Release);
	}
}

thread_local! {
	static CURRENT_UNIT: Cell<Option<usize>> = Cell::new(None);
}

/// The execution unit this thread runs on, if it was launched onto one
pub fn current_unit() -> Option<usize> {
	CURRENT_UNIT.with(|u| u.get())
}

pub(crate) fn set_current_unit(unit: usize) {
	CURRENT_UNIT.with(|u| u.set(Some(unit)));
}
