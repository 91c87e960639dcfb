/*
 * Created on Mon Oct 05 2020:11:20:54
 * Created by Ratnadeep Bhattacharya
 */

use crate::constants::NF_NO_ID;
use crate::msg_common::MsgRing;
use crate::platform::{MsgPool, NfInfoPool, PacketRing, ServiceChain, TxStats};
use std::sync::atomic::{AtomicU16, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

/// Lifecycle states of an NF instance. Written by the manager, polled by the
/// NF during registration; only ever advances along
/// WaitingForId -> Starting -> Running -> Stopped, with IdConflict and NoIds
/// as dead ends out of WaitingForId.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NfStatus {
	WaitingForId = 0, // doesn't have an ID confirmed by the manager yet
	Starting = 1,     // in the startup process and already has an ID
	Running = 2,      // running normally
	Stopped = 3,      // stopped and in the shutdown process
	IdConflict = 4,   // tried to declare an ID already in use
	NoIds = 5,        // there are no available IDs for this NF
}

impl NfStatus {
	pub(crate) fn from_raw(v: u8) -> NfStatus {
		match v {
			0 => NfStatus::WaitingForId,
			1 => NfStatus::Starting,
			2 => NfStatus::Running,
			3 => NfStatus::Stopped,
			4 => NfStatus::IdConflict,
			5 => NfStatus::NoIds,
			// status slots are written only through set_status
			_ => unreachable!("invalid NF status value {}", v),
		}
	}
}

/// Possible packet consuming modes of an NF instance. Chosen exactly once:
/// either the managed run loop drives the handler (`HandlerDriven`) or the NF
/// drains its own rings (`ExternalAccess`) - never both, otherwise two
/// consumers would silently split the same rx ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NfMode {
	Unset = 0,
	HandlerDriven = 1,
	ExternalAccess = 2,
}

impl NfMode {
	fn from_raw(v: u8) -> NfMode {
		match v {
			0 => NfMode::Unset,
			1 => NfMode::HandlerDriven,
			2 => NfMode::ExternalAccess,
			_ => unreachable!("invalid NF mode value {}", v),
		}
	}
}

/// What the switching layer should do with a packet after the NF is done
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PktAction {
	Drop, // drop packet
	Next, // to whatever the next action is configured
	ToNf, // send to the NF specified in the destination field, if on the same host
	Out,  // send the packet out the port set in the destination field
}

/// Per-packet metadata travelling with the buffer through the switch
#[derive(Debug, Clone, Copy)]
pub struct PktMeta {
	pub action: PktAction, // action to be performed
	pub destination: u16,  // where to go next
	pub src: u16,          // who processed the packet last
	pub chain_index: u8,   // index of the current step in the service chain
	pub flags: u8,         // bits for custom NF data
}

impl Default for PktMeta {
	fn default() -> Self {
		Self {
			action: PktAction::Next,
			destination: 0,
			src: 0,
			chain_index: 0,
			flags: 0,
		}
	}
}

/// A packet as it travels over the shared rings: an owned buffer plus its
/// switching metadata. Dropping a `Packet` releases the buffer.
#[derive(Debug, Default)]
pub struct Packet {
	pub data: Vec<u8>,
	pub meta: PktMeta,
}

impl Packet {
	pub fn new(data: Vec<u8>) -> Self {
		Self {
			data,
			meta: PktMeta::default(),
		}
	}
}

/// Function prototype for NF packet handlers. Return 0 to have the run loop
/// forward the packet onto the tx ring; return nonzero to retain it, in which
/// case the handler owns disposal (typically by taking the buffer out and
/// re-emitting it later through `return_pkt`).
pub type PktHandler = fn(pkt: &mut Vec<u8>, meta: &mut PktMeta) -> i32;

/// Shared per-instance info struct, allocated from the manager-owned info
/// pool and co-owned with the manager for the lifetime of the instance. All
/// fields are atomics (or locked) because the manager writes `instance_id`
/// and `status` while the NF polls them, and a scaled child decrements its
/// parent's `headroom` from another thread.
#[derive(Debug)]
pub struct NfInfo {
	instance_id: AtomicU16,
	service_id: AtomicU16,
	status: AtomicU8,
	mode: AtomicU8,
	// number of excess execution units available for scaling; only ever
	// decremented, floored at zero
	headroom: AtomicU16,
	tag: Mutex<String>,
	pkt_function: Mutex<Option<PktHandler>>,
}

impl Default for NfInfo {
	fn default() -> Self {
		Self {
			instance_id: AtomicU16::new(NF_NO_ID),
			service_id: AtomicU16::new(0),
			status: AtomicU8::new(NfStatus::WaitingForId as u8),
			mode: AtomicU8::new(NfMode::Unset as u8),
			headroom: AtomicU16::new(0),
			tag: Mutex::new(String::new()),
			pkt_function: Mutex::new(None),
		}
	}
}

impl NfInfo {
	pub fn instance_id(&self) -> u16 {
		self.instance_id.load(Ordering::Acquire)
	}

	/// Manager side: record the identity this instance will run under.
	/// Stable once registration completes.
	pub fn set_instance_id(&self, id: u16) {
		self.instance_id.store(id, Ordering::Release);
	}

	pub fn service_id(&self) -> u16 {
		self.service_id.load(Ordering::Relaxed)
	}

	pub fn set_service_id(&self, id: u16) {
		self.service_id.store(id, Ordering::Relaxed);
	}

	pub fn status(&self) -> NfStatus {
		NfStatus::from_raw(self.status.load(Ordering::Acquire))
	}

	pub fn set_status(&self, status: NfStatus) {
		self.status.store(status as u8, Ordering::Release);
	}

	pub fn mode(&self) -> NfMode {
		NfMode::from_raw(self.mode.load(Ordering::Acquire))
	}

	/// Fix the packet-handling mode. The first caller wins the race via
	/// compare-and-set; asking again for the established mode succeeds and is
	/// side-effect free, asking for the other mode fails.
	pub fn try_set_mode(&self, mode: NfMode) -> bool {
		match self.mode.compare_exchange(
			NfMode::Unset as u8,
			mode as u8,
			Ordering::AcqRel,
			Ordering::Acquire,
		) {
			Ok(_) => true,
			Err(current) => current == mode as u8,
		}
	}

	pub fn headroom(&self) -> u16 {
		self.headroom.load(Ordering::Relaxed)
	}

	pub fn set_headroom(&self, headroom: u16) {
		self.headroom.store(headroom, Ordering::Relaxed);
	}

	/// Take one unit of headroom, saturating at zero. Returns the new value.
	pub fn decrement_headroom(&self) -> u16 {
		let prev = self
			.headroom
			.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |h| {
				Some(h.saturating_sub(1))
			})
			.unwrap_or(0);
		prev.saturating_sub(1)
	}

	pub fn tag(&self) -> String {
		self.tag.lock().unwrap().clone()
	}

	pub fn set_tag(&self, tag: &str) {
		*self.tag.lock().unwrap() = tag.to_string();
	}

	pub fn pkt_function(&self) -> Option<PktHandler> {
		*self.pkt_function.lock().unwrap()
	}

	/// Keep the first handler registered; scaling passes it on to children
	pub fn set_pkt_function_if_none(&self, handler: PktHandler) {
		let mut f = self.pkt_function.lock().unwrap();
		if f.is_none() {
			*f = Some(handler);
		}
	}

	/// Called by the pool when a slot is recycled for the next instance
	pub(crate) fn reset(&self) {
		self.set_instance_id(NF_NO_ID);
		self.set_service_id(0);
		self.set_status(NfStatus::WaitingForId);
		self.mode.store(NfMode::Unset as u8, Ordering::Release);
		self.set_headroom(0);
		self.tag.lock().unwrap().clear();
		*self.pkt_function.lock().unwrap() = None;
	}
}

/// Everything an NF instance needs at runtime: its shared info struct plus
/// the process-local handles to the rings and regions resolved during
/// registration. The ring handles live here rather than in [`NfInfo`]
/// because they are meaningless outside this process.
#[derive(Debug)]
pub struct NfLocalCtx {
	pub info: Arc<NfInfo>,
	pub(crate) rx_ring: Arc<PacketRing>,
	pub(crate) tx_ring: Arc<PacketRing>,
	pub(crate) msg_ring: Arc<MsgRing>,
	pub(crate) mgr_msg_queue: Arc<MsgRing>,
	pub(crate) tx_stats: Arc<TxStats>,
	pub(crate) nf_info_pool: Arc<NfInfoPool>,
	pub(crate) nf_msg_pool: Arc<MsgPool>,
	pub(crate) default_chain: Arc<ServiceChain>,
}
