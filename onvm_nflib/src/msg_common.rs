/*
 * Created on Mon Oct 05 2020:12:05:11
 * Created by Ratnadeep Bhattacharya
 */

use crate::structs::NfInfo;
use crossbeam_queue::ArrayQueue;
use std::sync::Arc;

/// Message kinds travelling over the control rings.
///
/// NF -> manager: `NfStarting`, `NfReady`, `NfStopping` (all carry the
/// instance's info struct). Manager -> NF: `Stop`, `Scale`, `Noop`. Kinds an
/// NF does not recognise are accepted as no-ops, so the manager can grow the
/// protocol without breaking older NFs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsgType {
	Noop,
	Stop,
	NfStarting,
	NfStopping,
	NfReady,
	Scale,
}

/// A control message: a kind plus, for NF -> manager messages, a reference to
/// the info struct the message is about. Allocated from the shared message
/// pool and returned to it after dispatch.
pub struct NfMsg {
	pub msg_type: MsgType,
	pub msg_data: Option<Arc<NfInfo>>,
}

impl NfMsg {
	pub(crate) fn blank() -> Self {
		Self {
			msg_type: MsgType::Noop,
			msg_data: None,
		}
	}
}

/// Bounded lock-free ring of control messages, carried by value
#[derive(Debug)]
pub struct MsgRing {
	q: ArrayQueue<NfMsg>,
}

impl MsgRing {
	pub fn with_capacity(cap: usize) -> Arc<Self> {
		Arc::new(Self {
			q: ArrayQueue::new(cap),
		})
	}

	/// Non-blocking; hands the message back on a full ring
	pub fn enqueue(&self, msg: NfMsg) -> Result<(), NfMsg> {
		self.q.push(msg)
	}

	/// Non-blocking; `None` is a normal outcome
	pub fn dequeue(&self) -> Option<NfMsg> {
		self.q.pop()
	}

	pub fn is_empty(&self) -> bool {
		self.q.is_empty()
	}

	pub fn len(&self) -> usize {
		self.q.len()
	}
}
