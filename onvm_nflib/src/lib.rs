/*
 * Created on Mon Oct 05 2020:10:12:48
 * Created by Ratnadeep Bhattacharya
 */

//! NF-side runtime library for the openNetVM-style shared-memory manager.
//!
//! The manager process owns all shared objects (packet rings, message rings,
//! object pools, stats) and demultiplexes traffic to NF instances. This crate
//! is linked into each NF process and provides the other half of the contract:
//!
//! - [`init`]: registration handshake with the manager (identity assignment,
//!   resolution of the per-instance rings)
//! - [`run`]: the non-blocking packet loop driving a user packet handler
//! - [`handle_msg`]: the manager -> NF control state machine (stop/scale/noop)
//! - [`scale`]: opportunistic launch of service replicas on idle units
//! - [`get_rx_ring`]/[`get_tx_ring`]/[`get_tx_stats`]: direct ring access for
//!   NFs that drive their own loop instead of [`run`] (mutually exclusive)
//!
//! [`scale`]: scale::scale

pub mod constants;
pub mod error_handling;
#[macro_use]
pub mod funcs_macros;
pub mod global;
pub mod init;
pub mod msg_common;
pub mod platform;
pub mod run;
pub mod scale;
pub mod structs;

pub use error_handling::NfError;
pub use init::init;
pub use msg_common::{MsgType, NfMsg};
pub use run::{
	get_rx_ring, get_tx_ring, get_tx_stats, handle_msg, nf_ready, return_pkt, run, stop,
};
pub use structs::{NfInfo, NfLocalCtx, NfMode, NfStatus, Packet, PktAction, PktHandler, PktMeta};
