/*
 * Created on Wed Oct 07 2020:09:05:41
 * Created by Ratnadeep Bhattacharya
 */

//! Registration and identity-assignment handshake with the manager.

use crate::constants::{
	ID_WAIT_POLL_INTERVAL_MS, MAX_NFS, MZ_CLIENT_INFO, MZ_SCP_INFO, NF_NO_ID,
	_MGR_MSG_QUEUE_NAME, _NF_MEMPOOL_NAME, _NF_MSG_POOL_NAME,
};
use crate::error_handling::NfError;
use crate::global::{self, NfContext};
use crate::msg_common::MsgType;
use crate::platform::{self, NfInfoPool, MASTER_UNIT};
use crate::structs::{NfInfo, NfLocalCtx, NfStatus};
use exitfailure::ExitFailure;
use failure::Fail;
use getopts::{Options, ParsingStyle};
use log::info;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::{thread, time};

#[derive(Debug)]
struct ParsedArgs {
	// identity request; the manager assigns one if absent
	instance_id: Option<u16>,
	// required, nonzero (0 is the reserved/invalid sentinel)
	service_id: u16,
	// leading arguments this library consumed; args[consumed..] belong to the NF
	consumed: usize,
}

fn usage(progname: &str) {
	eprintln!(
		"Usage: {} [-n <instance_id>] -r <service_id> [-- <NF args>]",
		progname
	);
}

fn parse_args(args: &[String]) -> Result<ParsedArgs, NfError> {
	let progname = args.first().map(String::as_str).unwrap_or("nf");
	let mut opts = Options::new();
	opts.parsing_style(ParsingStyle::StopAtFirstFree);
	opts.optopt("n", "", "instance ID to request from the manager", "ID");
	opts.optopt("r", "", "service ID to register under (nonzero)", "ID");

	let matches = match opts.parse(&args[1..]) {
		Ok(m) => m,
		Err(e) => {
			usage(progname);
			return Err(NfError::ArgumentError(e.to_string()));
		}
	};

	let instance_id = match matches.opt_str("n") {
		Some(n) => match n.parse::<u16>() {
			// instance IDs index the shared stats region
			Ok(id) if (id as usize) < MAX_NFS => Some(id),
			Ok(id) => {
				usage(progname);
				return Err(NfError::ArgumentError(format!(
					"instance ID must be below {}, got {}",
					MAX_NFS, id
				)));
			}
			Err(_) => {
				usage(progname);
				return Err(NfError::ArgumentError(format!(
					"instance ID must be a number, got `{}`",
					n
				)));
			}
		},
		None => None,
	};

	let service_id = match matches.opt_str("r") {
		Some(r) => match r.parse::<u16>() {
			Ok(id) if id != 0 => id,
			Ok(_) | Err(_) => {
				usage(progname);
				return Err(NfError::ArgumentError(format!(
					"service ID must be a nonzero number, got `{}`",
					r
				)));
			}
		},
		None => {
			usage(progname);
			return Err(NfError::ArgumentError(
				"you must provide a nonzero service ID with -r".to_string(),
			));
		}
	};

	let consumed = args.len() - matches.free.len();
	Ok(ParsedArgs {
		instance_id,
		service_id,
		consumed,
	})
}

/// Take an info struct from the shared pool and fill in what we know before
/// the manager has spoken. Headroom is the number of excess execution units,
/// or 0 when not on the orchestrating unit (children never scale further).
fn info_init(
	pool: &Arc<NfInfoPool>,
	parsed: &ParsedArgs,
	nf_tag: &str,
	ctx: &NfContext,
) -> Result<Arc<NfInfo>, NfError> {
	let info = pool
		.get()
		.ok_or_else(|| NfError::PoolExhausted("client info memory".to_string()))?;
	info.set_instance_id(parsed.instance_id.unwrap_or(NF_NO_ID));
	info.set_service_id(parsed.service_id);
	info.set_status(NfStatus::WaitingForId);
	info.set_tag(nf_tag);
	let headroom = if platform::current_unit() == Some(MASTER_UNIT) {
		(ctx.units.count() - 1) as u16
	} else {
		0
	};
	info.set_headroom(headroom);
	Ok(info)
}

/// Bootstrap this process into the system and register one NF instance.
///
/// Parses `-n`/`-r` from `args` (which start with the program name), resolves
/// the manager-owned shared objects, announces the instance on the manager's
/// control channel, and blocks with coarse polling until the manager assigns
/// an identity. Returns the instance handle and the number of leading
/// arguments consumed, so the caller can parse its own flags from the rest.
///
/// Every unrecoverable condition comes back as an error intended to flow out
/// of `main`: the process exits non-zero with a diagnostic on stderr.
pub fn init(args: &[String], nf_tag: &str) -> Result<(NfLocalCtx, usize), ExitFailure> {
	let ctx = global::context();
	// one-time process-wide bootstrap; scaled children skip it
	ctx.bootstrap_once(args, nf_tag);

	let parsed = parse_args(args)?;

	let dir = platform::directory();
	let nf_info_pool = dir
		.lookup_info_pool(_NF_MEMPOOL_NAME)
		.ok_or_else(|| NfError::ResourceUnavailable("client info mempool".to_string()))?;
	let nf_msg_pool = dir
		.lookup_msg_pool(_NF_MSG_POOL_NAME)
		.ok_or_else(|| NfError::ResourceUnavailable("NF message mempool".to_string()))?;
	let tx_stats = dir
		.lookup_stats(MZ_CLIENT_INFO)
		.ok_or_else(|| NfError::ResourceUnavailable("tx stats region".to_string()))?;
	let default_chain = dir
		.lookup_chain(MZ_SCP_INFO)
		.ok_or_else(|| NfError::ResourceUnavailable("service chain region".to_string()))?;
	let mgr_msg_queue = dir
		.lookup_msg_ring(_MGR_MSG_QUEUE_NAME)
		.ok_or_else(|| NfError::ResourceUnavailable("manager message queue".to_string()))?;

	default_chain.log_chain();

	let info = info_init(&nf_info_pool, &parsed, nf_tag, ctx)?;

	// Put this NF's info struct onto the queue for the manager to process
	let mut startup_msg = match nf_msg_pool.get() {
		Some(msg) => msg,
		None => {
			nf_info_pool.put(info);
			return Err(NfError::PoolExhausted("startup msg".to_string()).into());
		}
	};
	startup_msg.msg_type = MsgType::NfStarting;
	startup_msg.msg_data = Some(info.clone());
	if let Err(msg) = mgr_msg_queue.enqueue(startup_msg) {
		nf_msg_pool.put(msg);
		nf_info_pool.put(info);
		return Err(NfError::ChannelFull
			.context("cannot send nf_info to manager")
			.into());
	}

	// Wait for an instance ID to be assigned by the manager. This happens
	// once per process lifetime, so coarse polling is fine.
	info!("Waiting for manager to assign an ID...");
	let poll = time::Duration::from_millis(ID_WAIT_POLL_INTERVAL_MS);
	while info.status() == NfStatus::WaitingForId {
		thread::sleep(poll);
	}

	match info.status() {
		NfStatus::Starting => {}
		NfStatus::IdConflict => {
			nf_info_pool.put(info);
			return Err(NfError::IdConflict.into());
		}
		NfStatus::NoIds => {
			nf_info_pool.put(info);
			return Err(NfError::NoIdsAvailable.into());
		}
		other => {
			nf_info_pool.put(info);
			return Err(NfError::UnexpectedStatus(other as u8).into());
		}
	}

	let id = info.instance_id();
	// everything indexed per instance (stats slots included) is sized MAX_NFS
	if id as usize >= MAX_NFS {
		nf_info_pool.put(info);
		return Err(NfError::InvalidInstanceId(id).into());
	}
	info!("Using Instance ID {}", id);
	info!("Using Service ID {}", info.service_id());

	// Now map the dedicated rings the manager provisioned for this instance
	let rx_ring = dir
		.lookup_packet_ring(&get_rx_queue_name!(id))
		.ok_or_else(|| NfError::ResourceUnavailable(format!("rx ring for instance {}", id)))?;
	let tx_ring = dir
		.lookup_packet_ring(&get_tx_queue_name!(id))
		.ok_or_else(|| NfError::ResourceUnavailable(format!("tx ring for instance {}", id)))?;
	let msg_ring = dir
		.lookup_msg_ring(&get_msg_queue_name!(id))
		.ok_or_else(|| NfError::ResourceUnavailable(format!("msg ring for instance {}", id)))?;

	ctx.keep_running().store(true, Ordering::Release);
	info!("Finished Process Init.");

	Ok((
		NfLocalCtx {
			info,
			rx_ring,
			tx_ring,
			msg_ring,
			mgr_msg_queue,
			tx_stats,
			nf_info_pool,
			nf_msg_pool,
			default_chain,
		},
		parsed.consumed,
	))
}
