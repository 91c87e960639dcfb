/*
 * Created on Mon Oct 05 2020:10:31:17
 * Created by Ratnadeep Bhattacharya
 */

/* All the constants shared between the manager and the NFs */

// Number of packets to attempt to read from the rx ring in one burst
pub const PACKET_READ_SIZE: usize = 32;
// total number of concurrent NFs allowed (ID 0 is reserved)
pub const MAX_NFS: usize = 128;
// size of the per-NF rx/tx rings
pub const NF_QUEUE_RINGSIZE: usize = 16384;
// size of the per-NF manager -> NF message ring
pub const NF_MSG_QUEUE_SIZE: usize = 128;
// population of the shared manager <-> NF message pool
pub const NF_MSG_POOL_SIZE: usize = 512;

// Sentinel carried in an info struct until the manager assigns a real ID
pub const NF_NO_ID: u16 = u16::MAX;

// The registration wait happens once per process; coarse polling is fine there
pub const ID_WAIT_POLL_INTERVAL_MS: u64 = 100;

/// define common names for structures shared between manager and NF
pub const _MGR_MSG_QUEUE_NAME: &str = "MSG_MSG_QUEUE";
pub const _NF_MEMPOOL_NAME: &str = "NF_INFO_MEMPOOL";
pub const _NF_MSG_POOL_NAME: &str = "NF_MSG_MEMPOOL";
pub const MZ_CLIENT_INFO: &str = "MProc_client_info";
pub const MZ_SCP_INFO: &str = "MProc_scp_info";
