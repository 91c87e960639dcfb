/*
 * Created on Mon Oct 05 2020:10:44:02
 * Created by Ratnadeep Bhattacharya
 */

/* macros used throughout */

/// Name of the rx ring the manager provisions for an instance ID
#[macro_export]
macro_rules! get_rx_queue_name {
	($n: expr) => {
		format!("MProc_Client_{}_RX", $n)
	};
}

/// Name of the tx ring the manager provisions for an instance ID
#[macro_export]
macro_rules! get_tx_queue_name {
	($n: expr) => {
		format!("MProc_Client_{}_TX", $n)
	};
}

/// Name of the mgr -> NF message ring for an instance ID
#[macro_export]
macro_rules! get_msg_queue_name {
	($n: expr) => {
		format!("NF_{}_MSG_QUEUE", $n)
	};
}
