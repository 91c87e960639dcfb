/*
 * Created on Mon Oct 05 2020:11:02:33
 * Created by Ratnadeep Bhattacharya
 */

use failure::Fail;

/// Everything that can go wrong on the NF side of the manager contract.
///
/// The registration-time variants are unrecoverable: callers are expected to
/// bubble them out of `main` (through `ExitFailure`) so the process exits with
/// a diagnostic. `ChannelFull` and `ModeConflict` are recovered locally.
#[derive(Debug, Fail)]
pub enum NfError {
	#[fail(display = "invalid command-line arguments: {}", _0)]
	ArgumentError(String),
	#[fail(display = "shared resource unavailable: {} - is the manager running?", _0)]
	ResourceUnavailable(String),
	#[fail(display = "pool exhausted: {}", _0)]
	PoolExhausted(String),
	#[fail(display = "selected ID already in use")]
	IdConflict,
	#[fail(display = "there are no IDs available for this NF")]
	NoIdsAvailable,
	#[fail(display = "unexpected manager response during registration (status {})", _0)]
	UnexpectedStatus(u8),
	#[fail(display = "manager assigned an out-of-range instance ID ({})", _0)]
	InvalidInstanceId(u16),
	#[fail(display = "enqueue exceeds channel capacity")]
	ChannelFull,
	#[fail(display = "NF packet-handling mode already fixed to an incompatible mode")]
	ModeConflict,
}
