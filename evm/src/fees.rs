//! The gas tariff.
//!
//! Every step costs `STEP_GAS` unless the opcode's entry below replaces it;
//! memory growth is charged per 32-byte word on top.

/// Base cost of one execution step.
pub const STEP_GAS: u64 = 1;
/// Cost of a storage write (doubled when a zero slot turns nonzero, waived
/// when a nonzero slot is cleared).
pub const SSTORE_GAS: u64 = 100;
/// Surcharge for a storage read.
pub const SLOAD_GAS: u64 = 20;
/// Cost of hashing memory.
pub const SHA3_GAS: u64 = 20;
/// Cost of a signature recovery.
pub const ECRECOVER_GAS: u64 = 20;
/// Cost of a balance query.
pub const BALANCE_GAS: u64 = 20;
/// Base cost of a message call, on top of the forwarded gas.
pub const CALL_GAS: u64 = 20;
/// Surcharge for creating a contract.
pub const CREATE_GAS: u64 = 100;
/// Cost per 32-byte word of memory growth.
pub const MEMORY_GAS: u64 = 1;
