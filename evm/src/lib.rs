//! Deterministic stack virtual machine with exact gas metering.

use thiserror::Error;

pub mod fees;

mod instruction;
pub use instruction::Instruction;

mod host;
pub use host::VmHost;

mod vm;
pub use vm::Vm;


/// Exceptional VM termination.
///
/// All of these abort the current call frame; the host reverts the frame's
/// snapshot and the caller of `call`/`create` observes failure. Gas already
/// spent is not refunded.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum VmError {
    /// The next operation costs more than the remaining gas
    #[error("out of gas")]
    OutOfGas,
    /// Unassigned opcode
    #[error("bad instruction")]
    BadInstruction,
    /// Operation needs more stack entries than are present
    #[error("stack too small: need {required}, have {have}")]
    StackTooSmall {
        /// Entries the operation pops
        required: usize,
        /// Entries actually on the stack
        have: usize,
    },
    /// An operand does not fit the range an operation accepts
    #[error("operand out of range: {got} > {max}")]
    OperandOutOfRange {
        /// Largest acceptable value
        max: u128,
        /// Value found on the stack
        got: u128,
    },
    /// The step budget of a bounded run was exhausted
    #[error("steps done")]
    StepsDone,
    /// Execution reached a registered breakpoint
    #[error("breakpoint hit")]
    BreakPointHit,
    /// The host failed underneath the VM; fatal for the whole transaction
    #[error("host failure: {0}")]
    Host(String),
}
