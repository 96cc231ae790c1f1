//! The host interface the VM executes against.

use alloy_primitives::{Address, U256};

use rust_eth_ledger_types::BlockInfo;

use crate::VmError;

/// Everything the VM can observe or effect outside its own stack and
/// memory. The ledger state implements this against a live `State`;
/// tests implement it with canned tables.
///
/// Fallible operations surface host failures as [`VmError::Host`], which
/// aborts the frame and is treated as fatal by the real host.
pub trait VmHost {
    /// Address of the account whose code is executing
    fn my_address(&self) -> Address;
    /// Immediate caller of this frame
    fn caller(&self) -> Address;
    /// Original transaction sender
    fn origin(&self) -> Address;
    /// Value passed into this frame
    fn value(&self) -> U256;
    /// Gas price of the enclosing transaction
    fn gas_price(&self) -> U256;
    /// Call data of this frame
    fn data(&self) -> &[u8];
    /// Code being executed
    fn code(&self) -> &[u8];
    /// Header of the parent of the block under construction
    fn previous_block(&self) -> &BlockInfo;
    /// Header of the block under construction
    fn current_block(&self) -> &BlockInfo;

    /// Code byte at `pc`; zero beyond the end of the code.
    fn code_at(&self, pc: u64) -> u8 {
        usize::try_from(pc).ok().and_then(|i| self.code().get(i).copied()).unwrap_or(0)
    }

    /// Balance of an arbitrary account.
    fn balance(&mut self, address: Address) -> Result<U256, VmError>;
    /// Storage word of the executing account.
    fn store(&mut self, key: U256) -> Result<U256, VmError>;
    /// Writes a storage word of the executing account.
    fn set_store(&mut self, key: U256, value: U256) -> Result<(), VmError>;
    /// Debits the executing account; callers check the balance first.
    fn sub_balance(&mut self, value: U256) -> Result<(), VmError>;
    /// Runs a message call. The host moves `value` from the executing
    /// account to `to` inside the callee frame, so a failed frame rolls the
    /// transfer back. Unspent gas is left in `gas`; output is copied into
    /// `out` up to its length. Returns whether the callee succeeded.
    fn call(
        &mut self,
        to: Address,
        value: U256,
        input: &[u8],
        gas: &mut U256,
        out: &mut [u8],
    ) -> Result<bool, VmError>;
    /// Creates a contract from `init` code, drawing gas from `gas`. The
    /// host moves the endowment inside the creation frame. Returns the new
    /// address, or `None` when the creation frame failed.
    fn create(
        &mut self,
        endowment: U256,
        gas: &mut U256,
        init: &[u8],
    ) -> Result<Option<Address>, VmError>;
    /// Transfers the executing account's balance to `dest` and marks it dead.
    fn suicide(&mut self, dest: Address) -> Result<(), VmError>;
}
