//! Transaction dispatch: signature, nonce and affordability checks, then
//! hand-off into the VM and final gas settlement.

use std::fmt::Debug;

use alloy_primitives::{Address, U256};
use tracing::trace;

use rust_eth_ledger_common::KeyValueDB;
use rust_eth_ledger_types::Transaction;

use crate::state::State;
use crate::StateError;

/// Drives one transaction through the state.
///
/// `setup` validates and debits the gas purchase, `go` runs the transfer
/// or the VM, `finalize` refunds the unspent budget and pays the coinbase.
/// Any [`StateError`] out of `setup` leaves the state untouched; once
/// `setup` succeeds the transaction is committed to and only VM frames
/// revert internally.
pub struct Executive<'a, B>
where
    B: KeyValueDB + Clone,
    B::Error: Debug,
{
    state: &'a mut State<B>,
    transaction: Transaction,
    sender: Address,
    start_gas_used: U256,
    remaining_gas: U256,
}

impl<'a, B> Executive<'a, B>
where
    B: KeyValueDB + Clone,
    B::Error: Debug,
{
    /// Decodes and validates a transaction, buys its gas and bumps the
    /// sender nonce.
    pub fn setup(state: &'a mut State<B>, rlp: &[u8]) -> Result<Self, StateError> {
        let transaction = Transaction::decode(rlp)?;
        let sender = transaction.sender().map_err(|_| StateError::InvalidSignature)?;

        let required = state.transactions_from(sender)?;
        if transaction.nonce != required {
            return Err(StateError::InvalidNonce { required, candidate: transaction.nonce });
        }

        let gas_cost =
            transaction.gas.checked_mul(transaction.gas_price).ok_or(StateError::NotEnoughCash)?;
        let total_cost =
            gas_cost.checked_add(transaction.value).ok_or(StateError::NotEnoughCash)?;
        if state.balance(sender)? < total_cost {
            return Err(StateError::NotEnoughCash);
        }

        state.sub_balance(sender, gas_cost)?;
        state.note_sending(sender)?;
        trace!(target: "state", %sender, nonce = %transaction.nonce, "executing transaction");

        let start_gas_used = state.gas_used();
        let remaining_gas = transaction.gas;
        Ok(Self { state, transaction, sender, start_gas_used, remaining_gas })
    }

    /// Runs the call or creation. The value transfer happens inside the
    /// frame, so a failed frame hands it back. VM failures are absorbed at
    /// the frame boundary; only store-level failures surface here.
    pub fn go(&mut self) -> Result<(), StateError> {
        let transaction = self.transaction.clone();
        match transaction.to {
            None => {
                self.state.create(
                    self.sender,
                    transaction.value,
                    transaction.gas_price,
                    &mut self.remaining_gas,
                    &transaction.data,
                    self.sender,
                )?;
            }
            Some(to) => {
                self.state.call(
                    to,
                    self.sender,
                    transaction.value,
                    transaction.gas_price,
                    &transaction.data,
                    &mut self.remaining_gas,
                    &mut [],
                    self.sender,
                    false,
                )?;
            }
        }
        Ok(())
    }

    /// Refunds unspent gas to the sender, pays the used gas to the block's
    /// coinbase, and yields `(transaction, prior cumulative gas, gas used)`.
    pub fn finalize(self) -> Result<(Transaction, U256, U256), StateError> {
        let refund = self.remaining_gas.wrapping_mul(self.transaction.gas_price);
        self.state.add_balance(self.sender, refund)?;

        let gas_used = self.transaction.gas - self.remaining_gas;
        let fee = gas_used.wrapping_mul(self.transaction.gas_price);
        let coinbase = self.state.current_block().coinbase_address;
        self.state.add_balance(coinbase, fee)?;

        Ok((self.transaction, self.start_gas_used, gas_used))
    }
}
