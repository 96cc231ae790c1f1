//! The VM's window onto a live state.

use std::fmt::Debug;

use alloy_primitives::{Address, U256};

use rust_eth_ledger_common::KeyValueDB;
use rust_eth_ledger_evm::{VmError, VmHost};
use rust_eth_ledger_types::BlockInfo;

use crate::state::State;
use crate::StateError;

/// Host implementation binding one call frame to a `State`.
///
/// Holds the frame parameters (executing account, caller, origin, value,
/// call data, code) plus a mutable borrow of the state. Nested calls and
/// creations recurse through the state, which snapshots and reverts at
/// each frame boundary; a state failure underneath an operation is parked
/// in `failure` and surfaced to the VM as [`VmError::Host`].
pub struct ExtVm<'a, B>
where
    B: KeyValueDB + Clone,
    B::Error: Debug,
{
    state: &'a mut State<B>,
    my_address: Address,
    caller: Address,
    origin: Address,
    value: U256,
    gas_price: U256,
    data: Vec<u8>,
    code: Vec<u8>,
    previous_block: BlockInfo,
    current_block: BlockInfo,
    failure: Option<StateError>,
}

impl<'a, B> ExtVm<'a, B>
where
    B: KeyValueDB + Clone,
    B::Error: Debug,
{
    /// Binds a frame to the state.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        state: &'a mut State<B>,
        my_address: Address,
        caller: Address,
        origin: Address,
        value: U256,
        gas_price: U256,
        data: Vec<u8>,
        code: Vec<u8>,
    ) -> Self {
        let previous_block = state.previous_block().clone();
        let current_block = state.current_block().clone();
        Self {
            state,
            my_address,
            caller,
            origin,
            value,
            gas_price,
            data,
            code,
            previous_block,
            current_block,
            failure: None,
        }
    }

    /// The state failure behind the last [`VmError::Host`], if any.
    pub fn take_failure(&mut self) -> Option<StateError> {
        self.failure.take()
    }

    fn park(&mut self, error: StateError) -> VmError {
        let rendered = error.to_string();
        self.failure = Some(error);
        VmError::Host(rendered)
    }
}

impl<'a, B> VmHost for ExtVm<'a, B>
where
    B: KeyValueDB + Clone,
    B::Error: Debug,
{
    fn my_address(&self) -> Address {
        self.my_address
    }

    fn caller(&self) -> Address {
        self.caller
    }

    fn origin(&self) -> Address {
        self.origin
    }

    fn value(&self) -> U256 {
        self.value
    }

    fn gas_price(&self) -> U256 {
        self.gas_price
    }

    fn data(&self) -> &[u8] {
        &self.data
    }

    fn code(&self) -> &[u8] {
        &self.code
    }

    fn previous_block(&self) -> &BlockInfo {
        &self.previous_block
    }

    fn current_block(&self) -> &BlockInfo {
        &self.current_block
    }

    fn balance(&mut self, address: Address) -> Result<U256, VmError> {
        match self.state.balance(address) {
            Ok(balance) => Ok(balance),
            Err(e) => Err(self.park(e)),
        }
    }

    fn store(&mut self, key: U256) -> Result<U256, VmError> {
        match self.state.storage(self.my_address, key) {
            Ok(value) => Ok(value),
            Err(e) => Err(self.park(e)),
        }
    }

    fn set_store(&mut self, key: U256, value: U256) -> Result<(), VmError> {
        match self.state.set_storage(self.my_address, key, value) {
            Ok(()) => Ok(()),
            Err(e) => Err(self.park(e)),
        }
    }

    fn sub_balance(&mut self, value: U256) -> Result<(), VmError> {
        match self.state.sub_balance(self.my_address, value) {
            Ok(()) => Ok(()),
            Err(e) => Err(self.park(e)),
        }
    }

    fn call(
        &mut self,
        to: Address,
        value: U256,
        input: &[u8],
        gas: &mut U256,
        out: &mut [u8],
    ) -> Result<bool, VmError> {
        let result = self.state.call(
            to,
            self.my_address,
            value,
            self.gas_price,
            input,
            gas,
            out,
            self.origin,
            false,
        );
        match result {
            Ok(success) => Ok(success),
            Err(e) => Err(self.park(e)),
        }
    }

    fn create(
        &mut self,
        endowment: U256,
        gas: &mut U256,
        init: &[u8],
    ) -> Result<Option<Address>, VmError> {
        let result =
            self.state.create(self.my_address, endowment, self.gas_price, gas, init, self.origin);
        match result {
            Ok((address, true)) => Ok(Some(address)),
            Ok((_, false)) => Ok(None),
            Err(e) => Err(self.park(e)),
        }
    }

    fn suicide(&mut self, dest: Address) -> Result<(), VmError> {
        let result = self
            .state
            .balance(self.my_address)
            .and_then(|balance| self.state.add_balance(dest, balance))
            .and_then(|()| self.state.kill_account(self.my_address));
        match result {
            Ok(()) => Ok(()),
            Err(e) => Err(self.park(e)),
        }
    }
}
