//! The ledger state and its block-level transitions.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt::Debug;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use alloy_primitives::{keccak256, Address, B256, U256};
use alloy_rlp::Decodable;
use alloy_trie::KECCAK_EMPTY;
use tracing::{debug, trace, warn};

use rust_eth_ledger_common::KeyValueDB;
use rust_eth_ledger_evm::{Vm, VmError};
use rust_eth_ledger_memorydb::MemoryDB;
use rust_eth_ledger_trie::{rlp_raw, OverlayDB, Trie};
use rust_eth_ledger_types::{contract_address, BlockInfo, Transaction};

use crate::account::{AccountRecord, AccountState};
use crate::chain::BlockChain;
use crate::config::StateConfig;
use crate::executive::Executive;
use crate::extvm::ExtVm;
use crate::genesis;
use crate::pow::{KeccakPow, MineInfo, PowEngine};
use crate::queue::TransactionQueue;
use crate::receipt::TransactionReceipt;
use crate::StateError;

/// The mutable ledger state.
///
/// Accounts touched since the last commit live in `cache`; everything else
/// is read through the state trie rooted in the overlay database. A commit
/// folds the cache back into the trie; the overlay then either reaches the
/// backing store (`overlay.commit`, one atomic batch) or is discarded.
///
/// Cloning a state copies the cache and the staged overlay and shares only
/// the persisted backing store, which is what makes per-call-frame
/// snapshots and speculative mining cheap.
pub struct State<B>
where
    B: KeyValueDB + Clone,
    B::Error: Debug,
{
    pub(crate) db: OverlayDB<B>,
    pub(crate) trie: Trie,
    pub(crate) cache: HashMap<Address, AccountState>,
    pub(crate) transactions: Vec<TransactionReceipt>,
    pub(crate) transaction_set: HashSet<B256>,
    pub(crate) previous_block: BlockInfo,
    pub(crate) current_block: BlockInfo,
    pub(crate) current_txs: Vec<u8>,
    pub(crate) current_uncles: Vec<u8>,
    pub(crate) current_bytes: Vec<u8>,
    /// Overlay as of the last executed transaction; mining rewinds to it.
    pub(crate) last_tx: OverlayDB<B>,
    pub(crate) genesis: BlockInfo,
    pub(crate) our_address: Address,
    pub(crate) config: StateConfig,
    pub(crate) pow: KeccakPow,
}

impl<B> Clone for State<B>
where
    B: KeyValueDB + Clone,
    B::Error: Debug,
{
    fn clone(&self) -> Self {
        Self {
            db: self.db.clone(),
            trie: self.trie.clone(),
            cache: self.cache.clone(),
            transactions: self.transactions.clone(),
            transaction_set: self.transaction_set.clone(),
            previous_block: self.previous_block.clone(),
            current_block: self.current_block.clone(),
            current_txs: self.current_txs.clone(),
            current_uncles: self.current_uncles.clone(),
            current_bytes: self.current_bytes.clone(),
            last_tx: self.last_tx.clone(),
            genesis: self.genesis.clone(),
            our_address: self.our_address,
            config: self.config.clone(),
            pow: self.pow.clone(),
        }
    }
}

/// A frame snapshot: cache, staged overlay and trie root.
pub(crate) struct Snapshot<B> {
    cache: HashMap<Address, AccountState>,
    db: OverlayDB<B>,
    root: B256,
}

impl<B> State<B>
where
    B: KeyValueDB + Clone,
    B::Error: Debug,
{
    /// Opens a state over `backing`, seeding and committing the genesis
    /// accounts. The coinbase address receives this state's mining rewards.
    pub fn new(backing: B, config: StateConfig, coinbase: Address) -> Result<Self, StateError> {
        let mut db = OverlayDB::new(backing);
        let mut trie = Trie::new();
        trie.init(&mut db);

        let mut seed = HashMap::new();
        for address in genesis::GENESIS_ACCOUNTS {
            seed.insert(address, AccountState::new().with_balance(genesis::GENESIS_ENDOWMENT));
        }
        commit_cache(&seed, &mut db, &mut trie)?;
        db.commit()?;

        let genesis_info = genesis::genesis_info(trie.root());
        debug!(target: "state", root = %trie.root(), "opened state at genesis");

        let mut state = Self {
            last_tx: db.clone(),
            db,
            trie,
            cache: HashMap::new(),
            transactions: Vec::new(),
            transaction_set: HashSet::new(),
            previous_block: genesis_info.clone(),
            current_block: BlockInfo::default(),
            current_txs: Vec::new(),
            current_uncles: Vec::new(),
            current_bytes: Vec::new(),
            genesis: genesis_info,
            our_address: coinbase,
            config,
            pow: KeccakPow::default(),
        };
        state.reset_current();
        Ok(state)
    }

    /// Current state trie root.
    pub fn root(&self) -> B256 {
        self.trie.root()
    }

    /// This state's genesis header.
    pub fn genesis(&self) -> &BlockInfo {
        &self.genesis
    }

    /// The block being assembled.
    pub fn current_block(&self) -> &BlockInfo {
        &self.current_block
    }

    /// The last settled block.
    pub fn previous_block(&self) -> &BlockInfo {
        &self.previous_block
    }

    /// The coinbase this state mines for.
    pub fn our_address(&self) -> Address {
        self.our_address
    }

    /// Receipts of the transactions applied since the last block.
    pub fn pending(&self) -> &[TransactionReceipt] {
        &self.transactions
    }

    /// The fully encoded block produced by the last successful `mine`.
    pub fn current_bytes(&self) -> &[u8] {
        &self.current_bytes
    }

    /// Gas consumed by the pending transactions.
    pub fn gas_used(&self) -> U256 {
        self.transactions.last().map(|r| r.cumulative_gas).unwrap_or_default()
    }

    // ---------------------------------------------------------------------
    // Account access & caching

    /// Loads an account into the cache. With `require_code` the code bytes
    /// are materialized too; with `force_create` a missing account is
    /// created empty instead of being left absent.
    fn ensure_cached(
        &mut self,
        address: Address,
        require_code: bool,
        force_create: bool,
    ) -> Result<(), StateError> {
        if !self.cache.contains_key(&address) {
            match self.trie.at(&self.db, address.as_slice())? {
                Some(rlp) => {
                    let record = AccountRecord::decode(&mut rlp.as_slice())?;
                    self.cache.insert(address, AccountState::from_record(record));
                }
                None if force_create => {
                    self.cache.insert(address, AccountState::new());
                }
                None => return Ok(()),
            }
        }
        if require_code {
            let code_hash = match self.cache.get(&address) {
                Some(account) if !account.is_fresh_code() && !account.code_cache_valid() => {
                    account.code_hash()
                }
                _ => return Ok(()),
            };
            let code = if code_hash == KECCAK_EMPTY {
                Vec::new()
            } else {
                self.db
                    .lookup(&code_hash)?
                    .ok_or(rust_eth_ledger_trie::TrieError::CorruptState(code_hash))?
            };
            if let Some(account) = self.cache.get_mut(&address) {
                account.note_code(code);
            }
        }
        Ok(())
    }

    /// Whether an account exists (even if dead in the cache).
    pub fn address_in_use(&mut self, address: Address) -> Result<bool, StateError> {
        self.ensure_cached(address, false, false)?;
        Ok(self.cache.contains_key(&address))
    }

    /// Whether an account carries code.
    pub fn address_has_code(&mut self, address: Address) -> Result<bool, StateError> {
        self.ensure_cached(address, false, false)?;
        Ok(self
            .cache
            .get(&address)
            .map(|a| a.is_fresh_code() || a.code_hash() != KECCAK_EMPTY)
            .unwrap_or(false))
    }

    /// Balance of an account; zero when absent.
    pub fn balance(&mut self, address: Address) -> Result<U256, StateError> {
        self.ensure_cached(address, false, false)?;
        Ok(self.cache.get(&address).map(|a| a.balance()).unwrap_or_default())
    }

    /// Number of transactions an account has originated; zero when absent.
    pub fn transactions_from(&mut self, address: Address) -> Result<U256, StateError> {
        self.ensure_cached(address, false, false)?;
        Ok(self.cache.get(&address).map(|a| a.nonce()).unwrap_or_default())
    }

    /// Credits an account, creating it if needed.
    pub fn add_balance(&mut self, address: Address, amount: U256) -> Result<(), StateError> {
        self.ensure_cached(address, false, true)?;
        if let Some(account) = self.cache.get_mut(&address) {
            account.add_balance(amount);
        }
        Ok(())
    }

    /// Debits an account; fails with `NotEnoughCash` when the balance is
    /// short or the account does not exist.
    pub fn sub_balance(&mut self, address: Address, amount: U256) -> Result<(), StateError> {
        self.ensure_cached(address, false, false)?;
        match self.cache.get_mut(&address) {
            Some(account) if account.balance() >= amount => {
                account.sub_balance(amount);
                Ok(())
            }
            _ => Err(StateError::NotEnoughCash),
        }
    }

    /// Bumps an account's nonce, creating it if needed.
    pub fn note_sending(&mut self, address: Address) -> Result<(), StateError> {
        self.ensure_cached(address, false, true)?;
        if let Some(account) = self.cache.get_mut(&address) {
            account.inc_nonce();
        }
        Ok(())
    }

    /// Reads one storage word, memoizing it in the account's overlay.
    pub fn storage(&mut self, address: Address, key: U256) -> Result<U256, StateError> {
        self.ensure_cached(address, false, false)?;
        let (root, cached) = match self.cache.get(&address) {
            Some(account) => (account.storage_root(), account.cached_storage(&key)),
            None => return Ok(U256::ZERO),
        };
        if let Some(value) = cached {
            return Ok(value);
        }
        let storage_trie = Trie::from_root(root);
        let value = match storage_trie.at(&self.db, B256::from(key).as_slice())? {
            Some(payload) => U256::decode(&mut payload.as_slice())?,
            None => U256::ZERO,
        };
        if let Some(account) = self.cache.get_mut(&address) {
            account.set_storage(key, value);
        }
        Ok(value)
    }

    /// Stages one storage write.
    pub fn set_storage(
        &mut self,
        address: Address,
        key: U256,
        value: U256,
    ) -> Result<(), StateError> {
        self.ensure_cached(address, false, true)?;
        if let Some(account) = self.cache.get_mut(&address) {
            account.set_storage(key, value);
        }
        Ok(())
    }

    /// Full storage dump of an account: the committed trie with the staged
    /// overlay merged over it (zero values delete).
    pub fn storage_map(&mut self, address: Address) -> Result<BTreeMap<U256, U256>, StateError> {
        self.ensure_cached(address, false, false)?;
        let mut out = BTreeMap::new();
        let Some(account) = self.cache.get(&address) else { return Ok(out) };

        let storage_trie = Trie::from_root(account.storage_root());
        if !storage_trie.is_empty() {
            for entry in storage_trie.iter(&self.db)? {
                let (key, payload) = entry?;
                let key = U256::from_be_slice(&key);
                let value = U256::decode(&mut payload.as_slice())?;
                out.insert(key, value);
            }
        }
        for (key, value) in account.storage_overlay() {
            if value.is_zero() {
                out.remove(key);
            } else {
                out.insert(*key, *value);
            }
        }
        Ok(out)
    }

    /// Storage root of an account as persisted in the state trie.
    pub fn storage_root(&self, address: Address) -> Result<Option<B256>, StateError> {
        match self.trie.at(&self.db, address.as_slice())? {
            Some(rlp) => {
                let record = AccountRecord::decode(&mut rlp.as_slice())?;
                Ok(Some(record.storage_root))
            }
            None => Ok(None),
        }
    }

    /// Code of an account; `None` when it has none.
    pub fn code(&mut self, address: Address) -> Result<Option<Vec<u8>>, StateError> {
        if !self.address_has_code(address)? {
            return Ok(None);
        }
        self.ensure_cached(address, true, false)?;
        Ok(self.cache.get(&address).and_then(|a| a.code().map(|c| c.to_vec())))
    }

    /// Installs code on an account (fresh until the next commit).
    pub fn set_code(&mut self, address: Address, code: Vec<u8>) -> Result<(), StateError> {
        self.ensure_cached(address, false, true)?;
        if let Some(account) = self.cache.get_mut(&address) {
            account.set_code(code);
        }
        Ok(())
    }

    /// Marks an account dead; the commit removes it from the trie.
    pub fn kill_account(&mut self, address: Address) -> Result<(), StateError> {
        self.ensure_cached(address, false, true)?;
        if let Some(account) = self.cache.get_mut(&address) {
            account.kill();
        }
        Ok(())
    }

    /// Census of live accounts and their balances: the trie contents with
    /// the cache merged over the top.
    pub fn addresses(&self) -> Result<BTreeMap<Address, U256>, StateError> {
        let mut out = BTreeMap::new();
        if !self.trie.is_empty() {
            for entry in self.trie.iter(&self.db)? {
                let (key, payload) = entry?;
                let record = AccountRecord::decode(&mut payload.as_slice())?;
                out.insert(Address::from_slice(&key), record.balance);
            }
        }
        for (address, account) in &self.cache {
            if account.is_alive() {
                out.insert(*address, account.balance());
            } else {
                out.remove(address);
            }
        }
        Ok(out)
    }

    // ---------------------------------------------------------------------
    // Commit & snapshots

    /// Folds the cache into the state trie and clears it. On failure the
    /// staged overlay is discarded and the trie root left unchanged.
    pub fn commit(&mut self) -> Result<(), StateError> {
        let saved_root = self.trie.root();
        match commit_cache(&self.cache, &mut self.db, &mut self.trie) {
            Ok(()) => {
                self.cache.clear();
                Ok(())
            }
            Err(e) => {
                self.db.rollback();
                self.trie.set_root(saved_root);
                Err(e)
            }
        }
    }

    pub(crate) fn snapshot(&self) -> Snapshot<B> {
        Snapshot { cache: self.cache.clone(), db: self.db.clone(), root: self.trie.root() }
    }

    pub(crate) fn restore(&mut self, snapshot: Snapshot<B>) {
        self.cache = snapshot.cache;
        self.db = snapshot.db;
        self.trie.set_root(snapshot.root);
    }

    // ---------------------------------------------------------------------
    // Transaction execution

    /// Executes one signed transaction, commits the result, and appends its
    /// receipt. Returns the gas it used.
    pub fn execute(&mut self, rlp: &[u8]) -> Result<U256, StateError> {
        let (transaction, start_gas_used, gas_used) = {
            let mut executive = Executive::setup(self, rlp)?;
            executive.go()?;
            executive.finalize()?
        };
        self.commit()?;

        let hash = transaction.sha3();
        self.transactions.push(TransactionReceipt {
            transaction,
            state_root: self.trie.root(),
            cumulative_gas: start_gas_used + gas_used,
        });
        self.transaction_set.insert(hash);
        Ok(gas_used)
    }

    /// Runs a message call frame: moves the value from the caller to the
    /// callee, runs the callee's code if it has any, and reverts the frame
    /// on any VM failure. Both sides of the transfer sit inside the frame
    /// snapshot, so a failed frame unwinds the whole transfer. With
    /// `simulate` every effect is reverted afterwards.
    #[allow(clippy::too_many_arguments)]
    pub fn call(
        &mut self,
        to: Address,
        sender: Address,
        value: U256,
        gas_price: U256,
        data: &[u8],
        gas: &mut U256,
        out: &mut [u8],
        origin: Address,
        simulate: bool,
    ) -> Result<bool, StateError> {
        let snapshot = self.snapshot();
        self.sub_balance(sender, value)?;
        self.add_balance(to, value)?;

        if !self.address_has_code(to)? {
            if simulate {
                self.restore(snapshot);
            }
            return Ok(true);
        }

        let code = self.code(to)?.unwrap_or_default();
        let mut vm = Vm::new(*gas);
        let mut ext = ExtVm::new(self, to, sender, origin, value, gas_price, data.to_vec(), code);
        let result = vm.go(&mut ext);
        let failure = ext.take_failure();
        drop(ext);
        *gas = vm.gas();

        let reverted = match result {
            Ok(output) => {
                let n = out.len().min(output.len());
                out[..n].copy_from_slice(&output[..n]);
                false
            }
            Err(VmError::Host(message)) => {
                return Err(failure.unwrap_or(StateError::VmHost(message)));
            }
            Err(e) => {
                debug!(target: "state", error = %e, "call frame failed, reverting");
                true
            }
        };
        if reverted || simulate {
            self.restore(snapshot);
        }
        Ok(!reverted)
    }

    /// Runs a creation frame: derives the new address, moves the endowment
    /// from the sender onto it, runs the init code, and installs the
    /// returned bytes as the contract's code. The endowment transfer sits
    /// inside the frame snapshot, so a failed frame unwinds it. Returns the
    /// address and whether the frame succeeded.
    pub fn create(
        &mut self,
        sender: Address,
        endowment: U256,
        gas_price: U256,
        gas: &mut U256,
        init: &[u8],
        origin: Address,
    ) -> Result<(Address, bool), StateError> {
        // The sender's nonce was bumped before we got here.
        let nonce = self.transactions_from(sender)?.wrapping_sub(U256::from(1));
        let mut address = contract_address(&sender, nonce);
        while self.address_in_use(address)? {
            address = increment_address(address);
        }
        trace!(target: "state", %sender, %address, "creating contract");

        let snapshot = self.snapshot();
        self.sub_balance(sender, endowment)?;
        self.cache.insert(address, AccountState::new().with_balance(endowment));

        let mut vm = Vm::new(*gas);
        let mut ext =
            ExtVm::new(self, address, sender, origin, endowment, gas_price, Vec::new(), init.to_vec());
        let result = vm.go(&mut ext);
        let failure = ext.take_failure();
        drop(ext);
        *gas = vm.gas();

        match result {
            Ok(out) => {
                // Nothing to install if the init code suicided the account.
                if self.address_in_use(address)? {
                    self.set_code(address, out)?;
                }
                Ok((address, true))
            }
            Err(VmError::Host(message)) => {
                Err(failure.unwrap_or(StateError::VmHost(message)))
            }
            Err(e) => {
                debug!(target: "state", error = %e, "creation frame failed, reverting");
                self.restore(snapshot);
                Ok((address, false))
            }
        }
    }

    // ---------------------------------------------------------------------
    // Block synchronization

    /// Synchronizes with the chain's canonical head.
    pub fn sync_chain<C: BlockChain>(&mut self, chain: &C) -> Result<bool, StateError> {
        self.sync_to(chain, chain.current_hash())
    }

    /// Synchronizes with a specific block: a no-op if it is already our
    /// parent, an advance if we mined it ourselves, otherwise a replay from
    /// the nearest ancestor whose state is already in the store.
    pub fn sync_to<C: BlockChain>(
        &mut self,
        chain: &C,
        block_hash: B256,
    ) -> Result<bool, StateError> {
        let bytes = chain.block(&block_hash).ok_or(StateError::UnknownBlock(block_hash))?;
        let mut info = BlockInfo::from_block(&bytes)?;

        if info.hash == self.current_block.hash {
            // We mined this one; just move forward.
            self.previous_block = self.current_block.clone();
            self.reset_current();
            return Ok(true);
        }
        if info.hash == self.previous_block.hash {
            return Ok(false);
        }

        // Walk back to the most recent ancestor whose state root we hold,
        // then replay forward.
        let mut replay = Vec::new();
        while info.hash != self.genesis.hash && self.db.lookup(&info.state_root)?.is_none() {
            replay.push(info.hash);
            let parent =
                chain.block(&info.parent_hash).ok_or(StateError::UnknownBlock(info.parent_hash))?;
            info = BlockInfo::from_block(&parent)?;
        }
        debug!(target: "state", blocks = replay.len(), from = %info.hash, "replaying chain");

        self.previous_block = info;
        self.reset_current();
        for hash in replay.iter().rev() {
            let block = chain.block(hash).ok_or(StateError::UnknownBlock(*hash))?;
            self.trusted_playback(&block, true)?;
        }
        self.reset_current();
        Ok(true)
    }

    /// Replays a block already vetted by the chain store.
    pub fn trusted_playback(
        &mut self,
        block: &[u8],
        full_commit: bool,
    ) -> Result<U256, StateError> {
        self.current_block = BlockInfo::from_block(block)?;
        self.playback_raw(block, None, full_commit)
    }

    /// Replays a block against explicit parent and grandparent headers.
    pub fn playback(
        &mut self,
        block: &[u8],
        parent: &BlockInfo,
        grand_parent: Option<&BlockInfo>,
        full_commit: bool,
    ) -> Result<U256, StateError> {
        self.previous_block = parent.clone();
        self.reset_current();
        self.current_block = BlockInfo::from_block(block)?;
        self.playback_raw(block, grand_parent, full_commit)
    }

    /// Replays `current_block` from its raw bytes and returns the total
    /// difficulty increment. Any validation failure rolls the overlay back.
    fn playback_raw(
        &mut self,
        block: &[u8],
        grand_parent: Option<&BlockInfo>,
        full_commit: bool,
    ) -> Result<U256, StateError> {
        match self.playback_inner(block, grand_parent, full_commit) {
            Ok(increment) => Ok(increment),
            Err(e) => {
                self.db.rollback();
                Err(e)
            }
        }
    }

    fn playback_inner(
        &mut self,
        block: &[u8],
        grand_parent: Option<&BlockInfo>,
        full_commit: bool,
    ) -> Result<U256, StateError> {
        if self.current_block.parent_hash != self.previous_block.hash {
            return Err(StateError::InvalidParentHash);
        }

        let (content, _) = rlp_raw::split_list(block)?;
        let mut items = content;
        let _header = rlp_raw::take_item(&mut items)?;
        let txs_item = rlp_raw::take_item(&mut items)?;
        let uncles_item = rlp_raw::take_item(&mut items)?;

        // Re-execute the transactions, checking each receipt against the
        // replay, and rebuild the transactions manifest over scratch store.
        let mut manifest_db = OverlayDB::new(MemoryDB::new());
        let mut manifest = Trie::new();
        manifest.init(&mut manifest_db);

        let (mut txs, _) = rlp_raw::split_list(txs_item)?;
        let mut index = 0u64;
        while !txs.is_empty() {
            let receipt_item = rlp_raw::take_item(&mut txs)?;
            let (receipt_fields, _) = rlp_raw::split_list(receipt_item)?;
            let mut fields = receipt_fields;
            let tx_item = rlp_raw::take_item(&mut fields)?;

            self.execute(tx_item)?;

            let claimed_root = B256::decode(&mut fields)?;
            if claimed_root != self.trie.root() {
                warn!(target: "state", index, "receipt state root mismatch");
                return Err(StateError::InvalidTransactionStateRoot);
            }
            let claimed_gas = U256::decode(&mut fields)?;
            if claimed_gas != self.gas_used() {
                return Err(StateError::InvalidTransactionGasUsed);
            }

            manifest.insert(
                &mut manifest_db,
                &alloy_rlp::encode(U256::from(index)),
                receipt_item.to_vec(),
            )?;
            index += 1;
        }
        if manifest.root() != self.current_block.transactions_root {
            warn!(target: "state", "bad transactions root");
            return Err(StateError::InvalidTransactionStateRoot);
        }

        // Validate uncles and collect their rewards and difficulties.
        let mut increment = self.current_block.difficulty;
        let mut nonces = HashSet::from([self.current_block.nonce]);
        let mut rewarded = Vec::new();
        let (mut uncles, _) = rlp_raw::split_list(uncles_item)?;
        while !uncles.is_empty() {
            let uncle_item = rlp_raw::take_item(&mut uncles)?;
            let uncle = BlockInfo::from_header(uncle_item)?;
            if self.previous_block.parent_hash != uncle.parent_hash {
                return Err(StateError::UncleNotAnUncle);
            }
            if !nonces.insert(uncle.nonce) {
                return Err(StateError::DuplicateUncleNonce);
            }
            if let Some(grand_parent) = grand_parent {
                uncle.verify_parent(grand_parent)?;
            }
            increment = increment.saturating_add(uncle.difficulty);
            rewarded.push(uncle.coinbase_address);
        }
        self.apply_rewards(&rewarded)?;

        self.commit()?;
        if self.current_block.state_root != self.trie.root() {
            warn!(
                target: "state",
                given = %self.current_block.state_root,
                calculated = %self.trie.root(),
                "bad state root"
            );
            self.db.rollback();
            return Err(StateError::InvalidStateRoot);
        }

        if full_commit {
            self.db.commit()?;
            self.previous_block = self.current_block.clone();
        } else {
            self.db.rollback();
        }
        self.reset_current();
        Ok(increment)
    }

    /// Credits the block reward plus the uncle inclusion bonus to the
    /// current coinbase and the uncle reward to each uncle's coinbase.
    fn apply_rewards(&mut self, uncle_coinbases: &[Address]) -> Result<(), StateError> {
        let base = self.config.block_reward;
        let uncle_reward = base * U256::from(3) / U256::from(4);
        let inclusion_bonus = base / U256::from(8);

        let mut reward = base;
        for address in uncle_coinbases {
            self.add_balance(*address, uncle_reward)?;
            reward += inclusion_bonus;
        }
        let coinbase = self.current_block.coinbase_address;
        self.add_balance(coinbase, reward)
    }

    /// Starts a fresh current block on top of `previous_block`, clearing
    /// pending transactions and retargeting the trie at the parent state.
    pub fn reset_current(&mut self) {
        self.transactions.clear();
        self.transaction_set.clear();
        self.cache.clear();
        self.current_txs.clear();
        self.current_uncles.clear();
        self.current_bytes.clear();

        let mut current = BlockInfo {
            coinbase_address: self.our_address,
            timestamp: U256::from(unix_now()),
            min_gas_price: self.config.min_gas_price,
            ..Default::default()
        };
        current.populate_from_parent(&self.previous_block);
        self.current_block = current;

        self.last_tx = self.db.clone();
        self.trie.set_root(self.current_block.state_root);
    }

    // ---------------------------------------------------------------------
    // Mining

    /// Rewinds the rewards and uncle bookkeeping of a previous
    /// `commit_to_mine`, leaving the state as of the last transaction.
    pub fn uncommit_to_mine(&mut self) {
        if self.current_block.sha3_uncles != B256::ZERO {
            self.cache.clear();
            let root = self
                .transactions
                .last()
                .map(|r| r.state_root)
                .unwrap_or(self.previous_block.state_root);
            self.trie.set_root(root);
            self.db = self.last_tx.clone();
            self.current_block.sha3_uncles = B256::ZERO;
        }
    }

    /// Seals the pending transactions into `current_block`: gathers sibling
    /// uncles, builds the transactions manifest, applies rewards, commits,
    /// and stamps the header roots.
    pub fn commit_to_mine<C: BlockChain>(&mut self, chain: &C) -> Result<(), StateError> {
        self.uncommit_to_mine();
        debug!(target: "state", parent = %self.previous_block.hash, "committing to mine");
        self.last_tx = self.db.clone();

        // Uncles are the other children of our grandparent.
        let mut uncle_payload = Vec::new();
        let mut uncle_coinbases = Vec::new();
        if self.previous_block.hash != self.genesis.hash {
            for sibling in chain.children_of(&self.previous_block.parent_hash) {
                if sibling == self.previous_block.hash {
                    continue;
                }
                let bytes =
                    chain.block(&sibling).ok_or(StateError::UnknownBlock(sibling))?;
                let info = BlockInfo::from_block(&bytes)?;
                uncle_payload.extend_from_slice(&info.rlp(true));
                uncle_coinbases.push(info.coinbase_address);
            }
        }
        let mut uncles_rlp = Vec::new();
        rlp_raw::put_list_header(&mut uncles_rlp, uncle_payload.len());
        uncles_rlp.extend_from_slice(&uncle_payload);

        let mut manifest_db = OverlayDB::new(MemoryDB::new());
        let mut manifest = Trie::new();
        manifest.init(&mut manifest_db);
        let mut txs_payload = Vec::new();
        for (index, receipt) in self.transactions.iter().enumerate() {
            let item = receipt.rlp();
            manifest.insert(
                &mut manifest_db,
                &alloy_rlp::encode(U256::from(index as u64)),
                item.clone(),
            )?;
            txs_payload.extend_from_slice(&item);
        }
        let mut txs_rlp = Vec::new();
        rlp_raw::put_list_header(&mut txs_rlp, txs_payload.len());
        txs_rlp.extend_from_slice(&txs_payload);

        self.current_txs = txs_rlp;
        self.current_uncles = uncles_rlp;
        self.current_block.transactions_root = manifest.root();
        self.current_block.sha3_uncles = keccak256(&self.current_uncles);

        self.apply_rewards(&uncle_coinbases)?;
        self.commit()?;

        self.current_block.gas_used = self.gas_used();
        self.current_block.state_root = self.trie.root();
        self.current_block.parent_hash = self.previous_block.hash;
        Ok(())
    }

    /// Searches for a proof-of-work nonce for up to `ms_timeout`
    /// milliseconds. On success the overlay reaches disk and the block is
    /// compiled into `current_bytes`.
    pub fn mine(&mut self, ms_timeout: u64) -> Result<MineInfo, StateError> {
        self.current_block.difficulty =
            self.current_block.calculate_difficulty(&self.previous_block);

        let prehash = self.current_block.header_hash_without_nonce();
        let difficulty = self.current_block.difficulty;
        let mut nonce = self.current_block.nonce;
        let mut pow = std::mem::take(&mut self.pow);
        let info = pow.mine(&mut nonce, &prehash, difficulty, Duration::from_millis(ms_timeout));
        self.pow = pow;

        if info.completed {
            self.current_block.nonce = nonce;
            self.complete_mine()?;
        } else {
            self.current_bytes.clear();
        }
        Ok(info)
    }

    /// Commits the overlay and compiles `current_block` plus the pending
    /// body into the final block encoding.
    pub(crate) fn complete_mine(&mut self) -> Result<(), StateError> {
        self.db.commit()?;
        self.current_block.seal();

        let header = self.current_block.rlp(true);
        let mut block = Vec::new();
        rlp_raw::put_list_header(
            &mut block,
            header.len() + self.current_txs.len() + self.current_uncles.len(),
        );
        block.extend_from_slice(&header);
        block.extend_from_slice(&self.current_txs);
        block.extend_from_slice(&self.current_uncles);
        self.current_bytes = block;
        debug!(
            target: "state",
            hash = %self.current_block.hash,
            parent = %self.current_block.parent_hash,
            "mined block"
        );
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Queue interaction

    /// Drains the queue into the pending block: executes every eligible
    /// transaction until a full pass adds none. Stale transactions are
    /// dropped, early-nonce ones shelved as future.
    pub fn sync_queue(&mut self, queue: &mut TransactionQueue) -> Result<bool, StateError> {
        let mut changed = false;
        queue.promote_futures();
        loop {
            let mut good = 0;
            for (hash, rlp) in queue.transactions() {
                if self.transaction_set.contains(&hash) {
                    continue;
                }
                self.uncommit_to_mine();
                match self.execute(&rlp) {
                    Ok(_) => {
                        changed = true;
                        good += 1;
                    }
                    Err(StateError::InvalidNonce { required, candidate }) => {
                        if required > candidate {
                            queue.drop_tx(&hash);
                            changed = true;
                        } else {
                            queue.set_future(&hash);
                        }
                    }
                    Err(e) if e.is_transaction_failure() => {
                        debug!(target: "state", %hash, error = %e, "dropping transaction");
                        queue.drop_tx(&hash);
                        changed = true;
                    }
                    Err(e) => return Err(e),
                }
            }
            if good == 0 {
                break;
            }
        }
        Ok(changed)
    }

    /// Drops queued transactions already superseded by the settled state.
    pub fn cull(&mut self, queue: &mut TransactionQueue) -> Result<bool, StateError> {
        let mut dropped = false;
        for (hash, rlp) in queue.transactions() {
            if self.transaction_set.contains(&hash) {
                continue;
            }
            let stale = match Transaction::decode(&rlp).and_then(|t| {
                let sender = t.sender()?;
                Ok((t, sender))
            }) {
                Ok((transaction, sender)) => {
                    transaction.nonce < self.transactions_from(sender)?
                }
                Err(_) => true,
            };
            if stale {
                queue.drop_tx(&hash);
                dropped = true;
            }
        }
        Ok(dropped)
    }

    // ---------------------------------------------------------------------
    // Views & diagnostics

    /// A copy of this state as of receipt `i` (0 = before any pending
    /// transaction), with the later receipts stripped.
    pub fn from_pending(&self, i: usize) -> Self {
        let mut out = self.clone();
        out.cache.clear();
        let i = i.min(self.transactions.len());
        let root = if i == 0 {
            self.previous_block.state_root
        } else {
            self.transactions[i - 1].state_root
        };
        out.trie.set_root(root);
        while out.transactions.len() > i {
            if let Some(receipt) = out.transactions.pop() {
                out.transaction_set.remove(&receipt.transaction.sha3());
            }
        }
        out
    }

    /// Structural health check: every node of the state trie and of each
    /// account's storage trie resolves, and every code hash has its bytes.
    /// With `enforce_refs`, dead overlay entries must not be load-bearing;
    /// with `require_no_leftovers`, the overlay must hold nothing the trie
    /// does not reference.
    pub fn is_trie_good(&mut self, enforce_refs: bool, require_no_leftovers: bool) -> bool {
        let passes: &[bool] = if enforce_refs { &[false, true] } else { &[false] };
        let mut good = true;
        for &enforce in passes {
            self.db.set_enforce_refs(enforce);
            good &= self.check_trie(enforce, require_no_leftovers);
        }
        self.db.set_enforce_refs(false);
        good
    }

    fn check_trie(&self, enforce: bool, require_no_leftovers: bool) -> bool {
        if require_no_leftovers {
            match self.trie.left_overs(&self.db) {
                Ok(left) if !left.is_empty() => {
                    warn!(target: "state", count = left.len(), "overlay leftovers");
                    return false;
                }
                Ok(_) => {}
                Err(_) => return false,
            }
        }
        let entries = match self.trie.iter(&self.db) {
            Ok(iter) => iter,
            Err(_) => return false,
        };
        for entry in entries {
            let Ok((_, payload)) = entry else { return false };
            let Ok(record) = AccountRecord::decode(&mut payload.as_slice()) else {
                return false;
            };
            let storage = Trie::from_root(record.storage_root);
            if !storage.is_empty() {
                let Ok(iter) = storage.iter(&self.db) else { return false };
                if iter.collect::<Result<Vec<_>, _>>().is_err() {
                    return false;
                }
            }
            if !enforce && record.code_hash != KECCAK_EMPTY {
                match self.db.lookup(&record.code_hash) {
                    Ok(Some(_)) => {}
                    _ => return false,
                }
            }
        }
        true
    }
}

/// Folds a cache of touched accounts into the state trie: dead accounts are
/// removed, staged storage is applied to each account's storage trie, fresh
/// code is persisted under its hash, and the record is rewritten.
fn commit_cache<B>(
    cache: &HashMap<Address, AccountState>,
    db: &mut OverlayDB<B>,
    trie: &mut Trie,
) -> Result<(), StateError>
where
    B: KeyValueDB + Clone,
    B::Error: Debug,
{
    for (address, account) in cache {
        if !account.is_alive() {
            trie.remove(db, address.as_slice())?;
            continue;
        }

        let mut storage_root = account.storage_root();
        if !account.storage_overlay().is_empty() {
            let mut storage = Trie::from_root(storage_root);
            for (key, value) in account.storage_overlay() {
                let key = B256::from(*key);
                if value.is_zero() {
                    storage.remove(db, key.as_slice())?;
                } else {
                    storage.insert(db, key.as_slice(), alloy_rlp::encode(value))?;
                }
            }
            storage_root = storage.root();
        }

        let code_hash = if account.is_fresh_code() {
            let code = account.code().unwrap_or(&[]);
            if code.is_empty() {
                KECCAK_EMPTY
            } else {
                let hash = keccak256(code);
                db.insert(hash, code.to_vec());
                hash
            }
        } else {
            account.code_hash()
        };

        let record = AccountRecord {
            nonce: account.nonce(),
            balance: account.balance(),
            storage_root,
            code_hash,
        };
        trie.insert(db, address.as_slice(), alloy_rlp::encode(&record))?;
    }
    Ok(())
}

fn increment_address(address: Address) -> Address {
    let word = U256::from_be_bytes(address.into_word().0).wrapping_add(U256::from(1));
    Address::from_word(B256::from(word))
}

fn unix_now() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or_default()
}
