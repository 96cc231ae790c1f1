//! Per-account state: the persisted record and its in-cache form.

use std::collections::BTreeMap;

use alloy_primitives::{B256, U256};
use alloy_rlp::{RlpDecodable, RlpEncodable};
use alloy_trie::{EMPTY_ROOT_HASH, KECCAK_EMPTY};

/// The account record as persisted in the state trie.
///
/// Encoded as the RLP list `[nonce, balance, storage_root, code_hash]`,
/// keyed by the account address.
#[derive(Copy, Clone, Debug, PartialEq, Eq, RlpEncodable, RlpDecodable)]
pub struct AccountRecord {
    /// Number of transactions this account has originated
    pub nonce: U256,
    /// Balance in base units
    pub balance: U256,
    /// Root of the account's storage trie
    pub storage_root: B256,
    /// Hash of the account's code; `KECCAK_EMPTY` when it has none
    pub code_hash: B256,
}

impl Default for AccountRecord {
    fn default() -> Self {
        Self {
            nonce: U256::ZERO,
            balance: U256::ZERO,
            storage_root: EMPTY_ROOT_HASH,
            code_hash: KECCAK_EMPTY,
        }
    }
}

/// An account as cached between commits.
///
/// Wraps the persisted fields with the transient ones: staged storage
/// writes, materialized code, and liveness. A zero staged storage value
/// deletes the key from the storage trie at commit; a dead account is
/// removed from the state trie entirely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountState {
    alive: bool,
    nonce: U256,
    balance: U256,
    /// Storage root as of the last commit; staged writes live below.
    storage_root: B256,
    code_hash: B256,
    /// Code bytes when materialized from the store or freshly written.
    code_cache: Option<Vec<u8>>,
    /// Set when code was written this session and is not yet persisted.
    fresh_code: bool,
    /// Storage writes (and memoized reads) staged over the trie.
    storage_overlay: BTreeMap<U256, U256>,
}

impl Default for AccountState {
    fn default() -> Self {
        Self {
            alive: true,
            nonce: U256::ZERO,
            balance: U256::ZERO,
            storage_root: EMPTY_ROOT_HASH,
            code_hash: KECCAK_EMPTY,
            code_cache: None,
            fresh_code: false,
            storage_overlay: BTreeMap::new(),
        }
    }
}

impl AccountState {
    /// A fresh, empty, live account.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a starting balance.
    pub fn with_balance(mut self, balance: U256) -> Self {
        self.balance = balance;
        self
    }

    /// Rehydrates the cache form from a persisted record.
    pub fn from_record(record: AccountRecord) -> Self {
        Self {
            nonce: record.nonce,
            balance: record.balance,
            storage_root: record.storage_root,
            code_hash: record.code_hash,
            ..Self::default()
        }
    }

    /// Account nonce.
    pub fn nonce(&self) -> U256 {
        self.nonce
    }

    /// Account balance.
    pub fn balance(&self) -> U256 {
        self.balance
    }

    /// Storage root as of the last commit.
    pub fn storage_root(&self) -> B256 {
        self.storage_root
    }

    /// Hash of the account's code.
    pub fn code_hash(&self) -> B256 {
        self.code_hash
    }

    /// Whether the account still exists; killed accounts are removed from
    /// the state trie at commit.
    pub fn is_alive(&self) -> bool {
        self.alive
    }

    /// Bumps the nonce by one.
    pub fn inc_nonce(&mut self) {
        self.nonce = self.nonce.wrapping_add(U256::from(1));
    }

    /// Credits the balance, wrapping modulo 2^256.
    pub fn add_balance(&mut self, amount: U256) {
        self.balance = self.balance.wrapping_add(amount);
    }

    /// Debits the balance; callers check affordability first.
    pub fn sub_balance(&mut self, amount: U256) {
        self.balance = self.balance.wrapping_sub(amount);
    }

    /// Stages a storage write (or memoizes a read).
    pub fn set_storage(&mut self, key: U256, value: U256) {
        self.storage_overlay.insert(key, value);
    }

    /// Staged storage value, if any.
    pub fn cached_storage(&self, key: &U256) -> Option<U256> {
        self.storage_overlay.get(key).copied()
    }

    /// The staged storage writes.
    pub fn storage_overlay(&self) -> &BTreeMap<U256, U256> {
        &self.storage_overlay
    }

    /// Caches code bytes loaded from the store.
    pub fn note_code(&mut self, code: Vec<u8>) {
        self.code_cache = Some(code);
    }

    /// Installs freshly written code; the hash is fixed at commit.
    pub fn set_code(&mut self, code: Vec<u8>) {
        self.code_cache = Some(code);
        self.fresh_code = true;
    }

    /// The cached code bytes, if materialized.
    pub fn code(&self) -> Option<&[u8]> {
        self.code_cache.as_deref()
    }

    /// Whether the cached code is valid.
    pub fn code_cache_valid(&self) -> bool {
        self.code_cache.is_some()
    }

    /// Whether code was written this session but not yet persisted.
    pub fn is_fresh_code(&self) -> bool {
        self.fresh_code
    }

    /// Marks the account dead and clears it; commit removes it from the
    /// state trie.
    pub fn kill(&mut self) {
        *self = Self { alive: false, ..Self::default() };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::keccak256;
    use alloy_rlp::{Decodable, Encodable};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_record_round_trip() {
        let record = AccountRecord {
            nonce: U256::from(3),
            balance: U256::from(1_000_000),
            storage_root: keccak256(b"storage"),
            code_hash: keccak256(b"code"),
        };
        let mut encoded = Vec::new();
        record.encode(&mut encoded);
        assert_eq!(AccountRecord::decode(&mut encoded.as_slice()).unwrap(), record);
    }

    #[test]
    fn test_default_record_is_empty_account() {
        let record = AccountRecord::default();
        assert_eq!(record.storage_root, EMPTY_ROOT_HASH);
        assert_eq!(record.code_hash, KECCAK_EMPTY);
    }

    #[test]
    fn test_balance_and_nonce_mutation() {
        let mut account = AccountState::new().with_balance(U256::from(100));
        account.add_balance(U256::from(10));
        account.sub_balance(U256::from(30));
        account.inc_nonce();
        assert_eq!(account.balance(), U256::from(80));
        assert_eq!(account.nonce(), U256::from(1));
    }

    #[test]
    fn test_kill_resets_everything() {
        let mut account = AccountState::new().with_balance(U256::from(5));
        account.set_storage(U256::from(1), U256::from(2));
        account.set_code(vec![0x60]);
        account.kill();
        assert!(!account.is_alive());
        assert_eq!(account.balance(), U256::ZERO);
        assert!(account.storage_overlay().is_empty());
        assert_eq!(account.code(), None);
    }

    #[test]
    fn test_round_trip_through_record() {
        let account = AccountState::from_record(AccountRecord {
            nonce: U256::from(9),
            balance: U256::from(77),
            storage_root: keccak256(b"root"),
            code_hash: keccak256(b"hash"),
        });
        assert!(account.is_alive());
        assert_eq!(account.nonce(), U256::from(9));
        assert_eq!(account.storage_root(), keccak256(b"root"));
        assert!(!account.code_cache_valid());
    }
}
