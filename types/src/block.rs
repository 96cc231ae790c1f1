//! Block header structure, canonical encoding and parent linkage.

use alloy_primitives::{keccak256, Address, Bytes, B256, U256};
use alloy_rlp::{Decodable, Encodable};

use crate::params::{DIFFICULTY_ADJUSTMENT_WINDOW, GENESIS_DIFFICULTY, MIN_DIFFICULTY};
use crate::TypesError;

/// A block header.
///
/// The canonical encoding is the RLP list of the fields in declaration
/// order, `hash` excluded: `hash` is `keccak256` of that list and is cached
/// here because headers are compared and linked by it constantly. The
/// proof-of-work nonce is the last field; the mining prehash is the same
/// list with the nonce left off.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockInfo {
    /// Cached `keccak256(rlp(header))`; not part of the encoding
    pub hash: B256,
    /// Hash of the parent block header
    pub parent_hash: B256,
    /// `keccak256` of the block's uncle-list encoding
    pub sha3_uncles: B256,
    /// Recipient of the mining reward
    pub coinbase_address: Address,
    /// State trie root after executing the block
    pub state_root: B256,
    /// Root of the transactions manifest trie
    pub transactions_root: B256,
    /// Mining difficulty of this block
    pub difficulty: U256,
    /// Unix timestamp claimed by the miner
    pub timestamp: U256,
    /// Height; the genesis block is number zero
    pub number: U256,
    /// Lowest gas price the miner accepted
    pub min_gas_price: U256,
    /// Gas ceiling for the block
    pub gas_limit: U256,
    /// Gas consumed by all transactions in the block
    pub gas_used: U256,
    /// Free-form miner data
    pub extra_data: Bytes,
    /// Proof-of-work nonce
    pub nonce: B256,
}

impl BlockInfo {
    fn header_payload_length(&self, with_nonce: bool) -> usize {
        let mut length = 0;
        length += self.parent_hash.length();
        length += self.sha3_uncles.length();
        length += self.coinbase_address.length();
        length += self.state_root.length();
        length += self.transactions_root.length();
        length += self.difficulty.length();
        length += self.timestamp.length();
        length += self.number.length();
        length += self.min_gas_price.length();
        length += self.gas_limit.length();
        length += self.gas_used.length();
        length += self.extra_data.length();
        if with_nonce {
            length += self.nonce.length();
        }
        length
    }

    /// Appends the header encoding to `out`, with or without the nonce.
    pub fn fill_stream(&self, out: &mut Vec<u8>, with_nonce: bool) {
        alloy_rlp::Header { list: true, payload_length: self.header_payload_length(with_nonce) }
            .encode(out);
        self.parent_hash.encode(out);
        self.sha3_uncles.encode(out);
        self.coinbase_address.encode(out);
        self.state_root.encode(out);
        self.transactions_root.encode(out);
        self.difficulty.encode(out);
        self.timestamp.encode(out);
        self.number.encode(out);
        self.min_gas_price.encode(out);
        self.gas_limit.encode(out);
        self.gas_used.encode(out);
        self.extra_data.encode(out);
        if with_nonce {
            self.nonce.encode(out);
        }
    }

    /// The canonical header encoding.
    pub fn rlp(&self, with_nonce: bool) -> Vec<u8> {
        let mut out = Vec::new();
        self.fill_stream(&mut out, with_nonce);
        out
    }

    /// `keccak256` of the canonical encoding.
    pub fn hash_header(&self) -> B256 {
        keccak256(self.rlp(true))
    }

    /// The proof-of-work prehash: the header with the nonce left off.
    pub fn header_hash_without_nonce(&self) -> B256 {
        keccak256(self.rlp(false))
    }

    /// Recomputes and caches `hash`.
    pub fn seal(&mut self) {
        self.hash = self.hash_header();
    }

    /// Decodes a header from its raw RLP item and caches its hash.
    pub fn from_header(header_item: &[u8]) -> Result<Self, TypesError> {
        let mut buf = header_item;
        let head = alloy_rlp::Header::decode(&mut buf)?;
        if !head.list {
            return Err(TypesError::BadEncoding("header is not a list"));
        }
        let consumed = header_item.len() - buf.len();
        let total = consumed + head.payload_length;
        if header_item.len() < total {
            return Err(TypesError::BadEncoding("truncated header"));
        }
        let mut payload = &header_item[consumed..total];

        let parent_hash = B256::decode(&mut payload)?;
        let sha3_uncles = B256::decode(&mut payload)?;
        let coinbase_address = Address::decode(&mut payload)?;
        let state_root = B256::decode(&mut payload)?;
        let transactions_root = B256::decode(&mut payload)?;
        let difficulty = U256::decode(&mut payload)?;
        let timestamp = U256::decode(&mut payload)?;
        let number = U256::decode(&mut payload)?;
        let min_gas_price = U256::decode(&mut payload)?;
        let gas_limit = U256::decode(&mut payload)?;
        let gas_used = U256::decode(&mut payload)?;
        let extra_data = Bytes::decode(&mut payload)?;
        let nonce = B256::decode(&mut payload)?;
        if !payload.is_empty() {
            return Err(TypesError::BadEncoding("trailing header fields"));
        }

        Ok(Self {
            hash: keccak256(&header_item[..total]),
            parent_hash,
            sha3_uncles,
            coinbase_address,
            state_root,
            transactions_root,
            difficulty,
            timestamp,
            number,
            min_gas_price,
            gas_limit,
            gas_used,
            extra_data,
            nonce,
        })
    }

    /// Decodes the header out of a whole block `[header, txs, uncles]`.
    pub fn from_block(block: &[u8]) -> Result<Self, TypesError> {
        let mut buf = block;
        let head = alloy_rlp::Header::decode(&mut buf)?;
        if !head.list {
            return Err(TypesError::BadEncoding("block is not a list"));
        }
        let header_item = take_raw_item(&mut buf)?;
        Self::from_header(header_item)
    }

    /// Primes a fresh header as the child of `parent`: linkage, height,
    /// carried-over state root and gas limit, derived difficulty. The
    /// timestamp must already be set, since difficulty depends on it.
    pub fn populate_from_parent(&mut self, parent: &BlockInfo) {
        self.parent_hash = parent.hash;
        self.number = parent.number + U256::from(1);
        self.state_root = parent.state_root;
        self.gas_limit = parent.gas_limit;
        self.gas_used = U256::ZERO;
        self.difficulty = self.calculate_difficulty(parent);
    }

    /// Derives this block's difficulty from its parent: a 1/1024 step up
    /// when sealed within the adjustment window, down otherwise, floored.
    pub fn calculate_difficulty(&self, parent: &BlockInfo) -> U256 {
        if self.number.is_zero() {
            return GENESIS_DIFFICULTY;
        }
        let step = parent.difficulty >> 10;
        let window = parent.timestamp.saturating_add(U256::from(DIFFICULTY_ADJUSTMENT_WINDOW));
        let derived = if self.timestamp < window {
            parent.difficulty.saturating_add(step)
        } else {
            parent.difficulty - step
        };
        derived.max(MIN_DIFFICULTY)
    }

    /// Checks the fields that must agree with the claimed parent.
    pub fn verify_parent(&self, parent: &BlockInfo) -> Result<(), TypesError> {
        if self.number != parent.number + U256::from(1) {
            return Err(TypesError::InvalidParent("number"));
        }
        if self.parent_hash != parent.hash {
            return Err(TypesError::InvalidParent("parent hash"));
        }
        if self.gas_limit != parent.gas_limit {
            return Err(TypesError::InvalidParent("gas limit"));
        }
        if self.timestamp < parent.timestamp {
            return Err(TypesError::InvalidParent("timestamp"));
        }
        if self.difficulty != self.calculate_difficulty(parent) {
            return Err(TypesError::InvalidParent("difficulty"));
        }
        Ok(())
    }
}

/// Takes the next raw RLP item (header included) off the front of `buf`.
pub(crate) fn take_raw_item<'a>(buf: &mut &'a [u8]) -> Result<&'a [u8], TypesError> {
    let start = *buf;
    let mut peek = *buf;
    let head = alloy_rlp::Header::decode(&mut peek)?;
    let total = (start.len() - peek.len()) + head.payload_length;
    if start.len() < total {
        return Err(TypesError::BadEncoding("truncated item"));
    }
    let item = &start[..total];
    *buf = &start[total..];
    Ok(item)
}
