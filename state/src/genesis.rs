//! The genesis block and its pre-seeded accounts.

use alloy_primitives::{address, keccak256, Address, Bytes, B256, U256};

use rust_eth_ledger_trie::rlp_raw;
use rust_eth_ledger_types::{params, BlockInfo};

/// Accounts endowed in the genesis state.
pub const GENESIS_ACCOUNTS: [Address; 4] = [
    address!("8a40bfaa73256b60764c1bf40675a99083efb075"),
    address!("e6716f9544a56c530d868e4bfbacb172315bdead"),
    address!("1e12515ce3e0f817a4ddef9ca55788a1d66bd2df"),
    address!("1a26338f0d905e295fccb71fa9ea849ffa12aaf4"),
];

/// Balance granted to each genesis account, 2^200 base units.
pub const GENESIS_ENDOWMENT: U256 = U256::from_limbs([0, 0, 0, 1 << 8]);

/// The genesis header for a state whose seeded trie has `state_root`.
pub fn genesis_info(state_root: B256) -> BlockInfo {
    let mut info = BlockInfo {
        hash: B256::ZERO,
        parent_hash: B256::ZERO,
        // keccak256 of the empty uncle list encoding
        sha3_uncles: keccak256([0xc0u8]),
        coinbase_address: Address::ZERO,
        state_root,
        transactions_root: B256::ZERO,
        difficulty: params::GENESIS_DIFFICULTY,
        timestamp: U256::ZERO,
        number: U256::ZERO,
        min_gas_price: U256::ZERO,
        gas_limit: params::GENESIS_GAS_LIMIT,
        gas_used: U256::ZERO,
        extra_data: Bytes::new(),
        nonce: keccak256([42u8]),
    };
    info.seal();
    info
}

/// The genesis block wire encoding: `[header, [], []]`.
pub fn genesis_block(info: &BlockInfo) -> Vec<u8> {
    let header = info.rlp(true);
    let mut out = Vec::new();
    rlp_raw::put_list_header(&mut out, header.len() + 2);
    out.extend_from_slice(&header);
    out.push(0xc0);
    out.push(0xc0);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_genesis_block_round_trip() {
        let info = genesis_info(keccak256(b"seeded root"));
        let block = genesis_block(&info);
        assert_eq!(BlockInfo::from_block(&block).unwrap(), info);
        assert_eq!(info.number, U256::ZERO);
        assert_eq!(info.difficulty, params::GENESIS_DIFFICULTY);
    }

    #[test]
    fn test_endowment_is_two_to_the_200() {
        assert_eq!(GENESIS_ENDOWMENT, U256::from(1) << 200);
    }
}
