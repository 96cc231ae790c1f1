//! Per-transaction receipts.

use alloy_primitives::{B256, U256};
use alloy_rlp::{Decodable, Encodable};

use rust_eth_ledger_trie::rlp_raw;
use rust_eth_ledger_types::Transaction;

use crate::StateError;

/// Record of one executed transaction: the transaction itself, the state
/// trie root observed immediately after it, and the running gas total.
/// Encoded as `[tx, post_state_root, cumulative_gas]` inside block bodies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionReceipt {
    /// The executed transaction
    pub transaction: Transaction,
    /// State trie root right after execution
    pub state_root: B256,
    /// Gas used by the block up to and including this transaction
    pub cumulative_gas: U256,
}

impl TransactionReceipt {
    /// Appends the receipt encoding to `out`.
    pub fn fill_stream(&self, out: &mut Vec<u8>) {
        let transaction = self.transaction.rlp(true);
        let payload_length =
            transaction.len() + self.state_root.length() + self.cumulative_gas.length();
        alloy_rlp::Header { list: true, payload_length }.encode(out);
        out.extend_from_slice(&transaction);
        self.state_root.encode(out);
        self.cumulative_gas.encode(out);
    }

    /// The canonical encoding.
    pub fn rlp(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.fill_stream(&mut out);
        out
    }

    /// Decodes a receipt from its raw RLP item.
    pub fn decode(item: &[u8]) -> Result<Self, StateError> {
        let (content, _) = rlp_raw::split_list(item)?;
        let mut fields = content;
        let tx_item = rlp_raw::take_item(&mut fields)?;
        let transaction = Transaction::decode(tx_item)?;
        let state_root = B256::decode(&mut fields)?;
        let cumulative_gas = U256::decode(&mut fields)?;
        Ok(Self { transaction, state_root, cumulative_gas })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{keccak256, Address};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_receipt_round_trip() {
        let mut transaction = Transaction::call(
            Address::repeat_byte(0x42),
            U256::from(5),
            vec![1, 2, 3],
            U256::from(100),
            U256::from(1),
            U256::ZERO,
        );
        let key = k256::ecdsa::SigningKey::from_slice(&[0x44; 32]).expect("static test key");
        transaction.sign(&key).unwrap();

        let receipt = TransactionReceipt {
            transaction,
            state_root: keccak256(b"post state"),
            cumulative_gas: U256::from(21),
        };
        assert_eq!(TransactionReceipt::decode(&receipt.rlp()).unwrap(), receipt);
    }
}
