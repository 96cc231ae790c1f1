//! Signed transactions and contract address derivation.

use alloy_primitives::{keccak256, Address, Bytes, B256, U256};
use alloy_rlp::{Decodable, Encodable};
use k256::ecdsa::SigningKey;

use crate::block::take_raw_item;
use crate::crypto;
use crate::TypesError;

/// A transaction: `[nonce, gas_price, gas, to, value, data, v, r, s]`.
///
/// `to` is a 20-byte address for a message call and the empty string for a
/// contract creation, in which case `data` carries the init code. The
/// signature covers the first six fields; the sender is recovered from it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transaction {
    /// Sender transaction count at submission
    pub nonce: U256,
    /// Price paid per unit of gas
    pub gas_price: U256,
    /// Gas budget bought up front
    pub gas: U256,
    /// Call recipient, or `None` to create a contract
    pub to: Option<Address>,
    /// Base units transferred to the recipient or endowed to the creation
    pub value: U256,
    /// Call data, or init code for a creation
    pub data: Bytes,
    /// Signature recovery selector, 27 or 28
    pub v: u64,
    /// Signature r scalar
    pub r: U256,
    /// Signature s scalar
    pub s: U256,
}

impl Transaction {
    /// An unsigned message call.
    pub fn call(to: Address, value: U256, data: Vec<u8>, gas: U256, gas_price: U256, nonce: U256) -> Self {
        Self { nonce, gas_price, gas, to: Some(to), value, data: data.into(), ..Default::default() }
    }

    /// An unsigned contract creation.
    pub fn create(value: U256, init: Vec<u8>, gas: U256, gas_price: U256, nonce: U256) -> Self {
        Self { nonce, gas_price, gas, to: None, value, data: init.into(), ..Default::default() }
    }

    /// Whether this transaction creates a contract.
    pub fn is_creation(&self) -> bool {
        self.to.is_none()
    }

    fn payload_length(&self, with_signature: bool) -> usize {
        let mut length = 0;
        length += self.nonce.length();
        length += self.gas_price.length();
        length += self.gas.length();
        length += match &self.to {
            Some(to) => to.length(),
            None => 1,
        };
        length += self.value.length();
        length += self.data.length();
        if with_signature {
            length += self.v.length();
            length += self.r.length();
            length += self.s.length();
        }
        length
    }

    /// The canonical encoding, signed or unsigned.
    pub fn rlp(&self, with_signature: bool) -> Vec<u8> {
        let mut out = Vec::new();
        alloy_rlp::Header { list: true, payload_length: self.payload_length(with_signature) }
            .encode(&mut out);
        self.nonce.encode(&mut out);
        self.gas_price.encode(&mut out);
        self.gas.encode(&mut out);
        match &self.to {
            Some(to) => to.encode(&mut out),
            None => out.push(alloy_rlp::EMPTY_STRING_CODE),
        }
        self.value.encode(&mut out);
        self.data.encode(&mut out);
        if with_signature {
            self.v.encode(&mut out);
            self.r.encode(&mut out);
            self.s.encode(&mut out);
        }
        out
    }

    /// Hash of the signed encoding; the transaction's identity.
    pub fn sha3(&self) -> B256 {
        keccak256(self.rlp(true))
    }

    /// Hash of the unsigned encoding; what gets signed.
    pub fn sha3_unsigned(&self) -> B256 {
        keccak256(self.rlp(false))
    }

    /// Decodes a signed transaction from its raw RLP item.
    pub fn decode(item: &[u8]) -> Result<Self, TypesError> {
        let mut buf = item;
        let head = alloy_rlp::Header::decode(&mut buf)?;
        if !head.list {
            return Err(TypesError::BadEncoding("transaction is not a list"));
        }
        let consumed = item.len() - buf.len();
        let total = consumed + head.payload_length;
        if item.len() < total {
            return Err(TypesError::BadEncoding("truncated transaction"));
        }
        let mut payload = &item[consumed..total];

        let nonce = U256::decode(&mut payload)?;
        let gas_price = U256::decode(&mut payload)?;
        let gas = U256::decode(&mut payload)?;
        let to_item = take_raw_item(&mut payload)?;
        let to = if to_item == [alloy_rlp::EMPTY_STRING_CODE] {
            None
        } else {
            Some(Address::decode(&mut &to_item[..])?)
        };
        let value = U256::decode(&mut payload)?;
        let data = Bytes::decode(&mut payload)?;
        let v = u64::decode(&mut payload)?;
        let r = U256::decode(&mut payload)?;
        let s = U256::decode(&mut payload)?;
        if !payload.is_empty() {
            return Err(TypesError::BadEncoding("trailing transaction fields"));
        }

        Ok(Self { nonce, gas_price, gas, to, value, data, v, r, s })
    }

    /// Signs the transaction, filling in `v`, `r` and `s`.
    pub fn sign(&mut self, key: &SigningKey) -> Result<(), TypesError> {
        let (r, s, recovery_id) =
            crypto::sign_hash(&self.sha3_unsigned(), key).ok_or(TypesError::InvalidSignature)?;
        self.r = r;
        self.s = s;
        self.v = 27 + recovery_id as u64;
        Ok(())
    }

    /// Recovers the sender address from the signature.
    pub fn sender(&self) -> Result<Address, TypesError> {
        let recovery_id = match self.v {
            27 | 28 => (self.v - 27) as u8,
            _ => return Err(TypesError::InvalidSignature),
        };
        crypto::recover_address(&self.sha3_unsigned(), self.r, self.s, recovery_id)
            .ok_or(TypesError::InvalidSignature)
    }
}

/// The address a contract lands on: the low 160 bits of
/// `keccak256(rlp([sender, nonce]))`.
pub fn contract_address(sender: &Address, nonce: U256) -> Address {
    let mut out = Vec::new();
    alloy_rlp::Header { list: true, payload_length: sender.length() + nonce.length() }
        .encode(&mut out);
    sender.encode(&mut out);
    nonce.encode(&mut out);
    let hash = keccak256(&out);
    Address::from_slice(&hash[12..])
}
