//! Signature recovery over secp256k1.
//!
//! The curve is consumed as an oracle: sign a 32-byte prehash, get back
//! `(r, s, recovery id)`; recover the signer's address from the same triple.

use alloy_primitives::{keccak256, Address, B256, U256};
use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};

/// Derives the address of a public key: the low 160 bits of the Keccak-256
/// hash of the uncompressed point, tag byte stripped.
pub fn public_to_address(key: &VerifyingKey) -> Address {
    let encoded = key.to_encoded_point(false);
    let hash = keccak256(&encoded.as_bytes()[1..]);
    Address::from_slice(&hash[12..])
}

/// The address belonging to a secret key.
pub fn address_of(key: &SigningKey) -> Address {
    public_to_address(key.verifying_key())
}

/// Signs a prehash, returning `(r, s, recovery_id)`.
pub fn sign_hash(prehash: &B256, key: &SigningKey) -> Option<(U256, U256, u8)> {
    let (signature, recovery_id) = key.sign_prehash_recoverable(prehash.as_slice()).ok()?;
    let bytes = signature.to_bytes();
    let r = U256::from_be_slice(&bytes[..32]);
    let s = U256::from_be_slice(&bytes[32..]);
    Some((r, s, recovery_id.to_byte()))
}

/// Recovers the signer's address from a prehash and `(r, s, recovery_id)`.
/// Returns `None` when the signature does not resolve to a valid key.
pub fn recover_address(prehash: &B256, r: U256, s: U256, recovery_id: u8) -> Option<Address> {
    let mut bytes = [0u8; 64];
    bytes[..32].copy_from_slice(B256::from(r).as_slice());
    bytes[32..].copy_from_slice(B256::from(s).as_slice());
    let signature = Signature::from_slice(&bytes).ok()?;
    let recovery_id = RecoveryId::from_byte(recovery_id)?;
    let key = VerifyingKey::recover_from_prehash(prehash.as_slice(), &signature, recovery_id).ok()?;
    Some(public_to_address(&key))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> SigningKey {
        SigningKey::from_slice(&[0x11; 32]).expect("static test key")
    }

    #[test]
    fn test_sign_and_recover() {
        let key = test_key();
        let prehash = keccak256(b"message");
        let (r, s, v) = sign_hash(&prehash, &key).expect("sign");
        let recovered = recover_address(&prehash, r, s, v).expect("recover");
        assert_eq!(recovered, address_of(&key));
    }

    #[test]
    fn test_recover_rejects_garbage() {
        let prehash = keccak256(b"message");
        assert_eq!(recover_address(&prehash, U256::ZERO, U256::ZERO, 0), None);
    }

    #[test]
    fn test_wrong_recovery_id_changes_address() {
        let key = test_key();
        let prehash = keccak256(b"message");
        let (r, s, v) = sign_hash(&prehash, &key).expect("sign");
        let flipped = recover_address(&prehash, r, s, v ^ 1);
        assert_ne!(flipped, Some(address_of(&key)));
    }
}
