//! Trie node variants and their canonical RLP codec.

use alloy_primitives::B256;

use crate::nibbles::{hex_prefix_decode, hex_prefix_encode};
use crate::rlp_raw::{count_values, put_list_header, put_str, split_list, split_string, str_len};
use crate::TrieError;

/// A node of the Merkle-Patricia trie.
///
/// Nodes are content-addressed: each one is persisted under the Keccak-256
/// hash of its encoding and children are referenced by hash. The encoding is
/// canonical, so structurally equal tries always share a root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    /// The empty trie, encoded as the empty string
    Empty,
    /// Terminal node carrying the remainder of a key path and its value
    Leaf {
        /// Remaining nibble path
        path: Vec<u8>,
        /// Stored value
        value: Vec<u8>,
    },
    /// Shared path segment pointing at a single branch below it
    Extension {
        /// Shared nibble path, never empty
        path: Vec<u8>,
        /// Hash of the child node
        child: B256,
    },
    /// Sixteen-way fan-out with an optional value for keys ending here
    Branch {
        /// Child hash per next nibble
        children: [Option<B256>; 16],
        /// Value for a key terminating at this node
        value: Option<Vec<u8>>,
    },
}

impl Node {
    /// Encodes the node into its canonical RLP form.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Node::Empty => vec![alloy_rlp::EMPTY_STRING_CODE],
            Node::Leaf { path, value } => {
                let hp = hex_prefix_encode(path, true);
                let payload = str_len(&hp) + str_len(value);
                let mut out = Vec::with_capacity(payload + 4);
                put_list_header(&mut out, payload);
                put_str(&mut out, &hp);
                put_str(&mut out, value);
                out
            }
            Node::Extension { path, child } => {
                let hp = hex_prefix_encode(path, false);
                let payload = str_len(&hp) + str_len(child.as_slice());
                let mut out = Vec::with_capacity(payload + 4);
                put_list_header(&mut out, payload);
                put_str(&mut out, &hp);
                put_str(&mut out, child.as_slice());
                out
            }
            Node::Branch { children, value } => {
                let mut payload = 0;
                for child in children {
                    payload += match child {
                        Some(h) => str_len(h.as_slice()),
                        None => 1,
                    };
                }
                payload += match value {
                    Some(v) => str_len(v),
                    None => 1,
                };
                let mut out = Vec::with_capacity(payload + 4);
                put_list_header(&mut out, payload);
                for child in children {
                    match child {
                        Some(h) => put_str(&mut out, h.as_slice()),
                        None => put_str(&mut out, &[]),
                    }
                }
                match value {
                    Some(v) => put_str(&mut out, v),
                    None => put_str(&mut out, &[]),
                }
                out
            }
        }
    }

    /// Decodes a node from its canonical RLP form.
    pub fn decode(buf: &[u8]) -> Result<Self, TrieError> {
        if buf == [alloy_rlp::EMPTY_STRING_CODE] {
            return Ok(Node::Empty);
        }
        let (content, rest) = split_list(buf)?;
        if !rest.is_empty() {
            return Err(TrieError::InvalidTrie("trailing bytes after node"));
        }
        match count_values(content)? {
            2 => {
                let (hp, rest) = split_string(content)?;
                let (path, leaf) = hex_prefix_decode(hp)?;
                let (payload, rest) = split_string(rest)?;
                debug_assert!(rest.is_empty());
                if leaf {
                    Ok(Node::Leaf { path, value: payload.to_vec() })
                } else {
                    if path.is_empty() {
                        return Err(TrieError::InvalidTrie("extension with empty path"));
                    }
                    if payload.len() != 32 {
                        return Err(TrieError::InvalidTrie("extension child is not a hash"));
                    }
                    Ok(Node::Extension { path, child: B256::from_slice(payload) })
                }
            }
            17 => {
                let mut children: [Option<B256>; 16] = Default::default();
                let mut rest = content;
                for slot in children.iter_mut() {
                    let (payload, r) = split_string(rest)?;
                    rest = r;
                    *slot = match payload.len() {
                        0 => None,
                        32 => Some(B256::from_slice(payload)),
                        _ => return Err(TrieError::InvalidTrie("branch child is not a hash")),
                    };
                }
                let (payload, rest) = split_string(rest)?;
                debug_assert!(rest.is_empty());
                let value = (!payload.is_empty()).then(|| payload.to_vec());
                Ok(Node::Branch { children, value })
            }
            _ => Err(TrieError::InvalidTrie("bad node arity")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::keccak256;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_empty_node_round_trip() {
        let node = Node::Empty;
        let encoded = node.encode();
        assert_eq!(encoded, vec![0x80]);
        assert_eq!(Node::decode(&encoded).unwrap(), node);
    }

    #[test]
    fn test_leaf_round_trip() {
        let node = Node::Leaf { path: vec![1, 2, 3], value: b"value".to_vec() };
        assert_eq!(Node::decode(&node.encode()).unwrap(), node);
    }

    #[test]
    fn test_extension_round_trip() {
        let node = Node::Extension { path: vec![0xa, 0xb], child: keccak256(b"child") };
        assert_eq!(Node::decode(&node.encode()).unwrap(), node);
    }

    #[test]
    fn test_branch_round_trip() {
        let mut children: [Option<B256>; 16] = Default::default();
        children[3] = Some(keccak256(b"three"));
        children[0xf] = Some(keccak256(b"fifteen"));
        let node = Node::Branch { children, value: Some(b"here".to_vec()) };
        assert_eq!(Node::decode(&node.encode()).unwrap(), node);

        let node = Node::Branch { children, value: None };
        assert_eq!(Node::decode(&node.encode()).unwrap(), node);
    }

    #[test]
    fn test_extension_must_carry_hash() {
        // A two-item list whose second item is not 32 bytes and whose prefix
        // flags an extension must be rejected.
        let mut out = Vec::new();
        crate::rlp_raw::put_list_header(&mut out, 3);
        crate::rlp_raw::put_str(&mut out, &[0x00]); // even extension, empty path
        crate::rlp_raw::put_str(&mut out, b"x");
        assert!(Node::decode(&out).is_err());
    }
}
