//! Merkle-Patricia trie over the overlay database.

use std::collections::HashSet;
use std::fmt::Debug;

use alloy_primitives::{keccak256, B256};

use rust_eth_ledger_common::KeyValueDB;

use crate::nibbles::{from_nibbles, shared_prefix_len, to_nibbles};
use crate::node::Node;
use crate::overlaydb::OverlayDB;
use crate::{TrieError, EMPTY_ROOT_HASH};

/// An authenticated ordered map whose root hash commits to its contents.
///
/// The trie owns nothing but its root hash; every operation takes the
/// overlay database it runs against. Mutations rewrite the path from the
/// touched leaf back to the root: each rewritten node is inserted into the
/// overlay under its new hash and each displaced node is killed. Two tries
/// with equal key sets always share a root, and no two distinct key sets
/// produce the same root (collision resistance of the hash assumed).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trie {
    root: B256,
}

impl Default for Trie {
    fn default() -> Self {
        Self { root: EMPTY_ROOT_HASH }
    }
}

impl Trie {
    /// Creates a handle on the empty trie.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a handle on the trie rooted at `root`.
    pub fn from_root(root: B256) -> Self {
        Self { root }
    }

    /// The current root hash.
    pub fn root(&self) -> B256 {
        self.root
    }

    /// Retargets the handle at a different root.
    pub fn set_root(&mut self, root: B256) {
        self.root = root;
    }

    /// Whether the trie holds no keys.
    pub fn is_empty(&self) -> bool {
        self.root == EMPTY_ROOT_HASH
    }

    /// Resets to the empty trie and seeds its node into the overlay.
    pub fn init<B>(&mut self, db: &mut OverlayDB<B>)
    where
        B: KeyValueDB,
        B::Error: Debug,
    {
        self.root = EMPTY_ROOT_HASH;
        db.insert(EMPTY_ROOT_HASH, Node::Empty.encode());
    }

    /// Point lookup; `None` if the key is absent.
    pub fn at<B>(&self, db: &OverlayDB<B>, key: &[u8]) -> Result<Option<Vec<u8>>, TrieError>
    where
        B: KeyValueDB,
        B::Error: Debug,
    {
        if self.is_empty() {
            return Ok(None);
        }
        let nib = to_nibbles(key);
        let mut path: &[u8] = &nib;
        let mut hash = self.root;
        loop {
            match Self::load_node(db, &hash)? {
                Node::Empty => return Ok(None),
                Node::Leaf { path: lp, value } => {
                    return Ok((lp == path).then_some(value));
                }
                Node::Extension { path: xp, child } => {
                    if path.len() >= xp.len() && path[..xp.len()] == xp[..] {
                        path = &path[xp.len()..];
                        hash = child;
                    } else {
                        return Ok(None);
                    }
                }
                Node::Branch { children, value } => {
                    if path.is_empty() {
                        return Ok(value);
                    }
                    match children[path[0] as usize] {
                        Some(child) => {
                            hash = child;
                            path = &path[1..];
                        }
                        None => return Ok(None),
                    }
                }
            }
        }
    }

    /// Inserts `value` under `key`, rewriting the path to the root.
    pub fn insert<B>(
        &mut self,
        db: &mut OverlayDB<B>,
        key: &[u8],
        value: Vec<u8>,
    ) -> Result<(), TrieError>
    where
        B: KeyValueDB,
        B::Error: Debug,
    {
        let nib = to_nibbles(key);
        let new_root = if self.is_empty() {
            db.kill(&EMPTY_ROOT_HASH);
            Self::write_node(db, &Node::Leaf { path: nib, value })
        } else {
            Self::insert_at(db, self.root, &nib, value)?
        };
        self.root = new_root;
        Ok(())
    }

    /// Removes `key`, collapsing extension/leaf chains to keep the
    /// representation canonical. Absent keys leave the trie untouched.
    pub fn remove<B>(&mut self, db: &mut OverlayDB<B>, key: &[u8]) -> Result<(), TrieError>
    where
        B: KeyValueDB,
        B::Error: Debug,
    {
        if self.is_empty() {
            return Ok(());
        }
        let nib = to_nibbles(key);
        match Self::remove_at(db, self.root, &nib)? {
            None => {}
            Some(Node::Empty) => {
                self.root = EMPTY_ROOT_HASH;
                db.insert(EMPTY_ROOT_HASH, Node::Empty.encode());
            }
            Some(node) => self.root = Self::write_node(db, &node),
        }
        Ok(())
    }

    /// Iterates `(key, value)` pairs in lexicographic key order.
    pub fn iter<'a, B>(&self, db: &'a OverlayDB<B>) -> Result<TrieIter<'a, B>, TrieError>
    where
        B: KeyValueDB,
        B::Error: Debug,
    {
        let mut stack = Vec::new();
        if !self.is_empty() {
            let node = Self::load_node(db, &self.root)?;
            stack.push(IterFrame { node, prefix: Vec::new(), pos: 0 });
        }
        Ok(TrieIter { db, stack })
    }

    /// Overlay keys the trie no longer references. Debug-only census used by
    /// the paranoia checks; dead entries never reach the backend anyway.
    pub fn left_overs<B>(&self, db: &OverlayDB<B>) -> Result<Vec<B256>, TrieError>
    where
        B: KeyValueDB,
        B::Error: Debug,
    {
        let mut reachable = HashSet::new();
        if !self.is_empty() {
            self.walk_hashes(db, self.root, &mut reachable)?;
        }
        reachable.insert(EMPTY_ROOT_HASH);
        let mut left: Vec<B256> = db
            .keys()
            .into_iter()
            .filter(|(key, refs)| *refs > 0 && !reachable.contains(key))
            .map(|(key, _)| key)
            .collect();
        left.sort();
        Ok(left)
    }

    fn walk_hashes<B>(
        &self,
        db: &OverlayDB<B>,
        hash: B256,
        out: &mut HashSet<B256>,
    ) -> Result<(), TrieError>
    where
        B: KeyValueDB,
        B::Error: Debug,
    {
        if !out.insert(hash) {
            return Ok(());
        }
        match Self::load_node(db, &hash)? {
            Node::Empty | Node::Leaf { .. } => {}
            Node::Extension { child, .. } => self.walk_hashes(db, child, out)?,
            Node::Branch { children, .. } => {
                for child in children.into_iter().flatten() {
                    self.walk_hashes(db, child, out)?;
                }
            }
        }
        Ok(())
    }

    fn load_node<B>(db: &OverlayDB<B>, hash: &B256) -> Result<Node, TrieError>
    where
        B: KeyValueDB,
        B::Error: Debug,
    {
        if *hash == EMPTY_ROOT_HASH {
            return Ok(Node::Empty);
        }
        let bytes = db.lookup(hash)?.ok_or(TrieError::CorruptState(*hash))?;
        Node::decode(&bytes)
    }

    fn write_node<B>(db: &mut OverlayDB<B>, node: &Node) -> B256
    where
        B: KeyValueDB,
        B::Error: Debug,
    {
        let bytes = node.encode();
        let hash = keccak256(&bytes);
        db.insert(hash, bytes);
        hash
    }

    fn insert_at<B>(
        db: &mut OverlayDB<B>,
        hash: B256,
        path: &[u8],
        value: Vec<u8>,
    ) -> Result<B256, TrieError>
    where
        B: KeyValueDB,
        B::Error: Debug,
    {
        let node = Self::load_node(db, &hash)?;
        db.kill(&hash);
        match node {
            Node::Empty => Ok(Self::write_node(db, &Node::Leaf { path: path.to_vec(), value })),
            Node::Leaf { path: lp, value: lv } => {
                if lp == path {
                    return Ok(Self::write_node(db, &Node::Leaf { path: lp, value }));
                }
                let common = shared_prefix_len(&lp, path);
                let branch = Self::branch_two(db, &lp[common..], lv, &path[common..], value);
                if common > 0 {
                    Ok(Self::write_node(
                        db,
                        &Node::Extension { path: path[..common].to_vec(), child: branch },
                    ))
                } else {
                    Ok(branch)
                }
            }
            Node::Extension { path: xp, child } => {
                if path.len() >= xp.len() && path[..xp.len()] == xp[..] {
                    let new_child = Self::insert_at(db, child, &path[xp.len()..], value)?;
                    return Ok(Self::write_node(db, &Node::Extension { path: xp, child: new_child }));
                }
                let common = shared_prefix_len(&xp, path);
                let mut children: [Option<B256>; 16] = Default::default();
                let mut branch_value = None;

                // Existing side: the extension remainder below the fork.
                let ex_rest = &xp[common..];
                let ex_hash = if ex_rest.len() == 1 {
                    child
                } else {
                    Self::write_node(
                        db,
                        &Node::Extension { path: ex_rest[1..].to_vec(), child },
                    )
                };
                children[ex_rest[0] as usize] = Some(ex_hash);

                // New side: the inserted key remainder.
                let new_rest = &path[common..];
                if new_rest.is_empty() {
                    branch_value = Some(value);
                } else {
                    children[new_rest[0] as usize] = Some(Self::write_node(
                        db,
                        &Node::Leaf { path: new_rest[1..].to_vec(), value },
                    ));
                }

                let branch =
                    Self::write_node(db, &Node::Branch { children, value: branch_value });
                if common > 0 {
                    Ok(Self::write_node(
                        db,
                        &Node::Extension { path: xp[..common].to_vec(), child: branch },
                    ))
                } else {
                    Ok(branch)
                }
            }
            Node::Branch { mut children, value: branch_value } => {
                if path.is_empty() {
                    return Ok(Self::write_node(db, &Node::Branch { children, value: Some(value) }));
                }
                let slot = path[0] as usize;
                let new_child = match children[slot] {
                    Some(child) => Self::insert_at(db, child, &path[1..], value)?,
                    None => Self::write_node(db, &Node::Leaf { path: path[1..].to_vec(), value }),
                };
                children[slot] = Some(new_child);
                Ok(Self::write_node(db, &Node::Branch { children, value: branch_value }))
            }
        }
    }

    /// Builds the branch holding two diverging key remainders.
    fn branch_two<B>(
        db: &mut OverlayDB<B>,
        a_path: &[u8],
        a_value: Vec<u8>,
        b_path: &[u8],
        b_value: Vec<u8>,
    ) -> B256
    where
        B: KeyValueDB,
        B::Error: Debug,
    {
        let mut children: [Option<B256>; 16] = Default::default();
        let mut value = None;
        for (path, val) in [(a_path, a_value), (b_path, b_value)] {
            if path.is_empty() {
                value = Some(val);
            } else {
                children[path[0] as usize] =
                    Some(Self::write_node(db, &Node::Leaf { path: path[1..].to_vec(), value: val }));
            }
        }
        Self::write_node(db, &Node::Branch { children, value })
    }

    /// Removes `path` below the node at `hash`.
    ///
    /// Returns `None` when the key was absent (nothing rewritten), otherwise
    /// the replacement subtree in node form so the caller can merge paths
    /// before writing.
    fn remove_at<B>(
        db: &mut OverlayDB<B>,
        hash: B256,
        path: &[u8],
    ) -> Result<Option<Node>, TrieError>
    where
        B: KeyValueDB,
        B::Error: Debug,
    {
        let node = Self::load_node(db, &hash)?;
        match node {
            Node::Empty => Ok(None),
            Node::Leaf { path: lp, .. } => {
                if lp == path {
                    db.kill(&hash);
                    Ok(Some(Node::Empty))
                } else {
                    Ok(None)
                }
            }
            Node::Extension { path: xp, child } => {
                if !(path.len() >= xp.len() && path[..xp.len()] == xp[..]) {
                    return Ok(None);
                }
                match Self::remove_at(db, child, &path[xp.len()..])? {
                    None => Ok(None),
                    Some(new_child) => {
                        db.kill(&hash);
                        Ok(Some(match new_child {
                            Node::Empty => Node::Empty,
                            Node::Leaf { path: p, value } => {
                                Node::Leaf { path: concat_paths(&xp, &p), value }
                            }
                            Node::Extension { path: p, child } => {
                                Node::Extension { path: concat_paths(&xp, &p), child }
                            }
                            branch @ Node::Branch { .. } => {
                                let child = Self::write_node(db, &branch);
                                Node::Extension { path: xp, child }
                            }
                        }))
                    }
                }
            }
            Node::Branch { children, value } => {
                if path.is_empty() {
                    if value.is_none() {
                        return Ok(None);
                    }
                    db.kill(&hash);
                    return Ok(Some(Self::collapse_branch(db, children, None)?));
                }
                let slot = path[0] as usize;
                let Some(child) = children[slot] else { return Ok(None) };
                match Self::remove_at(db, child, &path[1..])? {
                    None => Ok(None),
                    Some(new_child) => {
                        db.kill(&hash);
                        let mut children = children;
                        children[slot] = match new_child {
                            Node::Empty => None,
                            node => Some(Self::write_node(db, &node)),
                        };
                        Ok(Some(Self::collapse_branch(db, children, value)?))
                    }
                }
            }
        }
    }

    /// Canonicalizes a branch after a removal underneath it.
    fn collapse_branch<B>(
        db: &mut OverlayDB<B>,
        children: [Option<B256>; 16],
        value: Option<Vec<u8>>,
    ) -> Result<Node, TrieError>
    where
        B: KeyValueDB,
        B::Error: Debug,
    {
        let mut occupied = children
            .iter()
            .copied()
            .enumerate()
            .filter_map(|(slot, child)| child.map(|hash| (slot, hash)));
        let first = occupied.next();
        let multiple = occupied.next().is_some();
        match first {
            None => Ok(match value {
                Some(value) => Node::Leaf { path: Vec::new(), value },
                None => Node::Empty,
            }),
            Some((slot, child_hash)) if !multiple && value.is_none() => {
                let nibble = slot as u8;
                match Self::load_node(db, &child_hash)? {
                    Node::Leaf { path, value } => {
                        db.kill(&child_hash);
                        Ok(Node::Leaf { path: concat_paths(&[nibble], &path), value })
                    }
                    Node::Extension { path, child } => {
                        db.kill(&child_hash);
                        Ok(Node::Extension { path: concat_paths(&[nibble], &path), child })
                    }
                    Node::Branch { .. } => {
                        Ok(Node::Extension { path: vec![nibble], child: child_hash })
                    }
                    Node::Empty => Err(TrieError::InvalidTrie("empty node under branch")),
                }
            }
            _ => Ok(Node::Branch { children, value }),
        }
    }
}

fn concat_paths(a: &[u8], b: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(a.len() + b.len());
    out.extend_from_slice(a);
    out.extend_from_slice(b);
    out
}

struct IterFrame {
    node: Node,
    prefix: Vec<u8>,
    /// Progress within the node: for a branch, 0 means the value is pending
    /// and `1 + i` means child `i` is pending; leaves and extensions use 0/1.
    pos: usize,
}

/// Depth-first in-order walk yielding `(key, value)` pairs.
pub struct TrieIter<'a, B> {
    db: &'a OverlayDB<B>,
    stack: Vec<IterFrame>,
}

enum IterStep {
    Pop,
    Yield(Result<(Vec<u8>, Vec<u8>), TrieError>),
    Descend(B256, Vec<u8>),
}

impl<'a, B> Iterator for TrieIter<'a, B>
where
    B: KeyValueDB,
    B::Error: Debug,
{
    type Item = Result<(Vec<u8>, Vec<u8>), TrieError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let step = {
                let frame = self.stack.last_mut()?;
                match &frame.node {
                    Node::Empty => IterStep::Pop,
                    Node::Leaf { path, value } => {
                        if frame.pos == 0 {
                            frame.pos = 1;
                            let nibbles = concat_paths(&frame.prefix, path);
                            let value = value.clone();
                            IterStep::Yield(from_nibbles(&nibbles).map(|key| (key, value)))
                        } else {
                            IterStep::Pop
                        }
                    }
                    Node::Extension { path, child } => {
                        if frame.pos == 0 {
                            frame.pos = 1;
                            IterStep::Descend(*child, concat_paths(&frame.prefix, path))
                        } else {
                            IterStep::Pop
                        }
                    }
                    Node::Branch { children, value } => {
                        if frame.pos == 0 {
                            // The branch value sorts before every child: it
                            // terminates a strictly shorter key.
                            frame.pos = 1;
                            match value.clone() {
                                Some(value) => {
                                    let nibbles = frame.prefix.clone();
                                    IterStep::Yield(
                                        from_nibbles(&nibbles).map(|key| (key, value)),
                                    )
                                }
                                None => continue,
                            }
                        } else if frame.pos <= 16 {
                            let slot = frame.pos - 1;
                            frame.pos += 1;
                            match children[slot] {
                                Some(child) => IterStep::Descend(
                                    child,
                                    concat_paths(&frame.prefix, &[slot as u8]),
                                ),
                                None => continue,
                            }
                        } else {
                            IterStep::Pop
                        }
                    }
                }
            };
            match step {
                IterStep::Pop => {
                    self.stack.pop();
                }
                IterStep::Yield(item) => return Some(item),
                IterStep::Descend(hash, prefix) => match Trie::load_node(self.db, &hash) {
                    Ok(node) => self.stack.push(IterFrame { node, prefix, pos: 0 }),
                    Err(e) => return Some(Err(e)),
                },
            }
        }
    }
}
