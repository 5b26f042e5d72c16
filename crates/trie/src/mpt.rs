// Copyright 2024 RISC Zero, Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::{
    arena::{Ptr, TrieArena, NULL_PTR},
    nibbles::Nibbles,
    node::TrieNode,
    Error,
};

const ABSENT_KEY: Error = Error::InvariantViolation("delete of a key absent from the trie");

/// Read, insert and delete over the trie rooted at a given pointer.
///
/// All operations are copy-on-write: nodes reachable from `root` are never modified, the
/// returned pointer is the root of the updated trie and the old root stays valid.
impl TrieArena {
    /// Retrieves the value pointer stored under `key` in the trie at `root`.
    ///
    /// If [None] is returned, the key is provably not in the trie.
    pub fn get(&self, root: Ptr, key: Nibbles) -> Result<Option<Ptr>, Error> {
        match self.node(root)? {
            TrieNode::Empty => Ok(None),
            TrieNode::Hash(digest) => Err(Error::NodeNotResolved(digest)),
            TrieNode::Leaf {
                key: leaf_key,
                value,
            } => Ok((leaf_key == key).then_some(value)),
            TrieNode::Extension {
                key: ext_key,
                child,
            } => {
                if key.starts_with(&ext_key) {
                    self.get(child, key.truncate(ext_key.len()))
                } else {
                    Ok(None)
                }
            }
            TrieNode::Branch { children, value } => match key.split_first() {
                None => Ok((value != NULL_PTR).then_some(value)),
                Some((nib, rest)) => self.get(children[nib as usize], rest),
            },
        }
    }

    /// Inserts `value` under `key` into the trie at `root`, replacing any previous value,
    /// and returns the new root.
    pub fn insert(&mut self, root: Ptr, key: Nibbles, value: Ptr) -> Result<Ptr, Error> {
        if value == NULL_PTR {
            return Err(Error::InvariantViolation(
                "the null pointer cannot be stored as a value",
            ));
        }
        self.insert_internal(root, key, value)
    }

    fn insert_internal(&mut self, root: Ptr, key: Nibbles, value: Ptr) -> Result<Ptr, Error> {
        let node = match self.node(root)? {
            TrieNode::Empty => TrieNode::Leaf { key, value },
            TrieNode::Hash(digest) => return Err(Error::NodeNotResolved(digest)),
            TrieNode::Branch {
                mut children,
                value: branch_value,
            } => match key.split_first() {
                // the key ends here, so the value belongs to the branch itself
                None => TrieNode::Branch { children, value },
                Some((nib, rest)) => {
                    let slot = nib as usize;
                    children[slot] = self.insert_internal(children[slot], rest, value)?;
                    TrieNode::Branch {
                        children,
                        value: branch_value,
                    }
                }
            },
            TrieNode::Leaf {
                key: leaf_key,
                value: old_value,
            } => {
                if leaf_key == key {
                    TrieNode::Leaf { key, value }
                } else {
                    // otherwise, create a branch where both keys diverge
                    let (common, old_rest, new_rest) = leaf_key.split_common_prefix(&key);
                    let mut children = [NULL_PTR; 16];
                    let mut branch_value = NULL_PTR;
                    self.attach_leaf(&mut children, &mut branch_value, old_rest, old_value);
                    self.attach_leaf(&mut children, &mut branch_value, new_rest, value);
                    return Ok(self.append_split(common, children, branch_value));
                }
            }
            TrieNode::Extension {
                key: ext_key,
                child,
            } => {
                let (common, ext_rest, new_rest) = ext_key.split_common_prefix(&key);
                if ext_rest.is_empty() {
                    // traverse down for update
                    let child = self.insert_internal(child, new_rest, value)?;
                    TrieNode::Extension {
                        key: ext_key,
                        child,
                    }
                } else {
                    let mut children = [NULL_PTR; 16];
                    let mut branch_value = NULL_PTR;
                    let (nib, ext_tail) = ext_rest
                        .split_first()
                        .ok_or(Error::InvariantViolation("extension split without remainder"))?;
                    // the shortened extension keeps pointing at the old child
                    children[nib as usize] = if ext_tail.is_empty() {
                        child
                    } else {
                        self.append_node(&TrieNode::Extension {
                            key: ext_tail,
                            child,
                        })
                    };
                    self.attach_leaf(&mut children, &mut branch_value, new_rest, value);
                    return Ok(self.append_split(common, children, branch_value));
                }
            }
        };

        Ok(self.append_node(&node))
    }

    /// Hangs `value` below a new branch: as a leaf in the slot of the first nibble of
    /// `rest`, or as the branch value if nothing of the key remains.
    fn attach_leaf(
        &mut self,
        children: &mut [Ptr; 16],
        branch_value: &mut Ptr,
        rest: Nibbles,
        value: Ptr,
    ) {
        match rest.split_first() {
            None => *branch_value = value,
            Some((nib, tail)) => {
                children[nib as usize] = self.append_node(&TrieNode::Leaf { key: tail, value })
            }
        }
    }

    /// Appends a branch and, if both keys shared a prefix, a parent extension for it.
    fn append_split(&mut self, common: Nibbles, children: [Ptr; 16], value: Ptr) -> Ptr {
        let branch = self.append_node(&TrieNode::Branch { children, value });
        if common.is_empty() {
            branch
        } else {
            self.append_node(&TrieNode::Extension {
                key: common,
                child: branch,
            })
        }
    }

    /// Removes `key` from the trie at `root` and returns the new root.
    ///
    /// The key must be present; deleting an absent key is an invariant violation. The
    /// result is normalized: branches with a single remaining entry are collapsed and
    /// adjacent paths are fused, so the new trie is identical to one built without the key.
    pub fn delete(&mut self, root: Ptr, key: Nibbles) -> Result<Ptr, Error> {
        match self.node(root)? {
            TrieNode::Empty => Err(ABSENT_KEY),
            TrieNode::Hash(digest) => Err(Error::NodeNotResolved(digest)),
            TrieNode::Leaf { key: leaf_key, .. } => {
                if leaf_key == key {
                    Ok(NULL_PTR)
                } else {
                    Err(ABSENT_KEY)
                }
            }
            TrieNode::Extension {
                key: ext_key,
                child,
            } => {
                if !key.starts_with(&ext_key) {
                    return Err(ABSENT_KEY);
                }
                let child = self.delete(child, key.truncate(ext_key.len()))?;
                self.prepend_path(ext_key, child)
            }
            TrieNode::Branch {
                mut children,
                mut value,
            } => {
                match key.split_first() {
                    None => {
                        if value == NULL_PTR {
                            return Err(ABSENT_KEY);
                        }
                        value = NULL_PTR;
                    }
                    Some((nib, rest)) => {
                        let slot = nib as usize;
                        if children[slot] == NULL_PTR {
                            return Err(ABSENT_KEY);
                        }
                        children[slot] = self.delete(children[slot], rest)?;
                        // the branch keeps all its entries, nothing to normalize
                        if children[slot] != NULL_PTR {
                            return Ok(self.append_node(&TrieNode::Branch { children, value }));
                        }
                    }
                }
                self.normalize_branch(children, value)
            }
        }
    }

    /// Rebuilds a branch that just lost an entry.
    fn normalize_branch(&mut self, children: [Ptr; 16], value: Ptr) -> Result<Ptr, Error> {
        let live = children.iter().filter(|child| **child != NULL_PTR).count();
        if live + usize::from(value != NULL_PTR) >= 2 {
            return Ok(self.append_node(&TrieNode::Branch { children, value }));
        }

        match children.iter().position(|child| *child != NULL_PTR) {
            // exactly one child is left, the branch is replaced by a path to it
            Some(slot) => {
                let orphan = children[slot];
                if let TrieNode::Hash(digest) = self.node(orphan)? {
                    // the kind of the orphan decides the collapse, but it is unknown
                    return Err(Error::NodeNotResolved(digest));
                }
                self.prepend_path(Nibbles::single(slot as u8), orphan)
            }
            // only the value is left, which terminates an empty path
            None if value != NULL_PTR => Ok(self.append_node(&TrieNode::Leaf {
                key: Nibbles::EMPTY,
                value,
            })),
            None => Err(Error::InvariantViolation(
                "branch without children or value",
            )),
        }
    }

    /// Returns a node equivalent to `path` followed by the sub-trie at `child`.
    ///
    /// Leaves and extensions absorb the path, so no extension ever points to another
    /// extension or a leaf.
    fn prepend_path(&mut self, path: Nibbles, child: Ptr) -> Result<Ptr, Error> {
        let node = match self.node(child)? {
            TrieNode::Empty => {
                return Err(Error::InvariantViolation("extension without a child"));
            }
            TrieNode::Branch { .. } | TrieNode::Hash(_) => TrieNode::Extension { key: path, child },
            TrieNode::Extension {
                key,
                child: grandchild,
            } => TrieNode::Extension {
                key: path.merge(&key)?,
                child: grandchild,
            },
            TrieNode::Leaf { key, value } => TrieNode::Leaf {
                key: path.merge(&key)?,
                value,
            },
        };
        Ok(self.append_node(&node))
    }

    /// Retrieves the value pointer stored under the nibbles of the byte key.
    pub fn get_bytes(&self, root: Ptr, key: &[u8]) -> Result<Option<Ptr>, Error> {
        self.get(root, Nibbles::from_bytes(key)?)
    }

    /// Inserts `value` under the nibbles of the byte key.
    pub fn insert_bytes(&mut self, root: Ptr, key: &[u8], value: Ptr) -> Result<Ptr, Error> {
        self.insert(root, Nibbles::from_bytes(key)?, value)
    }

    /// Removes the nibbles of the byte key.
    pub fn delete_bytes(&mut self, root: Ptr, key: &[u8]) -> Result<Ptr, Error> {
        self.delete(root, Nibbles::from_bytes(key)?)
    }

    /// Returns all full keys with their value pointers in key order.
    pub fn entries(&self, root: Ptr) -> Result<Vec<(Nibbles, Ptr)>, Error> {
        let mut result = Vec::new();
        self.collect_entries(root, Nibbles::EMPTY, &mut result)?;
        Ok(result)
    }

    fn collect_entries(
        &self,
        ptr: Ptr,
        prefix: Nibbles,
        result: &mut Vec<(Nibbles, Ptr)>,
    ) -> Result<(), Error> {
        match self.node(ptr)? {
            TrieNode::Empty => {}
            TrieNode::Hash(digest) => return Err(Error::NodeNotResolved(digest)),
            TrieNode::Leaf { key, value } => result.push((prefix.merge(&key)?, value)),
            TrieNode::Extension { key, child } => {
                self.collect_entries(child, prefix.merge(&key)?, result)?
            }
            TrieNode::Branch { children, value } => {
                if value != NULL_PTR {
                    result.push((prefix, value));
                }
                for (nib, child) in children.iter().enumerate() {
                    if *child != NULL_PTR {
                        let path = prefix.merge(&Nibbles::single(nib as u8))?;
                        self.collect_entries(*child, path, result)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Verifies the structural invariants of the trie at `root`.
    ///
    /// Every branch has at least two entries (children or value), no extension has an
    /// empty path or an extension or leaf as its child, and, if `key_len` is given, every
    /// path from the root to a value consumes exactly `key_len` nibbles.
    pub fn validate(&self, root: Ptr, key_len: Option<usize>) -> Result<(), Error> {
        self.validate_internal(root, 0, key_len)
    }

    fn validate_internal(
        &self,
        ptr: Ptr,
        depth: usize,
        key_len: Option<usize>,
    ) -> Result<(), Error> {
        let check_len = |consumed: usize| match key_len {
            Some(len) if len != consumed => Err(Error::InvariantViolation(
                "path length differs from the key length",
            )),
            _ => Ok(()),
        };
        match self.node(ptr)? {
            TrieNode::Empty | TrieNode::Hash(_) => Ok(()),
            TrieNode::Leaf { key, .. } => check_len(depth + key.len()),
            TrieNode::Extension { key, child } => {
                if key.is_empty() {
                    return Err(Error::InvariantViolation("extension with an empty path"));
                }
                match self.node(child)? {
                    TrieNode::Branch { .. } | TrieNode::Hash(_) => {}
                    _ => {
                        return Err(Error::InvariantViolation(
                            "extension child is not a branch",
                        ))
                    }
                }
                self.validate_internal(child, depth + key.len(), key_len)
            }
            TrieNode::Branch { children, value } => {
                let live = children.iter().filter(|child| **child != NULL_PTR).count();
                if live + usize::from(value != NULL_PTR) < 2 {
                    return Err(Error::InvariantViolation("branch with fewer than two entries"));
                }
                if value != NULL_PTR {
                    check_len(depth)?;
                }
                for child in children.iter().filter(|child| **child != NULL_PTR) {
                    self.validate_internal(*child, depth + 1, key_len)?;
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use alloy_primitives::U256;

    use super::*;
    use crate::keccak::keccak;

    fn key64(last: u64) -> Nibbles {
        Nibbles::new(64, U256::from(last)).unwrap()
    }

    fn value(arena: &mut TrieArena, v: u64) -> Ptr {
        arena.append(U256::from(v))
    }

    /// Reduces a trie to its shape, with values resolved, so that tries in different
    /// arena locations can be compared.
    #[derive(Debug, PartialEq, Eq)]
    enum Shape {
        Empty,
        Branch(Vec<Shape>, Option<U256>),
        Extension(Nibbles, Box<Shape>),
        Leaf(Nibbles, U256),
    }

    fn shape(arena: &TrieArena, ptr: Ptr) -> Shape {
        match arena.node(ptr).unwrap() {
            TrieNode::Empty => Shape::Empty,
            TrieNode::Hash(_) => unreachable!(),
            TrieNode::Branch { children, value } => Shape::Branch(
                children.iter().map(|c| shape(arena, *c)).collect(),
                (value != NULL_PTR).then(|| arena.read(value).unwrap()),
            ),
            TrieNode::Extension { key, child } => {
                Shape::Extension(key, Box::new(shape(arena, child)))
            }
            TrieNode::Leaf { key, value } => Shape::Leaf(key, arena.read(value).unwrap()),
        }
    }

    #[test]
    fn insert_into_empty() {
        let mut arena = TrieArena::new();
        let v = value(&mut arena, 0xa);
        let root = arena.insert(NULL_PTR, key64(1), v).unwrap();
        assert_eq!(
            arena.node(root).unwrap(),
            TrieNode::Leaf {
                key: key64(1),
                value: v
            }
        );
        assert_eq!(arena.get(root, key64(1)).unwrap(), Some(v));
        assert_eq!(arena.get(root, key64(2)).unwrap(), None);
        assert_eq!(arena.get(NULL_PTR, key64(1)).unwrap(), None);
    }

    #[test]
    fn diverging_last_nibble() {
        let mut arena = TrieArena::new();
        let a = value(&mut arena, 0xa);
        let b = value(&mut arena, 0xb);
        let root = arena.insert(NULL_PTR, key64(1), a).unwrap();
        let root = arena.insert(root, key64(2), b).unwrap();

        let TrieNode::Extension { key, child } = arena.node(root).unwrap() else {
            panic!("extension expected")
        };
        assert_eq!(key, Nibbles::new(63, U256::ZERO).unwrap());
        let TrieNode::Branch { children, value } = arena.node(child).unwrap() else {
            panic!("branch expected")
        };
        assert_eq!(value, NULL_PTR);
        assert_eq!(
            arena.node(children[1]).unwrap(),
            TrieNode::Leaf {
                key: Nibbles::EMPTY,
                value: a
            }
        );
        assert_eq!(
            arena.node(children[2]).unwrap(),
            TrieNode::Leaf {
                key: Nibbles::EMPTY,
                value: b
            }
        );
        assert_eq!(children.iter().filter(|c| **c != NULL_PTR).count(), 2);
        arena.validate(root, Some(64)).unwrap();

        // deleting one of them collapses everything back into a single leaf
        let root = arena.delete(root, key64(1)).unwrap();
        assert_eq!(
            arena.node(root).unwrap(),
            TrieNode::Leaf {
                key: key64(2),
                value: b
            }
        );
        assert_eq!(arena.get(root, key64(1)).unwrap(), None);
        assert_eq!(arena.get(root, key64(2)).unwrap(), Some(b));
    }

    #[test]
    fn old_roots_stay_valid() {
        let mut arena = TrieArena::new();
        let a = value(&mut arena, 0xa);
        let b = value(&mut arena, 0xb);
        let root1 = arena.insert(NULL_PTR, key64(1), a).unwrap();
        let root2 = arena.insert(root1, key64(1), b).unwrap();
        assert_ne!(root1, root2);
        assert_eq!(arena.get(root1, key64(1)).unwrap(), Some(a));
        assert_eq!(arena.get(root2, key64(1)).unwrap(), Some(b));
    }

    #[test]
    fn delete_restores_shape() {
        let mut arena = TrieArena::new();
        let mut root = NULL_PTR;
        for i in 0..64u64 {
            let key = Nibbles::from_bytes(&keccak(i.to_be_bytes())).unwrap();
            let v = value(&mut arena, i + 1);
            root = arena.insert(root, key, v).unwrap();
        }
        let before = shape(&arena, root);

        for i in 100..132u64 {
            let key = Nibbles::from_bytes(&keccak(i.to_be_bytes())).unwrap();
            let v = value(&mut arena, i);
            let inserted = arena.insert(root, key, v).unwrap();
            arena.validate(inserted, Some(64)).unwrap();
            let deleted = arena.delete(inserted, key).unwrap();
            arena.validate(deleted, Some(64)).unwrap();
            assert_eq!(arena.get(deleted, key).unwrap(), None);
            assert_eq!(shape(&arena, deleted), before);
        }
    }

    #[test]
    fn delete_absent_key() {
        let mut arena = TrieArena::new();
        let v = value(&mut arena, 1);
        arena.delete(NULL_PTR, key64(1)).unwrap_err();
        let root = arena.insert(NULL_PTR, key64(1), v).unwrap();
        arena.delete(root, key64(2)).unwrap_err();
        let root = arena.insert(root, key64(0x10), v).unwrap();
        arena.delete(root, key64(0x20)).unwrap_err();
        arena.delete(root, key64(0x12)).unwrap_err();
        // the failed deletions left the trie untouched
        assert_eq!(arena.get(root, key64(1)).unwrap(), Some(v));
    }

    #[test]
    fn null_value_rejected() {
        let mut arena = TrieArena::new();
        arena.insert(NULL_PTR, key64(1), NULL_PTR).unwrap_err();
    }

    #[test]
    fn branch_values() {
        let mut arena = TrieArena::new();
        let short = Nibbles::new(2, U256::from(0xab)).unwrap();
        let long = Nibbles::new(4, U256::from(0xabcd)).unwrap();
        let other = Nibbles::new(4, U256::from(0xabef)).unwrap();
        let v1 = value(&mut arena, 1);
        let v2 = value(&mut arena, 2);
        let v3 = value(&mut arena, 3);

        let root = arena.insert(NULL_PTR, long, v2).unwrap();
        let root = arena.insert(root, short, v1).unwrap();
        // extension "ab" -> branch{value: v1, c: leaf "d"}
        let TrieNode::Extension { child, .. } = arena.node(root).unwrap() else {
            panic!("extension expected")
        };
        assert!(matches!(
            arena.node(child).unwrap(),
            TrieNode::Branch { value, .. } if value == v1
        ));
        arena.validate(root, None).unwrap();

        let root = arena.insert(root, other, v3).unwrap();
        assert_eq!(arena.get(root, short).unwrap(), Some(v1));
        assert_eq!(arena.get(root, long).unwrap(), Some(v2));
        assert_eq!(arena.get(root, other).unwrap(), Some(v3));
        assert_eq!(arena.get(root, short.prefix(1)).unwrap(), None);

        // removing the branch value keeps a proper branch
        let root = arena.delete(root, short).unwrap();
        arena.validate(root, None).unwrap();
        assert_eq!(arena.get(root, short).unwrap(), None);
        assert_eq!(arena.get(root, other).unwrap(), Some(v3));

        // removing a child of a branch with a value leaves a leaf with the full key
        let root = arena.insert(NULL_PTR, long, v2).unwrap();
        let root = arena.insert(root, short, v1).unwrap();
        let root = arena.delete(root, long).unwrap();
        assert_eq!(
            arena.node(root).unwrap(),
            TrieNode::Leaf {
                key: short,
                value: v1
            }
        );
    }

    #[test]
    fn split_extension() {
        let mut arena = TrieArena::new();
        let keys = [0x1234u64, 0x1235, 0x1300, 0x2000];
        let mut root = NULL_PTR;
        for (i, k) in keys.iter().enumerate() {
            let v = value(&mut arena, i as u64 + 1);
            root = arena
                .insert(root, Nibbles::new(4, U256::from(*k)).unwrap(), v)
                .unwrap();
            arena.validate(root, Some(4)).unwrap();
        }
        let entries = arena.entries(root).unwrap();
        let found: Vec<u64> = entries.iter().map(|(k, _)| k.packed().to()).collect();
        assert_eq!(found, keys.to_vec());

        // removing everything but the first key returns a single leaf
        for k in &keys[1..] {
            root = arena
                .delete(root, Nibbles::new(4, U256::from(*k)).unwrap())
                .unwrap();
            arena.validate(root, Some(4)).unwrap();
        }
        assert!(matches!(arena.node(root).unwrap(), TrieNode::Leaf { .. }));
    }

    #[test]
    fn unresolved() {
        let mut arena = TrieArena::new();
        let digest = alloy_primitives::B256::repeat_byte(0x11);
        let hash = arena.append_node(&TrieNode::Hash(digest));
        let v = value(&mut arena, 1);
        let mut children = [NULL_PTR; 16];
        children[0] = hash;
        children[1] = arena.append_node(&TrieNode::Leaf {
            key: Nibbles::EMPTY,
            value: v,
        });
        let root = arena.append_node(&TrieNode::Branch {
            children,
            value: NULL_PTR,
        });

        // the resolved part can be used as usual
        assert_eq!(arena.get(root, Nibbles::single(1)).unwrap(), Some(v));
        assert!(matches!(
            arena.get(root, Nibbles::single(0)),
            Err(Error::NodeNotResolved(d)) if d == digest
        ));
        // removing the leaf would have to collapse onto the digest
        assert!(matches!(
            arena.delete(root, Nibbles::single(1)),
            Err(Error::NodeNotResolved(_))
        ));
    }

    #[test]
    fn byte_keys() {
        let mut arena = TrieArena::new();
        let v = arena.append_bytes(b"puppy");
        let root = arena.insert_bytes(NULL_PTR, b"dog", v).unwrap();
        assert_eq!(arena.get_bytes(root, b"dog").unwrap(), Some(v));
        assert_eq!(arena.get_bytes(root, b"do").unwrap(), None);
        let root = arena.delete_bytes(root, b"dog").unwrap();
        assert_eq!(root, NULL_PTR);
    }
}
