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

use alloy_primitives::{B256, U256};
use serde::{Deserialize, Serialize};

use crate::{
    arena::{b256_to_word, word_to_b256, Ptr, TrieArena, NULL_PTR},
    nibbles::Nibbles,
    Error,
};

/// The tag word that starts every node record in the arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum NodeTag {
    Empty = 0,
    Hash = 1,
    Branch = 2,
    Extension = 3,
    Leaf = 4,
}

impl TryFrom<U256> for NodeTag {
    type Error = U256;

    fn try_from(word: U256) -> Result<Self, Self::Error> {
        match u8::try_from(word) {
            Ok(0) => Ok(NodeTag::Empty),
            Ok(1) => Ok(NodeTag::Hash),
            Ok(2) => Ok(NodeTag::Branch),
            Ok(3) => Ok(NodeTag::Extension),
            Ok(4) => Ok(NodeTag::Leaf),
            _ => Err(word),
        }
    }
}

/// Represents the various types of nodes of a Merkle Patricia Trie as they are stored
/// in a [TrieArena].
///
/// Child and value fields are arena pointers where [NULL_PTR] stands for "absent". The
/// words a node occupies are `[tag, payload...]`:
///
/// | node      | payload                          |
/// |-----------|----------------------------------|
/// | Empty     | -                                |
/// | Hash      | `digest`                         |
/// | Branch    | `child_0 .. child_15, value`     |
/// | Extension | `key_len, key_packed, child`     |
/// | Leaf      | `key_len, key_packed, value`     |
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrieNode {
    /// Represents an empty trie node.
    #[default]
    Empty,
    /// Represents a sub-trie by its hash. Its content is not part of the arena.
    Hash(B256),
    /// A node with up to 16 children and an optional value for a key ending here.
    Branch { children: [Ptr; 16], value: Ptr },
    /// A node with exactly one child, used to represent a shared prefix of several keys.
    Extension { key: Nibbles, child: Ptr },
    /// A node holding the remainder of a key and a pointer to its value payload.
    Leaf { key: Nibbles, value: Ptr },
}

impl TrieNode {
    pub fn tag(&self) -> NodeTag {
        match self {
            TrieNode::Empty => NodeTag::Empty,
            TrieNode::Hash(_) => NodeTag::Hash,
            TrieNode::Branch { .. } => NodeTag::Branch,
            TrieNode::Extension { .. } => NodeTag::Extension,
            TrieNode::Leaf { .. } => NodeTag::Leaf,
        }
    }

    /// Returns the path a leaf or extension consumes. Other nodes consume no path.
    pub fn key(&self) -> Nibbles {
        match self {
            TrieNode::Extension { key, .. } | TrieNode::Leaf { key, .. } => *key,
            _ => Nibbles::EMPTY,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, TrieNode::Empty)
    }

    /// Returns the arena record of the node.
    pub fn to_words(&self) -> Vec<U256> {
        let tag = U256::from(self.tag() as u8);
        match self {
            TrieNode::Empty => vec![tag],
            TrieNode::Hash(digest) => vec![tag, b256_to_word(*digest)],
            TrieNode::Branch { children, value } => std::iter::once(tag)
                .chain(children.iter().map(|child| U256::from(*child)))
                .chain(std::iter::once(U256::from(*value)))
                .collect(),
            TrieNode::Extension { key, child: ptr } | TrieNode::Leaf { key, value: ptr } => {
                vec![tag, U256::from(key.len()), key.packed(), U256::from(*ptr)]
            }
        }
    }
}

impl TrieArena {
    /// Appends `node` and returns its pointer. The empty node is never written; it always
    /// lives at [NULL_PTR].
    pub fn append_node(&mut self, node: &TrieNode) -> Ptr {
        match node {
            TrieNode::Empty => NULL_PTR,
            _ => self.append_slice(&node.to_words()),
        }
    }

    /// Decodes the node whose record starts at `ptr`.
    pub fn node(&self, ptr: Ptr) -> Result<TrieNode, Error> {
        let tag = NodeTag::try_from(self.read(ptr)?).map_err(|word| Error::InvalidNodeTag {
            ptr,
            tag: word.saturating_to(),
        })?;
        let node = match tag {
            NodeTag::Empty => TrieNode::Empty,
            NodeTag::Hash => TrieNode::Hash(word_to_b256(self.read(ptr + 1)?)),
            NodeTag::Branch => {
                let mut children = [NULL_PTR; 16];
                for (i, child) in children.iter_mut().enumerate() {
                    *child = self.read_usize(ptr + 1 + i)?;
                }
                TrieNode::Branch {
                    children,
                    value: self.read_usize(ptr + 17)?,
                }
            }
            NodeTag::Extension => TrieNode::Extension {
                key: self.read_key(ptr + 1)?,
                child: self.read_usize(ptr + 3)?,
            },
            NodeTag::Leaf => TrieNode::Leaf {
                key: self.read_key(ptr + 1)?,
                value: self.read_usize(ptr + 3)?,
            },
        };
        Ok(node)
    }

    fn read_key(&self, ptr: Ptr) -> Result<Nibbles, Error> {
        Nibbles::new(self.read_usize(ptr)?, self.read(ptr + 1)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_records() {
        let mut arena = TrieArena::new();
        let key = Nibbles::new(3, U256::from(0xabc)).unwrap();
        let mut children = [NULL_PTR; 16];
        children[3] = 42;
        let nodes = [
            TrieNode::Hash(B256::repeat_byte(1)),
            TrieNode::Branch {
                children,
                value: 7,
            },
            TrieNode::Extension { key, child: 9 },
            TrieNode::Leaf { key, value: 11 },
        ];
        for node in nodes {
            let before = arena.size();
            let ptr = arena.append_node(&node);
            assert_eq!(ptr, before);
            assert_eq!(arena.size() - before, node.to_words().len());
            assert_eq!(arena.node(ptr).unwrap(), node);
        }
    }

    #[test]
    fn empty_is_the_sentinel() {
        let mut arena = TrieArena::new();
        assert_eq!(arena.append_node(&TrieNode::Empty), NULL_PTR);
        assert_eq!(arena.size(), 1);
        assert_eq!(arena.node(NULL_PTR).unwrap(), TrieNode::Empty);
    }

    #[test]
    fn json() {
        let node = TrieNode::Extension {
            key: Nibbles::from_bytes(&[0x0f, 0xa0]).unwrap(),
            child: 5,
        };
        let json = serde_json::to_string(&node).unwrap();
        assert_eq!(serde_json::from_str::<TrieNode>(&json).unwrap(), node);
    }

    #[test]
    fn invalid_tag() {
        let mut arena = TrieArena::new();
        let ptr = arena.append(U256::from(9));
        assert!(matches!(
            arena.node(ptr),
            Err(Error::InvalidNodeTag { tag: 9, .. })
        ));
    }
}
