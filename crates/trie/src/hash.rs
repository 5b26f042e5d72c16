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

use alloy_primitives::B256;
use alloy_rlp::{Encodable, EMPTY_STRING_CODE};

use crate::{
    arena::{Ptr, TrieArena, NULL_PTR},
    keccak::keccak,
    node::TrieNode,
    Error, EMPTY_ROOT,
};

/// Turns the payload a leaf points to into the byte string stored in the trie.
///
/// A trie only stores pointers, so the same trie code serves accounts, storage slots,
/// transactions and receipts; the encoder decides what the words behind a value pointer
/// mean.
pub trait ValueEncoder {
    fn encode_value(&self, arena: &TrieArena, value: Ptr) -> Result<Vec<u8>, Error>;
}

impl<F> ValueEncoder for F
where
    F: Fn(&TrieArena, Ptr) -> Result<Vec<u8>, Error>,
{
    #[inline]
    fn encode_value(&self, arena: &TrieArena, value: Ptr) -> Result<Vec<u8>, Error> {
        self(arena, value)
    }
}

/// Encoder for values that are stored as byte blobs with [TrieArena::append_bytes].
#[derive(Clone, Copy, Debug, Default)]
pub struct RawBytes;

impl ValueEncoder for RawBytes {
    #[inline]
    fn encode_value(&self, arena: &TrieArena, value: Ptr) -> Result<Vec<u8>, Error> {
        arena.bytes(value)
    }
}

/// Represents the ways in which one node can reference another node inside the sparse
/// Merkle Patricia Trie.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NodeReference {
    /// The node's encoding itself, used when the encoding is shorter than 32 bytes.
    Bytes(Vec<u8>),
    /// The Keccak hash of the node's encoding, used for all longer encodings.
    Digest(B256),
}

impl NodeReference {
    /// Returns the hash of the referenced node.
    pub fn digest(&self) -> B256 {
        match self {
            NodeReference::Digest(digest) => *digest,
            NodeReference::Bytes(bytes) => keccak(bytes).into(),
        }
    }
}

impl Encodable for NodeReference {
    /// Inline references are embedded unchanged, digests as a 32 byte string.
    fn encode(&self, out: &mut dyn alloy_rlp::BufMut) {
        match self {
            NodeReference::Bytes(bytes) => out.put_slice(bytes),
            NodeReference::Digest(digest) => {
                out.put_u8(EMPTY_STRING_CODE + 32);
                out.put_slice(digest.as_slice());
            }
        }
    }

    fn length(&self) -> usize {
        match self {
            NodeReference::Bytes(bytes) => bytes.len(),
            NodeReference::Digest(_) => 1 + 32,
        }
    }
}

impl TrieArena {
    /// Returns the Ethereum root hash of the trie at `root`.
    ///
    /// The root is always hashed, even if its encoding is shorter than 32 bytes. The empty
    /// trie hashes to [EMPTY_ROOT] and an unresolved root to its digest.
    pub fn hash<E: ValueEncoder + ?Sized>(&self, root: Ptr, encoder: &E) -> Result<B256, Error> {
        match self.node(root)? {
            TrieNode::Empty => Ok(EMPTY_ROOT),
            TrieNode::Hash(digest) => Ok(digest),
            _ => {
                let encoded = self.encode_node(root, encoder)?;
                let digest = B256::from(keccak(&encoded));
                log::trace!("hashed trie {root} ({} bytes): {digest}", encoded.len());
                Ok(digest)
            }
        }
    }

    /// Returns how the node at `ptr` is referenced from its parent.
    pub fn reference<E: ValueEncoder + ?Sized>(
        &self,
        ptr: Ptr,
        encoder: &E,
    ) -> Result<NodeReference, Error> {
        match self.node(ptr)? {
            TrieNode::Empty => Ok(NodeReference::Bytes(vec![EMPTY_STRING_CODE])),
            TrieNode::Hash(digest) => Ok(NodeReference::Digest(digest)),
            _ => {
                let encoded = self.encode_node(ptr, encoder)?;
                if encoded.len() < 32 {
                    Ok(NodeReference::Bytes(encoded))
                } else {
                    Ok(NodeReference::Digest(keccak(encoded).into()))
                }
            }
        }
    }

    /// Returns the RLP encoding of the node at `ptr`.
    ///
    /// Leaf and extension paths use the hex-prefix encoding, leaf and branch values are
    /// embedded as RLP strings of whatever `encoder` produces for them.
    pub fn encode_node<E: ValueEncoder + ?Sized>(
        &self,
        ptr: Ptr,
        encoder: &E,
    ) -> Result<Vec<u8>, Error> {
        let mut payload = Vec::new();
        match self.node(ptr)? {
            TrieNode::Empty => return Ok(vec![EMPTY_STRING_CODE]),
            TrieNode::Hash(digest) => return Err(Error::NodeNotResolved(digest)),
            TrieNode::Branch { children, value } => {
                for child in children {
                    self.reference(child, encoder)?.encode(&mut payload);
                }
                if value == NULL_PTR {
                    payload.push(EMPTY_STRING_CODE);
                } else {
                    let value = encoder.encode_value(self, value)?;
                    value.as_slice().encode(&mut payload);
                }
            }
            TrieNode::Leaf { key, value } => {
                key.to_hex_prefix(true).as_slice().encode(&mut payload);
                let value = encoder.encode_value(self, value)?;
                value.as_slice().encode(&mut payload);
            }
            TrieNode::Extension { key, child } => {
                key.to_hex_prefix(false).as_slice().encode(&mut payload);
                self.reference(child, encoder)?.encode(&mut payload);
            }
        }

        let header = alloy_rlp::Header {
            list: true,
            payload_length: payload.len(),
        };
        let mut out = Vec::with_capacity(header.length() + payload.len());
        header.encode(&mut out);
        out.extend_from_slice(&payload);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use hex_literal::hex;
    use rstest::rstest;

    use super::*;
    use crate::nibbles::Nibbles;

    /// Builds a trie of RLP encoded values under the given byte keys.
    fn rlp_trie<K: AsRef<[u8]>, V: Encodable>(
        arena: &mut TrieArena,
        entries: impl IntoIterator<Item = (K, V)>,
    ) -> Ptr {
        let mut root = NULL_PTR;
        for (key, value) in entries {
            let value = arena.append_bytes(&alloy_rlp::encode(value));
            root = arena.insert_bytes(root, key.as_ref(), value).unwrap();
        }
        root
    }

    #[test]
    fn empty() {
        let arena = TrieArena::new();
        assert_eq!(
            arena.reference(NULL_PTR, &RawBytes).unwrap(),
            NodeReference::Bytes(vec![0x80])
        );
        assert_eq!(arena.encode_node(NULL_PTR, &RawBytes).unwrap(), vec![0x80]);
        let expected = hex!("56e81f171bcc55a6ff8345e692c0f86e5b48e01b996cadc001622fb5e363b421");
        assert_eq!(arena.hash(NULL_PTR, &RawBytes).unwrap().0, expected);
    }

    #[test]
    fn tiny() {
        // trie consisting of an extension, a branch and two leafs
        let mut arena = TrieArena::new();
        let root = rlp_trie(&mut arena, [(b"a", 0u8), (b"b", 1u8)]);

        let exp_rlp = hex!("d816d680c3208180c220018080808080808080808080808080");
        assert_eq!(
            arena.reference(root, &RawBytes).unwrap(),
            NodeReference::Bytes(exp_rlp.to_vec())
        );
        assert_eq!(arena.encode_node(root, &RawBytes).unwrap(), exp_rlp.to_vec());
        // the root is hashed even though its encoding is short
        let exp_hash = hex!("6fbf23d6ec055dd143ff50d558559770005ff44ae1d41276f1bd83affab6dd3b");
        assert_eq!(arena.hash(root, &RawBytes).unwrap().0, exp_hash);
    }

    #[test]
    fn insert_words() {
        let vals = [
            ("painting", "place"),
            ("guest", "ship"),
            ("mud", "leave"),
            ("paper", "call"),
            ("gate", "boast"),
            ("tongue", "gain"),
            ("baseball", "wait"),
            ("tale", "lie"),
            ("mood", "cope"),
            ("menu", "fear"),
        ];
        let mut arena = TrieArena::new();
        let mut root = NULL_PTR;
        for (key, val) in &vals {
            let value = arena.append_bytes(val.as_bytes());
            root = arena.insert_bytes(root, key.as_bytes(), value).unwrap();
        }

        let expected = hex!("2bab6cdf91a23ebf3af683728ea02403a98346f99ed668eec572d55c70a4b08f");
        assert_eq!(expected, arena.hash(root, &RawBytes).unwrap().0);

        for (key, val) in &vals {
            let value = arena.get_bytes(root, key.as_bytes()).unwrap().unwrap();
            assert_eq!(arena.bytes(value).unwrap(), val.as_bytes());
        }

        // the insertion order does not matter
        let mut reversed = NULL_PTR;
        for (key, val) in vals.iter().rev() {
            let value = arena.append_bytes(val.as_bytes());
            reversed = arena.insert_bytes(reversed, key.as_bytes(), value).unwrap();
        }
        assert_eq!(expected, arena.hash(reversed, &RawBytes).unwrap().0);

        // replacing a value with an equal one keeps the hash
        let value = arena.append_bytes(b"place");
        let replaced = arena.insert_bytes(root, b"painting", value).unwrap();
        assert_eq!(expected, arena.hash(replaced, &RawBytes).unwrap().0);
    }

    #[test]
    fn keccak_trie() {
        const N: usize = 512;

        let mut arena = TrieArena::new();
        let root = rlp_trie(&mut arena, (0..N).map(|i| (keccak(i.to_be_bytes()), i)));
        let expected = hex!("7310027edebdd1f7c950a7fb3413d551e85dff150d45aca4198c2f6315f9b4a7");
        assert_eq!(arena.hash(root, &RawBytes).unwrap().0, expected);
        arena.validate(root, Some(64)).unwrap();

        // check hash against trie build in reverse
        let reversed = rlp_trie(&mut arena, (0..N).rev().map(|i| (keccak(i.to_be_bytes()), i)));
        assert_eq!(arena.hash(reversed, &RawBytes).unwrap().0, expected);

        for i in 0..N {
            let value = arena.get_bytes(root, &keccak(i.to_be_bytes())).unwrap().unwrap();
            assert_eq!(arena.bytes(value).unwrap(), alloy_rlp::encode(i));
            assert!(arena
                .get_bytes(root, &keccak((i + N).to_be_bytes()))
                .unwrap()
                .is_none());
        }
    }

    #[rstest]
    #[case::hashed_keys(false)]
    #[case::index_keys(true)]
    fn delete_all(#[case] index_keys: bool) {
        const N: usize = 64;
        let key = |i: usize| {
            if index_keys {
                alloy_rlp::encode(i)
            } else {
                keccak(i.to_be_bytes()).to_vec()
            }
        };

        let mut arena = TrieArena::new();
        let mut root = rlp_trie(&mut arena, (0..N).map(|i| (key(i), i)));
        for i in 0..N {
            root = arena.delete_bytes(root, &key(i)).unwrap();
            arena.validate(root, None).unwrap();

            let reference = rlp_trie(&mut arena, ((i + 1)..N).rev().map(|j| (key(j), j)));
            assert_eq!(
                arena.hash(root, &RawBytes).unwrap(),
                arena.hash(reference, &RawBytes).unwrap()
            );
        }
        assert_eq!(root, NULL_PTR);
        assert_eq!(arena.hash(root, &RawBytes).unwrap(), EMPTY_ROOT);
    }

    #[test]
    fn partial() {
        let mut arena = TrieArena::new();
        let root = rlp_trie(&mut arena, [(b"aa", 0u8), (b"ab", 1u8), (b"ba", 2u8)]);
        let exp_hash = arena.hash(root, &RawBytes).unwrap();

        // replace one node with its digest
        let TrieNode::Extension { key, child } = arena.node(root).unwrap() else {
            panic!("extension expected")
        };
        let NodeReference::Digest(digest) = arena.reference(child, &RawBytes).unwrap() else {
            panic!("digest expected")
        };
        let child = arena.append_node(&TrieNode::Hash(digest));
        let partial = arena.append_node(&TrieNode::Extension { key, child });
        assert_eq!(arena.hash(partial, &RawBytes).unwrap(), exp_hash);

        // lookups should fail
        arena.get_bytes(partial, b"aa").unwrap_err();
        arena.get_bytes(partial, b"a0").unwrap_err();

        // a trie given only by its root hash
        let sparse = arena.append_node(&TrieNode::Hash(exp_hash));
        assert_eq!(arena.hash(sparse, &RawBytes).unwrap(), exp_hash);
        assert!(matches!(
            arena.get_bytes(sparse, b"aa"),
            Err(Error::NodeNotResolved(_))
        ));
    }

    #[test]
    fn closure_encoder() {
        let mut arena = TrieArena::new();
        let value = arena.append(alloy_primitives::U256::from(0x1234));
        let root = arena.insert(NULL_PTR, Nibbles::single(1), value).unwrap();

        let as_rlp = |arena: &TrieArena, ptr: Ptr| -> Result<Vec<u8>, Error> {
            Ok(alloy_rlp::encode(arena.read(ptr)?))
        };
        // [0x31, [0x82, 0x12, 0x34]] encoded as a string
        assert_eq!(
            arena.encode_node(root, &as_rlp).unwrap(),
            hex!("c5318382 1234").to_vec()
        );
    }
}
