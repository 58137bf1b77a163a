// Copyright 2019 The Sable Developers
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

//! Incremental Merkle tree over shielded note commitments. One such tree is
//! retained per historical anchor so that shielded spends can prove
//! membership against any past root.

use crate::core::hash::{Hash, HashWriter, ZERO_HASH};
use crate::ser::{Error, Readable, Reader, Writeable, Writer};

/// Depth of the note commitment tree.
pub const TREE_DEPTH: usize = 20;

fn combine(left: &Hash, right: &Hash) -> Hash {
	let mut hasher = HashWriter::default();
	hasher.write_fixed_bytes(&left.0).unwrap();
	hasher.write_fixed_bytes(&right.0).unwrap();
	hasher.finalize()
}

fn empty_roots() -> Vec<Hash> {
	let mut roots = vec![ZERO_HASH];
	for i in 0..TREE_DEPTH {
		let prev = roots[i];
		roots.push(combine(&prev, &prev));
	}
	roots
}

/// Append-only incremental Merkle tree in the compact frontier
/// representation: the current leaf pair plus one optional filled subtree
/// root per level.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NoteCommitmentTree {
	left: Option<Hash>,
	right: Option<Hash>,
	parents: Vec<Option<Hash>>,
}

impl NoteCommitmentTree {
	/// A new, empty tree.
	pub fn new() -> NoteCommitmentTree {
		NoteCommitmentTree::default()
	}

	/// Number of note commitments appended so far.
	pub fn size(&self) -> u64 {
		let mut size = 0u64;
		if self.left.is_some() {
			size += 1;
		}
		if self.right.is_some() {
			size += 1;
		}
		for (i, parent) in self.parents.iter().enumerate() {
			if parent.is_some() {
				size += 1 << (i + 1);
			}
		}
		size
	}

	/// Append a note commitment. Returns false iff the tree is full.
	pub fn append(&mut self, cm: Hash) -> bool {
		if self.size() >= 1 << TREE_DEPTH {
			return false;
		}
		if self.left.is_none() {
			self.left = Some(cm);
		} else if self.right.is_none() {
			self.right = Some(cm);
		} else {
			let mut carry = combine(&self.left.take().unwrap(), &self.right.take().unwrap());
			self.left = Some(cm);
			let mut placed = false;
			for parent in self.parents.iter_mut() {
				match parent {
					Some(p) => {
						carry = combine(p, &carry);
						*parent = None;
					}
					None => {
						*parent = Some(carry);
						placed = true;
						break;
					}
				}
			}
			if !placed {
				self.parents.push(Some(carry));
			}
		}
		true
	}

	/// Root of the tree, padded with empty subtrees up to the full depth.
	pub fn root(&self) -> Hash {
		let empty = empty_roots();
		let mut root = combine(
			&self.left.unwrap_or(empty[0]),
			&self.right.unwrap_or(empty[0]),
		);
		for (i, parent) in self.parents.iter().enumerate() {
			root = match parent {
				Some(p) => combine(p, &root),
				None => combine(&root, &empty[i + 1]),
			};
		}
		for i in self.parents.len()..TREE_DEPTH - 1 {
			root = combine(&root, &empty[i + 1]);
		}
		root
	}

	/// Rough heap footprint, for the cache usage counter.
	pub fn dynamic_memory_usage(&self) -> usize {
		self.parents.capacity() * ::std::mem::size_of::<Option<Hash>>()
	}
}

impl Writeable for NoteCommitmentTree {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), Error> {
		self.left.write(writer)?;
		self.right.write(writer)?;
		self.parents.write(writer)
	}
}

impl Readable for NoteCommitmentTree {
	fn read(reader: &mut dyn Reader) -> Result<NoteCommitmentTree, Error> {
		let left = Option::read(reader)?;
		let right = Option::read(reader)?;
		let parents: Vec<Option<Hash>> = Vec::read(reader)?;
		if parents.len() > TREE_DEPTH {
			return Err(Error::CorruptedData);
		}
		Ok(NoteCommitmentTree {
			left,
			right,
			parents,
		})
	}
}

/// Root of a binary Merkle fold over an ordered list of hashes, duplicating
/// the last entry of odd levels. The zero hash for an empty list.
pub fn merkle_root(hashes: &[Hash]) -> Hash {
	if hashes.is_empty() {
		return ZERO_HASH;
	}
	let mut row = hashes.to_vec();
	while row.len() > 1 {
		let mut next = Vec::with_capacity((row.len() + 1) / 2);
		for pair in row.chunks(2) {
			let right = if pair.len() == 2 { &pair[1] } else { &pair[0] };
			next.push(combine(&pair[0], right));
		}
		row = next;
	}
	row[0]
}
