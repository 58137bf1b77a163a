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

//! Blocks and block headers. Only the parts the state layer consumes:
//! identity, height, and the two lists of state-transitioning payloads.

use crate::core::certificate::Certificate;
use crate::core::hash::{Hash, Hashed};
use crate::core::transaction::Transaction;
use crate::ser::{self, Readable, Reader, Writeable, Writer};

/// A block header.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BlockHeader {
	/// Protocol version of the block.
	pub version: i32,
	/// Hash of the previous block.
	pub prev_hash: Hash,
	/// Height of this block.
	pub height: i32,
	/// Timestamp, seconds since the epoch.
	pub time: u32,
	/// Commitment over all sidechain-relevant outputs of the block.
	pub sc_commitment: Hash,
}

impl Writeable for BlockHeader {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		writer.write_i32(self.version)?;
		self.prev_hash.write(writer)?;
		writer.write_i32(self.height)?;
		writer.write_u32(self.time)?;
		self.sc_commitment.write(writer)
	}
}

impl Readable for BlockHeader {
	fn read(reader: &mut dyn Reader) -> Result<BlockHeader, ser::Error> {
		Ok(BlockHeader {
			version: reader.read_i32()?,
			prev_hash: Hash::read(reader)?,
			height: reader.read_i32()?,
			time: reader.read_u32()?,
			sc_commitment: Hash::read(reader)?,
		})
	}
}

/// A block: a header plus the transactions and certificates it carries.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Block {
	/// The block header.
	pub header: BlockHeader,
	/// Transactions, coinbase first.
	pub txs: Vec<Transaction>,
	/// Withdrawal certificates.
	pub certs: Vec<Certificate>,
}

impl Block {
	/// Block identity, the hash of its header.
	pub fn hash(&self) -> Hash {
		self.header.hash()
	}
}

impl Writeable for Block {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		self.header.write(writer)?;
		self.txs.write(writer)?;
		self.certs.write(writer)
	}
}

impl Readable for Block {
	fn read(reader: &mut dyn Reader) -> Result<Block, ser::Error> {
		Ok(Block {
			header: BlockHeader::read(reader)?,
			txs: Vec::read(reader)?,
			certs: Vec::read(reader)?,
		})
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn header_identity() {
		let mut header = BlockHeader::default();
		header.height = 12;
		let h1 = header.hash();
		header.height = 13;
		assert_ne!(h1, header.hash());
	}
}
