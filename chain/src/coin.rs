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

//! The unspent outputs of a single issuing object, either a transaction or
//! a certificate, with the metadata needed to decide maturity and
//! prunability.

use std::mem;

use crate::core::core::certificate::{Certificate, NO_BWT};
use crate::core::core::transaction::{self, Output, Transaction};
use crate::core::ser::{self, Readable, Reader, Writeable, Writer};

/// Outputs of one transaction or certificate. A spent (or never
/// spendable) output is a `None` slot; trailing `None`s are always
/// trimmed, and a coin with no remaining outputs is "pruned".
#[derive(Debug, Clone)]
pub struct Coin {
	/// Whether the issuer was a coinbase transaction.
	pub is_coinbase: bool,
	/// Height the issuer was included at.
	pub height: i32,
	/// Version of the issuer, member of the closed version set. The low 7
	/// bits discriminate certificate coins.
	pub version: i32,
	/// The outputs, sparse.
	pub outputs: Vec<Option<Output>>,
	/// Position of the first backward transfer output, `NO_BWT` if the
	/// issuer was not a certificate or carried none.
	pub first_bwt_pos: u32,
	/// Height at which backward transfer outputs become spendable.
	pub bwt_maturity_height: i32,
}

impl Default for Coin {
	fn default() -> Coin {
		Coin {
			is_coinbase: false,
			height: 0,
			version: 0,
			outputs: vec![],
			first_bwt_pos: NO_BWT,
			bwt_maturity_height: 0,
		}
	}
}

impl Coin {
	/// The outputs of a transaction as a coin. Unspendable outputs are
	/// nulled immediately.
	pub fn from_tx(tx: &Transaction, height: i32) -> Coin {
		let mut coin = Coin {
			is_coinbase: tx.is_coinbase(),
			height,
			version: tx.version,
			outputs: tx.outputs.iter().cloned().map(Some).collect(),
			first_bwt_pos: NO_BWT,
			bwt_maturity_height: 0,
		};
		coin.clear_unspendable();
		coin
	}

	/// The outputs of a certificate as a coin. If the certificate is not
	/// the top quality one of its block, its backward transfers are spent
	/// on the spot: they belong to a superseded certificate.
	pub fn from_cert(
		cert: &Certificate,
		height: i32,
		bwt_maturity_height: i32,
		is_block_top_quality: bool,
	) -> Coin {
		let mut coin = Coin {
			is_coinbase: false,
			height,
			version: cert.version,
			outputs: cert.outputs.iter().cloned().map(Some).collect(),
			first_bwt_pos: cert.first_bwt_pos,
			bwt_maturity_height,
		};
		if !is_block_top_quality && cert.first_bwt_pos != NO_BWT {
			for pos in cert.first_bwt_pos as usize..coin.outputs.len() {
				coin.outputs[pos] = None;
			}
		}
		coin.clear_unspendable();
		coin
	}

	/// Whether the issuer was a certificate. Restored versions carry only
	/// the low 7 bits of the original, so only those bits are compared.
	pub fn is_from_cert(&self) -> bool {
		transaction::is_cert_version(self.version)
	}

	/// Whether the output at `pos` may be spent at `spending_height`.
	pub fn is_output_mature(&self, pos: usize, spending_height: i32) -> bool {
		if self.is_coinbase {
			return spending_height >= self.height + crate::core::consensus::COINBASE_MATURITY;
		}
		if !self.is_from_cert() {
			return true;
		}
		// hereinafter a certificate
		if pos as u32 >= self.first_bwt_pos {
			spending_height >= self.bwt_maturity_height
		} else {
			true
		}
	}

	/// Mark the output at `pos` spent. Fails if it is out of range or
	/// already null.
	pub fn spend(&mut self, pos: usize) -> bool {
		if pos >= self.outputs.len() || self.outputs[pos].is_none() {
			return false;
		}
		self.outputs[pos] = None;
		self.trim();
		true
	}

	/// Whether the output at `pos` exists and is unspent.
	pub fn is_available(&self, pos: usize) -> bool {
		pos < self.outputs.len() && self.outputs[pos].is_some()
	}

	/// A coin with no unspent output left. Pruned coins are never
	/// persisted.
	pub fn is_pruned(&self) -> bool {
		self.outputs.iter().all(|out| out.is_none())
	}

	/// Reset to the default, pruned state.
	pub fn clear(&mut self) {
		*self = Coin::default();
	}

	/// Drop trailing null outputs.
	pub fn trim(&mut self) {
		while self.outputs.last().map(|out| out.is_none()) == Some(true) {
			self.outputs.pop();
		}
		if self.outputs.is_empty() {
			// release the allocation too
			self.outputs = vec![];
		}
	}

	/// Null every output whose script can never be spent, then trim.
	pub fn clear_unspendable(&mut self) {
		for slot in self.outputs.iter_mut() {
			let unspendable = slot.as_ref().map(|out| out.is_unspendable());
			if unspendable == Some(true) {
				*slot = None;
			}
		}
		self.trim();
	}

	/// Rough heap footprint of the coin, for the cache usage counter.
	pub fn dynamic_memory_usage(&self) -> usize {
		let mut usage = self.outputs.capacity() * mem::size_of::<Option<Output>>();
		for out in self.outputs.iter().flatten() {
			usage += out.script.capacity();
		}
		usage
	}
}

/// Pruned coins compare equal no matter what their other fields hold.
impl PartialEq for Coin {
	fn eq(&self, other: &Coin) -> bool {
		if self.is_pruned() && other.is_pruned() {
			return true;
		}
		self.is_coinbase == other.is_coinbase
			&& self.height == other.height
			&& self.version == other.version
			&& self.outputs == other.outputs
			&& self.first_bwt_pos == other.first_bwt_pos
			&& self.bwt_maturity_height == other.bwt_maturity_height
	}
}

impl Eq for Coin {}

impl Writeable for Coin {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		writer.write_u8(self.is_coinbase as u8)?;
		writer.write_i32(self.height)?;
		writer.write_i32(self.version)?;
		self.outputs.write(writer)?;
		writer.write_u32(self.first_bwt_pos)?;
		writer.write_i32(self.bwt_maturity_height)
	}
}

impl Readable for Coin {
	fn read(reader: &mut dyn Reader) -> Result<Coin, ser::Error> {
		let is_coinbase = match reader.read_u8()? {
			0 => false,
			1 => true,
			_ => return Err(ser::Error::CorruptedData),
		};
		let height = reader.read_i32()?;
		let version = reader.read_i32()?;
		if !transaction::valid_version(version) {
			return Err(ser::Error::CorruptedData);
		}
		Ok(Coin {
			is_coinbase,
			height,
			version,
			outputs: Vec::read(reader)?,
			first_bwt_pos: reader.read_u32()?,
			bwt_maturity_height: reader.read_i32()?,
		})
	}
}
