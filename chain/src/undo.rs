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

//! Undo records. Everything the block-connect path mutates is recorded
//! here verbatim, so the disconnect path can restore the previous state
//! byte for byte without consulting anything else.

use std::collections::BTreeMap;

use crate::core::consensus::Amount;
use crate::core::core::hash::{FieldElement, Hash};
use crate::core::core::transaction::Output;
use crate::core::ser::{self, Readable, Reader, Writeable, Writer};

bitflags! {
	/// Which sections of a per-sidechain undo record carry data.
	pub struct UndoSections: u8 {
		/// The previous top-quality certificate quadruple is recorded.
		const SIDECHAIN_STATE = 0b0000_0001;
		/// A matured amount was moved into the balance.
		const MATURED_AMOUNTS = 0b0000_0010;
		/// The sidechain ceased and its top certificate was voided.
		const CEASED_CERTIFICATE_DATA = 0b0000_0100;
		/// A certificate data hash was overwritten.
		const CERT_DATA_HASH = 0b0000_1000;
	}
}

/// Coin-level fields stored alongside the last nulled output of a fully
/// drained coin, so the coin can be rebuilt from nothing on revert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoinMeta {
	/// Whether the issuer was a coinbase.
	pub is_coinbase: bool,
	/// Height the issuer was included at.
	pub height: i32,
	/// Version of the issuer.
	pub version: i32,
	/// Position of the first backward transfer output.
	pub first_bwt_pos: u32,
	/// Height at which backward transfers become spendable.
	pub bwt_maturity_height: i32,
}

impl Writeable for CoinMeta {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		writer.write_u8(self.is_coinbase as u8)?;
		writer.write_i32(self.height)?;
		writer.write_i32(self.version)?;
		writer.write_u32(self.first_bwt_pos)?;
		writer.write_i32(self.bwt_maturity_height)
	}
}

impl Readable for CoinMeta {
	fn read(reader: &mut dyn Reader) -> Result<CoinMeta, ser::Error> {
		Ok(CoinMeta {
			is_coinbase: reader.read_u8()? != 0,
			height: reader.read_i32()?,
			version: reader.read_i32()?,
			first_bwt_pos: reader.read_u32()?,
			bwt_maturity_height: reader.read_i32()?,
		})
	}
}

/// One nulled output slot, stored verbatim (a slot that was already null
/// stays null on restore).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputUndo {
	/// The output slot as it was before being nulled.
	pub output: Option<Output>,
	/// Coin rebuild data, present only on the last output stored for a
	/// coin that was drained completely.
	pub coin_meta: Option<CoinMeta>,
}

impl OutputUndo {
	/// An undo entry for one output slot, without coin rebuild data.
	pub fn new(output: Option<Output>) -> OutputUndo {
		OutputUndo {
			output,
			coin_meta: None,
		}
	}
}

impl Writeable for OutputUndo {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		self.output.write(writer)?;
		self.coin_meta.write(writer)
	}
}

impl Readable for OutputUndo {
	fn read(reader: &mut dyn Reader) -> Result<OutputUndo, ser::Error> {
		Ok(OutputUndo {
			output: Option::read(reader)?,
			coin_meta: Option::read(reader)?,
		})
	}
}

/// Everything recorded for one sidechain while connecting one block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SidechainUndo {
	/// Which of the following sections are populated.
	pub sections: UndoSections,
	/// Previous top-quality certificate: epoch.
	pub prev_top_epoch: i32,
	/// Previous top-quality certificate: hash.
	pub prev_top_hash: Hash,
	/// Previous top-quality certificate: quality.
	pub prev_top_quality: i64,
	/// Previous top-quality certificate: backward transfer total.
	pub prev_top_bwt_amount: Amount,
	/// Amount moved from the immature ledger into the balance.
	pub applied_matured_amount: Amount,
	/// Backward transfer outputs nulled when the sidechain ceased.
	pub ceased_bwts: Vec<OutputUndo>,
	/// Certificate data hash overwritten by this block's top certificate.
	pub prev_cert_data_hash: FieldElement,
}

impl Default for SidechainUndo {
	fn default() -> SidechainUndo {
		SidechainUndo {
			sections: UndoSections::empty(),
			prev_top_epoch: crate::core::core::certificate::EPOCH_NULL,
			prev_top_hash: Hash::default(),
			prev_top_quality: crate::core::core::certificate::QUALITY_NULL,
			prev_top_bwt_amount: 0,
			applied_matured_amount: 0,
			ceased_bwts: vec![],
			prev_cert_data_hash: FieldElement::default(),
		}
	}
}

impl Writeable for SidechainUndo {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		writer.write_u8(self.sections.bits())?;
		writer.write_i32(self.prev_top_epoch)?;
		self.prev_top_hash.write(writer)?;
		writer.write_i64(self.prev_top_quality)?;
		writer.write_i64(self.prev_top_bwt_amount)?;
		writer.write_i64(self.applied_matured_amount)?;
		self.ceased_bwts.write(writer)?;
		self.prev_cert_data_hash.write(writer)
	}
}

impl Readable for SidechainUndo {
	fn read(reader: &mut dyn Reader) -> Result<SidechainUndo, ser::Error> {
		let sections = UndoSections::from_bits(reader.read_u8()?).ok_or(ser::Error::CorruptedData)?;
		Ok(SidechainUndo {
			sections,
			prev_top_epoch: reader.read_i32()?,
			prev_top_hash: Hash::read(reader)?,
			prev_top_quality: reader.read_i64()?,
			prev_top_bwt_amount: reader.read_i64()?,
			applied_matured_amount: reader.read_i64()?,
			ceased_bwts: Vec::read(reader)?,
			prev_cert_data_hash: FieldElement::read(reader)?,
		})
	}
}

/// Undo data for one block's worth of sidechain mutations.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BlockUndo {
	/// Per-sidechain undo records.
	pub sc_undo: BTreeMap<Hash, SidechainUndo>,
}

impl BlockUndo {
	/// The record for a sidechain, created empty on first touch.
	pub fn entry(&mut self, sc_id: &Hash) -> &mut SidechainUndo {
		self.sc_undo.entry(*sc_id).or_default()
	}
}

impl Writeable for BlockUndo {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		writer.write_u64(self.sc_undo.len() as u64)?;
		for (sc_id, undo) in &self.sc_undo {
			sc_id.write(writer)?;
			undo.write(writer)?;
		}
		Ok(())
	}
}

impl Readable for BlockUndo {
	fn read(reader: &mut dyn Reader) -> Result<BlockUndo, ser::Error> {
		let count = reader.read_u64()?;
		let mut sc_undo = BTreeMap::new();
		for _ in 0..count {
			let sc_id = Hash::read(reader)?;
			sc_undo.insert(sc_id, SidechainUndo::read(reader)?);
		}
		Ok(BlockUndo { sc_undo })
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn undo_ser_roundtrip() {
		let mut undo = BlockUndo::default();
		{
			let entry = undo.entry(&Hash::from_vec(&[1]));
			entry.sections = UndoSections::SIDECHAIN_STATE | UndoSections::CEASED_CERTIFICATE_DATA;
			entry.prev_top_epoch = 4;
			entry.prev_top_quality = 100;
			entry.prev_top_bwt_amount = 12;
			entry.ceased_bwts.push(OutputUndo {
				output: Some(Output {
					value: 3,
					script: vec![0x51],
				}),
				coin_meta: Some(CoinMeta {
					is_coinbase: false,
					height: 8,
					version: crate::core::core::transaction::CERT_VERSION,
					first_bwt_pos: 0,
					bwt_maturity_height: 20,
				}),
			});
		}
		let bytes = ser::ser_vec(&undo).unwrap();
		let back: BlockUndo = ser::deserialize(&mut &bytes[..]).unwrap();
		assert_eq!(undo, back);
	}
}
