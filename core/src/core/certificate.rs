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

//! Withdrawal certificates. A certificate closes one withdrawal epoch of a
//! sidechain, pays its backward transfers on this chain and competes with
//! other certificates of the same epoch through its quality.

use crate::consensus::{self, Amount};
use crate::core::hash::{FieldElement, Hash, Hash160};
use crate::core::transaction::{self, Output, CERT_VERSION};
use crate::ser::{self, Readable, Reader, Writeable, Writer};

/// Epoch value of a sidechain that has not seen any certificate yet.
pub const EPOCH_NULL: i32 = -1;

/// Quality value of a sidechain that has not seen any certificate yet.
pub const QUALITY_NULL: i64 = -1;

/// Sentinel for "this issuer has no backward transfer outputs".
pub const NO_BWT: u32 = u32::max_value();

/// The payout form of a backward transfer: an amount to a public key hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackwardTransfer {
	/// Amount paid back on this chain.
	pub value: Amount,
	/// Destination public key hash.
	pub pub_key_hash: Hash160,
}

impl BackwardTransfer {
	/// The standard pay-to-public-key-hash script carrying this transfer
	/// when it becomes a regular output.
	pub fn to_output(&self) -> Output {
		// OP_DUP OP_HASH160 <20 bytes> OP_EQUALVERIFY OP_CHECKSIG
		let mut script = Vec::with_capacity(25);
		script.extend_from_slice(&[0x76, 0xa9, 0x14]);
		script.extend_from_slice(&self.pub_key_hash.0);
		script.extend_from_slice(&[0x88, 0xac]);
		Output {
			value: self.value,
			script,
		}
	}

	/// Parse a backward transfer back out of its pay-to-public-key-hash
	/// output form. None for any other script shape.
	pub fn from_output(out: &Output) -> Option<BackwardTransfer> {
		if out.script.len() == 25
			&& out.script[..3] == [0x76, 0xa9, 0x14]
			&& out.script[23..] == [0x88, 0xac]
		{
			let mut pkh = [0; 20];
			pkh.copy_from_slice(&out.script[3..23]);
			return Some(BackwardTransfer {
				value: out.value,
				pub_key_hash: Hash160(pkh),
			});
		}
		None
	}
}

impl Writeable for BackwardTransfer {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		writer.write_i64(self.value)?;
		self.pub_key_hash.write(writer)
	}
}

impl Readable for BackwardTransfer {
	fn read(reader: &mut dyn Reader) -> Result<BackwardTransfer, ser::Error> {
		Ok(BackwardTransfer {
			value: reader.read_i64()?,
			pub_key_hash: Hash160::read(reader)?,
		})
	}
}

/// A withdrawal certificate for one sidechain epoch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate {
	/// Always `CERT_VERSION`.
	pub version: i32,
	/// The sidechain this certificate belongs to.
	pub sc_id: Hash,
	/// The withdrawal epoch it closes.
	pub epoch: i32,
	/// Hash of the last block of that epoch.
	pub end_epoch_block_hash: Hash,
	/// Cumulative sidechain-commitment tree root at the end of the epoch.
	pub end_epoch_cum_commitment_root: FieldElement,
	/// Certificate quality; within an epoch the highest quality wins.
	pub quality: i64,
	/// Outputs: change first, backward transfers from `first_bwt_pos`.
	pub outputs: Vec<Output>,
	/// Index of the first backward transfer output, `NO_BWT` if none.
	pub first_bwt_pos: u32,
	/// Forward transfer fee declared for the next epoch.
	pub ft_fee: Amount,
	/// Backward transfer request fee declared for the next epoch.
	pub mbtr_fee: Amount,
	/// Sidechain-defined proof data.
	pub custom_fields: Vec<FieldElement>,
	/// Disambiguates otherwise identical certificates.
	pub nonce: Hash,
}

impl Certificate {
	/// A new empty certificate for the given sidechain and epoch.
	pub fn new(sc_id: Hash, epoch: i32, quality: i64) -> Certificate {
		Certificate {
			version: CERT_VERSION,
			sc_id,
			epoch,
			end_epoch_block_hash: Hash::default(),
			end_epoch_cum_commitment_root: FieldElement::default(),
			quality,
			outputs: vec![],
			first_bwt_pos: NO_BWT,
			ft_fee: 0,
			mbtr_fee: 0,
			custom_fields: vec![],
			nonce: Hash::default(),
		}
	}

	/// The backward transfer outputs, in output order.
	pub fn backward_transfers(&self) -> &[Output] {
		if self.first_bwt_pos == NO_BWT {
			return &[];
		}
		&self.outputs[self.first_bwt_pos as usize..]
	}

	/// Total amount paid out by the backward transfers.
	pub fn bwt_total_amount(&self) -> Amount {
		self.backward_transfers().iter().map(|out| out.value).sum()
	}

	/// Number of backward transfer outputs.
	pub fn bwt_count(&self) -> usize {
		self.backward_transfers().len()
	}

	/// Context-free validity of the certificate.
	pub fn check_semantic_validity(&self) -> Result<(), transaction::Error> {
		if self.version != CERT_VERSION {
			return Err(transaction::Error::WrongVersion(self.version));
		}
		if self.quality < 0 {
			return Err(transaction::Error::NegativeQuality);
		}
		for out in &self.outputs {
			if !consensus::valid_amount(out.value) {
				return Err(transaction::Error::AmountOutOfRange);
			}
		}
		Ok(())
	}
}

impl Writeable for Certificate {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		writer.write_i32(self.version)?;
		self.sc_id.write(writer)?;
		writer.write_i32(self.epoch)?;
		self.end_epoch_block_hash.write(writer)?;
		self.end_epoch_cum_commitment_root.write(writer)?;
		writer.write_i64(self.quality)?;
		self.outputs.write(writer)?;
		writer.write_u32(self.first_bwt_pos)?;
		writer.write_i64(self.ft_fee)?;
		writer.write_i64(self.mbtr_fee)?;
		self.custom_fields.write(writer)?;
		self.nonce.write(writer)
	}
}

impl Readable for Certificate {
	fn read(reader: &mut dyn Reader) -> Result<Certificate, ser::Error> {
		let version = reader.read_i32()?;
		if version != CERT_VERSION {
			return Err(ser::Error::CorruptedData);
		}
		let sc_id = Hash::read(reader)?;
		let epoch = reader.read_i32()?;
		let end_epoch_block_hash = Hash::read(reader)?;
		let end_epoch_cum_commitment_root = FieldElement::read(reader)?;
		let quality = reader.read_i64()?;
		let outputs: Vec<Output> = Vec::read(reader)?;
		let first_bwt_pos = reader.read_u32()?;
		if first_bwt_pos != NO_BWT && first_bwt_pos as usize > outputs.len() {
			return Err(ser::Error::CorruptedData);
		}
		Ok(Certificate {
			version,
			sc_id,
			epoch,
			end_epoch_block_hash,
			end_epoch_cum_commitment_root,
			quality,
			outputs,
			first_bwt_pos,
			ft_fee: reader.read_i64()?,
			mbtr_fee: reader.read_i64()?,
			custom_fields: Vec::read(reader)?,
			nonce: Hash::read(reader)?,
		})
	}
}
