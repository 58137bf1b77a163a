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

//! Sidechain descriptors: everything this chain records about one
//! sidechain, its epoch arithmetic, and the per-height schedule of
//! maturation and ceasing events.

use std::collections::{BTreeMap, BTreeSet};
use std::mem;

use enum_primitive::FromPrimitive;

use crate::core::consensus::Amount;
use crate::core::core::certificate::{EPOCH_NULL, QUALITY_NULL};
use crate::core::core::hash::{FieldElement, Hash, HashWriter};
use crate::core::ser::{self, Readable, Reader, Writeable, Writer};

enum_from_primitive! {
	/// Lifecycle state of a sidechain.
	#[derive(Copy, Clone, Debug, PartialEq, Eq)]
	pub enum State {
		/// No sidechain with this id is known.
		NotApplicable = 0,
		/// The sidechain accepts transfers and certificates.
		Alive = 1,
		/// No valid certificate arrived within the safeguard margin; only
		/// ceased withdrawals remain possible.
		Ceased = 2,
	}
}

impl Writeable for State {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		writer.write_u8(*self as u8)
	}
}

impl Readable for State {
	fn read(reader: &mut dyn Reader) -> Result<State, ser::Error> {
		State::from_u8(reader.read_u8()?).ok_or(ser::Error::CorruptedData)
	}
}

/// The immutable part of a sidechain, fixed by its creation output.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CreationData {
	/// Length in blocks of one withdrawal epoch.
	pub withdrawal_epoch_length: i32,
	/// Free-form sidechain data.
	pub custom_data: Vec<u8>,
	/// Optional constant baked into every certificate proof.
	pub constant: Option<FieldElement>,
	/// Verification key for withdrawal certificate proofs.
	pub cert_vk: Vec<u8>,
	/// Verification key for ceased withdrawal proofs, if supported.
	pub ceased_vk: Option<Vec<u8>>,
}

impl Writeable for CreationData {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		writer.write_i32(self.withdrawal_epoch_length)?;
		writer.write_bytes(&self.custom_data)?;
		self.constant.write(writer)?;
		writer.write_bytes(&self.cert_vk)?;
		match &self.ceased_vk {
			Some(vk) => {
				writer.write_u8(1)?;
				writer.write_bytes(vk)?;
			}
			None => writer.write_u8(0)?,
		}
		Ok(())
	}
}

impl Readable for CreationData {
	fn read(reader: &mut dyn Reader) -> Result<CreationData, ser::Error> {
		let withdrawal_epoch_length = reader.read_i32()?;
		let custom_data = reader.read_bytes_len_prefix()?;
		let constant = Option::read(reader)?;
		let cert_vk = reader.read_bytes_len_prefix()?;
		let ceased_vk = match reader.read_u8()? {
			0 => None,
			1 => Some(reader.read_bytes_len_prefix()?),
			_ => return Err(ser::Error::CorruptedData),
		};
		Ok(CreationData {
			withdrawal_epoch_length,
			custom_data,
			constant,
			cert_vk,
			ceased_vk,
		})
	}
}

/// Everything this chain tracks about one sidechain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sidechain {
	/// Spendable balance, fed by matured amounts, drained by certificates
	/// and ceased withdrawals.
	pub balance: Amount,
	/// Block that carried the creation output.
	pub creation_block_hash: Hash,
	/// Height of that block.
	pub creation_block_height: i32,
	/// Transaction that carried the creation output.
	pub creation_tx_hash: Hash,
	/// Lifecycle state.
	pub current_state: State,
	/// Epoch referenced by the top quality certificate as of the previous
	/// block tip.
	pub prev_top_epoch: i32,
	/// Hash of that certificate.
	pub prev_top_hash: Hash,
	/// Quality of that certificate.
	pub prev_top_quality: i64,
	/// Backward transfer total of that certificate.
	pub prev_top_bwt_amount: Amount,
	/// Creation-time parameters.
	pub creation_data: CreationData,
	/// Amounts waiting to enter `balance`, keyed by maturation height.
	pub immature_amounts: BTreeMap<i32, Amount>,
}

impl Default for Sidechain {
	fn default() -> Sidechain {
		Sidechain {
			balance: 0,
			creation_block_hash: Hash::default(),
			creation_block_height: -1,
			creation_tx_hash: Hash::default(),
			current_state: State::NotApplicable,
			prev_top_epoch: EPOCH_NULL,
			prev_top_hash: Hash::default(),
			prev_top_quality: QUALITY_NULL,
			prev_top_bwt_amount: 0,
			creation_data: CreationData::default(),
			immature_amounts: BTreeMap::new(),
		}
	}
}

impl Sidechain {
	/// The withdrawal epoch a target height falls into.
	pub fn epoch_for(&self, target_height: i32) -> i32 {
		if self.creation_block_height == -1 {
			return EPOCH_NULL;
		}
		(target_height - self.creation_block_height) / self.creation_data.withdrawal_epoch_length
	}

	/// First block height of the given epoch.
	pub fn start_height_for_epoch(&self, target_epoch: i32) -> i32 {
		if self.creation_block_height == -1 {
			return -1;
		}
		self.creation_block_height + target_epoch * self.creation_data.withdrawal_epoch_length
	}

	/// Grace period within the following epoch during which a late
	/// certificate may still arrive before the sidechain ceases.
	pub fn safeguard_margin(&self) -> i32 {
		if self.creation_data.withdrawal_epoch_length == -1 {
			return -1;
		}
		self.creation_data.withdrawal_epoch_length / 5
	}

	/// The height at which the sidechain ceases unless a certificate for
	/// the epoch after the last certified one arrives first.
	pub fn ceasing_height(&self) -> i32 {
		if self.creation_data.withdrawal_epoch_length == -1 {
			return -1;
		}
		self.start_height_for_epoch(self.prev_top_epoch + 2) + self.safeguard_margin()
	}

	/// Rough heap footprint, for the cache usage counter.
	pub fn dynamic_memory_usage(&self) -> usize {
		self.immature_amounts.len() * mem::size_of::<(i32, Amount)>()
			+ self.creation_data.custom_data.capacity()
			+ self.creation_data.cert_vk.capacity()
			+ self
				.creation_data
				.ceased_vk
				.as_ref()
				.map(|vk| vk.capacity())
				.unwrap_or(0)
	}
}

impl Writeable for Sidechain {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		writer.write_i64(self.balance)?;
		self.creation_block_hash.write(writer)?;
		writer.write_i32(self.creation_block_height)?;
		self.creation_tx_hash.write(writer)?;
		self.current_state.write(writer)?;
		writer.write_i32(self.prev_top_epoch)?;
		self.prev_top_hash.write(writer)?;
		writer.write_i64(self.prev_top_quality)?;
		writer.write_i64(self.prev_top_bwt_amount)?;
		self.creation_data.write(writer)?;
		writer.write_u64(self.immature_amounts.len() as u64)?;
		for (height, amount) in &self.immature_amounts {
			writer.write_i32(*height)?;
			writer.write_i64(*amount)?;
		}
		Ok(())
	}
}

impl Readable for Sidechain {
	fn read(reader: &mut dyn Reader) -> Result<Sidechain, ser::Error> {
		let balance = reader.read_i64()?;
		let creation_block_hash = Hash::read(reader)?;
		let creation_block_height = reader.read_i32()?;
		let creation_tx_hash = Hash::read(reader)?;
		let current_state = State::read(reader)?;
		let prev_top_epoch = reader.read_i32()?;
		let prev_top_hash = Hash::read(reader)?;
		let prev_top_quality = reader.read_i64()?;
		let prev_top_bwt_amount = reader.read_i64()?;
		let creation_data = CreationData::read(reader)?;
		let count = reader.read_u64()?;
		let mut immature_amounts = BTreeMap::new();
		for _ in 0..count {
			let height = reader.read_i32()?;
			let amount = reader.read_i64()?;
			immature_amounts.insert(height, amount);
		}
		Ok(Sidechain {
			balance,
			creation_block_hash,
			creation_block_height,
			creation_tx_hash,
			current_state,
			prev_top_epoch,
			prev_top_hash,
			prev_top_quality,
			prev_top_bwt_amount,
			creation_data,
			immature_amounts,
		})
	}
}

/// The sidechains with something scheduled at one height: amounts maturing
/// and sidechains ceasing.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SidechainEvents {
	/// Sidechains with an immature amount maturing at this height.
	pub maturing: BTreeSet<Hash>,
	/// Sidechains ceasing at this height.
	pub ceasing: BTreeSet<Hash>,
}

impl SidechainEvents {
	/// An event entry with nothing scheduled is null and gets erased.
	pub fn is_null(&self) -> bool {
		self.maturing.is_empty() && self.ceasing.is_empty()
	}

	/// Rough heap footprint, for the cache usage counter.
	pub fn dynamic_memory_usage(&self) -> usize {
		(self.maturing.len() + self.ceasing.len()) * mem::size_of::<Hash>()
	}
}

fn write_hash_set<W: Writer>(set: &BTreeSet<Hash>, writer: &mut W) -> Result<(), ser::Error> {
	writer.write_u64(set.len() as u64)?;
	for hash in set {
		hash.write(writer)?;
	}
	Ok(())
}

fn read_hash_set(reader: &mut dyn Reader) -> Result<BTreeSet<Hash>, ser::Error> {
	let count = reader.read_u64()?;
	let mut set = BTreeSet::new();
	for _ in 0..count {
		set.insert(Hash::read(reader)?);
	}
	Ok(set)
}

impl Writeable for SidechainEvents {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		write_hash_set(&self.maturing, writer)?;
		write_hash_set(&self.ceasing, writer)
	}
}

impl Readable for SidechainEvents {
	fn read(reader: &mut dyn Reader) -> Result<SidechainEvents, ser::Error> {
		Ok(SidechainEvents {
			maturing: read_hash_set(reader)?,
			ceasing: read_hash_set(reader)?,
		})
	}
}

/// Certificate data recorded per (sidechain, epoch): the hash of the top
/// certificate's proof data and the cumulative hash over all previous
/// epochs. Ceased withdrawal proofs verify against these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CertDataHashes {
	/// Hash of the current epoch's top certificate data.
	pub cert_data_hash: FieldElement,
	/// Cumulative hash over all epochs before this one.
	pub prev_cumulative_hash: FieldElement,
}

impl Writeable for CertDataHashes {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		self.cert_data_hash.write(writer)?;
		self.prev_cumulative_hash.write(writer)
	}
}

impl Readable for CertDataHashes {
	fn read(reader: &mut dyn Reader) -> Result<CertDataHashes, ser::Error> {
		Ok(CertDataHashes {
			cert_data_hash: FieldElement::read(reader)?,
			prev_cumulative_hash: FieldElement::read(reader)?,
		})
	}
}

/// Fold one epoch's certificate data hash into the cumulative hash chain.
pub fn cumulative_hash(prev_cumulative: &FieldElement, cert_data: &FieldElement) -> FieldElement {
	let mut hasher = HashWriter::default();
	hasher.write_fixed_bytes(&prev_cumulative.0).unwrap();
	hasher.write_fixed_bytes(&cert_data.0).unwrap();
	FieldElement(hasher.finalize().0)
}
