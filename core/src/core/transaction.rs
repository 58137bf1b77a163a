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

//! Transactions, their transparent and shielded components, and the four
//! cross-chain sections a sidechain-enabled transaction may carry.

use crate::consensus::{self, Amount};
use crate::core::hash::{FieldElement, Hash, Hash160};
use crate::ser::{self, Readable, Reader, Writeable, Writer};

/// Transparent transaction version.
pub const TX_VERSION_TRANSPARENT: i32 = 1;
/// Shielded transaction version, first proving system.
pub const TX_VERSION_PHGR: i32 = 2;
/// Shielded transaction version, current proving system.
pub const TX_VERSION_GROTH: i32 = -3;
/// Transaction version carrying cross-chain sections.
pub const TX_VERSION_SIDECHAIN: i32 = -4;
/// Certificate version. Reserved: no transaction may use it.
pub const CERT_VERSION: i32 = -5;

/// The closed set of versions accepted on the wire and in the store.
pub fn valid_version(version: i32) -> bool {
	match version {
		TX_VERSION_TRANSPARENT | TX_VERSION_PHGR | TX_VERSION_GROTH | TX_VERSION_SIDECHAIN
		| CERT_VERSION => true,
		_ => false,
	}
}

/// Whether a version denotes a certificate. Restored values may carry only
/// the low 7 bits of the original (the high bits are sign-extended on the
/// wire), so only those bits are authoritative. No other member of the
/// closed version set shares this 7-bit ending.
pub fn is_cert_version(version: i32) -> bool {
	(version & 0x7f) == (CERT_VERSION & 0x7f)
}

/// Scripts beyond this size are unspendable by policy.
pub const MAX_SCRIPT_SIZE: usize = 10_000;

const OP_RETURN: u8 = 0x6a;

/// Errors from semantic validation of a transaction or certificate, before
/// any state is consulted.
#[derive(Clone, Eq, PartialEq, Debug, Fail)]
pub enum Error {
	/// Cross-chain sections on a version that does not allow them.
	#[fail(display = "cross-chain data on non-sidechain version {}", _0)]
	WrongVersion(i32),
	/// A declared withdrawal epoch length below the consensus floor.
	#[fail(display = "withdrawal epoch length {} too short", _0)]
	EpochLengthTooShort(i32),
	/// An amount outside the valid monetary range.
	#[fail(display = "amount outside valid range")]
	AmountOutOfRange,
	/// Sidechain custom data beyond the consensus cap.
	#[fail(display = "sidechain custom data too long")]
	CustomDataTooLong,
	/// A certificate carrying a negative quality.
	#[fail(display = "negative certificate quality")]
	NegativeQuality,
}

/// A transparent transaction output: an amount locked by a script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Output {
	/// Amount carried by the output, in satoshis.
	pub value: Amount,
	/// Locking script.
	pub script: Vec<u8>,
}

impl Output {
	/// An output no spend can ever satisfy. Such outputs are nulled out of
	/// the utxo set as soon as they appear.
	pub fn is_unspendable(&self) -> bool {
		self.script.first() == Some(&OP_RETURN) || self.script.len() > MAX_SCRIPT_SIZE
	}
}

impl Writeable for Output {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		writer.write_i64(self.value)?;
		writer.write_bytes(&self.script)
	}
}

impl Readable for Output {
	fn read(reader: &mut dyn Reader) -> Result<Output, ser::Error> {
		let value = reader.read_i64()?;
		let script = reader.read_bytes_len_prefix()?;
		Ok(Output { value, script })
	}
}

/// Reference to the output of a previous transaction or certificate.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct OutPoint {
	/// Hash of the issuing transaction or certificate.
	pub hash: Hash,
	/// Position of the output within the issuer.
	pub n: u32,
}

impl OutPoint {
	/// The null outpoint, only valid in a coinbase input.
	pub fn null() -> OutPoint {
		OutPoint {
			hash: Hash::default(),
			n: u32::max_value(),
		}
	}

	/// Whether this is the null outpoint.
	pub fn is_null(&self) -> bool {
		self.hash.is_zero() && self.n == u32::max_value()
	}
}

impl Writeable for OutPoint {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		self.hash.write(writer)?;
		writer.write_u32(self.n)
	}
}

impl Readable for OutPoint {
	fn read(reader: &mut dyn Reader) -> Result<OutPoint, ser::Error> {
		Ok(OutPoint {
			hash: Hash::read(reader)?,
			n: reader.read_u32()?,
		})
	}
}

/// A transparent transaction input spending a previous output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxInput {
	/// The output being spent.
	pub prevout: OutPoint,
	/// Unlocking script.
	pub script_sig: Vec<u8>,
}

impl Writeable for TxInput {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		self.prevout.write(writer)?;
		writer.write_bytes(&self.script_sig)
	}
}

impl Readable for TxInput {
	fn read(reader: &mut dyn Reader) -> Result<TxInput, ser::Error> {
		Ok(TxInput {
			prevout: OutPoint::read(reader)?,
			script_sig: reader.read_bytes_len_prefix()?,
		})
	}
}

/// The shielded component of a transaction: spends notes against a
/// historical anchor, revealing nullifiers, and appends new commitments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinSplit {
	/// Commitment tree root the spends prove membership against.
	pub anchor: Hash,
	/// Nullifiers of the spent notes.
	pub nullifiers: Vec<Hash>,
	/// Commitments of the created notes.
	pub commitments: Vec<Hash>,
}

impl Writeable for JoinSplit {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		self.anchor.write(writer)?;
		self.nullifiers.write(writer)?;
		self.commitments.write(writer)
	}
}

impl Readable for JoinSplit {
	fn read(reader: &mut dyn Reader) -> Result<JoinSplit, ser::Error> {
		Ok(JoinSplit {
			anchor: Hash::read(reader)?,
			nullifiers: Vec::read(reader)?,
			commitments: Vec::read(reader)?,
		})
	}
}

/// Declares a new sidechain: its epoch structure, verification keys and
/// the initial transfer locked into it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScCreationOutput {
	/// Id of the sidechain being created.
	pub sc_id: Hash,
	/// Amount locked into the sidechain on creation.
	pub value: Amount,
	/// Receiving address on the sidechain.
	pub address: Hash,
	/// Length in blocks of one withdrawal epoch.
	pub withdrawal_epoch_length: i32,
	/// Free-form sidechain data, bounded by consensus.
	pub custom_data: Vec<u8>,
	/// Optional constant baked into every certificate proof.
	pub constant: Option<FieldElement>,
	/// Verification key for withdrawal certificate proofs.
	pub cert_vk: Vec<u8>,
	/// Verification key for ceased-sidechain withdrawal proofs, if the
	/// sidechain supports them.
	pub ceased_vk: Option<Vec<u8>>,
	/// Fee a forward transfer pays to the sidechain.
	pub ft_fee: Amount,
	/// Fee a mainchain backward transfer request pays to the sidechain.
	pub mbtr_fee: Amount,
	/// Number of request field elements a backward transfer request must
	/// carry; zero disables requests.
	pub mbtr_request_data_len: u8,
}

impl Writeable for ScCreationOutput {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		self.sc_id.write(writer)?;
		writer.write_i64(self.value)?;
		self.address.write(writer)?;
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
		writer.write_i64(self.ft_fee)?;
		writer.write_i64(self.mbtr_fee)?;
		writer.write_u8(self.mbtr_request_data_len)
	}
}

impl Readable for ScCreationOutput {
	fn read(reader: &mut dyn Reader) -> Result<ScCreationOutput, ser::Error> {
		let sc_id = Hash::read(reader)?;
		let value = reader.read_i64()?;
		let address = Hash::read(reader)?;
		let withdrawal_epoch_length = reader.read_i32()?;
		let custom_data = reader.read_bytes_len_prefix()?;
		let constant = Option::read(reader)?;
		let cert_vk = reader.read_bytes_len_prefix()?;
		let ceased_vk = match reader.read_u8()? {
			0 => None,
			1 => Some(reader.read_bytes_len_prefix()?),
			_ => return Err(ser::Error::CorruptedData),
		};
		Ok(ScCreationOutput {
			sc_id,
			value,
			address,
			withdrawal_epoch_length,
			custom_data,
			constant,
			cert_vk,
			ceased_vk,
			ft_fee: reader.read_i64()?,
			mbtr_fee: reader.read_i64()?,
			mbtr_request_data_len: reader.read_u8()?,
		})
	}
}

/// Moves an amount from this chain into an existing sidechain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardTransferOutput {
	/// Target sidechain.
	pub sc_id: Hash,
	/// Amount transferred.
	pub value: Amount,
	/// Receiving address on the sidechain.
	pub address: Hash,
}

impl Writeable for ForwardTransferOutput {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		self.sc_id.write(writer)?;
		writer.write_i64(self.value)?;
		self.address.write(writer)
	}
}

impl Readable for ForwardTransferOutput {
	fn read(reader: &mut dyn Reader) -> Result<ForwardTransferOutput, ser::Error> {
		Ok(ForwardTransferOutput {
			sc_id: Hash::read(reader)?,
			value: reader.read_i64()?,
			address: Hash::read(reader)?,
		})
	}
}

/// Asks a sidechain to pay an amount back to a mainchain destination in a
/// future certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BwtRequestOutput {
	/// Target sidechain.
	pub sc_id: Hash,
	/// Fee paid to the sidechain for handling the request.
	pub sc_fee: Amount,
	/// Request payload, interpreted by the sidechain.
	pub request_data: Vec<FieldElement>,
	/// Mainchain destination for the eventual payout.
	pub mc_destination: Hash160,
}

impl Writeable for BwtRequestOutput {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		self.sc_id.write(writer)?;
		writer.write_i64(self.sc_fee)?;
		self.request_data.write(writer)?;
		self.mc_destination.write(writer)
	}
}

impl Readable for BwtRequestOutput {
	fn read(reader: &mut dyn Reader) -> Result<BwtRequestOutput, ser::Error> {
		Ok(BwtRequestOutput {
			sc_id: Hash::read(reader)?,
			sc_fee: reader.read_i64()?,
			request_data: Vec::read(reader)?,
			mc_destination: Hash160::read(reader)?,
		})
	}
}

/// Withdraws an amount directly from a ceased sidechain, authorized by a
/// proof against the sidechain's last certificate data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CswInput {
	/// Source sidechain, which must have ceased.
	pub sc_id: Hash,
	/// Amount withdrawn.
	pub value: Amount,
	/// Nullifier preventing the withdrawal from being replayed.
	pub nullifier: FieldElement,
	/// Destination public key hash on this chain.
	pub pub_key_hash: Hash160,
	/// Epoch of the certificate data the proof refers to.
	pub epoch: i32,
}

impl Writeable for CswInput {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		self.sc_id.write(writer)?;
		writer.write_i64(self.value)?;
		self.nullifier.write(writer)?;
		self.pub_key_hash.write(writer)?;
		writer.write_i32(self.epoch)
	}
}

impl Readable for CswInput {
	fn read(reader: &mut dyn Reader) -> Result<CswInput, ser::Error> {
		Ok(CswInput {
			sc_id: Hash::read(reader)?,
			value: reader.read_i64()?,
			nullifier: FieldElement::read(reader)?,
			pub_key_hash: Hash160::read(reader)?,
			epoch: reader.read_i32()?,
		})
	}
}

/// A transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
	/// Source-object version, member of the closed version set.
	pub version: i32,
	/// Transparent inputs.
	pub inputs: Vec<TxInput>,
	/// Transparent outputs.
	pub outputs: Vec<Output>,
	/// Shielded components.
	pub joinsplits: Vec<JoinSplit>,
	/// Sidechain creation outputs.
	pub sc_creations: Vec<ScCreationOutput>,
	/// Forward transfer outputs.
	pub fwd_transfers: Vec<ForwardTransferOutput>,
	/// Backward transfer request outputs.
	pub bwt_requests: Vec<BwtRequestOutput>,
	/// Ceased sidechain withdrawal inputs.
	pub csw_inputs: Vec<CswInput>,
}

impl Default for Transaction {
	fn default() -> Transaction {
		Transaction::empty(TX_VERSION_TRANSPARENT)
	}
}

impl Transaction {
	/// A new empty transaction of the given version.
	pub fn empty(version: i32) -> Transaction {
		Transaction {
			version,
			inputs: vec![],
			outputs: vec![],
			joinsplits: vec![],
			sc_creations: vec![],
			fwd_transfers: vec![],
			bwt_requests: vec![],
			csw_inputs: vec![],
		}
	}

	/// Whether this transaction mints new coins. A coinbase carries a single
	/// input spending the null outpoint.
	pub fn is_coinbase(&self) -> bool {
		self.inputs.len() == 1 && self.inputs[0].prevout.is_null()
	}

	/// Whether the version admits cross-chain sections.
	pub fn is_sidechain_version(&self) -> bool {
		self.version == TX_VERSION_SIDECHAIN
	}

	/// Whether all cross-chain sections are empty.
	pub fn cc_is_null(&self) -> bool {
		self.sc_creations.is_empty()
			&& self.fwd_transfers.is_empty()
			&& self.bwt_requests.is_empty()
			&& self.csw_inputs.is_empty()
	}

	/// Total value entering through ceased sidechain withdrawals.
	pub fn csw_value_in(&self) -> Amount {
		self.csw_inputs.iter().map(|csw| csw.value).sum()
	}

	/// Context-free validity: versions, ranges and bounds that hold for the
	/// transaction in isolation.
	pub fn check_semantic_validity(&self) -> Result<(), Error> {
		if !self.is_sidechain_version() {
			if !self.cc_is_null() {
				return Err(Error::WrongVersion(self.version));
			}
			return Ok(());
		}
		for sc in &self.sc_creations {
			if sc.withdrawal_epoch_length < consensus::MIN_WITHDRAWAL_EPOCH_LENGTH {
				return Err(Error::EpochLengthTooShort(sc.withdrawal_epoch_length));
			}
			if !consensus::valid_amount(sc.value) {
				return Err(Error::AmountOutOfRange);
			}
			if sc.custom_data.len() > consensus::MAX_SC_CUSTOM_DATA_LEN {
				return Err(Error::CustomDataTooLong);
			}
		}
		for ft in &self.fwd_transfers {
			if !consensus::valid_amount(ft.value) {
				return Err(Error::AmountOutOfRange);
			}
		}
		for bwtr in &self.bwt_requests {
			if !consensus::valid_amount(bwtr.sc_fee) {
				return Err(Error::AmountOutOfRange);
			}
		}
		for csw in &self.csw_inputs {
			if !consensus::valid_amount(csw.value) {
				return Err(Error::AmountOutOfRange);
			}
		}
		Ok(())
	}
}

impl Writeable for Transaction {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		writer.write_i32(self.version)?;
		self.inputs.write(writer)?;
		self.outputs.write(writer)?;
		self.joinsplits.write(writer)?;
		self.sc_creations.write(writer)?;
		self.fwd_transfers.write(writer)?;
		self.bwt_requests.write(writer)?;
		self.csw_inputs.write(writer)
	}
}

impl Readable for Transaction {
	fn read(reader: &mut dyn Reader) -> Result<Transaction, ser::Error> {
		let version = reader.read_i32()?;
		if !valid_version(version) || version == CERT_VERSION {
			return Err(ser::Error::CorruptedData);
		}
		Ok(Transaction {
			version,
			inputs: Vec::read(reader)?,
			outputs: Vec::read(reader)?,
			joinsplits: Vec::read(reader)?,
			sc_creations: Vec::read(reader)?,
			fwd_transfers: Vec::read(reader)?,
			bwt_requests: Vec::read(reader)?,
			csw_inputs: Vec::read(reader)?,
		})
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::core::hash::Hashed;
	use crate::ser::{deserialize, ser_vec};

	fn sample_sc_tx() -> Transaction {
		let mut tx = Transaction::empty(TX_VERSION_SIDECHAIN);
		tx.sc_creations.push(ScCreationOutput {
			sc_id: 11u64.hash(),
			value: 1000,
			address: 12u64.hash(),
			withdrawal_epoch_length: 10,
			custom_data: vec![0xca, 0xfe],
			constant: Some(FieldElement([3; 32])),
			cert_vk: vec![1, 2, 3],
			ceased_vk: Some(vec![4, 5, 6]),
			ft_fee: 1,
			mbtr_fee: 2,
			mbtr_request_data_len: 1,
		});
		tx.fwd_transfers.push(ForwardTransferOutput {
			sc_id: 11u64.hash(),
			value: 250,
			address: 13u64.hash(),
		});
		tx
	}

	#[test]
	fn tx_ser_roundtrip() {
		let tx = sample_sc_tx();
		let bytes = ser_vec(&tx).unwrap();
		let back: Transaction = deserialize(&mut &bytes[..]).unwrap();
		assert_eq!(tx, back);
		assert_eq!(tx.hash(), back.hash());
	}

	#[test]
	fn cert_version_rejected_for_tx() {
		let mut tx = sample_sc_tx();
		tx.version = CERT_VERSION;
		let bytes = ser_vec(&tx).unwrap();
		assert!(deserialize::<Transaction>(&mut &bytes[..]).is_err());
	}

	#[test]
	fn version_discriminator() {
		assert!(is_cert_version(CERT_VERSION));
		// only the low 7 bits survive a sign-extended wire roundtrip
		assert!(is_cert_version(CERT_VERSION & 0x7f));
		assert!(!is_cert_version(TX_VERSION_SIDECHAIN));
		assert!(!is_cert_version(TX_VERSION_GROTH));
		assert!(!is_cert_version(TX_VERSION_TRANSPARENT));
	}

	#[test]
	fn semantic_validity() {
		let tx = sample_sc_tx();
		assert!(tx.check_semantic_validity().is_ok());

		let mut wrong_version = tx.clone();
		wrong_version.version = TX_VERSION_TRANSPARENT;
		assert_eq!(
			wrong_version.check_semantic_validity(),
			Err(Error::WrongVersion(TX_VERSION_TRANSPARENT))
		);

		let mut short_epoch = tx.clone();
		short_epoch.sc_creations[0].withdrawal_epoch_length = 1;
		assert_eq!(
			short_epoch.check_semantic_validity(),
			Err(Error::EpochLengthTooShort(1))
		);

		let mut bad_amount = tx;
		bad_amount.fwd_transfers[0].value = -5;
		assert_eq!(
			bad_amount.check_semantic_validity(),
			Err(Error::AmountOutOfRange)
		);
	}

	#[test]
	fn unspendable_output() {
		let out = Output {
			value: 5,
			script: vec![0x6a, 0x01],
		};
		assert!(out.is_unspendable());
		let out = Output {
			value: 5,
			script: vec![0x76, 0xa9],
		};
		assert!(!out.is_unspendable());
	}
}
