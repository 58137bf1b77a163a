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

//! Streaming accumulator producing the per-block commitment over all
//! sidechain-relevant outputs. Sidechain nodes verify inclusion of their
//! cross-chain traffic against this root, so the contribution order is
//! consensus: per transaction, creations then forward transfers then
//! backward transfer requests under one running output index, then ceased
//! withdrawals; certificates whole.

use crate::core::core::certificate::{BackwardTransfer, Certificate};
use crate::core::core::hash::{Hash, HashWriter, Hashed};
use crate::core::core::merkle::merkle_root;
use crate::core::core::transaction::Transaction;
use crate::core::ser::{Writeable, Writer};
use crate::error::{Error, ErrorKind};

const DOMAIN_SC_CREATION: u8 = 1;
const DOMAIN_FWD_TRANSFER: u8 = 2;
const DOMAIN_BWT_REQUEST: u8 = 3;
const DOMAIN_CSW_INPUT: u8 = 4;
const DOMAIN_CERTIFICATE: u8 = 5;

/// Accumulates the sidechain-relevant pieces of one block and produces a
/// single commitment root over them. Deterministic in the contribution
/// order alone.
#[derive(Default)]
pub struct CommitmentBuilder {
	leaves: Vec<Hash>,
}

impl CommitmentBuilder {
	/// An empty accumulator.
	pub fn new() -> CommitmentBuilder {
		CommitmentBuilder::default()
	}

	/// Fold in the cross-chain sections of a transaction. Transactions of
	/// non-sidechain versions contribute nothing.
	pub fn add_tx(&mut self, tx: &Transaction) -> Result<(), Error> {
		if !tx.is_sidechain_version() {
			return Ok(());
		}
		let tx_hash = tx.hash();
		let mut out_idx: u32 = 0;

		for sc_out in &tx.sc_creations {
			let mut hasher = contribution(DOMAIN_SC_CREATION, &tx_hash, out_idx);
			sc_out.sc_id.write(&mut hasher)?;
			hasher.write_i64(sc_out.value)?;
			sc_out.address.write(&mut hasher)?;
			hasher.write_i32(sc_out.withdrawal_epoch_length)?;
			hasher.write_u8(sc_out.mbtr_request_data_len)?;
			hasher.write_bytes(&sc_out.custom_data)?;
			sc_out.constant.write(&mut hasher)?;
			hasher.write_bytes(&sc_out.cert_vk)?;
			match &sc_out.ceased_vk {
				Some(vk) => {
					hasher.write_u8(1)?;
					hasher.write_bytes(vk)?;
				}
				None => hasher.write_u8(0)?,
			}
			hasher.write_i64(sc_out.ft_fee)?;
			hasher.write_i64(sc_out.mbtr_fee)?;
			self.leaves.push(hasher.finalize());
			out_idx += 1;
		}

		for fwd in &tx.fwd_transfers {
			let mut hasher = contribution(DOMAIN_FWD_TRANSFER, &tx_hash, out_idx);
			fwd.sc_id.write(&mut hasher)?;
			hasher.write_i64(fwd.value)?;
			fwd.address.write(&mut hasher)?;
			self.leaves.push(hasher.finalize());
			out_idx += 1;
		}

		for bwtr in &tx.bwt_requests {
			let mut hasher = contribution(DOMAIN_BWT_REQUEST, &tx_hash, out_idx);
			bwtr.sc_id.write(&mut hasher)?;
			hasher.write_i64(bwtr.sc_fee)?;
			bwtr.request_data.write(&mut hasher)?;
			bwtr.mc_destination.write(&mut hasher)?;
			self.leaves.push(hasher.finalize());
			out_idx += 1;
		}

		// ceased withdrawals are keyed by their nullifier, not the index
		for csw in &tx.csw_inputs {
			let mut hasher = HashWriter::default();
			hasher.write_u8(DOMAIN_CSW_INPUT)?;
			csw.sc_id.write(&mut hasher)?;
			hasher.write_i64(csw.value)?;
			csw.nullifier.write(&mut hasher)?;
			csw.pub_key_hash.write(&mut hasher)?;
			self.leaves.push(hasher.finalize());
		}

		Ok(())
	}

	/// Fold in a certificate whole: identity, quality, every backward
	/// transfer in output order, custom fields in input order, cumulative
	/// root and both declared fees.
	pub fn add_cert(&mut self, cert: &Certificate) -> Result<(), Error> {
		let mut hasher = HashWriter::default();
		hasher.write_u8(DOMAIN_CERTIFICATE)?;
		cert.sc_id.write(&mut hasher)?;
		hasher.write_i32(cert.epoch)?;
		hasher.write_i64(cert.quality)?;

		let bwts = cert.backward_transfers();
		hasher.write_u64(bwts.len() as u64)?;
		for out in bwts {
			let bwt = BackwardTransfer::from_output(out)
				.ok_or_else(|| Error::from(ErrorKind::UnknownOutputType))?;
			hasher.write_i64(bwt.value)?;
			bwt.pub_key_hash.write(&mut hasher)?;
		}

		cert.custom_fields.write(&mut hasher)?;
		cert.end_epoch_cum_commitment_root.write(&mut hasher)?;
		hasher.write_i64(cert.ft_fee)?;
		hasher.write_i64(cert.mbtr_fee)?;
		self.leaves.push(hasher.finalize());
		Ok(())
	}

	/// The accumulator's current root.
	pub fn commitment(&self) -> Hash {
		merkle_root(&self.leaves)
	}
}

fn contribution(domain: u8, tx_hash: &Hash, out_idx: u32) -> HashWriter {
	let mut hasher = HashWriter::default();
	// infallible writer, the in-memory hash state never errors
	hasher.write_u8(domain).unwrap();
	hasher.write_fixed_bytes(&tx_hash.0).unwrap();
	hasher.write_u32(out_idx).unwrap();
	hasher
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::core::core::hash::{FieldElement, Hash160, ZERO_HASH};
	use crate::core::core::transaction::{
		ForwardTransferOutput, ScCreationOutput, TX_VERSION_SIDECHAIN, TX_VERSION_TRANSPARENT,
	};

	fn creation_out(sc_id: Hash, value: i64) -> ScCreationOutput {
		ScCreationOutput {
			sc_id,
			value,
			address: 3u64.hash(),
			withdrawal_epoch_length: 10,
			custom_data: vec![],
			constant: None,
			cert_vk: vec![1],
			ceased_vk: None,
			ft_fee: 0,
			mbtr_fee: 0,
			mbtr_request_data_len: 0,
		}
	}

	fn sc_tx() -> Transaction {
		let mut tx = Transaction::empty(TX_VERSION_SIDECHAIN);
		tx.sc_creations.push(creation_out(7u64.hash(), 100));
		tx.fwd_transfers.push(ForwardTransferOutput {
			sc_id: 7u64.hash(),
			value: 5,
			address: 4u64.hash(),
		});
		tx
	}

	#[test]
	fn empty_commitment_is_zero() {
		let builder = CommitmentBuilder::new();
		assert_eq!(builder.commitment(), ZERO_HASH);
	}

	#[test]
	fn non_sidechain_tx_contributes_nothing() {
		let mut builder = CommitmentBuilder::new();
		builder
			.add_tx(&Transaction::empty(TX_VERSION_TRANSPARENT))
			.unwrap();
		assert_eq!(builder.commitment(), ZERO_HASH);
	}

	#[test]
	fn commitment_is_deterministic() {
		let tx = sc_tx();
		let mut b1 = CommitmentBuilder::new();
		let mut b2 = CommitmentBuilder::new();
		b1.add_tx(&tx).unwrap();
		b2.add_tx(&tx).unwrap();
		assert_eq!(b1.commitment(), b2.commitment());
	}

	#[test]
	fn order_matters() {
		let tx1 = sc_tx();
		let mut tx2 = sc_tx();
		tx2.fwd_transfers[0].value = 6;

		let mut b1 = CommitmentBuilder::new();
		b1.add_tx(&tx1).unwrap();
		b1.add_tx(&tx2).unwrap();
		let mut b2 = CommitmentBuilder::new();
		b2.add_tx(&tx2).unwrap();
		b2.add_tx(&tx1).unwrap();
		assert_ne!(b1.commitment(), b2.commitment());
	}

	#[test]
	fn cert_contribution_covers_bwts() {
		let mut cert = Certificate::new(7u64.hash(), 2, 50);
		cert.first_bwt_pos = 0;
		cert.outputs.push(
			BackwardTransfer {
				value: 9,
				pub_key_hash: Hash160([5; 20]),
			}
			.to_output(),
		);

		let mut b1 = CommitmentBuilder::new();
		b1.add_cert(&cert).unwrap();

		let mut cert2 = cert.clone();
		cert2.outputs[0] = BackwardTransfer {
			value: 10,
			pub_key_hash: Hash160([5; 20]),
		}
		.to_output();
		let mut b2 = CommitmentBuilder::new();
		b2.add_cert(&cert2).unwrap();
		assert_ne!(b1.commitment(), b2.commitment());

		let mut custom = Certificate::new(7u64.hash(), 2, 50);
		custom.custom_fields.push(FieldElement([1; 32]));
		let mut b3 = CommitmentBuilder::new();
		b3.add_cert(&custom).unwrap();
		let mut b4 = CommitmentBuilder::new();
		b4.add_cert(&Certificate::new(7u64.hash(), 2, 50)).unwrap();
		assert_ne!(b3.commitment(), b4.commitment());
	}
}
