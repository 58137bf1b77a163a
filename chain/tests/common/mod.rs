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

//! Builders shared by the chain integration suites.

#![allow(dead_code)]

use self::core::core::certificate::{BackwardTransfer, Certificate};
use self::core::core::hash::{FieldElement, Hash, Hash160, Hashed};
use self::core::core::transaction::{
	CswInput, ForwardTransferOutput, Output, ScCreationOutput, Transaction, TX_VERSION_SIDECHAIN,
};
use sable_chain::cache::{CacheView, EntryFlag, SidechainEntry};
use sable_chain::sidechain::{Sidechain, State};
use sable_chain::store::{BackingView, ViewBatch};
use sable_chain::types::ChainParams;
use sable_chain::Coin;
use sable_core as core;

/// Test networks mature sidechain amounts after two blocks.
pub const SC_COIN_MATURITY: i32 = 2;

pub fn params() -> ChainParams {
	ChainParams {
		sc_coin_maturity: SC_COIN_MATURITY,
	}
}

pub fn creation_out(sc_id: Hash, value: i64, epoch_length: i32) -> ScCreationOutput {
	ScCreationOutput {
		sc_id,
		value,
		address: 1u64.hash(),
		withdrawal_epoch_length: epoch_length,
		custom_data: vec![],
		constant: None,
		cert_vk: vec![0xaa],
		ceased_vk: None,
		ft_fee: 0,
		mbtr_fee: 0,
		mbtr_request_data_len: 0,
	}
}

pub fn creation_tx(sc_id: Hash, value: i64, epoch_length: i32) -> Transaction {
	let mut tx = Transaction::empty(TX_VERSION_SIDECHAIN);
	tx.sc_creations.push(creation_out(sc_id, value, epoch_length));
	tx
}

pub fn fwd_tx(sc_id: Hash, value: i64) -> Transaction {
	let mut tx = Transaction::empty(TX_VERSION_SIDECHAIN);
	tx.fwd_transfers.push(ForwardTransferOutput {
		sc_id,
		value,
		address: 2u64.hash(),
	});
	tx
}

pub fn csw_tx(sc_id: Hash, value: i64, nullifier: FieldElement, epoch: i32) -> Transaction {
	let mut tx = Transaction::empty(TX_VERSION_SIDECHAIN);
	tx.csw_inputs.push(CswInput {
		sc_id,
		value,
		nullifier,
		pub_key_hash: Hash160([7; 20]),
		epoch,
	});
	tx
}

pub fn bwt_output(value: i64) -> Output {
	BackwardTransfer {
		value,
		pub_key_hash: Hash160([9; 20]),
	}
	.to_output()
}

/// A certificate with a change output followed by the given backward
/// transfer amounts.
pub fn cert_with_bwts(sc_id: Hash, epoch: i32, quality: i64, bwts: &[i64]) -> Certificate {
	let mut cert = Certificate::new(sc_id, epoch, quality);
	cert.outputs.push(Output {
		value: 1,
		script: vec![0x51],
	});
	if !bwts.is_empty() {
		cert.first_bwt_pos = cert.outputs.len() as u32;
		for value in bwts {
			cert.outputs.push(bwt_output(*value));
		}
	}
	cert
}

/// A certificate carrying only backward transfers.
pub fn pure_bwt_cert(sc_id: Hash, epoch: i32, quality: i64, bwts: &[i64]) -> Certificate {
	let mut cert = Certificate::new(sc_id, epoch, quality);
	cert.first_bwt_pos = 0;
	for value in bwts {
		cert.outputs.push(bwt_output(*value));
	}
	cert
}

/// Store the coin a certificate produces, the way the block connector
/// does when it admits the certificate.
pub fn store_cert_coin(
	view: &mut CacheView<'_>,
	cert: &Certificate,
	height: i32,
	bwt_maturity_height: i32,
) {
	let mut coins = view.modify_coin(&cert.hash()).unwrap();
	*coins = Coin::from_cert(cert, height, bwt_maturity_height, true);
}

/// Seed a sidechain straight into a backing view, bypassing the creation
/// flow, for suites that start from a known descriptor.
pub fn seed_sidechain(view: &mut dyn BackingView, sc_id: Hash, sidechain: Sidechain) {
	let mut batch = ViewBatch::default();
	batch.sidechains.insert(
		sc_id,
		SidechainEntry {
			sidechain,
			flag: EntryFlag::Fresh,
		},
	);
	view.batch_write(batch).unwrap();
}

pub fn sidechain_with_top_cert(
	creation_height: i32,
	epoch_length: i32,
	balance: i64,
	top_epoch: i32,
	top_hash: Hash,
	top_quality: i64,
	top_bwt_amount: i64,
) -> Sidechain {
	let mut sc = Sidechain::default();
	sc.creation_block_height = creation_height;
	sc.creation_data.withdrawal_epoch_length = epoch_length;
	sc.creation_data.cert_vk = vec![0xaa];
	sc.current_state = State::Alive;
	sc.balance = balance;
	sc.prev_top_epoch = top_epoch;
	sc.prev_top_hash = top_hash;
	sc.prev_top_quality = top_quality;
	sc.prev_top_bwt_amount = top_bwt_amount;
	sc
}
