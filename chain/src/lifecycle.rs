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

//! The sidechain lifecycle driver: applies and reverts transactions,
//! certificates and scheduled events against the view cache.
//!
//! Connecting a block runs, in order: the policy gates
//! (`have_sc_requirements`, `is_csw_applicable`, `is_cert_applicable`),
//! then `update_sidechain_for_tx` / `update_sidechain_for_cert`, then
//! `handle_sidechain_events` for the block height. Disconnecting runs the
//! exact mirror from the recorded undo: `revert_sidechain_events`, then
//! `restore_sidechain_from_cert`, then `revert_tx_outputs`.
//!
//! Every public operation here is all-or-nothing: it validates against the
//! view before the first mutation, so a rejection leaves the cache in the
//! state it was in before the call.

use std::collections::{BTreeSet, HashMap};

use crate::cache::{CacheView, CertDataEntry, EntryFlag};
use crate::core::consensus::Amount;
use crate::core::core::certificate::{Certificate, EPOCH_NULL};
use crate::core::core::hash::{FieldElement, Hash, Hashed};
use crate::core::core::transaction::{ForwardTransferOutput, ScCreationOutput, Transaction};
use crate::error::{Error, ErrorKind};
use crate::sidechain::{cumulative_hash, Sidechain, State};
use crate::store::BackingView;
use crate::types::{ActiveChain, BwtState, CertStatusUpdate, ProofVerifier};
use crate::undo::{BlockUndo, CoinMeta, OutputUndo, SidechainUndo, UndoSections};

impl<'a> CacheView<'a> {
	/// Lifecycle state of a sidechain as seen through this view.
	pub fn sidechain_state(&mut self, sc_id: &Hash) -> Result<State, Error> {
		Ok(self
			.access_sidechain(sc_id)?
			.map(|sc| sc.current_state)
			.unwrap_or(State::NotApplicable))
	}

	/// Cheap state-level gate for the cross-chain sections of a
	/// transaction: creations target unused ids, forward transfers target
	/// live sidechains, ceased withdrawals target ceased ones.
	pub fn have_sc_requirements(&mut self, tx: &Transaction) -> Result<(), Error> {
		if tx.is_coinbase() {
			return Ok(());
		}

		for sc_out in &tx.sc_creations {
			if self.have_sidechain(&sc_out.sc_id).map_err(Error::from)? {
				return Err(ErrorKind::ScAlreadyExists(sc_out.sc_id).into());
			}
		}

		for fwd in &tx.fwd_transfers {
			if self.have_sidechain(&fwd.sc_id).map_err(Error::from)? {
				if self.sidechain_state(&fwd.sc_id)? != State::Alive {
					return Err(ErrorKind::ScCeased(fwd.sc_id).into());
				}
			} else if !tx.sc_creations.iter().any(|sc| sc.sc_id == fwd.sc_id) {
				return Err(ErrorKind::ScMissing(fwd.sc_id).into());
			}
		}

		for csw in &tx.csw_inputs {
			match self.sidechain_state(&csw.sc_id)? {
				State::Ceased => (),
				State::NotApplicable => return Err(ErrorKind::ScMissing(csw.sc_id).into()),
				State::Alive => return Err(ErrorKind::ScNotCeased(csw.sc_id).into()),
			}
		}

		Ok(())
	}

	/// Full gate for the ceased-withdrawal inputs of a transaction,
	/// including the proof oracle.
	pub fn is_csw_applicable(
		&mut self,
		tx: &Transaction,
		verifier: &dyn ProofVerifier,
	) -> Result<(), Error> {
		let mut totals: HashMap<Hash, Amount> = HashMap::new();
		let mut seen: BTreeSet<(Hash, FieldElement)> = BTreeSet::new();

		for csw in &tx.csw_inputs {
			let sc = self
				.get_sidechain(&csw.sc_id)
				.map_err(Error::from)?
				.ok_or_else(|| Error::from(ErrorKind::ScMissing(csw.sc_id)))?;

			if sc.current_state != State::Ceased {
				return Err(ErrorKind::ScNotCeased(csw.sc_id).into());
			}
			let ceased_vk = match &sc.creation_data.ceased_vk {
				Some(vk) => vk.clone(),
				None => return Err(ErrorKind::ScNoCswSupport(csw.sc_id).into()),
			};

			if !seen.insert((csw.sc_id, csw.nullifier))
				|| self
					.have_csw_nullifier(&csw.sc_id, &csw.nullifier)
					.map_err(Error::from)?
			{
				return Err(ErrorKind::CswNullifierReused.into());
			}

			let hashes = self
				.get_cert_data_hashes(&csw.sc_id, csw.epoch)
				.map_err(Error::from)?
				.ok_or_else(|| Error::from(ErrorKind::EpochInvalid(csw.epoch)))?;
			let last_cum = cumulative_hash(&hashes.prev_cumulative_hash, &hashes.cert_data_hash);
			if !verifier.verify_csw(
				&hashes.prev_cumulative_hash,
				&hashes.cert_data_hash,
				&last_cum,
				&ceased_vk,
				csw,
			) {
				return Err(ErrorKind::ProofFailed.into());
			}

			*totals.entry(csw.sc_id).or_insert(0) += csw.value;
		}

		for (sc_id, total) in totals {
			let sc = self
				.get_sidechain(&sc_id)
				.map_err(Error::from)?
				.ok_or_else(|| Error::from(ErrorKind::ScMissing(sc_id)))?;
			if total > sc.balance {
				return Err(ErrorKind::BalanceExceeded.into());
			}
		}
		Ok(())
	}

	/// Full gate for a certificate: epoch window, end-of-epoch block,
	/// state, quality, balance and proof.
	pub fn is_cert_applicable(
		&mut self,
		cert: &Certificate,
		height: i32,
		chain: &dyn ActiveChain,
		verifier: &dyn ProofVerifier,
	) -> Result<(), Error> {
		let sc = self
			.get_sidechain(&cert.sc_id)
			.map_err(Error::from)?
			.ok_or_else(|| Error::from(ErrorKind::ScMissing(cert.sc_id)))?;

		if cert.epoch < 0 || cert.end_epoch_block_hash.is_zero() {
			return Err(ErrorKind::EpochInvalid(cert.epoch).into());
		}
		// no old epochs: only the certified epoch or the one after it
		if cert.epoch != sc.prev_top_epoch && cert.epoch != sc.prev_top_epoch + 1 {
			return Err(ErrorKind::EpochInvalid(cert.epoch).into());
		}

		// the declared end-of-epoch block must be the active chain block
		// at the height the epoch arithmetic derives
		if !chain.contains(&cert.end_epoch_block_hash) {
			return Err(ErrorKind::EndEpochBlockInvalid.into());
		}
		let end_epoch_height = sc.start_height_for_epoch(cert.epoch + 1) - 1;
		if chain.hash_at(end_epoch_height) != Some(cert.end_epoch_block_hash) {
			return Err(ErrorKind::EndEpochBlockInvalid.into());
		}

		// too early: the certified epoch has not ended yet
		if height < sc.start_height_for_epoch(cert.epoch + 1) {
			return Err(ErrorKind::EpochInvalid(cert.epoch).into());
		}

		if sc.current_state != State::Alive {
			return Err(ErrorKind::ScCeased(cert.sc_id).into());
		}

		if !self.check_quality(cert).map_err(Error::from)? {
			return Err(ErrorKind::QualityRejected.into());
		}

		let mut available = sc.balance;
		if cert.epoch == sc.prev_top_epoch {
			// same epoch: the superseded certificate's payout comes back
			available += sc.prev_top_bwt_amount;
		}
		if cert.bwt_total_amount() > available {
			return Err(ErrorKind::BalanceExceeded.into());
		}

		let prev_end_height = sc.start_height_for_epoch(cert.epoch) - 1;
		let prev_end_hash = chain
			.hash_at(prev_end_height)
			.ok_or_else(|| Error::from(ErrorKind::EndEpochBlockInvalid))?;
		if !verifier.verify_certificate(
			sc.creation_data.constant.as_ref(),
			&sc.creation_data.cert_vk,
			&prev_end_hash,
			cert,
		) {
			return Err(ErrorKind::ProofFailed.into());
		}
		Ok(())
	}

	/// Apply the cross-chain sections of a transaction: ceased
	/// withdrawals, then creations, then forward transfers, scheduling the
	/// matching events as it goes.
	pub fn update_sidechain_for_tx(
		&mut self,
		tx: &Transaction,
		block_hash: &Hash,
		height: i32,
	) -> Result<(), Error> {
		let tx_hash = tx.hash();
		let maturity_height = height + self.params().sc_coin_maturity;
		trace!("update_sidechain_for_tx: tx {} at height {}", tx_hash, height);

		// validate every section against the pre-call state before the
		// first mutation
		let mut csw_totals: HashMap<Hash, Amount> = HashMap::new();
		for csw in &tx.csw_inputs {
			if !self.have_sidechain(&csw.sc_id).map_err(Error::from)? {
				return Err(ErrorKind::ScMissing(csw.sc_id).into());
			}
			if self
				.have_csw_nullifier(&csw.sc_id, &csw.nullifier)
				.map_err(Error::from)?
			{
				return Err(ErrorKind::CswNullifierReused.into());
			}
			*csw_totals.entry(csw.sc_id).or_insert(0) += csw.value;
		}
		for (sc_id, total) in &csw_totals {
			let sc = self
				.get_sidechain(sc_id)
				.map_err(Error::from)?
				.ok_or_else(|| Error::from(ErrorKind::ScMissing(*sc_id)))?;
			if *total > sc.balance {
				return Err(ErrorKind::BalanceExceeded.into());
			}
		}
		let mut created_here: BTreeSet<Hash> = BTreeSet::new();
		for sc_out in &tx.sc_creations {
			if created_here.contains(&sc_out.sc_id)
				|| self.have_sidechain(&sc_out.sc_id).map_err(Error::from)?
			{
				return Err(ErrorKind::ScAlreadyExists(sc_out.sc_id).into());
			}
			created_here.insert(sc_out.sc_id);
		}
		for fwd in &tx.fwd_transfers {
			if !created_here.contains(&fwd.sc_id)
				&& !self.have_sidechain(&fwd.sc_id).map_err(Error::from)?
			{
				return Err(ErrorKind::ScMissing(fwd.sc_id).into());
			}
		}

		for csw in &tx.csw_inputs {
			self.modify_sidechain_with(&csw.sc_id, |entry| {
				entry.sidechain.balance -= csw.value;
				assert!(entry.sidechain.balance >= 0, "csw drove balance negative");
				entry.flag = EntryFlag::Dirty;
				Ok(())
			})?;
			self.add_csw_nullifier(csw.sc_id, csw.nullifier);
			debug!(
				"csw: balance of sc {} decreased by {} at height {}",
				csw.sc_id, csw.value, height
			);
		}

		for sc_out in &tx.sc_creations {
			self.modify_sidechain_with(&sc_out.sc_id, |entry| {
				let sc = &mut entry.sidechain;
				*sc = Sidechain::default();
				sc.creation_block_hash = *block_hash;
				sc.creation_block_height = height;
				sc.creation_tx_hash = tx_hash;
				sc.current_state = State::Alive;
				sc.creation_data.withdrawal_epoch_length = sc_out.withdrawal_epoch_length;
				sc.creation_data.custom_data = sc_out.custom_data.clone();
				sc.creation_data.constant = sc_out.constant;
				sc.creation_data.cert_vk = sc_out.cert_vk.clone();
				sc.creation_data.ceased_vk = sc_out.ceased_vk.clone();
				sc.immature_amounts.insert(maturity_height, sc_out.value);
				entry.flag = EntryFlag::Fresh;
				Ok(())
			})?;
			self.schedule_creation_event(sc_out, height)?;
			debug!("sidechain {} created at height {}", sc_out.sc_id, height);
		}

		for fwd in &tx.fwd_transfers {
			self.modify_sidechain_with(&fwd.sc_id, |entry| {
				*entry
					.sidechain
					.immature_amounts
					.entry(maturity_height)
					.or_insert(0) += fwd.value;
				if entry.flag != EntryFlag::Fresh {
					entry.flag = EntryFlag::Dirty;
				}
				Ok(())
			})?;
			self.schedule_forward_event(fwd, height)?;
			debug!(
				"forward transfer of {} to sc {} matures at height {}",
				fwd.value, fwd.sc_id, maturity_height
			);
		}

		Ok(())
	}

	fn decrement_immature_amount(
		&mut self,
		sc_id: &Hash,
		value: Amount,
		maturity_height: i32,
	) -> Result<(), Error> {
		self.modify_sidechain_with(sc_id, |entry| {
			let amounts = &mut entry.sidechain.immature_amounts;
			let current = match amounts.get_mut(&maturity_height) {
				Some(current) => current,
				None => return Err(ErrorKind::ImmatureAmountMissing(maturity_height).into()),
			};
			if *current < value {
				return Err(ErrorKind::BalanceExceeded.into());
			}
			*current -= value;
			if *current == 0 {
				amounts.remove(&maturity_height);
			}
			entry.flag = EntryFlag::Dirty;
			Ok(())
		})
	}

	/// Undo the cross-chain sections of a transaction, mirror order of
	/// `update_sidechain_for_tx`.
	pub fn revert_tx_outputs(&mut self, tx: &Transaction, height: i32) -> Result<(), Error> {
		let maturity_height = height + self.params().sc_coin_maturity;

		// forward transfers first
		for fwd in &tx.fwd_transfers {
			if !self.have_sidechain(&fwd.sc_id).map_err(Error::from)? {
				return Err(ErrorKind::ScMissing(fwd.sc_id).into());
			}
			self.cancel_forward_event(fwd, height)?;
			self.decrement_immature_amount(&fwd.sc_id, fwd.value, maturity_height)?;
		}

		// then the sidechains the transaction created
		for sc_out in &tx.sc_creations {
			if !self.have_sidechain(&sc_out.sc_id).map_err(Error::from)? {
				return Err(ErrorKind::ScMissing(sc_out.sc_id).into());
			}
			self.cancel_creation_event(sc_out, height)?;
			self.decrement_immature_amount(&sc_out.sc_id, sc_out.value, maturity_height)?;
			self.modify_sidechain_with(&sc_out.sc_id, |entry| {
				if entry.sidechain.balance > 0 {
					return Err(ErrorKind::InternalAssertion(
						"reverting creation of sidechain with residual balance".into(),
					)
					.into());
				}
				entry.flag = EntryFlag::Erased;
				Ok(())
			})?;
			debug!("sidechain {} removed on revert", sc_out.sc_id);
		}

		// finally give the withdrawn amounts back
		for csw in &tx.csw_inputs {
			if !self.have_sidechain(&csw.sc_id).map_err(Error::from)? {
				return Err(ErrorKind::ScMissing(csw.sc_id).into());
			}
			self.modify_sidechain_with(&csw.sc_id, |entry| {
				entry.sidechain.balance += csw.value;
				entry.flag = EntryFlag::Dirty;
				Ok(())
			})?;
			self.remove_csw_nullifier(csw.sc_id, csw.nullifier);
		}

		Ok(())
	}

	/// Apply a block-top-quality certificate: record the undo quadruple,
	/// move the balance, install the new top quality and reschedule the
	/// ceasing when the certificate opens a new epoch.
	pub fn update_sidechain_for_cert(
		&mut self,
		cert: &Certificate,
		undo: &mut BlockUndo,
	) -> Result<(), Error> {
		let cert_hash = cert.hash();
		let bwt_total = cert.bwt_total_amount();
		trace!("update_sidechain_for_cert: cert {}", cert_hash);

		let sc = self
			.get_sidechain(&cert.sc_id)
			.map_err(Error::from)?
			.ok_or_else(|| Error::from(ErrorKind::ScMissing(cert.sc_id)))?;

		let new_epoch = if cert.epoch == sc.prev_top_epoch + 1 {
			if sc.balance < bwt_total {
				return Err(ErrorKind::BalanceExceeded.into());
			}
			true
		} else if cert.epoch == sc.prev_top_epoch {
			if cert.quality <= sc.prev_top_quality {
				return Err(ErrorKind::QualityRejected.into());
			}
			if sc.balance + sc.prev_top_bwt_amount < bwt_total {
				return Err(ErrorKind::BalanceExceeded.into());
			}
			false
		} else {
			return Err(ErrorKind::EpochInvalid(cert.epoch).into());
		};

		// one state update per block and sidechain, top quality cert only
		let undo_entry = undo.entry(&cert.sc_id);
		assert!(
			!undo_entry.sections.contains(UndoSections::SIDECHAIN_STATE),
			"second certificate state update for one sidechain in a block"
		);
		undo_entry.prev_top_epoch = sc.prev_top_epoch;
		undo_entry.prev_top_hash = sc.prev_top_hash;
		undo_entry.prev_top_quality = sc.prev_top_quality;
		undo_entry.prev_top_bwt_amount = sc.prev_top_bwt_amount;
		undo_entry.sections |= UndoSections::SIDECHAIN_STATE;

		self.modify_sidechain_with(&cert.sc_id, |entry| {
			let sc = &mut entry.sidechain;
			if new_epoch {
				sc.balance -= bwt_total;
				sc.prev_top_epoch = cert.epoch;
			} else {
				// give the superseded certificate's payout back before
				// taking this one's
				sc.balance += sc.prev_top_bwt_amount;
				sc.balance -= bwt_total;
			}
			sc.prev_top_hash = cert_hash;
			sc.prev_top_quality = cert.quality;
			sc.prev_top_bwt_amount = bwt_total;
			entry.flag = EntryFlag::Dirty;
			Ok(())
		})?;
		debug!(
			"cert {} is top quality for sc {} epoch {} (q={})",
			cert_hash, cert.sc_id, cert.epoch, cert.quality
		);

		if new_epoch {
			self.schedule_cert_event(cert)?;
		}
		Ok(())
	}

	/// Revert the state update of a block-top-quality certificate using
	/// the recorded undo quadruple.
	pub fn restore_sidechain_from_cert(
		&mut self,
		cert: &Certificate,
		undo: &SidechainUndo,
	) -> Result<(), Error> {
		let cert_hash = cert.hash();
		let bwt_total = cert.bwt_total_amount();

		let sc = self
			.get_sidechain(&cert.sc_id)
			.map_err(Error::from)?
			.ok_or_else(|| Error::from(ErrorKind::ScMissing(cert.sc_id)))?;

		// only the recorded top quality certificate may be reverted
		assert!(
			sc.prev_top_hash == cert_hash,
			"reverting a certificate that is not the recorded top quality"
		);
		assert!(
			undo.sections.contains(UndoSections::SIDECHAIN_STATE),
			"undo record carries no certificate state"
		);

		let same_epoch = cert.epoch == undo.prev_top_epoch;
		if same_epoch {
			assert!(
				cert.quality > undo.prev_top_quality,
				"recorded superseded certificate has higher quality"
			);
		} else if cert.epoch == undo.prev_top_epoch + 1 {
			self.cancel_cert_event(cert)?;
		}

		self.modify_sidechain_with(&cert.sc_id, |entry| {
			let sc = &mut entry.sidechain;
			sc.balance += bwt_total;
			if same_epoch {
				// a superseded lower quality certificate comes back into
				// effect, its payout leaves the balance again
				sc.balance -= undo.prev_top_bwt_amount;
			}
			sc.prev_top_epoch = undo.prev_top_epoch;
			sc.prev_top_hash = undo.prev_top_hash;
			sc.prev_top_quality = undo.prev_top_quality;
			sc.prev_top_bwt_amount = undo.prev_top_bwt_amount;
			entry.flag = EntryFlag::Dirty;
			Ok(())
		})
	}

	/// Null every backward transfer output of a certificate's coin,
	/// recording each nulled slot verbatim. The coin header fields ride on
	/// the last record when the coin drains completely, so a fully pruned
	/// coin can be rebuilt.
	pub fn nullify_backward_transfers(
		&mut self,
		cert_hash: &Hash,
		nullified: &mut Vec<OutputUndo>,
	) -> Result<(), Error> {
		if cert_hash.is_zero() {
			return Ok(());
		}
		if !self.have_coin(cert_hash).map_err(Error::from)? {
			// a certificate with neither backward transfers nor change
			// never produced a coin
			return Ok(());
		}

		let mut coins = self.modify_coin(cert_hash)?;
		assert!(
			coins.bwt_maturity_height != 0,
			"nullifying backward transfers of a non-certificate coin"
		);
		let mut pos = coins.first_bwt_pos as usize;
		while pos < coins.outputs.len() {
			nullified.push(OutputUndo::new(coins.outputs[pos].clone()));
			coins.spend(pos);
			if coins.outputs.is_empty() {
				let meta = CoinMeta {
					is_coinbase: coins.is_coinbase,
					height: coins.height,
					version: coins.version,
					first_bwt_pos: coins.first_bwt_pos,
					bwt_maturity_height: coins.bwt_maturity_height,
				};
				let last = nullified.last_mut().expect("undo entry just pushed");
				last.coin_meta = Some(meta);
			}
			pos += 1;
		}
		Ok(())
	}

	/// Rebuild the backward transfer outputs of a certificate's coin from
	/// the undo records, last first, rehydrating a fully pruned coin from
	/// the recorded header fields.
	pub fn restore_backward_transfers(
		&mut self,
		cert_hash: &Hash,
		outs_to_restore: &[OutputUndo],
	) -> Result<(), Error> {
		let mut clean = true;
		let mut coins = self.modify_coin(cert_hash)?;

		for idx in (0..outs_to_restore.len()).rev() {
			let undo = &outs_to_restore[idx];
			if let Some(meta) = &undo.coin_meta {
				coins.is_coinbase = meta.is_coinbase;
				coins.height = meta.height;
				coins.version = meta.version;
				coins.first_bwt_pos = meta.first_bwt_pos;
				coins.bwt_maturity_height = meta.bwt_maturity_height;
			} else if coins.is_pruned() {
				warn!(
					"restore of cert {} output {} into missing coin",
					cert_hash, idx
				);
				clean = false;
			}
			if coins.first_bwt_pos == crate::core::core::certificate::NO_BWT {
				warn!("restore of cert {} with no backward transfer base", cert_hash);
				clean = false;
				continue;
			}
			let pos = coins.first_bwt_pos as usize + idx;
			if coins.is_available(pos) {
				warn!(
					"restore of cert {} overwriting existing output {}",
					cert_hash, pos
				);
				clean = false;
			}
			if coins.outputs.len() < pos + 1 {
				coins.outputs.resize(pos + 1, None);
			}
			coins.outputs[pos] = undo.output.clone();
		}
		drop(coins);

		if clean {
			Ok(())
		} else {
			Err(ErrorKind::InternalAssertion("inconsistent backward transfer undo".into()).into())
		}
	}

	/// Schedule the maturation and first ceasing of a freshly created
	/// sidechain.
	pub fn schedule_creation_event(
		&mut self,
		sc_out: &ScCreationOutput,
		creation_height: i32,
	) -> Result<(), Error> {
		let sc = self
			.get_sidechain(&sc_out.sc_id)
			.map_err(Error::from)?
			.ok_or_else(|| Error::from(ErrorKind::ScMissing(sc_out.sc_id)))?;

		let maturity_height = creation_height + self.params().sc_coin_maturity;
		let sc_id = sc_out.sc_id;
		self.modify_events_with(maturity_height, |entry| {
			entry.events.maturing.insert(sc_id);
			if entry.flag != EntryFlag::Fresh {
				entry.flag = EntryFlag::Dirty;
			}
			Ok(())
		})?;
		trace!(
			"sc {}: creation amount matures at height {}",
			sc_id,
			maturity_height
		);

		let ceasing_height = sc.start_height_for_epoch(1) + sc.safeguard_margin();
		self.modify_events_with(ceasing_height, |entry| {
			entry.events.ceasing.insert(sc_id);
			if entry.flag != EntryFlag::Fresh {
				entry.flag = EntryFlag::Dirty;
			}
			Ok(())
		})?;
		trace!("sc {}: first ceasing height {}", sc_id, ceasing_height);
		Ok(())
	}

	/// Schedule the maturation of a forward transfer.
	pub fn schedule_forward_event(
		&mut self,
		fwd: &ForwardTransferOutput,
		fwd_height: i32,
	) -> Result<(), Error> {
		if !self.have_sidechain(&fwd.sc_id).map_err(Error::from)? {
			return Err(ErrorKind::ScMissing(fwd.sc_id).into());
		}
		let maturity_height = fwd_height + self.params().sc_coin_maturity;
		let sc_id = fwd.sc_id;
		self.modify_events_with(maturity_height, |entry| {
			entry.events.maturing.insert(sc_id);
			if entry.flag != EntryFlag::Fresh {
				entry.flag = EntryFlag::Dirty;
			}
			Ok(())
		})
	}

	/// Move the ceasing of a sidechain one epoch further out: the
	/// certificate bought it another epoch of life. At the time of the
	/// call the sidechain is scheduled at exactly one of the two heights.
	pub fn schedule_cert_event(&mut self, cert: &Certificate) -> Result<(), Error> {
		let sc = self
			.get_sidechain(&cert.sc_id)
			.map_err(Error::from)?
			.ok_or_else(|| Error::from(ErrorKind::ScMissing(cert.sc_id)))?;

		let cur_ceasing = sc.start_height_for_epoch(cert.epoch + 1) + sc.safeguard_margin();
		let next_ceasing = cur_ceasing + sc.creation_data.withdrawal_epoch_length;
		let sc_id = cert.sc_id;

		if !self.have_sidechain_events(cur_ceasing).map_err(Error::from)? {
			if !self
				.have_sidechain_events(next_ceasing)
				.map_err(Error::from)?
			{
				return Err(ErrorKind::InternalAssertion(format!(
					"sc {} scheduled at neither ceasing height {} nor {}",
					sc_id, cur_ceasing, next_ceasing
				))
				.into());
			}
			// already moved by an earlier certificate of this epoch
			return Ok(());
		}

		self.modify_events_with(cur_ceasing, |entry| {
			entry.events.ceasing.remove(&sc_id);
			entry.flag = if entry.events.is_null() {
				EntryFlag::Erased
			} else {
				EntryFlag::Dirty
			};
			Ok(())
		})?;
		self.modify_events_with(next_ceasing, |entry| {
			entry.events.ceasing.insert(sc_id);
			if entry.flag != EntryFlag::Fresh {
				entry.flag = EntryFlag::Dirty;
			}
			Ok(())
		})?;
		trace!(
			"sc {}: cert {} moves ceasing from {} to {}",
			sc_id,
			cert.hash(),
			cur_ceasing,
			next_ceasing
		);
		Ok(())
	}

	/// Undo the event schedule of a sidechain creation.
	pub fn cancel_creation_event(
		&mut self,
		sc_out: &ScCreationOutput,
		creation_height: i32,
	) -> Result<(), Error> {
		let sc = self
			.get_sidechain(&sc_out.sc_id)
			.map_err(Error::from)?
			.ok_or_else(|| Error::from(ErrorKind::ScMissing(sc_out.sc_id)))?;

		let maturity_height = creation_height + self.params().sc_coin_maturity;
		let sc_id = sc_out.sc_id;
		if self
			.have_sidechain_events(maturity_height)
			.map_err(Error::from)?
		{
			self.modify_events_with(maturity_height, |entry| {
				entry.events.maturing.remove(&sc_id);
				entry.flag = if entry.events.is_null() {
					EntryFlag::Erased
				} else {
					EntryFlag::Dirty
				};
				Ok(())
			})?;
		}

		let ceasing_height = sc.start_height_for_epoch(1) + sc.safeguard_margin();
		if !self
			.have_sidechain_events(ceasing_height)
			.map_err(Error::from)?
		{
			return Err(ErrorKind::InternalAssertion(format!(
				"sc {} missing its first ceasing height {}",
				sc_id, ceasing_height
			))
			.into());
		}
		self.modify_events_with(ceasing_height, |entry| {
			entry.events.ceasing.remove(&sc_id);
			entry.flag = if entry.events.is_null() {
				EntryFlag::Erased
			} else {
				EntryFlag::Dirty
			};
			Ok(())
		})
	}

	/// Undo the event schedule of a forward transfer. The entry may be
	/// gone already when several transfers shared the maturity height.
	pub fn cancel_forward_event(
		&mut self,
		fwd: &ForwardTransferOutput,
		fwd_height: i32,
	) -> Result<(), Error> {
		let maturity_height = fwd_height + self.params().sc_coin_maturity;
		if !self
			.have_sidechain_events(maturity_height)
			.map_err(Error::from)?
		{
			return Ok(());
		}
		let sc_id = fwd.sc_id;
		self.modify_events_with(maturity_height, |entry| {
			entry.events.maturing.remove(&sc_id);
			entry.flag = if entry.events.is_null() {
				EntryFlag::Erased
			} else {
				EntryFlag::Dirty
			};
			Ok(())
		})
	}

	/// Undo the ceasing reschedule of a certificate, moving the sidechain
	/// back to the previous ceasing height.
	pub fn cancel_cert_event(&mut self, cert: &Certificate) -> Result<(), Error> {
		let sc = self
			.get_sidechain(&cert.sc_id)
			.map_err(Error::from)?
			.ok_or_else(|| Error::from(ErrorKind::ScMissing(cert.sc_id)))?;

		let cur_ceasing = sc.start_height_for_epoch(cert.epoch + 2) + sc.safeguard_margin();
		let prev_ceasing = cur_ceasing - sc.creation_data.withdrawal_epoch_length;
		let sc_id = cert.sc_id;

		if !self.have_sidechain_events(cur_ceasing).map_err(Error::from)? {
			if !self
				.have_sidechain_events(prev_ceasing)
				.map_err(Error::from)?
			{
				return Err(ErrorKind::InternalAssertion(format!(
					"sc {} scheduled at neither ceasing height {} nor {}",
					sc_id, cur_ceasing, prev_ceasing
				))
				.into());
			}
			// already restored by an earlier revert of this epoch
			return Ok(());
		}

		self.modify_events_with(cur_ceasing, |entry| {
			entry.events.ceasing.remove(&sc_id);
			entry.flag = if entry.events.is_null() {
				EntryFlag::Erased
			} else {
				EntryFlag::Dirty
			};
			Ok(())
		})?;
		self.modify_events_with(prev_ceasing, |entry| {
			entry.events.ceasing.insert(sc_id);
			if entry.flag != EntryFlag::Fresh {
				entry.flag = EntryFlag::Dirty;
			}
			Ok(())
		})
	}

	/// Run the schedule for one height, after the block's transactions and
	/// certificates have been applied: matured amounts enter balances,
	/// overdue sidechains cease and their top certificate's backward
	/// transfers are voided.
	pub fn handle_sidechain_events(
		&mut self,
		height: i32,
		undo: &mut BlockUndo,
		cert_updates: &mut Vec<CertStatusUpdate>,
	) -> Result<(), Error> {
		if !self.have_sidechain_events(height).map_err(Error::from)? {
			return Ok(());
		}
		let events = self
			.get_sidechain_events(height)
			.map_err(Error::from)?
			.expect("events entry just checked");

		for sc_id in &events.maturing {
			assert!(
				self.have_sidechain(sc_id).map_err(Error::from)?,
				"maturing event for unknown sidechain"
			);
			let undo_entry = undo.entry(sc_id);
			self.modify_sidechain_with(sc_id, |entry| {
				let sc = &mut entry.sidechain;
				let amount = match sc.immature_amounts.remove(&height) {
					Some(amount) => amount,
					None => return Err(ErrorKind::ImmatureAmountMissing(height).into()),
				};
				sc.balance += amount;
				undo_entry.applied_matured_amount = amount;
				undo_entry.sections |= UndoSections::MATURED_AMOUNTS;
				entry.flag = EntryFlag::Dirty;
				debug!(
					"sc {}: {} matured at height {}, balance now {}",
					sc_id, amount, height, sc.balance
				);
				Ok(())
			})?;
		}

		for sc_id in &events.ceasing {
			let sc = self
				.get_sidechain(sc_id)
				.map_err(Error::from)?
				.ok_or_else(|| Error::from(ErrorKind::ScMissing(*sc_id)))?;

			self.modify_sidechain_with(sc_id, |entry| {
				entry.sidechain.current_state = State::Ceased;
				entry.flag = EntryFlag::Dirty;
				Ok(())
			})?;
			debug!("sc {} ceased at height {}", sc_id, height);

			undo.entry(sc_id).sections |= UndoSections::CEASED_CERTIFICATE_DATA;
			if sc.prev_top_epoch == EPOCH_NULL {
				assert!(
					sc.prev_top_hash.is_zero(),
					"null epoch with recorded certificate"
				);
				continue;
			}

			let mut nullified = vec![];
			self.nullify_backward_transfers(&sc.prev_top_hash, &mut nullified)?;
			undo.entry(sc_id).ceased_bwts = nullified;
			cert_updates.push(CertStatusUpdate {
				sc_id: *sc_id,
				cert_hash: sc.prev_top_hash,
				epoch: sc.prev_top_epoch,
				quality: sc.prev_top_quality,
				state: BwtState::Off,
			});
		}

		self.modify_events_with(height, |entry| {
			entry.flag = EntryFlag::Erased;
			Ok(())
		})
	}

	/// Revert one height's worth of scheduled events from the undo:
	/// un-cease first, then un-mature, then re-create the schedule entry.
	pub fn revert_sidechain_events(
		&mut self,
		undo: &BlockUndo,
		height: i32,
		cert_updates: &mut Vec<CertStatusUpdate>,
	) -> Result<(), Error> {
		if self.have_sidechain_events(height).map_err(Error::from)? {
			return Err(ErrorKind::InternalAssertion(format!(
				"recreating sidechain events at height {} over an existing entry",
				height
			))
			.into());
		}

		let mut recreated = crate::sidechain::SidechainEvents::default();

		// ceased sidechains come back to life and their top certificate's
		// backward transfers come back with them
		for (sc_id, sc_undo) in &undo.sc_undo {
			if !sc_undo
				.sections
				.contains(UndoSections::CEASED_CERTIFICATE_DATA)
			{
				continue;
			}
			let sc = self
				.get_sidechain(sc_id)
				.map_err(Error::from)?
				.ok_or_else(|| Error::from(ErrorKind::ScMissing(*sc_id)))?;

			if sc.prev_top_epoch != EPOCH_NULL {
				self.restore_backward_transfers(&sc.prev_top_hash, &sc_undo.ceased_bwts)?;
				cert_updates.push(CertStatusUpdate {
					sc_id: *sc_id,
					cert_hash: sc.prev_top_hash,
					epoch: sc.prev_top_epoch,
					quality: sc.prev_top_quality,
					state: BwtState::On,
				});
			}

			recreated.ceasing.insert(*sc_id);
			self.modify_sidechain_with(sc_id, |entry| {
				entry.sidechain.current_state = State::Alive;
				entry.flag = EntryFlag::Dirty;
				Ok(())
			})?;
		}

		// matured amounts go back to the immature ledger
		for (sc_id, sc_undo) in &undo.sc_undo {
			if !sc_undo.sections.contains(UndoSections::MATURED_AMOUNTS) {
				continue;
			}
			if !self.have_sidechain(sc_id).map_err(Error::from)? {
				return Err(ErrorKind::ScMissing(*sc_id).into());
			}
			let amount = sc_undo.applied_matured_amount;
			if amount > 0 {
				self.modify_sidechain_with(sc_id, |entry| {
					let sc = &mut entry.sidechain;
					if sc.balance < amount {
						return Err(ErrorKind::BalanceExceeded.into());
					}
					*sc.immature_amounts.entry(height).or_insert(0) += amount;
					sc.balance -= amount;
					entry.flag = EntryFlag::Dirty;
					Ok(())
				})?;
			}
			recreated.maturing.insert(*sc_id);
		}

		if !recreated.is_null() {
			self.modify_events_with(height, |entry| {
				entry.events = recreated;
				entry.flag = EntryFlag::Fresh;
				Ok(())
			})?;
		}
		Ok(())
	}

	/// Record the certificate data hash of a sidechain epoch, folding the
	/// previous epoch into the cumulative chain when the epoch is new.
	pub fn update_cert_data_hash(
		&mut self,
		sc_id: &Hash,
		epoch: i32,
		cert_data_hash: FieldElement,
		undo: &mut BlockUndo,
	) -> Result<(), Error> {
		assert!(
			self.have_sidechain(sc_id).map_err(Error::from)?,
			"cert data update for unknown sidechain"
		);
		if self.have_cert_data_hashes(sc_id, epoch)? {
			let undo_entry = undo.entry(sc_id);
			let entry = self
				.cert_data_entry_mut(sc_id, epoch)
				.expect("cert data entry just checked");
			undo_entry.prev_cert_data_hash = entry.hashes.cert_data_hash;
			undo_entry.sections |= UndoSections::CERT_DATA_HASH;
			entry.hashes.cert_data_hash = cert_data_hash;
			entry.flag = EntryFlag::Dirty;
			return Ok(());
		}

		let prev_cumulative = match self
			.get_cert_data_hashes(sc_id, epoch - 1)
			.map_err(Error::from)?
		{
			Some(prev) => cumulative_hash(&prev.prev_cumulative_hash, &prev.cert_data_hash),
			None => FieldElement::default(),
		};
		self.insert_cert_data(
			*sc_id,
			epoch,
			CertDataEntry {
				hashes: crate::sidechain::CertDataHashes {
					cert_data_hash,
					prev_cumulative_hash: prev_cumulative,
				},
				flag: EntryFlag::Fresh,
			},
		);
		Ok(())
	}

	/// Revert the certificate data hash of a sidechain epoch from the
	/// undo record, erasing the entry when this block introduced it.
	pub fn restore_cert_data_hash(
		&mut self,
		sc_id: &Hash,
		epoch: i32,
		undo: &BlockUndo,
	) -> Result<(), Error> {
		assert!(
			self.have_cert_data_hashes(sc_id, epoch)?,
			"cert data restore for unknown entry"
		);
		let recorded = undo
			.sc_undo
			.get(sc_id)
			.filter(|entry| entry.sections.contains(UndoSections::CERT_DATA_HASH))
			.map(|entry| entry.prev_cert_data_hash);
		let entry = self
			.cert_data_entry_mut(sc_id, epoch)
			.expect("cert data entry just checked");
		match recorded {
			Some(prev_hash) => {
				entry.hashes.cert_data_hash = prev_hash;
				entry.flag = EntryFlag::Dirty;
			}
			None => {
				entry.flag = EntryFlag::Erased;
			}
		}
		Ok(())
	}
}
