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

//! Sidechain lifecycle: creation, transfers, certificates, scheduled
//! events, and the undo paths mirroring every one of them.

mod common;

use self::core::core::certificate::EPOCH_NULL;
use self::core::core::hash::{FieldElement, Hash, Hashed};
use sable_chain::sidechain::State;
use sable_chain::store::{BackingView, NullView};
use sable_chain::types::OkProofVerifier;
use sable_chain::undo::BlockUndo;
use sable_chain::{CacheView, ErrorKind};
use sable_core as core;

use crate::common::*;

fn sc_id() -> Hash {
	42u64.hash()
}

#[test]
fn same_epoch_cert_upgrade_and_rejection() {
	let _ = env_logger::try_init();
	let prev_hash = 0xddu64.hash();
	let mut base = NullView::default();
	let mut view = CacheView::new(&mut base, params());
	seed_sidechain(
		&mut view,
		sc_id(),
		sidechain_with_top_cert(1, 10, 10, 12, prev_hash, 100, 0),
	);

	// a same-epoch certificate of higher quality supersedes
	let c1 = cert_with_bwts(sc_id(), 12, 200, &[4]);
	assert!(view.check_quality(&c1).unwrap());
	let mut undo = BlockUndo::default();
	view.update_sidechain_for_cert(&c1, &mut undo).unwrap();

	let sc = view.get_sidechain(&sc_id()).unwrap().unwrap();
	assert_eq!(sc.balance, 6);
	assert_eq!(sc.prev_top_hash, c1.hash());
	assert_eq!(sc.prev_top_quality, 200);
	assert_eq!(sc.prev_top_bwt_amount, 4);

	// a lower quality one for the same epoch is rejected outright and
	// leaves no trace
	let c2 = cert_with_bwts(sc_id(), 12, 50, &[1]);
	assert!(!view.check_quality(&c2).unwrap());
	let mut undo2 = BlockUndo::default();
	let err = view
		.update_sidechain_for_cert(&c2, &mut undo2)
		.unwrap_err();
	assert_eq!(err.kind(), ErrorKind::QualityRejected);
	let sc = view.get_sidechain(&sc_id()).unwrap().unwrap();
	assert_eq!(sc.balance, 6);
	assert_eq!(sc.prev_top_hash, c1.hash());

	// reverting the upgrade restores the previous top verbatim
	view.restore_sidechain_from_cert(&c1, &undo.sc_undo[&sc_id()])
		.unwrap();
	let sc = view.get_sidechain(&sc_id()).unwrap().unwrap();
	assert_eq!(sc.balance, 10);
	assert_eq!(sc.prev_top_epoch, 12);
	assert_eq!(sc.prev_top_hash, prev_hash);
	assert_eq!(sc.prev_top_quality, 100);
	assert_eq!(sc.prev_top_bwt_amount, 0);
}

#[test]
fn creation_applies_and_reverts() {
	let mut base = NullView::default();
	let mut view = CacheView::new(&mut base, params());
	let tx = creation_tx(sc_id(), 10, 5);
	let block = 100u64.hash();

	view.update_sidechain_for_tx(&tx, &block, 100).unwrap();

	let sc = view.get_sidechain(&sc_id()).unwrap().unwrap();
	assert_eq!(sc.current_state, State::Alive);
	assert_eq!(sc.creation_block_hash, block);
	assert_eq!(sc.creation_block_height, 100);
	assert_eq!(sc.balance, 0);
	assert_eq!(sc.immature_amounts[&(100 + SC_COIN_MATURITY)], 10);

	// maturation scheduled after the maturity delay, ceasing at the first
	// epoch's safeguard (epoch length 5, margin 1)
	let maturing = view
		.get_sidechain_events(100 + SC_COIN_MATURITY)
		.unwrap()
		.unwrap();
	assert!(maturing.maturing.contains(&sc_id()));
	let ceasing = view.get_sidechain_events(106).unwrap().unwrap();
	assert!(ceasing.ceasing.contains(&sc_id()));

	view.revert_tx_outputs(&tx, 100).unwrap();
	assert!(!view.have_sidechain(&sc_id()).unwrap());
	assert!(!view
		.have_sidechain_events(100 + SC_COIN_MATURITY)
		.unwrap());
	assert!(!view.have_sidechain_events(106).unwrap());
}

#[test]
fn duplicate_creation_rejected() {
	let mut base = NullView::default();
	let mut view = CacheView::new(&mut base, params());
	let tx = creation_tx(sc_id(), 10, 5);
	view.update_sidechain_for_tx(&tx, &1u64.hash(), 100).unwrap();

	let err = view
		.update_sidechain_for_tx(&creation_tx(sc_id(), 4, 7), &2u64.hash(), 101)
		.unwrap_err();
	assert_eq!(err.kind(), ErrorKind::ScAlreadyExists(sc_id()));

	let err = view
		.update_sidechain_for_tx(&fwd_tx(77u64.hash(), 4), &2u64.hash(), 101)
		.unwrap_err();
	assert_eq!(err.kind(), ErrorKind::ScMissing(77u64.hash()));
}

#[test]
fn full_maturity_cycle_conserves_amounts() {
	let mut base = NullView::default();
	let mut view = CacheView::new(&mut base, params());
	view.update_sidechain_for_tx(&creation_tx(sc_id(), 10, 11), &5u64.hash(), 5)
		.unwrap();
	view.update_sidechain_for_tx(&fwd_tx(sc_id(), 200), &20u64.hash(), 20)
		.unwrap();

	let conserved = |view: &mut CacheView<'_>| {
		let sc = view.get_sidechain(&sc_id()).unwrap().unwrap();
		sc.balance + sc.immature_amounts.values().sum::<i64>()
	};
	assert_eq!(conserved(&mut view), 210);

	let mut updates = vec![];
	let mut undo1 = BlockUndo::default();
	view.handle_sidechain_events(5 + SC_COIN_MATURITY, &mut undo1, &mut updates)
		.unwrap();
	let sc = view.get_sidechain(&sc_id()).unwrap().unwrap();
	assert_eq!(sc.balance, 10);
	assert_eq!(conserved(&mut view), 210);

	let mut undo2 = BlockUndo::default();
	view.handle_sidechain_events(20 + SC_COIN_MATURITY, &mut undo2, &mut updates)
		.unwrap();
	let sc = view.get_sidechain(&sc_id()).unwrap().unwrap();
	assert_eq!(sc.balance, 210);
	assert!(sc.immature_amounts.is_empty());
	assert!(updates.is_empty());

	// reverting the second maturation puts the amount back into the
	// immature ledger and recreates the schedule entry
	view.revert_sidechain_events(&undo2, 20 + SC_COIN_MATURITY, &mut updates)
		.unwrap();
	let sc = view.get_sidechain(&sc_id()).unwrap().unwrap();
	assert_eq!(sc.balance, 10);
	assert_eq!(sc.immature_amounts[&(20 + SC_COIN_MATURITY)], 200);
	let events = view
		.get_sidechain_events(20 + SC_COIN_MATURITY)
		.unwrap()
		.unwrap();
	assert!(events.maturing.contains(&sc_id()));
	assert_eq!(conserved(&mut view), 210);
}

#[test]
fn ceasing_voids_top_cert_and_revert_rebuilds_coin() {
	let mut base = NullView::default();
	let mut view = CacheView::new(&mut base, params());

	// sidechain created at height 5 with epoch length 10: first ceasing
	// at 5 + 10 + 2 = 17
	view.update_sidechain_for_tx(&creation_tx(sc_id(), 10, 10), &5u64.hash(), 5)
		.unwrap();
	let mut undo_mature = BlockUndo::default();
	let mut updates = vec![];
	view.handle_sidechain_events(5 + SC_COIN_MATURITY, &mut undo_mature, &mut updates)
		.unwrap();

	// the epoch 0 certificate moves the ceasing to 27 and its coin holds
	// two backward transfers maturing after that
	let cert = cert_with_bwts(sc_id(), 0, 1, &[3, 7]);
	let mut undo_cert = BlockUndo::default();
	view.update_sidechain_for_cert(&cert, &mut undo_cert).unwrap();
	store_cert_coin(&mut view, &cert, 15, 29);
	assert!(!view.have_sidechain_events(17).unwrap());
	assert!(view.have_sidechain_events(27).unwrap());

	let coin_before = view.get_coin(&cert.hash()).unwrap().unwrap();

	// no epoch 1 certificate arrives: at height 27 the sidechain ceases
	// and the certificate's backward transfers are nulled
	let mut undo_cease = BlockUndo::default();
	view.handle_sidechain_events(27, &mut undo_cease, &mut updates)
		.unwrap();
	assert_eq!(view.sidechain_state(&sc_id()).unwrap(), State::Ceased);
	let coin = view.get_coin(&cert.hash()).unwrap().unwrap();
	assert!(coin.is_available(0));
	assert!(!coin.is_available(1));
	assert!(!coin.is_available(2));
	assert_eq!(updates.len(), 1);
	assert_eq!(updates[0].cert_hash, cert.hash());

	let recorded = &undo_cease.sc_undo[&sc_id()].ceased_bwts;
	assert_eq!(recorded.len(), 2);
	assert_eq!(recorded[0].output.as_ref().unwrap().value, 3);
	assert_eq!(recorded[1].output.as_ref().unwrap().value, 7);

	// reverting the event rebuilds the coin byte for byte and revives the
	// sidechain
	let mut revert_updates = vec![];
	view.revert_sidechain_events(&undo_cease, 27, &mut revert_updates)
		.unwrap();
	assert_eq!(view.sidechain_state(&sc_id()).unwrap(), State::Alive);
	let coin_after = view.get_coin(&cert.hash()).unwrap().unwrap();
	assert_eq!(coin_before, coin_after);
	let events = view.get_sidechain_events(27).unwrap().unwrap();
	assert!(events.ceasing.contains(&sc_id()));
}

#[test]
fn ceasing_rebuilds_fully_pruned_coin() {
	let mut base = NullView::default();
	let mut view = CacheView::new(&mut base, params());
	view.update_sidechain_for_tx(&creation_tx(sc_id(), 20, 10), &5u64.hash(), 5)
		.unwrap();
	let mut updates = vec![];
	let mut undo = BlockUndo::default();
	view.handle_sidechain_events(5 + SC_COIN_MATURITY, &mut undo, &mut updates)
		.unwrap();

	// a certificate with only backward transfers: voiding them prunes the
	// coin away entirely
	let cert = pure_bwt_cert(sc_id(), 0, 1, &[4, 6]);
	let mut undo_cert = BlockUndo::default();
	view.update_sidechain_for_cert(&cert, &mut undo_cert).unwrap();
	store_cert_coin(&mut view, &cert, 15, 29);
	let coin_before = view.get_coin(&cert.hash()).unwrap().unwrap();

	let mut undo_cease = BlockUndo::default();
	view.handle_sidechain_events(27, &mut undo_cease, &mut updates)
		.unwrap();
	assert!(!view.have_coin(&cert.hash()).unwrap());
	let recorded = &undo_cease.sc_undo[&sc_id()].ceased_bwts;
	assert_eq!(recorded.len(), 2);
	// the drained coin's header rides on the last recorded output
	assert!(recorded[1].coin_meta.is_some());

	let mut revert_updates = vec![];
	view.revert_sidechain_events(&undo_cease, 27, &mut revert_updates)
		.unwrap();
	let coin_after = view.get_coin(&cert.hash()).unwrap().unwrap();
	assert_eq!(coin_before, coin_after);
}

#[test]
fn ceased_withdrawal_replay_rejected() {
	let mut base = NullView::default();
	let mut view = CacheView::new(&mut base, params());
	let mut sc = sidechain_with_top_cert(1, 10, 100, 3, 0xccu64.hash(), 5, 0);
	sc.current_state = State::Ceased;
	sc.creation_data.ceased_vk = Some(vec![0xbb]);
	seed_sidechain(&mut view, sc_id(), sc);

	let mut undo = BlockUndo::default();
	view.update_cert_data_hash(&sc_id(), 3, FieldElement([9; 32]), &mut undo)
		.unwrap();

	let nullifier = FieldElement([1; 32]);
	let tx = csw_tx(sc_id(), 30, nullifier, 3);
	view.is_csw_applicable(&tx, &OkProofVerifier).unwrap();
	view.update_sidechain_for_tx(&tx, &9u64.hash(), 40).unwrap();
	assert_eq!(view.get_sidechain(&sc_id()).unwrap().unwrap().balance, 70);
	assert!(view.have_csw_nullifier(&sc_id(), &nullifier).unwrap());

	// presenting the same nullifier again fails, in the gate and in the
	// apply path
	let err = view.is_csw_applicable(&tx, &OkProofVerifier).unwrap_err();
	assert_eq!(err.kind(), ErrorKind::CswNullifierReused);
	let err = view
		.update_sidechain_for_tx(&tx, &9u64.hash(), 41)
		.unwrap_err();
	assert_eq!(err.kind(), ErrorKind::CswNullifierReused);

	// withdrawing beyond the balance fails before any mutation
	let big = csw_tx(sc_id(), 100, FieldElement([2; 32]), 3);
	let err = view.is_csw_applicable(&big, &OkProofVerifier).unwrap_err();
	assert_eq!(err.kind(), ErrorKind::BalanceExceeded);

	// the revert takes the nullifier back out
	view.revert_tx_outputs(&tx, 40).unwrap();
	assert_eq!(view.get_sidechain(&sc_id()).unwrap().unwrap().balance, 100);
	assert!(!view.have_csw_nullifier(&sc_id(), &nullifier).unwrap());
	view.is_csw_applicable(&tx, &OkProofVerifier).unwrap();
}

#[test]
fn csw_gates_check_state_and_support() {
	let mut base = NullView::default();
	let mut view = CacheView::new(&mut base, params());

	// unknown sidechain
	let tx = csw_tx(sc_id(), 5, FieldElement([1; 32]), 0);
	let err = view.is_csw_applicable(&tx, &OkProofVerifier).unwrap_err();
	assert_eq!(err.kind(), ErrorKind::ScMissing(sc_id()));

	// alive sidechain
	let alive = 50u64.hash();
	seed_sidechain(
		&mut view,
		alive,
		sidechain_with_top_cert(1, 10, 100, 0, 0xccu64.hash(), 5, 0),
	);
	let tx = csw_tx(alive, 5, FieldElement([1; 32]), 0);
	let err = view.is_csw_applicable(&tx, &OkProofVerifier).unwrap_err();
	assert_eq!(err.kind(), ErrorKind::ScNotCeased(alive));

	// ceased but created without a ceased withdrawal key
	let no_vk = 51u64.hash();
	let mut sc = sidechain_with_top_cert(1, 10, 100, 0, 0xccu64.hash(), 5, 0);
	sc.current_state = State::Ceased;
	seed_sidechain(&mut view, no_vk, sc);
	let tx = csw_tx(no_vk, 5, FieldElement([1; 32]), 0);
	let err = view.is_csw_applicable(&tx, &OkProofVerifier).unwrap_err();
	assert_eq!(err.kind(), ErrorKind::ScNoCswSupport(no_vk));
}

#[test]
fn cert_data_hash_update_and_restore() {
	let mut base = NullView::default();
	let mut view = CacheView::new(&mut base, params());
	seed_sidechain(
		&mut view,
		sc_id(),
		sidechain_with_top_cert(1, 10, 50, 0, 0xccu64.hash(), 5, 0),
	);

	let first = FieldElement([1; 32]);
	let second = FieldElement([2; 32]);

	let mut undo1 = BlockUndo::default();
	view.update_cert_data_hash(&sc_id(), 0, first, &mut undo1)
		.unwrap();
	let hashes = view.get_cert_data_hashes(&sc_id(), 0).unwrap().unwrap();
	assert_eq!(hashes.cert_data_hash, first);
	assert!(hashes.prev_cumulative_hash.is_zero());

	// a higher quality certificate of the same epoch overwrites the hash
	let mut undo2 = BlockUndo::default();
	view.update_cert_data_hash(&sc_id(), 0, second, &mut undo2)
		.unwrap();
	let hashes = view.get_cert_data_hashes(&sc_id(), 0).unwrap().unwrap();
	assert_eq!(hashes.cert_data_hash, second);

	// a new epoch chains the cumulative hash over the previous one
	let mut undo3 = BlockUndo::default();
	view.update_cert_data_hash(&sc_id(), 1, first, &mut undo3)
		.unwrap();
	let next = view.get_cert_data_hashes(&sc_id(), 1).unwrap().unwrap();
	assert!(!next.prev_cumulative_hash.is_zero());

	// reverting the overwrite brings the first hash back, reverting the
	// fresh epoch erases it
	view.restore_cert_data_hash(&sc_id(), 1, &undo3).unwrap();
	assert!(view.get_cert_data_hashes(&sc_id(), 1).unwrap().is_none());
	view.restore_cert_data_hash(&sc_id(), 0, &undo2).unwrap();
	let hashes = view.get_cert_data_hashes(&sc_id(), 0).unwrap().unwrap();
	assert_eq!(hashes.cert_data_hash, first);
}

#[test]
fn new_epoch_cert_moves_balance_and_schedule() {
	let mut base = NullView::default();
	let mut view = CacheView::new(&mut base, params());
	view.update_sidechain_for_tx(&creation_tx(sc_id(), 40, 10), &5u64.hash(), 5)
		.unwrap();
	let mut updates = vec![];
	let mut undo_mature = BlockUndo::default();
	view.handle_sidechain_events(5 + SC_COIN_MATURITY, &mut undo_mature, &mut updates)
		.unwrap();

	let cert = cert_with_bwts(sc_id(), 0, 7, &[15]);
	let mut undo = BlockUndo::default();
	view.update_sidechain_for_cert(&cert, &mut undo).unwrap();

	let sc = view.get_sidechain(&sc_id()).unwrap().unwrap();
	assert_eq!(sc.balance, 25);
	assert_eq!(sc.prev_top_epoch, 0);
	assert_eq!(sc.prev_top_bwt_amount, 15);
	assert!(!view.have_sidechain_events(17).unwrap());
	assert!(view.have_sidechain_events(27).unwrap());

	// an epoch too far ahead is not acceptable
	let skip = cert_with_bwts(sc_id(), 2, 9, &[1]);
	let mut undo_skip = BlockUndo::default();
	let err = view
		.update_sidechain_for_cert(&skip, &mut undo_skip)
		.unwrap_err();
	assert_eq!(err.kind(), ErrorKind::EpochInvalid(2));

	// reverting the certificate restores balance, top quality and the
	// original ceasing height
	view.restore_sidechain_from_cert(&cert, &undo.sc_undo[&sc_id()])
		.unwrap();
	let sc = view.get_sidechain(&sc_id()).unwrap().unwrap();
	assert_eq!(sc.balance, 40);
	assert_eq!(sc.prev_top_epoch, EPOCH_NULL);
	assert!(view.have_sidechain_events(17).unwrap());
	assert!(!view.have_sidechain_events(27).unwrap());
}

#[test]
fn cert_exceeding_balance_rejected() {
	let mut base = NullView::default();
	let mut view = CacheView::new(&mut base, params());
	seed_sidechain(
		&mut view,
		sc_id(),
		sidechain_with_top_cert(1, 10, 10, EPOCH_NULL, Hash::default(), -1, 0),
	);

	let cert = cert_with_bwts(sc_id(), 0, 7, &[11]);
	let mut undo = BlockUndo::default();
	let err = view.update_sidechain_for_cert(&cert, &mut undo).unwrap_err();
	assert_eq!(err.kind(), ErrorKind::BalanceExceeded);
	assert_eq!(view.get_sidechain(&sc_id()).unwrap().unwrap().balance, 10);
	assert!(undo.sc_undo.is_empty());
}

#[test]
fn ceasing_without_any_cert_strips_nothing() {
	let mut base = NullView::default();
	let mut view = CacheView::new(&mut base, params());
	view.update_sidechain_for_tx(&creation_tx(sc_id(), 10, 10), &5u64.hash(), 5)
		.unwrap();
	let mut updates = vec![];
	let mut undo_mature = BlockUndo::default();
	view.handle_sidechain_events(5 + SC_COIN_MATURITY, &mut undo_mature, &mut updates)
		.unwrap();

	// nothing certified: the sidechain ceases at the first safeguard
	let mut undo = BlockUndo::default();
	view.handle_sidechain_events(17, &mut undo, &mut updates)
		.unwrap();
	assert_eq!(view.sidechain_state(&sc_id()).unwrap(), State::Ceased);
	assert_eq!(updates.len(), 0);
	assert!(undo.sc_undo[&sc_id()].ceased_bwts.is_empty());

	let mut revert_updates = vec![];
	view.revert_sidechain_events(&undo, 17, &mut revert_updates)
		.unwrap();
	assert_eq!(view.sidechain_state(&sc_id()).unwrap(), State::Alive);
}
