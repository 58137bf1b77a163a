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

//! Certificate admission against the active chain, the proof oracle and
//! the per-block ordering rules.

mod common;

use self::core::core::certificate::{Certificate, EPOCH_NULL};
use self::core::core::hash::{FieldElement, Hash, Hashed};
use self::core::core::transaction::CswInput;
use sable_chain::quality::check_certificates_ordering;
use sable_chain::sidechain::State;
use sable_chain::store::NullView;
use sable_chain::types::{ActiveChain, HeaderChain, OkProofVerifier, ProofVerifier};
use sable_chain::{CacheView, ErrorKind};
use sable_core as core;

use crate::common::*;

struct RejectingVerifier;

impl ProofVerifier for RejectingVerifier {
	fn verify_certificate(
		&self,
		_constant: Option<&FieldElement>,
		_cert_vk: &[u8],
		_prev_end_epoch_block_hash: &Hash,
		_cert: &Certificate,
	) -> bool {
		false
	}

	fn verify_csw(
		&self,
		_prev_cum_hash: &FieldElement,
		_cert_data_hash: &FieldElement,
		_last_cum_hash: &FieldElement,
		_ceased_vk: &[u8],
		_csw: &CswInput,
	) -> bool {
		false
	}
}

fn sc_id() -> Hash {
	42u64.hash()
}

fn test_chain(length: i32) -> HeaderChain {
	HeaderChain::new((0..length as u64).map(|n| n.hash()).collect())
}

/// Sidechain created at height 5 with epoch length 10, so epoch `e` spans
/// heights `[5 + 10e, 15 + 10e)`.
fn view_with_sidechain(base: &mut NullView) -> CacheView<'_> {
	let mut view = CacheView::new(base, params());
	seed_sidechain(
		&mut view,
		sc_id(),
		sidechain_with_top_cert(5, 10, 100, EPOCH_NULL, Hash::default(), -1, 0),
	);
	view
}

fn epoch0_cert(chain: &HeaderChain, quality: i64) -> Certificate {
	let mut cert = cert_with_bwts(sc_id(), 0, quality, &[10]);
	cert.end_epoch_block_hash = chain.hash_at(14).unwrap();
	cert
}

#[test]
fn valid_cert_is_accepted() {
	let chain = test_chain(40);
	let mut base = NullView::default();
	let mut view = view_with_sidechain(&mut base);
	let cert = epoch0_cert(&chain, 7);
	view.is_cert_applicable(&cert, 15, &chain, &OkProofVerifier)
		.unwrap();
}

#[test]
fn unknown_sidechain_rejected() {
	let chain = test_chain(40);
	let mut base = NullView::default();
	let mut view = CacheView::new(&mut base, params());
	let cert = epoch0_cert(&chain, 7);
	let err = view
		.is_cert_applicable(&cert, 15, &chain, &OkProofVerifier)
		.unwrap_err();
	assert_eq!(err.kind(), ErrorKind::ScMissing(sc_id()));
}

#[test]
fn wrong_end_epoch_block_rejected() {
	let chain = test_chain(40);
	let mut base = NullView::default();
	let mut view = view_with_sidechain(&mut base);

	// a block outside the active chain
	let mut cert = epoch0_cert(&chain, 7);
	cert.end_epoch_block_hash = 0xdeadu64.hash();
	let err = view
		.is_cert_applicable(&cert, 15, &chain, &OkProofVerifier)
		.unwrap_err();
	assert_eq!(err.kind(), ErrorKind::EndEpochBlockInvalid);

	// a block in the chain, at the wrong height for the epoch
	let mut cert = epoch0_cert(&chain, 7);
	cert.end_epoch_block_hash = chain.hash_at(13).unwrap();
	let err = view
		.is_cert_applicable(&cert, 15, &chain, &OkProofVerifier)
		.unwrap_err();
	assert_eq!(err.kind(), ErrorKind::EndEpochBlockInvalid);
}

#[test]
fn early_and_far_epochs_rejected() {
	let chain = test_chain(40);
	let mut base = NullView::default();
	let mut view = view_with_sidechain(&mut base);

	// the certified epoch is not over yet
	let cert = epoch0_cert(&chain, 7);
	let err = view
		.is_cert_applicable(&cert, 14, &chain, &OkProofVerifier)
		.unwrap_err();
	assert_eq!(err.kind(), ErrorKind::EpochInvalid(0));

	// an epoch beyond the next one
	let mut cert = cert_with_bwts(sc_id(), 1, 7, &[10]);
	cert.end_epoch_block_hash = chain.hash_at(24).unwrap();
	let err = view
		.is_cert_applicable(&cert, 25, &chain, &OkProofVerifier)
		.unwrap_err();
	assert_eq!(err.kind(), ErrorKind::EpochInvalid(1));
}

#[test]
fn ceased_sidechain_rejects_certs() {
	let chain = test_chain(40);
	let mut base = NullView::default();
	let mut view = CacheView::new(&mut base, params());
	let mut sc = sidechain_with_top_cert(5, 10, 100, EPOCH_NULL, Hash::default(), -1, 0);
	sc.current_state = State::Ceased;
	seed_sidechain(&mut view, sc_id(), sc);

	let cert = epoch0_cert(&chain, 7);
	let err = view
		.is_cert_applicable(&cert, 15, &chain, &OkProofVerifier)
		.unwrap_err();
	assert_eq!(err.kind(), ErrorKind::ScCeased(sc_id()));
}

#[test]
fn losing_quality_rejected() {
	let chain = test_chain(40);
	let mut base = NullView::default();
	let mut view = CacheView::new(&mut base, params());
	seed_sidechain(
		&mut view,
		sc_id(),
		sidechain_with_top_cert(5, 10, 100, 0, 0xccu64.hash(), 50, 0),
	);

	let cert = epoch0_cert(&chain, 50);
	let err = view
		.is_cert_applicable(&cert, 15, &chain, &OkProofVerifier)
		.unwrap_err();
	assert_eq!(err.kind(), ErrorKind::QualityRejected);

	let cert = epoch0_cert(&chain, 51);
	view.is_cert_applicable(&cert, 15, &chain, &OkProofVerifier)
		.unwrap();
}

#[test]
fn cert_bwts_beyond_balance_rejected() {
	let chain = test_chain(40);
	let mut base = NullView::default();
	let mut view = CacheView::new(&mut base, params());
	seed_sidechain(
		&mut view,
		sc_id(),
		sidechain_with_top_cert(5, 10, 5, EPOCH_NULL, Hash::default(), -1, 0),
	);

	let cert = epoch0_cert(&chain, 7);
	let err = view
		.is_cert_applicable(&cert, 15, &chain, &OkProofVerifier)
		.unwrap_err();
	assert_eq!(err.kind(), ErrorKind::BalanceExceeded);
}

#[test]
fn failing_proof_rejected() {
	let chain = test_chain(40);
	let mut base = NullView::default();
	let mut view = view_with_sidechain(&mut base);
	let cert = epoch0_cert(&chain, 7);
	let err = view
		.is_cert_applicable(&cert, 15, &chain, &RejectingVerifier)
		.unwrap_err();
	assert_eq!(err.kind(), ErrorKind::ProofFailed);
}

#[test]
fn block_ordering_literal_cases() {
	let sc_a = 1u64.hash();
	let sc_b = 2u64.hash();
	let cert = |sc, epoch, quality| Certificate::new(sc, epoch, quality);

	// identical (epoch, quality) twice
	assert!(check_certificates_ordering(&[cert(sc_a, 0, 100), cert(sc_a, 0, 100)]).is_err());

	// decreasing quality
	assert!(check_certificates_ordering(&[cert(sc_a, 0, 200), cert(sc_a, 0, 100)]).is_err());

	// per-sidechain monotone interleavings are accepted
	assert!(check_certificates_ordering(&[
		cert(sc_b, 90, 20),
		cert(sc_a, 0, 100),
		cert(sc_a, 0, 200),
		cert(sc_b, 90, 2000),
		cert(sc_a, 0, 201),
	])
	.is_ok());
	assert!(check_certificates_ordering(&[
		cert(sc_a, 0, 100),
		cert(sc_b, 90, 20),
		cert(sc_b, 90, 2000),
		cert(sc_a, 0, 200),
		cert(sc_a, 0, 201),
	])
	.is_ok());
}
