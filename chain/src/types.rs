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

//! Base types the chain state layer requires from its collaborators: the
//! tunable parameters, the proof oracle and the active chain index.

use crate::core::consensus;
use crate::core::core::certificate::Certificate;
use crate::core::core::hash::{FieldElement, Hash};
use crate::core::core::transaction::CswInput;

/// Per-network tunables of the state layer. Passed explicitly at view
/// construction; there are no process-wide settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainParams {
	/// Blocks before a sidechain creation or forward transfer amount
	/// matures into the sidechain balance.
	pub sc_coin_maturity: i32,
}

impl Default for ChainParams {
	fn default() -> ChainParams {
		ChainParams {
			sc_coin_maturity: consensus::DEFAULT_SC_COIN_MATURITY,
		}
	}
}

/// The proof oracle. Certificate and ceased-withdrawal proofs are opaque
/// to the state layer; implementations must be side-effect free.
pub trait ProofVerifier {
	/// Verify the snark attached to a withdrawal certificate.
	fn verify_certificate(
		&self,
		constant: Option<&FieldElement>,
		cert_vk: &[u8],
		prev_end_epoch_block_hash: &Hash,
		cert: &Certificate,
	) -> bool;

	/// Verify the snark attached to a ceased sidechain withdrawal.
	fn verify_csw(
		&self,
		prev_cum_hash: &FieldElement,
		cert_data_hash: &FieldElement,
		last_cum_hash: &FieldElement,
		ceased_vk: &[u8],
		csw: &CswInput,
	) -> bool;
}

/// Proof oracle accepting everything. Test builds only.
pub struct OkProofVerifier;

impl ProofVerifier for OkProofVerifier {
	fn verify_certificate(
		&self,
		_constant: Option<&FieldElement>,
		_cert_vk: &[u8],
		_prev_end_epoch_block_hash: &Hash,
		_cert: &Certificate,
	) -> bool {
		true
	}

	fn verify_csw(
		&self,
		_prev_cum_hash: &FieldElement,
		_cert_data_hash: &FieldElement,
		_last_cum_hash: &FieldElement,
		_ceased_vk: &[u8],
		_csw: &CswInput,
	) -> bool {
		true
	}
}

/// Read-only index of the active chain, used to validate the end-of-epoch
/// block a certificate declares.
pub trait ActiveChain {
	/// Whether the block is part of the active chain.
	fn contains(&self, hash: &Hash) -> bool;

	/// The hash of the active chain block at the given height.
	fn hash_at(&self, height: i32) -> Option<Hash>;
}

/// Vec-backed active chain, block at index `i` has height `i`.
#[derive(Debug, Clone, Default)]
pub struct HeaderChain {
	hashes: Vec<Hash>,
}

impl HeaderChain {
	/// A chain over the provided block hashes, genesis first.
	pub fn new(hashes: Vec<Hash>) -> HeaderChain {
		HeaderChain { hashes }
	}

	/// Append the next block hash.
	pub fn push(&mut self, hash: Hash) {
		self.hashes.push(hash);
	}

	/// Height of the chain tip.
	pub fn height(&self) -> i32 {
		self.hashes.len() as i32 - 1
	}
}

impl ActiveChain for HeaderChain {
	fn contains(&self, hash: &Hash) -> bool {
		self.hashes.contains(hash)
	}

	fn hash_at(&self, height: i32) -> Option<Hash> {
		if height < 0 {
			return None;
		}
		self.hashes.get(height as usize).copied()
	}
}

/// Which way a certificate's backward transfers were switched by a ceasing
/// event or its revert. Surfaced to callers that track certificate status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BwtState {
	/// Backward transfers were nullified.
	Off,
	/// Backward transfers were restored.
	On,
}

/// Notification that a certificate's backward transfers changed state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertStatusUpdate {
	/// The sidechain the certificate belongs to.
	pub sc_id: Hash,
	/// The certificate whose outputs were switched.
	pub cert_hash: Hash,
	/// Epoch of that certificate.
	pub epoch: i32,
	/// Quality of that certificate.
	pub quality: i64,
	/// The direction of the switch.
	pub state: BwtState,
}
