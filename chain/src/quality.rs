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

//! Certificate quality rules: which certificates supersede which, what
//! orderings a block may carry, and which certificates lose their backward
//! transfers when a block connects.

use std::collections::HashMap;

use crate::cache::CacheView;
use crate::core::core::block::Block;
use crate::core::core::certificate::Certificate;
use crate::core::core::hash::{Hash, Hashed};
use crate::error::{Error, ErrorKind};
use crate::store::BackingView;

/// Within one block, the certificates of each sidechain must carry
/// strictly increasing `(epoch, quality)`, which also rules out
/// duplicates.
pub fn check_certificates_ordering(certs: &[Certificate]) -> Result<(), Error> {
	let mut last: HashMap<Hash, (i32, i64)> = HashMap::new();
	for cert in certs {
		let key = (cert.epoch, cert.quality);
		if let Some(prev) = last.get(&cert.sc_id) {
			if key <= *prev {
				debug!(
					"block ordering: cert for sc {} at {:?} does not supersede {:?}",
					cert.sc_id, key, prev
				);
				return Err(ErrorKind::QualityRejected.into());
			}
		}
		last.insert(cert.sc_id, key);
	}
	Ok(())
}

impl<'a> CacheView<'a> {
	/// The certificates whose backward transfers must be nullified when
	/// this block connects: for each sidechain, the previous block's top
	/// quality certificate if an in-block certificate of the same epoch
	/// supersedes it, and every in-block certificate superseded by a later
	/// same-epoch one. Grouped by sidechain in order of first appearance,
	/// the superseded previous-block certificate first.
	pub fn certs_to_void_upon_connect(&mut self, block: &Block) -> Result<Vec<Hash>, Error> {
		let mut order: Vec<Hash> = vec![];
		let mut by_sc: HashMap<Hash, Vec<&Certificate>> = HashMap::new();
		for cert in &block.certs {
			by_sc
				.entry(cert.sc_id)
				.or_insert_with(|| {
					order.push(cert.sc_id);
					vec![]
				})
				.push(cert);
		}

		let mut voided = vec![];
		for sc_id in order {
			let certs = &by_sc[&sc_id];

			if let Some(sc) = self.get_sidechain(&sc_id).map_err(Error::from)? {
				let superseded = certs
					.iter()
					.any(|c| c.epoch == sc.prev_top_epoch && c.quality > sc.prev_top_quality);
				if superseded && !sc.prev_top_hash.is_zero() {
					voided.push(sc.prev_top_hash);
				}
			}

			for (i, cert) in certs.iter().enumerate() {
				// ordering guarantees any later same-epoch cert has a
				// higher quality
				if certs[i + 1..].iter().any(|later| later.epoch == cert.epoch) {
					voided.push(cert.hash());
				}
			}
		}
		Ok(voided)
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::cache::{EntryFlag, SidechainEntry};
	use crate::sidechain::Sidechain;
	use crate::store::{NullView, ViewBatch};
	use crate::types::ChainParams;

	fn cert(sc_id: Hash, epoch: i32, quality: i64) -> Certificate {
		Certificate::new(sc_id, epoch, quality)
	}

	fn sc_a() -> Hash {
		10u64.hash()
	}

	fn sc_b() -> Hash {
		11u64.hash()
	}

	#[test]
	fn equal_qualities_rejected() {
		let certs = vec![
			cert(sc_a(), 12, 100),
			cert(sc_a(), 12, 200),
			cert(sc_a(), 12, 100),
		];
		assert!(check_certificates_ordering(&certs).is_err());
	}

	#[test]
	fn decreasing_quality_rejected() {
		let certs = vec![cert(sc_a(), 12, 100), cert(sc_a(), 12, 50)];
		assert!(check_certificates_ordering(&certs).is_err());
	}

	#[test]
	fn decreasing_epoch_rejected() {
		let certs = vec![cert(sc_a(), 13, 100), cert(sc_a(), 12, 500)];
		assert!(check_certificates_ordering(&certs).is_err());
	}

	#[test]
	fn interleaved_increasing_accepted() {
		let certs = vec![
			cert(sc_b(), 90, 20),
			cert(sc_a(), 12, 100),
			cert(sc_a(), 12, 200),
			cert(sc_b(), 90, 2000),
			cert(sc_a(), 12, 201),
		];
		assert!(check_certificates_ordering(&certs).is_ok());
	}

	fn view_with_sidechain(
		base: &mut NullView,
		sc_id: Hash,
		top_epoch: i32,
		top_quality: i64,
		top_hash: Hash,
	) -> CacheView<'_> {
		let mut view = CacheView::new(base, ChainParams::default());
		let mut sidechain = Sidechain::default();
		sidechain.creation_block_height = 1;
		sidechain.creation_data.withdrawal_epoch_length = 10;
		sidechain.prev_top_epoch = top_epoch;
		sidechain.prev_top_quality = top_quality;
		sidechain.prev_top_hash = top_hash;
		let mut batch = ViewBatch::default();
		batch.sidechains.insert(
			sc_id,
			SidechainEntry {
				sidechain,
				flag: EntryFlag::Fresh,
			},
		);
		view.batch_write(batch).unwrap();
		view
	}

	#[test]
	fn void_nothing_on_empty_block() {
		let mut base = NullView::default();
		let mut view = view_with_sidechain(&mut base, sc_a(), 15, 100, 99u64.hash());
		let block = Block::default();
		assert!(view.certs_to_void_upon_connect(&block).unwrap().is_empty());
	}

	#[test]
	fn void_nothing_for_new_epoch() {
		let mut base = NullView::default();
		let mut view = view_with_sidechain(&mut base, sc_a(), 15, 100, 99u64.hash());
		let mut block = Block::default();
		let low = cert(sc_a(), 16, 10);
		let high = cert(sc_a(), 16, 20);
		block.certs = vec![low.clone(), high];
		// prev top is for epoch 15, nothing in the block supersedes it;
		// the in-block epoch 16 loser goes
		assert_eq!(
			view.certs_to_void_upon_connect(&block).unwrap(),
			vec![low.hash()]
		);
	}

	#[test]
	fn void_prev_top_on_same_epoch_upgrade() {
		let top_hash = 99u64.hash();
		let mut base = NullView::default();
		let mut view = view_with_sidechain(&mut base, sc_a(), 15, 10, top_hash);
		let mut block = Block::default();
		let low = cert(sc_a(), 15, 20);
		let high = cert(sc_a(), 15, 40);
		block.certs = vec![low.clone(), high];
		assert_eq!(
			view.certs_to_void_upon_connect(&block).unwrap(),
			vec![top_hash, low.hash()]
		);
	}

	#[test]
	fn void_groups_by_sidechain() {
		let top_a = 99u64.hash();
		let mut base = NullView::default();
		let mut view = view_with_sidechain(&mut base, sc_a(), 15, 10, top_a);
		{
			let mut sidechain = Sidechain::default();
			sidechain.creation_block_height = 1;
			sidechain.creation_data.withdrawal_epoch_length = 10;
			sidechain.prev_top_epoch = 200;
			sidechain.prev_top_quality = 2;
			sidechain.prev_top_hash = 98u64.hash();
			let mut batch = ViewBatch::default();
			batch.sidechains.insert(
				sc_b(),
				SidechainEntry {
					sidechain,
					flag: EntryFlag::Fresh,
				},
			);
			view.batch_write(batch).unwrap();
		}

		let a1 = cert(sc_a(), 15, 20);
		let a2 = cert(sc_a(), 15, 30);
		let a3 = cert(sc_a(), 15, 40);
		let b1 = cert(sc_b(), 201, 3);
		let b2 = cert(sc_b(), 201, 4);
		let mut block = Block::default();
		block.certs = vec![a1.clone(), b1.clone(), a2.clone(), b2, a3];
		assert!(check_certificates_ordering(&block.certs).is_ok());
		assert_eq!(
			view.certs_to_void_upon_connect(&block).unwrap(),
			vec![top_a, a1.hash(), a2.hash(), b1.hash()]
		);
	}
}
