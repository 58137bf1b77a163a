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

//! The contract any persistent layer below the view cache must satisfy:
//! a read set that never errors for "not present", and a single atomic
//! batch write. Also provides the null implementation and an in-memory
//! serializing backend used by the test suites.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::cache::{
	AnchorEntry, CertDataEntry, CoinEntry, CoinFlags, CswEntry, EntryFlag, EventsEntry,
	NullifierEntry, SidechainEntry,
};
use crate::coin::Coin;
use crate::core::core::certificate::Certificate;
use crate::core::core::hash::{FieldElement, Hash, Hashed, ZERO_HASH};
use crate::core::core::merkle::NoteCommitmentTree;
use crate::core::ser;
use crate::sidechain::{CertDataHashes, Sidechain, SidechainEvents};

/// Main error type for the store layer.
#[derive(Clone, Eq, PartialEq, Debug, Fail)]
pub enum Error {
	/// Couldn't find what we were looking for
	#[fail(display = "store not found error: {}", _0)]
	NotFoundErr(String),
	/// Wraps a serialization error for Writeable or Readable
	#[fail(display = "store serialization error: {}", _0)]
	SerErr(String),
	/// The backend refused or failed the write
	#[fail(display = "store write error: {}", _0)]
	WriteErr(String),
}

impl From<ser::Error> for Error {
	fn from(e: ser::Error) -> Error {
		Error::SerErr(format!("{}", e))
	}
}

const SEP: u8 = b':';

/// Coins keyspace prefix.
pub const COIN_PREFIX: u8 = b'c';
/// Anchors keyspace prefix.
pub const ANCHOR_PREFIX: u8 = b'a';
/// Nullifiers keyspace prefix.
pub const NULLIFIER_PREFIX: u8 = b'n';
/// Sidechains keyspace prefix.
pub const SIDECHAIN_PREFIX: u8 = b's';
/// Sidechain events keyspace prefix.
pub const SC_EVENTS_PREFIX: u8 = b'e';
/// Ceased-withdrawal nullifiers keyspace prefix.
pub const CSW_NULLIFIER_PREFIX: u8 = b'w';
/// Certificate data hashes keyspace prefix.
pub const CERT_DATA_PREFIX: u8 = b'd';
/// Best block singleton key.
pub const BEST_BLOCK_PREFIX: u8 = b'B';
/// Best anchor singleton key.
pub const BEST_ANCHOR_PREFIX: u8 = b'A';

/// Build a store key from a keyspace prefix and the id bytes.
pub fn to_key(prefix: u8, k: &[u8]) -> Vec<u8> {
	let mut key = Vec::with_capacity(2 + k.len());
	key.push(prefix);
	key.push(SEP);
	key.extend_from_slice(k);
	key
}

/// Build a store key from a keyspace prefix, id bytes and a trailing i32
/// discriminant (heights, epochs).
pub fn to_key_i32(prefix: u8, k: &[u8], n: i32) -> Vec<u8> {
	let mut key = to_key(prefix, k);
	key.extend_from_slice(&n.to_be_bytes());
	key
}

/// Aggregate statistics over a backing view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ViewStats {
	/// Number of coin entries.
	pub coins: u64,
	/// Number of sidechains.
	pub sidechains: u64,
	/// Total serialized size of all entries, in bytes.
	pub serialized_size: u64,
}

/// The nine-part payload of one atomic flush: the staged entries of every
/// map plus the sticky best pointers.
#[derive(Default)]
pub struct ViewBatch {
	/// Staged coin entries.
	pub coins: HashMap<Hash, CoinEntry>,
	/// New best block pointer.
	pub best_block: Hash,
	/// New best anchor pointer.
	pub best_anchor: Hash,
	/// Staged anchor entries.
	pub anchors: HashMap<Hash, AnchorEntry>,
	/// Staged nullifier entries.
	pub nullifiers: HashMap<Hash, NullifierEntry>,
	/// Staged sidechain entries.
	pub sidechains: HashMap<Hash, SidechainEntry>,
	/// Staged event entries, keyed by height.
	pub sc_events: HashMap<i32, EventsEntry>,
	/// Staged ceased-withdrawal nullifier entries.
	pub csw_nullifiers: HashMap<(Hash, FieldElement), CswEntry>,
	/// Staged certificate data hash entries.
	pub cert_data: HashMap<(Hash, i32), CertDataEntry>,
}

/// Read-only plus batch-write contract of any layer a view cache can sit
/// on: the persistent store, the null store, or another cache.
///
/// Reads take `&mut self` because a cache implementing this trait inserts
/// what it fetches; the whole stack is single-threaded and the caller
/// serializes access.
pub trait BackingView {
	/// The coin for a transaction or certificate hash.
	fn get_coin(&mut self, txid: &Hash) -> Result<Option<Coin>, Error>;

	/// Whether a non-pruned coin exists for the hash.
	fn have_coin(&mut self, txid: &Hash) -> Result<bool, Error>;

	/// The commitment tree whose root is the given anchor, if that root is
	/// part of tree history.
	fn get_anchor(&mut self, root: &Hash) -> Result<Option<NoteCommitmentTree>, Error>;

	/// Whether the shielded-spend nullifier has been recorded.
	fn get_nullifier(&mut self, nullifier: &Hash) -> Result<bool, Error>;

	/// Whether a sidechain with this id exists.
	fn have_sidechain(&mut self, sc_id: &Hash) -> Result<bool, Error>;

	/// The descriptor of a sidechain.
	fn get_sidechain(&mut self, sc_id: &Hash) -> Result<Option<Sidechain>, Error>;

	/// Whether anything is scheduled at this height.
	fn have_sidechain_events(&mut self, height: i32) -> Result<bool, Error>;

	/// The schedule entry for this height.
	fn get_sidechain_events(&mut self, height: i32) -> Result<Option<SidechainEvents>, Error>;

	/// All sidechain ids visible through this view.
	fn get_sidechain_ids(&mut self) -> Result<BTreeSet<Hash>, Error>;

	/// Whether the ceased-withdrawal nullifier has been recorded for the
	/// sidechain.
	fn have_csw_nullifier(&mut self, sc_id: &Hash, nullifier: &FieldElement)
		-> Result<bool, Error>;

	/// The certificate data hashes recorded for a sidechain epoch.
	fn get_cert_data_hashes(
		&mut self,
		sc_id: &Hash,
		epoch: i32,
	) -> Result<Option<CertDataHashes>, Error>;

	/// The block this view state corresponds to. Zero when unknown.
	fn get_best_block(&mut self) -> Result<Hash, Error>;

	/// The current best anchor. Zero when unknown.
	fn get_best_anchor(&mut self) -> Result<Hash, Error>;

	/// Whether a certificate beats the recorded top quality certificate of
	/// its sidechain and epoch.
	fn check_quality(&mut self, cert: &Certificate) -> Result<bool, Error> {
		if let Some(sc) = self.get_sidechain(&cert.sc_id)? {
			if sc.prev_top_hash != cert.hash()
				&& sc.prev_top_epoch == cert.epoch
				&& sc.prev_top_quality >= cert.quality
			{
				debug!(
					"check_quality: cert q={} loses to recorded q={} for sc {}",
					cert.quality, sc.prev_top_quality, cert.sc_id
				);
				return Ok(false);
			}
		}
		Ok(true)
	}

	/// Aggregate statistics, when the implementation can provide them.
	fn get_stats(&mut self) -> Result<Option<ViewStats>, Error>;

	/// Apply one atomic batch: every staged entry of every map, and the
	/// sticky pointers. All maps applied or none.
	fn batch_write(&mut self, batch: ViewBatch) -> Result<(), Error>;
}

/// A backing view with nothing in it. Bottoms out cache stacks in tests.
#[derive(Default)]
pub struct NullView;

impl BackingView for NullView {
	fn get_coin(&mut self, _txid: &Hash) -> Result<Option<Coin>, Error> {
		Ok(None)
	}
	fn have_coin(&mut self, _txid: &Hash) -> Result<bool, Error> {
		Ok(false)
	}
	fn get_anchor(&mut self, _root: &Hash) -> Result<Option<NoteCommitmentTree>, Error> {
		Ok(None)
	}
	fn get_nullifier(&mut self, _nullifier: &Hash) -> Result<bool, Error> {
		Ok(false)
	}
	fn have_sidechain(&mut self, _sc_id: &Hash) -> Result<bool, Error> {
		Ok(false)
	}
	fn get_sidechain(&mut self, _sc_id: &Hash) -> Result<Option<Sidechain>, Error> {
		Ok(None)
	}
	fn have_sidechain_events(&mut self, _height: i32) -> Result<bool, Error> {
		Ok(false)
	}
	fn get_sidechain_events(&mut self, _height: i32) -> Result<Option<SidechainEvents>, Error> {
		Ok(None)
	}
	fn get_sidechain_ids(&mut self) -> Result<BTreeSet<Hash>, Error> {
		Ok(BTreeSet::new())
	}
	fn have_csw_nullifier(
		&mut self,
		_sc_id: &Hash,
		_nullifier: &FieldElement,
	) -> Result<bool, Error> {
		Ok(false)
	}
	fn get_cert_data_hashes(
		&mut self,
		_sc_id: &Hash,
		_epoch: i32,
	) -> Result<Option<CertDataHashes>, Error> {
		Ok(None)
	}
	fn get_best_block(&mut self) -> Result<Hash, Error> {
		Ok(ZERO_HASH)
	}
	fn get_best_anchor(&mut self) -> Result<Hash, Error> {
		Ok(ZERO_HASH)
	}
	fn get_stats(&mut self) -> Result<Option<ViewStats>, Error> {
		Ok(None)
	}
	fn batch_write(&mut self, _batch: ViewBatch) -> Result<(), Error> {
		Ok(())
	}
}

enum StagedOp {
	Put(Vec<u8>, Vec<u8>),
	Delete(Vec<u8>),
}

/// In-memory serializing store. Round-trips every value through the binary
/// ser layer under the prefixed keyspaces of the persisted layout, and
/// applies batches all-or-nothing.
#[derive(Default)]
pub struct MemoryBackend {
	db: BTreeMap<Vec<u8>, Vec<u8>>,
}

impl MemoryBackend {
	/// A new, empty backend.
	pub fn new() -> MemoryBackend {
		MemoryBackend::default()
	}

	/// Number of keys held, all keyspaces included.
	pub fn len(&self) -> usize {
		self.db.len()
	}

	/// Whether the backend holds nothing at all.
	pub fn is_empty(&self) -> bool {
		self.db.is_empty()
	}

	fn get_ser<T: ser::Readable>(&self, key: &[u8]) -> Result<Option<T>, Error> {
		match self.db.get(key) {
			Some(value) => {
				let thing = ser::deserialize(&mut &value[..])?;
				Ok(Some(thing))
			}
			None => Ok(None),
		}
	}

	fn exists(&self, key: &[u8]) -> bool {
		self.db.contains_key(key)
	}

	fn stage_put<T: ser::Writeable>(
		ops: &mut Vec<StagedOp>,
		key: Vec<u8>,
		value: &T,
	) -> Result<(), Error> {
		let data = ser::ser_vec(value)?;
		ops.push(StagedOp::Put(key, data));
		Ok(())
	}

	fn csw_key(sc_id: &Hash, nullifier: &FieldElement) -> Vec<u8> {
		let mut k = sc_id.to_vec();
		k.extend_from_slice(&nullifier.0);
		to_key(CSW_NULLIFIER_PREFIX, &k)
	}
}

impl BackingView for MemoryBackend {
	fn get_coin(&mut self, txid: &Hash) -> Result<Option<Coin>, Error> {
		self.get_ser(&to_key(COIN_PREFIX, txid.as_ref()))
	}

	fn have_coin(&mut self, txid: &Hash) -> Result<bool, Error> {
		Ok(self.exists(&to_key(COIN_PREFIX, txid.as_ref())))
	}

	fn get_anchor(&mut self, root: &Hash) -> Result<Option<NoteCommitmentTree>, Error> {
		self.get_ser(&to_key(ANCHOR_PREFIX, root.as_ref()))
	}

	fn get_nullifier(&mut self, nullifier: &Hash) -> Result<bool, Error> {
		Ok(self.exists(&to_key(NULLIFIER_PREFIX, nullifier.as_ref())))
	}

	fn have_sidechain(&mut self, sc_id: &Hash) -> Result<bool, Error> {
		Ok(self.exists(&to_key(SIDECHAIN_PREFIX, sc_id.as_ref())))
	}

	fn get_sidechain(&mut self, sc_id: &Hash) -> Result<Option<Sidechain>, Error> {
		self.get_ser(&to_key(SIDECHAIN_PREFIX, sc_id.as_ref()))
	}

	fn have_sidechain_events(&mut self, height: i32) -> Result<bool, Error> {
		Ok(self.exists(&to_key_i32(SC_EVENTS_PREFIX, &[], height)))
	}

	fn get_sidechain_events(&mut self, height: i32) -> Result<Option<SidechainEvents>, Error> {
		self.get_ser(&to_key_i32(SC_EVENTS_PREFIX, &[], height))
	}

	fn get_sidechain_ids(&mut self) -> Result<BTreeSet<Hash>, Error> {
		let prefix = to_key(SIDECHAIN_PREFIX, &[]);
		let mut ids = BTreeSet::new();
		for key in self.db.keys() {
			if key.starts_with(&prefix) {
				ids.insert(Hash::from_vec(&key[prefix.len()..]));
			}
		}
		Ok(ids)
	}

	fn have_csw_nullifier(
		&mut self,
		sc_id: &Hash,
		nullifier: &FieldElement,
	) -> Result<bool, Error> {
		Ok(self.exists(&MemoryBackend::csw_key(sc_id, nullifier)))
	}

	fn get_cert_data_hashes(
		&mut self,
		sc_id: &Hash,
		epoch: i32,
	) -> Result<Option<CertDataHashes>, Error> {
		self.get_ser(&to_key_i32(CERT_DATA_PREFIX, sc_id.as_ref(), epoch))
	}

	fn get_best_block(&mut self) -> Result<Hash, Error> {
		Ok(self
			.get_ser(&to_key(BEST_BLOCK_PREFIX, &[]))?
			.unwrap_or(ZERO_HASH))
	}

	fn get_best_anchor(&mut self) -> Result<Hash, Error> {
		Ok(self
			.get_ser(&to_key(BEST_ANCHOR_PREFIX, &[]))?
			.unwrap_or(ZERO_HASH))
	}

	fn get_stats(&mut self) -> Result<Option<ViewStats>, Error> {
		let coin_prefix = to_key(COIN_PREFIX, &[]);
		let sc_prefix = to_key(SIDECHAIN_PREFIX, &[]);
		let mut stats = ViewStats::default();
		for (key, value) in &self.db {
			stats.serialized_size += value.len() as u64;
			if key.starts_with(&coin_prefix) {
				stats.coins += 1;
			} else if key.starts_with(&sc_prefix) {
				stats.sidechains += 1;
			}
		}
		Ok(Some(stats))
	}

	/// Bottom of the stack: the flag distinctions collapse into plain puts
	/// and deletes. Everything is staged and serialized before the first
	/// key is touched, so a serialization failure leaves the store as it
	/// was.
	fn batch_write(&mut self, batch: ViewBatch) -> Result<(), Error> {
		let mut ops = vec![];

		for (txid, entry) in &batch.coins {
			if !entry.flags.contains(CoinFlags::DIRTY) {
				continue;
			}
			let key = to_key(COIN_PREFIX, txid.as_ref());
			if entry.coin.is_pruned() {
				ops.push(StagedOp::Delete(key));
			} else {
				MemoryBackend::stage_put(&mut ops, key, &entry.coin)?;
			}
		}

		for (root, entry) in &batch.anchors {
			if entry.flag != EntryFlag::Dirty {
				continue;
			}
			let key = to_key(ANCHOR_PREFIX, root.as_ref());
			if entry.entered {
				MemoryBackend::stage_put(&mut ops, key, &entry.tree)?;
			} else {
				ops.push(StagedOp::Delete(key));
			}
		}

		for (nullifier, entry) in &batch.nullifiers {
			if entry.flag != EntryFlag::Dirty {
				continue;
			}
			let key = to_key(NULLIFIER_PREFIX, nullifier.as_ref());
			if entry.entered {
				MemoryBackend::stage_put(&mut ops, key, &1u8)?;
			} else {
				ops.push(StagedOp::Delete(key));
			}
		}

		for (sc_id, entry) in &batch.sidechains {
			let key = to_key(SIDECHAIN_PREFIX, sc_id.as_ref());
			match entry.flag {
				EntryFlag::Fresh | EntryFlag::Dirty => {
					MemoryBackend::stage_put(&mut ops, key, &entry.sidechain)?;
				}
				EntryFlag::Erased => ops.push(StagedOp::Delete(key)),
				EntryFlag::Default => (),
			}
		}

		for (height, entry) in &batch.sc_events {
			let key = to_key_i32(SC_EVENTS_PREFIX, &[], *height);
			match entry.flag {
				EntryFlag::Fresh | EntryFlag::Dirty => {
					MemoryBackend::stage_put(&mut ops, key, &entry.events)?;
				}
				EntryFlag::Erased => ops.push(StagedOp::Delete(key)),
				EntryFlag::Default => (),
			}
		}

		for ((sc_id, nullifier), entry) in &batch.csw_nullifiers {
			let key = MemoryBackend::csw_key(sc_id, nullifier);
			match entry.flag {
				EntryFlag::Fresh | EntryFlag::Dirty => {
					MemoryBackend::stage_put(&mut ops, key, &1u8)?;
				}
				EntryFlag::Erased => ops.push(StagedOp::Delete(key)),
				EntryFlag::Default => (),
			}
		}

		for ((sc_id, epoch), entry) in &batch.cert_data {
			let key = to_key_i32(CERT_DATA_PREFIX, sc_id.as_ref(), *epoch);
			match entry.flag {
				EntryFlag::Fresh | EntryFlag::Dirty => {
					MemoryBackend::stage_put(&mut ops, key, &entry.hashes)?;
				}
				EntryFlag::Erased => ops.push(StagedOp::Delete(key)),
				EntryFlag::Default => (),
			}
		}

		MemoryBackend::stage_put(&mut ops, to_key(BEST_BLOCK_PREFIX, &[]), &batch.best_block)?;
		MemoryBackend::stage_put(
			&mut ops,
			to_key(BEST_ANCHOR_PREFIX, &[]),
			&batch.best_anchor,
		)?;

		for op in ops {
			match op {
				StagedOp::Put(key, value) => {
					self.db.insert(key, value);
				}
				StagedOp::Delete(key) => {
					self.db.remove(&key);
				}
			}
		}
		Ok(())
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::core::core::transaction::{Output, Transaction, TX_VERSION_TRANSPARENT};

	fn coin_with_value(value: i64) -> Coin {
		let mut tx = Transaction::empty(TX_VERSION_TRANSPARENT);
		tx.outputs.push(Output {
			value,
			script: vec![0x51],
		});
		Coin::from_tx(&tx, 1)
	}

	#[test]
	fn null_view_is_empty() {
		let mut view = NullView::default();
		assert_eq!(view.get_coin(&Hash::from_vec(&[1])).unwrap(), None);
		assert!(!view.have_sidechain(&Hash::from_vec(&[1])).unwrap());
		assert_eq!(view.get_best_block().unwrap(), ZERO_HASH);
		assert!(view.get_sidechain_ids().unwrap().is_empty());
	}

	#[test]
	fn memory_backend_coin_roundtrip() {
		let mut backend = MemoryBackend::new();
		let txid = Hash::from_vec(&[7]);
		let mut batch = ViewBatch::default();
		batch.coins.insert(
			txid,
			CoinEntry {
				coin: coin_with_value(11),
				flags: CoinFlags::DIRTY | CoinFlags::FRESH,
			},
		);
		batch.best_block = Hash::from_vec(&[9]);
		backend.batch_write(batch).unwrap();

		assert!(backend.have_coin(&txid).unwrap());
		let coin = backend.get_coin(&txid).unwrap().unwrap();
		assert_eq!(coin.outputs.len(), 1);
		assert_eq!(backend.get_best_block().unwrap(), Hash::from_vec(&[9]));
		let stats = backend.get_stats().unwrap().unwrap();
		assert_eq!(stats.coins, 1);
	}

	#[test]
	fn pruned_coin_deletes_key() {
		let mut backend = MemoryBackend::new();
		let txid = Hash::from_vec(&[7]);
		let mut batch = ViewBatch::default();
		batch.coins.insert(
			txid,
			CoinEntry {
				coin: coin_with_value(11),
				flags: CoinFlags::DIRTY | CoinFlags::FRESH,
			},
		);
		backend.batch_write(batch).unwrap();

		let mut spent = backend.get_coin(&txid).unwrap().unwrap();
		spent.spend(0);
		let mut batch = ViewBatch::default();
		batch.coins.insert(
			txid,
			CoinEntry {
				coin: spent,
				flags: CoinFlags::DIRTY,
			},
		);
		backend.batch_write(batch).unwrap();
		assert!(!backend.have_coin(&txid).unwrap());
	}
}
