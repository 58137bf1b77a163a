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

//! The layered view cache. Sits on any backing view, fetches entries on
//! demand, stages every mutation copy-on-write under a per-entry flag, and
//! merges the staged state into its parent as one atomic batch. Stackable:
//! a cache is itself a backing view.

use std::collections::hash_map::Entry;
use std::collections::{BTreeSet, HashMap};
use std::mem;
use std::ops::{Deref, DerefMut};

use crate::coin::Coin;
use crate::core::consensus::Amount;
use crate::core::core::hash::{FieldElement, Hash, ZERO_HASH};
use crate::core::core::merkle::NoteCommitmentTree;
use crate::core::core::transaction::{Output, Transaction, TxInput};
use crate::error::{Error, ErrorKind};
use crate::sidechain::{CertDataHashes, Sidechain, SidechainEvents};
use crate::store::{self, BackingView, ViewBatch, ViewStats};
use crate::types::ChainParams;

bitflags! {
	/// Per-coin-entry state, a genuine two-bit field: the two bits are set
	/// independently and combine.
	pub struct CoinFlags: u8 {
		/// The parent view has no (non-pruned) version of this coin.
		const FRESH = 0b01;
		/// This version differs from the parent's.
		const DIRTY = 0b10;
	}
}

/// Mutation state of a cached entry relative to the backing view. One of
/// the four, never combined.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EntryFlag {
	/// Identical to the backing view's version.
	Default,
	/// Absent from the backing view.
	Fresh,
	/// Differs from the backing view's version.
	Dirty,
	/// Pending deletion from the backing view.
	Erased,
}

/// A cached coin and its flag bits.
#[derive(Debug, Clone)]
pub struct CoinEntry {
	/// The coin.
	pub coin: Coin,
	/// Two-bit mutation state.
	pub flags: CoinFlags,
}

impl Default for CoinEntry {
	fn default() -> CoinEntry {
		CoinEntry {
			coin: Coin::default(),
			flags: CoinFlags::empty(),
		}
	}
}

/// A cached anchor: the tree it roots and whether the root is part of
/// tree history.
#[derive(Debug, Clone)]
pub struct AnchorEntry {
	/// The commitment tree whose root is the anchor.
	pub tree: NoteCommitmentTree,
	/// True iff the root is known to be in tree history.
	pub entered: bool,
	/// Mutation state; only `Default` and `Dirty` arise.
	pub flag: EntryFlag,
}

/// A cached nullifier: whether it is spent.
#[derive(Debug, Clone, Copy)]
pub struct NullifierEntry {
	/// True iff the nullifier has been recorded.
	pub entered: bool,
	/// Mutation state; only `Default` and `Dirty` arise.
	pub flag: EntryFlag,
}

/// A cached sidechain descriptor.
#[derive(Debug, Clone)]
pub struct SidechainEntry {
	/// The descriptor.
	pub sidechain: Sidechain,
	/// Mutation state.
	pub flag: EntryFlag,
}

/// A cached per-height event schedule entry.
#[derive(Debug, Clone)]
pub struct EventsEntry {
	/// The schedule at this height.
	pub events: SidechainEvents,
	/// Mutation state.
	pub flag: EntryFlag,
}

/// A cached ceased-withdrawal nullifier. Pure presence, no value.
#[derive(Debug, Clone, Copy)]
pub struct CswEntry {
	/// Mutation state; `Dirty` never arises.
	pub flag: EntryFlag,
}

/// A cached certificate data entry.
#[derive(Debug, Clone, Copy)]
pub struct CertDataEntry {
	/// The recorded hashes.
	pub hashes: CertDataHashes,
	/// Mutation state.
	pub flag: EntryFlag,
}

/// Layered view over a backing view. Owns its maps exclusively; the parent
/// reference is a borrow, never an owner.
pub struct CacheView<'a> {
	parent: &'a mut dyn BackingView,
	params: ChainParams,
	pub(crate) coins: HashMap<Hash, CoinEntry>,
	pub(crate) anchors: HashMap<Hash, AnchorEntry>,
	pub(crate) nullifiers: HashMap<Hash, NullifierEntry>,
	pub(crate) sidechains: HashMap<Hash, SidechainEntry>,
	pub(crate) sc_events: HashMap<i32, EventsEntry>,
	pub(crate) csw_nullifiers: HashMap<(Hash, FieldElement), CswEntry>,
	pub(crate) cert_data: HashMap<(Hash, i32), CertDataEntry>,
	best_block: Hash,
	best_anchor: Hash,
	cached_usage: usize,
	has_modifier: bool,
}

impl<'a> CacheView<'a> {
	/// A new empty cache over the given backing view.
	pub fn new(parent: &'a mut dyn BackingView, params: ChainParams) -> CacheView<'a> {
		CacheView {
			parent,
			params,
			coins: HashMap::new(),
			anchors: HashMap::new(),
			nullifiers: HashMap::new(),
			sidechains: HashMap::new(),
			sc_events: HashMap::new(),
			csw_nullifiers: HashMap::new(),
			cert_data: HashMap::new(),
			best_block: ZERO_HASH,
			best_anchor: ZERO_HASH,
			cached_usage: 0,
			has_modifier: false,
		}
	}

	/// The tunables this view was built with.
	pub fn params(&self) -> &ChainParams {
		&self.params
	}

	/// Memory used by the cached entries, kept incrementally in sync on
	/// every insert, replacement and removal.
	pub fn dynamic_memory_usage(&self) -> usize {
		let per_entry = mem::size_of::<(Hash, CoinEntry)>();
		let map_overhead = (self.coins.len()
			+ self.anchors.len()
			+ self.nullifiers.len()
			+ self.sidechains.len()
			+ self.sc_events.len()
			+ self.csw_nullifiers.len()
			+ self.cert_data.len())
			* per_entry;
		map_overhead + self.cached_usage
	}

	/// Number of cached coin entries.
	pub fn coins_cache_size(&self) -> usize {
		self.coins.len()
	}

	// Pull a coin from the parent into the local map if it is not already
	// there. Parents only ever surface pruned entries as a leftover of
	// their own merges, and those come in FRESH.
	fn fetch_coin(&mut self, txid: &Hash) -> Result<(), store::Error> {
		if self.coins.contains_key(txid) {
			return Ok(());
		}
		if let Some(coin) = self.parent.get_coin(txid)? {
			let mut flags = CoinFlags::empty();
			if coin.is_pruned() {
				flags = CoinFlags::FRESH;
			}
			self.cached_usage += coin.dynamic_memory_usage();
			self.coins.insert(*txid, CoinEntry { coin, flags });
		}
		Ok(())
	}

	/// Immutable access to a coin, fetching it from the parent on a miss.
	pub fn access_coin(&mut self, txid: &Hash) -> Result<Option<&Coin>, Error> {
		self.fetch_coin(txid).map_err(Error::from)?;
		Ok(self.coins.get(txid).map(|entry| &entry.coin))
	}

	/// Scoped mutable access to a coin. At most one modifier may exist
	/// against a cache at any time.
	pub fn modify_coin(&mut self, txid: &Hash) -> Result<CoinsModifier<'_, 'a>, Error> {
		assert!(!self.has_modifier, "second coin modifier requested");
		let old_usage = match self.coins.entry(*txid) {
			Entry::Occupied(entry) => entry.get().coin.dynamic_memory_usage(),
			Entry::Vacant(vacant) => {
				let (coin, flags) = match self.parent.get_coin(txid).map_err(Error::from)? {
					None => (Coin::default(), CoinFlags::FRESH),
					Some(coin) => {
						let flags = if coin.is_pruned() {
							// the parent only has an empty entry for this
							// txid, our version is as good as fresh
							CoinFlags::FRESH
						} else {
							CoinFlags::empty()
						};
						(coin, flags)
					}
				};
				vacant.insert(CoinEntry { coin, flags });
				0
			}
		};
		// whenever a modifier is taken the entry is assumed modified
		let entry = self.coins.get_mut(txid).expect("entry just ensured");
		entry.flags |= CoinFlags::DIRTY;
		self.has_modifier = true;
		Ok(CoinsModifier {
			txid: *txid,
			old_usage,
			cache: self,
		})
	}

	/// The best-block pointer, pulled lazily from the parent.
	pub fn best_block(&mut self) -> Result<Hash, Error> {
		if self.best_block.is_zero() {
			self.best_block = self.parent.get_best_block().map_err(Error::from)?;
		}
		Ok(self.best_block)
	}

	/// Point this view state at a block.
	pub fn set_best_block(&mut self, hash: Hash) {
		self.best_block = hash;
	}

	/// The best-anchor pointer, pulled lazily from the parent.
	pub fn best_anchor(&mut self) -> Result<Hash, Error> {
		if self.best_anchor.is_zero() {
			self.best_anchor = self.parent.get_best_anchor().map_err(Error::from)?;
		}
		Ok(self.best_anchor)
	}

	/// Make the tree's root the best anchor. Blocks that do not touch the
	/// commitment tree do not create spurious entries.
	pub fn push_anchor(&mut self, tree: NoteCommitmentTree) -> Result<(), Error> {
		let new_root = tree.root();
		let current = self.best_anchor()?;
		if current == new_root {
			return Ok(());
		}
		match self.anchors.entry(new_root) {
			Entry::Occupied(mut entry) => {
				let old = entry.get().tree.dynamic_memory_usage();
				let entry = entry.get_mut();
				entry.tree = tree;
				entry.entered = true;
				entry.flag = EntryFlag::Dirty;
				let new = entry.tree.dynamic_memory_usage();
				self.cached_usage = self.cached_usage + new - old;
			}
			Entry::Vacant(vacant) => {
				self.cached_usage += tree.dynamic_memory_usage();
				vacant.insert(AnchorEntry {
					tree,
					entered: true,
					flag: EntryFlag::Dirty,
				});
			}
		}
		self.best_anchor = new_root;
		Ok(())
	}

	/// Roll the best anchor back to `new_best`. Restoring the old anchor
	/// of a block that did not change the tree has no effect.
	pub fn pop_anchor(&mut self, new_best: Hash) -> Result<(), Error> {
		let current = self.best_anchor()?;
		if current == new_best {
			return Ok(());
		}
		// bring the current best anchor into the local cache so that its
		// tree exists in memory when the entry is unentered
		let fetched = self.get_anchor(&current).map_err(Error::from)?;
		assert!(fetched.is_some(), "best anchor has no tree in view");
		let entry = self
			.anchors
			.get_mut(&current)
			.expect("anchor entry just fetched");
		entry.entered = false;
		entry.flag = EntryFlag::Dirty;
		self.best_anchor = new_best;
		Ok(())
	}

	/// Record or clear a shielded-spend nullifier.
	pub fn set_nullifier(&mut self, nullifier: Hash, spent: bool) {
		let entry = self.nullifiers.entry(nullifier).or_insert(NullifierEntry {
			entered: spent,
			flag: EntryFlag::Dirty,
		});
		entry.entered = spent;
		entry.flag = EntryFlag::Dirty;
	}

	/// Stage a ceased-withdrawal nullifier.
	pub fn add_csw_nullifier(&mut self, sc_id: Hash, nullifier: FieldElement) {
		self.csw_nullifiers.insert(
			(sc_id, nullifier),
			CswEntry {
				flag: EntryFlag::Fresh,
			},
		);
	}

	/// Unstage a ceased-withdrawal nullifier.
	pub fn remove_csw_nullifier(&mut self, sc_id: Hash, nullifier: FieldElement) {
		self.csw_nullifiers.insert(
			(sc_id, nullifier),
			CswEntry {
				flag: EntryFlag::Erased,
			},
		);
	}

	// Sidechain entry plumbing shared by the lifecycle driver.

	fn fetch_sidechain(&mut self, sc_id: &Hash) -> Result<(), store::Error> {
		if self.sidechains.contains_key(sc_id) {
			return Ok(());
		}
		if let Some(sidechain) = self.parent.get_sidechain(sc_id)? {
			self.cached_usage += sidechain.dynamic_memory_usage();
			self.sidechains.insert(
				*sc_id,
				SidechainEntry {
					sidechain,
					flag: EntryFlag::Default,
				},
			);
		}
		Ok(())
	}

	/// Immutable access to a sidechain descriptor.
	pub fn access_sidechain(&mut self, sc_id: &Hash) -> Result<Option<&Sidechain>, Error> {
		self.fetch_sidechain(sc_id).map_err(Error::from)?;
		Ok(self
			.sidechains
			.get(sc_id)
			.filter(|entry| entry.flag != EntryFlag::Erased)
			.map(|entry| &entry.sidechain))
	}

	/// Run a mutation against a sidechain entry, creating it FRESH if it is
	/// nowhere visible. The usage counter is re-accounted around the
	/// closure so map-size changes inside the descriptor never drift it.
	pub fn modify_sidechain_with<F>(&mut self, sc_id: &Hash, f: F) -> Result<(), Error>
	where
		F: FnOnce(&mut SidechainEntry) -> Result<(), Error>,
	{
		self.fetch_sidechain(sc_id).map_err(Error::from)?;
		if !self.sidechains.contains_key(sc_id) {
			self.sidechains.insert(
				*sc_id,
				SidechainEntry {
					sidechain: Sidechain::default(),
					flag: EntryFlag::Fresh,
				},
			);
		}
		let entry = self.sidechains.get_mut(sc_id).expect("entry just ensured");
		let old = entry.sidechain.dynamic_memory_usage();
		let res = f(entry);
		let new = entry.sidechain.dynamic_memory_usage();
		self.cached_usage = self.cached_usage + new - old;
		res
	}

	fn fetch_sidechain_events(&mut self, height: i32) -> Result<(), store::Error> {
		if self.sc_events.contains_key(&height) {
			return Ok(());
		}
		if let Some(events) = self.parent.get_sidechain_events(height)? {
			self.cached_usage += events.dynamic_memory_usage();
			self.sc_events.insert(
				height,
				EventsEntry {
					events,
					flag: EntryFlag::Default,
				},
			);
		}
		Ok(())
	}

	/// Run a mutation against the event entry of a height, creating it
	/// FRESH if it is nowhere visible.
	pub fn modify_events_with<F>(&mut self, height: i32, f: F) -> Result<(), Error>
	where
		F: FnOnce(&mut EventsEntry) -> Result<(), Error>,
	{
		self.fetch_sidechain_events(height).map_err(Error::from)?;
		if !self.sc_events.contains_key(&height) {
			self.sc_events.insert(
				height,
				EventsEntry {
					events: SidechainEvents::default(),
					flag: EntryFlag::Fresh,
				},
			);
		}
		let entry = self.sc_events.get_mut(&height).expect("entry just ensured");
		let old = entry.events.dynamic_memory_usage();
		let res = f(entry);
		let new = entry.events.dynamic_memory_usage();
		self.cached_usage = self.cached_usage + new - old;
		res
	}

	fn fetch_cert_data(&mut self, sc_id: &Hash, epoch: i32) -> Result<(), store::Error> {
		let key = (*sc_id, epoch);
		if self.cert_data.contains_key(&key) {
			return Ok(());
		}
		if let Some(hashes) = self.parent.get_cert_data_hashes(sc_id, epoch)? {
			self.cached_usage += mem::size_of::<CertDataHashes>();
			self.cert_data.insert(
				key,
				CertDataEntry {
					hashes,
					flag: EntryFlag::Default,
				},
			);
		}
		Ok(())
	}

	/// Whether certificate data is recorded for a sidechain epoch.
	pub fn have_cert_data_hashes(&mut self, sc_id: &Hash, epoch: i32) -> Result<bool, Error> {
		self.fetch_cert_data(sc_id, epoch).map_err(Error::from)?;
		Ok(self
			.cert_data
			.get(&(*sc_id, epoch))
			.map(|entry| entry.flag != EntryFlag::Erased)
			.unwrap_or(false))
	}

	pub(crate) fn cert_data_entry_mut(
		&mut self,
		sc_id: &Hash,
		epoch: i32,
	) -> Option<&mut CertDataEntry> {
		self.cert_data.get_mut(&(*sc_id, epoch))
	}

	pub(crate) fn insert_cert_data(&mut self, sc_id: Hash, epoch: i32, entry: CertDataEntry) {
		if self.cert_data.insert((sc_id, epoch), entry).is_none() {
			self.cached_usage += mem::size_of::<CertDataEntry>();
		}
	}

	// Coin-level queries block processing relies upon.

	/// The output a transparent input spends. The input must be known
	/// unspent when this is called.
	pub fn get_output_for(&mut self, input: &TxInput) -> Result<Output, Error> {
		let prevout = input.prevout;
		let coin = self
			.access_coin(&prevout.hash)?
			.ok_or_else(|| ErrorKind::InternalAssertion("input coin missing".into()))?;
		coin.outputs
			.get(prevout.n as usize)
			.cloned()
			.flatten()
			.ok_or_else(|| ErrorKind::InternalAssertion("input output spent".into()).into())
	}

	/// Total value a transaction brings in: transparent inputs plus ceased
	/// withdrawals. Zero for a coinbase.
	pub fn value_in(&mut self, tx: &Transaction) -> Result<Amount, Error> {
		if tx.is_coinbase() {
			return Ok(0);
		}
		let mut total = 0;
		for input in &tx.inputs {
			total += self.get_output_for(input)?.value;
		}
		total += tx.csw_value_in();
		Ok(total)
	}

	/// Whether every transparent input of the transaction is available.
	pub fn have_inputs(&mut self, tx: &Transaction) -> Result<bool, Error> {
		if tx.is_coinbase() {
			return Ok(true);
		}
		for input in &tx.inputs {
			let prevout = input.prevout;
			let available = match self.access_coin(&prevout.hash)? {
				Some(coin) => coin.is_available(prevout.n as usize),
				None => false,
			};
			if !available {
				return Ok(false);
			}
		}
		Ok(true)
	}

	/// Whether every transparent input is mature at the spending height.
	pub fn are_inputs_mature(&mut self, tx: &Transaction, height: i32) -> Result<bool, Error> {
		if tx.is_coinbase() {
			return Ok(true);
		}
		for input in &tx.inputs {
			let prevout = input.prevout;
			let mature = match self.access_coin(&prevout.hash)? {
				Some(coin) => coin.is_output_mature(prevout.n as usize, height),
				None => false,
			};
			if !mature {
				return Ok(false);
			}
		}
		Ok(true)
	}

	/// Whether the shielded components of a transaction hold against this
	/// view: no reused nullifier, and every anchor either historical or
	/// produced by an earlier joinsplit of the same transaction.
	pub fn have_shielded_requirements(&mut self, tx: &Transaction) -> Result<bool, Error> {
		let mut intermediates: HashMap<Hash, NoteCommitmentTree> = HashMap::new();
		for joinsplit in &tx.joinsplits {
			for nullifier in &joinsplit.nullifiers {
				if self.get_nullifier(nullifier).map_err(Error::from)? {
					// double spend
					return Ok(false);
				}
			}
			let mut tree = match intermediates.get(&joinsplit.anchor) {
				Some(tree) => tree.clone(),
				None => match self.get_anchor(&joinsplit.anchor).map_err(Error::from)? {
					Some(tree) => tree,
					None => return Ok(false),
				},
			};
			for commitment in &joinsplit.commitments {
				tree.append(*commitment);
			}
			intermediates.insert(tree.root(), tree);
		}
		Ok(true)
	}

	/// Merge the whole staged state into the parent and empty this cache.
	pub fn flush(&mut self) -> Result<(), Error> {
		assert!(!self.has_modifier, "flush with outstanding coin modifier");
		let batch = ViewBatch {
			coins: mem::take(&mut self.coins),
			best_block: self.best_block,
			best_anchor: self.best_anchor,
			anchors: mem::take(&mut self.anchors),
			nullifiers: mem::take(&mut self.nullifiers),
			sidechains: mem::take(&mut self.sidechains),
			sc_events: mem::take(&mut self.sc_events),
			csw_nullifiers: mem::take(&mut self.csw_nullifiers),
			cert_data: mem::take(&mut self.cert_data),
		};
		self.cached_usage = 0;
		self.parent.batch_write(batch).map_err(Error::from)
	}
}

impl<'a> BackingView for CacheView<'a> {
	fn get_coin(&mut self, txid: &Hash) -> Result<Option<Coin>, store::Error> {
		self.fetch_coin(txid)?;
		Ok(self.coins.get(txid).map(|entry| entry.coin.clone()))
	}

	fn have_coin(&mut self, txid: &Hash) -> Result<bool, store::Error> {
		self.fetch_coin(txid)?;
		// the outputs-non-empty test rather than is_pruned: only a coin
		// replaced wholesale in a reorg has its outputs wiped, ordinary
		// spending nulls them one by one
		Ok(self
			.coins
			.get(txid)
			.map(|entry| !entry.coin.outputs.is_empty())
			.unwrap_or(false))
	}

	fn get_anchor(&mut self, root: &Hash) -> Result<Option<NoteCommitmentTree>, store::Error> {
		if let Some(entry) = self.anchors.get(root) {
			if entry.entered {
				return Ok(Some(entry.tree.clone()));
			}
			return Ok(None);
		}
		match self.parent.get_anchor(root)? {
			Some(tree) => {
				self.cached_usage += tree.dynamic_memory_usage();
				self.anchors.insert(
					*root,
					AnchorEntry {
						tree: tree.clone(),
						entered: true,
						flag: EntryFlag::Default,
					},
				);
				Ok(Some(tree))
			}
			None => Ok(None),
		}
	}

	fn get_nullifier(&mut self, nullifier: &Hash) -> Result<bool, store::Error> {
		if let Some(entry) = self.nullifiers.get(nullifier) {
			return Ok(entry.entered);
		}
		let entered = self.parent.get_nullifier(nullifier)?;
		self.nullifiers.insert(
			*nullifier,
			NullifierEntry {
				entered,
				flag: EntryFlag::Default,
			},
		);
		Ok(entered)
	}

	fn have_sidechain(&mut self, sc_id: &Hash) -> Result<bool, store::Error> {
		self.fetch_sidechain(sc_id)?;
		Ok(self
			.sidechains
			.get(sc_id)
			.map(|entry| entry.flag != EntryFlag::Erased)
			.unwrap_or(false))
	}

	fn get_sidechain(&mut self, sc_id: &Hash) -> Result<Option<Sidechain>, store::Error> {
		self.fetch_sidechain(sc_id)?;
		Ok(self
			.sidechains
			.get(sc_id)
			.filter(|entry| entry.flag != EntryFlag::Erased)
			.map(|entry| entry.sidechain.clone()))
	}

	fn have_sidechain_events(&mut self, height: i32) -> Result<bool, store::Error> {
		self.fetch_sidechain_events(height)?;
		Ok(self
			.sc_events
			.get(&height)
			.map(|entry| entry.flag != EntryFlag::Erased)
			.unwrap_or(false))
	}

	fn get_sidechain_events(&mut self, height: i32) -> Result<Option<SidechainEvents>, store::Error> {
		self.fetch_sidechain_events(height)?;
		Ok(self
			.sc_events
			.get(&height)
			.filter(|entry| entry.flag != EntryFlag::Erased)
			.map(|entry| entry.events.clone()))
	}

	fn get_sidechain_ids(&mut self) -> Result<BTreeSet<Hash>, store::Error> {
		// some ids below may be erased in this cache, new ones may exist
		// only here
		let mut ids = self.parent.get_sidechain_ids()?;
		for (sc_id, entry) in &self.sidechains {
			if entry.flag == EntryFlag::Erased {
				ids.remove(sc_id);
			} else {
				ids.insert(*sc_id);
			}
		}
		Ok(ids)
	}

	fn have_csw_nullifier(
		&mut self,
		sc_id: &Hash,
		nullifier: &FieldElement,
	) -> Result<bool, store::Error> {
		let key = (*sc_id, *nullifier);
		if let Some(entry) = self.csw_nullifiers.get(&key) {
			return Ok(entry.flag != EntryFlag::Erased);
		}
		let found = self.parent.have_csw_nullifier(sc_id, nullifier)?;
		if found {
			self.csw_nullifiers.insert(
				key,
				CswEntry {
					flag: EntryFlag::Default,
				},
			);
		}
		Ok(found)
	}

	fn get_cert_data_hashes(
		&mut self,
		sc_id: &Hash,
		epoch: i32,
	) -> Result<Option<CertDataHashes>, store::Error> {
		self.fetch_cert_data(sc_id, epoch)?;
		Ok(self
			.cert_data
			.get(&(*sc_id, epoch))
			.filter(|entry| entry.flag != EntryFlag::Erased)
			.map(|entry| entry.hashes))
	}

	fn get_best_block(&mut self) -> Result<Hash, store::Error> {
		if self.best_block.is_zero() {
			self.best_block = self.parent.get_best_block()?;
		}
		Ok(self.best_block)
	}

	fn get_best_anchor(&mut self) -> Result<Hash, store::Error> {
		if self.best_anchor.is_zero() {
			self.best_anchor = self.parent.get_best_anchor()?;
		}
		Ok(self.best_anchor)
	}

	fn get_stats(&mut self) -> Result<Option<ViewStats>, store::Error> {
		self.parent.get_stats()
	}

	/// The hierarchical merge. Child entries land in this cache according
	/// to their flag, map by map, in fixed order; the sticky pointers are
	/// copied unconditionally.
	fn batch_write(&mut self, batch: ViewBatch) -> Result<(), store::Error> {
		assert!(!self.has_modifier, "batch write with outstanding modifier");

		for (txid, child) in batch.coins {
			// ignore non-dirty entries
			if !child.flags.contains(CoinFlags::DIRTY) {
				continue;
			}
			match self.coins.entry(txid) {
				Entry::Vacant(vacant) => {
					if !child.coin.is_pruned() {
						// this cache has no entry while the child has a
						// non-pruned one: move the coin up fresh, had the
						// grandparent known it the child would have pulled
						// it in on first fetch
						assert!(
							child.flags.contains(CoinFlags::FRESH),
							"non-fresh child coin missing from parent"
						);
						self.cached_usage += child.coin.dynamic_memory_usage();
						vacant.insert(CoinEntry {
							coin: child.coin,
							flags: CoinFlags::DIRTY | CoinFlags::FRESH,
						});
					}
				}
				Entry::Occupied(mut occupied) => {
					if occupied.get().flags.contains(CoinFlags::FRESH) && child.coin.is_pruned() {
						// the grandparent has no entry and the child prunes
						// the coin, so it can simply go
						self.cached_usage -= occupied.get().coin.dynamic_memory_usage();
						occupied.remove();
					} else {
						let old = occupied.get().coin.dynamic_memory_usage();
						let entry = occupied.get_mut();
						entry.coin = child.coin;
						entry.flags |= CoinFlags::DIRTY;
						let new = entry.coin.dynamic_memory_usage();
						self.cached_usage = self.cached_usage + new - old;
					}
				}
			}
		}

		for (root, child) in batch.anchors {
			if child.flag != EntryFlag::Dirty {
				continue;
			}
			match self.anchors.entry(root) {
				Entry::Vacant(vacant) => {
					self.cached_usage += child.tree.dynamic_memory_usage();
					vacant.insert(AnchorEntry {
						tree: child.tree,
						entered: child.entered,
						flag: EntryFlag::Dirty,
					});
				}
				Entry::Occupied(mut occupied) => {
					if occupied.get().entered != child.entered {
						let entry = occupied.get_mut();
						entry.entered = child.entered;
						entry.flag = EntryFlag::Dirty;
					}
				}
			}
		}

		for (nullifier, child) in batch.nullifiers {
			if child.flag != EntryFlag::Dirty {
				continue;
			}
			match self.nullifiers.entry(nullifier) {
				Entry::Vacant(vacant) => {
					vacant.insert(NullifierEntry {
						entered: child.entered,
						flag: EntryFlag::Dirty,
					});
				}
				Entry::Occupied(mut occupied) => {
					if occupied.get().entered != child.entered {
						let entry = occupied.get_mut();
						entry.entered = child.entered;
						entry.flag = EntryFlag::Dirty;
					}
				}
			}
		}

		for (sc_id, child) in batch.sidechains {
			let usage = child.sidechain.dynamic_memory_usage();
			match child.flag {
				EntryFlag::Fresh => match self.sidechains.entry(sc_id) {
					Entry::Vacant(vacant) => {
						self.cached_usage += usage;
						vacant.insert(child);
					}
					Entry::Occupied(mut occupied) => {
						// a fresh child entry may only replace an erased one
						assert!(
							occupied.get().flag == EntryFlag::Erased,
							"fresh sidechain entry already present in parent"
						);
						let old = occupied.get().sidechain.dynamic_memory_usage();
						occupied.insert(child);
						self.cached_usage = self.cached_usage + usage - old;
					}
				},
				EntryFlag::Dirty => match self.sidechains.entry(sc_id) {
					Entry::Vacant(vacant) => {
						self.cached_usage += usage;
						vacant.insert(child);
					}
					Entry::Occupied(mut occupied) => {
						let old = occupied.get().sidechain.dynamic_memory_usage();
						occupied.insert(child);
						self.cached_usage = self.cached_usage + usage - old;
					}
				},
				EntryFlag::Erased => {
					if let Entry::Occupied(mut occupied) = self.sidechains.entry(sc_id) {
						if occupied.get().flag == EntryFlag::Fresh {
							// never reached the grandparent, drop outright
							self.cached_usage -= occupied.get().sidechain.dynamic_memory_usage();
							occupied.remove();
						} else {
							occupied.get_mut().flag = EntryFlag::Erased;
						}
					}
				}
				EntryFlag::Default => {
					let local = self
						.sidechains
						.get(&sc_id)
						.expect("default sidechain entry missing from parent");
					assert!(
						local.sidechain == child.sidechain,
						"default sidechain entry differs from parent value"
					);
				}
			}
		}

		for (height, child) in batch.sc_events {
			let usage = child.events.dynamic_memory_usage();
			match child.flag {
				EntryFlag::Fresh => match self.sc_events.entry(height) {
					Entry::Vacant(vacant) => {
						self.cached_usage += usage;
						vacant.insert(child);
					}
					Entry::Occupied(mut occupied) => {
						assert!(
							occupied.get().flag == EntryFlag::Erased,
							"fresh events entry already present in parent"
						);
						let old = occupied.get().events.dynamic_memory_usage();
						occupied.insert(child);
						self.cached_usage = self.cached_usage + usage - old;
					}
				},
				EntryFlag::Dirty => match self.sc_events.entry(height) {
					Entry::Vacant(vacant) => {
						self.cached_usage += usage;
						vacant.insert(child);
					}
					Entry::Occupied(mut occupied) => {
						let old = occupied.get().events.dynamic_memory_usage();
						occupied.insert(child);
						self.cached_usage = self.cached_usage + usage - old;
					}
				},
				EntryFlag::Erased => {
					if let Entry::Occupied(mut occupied) = self.sc_events.entry(height) {
						if occupied.get().flag == EntryFlag::Fresh {
							self.cached_usage -= occupied.get().events.dynamic_memory_usage();
							occupied.remove();
						} else {
							occupied.get_mut().flag = EntryFlag::Erased;
						}
					}
				}
				EntryFlag::Default => {
					let local = self
						.sc_events
						.get(&height)
						.expect("default events entry missing from parent");
					assert!(
						local.events == child.events,
						"default events entry differs from parent value"
					);
				}
			}
		}

		for (key, child) in batch.csw_nullifiers {
			match child.flag {
				EntryFlag::Fresh | EntryFlag::Dirty => match self.csw_nullifiers.entry(key) {
					Entry::Vacant(vacant) => {
						vacant.insert(child);
					}
					Entry::Occupied(mut occupied) => {
						assert!(
							occupied.get().flag == EntryFlag::Erased
								|| child.flag == EntryFlag::Dirty,
							"fresh csw nullifier already present in parent"
						);
						occupied.insert(child);
					}
				},
				EntryFlag::Erased => {
					if let Entry::Occupied(mut occupied) = self.csw_nullifiers.entry(key) {
						if occupied.get().flag == EntryFlag::Fresh {
							occupied.remove();
						} else {
							occupied.get_mut().flag = EntryFlag::Erased;
						}
					}
				}
				EntryFlag::Default => {
					assert!(
						self.csw_nullifiers.contains_key(&key),
						"default csw nullifier missing from parent"
					);
				}
			}
		}

		for (key, child) in batch.cert_data {
			match child.flag {
				EntryFlag::Fresh => match self.cert_data.entry(key) {
					Entry::Vacant(vacant) => {
						self.cached_usage += mem::size_of::<CertDataEntry>();
						vacant.insert(child);
					}
					Entry::Occupied(mut occupied) => {
						assert!(
							occupied.get().flag == EntryFlag::Erased,
							"fresh cert data entry already present in parent"
						);
						occupied.insert(child);
					}
				},
				EntryFlag::Dirty => match self.cert_data.entry(key) {
					Entry::Vacant(vacant) => {
						self.cached_usage += mem::size_of::<CertDataEntry>();
						vacant.insert(child);
					}
					Entry::Occupied(mut occupied) => {
						occupied.insert(child);
					}
				},
				EntryFlag::Erased => {
					if let Entry::Occupied(mut occupied) = self.cert_data.entry(key) {
						if occupied.get().flag == EntryFlag::Fresh {
							self.cached_usage -= mem::size_of::<CertDataEntry>();
							occupied.remove();
						} else {
							occupied.get_mut().flag = EntryFlag::Erased;
						}
					}
				}
				EntryFlag::Default => {
					let local = self
						.cert_data
						.get(&key)
						.expect("default cert data entry missing from parent");
					assert!(
						local.hashes == child.hashes,
						"default cert data entry differs from parent value"
					);
				}
			}
		}

		self.best_block = batch.best_block;
		self.best_anchor = batch.best_anchor;
		Ok(())
	}
}

/// Scoped mutable borrow of a single coin. Trims, re-accounts the usage
/// counter and prunes never-persisted empty coins when dropped, on every
/// exit path.
pub struct CoinsModifier<'c, 'a> {
	cache: &'c mut CacheView<'a>,
	txid: Hash,
	old_usage: usize,
}

impl<'c, 'a> Deref for CoinsModifier<'c, 'a> {
	type Target = Coin;

	fn deref(&self) -> &Coin {
		&self
			.cache
			.coins
			.get(&self.txid)
			.expect("modified coin entry vanished")
			.coin
	}
}

impl<'c, 'a> DerefMut for CoinsModifier<'c, 'a> {
	fn deref_mut(&mut self) -> &mut Coin {
		&mut self
			.cache
			.coins
			.get_mut(&self.txid)
			.expect("modified coin entry vanished")
			.coin
	}
}

impl<'c, 'a> Drop for CoinsModifier<'c, 'a> {
	fn drop(&mut self) {
		assert!(self.cache.has_modifier, "modifier flag already cleared");
		self.cache.has_modifier = false;
		let entry = self
			.cache
			.coins
			.get_mut(&self.txid)
			.expect("modified coin entry vanished");
		entry.coin.trim();
		// subtract the old usage first, then either drop the entry or add
		// the new usage back in
		self.cache.cached_usage -= self.old_usage;
		if entry.flags.contains(CoinFlags::FRESH) && entry.coin.is_pruned() {
			self.cache.coins.remove(&self.txid);
		} else {
			let usage = entry.coin.dynamic_memory_usage();
			self.cache.cached_usage += usage;
		}
	}
}
