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

//! Hash Function
//!
//! Primary identifier types used in the protocol and the hash function
//! that produces them from any serializable value.

use blake2_rfc::blake2b::Blake2b;
use std::fmt;

use crate::ser::{self, Error, Readable, Reader, Writeable, Writer};

/// A hash to uniquely (or close enough) identify one of the main blockchain
/// constructs. Used pervasively for blocks, transactions, certificates,
/// sidechain ids, anchors and nullifiers.
#[derive(Copy, Clone, PartialEq, PartialOrd, Eq, Ord, Hash, Serialize, Deserialize, Default)]
pub struct Hash(pub [u8; 32]);

/// The "empty" hash, used as the null value for sticky pointers and
/// uninitialized references.
pub const ZERO_HASH: Hash = Hash([0; 32]);

impl fmt::Display for Hash {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		for b in self.0.iter() {
			write!(f, "{:02x}", b)?;
		}
		Ok(())
	}
}

impl fmt::Debug for Hash {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		for b in self.0.iter().take(4) {
			write!(f, "{:02x}", b)?;
		}
		Ok(())
	}
}

impl Hash {
	/// Creates a new hash from a vector, padding or truncating to 32 bytes.
	pub fn from_vec(v: &[u8]) -> Hash {
		let mut a = [0; 32];
		for (i, b) in v.iter().take(32).enumerate() {
			a[i] = *b;
		}
		Hash(a)
	}

	/// Converts the hash to a byte vector
	pub fn to_vec(&self) -> Vec<u8> {
		self.0.to_vec()
	}

	/// Whether this is the zero hash, our null value.
	pub fn is_zero(&self) -> bool {
		*self == ZERO_HASH
	}
}

impl AsRef<[u8]> for Hash {
	fn as_ref(&self) -> &[u8] {
		&self.0
	}
}

impl Writeable for Hash {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), Error> {
		writer.write_fixed_bytes(&self.0)
	}
}

impl Readable for Hash {
	fn read(reader: &mut dyn Reader) -> Result<Hash, Error> {
		let v = reader.read_fixed_bytes(32)?;
		Ok(Hash::from_vec(&v))
	}
}

/// A 20-byte hash, the size of a public key hash. Used for backward
/// transfer and ceased withdrawal destinations on this chain.
#[derive(Copy, Clone, PartialEq, PartialOrd, Eq, Ord, Hash, Serialize, Deserialize, Default)]
pub struct Hash160(pub [u8; 20]);

impl fmt::Debug for Hash160 {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		for b in self.0.iter().take(4) {
			write!(f, "{:02x}", b)?;
		}
		Ok(())
	}
}

impl Writeable for Hash160 {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), Error> {
		writer.write_fixed_bytes(&self.0)
	}
}

impl Readable for Hash160 {
	fn read(reader: &mut dyn Reader) -> Result<Hash160, Error> {
		let v = reader.read_fixed_bytes(20)?;
		let mut a = [0; 20];
		a.copy_from_slice(&v);
		Ok(Hash160(a))
	}
}

/// A field-element-sized identifier, as produced by the sidechain proving
/// system. Keys ceased-withdrawal nullifiers and certificate data hashes.
#[derive(Copy, Clone, PartialEq, PartialOrd, Eq, Ord, Hash, Serialize, Deserialize, Default)]
pub struct FieldElement(pub [u8; 32]);

/// The null field element.
pub const ZERO_FIELD: FieldElement = FieldElement([0; 32]);

impl fmt::Debug for FieldElement {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		for b in self.0.iter().take(4) {
			write!(f, "{:02x}", b)?;
		}
		Ok(())
	}
}

impl FieldElement {
	/// Whether this is the null field element.
	pub fn is_zero(&self) -> bool {
		*self == ZERO_FIELD
	}
}

impl Writeable for FieldElement {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), Error> {
		writer.write_fixed_bytes(&self.0)
	}
}

impl Readable for FieldElement {
	fn read(reader: &mut dyn Reader) -> Result<FieldElement, Error> {
		let v = reader.read_fixed_bytes(32)?;
		let mut a = [0; 32];
		a.copy_from_slice(&v);
		Ok(FieldElement(a))
	}
}

/// Serializer that outputs a blake2b hash of anything written to it.
pub struct HashWriter {
	state: Blake2b,
}

impl HashWriter {
	/// Consume the `HashWriter`, outputting its current hash into a 32-byte
	/// array.
	pub fn finalize(self) -> Hash {
		let mut res = [0; 32];
		res.copy_from_slice(self.state.finalize().as_bytes());
		Hash(res)
	}
}

impl Default for HashWriter {
	fn default() -> HashWriter {
		HashWriter {
			state: Blake2b::new(32),
		}
	}
}

impl Writer for HashWriter {
	fn write_u8(&mut self, n: u8) -> Result<(), Error> {
		self.state.update(&[n]);
		Ok(())
	}
	fn write_u16(&mut self, n: u16) -> Result<(), Error> {
		self.state.update(&n.to_be_bytes());
		Ok(())
	}
	fn write_u32(&mut self, n: u32) -> Result<(), Error> {
		self.state.update(&n.to_be_bytes());
		Ok(())
	}
	fn write_i32(&mut self, n: i32) -> Result<(), Error> {
		self.state.update(&n.to_be_bytes());
		Ok(())
	}
	fn write_u64(&mut self, n: u64) -> Result<(), Error> {
		self.state.update(&n.to_be_bytes());
		Ok(())
	}
	fn write_i64(&mut self, n: i64) -> Result<(), Error> {
		self.state.update(&n.to_be_bytes());
		Ok(())
	}
	fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), Error> {
		self.state.update(&(bytes.len() as u64).to_be_bytes());
		self.state.update(bytes);
		Ok(())
	}
	fn write_fixed_bytes(&mut self, bytes: &[u8]) -> Result<(), Error> {
		self.state.update(bytes);
		Ok(())
	}
}

/// A trait for types that get their hash from their serialized byte form.
pub trait Hashed {
	/// Obtain the hash of the serialized form of this value.
	fn hash(&self) -> Hash;
}

impl<T: ser::Writeable> Hashed for T {
	fn hash(&self) -> Hash {
		let mut hasher = HashWriter::default();
		// hashing only fails if the underlying writer fails, which the
		// in-memory hash state never does
		Writeable::write(self, &mut hasher).unwrap();
		hasher.finalize()
	}
}
