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

//! Serialization and deserialization layer specialized for binary encoding.
//! Ensures consistency and safety. Basically a minimal subset of
//! rustc_serialize customized for our need.
//!
//! To use it simply implement `Writeable` or `Readable` and then use the
//! `serialize` or `deserialize` functions on them as appropriate.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};

/// Largest byte vector we accept from a single length-prefixed read.
const MAX_VEC_READ: u64 = 100_000;

/// Largest collection count we accept from a single length-prefixed read.
const MAX_COUNT_READ: u64 = 1_000_000;

/// Possible errors deriving from serializing or deserializing.
#[derive(Clone, Eq, PartialEq, Debug, Fail)]
pub enum Error {
	/// Wraps an io error produced when reading or writing
	#[fail(display = "IO error: {}", _0)]
	IOErr(String, io::ErrorKind),
	/// Expected a given value that wasn't found
	#[fail(display = "expected {:?}, got {:?}", expected, received)]
	UnexpectedData {
		/// What we wanted
		expected: Vec<u8>,
		/// What we got
		received: Vec<u8>,
	},
	/// Data wasn't in a consumable format
	#[fail(display = "corrupted data")]
	CorruptedData,
	/// When asked to read too much data
	#[fail(display = "too large read")]
	TooLargeReadErr,
}

impl From<io::Error> for Error {
	fn from(e: io::Error) -> Error {
		Error::IOErr(format!("{}", e), e.kind())
	}
}

/// Implementations defined how different numbers and binary structures are
/// written to an underlying stream or container (depending on implementation).
pub trait Writer {
	/// Writes a u8 as bytes
	fn write_u8(&mut self, n: u8) -> Result<(), Error>;
	/// Writes a u16 as bytes
	fn write_u16(&mut self, n: u16) -> Result<(), Error>;
	/// Writes a u32 as bytes
	fn write_u32(&mut self, n: u32) -> Result<(), Error>;
	/// Writes a i32 as bytes
	fn write_i32(&mut self, n: i32) -> Result<(), Error>;
	/// Writes a u64 as bytes
	fn write_u64(&mut self, n: u64) -> Result<(), Error>;
	/// Writes a i64 as bytes
	fn write_i64(&mut self, n: i64) -> Result<(), Error>;
	/// Writes a variable number of bytes. The length is encoded as a prefix.
	fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), Error>;
	/// Writes a fixed number of bytes. The reader is expected to know the
	/// actual length on read.
	fn write_fixed_bytes(&mut self, bytes: &[u8]) -> Result<(), Error>;
}

/// Implementations defined how different numbers and binary structures are
/// read from an underlying stream or container (depending on implementation).
pub trait Reader {
	/// Read a u8 from the underlying Read
	fn read_u8(&mut self) -> Result<u8, Error>;
	/// Read a u16 from the underlying Read
	fn read_u16(&mut self) -> Result<u16, Error>;
	/// Read a u32 from the underlying Read
	fn read_u32(&mut self) -> Result<u32, Error>;
	/// Read a i32 from the underlying Read
	fn read_i32(&mut self) -> Result<i32, Error>;
	/// Read a u64 from the underlying Read
	fn read_u64(&mut self) -> Result<u64, Error>;
	/// Read a i64 from the underlying Read
	fn read_i64(&mut self) -> Result<i64, Error>;
	/// Read a variable size vector from the underlying Read. Expects a
	/// length prefix first.
	fn read_bytes_len_prefix(&mut self) -> Result<Vec<u8>, Error>;
	/// Read a fixed number of bytes from the underlying reader.
	fn read_fixed_bytes(&mut self, length: usize) -> Result<Vec<u8>, Error>;
	/// Consumes a byte from the reader, producing an error if it doesn't
	/// have the expected value
	fn expect_u8(&mut self, val: u8) -> Result<u8, Error>;
}

/// Trait that every type that can be serialized as binary must implement.
/// Writes directly to a Writer, a utility type thinly wrapping an
/// underlying Write implementation.
pub trait Writeable {
	/// Write the data held by this Writeable to the provided writer
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), Error>;
}

/// Trait that every type that can be deserialized from binary must implement.
/// Reads directly to a Reader, a utility type thinly wrapping an
/// underlying Read implementation.
pub trait Readable
where
	Self: Sized,
{
	/// Reads the data necessary to this Readable from the provided reader
	fn read(reader: &mut dyn Reader) -> Result<Self, Error>;
}

/// Deserializes a Readable from any std::io::Read implementation.
pub fn deserialize<T: Readable>(source: &mut dyn Read) -> Result<T, Error> {
	let mut reader = BinReader { source };
	T::read(&mut reader)
}

/// Serializes a Writeable into any std::io::Write implementation.
pub fn serialize<W: Writeable>(sink: &mut dyn Write, thing: &W) -> Result<(), Error> {
	let mut writer = BinWriter { sink };
	thing.write(&mut writer)
}

/// Utility function to serialize a writeable directly in memory using a
/// Vec<u8>.
pub fn ser_vec<W: Writeable>(thing: &W) -> Result<Vec<u8>, Error> {
	let mut vec = vec![];
	serialize(&mut vec, thing)?;
	Ok(vec)
}

/// Reads multiple serialized items into a Vec.
pub fn read_multi<T: Readable>(reader: &mut dyn Reader, count: u64) -> Result<Vec<T>, Error> {
	if count > MAX_COUNT_READ {
		return Err(Error::TooLargeReadErr);
	}
	(0..count).map(|_| T::read(reader)).collect()
}

struct BinReader<'a> {
	source: &'a mut dyn Read,
}

/// Utility wrapper for an underlying byte Reader. Defines higher level methods
/// to read numbers, byte vectors, hashes, etc.
impl<'a> Reader for BinReader<'a> {
	fn read_u8(&mut self) -> Result<u8, Error> {
		self.source.read_u8().map_err(From::from)
	}
	fn read_u16(&mut self) -> Result<u16, Error> {
		self.source.read_u16::<BigEndian>().map_err(From::from)
	}
	fn read_u32(&mut self) -> Result<u32, Error> {
		self.source.read_u32::<BigEndian>().map_err(From::from)
	}
	fn read_i32(&mut self) -> Result<i32, Error> {
		self.source.read_i32::<BigEndian>().map_err(From::from)
	}
	fn read_u64(&mut self) -> Result<u64, Error> {
		self.source.read_u64::<BigEndian>().map_err(From::from)
	}
	fn read_i64(&mut self) -> Result<i64, Error> {
		self.source.read_i64::<BigEndian>().map_err(From::from)
	}
	fn read_bytes_len_prefix(&mut self) -> Result<Vec<u8>, Error> {
		let len = self.read_u64()?;
		if len > MAX_VEC_READ {
			return Err(Error::TooLargeReadErr);
		}
		self.read_fixed_bytes(len as usize)
	}
	fn read_fixed_bytes(&mut self, length: usize) -> Result<Vec<u8>, Error> {
		// not reading more than 100k bytes in a single read
		if length as u64 > MAX_VEC_READ {
			return Err(Error::TooLargeReadErr);
		}
		let mut buf = vec![0; length];
		self.source
			.read_exact(&mut buf)
			.map(move |_| buf)
			.map_err(From::from)
	}
	fn expect_u8(&mut self, val: u8) -> Result<u8, Error> {
		let b = self.read_u8()?;
		if b == val {
			Ok(b)
		} else {
			Err(Error::UnexpectedData {
				expected: vec![val],
				received: vec![b],
			})
		}
	}
}

/// Utility wrapper for an underlying byte Writer. Defines higher level methods
/// to write numbers, byte vectors, hashes, etc.
pub struct BinWriter<'a> {
	sink: &'a mut dyn Write,
}

impl<'a> BinWriter<'a> {
	/// Wrap a standard Write in a binary Writer.
	pub fn new(sink: &'a mut dyn Write) -> BinWriter<'a> {
		BinWriter { sink }
	}
}

impl<'a> Writer for BinWriter<'a> {
	fn write_u8(&mut self, n: u8) -> Result<(), Error> {
		self.sink.write_u8(n).map_err(From::from)
	}
	fn write_u16(&mut self, n: u16) -> Result<(), Error> {
		self.sink.write_u16::<BigEndian>(n).map_err(From::from)
	}
	fn write_u32(&mut self, n: u32) -> Result<(), Error> {
		self.sink.write_u32::<BigEndian>(n).map_err(From::from)
	}
	fn write_i32(&mut self, n: i32) -> Result<(), Error> {
		self.sink.write_i32::<BigEndian>(n).map_err(From::from)
	}
	fn write_u64(&mut self, n: u64) -> Result<(), Error> {
		self.sink.write_u64::<BigEndian>(n).map_err(From::from)
	}
	fn write_i64(&mut self, n: i64) -> Result<(), Error> {
		self.sink.write_i64::<BigEndian>(n).map_err(From::from)
	}
	fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), Error> {
		self.write_u64(bytes.len() as u64)?;
		self.sink.write_all(bytes).map_err(From::from)
	}
	fn write_fixed_bytes(&mut self, bytes: &[u8]) -> Result<(), Error> {
		self.sink.write_all(bytes).map_err(From::from)
	}
}

impl Writeable for u8 {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), Error> {
		writer.write_u8(*self)
	}
}

impl Readable for u8 {
	fn read(reader: &mut dyn Reader) -> Result<u8, Error> {
		reader.read_u8()
	}
}

impl Writeable for u32 {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), Error> {
		writer.write_u32(*self)
	}
}

impl Readable for u32 {
	fn read(reader: &mut dyn Reader) -> Result<u32, Error> {
		reader.read_u32()
	}
}

impl Writeable for i32 {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), Error> {
		writer.write_i32(*self)
	}
}

impl Readable for i32 {
	fn read(reader: &mut dyn Reader) -> Result<i32, Error> {
		reader.read_i32()
	}
}

impl Writeable for u64 {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), Error> {
		writer.write_u64(*self)
	}
}

impl Readable for u64 {
	fn read(reader: &mut dyn Reader) -> Result<u64, Error> {
		reader.read_u64()
	}
}

impl Writeable for i64 {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), Error> {
		writer.write_i64(*self)
	}
}

impl Readable for i64 {
	fn read(reader: &mut dyn Reader) -> Result<i64, Error> {
		reader.read_i64()
	}
}

/// Options are encoded with a single presence byte.
impl<T: Writeable> Writeable for Option<T> {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), Error> {
		match self {
			Some(inner) => {
				writer.write_u8(1)?;
				inner.write(writer)
			}
			None => writer.write_u8(0),
		}
	}
}

impl<T: Readable> Readable for Option<T> {
	fn read(reader: &mut dyn Reader) -> Result<Option<T>, Error> {
		match reader.read_u8()? {
			0 => Ok(None),
			1 => Ok(Some(T::read(reader)?)),
			_ => Err(Error::CorruptedData),
		}
	}
}

/// Collections are encoded with a count prefix.
impl<T: Writeable> Writeable for Vec<T> {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), Error> {
		writer.write_u64(self.len() as u64)?;
		for elem in self {
			elem.write(writer)?;
		}
		Ok(())
	}
}

impl<T: Readable> Readable for Vec<T> {
	fn read(reader: &mut dyn Reader) -> Result<Vec<T>, Error> {
		let count = reader.read_u64()?;
		read_multi(reader, count)
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn primitives_roundtrip() {
		let mut vec = vec![];
		serialize(&mut vec, &42u64).unwrap();
		serialize(&mut vec, &(-7i64)).unwrap();
		let mut cursor = &vec[..];
		assert_eq!(deserialize::<u64>(&mut cursor).unwrap(), 42);
		assert_eq!(deserialize::<i64>(&mut cursor).unwrap(), -7);
	}

	#[test]
	fn option_roundtrip() {
		let some: Option<u32> = Some(1234);
		let none: Option<u32> = None;
		let bytes = ser_vec(&some).unwrap();
		assert_eq!(deserialize::<Option<u32>>(&mut &bytes[..]).unwrap(), some);
		let bytes = ser_vec(&none).unwrap();
		assert_eq!(deserialize::<Option<u32>>(&mut &bytes[..]).unwrap(), none);
	}

	#[test]
	fn oversized_count_rejected() {
		let mut vec = vec![];
		BinWriter::new(&mut vec)
			.write_u64(MAX_COUNT_READ + 1)
			.unwrap();
		assert_eq!(
			deserialize::<Vec<u8>>(&mut &vec[..]),
			Err(Error::TooLargeReadErr)
		);
	}
}
