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

//! Error types for the chain state layer.

use failure::{Backtrace, Context, Fail};
use std::fmt::{self, Display};

use crate::core::core::hash::Hash;
use crate::core::core::transaction;
use crate::core::ser;
use crate::store;

/// Error definition
#[derive(Debug)]
pub struct Error {
	inner: Context<ErrorKind>,
}

/// Chain error definitions
#[derive(Clone, Eq, PartialEq, Debug, Fail)]
pub enum ErrorKind {
	/// An operation referenced a sidechain the view does not know.
	#[fail(display = "sidechain {} unknown", _0)]
	ScMissing(Hash),
	/// A creation output declared a sidechain id that already exists.
	#[fail(display = "sidechain {} already exists", _0)]
	ScAlreadyExists(Hash),
	/// A ceased-sidechain withdrawal targeted a sidechain that is alive.
	#[fail(display = "sidechain {} has not ceased", _0)]
	ScNotCeased(Hash),
	/// A certificate targeted a sidechain that already ceased.
	#[fail(display = "sidechain {} ceased", _0)]
	ScCeased(Hash),
	/// A ceased-sidechain withdrawal targeted a sidechain created without
	/// a ceased-withdrawal verification key.
	#[fail(display = "sidechain {} does not support ceased withdrawals", _0)]
	ScNoCswSupport(Hash),
	/// The nullifier of a ceased-sidechain withdrawal was already recorded.
	#[fail(display = "ceased withdrawal nullifier already recorded")]
	CswNullifierReused,
	/// The proof oracle rejected a certificate or withdrawal proof.
	#[fail(display = "proof verification failed")]
	ProofFailed,
	/// A certificate did not supersede the recorded top quality.
	#[fail(display = "certificate quality rejected")]
	QualityRejected,
	/// A certificate referenced an epoch the sidechain cannot accept.
	#[fail(display = "invalid certificate epoch {}", _0)]
	EpochInvalid(i32),
	/// The declared end-of-epoch block is not the active chain block at the
	/// derived height.
	#[fail(display = "end epoch block not in active chain")]
	EndEpochBlockInvalid,
	/// An operation would drive a sidechain balance negative.
	#[fail(display = "sidechain balance exceeded")]
	BalanceExceeded,
	/// An immature amount expected at a height was not there.
	#[fail(display = "no immature amount at height {}", _0)]
	ImmatureAmountMissing(i32),
	/// An output type the state layer does not recognize.
	#[fail(display = "unknown output type")]
	UnknownOutputType,
	/// An internal invariant did not hold. The view must be discarded.
	#[fail(display = "internal assertion: {}", _0)]
	InternalAssertion(String),
	/// Internal issue when trying to save or load data from the store.
	#[fail(display = "store error: {}", _0)]
	StoreErr(store::Error),
	/// Error serializing or deserializing a type.
	#[fail(display = "serialization error")]
	SerErr(ser::Error),
	/// Error from validating a transaction or certificate in isolation.
	#[fail(display = "invalid transaction: {}", _0)]
	Transaction(transaction::Error),
	/// Anything else
	#[fail(display = "other error: {}", _0)]
	Other(String),
}

impl Display for Error {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		Display::fmt(&self.inner, f)
	}
}

impl Error {
	/// get kind
	pub fn kind(&self) -> ErrorKind {
		self.inner.get_context().clone()
	}
	/// get cause
	pub fn cause(&self) -> Option<&dyn Fail> {
		self.inner.cause()
	}
	/// get backtrace
	pub fn backtrace(&self) -> Option<&Backtrace> {
		self.inner.backtrace()
	}

	/// Whether the failure is a policy rejection the caller can recover
	/// from, as opposed to a fatal store or invariant failure that poisons
	/// the in-memory state.
	pub fn is_recoverable(&self) -> bool {
		match self.kind() {
			ErrorKind::StoreErr(_) | ErrorKind::SerErr(_) | ErrorKind::InternalAssertion(_) => {
				false
			}
			_ => true,
		}
	}
}

impl From<ErrorKind> for Error {
	fn from(kind: ErrorKind) -> Error {
		Error {
			inner: Context::new(kind),
		}
	}
}

impl From<Context<ErrorKind>> for Error {
	fn from(inner: Context<ErrorKind>) -> Error {
		Error { inner }
	}
}

impl From<store::Error> for Error {
	fn from(error: store::Error) -> Error {
		Error {
			inner: Context::new(ErrorKind::StoreErr(error)),
		}
	}
}

impl From<ser::Error> for Error {
	fn from(error: ser::Error) -> Error {
		Error {
			inner: Context::new(ErrorKind::SerErr(error)),
		}
	}
}

impl From<transaction::Error> for Error {
	fn from(error: transaction::Error) -> Error {
		Error {
			inner: Context::new(ErrorKind::Transaction(error)),
		}
	}
}
