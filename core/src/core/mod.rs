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

//! Core types

pub mod block;
pub mod certificate;
pub mod hash;
pub mod merkle;
pub mod transaction;

pub use self::block::{Block, BlockHeader};
pub use self::certificate::{BackwardTransfer, Certificate, EPOCH_NULL, NO_BWT, QUALITY_NULL};
pub use self::hash::{FieldElement, Hash, Hash160, Hashed, ZERO_FIELD, ZERO_HASH};
pub use self::merkle::{merkle_root, NoteCommitmentTree};
pub use self::transaction::{
	BwtRequestOutput, CswInput, ForwardTransferOutput, JoinSplit, OutPoint, Output,
	ScCreationOutput, Transaction, TxInput,
};
