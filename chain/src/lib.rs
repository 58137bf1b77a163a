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

//! The chain state layer for sable. The centerpiece is the layered view
//! cache sitting between the persistent backing store and block
//! processing: lazy read-through, copy-on-write staging, hierarchical
//! merge, and the apply/revert driver for the sidechain lifecycle.

#![deny(non_upper_case_globals)]
#![deny(non_camel_case_types)]
#![deny(non_snake_case)]
#![deny(unused_mut)]
#![warn(missing_docs)]

#[macro_use]
extern crate bitflags;
#[macro_use]
extern crate enum_primitive;
#[macro_use]
extern crate failure_derive;
#[macro_use]
extern crate log;
#[macro_use]
extern crate serde_derive;

use sable_core as core;

pub mod cache;
pub mod coin;
pub mod commitment;
mod error;
pub mod lifecycle;
pub mod quality;
pub mod sidechain;
pub mod store;
pub mod types;
pub mod undo;

pub use crate::cache::{CacheView, CoinsModifier};
pub use crate::coin::Coin;
pub use crate::commitment::CommitmentBuilder;
pub use crate::error::{Error, ErrorKind};
pub use crate::sidechain::{Sidechain, SidechainEvents};
pub use crate::store::{BackingView, MemoryBackend, NullView, ViewBatch};
pub use crate::types::ChainParams;
