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

//! All the consensus rule constants the rest of the node relies upon.
//! Tunables that differ per network live in the chain-level parameters
//! struct; what lives here is fixed for every network.

/// A monetary amount, expressed in satoshis. Signed so that fee and
/// balance arithmetic can go briefly negative and be caught.
pub type Amount = i64;

/// One coin in satoshis.
pub const COIN: Amount = 100_000_000;

/// Absolute cap on the money supply. Nothing valid ever carries more.
pub const MAX_MONEY: Amount = 21_000_000 * COIN;

/// Whether a single value is within the valid monetary range.
pub fn valid_amount(value: Amount) -> bool {
	value >= 0 && value <= MAX_MONEY
}

/// Number of blocks before a coinbase output may be spent.
pub const COINBASE_MATURITY: i32 = 100;

/// Default number of blocks before a sidechain creation or forward
/// transfer amount matures into the sidechain balance. Networks may
/// override it through the chain parameters.
pub const DEFAULT_SC_COIN_MATURITY: i32 = 2;

/// Smallest withdrawal epoch length a sidechain may declare.
pub const MIN_WITHDRAWAL_EPOCH_LENGTH: i32 = 2;

/// Upper bound on the free-form data a sidechain creation may carry.
pub const MAX_SC_CUSTOM_DATA_LEN: usize = 1024;

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn amount_range() {
		assert!(valid_amount(0));
		assert!(valid_amount(MAX_MONEY));
		assert!(!valid_amount(-1));
		assert!(!valid_amount(MAX_MONEY + 1));
	}
}
