// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use fvm_ipld_amt::Amt;
use fvm_ipld_hamt::Sha256;

pub use self::actor_error::*;
pub use self::builtin::*;
pub use self::dispatch::*;
pub use self::util::*;
pub use fvm_ipld_amt;
pub use fvm_ipld_hamt;

#[cfg(feature = "test_utils")]
#[macro_use]
extern crate lazy_static;

pub mod actor_error;
pub mod builtin;
mod dispatch;
pub mod runtime;
pub mod util;

#[cfg(feature = "test_utils")]
pub mod test_utils;

/// Hasher used for all HAMTs in actor state.
pub type Hasher = Sha256;

/// Array type used for deal proposals and deal states.
pub type Array<'bs, V, BS> = Amt<V, &'bs BS>;
