// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

pub use self::batch_return::*;
pub use self::map::*;
pub use self::message_accumulator::MessageAccumulator;
pub use self::set::Set;
pub use self::set_multimap::{SetMultimap, SetMultimapConfig};

mod batch_return;
pub mod cbor;
mod map;
mod message_accumulator;
mod set;
mod set_multimap;
