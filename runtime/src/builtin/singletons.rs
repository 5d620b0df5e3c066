// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use fvm_shared::address::Address;

/// Constructs the market and is the only actor allowed to.
pub const SYSTEM_ACTOR_ADDR: Address = Address::new_id(0);

/// Invokes the market's end-of-epoch tick.
pub const CRON_ACTOR_ADDR: Address = Address::new_id(3);

/// Slashed collateral and timeout penalties are sent here.
pub const BURNT_FUNDS_ACTOR_ADDR: Address = Address::new_id(99);
