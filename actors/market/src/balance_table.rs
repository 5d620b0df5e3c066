// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::cmp::{max, min};

use cid::Cid;
use fvm_ipld_blockstore::Blockstore;
use fvm_shared::address::Address;
use fvm_shared::econ::TokenAmount;
use num_traits::{Signed, Zero};

use fil_market_runtime::{actor_error, ActorError, Config, Map, DEFAULT_HAMT_CONFIG};

pub const BALANCE_TABLE_BITWIDTH: u32 = 6;
pub const BALANCE_TABLE_CONFIG: Config =
    Config { bit_width: BALANCE_TABLE_BITWIDTH, ..DEFAULT_HAMT_CONFIG };

/// Token amounts per ID address. Absent entries read as zero and zero amounts are never
/// stored, so two tables with the same non-zero balances share a root.
pub struct BalanceTable<BS: Blockstore>(pub Map<BS, Address, TokenAmount>);

impl<BS> BalanceTable<BS>
where
    BS: Blockstore,
{
    pub fn new(bs: BS, name: &'static str) -> Self {
        Self(Map::empty(bs, BALANCE_TABLE_CONFIG, name))
    }

    pub fn from_root(bs: BS, cid: &Cid, name: &'static str) -> Result<Self, ActorError> {
        Map::load(bs, cid, BALANCE_TABLE_CONFIG, name).map(Self)
    }

    /// Flushes pending writes and returns the new root.
    pub fn root(&mut self) -> Result<Cid, ActorError> {
        self.0.flush()
    }

    pub fn get(&self, key: &Address) -> Result<TokenAmount, ActorError> {
        Ok(self.0.get(key)?.cloned().unwrap_or_default())
    }

    /// Adds `value` (which may be negative) to the balance of `key`.
    /// Fails, leaving the table unchanged, if the balance would become negative.
    pub fn add(&mut self, key: &Address, value: &TokenAmount) -> Result<(), ActorError> {
        let prev = self.get(key)?;
        let next = &prev + value;
        if next.is_negative() {
            return Err(actor_error!(
                illegal_argument,
                "negative balance for {} adding {} to {}",
                key,
                value,
                prev
            ));
        }
        self.write(key, next)
    }

    /// Takes as much of `req` as possible from `key` without going below `floor`.
    /// Returns the amount taken, which is never negative.
    pub fn subtract_with_minimum(
        &mut self,
        key: &Address,
        req: &TokenAmount,
        floor: &TokenAmount,
    ) -> Result<TokenAmount, ActorError> {
        let prev = self.get(key)?;
        let available = max(TokenAmount::zero(), &prev - floor);
        let taken = min(available, req.clone());
        if taken.is_positive() {
            self.write(key, prev - &taken)?;
        }
        Ok(taken)
    }

    /// Takes exactly `req` from `key`, failing if the balance is smaller.
    pub fn must_subtract(&mut self, key: &Address, req: &TokenAmount) -> Result<(), ActorError> {
        let prev = self.get(key)?;
        if req > &prev {
            return Err(actor_error!(
                illegal_argument,
                "couldn't subtract {} from balance {} of {}",
                req,
                prev,
                key
            ));
        }
        self.write(key, prev - req)
    }

    /// Sum of all balances.
    pub fn total(&self) -> Result<TokenAmount, ActorError> {
        let mut total = TokenAmount::zero();
        self.0.for_each(|_, v: &TokenAmount| {
            total += v;
            Ok(())
        })?;
        Ok(total)
    }

    fn write(&mut self, key: &Address, amount: TokenAmount) -> Result<(), ActorError> {
        if amount.is_zero() {
            self.0.delete(key)?;
        } else {
            self.0.set(key, amount)?;
        }
        Ok(())
    }
}
