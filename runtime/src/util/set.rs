// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use cid::Cid;
use fvm_ipld_blockstore::Blockstore;

use crate::{ActorError, Config, Map, MapKey};

/// A persistent set of keys, stored as a map with unit values.
pub struct Set<BS: Blockstore, K: MapKey>(Map<BS, K, ()>);

impl<BS: Blockstore, K: MapKey> Set<BS, K> {
    pub fn empty(bs: BS, config: Config, name: &'static str) -> Self {
        Self(Map::empty(bs, config, name))
    }

    pub fn load(
        bs: BS,
        root: &Cid,
        config: Config,
        name: &'static str,
    ) -> Result<Self, ActorError> {
        Map::load(bs, root, config, name).map(Self)
    }

    pub fn flush(&mut self) -> Result<Cid, ActorError> {
        self.0.flush()
    }

    /// Inserts `key`, which may already be present.
    pub fn insert(&mut self, key: &K) -> Result<(), ActorError> {
        self.0.set(key, ()).map(drop)
    }

    pub fn contains(&self, key: &K) -> Result<bool, ActorError> {
        self.0.contains_key(key)
    }

    /// Removes `key`, returning whether it was a member.
    pub fn remove(&mut self, key: &K) -> Result<bool, ActorError> {
        self.0.delete(key).map(|prev| prev.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn for_each<F>(&self, mut f: F) -> Result<(), ActorError>
    where
        F: FnMut(K) -> Result<(), ActorError>,
    {
        self.0.for_each(|k, _| f(k))
    }

    /// All members, in storage order.
    pub fn keys(&self) -> Result<Vec<K>, ActorError> {
        let mut keys = Vec::new();
        self.for_each(|k| {
            keys.push(k);
            Ok(())
        })?;
        Ok(keys)
    }
}
