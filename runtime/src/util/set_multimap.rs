// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::marker::PhantomData;

use cid::Cid;
use fvm_ipld_blockstore::Blockstore;

use crate::{ActorError, Config, Map, MapKey};

use super::Set;

const INNER_NAME: &str = "multimap values";

pub struct SetMultimapConfig {
    pub outer: Config,
    pub inner: Config,
}

/// A map from keys to sets of values, stored as a map of set roots.
/// An empty set is never stored: removing the last value of a key removes the key.
pub struct SetMultimap<BS, K, V>
where
    BS: Blockstore,
    K: MapKey,
    V: MapKey,
{
    outer: Map<BS, K, Cid>,
    inner_config: Config,
    value_type: PhantomData<V>,
}

impl<BS, K, V> SetMultimap<BS, K, V>
where
    BS: Blockstore + Clone,
    K: MapKey,
    V: MapKey,
{
    pub fn empty(bs: BS, config: SetMultimapConfig, name: &'static str) -> Self {
        Self {
            outer: Map::empty(bs, config.outer, name),
            inner_config: config.inner,
            value_type: PhantomData,
        }
    }

    pub fn load(
        bs: BS,
        root: &Cid,
        config: SetMultimapConfig,
        name: &'static str,
    ) -> Result<Self, ActorError> {
        Ok(Self {
            outer: Map::load(bs, root, config.outer, name)?,
            inner_config: config.inner,
            value_type: PhantomData,
        })
    }

    pub fn flush(&mut self) -> Result<Cid, ActorError> {
        self.outer.flush()
    }

    pub fn put(&mut self, key: &K, value: V) -> Result<(), ActorError> {
        self.put_many(key, std::slice::from_ref(&value))
    }

    pub fn put_many(&mut self, key: &K, values: &[V]) -> Result<(), ActorError> {
        if values.is_empty() {
            return Ok(());
        }
        self.update(key, |set| values.iter().try_for_each(|v| set.insert(v)))
    }

    /// The set stored under `key`, if any.
    pub fn get(&self, key: &K) -> Result<Option<Set<BS, V>>, ActorError> {
        self.outer.get(key)?.map(|root| self.load_inner(root)).transpose()
    }

    pub fn remove(&mut self, key: &K, value: V) -> Result<(), ActorError> {
        if self.outer.contains_key(key)? {
            self.update(key, |set| set.remove(&value).map(drop))?;
        }
        Ok(())
    }

    /// Drops `key` and all of its values. Absent keys are ignored.
    pub fn remove_all(&mut self, key: &K) -> Result<(), ActorError> {
        self.outer.delete(key).map(drop)
    }

    /// Visits every key with the root of its value set.
    pub fn for_each<F>(&self, f: F) -> Result<(), ActorError>
    where
        F: FnMut(K, &Cid) -> Result<(), ActorError>,
    {
        self.outer.for_each(f)
    }

    /// Visits the values under `key`.
    pub fn for_each_in<F>(&self, key: &K, f: F) -> Result<(), ActorError>
    where
        F: FnMut(V) -> Result<(), ActorError>,
    {
        match self.get(key)? {
            Some(set) => set.for_each(f),
            None => Ok(()),
        }
    }

    fn load_inner(&self, root: &Cid) -> Result<Set<BS, V>, ActorError> {
        Set::load(self.outer.store().clone(), root, self.inner_config.clone(), INNER_NAME)
    }

    /// Applies `f` to the set under `key`, starting from an empty set if there is none,
    /// and writes the result back.
    fn update<F>(&mut self, key: &K, f: F) -> Result<(), ActorError>
    where
        F: FnOnce(&mut Set<BS, V>) -> Result<(), ActorError>,
    {
        let mut set = match self.get(key)? {
            Some(set) => set,
            None => Set::empty(self.outer.store().clone(), self.inner_config.clone(), INNER_NAME),
        };
        f(&mut set)?;

        if set.is_empty() {
            self.outer.delete(key)?;
        } else {
            let root = set.flush()?;
            self.outer.set(key, root)?;
        }
        Ok(())
    }
}
