use std::fmt::Debug;
use std::marker::PhantomData;

use anyhow::anyhow;
use cid::Cid;
use fvm_ipld_blockstore::Blockstore;
use fvm_ipld_hamt as hamt;
use fvm_shared::address::Address;
use fvm_shared::error::ExitCode;
use integer_encoding::VarInt;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::builtin::HAMT_BIT_WIDTH;
use crate::{ActorError, AsActorError, Hasher};

pub type Config = hamt::Config;

pub const DEFAULT_HAMT_CONFIG: Config =
    Config { bit_width: HAMT_BIT_WIDTH, min_data_depth: 0, max_array_width: 3 };

/// A key of a persistent map. Keys are stored as their byte encoding, which must
/// round-trip exactly.
pub trait MapKey: Sized + Debug {
    fn from_bytes(b: &[u8]) -> Result<Self, String>;
    fn to_bytes(&self) -> Result<Vec<u8>, String>;
}

/// A HAMT with typed keys and values.
///
/// Every storage failure is reported as an illegal state error naming the map, since
/// actor state that cannot be read or written is corrupt from the caller's point of view.
pub struct Map<BS, K, V>
where
    BS: Blockstore,
    K: MapKey,
    V: DeserializeOwned + Serialize,
{
    hamt: hamt::Hamt<BS, V, hamt::BytesKey, Hasher>,
    name: &'static str,
    key_type: PhantomData<K>,
}

impl<BS, K, V> Map<BS, K, V>
where
    BS: Blockstore,
    K: MapKey,
    V: DeserializeOwned + Serialize,
{
    pub fn empty(store: BS, config: Config, name: &'static str) -> Self {
        Self { hamt: hamt::Hamt::new_with_config(store, config), name, key_type: PhantomData }
    }

    /// Root of an empty map written with `config`.
    pub fn flush_empty(store: BS, config: Config) -> Result<Cid, ActorError> {
        Self::empty(store, config, "empty").flush()
    }

    /// Loads the map rooted at `root`. `config` must match the one it was written with.
    pub fn load(
        store: BS,
        root: &Cid,
        config: Config,
        name: &'static str,
    ) -> Result<Self, ActorError> {
        let hamt = hamt::Hamt::load_with_config(root, store, config)
            .with_context_code(ExitCode::USR_ILLEGAL_STATE, || {
                format!("failed to load {} at {}", name, root)
            })?;
        Ok(Self { hamt, name, key_type: PhantomData })
    }

    pub fn flush(&mut self) -> Result<Cid, ActorError> {
        let name = self.name;
        self.hamt
            .flush()
            .with_context_code(ExitCode::USR_ILLEGAL_STATE, || format!("failed to flush {}", name))
    }

    pub fn store(&self) -> &BS {
        self.hamt.store()
    }

    pub fn is_empty(&self) -> bool {
        self.hamt.is_empty()
    }

    pub fn get(&self, key: &K) -> Result<Option<&V>, ActorError> {
        let k = encode_key(key)?;
        self.hamt.get(&k).with_context_code(ExitCode::USR_ILLEGAL_STATE, || {
            format!("failed to read {:?} from {}", key, self.name)
        })
    }

    pub fn contains_key(&self, key: &K) -> Result<bool, ActorError> {
        let k = encode_key(key)?;
        self.hamt.contains_key(&k).with_context_code(ExitCode::USR_ILLEGAL_STATE, || {
            format!("failed to look up {:?} in {}", key, self.name)
        })
    }

    /// Stores `value` under `key`, returning the value it replaced.
    pub fn set(&mut self, key: &K, value: V) -> Result<Option<V>, ActorError>
    where
        V: PartialEq,
    {
        let k = encode_key(key)?;
        let name = self.name;
        self.hamt
            .set(k.into(), value)
            .with_context_code(ExitCode::USR_ILLEGAL_STATE, || {
                format!("failed to write {:?} to {}", key, name)
            })
    }

    /// Removes `key`, returning the value that was stored under it.
    pub fn delete(&mut self, key: &K) -> Result<Option<V>, ActorError> {
        let k = encode_key(key)?;
        let name = self.name;
        let removed = self.hamt.delete(&k).with_context_code(ExitCode::USR_ILLEGAL_STATE, || {
            format!("failed to delete {:?} from {}", key, name)
        })?;
        Ok(removed.map(|(_, v)| v))
    }

    /// Visits every entry. An error returned by `f` stops the traversal and is returned as is.
    pub fn for_each<F>(&self, mut f: F) -> Result<(), ActorError>
    where
        F: FnMut(K, &V) -> Result<(), ActorError>,
    {
        let name = self.name;
        self.hamt
            .for_each(|k, v| {
                let key = K::from_bytes(k).context_code(ExitCode::USR_ILLEGAL_STATE, "bad key")?;
                f(key, v).map_err(|e| anyhow!(e))
            })
            .map_err(|err| match err {
                hamt::Error::Dynamic(e) => e.downcast::<ActorError>().unwrap_or_else(|e| {
                    ActorError::illegal_state(format!("failed visiting {}: {}", name, e))
                }),
                e => ActorError::illegal_state(format!("failed to traverse {}: {}", name, e)),
            })
    }
}

fn encode_key<K: MapKey>(key: &K) -> Result<Vec<u8>, ActorError> {
    key.to_bytes()
        .with_context_code(ExitCode::USR_ASSERTION_FAILED, || format!("unencodable key {:?}", key))
}

fn decode_varint<T: VarInt>(b: &[u8]) -> Result<T, String> {
    match T::decode_var(b) {
        Some((v, n)) if n == b.len() => Ok(v),
        Some(_) => Err(format!("trailing bytes after varint in {:?}", b)),
        None => Err(format!("invalid varint {:?}", b)),
    }
}

// Deal ids and epochs.
macro_rules! varint_map_key {
    ($($t:ty),*) => {
        $(impl MapKey for $t {
            fn from_bytes(b: &[u8]) -> Result<Self, String> {
                decode_varint(b)
            }

            fn to_bytes(&self) -> Result<Vec<u8>, String> {
                Ok(self.encode_var_vec())
            }
        })*
    };
}

varint_map_key!(u64, i64);

impl MapKey for Address {
    fn from_bytes(b: &[u8]) -> Result<Self, String> {
        Address::from_bytes(b).map_err(|e| e.to_string())
    }

    fn to_bytes(&self) -> Result<Vec<u8>, String> {
        Ok(Address::to_bytes(*self))
    }
}
