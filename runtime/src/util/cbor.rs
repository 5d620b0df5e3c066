// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use fvm_ipld_encoding::ipld_block::IpldBlock;
use fvm_ipld_encoding::to_vec;
use fvm_shared::error::ExitCode;
use serde::{de, ser};

use crate::{ActorError, AsActorError};

/// Serializes a structure as a CBOR vector of bytes, returning a serialization error on failure.
/// `desc` is a noun phrase for the object being serialized, included in any error message.
pub fn serialize_vec<T>(value: &T, desc: &str) -> Result<Vec<u8>, ActorError>
where
    T: ser::Serialize + ?Sized,
{
    to_vec(value)
        .map_err(|e| ActorError::serialization(format!("failed to serialize {}: {}", desc, e)))
}

/// Deserializes the return value of a send, which must be present.
pub fn deserialize_block<T>(ret: Option<IpldBlock>) -> Result<T, ActorError>
where
    T: de::DeserializeOwned,
{
    ret.context_code(ExitCode::USR_ASSERTION_FAILED, "return expected")?
        .deserialize()
        .exit_code(ExitCode::USR_SERIALIZATION)
}
