// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use cid::Cid;
use fvm_ipld_blockstore::Blockstore;
use fvm_ipld_encoding::ipld_block::IpldBlock;
use fvm_ipld_encoding::CborStore;
use fvm_shared::address::Address;
use fvm_shared::clock::ChainEpoch;
use fvm_shared::crypto::signature::Signature;
use fvm_shared::econ::TokenAmount;
use fvm_shared::error::ExitCode;
use fvm_shared::{ActorID, MethodNum};
use multihash::Code;
use serde::de::DeserializeOwned;
use serde::Serialize;

pub use self::actor_code::*;
pub use self::policy::*;
use crate::runtime::builtins::Type;
use crate::{actor_error, ActorError, AsActorError};

mod actor_code;
pub mod builtins;
pub mod policy;

/// The host environment of an executing actor method.
pub trait Runtime: Primitives + RuntimePolicy {
    type Blockstore: Blockstore;

    /// The message being executed.
    fn message(&self) -> &dyn MessageInfo;

    /// Epoch of the block that includes the message. Genesis is epoch zero.
    fn curr_epoch(&self) -> ChainEpoch;

    // Caller validation. Every exported method performs exactly one of these before it returns.

    fn validate_immediate_caller_accept_any(&self) -> Result<(), ActorError>;

    /// Aborts with forbidden unless the caller is one of `addresses`.
    fn validate_immediate_caller_is<'a, I>(&self, addresses: I) -> Result<(), ActorError>
    where
        I: IntoIterator<Item = &'a Address>;

    /// Aborts with forbidden unless the caller's code is one of the builtin `types`.
    fn validate_immediate_caller_type<'a, I>(&self, types: I) -> Result<(), ActorError>
    where
        I: IntoIterator<Item = &'a Type>;

    /// The ID an address is bound to, or `None` if it is not bound to any actor.
    /// ID addresses resolve to themselves.
    fn resolve_address(&self, address: &Address) -> Option<ActorID>;

    fn get_actor_code_cid(&self, id: &ActorID) -> Option<Cid>;

    /// The builtin actor type implemented by `code_id`, if any.
    fn resolve_builtin_actor_type(&self, code_id: &Cid) -> Option<Type>;

    /// Writes the initial state of the actor. Fails if state already exists.
    fn create<T: Serialize>(&self, obj: &T) -> Result<(), ActorError> {
        if self.get_state_root()?.is_some() {
            return Err(actor_error!(illegal_state; "actor state already exists"));
        }
        let root = self
            .store()
            .put_cbor(obj, Code::Blake2b256)
            .context_code(ExitCode::USR_ILLEGAL_STATE, "failed to write initial state")?;
        self.set_state_root(&root)
    }

    /// A read-only copy of the actor's state.
    fn state<T: DeserializeOwned>(&self) -> Result<T, ActorError> {
        let root = self
            .get_state_root()?
            .context_code(ExitCode::USR_ILLEGAL_STATE, "actor has no state")?;
        let state = self
            .store()
            .get_cbor(&root)
            .context_code(ExitCode::USR_SERIALIZATION, "failed to decode actor state")?;
        state.with_context_code(ExitCode::USR_ILLEGAL_STATE, || {
            format!("no actor state at root {}", root)
        })
    }

    /// The state root, `None` before construction.
    fn get_state_root(&self) -> Result<Option<Cid>, ActorError>;

    fn set_state_root(&self, root: &Cid) -> Result<(), ActorError>;

    /// Runs `f` on a mutable copy of the state and, if it succeeds, stores the result as
    /// the new state. Nothing is written when `f` fails. Sends are forbidden inside `f`.
    fn transaction<S, RT, F>(&self, f: F) -> Result<RT, ActorError>
    where
        S: Serialize + DeserializeOwned,
        F: FnOnce(&mut S, &Self) -> Result<RT, ActorError>;

    fn store(&self) -> &Self::Blockstore;

    /// Invokes `method` on `to`, transferring `value`. A failed invocation surfaces as an
    /// error with the callee's exit code.
    fn send(
        &self,
        to: &Address,
        method: MethodNum,
        params: Option<IpldBlock>,
        value: TokenAmount,
    ) -> Result<Option<IpldBlock>, ActorError>;
}

/// Envelope of the message being executed.
pub trait MessageInfo {
    /// ID address of the immediate caller.
    fn caller(&self) -> Address;

    /// Tokens sent with the message. Already included in the receiver's balance.
    fn value_received(&self) -> TokenAmount;
}

/// Pure functions provided by the host.
pub trait Primitives {
    /// Checks that `signature` over `plaintext` was produced by `signer`.
    fn verify_signature(
        &self,
        signature: &Signature,
        signer: &Address,
        plaintext: &[u8],
    ) -> Result<(), anyhow::Error>;
}
