// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use fvm_shared::ActorID;

use crate::runtime::builtins::Type;
use crate::runtime::Runtime;

pub const HAMT_BIT_WIDTH: u32 = 5;

/// Caller types that can sign messages directly.
pub const CALLER_TYPES_SIGNABLE: &[Type] = &[Type::Account, Type::Multisig];

/// Resolves the builtin actor type of the actor at an ID, if it is a builtin actor.
pub fn builtin_actor_type(rt: &impl Runtime, id: ActorID) -> Option<Type> {
    rt.get_actor_code_cid(&id).and_then(|code| rt.resolve_builtin_actor_type(&code))
}
