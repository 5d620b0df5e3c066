// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt::Debug;

use cid::multihash::{Code, Multihash, MultihashDigest};
use cid::Cid;
use fvm_ipld_blockstore::MemoryBlockstore;
use fvm_ipld_encoding::ipld_block::IpldBlock;
use fvm_ipld_encoding::CborStore;
use fvm_shared::address::{Address, Protocol};
use fvm_shared::clock::ChainEpoch;
use fvm_shared::commcid::FIL_COMMITMENT_UNSEALED;
use fvm_shared::crypto::signature::Signature;
use fvm_shared::econ::TokenAmount;
use fvm_shared::error::ExitCode;
use fvm_shared::{ActorID, MethodNum};
use num_traits::FromPrimitive;
use rand::prelude::*;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::runtime::builtins::Type;
use crate::runtime::{ActorCode, MessageInfo, Policy, Primitives, Runtime, RuntimePolicy};
use crate::{actor_error, ActorError};

lazy_static! {
    pub static ref SYSTEM_ACTOR_CODE_ID: Cid = builtin_code(Type::System);
    pub static ref CRON_ACTOR_CODE_ID: Cid = builtin_code(Type::Cron);
    pub static ref ACCOUNT_ACTOR_CODE_ID: Cid = builtin_code(Type::Account);
    pub static ref MINER_ACTOR_CODE_ID: Cid = builtin_code(Type::Miner);
    pub static ref PAYCH_ACTOR_CODE_ID: Cid = builtin_code(Type::PaymentChannel);
    /// Every builtin type by its test code CID.
    pub static ref ACTOR_TYPES: BTreeMap<Cid, Type> = (0..=u8::MAX as i32)
        .filter_map(Type::from_i32)
        .map(|t| (builtin_code(t), t))
        .collect();
}

const IPLD_RAW: u64 = 0x55;

/// An identity-hashed CID naming the test code of a builtin actor type.
pub fn builtin_code(t: Type) -> Cid {
    let name = format!("fil/test/{}", t.name());
    Cid::new_v1(IPLD_RAW, Multihash::wrap(0, name.as_bytes()).expect("name too long"))
}

/// A runtime for actor tests. The actor's interactions with the outside world (caller
/// validation, sends and signature checks) must each be declared beforehand with an
/// `expect_*` call, and [`MockRuntime::verify`] asserts that all of them happened.
pub struct MockRuntime {
    pub epoch: RefCell<ChainEpoch>,
    pub caller: RefCell<Address>,
    pub caller_type: RefCell<Cid>,
    pub value_received: RefCell<TokenAmount>,
    /// Non-ID addresses and the ID addresses they resolve to.
    pub id_addresses: RefCell<HashMap<Address, Address>>,
    pub actor_code_cids: RefCell<HashMap<Address, Cid>>,
    pub policy: Policy,

    pub store: MemoryBlockstore,
    pub state: RefCell<Option<Cid>>,
    pub balance: RefCell<TokenAmount>,

    pub in_call: RefCell<bool>,
    pub in_transaction: RefCell<bool>,
    pub caller_validated: RefCell<bool>,
    pub expectations: RefCell<Expectations>,
}

impl Default for MockRuntime {
    fn default() -> Self {
        Self {
            epoch: Default::default(),
            caller: RefCell::new(Address::new_id(0)),
            caller_type: Default::default(),
            value_received: Default::default(),
            id_addresses: Default::default(),
            actor_code_cids: Default::default(),
            policy: Default::default(),
            store: MemoryBlockstore::new(),
            state: Default::default(),
            balance: Default::default(),
            in_call: Default::default(),
            in_transaction: Default::default(),
            caller_validated: Default::default(),
            expectations: Default::default(),
        }
    }
}

/// Interactions a test has announced and the actor has not yet performed.
#[derive(Default)]
pub struct Expectations {
    pub validate_caller_any: bool,
    pub validate_caller_addr: Option<Vec<Address>>,
    pub validate_caller_type: Option<Vec<Type>>,
    pub sends: VecDeque<ExpectedMessage>,
    pub verify_sigs: VecDeque<ExpectedVerifySig>,
    verified: bool,
}

impl Expectations {
    fn verify(&mut self) {
        // Taken first so a failed assertion doesn't fail again when dropped.
        self.verified = true;
        let pending = std::mem::take(self);

        assert!(!pending.validate_caller_any, "expected validate-caller-any, not received");
        assert!(
            pending.validate_caller_addr.is_none(),
            "expected validate-caller-addr {:?}, not received",
            pending.validate_caller_addr
        );
        assert!(
            pending.validate_caller_type.is_none(),
            "expected validate-caller-type {:?}, not received",
            pending.validate_caller_type
        );
        assert!(pending.sends.is_empty(), "expected sends not made: {:?}", pending.sends);
        assert!(
            pending.verify_sigs.is_empty(),
            "expected signature checks not made: {:?}",
            pending.verify_sigs
        );
    }
}

impl Drop for Expectations {
    fn drop(&mut self) {
        if !self.verified && !std::thread::panicking() {
            self.verify();
        }
    }
}

#[derive(Clone, Debug)]
pub struct ExpectedMessage {
    pub to: Address,
    pub method: MethodNum,
    pub params: Option<IpldBlock>,
    pub value: TokenAmount,

    /// What the send returns to the actor.
    pub send_return: Option<IpldBlock>,
    pub exit_code: ExitCode,
}

#[derive(Debug)]
pub struct ExpectedVerifySig {
    pub sig: Signature,
    pub signer: Address,
    pub plaintext: Vec<u8>,
    pub result: Result<(), anyhow::Error>,
}

/// Asserts that `res` failed with `exit_code` and a message containing `msg`.
pub fn expect_abort_contains_message<T: Debug>(
    exit_code: ExitCode,
    msg: &str,
    res: Result<T, ActorError>,
) {
    let err = match res {
        Ok(v) => panic!("expected abort with exit code {}, but call returned {:?}", exit_code, v),
        Err(err) => err,
    };
    assert_eq!(
        exit_code,
        err.exit_code(),
        "expected exit code {}, got {} with message: {}",
        exit_code,
        err.exit_code(),
        err.msg()
    );
    assert!(err.msg().contains(msg), "expected message '{}' to contain '{}'", err.msg(), msg);
}

pub fn expect_abort<T: Debug>(exit_code: ExitCode, res: Result<T, ActorError>) {
    expect_abort_contains_message(exit_code, "", res);
}

impl MockRuntime {
    /// Invokes a method of actor `A` as the current caller. State changes are undone if the
    /// method fails. A method that succeeds must have validated its caller.
    pub fn call<A: ActorCode>(
        &self,
        method: MethodNum,
        params: Option<IpldBlock>,
    ) -> Result<Option<IpldBlock>, ActorError> {
        self.in_call.replace(true);
        self.caller_validated.replace(false);
        let prior_state = *self.state.borrow();

        let res = A::invoke_method(self, method, params);
        match &res {
            Ok(_) => assert!(
                *self.caller_validated.borrow(),
                "{} method {} returned without validating its caller",
                A::name(),
                method
            ),
            Err(_) => {
                self.state.replace(prior_state);
            }
        }

        self.in_call.replace(false);
        res
    }

    /// Asserts that every expectation has been met, and clears them.
    pub fn verify(&self) {
        self.expectations.borrow_mut().verify()
    }

    // State and environment

    pub fn get_state<T: DeserializeOwned>(&self) -> T {
        let root = self.state.borrow().expect("actor has no state");
        self.store.get_cbor(&root).unwrap().expect("state root not in store")
    }

    pub fn replace_state<T: Serialize>(&self, obj: &T) {
        self.state.replace(Some(self.put(obj)));
    }

    pub fn get_balance(&self) -> TokenAmount {
        self.balance.borrow().clone()
    }

    pub fn add_balance(&self, amount: TokenAmount) {
        *self.balance.borrow_mut() += amount;
    }

    pub fn set_received(&self, amount: TokenAmount) {
        self.value_received.replace(amount);
    }

    pub fn set_epoch(&self, epoch: ChainEpoch) -> ChainEpoch {
        self.epoch.replace(epoch);
        epoch
    }

    /// Makes `address`, an actor with code `code_id`, the caller of the next call.
    pub fn set_caller(&self, code_id: Cid, address: Address) {
        self.caller.replace(address);
        self.caller_type.replace(code_id);
        self.set_address_actor_type(address, code_id);
    }

    pub fn set_address_actor_type(&self, address: Address, code_id: Cid) {
        self.actor_code_cids.borrow_mut().insert(address, code_id);
    }

    /// Binds `source` to the ID address `target`.
    pub fn add_id_address(&self, source: Address, target: Address) {
        assert_eq!(Protocol::ID, target.protocol(), "{} is not an ID address", target);
        self.id_addresses.borrow_mut().insert(source, target);
    }

    // Expectations

    pub fn expect_validate_caller_any(&self) {
        self.expectations.borrow_mut().validate_caller_any = true;
    }

    pub fn expect_validate_caller_addr(&self, addrs: Vec<Address>) {
        assert!(!addrs.is_empty(), "no addresses to validate against");
        self.expectations.borrow_mut().validate_caller_addr = Some(addrs);
    }

    pub fn expect_validate_caller_type(&self, types: Vec<Type>) {
        assert!(!types.is_empty(), "no types to validate against");
        self.expectations.borrow_mut().validate_caller_type = Some(types);
    }

    pub fn expect_send(
        &self,
        to: Address,
        method: MethodNum,
        params: Option<IpldBlock>,
        value: TokenAmount,
        send_return: Option<IpldBlock>,
        exit_code: ExitCode,
    ) {
        self.expectations.borrow_mut().sends.push_back(ExpectedMessage {
            to,
            method,
            params,
            value,
            send_return,
            exit_code,
        })
    }

    pub fn expect_verify_signature(&self, exp: ExpectedVerifySig) {
        self.expectations.borrow_mut().verify_sigs.push_back(exp);
    }

    fn require_in_call(&self) {
        assert!(*self.in_call.borrow(), "runtime used outside of a method call")
    }

    fn put<T: Serialize>(&self, obj: &T) -> Cid {
        self.store.put_cbor(obj, Code::Blake2b256).unwrap()
    }
}

impl MessageInfo for MockRuntime {
    fn caller(&self) -> Address {
        *self.caller.borrow()
    }

    fn value_received(&self) -> TokenAmount {
        self.value_received.borrow().clone()
    }
}

impl Runtime for MockRuntime {
    type Blockstore = MemoryBlockstore;

    fn message(&self) -> &dyn MessageInfo {
        self.require_in_call();
        self
    }

    fn curr_epoch(&self) -> ChainEpoch {
        self.require_in_call();
        *self.epoch.borrow()
    }

    fn validate_immediate_caller_accept_any(&self) -> Result<(), ActorError> {
        self.require_in_call();
        let expected = std::mem::take(&mut self.expectations.borrow_mut().validate_caller_any);
        assert!(expected, "unexpected validate-caller-any");
        self.caller_validated.replace(true);
        Ok(())
    }

    fn validate_immediate_caller_is<'a, I>(&self, addresses: I) -> Result<(), ActorError>
    where
        I: IntoIterator<Item = &'a Address>,
    {
        self.require_in_call();
        let addrs: Vec<Address> = addresses.into_iter().copied().collect();
        if addrs.is_empty() {
            return Err(actor_error!(illegal_argument; "no addresses to validate against"));
        }

        let expected = self.expectations.borrow_mut().validate_caller_addr.take();
        assert_eq!(Some(&addrs), expected.as_ref(), "unexpected validate-caller-addr");
        self.caller_validated.replace(true);

        let caller = *self.caller.borrow();
        if !addrs.contains(&caller) {
            return Err(actor_error!(forbidden; "caller {} is not one of {:?}", caller, addrs));
        }
        Ok(())
    }

    fn validate_immediate_caller_type<'a, I>(&self, types: I) -> Result<(), ActorError>
    where
        I: IntoIterator<Item = &'a Type>,
    {
        self.require_in_call();
        let types: Vec<Type> = types.into_iter().copied().collect();
        if types.is_empty() {
            return Err(actor_error!(illegal_argument; "no types to validate against"));
        }

        let expected = self.expectations.borrow_mut().validate_caller_type.take();
        assert_eq!(Some(&types), expected.as_ref(), "unexpected validate-caller-type");
        self.caller_validated.replace(true);

        let caller_type = self.resolve_builtin_actor_type(&self.caller_type.borrow());
        match caller_type {
            Some(t) if types.contains(&t) => Ok(()),
            _ => Err(actor_error!(forbidden;
                "caller type {:?} is not one of {:?}", caller_type, types)),
        }
    }

    fn resolve_address(&self, address: &Address) -> Option<ActorID> {
        match address.id() {
            Ok(id) => Some(id),
            Err(_) => self.id_addresses.borrow().get(address).and_then(|a| a.id().ok()),
        }
    }

    fn get_actor_code_cid(&self, id: &ActorID) -> Option<Cid> {
        self.require_in_call();
        self.actor_code_cids.borrow().get(&Address::new_id(*id)).copied()
    }

    fn resolve_builtin_actor_type(&self, code_id: &Cid) -> Option<Type> {
        ACTOR_TYPES.get(code_id).copied()
    }

    fn get_state_root(&self) -> Result<Option<Cid>, ActorError> {
        Ok(*self.state.borrow())
    }

    fn set_state_root(&self, root: &Cid) -> Result<(), ActorError> {
        self.state.replace(Some(*root));
        Ok(())
    }

    fn transaction<S, RT, F>(&self, f: F) -> Result<RT, ActorError>
    where
        S: Serialize + DeserializeOwned,
        F: FnOnce(&mut S, &Self) -> Result<RT, ActorError>,
    {
        if self.in_transaction.replace(true) {
            return Err(actor_error!(assertion_failed; "nested transaction"));
        }
        let res = self.state().and_then(|mut st: S| {
            let ret = f(&mut st, self)?;
            self.state.replace(Some(self.put(&st)));
            Ok(ret)
        });
        self.in_transaction.replace(false);
        res
    }

    fn store(&self) -> &MemoryBlockstore {
        &self.store
    }

    fn send(
        &self,
        to: &Address,
        method: MethodNum,
        params: Option<IpldBlock>,
        value: TokenAmount,
    ) -> Result<Option<IpldBlock>, ActorError> {
        self.require_in_call();
        if *self.in_transaction.borrow() {
            return Err(actor_error!(assertion_failed; "send within transaction"));
        }

        let expected = self.expectations.borrow_mut().sends.pop_front().unwrap_or_else(|| {
            panic!(
                "unexpected send to {} method {} value {} params {:?}",
                to, method, value, params
            )
        });
        assert!(
            expected.to == *to
                && expected.method == method
                && expected.params == params
                && expected.value == value,
            "send to {} method {} value {} params {:?} does not match expected {:?}",
            to,
            method,
            value,
            params,
            expected
        );

        let mut balance = self.balance.borrow_mut();
        if value > *balance {
            return Err(ActorError::unchecked(
                ExitCode::SYS_SENDER_STATE_INVALID,
                format!("cannot send {} with balance {}", value, *balance),
            ));
        }
        *balance -= value;

        if expected.exit_code.is_success() {
            Ok(expected.send_return)
        } else {
            Err(ActorError::unchecked(expected.exit_code, format!("send to {} failed", to)))
        }
    }
}

impl Primitives for MockRuntime {
    fn verify_signature(
        &self,
        signature: &Signature,
        signer: &Address,
        plaintext: &[u8],
    ) -> anyhow::Result<()> {
        let exp = self.expectations.borrow_mut().verify_sigs.pop_front().unwrap_or_else(|| {
            panic!("unexpected signature check by {} over {:?}", signer, plaintext)
        });
        assert!(
            exp.sig == *signature && exp.signer == *signer && exp.plaintext[..] == *plaintext,
            "signature check by {} over {:?} does not match expected {:?}",
            signer,
            plaintext,
            exp
        );
        exp.result
    }
}

impl RuntimePolicy for MockRuntime {
    fn policy(&self) -> &Policy {
        &self.policy
    }
}

/// An unsealed piece commitment CID derived from `input`.
pub fn make_piece_cid(input: &[u8]) -> Cid {
    Cid::new_v1(FIL_COMMITMENT_UNSEALED, Code::Sha2_256.digest(input))
}

/// A BLS address derived deterministically from `seed`.
pub fn new_bls_addr(seed: u8) -> Address {
    let mut rng = StdRng::from_seed([seed; 32]);
    let mut key = [0u8; 48];
    rng.fill_bytes(&mut key);
    Address::new_bls(&key).unwrap()
}

/// Installs a logger for test output, honoring RUST_LOG. Safe to call from every test.
pub fn init_logging() {
    let _ = pretty_env_logger::try_init();
}
