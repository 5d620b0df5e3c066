// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::collections::{BTreeMap, BTreeSet, HashSet};

use fvm_shared::address::Address;
use fvm_shared::clock::{ChainEpoch, EPOCH_UNDEFINED};
use fvm_shared::deal::DealID;
use fvm_shared::econ::TokenAmount;
use fvm_shared::{ActorID, METHOD_CONSTRUCTOR, METHOD_SEND};
use log::{debug, info};
use num_derive::FromPrimitive;
use num_traits::{Signed, Zero};

use fil_market_runtime::cbor::{deserialize_block, serialize_vec};
use fil_market_runtime::runtime::builtins::Type;
use fil_market_runtime::runtime::{ActorCode, Runtime};
use fil_market_runtime::{
    actor_dispatch, actor_error, builtin_actor_type, ActorContext, ActorError, BatchReturnGen,
    BURNT_FUNDS_ACTOR_ADDR, CALLER_TYPES_SIGNABLE, CRON_ACTOR_ADDR, SYSTEM_ACTOR_ADDR,
};

pub use self::deal::*;
use self::policy::*;
pub use self::state::*;
pub use self::types::*;

// exports for testing
pub mod balance_table;
#[doc(hidden)]
pub mod ext;
pub mod policy;
pub mod testing;

mod deal;
mod state;
mod types;

/// Market actor methods available
#[derive(FromPrimitive)]
#[repr(u64)]
pub enum Method {
    Constructor = METHOD_CONSTRUCTOR,
    AddBalance = 2,
    WithdrawBalance = 3,
    PublishStorageDeals = 4,
    ActivateDeals = 6,
    OnMinerSectorsTerminate = 7,
    CronTick = 9,
    GetBalance = 10,
    GetDealActivation = 11,
    GetDealTerm = 12,
}

/// Market Actor
pub struct Actor;

impl Actor {
    pub fn constructor(rt: &impl Runtime) -> Result<(), ActorError> {
        rt.validate_immediate_caller_is(std::iter::once(&SYSTEM_ACTOR_ADDR))?;
        let st = State::new(rt.store())?;
        rt.create(&st)
    }

    /// Deposits the value sent with the message into the escrow of a client or provider.
    fn add_balance(rt: &impl Runtime, provider_or_client: Address) -> Result<(), ActorError> {
        let amount = rt.message().value_received();
        let account = EscrowAccount::authorize(rt, &provider_or_client)?;

        rt.transaction(|st: &mut State, rt| st.deposit(rt.store(), &account.holder, &amount))?;

        debug!("deposited {} to escrow of {}", amount, account.holder);
        Ok(())
    }

    /// Withdraws up to the requested amount of unlocked escrow. Provider funds go to the
    /// provider's owner, client funds to the client.
    fn withdraw_balance(
        rt: &impl Runtime,
        params: WithdrawBalanceParams,
    ) -> Result<WithdrawBalanceReturn, ActorError> {
        if params.amount.is_negative() {
            return Err(actor_error!(illegal_argument; "negative amount: {}", params.amount));
        }
        let account = EscrowAccount::authorize(rt, &params.provider_or_client)?;

        let withdrawn = rt.transaction(|st: &mut State, rt| {
            st.withdraw(rt.store(), &account.holder, &params.amount)
        })?;

        rt.send(&account.recipient, METHOD_SEND, None, withdrawn.clone())?;

        debug!(
            "withdrew {} of {} requested from escrow of {} to {}",
            withdrawn, params.amount, account.holder, account.recipient
        );
        Ok(WithdrawBalanceReturn { amount_withdrawn: withdrawn })
    }

    fn get_balance(rt: &impl Runtime, account: Address) -> Result<GetBalanceReturn, ActorError> {
        rt.validate_immediate_caller_accept_any()?;
        let id = rt
            .resolve_address(&account)
            .ok_or_else(|| {
                actor_error!(illegal_argument; "failed to resolve address {}", account)
            })?;
        let account = Address::new_id(id);

        let st: State = rt.state()?;
        Ok(GetBalanceReturn {
            balance: st.escrow_balance(rt.store(), &account)?,
            locked: st.locked_balance(rt.store(), &account)?,
        })
    }

    /// Publishes a batch of signed proposals on behalf of their providers. Each proposal is
    /// checked on its own and rejected ones are left out, with the outcome of every proposal
    /// reported in the return value.
    fn publish_storage_deals(
        rt: &impl Runtime,
        params: PublishStorageDealsParams,
    ) -> Result<PublishStorageDealsReturn, ActorError> {
        // The provider vouches for each deal by sending the message, so only the client's
        // signature is carried in the proposal.
        rt.validate_immediate_caller_type(CALLER_TYPES_SIGNABLE)?;
        let max_deals = rt.policy().max_deals_per_publish;
        if params.deals.is_empty() {
            return Err(actor_error!(illegal_argument; "empty deals parameter"));
        }
        if params.deals.len() > max_deals {
            return Err(actor_error!(illegal_argument;
                "too many deals in batch: {} > {}", params.deals.len(), max_deals));
        }

        let curr_epoch = rt.curr_epoch();
        let providers = authorize_providers(rt, &params.deals)?;

        let st: State = rt.state()?;
        let mut batch = BatchReturnGen::new(params.deals.len());
        let mut accepted: Vec<DealProposal> = Vec::with_capacity(params.deals.len());
        let mut seen: HashSet<Vec<u8>> = HashSet::new();
        let mut pending = PendingLocks::default();

        for (i, deal) in params.deals.iter().enumerate() {
            let checked = validate_deal(rt, deal, curr_epoch, &providers, &mut seen)
                .and_then(|proposal| pending.reserve(rt, &st, proposal));
            match checked {
                Ok(proposal) => {
                    batch.add_success();
                    accepted.push(proposal);
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    info!("rejected deal {} of batch: {}", i, e.msg());
                    batch.add_fail(e.exit_code());
                }
            }
        }

        let ids = rt.transaction(|st: &mut State, rt| st.publish_deals(rt.store(), accepted))?;

        let results = batch.gen();
        info!(
            "published {} of {} deals at epoch {}: {:?}",
            ids.len(),
            results.size(),
            curr_epoch,
            ids
        );
        Ok(PublishStorageDealsReturn { ids, results })
    }

    /// Marks deals as stored in a sector of the calling provider. Fails, activating nothing,
    /// if any of the deals cannot be activated.
    fn activate_deals(rt: &impl Runtime, params: ActivateDealsParams) -> Result<(), ActorError> {
        rt.validate_immediate_caller_type(std::iter::once(&Type::Miner))?;
        let provider = rt.message().caller();
        let curr_epoch = rt.curr_epoch();

        rt.transaction(|st: &mut State, rt| {
            let mut seen: BTreeSet<DealID> = BTreeSet::new();
            let mut activated: Vec<(DealID, DealState)> = Vec::with_capacity(params.deal_ids.len());
            let mut starts: Vec<(ChainEpoch, DealID)> = Vec::with_capacity(params.deal_ids.len());

            for &id in &params.deal_ids {
                if !seen.insert(id) {
                    return Err(actor_error!(illegal_argument;
                        "deal id {} present multiple times", id));
                }
                let proposal = st.get_proposal(rt.store(), id)?;
                check_activation(&proposal, &provider, params.sector_expiry, curr_epoch)
                    .with_context(|| format!("cannot activate deal {}", id))?;

                let state = st.get_deal_state(rt.store(), id)?;
                if state.is_activated() {
                    return Err(actor_error!(illegal_argument;
                        "deal {} already activated at {}", id, state.sector_start_epoch));
                }

                activated.push((
                    id,
                    DealState {
                        sector_start_epoch: curr_epoch,
                        last_updated_epoch: curr_epoch,
                        slash_epoch: EPOCH_UNDEFINED,
                    },
                ));
                starts.push((proposal.start_epoch, id));
            }

            st.put_deal_states(rt.store(), &activated)?;
            st.schedule_deals(rt.store(), starts)
        })?;

        info!("provider {} activated deals {:?} at {}", provider, params.deal_ids, curr_epoch);
        Ok(())
    }

    /// Terminates the deals of sectors the calling provider lost. The deals are settled at
    /// the next cron tick, where the provider forfeits its collateral and the client is
    /// refunded. Deals that are unknown, not active or already over are skipped.
    fn on_miner_sectors_terminate(
        rt: &impl Runtime,
        params: OnMinerSectorsTerminateParams,
    ) -> Result<(), ActorError> {
        rt.validate_immediate_caller_type(std::iter::once(&Type::Miner))?;
        let provider = rt.message().caller();
        let curr_epoch = rt.curr_epoch();

        rt.transaction(|st: &mut State, rt| {
            let settle_at = std::cmp::max(curr_epoch, st.last_cron + 1);
            let mut terminated: Vec<(DealID, DealState)> = Vec::new();

            for &id in &params.deal_ids {
                let proposal = match st.find_proposal(rt.store(), id)? {
                    Some(p) => p,
                    None => {
                        debug!("not terminating deal {}: already settled", id);
                        continue;
                    }
                };
                if proposal.provider != provider {
                    return Err(actor_error!(forbidden;
                        "caller {} is not the provider {} of deal {}",
                        provider, proposal.provider, id));
                }

                let mut state = st.get_deal_state(rt.store(), id)?;
                // Unactivated deals time out through cron on their own.
                if !state.is_activated() || state.is_slashed() || curr_epoch >= proposal.end_epoch
                {
                    debug!(
                        "not terminating deal {}: {:?} ending at {}",
                        id, state, proposal.end_epoch
                    );
                    continue;
                }
                state.slash_epoch = curr_epoch;
                terminated.push((id, state));
            }

            st.put_deal_states(rt.store(), &terminated)?;
            st.schedule_deals(rt.store(), terminated.iter().map(|(id, _)| (settle_at, *id)))
        })?;

        Ok(())
    }

    /// Processes the deals scheduled at every epoch since the previous tick. Active deals are
    /// paid and rescheduled or finished, terminated and never-activated deals are closed out.
    /// Everything forfeit is burnt in one transfer.
    fn cron_tick(rt: &impl Runtime) -> Result<(), ActorError> {
        rt.validate_immediate_caller_is(std::iter::once(&CRON_ACTOR_ADDR))?;
        let curr_epoch = rt.curr_epoch();

        let burn = rt.transaction(|st: &mut State, rt| {
            let mut burn = TokenAmount::zero();
            for epoch in (st.last_cron + 1)..=curr_epoch {
                burn += process_epoch(rt, st, epoch)?;
            }
            if curr_epoch > st.last_cron {
                st.last_cron = curr_epoch;
            }
            Ok(burn)
        })?;

        if burn.is_positive() {
            rt.send(&BURNT_FUNDS_ACTOR_ADDR, METHOD_SEND, None, burn)?;
        }
        Ok(())
    }

    fn get_deal_activation(
        rt: &impl Runtime,
        params: GetDealActivationParams,
    ) -> Result<GetDealActivationReturn, ActorError> {
        rt.validate_immediate_caller_accept_any()?;
        let st: State = rt.state()?;
        st.get_proposal(rt.store(), params.id)?;
        let state = st.get_deal_state(rt.store(), params.id)?;
        Ok(GetDealActivationReturn {
            activated: state.sector_start_epoch,
            terminated: state.slash_epoch,
        })
    }

    fn get_deal_term(
        rt: &impl Runtime,
        params: GetDealTermParams,
    ) -> Result<GetDealTermReturn, ActorError> {
        rt.validate_immediate_caller_accept_any()?;
        let proposal = rt.state::<State>()?.get_proposal(rt.store(), params.id)?;
        Ok(GetDealTermReturn { start: proposal.start_epoch, duration: proposal.duration() })
    }
}

/// Handles every deal scheduled at `epoch` and returns the amount to burn.
fn process_epoch(
    rt: &impl Runtime,
    st: &mut State,
    epoch: ChainEpoch,
) -> Result<TokenAmount, ActorError> {
    let ids = st.deals_due_at(rt.store(), epoch)?;
    if ids.is_empty() {
        return Ok(TokenAmount::zero());
    }

    let mut burn = TokenAmount::zero();
    let mut updated: Vec<(DealID, DealState)> = Vec::new();
    let mut rescheduled: Vec<(ChainEpoch, DealID)> = Vec::new();

    for id in ids {
        // Entries can outlive deals that were settled through another entry.
        let proposal = match st.find_proposal(rt.store(), id)? {
            Some(p) => p,
            None => continue,
        };
        let mut state = st.get_deal_state(rt.store(), id)?;

        if !state.is_activated() {
            if epoch < proposal.start_epoch {
                return Err(actor_error!(illegal_state;
                    "unactivated deal {} due at {} before its start {}",
                    id, epoch, proposal.start_epoch));
            }
            let penalty = st
                .expire_unactivated_deal(rt.store(), &proposal)
                .with_context(|| format!("timing out deal {}", id))?;
            st.remove_deal(rt.store(), id)?;
            info!("deal {} was not activated by {}, provider slashed {}", id, epoch, penalty);
            burn += penalty;
        } else if state.is_slashed() {
            let penalty = st
                .settle_terminated_deal(rt.store(), &proposal, &state)
                .with_context(|| format!("settling terminated deal {}", id))?;
            st.remove_deal(rt.store(), id)?;
            info!("deal {} terminated at {}, provider slashed {}", id, state.slash_epoch, penalty);
            burn += penalty;
        } else {
            let (payment, completed) = st
                .settle_active_deal(rt.store(), &proposal, &state, epoch)
                .with_context(|| format!("settling deal {}", id))?;
            if completed {
                st.remove_deal(rt.store(), id)?;
                info!("deal {} completed at {}, final payment {}", id, epoch, payment);
                continue;
            }
            let next = next_update_epoch(rt.policy(), epoch, proposal.end_epoch);
            debug!("deal {} paid {} at {}, next due at {}", id, payment, epoch, next);
            state.last_updated_epoch = epoch;
            updated.push((id, state));
            rescheduled.push((next, id));
        }
    }

    st.put_deal_states(rt.store(), &updated)?;
    st.clear_epoch(rt.store(), epoch)?;
    st.schedule_deals(rt.store(), rescheduled)?;
    Ok(burn)
}

/// Checks that the caller is the worker of every provider named in the batch. Each distinct
/// provider address is checked once. Returns the ID address of each provider by the address
/// used in the proposals.
fn authorize_providers(
    rt: &impl Runtime,
    deals: &[ClientDealProposal],
) -> Result<BTreeMap<Address, Address>, ActorError> {
    let caller = rt.message().caller();
    let mut providers: BTreeMap<Address, Address> = BTreeMap::new();
    for deal in deals {
        let named = deal.proposal.provider;
        if providers.contains_key(&named) {
            continue;
        }
        let id = rt.resolve_address(&named).ok_or_else(|| {
            actor_error!(illegal_argument; "failed to resolve provider address {}", named)
        })?;
        if builtin_actor_type(rt, id) != Some(Type::Miner) {
            return Err(actor_error!(illegal_argument; "provider {} is not a storage miner", named));
        }
        let control = request_miner_control_addrs(rt, id)?;
        if control.worker != caller {
            return Err(actor_error!(forbidden;
                "caller {} is not worker {} of provider {}", caller, control.worker, named));
        }
        providers.insert(named, Address::new_id(id));
    }
    Ok(providers)
}

/// Checks a signed proposal on its own and returns it with both parties as ID addresses.
fn validate_deal(
    rt: &impl Runtime,
    deal: &ClientDealProposal,
    curr_epoch: ChainEpoch,
    providers: &BTreeMap<Address, Address>,
    seen: &mut HashSet<Vec<u8>>,
) -> Result<DealProposal, ActorError> {
    let proposal = &deal.proposal;
    let bytes = serialize_vec(proposal, "deal proposal")?;
    rt.verify_signature(&deal.client_signature, &proposal.client, &bytes)
        .map_err(|e| actor_error!(illegal_argument; "signature proposal invalid: {}", e))?;

    check_well_formed(rt, proposal, curr_epoch)?;

    let client = rt.resolve_address(&proposal.client).ok_or_else(|| {
        actor_error!(illegal_argument; "failed to resolve client address {}", proposal.client)
    })?;
    if builtin_actor_type(rt, client) == Some(Type::Miner) {
        return Err(actor_error!(illegal_argument; "client {} is a storage miner", proposal.client));
    }
    if !seen.insert(bytes) {
        return Err(actor_error!(illegal_argument; "duplicate deal in batch"));
    }
    let provider = providers.get(&proposal.provider).ok_or_else(|| {
        actor_error!(illegal_state; "provider {} was not authorized", proposal.provider)
    })?;

    Ok(DealProposal { client: Address::new_id(client), provider: *provider, ..proposal.clone() })
}

fn check_well_formed(
    rt: &impl Runtime,
    proposal: &DealProposal,
    curr_epoch: ChainEpoch,
) -> Result<(), ActorError> {
    if proposal.end_epoch <= proposal.start_epoch {
        return Err(actor_error!(illegal_argument; "proposal end before proposal start"));
    }
    if curr_epoch >= proposal.start_epoch {
        return Err(actor_error!(illegal_argument;
            "proposal start epoch {} has already elapsed at {}", proposal.start_epoch, curr_epoch));
    }

    let (min_duration, max_duration) = deal_duration_bounds(rt.policy());
    let duration = proposal.duration();
    if duration < min_duration || duration > max_duration {
        return Err(actor_error!(illegal_argument;
            "deal duration {} out of bounds [{}, {}]", duration, min_duration, max_duration));
    }

    let amounts = [
        &proposal.storage_price_per_epoch,
        &proposal.client_collateral,
        &proposal.provider_collateral,
    ];
    if amounts.iter().any(|amount| amount.is_negative())
    {
        return Err(actor_error!(illegal_argument; "negative price or collateral"));
    }

    proposal
        .piece_size
        .validate()
        .map_err(|e| actor_error!(illegal_argument; "proposal piece size is invalid: {}", e))
}

/// Funds required by deals accepted earlier in the same batch, which are not locked yet.
#[derive(Default)]
struct PendingLocks(BTreeMap<Address, TokenAmount>);

impl PendingLocks {
    /// Accepts `proposal` if both parties can cover it on top of everything already locked or
    /// pending, and adds its requirements to the pending amounts.
    fn reserve(
        &mut self,
        rt: &impl Runtime,
        st: &State,
        proposal: DealProposal,
    ) -> Result<DealProposal, ActorError> {
        let required = [
            (proposal.client, proposal.client_balance_requirement()),
            (proposal.provider, proposal.provider_balance_requirement().clone()),
        ];
        for (party, amount) in &required {
            let pending = self.0.get(party).cloned().unwrap_or_default();
            let available = st.available_balance(rt.store(), party)?;
            if pending + amount > available {
                return Err(actor_error!(insufficient_funds;
                    "insufficient escrow for {} to cover {}", party, amount));
            }
        }
        for (party, amount) in required {
            *self.0.entry(party).or_default() += amount;
        }
        Ok(proposal)
    }
}

fn check_activation(
    proposal: &DealProposal,
    provider: &Address,
    sector_expiry: ChainEpoch,
    curr_epoch: ChainEpoch,
) -> Result<(), ActorError> {
    if &proposal.provider != provider {
        return Err(actor_error!(forbidden;
            "proposal has provider {}, must be {}", proposal.provider, provider));
    }
    if curr_epoch > proposal.start_epoch {
        return Err(actor_error!(illegal_argument;
            "proposal start epoch {} has already elapsed at {}", proposal.start_epoch, curr_epoch));
    }
    if proposal.end_epoch > sector_expiry {
        return Err(actor_error!(illegal_argument;
            "proposal expiration {} exceeds sector expiration {}",
            proposal.end_epoch, sector_expiry));
    }
    Ok(())
}

fn request_miner_control_addrs(
    rt: &impl Runtime,
    miner: ActorID,
) -> Result<ext::miner::GetControlAddressesReturnParams, ActorError> {
    let ret = rt.send(
        &Address::new_id(miner),
        ext::miner::CONTROL_ADDRESSES_METHOD,
        None,
        TokenAmount::zero(),
    )?;
    deserialize_block(ret)
}

/// Where an escrow balance is held and where withdrawals from it are sent.
struct EscrowAccount {
    holder: Address,
    recipient: Address,
}

impl EscrowAccount {
    /// Resolves `addr` and checks that the caller may move its funds: the owner or worker of
    /// a provider, or a signable client moving its own funds.
    fn authorize(rt: &impl Runtime, addr: &Address) -> Result<Self, ActorError> {
        let id = rt
            .resolve_address(addr)
            .ok_or_else(|| actor_error!(illegal_argument; "failed to resolve address {}", addr))?;
        let code = rt
            .get_actor_code_cid(&id)
            .ok_or_else(|| actor_error!(illegal_argument; "no code for address {}", id))?;
        let holder = Address::new_id(id);

        if rt.resolve_builtin_actor_type(&code) == Some(Type::Miner) {
            let control = request_miner_control_addrs(rt, id)?;
            rt.validate_immediate_caller_is(&[control.owner, control.worker])?;
            return Ok(Self { holder, recipient: control.owner });
        }

        rt.validate_immediate_caller_type(CALLER_TYPES_SIGNABLE)?;
        let caller = rt.message().caller();
        if caller != holder {
            return Err(actor_error!(forbidden;
                "caller {} may not move funds of {}", caller, holder));
        }
        Ok(Self { holder, recipient: holder })
    }
}

impl ActorCode for Actor {
    type Methods = Method;

    fn name() -> &'static str {
        "StorageMarket"
    }

    actor_dispatch! {
        Constructor => constructor,
        AddBalance => add_balance,
        WithdrawBalance => withdraw_balance,
        PublishStorageDeals => publish_storage_deals,
        ActivateDeals => activate_deals,
        OnMinerSectorsTerminate => on_miner_sectors_terminate,
        CronTick => cron_tick,
        GetBalance => get_balance,
        GetDealActivation => get_deal_activation,
        GetDealTerm => get_deal_term,
    }
}
