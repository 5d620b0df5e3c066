// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::collections::BTreeMap;

use cid::Cid;
use fvm_ipld_blockstore::Blockstore;
use fvm_ipld_encoding::tuple::*;
use fvm_shared::address::Address;
use fvm_shared::clock::{ChainEpoch, EPOCH_UNDEFINED};
use fvm_shared::deal::DealID;
use fvm_shared::econ::TokenAmount;
use fvm_shared::error::ExitCode;
use num_traits::{Signed, Zero};

use fil_market_runtime::{
    actor_error, ActorContext, ActorError, Array, AsActorError, SetMultimap, SetMultimapConfig,
    DEFAULT_HAMT_CONFIG,
};

use crate::balance_table::BalanceTable;

use super::policy::*;
use super::types::*;
use super::{DealProposal, DealState};

const ESCROW_TABLE: &str = "escrow table";
const LOCKED_TABLE: &str = "locked table";
const DEAL_OPS: &str = "deal ops";

pub type DealOpsByEpoch<BS> = SetMultimap<BS, ChainEpoch, DealID>;
pub const DEAL_OPS_BY_EPOCH_CONFIG: SetMultimapConfig =
    SetMultimapConfig { outer: DEFAULT_HAMT_CONFIG, inner: DEFAULT_HAMT_CONFIG };

/// Market actor state
#[derive(Clone, Default, Serialize_tuple, Deserialize_tuple, Debug)]
pub struct State {
    /// AMT of DealProposal by DealID. A proposal stays here from publication until the deal
    /// is settled for the last time.
    pub proposals: Cid,
    /// AMT of DealState by DealID, always holding exactly the ids present in `proposals`.
    pub states: Cid,
    /// HAMT of the funds each party holds in the market, locked or not.
    pub escrow_table: Cid,
    /// HAMT of the part of each party's escrow committed to live deals.
    pub locked_table: Cid,
    /// The id the next published deal receives.
    pub next_id: DealID,
    /// Deal ids by the epoch at which cron next has to look at them.
    pub deal_ops_by_epoch: Cid,
    /// Last epoch processed by cron.
    pub last_cron: ChainEpoch,

    pub total_client_locked_collateral: TokenAmount,
    pub total_provider_locked_collateral: TokenAmount,
    pub total_client_storage_fee: TokenAmount,
}

impl State {
    pub fn new<BS: Blockstore>(store: &BS) -> Result<Self, ActorError> {
        let proposals = DealArray::new_with_bit_width(store, PROPOSALS_AMT_BITWIDTH)
            .flush()
            .context_code(ExitCode::USR_ILLEGAL_STATE, "failed to create proposals array")?;
        let states = DealMetaArray::new_with_bit_width(store, STATES_AMT_BITWIDTH)
            .flush()
            .context_code(ExitCode::USR_ILLEGAL_STATE, "failed to create states array")?;
        let empty_table = BalanceTable::new(store, ESCROW_TABLE).root()?;
        let deal_ops = DealOpsByEpoch::empty(store, DEAL_OPS_BY_EPOCH_CONFIG, DEAL_OPS).flush()?;

        Ok(Self {
            proposals,
            states,
            escrow_table: empty_table,
            locked_table: empty_table,
            next_id: 0,
            deal_ops_by_epoch: deal_ops,
            last_cron: EPOCH_UNDEFINED,
            total_client_locked_collateral: TokenAmount::zero(),
            total_provider_locked_collateral: TokenAmount::zero(),
            total_client_storage_fee: TokenAmount::zero(),
        })
    }

    /// Sum of the three lock totals, which always equals the sum of the locked table.
    pub fn total_locked(&self) -> TokenAmount {
        &self.total_client_locked_collateral
            + &self.total_provider_locked_collateral
            + &self.total_client_storage_fee
    }

    // Deals

    pub fn proposals<'bs, BS: Blockstore>(
        &self,
        store: &'bs BS,
    ) -> Result<DealArray<'bs, BS>, ActorError> {
        DealArray::load(&self.proposals, store)
            .context_code(ExitCode::USR_ILLEGAL_STATE, "failed to load deal proposals")
    }

    pub fn deal_states<'bs, BS: Blockstore>(
        &self,
        store: &'bs BS,
    ) -> Result<DealMetaArray<'bs, BS>, ActorError> {
        DealMetaArray::load(&self.states, store)
            .context_code(ExitCode::USR_ILLEGAL_STATE, "failed to load deal states")
    }

    pub fn find_proposal<BS: Blockstore>(
        &self,
        store: &BS,
        id: DealID,
    ) -> Result<Option<DealProposal>, ActorError> {
        let found = self
            .proposals(store)?
            .get(id)
            .with_context_code(ExitCode::USR_ILLEGAL_STATE, || {
                format!("failed to read proposal of deal {}", id)
            })?
            .cloned();
        Ok(found)
    }

    /// The proposal of a published deal. Unknown ids fail with not found.
    pub fn get_proposal<BS: Blockstore>(
        &self,
        store: &BS,
        id: DealID,
    ) -> Result<DealProposal, ActorError> {
        self.find_proposal(store, id)?.ok_or_else(|| actor_error!(not_found; "no such deal {}", id))
    }

    pub fn find_deal_state<BS: Blockstore>(
        &self,
        store: &BS,
        id: DealID,
    ) -> Result<Option<DealState>, ActorError> {
        let found = self
            .deal_states(store)?
            .get(id)
            .with_context_code(ExitCode::USR_ILLEGAL_STATE, || {
                format!("failed to read state of deal {}", id)
            })?
            .copied();
        Ok(found)
    }

    /// The state of a deal whose proposal is known to exist. A missing state is an
    /// inconsistency, not a bad request.
    pub fn get_deal_state<BS: Blockstore>(
        &self,
        store: &BS,
        id: DealID,
    ) -> Result<DealState, ActorError> {
        self.find_deal_state(store, id)?.with_context_code(ExitCode::USR_ILLEGAL_STATE, || {
            format!("deal {} has a proposal but no state", id)
        })
    }

    /// Stores validated proposals as new deals. The funds each one requires are locked, it is
    /// assigned the next id, given an unset state and scheduled at its start epoch.
    /// Returns the assigned ids in the order of `proposals`.
    pub fn publish_deals<BS: Blockstore>(
        &mut self,
        store: &BS,
        proposals: Vec<DealProposal>,
    ) -> Result<Vec<DealID>, ActorError> {
        if proposals.is_empty() {
            return Ok(Vec::new());
        }

        let mut ledger = Ledger::open(self, store)?;
        for proposal in &proposals {
            ledger.lock_deal(proposal)?;
        }
        ledger.commit()?;

        let mut proposal_array = self.proposals(store)?;
        let mut state_array = self.deal_states(store)?;
        let mut ids = Vec::with_capacity(proposals.len());
        let mut starts = Vec::with_capacity(proposals.len());
        for proposal in proposals {
            let id = self.next_id;
            self.next_id += 1;
            starts.push((proposal.start_epoch, id));
            proposal_array
                .set(id, proposal)
                .context_code(ExitCode::USR_ILLEGAL_STATE, "failed to store deal proposal")?;
            state_array
                .set(id, DealState::unset())
                .context_code(ExitCode::USR_ILLEGAL_STATE, "failed to store deal state")?;
            ids.push(id);
        }
        self.proposals = proposal_array
            .flush()
            .context_code(ExitCode::USR_ILLEGAL_STATE, "failed to flush deal proposals")?;
        self.states = state_array
            .flush()
            .context_code(ExitCode::USR_ILLEGAL_STATE, "failed to flush deal states")?;

        self.schedule_deals(store, starts)?;
        Ok(ids)
    }

    pub fn put_deal_states<BS: Blockstore>(
        &mut self,
        store: &BS,
        updates: &[(DealID, DealState)],
    ) -> Result<(), ActorError> {
        if updates.is_empty() {
            return Ok(());
        }
        let mut states = self.deal_states(store)?;
        for (id, state) in updates {
            states.set(*id, *state).with_context_code(ExitCode::USR_ILLEGAL_STATE, || {
                format!("failed to update state of deal {}", id)
            })?;
        }
        self.states = states
            .flush()
            .context_code(ExitCode::USR_ILLEGAL_STATE, "failed to flush deal states")?;
        Ok(())
    }

    /// Deletes the proposal and state of a settled deal. Both must be present.
    pub fn remove_deal<BS: Blockstore>(
        &mut self,
        store: &BS,
        id: DealID,
    ) -> Result<(), ActorError> {
        let mut proposals = self.proposals(store)?;
        let mut states = self.deal_states(store)?;

        let had_proposal = proposals
            .delete(id)
            .with_context_code(ExitCode::USR_ILLEGAL_STATE, || {
                format!("failed to delete proposal of deal {}", id)
            })?
            .is_some();
        let had_state = states
            .delete(id)
            .with_context_code(ExitCode::USR_ILLEGAL_STATE, || {
                format!("failed to delete state of deal {}", id)
            })?
            .is_some();
        if !(had_proposal && had_state) {
            return Err(actor_error!(illegal_state;
                "removing deal {} with proposal present {} and state present {}",
                id, had_proposal, had_state));
        }

        self.proposals = proposals
            .flush()
            .context_code(ExitCode::USR_ILLEGAL_STATE, "failed to flush deal proposals")?;
        self.states = states
            .flush()
            .context_code(ExitCode::USR_ILLEGAL_STATE, "failed to flush deal states")?;
        Ok(())
    }

    // Schedule

    fn deal_ops<'bs, BS: Blockstore>(
        &self,
        store: &'bs BS,
    ) -> Result<DealOpsByEpoch<&'bs BS>, ActorError> {
        DealOpsByEpoch::load(store, &self.deal_ops_by_epoch, DEAL_OPS_BY_EPOCH_CONFIG, DEAL_OPS)
    }

    /// Adds each `(epoch, deal)` pair to the schedule. Scheduling a deal twice at the same
    /// epoch has no further effect.
    pub fn schedule_deals<BS, I>(&mut self, store: &BS, entries: I) -> Result<(), ActorError>
    where
        BS: Blockstore,
        I: IntoIterator<Item = (ChainEpoch, DealID)>,
    {
        let mut by_epoch: BTreeMap<ChainEpoch, Vec<DealID>> = BTreeMap::new();
        for (epoch, id) in entries {
            by_epoch.entry(epoch).or_default().push(id);
        }
        if by_epoch.is_empty() {
            return Ok(());
        }

        let mut deal_ops = self.deal_ops(store)?;
        for (epoch, ids) in &by_epoch {
            deal_ops
                .put_many(epoch, ids)
                .with_context(|| format!("scheduling deals at {}", epoch))?;
        }
        self.deal_ops_by_epoch = deal_ops.flush()?;
        Ok(())
    }

    /// The deals scheduled at `epoch`, in ascending id order.
    pub fn deals_due_at<BS: Blockstore>(
        &self,
        store: &BS,
        epoch: ChainEpoch,
    ) -> Result<Vec<DealID>, ActorError> {
        let mut ids = Vec::new();
        self.deal_ops(store)?.for_each_in(&epoch, |id| {
            ids.push(id);
            Ok(())
        })?;
        ids.sort_unstable();
        Ok(ids)
    }

    /// Drops everything scheduled at `epoch`.
    pub fn clear_epoch<BS: Blockstore>(
        &mut self,
        store: &BS,
        epoch: ChainEpoch,
    ) -> Result<(), ActorError> {
        let mut deal_ops = self.deal_ops(store)?;
        deal_ops.remove_all(&epoch)?;
        self.deal_ops_by_epoch = deal_ops.flush()?;
        Ok(())
    }

    // Balances

    pub fn escrow_balance<BS: Blockstore>(
        &self,
        store: &BS,
        addr: &Address,
    ) -> Result<TokenAmount, ActorError> {
        BalanceTable::from_root(store, &self.escrow_table, ESCROW_TABLE)?.get(addr)
    }

    pub fn locked_balance<BS: Blockstore>(
        &self,
        store: &BS,
        addr: &Address,
    ) -> Result<TokenAmount, ActorError> {
        BalanceTable::from_root(store, &self.locked_table, LOCKED_TABLE)?.get(addr)
    }

    /// Escrow of `addr` not committed to any deal.
    pub fn available_balance<BS: Blockstore>(
        &self,
        store: &BS,
        addr: &Address,
    ) -> Result<TokenAmount, ActorError> {
        Ok(self.escrow_balance(store, addr)? - self.locked_balance(store, addr)?)
    }

    pub fn deposit<BS: Blockstore>(
        &mut self,
        store: &BS,
        addr: &Address,
        amount: &TokenAmount,
    ) -> Result<(), ActorError> {
        let mut ledger = Ledger::open(self, store)?;
        ledger.escrow.add(addr, amount)?;
        ledger.commit()
    }

    /// Takes up to `amount` from the unlocked escrow of `addr` and returns what was taken.
    pub fn withdraw<BS: Blockstore>(
        &mut self,
        store: &BS,
        addr: &Address,
        amount: &TokenAmount,
    ) -> Result<TokenAmount, ActorError> {
        let mut ledger = Ledger::open(self, store)?;
        let locked = ledger.locked.get(addr)?;
        let withdrawn = ledger.escrow.subtract_with_minimum(addr, amount, &locked)?;
        ledger.commit()?;
        Ok(withdrawn)
    }

    // Settlement

    /// Pays the provider of an active deal for the epochs served up to `epoch`. When `epoch`
    /// reaches the end of the deal both collaterals are released too and the deal is reported
    /// complete, leaving its removal to the caller.
    /// Returns the payment and whether the deal completed.
    pub fn settle_active_deal<BS: Blockstore>(
        &mut self,
        store: &BS,
        proposal: &DealProposal,
        state: &DealState,
        epoch: ChainEpoch,
    ) -> Result<(TokenAmount, bool), ActorError> {
        if !state.is_activated() || state.is_slashed() {
            return Err(actor_error!(illegal_state;
                "settling deal that is not active: {:?}", state));
        }
        if epoch < proposal.start_epoch {
            return Err(actor_error!(illegal_state;
                "settling at {} before deal start {}", epoch, proposal.start_epoch));
        }
        if state.last_updated_epoch > epoch {
            return Err(actor_error!(illegal_state;
                "settling at {} after deal was updated at {}", epoch, state.last_updated_epoch));
        }

        let payment = proposal.fee_between(state.last_updated_epoch, epoch);
        let completed = epoch >= proposal.end_epoch;

        let mut ledger = Ledger::open(self, store)?;
        if payment.is_positive() {
            ledger.pay(&proposal.client, &proposal.provider, &payment)?;
        }
        if completed {
            ledger
                .unlock(
                    &proposal.provider,
                    &proposal.provider_collateral,
                    LockReason::ProviderCollateral,
                )
                .context("releasing provider collateral")?;
            ledger
                .unlock(&proposal.client, &proposal.client_collateral, LockReason::ClientCollateral)
                .context("releasing client collateral")?;
        }
        ledger.commit()?;
        Ok((payment, completed))
    }

    /// Settles a deal terminated at its slash epoch. The provider is paid for the epochs
    /// served before termination, the client gets back the unpaid fee and its collateral,
    /// and the provider collateral is forfeit.
    /// Returns the amount forfeit.
    pub fn settle_terminated_deal<BS: Blockstore>(
        &mut self,
        store: &BS,
        proposal: &DealProposal,
        state: &DealState,
    ) -> Result<TokenAmount, ActorError> {
        if state.slash_epoch > proposal.end_epoch {
            return Err(actor_error!(illegal_state;
                "deal terminated at {} after its end {}", state.slash_epoch, proposal.end_epoch));
        }

        let payment = proposal.fee_between(state.last_updated_epoch, state.slash_epoch);
        let unpaid = proposal.fee_between(state.slash_epoch, proposal.end_epoch);

        let mut ledger = Ledger::open(self, store)?;
        if payment.is_positive() {
            ledger.pay(&proposal.client, &proposal.provider, &payment)?;
        }
        ledger
            .unlock(&proposal.client, &unpaid, LockReason::ClientStorageFee)
            .context("refunding unpaid storage fee")?;
        ledger
            .unlock(&proposal.client, &proposal.client_collateral, LockReason::ClientCollateral)
            .context("releasing client collateral")?;
        ledger
            .slash(
                &proposal.provider,
                &proposal.provider_collateral,
                LockReason::ProviderCollateral,
            )
            .context("slashing provider collateral")?;
        ledger.commit()?;
        Ok(proposal.provider_collateral.clone())
    }

    /// Handles a deal that reached its start epoch without being activated. The client's
    /// funds are released and the provider pays the activation-missed penalty.
    /// Returns the penalty.
    pub fn expire_unactivated_deal<BS: Blockstore>(
        &mut self,
        store: &BS,
        proposal: &DealProposal,
    ) -> Result<TokenAmount, ActorError> {
        let penalty =
            collateral_penalty_for_deal_activation_missed(proposal.provider_collateral.clone());
        let released = &proposal.provider_collateral - &penalty;

        let mut ledger = Ledger::open(self, store)?;
        ledger
            .unlock(&proposal.client, &proposal.total_storage_fee(), LockReason::ClientStorageFee)
            .context("releasing client storage fee")?;
        ledger
            .unlock(&proposal.client, &proposal.client_collateral, LockReason::ClientCollateral)
            .context("releasing client collateral")?;
        ledger
            .slash(&proposal.provider, &penalty, LockReason::ProviderCollateral)
            .context("slashing provider collateral")?;
        ledger
            .unlock(&proposal.provider, &released, LockReason::ProviderCollateral)
            .context("releasing provider collateral")?;
        ledger.commit()?;
        Ok(penalty)
    }
}

/// Which lock total an amount in the locked table is counted in.
#[derive(Clone, Copy)]
enum LockReason {
    ClientCollateral,
    ClientStorageFee,
    ProviderCollateral,
}

/// The escrow and locked tables of a [`State`], opened together for a sequence of balance
/// movements. Nothing reaches the state until [`Ledger::commit`].
struct Ledger<'st, 'bs, BS: Blockstore> {
    st: &'st mut State,
    escrow: BalanceTable<&'bs BS>,
    locked: BalanceTable<&'bs BS>,
}

impl<'st, 'bs, BS: Blockstore> Ledger<'st, 'bs, BS> {
    fn open(st: &'st mut State, store: &'bs BS) -> Result<Self, ActorError> {
        let escrow = BalanceTable::from_root(store, &st.escrow_table, ESCROW_TABLE)?;
        let locked = BalanceTable::from_root(store, &st.locked_table, LOCKED_TABLE)?;
        Ok(Self { st, escrow, locked })
    }

    fn commit(mut self) -> Result<(), ActorError> {
        self.st.escrow_table = self.escrow.root()?;
        self.st.locked_table = self.locked.root()?;
        Ok(())
    }

    fn total(&mut self, reason: LockReason) -> &mut TokenAmount {
        match reason {
            LockReason::ClientCollateral => &mut self.st.total_client_locked_collateral,
            LockReason::ClientStorageFee => &mut self.st.total_client_storage_fee,
            LockReason::ProviderCollateral => &mut self.st.total_provider_locked_collateral,
        }
    }

    /// Commits everything `proposal` requires from both parties.
    fn lock_deal(&mut self, proposal: &DealProposal) -> Result<(), ActorError> {
        self.lock(&proposal.client, &proposal.client_collateral, LockReason::ClientCollateral)
            .context("locking client collateral")?;
        self.lock(&proposal.client, &proposal.total_storage_fee(), LockReason::ClientStorageFee)
            .context("locking client storage fee")?;
        self.lock(&proposal.provider, &proposal.provider_collateral, LockReason::ProviderCollateral)
            .context("locking provider collateral")
    }

    fn lock(
        &mut self,
        addr: &Address,
        amount: &TokenAmount,
        reason: LockReason,
    ) -> Result<(), ActorError> {
        non_negative("lock", amount)?;
        let escrow = self.escrow.get(addr)?;
        let locked = self.locked.get(addr)?;
        if &locked + amount > escrow {
            return Err(actor_error!(illegal_state;
                "cannot lock {} for {} with {} of {} escrow already locked",
                amount, addr, locked, escrow));
        }
        self.locked.add(addr, amount)?;
        *self.total(reason) += amount;
        Ok(())
    }

    fn unlock(
        &mut self,
        addr: &Address,
        amount: &TokenAmount,
        reason: LockReason,
    ) -> Result<(), ActorError> {
        non_negative("unlock", amount)?;
        self.locked.must_subtract(addr, amount).map_err(inconsistent)?;
        *self.total(reason) -= amount;
        Ok(())
    }

    /// Removes locked funds from the escrow of `addr` altogether.
    fn slash(
        &mut self,
        addr: &Address,
        amount: &TokenAmount,
        reason: LockReason,
    ) -> Result<(), ActorError> {
        non_negative("slash", amount)?;
        self.escrow.must_subtract(addr, amount).map_err(inconsistent)?;
        self.unlock(addr, amount, reason)
    }

    /// Moves part of the storage fee locked by `client` to the free escrow of `provider`.
    fn pay(
        &mut self,
        client: &Address,
        provider: &Address,
        amount: &TokenAmount,
    ) -> Result<(), ActorError> {
        self.slash(client, amount, LockReason::ClientStorageFee).context("paying storage fee")?;
        self.escrow.add(provider, amount)
    }
}

fn non_negative(op: &str, amount: &TokenAmount) -> Result<(), ActorError> {
    if amount.is_negative() {
        return Err(actor_error!(illegal_state; "cannot {} negative amount {}", op, amount));
    }
    Ok(())
}

// A table refusing to go negative here means the lock totals are out of step.
fn inconsistent(e: ActorError) -> ActorError {
    ActorError::illegal_state(e.msg().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cid::multihash::{Code, MultihashDigest};
    use fvm_ipld_blockstore::MemoryBlockstore;
    use fvm_shared::commcid::FIL_COMMITMENT_UNSEALED;
    use fvm_shared::piece::PaddedPieceSize;

    const CLIENT: Address = Address::new_id(104);
    const PROVIDER: Address = Address::new_id(102);

    fn atto(v: i64) -> TokenAmount {
        TokenAmount::from_atto(v)
    }

    fn deal(start: ChainEpoch, end: ChainEpoch) -> DealProposal {
        DealProposal {
            piece_cid: Cid::new_v1(FIL_COMMITMENT_UNSEALED, Code::Sha2_256.digest(b"piece")),
            piece_size: PaddedPieceSize(2048),
            verified_deal: false,
            client: CLIENT,
            provider: PROVIDER,
            start_epoch: start,
            end_epoch: end,
            storage_price_per_epoch: atto(10),
            provider_collateral: atto(500),
            client_collateral: atto(200),
        }
    }

    fn published(store: &MemoryBlockstore, proposal: &DealProposal) -> (State, DealID) {
        let mut st = State::new(store).unwrap();
        st.deposit(store, &CLIENT, &atto(1000)).unwrap();
        st.deposit(store, &PROVIDER, &atto(1000)).unwrap();
        let ids = st.publish_deals(store, vec![proposal.clone()]).unwrap();
        (st, ids[0])
    }

    fn assert_nothing_locked(st: &State, store: &MemoryBlockstore) {
        assert!(st.locked_balance(store, &CLIENT).unwrap().is_zero());
        assert!(st.locked_balance(store, &PROVIDER).unwrap().is_zero());
        assert!(st.total_locked().is_zero());
    }

    #[test]
    fn publish_locks_funds_and_schedules_start() {
        let store = MemoryBlockstore::new();
        let proposal = deal(10, 20);
        let (st, id) = published(&store, &proposal);

        assert_eq!(0, id);
        assert_eq!(1, st.next_id);
        assert_eq!(atto(300), st.locked_balance(&store, &CLIENT).unwrap());
        assert_eq!(atto(500), st.locked_balance(&store, &PROVIDER).unwrap());
        assert_eq!(atto(700), st.available_balance(&store, &CLIENT).unwrap());
        assert_eq!(atto(800), st.total_locked());
        assert_eq!(Some(proposal), st.find_proposal(&store, id).unwrap());
        assert_eq!(DealState::unset(), st.get_deal_state(&store, id).unwrap());
        assert_eq!(vec![id], st.deals_due_at(&store, 10).unwrap());
    }

    #[test]
    fn lock_beyond_escrow_is_fatal() {
        let store = MemoryBlockstore::new();
        let mut st = State::new(&store).unwrap();
        st.deposit(&store, &CLIENT, &atto(10)).unwrap();
        let err = st.publish_deals(&store, vec![deal(10, 20)]).unwrap_err();
        assert_eq!(ExitCode::USR_ILLEGAL_STATE, err.exit_code());
        assert!(err.is_fatal());
    }

    #[test]
    fn withdraw_keeps_locked_funds() {
        let store = MemoryBlockstore::new();
        let (mut st, _) = published(&store, &deal(10, 20));
        assert_eq!(atto(700), st.withdraw(&store, &CLIENT, &atto(5000)).unwrap());
        assert_eq!(atto(300), st.escrow_balance(&store, &CLIENT).unwrap());
        assert!(st.withdraw(&store, &CLIENT, &atto(1)).unwrap().is_zero());
    }

    #[test]
    fn settle_then_expire() {
        let store = MemoryBlockstore::new();
        let proposal = deal(10, 20);
        let (mut st, id) = published(&store, &proposal);
        let active = DealState { sector_start_epoch: 5, last_updated_epoch: 5, slash_epoch: -1 };

        let (paid, done) = st.settle_active_deal(&store, &proposal, &active, 15).unwrap();
        assert_eq!(atto(50), paid);
        assert!(!done);

        let settled = DealState { last_updated_epoch: 15, ..active };
        let (paid, done) = st.settle_active_deal(&store, &proposal, &settled, 25).unwrap();
        assert_eq!(atto(50), paid);
        assert!(done);
        st.remove_deal(&store, id).unwrap();

        assert_eq!(atto(900), st.escrow_balance(&store, &CLIENT).unwrap());
        assert_eq!(atto(1100), st.escrow_balance(&store, &PROVIDER).unwrap());
        assert_nothing_locked(&st, &store);
        assert_eq!(None, st.find_proposal(&store, id).unwrap());
        assert!(st.remove_deal(&store, id).unwrap_err().is_fatal());
    }

    #[test]
    fn settling_before_start_is_fatal() {
        let store = MemoryBlockstore::new();
        let proposal = deal(10, 20);
        let (mut st, _) = published(&store, &proposal);
        let active = DealState { sector_start_epoch: 5, last_updated_epoch: 5, slash_epoch: -1 };
        let err = st.settle_active_deal(&store, &proposal, &active, 9).unwrap_err();
        assert_eq!(ExitCode::USR_ILLEGAL_STATE, err.exit_code());
    }

    #[test]
    fn terminated_deal_pays_until_slash_epoch() {
        let store = MemoryBlockstore::new();
        let proposal = deal(10, 20);
        let (mut st, _) = published(&store, &proposal);
        let slashed = DealState { sector_start_epoch: 5, last_updated_epoch: 10, slash_epoch: 14 };

        let amount = st.settle_terminated_deal(&store, &proposal, &slashed).unwrap();
        assert_eq!(atto(500), amount);
        // paid for [10, 14)
        assert_eq!(atto(960), st.escrow_balance(&store, &CLIENT).unwrap());
        assert_eq!(atto(540), st.escrow_balance(&store, &PROVIDER).unwrap());
        assert_nothing_locked(&st, &store);
    }

    #[test]
    fn unactivated_deal_forfeits_provider_collateral() {
        let store = MemoryBlockstore::new();
        let proposal = deal(10, 20);
        let (mut st, _) = published(&store, &proposal);

        let amount = st.expire_unactivated_deal(&store, &proposal).unwrap();
        assert_eq!(atto(500), amount);
        assert_eq!(atto(1000), st.escrow_balance(&store, &CLIENT).unwrap());
        assert_eq!(atto(500), st.escrow_balance(&store, &PROVIDER).unwrap());
        assert_nothing_locked(&st, &store);
    }

    #[test]
    fn schedule_is_a_set_per_epoch() {
        let store = MemoryBlockstore::new();
        let mut st = State::new(&store).unwrap();
        let empty = st.deal_ops_by_epoch;

        st.schedule_deals(&store, [(7, 3), (7, 1), (9, 2), (7, 3)]).unwrap();
        assert_eq!(vec![1, 3], st.deals_due_at(&store, 7).unwrap());
        assert_eq!(vec![2], st.deals_due_at(&store, 9).unwrap());

        st.clear_epoch(&store, 7).unwrap();
        st.clear_epoch(&store, 9).unwrap();
        assert!(st.deals_due_at(&store, 7).unwrap().is_empty());
        assert_eq!(empty, st.deal_ops_by_epoch);

        st.clear_epoch(&store, 11).unwrap();
        assert_eq!(empty, st.deal_ops_by_epoch);
    }
}
