use std::collections::{BTreeMap, BTreeSet};

use fvm_ipld_blockstore::Blockstore;
use fvm_shared::address::{Address, Protocol};
use fvm_shared::clock::{ChainEpoch, EPOCH_UNDEFINED};
use fvm_shared::deal::DealID;
use fvm_shared::econ::TokenAmount;
use num_traits::{Signed, Zero};

use fil_market_runtime::MessageAccumulator;

use crate::balance_table::BalanceTable;
use crate::{DealArray, DealMetaArray, DealOpsByEpoch, DealState, State, DEAL_OPS_BY_EPOCH_CONFIG};

/// What the checker learned about one deal from its proposal and state.
#[derive(Clone, Debug)]
pub struct DealSummary {
    pub provider: Address,
    pub client: Address,
    pub start_epoch: ChainEpoch,
    pub end_epoch: ChainEpoch,
    pub state: DealState,
}

#[derive(Default, Clone, Debug)]
pub struct StateSummary {
    pub deals: BTreeMap<DealID, DealSummary>,
    pub escrow_accounts: u64,
    pub locked_accounts: u64,
    pub scheduled_epochs: u64,
    pub scheduled_entries: u64,
}

/// Walks the whole market state and reports every broken invariant.
/// `balance` is the actor's token balance, which must cover all escrow.
pub fn check_state_invariants<BS: Blockstore>(
    state: &State,
    store: &BS,
    balance: &TokenAmount,
    current_epoch: ChainEpoch,
) -> (StateSummary, MessageAccumulator) {
    let checker = Checker {
        st: state,
        store,
        epoch: current_epoch,
        acc: MessageAccumulator::default(),
        summary: StateSummary::default(),
    };
    checker.run(balance)
}

struct Checker<'a, BS> {
    st: &'a State,
    store: &'a BS,
    epoch: ChainEpoch,
    acc: MessageAccumulator,
    summary: StateSummary,
}

impl<'a, BS: Blockstore> Checker<'a, BS> {
    fn run(mut self, balance: &TokenAmount) -> (StateSummary, MessageAccumulator) {
        self.check_totals();
        self.check_proposals();
        self.check_deal_states();
        self.check_balances(balance);
        self.check_schedule();
        (self.summary, self.acc)
    }

    fn check_totals(&self) {
        let st = self.st;
        for (name, total) in [
            ("client locked collateral", &st.total_client_locked_collateral),
            ("provider locked collateral", &st.total_provider_locked_collateral),
            ("client storage fee", &st.total_client_storage_fee),
        ] {
            self.acc.require(!total.is_negative(), &format!("negative total {}: {}", name, total));
        }
        self.acc.require(
            st.last_cron <= self.epoch,
            &format!("last cron {} is after current epoch {}", st.last_cron, self.epoch),
        );
    }

    fn check_proposals(&mut self) {
        let acc = self.acc.with_prefix("proposals: ");
        let proposals = match DealArray::load(&self.st.proposals, self.store) {
            Ok(p) => p,
            Err(e) => return acc.add(&format!("failed to load: {}", e)),
        };

        let deals = &mut self.summary.deals;
        let res = proposals.for_each(|id, p| {
            let ids = [("client", &p.client), ("provider", &p.provider)];
            for (role, addr) in ids {
                acc.require(
                    addr.protocol() == Protocol::ID,
                    &format!("deal {} {} {} is not an ID address", id, role, addr),
                );
            }
            acc.require(
                p.start_epoch < p.end_epoch,
                &format!(
                    "deal {} ends at {} before it starts at {}",
                    id, p.end_epoch, p.start_epoch
                ),
            );
            deals.insert(
                id,
                DealSummary {
                    provider: p.provider,
                    client: p.client,
                    start_epoch: p.start_epoch,
                    end_epoch: p.end_epoch,
                    state: DealState::unset(),
                },
            );
            Ok(())
        });
        acc.require_no_error(res, "failed to iterate");

        if let Some(&highest) = self.summary.deals.keys().next_back() {
            acc.require(
                self.st.next_id > highest,
                &format!("next id {} does not exceed deal {}", self.st.next_id, highest),
            );
        }
    }

    fn check_deal_states(&mut self) {
        let acc = self.acc.with_prefix("deal states: ");
        let states = match DealMetaArray::load(&self.st.states, self.store) {
            Ok(s) => s,
            Err(e) => return acc.add(&format!("failed to load: {}", e)),
        };

        let epoch = self.epoch;
        let deals = &mut self.summary.deals;
        let mut with_state = BTreeSet::new();
        let res = states.for_each(|id, s| {
            with_state.insert(id);
            let deal = match deals.get_mut(&id) {
                Some(d) => d,
                None => {
                    acc.add(&format!("deal {} has a state but no proposal", id));
                    return Ok(());
                }
            };
            deal.state = *s;

            if s.sector_start_epoch == EPOCH_UNDEFINED {
                acc.require(
                    s.last_updated_epoch == EPOCH_UNDEFINED && s.slash_epoch == EPOCH_UNDEFINED,
                    &format!("deal {} is updated or slashed before activation: {:?}", id, s),
                );
                return Ok(());
            }
            acc.require(
                s.sector_start_epoch <= deal.start_epoch,
                &format!(
                    "deal {} activated at {} after its start {}",
                    id, s.sector_start_epoch, deal.start_epoch
                ),
            );
            acc.require(
                (s.sector_start_epoch..=epoch).contains(&s.last_updated_epoch),
                &format!("deal {} last updated outside [activation, {}]: {:?}", id, epoch, s),
            );
            acc.require(
                s.slash_epoch == EPOCH_UNDEFINED
                    || (s.sector_start_epoch..=epoch).contains(&s.slash_epoch),
                &format!("deal {} slashed outside [activation, {}]: {:?}", id, epoch, s),
            );
            Ok(())
        });
        acc.require_no_error(res, "failed to iterate");

        for id in self.summary.deals.keys().filter(|id| !with_state.contains(id)) {
            acc.add(&format!("deal {} has a proposal but no state", id));
        }
    }

    fn check_balances(&mut self, balance: &TokenAmount) {
        let acc = self.acc.with_prefix("balances: ");
        let escrow = BalanceTable::from_root(self.store, &self.st.escrow_table, "escrow table");
        let locked = BalanceTable::from_root(self.store, &self.st.locked_table, "locked table");
        let (escrow, locked) = match (escrow, locked) {
            (Ok(e), Ok(l)) => (e, l),
            (e, l) => {
                acc.require_no_error(e, "failed to load escrow");
                acc.require_no_error(l, "failed to load locked");
                return;
            }
        };

        let mut escrow_total = TokenAmount::zero();
        let mut escrow_accounts = 0;
        let res = escrow.0.for_each(|_, amount| {
            escrow_total += amount;
            escrow_accounts += 1;
            Ok(())
        });
        acc.require_no_error(res, "failed to iterate escrow");
        acc.require(
            &escrow_total <= balance,
            &format!("escrow total {} exceeds actor balance {}", escrow_total, balance),
        );

        let mut locked_total = TokenAmount::zero();
        let mut locked_accounts = 0;
        let res = locked.0.for_each(|addr, amount| {
            locked_total += amount;
            locked_accounts += 1;
            let held = escrow.get(&addr)?;
            acc.require(
                &held >= amount,
                &format!("{} has {} locked but only {} in escrow", addr, amount, held),
            );
            Ok(())
        });
        acc.require_no_error(res, "failed to iterate locked");

        let st = self.st;
        acc.require(
            locked_total == st.total_locked(),
            &format!(
                "locked total {} is not client collateral {} \
                 + provider collateral {} + storage fee {}",
                locked_total,
                st.total_client_locked_collateral,
                st.total_provider_locked_collateral,
                st.total_client_storage_fee
            ),
        );

        self.summary.escrow_accounts = escrow_accounts;
        self.summary.locked_accounts = locked_accounts;
    }

    // Every live deal must be due at some epoch cron has not processed yet.
    fn check_schedule(&mut self) {
        let acc = self.acc.with_prefix("schedule: ");
        let ops = match DealOpsByEpoch::load(
            self.store,
            &self.st.deal_ops_by_epoch,
            DEAL_OPS_BY_EPOCH_CONFIG,
            "deal ops",
        ) {
            Ok(ops) => ops,
            Err(e) => return acc.add(&format!("failed to load: {}", e)),
        };

        let last_cron = self.st.last_cron;
        let mut unscheduled: BTreeSet<DealID> = self.summary.deals.keys().copied().collect();
        let (mut epochs, mut entries) = (0, 0);
        let res = ops.for_each(|epoch: ChainEpoch, _| {
            epochs += 1;
            acc.require(
                epoch > last_cron,
                &format!("deals due at {} which cron already passed at {}", epoch, last_cron),
            );
            ops.for_each_in(&epoch, |id: DealID| {
                unscheduled.remove(&id);
                entries += 1;
                Ok(())
            })
        });
        acc.require_no_error(res, "failed to iterate");
        acc.require(unscheduled.is_empty(), &format!("deals never due: {:?}", unscheduled));

        self.summary.scheduled_epochs = epochs;
        self.summary.scheduled_entries = entries;
    }
}
