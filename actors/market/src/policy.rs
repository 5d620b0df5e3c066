// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::cmp::min;

use fil_market_runtime::runtime::Policy;
use fvm_shared::clock::ChainEpoch;
use fvm_shared::econ::TokenAmount;

/// Bounds (inclusive) on deal duration.
pub(super) fn deal_duration_bounds(policy: &Policy) -> (ChainEpoch, ChainEpoch) {
    (policy.min_deal_duration, policy.max_deal_duration)
}

/// Penalty to provider deal collateral if the deadline expires before sector commitment.
pub(super) fn collateral_penalty_for_deal_activation_missed(
    provider_collateral: TokenAmount,
) -> TokenAmount {
    provider_collateral
}

/// The epoch at which an active deal settled at `epoch` is next due for settlement.
pub(super) fn next_update_epoch(
    policy: &Policy,
    epoch: ChainEpoch,
    end_epoch: ChainEpoch,
) -> ChainEpoch {
    min(epoch + policy.deal_updates_interval, end_epoch)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_update_is_clamped_to_deal_end() {
        let policy = Policy { deal_updates_interval: 100, ..Default::default() };
        assert_eq!(150, next_update_epoch(&policy, 50, 1000));
        assert_eq!(120, next_update_epoch(&policy, 50, 120));
        assert_eq!(120, next_update_epoch(&policy, 120, 120));
    }

    #[test]
    fn activation_missed_forfeits_full_collateral() {
        let collateral = TokenAmount::from_atto(42);
        assert_eq!(collateral.clone(), collateral_penalty_for_deal_activation_missed(collateral));
    }
}
