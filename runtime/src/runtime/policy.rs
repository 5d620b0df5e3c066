// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use fvm_shared::clock::ChainEpoch;

pub trait RuntimePolicy {
    fn policy(&self) -> &Policy;
}

/// Tunable market parameters. The default is the mainnet configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Policy {
    /// Interval in epochs between settlements of an active deal.
    pub deal_updates_interval: ChainEpoch,
    /// Minimum and maximum deal term, in epochs.
    pub min_deal_duration: ChainEpoch,
    pub max_deal_duration: ChainEpoch,
    /// Maximum number of proposals in a single publish batch.
    pub max_deals_per_publish: usize,
}

impl Default for Policy {
    fn default() -> Policy {
        Policy {
            deal_updates_interval: policy_constants::DEAL_UPDATES_INTERVAL,
            min_deal_duration: policy_constants::MIN_DEAL_DURATION,
            max_deal_duration: policy_constants::MAX_DEAL_DURATION,
            max_deals_per_publish: policy_constants::MAX_DEALS_PER_PUBLISH,
        }
    }
}

pub mod policy_constants {
    use fvm_shared::clock::ChainEpoch;

    use crate::builtin::EPOCHS_IN_DAY;

    #[cfg(not(feature = "short-deal-updates"))]
    pub const DEAL_UPDATES_INTERVAL: ChainEpoch = EPOCHS_IN_DAY;
    #[cfg(feature = "short-deal-updates")]
    pub const DEAL_UPDATES_INTERVAL: ChainEpoch = 10;

    pub const MIN_DEAL_DURATION: ChainEpoch = 1;
    pub const MAX_DEAL_DURATION: ChainEpoch = 540 * EPOCHS_IN_DAY;

    pub const MAX_DEALS_PER_PUBLISH: usize = 8192;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::EPOCHS_IN_DAY;

    #[test]
    fn default_policy_bounds() {
        let policy = Policy::default();
        assert!(policy.deal_updates_interval > 0);
        assert!(policy.min_deal_duration <= policy.max_deal_duration);
        assert_eq!(policy.max_deal_duration, 540 * EPOCHS_IN_DAY);
    }
}
