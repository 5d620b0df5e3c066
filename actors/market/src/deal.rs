// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::cmp::{max, min};

use cid::Cid;
use fvm_ipld_encoding::tuple::*;
use fvm_shared::address::Address;
use fvm_shared::clock::{ChainEpoch, EPOCH_UNDEFINED};
use fvm_shared::crypto::signature::Signature;
use fvm_shared::econ::TokenAmount;
use fvm_shared::piece::PaddedPieceSize;

/// The terms a client and a provider agree on. The client pays `storage_price_per_epoch` for
/// every epoch in `[start_epoch, end_epoch)` and both parties put up collateral that is held
/// until the deal ends.
#[derive(Clone, Debug, PartialEq, Eq, Serialize_tuple, Deserialize_tuple)]
pub struct DealProposal {
    pub piece_cid: Cid,
    pub piece_size: PaddedPieceSize,
    pub verified_deal: bool,
    pub client: Address,
    pub provider: Address,

    /// The deal must be activated in a sector no later than this epoch.
    pub start_epoch: ChainEpoch,
    pub end_epoch: ChainEpoch,
    pub storage_price_per_epoch: TokenAmount,

    pub provider_collateral: TokenAmount,
    pub client_collateral: TokenAmount,
}

impl DealProposal {
    pub fn duration(&self) -> ChainEpoch {
        self.end_epoch - self.start_epoch
    }

    pub fn total_storage_fee(&self) -> TokenAmount {
        &self.storage_price_per_epoch * self.duration()
    }

    /// The fee for the epochs of the deal term that fall in `[from, to)`.
    pub fn fee_between(&self, from: ChainEpoch, to: ChainEpoch) -> TokenAmount {
        let from = max(from, self.start_epoch);
        let to = min(to, self.end_epoch);
        &self.storage_price_per_epoch * max(0, to - from)
    }

    pub fn client_balance_requirement(&self) -> TokenAmount {
        &self.client_collateral + self.total_storage_fee()
    }

    pub fn provider_balance_requirement(&self) -> &TokenAmount {
        &self.provider_collateral
    }
}

/// A proposal with the client's signature over its CBOR encoding.
#[derive(Clone, Debug, PartialEq, Eq, Serialize_tuple, Deserialize_tuple)]
pub struct ClientDealProposal {
    pub proposal: DealProposal,
    pub client_signature: Signature,
}

/// Mutable lifecycle data of a published deal.
#[derive(Clone, Debug, PartialEq, Eq, Copy, Serialize_tuple, Deserialize_tuple)]
pub struct DealState {
    /// Epoch of activation, or EPOCH_UNDEFINED.
    pub sector_start_epoch: ChainEpoch,
    /// Epoch up to which the provider has been paid, or EPOCH_UNDEFINED.
    pub last_updated_epoch: ChainEpoch,
    /// Epoch of termination, or EPOCH_UNDEFINED.
    pub slash_epoch: ChainEpoch,
}

impl DealState {
    /// The state of a deal that has been published but not activated.
    pub const fn unset() -> Self {
        Self {
            sector_start_epoch: EPOCH_UNDEFINED,
            last_updated_epoch: EPOCH_UNDEFINED,
            slash_epoch: EPOCH_UNDEFINED,
        }
    }

    pub fn is_activated(&self) -> bool {
        self.sector_start_epoch != EPOCH_UNDEFINED
    }

    pub fn is_slashed(&self) -> bool {
        self.slash_epoch != EPOCH_UNDEFINED
    }
}
