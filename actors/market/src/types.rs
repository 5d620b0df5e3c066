// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use fil_market_runtime::{Array, BatchReturn};
use fvm_ipld_encoding::tuple::*;
use fvm_shared::address::Address;
use fvm_shared::clock::ChainEpoch;
use fvm_shared::deal::DealID;
use fvm_shared::econ::TokenAmount;

use super::deal::{ClientDealProposal, DealProposal, DealState};

pub const PROPOSALS_AMT_BITWIDTH: u32 = 5;
pub const STATES_AMT_BITWIDTH: u32 = 6;

/// Requests `amount` out of the escrow of `provider_or_client`. Less is withdrawn when
/// locked funds would otherwise be touched.
#[derive(Serialize_tuple, Deserialize_tuple, Debug, Clone, Eq, PartialEq)]
pub struct WithdrawBalanceParams {
    pub provider_or_client: Address,
    pub amount: TokenAmount,
}

#[derive(Serialize_tuple, Deserialize_tuple, Debug, Clone, Eq, PartialEq)]
#[serde(transparent)]
pub struct WithdrawBalanceReturn {
    pub amount_withdrawn: TokenAmount,
}

#[derive(Serialize_tuple, Deserialize_tuple, Debug, Clone, Eq, PartialEq)]
pub struct GetBalanceReturn {
    /// Total escrow, locked funds included.
    pub balance: TokenAmount,
    pub locked: TokenAmount,
}

#[derive(Serialize_tuple, Deserialize_tuple, Debug, Clone, Eq, PartialEq)]
pub struct PublishStorageDealsParams {
    pub deals: Vec<ClientDealProposal>,
}

#[derive(Serialize_tuple, Deserialize_tuple, Debug, Clone, Eq, PartialEq)]
pub struct PublishStorageDealsReturn {
    /// Identifiers of the published deals, in input order.
    pub ids: Vec<DealID>,
    /// One entry per input proposal.
    pub results: BatchReturn,
}

#[derive(Serialize_tuple, Deserialize_tuple, Debug, Clone, Eq, PartialEq)]
pub struct ActivateDealsParams {
    pub deal_ids: Vec<DealID>,
    /// Deals ending after this epoch cannot be activated in the sector.
    pub sector_expiry: ChainEpoch,
}

#[derive(Serialize_tuple, Deserialize_tuple, Debug, Clone, Eq, PartialEq)]
pub struct OnMinerSectorsTerminateParams {
    pub deal_ids: Vec<DealID>,
}

/// Published proposals by deal ID.
pub type DealArray<'bs, BS> = Array<'bs, DealProposal, BS>;

/// Lifecycle state by deal ID, parallel to [`DealArray`].
pub type DealMetaArray<'bs, BS> = Array<'bs, DealState, BS>;

#[derive(Serialize_tuple, Deserialize_tuple, Debug, Clone, Eq, PartialEq)]
#[serde(transparent)]
pub struct DealQueryParams {
    pub id: DealID,
}

pub type GetDealTermParams = DealQueryParams;
#[derive(Serialize_tuple, Deserialize_tuple, Debug, Clone, Eq, PartialEq)]
pub struct GetDealTermReturn {
    pub start: ChainEpoch,
    /// Number of epochs from `start` to the deal's end.
    pub duration: ChainEpoch,
}

pub type GetDealActivationParams = DealQueryParams;
#[derive(Serialize_tuple, Deserialize_tuple, Debug, Clone, Eq, PartialEq)]
pub struct GetDealActivationReturn {
    /// Sector activation epoch, EPOCH_UNDEFINED if not yet activated. May precede the start.
    pub activated: ChainEpoch,
    /// Epoch of early termination, EPOCH_UNDEFINED if none.
    pub terminated: ChainEpoch,
}
