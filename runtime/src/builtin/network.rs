// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

/// Assumed epoch duration. Deal terms and settlement cadence are expressed in epochs.
pub const EPOCH_DURATION_SECONDS: i64 = 30;

pub const SECONDS_IN_DAY: i64 = 86400;
pub const EPOCHS_IN_DAY: i64 = SECONDS_IN_DAY / EPOCH_DURATION_SECONDS;
