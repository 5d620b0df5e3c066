// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use fil_market_runtime::runtime::Policy;
use fil_market_runtime::test_utils::*;
use fil_market_runtime::CRON_ACTOR_ADDR;
use fil_storage_market::{Actor as MarketActor, Method, State};
use fvm_shared::econ::TokenAmount;
use fvm_shared::error::ExitCode;
use num_traits::Zero;

use harness::*;

fn setup_with_interval(interval: i64) -> MockRuntime {
    setup_with_policy(Policy { deal_updates_interval: interval, ..Default::default() })
}

#[test]
fn active_deal_is_paid_periodically_until_expiry() {
    let rt = setup_with_interval(100);
    let addrs = MinerAddresses::default();
    let end_epoch = START_EPOCH + 1000;
    let deal_id =
        publish_and_activate_deal(
            &rt,
            CLIENT_ADDR,
            &addrs,
            START_EPOCH,
            end_epoch,
            0,
            SECTOR_EXPIRY,
        );
    let deal = get_deal_proposal(&rt, deal_id);

    // First processing at the start epoch pays nothing.
    rt.set_epoch(START_EPOCH);
    let (payment, slashed) =
        cron_tick_and_assert_balances(&rt, CLIENT_ADDR, PROVIDER_ADDR, START_EPOCH, deal_id);
    assert!(payment.is_zero());
    assert!(slashed.is_zero());
    assert_eq!(vec![deal_id], deals_for_epoch(&rt, START_EPOCH + 100));

    // Nothing is due in between.
    rt.set_epoch(START_EPOCH + 1);
    cron_tick_no_change(&rt, CLIENT_ADDR, PROVIDER_ADDR);

    rt.set_epoch(START_EPOCH + 100);
    let (payment, _) =
        cron_tick_and_assert_balances(&rt, CLIENT_ADDR, PROVIDER_ADDR, START_EPOCH + 100, deal_id);
    assert_eq!(&deal.storage_price_per_epoch * 100, payment);

    // A late tick catches up on every settlement up to and including expiry.
    rt.set_epoch(end_epoch + 5);
    let (payment, _) =
        cron_tick_and_assert_balances(&rt, CLIENT_ADDR, PROVIDER_ADDR, end_epoch + 5, deal_id);
    assert_eq!(&deal.storage_price_per_epoch * 900, payment);
    assert_deal_deleted(&rt, deal_id);
    check_state(&rt);

    // Both parties can withdraw everything once the deal has expired.
    let client = get_balance(&rt, &CLIENT_ADDR);
    assert_eq!(deal.client_collateral, client.balance);
    withdraw_client_balance(&rt, client.balance.clone(), client.balance, CLIENT_ADDR);
    let provider = get_balance(&rt, &PROVIDER_ADDR);
    assert_eq!(&deal.provider_collateral + deal.total_storage_fee(), provider.balance);
    withdraw_provider_balance(&rt, provider.balance.clone(), provider.balance, &addrs);

    assert_account_zero(&rt, CLIENT_ADDR);
    assert_account_zero(&rt, PROVIDER_ADDR);
    assert!(rt.get_balance().is_zero());
    check_state(&rt);
}

#[test]
fn updates_are_rescheduled_at_the_configured_interval() {
    let rt = setup_with_interval(10);
    let addrs = MinerAddresses::default();
    let end_epoch = START_EPOCH + 15;
    let deal_id =
        publish_and_activate_deal(
            &rt,
            CLIENT_ADDR,
            &addrs,
            START_EPOCH,
            end_epoch,
            0,
            SECTOR_EXPIRY,
        );

    rt.set_epoch(START_EPOCH);
    cron_tick(&rt);
    assert_eq!(vec![deal_id], deals_for_epoch(&rt, START_EPOCH + 10));
    assert_eq!(START_EPOCH, get_deal_state(&rt, deal_id).last_updated_epoch);

    // The last update is clamped to the end epoch.
    rt.set_epoch(START_EPOCH + 10);
    cron_tick(&rt);
    assert_eq!(vec![deal_id], deals_for_epoch(&rt, end_epoch));
    check_state(&rt);

    rt.set_epoch(end_epoch);
    cron_tick_and_assert_balances(&rt, CLIENT_ADDR, PROVIDER_ADDR, end_epoch, deal_id);
    assert_deal_deleted(&rt, deal_id);
    check_state(&rt);
}

#[test]
fn catch_up_processes_updates_rescheduled_within_the_range() {
    let rt = setup_with_interval(10);
    let addrs = MinerAddresses::default();
    let end_epoch = START_EPOCH + 100;
    let deal_id =
        publish_and_activate_deal(
            &rt,
            CLIENT_ADDR,
            &addrs,
            START_EPOCH,
            end_epoch,
            0,
            SECTOR_EXPIRY,
        );

    rt.set_epoch(end_epoch);
    let (payment, slashed) =
        cron_tick_and_assert_balances(&rt, CLIENT_ADDR, PROVIDER_ADDR, end_epoch, deal_id);
    assert_eq!(TokenAmount::from_atto(1000), payment);
    assert!(slashed.is_zero());
    assert_deal_deleted(&rt, deal_id);
    assert_eq!(end_epoch, rt.get_state::<State>().last_cron);
    check_state(&rt);
}

#[test]
fn second_tick_in_same_epoch_changes_nothing() {
    let rt = setup_with_interval(10);
    let addrs = MinerAddresses::default();
    let end_epoch = START_EPOCH + 50;
    publish_and_activate_deal(&rt, CLIENT_ADDR, &addrs, START_EPOCH, end_epoch, 0, SECTOR_EXPIRY);

    rt.set_epoch(START_EPOCH + 5);
    cron_tick(&rt);
    cron_tick_no_change(&rt, CLIENT_ADDR, PROVIDER_ADDR);
    check_state(&rt);
}

#[test]
fn unactivated_deal_times_out_at_start() {
    let rt = setup();
    let addrs = MinerAddresses::default();
    let deal_id = generate_and_publish_deal(&rt, CLIENT_ADDR, &addrs, START_EPOCH, END_EPOCH);
    let deal = get_deal_proposal(&rt, deal_id);

    rt.set_epoch(START_EPOCH);
    expect_burn(&rt, deal.provider_collateral.clone());
    cron_tick(&rt);

    assert_deal_deleted(&rt, deal_id);
    let client = get_balance(&rt, &CLIENT_ADDR);
    assert_eq!(deal.client_balance_requirement(), client.balance);
    assert!(client.locked.is_zero());
    assert_account_zero(&rt, PROVIDER_ADDR);
    check_state(&rt);
}

#[test]
fn deal_slashed_mid_term_pays_until_termination() {
    let rt = setup_with_interval(100);
    let addrs = MinerAddresses::default();
    let deal_id =
        publish_and_activate_deal(
            &rt,
            CLIENT_ADDR,
            &addrs,
            START_EPOCH,
            END_EPOCH,
            0,
            SECTOR_EXPIRY,
        );

    rt.set_epoch(START_EPOCH);
    cron_tick(&rt);

    let slash_epoch = START_EPOCH + 150;
    rt.set_epoch(slash_epoch);
    terminate_deals(&rt, PROVIDER_ADDR, &[deal_id]);

    // Processed at the regular update epoch that precedes the slash epoch's own entry.
    rt.set_epoch(slash_epoch + 1);
    let (payment, slashed) =
        cron_tick_and_assert_balances(&rt, CLIENT_ADDR, PROVIDER_ADDR, slash_epoch + 1, deal_id);
    assert_eq!(TokenAmount::from_atto(1500), payment);
    assert_eq!(TokenAmount::from_atto(10), slashed);
    assert_deal_deleted(&rt, deal_id);
    check_state(&rt);
}

#[test]
fn deal_slashed_before_start_pays_nothing() {
    let rt = setup();
    let addrs = MinerAddresses::default();
    let deal_id =
        publish_and_activate_deal(
            &rt,
            CLIENT_ADDR,
            &addrs,
            START_EPOCH,
            END_EPOCH,
            0,
            SECTOR_EXPIRY,
        );

    rt.set_epoch(10);
    terminate_deals(&rt, PROVIDER_ADDR, &[deal_id]);
    let (payment, slashed) =
        cron_tick_and_assert_balances(&rt, CLIENT_ADDR, PROVIDER_ADDR, 10, deal_id);
    assert!(payment.is_zero());
    assert_eq!(TokenAmount::from_atto(10), slashed);
    assert_deal_deleted(&rt, deal_id);

    // The stale start epoch entry is skipped.
    rt.set_epoch(START_EPOCH);
    cron_tick(&rt);
    check_state(&rt);
}

#[test]
fn slashes_in_one_tick_are_burned_together() {
    let rt = setup();
    let addrs = MinerAddresses::default();
    let d1 = generate_deal_and_add_funds(&rt, CLIENT_ADDR, &addrs, START_EPOCH, END_EPOCH);
    let d2 = generate_deal_and_add_funds(&rt, CLIENT_ADDR, &addrs, START_EPOCH, END_EPOCH + 1);
    let ids = publish_deals(&rt, &addrs, &[d1.clone(), d2.clone()]);
    activate_deals(&rt, SECTOR_EXPIRY, PROVIDER_ADDR, 0, &ids);
    let client_before = get_balance(&rt, &CLIENT_ADDR);

    let slash_epoch = START_EPOCH + 5;
    rt.set_epoch(slash_epoch);
    terminate_deals(&rt, PROVIDER_ADDR, &ids);

    expect_burn(&rt, &d1.provider_collateral + &d2.provider_collateral);
    cron_tick(&rt);

    for id in &ids {
        assert_deal_deleted(&rt, *id);
    }
    let payments = &d1.storage_price_per_epoch * 5 + &d2.storage_price_per_epoch * 5;
    let client = get_balance(&rt, &CLIENT_ADDR);
    assert_eq!(&client_before.balance - &payments, client.balance);
    assert!(client.locked.is_zero());
    let provider = get_balance(&rt, &PROVIDER_ADDR);
    assert_eq!(payments, provider.balance);
    assert!(provider.locked.is_zero());
    check_state(&rt);
}

#[test]
fn zero_price_deal_settles_without_payments() {
    let rt = setup_with_interval(10);
    let addrs = MinerAddresses::default();
    let end_epoch = START_EPOCH + 30;
    let mut deal = generate_deal_proposal(CLIENT_ADDR, PROVIDER_ADDR, START_EPOCH, end_epoch);
    deal.storage_price_per_epoch = TokenAmount::zero();
    add_deal_funds(&rt, &addrs, &deal);
    let ids = publish_deals(&rt, &addrs, &[deal.clone()]);
    activate_deals(&rt, SECTOR_EXPIRY, PROVIDER_ADDR, 0, &ids);

    rt.set_epoch(end_epoch);
    let (payment, _) =
        cron_tick_and_assert_balances(&rt, CLIENT_ADDR, PROVIDER_ADDR, end_epoch, ids[0]);
    assert!(payment.is_zero());
    assert_deal_deleted(&rt, ids[0]);
    assert_eq!(deal.client_collateral, get_balance(&rt, &CLIENT_ADDR).balance);
    assert_eq!(deal.provider_collateral, get_balance(&rt, &PROVIDER_ADDR).balance);
    check_state(&rt);
}

#[test]
fn cron_tick_only_accepted_from_cron_actor() {
    let rt = setup();
    rt.set_caller(*ACCOUNT_ACTOR_CODE_ID, OWNER_ADDR);
    rt.expect_validate_caller_addr(vec![CRON_ACTOR_ADDR]);
    expect_abort(ExitCode::USR_FORBIDDEN, rt.call::<MarketActor>(Method::CronTick as u64, None));
    rt.verify();
    check_state(&rt);
}
