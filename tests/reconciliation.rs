//! Reconciliation, REST fill sync, orphan cleanup and the force-sell
//! sweep against the mock exchange.

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use common::MockExchange;
use polymarket_bot::config::Config;
use polymarket_bot::exchange::ExchangeApi;
use polymarket_bot::manager::OrderManager;
use polymarket_bot::state::{ActiveOrder, MarketPosition};
use polymarket_bot::types::OrderSide;

fn manager_with(mock: &Arc<MockExchange>) -> OrderManager {
    let client: Arc<dyn ExchangeApi> = mock.clone();
    OrderManager::new(client, Config::fast(), Arc::new(DashMap::new()))
}

fn position(cid: &str, yes: &str, no: &str) -> MarketPosition {
    MarketPosition::new(cid.into(), yes.into(), no.into(), 0.03, 50.0, 0.01, 0.50)
}

fn order(id: &str, cid: &str, token: &str, side: OrderSide, price: f64, size: f64) -> ActiveOrder {
    ActiveOrder {
        order_id: id.into(),
        token_id: token.into(),
        side,
        price,
        size,
        condition_id: cid.into(),
        placed_at: Instant::now(),
        midpoint_at_placement: 0.50,
    }
}

// --- Two-way reconciliation ---

#[tokio::test]
async fn phantom_inventory_is_cleared_when_chain_shows_zero() {
    let mock = Arc::new(MockExchange::new());
    let mut manager = manager_with(&mock);
    let mut pos = position("0xa", "11", "12");
    pos.yes.inventory = 50.0;
    manager.positions.insert("0xa".into(), pos);
    manager
        .sell_fail_counts
        .insert(("0xa".to_string(), "11".to_string()), 3);

    manager.reconcile_inventory().await;

    assert_eq!(manager.positions["0xa"].yes.inventory, 0.0);
    assert!(manager.sell_fail_counts.is_empty());
}

#[tokio::test]
async fn inventory_mismatch_snaps_to_the_chain() {
    let mock = Arc::new(MockExchange::new());
    mock.set_chain_position("11", 30.25);
    mock.set_midpoint("11", 0.50);
    let mut manager = manager_with(&mock);
    let mut pos = position("0xa", "11", "12");
    pos.yes.inventory = 50.0;
    pos.orders
        .push(order("0xsell", "0xa", "11", OrderSide::Sell, 0.50, 50.0));
    manager.positions.insert("0xa".into(), pos);

    manager.reconcile_inventory().await;
    assert_eq!(manager.positions["0xa"].yes.inventory, 30.25);
}

#[tokio::test]
async fn small_mismatch_is_left_alone() {
    let mock = Arc::new(MockExchange::new());
    mock.set_chain_position("11", 49.8);
    let mut manager = manager_with(&mock);
    let mut pos = position("0xa", "11", "12");
    pos.yes.inventory = 50.0;
    pos.orders
        .push(order("0xsell", "0xa", "11", OrderSide::Sell, 0.50, 50.0));
    manager.positions.insert("0xa".into(), pos);

    manager.reconcile_inventory().await;
    assert_eq!(manager.positions["0xa"].yes.inventory, 50.0);
}

#[tokio::test]
async fn missed_fill_is_adopted_with_a_sell() {
    let mock = Arc::new(MockExchange::new());
    mock.set_chain_position("11", 40.0);
    mock.set_midpoint("11", 0.50);
    let mut manager = manager_with(&mock);
    manager.positions.insert("0xa".into(), position("0xa", "11", "12"));

    manager.reconcile_inventory().await;

    assert_eq!(manager.positions["0xa"].yes.inventory, 40.0);
    let sells = mock.placed_sells();
    assert_eq!(sells.len(), 1);
    assert_eq!(sells[0].token_id, "11");
    assert_eq!(sells[0].size, 40.0);
    assert_eq!(sells[0].price, 0.50);
}

#[tokio::test]
async fn known_inventory_without_a_sell_gets_one() {
    let mock = Arc::new(MockExchange::new());
    mock.set_chain_position("11", 40.0);
    mock.set_midpoint("11", 0.50);
    let mut manager = manager_with(&mock);
    let mut pos = position("0xa", "11", "12");
    pos.yes.inventory = 40.0;
    manager.positions.insert("0xa".into(), pos);

    manager.reconcile_inventory().await;

    let sells = mock.placed_sells();
    assert_eq!(sells.len(), 1);
    assert_eq!(sells[0].size, 40.0);
}

#[tokio::test]
async fn tracked_side_with_a_sell_is_untouched() {
    let mock = Arc::new(MockExchange::new());
    mock.set_chain_position("11", 40.0);
    let mut manager = manager_with(&mock);
    let mut pos = position("0xa", "11", "12");
    pos.yes.inventory = 40.0;
    pos.orders
        .push(order("0xsell", "0xa", "11", OrderSide::Sell, 0.50, 40.0));
    manager.positions.insert("0xa".into(), pos);

    manager.reconcile_inventory().await;
    assert!(mock.placed().is_empty());
}

#[tokio::test]
async fn unknown_token_gets_a_recovery_sell() {
    let mock = Arc::new(MockExchange::new());
    mock.set_chain_position("99", 25.0);
    mock.set_midpoint("99", 0.30);
    mock.state.lock().unwrap().books.insert(
        "99".into(),
        clob_rs::markets::models::OrderBook {
            bids: Vec::new(),
            asks: Vec::new(),
            min_order_size: Some(5.0),
        },
    );
    let mut manager = manager_with(&mock);

    manager.reconcile_inventory().await;

    let sells = mock.placed_sells();
    assert_eq!(sells.len(), 1);
    assert_eq!(sells[0].token_id, "99");
    assert_eq!(sells[0].price, 0.30);
    assert!(manager.recovery_info.contains_key("99"));
    assert!(manager.recovered_token_ids.contains("99"));
}

#[tokio::test]
async fn phantom_tokens_are_not_resurrected() {
    let mock = Arc::new(MockExchange::new());
    mock.set_chain_position("11", 50.0);
    let mut manager = manager_with(&mock);
    manager.phantom_tokens.insert("11".into());
    manager.positions.insert("0xa".into(), position("0xa", "11", "12"));

    manager.reconcile_inventory().await;

    assert_eq!(manager.positions["0xa"].yes.inventory, 0.0);
    assert!(mock.placed().is_empty());
}

#[tokio::test]
async fn dead_market_writes_shares_off() {
    let mock = Arc::new(MockExchange::new());
    mock.set_chain_position("99", 25.0);
    mock.set_midpoint("99", 0.30);
    // No order book for 99: the market is gone.
    let mut manager = manager_with(&mock);

    manager.reconcile_inventory().await;

    assert!(mock.placed().is_empty());
    assert!(manager.recovery_info.is_empty());
    assert!(!manager.recovered_token_ids.contains("99"));
}

// --- Force-sell sweep ---

#[tokio::test]
async fn sweep_sells_balances_with_no_sell_anywhere() {
    let mock = Arc::new(MockExchange::new());
    mock.set_chain_position("77", 30.0);
    mock.set_midpoint("77", 0.40);
    mock.state.lock().unwrap().books.insert(
        "77".into(),
        clob_rs::markets::models::OrderBook {
            bids: Vec::new(),
            asks: Vec::new(),
            min_order_size: Some(5.0),
        },
    );
    let mut manager = manager_with(&mock);

    manager.force_sell_stale_positions().await;

    let sells = mock.placed_sells();
    assert_eq!(sells.len(), 1);
    assert_eq!(sells[0].token_id, "77");
}

#[tokio::test]
async fn sweep_skips_tokens_with_pending_recovery_sells() {
    let mock = Arc::new(MockExchange::new());
    mock.set_chain_position("77", 30.0);
    let mut manager = manager_with(&mock);
    manager.recovery_info.insert(
        "77".into(),
        polymarket_bot::manager::RecoveryInfo {
            size: 30.0,
            order_id: Some("0xrecovery".into()),
            sell_price: 0.40,
        },
    );

    manager.force_sell_stale_positions().await;
    assert!(mock.placed().is_empty());
}

// --- REST fill sync ---

#[tokio::test]
async fn vanished_order_past_grace_is_a_verified_fill() {
    let mock = Arc::new(MockExchange::new());
    mock.set_midpoint("11", 0.50);
    let mut manager = manager_with(&mock);
    let mut pos = position("0xa", "11", "12");
    let mut buy = order("0xbuy", "0xa", "11", OrderSide::Buy, 0.48, 50.0);
    buy.placed_at = Instant::now() - Duration::from_secs(60);
    pos.orders.push(buy);
    manager.positions.insert("0xa".into(), pos);
    mock.set_order_status("0xbuy", "MATCHED", 50.0);

    let fills = manager.sync_with_exchange().await;
    assert_eq!(fills.len(), 1);
    assert_eq!(fills[0].side, OrderSide::Buy);
    assert_eq!(fills[0].size, 50.0);
    assert!(!manager.positions["0xa"].has_buy_for("11"));

    manager.handle_filled_orders(fills).await;
    assert_eq!(manager.positions["0xa"].yes.inventory, 50.0);
    assert_eq!(mock.placed_sells().len(), 1);
    assert!(manager.is_global_paused());
}

#[tokio::test]
async fn cancelled_order_is_dropped_without_a_fill() {
    let mock = Arc::new(MockExchange::new());
    let mut manager = manager_with(&mock);
    let mut pos = position("0xa", "11", "12");
    let mut buy = order("0xbuy", "0xa", "11", OrderSide::Buy, 0.48, 50.0);
    buy.placed_at = Instant::now() - Duration::from_secs(60);
    pos.orders.push(buy);
    manager.positions.insert("0xa".into(), pos);
    mock.set_order_status("0xbuy", "CANCELLED", 0.0);

    let fills = manager.sync_with_exchange().await;
    assert!(fills.is_empty());
    assert!(manager.positions["0xa"].orders.is_empty());
}

#[tokio::test]
async fn young_missing_orders_ride_out_the_grace_period() {
    let mock = Arc::new(MockExchange::new());
    let mut manager = manager_with(&mock);
    let mut pos = position("0xa", "11", "12");
    pos.orders
        .push(order("0xbuy", "0xa", "11", OrderSide::Buy, 0.48, 50.0));
    manager.positions.insert("0xa".into(), pos);

    let fills = manager.sync_with_exchange().await;
    assert!(fills.is_empty());
    assert!(manager.positions["0xa"].has_buy_for("11"));
}

#[tokio::test]
async fn still_live_orders_survive_a_listing_miss() {
    let mock = Arc::new(MockExchange::new());
    let mut manager = manager_with(&mock);
    let mut pos = position("0xa", "11", "12");
    let mut buy = order("0xbuy", "0xa", "11", OrderSide::Buy, 0.48, 50.0);
    buy.placed_at = Instant::now() - Duration::from_secs(60);
    pos.orders.push(buy);
    manager.positions.insert("0xa".into(), pos);
    mock.set_order_status("0xbuy", "LIVE", 0.0);

    let fills = manager.sync_with_exchange().await;
    assert!(fills.is_empty());
    assert!(manager.positions["0xa"].has_buy_for("11"));
}

#[tokio::test]
async fn mass_disappearance_is_treated_as_an_api_error() {
    let mock = Arc::new(MockExchange::new());
    let mut manager = manager_with(&mock);
    for (cid, yes, no) in [("0xa", "11", "12"), ("0xb", "21", "22")] {
        let mut pos = position(cid, yes, no);
        for (i, token) in [yes, no].iter().enumerate() {
            let mut o = order(
                &format!("{cid}-buy{i}"),
                cid,
                token,
                OrderSide::Buy,
                0.48,
                50.0,
            );
            o.placed_at = Instant::now() - Duration::from_secs(60);
            pos.orders.push(o);
        }
        manager.positions.insert(cid.into(), pos);
    }

    // The listing returns nothing at all; no fills are inferred and
    // nothing is dropped.
    let fills = manager.sync_with_exchange().await;
    assert!(fills.is_empty());
    assert_eq!(manager.positions["0xa"].orders.len(), 2);
    assert_eq!(manager.positions["0xb"].orders.len(), 2);
}

// --- Orphan cleanup ---

#[tokio::test]
async fn orphaned_orders_are_cancelled() {
    let mock = Arc::new(MockExchange::new());
    let mut manager = manager_with(&mock);
    let mut pos = position("0xa", "11", "12");
    pos.orders
        .push(order("0xmine", "0xa", "11", OrderSide::Buy, 0.48, 50.0));
    manager.positions.insert("0xa".into(), pos);
    manager.recovered_order_ids.insert("0xrecovery".into());
    {
        let mut state = mock.state.lock().unwrap();
        for id in ["0xmine", "0xrecovery", "0xstray"] {
            state.live_order_ids.insert(id.to_string());
        }
    }

    manager.cleanup_orphaned_orders().await;

    let cancelled = mock.cancelled();
    assert_eq!(cancelled, vec!["0xstray".to_string()]);
}
