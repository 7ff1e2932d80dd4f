//! End-to-end order-lifecycle scenarios against the mock exchange:
//! entry, fills, circuit breaker, unwind, cooldowns, phantom inventory.

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use common::MockExchange;
use polymarket_bot::config::Config;
use polymarket_bot::exchange::ExchangeApi;
use polymarket_bot::manager::OrderManager;
use polymarket_bot::scanner::MarketOpportunity;
use polymarket_bot::state::{ActiveOrder, MarketPosition};
use polymarket_bot::types::{OrderSide, TradeEvent};

fn opportunity(cid: &str, yes: &str, no: &str, midpoint: f64) -> MarketOpportunity {
    MarketOpportunity {
        condition_id: cid.to_string(),
        question: format!("test market {cid}"),
        token_id_yes: yes.to_string(),
        token_id_no: no.to_string(),
        midpoint,
        reward_rate: 10.0,
        min_size: 50.0,
        max_spread: 0.03,
        book_depth_usdc: 1000.0,
        current_spread: 0.02,
        tick_size: 0.01,
        neg_risk: false,
        opportunity_score: 1.0,
    }
}

fn manager_with(mock: &Arc<MockExchange>) -> OrderManager {
    let client: Arc<dyn ExchangeApi> = mock.clone();
    OrderManager::new(client, Config::fast(), Arc::new(DashMap::new()))
}

fn matched_trade(order_id: &str, asset_id: &str, size: f64, price: f64) -> TradeEvent {
    TradeEvent {
        order_id: order_id.to_string(),
        asset_id: asset_id.to_string(),
        taker_side: "SELL".to_string(),
        size_matched: size,
        price,
        status: "MATCHED".to_string(),
    }
}

fn tracked_order_id(manager: &OrderManager, cid: &str, token: &str, side: OrderSide) -> String {
    manager.positions[cid]
        .orders
        .iter()
        .find(|o| o.side == side && o.token_id == token)
        .map(|o| o.order_id.clone())
        .expect("order tracked")
}

/// Enter one market and return the manager (midpoint seeded at 0.50).
async fn enter_market(mock: &Arc<MockExchange>, cid: &str, yes: &str, no: &str) -> OrderManager {
    mock.set_midpoint(yes, 0.50);
    let mut manager = manager_with(mock);
    assert!(
        manager
            .place_two_sided_orders(&opportunity(cid, yes, no, 0.50))
            .await
    );
    manager
}

#[tokio::test]
async fn entry_places_both_buy_quotes_at_the_reward_edge() {
    let mock = Arc::new(MockExchange::new());
    let manager = enter_market(&mock, "0xa", "11", "12").await;

    let buys = mock.placed_buys();
    assert_eq!(buys.len(), 2);
    for order in &buys {
        assert_eq!(order.price, 0.48);
        assert_eq!(order.size, 50.0);
    }
    assert_eq!(buys.iter().filter(|o| o.token_id == "11").count(), 1);
    assert_eq!(buys.iter().filter(|o| o.token_id == "12").count(), 1);
    assert_eq!(manager.positions["0xa"].orders.len(), 2);
    assert!(mock.placed_sells().is_empty());
}

#[tokio::test]
async fn buy_fill_fires_circuit_breaker_blacklist_and_single_sell() {
    let mock = Arc::new(MockExchange::new());
    mock.set_midpoint("11", 0.50);
    mock.set_midpoint("21", 0.60);
    let mut manager = manager_with(&mock);
    assert!(
        manager
            .place_two_sided_orders(&opportunity("0xa", "11", "12", 0.50))
            .await
    );
    assert!(
        manager
            .place_two_sided_orders(&opportunity("0xb", "21", "22", 0.60))
            .await
    );

    let filled_id = tracked_order_id(&manager, "0xa", "11", OrderSide::Buy);
    let a_buy_no = tracked_order_id(&manager, "0xa", "12", OrderSide::Buy);
    let b_buy_yes = tracked_order_id(&manager, "0xb", "21", OrderSide::Buy);
    let b_buy_no = tracked_order_id(&manager, "0xb", "22", OrderSide::Buy);

    manager
        .handle_stream_fills(vec![matched_trade(&filled_id, "11", 50.0, 0.48)])
        .await;

    // Inventory booked at the exact matched price.
    let position = &manager.positions["0xa"];
    assert_eq!(position.yes.inventory, 50.0);
    assert_eq!(position.yes.entry_price, 0.48);

    // Every other BUY in the fleet is gone.
    let cancelled = mock.cancelled();
    for id in [&a_buy_no, &b_buy_yes, &b_buy_no] {
        assert!(cancelled.contains(id), "expected {id} cancelled");
    }
    assert!(!manager.positions["0xb"].has_any_buy());

    // Exactly one SELL unwind at the midpoint target.
    let sells = mock.placed_sells();
    assert_eq!(sells.len(), 1);
    assert_eq!(sells[0].token_id, "11");
    assert_eq!(sells[0].size, 50.0);
    assert_eq!(sells[0].price, 0.50);
    assert!(manager.positions["0xa"].has_sell_for("11"));

    assert!(manager.is_global_paused());
    assert!(manager.is_blacklisted("0xa"));

    // The pause suppresses cooldown re-entry everywhere.
    let buys_before = mock.placed_buys().len();
    manager.process_cooldown_reentries().await;
    assert_eq!(mock.placed_buys().len(), buys_before);
}

#[tokio::test]
async fn simultaneous_fills_aggregate_into_one_sell() {
    let mock = Arc::new(MockExchange::new());
    let mut manager = enter_market(&mock, "0xa", "11", "12").await;
    let filled_id = tracked_order_id(&manager, "0xa", "11", OrderSide::Buy);

    manager
        .handle_stream_fills(vec![
            matched_trade(&filled_id, "11", 20.0, 0.48),
            matched_trade(&filled_id, "11", 30.0, 0.48),
        ])
        .await;

    let sells = mock.placed_sells();
    assert_eq!(sells.len(), 1, "one SELL per filled side, not one per event");
    assert_eq!(sells[0].size, 50.0);
    assert_eq!(manager.positions["0xa"].yes.inventory, 50.0);
}

#[tokio::test]
async fn partial_sell_fill_keeps_the_order_live() {
    let mock = Arc::new(MockExchange::new());
    let mut manager = enter_market(&mock, "0xa", "11", "12").await;
    let buy_id = tracked_order_id(&manager, "0xa", "11", OrderSide::Buy);
    manager
        .handle_stream_fills(vec![matched_trade(&buy_id, "11", 50.0, 0.48)])
        .await;
    let sell_id = tracked_order_id(&manager, "0xa", "11", OrderSide::Sell);

    manager
        .handle_stream_fills(vec![matched_trade(&sell_id, "11", 20.0, 0.50)])
        .await;

    let position = &manager.positions["0xa"];
    assert_eq!(position.yes.inventory, 30.0);
    let sell = position.sell_for("11").expect("sell still tracked");
    assert_eq!(sell.size, 30.0);
    // No replacement SELL was posted.
    assert_eq!(mock.placed_sells().len(), 1);
    // Entry price survives a partial unwind.
    assert_eq!(position.yes.entry_price, 0.48);
}

#[tokio::test]
async fn full_sell_fill_closes_the_position() {
    let mock = Arc::new(MockExchange::new());
    let mut manager = enter_market(&mock, "0xa", "11", "12").await;
    let buy_id = tracked_order_id(&manager, "0xa", "11", OrderSide::Buy);
    manager
        .handle_stream_fills(vec![matched_trade(&buy_id, "11", 50.0, 0.48)])
        .await;
    let sell_id = tracked_order_id(&manager, "0xa", "11", OrderSide::Sell);

    manager
        .handle_stream_fills(vec![matched_trade(&sell_id, "11", 50.0, 0.50)])
        .await;

    assert!(!manager.positions.contains_key("0xa"));
}

#[tokio::test]
async fn sell_overfill_floors_inventory_at_zero() {
    let mock = Arc::new(MockExchange::new());
    let mut manager = enter_market(&mock, "0xa", "11", "12").await;
    let buy_id = tracked_order_id(&manager, "0xa", "11", OrderSide::Buy);
    manager
        .handle_stream_fills(vec![matched_trade(&buy_id, "11", 50.0, 0.48)])
        .await;
    let sell_id = tracked_order_id(&manager, "0xa", "11", OrderSide::Sell);

    // The stream reports more than we thought we held.
    manager
        .handle_stream_fills(vec![matched_trade(&sell_id, "11", 80.0, 0.50)])
        .await;
    assert!(!manager.positions.contains_key("0xa"));
}

#[tokio::test]
async fn phantom_inventory_is_reset_after_retry_budget() {
    let mock = Arc::new(MockExchange::new());
    let mut manager = enter_market(&mock, "0xa", "11", "12").await;
    let buy_id = tracked_order_id(&manager, "0xa", "11", OrderSide::Buy);

    // Every SELL placement fails (settlement delay), including the unwind
    // attempted at fill time.
    mock.set_reject_sells(true);
    manager
        .handle_stream_fills(vec![matched_trade(&buy_id, "11", 50.0, 0.48)])
        .await;
    assert_eq!(manager.positions["0xa"].yes.inventory, 50.0);
    assert!(!manager.positions["0xa"].has_sell_for("11"));

    for _ in 0..5 {
        manager.retry_pending_sells().await;
    }
    assert_eq!(manager.sell_fail_counts.len(), 1);

    // Budget exhausted and the chain shows nothing: phantom.
    manager.retry_pending_sells().await;

    assert!(manager.phantom_tokens.contains("11"));
    assert!(manager.sell_fail_counts.is_empty());
    assert!(!manager.positions.contains_key("0xa"));
}

#[tokio::test]
async fn confirmed_chain_balance_resets_the_retry_counter() {
    let mock = Arc::new(MockExchange::new());
    let mut manager = enter_market(&mock, "0xa", "11", "12").await;
    let buy_id = tracked_order_id(&manager, "0xa", "11", OrderSide::Buy);

    mock.set_reject_sells(true);
    manager
        .handle_stream_fills(vec![matched_trade(&buy_id, "11", 50.0, 0.48)])
        .await;
    mock.set_chain_position("11", 49.5);

    for _ in 0..5 {
        manager.retry_pending_sells().await;
    }
    manager.retry_pending_sells().await;

    // Shares are real: inventory snaps to the chain and retries continue.
    let position = &manager.positions["0xa"];
    assert_eq!(position.yes.inventory, 49.5);
    assert!(!manager.phantom_tokens.contains("11"));
    let key = ("0xa".to_string(), "11".to_string());
    assert_eq!(manager.sell_fail_counts.get(&key), Some(&0));
}

#[tokio::test]
async fn sell_retry_places_the_missing_unwind() {
    let mock = Arc::new(MockExchange::new());
    let mut manager = enter_market(&mock, "0xa", "11", "12").await;
    let buy_id = tracked_order_id(&manager, "0xa", "11", OrderSide::Buy);

    mock.set_reject_sells(true);
    manager
        .handle_stream_fills(vec![matched_trade(&buy_id, "11", 50.0, 0.48)])
        .await;

    // Shares settle; the next retry succeeds.
    mock.set_reject_sells(false);
    manager.retry_pending_sells().await;

    assert!(manager.positions["0xa"].has_sell_for("11"));
    assert!(manager.sell_fail_counts.is_empty());
}

#[tokio::test]
async fn stop_loss_exit_reprices_the_stale_sell() {
    let mock = Arc::new(MockExchange::new());
    let mut manager = enter_market(&mock, "0xa", "11", "12").await;
    let buy_id = tracked_order_id(&manager, "0xa", "11", OrderSide::Buy);
    manager
        .handle_stream_fills(vec![matched_trade(&buy_id, "11", 50.0, 0.48)])
        .await;
    let old_sell = tracked_order_id(&manager, "0xa", "11", OrderSide::Sell);

    // Midpoint collapses below the stop-loss threshold.
    mock.set_midpoint("11", 0.44);
    manager.force_exit_market("0xa").await;

    assert!(mock.cancelled().contains(&old_sell));
    let sells = mock.placed_sells();
    let repriced = sells.last().unwrap();
    assert_eq!(repriced.price, 0.44);
    assert_eq!(repriced.size, 50.0);
    // Still holding shares: the position survives until the SELL fills.
    assert_eq!(manager.positions["0xa"].yes.inventory, 50.0);
    assert!(manager.positions["0xa"].has_sell_for("11"));
}

#[tokio::test]
async fn cooldown_reentry_places_exactly_one_buy() {
    let mock = Arc::new(MockExchange::new());
    mock.set_midpoint("11", 0.50);
    let mut manager = manager_with(&mock);

    // A market that unwound its YES side a while ago; the NO quote is
    // still resting so the position is alive.
    let mut position = MarketPosition::new(
        "0xa".into(),
        "11".into(),
        "12".into(),
        0.03,
        50.0,
        0.01,
        0.50,
    );
    position.yes.last_sell_fill = Some(Instant::now() - Duration::from_secs(301));
    position.orders.push(ActiveOrder {
        order_id: "0xresting".into(),
        token_id: "12".into(),
        side: OrderSide::Buy,
        price: 0.48,
        size: 50.0,
        condition_id: "0xa".into(),
        placed_at: Instant::now(),
        midpoint_at_placement: 0.50,
    });
    manager.positions.insert("0xa".into(), position);

    manager.process_cooldown_reentries().await;

    let buys = mock.placed_buys();
    assert_eq!(buys.len(), 1);
    assert_eq!(buys[0].token_id, "11");
    assert_eq!(buys[0].price, 0.48);
    assert_eq!(buys[0].size, 50.0);
    assert!(manager.positions["0xa"].yes.last_sell_fill.is_none());

    // Running again does not double up: the BUY is now tracked.
    manager.process_cooldown_reentries().await;
    assert_eq!(mock.placed_buys().len(), 1);
}

#[tokio::test]
async fn cooldown_still_active_means_no_buy() {
    let mock = Arc::new(MockExchange::new());
    mock.set_midpoint("11", 0.50);
    let mut manager = manager_with(&mock);
    let mut position = MarketPosition::new(
        "0xa".into(),
        "11".into(),
        "12".into(),
        0.03,
        50.0,
        0.01,
        0.50,
    );
    position.yes.last_sell_fill = Some(Instant::now() - Duration::from_secs(10));
    position.orders.push(ActiveOrder {
        order_id: "0xresting".into(),
        token_id: "12".into(),
        side: OrderSide::Buy,
        price: 0.48,
        size: 50.0,
        condition_id: "0xa".into(),
        placed_at: Instant::now(),
        midpoint_at_placement: 0.50,
    });
    manager.positions.insert("0xa".into(), position);

    manager.process_cooldown_reentries().await;
    assert!(mock.placed_buys().is_empty());
}

#[tokio::test]
async fn global_pause_blocks_every_buy_path() {
    let mock = Arc::new(MockExchange::new());
    mock.set_midpoint("11", 0.50);
    let mut manager = manager_with(&mock);
    manager.last_global_fill = Some(Instant::now());

    // Initial placement refuses outright.
    assert!(
        !manager
            .place_two_sided_orders(&opportunity("0xa", "11", "12", 0.50))
            .await
    );
    assert!(mock.placed_buys().is_empty());

    // Drift replacement skips the BUY legs.
    let position = MarketPosition::new(
        "0xa".into(),
        "11".into(),
        "12".into(),
        0.03,
        50.0,
        0.01,
        0.50,
    );
    manager.positions.insert("0xa".into(), position);
    manager.replace_orders("0xa", 0.52).await;
    assert!(mock.placed_buys().is_empty());

    // Cooldown re-entry is suppressed too.
    if let Some(pos) = manager.positions.get_mut("0xa") {
        pos.yes.last_sell_fill = Some(Instant::now() - Duration::from_secs(400));
    }
    manager.process_cooldown_reentries().await;
    assert!(mock.placed_buys().is_empty());
}

#[tokio::test]
async fn untracked_fill_is_a_raced_sell() {
    let mock = Arc::new(MockExchange::new());
    let mut manager = enter_market(&mock, "0xa", "11", "12").await;
    let buy_id = tracked_order_id(&manager, "0xa", "11", OrderSide::Buy);
    manager
        .handle_stream_fills(vec![matched_trade(&buy_id, "11", 50.0, 0.48)])
        .await;
    let sell_id = tracked_order_id(&manager, "0xa", "11", OrderSide::Sell);

    // The SELL was cancelled by a reprice just as it filled; the fill
    // arrives under an id we no longer track.
    manager.positions.get_mut("0xa").unwrap().drop_order(&sell_id);
    manager
        .handle_stream_fills(vec![matched_trade("0xghost", "11", 50.0, 0.50)])
        .await;

    // Inventory reflects the sale and the dead position is gone.
    assert!(!manager.positions.contains_key("0xa"));
}

#[tokio::test]
async fn replace_orders_preserves_inventory_and_requotes() {
    let mock = Arc::new(MockExchange::new());
    let mut manager = enter_market(&mock, "0xa", "11", "12").await;
    let buy_id = tracked_order_id(&manager, "0xa", "11", OrderSide::Buy);
    manager
        .handle_stream_fills(vec![matched_trade(&buy_id, "11", 50.0, 0.48)])
        .await;
    // Let the pause lapse so the NO-side BUY comes back.
    manager.last_global_fill = None;
    mock.clear_log();

    assert!(manager.replace_orders("0xa", 0.52).await);

    let position = &manager.positions["0xa"];
    assert_eq!(position.yes.inventory, 50.0);
    assert_eq!(position.yes.entry_price, 0.48);
    assert_eq!(position.last_midpoint, 0.52);

    // YES side holds inventory: SELL only. NO side requotes at the new
    // midpoint (1 - 0.52 - 0.018 -> 0.46).
    let buys = mock.placed_buys();
    assert_eq!(buys.len(), 1);
    assert_eq!(buys[0].token_id, "12");
    assert_eq!(buys[0].price, 0.46);
    let sells = mock.placed_sells();
    assert_eq!(sells.len(), 1);
    assert_eq!(sells[0].token_id, "11");
    assert_eq!(sells[0].price, 0.52);
    assert_eq!(sells[0].size, 50.0);
}

#[tokio::test]
async fn order_cap_cancels_the_excess_order() {
    let mock = Arc::new(MockExchange::new());
    let mut manager = enter_market(&mock, "0xa", "11", "12").await;

    // Pack the position to the cap, then push one more through the
    // placement path.
    {
        let position = manager.positions.get_mut("0xa").unwrap();
        position.orders.push(ActiveOrder {
            order_id: "0xthird".into(),
            token_id: "11".into(),
            side: OrderSide::Sell,
            price: 0.50,
            size: 10.0,
            condition_id: "0xa".into(),
            placed_at: Instant::now(),
            midpoint_at_placement: 0.50,
        });
    }
    let order = manager
        .place_order("11", 0.49, 10.0, OrderSide::Buy, "0xa", 0.50, 0.0)
        .await
        .expect("placement itself succeeds");
    let excess_id = order.order_id.clone();
    assert!(!manager.track_order("0xa", order).await);
    assert!(mock.cancelled().contains(&excess_id));
    assert_eq!(manager.positions["0xa"].orders.len(), 3);
}

#[tokio::test]
async fn safety_caps_refuse_oversized_orders() {
    let mock = Arc::new(MockExchange::new());
    let manager = manager_with(&mock);

    // size cap
    assert!(manager
        .place_order("11", 0.40, 600.0, OrderSide::Buy, "0xa", 0.50, 0.0)
        .await
        .is_none());
    // notional cap
    assert!(manager
        .place_order("11", 0.90, 400.0, OrderSide::Buy, "0xa", 0.50, 0.0)
        .await
        .is_none());
    // degenerate prices
    assert!(manager
        .place_order("11", 0.0, 50.0, OrderSide::Buy, "0xa", 0.50, 0.0)
        .await
        .is_none());
    assert!(manager
        .place_order("11", 1.0, 50.0, OrderSide::Buy, "0xa", 0.50, 0.0)
        .await
        .is_none());
    assert!(mock.placed().is_empty());
}

#[tokio::test]
async fn inventory_cap_blocks_further_buys() {
    let mock = Arc::new(MockExchange::new());
    let mut manager = manager_with(&mock);
    let mut position = MarketPosition::new(
        "0xa".into(),
        "11".into(),
        "12".into(),
        0.03,
        50.0,
        0.01,
        0.50,
    );
    position.yes.inventory = 280.0;
    manager.positions.insert("0xa".into(), position);

    // 280 + 50 > 300: refused before touching the exchange.
    assert!(manager
        .place_order("11", 0.48, 50.0, OrderSide::Buy, "0xa", 0.50, 0.0)
        .await
        .is_none());
    assert!(mock.placed().is_empty());
}
