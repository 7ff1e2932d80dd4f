//! Fill detection and handling.
//!
//! Fills arrive on the user stream (preferred, exact sizes) or are
//! inferred from the REST listing when a tracked order vanishes. Both
//! paths aggregate per (condition, token, side) before placement logic so
//! a burst of fills produces exactly one SELL.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::manager::{short, OrderManager, VerifiedStatus};
use crate::pricing;
use crate::types::{FillEvent, OrderSide, Side, TradeEvent};

/// Below this remainder a partially filled order counts as gone (float dust).
const PARTIAL_FILL_DUST: f64 = 0.001;

/// An exchange balance under this is treated as zero when judging phantom
/// inventory.
const PHANTOM_BALANCE_EPSILON: f64 = 0.5;

impl OrderManager {
    // --- REST sync (safety net) ---

    /// Reconcile tracked orders against the exchange listing and return
    /// fills for vanished orders.
    ///
    /// Safeguards against phantom fills: orders inside the grace period
    /// are kept (listing propagation lag), each vanished order is verified
    /// through the get-order endpoint, and if every tracked order vanishes
    /// at once the whole pass is discarded as an API error.
    pub async fn sync_with_exchange(&mut self) -> Vec<FillEvent> {
        let mut fills = Vec::new();

        let open_orders = match self.client.get_orders().await {
            Ok(orders) => orders,
            Err(e) => {
                warn!("Failed to sync with exchange: {e}");
                return fills;
            }
        };
        let live_ids: HashSet<String> = open_orders.into_iter().map(|o| o.id).collect();
        let grace = Duration::from_secs(self.cfg.order_grace_period_s);

        let total_tracked: usize = self.positions.values().map(|p| p.orders.len()).sum();
        let mut missing: Vec<(String, crate::state::ActiveOrder)> = Vec::new();
        for (cid, position) in &self.positions {
            for order in &position.orders {
                if live_ids.contains(&order.order_id) {
                    continue;
                }
                if order.placed_at.elapsed() < grace {
                    debug!(
                        "Order {} not yet visible ({}s old), keeping",
                        short(&order.order_id),
                        order.placed_at.elapsed().as_secs()
                    );
                    continue;
                }
                missing.push((cid.clone(), order.clone()));
            }
        }

        // If ALL tracked orders vanished simultaneously, the listing
        // endpoint is lying; skip fill detection this cycle.
        if missing.len() >= total_tracked && total_tracked > 2 {
            warn!(
                "ALL {total_tracked} tracked orders missing from exchange — likely API error, skipping fill detection"
            );
            return fills;
        }

        for (cid, order) in missing {
            match self.verify_order_status(&order.order_id).await {
                VerifiedStatus::Live => continue,
                VerifiedStatus::Cancelled => {
                    if let Some(pos) = self.positions.get_mut(&cid) {
                        pos.drop_order(&order.order_id);
                    }
                }
                // Matched, or unreachable: conservatively a fill.
                VerifiedStatus::Matched | VerifiedStatus::Unknown => {
                    if let Some(pos) = self.positions.get_mut(&cid) {
                        let label = pos
                            .side_for_token(&order.token_id)
                            .map(Side::as_str)
                            .unwrap_or("?");
                        info!(
                            "FILL: {} {label} {}@{:.4} for {}",
                            order.side.as_str(),
                            order.size,
                            order.price,
                            short(&cid)
                        );
                        pos.drop_order(&order.order_id);
                    }
                    fills.push(FillEvent {
                        condition_id: cid,
                        token_id: order.token_id,
                        side: order.side,
                        price: order.price,
                        size: order.size,
                    });
                }
            }
        }

        fills
    }

    // --- Aggregated fill processing ---

    /// Process detected fills. BUY fills hold shares and place a SELL
    /// unwind; SELL fills complete the unwind and start the cooldown (the
    /// BUY comes back only through the cooldown re-entry path).
    pub async fn handle_filled_orders(&mut self, fills: Vec<FillEvent>) {
        // Aggregate per (condition, token, side) so one burst yields one SELL.
        let mut aggregated: HashMap<(String, String, OrderSide), (f64, f64)> = HashMap::new();
        for fill in fills {
            let entry = aggregated
                .entry((fill.condition_id, fill.token_id, fill.side))
                .or_insert((0.0, fill.price));
            entry.0 += fill.size;
            entry.1 = fill.price;
        }

        for ((cid, token_id, side), (total_size, price)) in aggregated {
            if !self.positions.contains_key(&cid) {
                continue;
            }
            match side {
                OrderSide::Buy => {
                    self.process_buy_fill(&cid, &token_id, total_size, price).await;
                }
                OrderSide::Sell => {
                    self.process_sell_fill(&cid, &token_id, total_size);
                }
            }
        }

        self.drop_empty_positions();
    }

    /// Everything that happens when one of our BUYs fills: cancel the
    /// market's remaining BUYs, fire the global circuit breaker, blacklist
    /// the market, book the inventory, flag runaway fills, and ensure a
    /// single SELL unwind exists.
    ///
    /// Fills against our resting orders happen at our limit price, so
    /// `fill_price` is exact on both the stream and REST-inferred paths.
    async fn process_buy_fill(&mut self, cid: &str, token_id: &str, total_size: f64, fill_price: f64) {
        let now = Instant::now();

        // Cancel the market's remaining BUYs first (prevent double fill).
        let client = self.client.clone();
        if let Some(position) = self.positions.get(cid) {
            for order in position.buy_orders() {
                let _ = client.cancel(&order.order_id).await;
            }
        }
        if let Some(position) = self.positions.get_mut(cid) {
            position.drop_buys();
        }

        let market_side = match self
            .positions
            .get(cid)
            .and_then(|p| p.side_for_token(token_id))
        {
            Some(side) => side,
            None => return,
        };

        if self.cfg.global_circuit_breaker {
            self.last_global_fill = Some(now);
            self.cancel_all_buys(&format!(
                "triggered by BUY {} fill in {}",
                market_side.as_str(),
                short(cid)
            ))
            .await;
        }

        self.blacklist_market(cid);

        let cooldown = Duration::from_secs(self.cfg.fill_cooldown_s);
        let max_fills = self.cfg.max_fills_before_block;
        let mut inventory = 0.0;
        if let Some(position) = self.positions.get_mut(cid) {
            position.apply_buy_fill(market_side, total_size, fill_price, now);
            let state = position.side_mut(market_side);
            let recent = state
                .fill_times
                .iter()
                .filter(|t| t.elapsed() < cooldown)
                .count();
            if recent >= max_fills {
                state.blocked = true;
                warn!(
                    "BLOCKED: {} side of {} ({recent} fills in {}s)",
                    market_side.as_str(),
                    short(cid),
                    self.cfg.fill_cooldown_s
                );
            }
            inventory = state.inventory;
            info!(
                "Inventory update: {} = {inventory} shares (+{total_size} from fill)",
                market_side.as_str()
            );
        }

        // One SELL per side: never stack a second unwind.
        if self
            .positions
            .get(cid)
            .map(|p| p.has_sell_for(token_id))
            .unwrap_or(false)
        {
            info!("SELL already pending for {}, skipping duplicate", market_side.as_str());
            return;
        }

        let Some(snapshot) = self.positions.get(cid).cloned() else {
            return;
        };
        let mid = match self.current_midpoint(&snapshot.token_id_yes).await {
            Some(m) => m,
            None => snapshot.last_midpoint,
        };
        if let Some(pos) = self.positions.get_mut(cid) {
            pos.last_midpoint = mid;
        }
        let sell = pricing::sell_price(mid, snapshot.tick_size, market_side == Side::Yes);
        let order = self
            .place_order(
                token_id,
                sell,
                inventory,
                OrderSide::Sell,
                cid,
                mid,
                snapshot.min_size,
            )
            .await;
        if let Some(order) = order {
            self.track_order(cid, order).await;
            info!(
                "Placed unwind SELL {}@{sell:.4} x{inventory} for {}",
                market_side.as_str(),
                short(cid)
            );
        }
        // If placement failed, retry_pending_sells picks it up.
    }

    fn process_sell_fill(&mut self, cid: &str, token_id: &str, total_size: f64) {
        let now = Instant::now();
        let Some(position) = self.positions.get_mut(cid) else {
            return;
        };
        let Some(market_side) = position.side_for_token(token_id) else {
            return;
        };
        position.apply_sell_fill(market_side, total_size, now);
        let remaining = position.side(market_side).inventory;
        if remaining == 0.0 {
            info!(
                "Unwind complete: SELL {} filled | cooldown {}s before re-entry",
                market_side.as_str(),
                self.cfg.fill_cooldown_s
            );
        } else {
            info!(
                "Partial SELL {} filled ({total_size} sold) | inventory now {remaining} shares",
                market_side.as_str()
            );
        }
        // Deliberately no BUY here; process_cooldown_reentries handles it.
    }

    // --- Stream fills ---

    /// Handle a batch of MATCHED trade events from the user stream.
    ///
    /// The side is taken from our tracked order — the event's side field
    /// describes the taker, not us. Events for the same tracked order are
    /// summed before placement logic. Events whose order id we no longer
    /// track but whose asset belongs to a position are treated as a SELL
    /// that raced a cancel: inventory is reduced and stale SELLs dropped.
    pub async fn handle_stream_fills(&mut self, events: Vec<TradeEvent>) {
        // First pass: resolve each event against tracking and aggregate.
        let mut tracked: HashMap<(String, String), (f64, f64)> = HashMap::new();
        let mut untracked: Vec<TradeEvent> = Vec::new();
        for event in events {
            if !event.status.eq_ignore_ascii_case("MATCHED") {
                continue;
            }
            let owner = self.positions.iter().find_map(|(cid, pos)| {
                pos.find_order(&event.order_id).map(|_| cid.clone())
            });
            match owner {
                Some(cid) => {
                    let entry = tracked
                        .entry((cid, event.order_id.clone()))
                        .or_insert((0.0, event.price));
                    entry.0 += event.size_matched;
                    entry.1 = event.price;
                }
                None => untracked.push(event),
            }
        }

        for ((cid, order_id), (total_matched, price)) in tracked {
            let Some(order) = self
                .positions
                .get(&cid)
                .and_then(|p| p.find_order(&order_id))
                .cloned()
            else {
                continue;
            };

            // Partial fills keep the order live with reduced size.
            let remaining = order.size - total_matched;
            if remaining > PARTIAL_FILL_DUST {
                if let Some(pos) = self.positions.get_mut(&cid) {
                    if let Some(tracked_order) =
                        pos.orders.iter_mut().find(|o| o.order_id == order_id)
                    {
                        tracked_order.size = remaining;
                    }
                }
                info!(
                    "Partial fill: {} {}/{} filled, {remaining:.2} remaining on exchange",
                    order.side.as_str(),
                    total_matched,
                    order.size
                );
            } else if let Some(pos) = self.positions.get_mut(&cid) {
                pos.drop_order(&order_id);
            }

            match order.side {
                OrderSide::Buy => {
                    info!(
                        "stream FILL: BUY {total_matched}@{price:.4} for {}",
                        short(&cid)
                    );
                    self.process_buy_fill(&cid, &order.token_id, total_matched, price)
                        .await;
                }
                OrderSide::Sell => {
                    info!(
                        "stream FILL: SELL {total_matched}@{price:.4} for {}",
                        short(&cid)
                    );
                    self.process_sell_fill(&cid, &order.token_id, total_matched);
                }
            }
        }

        for event in untracked {
            self.handle_untracked_fill(&event);
        }

        self.drop_empty_positions();
    }

    /// A fill for an order we no longer track: the order was cancelled
    /// concurrently with the fill (reprice race). If the asset matches a
    /// position, reduce that side's inventory and drop any stale SELL.
    fn handle_untracked_fill(&mut self, event: &TradeEvent) {
        let now = Instant::now();
        let owner = self.positions.iter().find_map(|(cid, pos)| {
            pos.side_for_token(&event.asset_id).map(|side| (cid.clone(), side))
        });
        let Some((cid, side)) = owner else {
            warn!(
                "stream fill for unknown order {} — ignoring",
                short(&event.order_id)
            );
            return;
        };
        let Some(position) = self.positions.get_mut(&cid) else {
            return;
        };
        let prior = position.side(side).inventory;
        if prior <= 0.0 {
            return;
        }
        position.apply_sell_fill(side, event.size_matched, now);
        let new_inv = position.side(side).inventory;
        info!(
            "stream FILL (untracked order): {} {}@{:.4} for {} | inventory {prior:.2} -> {new_inv:.2}",
            side.as_str(),
            event.size_matched,
            event.price,
            short(&cid)
        );
        let token = position.token_id(side).to_string();
        position.drop_sells_for(&token);
        if position.is_empty() {
            self.positions.remove(&cid);
            info!("Position fully closed for {}", short(&cid));
        }
    }

    // --- SELL retry / phantom detection ---

    /// Re-place missing SELL unwinds for any side holding inventory.
    ///
    /// Runs every loop iteration but throttles per token to once per
    /// rescan interval. After the retry budget is exhausted, the on-chain
    /// balance decides: real shares reset the counter and correct local
    /// inventory; a zero balance means the inventory was phantom — it is
    /// zeroed and the token is remembered so reconciliation cannot
    /// resurrect it from stale data.
    pub async fn retry_pending_sells(&mut self) {
        let cids = self.active_condition_ids();
        for cid in cids {
            for side in [Side::Yes, Side::No] {
                let Some(position) = self.positions.get(&cid) else {
                    break;
                };
                let inv = position.side(side).inventory;
                let token_id = position.token_id(side).to_string();
                if inv <= 0.0 || position.has_sell_for(&token_id) {
                    continue;
                }

                let fail_key = (cid.clone(), token_id.clone());
                let fail_count = *self.sell_fail_counts.get(&fail_key).unwrap_or(&0);

                if fail_count >= self.cfg.max_sell_retries {
                    // The shares may be real and just slow to unlock;
                    // check the chain before declaring phantom.
                    let on_chain = self.on_chain_balance(&token_id).await;
                    if on_chain > PHANTOM_BALANCE_EPSILON {
                        warn!(
                            "SELL failed {fail_count}x for {} {} but {on_chain} shares confirmed on-chain — keeping (resetting retry counter)",
                            side.as_str(),
                            short(&cid)
                        );
                        self.sell_fail_counts.insert(fail_key, 0);
                        if let Some(pos) = self.positions.get_mut(&cid) {
                            pos.side_mut(side).inventory = on_chain;
                        }
                    } else {
                        warn!(
                            "SELL failed {fail_count}x for {} {} — confirmed 0 shares on-chain, resetting phantom inventory ({inv} -> 0)",
                            side.as_str(),
                            short(&cid)
                        );
                        if let Some(pos) = self.positions.get_mut(&cid) {
                            let state = pos.side_mut(side);
                            state.inventory = 0.0;
                            state.entry_price = 0.0;
                        }
                        self.sell_fail_counts.remove(&fail_key);
                        self.phantom_tokens.insert(token_id);
                    }
                    continue;
                }

                // Throttle: one attempt per rescan interval per token.
                let throttle = Duration::from_secs(self.cfg.rescan_interval_s);
                if let Some(last) = self.sell_retry_at.get(&fail_key) {
                    if last.elapsed() < throttle {
                        continue;
                    }
                }
                self.sell_retry_at.insert(fail_key.clone(), Instant::now());

                let Some(snapshot) = self.positions.get(&cid).cloned() else {
                    continue;
                };
                let mid = match self.current_midpoint(&snapshot.token_id_yes).await {
                    Some(m) => m,
                    None => snapshot.last_midpoint,
                };
                let price = pricing::sell_price(mid, snapshot.tick_size, side == Side::Yes);
                info!(
                    "Retrying SELL {}@{price:.4} x{inv} for {} (attempt {}/{})",
                    side.as_str(),
                    short(&cid),
                    fail_count + 1,
                    self.cfg.max_sell_retries
                );
                let order = self
                    .place_order(
                        &token_id,
                        price,
                        inv,
                        OrderSide::Sell,
                        &cid,
                        mid,
                        snapshot.min_size,
                    )
                    .await;
                match order {
                    Some(order) => {
                        self.track_order(&cid, order).await;
                        self.sell_fail_counts.remove(&fail_key);
                        info!(
                            "SELL retry succeeded: {}@{price:.4} x{inv} for {}",
                            side.as_str(),
                            short(&cid)
                        );
                    }
                    None => {
                        self.sell_fail_counts.insert(fail_key, fail_count + 1);
                    }
                }
            }
        }

        self.drop_empty_positions();
    }

    pub(crate) async fn on_chain_balance(&self, token_id: &str) -> f64 {
        match self.client.get_my_positions().await {
            Ok(positions) => positions
                .iter()
                .find(|p| p.asset == token_id)
                .map(|p| p.size)
                .unwrap_or(0.0),
            Err(_) => 0.0,
        }
    }

    // --- Cooldown re-entry ---

    /// Re-place a BUY on any side whose SELL-fill cooldown has expired,
    /// provided the side is flat, unblocked and not already quoted, the
    /// market is not blacklisted, and the global pause is over.
    pub async fn process_cooldown_reentries(&mut self) {
        if self.is_global_paused() {
            return;
        }
        let cooldown = Duration::from_secs(self.cfg.fill_cooldown_s);

        for cid in self.active_condition_ids() {
            if self.is_blacklisted(&cid) {
                continue;
            }
            let mut mid: Option<f64> = None; // lazy fetch, once per market

            for side in [Side::Yes, Side::No] {
                let Some(position) = self.positions.get(&cid) else {
                    break;
                };
                let state = position.side(side);
                let Some(last_sell) = state.last_sell_fill else {
                    continue;
                };
                if state.blocked || state.inventory > 0.0 {
                    continue;
                }
                if last_sell.elapsed() < cooldown {
                    continue;
                }
                let token_id = position.token_id(side).to_string();
                if position.has_buy_for(&token_id) {
                    continue;
                }

                let snapshot = position.clone();
                if mid.is_none() {
                    mid = Some(
                        match self.current_midpoint(&snapshot.token_id_yes).await {
                            Some(m) => m,
                            None => snapshot.last_midpoint,
                        },
                    );
                }
                let midpoint = mid.unwrap();
                let (buy_yes_price, buy_no_price) = pricing::buy_prices(
                    &self.cfg,
                    midpoint,
                    snapshot.max_spread,
                    snapshot.tick_size,
                );
                let buy_price = if side == Side::Yes {
                    buy_yes_price
                } else {
                    buy_no_price
                };
                let size = snapshot.min_size * pricing::size_multiplier(&self.cfg);
                let waited = last_sell.elapsed().as_secs();

                let order = self
                    .place_order(
                        &token_id,
                        buy_price,
                        size,
                        OrderSide::Buy,
                        &cid,
                        midpoint,
                        0.0,
                    )
                    .await;
                if let Some(order) = order {
                    self.track_order(&cid, order).await;
                    if let Some(pos) = self.positions.get_mut(&cid) {
                        pos.side_mut(side).last_sell_fill = None;
                    }
                    info!(
                        "Cooldown expired: re-placed BUY {}@{buy_price:.4} for {} (waited {waited}s)",
                        side.as_str(),
                        short(&cid)
                    );
                }
            }
        }
    }

    pub(crate) fn drop_empty_positions(&mut self) {
        let dead: Vec<String> = self
            .positions
            .iter()
            .filter(|(_, p)| p.is_empty())
            .map(|(cid, _)| cid.clone())
            .collect();
        for cid in dead {
            info!("Position fully closed for {}", short(&cid));
            self.positions.remove(&cid);
        }
    }
}
