//! The order state machine: placement, replacement, fills, unwind,
//! circuit breaker, reconciliation.
//!
//! Owns the position ledger exclusively. The supervisor loop is the only
//! caller, so all mutation is serialized; the stream workers talk to us
//! only through the event queues and the shared book-top cache.

pub mod fills;
pub mod recovery;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use clob_rs::errors::ClobError;
use clob_rs::portfolio::models::{OrderArgs, OrderType};

use crate::config::Config;
use crate::exchange::ExchangeApi;
use crate::pricing;
use crate::scanner::MarketOpportunity;
use crate::state::{ActiveOrder, MarketPosition, SideState};
use crate::types::{OrderSide, Side, TopOfBook};

/// Outcome of verifying a vanished order against the get-order endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifiedStatus {
    /// Filled (or partially matched) — a real fill.
    Matched,
    /// Cancelled or expired — not a fill, stop tracking.
    Cancelled,
    /// Still active; the listing endpoint just lagged.
    Live,
    /// Could not determine. Treated conservatively as a fill.
    Unknown,
}

/// A SELL placed at startup for shares inherited from a previous run,
/// keyed by token until the position is adopted into the ledger.
#[derive(Debug, Clone)]
pub struct RecoveryInfo {
    pub size: f64,
    pub order_id: Option<String>,
    pub sell_price: f64,
}

pub struct OrderManager {
    pub(crate) client: Arc<dyn ExchangeApi>,
    pub(crate) cfg: Config,
    pub positions: HashMap<String, MarketPosition>,
    // (condition_id, token_id) -> consecutive SELL placement failures
    pub sell_fail_counts: HashMap<(String, String), u32>,
    pub sell_retry_at: HashMap<(String, String), Instant>,
    // Tokens confirmed to have no on-chain balance; reconciliation must
    // not resurrect them from stale positions data.
    pub phantom_tokens: HashSet<String>,
    pub last_global_fill: Option<Instant>,
    pub market_blacklist: HashMap<String, Instant>,
    pub book_tops: Arc<DashMap<String, TopOfBook>>,
    pub recovered_token_ids: HashSet<String>,
    pub recovered_order_ids: HashSet<String>,
    pub recovery_info: HashMap<String, RecoveryInfo>,
}

impl OrderManager {
    pub fn new(
        client: Arc<dyn ExchangeApi>,
        cfg: Config,
        book_tops: Arc<DashMap<String, TopOfBook>>,
    ) -> Self {
        Self {
            client,
            cfg,
            positions: HashMap::new(),
            sell_fail_counts: HashMap::new(),
            sell_retry_at: HashMap::new(),
            phantom_tokens: HashSet::new(),
            last_global_fill: None,
            market_blacklist: HashMap::new(),
            book_tops,
            recovered_token_ids: HashSet::new(),
            recovered_order_ids: HashSet::new(),
            recovery_info: HashMap::new(),
        }
    }

    pub fn positions(&self) -> &HashMap<String, MarketPosition> {
        &self.positions
    }

    pub fn clear_ledger(&mut self) {
        self.positions.clear();
    }

    pub fn position(&self, condition_id: &str) -> Option<&MarketPosition> {
        self.positions.get(condition_id)
    }

    pub fn active_condition_ids(&self) -> Vec<String> {
        self.positions.keys().cloned().collect()
    }

    /// (token_ids, condition_ids) the stream workers should subscribe to.
    /// Includes recovery tokens so inherited SELLs get price updates.
    pub fn all_subscribed_ids(&self) -> (HashSet<String>, HashSet<String>) {
        let mut token_ids = HashSet::new();
        let mut condition_ids = HashSet::new();
        for (cid, pos) in &self.positions {
            condition_ids.insert(cid.clone());
            token_ids.insert(pos.token_id_yes.clone());
            token_ids.insert(pos.token_id_no.clone());
        }
        for tid in &self.recovered_token_ids {
            token_ids.insert(tid.clone());
        }
        (token_ids, condition_ids)
    }

    // --- Global circuit breaker ---

    pub fn is_global_paused(&self) -> bool {
        if !self.cfg.global_circuit_breaker {
            return false;
        }
        match self.last_global_fill {
            Some(t) => t.elapsed() < Duration::from_secs(self.cfg.global_fill_pause_s),
            None => false,
        }
    }

    pub fn global_pause_remaining_s(&self) -> u64 {
        match self.last_global_fill {
            Some(t) => Duration::from_secs(self.cfg.global_fill_pause_s)
                .saturating_sub(t.elapsed())
                .as_secs(),
            None => 0,
        }
    }

    /// Cancel ALL BUY orders across ALL markets; SELLs are preserved for
    /// inventory unwind. Returns the count cancelled.
    pub async fn cancel_all_buys(&mut self, reason: &str) -> usize {
        let client = self.client.clone();
        let mut cancelled = 0usize;
        for position in self.positions.values_mut() {
            for order in position.buy_orders() {
                if client.cancel(&order.order_id).await.is_ok() {
                    cancelled += 1;
                }
            }
            position.drop_buys();
        }
        if cancelled > 0 {
            warn!("CIRCUIT BREAKER: cancelled {cancelled} BUY orders across all markets — {reason}");
        }
        cancelled
    }

    // --- Blacklist ---

    /// Blacklist a market after a BUY fill; re-entry waits out the window.
    pub fn blacklist_market(&mut self, condition_id: &str) {
        self.market_blacklist
            .insert(condition_id.to_string(), Instant::now());
        info!(
            "Blacklisted {} for {}h after fill",
            short(condition_id),
            self.cfg.market_blacklist_s / 3600
        );
    }

    pub fn is_blacklisted(&mut self, condition_id: &str) -> bool {
        let window = Duration::from_secs(self.cfg.market_blacklist_s);
        match self.market_blacklist.get(condition_id) {
            Some(at) if at.elapsed() >= window => {
                self.market_blacklist.remove(condition_id);
                false
            }
            Some(_) => true,
            None => false,
        }
    }

    /// Runaway-fill blocks last until the next full rescan.
    pub fn clear_blocked_flags(&mut self) {
        for pos in self.positions.values_mut() {
            pos.yes.blocked = false;
            pos.no.blocked = false;
        }
    }

    // --- Midpoint helpers ---

    /// Fetch a midpoint, rejecting nonsensical values (API glitch or
    /// manipulation).
    pub(crate) async fn current_midpoint(&self, token_id: &str) -> Option<f64> {
        match self.client.get_midpoint(token_id).await {
            Ok(mid) if mid > 0.0 && mid < 1.0 => Some(mid),
            Ok(mid) => {
                warn!("Rejecting invalid midpoint {mid} for {}", short(token_id));
                None
            }
            Err(e) => {
                debug!("midpoint fetch failed for {}: {e}", short(token_id));
                None
            }
        }
    }

    pub(crate) fn best_ask(&self, token_id: &str) -> Option<f64> {
        self.book_tops.get(token_id).map(|t| t.best_ask)
    }

    pub(crate) fn side_in_cooldown(&self, state: &SideState) -> bool {
        if state.blocked {
            return true;
        }
        match state.last_sell_fill {
            Some(t) => t.elapsed() < Duration::from_secs(self.cfg.fill_cooldown_s),
            None => false,
        }
    }

    // --- Order verification ---

    /// Definitive order status from the get-order endpoint.
    pub(crate) async fn verify_order_status(&self, order_id: &str) -> VerifiedStatus {
        match self.client.get_order(order_id).await {
            Ok(record) => {
                let status = record.status.to_uppercase();
                if status == "MATCHED" || record.size_matched > 0.0 {
                    return VerifiedStatus::Matched;
                }
                if status == "CANCELLED" || status == "EXPIRED" {
                    info!("Order {} status={status} — NOT a fill", short(order_id));
                    return VerifiedStatus::Cancelled;
                }
                info!("Order {} status={status} — still live (listing lag)", short(order_id));
                VerifiedStatus::Live
            }
            Err(e) => {
                warn!("Failed to verify order {}: {e}", short(order_id));
                VerifiedStatus::Unknown
            }
        }
    }

    // --- Placement ---

    /// Add an order to position tracking, respecting the per-market cap.
    /// If the cap would be exceeded, the just-placed order is cancelled on
    /// the exchange so it doesn't become an orphan.
    pub async fn track_order(&mut self, condition_id: &str, order: ActiveOrder) -> bool {
        let cap = self.cfg.max_orders_per_market;
        let client = self.client.clone();
        let Some(position) = self.positions.get_mut(condition_id) else {
            let _ = client.cancel(&order.order_id).await;
            return false;
        };
        if position.orders.len() >= cap {
            warn!(
                "Order cap ({cap}) for {}, cancelling excess {}",
                short(condition_id),
                order.side.as_str()
            );
            let _ = client.cancel(&order.order_id).await;
            return false;
        }
        position.orders.push(order);
        true
    }

    /// Place a single order and return it for tracking.
    ///
    /// Enforces the safety caps before touching the exchange. SELLs get a
    /// conditional-allowance refresh first; SELLs below the market minimum
    /// fall back to a FOK market order when the GTC is rejected.
    pub async fn place_order(
        &self,
        token_id: &str,
        price: f64,
        size: f64,
        side: OrderSide,
        condition_id: &str,
        midpoint: f64,
        min_order_size: f64,
    ) -> Option<ActiveOrder> {
        if price <= 0.0 || price >= 1.0 || size <= 0.0 {
            error!("Refusing order with invalid params: price={price}, size={size}");
            return None;
        }
        if size > self.cfg.max_order_size {
            error!("Refusing order: size {size} exceeds cap {}", self.cfg.max_order_size);
            return None;
        }
        if price * size > self.cfg.max_single_order_usdc {
            error!(
                "Refusing order: cost ${:.2} exceeds cap ${}",
                price * size,
                self.cfg.max_single_order_usdc
            );
            return None;
        }
        if side == OrderSide::Buy {
            if let Some(position) = self.positions.get(condition_id) {
                if let Some(market_side) = position.side_for_token(token_id) {
                    let inv = position.side(market_side).inventory;
                    if inv + size > self.cfg.max_inventory_per_side {
                        warn!(
                            "Refusing BUY: would exceed inventory cap ({inv} + {size} > {})",
                            self.cfg.max_inventory_per_side
                        );
                        return None;
                    }
                }
            }
        }

        if side == OrderSide::Sell {
            if let Err(e) = self.client.update_balance_allowance(token_id).await {
                warn!("allowance update failed for {}: {e}", short(token_id));
            }
        }

        let args = OrderArgs {
            token_id: token_id.to_string(),
            price,
            size,
            side,
        };
        let is_sub_min_sell =
            side == OrderSide::Sell && min_order_size > 0.0 && size < min_order_size;

        let placed = match self.client.post_order(&args, OrderType::Gtc).await {
            Ok(id) => Ok(id),
            Err(e) if is_sub_min_sell => {
                // Exchange minimum is often lower than the rewards
                // min_size, so GTC usually works; FOK is the fallback.
                info!("GTC SELL rejected ({e}), trying FOK for {size} shares");
                self.client.post_order(&args, OrderType::Fok).await
            }
            Err(e) => Err(e),
        };

        match placed {
            Ok(order_id) => Some(ActiveOrder {
                order_id,
                token_id: token_id.to_string(),
                side,
                price,
                size,
                condition_id: condition_id.to_string(),
                placed_at: Instant::now(),
                midpoint_at_placement: midpoint,
            }),
            Err(ClobError::OrderRejected(msg)) => {
                error!("Order rejected: {msg}");
                None
            }
            Err(e) => {
                error!("Failed to place {} order at {price}: {e}", side.as_str());
                None
            }
        }
    }

    /// Place BUY YES + BUY NO for a scanned market and start tracking it.
    ///
    /// Buying NO is economically equivalent to selling YES; both orders
    /// use USDC only. Failure to place one side does not abort the other.
    pub async fn place_two_sided_orders(&mut self, opp: &MarketOpportunity) -> bool {
        if self.is_global_paused() {
            debug!(
                "Skipping new orders for {} (global pause, {}s remaining)",
                short(&opp.condition_id),
                self.global_pause_remaining_s()
            );
            return false;
        }

        let (buy_yes_price, buy_no_price) =
            pricing::buy_prices(&self.cfg, opp.midpoint, opp.max_spread, opp.tick_size);

        let no_midpoint = 1.0 - opp.midpoint;
        if buy_yes_price >= opp.midpoint || buy_no_price >= no_midpoint {
            warn!(
                "Invalid prices for {}: buy_yes={buy_yes_price}, buy_no={buy_no_price}, mid={}",
                short(&opp.condition_id),
                opp.midpoint
            );
            return false;
        }

        let position = MarketPosition::new(
            opp.condition_id.clone(),
            opp.token_id_yes.clone(),
            opp.token_id_no.clone(),
            opp.max_spread,
            opp.min_size,
            opp.tick_size,
            opp.midpoint,
        );
        self.positions.insert(opp.condition_id.clone(), position);

        let buy_size = opp.min_size * pricing::size_multiplier(&self.cfg);

        let buy_yes = self
            .place_order(
                &opp.token_id_yes,
                buy_yes_price,
                buy_size,
                OrderSide::Buy,
                &opp.condition_id,
                opp.midpoint,
                0.0,
            )
            .await;
        if let Some(order) = buy_yes {
            self.track_order(&opp.condition_id, order).await;
        }

        let buy_no = self
            .place_order(
                &opp.token_id_no,
                buy_no_price,
                buy_size,
                OrderSide::Buy,
                &opp.condition_id,
                opp.midpoint,
                0.0,
            )
            .await;
        if let Some(order) = buy_no {
            self.track_order(&opp.condition_id, order).await;
        }

        let placed = self
            .positions
            .get(&opp.condition_id)
            .map(|p| p.orders.len())
            .unwrap_or(0);
        if placed > 0 {
            info!(
                "Placed {placed} orders on {} | BUY_YES@{buy_yes_price:.4} BUY_NO@{buy_no_price:.4} | size={buy_size} mid={:.4}",
                truncate(&opp.question, 50),
                opp.midpoint
            );
            true
        } else {
            warn!("Failed to place any orders for {}", short(&opp.condition_id));
            self.positions.remove(&opp.condition_id);
            false
        }
    }

    // --- Cancellation ---

    /// Cancel all orders for one market; drops the position when every
    /// cancel succeeded.
    pub async fn cancel_market_orders(&mut self, condition_id: &str) -> bool {
        let Some(position) = self.positions.get(condition_id) else {
            return true;
        };
        let orders = position.orders.clone();
        let client = self.client.clone();

        let mut success = true;
        for order in orders {
            match client.cancel(&order.order_id).await {
                Ok(()) => info!("Cancelled {} order {}", order.side.as_str(), short(&order.order_id)),
                Err(e) => {
                    error!("Failed to cancel order {}: {e}", short(&order.order_id));
                    success = false;
                }
            }
        }
        if success {
            self.positions.remove(condition_id);
        }
        success
    }

    /// Cancel every order on the exchange and clear the ledger.
    pub async fn cancel_all_orders(&mut self) -> bool {
        match self.client.cancel_all().await {
            Ok(()) => {
                self.positions.clear();
                info!("Cancelled all orders");
                true
            }
            Err(e) => {
                error!("Failed to cancel all orders: {e}");
                false
            }
        }
    }

    // --- Drift replacement ---

    /// Cancel this market's orders and requote at the new midpoint.
    ///
    /// Before cancelling, vanished BUYs past the grace period are verified
    /// and treated as fills so inventory is not lost. Inventory, entry
    /// prices and cooldown state survive the replacement. Sides holding
    /// inventory get a SELL unwind instead of a BUY; sides in cooldown or
    /// blocked get nothing.
    pub async fn replace_orders(&mut self, condition_id: &str, new_midpoint: f64) -> bool {
        if !self.positions.contains_key(condition_id) {
            return false;
        }

        // Detect fills that happened since the last sync (race window).
        match self.client.get_orders().await {
            Ok(open_orders) => {
                let live_ids: HashSet<String> =
                    open_orders.into_iter().map(|o| o.id).collect();
                let grace = Duration::from_secs(self.cfg.order_grace_period_s);
                let position = self.positions.get(condition_id).cloned();
                if let Some(position) = position {
                    for order in &position.orders {
                        if live_ids.contains(&order.order_id)
                            || order.placed_at.elapsed() < grace
                            || order.side != OrderSide::Buy
                        {
                            continue;
                        }
                        let status = self.verify_order_status(&order.order_id).await;
                        if status != VerifiedStatus::Matched && status != VerifiedStatus::Unknown {
                            continue;
                        }
                        if let Some(pos) = self.positions.get_mut(condition_id) {
                            if let Some(side) = pos.side_for_token(&order.token_id) {
                                let state = pos.side_mut(side);
                                state.inventory += order.size;
                                state.entry_price = new_midpoint;
                                info!(
                                    "FILL (during replace): BUY {} {}@{:.4} for {}",
                                    side.as_str(),
                                    order.size,
                                    order.price,
                                    short(condition_id)
                                );
                            }
                        }
                    }
                }
            }
            Err(e) => warn!("Failed to check fills before replace: {e}"),
        }

        // Snapshot state (including just-detected fills) before cancelling.
        let Some(snapshot) = self.positions.get(condition_id).cloned() else {
            return false;
        };

        self.cancel_market_orders(condition_id).await;

        let (buy_yes_price, buy_no_price) = pricing::buy_prices(
            &self.cfg,
            new_midpoint,
            snapshot.max_spread,
            snapshot.tick_size,
        );
        let no_midpoint = 1.0 - new_midpoint;
        if buy_yes_price >= new_midpoint || buy_no_price >= no_midpoint {
            warn!(
                "Invalid replacement prices for {}: buy_yes={buy_yes_price}, buy_no={buy_no_price}, mid={new_midpoint}",
                short(condition_id)
            );
            return false;
        }

        let mut replacement = snapshot.clone();
        replacement.orders.clear();
        replacement.last_midpoint = new_midpoint;
        self.positions
            .insert(condition_id.to_string(), replacement);

        let global_paused = self.is_global_paused();
        let buy_size = snapshot.min_size * pricing::size_multiplier(&self.cfg);

        for (side, buy_price) in [(Side::Yes, buy_yes_price), (Side::No, buy_no_price)] {
            let state = snapshot.side(side);
            if state.inventory > 0.0 {
                continue; // SELL unwind takes priority on this side
            }
            if global_paused || self.side_in_cooldown(state) {
                debug!("Skipping BUY {} for {} (cooldown)", side.as_str(), short(condition_id));
                continue;
            }
            let order = self
                .place_order(
                    snapshot.token_id(side),
                    buy_price,
                    buy_size,
                    OrderSide::Buy,
                    condition_id,
                    new_midpoint,
                    0.0,
                )
                .await;
            if let Some(order) = order {
                self.track_order(condition_id, order).await;
            }
        }

        // Holding shares: wait for the conditional token to unlock after
        // the cancel, then re-place the unwind SELLs.
        if snapshot.has_inventory() {
            sleep(Duration::from_millis(self.cfg.collateral_release_delay_ms)).await;
        }
        for side in [Side::Yes, Side::No] {
            let inv = snapshot.side(side).inventory;
            if inv <= 0.0 {
                continue;
            }
            let price = pricing::sell_price(new_midpoint, snapshot.tick_size, side == Side::Yes);
            let order = self
                .place_order(
                    snapshot.token_id(side),
                    price,
                    inv,
                    OrderSide::Sell,
                    condition_id,
                    new_midpoint,
                    snapshot.min_size,
                )
                .await;
            if let Some(order) = order {
                self.track_order(condition_id, order).await;
                info!("  + SELL_{}@{price:.4} x{inv} (unwind)", side.as_str());
            }
        }

        info!(
            "Replaced orders for {} | new mid={new_midpoint:.4} BUY_YES@{buy_yes_price:.4} BUY_NO@{buy_no_price:.4}",
            short(condition_id)
        );
        true
    }

    /// Cancel and re-place only SELL orders at an updated midpoint. Used
    /// when drift hits a SELL-only position (during cooldown); BUYs are
    /// not touched and none are placed.
    pub async fn reprice_sell_orders(&mut self, condition_id: &str, new_midpoint: f64) -> bool {
        let Some(position) = self.positions.get(condition_id) else {
            return false;
        };
        let sells = position.sell_orders();
        if sells.is_empty() {
            return false;
        }
        let client = self.client.clone();
        for order in &sells {
            match client.cancel(&order.order_id).await {
                Ok(()) => info!("Cancelled SELL order {} for reprice", short(&order.order_id)),
                Err(e) => error!("Failed to cancel SELL {}: {e}", short(&order.order_id)),
            }
        }
        let Some(position) = self.positions.get_mut(condition_id) else {
            return false;
        };
        position.orders.retain(|o| o.side != OrderSide::Sell);
        position.last_midpoint = new_midpoint;
        let snapshot = position.clone();

        sleep(Duration::from_millis(self.cfg.collateral_release_delay_ms)).await;

        // Fresh placement, not a retry.
        for token in [&snapshot.token_id_yes, &snapshot.token_id_no] {
            self.sell_fail_counts
                .remove(&(condition_id.to_string(), token.to_string()));
        }

        let mut placed = false;
        for side in [Side::Yes, Side::No] {
            let inv = snapshot.side(side).inventory;
            if inv <= 0.0 {
                continue;
            }
            let price = pricing::sell_price(new_midpoint, snapshot.tick_size, side == Side::Yes);
            let order = self
                .place_order(
                    snapshot.token_id(side),
                    price,
                    inv,
                    OrderSide::Sell,
                    condition_id,
                    new_midpoint,
                    snapshot.min_size,
                )
                .await;
            if let Some(order) = order {
                self.track_order(condition_id, order).await;
                info!(
                    "Repriced SELL {}@{price:.4} x{inv} for {}",
                    side.as_str(),
                    short(condition_id)
                );
                placed = true;
            }
        }
        placed
    }

    // --- Force exit (stop-loss / extreme midpoint) ---

    /// Cancel BUYs and make sure each inventory side has a SELL at the
    /// current aggressive price; reprice an existing SELL when it is a
    /// tick or more away. Never re-places BUYs — the market is being
    /// abandoned to limit losses.
    pub async fn force_exit_market(&mut self, condition_id: &str) {
        let Some(position) = self.positions.get(condition_id) else {
            return;
        };
        let buys = position.buy_orders();
        let client = self.client.clone();
        for order in &buys {
            let _ = client.cancel(&order.order_id).await;
        }
        if let Some(pos) = self.positions.get_mut(condition_id) {
            pos.drop_buys();
        }

        let snapshot = self.positions.get(condition_id).cloned();
        let Some(snapshot) = snapshot else { return };

        let mid = match self.current_midpoint(&snapshot.token_id_yes).await {
            Some(m) => m,
            None => snapshot.last_midpoint,
        };

        for side in [Side::Yes, Side::No] {
            let inv = snapshot.side(side).inventory;
            if inv <= 0.0 {
                continue;
            }
            let token_id = snapshot.token_id(side).to_string();
            let target = pricing::sell_price(mid, snapshot.tick_size, side == Side::Yes);

            match snapshot.sell_for(&token_id) {
                None => {
                    let order = self
                        .place_order(
                            &token_id,
                            target,
                            inv,
                            OrderSide::Sell,
                            condition_id,
                            mid,
                            snapshot.min_size,
                        )
                        .await;
                    if let Some(order) = order {
                        self.track_order(condition_id, order).await;
                        warn!(
                            "STOP-LOSS SELL {}@{target:.4} x{inv} for {}",
                            side.as_str(),
                            short(condition_id)
                        );
                    }
                }
                Some(existing) if (existing.price - target).abs() >= snapshot.tick_size => {
                    let old_price = existing.price;
                    let old_id = existing.order_id.clone();
                    let _ = self.client.cancel(&old_id).await;
                    if let Some(pos) = self.positions.get_mut(condition_id) {
                        pos.drop_order(&old_id);
                    }
                    sleep(Duration::from_millis(self.cfg.reprice_delay_ms)).await;
                    let order = self
                        .place_order(
                            &token_id,
                            target,
                            inv,
                            OrderSide::Sell,
                            condition_id,
                            mid,
                            snapshot.min_size,
                        )
                        .await;
                    if let Some(order) = order {
                        self.track_order(condition_id, order).await;
                        info!(
                            "Repriced SELL {}: {old_price:.4} -> {target:.4} x{inv} for {}",
                            side.as_str(),
                            short(condition_id)
                        );
                    }
                }
                Some(_) => {}
            }
        }

        // Keep the position while anything is left; the SELL may have
        // failed and the retry path will catch it.
        if self
            .positions
            .get(condition_id)
            .map(|p| p.is_empty())
            .unwrap_or(false)
        {
            self.positions.remove(condition_id);
            info!("Stop-loss exit complete for {} (no inventory)", short(condition_id));
        }
    }

    // --- Stream-driven SELL reprice ---

    /// Reprice SELLs the moment the stream shows a meaningful move.
    ///
    /// Base price is the aggressive midpoint target; when the stream's
    /// best ask is usable we undercut it by one tick — unless the best ask
    /// is our own order (detected by price equality within a tick) or the
    /// undercut would not improve on the midpoint target. Only acts when
    /// the new price differs from the resting SELL by at least one tick.
    /// If inventory exists with no SELL at all, one is placed.
    pub async fn reprice_sell_if_stale(&mut self, condition_id: &str, new_midpoint: f64) -> bool {
        let Some(snapshot) = self.positions.get(condition_id).cloned() else {
            return false;
        };

        let mut repriced = false;
        for side in [Side::Yes, Side::No] {
            let inv = snapshot.side(side).inventory;
            if inv <= 0.0 {
                continue;
            }
            let token_id = snapshot.token_id(side).to_string();
            let mut target = pricing::sell_price(new_midpoint, snapshot.tick_size, side == Side::Yes);
            let existing = snapshot.sell_for(&token_id).cloned();

            if let Some(best_ask) = self.best_ask(&token_id) {
                if best_ask > snapshot.tick_size * 2.0 {
                    let is_our_order = existing
                        .as_ref()
                        .map(|o| (best_ask - o.price).abs() < snapshot.tick_size)
                        .unwrap_or(false);
                    if !is_our_order {
                        let undercut = pricing::round_price_down(
                            best_ask - snapshot.tick_size,
                            snapshot.tick_size,
                        );
                        if undercut > 0.0 && undercut < target {
                            target = pricing::clamp_price(undercut, snapshot.tick_size);
                        }
                    }
                }
            }

            match existing {
                None => {
                    let order = self
                        .place_order(
                            &token_id,
                            target,
                            inv,
                            OrderSide::Sell,
                            condition_id,
                            new_midpoint,
                            snapshot.min_size,
                        )
                        .await;
                    if let Some(order) = order {
                        self.track_order(condition_id, order).await;
                        info!(
                            "stream: placed SELL {}@{target:.4} x{inv} for {}",
                            side.as_str(),
                            short(condition_id)
                        );
                        repriced = true;
                    }
                }
                Some(existing) => {
                    if (existing.price - target).abs() < snapshot.tick_size {
                        continue;
                    }
                    let _ = self.client.cancel(&existing.order_id).await;
                    if let Some(pos) = self.positions.get_mut(condition_id) {
                        pos.drop_order(&existing.order_id);
                    }
                    sleep(Duration::from_millis(self.cfg.reprice_delay_ms)).await;
                    let order = self
                        .place_order(
                            &token_id,
                            target,
                            inv,
                            OrderSide::Sell,
                            condition_id,
                            new_midpoint,
                            snapshot.min_size,
                        )
                        .await;
                    if let Some(order) = order {
                        self.track_order(condition_id, order).await;
                        info!(
                            "stream reprice SELL {}: {:.4} -> {target:.4} x{inv} for {}",
                            side.as_str(),
                            existing.price,
                            short(condition_id)
                        );
                        repriced = true;
                    }
                }
            }
        }
        repriced
    }

    // --- Rescan maintenance ---

    /// Drop markets that fell out of the ranked list. Positions still
    /// holding inventory lose only their BUYs; the SELL unwind stays
    /// alive until the inventory clears.
    pub async fn exit_stale_markets(&mut self, best_cids: &HashSet<String>) {
        let client = self.client.clone();
        for cid in self.active_condition_ids() {
            if best_cids.contains(&cid) {
                continue;
            }
            let has_inventory = self
                .positions
                .get(&cid)
                .map(|p| p.has_inventory())
                .unwrap_or(false);
            if has_inventory {
                if let Some(position) = self.positions.get(&cid) {
                    for order in position.buy_orders() {
                        let _ = client.cancel(&order.order_id).await;
                    }
                }
                if let Some(position) = self.positions.get_mut(&cid) {
                    position.drop_buys();
                    info!(
                        "Stale market {} has inventory (Y={} N={}) — cancelled BUYs, keeping for unwind",
                        short(&cid),
                        position.yes.inventory,
                        position.no.inventory
                    );
                }
            } else {
                info!("Exiting stale market {}", short(&cid));
                self.cancel_market_orders(&cid).await;
            }
        }
    }

    /// Cancel BUYs in any active market whose 24h price range has blown
    /// past the volatility ceiling. SELLs stay for unwind.
    pub async fn check_active_volatility(&mut self) {
        if self.cfg.max_volatility_ratio <= 0.0 {
            return;
        }
        let client = self.client.clone();
        for cid in self.active_condition_ids() {
            let Some(position) = self.positions.get(&cid) else {
                continue;
            };
            let token_id = position.token_id_yes.clone();
            let max_spread = position.max_spread;

            let history = match client.get_prices_history(&token_id, "1d", 60).await {
                Ok(h) if h.len() >= 2 => h,
                _ => continue,
            };
            let prices: Vec<f64> = history.iter().map(|p| p.p).collect();
            let range = prices.iter().cloned().fold(f64::MIN, f64::max)
                - prices.iter().cloned().fold(f64::MAX, f64::min);
            let vol_ratio = range / max_spread;

            if vol_ratio > self.cfg.max_volatility_ratio {
                warn!(
                    "VOLATILITY EXIT: {} ratio={vol_ratio:.1}x (>{}) — cancelling BUYs",
                    short(&cid),
                    self.cfg.max_volatility_ratio
                );
                if let Some(position) = self.positions.get(&cid) {
                    for order in position.buy_orders() {
                        let _ = client.cancel(&order.order_id).await;
                    }
                }
                let empty = if let Some(position) = self.positions.get_mut(&cid) {
                    position.drop_buys();
                    !position.has_inventory()
                } else {
                    false
                };
                if empty {
                    self.cancel_market_orders(&cid).await;
                }
            }
        }
    }
}

/// First 16 chars of an id for log lines.
pub(crate) fn short(id: &str) -> &str {
    &id[..id.len().min(16)]
}

pub(crate) fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
