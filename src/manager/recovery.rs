//! Startup recovery and exchange reconciliation.
//!
//! A restart can leave shares on the exchange with no local state. At
//! startup every nonzero balance gets a recovery SELL; those positions
//! are then force-adopted into the ledger so they benefit from stream
//! repricing immediately. At rescan cadence the ledger is reconciled
//! against on-chain reality in both directions.

use std::collections::HashMap;

use tracing::{info, warn};

use clob_rs::errors::ClobError;
use clob_rs::portfolio::models::{OrderArgs, OrderType};

use crate::manager::{short, truncate, OrderManager, RecoveryInfo};
use crate::pricing;
use crate::scanner::MarketScanner;
use crate::state::{ActiveOrder, MarketPosition};
use crate::types::{OrderSide, Side};

/// Reward defaults assumed for adopted markets whose metadata lookup
/// came back without a rewards block.
const DEFAULT_MAX_SPREAD: f64 = 0.03;
const DEFAULT_MIN_SIZE: f64 = 50.0;
const DEFAULT_TICK_SIZE: f64 = 0.01;

impl OrderManager {
    // --- Startup ---

    /// Query on-chain positions and place a SELL for every balance held
    /// over from a previous run. The tokens are blocked from re-entry
    /// until adopted.
    pub async fn recover_existing_positions(&mut self) {
        let positions = match self.client.get_my_positions().await {
            Ok(p) => p,
            Err(e) => {
                warn!("Failed to fetch existing positions: {e}");
                return;
            }
        };
        for pos in positions {
            if pos.size <= 0.0 || pos.asset.is_empty() {
                continue;
            }
            self.recovered_token_ids.insert(pos.asset.clone());
            info!(
                "Found existing position: {} [{}] = {} shares (blocking re-entry)",
                truncate(&pos.title, 50),
                pos.outcome,
                pos.size
            );
            self.place_recovery_sell(&pos.asset, pos.size).await;
        }
    }

    /// Place a SELL for orphaned/recovered shares and remember it for
    /// orphan cleanup. A dead market (no orderbook) writes the shares off.
    pub async fn place_recovery_sell(&mut self, token_id: &str, size: f64) {
        match self.try_place_recovery_sell(token_id, size).await {
            Ok(()) => {}
            Err(ClobError::DeadMarket) => {
                warn!(
                    "  Market dead for {} (no orderbook) — writing off {size} shares as unrecoverable",
                    short(token_id)
                );
                // Nothing to track for a dead market.
            }
            Err(e) => {
                warn!("  Failed to place recovery SELL for {}: {e}", short(token_id));
                self.recovered_token_ids.insert(token_id.to_string());
                self.recovery_info.insert(
                    token_id.to_string(),
                    RecoveryInfo {
                        size,
                        order_id: None,
                        sell_price: 0.0,
                    },
                );
            }
        }
    }

    async fn try_place_recovery_sell(&mut self, token_id: &str, size: f64) -> Result<(), ClobError> {
        let mid = self.client.get_midpoint(token_id).await?;
        let tick = self.client.get_tick_size(token_id).await?;

        self.client.update_balance_allowance(token_id).await?;

        let sell_price = pricing::clamp_price(pricing::round_price_down(mid, tick), tick);

        let book = self.client.get_order_book(token_id).await?;
        let min_size = book.min_order_size.unwrap_or(0.0);

        let args = OrderArgs {
            token_id: token_id.to_string(),
            price: sell_price,
            size,
            side: OrderSide::Sell,
        };
        let order_type = if min_size > 0.0 && size < min_size {
            info!("  Using FOK market SELL ({size} < min_size {min_size})");
            OrderType::Fok
        } else {
            OrderType::Gtc
        };
        let order_id = self.client.post_order(&args, order_type).await?;

        self.recovered_order_ids.insert(order_id.clone());
        self.recovered_token_ids.insert(token_id.to_string());
        self.recovery_info.insert(
            token_id.to_string(),
            RecoveryInfo {
                size,
                order_id: Some(order_id),
                sell_price,
            },
        );
        info!("  Recovery SELL @{sell_price:.4} x{size} for {}", short(token_id));
        Ok(())
    }

    /// Adopt every recovery position into the ledger immediately, so held
    /// inventory gets stream tracking and SELL repricing without waiting
    /// for the scanner to surface the market. Metadata comes from the
    /// scanner's bulk sampling fetch, falling back to a Gamma lookup
    /// keyed by token.
    pub async fn force_adopt_recovery_positions(&mut self, scanner: &MarketScanner) {
        if self.recovery_info.is_empty() {
            return;
        }
        info!(
            "Force-adopting {} recovery position(s) into the ledger...",
            self.recovery_info.len()
        );

        // token_id -> sampling market, one paginated fetch.
        let mut sampling_by_token: HashMap<String, clob_rs::markets::models::SamplingMarket> =
            HashMap::new();
        match scanner.fetch_all_sampling_markets().await {
            Ok(markets) => {
                for market in markets {
                    for token in &market.tokens {
                        if !token.token_id.is_empty() {
                            sampling_by_token.insert(token.token_id.clone(), market.clone());
                        }
                    }
                }
            }
            Err(e) => warn!("Failed to fetch sampling markets for adoption: {e}"),
        }

        let token_ids: Vec<String> = self.recovery_info.keys().cloned().collect();
        for token_id in token_ids {
            let Some(info) = self.recovery_info.get(&token_id).cloned() else {
                continue;
            };

            let mut condition_id = String::new();
            let mut question = String::new();
            let mut token_yes = String::new();
            let mut token_no = String::new();
            let mut max_spread = DEFAULT_MAX_SPREAD;
            let mut min_size = DEFAULT_MIN_SIZE;

            if let Some(sampling) = sampling_by_token.get(&token_id) {
                condition_id = sampling.condition_id.clone();
                question = truncate(&sampling.question, 50).to_string();
                if let Some(rewards) = &sampling.rewards {
                    if let Some(spread) = rewards.max_spread_price() {
                        max_spread = spread;
                    }
                    if let Some(size) = rewards.min_size {
                        min_size = size;
                    }
                }
                if let Some((yes, no)) = sampling.yes_no_tokens() {
                    token_yes = yes.token_id.clone();
                    token_no = no.token_id.clone();
                }
            }

            if condition_id.is_empty() || token_yes.is_empty() || token_no.is_empty() {
                // Fallback: Gamma metadata keyed by token id.
                match self.client.get_gamma_markets_by_token(&token_id).await {
                    Ok(markets) => {
                        if let Some(market) = markets.first() {
                            condition_id = market.condition_id.clone();
                            question = truncate(&market.question, 50).to_string();
                            if market.clob_token_ids.len() >= 2 {
                                token_yes = market.clob_token_ids[0].clone();
                                token_no = market.clob_token_ids[1].clone();
                            }
                        }
                    }
                    Err(e) => warn!("Gamma lookup failed for {}: {e}", short(&token_id)),
                }
            }

            if condition_id.is_empty() || token_yes.is_empty() || token_no.is_empty() {
                warn!("Cannot adopt {} — missing market data", short(&token_id));
                continue;
            }

            if self.positions.contains_key(&condition_id) {
                self.forget_recovery(&token_id, &token_yes, &token_no, &info);
                continue;
            }

            let tick_size = self
                .client
                .get_tick_size(&token_yes)
                .await
                .unwrap_or(DEFAULT_TICK_SIZE);
            let mid = match self.current_midpoint(&token_yes).await {
                Some(m) => m,
                None if info.sell_price > 0.0 => info.sell_price,
                None => 0.5,
            };

            let market_side = if token_id == token_yes { Side::Yes } else { Side::No };
            let mut position = MarketPosition::new(
                condition_id.clone(),
                token_yes.clone(),
                token_no.clone(),
                max_spread,
                min_size,
                tick_size,
                mid,
            );
            {
                let state = position.side_mut(market_side);
                state.inventory = info.size;
                state.entry_price = info.sell_price;
            }
            if let (Some(order_id), true) = (info.order_id.clone(), info.sell_price > 0.0) {
                position.orders.push(ActiveOrder {
                    order_id,
                    token_id: token_id.clone(),
                    side: OrderSide::Sell,
                    price: info.sell_price,
                    size: info.size,
                    condition_id: condition_id.clone(),
                    placed_at: std::time::Instant::now(),
                    midpoint_at_placement: mid,
                });
            }
            self.positions.insert(condition_id.clone(), position);
            self.forget_recovery(&token_id, &token_yes, &token_no, &info);

            info!(
                "Force-adopted recovery {}: {question} | inv={} SELL@{:.4} mid={mid:.4} spread={max_spread:.4}",
                market_side.as_str(),
                info.size,
                info.sell_price
            );
        }

        let remaining = self.recovery_info.len();
        if remaining > 0 {
            warn!("{remaining} recovery position(s) could not be adopted (will retry via scanner)");
        }
    }

    /// Convert one recovery SELL into a fully tracked position when the
    /// scanner surfaces its market. Covers recovery entries that the
    /// startup force-adoption could not resolve.
    pub async fn adopt_recovery_position(&mut self, opp: &crate::scanner::MarketOpportunity) -> bool {
        for (market_side, token_id) in [
            (Side::Yes, opp.token_id_yes.clone()),
            (Side::No, opp.token_id_no.clone()),
        ] {
            let Some(info) = self.recovery_info.get(&token_id).cloned() else {
                continue;
            };

            let mid = match self.current_midpoint(&opp.token_id_yes).await {
                Some(m) => m,
                None => opp.midpoint,
            };

            let mut position = MarketPosition::new(
                opp.condition_id.clone(),
                opp.token_id_yes.clone(),
                opp.token_id_no.clone(),
                opp.max_spread,
                opp.min_size,
                opp.tick_size,
                mid,
            );
            {
                let state = position.side_mut(market_side);
                state.inventory = info.size;
                state.entry_price = info.sell_price; // approximate
            }
            if let (Some(order_id), true) = (info.order_id.clone(), info.sell_price > 0.0) {
                position.orders.push(ActiveOrder {
                    order_id,
                    token_id: token_id.clone(),
                    side: OrderSide::Sell,
                    price: info.sell_price,
                    size: info.size,
                    condition_id: opp.condition_id.clone(),
                    placed_at: std::time::Instant::now(),
                    midpoint_at_placement: mid,
                });
            }
            self.positions.insert(opp.condition_id.clone(), position);
            self.forget_recovery(&token_id, &opp.token_id_yes, &opp.token_id_no, &info);

            info!(
                "Adopted recovery {} position for {} | inv={} SELL@{:.4} mid={mid:.4} | drift detection now active",
                market_side.as_str(),
                truncate(&opp.question, 50),
                info.size,
                info.sell_price
            );
            // Only one token per market can hold recovery shares.
            return true;
        }
        false
    }

    fn forget_recovery(&mut self, token_id: &str, token_yes: &str, token_no: &str, info: &RecoveryInfo) {
        self.recovered_token_ids.remove(token_yes);
        self.recovered_token_ids.remove(token_no);
        if let Some(order_id) = &info.order_id {
            self.recovered_order_ids.remove(order_id);
        }
        self.recovery_info.remove(token_id);
    }

    // --- Reconciliation (two-way) ---

    /// Converge the ledger toward on-chain reality.
    ///
    /// Direction 1 clears phantom inventory (tracked but not on chain)
    /// and corrects mismatches over half a share. Direction 2 adopts
    /// untracked shares: inventory is set from the chain and a SELL is
    /// placed where none exists; completely unknown tokens get a recovery
    /// SELL. Recovered and phantom tokens are skipped so startup SELLs
    /// aren't doubled and phantoms aren't resurrected.
    pub async fn reconcile_inventory(&mut self) {
        let exchange_positions = match self.client.get_my_positions().await {
            Ok(p) => p,
            Err(e) => {
                warn!("Reconciliation: failed to fetch positions: {e}");
                return;
            }
        };
        let mut actual_shares: HashMap<String, f64> = HashMap::new();
        for pos in &exchange_positions {
            if !pos.asset.is_empty() && pos.size > 0.0 {
                actual_shares.insert(pos.asset.clone(), pos.size);
            }
        }

        // Direction 1: tracked inventory vs the chain.
        for cid in self.active_condition_ids() {
            for side in [Side::Yes, Side::No] {
                let Some(position) = self.positions.get(&cid) else {
                    break;
                };
                let token_id = position.token_id(side).to_string();
                let tracked = position.side(side).inventory;
                let actual = *actual_shares.get(&token_id).unwrap_or(&0.0);

                if tracked > 0.0 && actual == 0.0 {
                    warn!(
                        "Reconciliation: {} {} inventory tracked={tracked} but exchange=0 — resetting",
                        short(&cid),
                        side.as_str()
                    );
                    if let Some(pos) = self.positions.get_mut(&cid) {
                        pos.side_mut(side).inventory = 0.0;
                    }
                    self.sell_fail_counts.remove(&(cid.clone(), token_id));
                } else if tracked > 0.0 && actual > 0.0 && (tracked - actual).abs() > 0.5 {
                    // A partial fill slipped past us (reprice race).
                    warn!(
                        "Reconciliation: {} {} inventory tracked={tracked:.2} but exchange={actual:.2} — correcting",
                        short(&cid),
                        side.as_str()
                    );
                    if let Some(pos) = self.positions.get_mut(&cid) {
                        pos.side_mut(side).inventory = actual;
                    }
                    self.sell_fail_counts.remove(&(cid.clone(), token_id));
                }
            }
        }

        // Direction 2: shares on the chain the ledger doesn't cover.
        for (token_id, actual_size) in actual_shares {
            if self.recovered_token_ids.contains(&token_id)
                || self.phantom_tokens.contains(&token_id)
            {
                continue;
            }

            let owner = self.positions.iter().find_map(|(cid, pos)| {
                pos.side_for_token(&token_id).map(|side| (cid.clone(), side))
            });

            match owner {
                Some((cid, side)) => {
                    let Some(position) = self.positions.get(&cid) else {
                        continue;
                    };
                    let tracked_inv = position.side(side).inventory;
                    let has_sell = position.has_sell_for(&token_id);
                    if has_sell {
                        continue;
                    }
                    let sell_size = if tracked_inv == 0.0 {
                        warn!(
                            "Reconciliation: {} {} has {actual_size} shares on exchange but inv=0 and no SELL — placing SELL",
                            short(&cid),
                            side.as_str()
                        );
                        if let Some(pos) = self.positions.get_mut(&cid) {
                            pos.side_mut(side).inventory = actual_size;
                        }
                        actual_size
                    } else {
                        warn!(
                            "Reconciliation: {} {} inv={tracked_inv} but no SELL pending — placing SELL",
                            short(&cid),
                            side.as_str()
                        );
                        tracked_inv
                    };

                    let Some(snapshot) = self.positions.get(&cid).cloned() else {
                        continue;
                    };
                    let mid = match self.current_midpoint(&snapshot.token_id_yes).await {
                        Some(m) => m,
                        None => snapshot.last_midpoint,
                    };
                    let price = pricing::sell_price(mid, snapshot.tick_size, side == Side::Yes);
                    let order = self
                        .place_order(
                            &token_id,
                            price,
                            sell_size,
                            OrderSide::Sell,
                            &cid,
                            mid,
                            snapshot.min_size,
                        )
                        .await;
                    if let Some(order) = order {
                        self.track_order(&cid, order).await;
                    }
                }
                None => {
                    // A fill landed right as the market was being exited.
                    warn!(
                        "Reconciliation: {} has {actual_size} shares on exchange but no tracked position — recovery SELL",
                        short(&token_id)
                    );
                    self.place_recovery_sell(&token_id, actual_size).await;
                }
            }
        }
    }

    /// Hourly sweep: force-sell ANY on-chain balance with no SELL order
    /// anywhere. More aggressive than reconciliation — it ignores the
    /// recovered and phantom sets — but still checks recovery SELL order
    /// ids so a pending recovery SELL isn't doubled.
    pub async fn force_sell_stale_positions(&mut self) {
        let positions = match self.client.get_my_positions().await {
            Ok(p) => p,
            Err(e) => {
                warn!("Force-sell sweep: failed to fetch positions: {e}");
                return;
            }
        };

        let mut sold = 0usize;
        for pos in positions {
            if pos.asset.is_empty() || pos.size <= 0.0 {
                continue;
            }
            let has_tracked_sell = self
                .positions
                .values()
                .filter(|p| p.side_for_token(&pos.asset).is_some())
                .any(|p| p.has_sell_for(&pos.asset));
            let has_recovery_sell = self
                .recovery_info
                .get(&pos.asset)
                .map(|r| r.order_id.is_some())
                .unwrap_or(false);
            if has_tracked_sell || has_recovery_sell {
                continue;
            }
            info!(
                "Force-sell sweep: {} has {} shares with no SELL — selling",
                short(&pos.asset),
                pos.size
            );
            self.place_recovery_sell(&pos.asset, pos.size).await;
            sold += 1;
        }
        if sold > 0 {
            info!("Force-sell sweep: placed {sold} recovery SELLs");
        } else {
            info!("Force-sell sweep: no stale positions found");
        }
    }

    // --- Orphan cleanup ---

    /// Cancel exchange orders the bot doesn't know it owns. Cancel can
    /// report success while the order lingers; this catches the leftovers
    /// over successive rescans.
    pub async fn cleanup_orphaned_orders(&mut self) {
        let open_orders = match self.client.get_orders().await {
            Ok(orders) => orders,
            Err(e) => {
                warn!("Orphan cleanup failed: {e}");
                return;
            }
        };

        let mut known_ids: std::collections::HashSet<String> = self.recovered_order_ids.clone();
        for position in self.positions.values() {
            for order in &position.orders {
                known_ids.insert(order.order_id.clone());
            }
        }

        let orphan_ids: Vec<String> = open_orders
            .into_iter()
            .map(|o| o.id)
            .filter(|id| !known_ids.contains(id))
            .collect();
        if orphan_ids.is_empty() {
            return;
        }
        warn!(
            "Found {} orphaned orders (known: {}) — cancelling",
            orphan_ids.len(),
            known_ids.len()
        );
        let client = self.client.clone();
        for order_id in orphan_ids {
            // Best effort; the next cycle retries.
            let _ = client.cancel(&order_id).await;
        }
    }
}
