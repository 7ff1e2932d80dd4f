//! The main loop.
//!
//! Single owner of the order manager and price monitor: every ledger
//! mutation happens here. Streams feed two bounded queues drained each
//! iteration, with REST polling as the fallback when either stream is
//! down. A rescan cycle (reconcile, orphan cleanup, volatility check,
//! scan, exit stale, enter new) runs on its own cadence.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio::sync::Notify;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use clob_rs::errors::ClobError;

use crate::config::Config;
use crate::exchange::ExchangeApi;
use crate::manager::{short, OrderManager};
use crate::monitor::{PriceCheckOutcome, PriceMonitor};
use crate::pricing;
use crate::scanner::{MarketOpportunity, MarketScanner};
use crate::types::{PriceEvent, TradeEvent, UserEvent, WsCommand};
use crate::ws::StreamHealth;

const PRICE_DRAIN_MAX: usize = 500;
const USER_DRAIN_MAX: usize = 100;

/// Cooperative shutdown trigger, flipped by the signal listener.
#[derive(Debug, Default)]
pub struct ShutdownFlag {
    flag: AtomicBool,
    notify: Notify,
}

impl ShutdownFlag {
    pub fn trigger(&self) {
        self.flag.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    pub async fn wait(&self) {
        self.notify.notified().await;
    }
}

pub struct Supervisor {
    cfg: Config,
    client: Arc<dyn ExchangeApi>,
    pub manager: OrderManager,
    monitor: PriceMonitor,
    scanner: MarketScanner,
    price_rx: mpsc::Receiver<PriceEvent>,
    user_rx: mpsc::Receiver<UserEvent>,
    market_ctl_tx: mpsc::Sender<WsCommand>,
    user_ctl_tx: mpsc::Sender<WsCommand>,
    health: Arc<StreamHealth>,
    shutdown: Arc<ShutdownFlag>,
    start_time: Instant,
    last_scan: Option<Instant>,
    last_status: Option<Instant>,
    last_rest_sync: Option<Instant>,
    last_force_sell: Option<Instant>,
    last_size_multiplier: f64,
}

impl Supervisor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cfg: Config,
        client: Arc<dyn ExchangeApi>,
        manager: OrderManager,
        monitor: PriceMonitor,
        scanner: MarketScanner,
        price_rx: mpsc::Receiver<PriceEvent>,
        user_rx: mpsc::Receiver<UserEvent>,
        market_ctl_tx: mpsc::Sender<WsCommand>,
        user_ctl_tx: mpsc::Sender<WsCommand>,
        health: Arc<StreamHealth>,
        shutdown: Arc<ShutdownFlag>,
    ) -> Self {
        let last_size_multiplier = pricing::size_multiplier(&cfg);
        Self {
            cfg,
            client,
            manager,
            monitor,
            scanner,
            price_rx,
            user_rx,
            market_ctl_tx,
            user_ctl_tx,
            health,
            shutdown,
            start_time: Instant::now(),
            last_scan: None,
            last_status: None,
            last_rest_sync: None,
            last_force_sell: None,
            last_size_multiplier,
        }
    }

    /// Startup recovery, then the event loop until shutdown or too many
    /// consecutive errors.
    pub async fn run(&mut self) -> Result<()> {
        // Clear stale orders from a previous session before anything else.
        self.cancel_all_with_retry().await;
        match self.client.get_collateral_balance().await {
            Ok(usdc) => info!("USDC balance: ${usdc:.2}"),
            Err(e) => debug!("balance fetch failed at startup: {e}"),
        }

        // Inherited shares get SELLs and full ledger adoption so stream
        // repricing covers them from the first iteration.
        self.manager.recover_existing_positions().await;
        self.manager
            .force_adopt_recovery_positions(&self.scanner)
            .await;
        self.sync_ws_subscriptions().await;

        info!(
            "Bot started. Size multiplier: {:.1}x.",
            self.last_size_multiplier
        );

        let mut consecutive_errors = 0u32;
        while !self.shutdown.is_triggered() {
            let ws_active = match self.tick().await {
                Ok(ws_active) => {
                    consecutive_errors = 0;
                    ws_active
                }
                Err(e) => {
                    consecutive_errors += 1;
                    error!(
                        "Error in main loop ({consecutive_errors}/{}): {e:#}",
                        self.cfg.max_consecutive_errors
                    );
                    if consecutive_errors >= self.cfg.max_consecutive_errors {
                        error!(
                            "FATAL: {consecutive_errors} consecutive errors — self-terminating for watchdog restart"
                        );
                        self.shutdown_procedure().await;
                        anyhow::bail!("too many consecutive errors");
                    }
                    false
                }
            };

            // 0.5s while streams carry the load, monitor pace otherwise.
            let pause = if ws_active {
                Duration::from_millis(500)
            } else {
                Duration::from_secs(self.cfg.monitor_interval_s)
            };
            tokio::select! {
                _ = sleep(pause) => {}
                _ = self.shutdown.wait() => {}
            }
        }

        self.shutdown_procedure().await;
        Ok(())
    }

    /// One loop iteration. Returns whether the streams carried it.
    async fn tick(&mut self) -> Result<bool> {
        // === Phase 0: time-based sizing transition ===
        let current_multiplier = pricing::size_multiplier(&self.cfg);
        if current_multiplier != self.last_size_multiplier {
            info!(
                "Size multiplier changed: {:.1}x -> {current_multiplier:.1}x — replacing all BUY orders",
                self.last_size_multiplier
            );
            for cid in self.manager.active_condition_ids() {
                // SELL-only (inventory) positions keep their quotes.
                let Some(position) = self.manager.position(&cid) else {
                    continue;
                };
                if !position.has_any_buy() {
                    continue;
                }
                let midpoint = self
                    .monitor
                    .last_midpoints
                    .get(&cid)
                    .copied()
                    .unwrap_or(position.last_midpoint);
                self.manager.replace_orders(&cid, midpoint).await;
            }
            self.last_size_multiplier = current_multiplier;
        }

        // === Phase 1: periodic full rescan ===
        let scan_due = self
            .last_scan
            .map(|t| t.elapsed() >= Duration::from_secs(self.cfg.rescan_interval_s))
            .unwrap_or(true);
        if scan_due {
            self.manager.clear_blocked_flags();
            self.manager.reconcile_inventory().await;
            self.manager.cleanup_orphaned_orders().await;
            self.manager.check_active_volatility().await;

            let max_markets = self.compute_max_markets().await?;
            let force_tokens: HashSet<String> =
                self.manager.recovery_info.keys().cloned().collect();
            let force = (!force_tokens.is_empty()).then_some(&force_tokens);
            info!("Scanning markets...");
            let opportunities = self.scanner.scan_and_rank(max_markets, force).await;

            let best_cids: HashSet<String> = opportunities
                .iter()
                .map(|o| o.condition_id.clone())
                .collect();
            self.manager.exit_stale_markets(&best_cids).await;
            self.place_initial_orders(&opportunities).await;
            self.last_scan = Some(Instant::now());

            self.sync_ws_subscriptions().await;

            let sweep_due = self
                .last_force_sell
                .map(|t| t.elapsed() >= Duration::from_secs(self.cfg.force_sell_sweep_interval_s))
                .unwrap_or(true);
            if sweep_due {
                self.manager.force_sell_stale_positions().await;
                self.last_force_sell = Some(Instant::now());
            }
        }

        // === Phase 2: event processing (streams primary, REST fallback) ===
        let ws_active = self.cfg.ws_enabled && self.health.all_connected();
        if ws_active {
            let trades = self.drain_user_events();
            if !trades.is_empty() {
                self.manager.handle_stream_fills(trades).await;
            }

            let price_events = self.drain_price_events();
            if !price_events.is_empty() {
                let outcome = self
                    .monitor
                    .update_midpoints_from_stream(self.manager.positions(), price_events);
                self.dispatch_price_outcome(outcome).await;
            }

            // REST sync stays on as a longer-interval safety net.
            let rest_due = self
                .last_rest_sync
                .map(|t| t.elapsed() >= Duration::from_secs(self.cfg.rest_fallback_interval_s))
                .unwrap_or(true);
            if rest_due {
                let fills = self.manager.sync_with_exchange().await;
                if !fills.is_empty() {
                    self.manager.handle_filled_orders(fills).await;
                }
                self.last_rest_sync = Some(Instant::now());
            }
        } else {
            let fills = self.manager.sync_with_exchange().await;
            if !fills.is_empty() {
                self.manager.handle_filled_orders(fills).await;
            }
            let outcome = self
                .monitor
                .check_all_positions(self.manager.positions())
                .await;
            self.dispatch_price_outcome(outcome).await;
        }

        // === Phase 3: cooldown re-entries and SELL retries ===
        self.manager.process_cooldown_reentries().await;
        self.manager.retry_pending_sells().await;

        // === Phase 4: status heartbeat ===
        let status_due = self
            .last_status
            .map(|t| t.elapsed() >= Duration::from_secs(self.cfg.status_interval_s))
            .unwrap_or(true);
        if status_due {
            self.log_status(ws_active);
            self.last_status = Some(Instant::now());
        }

        Ok(ws_active)
    }

    fn drain_price_events(&mut self) -> Vec<PriceEvent> {
        let mut events = Vec::new();
        while events.len() < PRICE_DRAIN_MAX {
            match self.price_rx.try_recv() {
                Ok(event) => events.push(event),
                Err(_) => break,
            }
        }
        events
    }

    /// Drain the user queue, keeping only MATCHED trades. Order lifecycle
    /// events are logged and dropped; fills carry all the state we need.
    fn drain_user_events(&mut self) -> Vec<TradeEvent> {
        let mut trades = Vec::new();
        let mut drained = 0usize;
        while drained < USER_DRAIN_MAX {
            match self.user_rx.try_recv() {
                Ok(UserEvent::Trade(trade)) => {
                    drained += 1;
                    if trade.status.eq_ignore_ascii_case("MATCHED") {
                        trades.push(trade);
                    }
                }
                Ok(UserEvent::Order(order)) => {
                    drained += 1;
                    debug!(
                        "order event {} {} size_matched={}",
                        order.event_kind,
                        short(&order.order_id),
                        order.size_matched
                    );
                }
                Err(_) => break,
            }
        }
        trades
    }

    async fn dispatch_price_outcome(&mut self, outcome: PriceCheckOutcome) {
        if !outcome.drifted.is_empty() {
            self.adjust_drifted_positions(&outcome.drifted).await;
        }
        for cid in outcome.stop_losses {
            self.manager.force_exit_market(&cid).await;
        }
        for cid in outcome.sell_reprices {
            if let Some(midpoint) = self.monitor.last_midpoints.get(&cid).copied() {
                self.manager.reprice_sell_if_stale(&cid, midpoint).await;
            }
        }
    }

    /// Requote drifted markets at their new midpoints. Extreme midpoints
    /// force-exit instead; SELL-only positions (cooldown) get their SELLs
    /// repriced without any BUY placement.
    async fn adjust_drifted_positions(&mut self, drifted: &[String]) {
        for cid in drifted {
            let Some(midpoint) = self.monitor.last_midpoints.get(cid).copied() else {
                continue;
            };
            if midpoint < self.cfg.min_midpoint || midpoint > self.cfg.max_midpoint {
                info!("Exiting market {} (extreme midpoint {midpoint:.4})", short(cid));
                self.manager.force_exit_market(cid).await;
                continue;
            }
            let Some(position) = self.manager.position(cid) else {
                continue;
            };
            if !position.has_any_buy() && !position.orders.is_empty() {
                if self.manager.reprice_sell_orders(cid, midpoint).await {
                    info!("Repriced SELL orders for {} at new midpoint {midpoint:.4}", short(cid));
                } else {
                    warn!("Failed to reprice SELL orders for {}", short(cid));
                }
                continue;
            }
            if self.manager.replace_orders(cid, midpoint).await {
                info!("Adjusted orders for {} at new midpoint {midpoint:.4}", short(cid));
            } else {
                warn!("Failed to adjust orders for {}", short(cid));
            }
        }
    }

    /// Enter newly scanned markets, skipping actives, blacklisted markets
    /// and anything inside the startup cooldown or global pause. Recovery
    /// markets are adopted instead of entered.
    async fn place_initial_orders(&mut self, opportunities: &[MarketOpportunity]) {
        if self.start_time.elapsed() < Duration::from_secs(self.cfg.startup_cooldown_s) {
            let remaining =
                self.cfg.startup_cooldown_s - self.start_time.elapsed().as_secs();
            info!("Startup cooldown: {remaining}s remaining before placing new orders");
            return;
        }
        if self.manager.is_global_paused() {
            info!(
                "Global fill pause: {}s remaining before placing new orders",
                self.manager.global_pause_remaining_s()
            );
            return;
        }

        let active: HashSet<String> = self.manager.active_condition_ids().into_iter().collect();
        for opp in opportunities {
            if active.contains(&opp.condition_id) {
                continue;
            }
            if self.manager.is_blacklisted(&opp.condition_id) {
                continue;
            }
            if self.manager.recovered_token_ids.contains(&opp.token_id_yes)
                || self.manager.recovered_token_ids.contains(&opp.token_id_no)
            {
                self.manager.adopt_recovery_position(opp).await;
                continue;
            }

            // Keep total per-market entry cost (both sides sum to ~1.0 of
            // price, so cost ≈ size) inside the cap.
            let mut capped = opp.clone();
            capped.min_size = capped.min_size.min(self.cfg.max_entry_cost);
            self.manager.place_two_sided_orders(&capped).await;
        }
    }

    /// Free balance -> how many markets we can afford, bounded by the
    /// time-of-day caps.
    async fn compute_max_markets(&mut self) -> Result<usize> {
        let free_balance = self
            .client
            .get_collateral_balance()
            .await
            .context("balance fetch for market budget")?;
        let active_count = self.manager.positions().len();

        let usable = free_balance * (1.0 - self.cfg.balance_reserve_fraction);
        let new_affordable = (usable / self.cfg.cost_per_market_estimate).floor() as usize;
        let mut total = (active_count + new_affordable).max(1);
        if self.cfg.max_markets_cap > 0 {
            total = total.min(self.cfg.max_markets_cap);
        }

        let peak = pricing::is_peak_hours(&self.cfg);
        let cap = if peak {
            self.cfg.peak_max_markets
        } else {
            self.cfg.off_peak_max_markets
        };
        if cap > 0 {
            total = total.min(cap);
        }
        info!(
            "Balance: ${free_balance:.2} | active: {active_count} | can afford {new_affordable} more | max markets: {total}{}",
            if peak { " (PEAK)" } else { "" }
        );
        Ok(total)
    }

    /// Keep the stream workers subscribed to every tracked id.
    async fn sync_ws_subscriptions(&self) {
        if !self.cfg.ws_enabled {
            return;
        }
        let (token_ids, condition_ids) = self.manager.all_subscribed_ids();
        if !token_ids.is_empty() {
            let _ = self
                .market_ctl_tx
                .send(WsCommand::Subscribe(token_ids.into_iter().collect()))
                .await;
        }
        if !condition_ids.is_empty() {
            let _ = self
                .user_ctl_tx
                .send(WsCommand::Subscribe(condition_ids.into_iter().collect()))
                .await;
        }
    }

    /// Cancel-all until the listing endpoint reports clean, bounded.
    async fn cancel_all_with_retry(&self) {
        for attempt in 1..=self.cfg.cancel_all_attempts {
            if let Err(e) = self.client.cancel_all().await {
                warn!("cancel_all attempt {attempt} failed: {e}");
                if matches!(e, ClobError::CredentialMissing) {
                    error!("API credentials not set — cannot cancel orders");
                    return;
                }
            }
            sleep(Duration::from_millis(self.cfg.cancel_all_wait_ms)).await;

            match self.client.get_orders().await {
                Ok(orders) if orders.is_empty() => {
                    info!("Exchange clean after {attempt} cancel_all call(s)");
                    return;
                }
                Ok(orders) => {
                    warn!("Still {} orders on exchange after attempt {attempt}", orders.len())
                }
                Err(e) => {
                    warn!("Failed to check orders after cancel: {e}");
                    if matches!(e, ClobError::CredentialMissing) {
                        error!("API credentials not set — cannot verify orders");
                        return;
                    }
                }
            }
        }
        error!(
            "Failed to cancel all orders after {} attempts",
            self.cfg.cancel_all_attempts
        );
    }

    fn log_status(&self, ws_active: bool) {
        let active = self.manager.positions().len();
        let total_orders: usize = self
            .manager
            .positions()
            .values()
            .map(|p| p.orders.len())
            .sum();
        let inv_count = self
            .manager
            .positions()
            .values()
            .filter(|p| p.has_inventory())
            .count();
        let market = if self.health.market_connected.load(Ordering::Acquire) { "OK" } else { "DOWN" };
        let user = if self.health.user_connected.load(Ordering::Acquire) { "OK" } else { "DOWN" };
        let pause = if self.manager.is_global_paused() {
            format!(" | PAUSED ({}s)", self.manager.global_pause_remaining_s())
        } else {
            String::new()
        };
        let next_scan = self
            .last_scan
            .map(|t| {
                Duration::from_secs(self.cfg.rescan_interval_s)
                    .saturating_sub(t.elapsed())
                    .as_secs()
            })
            .unwrap_or(0);
        info!(
            "Active: {active} markets, {total_orders} orders | {inv_count} with inventory | WS: mkt={market} usr={user} (driving={ws_active}){pause} | size={:.1}x | next scan in {next_scan}s",
            self.last_size_multiplier
        );
    }

    /// Graceful shutdown: best-effort cancel-all, then clear the ledger.
    async fn shutdown_procedure(&mut self) {
        info!("Shutting down...");
        self.cancel_all_with_retry().await;
        self.manager.clear_ledger();
        info!("Shutdown complete");
    }
}
