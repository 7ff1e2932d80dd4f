//! Stream workers.
//!
//! Two long-lived tasks, one per CLOB subscription channel. Each owns its
//! socket, reconnects with capped exponential backoff, resubscribes its
//! id set after a reconnect, heartbeats with a text-level "PING", and
//! pushes decoded events into a bounded queue. Subscription growth
//! arrives over a control channel; the full set is kept locally so a
//! reconnect can restore it.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::time::{interval, sleep, Duration};
use tracing::{debug, info, warn};

use clob_rs::websocket::models::{ClobSocketMessage, UserEventMsg};
use clob_rs::{ApiCreds, ClobWebsocketClient, WsChannel};

use crate::config::Config;
use crate::types::{OrderEvent, PriceEvent, TopOfBook, TradeEvent, UserEvent, WsCommand};

/// Connection state the supervisor reads to pick its loop pace and
/// REST-fallback behavior.
#[derive(Debug, Default)]
pub struct StreamHealth {
    pub market_connected: AtomicBool,
    pub user_connected: AtomicBool,
}

impl StreamHealth {
    pub fn all_connected(&self) -> bool {
        self.market_connected.load(Ordering::Acquire) && self.user_connected.load(Ordering::Acquire)
    }
}

/// Market channel worker: price_change events keyed by token id.
///
/// Every usable quote also lands in the shared book-top cache so the
/// order manager sees the freshest best ask even between queue drains.
pub async fn run_market_stream(
    cfg: Config,
    health: Arc<StreamHealth>,
    book_tops: Arc<DashMap<String, TopOfBook>>,
    event_tx: mpsc::Sender<PriceEvent>,
    mut ctl_rx: mpsc::Receiver<WsCommand>,
) {
    let ws = ClobWebsocketClient::new(WsChannel::Market, None);
    let mut subscribed: HashSet<String> = HashSet::new();
    let mut reconnect_delay = 1.0f64;

    loop {
        // Pick up subscriptions requested while we were down.
        while let Ok(cmd) = ctl_rx.try_recv() {
            apply_ctl_local(&mut subscribed, &cmd);
        }

        if let Err(e) = ws.connect().await {
            warn!("[market] ws connect failed: {e}");
            reconnect_delay = backoff_sleep(&cfg, reconnect_delay).await;
            continue;
        }
        let ids: Vec<String> = subscribed.iter().cloned().collect();
        if !ids.is_empty() {
            if let Err(e) = ws.subscribe_assets(&ids).await {
                warn!("[market] subscribe failed: {e}");
                reconnect_delay = backoff_sleep(&cfg, reconnect_delay).await;
                continue;
            }
        }
        info!("[market] connected, {} assets subscribed", subscribed.len());
        health.market_connected.store(true, Ordering::Release);
        reconnect_delay = 1.0;

        let mut ping_timer = interval(Duration::from_secs(cfg.ws_ping_interval_s));
        ping_timer.tick().await; // first tick fires immediately

        loop {
            tokio::select! {
                msg = ws.next_message() => {
                    let msg = match msg {
                        Ok(m) => m,
                        Err(e) => {
                            warn!("[market] ws read error: {e} (reconnect)");
                            break;
                        }
                    };
                    match msg {
                        ClobSocketMessage::PriceChanges(changes) => {
                            for change in changes {
                                book_tops.insert(change.asset_id.clone(), TopOfBook {
                                    best_bid: change.best_bid,
                                    best_ask: change.best_ask,
                                });
                                let event = PriceEvent {
                                    asset_id: change.asset_id,
                                    best_bid: change.best_bid,
                                    best_ask: change.best_ask,
                                };
                                // Bounded queue: drop on overflow, the
                                // REST fallback converges anyway.
                                let _ = event_tx.try_send(event);
                            }
                        }
                        ClobSocketMessage::Close(frame) => {
                            info!("[market] ws closed: {frame:?}");
                            break;
                        }
                        ClobSocketMessage::Pong
                        | ClobSocketMessage::Ping
                        | ClobSocketMessage::UserEvents(_) => {}
                        ClobSocketMessage::Other(raw) => debug!("[market] unhandled: {raw}"),
                    }
                }

                cmd = ctl_rx.recv() => {
                    let Some(cmd) = cmd else { return; };
                    let fresh = fresh_ids(&mut subscribed, &cmd);
                    if !fresh.is_empty() {
                        if let Err(e) = ws.subscribe_assets(&fresh).await {
                            warn!("[market] subscribe update failed: {e}");
                            break;
                        }
                    }
                }

                _ = ping_timer.tick() => {
                    if let Err(e) = ws.send_ping().await {
                        warn!("[market] heartbeat failed: {e} (reconnect)");
                        break;
                    }
                }
            }
        }

        health.market_connected.store(false, Ordering::Release);
        reconnect_delay = backoff_sleep(&cfg, reconnect_delay).await;
    }
}

/// User channel worker: authenticated trade/order events keyed by
/// condition id.
pub async fn run_user_stream(
    cfg: Config,
    creds: ApiCreds,
    health: Arc<StreamHealth>,
    event_tx: mpsc::Sender<UserEvent>,
    mut ctl_rx: mpsc::Receiver<WsCommand>,
) {
    let ws = ClobWebsocketClient::new(WsChannel::User, Some(creds));
    let mut subscribed: HashSet<String> = HashSet::new();
    let mut reconnect_delay = 1.0f64;

    loop {
        while let Ok(cmd) = ctl_rx.try_recv() {
            apply_ctl_local(&mut subscribed, &cmd);
        }

        if let Err(e) = ws.connect().await {
            warn!("[user] ws connect failed: {e}");
            reconnect_delay = backoff_sleep(&cfg, reconnect_delay).await;
            continue;
        }
        let ids: Vec<String> = subscribed.iter().cloned().collect();
        if !ids.is_empty() {
            if let Err(e) = ws.subscribe_markets(&ids).await {
                warn!("[user] subscribe failed: {e}");
                reconnect_delay = backoff_sleep(&cfg, reconnect_delay).await;
                continue;
            }
        }
        info!("[user] connected, {} markets subscribed", subscribed.len());
        health.user_connected.store(true, Ordering::Release);
        reconnect_delay = 1.0;

        let mut ping_timer = interval(Duration::from_secs(cfg.ws_ping_interval_s));
        ping_timer.tick().await;

        loop {
            tokio::select! {
                msg = ws.next_message() => {
                    let msg = match msg {
                        Ok(m) => m,
                        Err(e) => {
                            warn!("[user] ws read error: {e} (reconnect)");
                            break;
                        }
                    };
                    match msg {
                        ClobSocketMessage::UserEvents(events) => {
                            for event in events {
                                route_user_event(&event_tx, event);
                            }
                        }
                        ClobSocketMessage::Close(frame) => {
                            info!("[user] ws closed: {frame:?}");
                            break;
                        }
                        ClobSocketMessage::Pong
                        | ClobSocketMessage::Ping
                        | ClobSocketMessage::PriceChanges(_) => {}
                        ClobSocketMessage::Other(raw) => debug!("[user] unhandled: {raw}"),
                    }
                }

                cmd = ctl_rx.recv() => {
                    let Some(cmd) = cmd else { return; };
                    let fresh = fresh_ids(&mut subscribed, &cmd);
                    if !fresh.is_empty() {
                        if let Err(e) = ws.subscribe_markets(&fresh).await {
                            warn!("[user] subscribe update failed: {e}");
                            break;
                        }
                    }
                }

                _ = ping_timer.tick() => {
                    if let Err(e) = ws.send_ping().await {
                        warn!("[user] heartbeat failed: {e} (reconnect)");
                        break;
                    }
                }
            }
        }

        health.user_connected.store(false, Ordering::Release);
        reconnect_delay = backoff_sleep(&cfg, reconnect_delay).await;
    }
}

fn route_user_event(event_tx: &mpsc::Sender<UserEvent>, event: UserEventMsg) {
    match event {
        UserEventMsg::Trade(trade) => {
            // One event per maker order of ours that was hit. The trade's
            // own side is the taker's; consumers resolve ours from
            // tracking.
            let clob_rs::websocket::models::TradeMsg {
                status,
                side,
                asset_id: trade_asset,
                price: trade_price,
                maker_orders,
            } = trade;
            for maker_order in maker_orders {
                if maker_order.order_id.is_empty() || maker_order.matched_amount <= 0.0 {
                    continue;
                }
                let asset_id = if maker_order.asset_id.is_empty() {
                    trade_asset.clone()
                } else {
                    maker_order.asset_id
                };
                let price = if maker_order.price > 0.0 {
                    maker_order.price
                } else {
                    trade_price
                };
                let _ = event_tx.try_send(UserEvent::Trade(TradeEvent {
                    order_id: maker_order.order_id,
                    asset_id,
                    taker_side: side.clone(),
                    size_matched: maker_order.matched_amount,
                    price,
                    status: status.clone(),
                }));
            }
        }
        UserEventMsg::Order(order) => {
            let _ = event_tx.try_send(UserEvent::Order(OrderEvent {
                order_id: order.id,
                asset_id: order.asset_id,
                event_kind: order.event_kind,
                size_matched: order.size_matched,
            }));
        }
    }
}

fn apply_ctl_local(subscribed: &mut HashSet<String>, cmd: &WsCommand) {
    match cmd {
        WsCommand::Subscribe(ids) => {
            for id in ids {
                subscribed.insert(id.clone());
            }
        }
    }
}

/// Fold a command into the local set and return only the ids that still
/// need a subscribe message on the live connection.
fn fresh_ids(subscribed: &mut HashSet<String>, cmd: &WsCommand) -> Vec<String> {
    match cmd {
        WsCommand::Subscribe(ids) => ids
            .iter()
            .filter(|id| subscribed.insert((*id).clone()))
            .cloned()
            .collect(),
    }
}

async fn backoff_sleep(cfg: &Config, delay: f64) -> f64 {
    info!("reconnecting in {delay:.1}s...");
    sleep(Duration::from_secs_f64(delay)).await;
    (delay * 2.0).min(cfg.ws_max_reconnect_delay_s as f64)
}
