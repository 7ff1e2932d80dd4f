//! Midpoint watching and update classification.
//!
//! Every price update lands in one of three buckets: drift (requote),
//! stop-loss / extreme midpoint (force exit), or a sub-drift move on a
//! market holding inventory (aggressive SELL reprice). Stream events are
//! the primary source; REST polling covers stream outages.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, warn};

use crate::config::Config;
use crate::exchange::ExchangeApi;
use crate::pricing;
use crate::state::MarketPosition;
use crate::types::{PriceEvent, Side};

/// Classified midpoint movements for one pass.
#[derive(Debug, Default)]
pub struct PriceCheckOutcome {
    /// Markets needing a full requote at the new midpoint.
    pub drifted: Vec<String>,
    /// Markets needing force-exit (stop-loss or extreme midpoint).
    pub stop_losses: Vec<String>,
    /// Inventory markets whose SELL should chase the price immediately.
    pub sell_reprices: Vec<String>,
}

pub struct PriceMonitor {
    client: Arc<dyn ExchangeApi>,
    cfg: Config,
    /// condition_id -> last observed YES midpoint.
    pub last_midpoints: HashMap<String, f64>,
}

impl PriceMonitor {
    pub fn new(client: Arc<dyn ExchangeApi>, cfg: Config) -> Self {
        Self {
            client,
            cfg,
            last_midpoints: HashMap::new(),
        }
    }

    /// Fetch a midpoint, rejecting values outside (0, 1).
    pub async fn get_current_midpoint(&self, token_id: &str) -> Option<f64> {
        match self.client.get_midpoint(token_id).await {
            Ok(mid) if mid > 0.0 && mid < 1.0 => Some(mid),
            Ok(mid) => {
                warn!("Rejecting invalid midpoint {mid} for {token_id}");
                None
            }
            Err(e) => {
                warn!("Failed to get midpoint for {token_id}: {e}");
                None
            }
        }
    }

    /// REST fallback: poll every tracked market's midpoint and classify.
    pub async fn check_all_positions(
        &mut self,
        positions: &HashMap<String, MarketPosition>,
    ) -> PriceCheckOutcome {
        let mut outcome = PriceCheckOutcome::default();
        for (cid, position) in positions {
            let Some(midpoint) = self.get_current_midpoint(&position.token_id_yes).await else {
                continue;
            };
            self.classify(cid, position, midpoint, &mut outcome);
        }
        outcome
    }

    /// Stream path: coalesce events per asset (latest wins), convert NO
    /// token updates into YES midpoints, and classify the touched markets.
    pub fn update_midpoints_from_stream(
        &mut self,
        positions: &HashMap<String, MarketPosition>,
        events: Vec<PriceEvent>,
    ) -> PriceCheckOutcome {
        let mut latest: HashMap<String, PriceEvent> = HashMap::new();
        for event in events {
            latest.insert(event.asset_id.clone(), event);
        }
        let mut outcome = PriceCheckOutcome::default();
        if latest.is_empty() {
            return outcome;
        }

        let mut token_to_position: HashMap<&str, (&String, Side)> = HashMap::new();
        for (cid, position) in positions {
            token_to_position.insert(&position.token_id_yes, (cid, Side::Yes));
            token_to_position.insert(&position.token_id_no, (cid, Side::No));
        }

        let mut updated_mids: HashMap<String, f64> = HashMap::new();
        for (asset_id, event) in &latest {
            let Some((cid, side)) = token_to_position.get(asset_id.as_str()) else {
                continue;
            };
            let mid = event.midpoint();
            if mid <= 0.0 || mid >= 1.0 {
                continue;
            }
            // A NO-token midpoint is the complement of the YES midpoint.
            let yes_mid = match side {
                Side::Yes => mid,
                Side::No => 1.0 - mid,
            };
            updated_mids.insert((*cid).clone(), yes_mid);
        }

        for (cid, midpoint) in updated_mids {
            let Some(position) = positions.get(&cid) else {
                continue;
            };
            self.classify(&cid, position, midpoint, &mut outcome);
        }
        outcome
    }

    /// Put one (market, new midpoint) observation into a bucket and
    /// remember the midpoint.
    fn classify(
        &mut self,
        cid: &str,
        position: &MarketPosition,
        midpoint: f64,
        outcome: &mut PriceCheckOutcome,
    ) {
        self.last_midpoints.insert(cid.to_string(), midpoint);

        if midpoint < self.cfg.min_midpoint || midpoint > self.cfg.max_midpoint {
            warn!("Market {cid} midpoint at extreme ({midpoint:.4}), flagging for exit");
            outcome.stop_losses.push(cid.to_string());
            return;
        }

        let stop_threshold = pricing::stop_loss_threshold(&self.cfg, position.max_spread);
        let mut stop_loss_hit = false;
        if position.yes.inventory > 0.0 && position.yes.entry_price > 0.0 {
            let loss = position.yes.entry_price - midpoint;
            if loss >= stop_threshold {
                warn!(
                    "STOP-LOSS {cid} YES: entry={:.4} now={midpoint:.4} loss={loss:.4} threshold={stop_threshold:.4}",
                    position.yes.entry_price
                );
                stop_loss_hit = true;
            }
        }
        if position.no.inventory > 0.0 && position.no.entry_price > 0.0 {
            let no_mid = 1.0 - midpoint;
            let loss = position.no.entry_price - no_mid;
            if loss >= stop_threshold {
                warn!(
                    "STOP-LOSS {cid} NO: entry={:.4} now={no_mid:.4} loss={loss:.4} threshold={stop_threshold:.4}",
                    position.no.entry_price
                );
                stop_loss_hit = true;
            }
        }
        if stop_loss_hit {
            outcome.stop_losses.push(cid.to_string());
            return;
        }

        let drift = (midpoint - position.last_midpoint).abs();
        let drift_thresh = pricing::drift_threshold(&self.cfg, position.max_spread);
        if drift > drift_thresh {
            info!(
                "Drift detected for {cid}: {:.4} -> {midpoint:.4} (delta={drift:.4})",
                position.last_midpoint
            );
            outcome.drifted.push(cid.to_string());
        } else if position.has_inventory() {
            // Sub-drift move but holding shares: chase with the SELL.
            outcome.sell_reprices.push(cid.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::MarketPosition;
    use std::collections::HashMap;

    struct NoopExchange;

    #[async_trait::async_trait]
    impl ExchangeApi for NoopExchange {
        async fn get_midpoint(&self, _t: &str) -> Result<f64, clob_rs::ClobError> {
            Err(clob_rs::ClobError::Other("offline".into()))
        }
        async fn get_tick_size(&self, _t: &str) -> Result<f64, clob_rs::ClobError> {
            Err(clob_rs::ClobError::Other("offline".into()))
        }
        async fn get_order_book(
            &self,
            _t: &str,
        ) -> Result<clob_rs::markets::models::OrderBook, clob_rs::ClobError> {
            Err(clob_rs::ClobError::Other("offline".into()))
        }
        async fn get_spread(&self, _t: &str) -> Result<f64, clob_rs::ClobError> {
            Err(clob_rs::ClobError::Other("offline".into()))
        }
        async fn get_prices_history(
            &self,
            _t: &str,
            _i: &str,
            _f: u32,
        ) -> Result<Vec<clob_rs::markets::models::PricePoint>, clob_rs::ClobError> {
            Err(clob_rs::ClobError::Other("offline".into()))
        }
        async fn get_neg_risk(&self, _t: &str) -> Result<bool, clob_rs::ClobError> {
            Err(clob_rs::ClobError::Other("offline".into()))
        }
        async fn get_sampling_markets(
            &self,
            _c: &str,
        ) -> Result<clob_rs::markets::models::SamplingMarketsResponse, clob_rs::ClobError> {
            Err(clob_rs::ClobError::Other("offline".into()))
        }
        async fn post_order(
            &self,
            _a: &clob_rs::portfolio::models::OrderArgs,
            _o: clob_rs::portfolio::models::OrderType,
        ) -> Result<String, clob_rs::ClobError> {
            Err(clob_rs::ClobError::Other("offline".into()))
        }
        async fn cancel(&self, _o: &str) -> Result<(), clob_rs::ClobError> {
            Ok(())
        }
        async fn cancel_all(&self) -> Result<(), clob_rs::ClobError> {
            Ok(())
        }
        async fn get_orders(
            &self,
        ) -> Result<Vec<clob_rs::portfolio::models::OpenOrder>, clob_rs::ClobError> {
            Ok(Vec::new())
        }
        async fn get_order(
            &self,
            _o: &str,
        ) -> Result<clob_rs::portfolio::models::OrderRecord, clob_rs::ClobError> {
            Err(clob_rs::ClobError::Other("offline".into()))
        }
        async fn get_collateral_balance(&self) -> Result<f64, clob_rs::ClobError> {
            Ok(0.0)
        }
        async fn update_balance_allowance(&self, _t: &str) -> Result<(), clob_rs::ClobError> {
            Ok(())
        }
        async fn get_my_positions(
            &self,
        ) -> Result<Vec<clob_rs::data::models::DataPosition>, clob_rs::ClobError> {
            Ok(Vec::new())
        }
        async fn get_gamma_markets(
            &self,
            _q: &clob_rs::data::endpoints::GammaMarketsQuery,
        ) -> Result<Vec<clob_rs::data::models::GammaMarket>, clob_rs::ClobError> {
            Ok(Vec::new())
        }
        async fn get_gamma_markets_by_token(
            &self,
            _t: &str,
        ) -> Result<Vec<clob_rs::data::models::GammaMarket>, clob_rs::ClobError> {
            Ok(Vec::new())
        }
    }

    fn monitor() -> PriceMonitor {
        PriceMonitor::new(Arc::new(NoopExchange), Config::fast())
    }

    fn position(last_mid: f64) -> MarketPosition {
        MarketPosition::new(
            "0xc".into(),
            "111".into(),
            "222".into(),
            0.03,
            50.0,
            0.01,
            last_mid,
        )
    }

    fn positions(pos: MarketPosition) -> HashMap<String, MarketPosition> {
        HashMap::from([(pos.condition_id.clone(), pos)])
    }

    fn event(asset: &str, bid: f64, ask: f64) -> PriceEvent {
        PriceEvent {
            asset_id: asset.into(),
            best_bid: bid,
            best_ask: ask,
        }
    }

    #[test]
    fn small_move_without_inventory_is_ignored() {
        let mut m = monitor();
        let outcome =
            m.update_midpoints_from_stream(&positions(position(0.50)), vec![event("111", 0.50, 0.51)]);
        assert!(outcome.drifted.is_empty());
        assert!(outcome.stop_losses.is_empty());
        assert!(outcome.sell_reprices.is_empty());
    }

    #[test]
    fn large_move_is_drift() {
        let mut m = monitor();
        // threshold = max(0.03 * 0.15, 0.005) = 0.005; delta 0.02
        let outcome =
            m.update_midpoints_from_stream(&positions(position(0.50)), vec![event("111", 0.51, 0.53)]);
        assert_eq!(outcome.drifted, vec!["0xc"]);
        assert_eq!(m.last_midpoints.get("0xc"), Some(&0.52));
    }

    #[test]
    fn sub_drift_with_inventory_wants_sell_reprice() {
        let mut m = monitor();
        let mut pos = position(0.50);
        pos.yes.inventory = 50.0;
        let outcome =
            m.update_midpoints_from_stream(&positions(pos), vec![event("111", 0.50, 0.51)]);
        assert!(outcome.drifted.is_empty());
        assert_eq!(outcome.sell_reprices, vec!["0xc"]);
    }

    #[test]
    fn stop_loss_beats_drift() {
        let mut m = monitor();
        let mut pos = position(0.50);
        pos.yes.inventory = 50.0;
        pos.yes.entry_price = 0.48;
        // mid 0.44: loss 0.04 >= threshold 0.018
        let outcome =
            m.update_midpoints_from_stream(&positions(pos), vec![event("111", 0.43, 0.45)]);
        assert_eq!(outcome.stop_losses, vec!["0xc"]);
        assert!(outcome.drifted.is_empty());
    }

    #[test]
    fn no_side_stop_loss_uses_complement() {
        let mut m = monitor();
        let mut pos = position(0.50);
        pos.no.inventory = 50.0;
        pos.no.entry_price = 0.50;
        // YES mid moves to 0.54 -> NO mid 0.46, loss 0.04
        let outcome =
            m.update_midpoints_from_stream(&positions(pos), vec![event("111", 0.53, 0.55)]);
        assert_eq!(outcome.stop_losses, vec!["0xc"]);
    }

    #[test]
    fn extreme_midpoint_flags_exit() {
        let mut m = monitor();
        let outcome =
            m.update_midpoints_from_stream(&positions(position(0.06)), vec![event("111", 0.03, 0.05)]);
        assert_eq!(outcome.stop_losses, vec!["0xc"]);
    }

    #[test]
    fn no_token_event_maps_to_yes_midpoint() {
        let mut m = monitor();
        // NO token at 0.46 -> YES midpoint 0.54: drift from 0.50
        let outcome =
            m.update_midpoints_from_stream(&positions(position(0.50)), vec![event("222", 0.45, 0.47)]);
        assert_eq!(outcome.drifted, vec!["0xc"]);
        let mid = *m.last_midpoints.get("0xc").unwrap();
        assert!((mid - 0.54).abs() < 1e-9);
    }

    #[test]
    fn events_for_unknown_tokens_are_ignored() {
        let mut m = monitor();
        let outcome =
            m.update_midpoints_from_stream(&positions(position(0.50)), vec![event("999", 0.40, 0.42)]);
        assert!(outcome.drifted.is_empty() && outcome.stop_losses.is_empty());
    }

    #[test]
    fn coalescing_keeps_only_latest_event_per_asset() {
        let mut m = monitor();
        // First event would be a stop-loss-free drift; the later one wins.
        let outcome = m.update_midpoints_from_stream(
            &positions(position(0.50)),
            vec![event("111", 0.60, 0.62), event("111", 0.50, 0.51)],
        );
        assert!(outcome.drifted.is_empty());
        let mid = *m.last_midpoints.get("0xc").unwrap();
        assert!((mid - 0.505).abs() < 1e-9);
    }
}
