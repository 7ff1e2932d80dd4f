//! Market discovery and ranking.
//!
//! Two-phase scan: a cheap pre-filter over the full sampling listing
//! (no extra API calls), then orderbook/spread/volatility detail fetches
//! for only the top candidates. A bulk Gamma query supplies 24h volume
//! and event grouping between the phases.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use clob_rs::data::endpoints::GammaMarketsQuery;
use clob_rs::errors::ClobError;
use clob_rs::markets::models::SamplingMarket;

use crate::config::Config;
use crate::exchange::ExchangeApi;
use crate::manager::truncate;
use crate::pricing;

const FIRST_CURSOR: &str = "MA==";
const END_CURSOR: &str = "LTE=";

const VOLUME_PAGE_SIZE: u32 = 500;
const VOLUME_MAX_OFFSET: u32 = 5000;

/// A candidate market with everything entry placement needs.
#[derive(Debug, Clone)]
pub struct MarketOpportunity {
    pub condition_id: String,
    pub question: String,
    pub token_id_yes: String,
    pub token_id_no: String,
    pub midpoint: f64,
    pub reward_rate: f64,
    pub min_size: f64,
    pub max_spread: f64,
    pub book_depth_usdc: f64,
    pub current_spread: f64,
    pub tick_size: f64,
    pub neg_risk: bool,
    pub opportunity_score: f64,
}

/// Lightweight candidate carved out of the sampling response alone.
#[derive(Debug, Clone)]
struct PreCandidate {
    condition_id: String,
    question: String,
    token_id_yes: String,
    token_id_no: String,
    midpoint: f64,
    reward_rate: f64,
    min_size: f64,
    max_spread: f64,
    pre_score: f64,
}

pub struct MarketScanner {
    client: Arc<dyn ExchangeApi>,
    cfg: Config,
}

impl MarketScanner {
    pub fn new(client: Arc<dyn ExchangeApi>, cfg: Config) -> Self {
        Self { client, cfg }
    }

    /// All sampling (rewards-eligible) markets, following pagination.
    pub async fn fetch_all_sampling_markets(&self) -> Result<Vec<SamplingMarket>, ClobError> {
        let mut all = Vec::new();
        let mut cursor = FIRST_CURSOR.to_string();
        while cursor != END_CURSOR {
            let page = self.client.get_sampling_markets(&cursor).await?;
            all.extend(page.data);
            if page.next_cursor.is_empty() {
                break;
            }
            cursor = page.next_cursor;
        }
        info!("Fetched {} sampling markets", all.len());
        Ok(all)
    }

    /// 24h volume and event grouping per condition id, from the Gamma
    /// bulk listing sorted by volume. Stops paging once a full page falls
    /// below the volume threshold.
    async fn fetch_volume_data(&self) -> (HashMap<String, f64>, HashMap<String, String>) {
        let mut volumes = HashMap::new();
        let mut event_groups = HashMap::new();

        let mut offset = 0;
        while offset < VOLUME_MAX_OFFSET {
            let query = GammaMarketsQuery {
                active: Some(true),
                closed: Some(false),
                limit: Some(VOLUME_PAGE_SIZE),
                offset: Some(offset),
                order: Some("volume24hr".to_string()),
                ascending: Some(false),
                ..Default::default()
            };
            let page = match self.client.get_gamma_markets(&query).await {
                Ok(p) => p,
                Err(e) => {
                    warn!("Failed to fetch volume data from Gamma API: {e}");
                    break;
                }
            };
            if page.is_empty() {
                break;
            }
            let mut above_threshold = 0usize;
            for market in &page {
                if market.condition_id.is_empty() {
                    continue;
                }
                let vol = market.volume_24hr.unwrap_or(0.0);
                volumes.insert(market.condition_id.clone(), vol);
                if vol >= self.cfg.min_daily_volume {
                    above_threshold += 1;
                }
                if let Some(event) = market.events.first() {
                    event_groups.insert(market.condition_id.clone(), event.id_string());
                }
            }
            if above_threshold == 0 {
                break;
            }
            offset += VOLUME_PAGE_SIZE;
        }
        info!("Fetched volume data for {} markets from Gamma API", volumes.len());
        (volumes, event_groups)
    }

    /// Phase 1: filter on the sampling response alone. No API calls.
    fn pre_filter(&self, market: &SamplingMarket) -> Option<PreCandidate> {
        if !market.active || !market.accepting_orders || market.closed || market.archived {
            return None;
        }

        // Markets near expiry swing hard; skip them.
        if let Some(end_date) = &market.end_date_iso {
            if let Ok(expiry) = DateTime::parse_from_rfc3339(end_date) {
                let hours_left =
                    (expiry.with_timezone(&Utc) - Utc::now()).num_seconds() as f64 / 3600.0;
                if hours_left < self.cfg.min_hours_to_expiry {
                    return None;
                }
            }
            // Unparsable dates don't filter.
        }

        let rewards = market.rewards.as_ref()?;
        let max_spread = rewards.max_spread_price()?;
        let min_size = rewards.min_size?;
        if rewards.rates.is_empty() || max_spread <= 0.0 || min_size <= 0.0 {
            return None;
        }
        if max_spread < self.cfg.min_max_spread {
            return None;
        }
        let daily_rate = rewards.daily_rate();
        if daily_rate < self.cfg.min_reward_rate {
            return None;
        }

        let (yes, no) = market.yes_no_tokens()?;
        let midpoint = yes.price?;
        if yes.token_id.is_empty() || no.token_id.is_empty() || midpoint <= 0.0 {
            return None;
        }
        if midpoint < self.cfg.min_midpoint || midpoint > self.cfg.max_midpoint {
            return None;
        }

        // Skip markets whose worst-side entry cost blows the cap.
        let worst_side_price = midpoint.max(1.0 - midpoint);
        if min_size * worst_side_price > self.cfg.max_entry_cost {
            return None;
        }

        if market.condition_id.is_empty() {
            return None;
        }

        Some(PreCandidate {
            condition_id: market.condition_id.clone(),
            question: market.question.clone(),
            token_id_yes: yes.token_id.clone(),
            token_id_no: no.token_id.clone(),
            midpoint,
            reward_rate: daily_rate,
            min_size,
            max_spread,
            // Refined with book depth after the detail fetch.
            pre_score: daily_rate / max_spread.max(0.001),
        })
    }

    /// Phase 2: orderbook, spread, volatility, tick size and neg-risk for
    /// one pre-filtered candidate.
    async fn fetch_details(&self, candidate: &PreCandidate) -> Option<MarketOpportunity> {
        let book = match self.client.get_order_book(&candidate.token_id_yes).await {
            Ok(b) => b,
            Err(e) => {
                warn!("Failed to fetch details for {}: {e}", candidate.condition_id);
                return None;
            }
        };
        let book_depth = pricing::book_depth_in_range(
            &book.bids,
            &book.asks,
            candidate.midpoint,
            candidate.max_spread,
        );
        if book_depth > self.cfg.max_book_depth_usdc {
            debug!(
                "  Skipped {}: depth ${book_depth:.0} > max ${}",
                truncate(&candidate.question, 40),
                self.cfg.max_book_depth_usdc
            );
            return None;
        }
        if book_depth < self.cfg.min_book_depth_usdc {
            debug!(
                "  Skipped {}: depth ${book_depth:.0} < min ${}",
                truncate(&candidate.question, 40),
                self.cfg.min_book_depth_usdc
            );
            return None;
        }

        let current_spread = match self.client.get_spread(&candidate.token_id_yes).await {
            Ok(s) => s,
            Err(e) => {
                warn!("Failed to fetch details for {}: {e}", candidate.condition_id);
                return None;
            }
        };
        // A spread much wider than max_spread means no active LPs: we'd
        // be the sole provider and get adversely selected.
        if current_spread > candidate.max_spread * self.cfg.max_spread_ratio {
            debug!(
                "  Skipped {}: spread {current_spread:.4} (wide spread)",
                truncate(&candidate.question, 40)
            );
            return None;
        }

        if self.cfg.max_volatility_ratio > 0.0 {
            match self
                .client
                .get_prices_history(&candidate.token_id_yes, "1d", 60)
                .await
            {
                Ok(history) => {
                    let prices: Vec<f64> = history.iter().map(|p| p.p).collect();
                    if prices.len() < self.cfg.min_volatility_data_points {
                        debug!(
                            "  Skipped {}: only {} price points",
                            truncate(&candidate.question, 40),
                            prices.len()
                        );
                        return None;
                    }
                    let range = prices.iter().cloned().fold(f64::MIN, f64::max)
                        - prices.iter().cloned().fold(f64::MAX, f64::min);
                    let vol_ratio = range / candidate.max_spread;
                    if vol_ratio > self.cfg.max_volatility_ratio {
                        debug!(
                            "  Skipped {}: volatility ratio {vol_ratio:.1}x",
                            truncate(&candidate.question, 40)
                        );
                        return None;
                    }
                }
                // Volatility-check failures don't filter; the other
                // filters catch bad markets.
                Err(e) => debug!(
                    "  Volatility check failed for {}: {e}",
                    truncate(&candidate.question, 40)
                ),
            }
        }

        let tick_size = match self.client.get_tick_size(&candidate.token_id_yes).await {
            Ok(t) => t,
            Err(e) => {
                warn!("Failed to fetch details for {}: {e}", candidate.condition_id);
                return None;
            }
        };
        let neg_risk = self
            .client
            .get_neg_risk(&candidate.token_id_yes)
            .await
            .unwrap_or(false);

        let mut score = pricing::opportunity_score(
            candidate.reward_rate,
            book_depth,
            current_spread,
            candidate.max_spread,
        );
        // Shared-collateral markets are more capital efficient.
        if neg_risk {
            score *= self.cfg.neg_risk_score_boost;
        }

        Some(MarketOpportunity {
            condition_id: candidate.condition_id.clone(),
            question: candidate.question.clone(),
            token_id_yes: candidate.token_id_yes.clone(),
            token_id_no: candidate.token_id_no.clone(),
            midpoint: candidate.midpoint,
            reward_rate: candidate.reward_rate,
            min_size: candidate.min_size,
            max_spread: candidate.max_spread,
            book_depth_usdc: book_depth,
            current_spread,
            tick_size,
            neg_risk,
            opportunity_score: score,
        })
    }

    /// Full scan: pre-filter, volume filter, detail fetch for the top
    /// candidates, score, event-diversity cap, final top-N. Markets whose
    /// tokens appear in `force_include_tokens` (pending recovery) survive
    /// every cut.
    pub async fn scan_and_rank(
        &self,
        max_markets: usize,
        force_include_tokens: Option<&HashSet<String>>,
    ) -> Vec<MarketOpportunity> {
        let max_markets = if max_markets > 0 {
            max_markets
        } else if self.cfg.max_markets_cap > 0 {
            self.cfg.max_markets_cap
        } else {
            999
        };

        let raw_markets = match self.fetch_all_sampling_markets().await {
            Ok(m) => m,
            Err(e) => {
                warn!("Sampling fetch failed: {e}");
                return Vec::new();
            }
        };

        let mut candidates: Vec<PreCandidate> =
            raw_markets.iter().filter_map(|m| self.pre_filter(m)).collect();

        // Phase 1.5: volume filter. Markets missing from the volume data
        // are treated as zero volume — we page by volume descending, so
        // anything absent is low-volume.
        let (volumes, event_groups) = self.fetch_volume_data().await;
        if !volumes.is_empty() {
            let before = candidates.len();
            candidates.retain(|c| {
                volumes.get(&c.condition_id).copied().unwrap_or(0.0) >= self.cfg.min_daily_volume
            });
            let filtered = before - candidates.len();
            if filtered > 0 {
                info!(
                    "Volume filter: removed {filtered} illiquid markets (<${} 24hr)",
                    self.cfg.min_daily_volume
                );
            }
        }

        if let Some(force_tokens) = force_include_tokens {
            let have: HashSet<String> = candidates.iter().map(|c| c.condition_id.clone()).collect();
            for market in &raw_markets {
                let touches = market
                    .tokens
                    .iter()
                    .any(|t| force_tokens.contains(&t.token_id));
                if touches && !market.condition_id.is_empty() && !have.contains(&market.condition_id)
                {
                    if let Some(forced) = self.pre_filter(market) {
                        info!("Force-included recovery market {}", &market.condition_id[..16.min(market.condition_id.len())]);
                        candidates.push(forced);
                    }
                }
            }
        }

        candidates.sort_by(|a, b| {
            b.pre_score
                .partial_cmp(&a.pre_score)
                .unwrap_or(Ordering::Equal)
        });
        let top_candidates: Vec<PreCandidate> = candidates
            .iter()
            .take(self.cfg.detail_candidates)
            .cloned()
            .collect();
        info!(
            "Pre-filtered {} markets -> {} eligible -> top {} for detail fetch",
            raw_markets.len(),
            candidates.len(),
            top_candidates.len()
        );

        let mut opportunities = Vec::new();
        let mut rejected = 0usize;
        for candidate in &top_candidates {
            match self.fetch_details(candidate).await {
                Some(opp) => opportunities.push(opp),
                None => rejected += 1,
            }
        }
        if rejected > 0 {
            info!(
                "Detail filter: {} checked, {} passed, {rejected} rejected",
                top_candidates.len(),
                opportunities.len()
            );
        }

        opportunities.sort_by(|a, b| {
            b.opportunity_score
                .partial_cmp(&a.opportunity_score)
                .unwrap_or(Ordering::Equal)
        });

        // Event diversity: correlated buckets share one trigger, so cap
        // how many markets we take from a single event group.
        if !event_groups.is_empty() && self.cfg.max_markets_per_event > 0 {
            let mut event_counts: HashMap<String, usize> = HashMap::new();
            let mut diverse = Vec::new();
            let mut skipped = 0usize;
            for opp in opportunities {
                let eid = event_groups
                    .get(&opp.condition_id)
                    .cloned()
                    .unwrap_or_else(|| opp.condition_id.clone());
                let count = event_counts.entry(eid).or_insert(0);
                if *count >= self.cfg.max_markets_per_event {
                    skipped += 1;
                    continue;
                }
                *count += 1;
                diverse.push(opp);
            }
            if skipped > 0 {
                info!(
                    "Event diversity: capped {skipped} markets (max {} per event group)",
                    self.cfg.max_markets_per_event
                );
            }
            opportunities = diverse;
        }

        let mut top: Vec<MarketOpportunity> =
            opportunities.iter().take(max_markets).cloned().collect();
        if let Some(force_tokens) = force_include_tokens {
            let have: HashSet<String> = top.iter().map(|o| o.condition_id.clone()).collect();
            for opp in opportunities.iter().skip(max_markets) {
                let touches = force_tokens.contains(&opp.token_id_yes)
                    || force_tokens.contains(&opp.token_id_no);
                if touches && !have.contains(&opp.condition_id) {
                    top.push(opp.clone());
                }
            }
        }

        info!("Detailed analysis: {} scored, top {} selected", opportunities.len(), top.len());
        for opp in &top {
            info!(
                "  [{:.6}] {} | rate=${:.2}/day | depth=${:.0} | spread={:.4} | mid={:.4}",
                opp.opportunity_score,
                truncate(&opp.question, 60),
                opp.reward_rate,
                opp.book_depth_usdc,
                opp.current_spread,
                opp.midpoint
            );
        }
        top
    }
}
