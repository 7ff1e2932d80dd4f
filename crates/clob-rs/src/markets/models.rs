use serde::Deserialize;

use crate::serde_util::{flexible_f64, flexible_f64_opt};

#[derive(Debug, Clone, Deserialize)]
pub struct MidpointResponse {
    #[serde(deserialize_with = "flexible_f64")]
    pub mid: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TickSizeResponse {
    #[serde(deserialize_with = "flexible_f64")]
    pub minimum_tick_size: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SpreadResponse {
    #[serde(deserialize_with = "flexible_f64")]
    pub spread: f64,
}

/// One price level. Prices and sizes come over the wire as strings.
#[derive(Debug, Clone, Deserialize)]
pub struct BookLevel {
    #[serde(deserialize_with = "flexible_f64")]
    pub price: f64,
    #[serde(deserialize_with = "flexible_f64")]
    pub size: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrderBook {
    #[serde(default)]
    pub bids: Vec<BookLevel>,
    #[serde(default)]
    pub asks: Vec<BookLevel>,
    #[serde(default, deserialize_with = "flexible_f64_opt")]
    pub min_order_size: Option<f64>,
}

/// One `{t, p}` sample from the price-history endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct PricePoint {
    pub t: i64,
    #[serde(deserialize_with = "flexible_f64")]
    pub p: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PriceHistoryResponse {
    #[serde(default)]
    pub history: Vec<PricePoint>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NegRiskResponse {
    pub neg_risk: bool,
}

/// Reward parameters attached to a sampling market.
///
/// `max_spread` arrives in cents; [`RewardsConfig::max_spread_price`]
/// converts to price units for all downstream math.
#[derive(Debug, Clone, Deserialize)]
pub struct RewardsConfig {
    #[serde(default, deserialize_with = "flexible_f64_opt")]
    pub max_spread: Option<f64>,
    #[serde(default, deserialize_with = "flexible_f64_opt")]
    pub min_size: Option<f64>,
    #[serde(default)]
    pub rates: Vec<RewardRate>,
}

impl RewardsConfig {
    pub fn max_spread_price(&self) -> Option<f64> {
        self.max_spread.map(|cents| cents / 100.0)
    }

    pub fn daily_rate(&self) -> f64 {
        self.rates.iter().map(|r| r.rewards_daily_rate).sum()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RewardRate {
    #[serde(default, deserialize_with = "flexible_f64")]
    pub rewards_daily_rate: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MarketToken {
    #[serde(default)]
    pub token_id: String,
    #[serde(default)]
    pub outcome: String,
    #[serde(default, deserialize_with = "flexible_f64_opt")]
    pub price: Option<f64>,
}

/// One market from the sampling (rewards-eligible) listing.
#[derive(Debug, Clone, Deserialize)]
pub struct SamplingMarket {
    #[serde(default)]
    pub condition_id: String,
    #[serde(default)]
    pub question: String,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub closed: bool,
    #[serde(default)]
    pub archived: bool,
    #[serde(default)]
    pub accepting_orders: bool,
    #[serde(default)]
    pub end_date_iso: Option<String>,
    #[serde(default)]
    pub tokens: Vec<MarketToken>,
    #[serde(default)]
    pub rewards: Option<RewardsConfig>,
}

impl SamplingMarket {
    /// (yes, no) token ids, by outcome label with positional fallback.
    pub fn yes_no_tokens(&self) -> Option<(&MarketToken, &MarketToken)> {
        let yes = self
            .tokens
            .iter()
            .find(|t| t.outcome.eq_ignore_ascii_case("yes"));
        let no = self
            .tokens
            .iter()
            .find(|t| t.outcome.eq_ignore_ascii_case("no"));
        match (yes, no) {
            (Some(y), Some(n)) => Some((y, n)),
            _ => {
                if self.tokens.len() >= 2 {
                    Some((&self.tokens[0], &self.tokens[1]))
                } else {
                    None
                }
            }
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SamplingMarketsResponse {
    #[serde(default)]
    pub data: Vec<SamplingMarket>,
    #[serde(default)]
    pub next_cursor: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewards_max_spread_converts_from_cents() {
        let json = r#"{"max_spread": 3.0, "min_size": "50", "rates": [{"rewards_daily_rate": "12.5"}]}"#;
        let rewards: RewardsConfig = serde_json::from_str(json).unwrap();
        assert_eq!(rewards.max_spread_price(), Some(0.03));
        assert_eq!(rewards.min_size, Some(50.0));
        assert_eq!(rewards.daily_rate(), 12.5);
    }

    #[test]
    fn book_levels_parse_string_prices() {
        let json = r#"{"bids": [{"price": "0.48", "size": "120"}], "asks": [], "min_order_size": "5"}"#;
        let book: OrderBook = serde_json::from_str(json).unwrap();
        assert_eq!(book.bids[0].price, 0.48);
        assert_eq!(book.min_order_size, Some(5.0));
    }

    #[test]
    fn yes_no_tokens_fall_back_to_position() {
        let json = r#"{"condition_id": "0xc", "tokens": [
            {"token_id": "1", "outcome": "Up", "price": 0.6},
            {"token_id": "2", "outcome": "Down"}
        ]}"#;
        let market: SamplingMarket = serde_json::from_str(json).unwrap();
        let (yes, no) = market.yes_no_tokens().unwrap();
        assert_eq!(yes.token_id, "1");
        assert_eq!(no.token_id, "2");
    }
}
