//! Market-data endpoints: midpoint, tick size, book, spread, history.

use crate::client::ClobClient;
use crate::errors::ClobError;
use crate::markets::models::{
    MidpointResponse, NegRiskResponse, OrderBook, PriceHistoryResponse, PricePoint,
    SamplingMarketsResponse, SpreadResponse, TickSizeResponse,
};

const GET_MIDPOINT: &str = "/midpoint";
const GET_TICK_SIZE: &str = "/tick-size";
const GET_ORDER_BOOK: &str = "/book";
const GET_SPREAD: &str = "/spread";
const GET_PRICES_HISTORY: &str = "/prices-history";
const GET_NEG_RISK: &str = "/neg-risk";
const GET_SAMPLING_MARKETS: &str = "/sampling-simplified-markets";

impl ClobClient {
    /// Midpoint between best bid and best ask for a token, in (0, 1).
    pub async fn get_midpoint(&self, token_id: &str) -> Result<f64, ClobError> {
        let path = format!("{}?token_id={}", GET_MIDPOINT, token_id);
        let resp = self.unauthenticated_get(&path).await?;
        let data: MidpointResponse = serde_json::from_str(&resp)
            .map_err(|e| ClobError::Other(format!("Parse error: {e}. Response: {resp}")))?;
        Ok(data.mid)
    }

    /// Minimum price increment for a token's market.
    pub async fn get_tick_size(&self, token_id: &str) -> Result<f64, ClobError> {
        let path = format!("{}?token_id={}", GET_TICK_SIZE, token_id);
        let resp = self.unauthenticated_get(&path).await?;
        let data: TickSizeResponse = serde_json::from_str(&resp)
            .map_err(|e| ClobError::Other(format!("Parse error: {e}. Response: {resp}")))?;
        Ok(data.minimum_tick_size)
    }

    /// Order-book snapshot. A 404 here means the market is gone and is
    /// mapped to [`ClobError::DeadMarket`] so recovery can write shares off.
    pub async fn get_order_book(&self, token_id: &str) -> Result<OrderBook, ClobError> {
        let path = format!("{}?token_id={}", GET_ORDER_BOOK, token_id);
        let resp = match self.unauthenticated_get(&path).await {
            Err(ClobError::Client { status: 404, .. }) => return Err(ClobError::DeadMarket),
            other => other?,
        };
        let data: OrderBook = serde_json::from_str(&resp)
            .map_err(|e| ClobError::Other(format!("Parse error: {e}. Response: {resp}")))?;
        Ok(data)
    }

    /// Current quoted spread for a token.
    pub async fn get_spread(&self, token_id: &str) -> Result<f64, ClobError> {
        let path = format!("{}?token_id={}", GET_SPREAD, token_id);
        let resp = self.unauthenticated_get(&path).await?;
        let data: SpreadResponse = serde_json::from_str(&resp)
            .map_err(|e| ClobError::Other(format!("Parse error: {e}. Response: {resp}")))?;
        Ok(data.spread)
    }

    /// Short price-history series for a token (`interval` e.g. "1d",
    /// `fidelity` in minutes).
    pub async fn get_prices_history(
        &self,
        token_id: &str,
        interval: &str,
        fidelity: u32,
    ) -> Result<Vec<PricePoint>, ClobError> {
        let path = format!(
            "{}?market={}&interval={}&fidelity={}",
            GET_PRICES_HISTORY, token_id, interval, fidelity
        );
        let resp = self.unauthenticated_get(&path).await?;
        let data: PriceHistoryResponse = serde_json::from_str(&resp)
            .map_err(|e| ClobError::Other(format!("Parse error: {e}. Response: {resp}")))?;
        Ok(data.history)
    }

    /// Whether the market shares collateral across outcomes.
    pub async fn get_neg_risk(&self, token_id: &str) -> Result<bool, ClobError> {
        let path = format!("{}?token_id={}", GET_NEG_RISK, token_id);
        let resp = self.unauthenticated_get(&path).await?;
        let data: NegRiskResponse = serde_json::from_str(&resp)
            .map_err(|e| ClobError::Other(format!("Parse error: {e}. Response: {resp}")))?;
        Ok(data.neg_risk)
    }

    /// One page of the rewards-eligible market listing.
    pub async fn get_sampling_markets(
        &self,
        next_cursor: &str,
    ) -> Result<SamplingMarketsResponse, ClobError> {
        let path = format!("{}?next_cursor={}", GET_SAMPLING_MARKETS, next_cursor);
        let resp = self.unauthenticated_get(&path).await?;
        let data: SamplingMarketsResponse = serde_json::from_str(&resp)
            .map_err(|e| ClobError::Other(format!("Parse error: {e}. Response: {resp}")))?;
        Ok(data)
    }
}
