//! Read-only Data API (on-chain positions) and Gamma API (metadata).

use serde::Serialize;

use crate::client::ClobClient;
use crate::data::models::{DataPosition, GammaMarket};
use crate::errors::ClobError;
use crate::helpers::with_query;

const GET_POSITIONS: &str = "/positions";
const GET_GAMMA_MARKETS: &str = "/markets";

/// Query for the Gamma bulk market listing.
#[derive(Debug, Clone, Default, Serialize)]
pub struct GammaMarketsQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub closed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ascending: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clob_token_ids: Option<String>,
}

impl ClobClient {
    /// All on-chain conditional-token positions for a wallet.
    pub async fn get_user_positions(&self, wallet: &str) -> Result<Vec<DataPosition>, ClobError> {
        let path = format!("{}?user={}", GET_POSITIONS, wallet.to_lowercase());
        let resp = self.data_get(&path).await?;
        let data: Vec<DataPosition> = serde_json::from_str(&resp)
            .map_err(|e| ClobError::Other(format!("Parse error: {e}. Response: {resp}")))?;
        Ok(data)
    }

    /// One page of Gamma market metadata.
    pub async fn get_gamma_markets(
        &self,
        query: &GammaMarketsQuery,
    ) -> Result<Vec<GammaMarket>, ClobError> {
        let path = with_query(GET_GAMMA_MARKETS, query)?;
        let resp = self.gamma_get(&path).await?;
        let data: Vec<GammaMarket> = serde_json::from_str(&resp)
            .map_err(|e| ClobError::Other(format!("Parse error: {e}. Response: {resp}")))?;
        Ok(data)
    }

    /// Market metadata looked up by one of its token ids.
    pub async fn get_gamma_markets_by_token(
        &self,
        token_id: &str,
    ) -> Result<Vec<GammaMarket>, ClobError> {
        let query = GammaMarketsQuery {
            clob_token_ids: Some(token_id.to_string()),
            ..Default::default()
        };
        self.get_gamma_markets(&query).await
    }
}
